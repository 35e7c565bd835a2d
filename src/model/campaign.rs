use std::ops::{Deref, DerefMut};

use chrono::{DateTime, Utc};
use mongodb::bson::{serde_helpers::chrono_datetime_as_bson_datetime, to_bson, Bson};
use serde::{Deserialize, Serialize};

use crate::model::mongodb::Id;

/// Core campaign data, as stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignCore {
    /// Campaign title.
    pub title: String,
    /// Free-form description shown to voters.
    pub description: String,
    /// How many votes each voter may cast in this campaign.
    pub votes_per_voter: u32,
    /// Lifecycle state.
    pub status: CampaignStatus,
    /// Start of the voting window.
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub start_time: DateTime<Utc>,
    /// End of the voting window.
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub end_time: DateTime<Utc>,
    /// The admin who created the campaign.
    pub created_by: Id,
}

impl CampaignCore {
    /// Is the given instant within the campaign's voting window?
    pub fn window_contains(&self, at: DateTime<Utc>) -> bool {
        self.start_time <= at && at <= self.end_time
    }
}

/// A campaign without an ID.
pub type NewCampaign = CampaignCore;

/// A campaign from the database, with its unique ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub campaign: CampaignCore,
}

impl Deref for Campaign {
    type Target = CampaignCore;

    fn deref(&self) -> &Self::Target {
        &self.campaign
    }
}

impl DerefMut for Campaign {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.campaign
    }
}

/// States in the campaign lifecycle.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    /// Not (or no longer) accepting votes. Campaigns start here.
    Inactive,
    /// Open for voting within the configured window.
    Active,
    /// Closed for good; results are final.
    Finished,
}

impl CampaignStatus {
    pub fn is_active(self) -> bool {
        self == Self::Active
    }
}

impl From<CampaignStatus> for Bson {
    fn from(status: CampaignStatus) -> Self {
        to_bson(&status).expect("Serialisation is infallible")
    }
}
