use std::ops::Deref;

use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::model::mongodb::Id;

/// Core vote data, as stored in the database. A vote is immutable once cast;
/// there is deliberately no way to modify or delete one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteCore {
    /// Who cast the vote.
    pub voter_id: Id,
    /// The campaign it was cast in.
    pub campaign_id: Id,
    /// The candidate it was cast for.
    pub candidate_id: Id,
    /// When it was cast.
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub cast_at: DateTime<Utc>,
}

impl VoteCore {
    /// A fresh vote, stamped with the current time.
    pub fn new(voter_id: Id, campaign_id: Id, candidate_id: Id) -> Self {
        Self {
            voter_id,
            campaign_id,
            candidate_id,
            cast_at: Utc::now(),
        }
    }
}

/// A vote without an ID.
pub type NewVote = VoteCore;

/// A vote from the database, with its unique ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub vote: VoteCore,
}

impl Deref for Vote {
    type Target = VoteCore;

    fn deref(&self) -> &Self::Target {
        &self.vote
    }
}
