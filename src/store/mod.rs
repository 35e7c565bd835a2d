use std::collections::HashMap;
use std::sync::Arc;

use rocket::{
    fairing::{Fairing, Info, Kind},
    Build, Rocket,
};
use serde::Deserialize;

use crate::error::Result;
use crate::model::{
    campaign::{Campaign, CampaignStatus, NewCampaign},
    candidate::{Candidate, NewCandidate},
    mongodb::Id,
    user::{NewUser, User},
    vote::{NewVote, Vote},
};

pub mod memory;
pub mod mongo;

pub use memory::MemStore;
pub use mongo::MongoStore;

/// The handle routes and background tasks use to reach storage.
pub type SharedStore = Arc<dyn VoteStore>;

/// The persistence boundary. Everything the engine needs from durable
/// storage goes through this trait; the only write path for votes is
/// [`VoteStore::insert_vote_within_quota`], which must be atomic with
/// respect to concurrent calls for the same (voter, campaign) pair.
#[rocket::async_trait]
pub trait VoteStore: Send + Sync {
    // Users.
    async fn insert_user(&self, user: NewUser) -> Result<User>;
    async fn user(&self, id: Id) -> Result<Option<User>>;
    async fn user_by_member_number(&self, member_number: &str) -> Result<Option<User>>;
    async fn user_by_email(&self, email: &str) -> Result<Option<User>>;

    // Campaigns.
    async fn insert_campaign(&self, campaign: NewCampaign) -> Result<Campaign>;
    async fn campaign(&self, id: Id) -> Result<Option<Campaign>>;
    /// All campaigns, oldest first.
    async fn campaigns(&self) -> Result<Vec<Campaign>>;
    async fn replace_campaign(&self, id: Id, campaign: NewCampaign) -> Result<Campaign>;
    async fn set_campaign_status(&self, id: Id, status: CampaignStatus) -> Result<()>;
    /// Delete a campaign and its candidates. The caller is responsible for
    /// refusing the deletion if any votes reference the campaign.
    async fn delete_campaign(&self, id: Id) -> Result<()>;

    // Candidates.
    async fn insert_candidate(&self, candidate: NewCandidate) -> Result<Candidate>;
    async fn candidate(&self, id: Id) -> Result<Option<Candidate>>;
    /// A campaign's candidates in creation order. This ordering is the
    /// tally tie-break, so it must be stable.
    async fn candidates_for(&self, campaign_id: Id) -> Result<Vec<Candidate>>;
    async fn replace_candidate(&self, id: Id, candidate: NewCandidate) -> Result<Candidate>;
    async fn delete_candidate(&self, id: Id) -> Result<()>;

    // Votes.
    /// Atomically append a vote iff the voter has cast fewer than `quota`
    /// votes in the campaign. Returns the stored vote and the number of
    /// votes the voter has now used. Two concurrent calls for the same
    /// (voter, campaign) pair must never both succeed past the quota.
    async fn insert_vote_within_quota(&self, vote: NewVote, quota: u32) -> Result<(Vote, u32)>;
    async fn votes_used(&self, voter_id: Id, campaign_id: Id) -> Result<u32>;
    async fn votes_by_voter(&self, voter_id: Id, campaign_id: Id) -> Result<Vec<Vote>>;
    async fn campaign_has_votes(&self, campaign_id: Id) -> Result<bool>;
    async fn candidate_has_votes(&self, candidate_id: Id) -> Result<bool>;
    /// Vote counts per candidate for a campaign. Candidates with no votes
    /// are absent from the map.
    async fn candidate_vote_counts(&self, campaign_id: Id) -> Result<HashMap<Id, u64>>;
    /// Number of distinct voters who have cast at least one vote.
    async fn unique_voters(&self, campaign_id: Id) -> Result<u64>;
}

/// Configuration for the storage backend.
#[derive(Deserialize)]
struct StorageConfig {
    storage: String,
    db_uri: Option<String>,
    db_name: Option<String>,
}

/// A fairing that loads the storage config, connects the selected backend,
/// performs any setup necessary, and places a [`SharedStore`] into managed
/// state. If a store is already managed (as in tests), it is left alone.
pub struct StorageFairing;

#[rocket::async_trait]
impl Fairing for StorageFairing {
    fn info(&self) -> Info {
        Info {
            name: "Storage",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        if rocket.state::<SharedStore>().is_some() {
            return Ok(rocket);
        }

        // Load the config.
        let config = match rocket.figment().extract::<StorageConfig>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load storage config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };

        let store: SharedStore = match config.storage.as_str() {
            "memory" => {
                warn!("Using ephemeral in-memory storage; all data is lost on shutdown");
                Arc::new(MemStore::new())
            }
            "mongodb" => {
                let uri = match config.db_uri {
                    Some(uri) => uri,
                    None => {
                        error!("`db_uri` must be set when `storage` is \"mongodb\"");
                        return Err(rocket);
                    }
                };
                let db_name = config.db_name.unwrap_or_else(|| "urna".to_string());
                info!("Loaded storage config, connecting...");
                match MongoStore::connect(&uri, &db_name).await {
                    Ok(store) => {
                        info!("...database connection online!");
                        Arc::new(store)
                    }
                    Err(e) => {
                        error!("Failed to connect to database: {e}");
                        return Err(rocket);
                    }
                }
            }
            other => {
                error!("Unknown storage backend {other:?}; expected \"mongodb\" or \"memory\"");
                return Err(rocket);
            }
        };

        // Manage the state.
        rocket = rocket.manage(store);
        Ok(rocket)
    }
}
