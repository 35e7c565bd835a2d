use std::ops::Deref;

use mongodb::{
    bson::doc, error::Error as DbError, options::IndexOptions, Collection, Database, IndexModel,
};

use crate::model::{
    campaign::{Campaign, NewCampaign},
    candidate::{Candidate, NewCandidate},
    user::{NewUser, User},
    vote::{NewVote, Vote},
};

use crate::store::mongo::QuotaClaim;

/// A type that can be directly inserted/read to/from the database.
pub trait MongoCollection {
    /// The name of the collection.
    const NAME: &'static str;
}

/// A database collection of the given type.
pub struct Coll<T>(Collection<T>);

impl<T> Coll<T>
where
    T: MongoCollection,
{
    /// Get a handle on this collection in the given database.
    pub fn from_db(db: &Database) -> Self {
        Self(db.collection(T::NAME))
    }
}

// `Derive(Clone)` would only derive if `T: Clone`, but we don't need that bound.
impl<T> Clone for Coll<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Deref for Coll<T> {
    type Target = Collection<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

// User collections
const USERS: &str = "users";
impl MongoCollection for User {
    const NAME: &'static str = USERS;
}
impl MongoCollection for NewUser {
    const NAME: &'static str = USERS;
}

// Campaign collections
const CAMPAIGNS: &str = "campaigns";
impl MongoCollection for Campaign {
    const NAME: &'static str = CAMPAIGNS;
}
impl MongoCollection for NewCampaign {
    const NAME: &'static str = CAMPAIGNS;
}

// Candidate collections
const CANDIDATES: &str = "candidates";
impl MongoCollection for Candidate {
    const NAME: &'static str = CANDIDATES;
}
impl MongoCollection for NewCandidate {
    const NAME: &'static str = CANDIDATES;
}

// Vote collections
const VOTES: &str = "votes";
impl MongoCollection for Vote {
    const NAME: &'static str = VOTES;
}
impl MongoCollection for NewVote {
    const NAME: &'static str = VOTES;
}

// Quota claim collection
const VOTE_QUOTAS: &str = "vote_quotas";
impl MongoCollection for QuotaClaim {
    const NAME: &'static str = VOTE_QUOTAS;
}

/// Ensure that all the required indexes exist on the given database.
///
/// This operation is idempotent.
pub async fn ensure_indexes_exist(db: &Database) -> Result<(), DbError> {
    debug!("Ensuring collection indexes exist");

    let unique = IndexOptions::builder().unique(true).build();

    // User collection.
    let member_number_index = IndexModel::builder()
        .keys(doc! {"member_number": 1})
        .options(unique.clone())
        .build();
    let email_index = IndexModel::builder()
        .keys(doc! {"email": 1})
        .options(unique.clone())
        .build();
    Coll::<User>::from_db(db)
        .create_indexes([member_number_index, email_index], None)
        .await?;

    // Candidate collection.
    let candidate_index = IndexModel::builder()
        .keys(doc! {"campaign_id": 1})
        .build();
    Coll::<Candidate>::from_db(db)
        .create_index(candidate_index, None)
        .await?;

    // Vote collection.
    let campaign_index = IndexModel::builder()
        .keys(doc! {"campaign_id": 1})
        .build();
    let voter_index = IndexModel::builder()
        .keys(doc! {"voter_id": 1, "campaign_id": 1})
        .build();
    let candidate_count_index = IndexModel::builder()
        .keys(doc! {"candidate_id": 1, "campaign_id": 1})
        .build();
    Coll::<Vote>::from_db(db)
        .create_indexes([campaign_index, voter_index, candidate_count_index], None)
        .await?;

    // Quota claim collection. The unique index is what makes concurrent
    // upserts for the same (voter, campaign) pair collide instead of
    // silently double-claiming.
    let quota_index = IndexModel::builder()
        .keys(doc! {"voter_id": 1, "campaign_id": 1})
        .options(unique)
        .build();
    Coll::<QuotaClaim>::from_db(db)
        .create_index(quota_index, None)
        .await?;

    Ok(())
}
