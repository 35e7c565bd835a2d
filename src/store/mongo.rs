use std::collections::HashMap;

use mongodb::{
    bson::{doc, Bson},
    error::{Error as DbError, ErrorKind, WriteFailure},
    options::{FindOneAndUpdateOptions, FindOptions, ReturnDocument},
    Client, Database,
};
use rocket::futures::TryStreamExt;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{
    campaign::{Campaign, CampaignStatus, NewCampaign},
    candidate::{Candidate, NewCandidate},
    mongodb::{ensure_indexes_exist, Coll, Id},
    user::{NewUser, User},
    vote::{NewVote, Vote},
};

use super::VoteStore;

/// Durable storage backed by MongoDB.
pub struct MongoStore {
    db: Database,
}

impl MongoStore {
    /// Connect to the database and ensure the required indexes exist.
    pub async fn connect(uri: &str, db_name: &str) -> std::result::Result<Self, DbError> {
        let client = Client::with_uri_str(uri).await?;
        let db = client.database(db_name);
        ensure_indexes_exist(&db).await?;
        Ok(Self { db })
    }

    fn coll<T: crate::model::mongodb::MongoCollection>(&self) -> Coll<T> {
        Coll::from_db(&self.db)
    }
}

/// Per-(voter, campaign) quota usage. Incremented with a conditional
/// `find_one_and_update` so that the check and the claim are one atomic
/// storage operation rather than a read followed by a write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaClaim {
    #[serde(rename = "_id")]
    pub id: Id,
    pub voter_id: Id,
    pub campaign_id: Id,
    pub used: u32,
}

/// Did this write fail on a unique index?
fn is_duplicate_key(err: &DbError) -> bool {
    matches!(
        &*err.kind,
        ErrorKind::Write(WriteFailure::WriteError(write_err)) if write_err.code == 11000
    )
}

#[rocket::async_trait]
impl VoteStore for MongoStore {
    async fn insert_user(&self, user: NewUser) -> Result<User> {
        let result = self.coll::<NewUser>().insert_one(&user, None).await?;
        let id = result
            .inserted_id
            .as_object_id()
            .unwrap() // Valid because the ID comes directly from the DB.
            .into();
        Ok(User { id, user })
    }

    async fn user(&self, id: Id) -> Result<Option<User>> {
        Ok(self.coll::<User>().find_one(id.as_doc(), None).await?)
    }

    async fn user_by_member_number(&self, member_number: &str) -> Result<Option<User>> {
        let filter = doc! { "member_number": member_number };
        Ok(self.coll::<User>().find_one(filter, None).await?)
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<User>> {
        let filter = doc! { "email": email };
        Ok(self.coll::<User>().find_one(filter, None).await?)
    }

    async fn insert_campaign(&self, campaign: NewCampaign) -> Result<Campaign> {
        let result = self.coll::<NewCampaign>().insert_one(&campaign, None).await?;
        let id = result.inserted_id.as_object_id().unwrap().into();
        Ok(Campaign { id, campaign })
    }

    async fn campaign(&self, id: Id) -> Result<Option<Campaign>> {
        Ok(self.coll::<Campaign>().find_one(id.as_doc(), None).await?)
    }

    async fn campaigns(&self) -> Result<Vec<Campaign>> {
        let options = FindOptions::builder().sort(doc! { "_id": 1 }).build();
        let campaigns = self
            .coll::<Campaign>()
            .find(None, options)
            .await?
            .try_collect()
            .await?;
        Ok(campaigns)
    }

    async fn replace_campaign(&self, id: Id, campaign: NewCampaign) -> Result<Campaign> {
        let result = self
            .coll::<NewCampaign>()
            .replace_one(id.as_doc(), &campaign, None)
            .await?;
        if result.matched_count == 0 {
            return Err(Error::CampaignNotFound(id));
        }
        Ok(Campaign { id, campaign })
    }

    async fn set_campaign_status(&self, id: Id, status: CampaignStatus) -> Result<()> {
        let update = doc! { "$set": { "status": status } };
        let result = self
            .coll::<Campaign>()
            .update_one(id.as_doc(), update, None)
            .await?;
        if result.matched_count == 0 {
            return Err(Error::CampaignNotFound(id));
        }
        Ok(())
    }

    async fn delete_campaign(&self, id: Id) -> Result<()> {
        let result = self.coll::<Campaign>().delete_one(id.as_doc(), None).await?;
        if result.deleted_count == 0 {
            return Err(Error::CampaignNotFound(id));
        }
        let owned = doc! { "campaign_id": id };
        self.coll::<Candidate>().delete_many(owned.clone(), None).await?;
        self.coll::<QuotaClaim>().delete_many(owned, None).await?;
        Ok(())
    }

    async fn insert_candidate(&self, candidate: NewCandidate) -> Result<Candidate> {
        let result = self
            .coll::<NewCandidate>()
            .insert_one(&candidate, None)
            .await?;
        let id = result.inserted_id.as_object_id().unwrap().into();
        Ok(Candidate { id, candidate })
    }

    async fn candidate(&self, id: Id) -> Result<Option<Candidate>> {
        Ok(self.coll::<Candidate>().find_one(id.as_doc(), None).await?)
    }

    async fn candidates_for(&self, campaign_id: Id) -> Result<Vec<Candidate>> {
        // ObjectIds are monotonic for a single writer, so sorting on `_id`
        // reproduces creation order.
        let options = FindOptions::builder().sort(doc! { "_id": 1 }).build();
        let filter = doc! { "campaign_id": campaign_id };
        let candidates = self
            .coll::<Candidate>()
            .find(filter, options)
            .await?
            .try_collect()
            .await?;
        Ok(candidates)
    }

    async fn replace_candidate(&self, id: Id, candidate: NewCandidate) -> Result<Candidate> {
        let result = self
            .coll::<NewCandidate>()
            .replace_one(id.as_doc(), &candidate, None)
            .await?;
        if result.matched_count == 0 {
            return Err(Error::CandidateNotFound(id));
        }
        Ok(Candidate { id, candidate })
    }

    async fn delete_candidate(&self, id: Id) -> Result<()> {
        let result = self.coll::<Candidate>().delete_one(id.as_doc(), None).await?;
        if result.deleted_count == 0 {
            return Err(Error::CandidateNotFound(id));
        }
        Ok(())
    }

    async fn insert_vote_within_quota(&self, vote: NewVote, quota: u32) -> Result<(Vote, u32)> {
        let quotas = self.coll::<QuotaClaim>();
        let filter = doc! {
            "voter_id": vote.voter_id,
            "campaign_id": vote.campaign_id,
            "used": { "$lt": quota as i64 },
        };
        let update = doc! { "$inc": { "used": 1 } };

        // First attempt upserts, so a voter's first claim creates the
        // counter. If two first claims race, the loser hits the unique
        // index; retrying without upsert resolves against the winner's
        // document.
        let options = FindOneAndUpdateOptions::builder()
            .upsert(true)
            .return_document(ReturnDocument::After)
            .build();
        let claim = match quotas
            .find_one_and_update(filter.clone(), update.clone(), options)
            .await
        {
            Ok(Some(claim)) => claim,
            Ok(None) => return Err(Error::QuotaExceeded { limit: quota }),
            Err(err) if is_duplicate_key(&err) => {
                let options = FindOneAndUpdateOptions::builder()
                    .return_document(ReturnDocument::After)
                    .build();
                quotas
                    .find_one_and_update(filter, update, options)
                    .await?
                    .ok_or(Error::QuotaExceeded { limit: quota })?
            }
            Err(err) => return Err(err.into()),
        };

        // The quota slot is claimed; now write the vote itself. If the
        // append fails the claim must be released, or the voter would lose
        // a vote they never cast.
        match self.coll::<NewVote>().insert_one(&vote, None).await {
            Ok(result) => {
                let id = result.inserted_id.as_object_id().unwrap().into();
                Ok((Vote { id, vote }, claim.used))
            }
            Err(err) => {
                let release = doc! { "$inc": { "used": -1 } };
                if let Err(release_err) = quotas
                    .update_one(claim.id.as_doc(), release, None)
                    .await
                {
                    error!(
                        "Failed to release quota claim {} after a failed vote append: {release_err}",
                        claim.id
                    );
                }
                Err(err.into())
            }
        }
    }

    async fn votes_used(&self, voter_id: Id, campaign_id: Id) -> Result<u32> {
        let filter = doc! { "voter_id": voter_id, "campaign_id": campaign_id };
        let used = self
            .coll::<Vote>()
            .count_documents(filter, None)
            .await?;
        Ok(used as u32)
    }

    async fn votes_by_voter(&self, voter_id: Id, campaign_id: Id) -> Result<Vec<Vote>> {
        let filter = doc! { "voter_id": voter_id, "campaign_id": campaign_id };
        let options = FindOptions::builder().sort(doc! { "_id": 1 }).build();
        let votes = self
            .coll::<Vote>()
            .find(filter, options)
            .await?
            .try_collect()
            .await?;
        Ok(votes)
    }

    async fn campaign_has_votes(&self, campaign_id: Id) -> Result<bool> {
        let filter = doc! { "campaign_id": campaign_id };
        let count = self.coll::<Vote>().count_documents(filter, None).await?;
        Ok(count > 0)
    }

    async fn candidate_has_votes(&self, candidate_id: Id) -> Result<bool> {
        let filter = doc! { "candidate_id": candidate_id };
        let count = self.coll::<Vote>().count_documents(filter, None).await?;
        Ok(count > 0)
    }

    async fn candidate_vote_counts(&self, campaign_id: Id) -> Result<HashMap<Id, u64>> {
        let pipeline = vec![
            doc! { "$match": { "campaign_id": campaign_id } },
            doc! { "$group": { "_id": "$candidate_id", "count": { "$sum": 1 } } },
        ];
        let mut cursor = self.coll::<Vote>().aggregate(pipeline, None).await?;
        let mut counts = HashMap::new();
        while let Some(group) = cursor.try_next().await? {
            let candidate_id: Id = group.get_object_id("_id")?.into();
            let count = match group.get("count") {
                Some(Bson::Int32(count)) => *count as u64,
                Some(Bson::Int64(count)) => *count as u64,
                _ => 0,
            };
            counts.insert(candidate_id, count);
        }
        Ok(counts)
    }

    async fn unique_voters(&self, campaign_id: Id) -> Result<u64> {
        let filter = doc! { "campaign_id": campaign_id };
        let voters = self
            .coll::<Vote>()
            .distinct("voter_id", filter, None)
            .await?;
        Ok(voters.len() as u64)
    }
}
