use std::sync::Arc;

use chrono::{DateTime, Utc};
use rocket::{serde::json::Json, Route, State};
use serde::{Deserialize, Serialize};

use crate::admission;
use crate::error::{Error, Result};
use crate::model::{
    auth::{AuthToken, Rights, Voter},
    mongodb::{ApiId, Id},
    vote::Vote,
};
use crate::realtime::Hub;
use crate::store::SharedStore;
use crate::tally::{self, CandidateTally};

pub fn routes() -> Vec<Route> {
    routes![cast_vote, my_votes, campaign_results]
}

#[post("/votes", data = "<request>", format = "json")]
async fn cast_vote(
    token: AuthToken<Voter>,
    request: Json<VoteRequest>,
    store: &State<SharedStore>,
    hub: &State<Arc<Hub>>,
) -> Result<Json<VoteReceipt>> {
    // Admins administer elections; they do not take part in them.
    if token.rights() != Rights::Voter {
        return Err(Error::Unauthorized(
            "Only voters may cast votes".to_string(),
        ));
    }

    let admitted = admission::submit_vote(
        store.inner().as_ref(),
        hub,
        token.id(),
        *request.campaign_id,
        *request.candidate_id,
    )
    .await?;

    Ok(Json(VoteReceipt {
        vote: admitted.vote.into(),
        votes_used: admitted.votes_used,
        votes_remaining: admitted.votes_remaining,
    }))
}

#[get("/campaigns/<campaign_id>/votes/mine")]
async fn my_votes(
    token: AuthToken<Voter>,
    campaign_id: Id,
    store: &State<SharedStore>,
) -> Result<Json<VoteStatus>> {
    let standing =
        admission::quota_standing(store.inner().as_ref(), token.id(), campaign_id).await?;
    Ok(Json(VoteStatus {
        votes: standing.votes.into_iter().map(Into::into).collect(),
        votes_used: standing.votes_used,
        votes_remaining: standing.votes_remaining,
        votes_per_voter: standing.votes_per_voter,
    }))
}

#[get("/campaigns/<campaign_id>/results")]
async fn campaign_results(
    _token: AuthToken<Voter>,
    campaign_id: Id,
    store: &State<SharedStore>,
) -> Result<Json<CampaignResults>> {
    let snapshot = tally::compute_tally(store.inner().as_ref(), campaign_id).await?;
    let total_candidates = snapshot.results.len() as u64;
    Ok(Json(CampaignResults {
        campaign_id: snapshot.campaign_id,
        statistics: Statistics {
            total_votes: snapshot.total_votes,
            total_unique_voters: snapshot.total_unique_voters,
            total_candidates,
        },
        results: snapshot.results,
    }))
}

/// A vote the caller wants to cast.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VoteRequest {
    campaign_id: ApiId,
    candidate_id: ApiId,
}

/// A cast vote as returned by the API.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteDescription {
    pub id: ApiId,
    pub campaign_id: ApiId,
    pub candidate_id: ApiId,
    pub cast_at: DateTime<Utc>,
}

impl From<Vote> for VoteDescription {
    fn from(vote: Vote) -> Self {
        Self {
            id: vote.id.into(),
            campaign_id: vote.vote.campaign_id.into(),
            candidate_id: vote.vote.candidate_id.into(),
            cast_at: vote.vote.cast_at,
        }
    }
}

/// Confirmation of an admitted vote.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteReceipt {
    pub vote: VoteDescription,
    pub votes_used: u32,
    pub votes_remaining: u32,
}

/// The caller's standing in one campaign.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteStatus {
    pub votes: Vec<VoteDescription>,
    pub votes_used: u32,
    pub votes_remaining: u32,
    pub votes_per_voter: u32,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub total_votes: u64,
    pub total_unique_voters: u64,
    pub total_candidates: u64,
}

/// Aggregated results for one campaign.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignResults {
    pub campaign_id: ApiId,
    pub statistics: Statistics,
    pub results: Vec<CandidateTally>,
}
