use rocket::{serde::json::Json, Route, State};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{
    auth::{Admin, AuthToken, Voter},
    candidate::{Candidate, NewCandidate},
    mongodb::{ApiId, Id},
};
use crate::store::{SharedStore, VoteStore};

pub fn routes() -> Vec<Route> {
    routes![
        create_candidate,
        get_candidate,
        campaign_candidates,
        modify_candidate,
        delete_candidate,
    ]
}

#[post("/candidates", data = "<spec>", format = "json")]
async fn create_candidate(
    _token: AuthToken<Admin>,
    spec: Json<CandidateSpec>,
    store: &State<SharedStore>,
) -> Result<Json<CandidateDescription>> {
    let spec = spec.into_inner();
    if spec.name.trim().is_empty() {
        return Err(Error::BadRequest("Candidate name is required".to_string()));
    }

    // The owning campaign must exist before a candidate can stand in it.
    let campaign_id = *spec.campaign_id;
    store
        .campaign(campaign_id)
        .await?
        .ok_or(Error::CampaignNotFound(campaign_id))?;

    let candidate = store
        .insert_candidate(NewCandidate {
            name: spec.name,
            description: spec.description,
            photo: spec.photo,
            campaign_id,
        })
        .await?;

    Ok(Json(candidate.into()))
}

#[get("/candidates/<candidate_id>")]
async fn get_candidate(
    _token: AuthToken<Voter>,
    candidate_id: Id,
    store: &State<SharedStore>,
) -> Result<Json<CandidateDescription>> {
    let candidate = store
        .candidate(candidate_id)
        .await?
        .ok_or(Error::CandidateNotFound(candidate_id))?;
    Ok(Json(candidate.into()))
}

#[get("/campaigns/<campaign_id>/candidates")]
async fn campaign_candidates(
    _token: AuthToken<Voter>,
    campaign_id: Id,
    store: &State<SharedStore>,
) -> Result<Json<Vec<CandidateDescription>>> {
    store
        .campaign(campaign_id)
        .await?
        .ok_or(Error::CampaignNotFound(campaign_id))?;
    let candidates = store.candidates_for(campaign_id).await?;
    Ok(Json(candidates.into_iter().map(Into::into).collect()))
}

#[put("/candidates/<candidate_id>", data = "<update>", format = "json")]
async fn modify_candidate(
    _token: AuthToken<Admin>,
    candidate_id: Id,
    update: Json<CandidateUpdate>,
    store: &State<SharedStore>,
) -> Result<Json<CandidateDescription>> {
    let existing = store
        .candidate(candidate_id)
        .await?
        .ok_or(Error::CandidateNotFound(candidate_id))?;

    let update = update.into_inner();
    // The owning campaign is immutable; only the presentation fields move.
    let candidate = store
        .replace_candidate(
            candidate_id,
            NewCandidate {
                name: update.name.unwrap_or(existing.candidate.name),
                description: update.description.unwrap_or(existing.candidate.description),
                photo: update.photo.or(existing.candidate.photo),
                campaign_id: existing.candidate.campaign_id,
            },
        )
        .await?;

    Ok(Json(candidate.into()))
}

#[delete("/candidates/<candidate_id>")]
async fn delete_candidate(
    _token: AuthToken<Admin>,
    candidate_id: Id,
    store: &State<SharedStore>,
) -> Result<()> {
    store
        .candidate(candidate_id)
        .await?
        .ok_or(Error::CandidateNotFound(candidate_id))?;

    // A candidate with votes is part of the record; removing them would
    // falsify the tally.
    if store.candidate_has_votes(candidate_id).await? {
        return Err(Error::BadRequest(
            "Cannot delete a candidate who has already received votes".to_string(),
        ));
    }

    store.delete_candidate(candidate_id).await
}

/// A new candidate the caller wants to create.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CandidateSpec {
    name: String,
    description: String,
    photo: Option<String>,
    campaign_id: ApiId,
}

/// Partial update to a candidate's presentation fields.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CandidateUpdate {
    name: Option<String>,
    description: Option<String>,
    photo: Option<String>,
}

/// A candidate as returned by the API.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateDescription {
    pub id: ApiId,
    pub name: String,
    pub description: String,
    pub photo: Option<String>,
    pub campaign_id: ApiId,
}

impl From<Candidate> for CandidateDescription {
    fn from(candidate: Candidate) -> Self {
        Self {
            id: candidate.id.into(),
            name: candidate.candidate.name,
            description: candidate.candidate.description,
            photo: candidate.candidate.photo,
            campaign_id: candidate.candidate.campaign_id.into(),
        }
    }
}
