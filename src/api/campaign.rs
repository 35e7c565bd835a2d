use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rocket::{serde::json::Json, Route, State};
use serde::{Deserialize, Serialize};

use crate::admission;
use crate::error::{Error, Result};
use crate::model::{
    auth::{Admin, AuthToken, Voter},
    campaign::{Campaign, CampaignStatus, NewCampaign},
    mongodb::{ApiId, Id},
};
use crate::realtime::Hub;
use crate::store::{SharedStore, VoteStore};
use crate::timer::CampaignTimers;

use super::candidate::CandidateDescription;

pub fn routes() -> Vec<Route> {
    routes![
        list_campaigns,
        get_campaign,
        create_campaign,
        modify_campaign,
        delete_campaign,
        activate_campaign,
        deactivate_campaign,
        finish_campaign,
        start_timer,
        stop_timer,
    ]
}

#[get("/campaigns")]
async fn list_campaigns(
    _token: AuthToken<Voter>,
    store: &State<SharedStore>,
) -> Result<Json<Vec<CampaignDescription>>> {
    let campaigns = store.campaigns().await?;
    Ok(Json(campaigns.into_iter().map(Into::into).collect()))
}

#[get("/campaigns/<campaign_id>")]
async fn get_campaign(
    token: AuthToken<Voter>,
    campaign_id: Id,
    store: &State<SharedStore>,
) -> Result<Json<CampaignDetail>> {
    let campaign = store
        .campaign(campaign_id)
        .await?
        .ok_or(Error::CampaignNotFound(campaign_id))?;
    let candidates = store.candidates_for(campaign_id).await?;
    let standing = admission::quota_standing(store.inner().as_ref(), token.id(), campaign_id).await?;

    Ok(Json(CampaignDetail {
        campaign: campaign.into(),
        candidates: candidates.into_iter().map(Into::into).collect(),
        votes_used: standing.votes_used,
        votes_remaining: standing.votes_remaining,
    }))
}

#[post("/campaigns", data = "<spec>", format = "json")]
async fn create_campaign(
    token: AuthToken<Admin>,
    spec: Json<CampaignSpec>,
    store: &State<SharedStore>,
) -> Result<Json<CampaignDescription>> {
    let spec = spec.into_inner();
    spec.validate()?;

    // Campaigns always start inactive; voting opens via an explicit
    // activation.
    let campaign = store
        .insert_campaign(NewCampaign {
            title: spec.title,
            description: spec.description,
            votes_per_voter: spec.votes_per_voter,
            status: CampaignStatus::Inactive,
            start_time: spec.start_time,
            end_time: spec.end_time,
            created_by: token.id(),
        })
        .await?;
    info!("Created campaign {}", campaign.id);

    Ok(Json(campaign.into()))
}

#[put("/campaigns/<campaign_id>", data = "<spec>", format = "json")]
async fn modify_campaign(
    _token: AuthToken<Admin>,
    campaign_id: Id,
    spec: Json<CampaignSpec>,
    store: &State<SharedStore>,
) -> Result<Json<CampaignDescription>> {
    let spec = spec.into_inner();
    spec.validate()?;

    let existing = store
        .campaign(campaign_id)
        .await?
        .ok_or(Error::CampaignNotFound(campaign_id))?;
    if existing.status.is_active() {
        return Err(Error::BadRequest(format!(
            "Cannot modify campaign {campaign_id} while it is open for voting"
        )));
    }

    let campaign = store
        .replace_campaign(
            campaign_id,
            NewCampaign {
                title: spec.title,
                description: spec.description,
                votes_per_voter: spec.votes_per_voter,
                status: existing.campaign.status,
                start_time: spec.start_time,
                end_time: spec.end_time,
                created_by: existing.campaign.created_by,
            },
        )
        .await?;

    Ok(Json(campaign.into()))
}

#[delete("/campaigns/<campaign_id>")]
async fn delete_campaign(
    _token: AuthToken<Admin>,
    campaign_id: Id,
    store: &State<SharedStore>,
    timers: &State<Arc<CampaignTimers>>,
) -> Result<()> {
    store
        .campaign(campaign_id)
        .await?
        .ok_or(Error::CampaignNotFound(campaign_id))?;

    // Votes are immutable records; a campaign that has any is part of
    // history and stays.
    if store.campaign_has_votes(campaign_id).await? {
        return Err(Error::BadRequest(
            "Cannot delete a campaign that has already received votes".to_string(),
        ));
    }

    timers.stop(campaign_id).await;
    store.delete_campaign(campaign_id).await
}

#[post("/campaigns/<campaign_id>/activate")]
async fn activate_campaign(
    _token: AuthToken<Admin>,
    campaign_id: Id,
    store: &State<SharedStore>,
    hub: &State<Arc<Hub>>,
) -> Result<Json<CampaignDescription>> {
    let mut campaign = store
        .campaign(campaign_id)
        .await?
        .ok_or(Error::CampaignNotFound(campaign_id))?;

    if !campaign.status.is_active() {
        store
            .set_campaign_status(campaign_id, CampaignStatus::Active)
            .await?;
        campaign.status = CampaignStatus::Active;
        info!("Campaign {campaign_id} activated");
        hub.emit_status_change(campaign_id, true);
    }

    Ok(Json(campaign.into()))
}

#[post("/campaigns/<campaign_id>/deactivate")]
async fn deactivate_campaign(
    _token: AuthToken<Admin>,
    campaign_id: Id,
    store: &State<SharedStore>,
    hub: &State<Arc<Hub>>,
    timers: &State<Arc<CampaignTimers>>,
) -> Result<Json<CampaignDescription>> {
    transition_closed(
        campaign_id,
        CampaignStatus::Inactive,
        store,
        hub,
        timers,
    )
    .await
}

#[post("/campaigns/<campaign_id>/finish")]
async fn finish_campaign(
    _token: AuthToken<Admin>,
    campaign_id: Id,
    store: &State<SharedStore>,
    hub: &State<Arc<Hub>>,
    timers: &State<Arc<CampaignTimers>>,
) -> Result<Json<CampaignDescription>> {
    transition_closed(
        campaign_id,
        CampaignStatus::Finished,
        store,
        hub,
        timers,
    )
    .await
}

/// Manually close a campaign: set the target status, cancel any running
/// timer, and tell the room. The timer is cancelled rather than left to
/// expire so it cannot later clobber the admin's chosen status.
async fn transition_closed(
    campaign_id: Id,
    status: CampaignStatus,
    store: &State<SharedStore>,
    hub: &State<Arc<Hub>>,
    timers: &State<Arc<CampaignTimers>>,
) -> Result<Json<CampaignDescription>> {
    let mut campaign = store
        .campaign(campaign_id)
        .await?
        .ok_or(Error::CampaignNotFound(campaign_id))?;

    let was_active = campaign.status.is_active();
    if campaign.status != status {
        store.set_campaign_status(campaign_id, status).await?;
        campaign.status = status;
        info!("Campaign {campaign_id} manually set to {status:?}");
    }
    timers.stop(campaign_id).await;
    if was_active {
        hub.emit_status_change(campaign_id, false);
    }

    Ok(Json(campaign.into()))
}

#[post("/campaigns/<campaign_id>/timer/start", data = "<request>", format = "json")]
async fn start_timer(
    _token: AuthToken<Admin>,
    campaign_id: Id,
    request: Json<TimerRequest>,
    store: &State<SharedStore>,
    timers: &State<Arc<CampaignTimers>>,
) -> Result<()> {
    let campaign = store
        .campaign(campaign_id)
        .await?
        .ok_or(Error::CampaignNotFound(campaign_id))?;
    if !campaign.status.is_active() {
        return Err(Error::CampaignNotActive(campaign_id));
    }
    if request.duration_minutes == 0 {
        return Err(Error::BadRequest(
            "Timer duration must be at least one minute".to_string(),
        ));
    }

    timers
        .start(
            campaign_id,
            Duration::from_secs(request.duration_minutes * 60),
        )
        .await;
    Ok(())
}

#[post("/campaigns/<campaign_id>/timer/stop")]
async fn stop_timer(
    _token: AuthToken<Admin>,
    campaign_id: Id,
    store: &State<SharedStore>,
    timers: &State<Arc<CampaignTimers>>,
) -> Result<()> {
    store
        .campaign(campaign_id)
        .await?
        .ok_or(Error::CampaignNotFound(campaign_id))?;
    timers.stop(campaign_id).await;
    Ok(())
}

/// A new or replacement campaign definition.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CampaignSpec {
    title: String,
    description: String,
    votes_per_voter: u32,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
}

impl CampaignSpec {
    fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(Error::BadRequest("Campaign title is required".to_string()));
        }
        if self.votes_per_voter < 1 {
            return Err(Error::BadRequest(
                "Votes per voter must be at least 1".to_string(),
            ));
        }
        if self.start_time >= self.end_time {
            return Err(Error::BadRequest(
                "The voting window must start before it ends".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TimerRequest {
    duration_minutes: u64,
}

/// A campaign as returned by the API.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignDescription {
    pub id: ApiId,
    pub title: String,
    pub description: String,
    pub votes_per_voter: u32,
    pub status: CampaignStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl From<Campaign> for CampaignDescription {
    fn from(campaign: Campaign) -> Self {
        Self {
            id: campaign.id.into(),
            title: campaign.campaign.title,
            description: campaign.campaign.description,
            votes_per_voter: campaign.campaign.votes_per_voter,
            status: campaign.campaign.status,
            start_time: campaign.campaign.start_time,
            end_time: campaign.campaign.end_time,
        }
    }
}

/// A campaign with its candidates and the caller's remaining quota.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignDetail {
    pub campaign: CampaignDescription,
    pub candidates: Vec<CandidateDescription>,
    pub votes_used: u32,
    pub votes_remaining: u32,
}
