use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::mongodb::ApiId;
use crate::tally::TallySnapshot;

/// An event delivered to every member of a campaign's room.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum CampaignEvent {
    /// A vote was admitted; carries the freshly recomputed tally.
    #[serde(rename_all = "camelCase")]
    VoteUpdate {
        campaign_id: ApiId,
        tally: TallySnapshot,
        emitted_at: DateTime<Utc>,
    },
    /// The campaign switched between accepting and not accepting votes.
    #[serde(rename_all = "camelCase")]
    CampaignStatusChange { campaign_id: ApiId, is_active: bool },
    /// Countdown tick with the seconds left in the voting window.
    #[serde(rename_all = "camelCase")]
    TimeUpdate {
        campaign_id: ApiId,
        remaining_seconds: u64,
    },
}
