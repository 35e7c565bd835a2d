use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rocket::{
    fairing::{Fairing, Info, Kind},
    Build, Rocket,
};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::error::Result;
use crate::model::{campaign::CampaignStatus, mongodb::Id};
use crate::realtime::Hub;
use crate::store::{SharedStore, VoteStore};

const TICK: Duration = Duration::from_secs(1);

struct RunningTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Map from campaign IDs to their running countdown tasks.
type TimerMap = HashMap<Id, RunningTimer>;

/// The per-campaign lifecycle timers. At most one countdown runs per
/// campaign; starting a new one always replaces the old one. On expiry the
/// campaign is durably deactivated, then subscribers are told, in that
/// order.
pub struct CampaignTimers {
    tasks: Arc<Mutex<TimerMap>>,
    next_generation: AtomicU64,
    store: SharedStore,
    hub: Arc<Hub>,
}

impl CampaignTimers {
    pub fn new(store: SharedStore, hub: Arc<Hub>) -> Self {
        Self {
            tasks: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
            store,
            hub,
        }
    }

    /// Start (or restart) the countdown for a campaign. Any timer already
    /// running for this campaign is cancelled first; timers replace, they
    /// never stack.
    pub async fn start(&self, campaign_id: Id, duration: Duration) {
        let deadline = Instant::now() + duration;
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);

        let mut tasks = self.tasks.lock().await;
        if let Some(old) = tasks.remove(&campaign_id) {
            old.handle.abort();
            debug!("Replaced running timer for campaign {campaign_id}");
        }
        let handle = tokio::spawn(run_countdown(
            campaign_id,
            deadline,
            generation,
            Arc::clone(&self.store),
            Arc::clone(&self.hub),
            Arc::clone(&self.tasks),
        ));
        tasks.insert(campaign_id, RunningTimer { generation, handle });
        info!(
            "Campaign timer started for campaign {campaign_id} ({}s)",
            duration.as_secs()
        );
    }

    /// Cancel a campaign's countdown without touching the campaign itself.
    /// Returns whether a timer was actually running.
    pub async fn stop(&self, campaign_id: Id) -> bool {
        let mut tasks = self.tasks.lock().await;
        match tasks.remove(&campaign_id) {
            Some(timer) => {
                timer.handle.abort();
                info!("Campaign timer stopped for campaign {campaign_id}");
                true
            }
            None => false,
        }
    }

    pub async fn is_running(&self, campaign_id: Id) -> bool {
        self.tasks.lock().await.contains_key(&campaign_id)
    }

    /// Bring the timers in line with the stored campaigns: restart the
    /// countdown for every active campaign still inside its window, and
    /// deactivate the ones whose window elapsed while we were down.
    pub async fn schedule_active_campaigns(&self) -> Result<()> {
        let campaigns = self.store.campaigns().await?;
        let now = Utc::now();
        for campaign in campaigns {
            if !campaign.status.is_active() {
                continue;
            }
            if campaign.end_time > now {
                let remaining = (campaign.end_time - now)
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                self.start(campaign.id, remaining).await;
            } else {
                warn!(
                    "Campaign {} expired while the server was down; deactivating",
                    campaign.id
                );
                self.store
                    .set_campaign_status(campaign.id, CampaignStatus::Inactive)
                    .await?;
            }
        }
        Ok(())
    }
}

/// The countdown task for one campaign: tick once per second, emit the
/// remaining time, and close the campaign when the deadline passes.
async fn run_countdown(
    campaign_id: Id,
    deadline: Instant,
    generation: u64,
    store: SharedStore,
    hub: Arc<Hub>,
    tasks: Arc<Mutex<TimerMap>>,
) {
    let mut ticker = interval_at(Instant::now() + TICK, TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining > Duration::ZERO {
            // A sub-second tail still reads as one second, so zero is only
            // ever emitted at expiry.
            hub.emit_time_update(campaign_id, remaining.as_secs().max(1));
            continue;
        }

        // Expired. The status write must land before subscribers hear
        // about it; if it fails we keep the timer alive and try again on
        // the next tick rather than losing the campaign in a half-closed
        // state.
        match store
            .set_campaign_status(campaign_id, CampaignStatus::Inactive)
            .await
        {
            Ok(()) => {
                info!("Campaign {campaign_id} deactivated on timer expiry");
                hub.emit_status_change(campaign_id, false);
                hub.emit_time_update(campaign_id, 0);
                break;
            }
            Err(err) => {
                error!("Failed to deactivate campaign {campaign_id} on expiry, retrying: {err}");
            }
        }
    }

    // Forget ourselves, unless a replacement has already taken the slot.
    let mut tasks = tasks.lock().await;
    if tasks.get(&campaign_id).map(|t| t.generation) == Some(generation) {
        tasks.remove(&campaign_id);
    }
}

/// A fairing that reconciles campaign timers with stored campaigns during
/// ignition and places a [`CampaignTimers`] into managed state. It needs the
/// store and the hub, so it must be attached after the fairing responsible
/// for those.
pub struct TimerFairing;

#[rocket::async_trait]
impl Fairing for TimerFairing {
    fn info(&self) -> Info {
        Info {
            name: "Campaign Timers",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        let store = match rocket.state::<SharedStore>() {
            Some(store) => Arc::clone(store),
            None => {
                error!("Storage was not available when scheduling campaign timers");
                return Err(rocket);
            }
        };
        let hub = match rocket.state::<Arc<Hub>>() {
            Some(hub) => Arc::clone(hub),
            None => {
                error!("Broadcast hub was not available when scheduling campaign timers");
                return Err(rocket);
            }
        };

        let timers = Arc::new(CampaignTimers::new(store, hub));
        if let Err(e) = timers.schedule_active_campaigns().await {
            error!("Failed to schedule campaign timers: {e}");
            return Err(rocket);
        }

        // Manage the state.
        rocket = rocket.manage(timers);
        Ok(rocket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Duration as ChronoDuration;

    use crate::model::campaign::{Campaign, CampaignCore};
    use crate::realtime::CampaignEvent;
    use crate::store::MemStore;

    async fn active_campaign(store: &dyn VoteStore, hours_left: i64) -> Campaign {
        let now = Utc::now();
        store
            .insert_campaign(CampaignCore {
                title: "Timed".to_string(),
                description: String::new(),
                votes_per_voter: 1,
                status: CampaignStatus::Active,
                start_time: now - ChronoDuration::hours(1),
                end_time: now + ChronoDuration::hours(hours_left),
                created_by: Id::new(),
            })
            .await
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_is_monotonic_and_expires_once() {
        let store: SharedStore = Arc::new(MemStore::new());
        let hub = Arc::new(Hub::new());
        let campaign = active_campaign(store.as_ref(), 1).await;
        let timers = CampaignTimers::new(Arc::clone(&store), Arc::clone(&hub));

        let mut rx = hub.subscribe(campaign.id);
        timers.start(campaign.id, Duration::from_secs(3)).await;

        let mut time_updates = Vec::new();
        let mut status_changes = Vec::new();
        loop {
            match rx.recv().await.unwrap() {
                CampaignEvent::TimeUpdate {
                    remaining_seconds, ..
                } => {
                    time_updates.push(remaining_seconds);
                    if remaining_seconds == 0 {
                        break;
                    }
                }
                CampaignEvent::CampaignStatusChange { is_active, .. } => {
                    // Must arrive before the final time update.
                    assert!(!time_updates.contains(&0));
                    status_changes.push(is_active);
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }

        assert_eq!(time_updates, vec![2, 1, 0]);
        assert_eq!(status_changes, vec![false]);

        // The campaign was durably deactivated before the emissions.
        let stored = store.campaign(campaign.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CampaignStatus::Inactive);

        // Give the finished countdown a beat to deregister itself.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!timers.is_running(campaign.id).await);
    }

    #[tokio::test(start_paused = true)]
    async fn starting_again_replaces_the_running_timer() {
        let store: SharedStore = Arc::new(MemStore::new());
        let hub = Arc::new(Hub::new());
        let campaign = active_campaign(store.as_ref(), 1).await;
        let timers = CampaignTimers::new(Arc::clone(&store), Arc::clone(&hub));

        timers.start(campaign.id, Duration::from_secs(600)).await;
        let mut rx = hub.subscribe(campaign.id);
        timers.start(campaign.id, Duration::from_secs(2)).await;

        // Only the replacement's countdown is observed.
        let mut time_updates = Vec::new();
        loop {
            match rx.recv().await.unwrap() {
                CampaignEvent::TimeUpdate {
                    remaining_seconds, ..
                } => {
                    assert!(remaining_seconds <= 2);
                    time_updates.push(remaining_seconds);
                    if remaining_seconds == 0 {
                        break;
                    }
                }
                CampaignEvent::CampaignStatusChange { .. } => {}
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert_eq!(time_updates, vec![1, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_without_touching_the_campaign() {
        let store: SharedStore = Arc::new(MemStore::new());
        let hub = Arc::new(Hub::new());
        let campaign = active_campaign(store.as_ref(), 1).await;
        let timers = CampaignTimers::new(Arc::clone(&store), Arc::clone(&hub));

        let mut rx = hub.subscribe(campaign.id);
        timers.start(campaign.id, Duration::from_secs(5)).await;
        assert!(timers.is_running(campaign.id).await);

        assert!(timers.stop(campaign.id).await);
        assert!(!timers.is_running(campaign.id).await);
        // Stopping twice is a no-op.
        assert!(!timers.stop(campaign.id).await);

        // No further ticks arrive and the status is untouched.
        let quiet = tokio::time::timeout(Duration::from_secs(30), rx.recv()).await;
        assert!(quiet.is_err());
        let stored = store.campaign(campaign.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CampaignStatus::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn reconciliation_deactivates_overdue_campaigns() {
        let store: SharedStore = Arc::new(MemStore::new());
        let hub = Arc::new(Hub::new());
        let now = Utc::now();
        // One campaign still in its window, one already past it.
        let live = active_campaign(store.as_ref(), 2).await;
        let overdue = store
            .insert_campaign(CampaignCore {
                title: "Overdue".to_string(),
                description: String::new(),
                votes_per_voter: 1,
                status: CampaignStatus::Active,
                start_time: now - ChronoDuration::hours(3),
                end_time: now - ChronoDuration::hours(1),
                created_by: Id::new(),
            })
            .await
            .unwrap();

        let timers = CampaignTimers::new(Arc::clone(&store), Arc::clone(&hub));
        timers.schedule_active_campaigns().await.unwrap();

        assert!(timers.is_running(live.id).await);
        assert!(!timers.is_running(overdue.id).await);
        let stored = store.campaign(overdue.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CampaignStatus::Inactive);
    }
}
