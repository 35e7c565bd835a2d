use std::collections::HashMap;
use std::sync::RwLock;

use chrono::Utc;
use tokio::sync::broadcast;

use crate::model::mongodb::Id;
use crate::tally::TallySnapshot;

use super::events::CampaignEvent;

/// How many events a slow subscriber may fall behind before it starts
/// losing them.
const ROOM_CAPACITY: usize = 256;

/// The broadcast hub: one room per campaign, fanned out over broadcast
/// channels. Emission never blocks on subscribers; a receiver that lags
/// past [`ROOM_CAPACITY`] events is told so by the channel.
pub struct Hub {
    rooms: RwLock<HashMap<Id, broadcast::Sender<CampaignEvent>>>,
}

impl Hub {
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
        }
    }

    /// Subscribe to a campaign's room, creating the room if this is its
    /// first member. Dropping the receiver is all it takes to leave.
    pub fn subscribe(&self, campaign_id: Id) -> broadcast::Receiver<CampaignEvent> {
        let mut rooms = self.rooms.write().unwrap();
        rooms
            .entry(campaign_id)
            .or_insert_with(|| broadcast::channel(ROOM_CAPACITY).0)
            .subscribe()
    }

    /// How many connections are currently subscribed to a room.
    pub fn member_count(&self, campaign_id: Id) -> usize {
        let rooms = self.rooms.read().unwrap();
        rooms
            .get(&campaign_id)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    /// Deliver an event to every current member of a room. An event for a
    /// room nobody is watching just disappears.
    pub fn emit(&self, campaign_id: Id, event: CampaignEvent) {
        let rooms = self.rooms.read().unwrap();
        if let Some(tx) = rooms.get(&campaign_id) {
            let _ = tx.send(event);
        }
    }

    pub fn emit_vote_update(&self, campaign_id: Id, tally: TallySnapshot) {
        self.emit(
            campaign_id,
            CampaignEvent::VoteUpdate {
                campaign_id: campaign_id.into(),
                tally,
                emitted_at: Utc::now(),
            },
        );
    }

    pub fn emit_status_change(&self, campaign_id: Id, is_active: bool) {
        self.emit(
            campaign_id,
            CampaignEvent::CampaignStatusChange {
                campaign_id: campaign_id.into(),
                is_active,
            },
        );
    }

    pub fn emit_time_update(&self, campaign_id: Id, remaining_seconds: u64) {
        self.emit(
            campaign_id,
            CampaignEvent::TimeUpdate {
                campaign_id: campaign_id.into(),
                remaining_seconds,
            },
        );
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_reach_every_room_member() {
        let hub = Hub::new();
        let campaign = Id::new();
        let mut first = hub.subscribe(campaign);
        let mut second = hub.subscribe(campaign);

        hub.emit_status_change(campaign, true);

        for rx in [&mut first, &mut second] {
            match rx.recv().await.unwrap() {
                CampaignEvent::CampaignStatusChange { is_active, .. } => assert!(is_active),
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn rooms_are_isolated() {
        let hub = Hub::new();
        let watched = Id::new();
        let other = Id::new();
        let mut rx = hub.subscribe(watched);

        hub.emit_time_update(other, 42);
        hub.emit_time_update(watched, 7);

        match rx.recv().await.unwrap() {
            CampaignEvent::TimeUpdate {
                remaining_seconds, ..
            } => assert_eq!(remaining_seconds, 7),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn late_subscribers_miss_earlier_emissions() {
        let hub = Hub::new();
        let campaign = Id::new();
        let _early = hub.subscribe(campaign);

        hub.emit_time_update(campaign, 30);
        let mut late = hub.subscribe(campaign);
        hub.emit_time_update(campaign, 29);

        match late.recv().await.unwrap() {
            CampaignEvent::TimeUpdate {
                remaining_seconds, ..
            } => assert_eq!(remaining_seconds, 29),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn emitting_into_an_empty_room_is_harmless() {
        let hub = Hub::new();
        let campaign = Id::new();
        hub.emit_time_update(campaign, 10);
        assert_eq!(hub.member_count(campaign), 0);
    }
}
