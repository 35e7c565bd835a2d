use std::collections::HashSet;

use tokio::sync::broadcast;

use crate::model::auth::Rights;
use crate::model::mongodb::Id;

use super::{events::CampaignEvent, hub::Hub};

/// Per-connection state: the verified identity plus the rooms the
/// connection is currently a member of. Constructed exactly once, after the
/// connection has authenticated, and owned by that connection's handler, so
/// membership can never leak between connections.
pub struct Session {
    user_id: Id,
    rights: Rights,
    rooms: HashSet<Id>,
}

impl Session {
    pub fn new(user_id: Id, rights: Rights) -> Self {
        Self {
            user_id,
            rights,
            rooms: HashSet::new(),
        }
    }

    pub fn user_id(&self) -> Id {
        self.user_id
    }

    pub fn rights(&self) -> Rights {
        self.rights
    }

    pub fn is_member(&self, campaign_id: Id) -> bool {
        self.rooms.contains(&campaign_id)
    }

    /// Join a campaign's room. Idempotent: a second join returns `None` and
    /// changes nothing, so a connection never holds two subscriptions to
    /// the same room.
    pub fn join(
        &mut self,
        hub: &Hub,
        campaign_id: Id,
    ) -> Option<broadcast::Receiver<CampaignEvent>> {
        if !self.rooms.insert(campaign_id) {
            return None;
        }
        Some(hub.subscribe(campaign_id))
    }

    /// Leave a campaign's room. Returns whether the connection was a member.
    /// The caller is responsible for dropping the corresponding receiver.
    pub fn leave(&mut self, campaign_id: Id) -> bool {
        self.rooms.remove(&campaign_id)
    }

    /// The rooms this connection is a member of, for disconnect cleanup.
    pub fn rooms(&self) -> impl Iterator<Item = Id> + '_ {
        self.rooms.iter().copied()
    }
}
