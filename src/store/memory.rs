use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::model::{
    campaign::{Campaign, CampaignStatus, NewCampaign},
    candidate::{Candidate, NewCandidate},
    mongodb::Id,
    user::{NewUser, User},
    vote::{NewVote, Vote},
};

use super::VoteStore;

#[derive(Default)]
struct MemState {
    users: Vec<User>,
    campaigns: Vec<Campaign>,
    candidates: Vec<Candidate>,
    votes: Vec<Vote>,
}

/// Ephemeral storage held entirely in memory. Used by the test suite and by
/// the `storage = "memory"` backend for running without a database.
///
/// A single lock guards all state, so the quota check-and-append in
/// [`VoteStore::insert_vote_within_quota`] is naturally atomic.
#[derive(Default)]
pub struct MemStore {
    state: Mutex<MemState>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[rocket::async_trait]
impl VoteStore for MemStore {
    async fn insert_user(&self, user: NewUser) -> Result<User> {
        let mut state = self.state.lock().unwrap();
        let user = User { id: Id::new(), user };
        state.users.push(user.clone());
        Ok(user)
    }

    async fn user(&self, id: Id) -> Result<Option<User>> {
        let state = self.state.lock().unwrap();
        Ok(state.users.iter().find(|u| u.id == id).cloned())
    }

    async fn user_by_member_number(&self, member_number: &str) -> Result<Option<User>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .users
            .iter()
            .find(|u| u.member_number == member_number)
            .cloned())
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<User>> {
        let state = self.state.lock().unwrap();
        Ok(state.users.iter().find(|u| u.email == email).cloned())
    }

    async fn insert_campaign(&self, campaign: NewCampaign) -> Result<Campaign> {
        let mut state = self.state.lock().unwrap();
        let campaign = Campaign {
            id: Id::new(),
            campaign,
        };
        state.campaigns.push(campaign.clone());
        Ok(campaign)
    }

    async fn campaign(&self, id: Id) -> Result<Option<Campaign>> {
        let state = self.state.lock().unwrap();
        Ok(state.campaigns.iter().find(|c| c.id == id).cloned())
    }

    async fn campaigns(&self) -> Result<Vec<Campaign>> {
        let state = self.state.lock().unwrap();
        Ok(state.campaigns.clone())
    }

    async fn replace_campaign(&self, id: Id, campaign: NewCampaign) -> Result<Campaign> {
        let mut state = self.state.lock().unwrap();
        let existing = state
            .campaigns
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(Error::CampaignNotFound(id))?;
        existing.campaign = campaign;
        Ok(existing.clone())
    }

    async fn set_campaign_status(&self, id: Id, status: CampaignStatus) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let existing = state
            .campaigns
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(Error::CampaignNotFound(id))?;
        existing.status = status;
        Ok(())
    }

    async fn delete_campaign(&self, id: Id) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if !state.campaigns.iter().any(|c| c.id == id) {
            return Err(Error::CampaignNotFound(id));
        }
        state.campaigns.retain(|c| c.id != id);
        state.candidates.retain(|c| c.campaign_id != id);
        Ok(())
    }

    async fn insert_candidate(&self, candidate: NewCandidate) -> Result<Candidate> {
        let mut state = self.state.lock().unwrap();
        let candidate = Candidate {
            id: Id::new(),
            candidate,
        };
        state.candidates.push(candidate.clone());
        Ok(candidate)
    }

    async fn candidate(&self, id: Id) -> Result<Option<Candidate>> {
        let state = self.state.lock().unwrap();
        Ok(state.candidates.iter().find(|c| c.id == id).cloned())
    }

    async fn candidates_for(&self, campaign_id: Id) -> Result<Vec<Candidate>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .candidates
            .iter()
            .filter(|c| c.campaign_id == campaign_id)
            .cloned()
            .collect())
    }

    async fn replace_candidate(&self, id: Id, candidate: NewCandidate) -> Result<Candidate> {
        let mut state = self.state.lock().unwrap();
        let existing = state
            .candidates
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(Error::CandidateNotFound(id))?;
        existing.candidate = candidate;
        Ok(existing.clone())
    }

    async fn delete_candidate(&self, id: Id) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if !state.candidates.iter().any(|c| c.id == id) {
            return Err(Error::CandidateNotFound(id));
        }
        state.candidates.retain(|c| c.id != id);
        Ok(())
    }

    async fn insert_vote_within_quota(&self, vote: NewVote, quota: u32) -> Result<(Vote, u32)> {
        // The check and the append happen under one lock acquisition.
        let mut state = self.state.lock().unwrap();
        let used = state
            .votes
            .iter()
            .filter(|v| v.voter_id == vote.voter_id && v.campaign_id == vote.campaign_id)
            .count() as u32;
        if used >= quota {
            return Err(Error::QuotaExceeded { limit: quota });
        }
        let vote = Vote { id: Id::new(), vote };
        state.votes.push(vote.clone());
        Ok((vote, used + 1))
    }

    async fn votes_used(&self, voter_id: Id, campaign_id: Id) -> Result<u32> {
        let state = self.state.lock().unwrap();
        Ok(state
            .votes
            .iter()
            .filter(|v| v.voter_id == voter_id && v.campaign_id == campaign_id)
            .count() as u32)
    }

    async fn votes_by_voter(&self, voter_id: Id, campaign_id: Id) -> Result<Vec<Vote>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .votes
            .iter()
            .filter(|v| v.voter_id == voter_id && v.campaign_id == campaign_id)
            .cloned()
            .collect())
    }

    async fn campaign_has_votes(&self, campaign_id: Id) -> Result<bool> {
        let state = self.state.lock().unwrap();
        Ok(state.votes.iter().any(|v| v.campaign_id == campaign_id))
    }

    async fn candidate_has_votes(&self, candidate_id: Id) -> Result<bool> {
        let state = self.state.lock().unwrap();
        Ok(state.votes.iter().any(|v| v.candidate_id == candidate_id))
    }

    async fn candidate_vote_counts(&self, campaign_id: Id) -> Result<HashMap<Id, u64>> {
        let state = self.state.lock().unwrap();
        let mut counts = HashMap::new();
        for vote in state.votes.iter().filter(|v| v.campaign_id == campaign_id) {
            *counts.entry(vote.candidate_id).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn unique_voters(&self, campaign_id: Id) -> Result<u64> {
        let state = self.state.lock().unwrap();
        let voters: HashSet<Id> = state
            .votes
            .iter()
            .filter(|v| v.campaign_id == campaign_id)
            .map(|v| v.voter_id)
            .collect();
        Ok(voters.len() as u64)
    }
}
