use chrono::Utc;

use crate::error::{Error, Result};
use crate::model::{mongodb::Id, vote::NewVote, vote::Vote};
use crate::realtime::Hub;
use crate::store::VoteStore;
use crate::tally;

/// The result of an admitted vote.
#[derive(Debug, Clone)]
pub struct AdmittedVote {
    pub vote: Vote,
    pub votes_used: u32,
    pub votes_remaining: u32,
}

/// How a voter currently stands against a campaign's quota.
#[derive(Debug, Clone)]
pub struct QuotaStanding {
    pub votes: Vec<Vote>,
    pub votes_used: u32,
    pub votes_remaining: u32,
    pub votes_per_voter: u32,
}

/// Decide a single vote attempt.
///
/// The eligibility checks run in a fixed order so every rejection has one
/// definitive reason: campaign exists, campaign active, inside the voting
/// window, candidate belongs to the campaign, quota. The quota check and the
/// durable append are a single atomic storage operation, so concurrent
/// attempts by the same voter can never overshoot the quota between a read
/// and a write.
///
/// On success, the fresh tally is broadcast to the campaign's room. That
/// happens after the append has committed and entirely outside the quota
/// critical section; a slow subscriber can not hold up anyone's vote.
pub async fn submit_vote(
    store: &dyn VoteStore,
    hub: &Hub,
    voter_id: Id,
    campaign_id: Id,
    candidate_id: Id,
) -> Result<AdmittedVote> {
    let campaign = store
        .campaign(campaign_id)
        .await?
        .ok_or(Error::CampaignNotFound(campaign_id))?;

    if !campaign.status.is_active() {
        return Err(Error::CampaignNotActive(campaign_id));
    }

    if !campaign.window_contains(Utc::now()) {
        return Err(Error::OutsideVotingWindow(campaign_id));
    }

    let candidate = store
        .candidate(candidate_id)
        .await?
        .filter(|candidate| candidate.campaign_id == campaign_id)
        .ok_or(Error::CandidateNotFound(candidate_id))?;

    let vote = NewVote::new(voter_id, campaign_id, candidate.id);
    let (vote, votes_used) = store
        .insert_vote_within_quota(vote, campaign.votes_per_voter)
        .await?;

    debug!(
        "Admitted vote {} for candidate {} in campaign {campaign_id} ({votes_used}/{} used)",
        vote.id, candidate.id, campaign.votes_per_voter
    );

    let snapshot = tally::compute_tally(store, campaign_id).await?;
    hub.emit_vote_update(campaign_id, snapshot);

    Ok(AdmittedVote {
        vote,
        votes_used,
        votes_remaining: campaign.votes_per_voter - votes_used,
    })
}

/// How many votes the voter has used and has left in a campaign.
pub async fn quota_standing(
    store: &dyn VoteStore,
    voter_id: Id,
    campaign_id: Id,
) -> Result<QuotaStanding> {
    let campaign = store
        .campaign(campaign_id)
        .await?
        .ok_or(Error::CampaignNotFound(campaign_id))?;

    let votes = store.votes_by_voter(voter_id, campaign_id).await?;
    let votes_used = votes.len() as u32;

    Ok(QuotaStanding {
        votes,
        votes_used,
        votes_remaining: campaign.votes_per_voter.saturating_sub(votes_used),
        votes_per_voter: campaign.votes_per_voter,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use chrono::Duration;
    use rocket::futures::future::join_all;

    use crate::model::campaign::{Campaign, CampaignCore, CampaignStatus};
    use crate::model::candidate::NewCandidate;
    use crate::store::{MemStore, SharedStore};

    struct Fixture {
        store: SharedStore,
        hub: Arc<Hub>,
        campaign: Campaign,
        candidates: Vec<crate::model::candidate::Candidate>,
    }

    /// An active campaign with the given quota and named candidates.
    async fn fixture(quota: u32, candidate_names: &[&str]) -> Fixture {
        let store: SharedStore = Arc::new(MemStore::new());
        let now = Utc::now();
        let campaign = store
            .insert_campaign(CampaignCore {
                title: "Junta Directiva 2026".to_string(),
                description: "Annual board election".to_string(),
                votes_per_voter: quota,
                status: CampaignStatus::Active,
                start_time: now - Duration::hours(1),
                end_time: now + Duration::hours(1),
                created_by: Id::new(),
            })
            .await
            .unwrap();
        let mut candidates = Vec::new();
        for name in candidate_names {
            candidates.push(
                store
                    .insert_candidate(NewCandidate {
                        name: name.to_string(),
                        description: String::new(),
                        photo: None,
                        campaign_id: campaign.id,
                    })
                    .await
                    .unwrap(),
            );
        }
        Fixture {
            store,
            hub: Arc::new(Hub::new()),
            campaign,
            candidates,
        }
    }

    #[tokio::test]
    async fn a_single_vote_is_admitted_and_tallied() {
        let fx = fixture(1, &["X", "Y"]).await;
        let voter = Id::new();

        let admitted = submit_vote(
            fx.store.as_ref(),
            &fx.hub,
            voter,
            fx.campaign.id,
            fx.candidates[0].id,
        )
        .await
        .unwrap();
        assert_eq!(admitted.votes_used, 1);
        assert_eq!(admitted.votes_remaining, 0);

        let snapshot = tally::compute_tally(fx.store.as_ref(), fx.campaign.id)
            .await
            .unwrap();
        assert_eq!(snapshot.total_votes, 1);
        assert_eq!(snapshot.total_unique_voters, 1);
        assert_eq!(snapshot.results[0].candidate_name, "X");
        assert_eq!(snapshot.results[0].votes, 1);
        assert_eq!(snapshot.results[0].percentage, "100.00%");
        assert_eq!(snapshot.results[1].candidate_name, "Y");
        assert_eq!(snapshot.results[1].votes, 0);
        assert_eq!(snapshot.results[1].percentage, "0.00%");
    }

    #[tokio::test]
    async fn a_second_vote_past_the_quota_is_rejected() {
        let fx = fixture(1, &["X", "Y"]).await;
        let voter = Id::new();

        submit_vote(
            fx.store.as_ref(),
            &fx.hub,
            voter,
            fx.campaign.id,
            fx.candidates[0].id,
        )
        .await
        .unwrap();

        let err = submit_vote(
            fx.store.as_ref(),
            &fx.hub,
            voter,
            fx.campaign.id,
            fx.candidates[1].id,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::QuotaExceeded { limit: 1 }));

        // The tally is unchanged by the rejection.
        let snapshot = tally::compute_tally(fx.store.as_ref(), fx.campaign.id)
            .await
            .unwrap();
        assert_eq!(snapshot.total_votes, 1);
    }

    #[tokio::test]
    async fn an_inactive_campaign_rejects_every_vote() {
        let fx = fixture(1, &["X"]).await;
        fx.store
            .set_campaign_status(fx.campaign.id, CampaignStatus::Inactive)
            .await
            .unwrap();

        let err = submit_vote(
            fx.store.as_ref(),
            &fx.hub,
            Id::new(),
            fx.campaign.id,
            fx.candidates[0].id,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::CampaignNotActive(_)));
    }

    #[tokio::test]
    async fn votes_outside_the_window_are_rejected_even_with_quota_left() {
        let store: SharedStore = Arc::new(MemStore::new());
        let hub = Hub::new();
        let now = Utc::now();
        // Active status but the window already closed.
        let campaign = store
            .insert_campaign(CampaignCore {
                title: "Closed".to_string(),
                description: String::new(),
                votes_per_voter: 5,
                status: CampaignStatus::Active,
                start_time: now - Duration::hours(2),
                end_time: now - Duration::hours(1),
                created_by: Id::new(),
            })
            .await
            .unwrap();
        let candidate = store
            .insert_candidate(NewCandidate {
                name: "X".to_string(),
                description: String::new(),
                photo: None,
                campaign_id: campaign.id,
            })
            .await
            .unwrap();

        let err = submit_vote(store.as_ref(), &hub, Id::new(), campaign.id, candidate.id)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::OutsideVotingWindow(_)));
    }

    #[tokio::test]
    async fn candidates_from_another_campaign_are_rejected() {
        let fx = fixture(1, &["X"]).await;
        let other = fixture(1, &["Z"]).await;

        // `other`'s candidate does not belong to `fx`'s campaign; the store
        // for `fx` has never heard of it at all.
        let err = submit_vote(
            fx.store.as_ref(),
            &fx.hub,
            Id::new(),
            fx.campaign.id,
            other.candidates[0].id,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::CandidateNotFound(_)));

        let missing = submit_vote(
            fx.store.as_ref(),
            &fx.hub,
            Id::new(),
            Id::new(),
            fx.candidates[0].id,
        )
        .await
        .unwrap_err();
        assert!(matches!(missing, Error::CampaignNotFound(_)));
    }

    #[tokio::test]
    async fn an_admitted_vote_broadcasts_the_fresh_tally() {
        let fx = fixture(2, &["X", "Y"]).await;
        let mut rx = fx.hub.subscribe(fx.campaign.id);

        submit_vote(
            fx.store.as_ref(),
            &fx.hub,
            Id::new(),
            fx.campaign.id,
            fx.candidates[1].id,
        )
        .await
        .unwrap();

        match rx.recv().await.unwrap() {
            crate::realtime::CampaignEvent::VoteUpdate { tally, .. } => {
                assert_eq!(tally.total_votes, 1);
                assert_eq!(tally.results[0].candidate_name, "Y");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_submissions_never_breach_the_quota() {
        const QUOTA: u32 = 3;
        const EXTRA: u32 = 5;

        let fx = fixture(QUOTA, &["X", "Y"]).await;
        let voter = Id::new();

        let attempts = (0..QUOTA + EXTRA).map(|i| {
            let store = Arc::clone(&fx.store);
            let hub = Arc::clone(&fx.hub);
            let campaign_id = fx.campaign.id;
            let candidate_id = fx.candidates[(i % 2) as usize].id;
            tokio::spawn(async move {
                submit_vote(store.as_ref(), &hub, voter, campaign_id, candidate_id).await
            })
        });

        let outcomes: Vec<_> = join_all(attempts)
            .await
            .into_iter()
            .map(|joined| joined.unwrap())
            .collect();

        let admitted = outcomes.iter().filter(|o| o.is_ok()).count() as u32;
        let rejected = outcomes
            .iter()
            .filter(|o| matches!(o, Err(Error::QuotaExceeded { limit: QUOTA })))
            .count() as u32;
        assert_eq!(admitted, QUOTA);
        assert_eq!(rejected, EXTRA);

        // Exactly the quota landed in the log, regardless of arrival order.
        let used = fx
            .store
            .votes_used(voter, fx.campaign.id)
            .await
            .unwrap();
        assert_eq!(used, QUOTA);
    }

    #[tokio::test]
    async fn quota_standing_reports_usage() {
        let fx = fixture(3, &["X"]).await;
        let voter = Id::new();

        submit_vote(
            fx.store.as_ref(),
            &fx.hub,
            voter,
            fx.campaign.id,
            fx.candidates[0].id,
        )
        .await
        .unwrap();

        let standing = quota_standing(fx.store.as_ref(), voter, fx.campaign.id)
            .await
            .unwrap();
        assert_eq!(standing.votes_used, 1);
        assert_eq!(standing.votes_remaining, 2);
        assert_eq!(standing.votes_per_voter, 3);
        assert_eq!(standing.votes.len(), 1);

        // A voter who never voted has the full quota left.
        let fresh = quota_standing(fx.store.as_ref(), Id::new(), fx.campaign.id)
            .await
            .unwrap();
        assert_eq!(fresh.votes_used, 0);
        assert_eq!(fresh.votes_remaining, 3);
    }
}
