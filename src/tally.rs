use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{
    candidate::Candidate,
    mongodb::{ApiId, Id},
};
use crate::store::VoteStore;

/// One candidate's standing within a [`TallySnapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateTally {
    pub candidate_id: ApiId,
    pub candidate_name: String,
    pub votes: u64,
    /// Share of the total vote, formatted to two decimals, e.g. "66.67%".
    pub percentage: String,
}

/// The aggregated state of a campaign at a point in time. Derived from the
/// vote log on demand and never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TallySnapshot {
    pub campaign_id: ApiId,
    /// Per-candidate results, most votes first. Every candidate of the
    /// campaign appears exactly once, zero-vote candidates included.
    pub results: Vec<CandidateTally>,
    pub total_votes: u64,
    pub total_unique_voters: u64,
}

/// Compute the current tally for a campaign. Pure read; the only failure
/// besides storage trouble is an unknown campaign.
pub async fn compute_tally(store: &dyn VoteStore, campaign_id: Id) -> Result<TallySnapshot> {
    store
        .campaign(campaign_id)
        .await?
        .ok_or(Error::CampaignNotFound(campaign_id))?;

    let candidates = store.candidates_for(campaign_id).await?;
    let counts = store.candidate_vote_counts(campaign_id).await?;
    let unique_voters = store.unique_voters(campaign_id).await?;

    Ok(assemble(campaign_id, &candidates, &counts, unique_voters))
}

/// Assemble a snapshot from its raw ingredients. `candidates` must be in
/// creation order; that order is the tie-break between equal vote counts,
/// which keeps the output deterministic.
fn assemble(
    campaign_id: Id,
    candidates: &[Candidate],
    counts: &HashMap<Id, u64>,
    unique_voters: u64,
) -> TallySnapshot {
    let total_votes: u64 = candidates
        .iter()
        .map(|c| counts.get(&c.id).copied().unwrap_or(0))
        .sum();

    let mut results: Vec<CandidateTally> = candidates
        .iter()
        .map(|candidate| {
            let votes = counts.get(&candidate.id).copied().unwrap_or(0);
            CandidateTally {
                candidate_id: candidate.id.into(),
                candidate_name: candidate.name.clone(),
                votes,
                percentage: percentage(votes, total_votes),
            }
        })
        .collect();
    // A stable sort, so ties keep their creation order.
    results.sort_by(|a, b| b.votes.cmp(&a.votes));

    TallySnapshot {
        campaign_id: campaign_id.into(),
        results,
        total_votes,
        total_unique_voters: unique_voters,
    }
}

fn percentage(votes: u64, total: u64) -> String {
    if total == 0 {
        // No division by zero on an empty campaign.
        "0.00%".to_string()
    } else {
        format!("{:.2}%", votes as f64 * 100.0 / total as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    use crate::model::candidate::CandidateCore;

    fn candidates(campaign_id: Id, names: &[&str]) -> Vec<Candidate> {
        names
            .iter()
            .map(|name| Candidate {
                id: Id::new(),
                candidate: CandidateCore {
                    name: name.to_string(),
                    description: String::new(),
                    photo: None,
                    campaign_id,
                },
            })
            .collect()
    }

    #[test]
    fn zero_vote_candidates_are_included() {
        let campaign_id = Id::new();
        let cands = candidates(campaign_id, &["X", "Y"]);
        let counts = HashMap::from([(cands[0].id, 1)]);

        let snapshot = assemble(campaign_id, &cands, &counts, 1);

        assert_eq!(snapshot.results.len(), 2);
        assert_eq!(snapshot.results[0].candidate_name, "X");
        assert_eq!(snapshot.results[0].votes, 1);
        assert_eq!(snapshot.results[0].percentage, "100.00%");
        assert_eq!(snapshot.results[1].candidate_name, "Y");
        assert_eq!(snapshot.results[1].votes, 0);
        assert_eq!(snapshot.results[1].percentage, "0.00%");
        assert_eq!(snapshot.total_votes, 1);
        assert_eq!(snapshot.total_unique_voters, 1);
    }

    #[test]
    fn empty_campaign_has_no_division_by_zero() {
        let campaign_id = Id::new();
        let cands = candidates(campaign_id, &["X", "Y"]);

        let snapshot = assemble(campaign_id, &cands, &HashMap::new(), 0);

        assert_eq!(snapshot.total_votes, 0);
        for result in &snapshot.results {
            assert_eq!(result.votes, 0);
            assert_eq!(result.percentage, "0.00%");
        }
    }

    #[test]
    fn ties_keep_creation_order() {
        let campaign_id = Id::new();
        let cands = candidates(campaign_id, &["first", "second", "third"]);
        // second outranks the others; first and third tie on zero.
        let counts = HashMap::from([(cands[1].id, 2)]);

        let snapshot = assemble(campaign_id, &cands, &counts, 2);

        let names: Vec<_> = snapshot
            .results
            .iter()
            .map(|r| r.candidate_name.as_str())
            .collect();
        assert_eq!(names, ["second", "first", "third"]);
    }

    #[test]
    fn recomputation_is_deterministic() {
        let campaign_id = Id::new();
        let cands = candidates(campaign_id, &["a", "b", "c", "d"]);
        let counts = HashMap::from([
            (cands[0].id, 3),
            (cands[1].id, 3),
            (cands[2].id, 5),
        ]);

        let first = assemble(campaign_id, &cands, &counts, 6);
        let second = assemble(campaign_id, &cands, &counts, 6);
        assert_eq!(first, second);
    }

    #[test]
    fn percentages_are_rounded_to_two_decimals() {
        assert_eq!(percentage(1, 3), "33.33%");
        assert_eq!(percentage(2, 3), "66.67%");
        assert_eq!(percentage(3, 3), "100.00%");
        assert_eq!(percentage(0, 7), "0.00%");
    }

    proptest! {
        /// Candidate votes always sum to the total, every candidate appears
        /// exactly once, and the ordering is non-increasing.
        #[test]
        fn snapshot_invariants(votes in proptest::collection::vec(0u64..50, 1..8)) {
            let campaign_id = Id::new();
            let names: Vec<String> = (0..votes.len()).map(|i| format!("candidate-{i}")).collect();
            let name_refs: Vec<&str> = names.iter().map(String::as_str).collect();
            let cands = candidates(campaign_id, &name_refs);
            let counts: HashMap<Id, u64> = cands
                .iter()
                .zip(votes.iter())
                .map(|(c, v)| (c.id, *v))
                .collect();

            let snapshot = assemble(campaign_id, &cands, &counts, 1);

            prop_assert_eq!(snapshot.results.len(), cands.len());
            let sum: u64 = snapshot.results.iter().map(|r| r.votes).sum();
            prop_assert_eq!(sum, snapshot.total_votes);
            prop_assert!(snapshot
                .results
                .windows(2)
                .all(|pair| pair[0].votes >= pair[1].votes));
        }
    }
}
