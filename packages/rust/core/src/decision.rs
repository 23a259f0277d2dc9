//! Best-candidate selection and the per-tier stop/advance decision.

use contactscout_shared::{ExtractedContact, VerificationOutcome};

/// A verified contact from one tier, tagged with its search rank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoredCandidate {
    pub rank: usize,
    pub contact: ExtractedContact,
    pub outcome: VerificationOutcome,
}

impl ScoredCandidate {
    /// Ordering key: higher confidence wins, then the earlier search rank.
    fn beats(&self, other: &Self) -> bool {
        (self.outcome.confidence, std::cmp::Reverse(self.rank))
            > (other.outcome.confidence, std::cmp::Reverse(other.rank))
    }
}

/// Pick the single best candidate.
///
/// The result depends only on the set of candidates, never on the order
/// they finished in.
pub fn select_best(candidates: impl IntoIterator<Item = ScoredCandidate>) -> Option<ScoredCandidate> {
    candidates.into_iter().fold(None, |best, next| match best {
        Some(current) if !next.beats(&current) => Some(current),
        _ => Some(next),
    })
}

/// What the orchestrator does after a tier's candidates are scored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Advance { next: u8 },
    Exhausted,
}

/// Accept a best candidate at or above `threshold`; otherwise move to the
/// next tier while one remains.
pub fn decide(best: Option<&ScoredCandidate>, threshold: u8, current: u8, tier_count: u8) -> Decision {
    if best.is_some_and(|b| b.outcome.confidence >= threshold) {
        Decision::Accept
    } else if current < tier_count {
        Decision::Advance { next: current + 1 }
    } else {
        Decision::Exhausted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scored(rank: usize, confidence: u8) -> ScoredCandidate {
        ScoredCandidate {
            rank,
            contact: ExtractedContact {
                phone: Some(format!("555-010{rank}")),
                email: None,
                address: None,
                source_url: format!("https://example.org/{rank}"),
            },
            outcome: VerificationOutcome::new(confidence, confidence >= 50, ""),
        }
    }

    #[test]
    fn highest_confidence_wins() {
        let best = select_best(vec![scored(1, 40), scored(2, 85), scored(3, 60)]).unwrap();
        assert_eq!(best.rank, 2);
    }

    #[test]
    fn ties_go_to_earlier_rank() {
        let best = select_best(vec![scored(3, 80), scored(1, 80), scored(2, 80)]).unwrap();
        assert_eq!(best.rank, 1);
    }

    #[test]
    fn selection_ignores_completion_order() {
        let candidates = vec![scored(1, 70), scored(2, 90), scored(3, 90), scored(4, 10)];
        let expected = select_best(candidates.clone()).unwrap();

        let mut reversed = candidates.clone();
        reversed.reverse();
        assert_eq!(select_best(reversed).unwrap(), expected);

        let rotated: Vec<_> = candidates[2..].iter().chain(&candidates[..2]).cloned().collect();
        assert_eq!(select_best(rotated).unwrap(), expected);
        assert_eq!(expected.rank, 2);
    }

    #[test]
    fn empty_tier_has_no_best() {
        assert!(select_best(Vec::new()).is_none());
    }

    #[test]
    fn decision_table() {
        let strong = scored(1, 85);
        let weak = scored(1, 40);
        let exact = scored(1, 70);

        assert_eq!(decide(Some(&strong), 70, 1, 3), Decision::Accept);
        assert_eq!(decide(Some(&exact), 70, 3, 3), Decision::Accept);
        assert_eq!(decide(Some(&weak), 70, 1, 3), Decision::Advance { next: 2 });
        assert_eq!(decide(None, 70, 2, 3), Decision::Advance { next: 3 });
        assert_eq!(decide(Some(&weak), 70, 3, 3), Decision::Exhausted);
        assert_eq!(decide(None, 70, 3, 3), Decision::Exhausted);
    }
}
