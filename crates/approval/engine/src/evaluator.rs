//! Quorum evaluation.
//!
//! `evaluate` is a pure function from (level definition, eligible set,
//! recorded decisions) to a level outcome. It is re-run after every
//! decision; all persistence and side effects live in the transition
//! engine, never here.

use approval_types::{ApprovalMode, ApproverId, Decision, DecisionAction, LevelDefinition};
use std::collections::HashSet;

/// Outcome of evaluating one level's decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelOutcome {
    /// Quorum not reached yet; await more decisions.
    Pending,
    /// The level approved the subject.
    Satisfied,
    /// The level rejected the subject.
    Rejected,
}

/// Evaluates a level against its currently-eligible approvers and the
/// active decisions recorded so far.
///
/// Counting rules per mode:
///
/// - `any`: satisfied by `minimum_approvals` approvals (default one);
///   rejections are retained for the record but never reject the level.
/// - `all`: rejected by a single reject; satisfied once every member of
///   the *current* eligible set has approved, so membership drift is
///   re-checked on every evaluation.
/// - `majority`: satisfied at `minimum_approvals` if set, otherwise a
///   strict majority of the eligible set; rejected as soon as enough
///   rejections accumulate that the threshold is no longer reachable.
/// - `sequential`: the eligible set is an ordered chain; a reject by the
///   next approver in order rejects the level, and it is satisfied when
///   the final member has approved.
///
/// A decision synthesized by the scheduler (timeout auto-action) carries
/// system origin and short-circuits the quorum math entirely.
pub fn evaluate(
    level: &LevelDefinition,
    eligible: &[ApproverId],
    decisions: &[&Decision],
) -> LevelOutcome {
    if let Some(system) = decisions.iter().find(|d| d.is_system() && d.is_vote()) {
        return match system.action {
            DecisionAction::Approve => LevelOutcome::Satisfied,
            _ => LevelOutcome::Rejected,
        };
    }

    let approved: HashSet<&ApproverId> = decisions
        .iter()
        .filter(|d| d.action == DecisionAction::Approve)
        .map(|d| &d.approver)
        .collect();
    let rejections = decisions
        .iter()
        .filter(|d| d.action == DecisionAction::Reject)
        .count();

    match level.mode {
        ApprovalMode::Any => {
            let threshold = level.minimum_approvals.unwrap_or(1).max(1) as usize;
            if approved.len() >= threshold {
                LevelOutcome::Satisfied
            } else {
                LevelOutcome::Pending
            }
        }
        ApprovalMode::All => {
            if rejections > 0 {
                LevelOutcome::Rejected
            } else if !eligible.is_empty() && eligible.iter().all(|a| approved.contains(a)) {
                LevelOutcome::Satisfied
            } else {
                LevelOutcome::Pending
            }
        }
        ApprovalMode::Majority => {
            let total = eligible.len();
            let threshold = level
                .minimum_approvals
                .map(|m| m as usize)
                .unwrap_or(total / 2 + 1);
            if approved.len() >= threshold {
                LevelOutcome::Satisfied
            } else if rejections > total.saturating_sub(threshold) {
                // Even if every remaining member approves, the
                // threshold can no longer be reached.
                LevelOutcome::Rejected
            } else {
                LevelOutcome::Pending
            }
        }
        ApprovalMode::Sequential => {
            for approver in eligible {
                match vote_of(decisions, approver) {
                    Some(DecisionAction::Approve) => continue,
                    Some(DecisionAction::Reject) => return LevelOutcome::Rejected,
                    _ => return LevelOutcome::Pending,
                }
            }
            if eligible.is_empty() {
                LevelOutcome::Pending
            } else {
                LevelOutcome::Satisfied
            }
        }
    }
}

/// The approver whose turn it is on a sequential level: the first member
/// of the ordered eligible set without an approval on record.
pub fn next_in_sequence<'a>(
    eligible: &'a [ApproverId],
    decisions: &[&Decision],
) -> Option<&'a ApproverId> {
    eligible
        .iter()
        .find(|a| vote_of(decisions, a) != Some(DecisionAction::Approve))
}

fn vote_of(decisions: &[&Decision], approver: &ApproverId) -> Option<DecisionAction> {
    decisions
        .iter()
        .find(|d| d.is_vote() && &d.approver == approver)
        .map(|d| d.action)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approval_types::ApproverSpec;
    use proptest::prelude::*;

    fn approvers(n: usize) -> Vec<ApproverId> {
        (0..n).map(|i| ApproverId::new(format!("user-{i}"))).collect()
    }

    fn level(mode: ApprovalMode) -> LevelDefinition {
        LevelDefinition::new(1, "Review", ApproverSpec::role("reviewer"), mode)
    }

    fn approve(approver: &ApproverId) -> Decision {
        Decision::new(1, approver.clone(), DecisionAction::Approve)
    }

    fn reject(approver: &ApproverId) -> Decision {
        Decision::new(1, approver.clone(), DecisionAction::Reject).with_comment("no")
    }

    #[test]
    fn any_mode_satisfied_by_a_single_approve() {
        let eligible = approvers(3);
        let d = approve(&eligible[2]);
        let outcome = evaluate(&level(ApprovalMode::Any), &eligible, &[&d]);
        assert_eq!(outcome, LevelOutcome::Satisfied);
    }

    #[test]
    fn any_mode_rejections_never_reject() {
        let eligible = approvers(3);
        let a = reject(&eligible[0]);
        let b = reject(&eligible[1]);
        let c = reject(&eligible[2]);
        let outcome = evaluate(&level(ApprovalMode::Any), &eligible, &[&a, &b, &c]);
        assert_eq!(outcome, LevelOutcome::Pending);
    }

    #[test]
    fn any_mode_minimum_approvals_overrides_the_threshold() {
        let eligible = approvers(3);
        let lvl = level(ApprovalMode::Any).with_minimum_approvals(2);
        let first = approve(&eligible[0]);
        assert_eq!(
            evaluate(&lvl, &eligible, &[&first]),
            LevelOutcome::Pending
        );
        let second = approve(&eligible[1]);
        assert_eq!(
            evaluate(&lvl, &eligible, &[&first, &second]),
            LevelOutcome::Satisfied
        );
    }

    #[test]
    fn all_mode_requires_every_current_member() {
        let eligible = approvers(2);
        let lvl = level(ApprovalMode::All);
        let first = approve(&eligible[0]);
        assert_eq!(evaluate(&lvl, &eligible, &[&first]), LevelOutcome::Pending);

        let second = approve(&eligible[1]);
        assert_eq!(
            evaluate(&lvl, &eligible, &[&first, &second]),
            LevelOutcome::Satisfied
        );

        // A third member joining the eligible set reopens the quorum.
        let grown = approvers(3);
        assert_eq!(
            evaluate(&lvl, &grown, &[&first, &second]),
            LevelOutcome::Pending
        );
    }

    #[test]
    fn all_mode_single_reject_fails_fast() {
        let eligible = approvers(3);
        let a = approve(&eligible[0]);
        let b = reject(&eligible[1]);
        let outcome = evaluate(&level(ApprovalMode::All), &eligible, &[&a, &b]);
        assert_eq!(outcome, LevelOutcome::Rejected);
    }

    #[test]
    fn majority_of_three_needs_two_votes_either_way() {
        let eligible = approvers(3);
        let lvl = level(ApprovalMode::Majority);

        let a = approve(&eligible[0]);
        let r = reject(&eligible[1]);
        assert_eq!(evaluate(&lvl, &eligible, &[&a, &r]), LevelOutcome::Pending);

        let a2 = approve(&eligible[2]);
        assert_eq!(
            evaluate(&lvl, &eligible, &[&a, &r, &a2]),
            LevelOutcome::Satisfied
        );

        let r2 = reject(&eligible[2]);
        assert_eq!(
            evaluate(&lvl, &eligible, &[&a, &r, &r2]),
            LevelOutcome::Rejected
        );
    }

    #[test]
    fn majority_minimum_approvals_lowers_the_bar() {
        let eligible = approvers(5);
        let lvl = level(ApprovalMode::Majority).with_minimum_approvals(2);
        let a = approve(&eligible[0]);
        let b = approve(&eligible[1]);
        assert_eq!(
            evaluate(&lvl, &eligible, &[&a, &b]),
            LevelOutcome::Satisfied
        );
    }

    #[test]
    fn sequential_walks_the_chain_in_order() {
        let eligible = approvers(3);
        let lvl = level(ApprovalMode::Sequential);

        assert_eq!(next_in_sequence(&eligible, &[]), Some(&eligible[0]));
        assert_eq!(evaluate(&lvl, &eligible, &[]), LevelOutcome::Pending);

        let first = approve(&eligible[0]);
        assert_eq!(
            next_in_sequence(&eligible, &[&first]),
            Some(&eligible[1])
        );
        assert_eq!(evaluate(&lvl, &eligible, &[&first]), LevelOutcome::Pending);

        let second = approve(&eligible[1]);
        let third = approve(&eligible[2]);
        assert_eq!(
            evaluate(&lvl, &eligible, &[&first, &second, &third]),
            LevelOutcome::Satisfied
        );

        let veto = reject(&eligible[1]);
        assert_eq!(
            evaluate(&lvl, &eligible, &[&first, &veto]),
            LevelOutcome::Rejected
        );
    }

    #[test]
    fn system_decisions_short_circuit_quorum() {
        let eligible = approvers(3);
        let lvl = level(ApprovalMode::All);

        let auto = Decision::system(1, DecisionAction::Approve, "deadline passed");
        assert_eq!(evaluate(&lvl, &eligible, &[&auto]), LevelOutcome::Satisfied);

        let auto = Decision::system(1, DecisionAction::Reject, "deadline passed");
        let human = approve(&eligible[0]);
        assert_eq!(
            evaluate(&lvl, &eligible, &[&human, &auto]),
            LevelOutcome::Rejected
        );
    }

    #[test]
    fn delegations_do_not_count_as_votes() {
        let eligible = approvers(2);
        let lvl = level(ApprovalMode::All);
        let handoff = Decision::new(1, eligible[0].clone(), DecisionAction::Delegate)
            .with_delegate(ApproverId::new("other"));
        let vote = approve(&eligible[1]);
        assert_eq!(
            evaluate(&lvl, &eligible, &[&handoff, &vote]),
            LevelOutcome::Pending
        );
    }

    fn vote_strategy() -> impl Strategy<Value = Vec<Option<DecisionAction>>> {
        proptest::collection::vec(
            proptest::option::of(prop_oneof![
                Just(DecisionAction::Approve),
                Just(DecisionAction::Reject),
            ]),
            1..8,
        )
    }

    fn decisions_from(eligible: &[ApproverId], votes: &[Option<DecisionAction>]) -> Vec<Decision> {
        eligible
            .iter()
            .zip(votes)
            .filter_map(|(approver, vote)| {
                vote.map(|action| Decision::new(1, approver.clone(), action))
            })
            .collect()
    }

    proptest! {
        #[test]
        fn property_majority_outcome_matches_the_tally(votes in vote_strategy()) {
            let eligible = approvers(votes.len());
            let decisions = decisions_from(&eligible, &votes);
            let refs: Vec<&Decision> = decisions.iter().collect();

            let total = eligible.len();
            let threshold = total / 2 + 1;
            let approvals = votes.iter().flatten()
                .filter(|a| **a == DecisionAction::Approve).count();
            let rejections = votes.iter().flatten()
                .filter(|a| **a == DecisionAction::Reject).count();

            let outcome = evaluate(&level(ApprovalMode::Majority), &eligible, &refs);
            match outcome {
                LevelOutcome::Satisfied => prop_assert!(approvals >= threshold),
                LevelOutcome::Rejected => prop_assert!(rejections > total - threshold),
                LevelOutcome::Pending => {
                    prop_assert!(approvals < threshold);
                    prop_assert!(rejections <= total - threshold);
                }
            }
        }

        #[test]
        fn property_extra_approvals_never_hurt(votes in vote_strategy()) {
            for mode in [ApprovalMode::Any, ApprovalMode::All, ApprovalMode::Majority] {
                let eligible = approvers(votes.len());
                let decisions = decisions_from(&eligible, &votes);
                let refs: Vec<&Decision> = decisions.iter().collect();
                let before = evaluate(&level(mode), &eligible, &refs);

                // Convert one abstention into an approval.
                if let Some(idx) = votes.iter().position(|v| v.is_none()) {
                    let mut more = votes.clone();
                    more[idx] = Some(DecisionAction::Approve);
                    let decisions = decisions_from(&eligible, &more);
                    let refs: Vec<&Decision> = decisions.iter().collect();
                    let after = evaluate(&level(mode), &eligible, &refs);

                    if before == LevelOutcome::Satisfied {
                        prop_assert_eq!(after, LevelOutcome::Satisfied);
                    }
                    prop_assert!(!(before == LevelOutcome::Pending
                        && after == LevelOutcome::Rejected));
                }
            }
        }
    }
}
