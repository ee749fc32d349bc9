//! batch
//!
//! The Batch Planner: turns an ordered list of approved candidate MRs
//! targeting one branch into a [`BatchPlan`] whose combined rebase is
//! attempted atomically.
//!
//! When batching is disabled, or the candidate list is empty, plans are
//! always size 1 (or `None`). When enabled, the planner takes the longest
//! prefix up to `max_size` and shrinks it, one MR at a time from the tail,
//! until [`ConflictProbe`] reports the remaining prefix as conflict-free.

use async_trait::async_trait;

use crate::core::types::{BatchPlan, MergeRequest, MrIid};

/// Decides whether a prefix of candidate MRs would conflict if rebased and
/// tested together. The real implementation asks the Git Worktree to
/// attempt the combined rebase as a dry run; tests supply a canned answer.
#[async_trait]
pub trait ConflictProbe: Send + Sync {
    async fn would_conflict(&self, members: &[MrIid]) -> bool;
}

/// A probe that never reports a conflict; useful when batching members that
/// are known independent, or in tests that don't exercise shrinkage.
pub struct NoConflictProbe;

#[async_trait]
impl ConflictProbe for NoConflictProbe {
    async fn would_conflict(&self, _members: &[MrIid]) -> bool {
        false
    }
}

/// Plan a batch from an ordered candidate list, already filtered to MRs
/// approved and eligible per the Project Worker's candidate selection.
///
/// Returns `None` if `candidates` is empty. Otherwise always includes at
/// least the first candidate: a single-MR batch is never rejected by the
/// conflict probe, since there is nothing else in it to conflict with.
pub async fn plan(
    candidates: &[MergeRequest],
    batching_enabled: bool,
    max_size: usize,
    probe: &dyn ConflictProbe,
) -> Option<BatchPlan> {
    let first = candidates.first()?;
    let target_branch = first.target_branch.clone();

    if !batching_enabled {
        return Some(BatchPlan::single(target_branch, first.iid));
    }

    let cap = max_size.max(1).min(candidates.len());
    let mut members: Vec<MrIid> = candidates[..cap].iter().map(|mr| mr.iid).collect();

    while members.len() > 1 && probe.would_conflict(&members).await {
        members.pop();
    }

    Some(BatchPlan {
        target_branch,
        members,
    })
}
