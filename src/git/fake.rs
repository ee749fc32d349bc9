//! git::fake
//!
//! An in-memory [`GitOps`] for tests. Branches are modeled as a chain of
//! shas with no actual tree content; "rebase" and "merge" just mint a new
//! sha that's deterministic given the test's own bookkeeping, since tests
//! assert on state-machine transitions, not on git plumbing.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::interface::{GitError, GitOps};
use crate::core::types::{BranchName, Oid};
use crate::trailer::{self, TrailerPlan};

#[derive(Default)]
struct State {
    /// Local view of each remote branch's tip, as of the last `fetch`.
    remote_tips: HashMap<String, Oid>,
    /// History recorded purely for `commit_shas`: branch -> shas since its
    /// recorded base, oldest first.
    history: HashMap<String, Vec<Oid>>,
    /// Branches whose next `rebase_onto` call should conflict.
    force_conflict: std::collections::HashSet<String>,
    /// Branches whose next `push` call should be rejected as stale.
    force_reject: std::collections::HashSet<String>,
    fetch_count: u32,
    push_count: u32,
}

/// An in-memory `GitOps` double.
pub struct FakeWorktree {
    state: Mutex<State>,
}

impl Default for FakeWorktree {
    fn default() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }
}

impl FakeWorktree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a branch's remote tip, as if it had just been fetched.
    pub fn set_branch_tip(&self, branch: &BranchName, tip: Oid) {
        self.state
            .lock()
            .unwrap()
            .remote_tips
            .insert(branch.as_str().to_string(), tip);
    }

    pub fn set_history(&self, branch: &BranchName, shas: Vec<Oid>) {
        self.state
            .lock()
            .unwrap()
            .history
            .insert(branch.as_str().to_string(), shas);
    }

    pub fn force_conflict(&self, branch: &BranchName) {
        self.state
            .lock()
            .unwrap()
            .force_conflict
            .insert(branch.as_str().to_string());
    }

    pub fn force_reject(&self, branch: &BranchName) {
        self.state
            .lock()
            .unwrap()
            .force_reject
            .insert(branch.as_str().to_string());
    }

    pub fn fetch_count(&self) -> u32 {
        self.state.lock().unwrap().fetch_count
    }

    pub fn push_count(&self) -> u32 {
        self.state.lock().unwrap().push_count
    }

    fn mint_sha(seed: &str) -> Oid {
        let hex = format!("{:x}", simple_hash(seed));
        let digest = format!("{:0<40}", hex);
        Oid::new(digest).expect("mint_sha always produces 40 hex chars")
    }
}

fn simple_hash(s: &str) -> u64 {
    let mut h: u64 = 0xcbf29ce484222325;
    for b in s.bytes() {
        h ^= b as u64;
        h = h.wrapping_mul(0x100000001b3);
    }
    h
}

#[async_trait]
impl GitOps for FakeWorktree {
    async fn fetch(&self, _branches: &[BranchName]) -> Result<(), GitError> {
        self.state.lock().unwrap().fetch_count += 1;
        Ok(())
    }

    async fn rebase_onto(
        &self,
        branch: &BranchName,
        onto: &BranchName,
        trailers: &TrailerPlan<'_>,
    ) -> Result<Oid, GitError> {
        let message = if trailers.is_empty() {
            String::new()
        } else {
            trailer::rewrite("", trailers)?
        };
        let mut state = self.state.lock().unwrap();
        if state.force_conflict.remove(branch.as_str()) {
            return Err(GitError::RebaseConflict {
                branch: branch.clone(),
                onto: onto.clone(),
            });
        }
        let onto_tip = state
            .remote_tips
            .get(onto.as_str())
            .cloned()
            .ok_or_else(|| GitError::RefNotFound {
                refname: onto.as_str().to_string(),
            })?;
        let branch_tip = state
            .remote_tips
            .get(branch.as_str())
            .cloned()
            .ok_or_else(|| GitError::RefNotFound {
                refname: branch.as_str().to_string(),
            })?;
        if branch_tip == onto_tip {
            return Err(GitError::EmptyDiff {
                branch: branch.clone(),
                onto: onto.clone(),
            });
        }
        let new_tip = Self::mint_sha(&format!(
            "rebase:{}:{}:{}",
            branch.as_str(),
            onto_tip.as_str(),
            message
        ));
        state.remote_tips.insert(branch.as_str().to_string(), new_tip.clone());
        Ok(new_tip)
    }

    async fn merge_onto(
        &self,
        branch: &BranchName,
        onto: &BranchName,
        trailers: &TrailerPlan<'_>,
    ) -> Result<Oid, GitError> {
        let message = if trailers.is_empty() {
            String::new()
        } else {
            trailer::rewrite("", trailers)?
        };
        let mut state = self.state.lock().unwrap();
        if state.force_conflict.remove(branch.as_str()) {
            return Err(GitError::RebaseConflict {
                branch: branch.clone(),
                onto: onto.clone(),
            });
        }
        let onto_tip = state
            .remote_tips
            .get(onto.as_str())
            .cloned()
            .ok_or_else(|| GitError::RefNotFound {
                refname: onto.as_str().to_string(),
            })?;
        let new_tip = Self::mint_sha(&format!(
            "merge:{}:{}:{}",
            branch.as_str(),
            onto_tip.as_str(),
            message
        ));
        state.remote_tips.insert(onto.as_str().to_string(), new_tip.clone());
        Ok(new_tip)
    }

    async fn push(&self, branch: &BranchName, expected_remote_tip: &Oid) -> Result<(), GitError> {
        let mut state = self.state.lock().unwrap();
        if state.force_reject.remove(branch.as_str()) {
            return Err(GitError::Rejected {
                reason: "remote moved underneath the push".to_string(),
            });
        }
        let current = state.remote_tips.get(branch.as_str()).cloned();
        if current.as_ref() != Some(expected_remote_tip) {
            return Err(GitError::Rejected {
                reason: format!(
                    "expected {} but remote is at {:?}",
                    expected_remote_tip,
                    current.map(|c| c.to_string())
                ),
            });
        }
        state.push_count += 1;
        Ok(())
    }

    async fn commit_shas(&self, _base: &BranchName, branch: &BranchName) -> Result<Vec<Oid>, GitError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .history
            .get(branch.as_str())
            .cloned()
            .unwrap_or_default())
    }

    async fn would_conflict(&self, _onto: &BranchName, members: &[BranchName]) -> Result<bool, GitError> {
        // Peek rather than consume: probing must not use up a branch's
        // one-shot `force_conflict`, since the real `rebase_onto` still
        // needs to see it when the batch is actually attempted.
        let state = self.state.lock().unwrap();
        Ok(members.iter().any(|b| state.force_conflict.contains(b.as_str())))
    }
}
