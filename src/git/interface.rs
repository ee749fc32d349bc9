//! git::interface
//!
//! The [`GitOps`] trait: Marge's only doorway to a local worktree.
//!
//! # Architecture
//!
//! Workers never call `git2` directly. They hold a `Box<dyn GitOps>` per
//! project clone, so tests can substitute [`super::fake::FakeWorktree`] and
//! drive rebase conflicts, stale pushes, and hook rejection deterministically.
//!
//! # Error Handling
//!
//! [`GitError`] distinguishes failure *kinds* a worker branches on:
//! a conflict needs a comment-and-skip, a rejected push needs a restart
//! from PREPARE, a network error needs a bounded retry.

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::types::{BranchName, Oid};
use crate::trailer::{self, TrailerPlan};

/// Errors from Git worktree operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// Not inside a Git repository, or the clone has not been created yet.
    #[error("not a git repository: {path}")]
    NotARepo { path: PathBuf },

    /// Requested ref does not exist.
    #[error("ref not found: {refname}")]
    RefNotFound { refname: String },

    /// Rebasing the source branch onto the target produced conflicts.
    #[error("rebase conflict on {branch} onto {onto}")]
    RebaseConflict { branch: BranchName, onto: BranchName },

    /// The rebase produced no diff against the target (already merged,
    /// or the MR's commits are empty).
    #[error("rebase of {branch} onto {onto} produced an empty diff")]
    EmptyDiff { branch: BranchName, onto: BranchName },

    /// A server-side pre-receive/update hook rejected the push.
    #[error("push hook rejected: {message}")]
    HookRejected { message: String },

    /// The push was rejected for a reason other than a hook, most often
    /// because the remote ref moved since the worker last fetched it.
    #[error("push rejected: {reason}")]
    Rejected { reason: String },

    /// The remote never responded within the configured git timeout.
    #[error("network error: {0}")]
    NetworkError(String),

    /// `add-reviewers` is set but an approver has no public email on file.
    #[error("approver '{0}' has no email on file")]
    MissingReviewerEmail(String),

    /// Internal git2 error with no more specific category.
    #[error("git error: {0}")]
    Internal(String),

    /// The operation did not finish within the configured git timeout.
    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },
}

impl From<trailer::TrailerError> for GitError {
    fn from(err: trailer::TrailerError) -> Self {
        match err {
            trailer::TrailerError::MissingEmail(username) => GitError::MissingReviewerEmail(username),
        }
    }
}

impl GitError {
    /// Whether retrying the whole PREPARE step (re-fetch, re-rebase) has a
    /// chance of succeeding. Conflicts and empty diffs do not: they need a
    /// human, or simply mean the MR is no longer mergeable as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GitError::NetworkError(_) | GitError::Rejected { .. } | GitError::Timeout { .. }
        )
    }
}

/// Operations a worker performs against one project's local clone.
///
/// A `GitOps` implementation owns exactly one bare-ish working clone used
/// to stage rebases before they are pushed; it is never shared between
/// concurrent workers.
#[async_trait]
pub trait GitOps: Send + Sync {
    /// Fetch `branch` (and the target it will be rebased onto) from the
    /// remote, updating the local tracking refs.
    async fn fetch(&self, branches: &[BranchName]) -> Result<(), GitError>;

    /// Rebase `branch` onto `onto`, both resolved against the refs last
    /// fetched, rewriting every replayed commit to carry `trailers`
    /// (`Reviewed-by` and `Part-of` on each commit, `Tested-by` on the tip
    /// only). Returns the sha of the new tip.
    ///
    /// # Errors
    ///
    /// - [`GitError::RebaseConflict`] if replaying commits conflicts
    /// - [`GitError::EmptyDiff`] if the result is identical to `onto`
    /// - [`GitError::MissingReviewerEmail`] if `trailers` names a reviewer
    ///   with no email on file
    async fn rebase_onto(
        &self,
        branch: &BranchName,
        onto: &BranchName,
        trailers: &TrailerPlan<'_>,
    ) -> Result<Oid, GitError>;

    /// Merge `branch` into `onto` with a merge commit carrying `trailers`
    /// (used for the `--use-merge-strategy` experimental path). Returns the
    /// new tip.
    async fn merge_onto(
        &self,
        branch: &BranchName,
        onto: &BranchName,
        trailers: &TrailerPlan<'_>,
    ) -> Result<Oid, GitError>;

    /// Force-with-lease push `branch`'s current local tip to the remote,
    /// failing if the remote ref is not at `expected_remote_tip`.
    ///
    /// # Errors
    ///
    /// - [`GitError::Rejected`] if the remote moved since `expected_remote_tip`
    ///   was read, or a protected-branch rule blocks a non-fast-forward push
    /// - [`GitError::HookRejected`] if a server hook vetoes the push
    async fn push(
        &self,
        branch: &BranchName,
        expected_remote_tip: &Oid,
    ) -> Result<(), GitError>;

    /// List the commit shas introduced by `branch` since it diverged from
    /// `base`, oldest first. Used by the Commit Rewriter to find the tip
    /// commit whose trailers get rewritten.
    async fn commit_shas(&self, base: &BranchName, branch: &BranchName) -> Result<Vec<Oid>, GitError>;

    /// Dry run: would folding `members` together, each merged onto the
    /// result of the one before it starting from `onto`, produce a
    /// conflict? Used by the Batch Planner to shrink a batch before
    /// attempting it for real. Creates no commit reachable from any ref.
    async fn would_conflict(&self, onto: &BranchName, members: &[BranchName]) -> Result<bool, GitError>;
}

/// A `git2`-backed [`GitOps`] implementation. One instance per project,
/// each with its own clone under the coordinator's working directory.
pub struct LibGit2Worktree {
    repo_path: PathBuf,
    ssh_key_file: PathBuf,
    remote_name: String,
}

impl LibGit2Worktree {
    /// Open the working directory for a project, if it already exists.
    ///
    /// # Errors
    ///
    /// Returns `GitError::NotARepo` if `repo_path` is not a git repository.
    pub fn open(repo_path: PathBuf, ssh_key_file: PathBuf) -> Result<Self, GitError> {
        if git2::Repository::open(&repo_path).is_err() {
            return Err(GitError::NotARepo { path: repo_path });
        }
        Ok(Self {
            repo_path,
            ssh_key_file,
            remote_name: "origin".to_string(),
        })
    }

    /// Open the working directory, cloning it from `remote_url` first if it
    /// does not exist yet. `reference_repo`, when set, is passed to the
    /// clone as a local object-store reference to avoid re-downloading
    /// history the bot already has a copy of elsewhere on disk.
    pub fn clone_or_open(
        repo_path: PathBuf,
        ssh_key_file: PathBuf,
        remote_url: &str,
        reference_repo: Option<&std::path::Path>,
    ) -> Result<Self, GitError> {
        if git2::Repository::open(&repo_path).is_ok() {
            return Self::open(repo_path, ssh_key_file);
        }

        let key_path = ssh_key_file.clone();
        let mut callbacks = git2::RemoteCallbacks::new();
        callbacks.credentials(move |_url, username_from_url, _allowed| {
            git2::Cred::ssh_key(username_from_url.unwrap_or("git"), None, &key_path, None)
        });

        let mut fetch_opts = git2::FetchOptions::new();
        fetch_opts.remote_callbacks(callbacks);

        let mut builder = git2::build::RepoBuilder::new();
        builder.bare(true);
        builder.fetch_options(fetch_opts);
        if let Some(reference) = reference_repo {
            // git2's RepoBuilder has no `--reference` hook; approximate it
            // by pointing `objects/info/alternates` at the reference repo's
            // object store once the clone lands.
            let repo = builder
                .clone(remote_url, &repo_path)
                .map_err(|e| GitError::NetworkError(e.message().to_string()))?;
            let alternates_path = repo.path().join("objects/info/alternates");
            if let Ok(mut f) = std::fs::File::create(&alternates_path) {
                use std::io::Write;
                let _ = writeln!(f, "{}", reference.join("objects").display());
            }
        } else {
            builder
                .clone(remote_url, &repo_path)
                .map_err(|e| GitError::NetworkError(e.message().to_string()))?;
        }

        Self::open(repo_path, ssh_key_file)
    }

    fn open_repo(&self) -> Result<git2::Repository, GitError> {
        git2::Repository::open(&self.repo_path).map_err(|e| GitError::Internal(e.message().to_string()))
    }

    fn remote_callbacks(&self) -> git2::RemoteCallbacks<'_> {
        let mut callbacks = git2::RemoteCallbacks::new();
        let key_path = self.ssh_key_file.clone();
        callbacks.credentials(move |_url, username_from_url, _allowed| {
            git2::Cred::ssh_key(username_from_url.unwrap_or("git"), None, &key_path, None)
        });
        callbacks
    }

    fn resolve(&self, repo: &git2::Repository, branch: &BranchName) -> Result<Oid, GitError> {
        let refname = format!("refs/remotes/{}/{}", self.remote_name, branch.as_str());
        let reference = repo
            .find_reference(&refname)
            .map_err(|_| GitError::RefNotFound { refname: refname.clone() })?;
        let oid = reference
            .peel_to_commit()
            .map_err(|e| GitError::Internal(e.message().to_string()))?
            .id();
        Oid::new(oid.to_string()).map_err(|e| GitError::Internal(e.to_string()))
    }
}

#[async_trait]
impl GitOps for LibGit2Worktree {
    async fn fetch(&self, branches: &[BranchName]) -> Result<(), GitError> {
        let repo = self.open_repo()?;
        let mut remote = repo
            .find_remote(&self.remote_name)
            .map_err(|e| GitError::Internal(e.message().to_string()))?;

        let mut opts = git2::FetchOptions::new();
        opts.remote_callbacks(self.remote_callbacks());

        let refspecs: Vec<String> = branches
            .iter()
            .map(|b| format!("+refs/heads/{0}:refs/remotes/{1}/{0}", b.as_str(), self.remote_name))
            .collect();

        remote
            .fetch(&refspecs, Some(&mut opts), None)
            .map_err(|e| GitError::NetworkError(e.message().to_string()))
    }

    async fn rebase_onto(
        &self,
        branch: &BranchName,
        onto: &BranchName,
        trailers: &TrailerPlan<'_>,
    ) -> Result<Oid, GitError> {
        let repo = self.open_repo()?;
        let branch_oid = self.resolve(&repo, branch)?;
        let onto_oid = self.resolve(&repo, onto)?;

        let branch_annotated = repo
            .find_annotated_commit(git2::Oid::from_str(branch_oid.as_str()).unwrap())
            .map_err(|e| GitError::Internal(e.message().to_string()))?;
        let onto_annotated = repo
            .find_annotated_commit(git2::Oid::from_str(onto_oid.as_str()).unwrap())
            .map_err(|e| GitError::Internal(e.message().to_string()))?;

        let mut rebase = repo
            .rebase(Some(&branch_annotated), None, Some(&onto_annotated), None)
            .map_err(|e| GitError::Internal(e.message().to_string()))?;

        let signature = repo
            .signature()
            .map_err(|e| GitError::Internal(e.message().to_string()))?;

        let total_ops = rebase.len();
        let mut index = 0usize;

        while let Some(op) = rebase.next() {
            let op = op.map_err(|e| GitError::Internal(e.message().to_string()))?;
            if repo.index().map(|i| i.has_conflicts()).unwrap_or(false) {
                rebase.abort().ok();
                return Err(GitError::RebaseConflict {
                    branch: branch.clone(),
                    onto: onto.clone(),
                });
            }

            let is_tip = index + 1 == total_ops;
            let new_message = if trailers.is_empty() {
                None
            } else {
                let original = repo
                    .find_commit(op.id())
                    .map_err(|e| GitError::Internal(e.message().to_string()))?;
                let original_message = original.message().unwrap_or_default().to_string();
                let plan_for_commit = if is_tip { *trailers } else { trailers.without_tested_by() };
                Some(trailer::rewrite(&original_message, &plan_for_commit)?)
            };

            rebase
                .commit(None, &signature, new_message.as_deref())
                .map_err(|e| GitError::Internal(e.message().to_string()))?;
            index += 1;
        }

        rebase
            .finish(Some(&signature))
            .map_err(|e| GitError::Internal(e.message().to_string()))?;

        let new_tip = repo
            .head()
            .and_then(|h| h.peel_to_commit())
            .map_err(|e| GitError::Internal(e.message().to_string()))?
            .id();

        if new_tip == git2::Oid::from_str(onto_oid.as_str()).unwrap() {
            return Err(GitError::EmptyDiff {
                branch: branch.clone(),
                onto: onto.clone(),
            });
        }

        Oid::new(new_tip.to_string()).map_err(|e| GitError::Internal(e.to_string()))
    }

    async fn merge_onto(
        &self,
        branch: &BranchName,
        onto: &BranchName,
        trailers: &TrailerPlan<'_>,
    ) -> Result<Oid, GitError> {
        let repo = self.open_repo()?;
        let branch_oid = self.resolve(&repo, branch)?;
        let onto_oid = self.resolve(&repo, onto)?;

        let their_commit = repo
            .find_commit(git2::Oid::from_str(branch_oid.as_str()).unwrap())
            .map_err(|e| GitError::Internal(e.message().to_string()))?;
        let our_commit = repo
            .find_commit(git2::Oid::from_str(onto_oid.as_str()).unwrap())
            .map_err(|e| GitError::Internal(e.message().to_string()))?;

        let mut index = repo
            .merge_commits(&our_commit, &their_commit, None)
            .map_err(|e| GitError::Internal(e.message().to_string()))?;

        if index.has_conflicts() {
            return Err(GitError::RebaseConflict {
                branch: branch.clone(),
                onto: onto.clone(),
            });
        }

        let tree_oid = index
            .write_tree_to(&repo)
            .map_err(|e| GitError::Internal(e.message().to_string()))?;
        let tree = repo
            .find_tree(tree_oid)
            .map_err(|e| GitError::Internal(e.message().to_string()))?;
        let signature = repo
            .signature()
            .map_err(|e| GitError::Internal(e.message().to_string()))?;

        let base_message = format!("Merge branch '{}' into '{}'", branch.as_str(), onto.as_str());
        let message = if trailers.is_empty() {
            base_message
        } else {
            trailer::rewrite(&base_message, trailers)?
        };
        let merge_oid = repo
            .commit(
                None,
                &signature,
                &signature,
                &message,
                &tree,
                &[&our_commit, &their_commit],
            )
            .map_err(|e| GitError::Internal(e.message().to_string()))?;

        Oid::new(merge_oid.to_string()).map_err(|e| GitError::Internal(e.to_string()))
    }

    async fn push(&self, branch: &BranchName, expected_remote_tip: &Oid) -> Result<(), GitError> {
        let repo = self.open_repo()?;
        let current_remote_tip = self.resolve(&repo, branch)?;
        if &current_remote_tip != expected_remote_tip {
            return Err(GitError::Rejected {
                reason: format!(
                    "remote {} moved from {} to {}",
                    branch,
                    expected_remote_tip.short(10),
                    current_remote_tip.short(10)
                ),
            });
        }

        let mut remote = repo
            .find_remote(&self.remote_name)
            .map_err(|e| GitError::Internal(e.message().to_string()))?;

        // `Remote::push` returns `Ok(())` even when the server rejects the
        // specific ref (protected branch, pre-receive hook) — that outcome
        // only surfaces through this per-ref status callback.
        let rejected = std::rc::Rc::new(std::cell::RefCell::new(None));
        let rejected_in_callback = rejected.clone();
        let mut callbacks = self.remote_callbacks();
        callbacks.push_update_reference(move |_refname, status| {
            if let Some(message) = status {
                *rejected_in_callback.borrow_mut() = Some(message.to_string());
            }
            Ok(())
        });

        let mut opts = git2::PushOptions::new();
        opts.remote_callbacks(callbacks);

        let refspec = format!("refs/heads/{0}:refs/heads/{0}", branch.as_str());
        remote.push(&[refspec], Some(&mut opts)).map_err(|e| {
            let message = e.message().to_string();
            if message.contains("hook declined") {
                GitError::HookRejected { message }
            } else if message.contains("non-fast-forward") || message.contains("rejected") {
                GitError::Rejected { reason: message }
            } else {
                GitError::NetworkError(message)
            }
        })?;

        if let Some(message) = rejected.borrow_mut().take() {
            return if message.to_lowercase().contains("hook") {
                Err(GitError::HookRejected { message })
            } else {
                Err(GitError::Rejected { reason: message })
            };
        }

        Ok(())
    }

    async fn commit_shas(&self, base: &BranchName, branch: &BranchName) -> Result<Vec<Oid>, GitError> {
        let repo = self.open_repo()?;
        let base_oid = self.resolve(&repo, base)?;
        let branch_oid = self.resolve(&repo, branch)?;

        let mut walk = repo
            .revwalk()
            .map_err(|e| GitError::Internal(e.message().to_string()))?;
        walk.push(git2::Oid::from_str(branch_oid.as_str()).unwrap())
            .map_err(|e| GitError::Internal(e.message().to_string()))?;
        walk.hide(git2::Oid::from_str(base_oid.as_str()).unwrap())
            .map_err(|e| GitError::Internal(e.message().to_string()))?;

        let mut shas = Vec::new();
        for oid in walk {
            let oid = oid.map_err(|e| GitError::Internal(e.message().to_string()))?;
            let sha = Oid::new(oid.to_string()).map_err(|e| GitError::Internal(e.to_string()))?;
            shas.push(sha);
        }
        shas.reverse();
        Ok(shas)
    }

    async fn would_conflict(&self, onto: &BranchName, members: &[BranchName]) -> Result<bool, GitError> {
        let repo = self.open_repo()?;
        let onto_oid = self.resolve(&repo, onto)?;
        let mut base = repo
            .find_commit(git2::Oid::from_str(onto_oid.as_str()).unwrap())
            .map_err(|e| GitError::Internal(e.message().to_string()))?;

        for member in members {
            let member_oid = self.resolve(&repo, member)?;
            let member_commit = repo
                .find_commit(git2::Oid::from_str(member_oid.as_str()).unwrap())
                .map_err(|e| GitError::Internal(e.message().to_string()))?;

            let mut index = repo
                .merge_commits(&base, &member_commit, None)
                .map_err(|e| GitError::Internal(e.message().to_string()))?;
            if index.has_conflicts() {
                return Ok(true);
            }

            // Fold this member's tree into the running base so the next
            // member is checked against the combined result, not just
            // `onto` alone. The commit is never attached to a ref.
            let tree_oid = index
                .write_tree_to(&repo)
                .map_err(|e| GitError::Internal(e.message().to_string()))?;
            let tree = repo
                .find_tree(tree_oid)
                .map_err(|e| GitError::Internal(e.message().to_string()))?;
            let signature = repo
                .signature()
                .map_err(|e| GitError::Internal(e.message().to_string()))?;
            let folded_oid = repo
                .commit(None, &signature, &signature, "batch conflict probe", &tree, &[&base, &member_commit])
                .map_err(|e| GitError::Internal(e.message().to_string()))?;
            base = repo
                .find_commit(folded_oid)
                .map_err(|e| GitError::Internal(e.message().to_string()))?;
        }

        Ok(false)
    }
}
