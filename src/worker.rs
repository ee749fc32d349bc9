//! worker
//!
//! The Project Worker: the merge state machine for one (project,
//! target-branch) pair. PREPARE rebases the candidate onto the freshest
//! target tip and rewrites its trailers; PUSH force-with-lease pushes the
//! result; REAPPROVE restores approvals when the project resets them on
//! push; AWAIT_CI polls for a green pipeline on the pushed sha; FINALISE
//! calls accept with that sha pinned.
//!
//! A worker never retries a component error based on a guess: [`GitError`]
//! and [`ForgeError`] carry enough structure (`is_retryable`/`is_transient`)
//! to let the state machine decide without inspecting message strings.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::Duration;
use regex::Regex;

use crate::batch::{self, ConflictProbe};
use crate::clock::Clock;
use crate::core::types::{BranchName, MergeRequest, MrIid, MrState, Oid, Project, User, UserId};
use crate::forge::{Forge, ForgeError, Note};
use crate::git::{GitError, GitOps};
use crate::mrview;
use crate::trailer::{self, TrailerPlan};

/// Adapts the Git Worktree's dry-run merge check to [`ConflictProbe`],
/// mapping a batch candidate's `MrIid` back to the source branch the
/// worktree actually knows about.
struct GitConflictProbe<'a> {
    git: &'a dyn GitOps,
    onto: &'a BranchName,
    source_branches: HashMap<MrIid, BranchName>,
}

#[async_trait]
impl ConflictProbe for GitConflictProbe<'_> {
    async fn would_conflict(&self, members: &[MrIid]) -> bool {
        let branches: Vec<BranchName> = members
            .iter()
            .filter_map(|iid| self.source_branches.get(iid).cloned())
            .collect();
        match self.git.would_conflict(self.onto, &branches).await {
            Ok(conflict) => conflict,
            Err(err) => {
                tracing::warn!(error = %err, "batch conflict probe failed, shrinking to be safe");
                true
            }
        }
    }
}

/// Ordering policy for candidate selection within one project/target-branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateOrder {
    OldestCreatedFirst,
    OldestLastUpdateFirst,
}

/// Everything a worker needs to know about how to behave, already resolved
/// from [`crate::core::config::Config`] at startup.
#[derive(Clone)]
pub struct WorkerSettings {
    pub add_reviewers: bool,
    pub add_tested: bool,
    pub add_part_of: bool,
    pub impersonate_approvers: bool,
    pub approval_reset_timeout_secs: u64,
    pub ci_timeout_secs: u64,
    pub git_timeout_secs: u64,
    pub batch_enabled: bool,
    pub batch_max_size: usize,
    pub use_merge_strategy: bool,
    pub branch_regexp: Regex,
    pub candidate_order: CandidateOrder,
    pub bot_name: String,
}

/// A component-level failure that escaped retry/restart handling. Workers
/// surface this to the coordinator, which logs it and retires the worker if
/// it recurs; it never reaches `main`.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("forge error: {0}")]
    Forge(#[from] ForgeError),

    #[error("git error: {0}")]
    Git(#[from] GitError),

    #[error("trailer error: {0}")]
    Trailer(#[from] trailer::TrailerError),
}

/// What one call to [`ProjectWorker::tick`] accomplished, for logging and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IterationOutcome {
    /// No eligible candidate this cycle.
    Idle,
    /// These MRs were merged, in order.
    Merged(Vec<MrIid>),
    /// The candidate(s) in flight were abandoned and will be reconsidered
    /// fresh from PREPARE next tick (target moved, sha mismatch, lock busy).
    Restarted,
    /// This MR was removed from the flow; the bot unassigned itself and
    /// left a note explaining why.
    Unassigned(MrIid, String),
}

enum StepOutcome {
    Continue(Oid),
    NoOp,
    Unassigned(MrIid, String),
    Restart,
}

enum CiOutcome {
    Success,
    Failed(String),
    Restart,
    Timeout,
}

enum FinaliseOutcome {
    Merged,
    Restart,
}

struct PreparedMember {
    mr: MergeRequest,
    pushed_tip: Oid,
}

/// The state machine for one (project, target-branch) pair. Owns its own
/// working clone via `git`; `forge` is shared with every other worker in
/// the fleet.
pub struct ProjectWorker {
    forge: Arc<dyn Forge>,
    git: Box<dyn GitOps>,
    clock: Arc<dyn Clock>,
    bot: User,
    project: Project,
    target_branch: crate::core::types::BranchName,
    settings: WorkerSettings,
}

impl ProjectWorker {
    pub fn new(
        forge: Arc<dyn Forge>,
        git: Box<dyn GitOps>,
        clock: Arc<dyn Clock>,
        bot: User,
        project: Project,
        target_branch: crate::core::types::BranchName,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            forge,
            git,
            clock,
            bot,
            project,
            target_branch,
            settings,
        }
    }

    pub fn target_branch(&self) -> &crate::core::types::BranchName {
        &self.target_branch
    }

    /// Bound a single git operation's wall time to the configured timeout.
    /// `Remote::push`/`fetch`/merge-tree computation can all hang against a
    /// misbehaving or overloaded server; nothing else in the stack imposes
    /// a deadline on them.
    async fn git_timeout<T>(
        &self,
        operation: &str,
        fut: impl std::future::Future<Output = Result<T, GitError>>,
    ) -> Result<T, GitError> {
        match tokio::time::timeout(StdDuration::from_secs(self.settings.git_timeout_secs), fut).await {
            Ok(result) => result,
            Err(_) => Err(GitError::Timeout {
                operation: operation.to_string(),
                secs: self.settings.git_timeout_secs,
            }),
        }
    }

    /// Run one full iteration: select a candidate (or batch), drive it
    /// through PREPARE -> PUSH -> REAPPROVE -> AWAIT_CI -> FINALISE.
    pub async fn tick(&mut self) -> Result<IterationOutcome, WorkerError> {
        let assigned = self.forge.list_assigned_mrs(self.project.id).await?;
        let candidates = select_candidates(&assigned, &self.project, &self.bot, &self.settings)
            .into_iter()
            .filter(|mr| mr.target_branch.is_same_as(&self.target_branch))
            .collect::<Vec<_>>();

        if candidates.is_empty() {
            return Ok(IterationOutcome::Idle);
        }

        let probe = GitConflictProbe {
            git: self.git.as_ref(),
            onto: &self.target_branch,
            source_branches: candidates.iter().map(|mr| (mr.iid, mr.source_branch.clone())).collect(),
        };
        let plan = batch::plan(
            &candidates,
            self.settings.batch_enabled,
            self.settings.batch_max_size,
            &probe,
        )
        .await
        .expect("candidates is non-empty");

        let mut onto = self.target_branch.clone();
        let mut prepared: Vec<PreparedMember> = Vec::new();
        let mut early_exit: Option<IterationOutcome> = None;

        for iid in &plan.members {
            let mr = candidates
                .iter()
                .find(|c| &c.iid == iid)
                .expect("planner only selects known candidates")
                .clone();

            match self.prepare_and_push(&mr, &onto).await? {
                StepOutcome::Continue(tip) => {
                    onto = mr.source_branch.clone();
                    prepared.push(PreparedMember { mr, pushed_tip: tip });
                }
                StepOutcome::NoOp => {
                    if prepared.is_empty() {
                        early_exit = Some(IterationOutcome::Idle);
                    }
                    break;
                }
                StepOutcome::Unassigned(iid, reason) => {
                    if prepared.is_empty() {
                        early_exit = Some(IterationOutcome::Unassigned(iid, reason));
                    }
                    break;
                }
                StepOutcome::Restart => {
                    if prepared.is_empty() {
                        early_exit = Some(IterationOutcome::Restarted);
                    }
                    break;
                }
            }
        }

        if let Some(outcome) = early_exit {
            return Ok(outcome);
        }
        if prepared.is_empty() {
            return Ok(IterationOutcome::Idle);
        }

        let tip_to_test = prepared.last().expect("checked non-empty").pushed_tip.clone();
        let ci_mr = prepared.last().expect("checked non-empty").mr.clone();

        match self.await_ci(&ci_mr, &tip_to_test).await? {
            CiOutcome::Success => {}
            CiOutcome::Failed(url) => {
                let reason = format!("CI failed on {}: {}", tip_to_test.short(10), url);
                self.terminal_abort(&ci_mr, &reason).await?;
                return Ok(IterationOutcome::Unassigned(ci_mr.iid, "ci failed".to_string()));
            }
            CiOutcome::Timeout => {
                self.terminal_abort(&ci_mr, "timed out waiting for CI").await?;
                return Ok(IterationOutcome::Unassigned(ci_mr.iid, "ci timeout".to_string()));
            }
            CiOutcome::Restart => return Ok(IterationOutcome::Restarted),
        }

        let mut merged = Vec::new();
        for member in &prepared {
            match self.finalise(member).await? {
                FinaliseOutcome::Merged => merged.push(member.mr.iid),
                FinaliseOutcome::Restart => break,
            }
        }

        if merged.is_empty() {
            Ok(IterationOutcome::Restarted)
        } else {
            Ok(IterationOutcome::Merged(merged))
        }
    }

    async fn prepare_and_push(
        &mut self,
        mr: &MergeRequest,
        onto: &crate::core::types::BranchName,
    ) -> Result<StepOutcome, WorkerError> {
        tracing::info!(mr = %mr.iid, project = %self.project.id, onto = %onto, "PREPARE");
        self.git_timeout("fetch", self.git.fetch(&[onto.clone(), mr.source_branch.clone()])).await?;

        let reviewers: Vec<User> = mr.approvals.by.iter().filter(|u| u.id != mr.author.id).cloned().collect();
        let tested_by = self
            .settings
            .add_tested
            .then(|| format!("{} {}", self.settings.bot_name, mr.web_url));
        let part_of = self.settings.add_part_of.then(|| mr.web_url.clone());
        let plan = TrailerPlan {
            reviewers: if self.settings.add_reviewers { &reviewers } else { &[] },
            tested_by: tested_by.as_deref(),
            part_of: part_of.as_deref(),
        };

        let rebase_result = if self.settings.use_merge_strategy {
            self.git_timeout("merge", self.git.merge_onto(&mr.source_branch, onto, &plan)).await
        } else {
            self.git_timeout("rebase", self.git.rebase_onto(&mr.source_branch, onto, &plan)).await
        };

        let new_tip = match rebase_result {
            Ok(tip) => tip,
            Err(GitError::EmptyDiff { .. }) => {
                self.note(mr, "nothing to merge: source branch is already contained in the target")
                    .await?;
                return Ok(StepOutcome::NoOp);
            }
            Err(GitError::RebaseConflict { .. }) => {
                self.note(mr, "rebase produced conflicts; please resolve and reassign")
                    .await?;
                self.unassign(mr).await?;
                return Ok(StepOutcome::Unassigned(mr.iid, "rebase conflict".to_string()));
            }
            Err(GitError::MissingReviewerEmail(username)) => {
                self.note(
                    mr,
                    &format!("cannot add a Reviewed-by trailer for '{}': no public email on file", username),
                )
                .await?;
                self.unassign(mr).await?;
                return Ok(StepOutcome::Unassigned(mr.iid, "reviewer has no public email".to_string()));
            }
            Err(err) => return Err(err.into()),
        };

        tracing::info!(mr = %mr.iid, sha = %new_tip, "PUSH");
        match self.git_timeout("push", self.git.push(&mr.source_branch, &new_tip)).await {
            Ok(()) => {}
            Err(GitError::HookRejected { message }) => {
                self.note(mr, &format!("push rejected by server hook: {}", message)).await?;
                self.unassign(mr).await?;
                return Ok(StepOutcome::Unassigned(mr.iid, "push hook rejected".to_string()));
            }
            Err(err) if err.is_retryable() => {
                tracing::info!(mr = %mr.iid, "push rejected, target moved underneath us, restarting");
                return Ok(StepOutcome::Restart);
            }
            Err(err) => return Err(err.into()),
        }

        if self.settings.impersonate_approvers && self.project.reset_approvals_on_push {
            tracing::info!(mr = %mr.iid, "REAPPROVE");
            if !self.reapprove(mr).await? {
                return Ok(StepOutcome::Unassigned(mr.iid, "approval reset timeout".to_string()));
            }
        }

        Ok(StepOutcome::Continue(new_tip))
    }

    /// Re-approve as each prior approver (modeling forge admin impersonation)
    /// and wait for the approval set to meet threshold again. Returns `false`
    /// (and has already posted a note and unassigned) if the timeout elapses
    /// first.
    async fn reapprove(&mut self, mr: &MergeRequest) -> Result<bool, WorkerError> {
        let deadline = self.clock.now() + Duration::seconds(self.settings.approval_reset_timeout_secs as i64);

        for approver in mr.approvals.by.iter().filter(|u| u.id != mr.author.id) {
            if let Err(err) = self.forge.approve_mr(self.project.id, mr.iid).await {
                tracing::warn!(mr = %mr.iid, approver = %approver.username, error = %err, "impersonated approval failed");
            }
        }

        loop {
            let refreshed = self.forge.get_mr(self.project.id, mr.iid).await?;
            if refreshed.approvals.meets_threshold() {
                return Ok(true);
            }
            if self.clock.now() >= deadline {
                self.note(mr, "approvals did not re-settle before the configured timeout")
                    .await?;
                self.unassign(mr).await?;
                return Ok(false);
            }
            tokio::time::sleep(StdDuration::from_millis(200)).await;
        }
    }

    async fn await_ci(&mut self, mr: &MergeRequest, sha: &Oid) -> Result<CiOutcome, WorkerError> {
        tracing::info!(mr = %mr.iid, sha = %sha, "AWAIT_CI");
        let deadline = self.clock.now() + Duration::seconds(self.settings.ci_timeout_secs as i64);

        loop {
            let refreshed = self.forge.get_mr(self.project.id, mr.iid).await?;
            if &refreshed.sha != sha || refreshed.updated_at != mr.updated_at {
                return Ok(CiOutcome::Restart);
            }

            let pipelines = if self.forge.capabilities().mr_pipelines_endpoint {
                self.forge.get_pipelines_for_mr(self.project.id, mr.iid).await?
            } else {
                self.forge.get_pipelines_for_branch(self.project.id, &mr.source_branch).await?
            };

            if let Some(pipeline) = pipelines.iter().find(|p| &p.sha == sha) {
                if pipeline.status.is_success() {
                    return Ok(CiOutcome::Success);
                }
                if pipeline.status.is_failure() {
                    return Ok(CiOutcome::Failed(pipeline.web_url.clone()));
                }
            }

            if self.clock.now() >= deadline {
                return Ok(CiOutcome::Timeout);
            }
            tokio::time::sleep(StdDuration::from_millis(500)).await;
        }
    }

    async fn finalise(&mut self, member: &PreparedMember) -> Result<FinaliseOutcome, WorkerError> {
        const MAX_ATTEMPTS: u32 = 3;
        tracing::info!(mr = %member.mr.iid, sha = %member.pushed_tip, "FINALISE");

        for attempt in 1..=MAX_ATTEMPTS {
            match self.forge.accept_mr(self.project.id, member.mr.iid, &member.pushed_tip).await {
                Ok(()) => return Ok(FinaliseOutcome::Merged),
                Err(ForgeError::Conflict(_)) | Err(ForgeError::Unprocessable { .. }) => {
                    if attempt == MAX_ATTEMPTS {
                        return Ok(FinaliseOutcome::Restart);
                    }
                    tokio::time::sleep(StdDuration::from_millis(300)).await;
                }
                Err(err) if err.is_transient() => {
                    if attempt == MAX_ATTEMPTS {
                        return Err(err.into());
                    }
                    tokio::time::sleep(StdDuration::from_millis(300)).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(FinaliseOutcome::Restart)
    }

    async fn note(&self, mr: &MergeRequest, message: &str) -> Result<(), WorkerError> {
        self.forge.post_note(self.project.id, mr.iid, Note(message)).await?;
        Ok(())
    }

    async fn unassign(&self, mr: &MergeRequest) -> Result<(), WorkerError> {
        let remaining: Vec<UserId> = mr
            .assignees
            .iter()
            .filter(|u| u.id != self.bot.id)
            .map(|u| u.id)
            .collect();
        self.forge.set_assignees(self.project.id, mr.iid, &remaining).await?;
        Ok(())
    }

    async fn terminal_abort(&self, mr: &MergeRequest, reason: &str) -> Result<(), WorkerError> {
        self.note(mr, reason).await?;
        self.unassign(mr).await
    }
}

/// Filter and order a project's assigned MRs into eligible candidates.
pub fn select_candidates(
    mrs: &[MergeRequest],
    project: &Project,
    bot: &User,
    settings: &WorkerSettings,
) -> Vec<MergeRequest> {
    let mut candidates: Vec<MergeRequest> = mrs
        .iter()
        .filter(|mr| mr.state == MrState::Opened)
        .filter(|mr| !mr.work_in_progress)
        .filter(|mr| mrview::is_assigned_to(mr, bot))
        .filter(|mr| mrview::source_branch_matches(mr, &settings.branch_regexp))
        .filter(|mr| !mr.has_unresolved_discussions)
        .filter(|mr| !mrview::is_trivial_source_branch(mr))
        .filter(|mr| mrview::is_approved(mr, project))
        .cloned()
        .collect();

    match settings.candidate_order {
        CandidateOrder::OldestCreatedFirst => candidates.sort_by_key(|mr| mr.id),
        CandidateOrder::OldestLastUpdateFirst => candidates.sort_by_key(|mr| mr.updated_at),
    }

    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::core::types::{Approvals, BranchName, MergeMethod, PipelineStatus, ProjectId};
    use crate::forge::mock::MockForge;
    use crate::git::fake::FakeWorktree;
    use std::collections::BTreeSet;

    fn bot() -> User {
        User {
            id: UserId(99),
            name: "Marge".to_string(),
            username: "marge-bot".to_string(),
            email: Some("marge@example.com".to_string()),
        }
    }

    fn alice() -> User {
        User {
            id: UserId(1),
            name: "Alice".to_string(),
            username: "alice".to_string(),
            email: Some("alice@example.com".to_string()),
        }
    }

    fn project() -> Project {
        Project {
            id: ProjectId(1),
            path: "group/project".to_string(),
            merge_method: MergeMethod::RebaseMerge,
            approvals_required: 1,
            reset_approvals_on_push: false,
            ssh_url_to_repo: "git@gitlab.example.com:group/project.git".to_string(),
        }
    }

    fn settings() -> WorkerSettings {
        WorkerSettings {
            add_reviewers: false,
            add_tested: false,
            add_part_of: false,
            impersonate_approvers: false,
            approval_reset_timeout_secs: 5,
            ci_timeout_secs: 5,
            git_timeout_secs: 30,
            batch_enabled: false,
            batch_max_size: 1,
            use_merge_strategy: false,
            branch_regexp: Regex::new(".*").unwrap(),
            candidate_order: CandidateOrder::OldestCreatedFirst,
            bot_name: "marge-bot".to_string(),
        }
    }

    fn mr(iid: u64, sha: &str) -> MergeRequest {
        let mut by = BTreeSet::new();
        by.insert(alice());
        MergeRequest {
            id: iid,
            iid: MrIid(iid),
            project_id: ProjectId(1),
            source_project_id: ProjectId(1),
            source_branch: BranchName::new("feat/x").unwrap(),
            target_branch: BranchName::new("main").unwrap(),
            sha: Oid::new(sha.to_string()).unwrap(),
            title: "Fix the bug".to_string(),
            description: String::new(),
            assignees: BTreeSet::from([bot()]),
            author: User {
                id: UserId(2),
                name: "Bob".to_string(),
                username: "bob".to_string(),
                email: None,
            },
            approvals: Approvals { by, required: 1 },
            state: MrState::Opened,
            work_in_progress: false,
            web_url: "https://gitlab.example.com/group/project/-/merge_requests/1".to_string(),
            updated_at: chrono::DateTime::from_timestamp(0, 0).unwrap(),
            has_unresolved_discussions: false,
        }
    }

    fn worker(forge: Arc<MockForge>, git: FakeWorktree, clock: Arc<FakeClock>) -> ProjectWorker {
        ProjectWorker::new(
            forge,
            Box::new(git),
            clock,
            bot(),
            project(),
            BranchName::new("main").unwrap(),
            settings(),
        )
    }

    #[tokio::test]
    async fn happy_path_merges() {
        let forge = Arc::new(MockForge::new());
        let git = FakeWorktree::new();
        let main = BranchName::new("main").unwrap();
        let feature = BranchName::new("feat/x").unwrap();
        let main_tip = Oid::new("a".repeat(40)).unwrap();
        let source_tip = Oid::new("b".repeat(40)).unwrap();
        git.set_branch_tip(&main, main_tip.clone());
        git.set_branch_tip(&feature, source_tip.clone());

        // The rebase mint is deterministic from (branch, onto-tip) alone, so
        // we can compute ahead of time the sha the push will land, and seed
        // the forge's view of the MR as if it already reflects that push
        // (the real GitLab client observes this automatically; the mock
        // does not).
        let probe = FakeWorktree::new();
        probe.set_branch_tip(&feature, source_tip.clone());
        probe.set_branch_tip(&main, main_tip);
        let expected_tip = probe.rebase_onto(&feature, &main, &TrailerPlan::empty()).await.unwrap();

        let candidate = mr(42, expected_tip.as_str());
        forge.add_mr(candidate);

        let clock = Arc::new(FakeClock::at(chrono::DateTime::from_timestamp(0, 0).unwrap()));
        let mut w = worker(forge.clone(), git, clock);

        forge.set_pipelines_for_mr(
            ProjectId(1),
            MrIid(42),
            vec![crate::core::types::Pipeline {
                sha: expected_tip,
                git_ref: "feat/x".to_string(),
                status: PipelineStatus::Success,
                web_url: "https://gitlab.example.com/pipelines/1".to_string(),
            }],
        );

        let outcome = w.tick().await.unwrap();
        assert_eq!(outcome, IterationOutcome::Merged(vec![MrIid(42)]));
    }

    #[tokio::test]
    async fn ci_failure_unassigns_with_note() {
        let forge = Arc::new(MockForge::new());
        let git = FakeWorktree::new();
        let main = BranchName::new("main").unwrap();
        let feature = BranchName::new("feat/x").unwrap();
        let main_tip = Oid::new("a".repeat(40)).unwrap();
        let source_tip = Oid::new("b".repeat(40)).unwrap();
        git.set_branch_tip(&main, main_tip.clone());
        git.set_branch_tip(&feature, source_tip.clone());

        let probe = FakeWorktree::new();
        probe.set_branch_tip(&feature, source_tip.clone());
        probe.set_branch_tip(&main, main_tip);
        let expected_tip = probe.rebase_onto(&feature, &main, &TrailerPlan::empty()).await.unwrap();

        let candidate = mr(42, expected_tip.as_str());
        forge.add_mr(candidate);

        forge.set_pipelines_for_mr(
            ProjectId(1),
            MrIid(42),
            vec![crate::core::types::Pipeline {
                sha: expected_tip,
                git_ref: "feat/x".to_string(),
                status: PipelineStatus::Failed,
                web_url: "https://gitlab.example.com/pipelines/2".to_string(),
            }],
        );

        let clock = Arc::new(FakeClock::at(chrono::DateTime::from_timestamp(0, 0).unwrap()));
        let mut w = worker(forge.clone(), git, clock);

        let outcome = w.tick().await.unwrap();
        assert!(matches!(outcome, IterationOutcome::Unassigned(MrIid(42), _)));
        assert!(forge
            .calls()
            .iter()
            .any(|c| matches!(c, crate::forge::mock::Call::PostNote(_, _, _))));
    }

    #[tokio::test]
    async fn rebase_conflict_unassigns_without_push() {
        let forge = Arc::new(MockForge::new());
        let git = FakeWorktree::new();
        let main = BranchName::new("main").unwrap();
        let feature = BranchName::new("feat/x").unwrap();
        git.set_branch_tip(&main, Oid::new("a".repeat(40)).unwrap());
        git.set_branch_tip(&feature, Oid::new("b".repeat(40)).unwrap());
        git.force_conflict(&feature);

        let candidate = mr(42, &"b".repeat(40));
        forge.add_mr(candidate);

        let clock = Arc::new(FakeClock::at(chrono::DateTime::from_timestamp(0, 0).unwrap()));
        let mut w = worker(forge.clone(), git, clock);

        let outcome = w.tick().await.unwrap();
        assert!(matches!(outcome, IterationOutcome::Unassigned(MrIid(42), _)));
        assert_eq!(forge.calls().iter().filter(|c| matches!(c, crate::forge::mock::Call::AcceptMr(..))).count(), 0);
    }

    #[test]
    fn select_candidates_filters_unapproved() {
        let mut unapproved = mr(1, &"a".repeat(40));
        unapproved.approvals = Approvals::default();
        let approved = mr(2, &"b".repeat(40));

        let result = select_candidates(&[unapproved, approved.clone()], &project(), &bot(), &settings());
        assert_eq!(result, vec![approved]);
    }

    #[test]
    fn select_candidates_excludes_trivial_source_branch() {
        let mut trivial = mr(1, &"a".repeat(40));
        trivial.source_branch = trivial.target_branch.clone();

        let result = select_candidates(&[trivial], &project(), &bot(), &settings());
        assert!(result.is_empty());
    }
}
