//! End-to-end scenarios for the project worker state machine, driven
//! entirely through the public test doubles (`MockForge`, `FakeWorktree`,
//! `FakeClock`) with no network or real git repository involved.

use std::collections::BTreeSet;
use std::sync::Arc;

use marge::clock::FakeClock;
use marge::core::types::{
    Approvals, BranchName, MergeMethod, MergeRequest, MrIid, MrState, Oid, Pipeline,
    PipelineStatus, Project, ProjectId, User, UserId,
};
use marge::embargo::Calendar;
use marge::forge::mock::{Call, MockForge};
use marge::git::fake::FakeWorktree;
use marge::trailer::TrailerPlan;
use marge::worker::{CandidateOrder, IterationOutcome, ProjectWorker, WorkerSettings};

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

fn bob() -> User {
    User {
        id: UserId(2),
        name: "Bob".to_string(),
        username: "bob".to_string(),
        email: None,
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
        branch_regexp: regex::Regex::new(".*").unwrap(),
        candidate_order: CandidateOrder::OldestCreatedFirst,
        bot_name: "marge-bot".to_string(),
    }
}

fn candidate(iid: u64, branch: &str, target: &str, sha: &str) -> MergeRequest {
    let mut by = BTreeSet::new();
    by.insert(alice());
    MergeRequest {
        id: iid,
        iid: MrIid(iid),
        project_id: ProjectId(1),
        source_project_id: ProjectId(1),
        source_branch: BranchName::new(branch).unwrap(),
        target_branch: BranchName::new(target).unwrap(),
        sha: Oid::new(sha.to_string()).unwrap(),
        title: format!("Fix bug #{}", iid),
        description: String::new(),
        assignees: BTreeSet::from([bot()]),
        author: bob(),
        approvals: Approvals { by, required: 1 },
        state: MrState::Opened,
        work_in_progress: false,
        web_url: format!("https://gitlab.example.com/group/project/-/merge_requests/{}", iid),
        updated_at: chrono::DateTime::from_timestamp(0, 0).unwrap(),
        has_unresolved_discussions: false,
    }
}

fn worker(forge: Arc<MockForge>, git: FakeWorktree, settings: WorkerSettings) -> ProjectWorker {
    ProjectWorker::new(
        forge,
        Box::new(git),
        Arc::new(FakeClock::at(chrono::DateTime::from_timestamp(0, 0).unwrap())),
        bot(),
        project(),
        BranchName::new("main").unwrap(),
        settings,
    )
}

#[tokio::test]
async fn happy_path_single_mr_merges() {
    let forge = Arc::new(MockForge::new());
    let git = FakeWorktree::new();
    let main = BranchName::new("main").unwrap();
    let feature = BranchName::new("feat/x").unwrap();
    let main_tip = Oid::new("a".repeat(40)).unwrap();
    let source_tip = Oid::new("b".repeat(40)).unwrap();
    git.set_branch_tip(&main, main_tip.clone());
    git.set_branch_tip(&feature, source_tip.clone());

    let probe = FakeWorktree::new();
    probe.set_branch_tip(&feature, source_tip);
    probe.set_branch_tip(&main, main_tip);
    let expected_tip = probe.rebase_onto(&feature, &main, &TrailerPlan::empty()).await.unwrap();

    forge.add_mr(candidate(1, "feat/x", "main", expected_tip.as_str()));
    forge.set_pipelines_for_mr(
        ProjectId(1),
        MrIid(1),
        vec![Pipeline {
            sha: expected_tip,
            git_ref: "feat/x".to_string(),
            status: PipelineStatus::Success,
            web_url: "https://gitlab.example.com/pipelines/1".to_string(),
        }],
    );

    let mut w = worker(forge.clone(), git, settings());
    let outcome = w.tick().await.unwrap();
    assert_eq!(outcome, IterationOutcome::Merged(vec![MrIid(1)]));
    assert!(forge.calls().iter().any(|c| matches!(c, Call::AcceptMr(_, MrIid(1), _))));
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
    probe.set_branch_tip(&feature, source_tip);
    probe.set_branch_tip(&main, main_tip);
    let expected_tip = probe.rebase_onto(&feature, &main, &TrailerPlan::empty()).await.unwrap();

    forge.add_mr(candidate(1, "feat/x", "main", expected_tip.as_str()));
    forge.set_pipelines_for_mr(
        ProjectId(1),
        MrIid(1),
        vec![Pipeline {
            sha: expected_tip,
            git_ref: "feat/x".to_string(),
            status: PipelineStatus::Failed,
            web_url: "https://gitlab.example.com/pipelines/2".to_string(),
        }],
    );

    let mut w = worker(forge.clone(), git, settings());
    let outcome = w.tick().await.unwrap();
    assert!(matches!(outcome, IterationOutcome::Unassigned(MrIid(1), _)));
    assert!(forge.calls().iter().any(|c| matches!(c, Call::PostNote(_, MrIid(1), _))));
    assert!(forge.calls().iter().any(|c| matches!(c, Call::SetAssignees(_, MrIid(1), _))));
}

#[tokio::test]
async fn rebase_conflict_unassigns_without_pushing() {
    let forge = Arc::new(MockForge::new());
    let git = FakeWorktree::new();
    let main = BranchName::new("main").unwrap();
    let feature = BranchName::new("feat/x").unwrap();
    git.set_branch_tip(&main, Oid::new("a".repeat(40)).unwrap());
    git.set_branch_tip(&feature, Oid::new("b".repeat(40)).unwrap());
    git.force_conflict(&feature);

    forge.add_mr(candidate(1, "feat/x", "main", &"b".repeat(40)));

    let mut w = worker(forge.clone(), git, settings());
    let outcome = w.tick().await.unwrap();
    assert!(matches!(outcome, IterationOutcome::Unassigned(MrIid(1), _)));
    assert!(forge.calls().iter().all(|c| !matches!(c, Call::AcceptMr(..))));
}

#[tokio::test]
async fn target_moved_during_push_triggers_restart() {
    let forge = Arc::new(MockForge::new());
    let git = FakeWorktree::new();
    let main = BranchName::new("main").unwrap();
    let feature = BranchName::new("feat/x").unwrap();
    git.set_branch_tip(&main, Oid::new("a".repeat(40)).unwrap());
    git.set_branch_tip(&feature, Oid::new("b".repeat(40)).unwrap());
    // Simulates another push landing on the source branch between our
    // rebase and our push: the lease we computed no longer matches.
    git.force_reject(&feature);

    forge.add_mr(candidate(1, "feat/x", "main", &"b".repeat(40)));

    let mut w = worker(forge.clone(), git, settings());
    let outcome = w.tick().await.unwrap();
    assert_eq!(outcome, IterationOutcome::Restarted);
    assert!(forge.calls().iter().all(|c| !matches!(c, Call::AcceptMr(..))));
}

#[tokio::test]
async fn batch_of_two_merges_in_order_surviving_a_conflict_retry() {
    let forge = Arc::new(MockForge::new());
    let git = FakeWorktree::new();
    let main = BranchName::new("main").unwrap();
    let feature1 = BranchName::new("feat/1").unwrap();
    let feature2 = BranchName::new("feat/2").unwrap();
    let main_tip = Oid::new("a".repeat(40)).unwrap();
    git.set_branch_tip(&main, main_tip.clone());
    git.set_branch_tip(&feature1, Oid::new("b".repeat(40)).unwrap());
    git.set_branch_tip(&feature2, Oid::new("c".repeat(40)).unwrap());

    // Precompute the chain: member 2 rebases onto member 1's own branch,
    // not onto `main`, so its minted tip depends on member 1's post-rebase
    // tip landing first.
    let probe = FakeWorktree::new();
    probe.set_branch_tip(&feature1, Oid::new("b".repeat(40)).unwrap());
    probe.set_branch_tip(&feature2, Oid::new("c".repeat(40)).unwrap());
    probe.set_branch_tip(&main, main_tip);
    let tip1 = probe.rebase_onto(&feature1, &main, &TrailerPlan::empty()).await.unwrap();
    let tip2 = probe.rebase_onto(&feature2, &feature1, &TrailerPlan::empty()).await.unwrap();

    forge.add_mr(candidate(1, "feat/1", "main", tip1.as_str()));
    forge.add_mr(candidate(2, "feat/2", "main", tip2.as_str()));
    forge.set_pipelines_for_mr(
        ProjectId(1),
        MrIid(2),
        vec![Pipeline {
            sha: tip2.clone(),
            git_ref: "feat/2".to_string(),
            status: PipelineStatus::Success,
            web_url: "https://gitlab.example.com/pipelines/3".to_string(),
        }],
    );
    // The first finalise attempt for MR 1 looks like the target moved
    // underneath it; the worker retries within its attempt budget and
    // the second attempt succeeds.
    forge.force_accept_conflict(ProjectId(1), MrIid(1));

    let mut batch_settings = settings();
    batch_settings.batch_enabled = true;
    batch_settings.batch_max_size = 2;

    let mut w = worker(forge.clone(), git, batch_settings);
    let outcome = w.tick().await.unwrap();
    assert_eq!(outcome, IterationOutcome::Merged(vec![MrIid(1), MrIid(2)]));

    let accepted = forge.calls().iter().filter(|c| matches!(c, Call::AcceptMr(..))).count();
    assert!(accepted >= 2);
}

#[tokio::test]
async fn embargo_window_blocks_the_current_moment() {
    let now = chrono::DateTime::from_timestamp(0, 0).unwrap(); // Thursday 1970-01-01 00:00 UTC
    let calendar = Calendar::parse(
        &["Thu 00:00 - Thu 23:59".to_string()],
        "UTC",
    )
    .unwrap();

    assert!(calendar.in_embargo(now));
    let wait = calendar.wait_until_clear(now);
    assert!(wait.num_minutes() > 0);
}
