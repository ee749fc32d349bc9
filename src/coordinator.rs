//! coordinator
//!
//! The Fleet Coordinator: discovers projects the bot is a member of,
//! groups each project's assigned MRs by target branch, and keeps one
//! [`ProjectWorker`] task running per (project, target-branch) pair that
//! actually holds assigned work. Projects the bot has lost access to have
//! their workers retired; newly discovered ones get a fresh worker.
//!
//! Shutdown is cooperative: a `watch` channel flips to `true` and every
//! worker notices it at its next suspension point (an idle sleep, an
//! embargo sleep, or the top of its loop) rather than mid state-transition.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use regex::Regex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::clock::Clock;
use crate::core::types::{BranchName, Project, ProjectId, User};
use crate::embargo::Calendar;
use crate::forge::Forge;
use crate::git::{GitError, GitOps};
use crate::worker::{IterationOutcome, ProjectWorker, WorkerSettings};

/// Opens a fresh [`GitOps`] worktree for one project/target-branch pair.
/// Kept as a trait object so the coordinator doesn't hardcode
/// [`crate::git::LibGit2Worktree`]'s disk-path conventions, and so tests can
/// substitute [`crate::git::fake::FakeWorktree`] construction.
pub trait WorktreeFactory: Send + Sync {
    fn open(&self, project: &Project, target_branch: &BranchName) -> Result<Box<dyn GitOps>, GitError>;
}

/// How often and how long the coordinator waits between actions.
#[derive(Clone)]
pub struct CoordinatorTiming {
    /// How often to re-list projects and re-group assigned MRs.
    pub discovery_interval: StdDuration,
    /// Sleep between ticks when a worker found nothing to do.
    pub idle_poll_interval: StdDuration,
    /// Sleep between ticks when a worker just acted (merged, restarted, aborted).
    pub busy_poll_interval: StdDuration,
}

/// One (project, target-branch) pair discovered to have assigned work.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct WorkerKey {
    project_id: ProjectId,
    target_branch: BranchName,
}

/// Discovers and supervises one worker per (project, target-branch) pair.
pub struct Coordinator {
    forge: Arc<dyn Forge>,
    worktrees: Arc<dyn WorktreeFactory>,
    clock: Arc<dyn Clock>,
    bot: User,
    project_regexp: Regex,
    embargo: Calendar,
    worker_settings: WorkerSettings,
    timing: CoordinatorTiming,
}

impl Coordinator {
    pub fn new(
        forge: Arc<dyn Forge>,
        worktrees: Arc<dyn WorktreeFactory>,
        clock: Arc<dyn Clock>,
        bot: User,
        project_regexp: Regex,
        embargo: Calendar,
        worker_settings: WorkerSettings,
        timing: CoordinatorTiming,
    ) -> Self {
        Self {
            forge,
            worktrees,
            clock,
            bot,
            project_regexp,
            embargo,
            worker_settings,
            timing,
        }
    }

    /// Run until `shutdown` carries `true`. Retired worker tasks are
    /// aborted immediately (the project is no longer accessible, so there
    /// is nothing for them to finish); on a real shutdown signal every
    /// surviving worker is given the chance to finish its current
    /// iteration before this returns.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut workers: HashMap<WorkerKey, JoinHandle<()>> = HashMap::new();

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.discover().await {
                Ok(discovered) => self.reconcile(&mut workers, discovered, &shutdown),
                Err(err) => tracing::warn!(error = %err, "project discovery failed, keeping existing workers"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.timing.discovery_interval) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        for (_, handle) in workers.drain() {
            let _ = handle.await;
        }
    }

    /// List projects the bot is a member of, filter by `project_regexp`,
    /// and group each project's currently-assigned MRs by target branch.
    async fn discover(&self) -> Result<Vec<(Project, BranchName)>, crate::forge::ForgeError> {
        let projects = self.forge.list_projects_for_member().await?;
        let mut targets = Vec::new();

        for project in projects {
            if !self.project_regexp.is_match(&project.path) {
                continue;
            }
            let assigned = self.forge.list_assigned_mrs(project.id).await?;
            let mut seen = std::collections::HashSet::new();
            for mr in assigned {
                if seen.insert(mr.target_branch.clone()) {
                    targets.push((project.clone(), mr.target_branch));
                }
            }
        }

        Ok(targets)
    }

    fn reconcile(
        &self,
        workers: &mut HashMap<WorkerKey, JoinHandle<()>>,
        discovered: Vec<(Project, BranchName)>,
        shutdown: &watch::Receiver<bool>,
    ) {
        let mut live = std::collections::HashSet::new();

        for (project, target_branch) in discovered {
            let key = WorkerKey {
                project_id: project.id,
                target_branch: target_branch.clone(),
            };
            live.insert(key.clone());

            if workers.contains_key(&key) {
                continue;
            }

            tracing::info!(project = %project.id, branch = %target_branch, "spawning worker");
            let handle = self.spawn_worker(project, target_branch, shutdown.clone());
            workers.insert(key, handle);
        }

        workers.retain(|key, handle| {
            if live.contains(key) {
                true
            } else {
                tracing::info!(project = %key.project_id, branch = %key.target_branch, "retiring worker");
                handle.abort();
                false
            }
        });
    }

    fn spawn_worker(
        &self,
        project: Project,
        target_branch: BranchName,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let forge = self.forge.clone();
        let worktrees = self.worktrees.clone();
        let clock = self.clock.clone();
        let bot = self.bot.clone();
        let settings = self.worker_settings.clone();
        let embargo = self.embargo.clone();
        let timing = self.timing.clone();

        tokio::spawn(async move {
            let git = match worktrees.open(&project, &target_branch) {
                Ok(git) => git,
                Err(err) => {
                    tracing::error!(project = %project.id, branch = %target_branch, error = %err, "failed to open worktree, worker will not run");
                    return;
                }
            };

            let mut worker = ProjectWorker::new(
                forge,
                git,
                clock.clone(),
                bot,
                project.clone(),
                target_branch.clone(),
                settings,
            );

            loop {
                if *shutdown.borrow() {
                    break;
                }

                let now = clock.now();
                if embargo.in_embargo(now) {
                    let wait = embargo.wait_until_clear(now).to_std().unwrap_or_default();
                    tracing::info!(project = %project.id, branch = %target_branch, wait_secs = wait.as_secs(), "embargo in effect");
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {}
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                break;
                            }
                        }
                    }
                    continue;
                }

                let sleep_for = match worker.tick().await {
                    Ok(IterationOutcome::Idle) => timing.idle_poll_interval,
                    Ok(_) => timing.busy_poll_interval,
                    Err(err) => {
                        tracing::error!(project = %project.id, branch = %target_branch, error = %err, "worker iteration failed");
                        timing.busy_poll_interval
                    }
                };

                tokio::select! {
                    _ = tokio::time::sleep(sleep_for) => {}
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }
}
