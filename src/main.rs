//! Marge's entry point: resolve configuration, connect to the forge, and
//! hand control to the fleet coordinator until a shutdown signal arrives.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use regex::Regex;
use tokio::sync::watch;

use marge::cli::Cli;
use marge::clock::SystemClock;
use marge::core::config::Config;
use marge::coordinator::{Coordinator, CoordinatorTiming, WorktreeFactory};
use marge::embargo::Calendar;
use marge::error::AppError;
use marge::forge::gitlab::GitLabForge;
use marge::forge::Forge;
use marge::git::{GitError, GitOps, LibGit2Worktree};
use marge::worker::{CandidateOrder, WorkerSettings};

/// Opens one `LibGit2Worktree` clone per project, under `base_dir/<project-id>`.
/// Each target branch of a project shares the same clone: rebases against
/// different target branches do not conflict because each worker only ever
/// touches its own source branches.
struct DiskWorktreeFactory {
    base_dir: PathBuf,
    ssh_key_file: PathBuf,
    reference: Option<PathBuf>,
}

impl WorktreeFactory for DiskWorktreeFactory {
    fn open(
        &self,
        project: &marge::core::types::Project,
        _target_branch: &marge::core::types::BranchName,
    ) -> Result<Box<dyn GitOps>, GitError> {
        let repo_path = self.base_dir.join(project.id.0.to_string());
        let worktree = LibGit2Worktree::clone_or_open(
            repo_path,
            self.ssh_key_file.clone(),
            &project.ssh_url_to_repo,
            self.reference.as_deref(),
        )?;
        Ok(Box::new(worktree))
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("marge: {}", err);
            ExitCode::from(err.exit_code() as u8)
        }
    }
}

async fn run() -> Result<(), AppError> {
    let cli = Cli::parse_args();
    let config = Config::resolve(&cli)?;

    marge::logging::init(config.debug);
    tracing::info!(gitlab_url = %config.gitlab_url, "starting marge");

    let forge = GitLabForge::connect(config.gitlab_url.clone(), config.auth_token.expose())
        .await
        .map_err(|err| AppError::Auth(err.to_string()))?;

    if !forge.capabilities().mr_pipelines_endpoint && !forge.capabilities().locked_state {
        tracing::warn!("connected GitLab instance predates v10.5; falling back to branch-ref pipeline lookups");
    }

    let bot = forge
        .current_user()
        .await
        .map_err(|err| AppError::Auth(err.to_string()))?;

    let project_regexp = Regex::new(&config.project_regexp)
        .map_err(|err| AppError::Config(marge::core::config::ConfigError::InvalidValue {
            field: "project_regexp",
            message: err.to_string(),
        }))?;
    let branch_regexp = Regex::new(&config.branch_regexp)
        .map_err(|err| AppError::Config(marge::core::config::ConfigError::InvalidValue {
            field: "branch_regexp",
            message: err.to_string(),
        }))?;

    let embargo = Calendar::parse(&config.embargo_windows, &config.embargo_timezone)
        .map_err(|err| AppError::Config(marge::core::config::ConfigError::InvalidValue {
            field: "embargo",
            message: err.to_string(),
        }))?;

    let worktrees = Arc::new(DiskWorktreeFactory {
        base_dir: PathBuf::from("/var/lib/marge/worktrees"),
        ssh_key_file: config.ssh_key_file.clone(),
        reference: config.reference.clone().map(PathBuf::from),
    });

    let settings = WorkerSettings {
        add_reviewers: config.add_reviewers,
        add_tested: config.add_tested,
        add_part_of: config.add_part_of,
        impersonate_approvers: config.impersonate_approvers,
        approval_reset_timeout_secs: config.approval_reset_timeout_secs,
        ci_timeout_secs: config.ci_timeout_secs,
        git_timeout_secs: config.git_timeout_secs,
        batch_enabled: config.batch,
        batch_max_size: DEFAULT_BATCH_MAX_SIZE,
        use_merge_strategy: config.use_merge_strategy,
        branch_regexp,
        candidate_order: CandidateOrder::OldestCreatedFirst,
        bot_name: bot.username.clone(),
    };

    let timing = CoordinatorTiming {
        discovery_interval: std::time::Duration::from_secs(DISCOVERY_INTERVAL_SECS),
        idle_poll_interval: std::time::Duration::from_secs(IDLE_POLL_INTERVAL_SECS),
        busy_poll_interval: std::time::Duration::from_millis(BUSY_POLL_INTERVAL_MS),
    };

    let coordinator = Arc::new(Coordinator::new(
        Arc::new(forge),
        worktrees,
        Arc::new(SystemClock),
        bot,
        project_regexp,
        embargo,
        settings,
        timing,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(wait_for_shutdown_signal(shutdown_tx));

    coordinator.run(shutdown_rx).await;
    tracing::info!("marge shut down cleanly");
    Ok(())
}

const DEFAULT_BATCH_MAX_SIZE: usize = 5;
const DISCOVERY_INTERVAL_SECS: u64 = 5 * 60;
const IDLE_POLL_INTERVAL_SECS: u64 = 30;
const BUSY_POLL_INTERVAL_MS: u64 = 1_000;

#[cfg(unix)]
async fn wait_for_shutdown_signal(tx: watch::Sender<bool>) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

    tokio::select! {
        _ = sigint.recv() => tracing::info!("received SIGINT, shutting down"),
        _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
    }
    let _ = tx.send(true);
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal(tx: watch::Sender<bool>) {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("received ctrl-c, shutting down");
    let _ = tx.send(true);
}
