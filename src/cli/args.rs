//! cli::args
//!
//! Command-line argument definitions.
//!
//! Marge has no subcommands: every invocation starts the fleet coordinator
//! and runs until a shutdown signal arrives. All configuration is either a
//! flag here, an `MARGE_*` environment variable, or a key in the TOML file
//! pointed to by `--config`; see [`crate::core::config`] for precedence.

use std::path::PathBuf;

use clap::Parser;

/// Autonomous serialising merge-bot for a GitLab-style forge.
#[derive(Parser, Debug, Clone)]
#[command(name = "marge")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to a TOML config file. Defaults to `$MARGE_CONFIG` if set.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Base URL of the GitLab instance.
    #[arg(long, env = "MARGE_GITLAB_URL")]
    pub gitlab_url: Option<String>,

    /// Path to a file containing the GitLab private token.
    #[arg(long, env = "MARGE_AUTH_TOKEN_FILE")]
    pub auth_token_file: Option<String>,

    /// Path to the SSH private key used for git push/fetch.
    #[arg(long, env = "MARGE_SSH_KEY_FILE")]
    pub ssh_key_file: Option<String>,

    /// Append a `Reviewed-by` trailer for each approver to the merge commit.
    #[arg(long, env = "MARGE_ADD_REVIEWERS")]
    pub add_reviewers: bool,

    /// Append a `Tested-by` trailer naming the passing pipeline.
    #[arg(long, env = "MARGE_ADD_TESTED")]
    pub add_tested: bool,

    /// Append a `Part-of` trailer referencing the originating MR.
    #[arg(long, env = "MARGE_ADD_PART_OF")]
    pub add_part_of: bool,

    /// Treat the bot's own approval as standing in for existing approvers
    /// when reapproving after a rebase.
    #[arg(long, env = "MARGE_IMPERSONATE_APPROVERS")]
    pub impersonate_approvers: bool,

    /// How long to wait for approvals to reappear after a reset-inducing
    /// push, e.g. `30s`, `2m`. A bare integer is also accepted as seconds.
    #[arg(long, env = "MARGE_APPROVAL_RESET_TIMEOUT")]
    pub approval_reset_timeout: Option<String>,

    /// How long to wait for a pipeline to reach a terminal status, e.g.
    /// `15m`, `1h`. A bare integer is also accepted as seconds.
    #[arg(long, env = "MARGE_CI_TIMEOUT")]
    pub ci_timeout: Option<String>,

    /// How long to wait for a single git operation (fetch, rebase, push),
    /// e.g. `2m`. A bare integer is also accepted as seconds.
    #[arg(long, env = "MARGE_GIT_TIMEOUT")]
    pub git_timeout: Option<String>,

    /// An embargo window, `Weekday HH:MM - Weekday HH:MM`. Repeatable.
    /// Multiple windows via the environment variable are `;`-separated.
    #[arg(long, env = "MARGE_EMBARGO", value_delimiter = ';')]
    pub embargo: Vec<String>,

    /// Named timezone the embargo windows are interpreted in.
    #[arg(long, env = "MARGE_EMBARGO_TIMEZONE")]
    pub embargo_timezone: Option<String>,

    /// Only operate on projects whose path matches this regexp.
    #[arg(long, env = "MARGE_PROJECT_REGEXP")]
    pub project_regexp: Option<String>,

    /// Only operate on MRs whose target branch matches this regexp.
    #[arg(long, env = "MARGE_BRANCH_REGEXP")]
    pub branch_regexp: Option<String>,

    /// Land assigned MRs targeting the same branch together as a batch.
    #[arg(long, env = "MARGE_BATCH")]
    pub batch: bool,

    /// Experimental: use the project's configured merge method's merge
    /// commit directly instead of Marge's own rebase-and-fast-forward path.
    #[arg(long, env = "MARGE_USE_MERGE_STRATEGY")]
    pub use_merge_strategy: bool,

    /// Local reference repository path passed to clone, to avoid
    /// re-fetching history the bot already has a copy of on disk.
    #[arg(long, env = "MARGE_REFERENCE")]
    pub reference: Option<String>,

    /// Enable debug-level logging.
    #[arg(long, env = "MARGE_DEBUG")]
    pub debug: bool,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Parser::parse()
    }
}
