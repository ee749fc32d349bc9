//! core::config::schema
//!
//! The on-disk TOML shape. Every field is optional here; [`super::Config`]
//! applies defaults and merges in environment variables and CLI flags on top.

use serde::{Deserialize, Serialize};

/// The field names here double as the set of recognised config-file keys;
/// see [`super::Config::load_file`] for how an unrecognised key is turned
/// into a logged warning rather than a hard parse error.
pub const KNOWN_KEYS: &[&str] = &[
    "gitlab_url",
    "auth_token_file",
    "ssh_key_file",
    "add_reviewers",
    "add_tested",
    "add_part_of",
    "impersonate_approvers",
    "approval_reset_timeout",
    "ci_timeout",
    "git_timeout",
    "embargo",
    "embargo_timezone",
    "project_regexp",
    "branch_regexp",
    "batch",
    "use_merge_strategy",
    "reference",
    "debug",
];

/// Raw contents of the TOML config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FileConfig {
    /// Base URL of the GitLab instance, e.g. `https://gitlab.example.com`.
    pub gitlab_url: Option<String>,

    /// Path to a file containing the private token. Never accepted as a
    /// bare CLI flag or inline env value, to keep it out of `ps` output
    /// and shell history.
    pub auth_token_file: Option<String>,

    /// Path to the SSH private key used for git push/fetch.
    pub ssh_key_file: Option<String>,

    pub add_reviewers: Option<bool>,
    pub add_tested: Option<bool>,
    pub add_part_of: Option<bool>,
    pub impersonate_approvers: Option<bool>,

    /// A humantime duration (`30s`, `2m`, `1h`) or a bare integer of seconds.
    pub approval_reset_timeout: Option<String>,
    /// A humantime duration (`30s`, `2m`, `1h`) or a bare integer of seconds.
    pub ci_timeout: Option<String>,
    /// A humantime duration (`30s`, `2m`, `1h`) or a bare integer of seconds.
    pub git_timeout: Option<String>,

    /// `Weekday HH:MM - Weekday HH:MM` windows, interpreted in `embargo_timezone`.
    pub embargo: Option<Vec<String>>,
    pub embargo_timezone: Option<String>,

    pub project_regexp: Option<String>,
    pub branch_regexp: Option<String>,

    pub batch: Option<bool>,
    pub use_merge_strategy: Option<bool>,

    /// Local reference repository path passed to clone.
    pub reference: Option<String>,

    pub debug: Option<bool>,
}
