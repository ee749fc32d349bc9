//! core::config
//!
//! Configuration schema and precedence-resolved loading.
//!
//! # Precedence
//!
//! Configuration values are resolved in this order (later overrides earlier):
//! 1. Default values
//! 2. TOML config file (`--config`, default search path)
//! 3. Environment variables (`MARGE_*`)
//! 4. CLI flags
//!
//! Only the auth token and SSH key are read from disk; every other secret
//! never touches an environment variable or argv, to keep it out of `ps`
//! output, shell history, and crash dumps.
//!
//! # Example
//!
//! ```no_run
//! use marge::cli::Cli;
//! use marge::core::config::Config;
//! use clap::Parser;
//!
//! let cli = Cli::parse();
//! let config = Config::resolve(&cli).unwrap();
//! println!("gitlab: {}", config.gitlab_url);
//! ```

pub mod schema;

pub use schema::FileConfig;

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::cli::Cli;

/// Errors from configuration resolution. Every variant here is fatal:
/// the process cannot proceed without a valid configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("missing required configuration value: {0}")]
    MissingRequired(&'static str),

    #[error("invalid configuration value for {field}: {message}")]
    InvalidValue { field: &'static str, message: String },
}

/// A secret value that never prints its contents via `Debug` or `Display`.
/// Wraps the GitLab private token read from `auth_token_file`.
#[derive(Clone)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: String) -> Self {
        Self(value)
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(REDACTED)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("REDACTED")
    }
}

/// Fully resolved configuration. Every field here has had defaults, file,
/// env and CLI layers merged; nothing downstream needs to know about
/// precedence again.
#[derive(Debug, Clone)]
pub struct Config {
    pub gitlab_url: String,
    pub auth_token: Secret,
    pub ssh_key_file: PathBuf,

    pub add_reviewers: bool,
    pub add_tested: bool,
    pub add_part_of: bool,
    pub impersonate_approvers: bool,

    pub approval_reset_timeout_secs: u64,
    pub ci_timeout_secs: u64,
    pub git_timeout_secs: u64,

    pub embargo_windows: Vec<String>,
    pub embargo_timezone: String,

    pub project_regexp: String,
    pub branch_regexp: String,

    pub batch: bool,
    pub use_merge_strategy: bool,

    pub reference: Option<String>,

    pub debug: bool,
}

impl Config {
    const DEFAULT_APPROVAL_RESET_TIMEOUT_SECS: u64 = 30;
    const DEFAULT_CI_TIMEOUT_SECS: u64 = 15 * 60;
    const DEFAULT_GIT_TIMEOUT_SECS: u64 = 2 * 60;
    const DEFAULT_EMBARGO_TIMEZONE: &'static str = "UTC";
    const DEFAULT_PROJECT_REGEXP: &'static str = ".*";
    const DEFAULT_BRANCH_REGEXP: &'static str = ".*";

    /// Resolve the final configuration from the CLI invocation, applying
    /// the file, env and CLI layers over the defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the config file cannot be read or parsed,
    /// or if a required value (GitLab URL, token file, SSH key file) is
    /// missing after all layers are applied.
    pub fn resolve(cli: &Cli) -> Result<Config, ConfigError> {
        let file = Self::load_file(cli.config.as_deref())?;

        let gitlab_url = cli
            .gitlab_url
            .clone()
            .or_else(|| std::env::var("MARGE_GITLAB_URL").ok())
            .or(file.gitlab_url)
            .ok_or(ConfigError::MissingRequired("gitlab_url"))?;

        let auth_token_file = cli
            .auth_token_file
            .clone()
            .or_else(|| std::env::var("MARGE_AUTH_TOKEN_FILE").ok())
            .or(file.auth_token_file)
            .ok_or(ConfigError::MissingRequired("auth_token_file"))?;
        let auth_token = Self::read_secret_file(Path::new(&auth_token_file))?;

        let ssh_key_file = cli
            .ssh_key_file
            .clone()
            .or_else(|| std::env::var("MARGE_SSH_KEY_FILE").ok())
            .or(file.ssh_key_file)
            .ok_or(ConfigError::MissingRequired("ssh_key_file"))?;
        let ssh_key_file = PathBuf::from(ssh_key_file);
        if !ssh_key_file.exists() {
            return Err(ConfigError::InvalidValue {
                field: "ssh_key_file",
                message: format!("{} does not exist", ssh_key_file.display()),
            });
        }

        Ok(Config {
            gitlab_url,
            auth_token: Secret::new(auth_token),
            ssh_key_file,
            add_reviewers: cli.add_reviewers || file.add_reviewers.unwrap_or(false),
            add_tested: cli.add_tested || file.add_tested.unwrap_or(false),
            add_part_of: cli.add_part_of || file.add_part_of.unwrap_or(false),
            impersonate_approvers: cli.impersonate_approvers
                || file.impersonate_approvers.unwrap_or(false),
            approval_reset_timeout_secs: Self::parse_duration_secs(
                "approval_reset_timeout",
                cli.approval_reset_timeout.as_deref().or(file.approval_reset_timeout.as_deref()),
            )?
            .unwrap_or(Self::DEFAULT_APPROVAL_RESET_TIMEOUT_SECS),
            ci_timeout_secs: Self::parse_duration_secs(
                "ci_timeout",
                cli.ci_timeout.as_deref().or(file.ci_timeout.as_deref()),
            )?
            .unwrap_or(Self::DEFAULT_CI_TIMEOUT_SECS),
            git_timeout_secs: Self::parse_duration_secs(
                "git_timeout",
                cli.git_timeout.as_deref().or(file.git_timeout.as_deref()),
            )?
            .unwrap_or(Self::DEFAULT_GIT_TIMEOUT_SECS),
            embargo_windows: if !cli.embargo.is_empty() {
                cli.embargo.clone()
            } else {
                file.embargo.unwrap_or_default()
            },
            embargo_timezone: cli
                .embargo_timezone
                .clone()
                .or(file.embargo_timezone)
                .unwrap_or_else(|| Self::DEFAULT_EMBARGO_TIMEZONE.to_string()),
            project_regexp: cli
                .project_regexp
                .clone()
                .or(file.project_regexp)
                .unwrap_or_else(|| Self::DEFAULT_PROJECT_REGEXP.to_string()),
            branch_regexp: cli
                .branch_regexp
                .clone()
                .or(file.branch_regexp)
                .unwrap_or_else(|| Self::DEFAULT_BRANCH_REGEXP.to_string()),
            batch: cli.batch || file.batch.unwrap_or(false),
            use_merge_strategy: cli.use_merge_strategy || file.use_merge_strategy.unwrap_or(false),
            reference: cli.reference.clone().or(file.reference),
            debug: cli.debug || file.debug.unwrap_or(false),
        })
    }

    /// Parse a duration value that is either a bare integer of seconds or a
    /// humantime string (`30s`, `2m`, `1h`). Returns `Ok(None)` if `raw` is
    /// `None`, so the caller's `unwrap_or(default)` still applies.
    fn parse_duration_secs(field: &'static str, raw: Option<&str>) -> Result<Option<u64>, ConfigError> {
        let Some(raw) = raw else { return Ok(None) };
        if let Ok(secs) = raw.parse::<u64>() {
            return Ok(Some(secs));
        }
        humantime::parse_duration(raw)
            .map(|d| Some(d.as_secs()))
            .map_err(|e| ConfigError::InvalidValue {
                field,
                message: format!("'{}' is not a valid duration: {}", raw, e),
            })
    }

    fn load_file(explicit_path: Option<&Path>) -> Result<FileConfig, ConfigError> {
        let path = match explicit_path {
            Some(p) => Some(p.to_path_buf()),
            None => std::env::var("MARGE_CONFIG").ok().map(PathBuf::from),
        };

        let path = match path {
            Some(p) => p,
            None => return Ok(FileConfig::default()),
        };

        if !path.exists() {
            if explicit_path.is_some() {
                return Err(ConfigError::ReadError {
                    path,
                    source: std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        "config file not found",
                    ),
                });
            }
            return Ok(FileConfig::default());
        }

        let contents = fs::read_to_string(&path).map_err(|e| ConfigError::ReadError {
            path: path.clone(),
            source: e,
        })?;

        let table: toml::Table = toml::from_str(&contents).map_err(|e| ConfigError::ParseError {
            path: path.clone(),
            message: e.to_string(),
        })?;
        for key in table.keys() {
            if !schema::KNOWN_KEYS.contains(&key.as_str()) {
                tracing::warn!(key = %key, path = %path.display(), "unrecognised config key, ignoring");
            }
        }

        FileConfig::deserialize(toml::Value::Table(table)).map_err(|e| ConfigError::ParseError {
            path,
            message: e.to_string(),
        })
    }

    fn read_secret_file(path: &Path) -> Result<String, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;
        let trimmed = contents.trim();
        if trimmed.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "auth_token_file",
                message: format!("{} is empty", path.display()),
            });
        }
        Ok(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn minimal_cli(token_path: &Path, key_path: &Path) -> Cli {
        Cli {
            gitlab_url: Some("https://gitlab.example.com".to_string()),
            auth_token_file: Some(token_path.to_str().unwrap().to_string()),
            ssh_key_file: Some(key_path.to_str().unwrap().to_string()),
            config: None,
            add_reviewers: false,
            add_tested: false,
            add_part_of: false,
            impersonate_approvers: false,
            approval_reset_timeout: None,
            ci_timeout: None,
            git_timeout: None,
            embargo: vec![],
            embargo_timezone: None,
            project_regexp: None,
            branch_regexp: None,
            batch: false,
            use_merge_strategy: false,
            reference: None,
            debug: false,
        }
    }

    #[test]
    fn resolves_with_required_fields_from_cli() {
        let mut token_file = NamedTempFile::new().unwrap();
        write!(token_file, "glpat-abc123").unwrap();
        let key_file = NamedTempFile::new().unwrap();

        let cli = minimal_cli(token_file.path(), key_file.path());
        let config = Config::resolve(&cli).unwrap();

        assert_eq!(config.gitlab_url, "https://gitlab.example.com");
        assert_eq!(config.auth_token.expose(), "glpat-abc123");
        assert_eq!(config.ci_timeout_secs, Config::DEFAULT_CI_TIMEOUT_SECS);
    }

    #[test]
    fn missing_gitlab_url_is_fatal() {
        let token_file = NamedTempFile::new().unwrap();
        let key_file = NamedTempFile::new().unwrap();
        let mut cli = minimal_cli(token_file.path(), key_file.path());
        cli.gitlab_url = None;

        let result = Config::resolve(&cli);
        assert!(matches!(result, Err(ConfigError::MissingRequired("gitlab_url"))));
    }

    #[test]
    fn missing_ssh_key_file_on_disk_is_fatal() {
        let token_file = NamedTempFile::new().unwrap();
        let mut cli = minimal_cli(token_file.path(), Path::new("/nonexistent/key"));
        cli.ssh_key_file = Some("/nonexistent/key".to_string());

        let result = Config::resolve(&cli);
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { field: "ssh_key_file", .. })
        ));
    }

    #[test]
    fn secret_debug_is_redacted() {
        let secret = Secret::new("glpat-abc123".to_string());
        assert_eq!(format!("{:?}", secret), "Secret(REDACTED)");
        assert_eq!(format!("{}", secret), "REDACTED");
    }

    #[test]
    fn cli_overrides_file() {
        let mut token_file = NamedTempFile::new().unwrap();
        write!(token_file, "glpat-abc123").unwrap();
        let key_file = NamedTempFile::new().unwrap();

        let mut config_file = NamedTempFile::new().unwrap();
        writeln!(config_file, "gitlab_url = \"https://file.example.com\"").unwrap();
        writeln!(config_file, "batch = false").unwrap();

        let mut cli = minimal_cli(token_file.path(), key_file.path());
        cli.config = Some(config_file.path().to_path_buf());
        cli.batch = true;

        let config = Config::resolve(&cli).unwrap();
        assert_eq!(config.gitlab_url, "https://gitlab.example.com");
        assert!(config.batch);
    }
}
