//! error
//!
//! The top-level error type and exit code mapping.
//!
//! Component errors ([`crate::core::config::ConfigError`],
//! [`crate::forge::ForgeError`], [`crate::git::GitError`]) stay typed and
//! local: the [`crate::worker::ProjectWorker`] is the sole arbiter of
//! whether one of them is transient (retry next poll) or terminal (skip
//! this MR, post a note, move on). `AppError` only wraps the failures that
//! are fatal *before* the fleet coordinator ever starts polling.

use thiserror::Error;

use crate::core::config::ConfigError;

/// Fatal startup failures, each mapped to a distinct process exit code.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration could not be resolved (missing or invalid value,
    /// unreadable file). Exit code 1.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The GitLab token was rejected, or the SSH key was refused by the
    /// remote, before any worker could start. Exit code 2.
    #[error("authentication error: {0}")]
    Auth(String),

    /// The connected GitLab instance is missing a capability Marge cannot
    /// run without (e.g. no merge requests API at all). Exit code 3.
    #[error("forge incompatible: {0}")]
    Incompatible(String),
}

impl AppError {
    /// The process exit code this error should produce.
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::Config(_) => 1,
            AppError::Auth(_) => 2,
            AppError::Incompatible(_) => 3,
        }
    }
}
