//! forge::traits
//!
//! The `Forge` trait: Marge's only point of contact with the GitLab API.
//!
//! # Design
//!
//! `Forge` is async because every operation is network I/O. Implementations
//! must be `Send + Sync` so a single `Arc<dyn Forge>` can be shared across
//! every project worker task.
//!
//! Workers never retry transient failures inside a `Forge` call; retry and
//! backoff live in the concrete client ([`super::gitlab::GitLabForge`]).
//! `ForgeError` only distinguishes failure *kinds* so callers can decide
//! what to do, not how many times it was already tried.
//!
//! # Example
//!
//! ```ignore
//! use marge::forge::Forge;
//! use marge::core::types::{MrIid, ProjectId};
//!
//! async fn poll_one(forge: &dyn Forge, project: ProjectId, mr: MrIid) -> Result<(), marge::forge::ForgeError> {
//!     let view = forge.get_mr(project, mr).await?;
//!     println!("{} is {:?}", view.title, view.state);
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use thiserror::Error;

use crate::core::types::{BranchName, MergeRequest, MrIid, Oid, Pipeline, Project, ProjectId, User};

/// Errors from forge operations.
#[derive(Debug, Clone, Error)]
pub enum ForgeError {
    /// The requested resource does not exist (HTTP 404).
    #[error("not found: {0}")]
    NotFound(String),

    /// The token is invalid, expired, or lacks the required scope (HTTP 401/403).
    #[error("unauthorised: {0}")]
    Unauthorised(String),

    /// The request conflicts with current server state, e.g. a stale SHA
    /// passed to accept-MR (HTTP 409).
    #[error("conflict: {0}")]
    Conflict(String),

    /// The server rejected the request as semantically invalid (HTTP 422),
    /// carrying the forge's own explanation.
    #[error("unprocessable: {reason}")]
    Unprocessable { reason: String },

    /// GitLab responded outside any case this client understands.
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// The request never reached the server, or no response came back
    /// within the configured timeout.
    #[error("network error: {0}")]
    NetworkError(String),

    /// The running GitLab version lacks a capability this operation needs.
    #[error("unsupported by this GitLab instance: {0}")]
    Unsupported(String),
}

impl ForgeError {
    /// Whether a retry with no change in state has any chance of succeeding.
    /// Used by [`super::gitlab::GitLabForge`]'s internal backoff, not by workers.
    pub fn is_transient(&self) -> bool {
        matches!(self, ForgeError::NetworkError(_) | ForgeError::ProtocolError(_))
    }
}

/// GitLab version-gated behavior the client has detected at startup.
///
/// Older self-managed GitLab instances are missing endpoints that newer
/// ones expose; workers consult this instead of hardcoding a version check.
#[derive(Debug, Clone, Copy, Default)]
pub struct CapabilitySet {
    /// `GET /projects/:id/merge_requests/:iid/pipelines` exists (GitLab >= 11.5).
    pub mr_pipelines_endpoint: bool,
    /// The project supports squash-on-merge.
    pub squash: bool,
    /// The forge reports a `locked` MR state (mid-merge on GitLab's side).
    pub locked_state: bool,
}

/// A note (comment) body to post to an MR's discussion.
pub struct Note<'a>(pub &'a str);

/// The `Forge` trait: every GitLab operation Marge performs.
#[async_trait]
pub trait Forge: Send + Sync {
    /// The capabilities detected for the connected GitLab instance.
    fn capabilities(&self) -> CapabilitySet;

    /// List projects where the authenticated user is a member, used to
    /// discover which projects the fleet coordinator should watch.
    async fn list_projects_for_member(&self) -> Result<Vec<Project>, ForgeError>;

    /// List merge requests assigned to the authenticated user in a project.
    async fn list_assigned_mrs(&self, project: ProjectId) -> Result<Vec<MergeRequest>, ForgeError>;

    /// Fetch the current state of one merge request.
    async fn get_mr(&self, project: ProjectId, mr: MrIid) -> Result<MergeRequest, ForgeError>;

    /// Fetch pipelines run against a specific MR, newest first.
    async fn get_pipelines_for_mr(
        &self,
        project: ProjectId,
        mr: MrIid,
    ) -> Result<Vec<Pipeline>, ForgeError>;

    /// Fetch pipelines run against a branch tip, newest first. Used when
    /// `capabilities().mr_pipelines_endpoint` is false.
    async fn get_pipelines_for_branch(
        &self,
        project: ProjectId,
        branch: &BranchName,
    ) -> Result<Vec<Pipeline>, ForgeError>;

    /// Resolve a GitLab username to a `User`, used to reconstruct `Reviewed-by`
    /// trailers for approvers when the MR view only carries ids.
    async fn fetch_user_by_username(&self, username: &str) -> Result<User, ForgeError>;

    /// The account `auth_token` authenticates as. Used at startup to learn
    /// the bot's own identity without a separate username flag.
    async fn current_user(&self) -> Result<User, ForgeError>;

    /// Accept (merge) an MR, instructing GitLab to fail the request unless
    /// the current MR `sha` still equals `expected_sha` (compare-and-swap
    /// against a stale view).
    async fn accept_mr(
        &self,
        project: ProjectId,
        mr: MrIid,
        expected_sha: &Oid,
    ) -> Result<(), ForgeError>;

    /// Approve an MR as the authenticated user.
    async fn approve_mr(&self, project: ProjectId, mr: MrIid) -> Result<(), ForgeError>;

    /// Withdraw the authenticated user's approval of an MR.
    async fn unapprove_mr(&self, project: ProjectId, mr: MrIid) -> Result<(), ForgeError>;

    /// Post a note (comment) to an MR's discussion.
    async fn post_note(&self, project: ProjectId, mr: MrIid, note: Note<'_>) -> Result<(), ForgeError>;

    /// Replace the MR's assignee list.
    async fn set_assignees(
        &self,
        project: ProjectId,
        mr: MrIid,
        assignees: &[crate::core::types::UserId],
    ) -> Result<(), ForgeError>;

    /// Clear all approvals on an MR, used after a rebase invalidates them
    /// and `impersonate_approvers` is not set.
    async fn reset_approvals(&self, project: ProjectId, mr: MrIid) -> Result<(), ForgeError>;
}
