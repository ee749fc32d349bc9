//! core::types
//!
//! Strong types for the forge/git domain model Marge operates on.
//!
//! # Types
//!
//! - [`BranchName`] - Validated Git branch name
//! - [`Oid`] - Git object identifier (SHA)
//! - [`ProjectId`] / [`UserId`] / [`MrIid`] - Typed forge identifiers
//! - [`Project`], [`User`], [`MergeRequest`], [`Pipeline`] - Forge domain snapshots
//! - [`BatchPlan`] - An ordered set of MR ids to land as a unit
//!
//! # Validation
//!
//! `BranchName` and `Oid` enforce validity at construction time so invalid
//! values cannot be represented downstream in the Git Worktree or Forge Client.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from type validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid branch name: {0}")]
    InvalidBranchName(String),

    #[error("invalid object id: {0}")]
    InvalidOid(String),
}

/// A validated Git branch name.
///
/// Branch names must conform to Git's refname rules (see `git check-ref-format`):
/// cannot be empty, cannot start with `.` or `-`, cannot end with `.lock` or `/`,
/// cannot contain `..`, `@{`, `//`, whitespace, or ASCII control characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BranchName(String);

impl BranchName {
    /// Create a new validated branch name.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidBranchName` if the name violates Git's refname rules.
    pub fn new(name: impl Into<String>) -> Result<Self, TypeError> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    fn validate(name: &str) -> Result<(), TypeError> {
        if name.is_empty() {
            return Err(TypeError::InvalidBranchName("cannot be empty".into()));
        }
        if name == "@" {
            return Err(TypeError::InvalidBranchName("cannot be '@'".into()));
        }
        if name.starts_with('.') || name.starts_with('-') {
            return Err(TypeError::InvalidBranchName(
                "cannot start with '.' or '-'".into(),
            ));
        }
        if name.ends_with(".lock") || name.ends_with('/') {
            return Err(TypeError::InvalidBranchName(
                "cannot end with '.lock' or '/'".into(),
            ));
        }
        if name.contains("..") || name.contains("@{") || name.contains("//") {
            return Err(TypeError::InvalidBranchName(
                "cannot contain '..', '@{' or '//'".into(),
            ));
        }
        if name.chars().any(|c| {
            c.is_ascii_control() || matches!(c, ' ' | '~' | '^' | ':' | '\\' | '?' | '*' | '[')
        }) {
            return Err(TypeError::InvalidBranchName(
                "contains a disallowed character".into(),
            ));
        }
        Ok(())
    }

    /// Whether this branch name is identical to `other` — used by the
    /// "trivial source branch" guard (source == target, including `master`).
    pub fn is_same_as(&self, other: &BranchName) -> bool {
        self.0 == other.0
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BranchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for BranchName {
    type Error = TypeError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<BranchName> for String {
    fn from(value: BranchName) -> Self {
        value.0
    }
}

/// A validated Git object id (commit sha).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Oid(String);

impl Oid {
    /// Create a new validated object id. Normalized to lowercase.
    pub fn new(oid: impl Into<String>) -> Result<Self, TypeError> {
        let oid = oid.into().to_ascii_lowercase();
        Self::validate(&oid)?;
        Ok(Self(oid))
    }

    fn validate(oid: &str) -> Result<(), TypeError> {
        if oid.len() != 40 && oid.len() != 64 {
            return Err(TypeError::InvalidOid(format!(
                "expected 40 or 64 hex characters, got {}",
                oid.len()
            )));
        }
        if !oid.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(TypeError::InvalidOid("must be hexadecimal".into()));
        }
        Ok(())
    }

    /// Abbreviated form: the first `len` characters.
    pub fn short(&self, len: usize) -> &str {
        let end = len.min(self.0.len());
        &self.0[..end]
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Oid {
    type Error = TypeError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Oid> for String {
    fn from(value: Oid) -> Self {
        value.0
    }
}

/// A forge project (repository) id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProjectId(pub u64);

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A forge user id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A merge request's project-scoped "internal id" (`iid` in GitLab parlance),
/// distinct from the globally unique `id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MrIid(pub u64);

impl fmt::Display for MrIid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "!{}", self.0)
    }
}

/// How a project merges accepted MRs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MergeMethod {
    /// Create a merge commit.
    Merge,
    /// Rebase then create a merge commit (GitLab's "rebase-merge").
    RebaseMerge,
    /// Fast-forward only; no merge commit.
    FfOnly,
    /// Rebase then fast-forward; no merge commit, linear history enforced.
    SemiLinear,
}

impl fmt::Display for MergeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MergeMethod::Merge => "merge",
            MergeMethod::RebaseMerge => "rebase-merge",
            MergeMethod::FfOnly => "ff-only",
            MergeMethod::SemiLinear => "semi-linear",
        };
        f.write_str(s)
    }
}

impl MergeMethod {
    /// Whether this method rewrites history (rebase) rather than preserving
    /// the source branch's commits behind a merge commit.
    pub fn is_rebase(&self) -> bool {
        matches!(self, MergeMethod::RebaseMerge | MergeMethod::SemiLinear)
    }

    /// Whether this method forbids merge commits (fast-forward required).
    pub fn is_ff_only(&self) -> bool {
        matches!(self, MergeMethod::FfOnly | MergeMethod::SemiLinear)
    }
}

/// A forge user.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub username: String,
    /// Only present with forge-admin credentials.
    pub email: Option<String>,
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.username)
    }
}

/// A forge project (repository), immutable within one worker iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub path: String,
    pub merge_method: MergeMethod,
    pub approvals_required: u32,
    pub reset_approvals_on_push: bool,
    /// SSH remote URL the Git Worktree clones from, e.g.
    /// `git@gitlab.example.com:group/project.git`.
    pub ssh_url_to_repo: String,
}

/// The set of approvals recorded against an MR.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Approvals {
    pub by: BTreeSet<User>,
    pub required: u32,
}

impl Approvals {
    pub fn count(&self) -> u32 {
        self.by.len() as u32
    }

    pub fn meets_threshold(&self) -> bool {
        self.count() >= self.required
    }
}

/// Lifecycle state of a merge request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MrState {
    Opened,
    Closed,
    Merged,
    Locked,
}

/// A point-in-time snapshot of a merge request's forge state.
///
/// MR Views are created per poll cycle and discarded; nothing here is
/// cached across iterations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRequest {
    pub id: u64,
    pub iid: MrIid,
    pub project_id: ProjectId,
    pub source_project_id: ProjectId,
    pub source_branch: BranchName,
    pub target_branch: BranchName,
    pub sha: Oid,
    pub title: String,
    pub description: String,
    pub assignees: BTreeSet<User>,
    pub author: User,
    pub approvals: Approvals,
    pub state: MrState,
    pub work_in_progress: bool,
    pub web_url: String,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    /// Whether the MR currently has unresolved discussion threads.
    pub has_unresolved_discussions: bool,
}

/// CI execution status for a single pipeline, as reported by the forge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStatus {
    Created,
    Pending,
    Running,
    Success,
    Failed,
    Canceled,
    Skipped,
    Manual,
}

impl PipelineStatus {
    /// Treated as a terminal green light: `skipped` means CI was
    /// intentionally not run, which is not a failure.
    pub fn is_success(&self) -> bool {
        matches!(self, PipelineStatus::Success | PipelineStatus::Skipped)
    }

    /// Terminal failure, never becomes green on its own.
    pub fn is_failure(&self) -> bool {
        matches!(self, PipelineStatus::Failed | PipelineStatus::Canceled)
    }

    /// Still in flight; keep polling.
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            PipelineStatus::Created
                | PipelineStatus::Pending
                | PipelineStatus::Running
                | PipelineStatus::Manual
        )
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PipelineStatus::Created => "created",
            PipelineStatus::Pending => "pending",
            PipelineStatus::Running => "running",
            PipelineStatus::Success => "success",
            PipelineStatus::Failed => "failed",
            PipelineStatus::Canceled => "canceled",
            PipelineStatus::Skipped => "skipped",
            PipelineStatus::Manual => "manual",
        };
        f.write_str(s)
    }
}

/// The forge's CI execution record for a given commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pipeline {
    pub sha: Oid,
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub status: PipelineStatus,
    pub web_url: String,
}

/// An ordered set of MR ids whose combined rebased tree is tested and
/// merged as a unit. A batch of size 1 is always legal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchPlan {
    pub target_branch: BranchName,
    pub members: Vec<MrIid>,
}

impl BatchPlan {
    pub fn single(target_branch: BranchName, mr: MrIid) -> Self {
        Self {
            target_branch,
            members: vec![mr],
        }
    }

    pub fn is_batch(&self) -> bool {
        self.members.len() > 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod branch_name {
        use super::*;

        #[test]
        fn accepts_simple_names() {
            assert!(BranchName::new("main").is_ok());
            assert!(BranchName::new("feat/x").is_ok());
            assert!(BranchName::new("master").is_ok());
        }

        #[test]
        fn rejects_invalid_names() {
            assert!(BranchName::new("").is_err());
            assert!(BranchName::new(".hidden").is_err());
            assert!(BranchName::new("branch.lock").is_err());
            assert!(BranchName::new("has space").is_err());
            assert!(BranchName::new("a..b").is_err());
            assert!(BranchName::new("@").is_err());
        }

        #[test]
        fn is_same_as_compares_by_value() {
            let a = BranchName::new("main").unwrap();
            let b = BranchName::new("main").unwrap();
            let c = BranchName::new("feat/x").unwrap();
            assert!(a.is_same_as(&b));
            assert!(!a.is_same_as(&c));
        }
    }

    mod oid {
        use super::*;

        #[test]
        fn accepts_sha1_and_sha256() {
            assert!(Oid::new("a".repeat(40)).is_ok());
            assert!(Oid::new("a".repeat(64)).is_ok());
        }

        #[test]
        fn rejects_bad_length_or_non_hex() {
            assert!(Oid::new("abc").is_err());
            assert!(Oid::new("z".repeat(40)).is_err());
        }

        #[test]
        fn normalizes_case() {
            let oid = Oid::new("A".repeat(40)).unwrap();
            assert_eq!(oid.as_str(), "a".repeat(40));
        }

        #[test]
        fn short_truncates() {
            let oid = Oid::new("abc123def4567890abc123def4567890abc12345").unwrap();
            assert_eq!(oid.short(7), "abc123d");
        }
    }

    mod merge_method {
        use super::*;

        #[test]
        fn display() {
            assert_eq!(MergeMethod::Merge.to_string(), "merge");
            assert_eq!(MergeMethod::RebaseMerge.to_string(), "rebase-merge");
            assert_eq!(MergeMethod::FfOnly.to_string(), "ff-only");
            assert_eq!(MergeMethod::SemiLinear.to_string(), "semi-linear");
        }

        #[test]
        fn is_rebase() {
            assert!(!MergeMethod::Merge.is_rebase());
            assert!(MergeMethod::RebaseMerge.is_rebase());
            assert!(MergeMethod::SemiLinear.is_rebase());
        }

        #[test]
        fn is_ff_only() {
            assert!(MergeMethod::FfOnly.is_ff_only());
            assert!(MergeMethod::SemiLinear.is_ff_only());
            assert!(!MergeMethod::Merge.is_ff_only());
        }
    }

    mod approvals {
        use super::*;

        fn user(id: u64, username: &str) -> User {
            User {
                id: UserId(id),
                name: username.to_string(),
                username: username.to_string(),
                email: None,
            }
        }

        #[test]
        fn meets_threshold() {
            let mut by = BTreeSet::new();
            by.insert(user(1, "alice"));
            let approvals = Approvals { by, required: 1 };
            assert!(approvals.meets_threshold());
        }

        #[test]
        fn below_threshold() {
            let approvals = Approvals {
                by: BTreeSet::new(),
                required: 1,
            };
            assert!(!approvals.meets_threshold());
        }
    }

    mod pipeline_status {
        use super::*;

        #[test]
        fn skipped_is_success() {
            assert!(PipelineStatus::Skipped.is_success());
            assert!(PipelineStatus::Success.is_success());
            assert!(!PipelineStatus::Failed.is_success());
        }

        #[test]
        fn canceled_is_failure() {
            assert!(PipelineStatus::Canceled.is_failure());
            assert!(PipelineStatus::Failed.is_failure());
            assert!(!PipelineStatus::Running.is_failure());
        }

        #[test]
        fn pending_states() {
            assert!(PipelineStatus::Created.is_pending());
            assert!(PipelineStatus::Pending.is_pending());
            assert!(PipelineStatus::Running.is_pending());
            assert!(PipelineStatus::Manual.is_pending());
            assert!(!PipelineStatus::Success.is_pending());
        }
    }

    mod batch_plan {
        use super::*;

        #[test]
        fn single_is_not_a_batch() {
            let plan = BatchPlan::single(BranchName::new("main").unwrap(), MrIid(1));
            assert!(!plan.is_batch());
        }

        #[test]
        fn multiple_members_is_a_batch() {
            let plan = BatchPlan {
                target_branch: BranchName::new("main").unwrap(),
                members: vec![MrIid(1), MrIid(2)],
            };
            assert!(plan.is_batch());
        }
    }
}
