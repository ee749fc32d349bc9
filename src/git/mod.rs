//! git
//!
//! Single interface for all Git worktree operations.
//!
//! # Architecture
//!
//! This module is the **ONLY doorway** to Git. No other module imports
//! `git2` directly or shells out to the `git` binary; everything flows
//! through the [`GitOps`] trait so production code and tests share one
//! call shape.
//!
//! # Modules
//!
//! - `interface`: the `GitOps` trait, `GitError`, and the `git2`-backed
//!   production implementation
//! - [`fake`]: an in-memory test double

pub mod fake;
mod interface;

pub use interface::{GitError, GitOps, LibGit2Worktree};
