//! Marge - An autonomous, serialising merge-bot for GitLab
//!
//! Marge enforces the Not Rocket Science Rule: every commit that lands on a
//! protected branch had CI pass against content byte-identical to what
//! actually landed. It polls merge requests assigned to it, rebases each
//! approved candidate onto the current target tip, waits for a green
//! pipeline on that exact rebased sha, and only then accepts the merge with
//! a compare-and-swap against the sha it tested.
//!
//! # Architecture
//!
//! - [`cli`] - Command-line flag parsing
//! - [`core`] - Domain types and configuration schema/precedence
//! - [`forge`] - Abstraction over the GitLab API
//! - [`git`] - Single interface for all Git worktree operations
//! - [`trailer`] - Rewrites commit trailers (`Reviewed-by`, `Tested-by`, `Part-of`)
//! - [`embargo`] - Named merge-freeze windows
//! - [`mrview`] - Read-only predicates over a merge request snapshot
//! - [`batch`] - Plans multi-MR batches landed as a single rebase unit
//! - [`worker`] - The per-project merge state machine
//! - [`coordinator`] - Discovers projects and runs one worker per target branch
//! - [`clock`] - A seam between "now" and time-dependent logic, for deterministic tests
//! - [`error`] - The top-level error type and process exit code mapping
//! - [`logging`] - `tracing` subscriber initialisation
//!
//! # Correctness Invariants
//!
//! 1. A merge request is only accepted with a compare-and-swap against the
//!    exact sha that had a green pipeline.
//! 2. Every pushed commit's trailers are rewritten deterministically and
//!    idempotently; re-running never double-appends.
//! 3. A batch of size one behaves identically to batching disabled.
//! 4. Workers never guess at retry: component errors carry the structure
//!    (`is_retryable`/`is_transient`) needed to decide without string matching.

pub mod batch;
pub mod cli;
pub mod clock;
pub mod coordinator;
pub mod core;
pub mod embargo;
pub mod error;
pub mod forge;
pub mod git;
pub mod logging;
pub mod mrview;
pub mod trailer;
pub mod worker;
