//! cli
//!
//! Command-line interface layer for Marge.
//!
//! # Responsibilities
//!
//! - Parse command-line arguments and flags
//! - Does NOT resolve configuration itself; that's [`crate::core::config`]
//!
//! # Architecture
//!
//! The CLI layer is a single flat flag set (no subcommands): Marge is a
//! daemon, not a command runner. `main.rs` parses [`Cli`], resolves
//! [`crate::core::config::Config`] from it, and hands the result to the
//! fleet coordinator.

pub mod args;

pub use args::Cli;
