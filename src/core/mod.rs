//! core
//!
//! Core domain types and configuration schema for Marge.
//!
//! # Modules
//!
//! - [`types`] - Strong types: BranchName, Oid, MergeRequest, Pipeline, etc.
//! - [`config`] - Configuration schema and precedence-resolved loading
//!
//! # Design Principles
//!
//! - Strong typing prevents invalid states at compile time
//! - Configuration is resolved once at startup; nothing downstream re-reads the environment

pub mod config;
pub mod types;
