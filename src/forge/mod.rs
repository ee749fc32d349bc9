//! forge
//!
//! Abstraction over the GitLab API.
//!
//! # Architecture
//!
//! The [`Forge`] trait is Marge's only point of contact with GitLab. Workers
//! hold an `Arc<dyn Forge>` and never construct [`gitlab::GitLabForge`]
//! directly, so tests can substitute [`mock::MockForge`] with no other
//! code path change.
//!
//! # Modules
//!
//! - `traits`: the `Forge` trait, `ForgeError`, `CapabilitySet`
//! - [`gitlab`]: the real GitLab REST API v4 client
//! - [`mock`]: an in-memory test double

pub mod gitlab;
pub mod mock;
mod traits;

pub use traits::*;
