//! `backbone-core`: domain building blocks shared by the sync engine.
//!
//! This crate contains **pure domain** primitives (no storage, network or
//! runtime concerns).

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::{LocalProjectId, QueueItemId};
