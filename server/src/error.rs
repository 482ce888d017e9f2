//! Error types for the server crate

use crate::world::{EntityId, EntityKind};
use thiserror::Error;

/// Invariant violations inside the world store.
///
/// These are programming defects, not gameplay conditions: the offending
/// operation is aborted and the store is left untouched.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WorldError {
    #[error("entity {0} not found")]
    NotFound(EntityId),
    #[error("entity {0} already exists")]
    AlreadyExists(EntityId),
    #[error("no free ids left for {0:?}")]
    IdSpaceExhausted(EntityKind),
}

/// Process-level failures surfaced to the binary.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),
}
