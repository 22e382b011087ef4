//! DropCraft Distribution
//!
//! Turns a finalized contribution map into the published distribution
//! document: index assignment, leaf hashing, tree construction and one
//! claim record (index, amount, proof) per recipient.
//!
//! Also hosts the checkpoint store the CLI uses to resume long pipelines.

mod checkpoint;
mod document;

pub use checkpoint::{Checkpoint, JsonCheckpoint, NoCheckpoint};
pub use document::{
    build_document, ClaimRecord, Distribution, DistributionDocument, DistributionEntry,
};

use dropcraft_core::{Address, InputError};
use dropcraft_merkle::MerkleError;
use dropcraft_normalizer::NormalizeError;

/// Distribution errors
#[derive(Debug, thiserror::Error)]
pub enum DistributionError {
    #[error("Invalid input: {0}")]
    Input(#[from] InputError),

    #[error("Normalization failed: {0}")]
    Normalize(#[from] NormalizeError),

    #[error("Merkle error: {0}")]
    Merkle(#[from] MerkleError),

    #[error("No claim for address {0}")]
    ClaimNotFound(Address),

    #[error("Invalid distribution document: {0}")]
    InvalidDocument(String),

    #[error("Invalid checkpoint name: {0}")]
    InvalidCheckpointName(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DistributionError>;
