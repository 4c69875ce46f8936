//! Error kinds surfaced by the geometry, the collision oracles and the
//! packing configuration.

use thiserror::Error;

/// Failures that abort a call or a run.
///
/// Rejected moves are not errors: a collision is the feedback signal that
/// shrinks a body's step, so it never appears here.
#[derive(Debug, Error)]
pub enum PackError {
    #[error("dimension mismatch: body has {expected} dimensions, got {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("invalid rotation plane ({0}, {1}) for a {2}-dimensional body")]
    InvalidPlane(usize, usize, usize),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("collision oracle failure: {0}")]
    Oracle(String),

    #[error("malformed packing file: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PackError>;
