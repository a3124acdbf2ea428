//! Chunk loading errors

use std::fmt;

use thiserror::Error;

use crate::graph::ChunkId;

/// What the host observed when a delivery failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryCategory {
    /// Fetch or parse failure reported by the host
    Transport,
    /// The resource loaded but never delivered its chunk
    Missing,
}

impl fmt::Display for DeliveryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport => f.write_str("error"),
            Self::Missing => f.write_str("missing"),
        }
    }
}

/// Error carried by a rejected chunk future
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChunkLoadError {
    #[error("Loading chunk {chunk} failed.\n({category}: {address})")]
    Delivery {
        chunk: ChunkId,
        category: DeliveryCategory,
        address: String,
    },

    #[error("Loading chunk {chunk} failed.\n(timeout: {address})")]
    Timeout { chunk: ChunkId, address: String },

    #[error("build invariant violated: {reason}")]
    BuildInvariantViolation { reason: String },

    #[error("runtime dropped while chunk {chunk} was loading")]
    Abandoned { chunk: ChunkId },
}

impl ChunkLoadError {
    pub(crate) fn invariant(reason: impl Into<String>) -> Self {
        Self::BuildInvariantViolation {
            reason: reason.into(),
        }
    }

    /// Chunk the failed load was for, if the error concerns a single chunk
    pub fn chunk(&self) -> Option<&ChunkId> {
        match self {
            Self::Delivery { chunk, .. } | Self::Timeout { chunk, .. } | Self::Abandoned { chunk } => {
                Some(chunk)
            }
            Self::BuildInvariantViolation { .. } => None,
        }
    }
}
