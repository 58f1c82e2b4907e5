//! Error types shared by every dataset stage.
//!
//! Stages return `anyhow::Result`, but the root cause of every failure they
//! raise themselves is a [`DataError`]. Callers that need to react to a
//! specific failure class recover it with `err.downcast_ref::<DataError>()`
//! and inspect [`DataError::kind`].

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Coarse classification of a [`DataError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The namespace root does not exist.
    NotFound,
    /// The namespace (or one of its entries) could not be read.
    Access,
    /// A resource failed to open.
    Open,
    /// Archive bytes could not be decoded.
    CorruptArchive,
    /// A constructor was given a bad parameter.
    InvalidArgument,
    /// The dataset chain cannot answer the requested capability (length, random access).
    NotSupported,
    /// An index fell outside the dataset.
    IndexOutOfBounds,
    /// A streamed archive member was read after the expander moved past it.
    StaleHandle,
}

/// Errors raised by dataset stages.
#[derive(Debug, Error)]
pub enum DataError {
    /// Namespace root is missing.
    #[error("path not found: {}", path.display())]
    NotFound {
        /// Path that was not found.
        path: PathBuf,
    },

    /// Namespace root or entry could not be read.
    #[error("cannot access {}: {source}", path.display())]
    Access {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        source: io::Error,
    },

    /// Resource failed to open.
    #[error("failed to open {}: {source}", path.display())]
    Open {
        /// Path of the resource.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        source: io::Error,
    },

    /// Malformed archive data.
    #[error("corrupt archive {}: {message}", path.display())]
    CorruptArchive {
        /// Archive identifier.
        path: PathBuf,
        /// What went wrong while decoding.
        message: String,
    },

    /// Bad constructor parameter.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Capability not available on this dataset chain.
    #[error("{operation} is not supported by {dataset}")]
    NotSupported {
        /// The capability that was requested (e.g. `len`).
        operation: &'static str,
        /// Type name of the dataset that cannot provide it.
        dataset: &'static str,
    },

    /// Index past the end of the dataset.
    #[error("index {index} out of bounds for dataset of length {len}")]
    IndexOutOfBounds {
        /// Requested index.
        index: usize,
        /// Number of available elements.
        len: usize,
    },

    /// Streamed member read after the archive cursor advanced.
    #[error("archive member {} is no longer readable: the expander has advanced past it", path.display())]
    StaleHandle {
        /// Identifier of the stale member.
        path: PathBuf,
    },
}

impl DataError {
    /// Create an `InvalidArgument` error with the given message.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Create a `NotSupported` error for the dataset type `D`.
    pub fn not_supported<D: ?Sized>(operation: &'static str) -> Self {
        Self::NotSupported {
            operation,
            dataset: std::any::type_name::<D>(),
        }
    }

    /// Create a `CorruptArchive` error.
    pub fn corrupt_archive(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Self::CorruptArchive {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Returns the classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Access { .. } => ErrorKind::Access,
            Self::Open { .. } => ErrorKind::Open,
            Self::CorruptArchive { .. } => ErrorKind::CorruptArchive,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::NotSupported { .. } => ErrorKind::NotSupported,
            Self::IndexOutOfBounds { .. } => ErrorKind::IndexOutOfBounds,
            Self::StaleHandle { .. } => ErrorKind::StaleHandle,
        }
    }
}

/// Returns the [`ErrorKind`] of the `DataError` at the root of `err`, if any.
pub fn error_kind(err: &anyhow::Error) -> Option<ErrorKind> {
    err.downcast_ref::<DataError>().map(DataError::kind)
}
