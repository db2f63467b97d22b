//! Error types shared by every add-on operation.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AddonError>;

/// Failure categories, without payload, for callers that only need to branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Parse,
    Integrity,
    Network,
    NetworkTimeout,
    Extraction,
    StagingIo,
    UnknownAddon,
    Locked,
    Io,
}

#[derive(Debug, Error)]
pub enum AddonError {
    /// Malformed version string or missing required XML attribute.
    #[error("parse error: {0}")]
    Parse(String),

    /// Catalog checksum mismatch, or a removal target that is not installed.
    #[error("integrity error: {0}")]
    Integrity(String),

    #[error("download of {url} failed: {message}")]
    Network { url: String, message: String },

    #[error("download of {url} timed out")]
    NetworkTimeout { url: String },

    /// The artifact did not unpack into a directory named after the add-on.
    #[error("extraction error: {0}")]
    Extraction(String),

    #[error("staging directory {path:?}: {source}")]
    StagingIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("add-on '{0}' is not published in the catalog")]
    UnknownAddon(String),

    #[error("add-ons directory is locked by another run ({0:?})")]
    Locked(PathBuf),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl AddonError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AddonError::Parse(_) => ErrorKind::Parse,
            AddonError::Integrity(_) => ErrorKind::Integrity,
            AddonError::Network { .. } => ErrorKind::Network,
            AddonError::NetworkTimeout { .. } => ErrorKind::NetworkTimeout,
            AddonError::Extraction(_) => ErrorKind::Extraction,
            AddonError::StagingIo { .. } => ErrorKind::StagingIo,
            AddonError::UnknownAddon(_) => ErrorKind::UnknownAddon,
            AddonError::Locked(_) => ErrorKind::Locked,
            AddonError::Io { .. } => ErrorKind::Io,
        }
    }

    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        AddonError::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn staging(path: impl Into<PathBuf>, source: io::Error) -> Self {
        AddonError::StagingIo {
            path: path.into(),
            source,
        }
    }
}
