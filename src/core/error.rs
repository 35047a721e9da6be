use std::path::PathBuf;

use thiserror::Error;

use super::types::ResourceId;

// ---------------------------------------------------------------------------
// Backend errors
// ---------------------------------------------------------------------------

/// Errors returned by a `StorageBackend` fetch.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("storage backend unavailable: {reason}")]
    Unavailable { reason: String },
}

// ---------------------------------------------------------------------------
// Filename encoding errors
// ---------------------------------------------------------------------------

/// Errors decoding an on-disk bucket filename.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FileNameError {
    #[error("filename {name:?} has no extension")]
    MissingExtension { name: String },

    #[error("filename {name:?} has unknown extension {extension:?}")]
    UnknownExtension { name: String, extension: String },

    #[error("filename {name:?} has {found} fields, expected 5")]
    FieldCount { name: String, found: usize },

    #[error("filename {name:?} has invalid {field} field {value:?}")]
    InvalidField {
        name: String,
        field: &'static str,
        value: String,
    },
}

// ---------------------------------------------------------------------------
// Local disk errors
// ---------------------------------------------------------------------------

/// Errors persisting bucket files to, or reading them from, local disk.
#[derive(Debug, Error)]
pub enum DiskError {
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unreadable payload in {path}: {reason}")]
    Payload { path: PathBuf, reason: String },

    #[error(transparent)]
    FileName(#[from] FileNameError),
}

// ---------------------------------------------------------------------------
// Catalog errors
// ---------------------------------------------------------------------------

/// Errors resolving resources in the catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("resource not found: {resource_id}")]
    ResourceNotFound { resource_id: ResourceId },

    #[error("invalid resource {resource_id}: {reason}")]
    InvalidResource {
        resource_id: ResourceId,
        reason: String,
    },
}
