//! Error types that can be emitted from this library

use miette::Diagnostic;
use thiserror::Error;

use crate::diagnostics::WorkerDiagnostics;
use crate::types::FileKey;

/// Error type for library
#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    /// Transparent wrapper for [`std::io::Error`]
    #[error(transparent)]
    IOFailure(#[from] std::io::Error),

    /// Transparent wrapper for [`binrw::Error`]
    #[error(transparent)]
    BinRWError(#[from] binrw::Error),

    /// header or record counts are inconsistent with the stream
    #[error("malformed bigfile container: {0}")]
    #[diagnostic(help("the file is not a bigfile, or it has been truncated"))]
    MalformedContainer(String),

    /// unable to find requested file
    #[error("unable to find requested file")]
    FileNotFound(#[from] FileNotFoundError),

    /// the payload ended before its declared length
    #[error("file {key} is truncated: expected {expected} bytes, got {actual}")]
    TruncatedRead {
        /// Key of the file being read
        key: FileKey,
        /// Number of bytes declared by the payload framing
        expected: usize,
        /// Number of bytes that could actually be read
        actual: usize,
    },

    /// the payload could not be inflated
    #[error("unable to decompress file {key}")]
    DecompressionError {
        /// Key of the file being read
        key: FileKey,
        /// Error reported by the deflate decoder
        #[source]
        source: std::io::Error,
    },

    /// the archive metadata has not been loaded yet
    #[error("bigfile has not been loaded")]
    NotLoaded,

    /// a name does not fit in its fixed size record field
    #[error("name {0:?} is too long for a bigfile record")]
    NameTooLong(String),

    /// Transparent wrapper for [`serde_json::Error`]
    #[error("invalid renamed file mapping")]
    Mapping(#[from] serde_json::Error),

    /// a relative path would resolve outside the unpacked directory
    #[error("path {0:?} leaves the unpacked directory")]
    #[diagnostic(help("renamed_mapping.json may have been edited by hand"))]
    UnsafePath(String),

    /// Transparent wrapper for [`rayon::ThreadPoolBuildError`]
    #[error(transparent)]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// a freshly packed container does not match what was written
    #[error("packed bigfile failed verification: {0}")]
    Verification(String),

    /// a worker hit a fatal error, the work finished before it is kept
    #[error("operation aborted: {source}")]
    RunAborted {
        /// Diagnostics for every worker, up to the point of failure
        workers: Vec<WorkerDiagnostics>,
        /// The error that stopped the run
        #[source]
        source: Box<Error>,
    },

    /// {0}
    #[error("{0}")]
    CustomError(String),
}

impl Error {
    /// Whether a batch should log this error and carry on with the next file
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::FileNotFound(_) | Error::TruncatedRead { .. } | Error::DecompressionError { .. }
        )
    }
}

/// Error type to provide further information when a file has not been found
#[derive(Error, Diagnostic, Debug)]
#[error("unable to find requested file")]
pub enum FileNotFoundError {
    /// by key {0}
    #[error("by key {0}")]
    Key(FileKey),

    /// {0} has no payload in the container
    #[error("{0} has no payload in the container")]
    Unlinked(FileKey),

    /// {0} is missing from the renamed file mapping
    #[error("{0} is missing from the renamed file mapping")]
    Unmapped(FileKey),

    /// {0} has no unpacked file on disk
    #[error("{0} has no unpacked file on disk")]
    Missing(FileKey),
}

/// Generic result type with crate's Error as its error variant
pub type Result<T> = core::result::Result<T, Error>;
