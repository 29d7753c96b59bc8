// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error and Result types for database modification.

use std::collections::TryReserveError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// A convenience `Result` type.
pub type Result<T> = std::result::Result<T, ModifyError>;

/// Everything that can end a modification run. None of these are retried.
#[derive(Debug, Error)]
pub enum ModifyError {
    /// The source declares a format version other than the supported one.
    #[error(
        "direct modification is only supported for version {supported} files, found version {found:?}; dump/restore before retrying"
    )]
    UnsupportedVersion {
        found: String,
        supported: &'static str,
    },

    /// The source is not a well-formed database file.
    #[error("invalid database file: {0}")]
    InvalidFormat(String),

    /// An added column collides with a surviving or another added column.
    #[error("duplicate data source name: {0}")]
    DuplicateColumnName(String),

    /// An addition request could not be parsed.
    #[error("invalid data source definition '{definition}': {reason}")]
    ParseError { definition: String, reason: String },

    /// A buffer could not be reserved.
    #[error("cannot allocate {what}: {source}")]
    AllocationFailure {
        what: &'static str,
        source: TryReserveError,
    },

    /// Fewer bytes than expected were available from the source.
    #[error("short read of {what}: expected {expected} bytes, got {actual}")]
    ShortRead {
        what: String,
        expected: usize,
        actual: usize,
    },

    /// Serializing the destination did not complete.
    #[error("short write: {0}")]
    ShortWrite(#[source] io::Error),

    #[error("cannot open {path}: {source}")]
    Open { path: PathBuf, source: io::Error },

    #[error("cannot create temporary file in {dir}: {source}")]
    TempFileCreateFailure { dir: PathBuf, source: io::Error },

    #[error("cannot chmod temporary file {path}: {source}")]
    PermissionApplyFailure { path: PathBuf, source: io::Error },

    #[error("cannot rename temporary file to {path}: {source}")]
    RenameFailure { path: PathBuf, source: io::Error },

    /// A daemon address was configured but could not be reached.
    #[error("cannot connect to daemon at {address}: {source}")]
    DaemonConnect { address: String, source: io::Error },

    /// The daemon answered a request with an error status.
    #[error("daemon error: {0}")]
    Daemon(String),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl ModifyError {
    pub(crate) fn short_read(what: impl Into<String>, expected: usize, actual: usize) -> Self {
        Self::ShortRead {
            what: what.into(),
            expected,
            actual,
        }
    }
}

/// Reserves room for exactly `capacity` elements, reporting exhaustion as an
/// error instead of aborting.
pub(crate) fn try_vec<T>(capacity: usize, what: &'static str) -> Result<Vec<T>> {
    let mut out = Vec::new();
    out.try_reserve_exact(capacity)
        .map_err(|source| ModifyError::AllocationFailure { what, source })?;
    Ok(out)
}
