//! Error types for the SFTP client core.
//!
//! Every public operation returns [`SftpError`]. Server status codes, local
//! I/O failures and path validation failures all map into this one enum so a
//! bulk operation can re-surface the first fault it hit unchanged.

use thiserror::Error;

/// Coarse classification of an [`SftpError`].
///
/// Useful when a caller only cares about the category (e.g. "the target is
/// absent") and not about which layer detected it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    BadPath,
    PermissionDenied,
    InvalidPath,
    Connection,
    Config,
    Failure,
}

/// Error type for all session, protocol and transfer operations.
#[derive(Error, Debug)]
pub enum SftpError {
    /// The target file or directory does not exist.
    #[error("No such file: {path}")]
    NotFound { path: String, message: String },

    /// The root of a bulk transfer does not exist.
    #[error("No such directory: {0}")]
    NoSuchDirectory(String),

    /// The target exists but has the wrong kind (file where a directory is
    /// expected, or the reverse).
    #[error("Bad path: {path}: {reason}")]
    BadPath { path: String, reason: String },

    /// The server or local filesystem denied the operation.
    #[error("Permission denied: {path}")]
    PermissionDenied { path: String, message: String },

    /// The path could not be resolved to a canonical form.
    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// The transport failed or the session was closed.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Any other non-OK status returned by the server.
    #[error("{message}: {path} (code {code})")]
    Server {
        code: u32,
        path: String,
        message: String,
    },

    /// The peer sent something that does not follow SFTP v3.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The session configuration is invalid.
    #[error("Config error: {0}")]
    Config(String),

    /// A low-level local I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SftpError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } | Self::NoSuchDirectory(_) => ErrorKind::NotFound,
            Self::BadPath { .. } => ErrorKind::BadPath,
            Self::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Self::InvalidPath { .. } => ErrorKind::InvalidPath,
            Self::Connection(_) | Self::Protocol(_) => ErrorKind::Connection,
            Self::Config(_) => ErrorKind::Config,
            Self::Server { .. } | Self::Io(_) => ErrorKind::Failure,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub(crate) fn bad_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::BadPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Map a local `std::io::Error` to [`SftpError`] based on its kind.
pub(crate) fn map_io_error(e: std::io::Error, path: &str) -> SftpError {
    match e.kind() {
        std::io::ErrorKind::NotFound => SftpError::NotFound {
            path: path.to_string(),
            message: e.to_string(),
        },
        std::io::ErrorKind::PermissionDenied => SftpError::PermissionDenied {
            path: path.to_string(),
            message: e.to_string(),
        },
        _ => SftpError::Io(e),
    }
}
