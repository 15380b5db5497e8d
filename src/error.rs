use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, UpdaterError>;

#[derive(Error, Debug)]
pub enum UpdaterError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot connect to {address}: {source}")]
    Connection {
        address: String,
        source: std::io::Error,
    },

    #[error("login rejected: {message}")]
    Auth { message: String },

    #[error("cannot change to remote directory '{directory}': {message}")]
    Navigation { directory: String, message: String },

    #[error("remote file '{name}' not found: {message}")]
    NotFound { name: String, message: String },

    #[error("{message}")]
    Transfer { message: String },

    #[error("unexpected server reply: {message}")]
    Protocol { message: String },

    #[error("cannot write {path}: {source}")]
    LocalFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{path} is not a valid archive: {message}")]
    ArchiveFormat { path: PathBuf, message: String },

    #[error("cannot extract '{entry}': {message}")]
    Extraction { entry: String, message: String },

    #[error("{message}")]
    Config { message: String },

    #[error("Permission denied: {path}")]
    PermissionDenied { path: PathBuf },
}

/// Coarse grouping used for the single diagnostic line printed on failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Ftp,
    Unpack,
    Config,
}

impl ErrorCategory {
    pub fn label(self) -> &'static str {
        match self {
            ErrorCategory::Ftp => "FTP",
            ErrorCategory::Unpack => "Unpack",
            ErrorCategory::Config => "Config",
        }
    }
}

impl UpdaterError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            UpdaterError::Connection { .. }
            | UpdaterError::Auth { .. }
            | UpdaterError::Navigation { .. }
            | UpdaterError::NotFound { .. }
            | UpdaterError::Transfer { .. }
            | UpdaterError::Protocol { .. }
            | UpdaterError::LocalFile { .. } => ErrorCategory::Ftp,
            UpdaterError::ArchiveFormat { .. }
            | UpdaterError::Extraction { .. }
            | UpdaterError::PermissionDenied { .. }
            | UpdaterError::Io(_) => ErrorCategory::Unpack,
            UpdaterError::Config { .. } => ErrorCategory::Config,
        }
    }

    /// The `"<category> error: <detail>"` line shown to the user.
    pub fn diagnostic(&self) -> String {
        format!("{} error: {}", self.category().label(), self)
    }

    pub fn config_error<S: Into<String>>(message: S) -> Self {
        UpdaterError::Config {
            message: message.into(),
        }
    }

    pub fn transfer_error<S: Into<String>>(message: S) -> Self {
        UpdaterError::Transfer {
            message: message.into(),
        }
    }

    pub fn protocol_error<S: Into<String>>(message: S) -> Self {
        UpdaterError::Protocol {
            message: message.into(),
        }
    }

    pub fn extraction_error<E: Into<String>, M: Into<String>>(entry: E, message: M) -> Self {
        UpdaterError::Extraction {
            entry: entry.into(),
            message: message.into(),
        }
    }
}
