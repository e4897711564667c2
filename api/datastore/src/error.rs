use snafu::Snafu;
use std::io;
use std::path::PathBuf;

use wire::{ErrorCode, ErrorInfo};

/// Possible errors from datastore operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Path '{}' has invalid format: {}", path, msg))]
    InvalidPath { path: String, msg: String },

    #[snafu(display("Unknown module '{}'", module))]
    UnknownModule { module: String },

    #[snafu(display("Unknown element at '{}'", path))]
    BadElement { path: String },

    #[snafu(display("Invalid argument for '{}': {}", path, msg))]
    InvalArg { path: String, msg: String },

    #[snafu(display("No data found at '{}'", path))]
    NotFound { path: String },

    #[snafu(display("Data already exists at '{}'", path))]
    DataExists { path: String },

    #[snafu(display("Data is missing at '{}'", path))]
    DataMissing { path: String },

    #[snafu(display(
        "Value type {} does not match schema type of '{}'",
        value_type,
        path
    ))]
    TypeMismatch { path: String, value_type: String },

    #[snafu(display("Validation failed with {} error(s)", errors.len()))]
    ValidationFailed { errors: Vec<ErrorInfo> },

    #[snafu(display("Session refresh found {} conflicting edit(s)", errors.len()))]
    RefreshConflict { errors: Vec<ErrorInfo> },

    #[snafu(display("{} is locked by session {}", what, holder))]
    Locked { what: String, holder: u32 },

    #[snafu(display("Commit failed: {}", msg))]
    CommitFailed { msg: String },

    #[snafu(display("Unable to parse schema '{}': {}", file.display(), msg))]
    SchemaParse { file: PathBuf, msg: String },

    #[snafu(display("Operation not supported: {}", what))]
    Unsupported { what: String },

    #[snafu(display("IO error on '{}': {}", path.display(), source))]
    Io { path: PathBuf, source: io::Error },

    #[snafu(display("Data store integrity violation at '{}': {}", path.display(), msg))]
    Corruption { msg: String, path: PathBuf },

    #[snafu(display("Unable to serialize data for '{}': {}", path.display(), source))]
    Serialize {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[snafu(display("Data store logic error: {}", msg))]
    Internal { msg: String },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// The flat wire code this error surfaces as.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::InvalidPath { .. } => ErrorCode::InvalArg,
            Error::UnknownModule { .. } => ErrorCode::UnknownModel,
            Error::BadElement { .. } => ErrorCode::BadElement,
            Error::InvalArg { .. } => ErrorCode::InvalArg,
            Error::NotFound { .. } => ErrorCode::NotFound,
            Error::DataExists { .. } => ErrorCode::DataExists,
            Error::DataMissing { .. } => ErrorCode::DataMissing,
            Error::TypeMismatch { .. } => ErrorCode::InvalArg,
            Error::ValidationFailed { .. } => ErrorCode::ValidationFailed,
            Error::RefreshConflict { .. } => ErrorCode::Internal,
            Error::Locked { .. } => ErrorCode::Locked,
            Error::CommitFailed { .. } => ErrorCode::CommitFailed,
            Error::SchemaParse { .. } => ErrorCode::Internal,
            Error::Unsupported { .. } => ErrorCode::Unsupported,
            Error::Io { .. } => ErrorCode::Io,
            Error::Corruption { .. } => ErrorCode::Internal,
            Error::Serialize { .. } => ErrorCode::Internal,
            Error::Internal { .. } => ErrorCode::Internal,
        }
    }

    /// The path-tagged details carried to the client.  Validation and refresh
    /// failures carry their full error lists; everything else carries a single
    /// entry built from the display form.
    pub fn details(&self) -> Vec<ErrorInfo> {
        match self {
            Error::ValidationFailed { errors } | Error::RefreshConflict { errors } => {
                errors.clone()
            }
            Error::BadElement { path }
            | Error::NotFound { path }
            | Error::DataExists { path }
            | Error::DataMissing { path }
            | Error::InvalArg { path, .. }
            | Error::TypeMismatch { path, .. } => {
                vec![ErrorInfo::with_path(self.to_string(), path)]
            }
            _ => vec![ErrorInfo::new(self.to_string())],
        }
    }
}
