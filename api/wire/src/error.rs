//! The flat error taxonomy surfaced to clients.
//!
//! Engine-internal errors are richer (each component has its own error type);
//! they're mapped down to an [`ErrorCode`] plus a list of [`ErrorInfo`] details
//! at the request-processor boundary, and that's all a client ever sees.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes carried on the wire as integer discriminants.
///
/// The numeric values are part of the protocol; new codes may only be appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u32", try_from = "u32")]
#[repr(u32)]
pub enum ErrorCode {
    Ok = 0,
    InvalArg = 1,
    Nomem = 2,
    NotFound = 3,
    Internal = 4,
    Unauthorized = 5,
    MalformedMsg = 6,
    TimeOut = 7,
    Unsupported = 8,
    UnknownModel = 9,
    BadElement = 10,
    ValidationFailed = 11,
    DataMissing = 12,
    DataExists = 13,
    Io = 14,
    Locked = 15,
    CommitFailed = 16,
    Sys = 17,
}

impl ErrorCode {
    /// A short static description, suitable when no more specific message is
    /// available.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Ok => "Operation succeeded",
            ErrorCode::InvalArg => "Invalid argument",
            ErrorCode::Nomem => "Out of memory",
            ErrorCode::NotFound => "Item not found",
            ErrorCode::Internal => "Internal error",
            ErrorCode::Unauthorized => "Operation not authorized",
            ErrorCode::MalformedMsg => "Malformed message",
            ErrorCode::TimeOut => "Operation timed out",
            ErrorCode::Unsupported => "Operation not supported",
            ErrorCode::UnknownModel => "Unknown schema model",
            ErrorCode::BadElement => "Unknown element in path",
            ErrorCode::ValidationFailed => "Validation failed",
            ErrorCode::DataMissing => "Data is missing",
            ErrorCode::DataExists => "Data already exists",
            ErrorCode::Io => "Input/output error",
            ErrorCode::Locked => "Requested resource is locked",
            ErrorCode::CommitFailed => "Commit failed",
            ErrorCode::Sys => "System function call failed",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ErrorCode> for u32 {
    fn from(code: ErrorCode) -> u32 {
        code as u32
    }
}

impl TryFrom<u32> for ErrorCode {
    type Error = String;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        use ErrorCode::*;
        let code = match raw {
            0 => Ok,
            1 => InvalArg,
            2 => Nomem,
            3 => NotFound,
            4 => Internal,
            5 => Unauthorized,
            6 => MalformedMsg,
            7 => TimeOut,
            8 => Unsupported,
            9 => UnknownModel,
            10 => BadElement,
            11 => ValidationFailed,
            12 => DataMissing,
            13 => DataExists,
            14 => Io,
            15 => Locked,
            16 => CommitFailed,
            17 => Sys,
            other => return Err(format!("unknown error code {}", other)),
        };
        std::result::Result::Ok(code)
    }
}

/// Detail attached to an error: a human-readable message and, where the error
/// concerns a data node, the faulting path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl ErrorInfo {
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
            path: None,
        }
    }

    pub fn with_path<S1, S2>(message: S1, path: S2) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
    {
        Self {
            message: message.into(),
            path: Some(path.into()),
        }
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(f, "{}: {}", path, self.message),
            None => f.write_str(&self.message),
        }
    }
}
