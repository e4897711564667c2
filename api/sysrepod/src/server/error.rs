use snafu::Snafu;
use std::io;
use std::path::PathBuf;

use wire::{ErrorCode, ErrorInfo, EventType};

// We want connection, dispatch, and controller errors together so it's easy to
// define the wire error code for all the high-level types of errors that can
// happen during a request.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    // Engine lifecycle errors
    #[snafu(display("Engine initialization failed: {}", source))]
    Init { source: datastore::Error },

    #[snafu(display("Unable to remove stale socket '{}': {}", path.display(), source))]
    RemoveSocket { path: PathBuf, source: io::Error },

    #[snafu(display("Unable to bind to '{}': {}", path.display(), source))]
    BindSocket { path: PathBuf, source: io::Error },

    #[snafu(display("Unable to set permissions on '{}': {}", path.display(), source))]
    SetPermissions { path: PathBuf, source: io::Error },

    // Connection errors
    #[snafu(display("Unable to read peer credentials: {}", source))]
    PeerCred { source: io::Error },

    #[snafu(display("Rejected peer with uid {} in local mode", uid))]
    LocalPeerMismatch { uid: u32 },

    // Request errors
    #[snafu(display("Unknown session {}", session_id))]
    UnknownSession { session_id: u32 },

    #[snafu(display("User '{}' is not known to the system", user))]
    UnknownUser { user: String },

    #[snafu(display("Unable to look up user '{}': {}", user, source))]
    UserLookup { user: String, source: nix::Error },

    #[snafu(display(
        "Peer with uid {} may not assume the identity of '{}'",
        uid,
        user
    ))]
    NotPrivileged { uid: u32, user: String },

    #[snafu(display("{} access denied on module '{}'", mode, module))]
    AccessDenied { module: String, mode: String },

    #[snafu(display("Subscriptions to {:?} events are not supported", event))]
    UnsupportedEvent { event: EventType },

    #[snafu(display("A {:?} subscription requires a module name", event))]
    SubscriptionModule { event: EventType },

    #[snafu(display("No such subscription"))]
    SubscriptionMissing,

    #[snafu(display("Data store error during {}: {}", op, source))]
    DataStore {
        op: String,
        source: datastore::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// The flat wire code this error surfaces as.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Init { source } | Error::DataStore { source, .. } => source.code(),
            Error::RemoveSocket { .. }
            | Error::BindSocket { .. }
            | Error::SetPermissions { .. }
            | Error::PeerCred { .. } => ErrorCode::Io,
            Error::LocalPeerMismatch { .. }
            | Error::NotPrivileged { .. }
            | Error::AccessDenied { .. } => ErrorCode::Unauthorized,
            Error::UnknownSession { .. }
            | Error::UnknownUser { .. }
            | Error::SubscriptionModule { .. } => ErrorCode::InvalArg,
            Error::UserLookup { .. } => ErrorCode::Sys,
            Error::UnsupportedEvent { .. } => ErrorCode::Unsupported,
            Error::SubscriptionMissing => ErrorCode::NotFound,
        }
    }

    /// The detail entries surfaced to the client, path-tagged where the
    /// underlying error knows a path.
    pub fn details(&self) -> Vec<ErrorInfo> {
        match self {
            Error::Init { source } | Error::DataStore { source, .. } => source.details(),
            other => vec![ErrorInfo::new(other.to_string())],
        }
    }
}
