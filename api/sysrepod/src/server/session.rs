//! Session bookkeeping: credentials, editing state, and the last-error list.
//!
//! Sessions belong to the connection that started them; the engine only hands
//! out ids (monotonic, unique for the engine's lifetime) and enforces the
//! effective-user rule.  When a connection goes away its sessions are dropped
//! and every lock they held is released.

use libc::{gid_t, uid_t};
use log::debug;
use nix::unistd::User;
use snafu::{ensure, OptionExt, ResultExt};
use std::sync::atomic::{AtomicU32, Ordering};

use super::error::{self, Result};
use datastore::DmSession;
use wire::{Datastore, ErrorInfo};

/// The identity a session operates under.  The real ids come from the
/// socket's peer credentials; the effective ids differ only when a privileged
/// peer asked to act as someone else.
#[derive(Debug, Clone)]
pub struct UserCred {
    pub real_uid: uid_t,
    pub real_gid: gid_t,
    pub effective_uid: uid_t,
    pub effective_gid: gid_t,
    pub effective_user: Option<String>,
}

impl UserCred {
    /// Credentials for a peer acting as itself.
    pub fn from_peer(uid: uid_t, gid: gid_t) -> Self {
        Self {
            real_uid: uid,
            real_gid: gid,
            effective_uid: uid,
            effective_gid: gid,
            effective_user: None,
        }
    }

    /// Resolves a requested effective user against the peer's real identity.
    /// Only root may assume another user; anyone may name themselves.
    pub fn with_effective(uid: uid_t, gid: gid_t, user: &str) -> Result<Self> {
        let record = User::from_name(user)
            .context(error::UserLookupSnafu { user })?
            .context(error::UnknownUserSnafu { user })?;
        ensure!(
            uid == 0 || record.uid.as_raw() == uid,
            error::NotPrivilegedSnafu { uid, user }
        );
        Ok(Self {
            real_uid: uid,
            real_gid: gid,
            effective_uid: record.uid.as_raw(),
            effective_gid: record.gid.as_raw(),
            effective_user: Some(user.to_string()),
        })
    }
}

/// One client session.
#[derive(Debug)]
pub struct Session {
    pub id: u32,
    pub cred: UserCred,
    pub dm: DmSession,
    /// Most-recent-first error details from the last failed operation; the
    /// next operation on the session clears them.
    pub last_errors: Vec<ErrorInfo>,
}

impl Session {
    pub fn new(id: u32, cred: UserCred, datastore: Datastore) -> Self {
        debug!(
            "Session {} started on {} for uid {} (effective {})",
            id, datastore, cred.real_uid, cred.effective_uid
        );
        Self {
            id,
            cred,
            dm: DmSession::new(datastore),
            last_errors: Vec::new(),
        }
    }
}

/// Allocates session ids: monotonic 32-bit, unique per engine lifetime.
#[derive(Debug)]
pub struct SessionIds {
    next: AtomicU32,
}

impl SessionIds {
    pub fn new() -> Self {
        // Id 0 is reserved for "no session yet" in message envelopes.
        Self {
            next: AtomicU32::new(1),
        }
    }

    pub fn allocate(&self) -> u32 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for SessionIds {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::server::error::Error;

    #[test]
    fn ids_are_monotonic_and_skip_zero() {
        let ids = SessionIds::new();
        let first = ids.allocate();
        let second = ids.allocate();
        assert_eq!(first, 1);
        assert_eq!(second, 2);
    }

    #[test]
    fn unprivileged_peer_cannot_assume_other_users() {
        // "root" exists on any unix system this runs on; a non-root peer
        // asking for it must be refused.
        match UserCred::with_effective(12345, 12345, "root") {
            Err(Error::NotPrivileged { uid, .. }) => assert_eq!(uid, 12345),
            other => panic!("expected NotPrivileged, got {:?}", other),
        }
    }

    #[test]
    fn root_peer_may_assume_any_user() {
        let cred = UserCred::with_effective(0, 0, "root").unwrap();
        assert_eq!(cred.real_uid, 0);
        assert_eq!(cred.effective_uid, 0);
        assert_eq!(cred.effective_user.as_deref(), Some("root"));
    }

    #[test]
    fn unknown_user_is_reported() {
        match UserCred::with_effective(0, 0, "no-such-user-here") {
            Err(Error::UnknownUser { user }) => assert_eq!(user, "no-such-user-here"),
            other => panic!("expected UnknownUser, got {:?}", other),
        }
    }
}
