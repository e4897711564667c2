//! Access control: tests a session's effective identity against the
//! filesystem permissions of the module's data file.
//!
//! The check maps the target path's module to its data file in the session's
//! datastore and applies the classic Unix class selection (owner, then group,
//! then other) for the effective uid/gid.  When the file doesn't exist yet the
//! containing directory stands in for it, so a first commit is governed by
//! the data directory's permissions.  Root passes unconditionally.

use log::trace;
use snafu::ensure;
use std::fmt;
use std::os::unix::fs::MetadataExt;

use super::error::{self, Result};
use super::session::UserCred;
use datastore::DataManager;
use wire::Datastore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    ReadWrite,
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessMode::Read => f.write_str("read"),
            AccessMode::ReadWrite => f.write_str("read-write"),
        }
    }
}

/// Checks whether the session may access the given module in the given mode.
/// Violations surface as `UNAUTHORIZED`.
pub fn check_module_access(
    dm: &DataManager,
    cred: &UserCred,
    module: &str,
    datastore: Datastore,
    mode: AccessMode,
) -> Result<()> {
    if cred.effective_uid == 0 {
        return Ok(());
    }

    let file = dm.data_file_path(module, datastore);
    let meta = match std::fs::metadata(&file) {
        Ok(meta) => meta,
        // No data file yet: the directory's permissions decide.
        Err(_) => match file.parent().and_then(|dir| std::fs::metadata(dir).ok()) {
            Some(meta) => meta,
            None => {
                return error::AccessDeniedSnafu {
                    module,
                    mode: mode.to_string(),
                }
                .fail()
            }
        },
    };

    let permitted = class_permits(
        meta.mode(),
        meta.uid(),
        meta.gid(),
        cred.effective_uid,
        cred.effective_gid,
        mode,
    );
    trace!(
        "Access check {} on '{}' ({:o}) for uid {}/gid {}: {}",
        mode,
        file.display(),
        meta.mode() & 0o777,
        cred.effective_uid,
        cred.effective_gid,
        if permitted { "allowed" } else { "denied" }
    );
    ensure!(
        permitted,
        error::AccessDeniedSnafu {
            module,
            mode: mode.to_string(),
        }
    );
    Ok(())
}

/// Classic Unix permission test: exactly one class applies, chosen in
/// owner-group-other order.
fn class_permits(
    file_mode: u32,
    file_uid: u32,
    file_gid: u32,
    uid: u32,
    gid: u32,
    mode: AccessMode,
) -> bool {
    let shift = if uid == file_uid {
        6
    } else if gid == file_gid {
        3
    } else {
        0
    };
    let class_bits = (file_mode >> shift) & 0o7;
    match mode {
        AccessMode::Read => class_bits & 0o4 != 0,
        AccessMode::ReadWrite => class_bits & 0o6 == 0o6,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const UID: u32 = 1000;
    const GID: u32 = 1000;

    #[test]
    fn owner_class() {
        // rw for owner, nothing for the rest.
        assert!(class_permits(0o600, UID, GID, UID, GID, AccessMode::Read));
        assert!(class_permits(0o600, UID, GID, UID, GID, AccessMode::ReadWrite));
        assert!(!class_permits(0o600, UID, GID, 2000, 2000, AccessMode::Read));
    }

    #[test]
    fn group_class() {
        // r for group only; the owner class does not fall through to group.
        assert!(class_permits(0o040, UID, GID, 2000, GID, AccessMode::Read));
        assert!(!class_permits(0o040, UID, GID, 2000, GID, AccessMode::ReadWrite));
        // Matching owner with no owner bits is denied even though group bits
        // would allow it.
        assert!(!class_permits(0o040, UID, GID, UID, GID, AccessMode::Read));
    }

    #[test]
    fn other_class() {
        assert!(class_permits(0o004, UID, GID, 2000, 2000, AccessMode::Read));
        assert!(!class_permits(0o004, UID, GID, 2000, 2000, AccessMode::ReadWrite));
        assert!(class_permits(0o006, UID, GID, 2000, 2000, AccessMode::ReadWrite));
    }
}
