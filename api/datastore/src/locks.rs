//! The advisory lock table: one lock per (datastore, module) plus one
//! whole-datastore lock per datastore.  Holders are session ids; incompatible
//! acquires fail with `LOCKED` rather than waiting.  All of a session's locks
//! are released when the session ends.

use std::collections::HashMap;

use snafu::ensure;

use crate::error::{self, Result};
use wire::Datastore;

#[derive(Debug, Default)]
struct DsLocks {
    datastore_holder: Option<u32>,
    modules: HashMap<String, u32>,
}

#[derive(Debug, Default)]
pub struct LockTable {
    per_ds: HashMap<Datastore, DsLocks>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_module(&mut self, datastore: Datastore, module: &str, session: u32) -> Result<()> {
        let locks = self.per_ds.entry(datastore).or_default();

        if let Some(holder) = locks.datastore_holder {
            ensure!(
                holder == session,
                error::LockedSnafu {
                    what: format!("datastore {}", datastore),
                    holder,
                }
            );
        }
        if let Some(&holder) = locks.modules.get(module) {
            ensure!(
                holder == session,
                error::LockedSnafu {
                    what: format!("module '{}'", module),
                    holder,
                }
            );
        }
        locks.modules.insert(module.to_string(), session);
        Ok(())
    }

    pub fn unlock_module(
        &mut self,
        datastore: Datastore,
        module: &str,
        session: u32,
    ) -> Result<()> {
        let locks = self.per_ds.entry(datastore).or_default();
        match locks.modules.get(module) {
            Some(&holder) if holder == session => {
                locks.modules.remove(module);
                Ok(())
            }
            Some(&holder) => error::LockedSnafu {
                what: format!("module '{}'", module),
                holder,
            }
            .fail(),
            None => error::InvalArgSnafu {
                path: module,
                msg: "module is not locked by this session",
            }
            .fail(),
        }
    }

    /// Locks a whole datastore.  Requires every per-module lock in it to be
    /// free (or held by the requesting session).
    pub fn lock_datastore(&mut self, datastore: Datastore, session: u32) -> Result<()> {
        let locks = self.per_ds.entry(datastore).or_default();

        if let Some(holder) = locks.datastore_holder {
            ensure!(
                holder == session,
                error::LockedSnafu {
                    what: format!("datastore {}", datastore),
                    holder,
                }
            );
        }
        for (module, &holder) in &locks.modules {
            ensure!(
                holder == session,
                error::LockedSnafu {
                    what: format!("module '{}'", module),
                    holder,
                }
            );
        }
        locks.datastore_holder = Some(session);
        Ok(())
    }

    pub fn unlock_datastore(&mut self, datastore: Datastore, session: u32) -> Result<()> {
        let locks = self.per_ds.entry(datastore).or_default();
        match locks.datastore_holder {
            Some(holder) if holder == session => {
                locks.datastore_holder = None;
                Ok(())
            }
            Some(holder) => error::LockedSnafu {
                what: format!("datastore {}", datastore),
                holder,
            }
            .fail(),
            None => error::InvalArgSnafu {
                path: datastore.as_str(),
                msg: "datastore is not locked by this session",
            }
            .fail(),
        }
    }

    /// Releases everything a session holds, across all datastores.
    pub fn release_session(&mut self, session: u32) {
        for locks in self.per_ds.values_mut() {
            if locks.datastore_holder == Some(session) {
                locks.datastore_holder = None;
            }
            locks.modules.retain(|_, holder| *holder != session);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::Error;

    const A: u32 = 1;
    const B: u32 = 2;

    #[test]
    fn module_lock_exclusivity() {
        let mut table = LockTable::new();
        table.lock_module(Datastore::Startup, "m", A).unwrap();

        // Re-acquire by the holder is fine; another session is refused.
        table.lock_module(Datastore::Startup, "m", A).unwrap();
        match table.lock_module(Datastore::Startup, "m", B) {
            Err(Error::Locked { holder, .. }) => assert_eq!(holder, A),
            other => panic!("expected Locked, got {:?}", other),
        }

        // A different module, or the same module in another datastore, is
        // independent.
        table.lock_module(Datastore::Startup, "n", B).unwrap();
        table.lock_module(Datastore::Running, "m", B).unwrap();
    }

    #[test]
    fn datastore_lock_blocks_modules() {
        let mut table = LockTable::new();
        table.lock_datastore(Datastore::Startup, A).unwrap();

        assert!(matches!(
            table.lock_module(Datastore::Startup, "m", B),
            Err(Error::Locked { .. })
        ));
        assert!(matches!(
            table.lock_datastore(Datastore::Startup, B),
            Err(Error::Locked { .. })
        ));

        // Release and retry.
        table.unlock_datastore(Datastore::Startup, A).unwrap();
        table.lock_module(Datastore::Startup, "m", B).unwrap();
    }

    #[test]
    fn datastore_lock_requires_free_modules() {
        let mut table = LockTable::new();
        table.lock_module(Datastore::Startup, "m", A).unwrap();
        assert!(matches!(
            table.lock_datastore(Datastore::Startup, B),
            Err(Error::Locked { .. })
        ));
        // The module holder itself may still take the datastore lock.
        table.lock_datastore(Datastore::Startup, A).unwrap();
    }

    #[test]
    fn unlock_validations() {
        let mut table = LockTable::new();
        assert!(matches!(
            table.unlock_module(Datastore::Startup, "m", A),
            Err(Error::InvalArg { .. })
        ));

        table.lock_module(Datastore::Startup, "m", A).unwrap();
        assert!(matches!(
            table.unlock_module(Datastore::Startup, "m", B),
            Err(Error::Locked { .. })
        ));
        table.unlock_module(Datastore::Startup, "m", A).unwrap();
    }

    #[test]
    fn session_release_frees_everything() {
        let mut table = LockTable::new();
        table.lock_module(Datastore::Startup, "m", A).unwrap();
        table.lock_datastore(Datastore::Candidate, A).unwrap();

        table.release_session(A);

        table.lock_module(Datastore::Startup, "m", B).unwrap();
        table.lock_datastore(Datastore::Candidate, B).unwrap();
    }
}
