//! Per-session editing state: module overlays and the operation log.
//!
//! A [`DmSession`] holds everything a session has touched since its last
//! commit or discard: one lazily forked working copy per module, plus the
//! ordered log of edits used to replay the session's intent onto a refreshed
//! base when the underlying datastore has moved.

use std::collections::HashMap;
use std::time::SystemTime;

use crate::path::Path;
use crate::tree::DataTree;
use wire::{Datastore, EditFlags, MoveDirection, ValueData};

/// One entry of the operation log.  `created` on a set records whether the
/// edit brought the node into existence, which replay uses to detect
/// collisions with concurrently committed creates.
#[derive(Debug, Clone)]
pub enum EditOp {
    Set {
        path: Path,
        value: Option<ValueData>,
        flags: EditFlags,
        created: bool,
    },
    Delete {
        path: Path,
        flags: EditFlags,
    },
    Move {
        path: Path,
        direction: MoveDirection,
    },
}

impl EditOp {
    pub fn path(&self) -> &Path {
        match self {
            EditOp::Set { path, .. } | EditOp::Delete { path, .. } | EditOp::Move { path, .. } => {
                path
            }
        }
    }

    pub fn module(&self) -> &str {
        &self.path().module
    }
}

/// A session's working copy of one module's tree.
#[derive(Debug, Clone)]
pub struct DataInfo {
    pub tree: DataTree,
    /// Modification time of the backing file when the copy was forked; None
    /// when no file existed yet.
    pub base_mtime: Option<SystemTime>,
    pub modified: bool,
}

/// The data manager's view of one session.
#[derive(Debug)]
pub struct DmSession {
    pub datastore: Datastore,
    pub(crate) overlays: HashMap<String, DataInfo>,
    pub(crate) op_log: Vec<EditOp>,
}

impl DmSession {
    pub fn new(datastore: Datastore) -> Self {
        Self {
            datastore,
            overlays: HashMap::new(),
            op_log: Vec::new(),
        }
    }

    pub fn overlay(&self, module: &str) -> Option<&DataInfo> {
        self.overlays.get(module)
    }

    /// The modules with modified overlays, sorted for deterministic lock
    /// acquisition order.
    pub fn modified_modules(&self) -> Vec<String> {
        let mut modules: Vec<String> = self
            .overlays
            .iter()
            .filter(|(_, info)| info.modified)
            .map(|(name, _)| name.clone())
            .collect();
        modules.sort();
        modules
    }

    pub fn op_log(&self) -> &[EditOp] {
        &self.op_log
    }

    /// Drops all overlays and the operation log.
    pub fn discard(&mut self) {
        self.overlays.clear();
        self.op_log.clear();
    }
}
