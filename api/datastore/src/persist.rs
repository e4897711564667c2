//! Per-module persistent state files.
//!
//! `{data_dir}/{module}.persist` holds the state that must survive engine
//! restarts but isn't configuration data: the module's enabled features and
//! its durable module-change subscriptions.  The format is JSON; updates
//! happen read-modify-write under an exclusive advisory lock so concurrent
//! writers can't lose each other's changes.

use fs2::FileExt;
use log::debug;
use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{self, Error, Result};
use wire::EventType;

/// One durable subscription entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSubscription {
    pub event: EventType,
    pub dst_address: String,
    pub dst_id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// The contents of a module's persist file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistData {
    #[serde(
        rename = "enabled-features",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub enabled_features: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subscriptions: Vec<PersistedSubscription>,
}

impl PersistData {
    /// Records a feature as enabled or disabled.  Returns whether anything
    /// changed.
    pub fn set_feature(&mut self, feature: &str, enable: bool) -> bool {
        let present = self.enabled_features.iter().any(|f| f == feature);
        match (present, enable) {
            (false, true) => {
                self.enabled_features.push(feature.to_string());
                true
            }
            (true, false) => {
                self.enabled_features.retain(|f| f != feature);
                true
            }
            _ => false,
        }
    }

    /// Adds a subscription, replacing an identical registration.  Returns
    /// whether the entry is new.
    pub fn add_subscription(&mut self, subscription: PersistedSubscription) -> bool {
        let existing = self.subscriptions.iter().position(|s| {
            s.event == subscription.event
                && s.dst_address == subscription.dst_address
                && s.dst_id == subscription.dst_id
        });
        match existing {
            Some(i) => {
                self.subscriptions[i] = subscription;
                false
            }
            None => {
                self.subscriptions.push(subscription);
                true
            }
        }
    }

    /// Removes one subscription.  Returns whether it was present.
    pub fn remove_subscription(&mut self, event: EventType, dst_address: &str, dst_id: u32) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| {
            !(s.event == event && s.dst_address == dst_address && s.dst_id == dst_id)
        });
        self.subscriptions.len() != before
    }

    /// Removes every subscription for a destination address, regardless of
    /// event or id.  Returns how many were dropped.
    pub fn remove_destination(&mut self, dst_address: &str) -> usize {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| s.dst_address != dst_address);
        before - self.subscriptions.len()
    }
}

/// Access to the persist files under one data directory.
#[derive(Debug, Clone)]
pub struct PersistFiles {
    data_dir: PathBuf,
}

impl PersistFiles {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self, module: &str) -> PathBuf {
        self.data_dir.join(format!("{}.persist", module))
    }

    /// Reads a module's persisted state under a shared lock.  Missing file
    /// means nothing has been persisted yet.
    pub fn load(&self, module: &str) -> Result<PersistData> {
        let path = self.path(module);
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(PersistData::default()),
            Err(e) => return Err(e).context(error::IoSnafu { path }),
        };
        file.lock_shared().context(error::IoSnafu { path: &path })?;
        let result = read_locked(&mut file, &path);
        let _ = file.unlock();
        result
    }

    /// Applies a closure to a module's persisted state under an exclusive
    /// lock, writing the result back.  Returns the updated state.
    pub fn update<F>(&self, module: &str, apply: F) -> Result<PersistData>
    where
        F: FnOnce(&mut PersistData),
    {
        let path = self.path(module);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .context(error::IoSnafu { path: &path })?;
        file.lock_exclusive().context(error::IoSnafu { path: &path })?;

        let result = (|| {
            let mut data = read_locked(&mut file, &path)?;
            apply(&mut data);

            let serialised = serde_json::to_string_pretty(&data)
                .context(error::SerializeSnafu { path: &path })?;
            file.set_len(0).context(error::IoSnafu { path: &path })?;
            file.seek(SeekFrom::Start(0))
                .context(error::IoSnafu { path: &path })?;
            file.write_all(serialised.as_bytes())
                .context(error::IoSnafu { path: &path })?;
            file.sync_data().context(error::IoSnafu { path: &path })?;
            debug!("Updated persist file {}", path.display());
            Ok(data)
        })();
        let _ = file.unlock();
        result
    }
}

fn read_locked(file: &mut File, path: &Path) -> Result<PersistData> {
    let mut contents = String::new();
    file.read_to_string(&mut contents)
        .context(error::IoSnafu { path })?;
    if contents.trim().is_empty() {
        return Ok(PersistData::default());
    }
    serde_json::from_str(&contents).map_err(|e| Error::Corruption {
        path: path.to_path_buf(),
        msg: format!("unparseable persist file: {}", e),
    })
}

#[cfg(test)]
mod test {
    use super::*;

    fn subscription(dst: &str, id: u32) -> PersistedSubscription {
        PersistedSubscription {
            event: EventType::ModuleChange,
            dst_address: dst.to_string(),
            dst_id: id,
            path: None,
        }
    }

    #[test]
    fn missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let files = PersistFiles::new(dir.path());
        assert_eq!(files.load("m").unwrap(), PersistData::default());
    }

    #[test]
    fn update_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let files = PersistFiles::new(dir.path());

        files
            .update("m", |data| {
                data.set_feature("extra", true);
                data.add_subscription(subscription("/tmp/sub.sock", 1));
            })
            .unwrap();

        let loaded = files.load("m").unwrap();
        assert_eq!(loaded.enabled_features, vec!["extra".to_string()]);
        assert_eq!(loaded.subscriptions, vec![subscription("/tmp/sub.sock", 1)]);

        // Disabling removes the feature again.
        let updated = files
            .update("m", |data| {
                data.set_feature("extra", false);
            })
            .unwrap();
        assert!(updated.enabled_features.is_empty());
    }

    #[test]
    fn subscription_bookkeeping() {
        let mut data = PersistData::default();
        assert!(data.add_subscription(subscription("/a", 1)));
        assert!(data.add_subscription(subscription("/a", 2)));
        assert!(data.add_subscription(subscription("/b", 1)));
        // Same key replaces rather than duplicates.
        assert!(!data.add_subscription(subscription("/a", 1)));
        assert_eq!(data.subscriptions.len(), 3);

        assert!(data.remove_subscription(EventType::ModuleChange, "/a", 2));
        assert!(!data.remove_subscription(EventType::ModuleChange, "/a", 2));
        assert_eq!(data.remove_destination("/a"), 1);
        assert_eq!(data.subscriptions, vec![subscription("/b", 1)]);
    }
}
