//! Per-module data files.
//!
//! Each module has one file per datastore, `{data_dir}/{module}.{datastore}`,
//! holding the serialised tree.  Readers take a shared advisory lock for the
//! duration of the read; the commit sequence holds exclusive locks through
//! [`LockedDataFile`] guards, which release on drop so every exit path (and
//! panic unwind) gives the lock back.
//!
//! Writers truncate, rewrite, and `sync_data` in place under the exclusive
//! lock, so readers never observe a partial file.

use fs2::FileExt;
use log::{debug, trace};
use snafu::ResultExt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::{self, Error, Result};
use crate::schema::ModuleSchema;
use crate::tree::{DataTree, NodeRepr};
use wire::Datastore;

/// Access to the data files under one data directory.
#[derive(Debug, Clone)]
pub struct DataFiles {
    data_dir: PathBuf,
}

impl DataFiles {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
        }
    }

    /// The file backing one module's datastore.
    pub fn path(&self, module: &str, datastore: Datastore) -> PathBuf {
        self.data_dir
            .join(format!("{}.{}", module, datastore.as_str()))
    }

    /// The file's last modification time, or None when it doesn't exist yet.
    pub fn mtime(&self, module: &str, datastore: Datastore) -> Result<Option<SystemTime>> {
        let path = self.path(module, datastore);
        match std::fs::metadata(&path) {
            Ok(meta) => Ok(Some(meta.modified().context(error::IoSnafu { path })?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).context(error::IoSnafu { path }),
        }
    }

    /// Reads a module's tree under a shared lock.  A missing file is an empty
    /// tree, so freshly installed modules work without extra setup.
    pub fn load(
        &self,
        schema: &ModuleSchema,
        datastore: Datastore,
    ) -> Result<(DataTree, Option<SystemTime>)> {
        let path = self.path(&schema.name, datastore);
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                trace!("No data file at {}; empty tree", path.display());
                return Ok((DataTree::new(), None));
            }
            Err(e) => return Err(e).context(error::IoSnafu { path }),
        };
        file.lock_shared().context(error::IoSnafu { path: &path })?;

        let result = read_locked(&mut file, schema, &path);
        let _ = file.unlock();

        let mtime = file
            .metadata()
            .and_then(|m| m.modified())
            .context(error::IoSnafu { path })?;
        result.map(|tree| (tree, Some(mtime)))
    }

    /// Opens (creating if needed) and exclusively locks a module's data file
    /// for the commit sequence.  Contention is a commit failure, not a wait.
    pub fn lock_exclusive(&self, module: &str, datastore: Datastore) -> Result<LockedDataFile> {
        let path = self.path(module, datastore);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .context(error::IoSnafu { path: &path })?;
        file.try_lock_exclusive()
            .map_err(|e| Error::CommitFailed {
                msg: format!("unable to lock '{}': {}", path.display(), e),
            })?;
        debug!("Locked data file {}", path.display());
        Ok(LockedDataFile { file, path })
    }
}

fn read_locked(file: &mut File, schema: &ModuleSchema, path: &Path) -> Result<DataTree> {
    let mut contents = String::new();
    file.read_to_string(&mut contents)
        .context(error::IoSnafu { path })?;
    parse_tree(&contents, schema, path)
}

fn parse_tree(contents: &str, schema: &ModuleSchema, path: &Path) -> Result<DataTree> {
    if contents.trim().is_empty() {
        return Ok(DataTree::new());
    }
    let reprs: Vec<NodeRepr> =
        serde_json::from_str(contents).map_err(|e| Error::Corruption {
            path: path.to_path_buf(),
            msg: format!("unparseable data file: {}", e),
        })?;
    DataTree::from_repr(schema, &reprs).map_err(|e| Error::Corruption {
        path: path.to_path_buf(),
        msg: e.to_string(),
    })
}

/// An exclusively locked data file.  The lock is held until the guard drops.
#[derive(Debug)]
pub struct LockedDataFile {
    file: File,
    path: PathBuf,
}

impl LockedDataFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mtime(&self) -> Result<SystemTime> {
        self.file
            .metadata()
            .and_then(|m| m.modified())
            .context(error::IoSnafu { path: &self.path })
    }

    /// Re-reads the committed tree under the held lock.
    pub fn read_tree(&mut self, schema: &ModuleSchema) -> Result<DataTree> {
        self.file
            .seek(SeekFrom::Start(0))
            .context(error::IoSnafu { path: &self.path })?;
        read_locked(&mut self.file, schema, &self.path)
    }

    /// Truncates, rewrites, and syncs the tree to disk.
    pub fn write_tree(&mut self, tree: &DataTree) -> Result<()> {
        let serialised =
            serde_json::to_string_pretty(&tree.to_repr()).context(error::SerializeSnafu {
                path: &self.path,
            })?;

        self.file
            .set_len(0)
            .context(error::IoSnafu { path: &self.path })?;
        self.file
            .seek(SeekFrom::Start(0))
            .context(error::IoSnafu { path: &self.path })?;
        self.file
            .write_all(serialised.as_bytes())
            .context(error::IoSnafu { path: &self.path })?;
        self.file
            .sync_data()
            .context(error::IoSnafu { path: &self.path })?;
        debug!("Wrote {} bytes to {}", serialised.len(), self.path.display());
        Ok(())
    }
}

impl Drop for LockedDataFile {
    fn drop(&mut self) {
        // Errors on unlock can't be meaningfully handled here; closing the fd
        // releases the lock regardless.
        let _ = self.file.unlock();
    }
}
