//! The data manager: the central authority for schema-correct state.
//!
//! One [`DataManager`] exists per engine.  It owns the schema registry, the
//! data and persist files, the advisory lock table, and the commit guard.
//! Sessions' editing state lives in [`DmSession`] values owned by the caller
//! and threaded through every operation.
//!
//! The commit sequence follows a two-phase shape: validate locally, then under
//! the engine-wide commit guard take exclusive file locks on every modified
//! module, re-read the committed bases, replay the session's operation log
//! onto them, re-validate, and only then rewrite the files.  A failure at any
//! point before the write leaves every file byte-identical.

use log::{debug, info, warn};
use snafu::{ensure, ResultExt};
use std::collections::HashMap;
use std::fs;
use std::path::{Path as FsPath, PathBuf};
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::datafile::{DataFiles, LockedDataFile};
use crate::error::{self, Error, Result};
use crate::locks::LockTable;
use crate::path::Path;
use crate::persist::PersistFiles;
use crate::schema::{parse, ModuleSchema, SchemaRegistry};
use crate::session::{DataInfo, DmSession, EditOp};
use crate::tree::DataTree;
use crate::validate;
use wire::{
    Datastore, EditFlags, ErrorInfo, MoveDirection, SchemaFormat, SchemaInfo, Value, ValueData,
};

pub struct DataManager {
    schema: RwLock<SchemaRegistry>,
    files: DataFiles,
    persist: PersistFiles,
    locks: Mutex<LockTable>,
    commit_guard: Mutex<()>,
    schema_dir: PathBuf,
}

impl DataManager {
    /// Loads every schema from the schema directory, applies persisted
    /// feature state, and seeds missing `running` files from `startup`.
    pub fn init<P1, P2>(schema_dir: P1, data_dir: P2) -> Result<Self>
    where
        P1: AsRef<FsPath>,
        P2: AsRef<FsPath>,
    {
        let schema_dir = schema_dir.as_ref().to_path_buf();
        let data_dir = data_dir.as_ref().to_path_buf();
        fs::create_dir_all(&data_dir).context(error::IoSnafu { path: &data_dir })?;

        let mut registry = SchemaRegistry::load_dir(&schema_dir)?;
        let persist = PersistFiles::new(&data_dir);
        for name in registry.module_names() {
            let persisted = persist.load(&name)?;
            let module = registry.get_mut(&name)?;
            for feature in &persisted.enabled_features {
                if let Err(e) = module.enable_feature(feature) {
                    warn!(
                        "Persisted feature '{}' unknown in module '{}': {}",
                        feature, name, e
                    );
                }
            }
        }

        let manager = Self {
            schema: RwLock::new(registry),
            files: DataFiles::new(&data_dir),
            persist,
            locks: Mutex::new(LockTable::new()),
            commit_guard: Mutex::new(()),
            schema_dir,
        };
        manager.seed_running()?;
        Ok(manager)
    }

    /// Copies each module's startup data to `running` when no running file
    /// exists yet, so applications see the persisted config on first start.
    fn seed_running(&self) -> Result<()> {
        let registry = self.registry_read()?;
        for module in registry.iter() {
            let has_running = self.files.mtime(&module.name, Datastore::Running)?.is_some();
            let has_startup = self.files.mtime(&module.name, Datastore::Startup)?.is_some();
            if has_running || !has_startup {
                continue;
            }
            let (tree, _) = self.files.load(module, Datastore::Startup)?;
            let mut locked = self.files.lock_exclusive(&module.name, Datastore::Running)?;
            locked.write_tree(&tree)?;
            info!("Seeded running datastore for module '{}'", module.name);
        }
        Ok(())
    }

    fn registry_read(&self) -> Result<RwLockReadGuard<'_, SchemaRegistry>> {
        self.schema.read().map_err(|_| Error::Internal {
            msg: "schema registry lock poisoned".to_string(),
        })
    }

    fn registry_write(&self) -> Result<RwLockWriteGuard<'_, SchemaRegistry>> {
        self.schema.write().map_err(|_| Error::Internal {
            msg: "schema registry lock poisoned".to_string(),
        })
    }

    fn lock_table(&self) -> Result<MutexGuard<'_, LockTable>> {
        self.locks.lock().map_err(|_| Error::Internal {
            msg: "lock table mutex poisoned".to_string(),
        })
    }

    // Schema administration

    pub fn list_schemas(&self) -> Result<Vec<SchemaInfo>> {
        let registry = self.registry_read()?;
        let mut infos: Vec<SchemaInfo> = registry
            .iter()
            .map(|module| module.info(&self.schema_dir))
            .collect();
        infos.sort_by(|a, b| a.module.cmp(&b.module));
        Ok(infos)
    }

    /// Serves the raw schema text.  YIN is only available when a `.yin` file
    /// sits next to the module's YANG source.
    pub fn get_schema(
        &self,
        module: &str,
        revision: Option<&str>,
        submodule: Option<&str>,
        format: SchemaFormat,
    ) -> Result<String> {
        let registry = self.registry_read()?;
        let schema = registry.get(module)?;

        let target = match submodule {
            Some(sub) => {
                ensure!(
                    schema.submodules.iter().any(|s| s == sub),
                    error::NotFoundSnafu {
                        path: format!("/{}:submodule/{}", module, sub),
                    }
                );
                sub
            }
            None => module,
        };

        let extension = match format {
            SchemaFormat::Yang => "yang",
            SchemaFormat::Yin => "yin",
        };
        let file_name = match revision {
            Some(rev) => format!("{}@{}.{}", target, rev, extension),
            None => format!("{}.{}", target, extension),
        };
        let path = self.schema_dir.join(file_name);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => error::NotFoundSnafu {
                path: path.display().to_string(),
            }
            .fail(),
            Err(e) => Err(e).context(error::IoSnafu { path }),
        }
    }

    /// Installs or retires a module at runtime, behind the schema writer
    /// lock.
    pub fn module_install(
        &self,
        module: &str,
        revision: Option<&str>,
        installed: bool,
    ) -> Result<()> {
        let mut registry = self.registry_write()?;
        if !installed {
            registry
                .remove(module)
                .ok_or_else(|| Error::UnknownModule {
                    module: module.to_string(),
                })?;
            info!("Uninstalled module '{}'", module);
            return Ok(());
        }

        let file_name = match revision {
            Some(rev) => format!("{}@{}.yang", module, rev),
            None => format!("{}.yang", module),
        };
        let path = self.schema_dir.join(file_name);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return error::UnknownModuleSnafu { module }.fail()
            }
            Err(e) => return Err(e).context(error::IoSnafu { path }),
        };
        let mut parsed = parse::parse_module(&text, &path)?;
        ensure!(
            parsed.name == module,
            error::InvalArgSnafu {
                path: path.display().to_string(),
                msg: format!("file defines module '{}', not '{}'", parsed.name, module),
            }
        );

        let persisted = self.persist.load(module)?;
        for feature in &persisted.enabled_features {
            let _ = parsed.enable_feature(feature);
        }
        info!("Installed module '{}' from {}", module, path.display());
        registry.insert(parsed);
        Ok(())
    }

    /// Enables or disables a feature, persisting the new state and updating
    /// schema node visibility.
    pub fn feature_enable(&self, module: &str, feature: &str, enable: bool) -> Result<()> {
        let mut registry = self.registry_write()?;
        let schema = registry.get_mut(module)?;
        if enable {
            schema.enable_feature(feature)?;
        } else {
            schema.disable_feature(feature)?;
        }
        self.persist.update(module, |data| {
            data.set_feature(feature, enable);
        })?;
        info!(
            "Feature '{}' in module '{}' is now {}",
            feature,
            module,
            if enable { "enabled" } else { "disabled" }
        );
        Ok(())
    }

    pub fn has_module(&self, module: &str) -> Result<bool> {
        Ok(self.registry_read()?.contains(module))
    }

    /// The file backing a module's data in the given datastore; access
    /// control checks permissions against it.
    pub fn data_file_path(&self, module: &str, datastore: Datastore) -> PathBuf {
        self.files.path(module, datastore)
    }

    pub fn persist_files(&self) -> &PersistFiles {
        &self.persist
    }

    pub fn module_names(&self) -> Result<Vec<String>> {
        Ok(self.registry_read()?.module_names())
    }

    // Session data access

    /// Loads a module's base tree for a session.  The candidate datastore
    /// seeds from `running` until its own first commit creates a file.
    fn load_base(
        &self,
        schema: &ModuleSchema,
        datastore: Datastore,
    ) -> Result<(DataTree, Option<std::time::SystemTime>)> {
        let (tree, mtime) = self.files.load(schema, datastore)?;
        if datastore == Datastore::Candidate && mtime.is_none() {
            let (seeded, _) = self.files.load(schema, Datastore::Running)?;
            return Ok((seeded, None));
        }
        Ok((tree, mtime))
    }

    /// Fetches (or lazily forks) the session's working copy of a module.  An
    /// unmodified overlay whose backing file has moved is re-forked
    /// transparently.
    fn data_info<'a>(
        &self,
        registry: &SchemaRegistry,
        session: &'a mut DmSession,
        module: &str,
    ) -> Result<&'a mut DataInfo> {
        let schema = registry.get(module)?;
        let datastore = session.datastore;

        match session.overlays.get(module) {
            Some(info) if info.modified => {}
            Some(info) => {
                let current = self.files.mtime(module, datastore)?;
                if current != info.base_mtime {
                    debug!(
                        "Re-forking unmodified overlay of '{}' after base change",
                        module
                    );
                    let (tree, mtime) = self.load_base(schema, datastore)?;
                    let info = session.overlays.get_mut(module).expect("just checked");
                    info.tree = tree;
                    info.base_mtime = mtime;
                }
            }
            None => {
                let (tree, mtime) = self.load_base(schema, datastore)?;
                session.overlays.insert(
                    module.to_string(),
                    DataInfo {
                        tree,
                        base_mtime: mtime,
                        modified: false,
                    },
                );
            }
        }
        Ok(session.overlays.get_mut(module).expect("inserted above"))
    }

    // Retrieval

    /// A single item.  The path must match exactly one node.
    pub fn get_item(&self, session: &mut DmSession, path_str: &str) -> Result<Value> {
        let path = Path::parse(path_str)?;
        ensure!(
            !path.wildcard,
            error::InvalArgSnafu {
                path: path_str,
                msg: "get_item does not take wildcard paths",
            }
        );
        let mut values = self.get_values(session, &path)?;
        ensure!(
            values.len() == 1,
            error::InvalArgSnafu {
                path: path_str,
                msg: "path matches more than one node",
            }
        );
        Ok(values.remove(0))
    }

    /// All items matching the path, in document order.
    pub fn get_items(&self, session: &mut DmSession, path_str: &str) -> Result<Vec<Value>> {
        let path = Path::parse(path_str)?;
        self.get_values(session, &path)
    }

    /// A chunk of the items matching the path; the stateless form of
    /// iteration.  Restart means reissuing from offset 0.
    pub fn get_items_chunk(
        &self,
        session: &mut DmSession,
        path_str: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Value>> {
        let all = self.get_items(session, path_str)?;
        Ok(all.into_iter().skip(offset).take(limit).collect())
    }

    fn get_values(&self, session: &mut DmSession, path: &Path) -> Result<Vec<Value>> {
        let registry = self.registry_read()?;
        let info = self.data_info(&registry, session, &path.module)?;
        let schema = registry.get(&path.module)?;
        let values = info.tree.get_values(schema, path)?;
        ensure!(
            !values.is_empty(),
            error::NotFoundSnafu {
                path: path.to_string(),
            }
        );
        Ok(values)
    }

    // Edits

    pub fn set_item(
        &self,
        session: &mut DmSession,
        path_str: &str,
        value: Option<&ValueData>,
        flags: EditFlags,
    ) -> Result<()> {
        let path = Path::parse(path_str)?;
        let registry = self.registry_read()?;
        let schema = registry.get(&path.module)?;
        let info = self.data_info(&registry, session, &path.module)?;

        let created = info.tree.set(schema, &path, value, flags)?;
        info.modified = true;
        session.op_log.push(EditOp::Set {
            path,
            value: value.cloned(),
            flags,
            created,
        });
        Ok(())
    }

    pub fn delete_item(
        &self,
        session: &mut DmSession,
        path_str: &str,
        flags: EditFlags,
    ) -> Result<()> {
        let path = Path::parse(path_str)?;
        let registry = self.registry_read()?;
        let schema = registry.get(&path.module)?;
        let info = self.data_info(&registry, session, &path.module)?;

        info.tree.delete(schema, &path, flags)?;
        info.modified = true;
        session.op_log.push(EditOp::Delete { path, flags });
        Ok(())
    }

    pub fn move_item(
        &self,
        session: &mut DmSession,
        path_str: &str,
        direction: MoveDirection,
    ) -> Result<()> {
        let path = Path::parse(path_str)?;
        let registry = self.registry_read()?;
        let schema = registry.get(&path.module)?;
        let info = self.data_info(&registry, session, &path.module)?;

        info.tree.move_item(schema, &path, direction)?;
        info.modified = true;
        session.op_log.push(EditOp::Move { path, direction });
        Ok(())
    }

    // Validation, refresh, commit

    /// Validates every modified overlay in the session.
    pub fn validate(&self, session: &DmSession) -> Result<()> {
        let registry = self.registry_read()?;
        let mut errors = Vec::new();
        for module in session.modified_modules() {
            let schema = registry.get(&module)?;
            let info = session.overlays.get(&module).expect("modified module");
            errors.extend(validate::check(schema, &module, &info.tree));
        }
        ensure!(errors.is_empty(), error::ValidationFailedSnafu { errors });
        Ok(())
    }

    pub fn discard_changes(&self, session: &mut DmSession) {
        session.discard();
    }

    /// Re-forks each overlay whose base file has moved and replays the
    /// session's edits onto the new bases.  Conflicting entries are dropped
    /// from the log, their paths reported; non-conflicting edits survive.
    pub fn refresh_session(&self, session: &mut DmSession) -> Result<()> {
        let registry = self.registry_read()?;
        let datastore = session.datastore;

        // Find the modules whose base moved underneath a modified overlay.
        let mut replayed: HashMap<String, DataInfo> = HashMap::new();
        let modules: Vec<String> = session.overlays.keys().cloned().collect();
        for module in modules {
            let schema = registry.get(&module)?;
            let info = session.overlays.get(&module).expect("listed above");
            let current = self.files.mtime(&module, datastore)?;
            if current == info.base_mtime {
                continue;
            }
            if !info.modified {
                // No local edits; just re-fork.
                let (tree, mtime) = self.load_base(schema, datastore)?;
                session.overlays.insert(
                    module.clone(),
                    DataInfo {
                        tree,
                        base_mtime: mtime,
                        modified: false,
                    },
                );
                continue;
            }
            let (tree, mtime) = self.load_base(schema, datastore)?;
            replayed.insert(
                module,
                DataInfo {
                    tree,
                    base_mtime: mtime,
                    modified: false,
                },
            );
        }

        // Replay the log in its original order, keeping entries that still
        // apply.
        let mut conflicts = Vec::new();
        let old_log = std::mem::take(&mut session.op_log);
        for op in old_log {
            match replayed.get_mut(op.module()) {
                Some(info) => {
                    let schema = registry.get(op.module())?;
                    match apply_op(&mut info.tree, schema, &op, true) {
                        Ok(()) => {
                            info.modified = true;
                            session.op_log.push(op);
                        }
                        Err(e) => {
                            debug!("Refresh dropped conflicting edit: {}", e);
                            conflicts
                                .push(ErrorInfo::with_path(e.to_string(), op.path().to_string()));
                        }
                    }
                }
                None => session.op_log.push(op),
            }
        }
        for (module, info) in replayed {
            session.overlays.insert(module, info);
        }

        ensure!(
            conflicts.is_empty(),
            error::RefreshConflictSnafu { errors: conflicts }
        );
        Ok(())
    }

    /// The two-phase commit.  Returns the modules whose files were rewritten;
    /// the caller emits module-change notifications for them after this
    /// returns.
    pub fn commit(&self, session: &mut DmSession) -> Result<Vec<String>> {
        // Phase one: local validation, before any file I/O.
        self.validate(session)?;

        let modified = session.modified_modules();
        if modified.is_empty() {
            debug!("Commit with no modified overlays; nothing to do");
            return Ok(Vec::new());
        }

        let registry = self.registry_read()?;

        // At most one commit sequence runs at a time.
        let _guard = self.commit_guard.lock().map_err(|_| Error::Internal {
            msg: "commit guard poisoned".to_string(),
        })?;

        // Exclusive file locks on every modified module, in sorted order.
        // The guards release on every exit path below.
        let mut locked: Vec<(String, LockedDataFile)> = Vec::with_capacity(modified.len());
        for module in &modified {
            let lock = self.files.lock_exclusive(module, session.datastore)?;
            locked.push((module.clone(), lock));
        }

        // Refresh each base under its lock and replay the session's intent.
        let mut commit_trees: HashMap<String, DataTree> = HashMap::new();
        let mut replay_errors = Vec::new();
        for (module, lock) in &mut locked {
            let schema = registry.get(module)?;
            let info = session.overlays.get(module).expect("modified module");

            if let Some(base) = info.base_mtime {
                // Opening the existing file didn't touch its mtime, so an
                // unchanged timestamp means nobody committed since the fork.
                if lock.mtime()? == base {
                    commit_trees.insert(module.clone(), info.tree.clone());
                    continue;
                }
            }

            let mut tree = lock.read_tree(schema)?;
            if info.base_mtime.is_none() && tree.is_empty() {
                // Forked from nothing, and there's still nothing on disk.
                commit_trees.insert(module.clone(), info.tree.clone());
                continue;
            }

            debug!("Base of '{}' moved since fork; replaying log", module);
            for op in session.op_log.iter().filter(|op| op.module() == module) {
                if let Err(e) = apply_op(&mut tree, schema, op, true) {
                    replay_errors.push(ErrorInfo::with_path(e.to_string(), op.path().to_string()));
                }
            }
            commit_trees.insert(module.clone(), tree);
        }
        ensure!(
            replay_errors.is_empty(),
            error::ValidationFailedSnafu {
                errors: replay_errors
            }
        );

        // Re-validate: concurrent commits may have introduced merge errors.
        let mut errors = Vec::new();
        for (module, tree) in &commit_trees {
            let schema = registry.get(module)?;
            errors.extend(validate::check(schema, module, tree));
        }
        ensure!(errors.is_empty(), error::ValidationFailedSnafu { errors });

        // Write and sync every file; only now do the files change.
        for (module, lock) in &mut locked {
            let tree = commit_trees.get(module).expect("built above");
            lock.write_tree(tree)?;
        }
        info!(
            "Committed {} module(s) to {}: {}",
            modified.len(),
            session.datastore,
            modified.join(", ")
        );

        // Publish: locks drop here; the session starts clean.
        drop(locked);
        session.discard();
        Ok(modified)
    }

    // Locking

    pub fn lock_module(&self, session: &DmSession, session_id: u32, module: &str) -> Result<()> {
        ensure!(
            self.registry_read()?.contains(module),
            error::UnknownModuleSnafu { module }
        );
        self.lock_table()?
            .lock_module(session.datastore, module, session_id)
    }

    pub fn unlock_module(&self, session: &DmSession, session_id: u32, module: &str) -> Result<()> {
        ensure!(
            self.registry_read()?.contains(module),
            error::UnknownModuleSnafu { module }
        );
        self.lock_table()?
            .unlock_module(session.datastore, module, session_id)
    }

    pub fn lock_datastore(&self, session: &DmSession, session_id: u32) -> Result<()> {
        self.lock_table()?
            .lock_datastore(session.datastore, session_id)
    }

    pub fn unlock_datastore(&self, session: &DmSession, session_id: u32) -> Result<()> {
        self.lock_table()?
            .unlock_datastore(session.datastore, session_id)
    }

    /// Releases every lock a session holds; called when the session ends,
    /// including abrupt disconnects.
    pub fn release_session(&self, session_id: u32) {
        if let Ok(mut table) = self.lock_table() {
            table.release_session(session_id);
        }
    }
}

/// Applies one log entry to a tree.  During replay a set that originally
/// created its node turns strict, so a concurrently created node surfaces as
/// a conflict instead of being silently overwritten.
fn apply_op(
    tree: &mut DataTree,
    schema: &ModuleSchema,
    op: &EditOp,
    replay: bool,
) -> Result<()> {
    match op {
        EditOp::Set {
            path,
            value,
            flags,
            created,
        } => {
            let mut flags = *flags;
            if replay && *created {
                flags.strict = true;
            }
            tree.set(schema, path, value.as_ref(), flags).map(|_| ())
        }
        EditOp::Delete { path, flags } => tree.delete(schema, path, *flags).map(|_| ()),
        EditOp::Move { path, direction } => tree.move_item(schema, path, *direction),
    }
}
