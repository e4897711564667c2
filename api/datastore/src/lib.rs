/*!
# Background

This library is the data half of the configuration engine: it owns the schema
context, the per-module data trees, the per-session working copies, and the
files everything persists to.

Modules are described in YANG (the subset in [`schema::parse`]); their data
lives in one tree per module per datastore (`startup`, `running`,
`candidate`), addressed with paths like
`/module:container/list[key='value']/leaf`.

# Sessions and commits

Every editing session works on private overlays forked lazily from the
backing files, recording each edit in an operation log.  [`DataManager::commit`]
runs the two-phase sequence: validate, take the engine-wide commit guard, lock
every modified module's file, replay the log onto freshly read bases, validate
again, then rewrite and sync the files.  Either all of a session's modified
modules are updated, or none.

# Persistence

Data files hold the serialised trees; `{module}.persist` files hold enabled
features and durable subscriptions.  Both are read and written under advisory
file locks (shared for readers, exclusive for writers).
*/

pub mod datafile;
pub mod error;
pub mod locks;
pub mod manager;
pub mod path;
pub mod persist;
pub mod schema;
pub mod session;
pub mod tree;
pub mod validate;

pub use error::{Error, Result};
pub use manager::DataManager;
pub use path::Path;
pub use persist::{PersistData, PersistFiles, PersistedSubscription};
pub use session::{DataInfo, DmSession, EditOp};
pub use tree::DataTree;
