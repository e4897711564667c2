//! The controller maps operations onto the data manager and the notification
//! processor, similar to the controller in the MVC model.  The dispatcher
//! calls in here after session lookup; everything returns the result payload
//! or a server error that already knows its wire code.

use snafu::ResultExt;

use super::acm::{self, AccessMode};
use super::error::{self, Error, Result};
use super::notify::{Destination, Subscription};
use super::session::Session;
use super::Engine;
use datastore::Path;
use wire::{EditFlags, EventType, MoveDirection, Response, SchemaFormat, Value};

/// The module a data path addresses; edits and reads are access-checked per
/// module.
fn module_of(path: &str, op: &'static str) -> Result<String> {
    Path::parse(path)
        .map(|p| p.module)
        .context(error::DataStoreSnafu { op })
}

fn check_access(
    engine: &Engine,
    session: &Session,
    module: &str,
    mode: AccessMode,
) -> Result<()> {
    acm::check_module_access(
        &engine.dm,
        &session.cred,
        module,
        session.dm.datastore,
        mode,
    )
}

pub(crate) fn list_schemas(engine: &Engine) -> Result<Response> {
    let schemas = engine
        .dm
        .list_schemas()
        .context(error::DataStoreSnafu { op: "list_schemas" })?;
    Ok(Response::ListSchemas { schemas })
}

pub(crate) fn get_schema(
    engine: &Engine,
    module: &str,
    revision: Option<&str>,
    submodule: Option<&str>,
    format: SchemaFormat,
) -> Result<Response> {
    let content = engine
        .dm
        .get_schema(module, revision, submodule, format)
        .context(error::DataStoreSnafu { op: "get_schema" })?;
    Ok(Response::GetSchema { content })
}

pub(crate) fn get_item(engine: &Engine, session: &mut Session, path: &str) -> Result<Response> {
    let module = module_of(path, "get_item")?;
    check_access(engine, session, &module, AccessMode::Read)?;
    let value = engine
        .dm
        .get_item(&mut session.dm, path)
        .context(error::DataStoreSnafu { op: "get_item" })?;
    Ok(Response::GetItem { value })
}

pub(crate) fn get_items(engine: &Engine, session: &mut Session, path: &str) -> Result<Response> {
    let module = module_of(path, "get_items")?;
    check_access(engine, session, &module, AccessMode::Read)?;
    let values = engine
        .dm
        .get_items(&mut session.dm, path)
        .context(error::DataStoreSnafu { op: "get_items" })?;
    Ok(Response::GetItems { values })
}

pub(crate) fn get_items_iter(
    engine: &Engine,
    session: &mut Session,
    path: &str,
    offset: usize,
    limit: usize,
) -> Result<Response> {
    let module = module_of(path, "get_items_iter")?;
    check_access(engine, session, &module, AccessMode::Read)?;
    let values = engine
        .dm
        .get_items_chunk(&mut session.dm, path, offset, limit)
        .context(error::DataStoreSnafu {
            op: "get_items_iter",
        })?;
    Ok(Response::GetItems { values })
}

pub(crate) fn set_item(
    engine: &Engine,
    session: &mut Session,
    path: &str,
    value: Option<&Value>,
    flags: EditFlags,
) -> Result<Response> {
    let module = module_of(path, "set_item")?;
    check_access(engine, session, &module, AccessMode::ReadWrite)?;
    engine
        .dm
        .set_item(&mut session.dm, path, value.map(|v| &v.data), flags)
        .context(error::DataStoreSnafu { op: "set_item" })?;
    Ok(Response::Ack)
}

pub(crate) fn delete_item(
    engine: &Engine,
    session: &mut Session,
    path: &str,
    flags: EditFlags,
) -> Result<Response> {
    let module = module_of(path, "delete_item")?;
    check_access(engine, session, &module, AccessMode::ReadWrite)?;
    engine
        .dm
        .delete_item(&mut session.dm, path, flags)
        .context(error::DataStoreSnafu { op: "delete_item" })?;
    Ok(Response::Ack)
}

pub(crate) fn move_item(
    engine: &Engine,
    session: &mut Session,
    path: &str,
    direction: MoveDirection,
) -> Result<Response> {
    let module = module_of(path, "move_item")?;
    check_access(engine, session, &module, AccessMode::ReadWrite)?;
    engine
        .dm
        .move_item(&mut session.dm, path, direction)
        .context(error::DataStoreSnafu { op: "move_item" })?;
    Ok(Response::Ack)
}

pub(crate) fn validate(engine: &Engine, session: &Session) -> Result<Response> {
    engine
        .dm
        .validate(&session.dm)
        .context(error::DataStoreSnafu { op: "validate" })?;
    Ok(Response::Ack)
}

pub(crate) fn discard_changes(engine: &Engine, session: &mut Session) -> Result<Response> {
    engine.dm.discard_changes(&mut session.dm);
    Ok(Response::Ack)
}

pub(crate) fn session_refresh(engine: &Engine, session: &mut Session) -> Result<Response> {
    engine
        .dm
        .refresh_session(&mut session.dm)
        .context(error::DataStoreSnafu {
            op: "session_refresh",
        })?;
    Ok(Response::Ack)
}

/// Commit, then hand the rewritten modules to the notification processor.
/// Events go out only after the persist step inside the commit completed.
pub(crate) fn commit(engine: &Engine, session: &mut Session) -> Result<Response> {
    let datastore = session.dm.datastore;
    for module in session.dm.modified_modules() {
        check_access(engine, session, &module, AccessMode::ReadWrite)?;
    }
    let changed = engine
        .dm
        .commit(&mut session.dm)
        .context(error::DataStoreSnafu { op: "commit" })?;
    if !changed.is_empty() {
        engine.notify.notify_module_change(&changed, datastore);
    }
    Ok(Response::Ack)
}

pub(crate) fn lock_module(engine: &Engine, session: &Session, module: &str) -> Result<Response> {
    engine
        .dm
        .lock_module(&session.dm, session.id, module)
        .context(error::DataStoreSnafu { op: "lock_module" })?;
    Ok(Response::Ack)
}

pub(crate) fn unlock_module(engine: &Engine, session: &Session, module: &str) -> Result<Response> {
    engine
        .dm
        .unlock_module(&session.dm, session.id, module)
        .context(error::DataStoreSnafu { op: "unlock_module" })?;
    Ok(Response::Ack)
}

pub(crate) fn lock_datastore(engine: &Engine, session: &Session) -> Result<Response> {
    engine
        .dm
        .lock_datastore(&session.dm, session.id)
        .context(error::DataStoreSnafu { op: "lock_datastore" })?;
    Ok(Response::Ack)
}

pub(crate) fn unlock_datastore(engine: &Engine, session: &Session) -> Result<Response> {
    engine
        .dm
        .unlock_datastore(&session.dm, session.id)
        .context(error::DataStoreSnafu {
            op: "unlock_datastore",
        })?;
    Ok(Response::Ack)
}

pub(crate) fn module_install(
    engine: &Engine,
    session: &Session,
    module: &str,
    revision: Option<&str>,
    installed: bool,
) -> Result<Response> {
    check_access(engine, session, module, AccessMode::ReadWrite)?;
    engine
        .dm
        .module_install(module, revision, installed)
        .context(error::DataStoreSnafu { op: "module_install" })?;
    engine.notify.notify_module_install(module, revision, installed);
    Ok(Response::Ack)
}

pub(crate) fn feature_enable(
    engine: &Engine,
    session: &Session,
    module: &str,
    feature: &str,
    enable: bool,
) -> Result<Response> {
    check_access(engine, session, module, AccessMode::ReadWrite)?;
    engine
        .dm
        .feature_enable(module, feature, enable)
        .context(error::DataStoreSnafu { op: "feature_enable" })?;
    engine.notify.notify_feature_enable(module, feature, enable);
    Ok(Response::Ack)
}

pub(crate) fn subscribe(
    engine: &Engine,
    event: EventType,
    dst_address: &str,
    dst_id: u32,
    module: Option<&str>,
    path: Option<&str>,
) -> Result<Response> {
    if event == EventType::ModuleChange {
        let module = module.ok_or(Error::SubscriptionModule { event })?;
        let known = engine
            .dm
            .has_module(module)
            .context(error::DataStoreSnafu { op: "subscribe" })?;
        if !known {
            return Err(Error::DataStore {
                op: "subscribe".to_string(),
                source: datastore::Error::UnknownModule {
                    module: module.to_string(),
                },
            });
        }
    }
    engine.notify.subscribe(Subscription {
        event,
        destination: Destination {
            address: dst_address.to_string(),
            id: dst_id,
        },
        module: module.map(String::from),
        path: path.map(String::from),
    })?;
    Ok(Response::Subscribe {
        subscription_id: engine.subscription_ids.allocate(),
    })
}

pub(crate) fn unsubscribe(
    engine: &Engine,
    event: EventType,
    dst_address: &str,
    dst_id: u32,
    module: Option<&str>,
) -> Result<Response> {
    engine.notify.unsubscribe(
        event,
        &Destination {
            address: dst_address.to_string(),
            id: dst_id,
        },
        module,
    )?;
    Ok(Response::Ack)
}

pub(crate) fn get_last_errors(session: &Session) -> Result<Response> {
    Ok(Response::GetLastErrors {
        errors: session.last_errors.clone(),
    })
}
