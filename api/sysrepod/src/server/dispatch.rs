//! The request processor: takes decoded requests off a connection, one at a
//! time, and dispatches them to the controller.
//!
//! Requests of one session are handled strictly in arrival order because the
//! owning connection task calls in here sequentially; concurrency exists only
//! across connections.  Each operation (except `get_last_errors`) clears the
//! session's last-error list, and a failure repopulates it before the copy
//! goes out in the response.

use log::{debug, warn};
use std::collections::HashMap;
use std::sync::Arc;

use libc::{gid_t, uid_t};

use super::controller;
use super::error::Result;
use super::session::{Session, UserCred};
use super::Engine;
use wire::{ErrorCode, ErrorInfo, Message, Request, Response};

/// Per-connection state owned by the connection task.
pub(crate) struct ConnState {
    pub peer_uid: uid_t,
    pub peer_gid: gid_t,
    pub sessions: HashMap<u32, Session>,
}

impl ConnState {
    pub fn new(peer_uid: uid_t, peer_gid: gid_t) -> Self {
        Self {
            peer_uid,
            peer_gid,
            sessions: HashMap::new(),
        }
    }

    /// Ends every session of the connection, releasing held locks.  Called on
    /// disconnect, orderly or not.
    pub fn drop_sessions(&mut self, engine: &Engine) {
        for (id, _session) in self.sessions.drain() {
            debug!("Dropping session {} with its connection", id);
            engine.dm.release_session(id);
        }
    }
}

fn unknown_session(session_id: u32) -> Message {
    Message::error_response(
        session_id,
        ErrorCode::InvalArg,
        vec![ErrorInfo::new(format!("unknown session {}", session_id))],
    )
}

/// Handles one request and produces the response message for it.
pub(crate) fn handle_request(
    engine: &Arc<Engine>,
    conn: &mut ConnState,
    session_id: u32,
    op: Request,
) -> Message {
    debug!("Handling {} for session {}", op.name(), session_id);
    match op {
        Request::SessionStart {
            datastore,
            effective_user,
        } => {
            let cred = match effective_user {
                Some(user) => UserCred::with_effective(conn.peer_uid, conn.peer_gid, &user),
                None => Ok(UserCred::from_peer(conn.peer_uid, conn.peer_gid)),
            };
            match cred {
                Ok(cred) => {
                    let id = engine.ids.allocate();
                    conn.sessions.insert(id, Session::new(id, cred, datastore));
                    Message::ok_response(id, Response::SessionStart { session_id: id })
                }
                Err(e) => {
                    warn!("Refused session start: {}", e);
                    Message::error_response(0, e.code(), e.details())
                }
            }
        }

        Request::SessionStop => match conn.sessions.remove(&session_id) {
            Some(_session) => {
                engine.dm.release_session(session_id);
                debug!("Session {} stopped", session_id);
                Message::ok_response(session_id, Response::Ack)
            }
            None => unknown_session(session_id),
        },

        op => {
            let session = match conn.sessions.get_mut(&session_id) {
                Some(session) => session,
                None => return unknown_session(session_id),
            };
            if !matches!(op, Request::GetLastErrors) {
                session.last_errors.clear();
            }
            match route(engine, session, op) {
                Ok(result) => Message::ok_response(session_id, result),
                Err(e) => {
                    let details = e.details();
                    session.last_errors = details.clone();
                    Message::error_response(session_id, e.code(), details)
                }
            }
        }
    }
}

/// One arm per operation; the compiler keeps this exhaustive as the surface
/// grows.
fn route(engine: &Arc<Engine>, session: &mut Session, op: Request) -> Result<Response> {
    match op {
        Request::SessionStart { .. } | Request::SessionStop => {
            unreachable!("session lifecycle handled by the caller")
        }

        Request::SessionRefresh => controller::session_refresh(engine, session),
        Request::ListSchemas => controller::list_schemas(engine),
        Request::GetSchema {
            module,
            revision,
            submodule,
            format,
        } => controller::get_schema(
            engine,
            &module,
            revision.as_deref(),
            submodule.as_deref(),
            format,
        ),

        Request::GetItem { path } => controller::get_item(engine, session, &path),
        Request::GetItems { path } => controller::get_items(engine, session, &path),
        Request::GetItemsIter {
            path,
            offset,
            limit,
        } => controller::get_items_iter(engine, session, &path, offset, limit),

        Request::SetItem { path, value, flags } => {
            controller::set_item(engine, session, &path, value.as_ref(), flags)
        }
        Request::DeleteItem { path, flags } => {
            controller::delete_item(engine, session, &path, flags)
        }
        Request::MoveItem { path, direction } => {
            controller::move_item(engine, session, &path, direction)
        }

        Request::Validate => controller::validate(engine, session),
        Request::Commit => controller::commit(engine, session),
        Request::DiscardChanges => controller::discard_changes(engine, session),

        Request::LockModule { module } => controller::lock_module(engine, session, &module),
        Request::UnlockModule { module } => controller::unlock_module(engine, session, &module),
        Request::LockDatastore => controller::lock_datastore(engine, session),
        Request::UnlockDatastore => controller::unlock_datastore(engine, session),

        Request::ModuleInstall {
            module,
            revision,
            installed,
        } => controller::module_install(engine, session, &module, revision.as_deref(), installed),
        Request::FeatureEnable {
            module,
            feature,
            enable,
        } => controller::feature_enable(engine, session, &module, &feature, enable),

        Request::Subscribe {
            event,
            dst_address,
            dst_id,
            module,
            path,
        } => controller::subscribe(
            engine,
            event,
            &dst_address,
            dst_id,
            module.as_deref(),
            path.as_deref(),
        ),
        Request::Unsubscribe {
            event,
            dst_address,
            dst_id,
            module,
        } => controller::unsubscribe(engine, event, &dst_address, dst_id, module.as_deref()),

        Request::GetLastErrors => controller::get_last_errors(session),
    }
}
