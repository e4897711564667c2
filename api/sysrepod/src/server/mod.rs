//! The server module owns the engine handle and the accept loop.  It wires
//! accepted connections to the dispatcher, which talks to the data manager
//! and the notification processor.

mod acm;
mod connection;
mod controller;
mod dispatch;
mod error;
mod notify;
mod session;

pub use error::Error;
pub use session::UserCred;

use libc::uid_t;
use log::{info, warn};
use snafu::ResultExt;
use std::fs::{set_permissions, Permissions};
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::net::UnixListener;
use tokio::sync::watch;

use datastore::DataManager;
use error::Result;
use notify::NotificationProcessor;
use session::SessionIds;

/// Counter for subscription handles returned by `subscribe`.
#[derive(Debug, Default)]
pub(crate) struct SubscriptionIds {
    next: AtomicU32,
}

impl SubscriptionIds {
    pub(crate) fn allocate(&self) -> u32 {
        self.next.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// The engine handle: all global state, created at init and threaded through
/// every call.  No free-standing singletons.
pub struct Engine {
    pub(crate) dm: DataManager,
    pub(crate) ids: SessionIds,
    pub(crate) subscription_ids: SubscriptionIds,
    pub(crate) notify: Arc<NotificationProcessor>,
    /// When set, only peers with this uid may connect (embedded/local mode).
    pub(crate) local_uid: Option<uid_t>,
}

impl Engine {
    /// Builds the engine: loads schemas, seeds datastore files, restores
    /// durable subscriptions.
    pub fn new<P1, P2>(schema_dir: P1, data_dir: P2, local_uid: Option<uid_t>) -> Result<Arc<Self>>
    where
        P1: AsRef<Path>,
        P2: AsRef<Path>,
    {
        let dm = DataManager::init(schema_dir, data_dir).context(error::InitSnafu)?;
        let notify = Arc::new(NotificationProcessor::new(dm.persist_files().clone()));
        let modules = dm.module_names().context(error::InitSnafu)?;
        notify.restore(&modules)?;

        Ok(Arc::new(Engine {
            dm,
            ids: SessionIds::new(),
            subscription_ids: SubscriptionIds::default(),
            notify,
            local_uid,
        }))
    }
}

/// Binds the engine socket and serves until the shutdown channel flips.
///
/// The socket is world-connectable (peer authentication relies on socket
/// credentials, and access control gates the data), so its permissions are
/// opened up after the bind.
pub async fn serve<P1, P2, P3>(
    socket_path: P1,
    schema_dir: P2,
    data_dir: P3,
    local_uid: Option<uid_t>,
    shutdown: watch::Receiver<bool>,
) -> Result<()>
where
    P1: Into<PathBuf>,
    P2: AsRef<Path>,
    P3: AsRef<Path>,
{
    let socket_path = socket_path.into();
    let engine = Engine::new(schema_dir, data_dir, local_uid)?;

    // A previous instance may have left its socket behind.
    match std::fs::remove_file(&socket_path) {
        Ok(()) => info!("Removed stale socket {}", socket_path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(e).context(error::RemoveSocketSnafu { path: socket_path });
        }
    }

    let listener = UnixListener::bind(&socket_path).context(error::BindSocketSnafu {
        path: &socket_path,
    })?;
    set_permissions(&socket_path, Permissions::from_mode(0o666)).context(
        error::SetPermissionsSnafu {
            path: &socket_path,
        },
    )?;
    info!("Listening on {}", socket_path.display());

    let mut accept_shutdown = shutdown.clone();
    loop {
        tokio::select! {
            _ = accept_shutdown.changed() => {
                info!("Stop requested; leaving accept loop");
                break;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _addr)) => {
                        let engine = Arc::clone(&engine);
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            if let Err(e) =
                                connection::handle_connection(engine, stream, shutdown).await
                            {
                                warn!("Connection ended with error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        warn!("Error accepting connection: {}", e);
                    }
                }
            }
        }
    }

    // Connection tasks observe the same shutdown channel and unwind on their
    // own; removing the socket stops new clients immediately.
    let _ = std::fs::remove_file(&socket_path);
    info!("Server stopped");
    Ok(())
}
