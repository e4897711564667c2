//! Per-connection I/O: peer credential checks, framed reads, and the writer
//! task that serialises responses and notifications onto the socket.
//!
//! Each accepted socket gets one task running [`handle_connection`].  The
//! framed read half feeds the dispatcher one request at a time (preserving
//! per-session order); the write half drains an unbounded channel so that
//! producing a response never blocks on a slow peer.  A decode error or an
//! oversize frame closes the connection without touching engine state.

use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use snafu::ResultExt;
use std::sync::Arc;
use tokio::net::UnixStream;
use tokio::sync::{mpsc, watch};
use tokio_util::codec::Framed;

use super::dispatch::{self, ConnState};
use super::error::{self, Result};
use super::Engine;
use wire::{Message, MessageCodec};

pub(crate) async fn handle_connection(
    engine: Arc<Engine>,
    stream: UnixStream,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let peer = stream.peer_cred().context(error::PeerCredSnafu)?;
    let (peer_uid, peer_gid) = (peer.uid(), peer.gid());

    // In local mode only the engine's own user may connect; anyone else is
    // dropped before a single byte is read.
    if let Some(local_uid) = engine.local_uid {
        if peer_uid != local_uid {
            warn!("Closing connection from uid {} in local mode", peer_uid);
            return error::LocalPeerMismatchSnafu { uid: peer_uid }.fail();
        }
    }
    debug!("Accepted connection from uid {} gid {}", peer_uid, peer_gid);

    let framed = Framed::new(stream, MessageCodec::new());
    let (mut sink, mut requests) = framed.split();

    // Writer task: everything outbound funnels through one channel so the
    // dispatcher never awaits socket writes.
    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
    let writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if let Err(e) = sink.send(message).await {
                debug!("Write side closed: {}", e);
                break;
            }
        }
    });

    let mut conn = ConnState::new(peer_uid, peer_gid);
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("Shutdown: closing connection of uid {}", peer_uid);
                break;
            }
            frame = requests.next() => {
                match frame {
                    None => {
                        debug!("Peer uid {} disconnected", peer_uid);
                        break;
                    }
                    Some(Err(e)) => {
                        // Framing or decode failure is fatal for the
                        // connection only; engine state is untouched.
                        warn!("Closing connection of uid {}: {}", peer_uid, e);
                        break;
                    }
                    Some(Ok(Message::Request { session_id, op })) => {
                        let response =
                            dispatch::handle_request(&engine, &mut conn, session_id, op);
                        if outbound.send(response).is_err() {
                            break;
                        }
                    }
                    Some(Ok(other)) => {
                        warn!(
                            "Peer uid {} sent a non-request message; closing",
                            peer_uid
                        );
                        drop(other);
                        let _ = outbound.send(Message::error_response(
                            0,
                            wire::ErrorCode::MalformedMsg,
                            vec![wire::ErrorInfo::new("expected a request message")],
                        ));
                        break;
                    }
                }
            }
        }
    }

    // A disconnect cancels only still-queued work; anything in flight already
    // ran to completion above.  Locks and overlays of the sessions go away.
    conn.drop_sessions(&engine);
    drop(outbound);
    let _ = writer.await;
    Ok(())
}
