/*!
# Background

This library defines the wire contract between the configuration engine and its
clients: the flat error taxonomy, the typed value carrier used for data items,
the tagged message union exchanged over the engine's unix socket, and the
length-prefix framing codec.

Every message on the socket is `[4-byte big-endian length N][N bytes payload]`
with `N` capped at [`MAX_MSG_SIZE`].  The payload is a JSON encoding of
[`Message`]; decoding tolerates unknown fields so older engines can talk to
newer clients and vice versa.

The engine and the client library both depend on this crate; nothing in here
touches the filesystem or the schema context.
*/

pub mod codec;
pub mod error;
pub mod message;
pub mod value;

pub use codec::{MessageCodec, MAX_MSG_SIZE};
pub use error::{ErrorCode, ErrorInfo};
pub use message::{
    Datastore, EditFlags, EventType, Message, MoveDirection, Notification, Request, Response,
    SchemaFormat, SchemaInfo, SubmoduleInfo,
};
pub use value::{Value, ValueData};
