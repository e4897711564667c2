/*!
# Background

This is the server half of the configuration engine: it listens on a unix
stream socket, frames and decodes client messages, runs each session's
requests in order against the data manager, and pushes notifications to
subscriber destinations.

Peer authentication relies on socket peer credentials; a session may assume a
different effective user only when the peer is root.  Access to data is gated
by the filesystem permissions of the per-module data files.

The [`serve`] entry point runs the accept loop until a shutdown signal flips
the watch channel it was given; the `sysrepod` binary wires that to
SIGTERM/SIGINT and a pidfile.
*/

pub mod server;

pub use server::{serve, Engine};
