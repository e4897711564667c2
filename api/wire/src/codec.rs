//! Length-prefix framing for [`Message`]s on a stream socket.
//!
//! Wire format: `[u32 big-endian length N][N bytes JSON payload]`.  `N` must
//! be between 1 and [`MAX_MSG_SIZE`]; an oversize length is a protocol error
//! surfaced before the body is read, and the connection must be closed.
//! Partial reads are handled by the codec state machine, so a message split
//! across arbitrary chunk boundaries decodes identically to an undivided
//! delivery.

use bytes::{Buf, BufMut, BytesMut};
use log::trace;
use snafu::{ensure, ResultExt, Snafu};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

use crate::message::Message;

/// Default cap on the framed payload size: 256 KiB.
pub const MAX_MSG_SIZE: usize = 262_144;

const LENGTH_PREFIX_SIZE: usize = 4;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Frame length {} exceeds maximum {}", length, max))]
    FrameTooLarge { length: usize, max: usize },

    #[snafu(display("Frame length may not be zero"))]
    EmptyFrame,

    #[snafu(display("Unable to decode message payload: {}", source))]
    Decode { source: serde_json::Error },

    #[snafu(display("Unable to encode message payload: {}", source))]
    Encode { source: serde_json::Error },

    #[snafu(display("I/O error on framed stream: {}", source))]
    #[snafu(context(false))]
    Io { source: io::Error },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Codec turning a byte stream into [`Message`]s and back.
#[derive(Debug, Clone)]
pub struct MessageCodec {
    max_size: usize,
}

impl MessageCodec {
    pub fn new() -> Self {
        Self {
            max_size: MAX_MSG_SIZE,
        }
    }

    /// A codec with a non-default size cap; used by tests and embedding
    /// clients that want a tighter bound.
    pub fn with_max_size(max_size: usize) -> Self {
        Self { max_size }
    }
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>> {
        if src.len() < LENGTH_PREFIX_SIZE {
            // Not enough for the length prefix yet.
            return Ok(None);
        }

        let mut length_bytes = [0u8; LENGTH_PREFIX_SIZE];
        length_bytes.copy_from_slice(&src[..LENGTH_PREFIX_SIZE]);
        let length = u32::from_be_bytes(length_bytes) as usize;

        // Check the cap before waiting for (or allocating) the body; an
        // oversize frame is fatal for the connection.
        ensure!(
            length <= self.max_size,
            FrameTooLargeSnafu {
                length,
                max: self.max_size
            }
        );
        ensure!(length > 0, EmptyFrameSnafu);

        if src.len() < LENGTH_PREFIX_SIZE + length {
            // The full frame hasn't arrived; reserve what we know we need.
            src.reserve(LENGTH_PREFIX_SIZE + length - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX_SIZE);
        let body = src.split_to(length);
        trace!("Decoded frame of {} bytes", length);

        let message = serde_json::from_slice(&body).context(DecodeSnafu)?;
        Ok(Some(message))
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = Error;

    fn encode(&mut self, message: Message, dst: &mut BytesMut) -> Result<()> {
        let body = serde_json::to_vec(&message).context(EncodeSnafu)?;
        ensure!(
            body.len() <= self.max_size,
            FrameTooLargeSnafu {
                length: body.len(),
                max: self.max_size
            }
        );

        dst.reserve(LENGTH_PREFIX_SIZE + body.len());
        dst.put_u32(body.len() as u32);
        dst.extend_from_slice(&body);
        Ok(())
    }
}
