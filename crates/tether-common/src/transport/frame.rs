//! NUL-delimited framing.
//!
//! Every message on a Tether connection is a serialized payload followed by a
//! single `0x00` byte. [`FrameCodec`] plugs into `tokio_util::codec::Framed`
//! and yields one payload (delimiter stripped) per frame.

use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::protocol::error::TetherError;

/// Byte that terminates every frame.
pub const FRAME_DELIMITER: u8 = 0x00;

/// Default maximum payload size in bytes, excluding the delimiter.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 8192;

/// Frame codec for NUL-terminated payloads.
///
/// # Limits
///
/// A payload longer than `max_frame_size` fails the decoder with
/// [`TetherError::FrameTooLarge`], whether or not its delimiter has arrived
/// yet. The connection is expected to be closed after that error.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_size: usize,
    /// Bytes of the buffer already scanned without finding a delimiter
    next_index: usize,
}

impl FrameCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            max_frame_size,
            next_index: 0,
        }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl Decoder for FrameCodec {
    type Item = BytesMut;
    type Error = TetherError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            // A buffer shorter than the last scan is a different buffer
            if self.next_index > src.len() {
                self.next_index = 0;
            }
            let start = self.next_index;
            let found = src[start..]
                .iter()
                .position(|b| *b == FRAME_DELIMITER)
                .map(|offset| start + offset);

            match found {
                Some(end) => {
                    self.next_index = 0;
                    if end > self.max_frame_size {
                        return Err(TetherError::FrameTooLarge {
                            size: end,
                            max: self.max_frame_size,
                        });
                    }

                    let mut frame = src.split_to(end + 1);
                    frame.truncate(end);
                    if frame.is_empty() {
                        // Stray delimiter between frames
                        continue;
                    }
                    return Ok(Some(frame));
                }
                None => {
                    if src.len() > self.max_frame_size {
                        self.next_index = 0;
                        return Err(TetherError::FrameTooLarge {
                            size: src.len(),
                            max: self.max_frame_size,
                        });
                    }
                    self.next_index = src.len();
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => {
                self.next_index = 0;
                Err(TetherError::InvalidFrame(format!(
                    "connection closed with {} bytes of an unterminated frame",
                    src.len()
                )))
            }
        }
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = TetherError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.len() > self.max_frame_size {
            return Err(TetherError::FrameTooLarge {
                size: item.len(),
                max: self.max_frame_size,
            });
        }

        dst.reserve(item.len() + 1);
        dst.put_slice(&item);
        dst.put_u8(FRAME_DELIMITER);
        Ok(())
    }
}
