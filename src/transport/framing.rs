//! Message boundary framing.
//!
//! Version 1.0 (RFC 4742) terminates each message with `]]>]]>`.
//! Version 1.1 (RFC 6242) splits each message into chunks:
//!
//! ```text
//! \n#<chunk-size>\n<chunk-data> ... \n##\n
//! ```
//!
//! where `chunk-size` is a decimal in `1..=4294967295` with no leading zero.
//! Decoding is incremental: bytes may arrive split at any point and are
//! buffered until a whole message is available.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::FramingVersion;
use crate::error::{NetconfError, Result};

/// 1.0 end-of-message delimiter
pub const END_OF_MESSAGE: &[u8] = b"]]>]]>";

/// 1.1 end-of-chunks marker
pub const END_OF_CHUNKS: &[u8] = b"\n##\n";

/// Largest chunk size allowed by RFC 6242
pub const MAX_CHUNK_SIZE: u64 = 4_294_967_295;

/// Digits in `MAX_CHUNK_SIZE`
const MAX_CHUNK_DIGITS: usize = 10;

/// Encoder/decoder for both framing versions.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    /// Largest message accepted when decoding
    max_message_size: usize,
    /// Largest chunk emitted when encoding 1.1
    max_chunk_size: usize,
    /// Chunk data of the 1.1 message being reassembled
    partial: BytesMut,
}

impl FrameCodec {
    /// Create a codec with the given limits
    pub fn new(max_message_size: usize, max_chunk_size: usize) -> Self {
        Self {
            max_message_size,
            max_chunk_size: max_chunk_size.clamp(1, MAX_CHUNK_SIZE as usize),
            partial: BytesMut::new(),
        }
    }

    /// Frame `message` into `dst`
    pub fn encode(&self, version: FramingVersion, message: &[u8], dst: &mut BytesMut) {
        match version {
            FramingVersion::V1_0 => {
                dst.reserve(message.len() + END_OF_MESSAGE.len());
                dst.put_slice(message);
                dst.put_slice(END_OF_MESSAGE);
            },
            FramingVersion::V1_1 => {
                for chunk in message.chunks(self.max_chunk_size) {
                    dst.put_slice(format!("\n#{}\n", chunk.len()).as_bytes());
                    dst.put_slice(chunk);
                }
                dst.put_slice(END_OF_CHUNKS);
            },
        }
    }

    /// Take the next complete message out of `src`, if one is buffered.
    ///
    /// On error the buffered bytes are discarded so the next call starts
    /// from fresh input.
    pub fn decode(&mut self, version: FramingVersion, src: &mut BytesMut) -> Result<Option<Bytes>> {
        let result = match version {
            FramingVersion::V1_0 => self.decode_eom(src),
            FramingVersion::V1_1 => self.decode_chunked(src),
        };
        if result.is_err() {
            src.clear();
            self.partial.clear();
        }
        result
    }

    fn decode_eom(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        match find(src, END_OF_MESSAGE) {
            Some(pos) => {
                if pos > self.max_message_size {
                    return Err(self.too_large(pos));
                }
                let message = src.split_to(pos).freeze();
                src.advance(END_OF_MESSAGE.len());
                Ok(Some(message))
            },
            None if src.len() > self.max_message_size + END_OF_MESSAGE.len() => {
                Err(self.too_large(src.len()))
            },
            None => Ok(None),
        }
    }

    fn decode_chunked(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        loop {
            if src.len() < 3 {
                return Ok(None);
            }
            if src[0] != b'\n' || src[1] != b'#' {
                return Err(NetconfError::Framing(format!(
                    "Expected chunk header, found {:?}",
                    String::from_utf8_lossy(&src[..src.len().min(16)])
                )));
            }

            if src[2] == b'#' {
                if src.len() < END_OF_CHUNKS.len() {
                    return Ok(None);
                }
                if src[3] != b'\n' {
                    return Err(NetconfError::Framing("Malformed end-of-chunks marker".to_string()));
                }
                src.advance(END_OF_CHUNKS.len());
                if self.partial.is_empty() {
                    return Err(NetconfError::Framing("Message with no chunks".to_string()));
                }
                return Ok(Some(self.partial.split().freeze()));
            }

            let digits_end = match src[2..].iter().position(|b| *b == b'\n') {
                Some(offset) => 2 + offset,
                None if src.len() - 2 > MAX_CHUNK_DIGITS => {
                    return Err(NetconfError::Framing("Chunk size too long".to_string()));
                },
                None => return Ok(None),
            };
            let size = parse_chunk_size(&src[2..digits_end])?;

            let header_len = digits_end + 1;
            if self.partial.len() + size > self.max_message_size {
                return Err(self.too_large(self.partial.len() + size));
            }
            if src.len() < header_len + size {
                return Ok(None);
            }

            src.advance(header_len);
            let chunk = src.split_to(size);
            self.partial.extend_from_slice(&chunk);
        }
    }

    fn too_large(&self, size: usize) -> NetconfError {
        NetconfError::Framing(format!(
            "Message of {} bytes exceeds limit of {}",
            size, self.max_message_size
        ))
    }
}

fn parse_chunk_size(digits: &[u8]) -> Result<usize> {
    let valid = !digits.is_empty()
        && digits.len() <= MAX_CHUNK_DIGITS
        && digits[0] != b'0'
        && digits.iter().all(u8::is_ascii_digit);
    if !valid {
        return Err(NetconfError::Framing(format!(
            "Invalid chunk size {:?}",
            String::from_utf8_lossy(digits)
        )));
    }

    let size: u64 = digits
        .iter()
        .fold(0u64, |acc, d| acc * 10 + u64::from(d - b'0'));
    if size > MAX_CHUNK_SIZE {
        return Err(NetconfError::Framing(format!("Chunk size {} out of range", size)));
    }
    usize::try_from(size).map_err(|_| NetconfError::Framing(format!("Chunk size {} out of range", size)))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
