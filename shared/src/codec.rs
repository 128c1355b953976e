//! Length-prefixed codec for stored chat history documents
//!
//! A history document is stored as:
//! ```text
//! [ 4 bytes: length (u32, big-endian) ][ N bytes: protobuf ChatHistory ]
//! ```
//!
//! The prefix lets a reader tell a truncated write apart from a short history.

use bytes::{BufMut, Bytes, BytesMut};
use prost::Message;
use thiserror::Error;

use crate::ChatHistory;

/// Maximum document size (4 MB)
pub const MAX_DOCUMENT_SIZE: u32 = 4 * 1024 * 1024;

/// Errors that can occur during encoding/decoding
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Document too large: {0} bytes (max: {MAX_DOCUMENT_SIZE})")]
    DocumentTooLarge(usize),

    #[error("Invalid document length prefix: {0}")]
    InvalidLength(u32),

    #[error("Not enough data: need {needed} bytes, have {available}")]
    NotEnoughData { needed: usize, available: usize },

    #[error("Unexpected {0} trailing bytes after document")]
    TrailingBytes(usize),

    #[error("Protobuf decode error: {0}")]
    DecodeError(#[from] prost::DecodeError),

    #[error("Protobuf encode error: {0}")]
    EncodeError(#[from] prost::EncodeError),
}

/// Encode a history document into a length-prefixed byte buffer
pub fn encode(history: &ChatHistory) -> Result<Bytes, CodecError> {
    let doc_len = history.encoded_len();

    if doc_len > MAX_DOCUMENT_SIZE as usize {
        return Err(CodecError::DocumentTooLarge(doc_len));
    }

    let mut buf = BytesMut::with_capacity(4 + doc_len);
    buf.put_u32(doc_len as u32);
    history.encode(&mut buf)?;

    Ok(buf.freeze())
}

/// Decode a complete length-prefixed history document
///
/// An empty buffer decodes to an empty history.
pub fn decode(buf: &[u8]) -> Result<ChatHistory, CodecError> {
    if buf.is_empty() {
        return Ok(ChatHistory::default());
    }

    if buf.len() < 4 {
        return Err(CodecError::NotEnoughData {
            needed: 4,
            available: buf.len(),
        });
    }

    let doc_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if doc_len > MAX_DOCUMENT_SIZE {
        return Err(CodecError::InvalidLength(doc_len));
    }

    let total_len = 4 + doc_len as usize;
    if buf.len() < total_len {
        return Err(CodecError::NotEnoughData {
            needed: total_len,
            available: buf.len(),
        });
    }
    if buf.len() > total_len {
        return Err(CodecError::TrailingBytes(buf.len() - total_len));
    }

    Ok(ChatHistory::decode(&buf[4..total_len])?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_history() -> ChatHistory {
        let mut history = ChatHistory::default();
        history.push_outgoing("are you there?");
        history.push_incoming("Pixel", "yes");
        history
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let original = create_test_history();

        let encoded = encode(&original).expect("encode failed");

        let len_prefix = u32::from_be_bytes([encoded[0], encoded[1], encoded[2], encoded[3]]);
        assert_eq!(len_prefix as usize, encoded.len() - 4);

        let decoded = decode(&encoded).expect("decode failed");
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_empty_buffer_is_empty_history() {
        let decoded = decode(&[]).expect("decode failed");
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_truncated_document() {
        let encoded = encode(&create_test_history()).expect("encode failed");

        let result = decode(&encoded[..encoded.len() - 3]);
        assert!(matches!(result, Err(CodecError::NotEnoughData { .. })));

        let result = decode(&encoded[..2]);
        assert!(matches!(
            result,
            Err(CodecError::NotEnoughData {
                needed: 4,
                available: 2
            })
        ));
    }

    #[test]
    fn test_trailing_bytes() {
        let mut buf = encode(&create_test_history()).expect("encode failed").to_vec();
        buf.extend_from_slice(&[0, 0]);

        assert!(matches!(decode(&buf), Err(CodecError::TrailingBytes(2))));
    }

    #[test]
    fn test_document_too_large() {
        let mut buf = BytesMut::new();
        buf.put_u32(MAX_DOCUMENT_SIZE + 1);
        buf.put_bytes(0, 100);

        let result = decode(&buf);
        assert!(matches!(result, Err(CodecError::InvalidLength(_))));
    }
}
