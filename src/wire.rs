//! # Wire Protocol
//!
//! Every socket in the mesh speaks the same framing: a 1-byte tag, the
//! payload length in decimal ASCII, a single `#` delimiter, then exactly
//! `length` payload bytes. The framing layer ([`Frame`]) carries opaque
//! bytes; the typed layer ([`Message`]) maps each tag to its payload
//! encoding.
//!
//! ## Tags
//!
//! | Tag | Byte | Payload |
//! |-----|------|---------|
//! | `Verify` | `V` | UTF-8 identity string |
//! | `Heartbeat` | `H` | empty |
//! | `Host` | `N` | UTF-8 host string |
//! | `ReplicaStore` | `S` | bincode [`ReplicaChunk`] |
//! | `ReplicaRequest` | `R` | bincode [`ReplicaFetch`] |
//! | `Delete` | `D` | UTF-8 filename |
//! | `CatalogSync` | `C` | bincode `Vec<FileRecord>` |
//! | `IdList` | `I` | bincode `Vec<String>` |
//!
//! ## Malformed frames
//!
//! A length field longer than [`MAX_LENGTH_DIGITS`] digits, a non-digit
//! before the delimiter, an unknown tag byte, or a stream that ends before
//! the payload completes are all protocol errors. The connection is torn
//! down; no attempt is made to resynchronize mid-stream.
//!
//! Structured payloads are serialized with plain bincode and decoded through
//! a size-limited deserializer so a hostile peer cannot trigger huge
//! allocations with a small message. The limit applies only to decoding;
//! outbound encoding is never clamped.

use bincode::Options;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::catalog::FileRecord;

/// Byte separating the decimal length field from the payload.
pub const DELIMITER: u8 = b'#';

/// Maximum digits in the length field. More than this without a delimiter
/// means the frame is malformed and the connection must be closed.
pub const MAX_LENGTH_DIGITS: usize = 10;

/// Step size for reading frame payloads. Bounds the allocation made before
/// any payload byte has actually arrived.
const PAYLOAD_READ_CHUNK: usize = 64 * 1024;

/// Largest replica payload carried in one frame (64 MiB). Enforced at upload
/// time; oversize files are refused to the caller, never truncated.
pub const MAX_REPLICA_BYTES: usize = 64 * 1024 * 1024;

/// Maximum buffer size for bincode deserialization of structured payloads.
/// Slightly larger than [`MAX_REPLICA_BYTES`] to allow for message framing
/// overhead.
/// SECURITY: bounds allocation from untrusted length prefixes inside bincode.
pub const MAX_DESERIALIZE_SIZE: u64 = (MAX_REPLICA_BYTES as u64) + 4096;

/// Returns bincode options with the size limit enforced.
/// SECURITY: always use this for deserialization, never for serialization.
fn bincode_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_limit(MAX_DESERIALIZE_SIZE)
        .with_fixint_encoding()
}

fn deserialize_bounded<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, WireError> {
    // `Options::deserialize` on a slice ignores `with_limit` (bincode swaps in
    // an infinite bound for in-memory input); the reader path enforces it.
    bincode_options()
        .deserialize_from(bytes)
        .map_err(|e| WireError::BadPayload(e.to_string()))
}

/// Plain bincode here: the size limit guards deserialization of untrusted
/// bytes; a limit on our own encoder would truncate outbound frames.
fn serialize_payload<T: Serialize>(value: &T) -> Result<Vec<u8>, WireError> {
    bincode::serialize(value).map_err(|e| WireError::Serialize(e.to_string()))
}

// ============================================================================
// Errors
// ============================================================================

/// Decoding failures. `Io` is a transport error; everything else is a
/// protocol error and must terminate the connection.
#[derive(Debug)]
pub enum WireError {
    /// Underlying read failed or the stream ended mid-frame.
    Io(std::io::Error),
    /// Tag byte is not part of the closed tag set.
    UnknownTag(u8),
    /// Length field exceeded [`MAX_LENGTH_DIGITS`] digits.
    LengthOverflow,
    /// Length field contained a non-digit byte before the delimiter.
    BadLength(u8),
    /// Payload did not decode as the tag's expected encoding.
    BadPayload(String),
    /// A local value failed to serialize for sending.
    Serialize(String),
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WireError::Io(e) => write!(f, "transport error: {e}"),
            WireError::UnknownTag(b) => write!(f, "unknown message tag byte 0x{b:02x}"),
            WireError::LengthOverflow => {
                write!(f, "length field exceeds {MAX_LENGTH_DIGITS} digits")
            }
            WireError::BadLength(b) => write!(f, "invalid byte 0x{b:02x} in length field"),
            WireError::BadPayload(e) => write!(f, "payload decode failed: {e}"),
            WireError::Serialize(e) => write!(f, "payload encode failed: {e}"),
        }
    }
}

impl std::error::Error for WireError {}

impl From<std::io::Error> for WireError {
    fn from(e: std::io::Error) -> Self {
        WireError::Io(e)
    }
}

impl WireError {
    /// True for errors that indicate a misbehaving peer rather than a dead
    /// transport. Both terminate the connection, but they are logged apart.
    /// `Serialize` is a send-side failure and blames neither.
    pub fn is_protocol_error(&self) -> bool {
        !matches!(self, WireError::Io(_) | WireError::Serialize(_))
    }
}

// ============================================================================
// Tags and frames
// ============================================================================

/// Closed set of wire message tags.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Tag {
    Verify,
    Heartbeat,
    Host,
    ReplicaStore,
    ReplicaRequest,
    Delete,
    CatalogSync,
    IdList,
}

impl Tag {
    pub fn byte(self) -> u8 {
        match self {
            Tag::Verify => b'V',
            Tag::Heartbeat => b'H',
            Tag::Host => b'N',
            Tag::ReplicaStore => b'S',
            Tag::ReplicaRequest => b'R',
            Tag::Delete => b'D',
            Tag::CatalogSync => b'C',
            Tag::IdList => b'I',
        }
    }

    pub fn from_byte(b: u8) -> Option<Tag> {
        match b {
            b'V' => Some(Tag::Verify),
            b'H' => Some(Tag::Heartbeat),
            b'N' => Some(Tag::Host),
            b'S' => Some(Tag::ReplicaStore),
            b'R' => Some(Tag::ReplicaRequest),
            b'D' => Some(Tag::Delete),
            b'C' => Some(Tag::CatalogSync),
            b'I' => Some(Tag::IdList),
            _ => None,
        }
    }
}

/// One framed wire message: a tag and an opaque payload.
///
/// Round-trip through [`Frame::encode`] and [`Frame::read`] is lossless for
/// arbitrary binary payloads, including empty ones.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub tag: Tag,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(tag: Tag, payload: Vec<u8>) -> Self {
        Self { tag, payload }
    }

    /// Encode as `tag` + decimal ASCII length + `#` + payload.
    pub fn encode(&self) -> Vec<u8> {
        let len = self.payload.len().to_string();
        let mut out = Vec::with_capacity(2 + len.len() + self.payload.len());
        out.push(self.tag.byte());
        out.extend_from_slice(len.as_bytes());
        out.push(DELIMITER);
        out.extend_from_slice(&self.payload);
        out
    }

    /// Read one complete frame from the stream.
    ///
    /// Any error leaves the stream in an undefined position; the caller must
    /// close the connection rather than try to recover framing.
    pub async fn read<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Frame, WireError> {
        let tag_byte = reader.read_u8().await?;
        let tag = Tag::from_byte(tag_byte).ok_or(WireError::UnknownTag(tag_byte))?;
        let len = read_length(reader).await?;

        let len: usize = len
            .try_into()
            .map_err(|_| WireError::LengthOverflow)?;

        // Grow the buffer in bounded steps instead of trusting the length
        // field with one huge allocation. A lying peer hits UnexpectedEof
        // after at most one chunk.
        let mut payload = Vec::with_capacity(len.min(PAYLOAD_READ_CHUNK));
        let mut remaining = len;
        while remaining > 0 {
            let step = remaining.min(PAYLOAD_READ_CHUNK);
            let start = payload.len();
            payload.resize(start + step, 0);
            reader.read_exact(&mut payload[start..]).await?;
            remaining -= step;
        }
        Ok(Frame { tag, payload })
    }
}

/// Read the decimal ASCII length field up to the delimiter, one byte at a
/// time. At most [`MAX_LENGTH_DIGITS`] digits are accepted.
async fn read_length<R: AsyncRead + Unpin>(reader: &mut R) -> Result<u64, WireError> {
    let mut len: u64 = 0;
    let mut digits = 0usize;
    loop {
        let b = reader.read_u8().await?;
        if b == DELIMITER {
            if digits == 0 {
                return Err(WireError::BadLength(b));
            }
            return Ok(len);
        }
        if !b.is_ascii_digit() {
            return Err(WireError::BadLength(b));
        }
        digits += 1;
        if digits > MAX_LENGTH_DIGITS {
            return Err(WireError::LengthOverflow);
        }
        len = len * 10 + u64::from(b - b'0');
    }
}

// ============================================================================
// Typed messages
// ============================================================================

/// One chunk of replica data pushed to a peer.
///
/// The baseline placement policy always sends the whole file as chunk 1 of 1;
/// the index/total fields keep the wire format stable when chunking grows up.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaChunk {
    pub filename: String,
    pub uploader: String,
    pub index: u32,
    pub total: u32,
    pub data: Vec<u8>,
}

/// Request for a replica held by the receiving peer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaFetch {
    pub filename: String,
    pub index: u32,
    pub total: u32,
}

/// Typed view of a wire frame. Constructed per send/receive, never stored.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    /// Handshake identity announcement.
    Verify { id: String },
    /// Liveness ping, empty payload.
    Heartbeat,
    /// Gossip: announces a newly verified host.
    Host { host: String },
    /// Push one chunk of a replicated file.
    ReplicaStore(ReplicaChunk),
    /// Ask a replica holder for file data.
    ReplicaRequest(ReplicaFetch),
    /// Tell the network a file was deleted.
    Delete { filename: String },
    /// Catalog snapshot (full or single-record) for merging.
    CatalogSync(Vec<FileRecord>),
    /// Known logical identities, shared after verification.
    IdList(Vec<String>),
}

impl Message {
    pub fn tag(&self) -> Tag {
        match self {
            Message::Verify { .. } => Tag::Verify,
            Message::Heartbeat => Tag::Heartbeat,
            Message::Host { .. } => Tag::Host,
            Message::ReplicaStore(_) => Tag::ReplicaStore,
            Message::ReplicaRequest(_) => Tag::ReplicaRequest,
            Message::Delete { .. } => Tag::Delete,
            Message::CatalogSync(_) => Tag::CatalogSync,
            Message::IdList(_) => Tag::IdList,
        }
    }

    pub fn to_frame(&self) -> Result<Frame, WireError> {
        let payload = match self {
            Message::Verify { id } => id.as_bytes().to_vec(),
            Message::Heartbeat => Vec::new(),
            Message::Host { host } => host.as_bytes().to_vec(),
            Message::ReplicaStore(chunk) => serialize_payload(chunk)?,
            Message::ReplicaRequest(fetch) => serialize_payload(fetch)?,
            Message::Delete { filename } => filename.as_bytes().to_vec(),
            Message::CatalogSync(records) => serialize_payload(records)?,
            Message::IdList(ids) => serialize_payload(ids)?,
        };
        Ok(Frame::new(self.tag(), payload))
    }

    /// Interpret a decoded frame. A payload that does not match the tag's
    /// encoding is a protocol error.
    pub fn from_frame(frame: Frame) -> Result<Message, WireError> {
        let Frame { tag, payload } = frame;
        let msg = match tag {
            Tag::Verify => Message::Verify {
                id: utf8_payload(payload)?,
            },
            Tag::Heartbeat => Message::Heartbeat,
            Tag::Host => Message::Host {
                host: utf8_payload(payload)?,
            },
            Tag::ReplicaStore => Message::ReplicaStore(deserialize_bounded(&payload)?),
            Tag::ReplicaRequest => Message::ReplicaRequest(deserialize_bounded(&payload)?),
            Tag::Delete => Message::Delete {
                filename: utf8_payload(payload)?,
            },
            Tag::CatalogSync => Message::CatalogSync(deserialize_bounded(&payload)?),
            Tag::IdList => Message::IdList(deserialize_bounded(&payload)?),
        };
        Ok(msg)
    }
}

fn utf8_payload(payload: Vec<u8>) -> Result<String, WireError> {
    String::from_utf8(payload).map_err(|e| WireError::BadPayload(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    async fn round_trip(frame: Frame) -> Frame {
        let bytes = frame.encode();
        let mut reader = &bytes[..];
        Frame::read(&mut reader).await.expect("decode failed")
    }

    #[tokio::test]
    async fn frame_round_trip_empty_payload() {
        let frame = Frame::new(Tag::Heartbeat, Vec::new());
        assert_eq!(round_trip(frame.clone()).await, frame);
        assert_eq!(frame.encode(), b"H0#");
    }

    #[tokio::test]
    async fn frame_round_trip_binary_payload() {
        // Payload containing the delimiter, digits, and every byte value.
        let payload: Vec<u8> = (0..=255u8).cycle().take(70_000).collect();
        let frame = Frame::new(Tag::ReplicaStore, payload);
        assert_eq!(round_trip(frame.clone()).await, frame);
    }

    #[tokio::test]
    async fn length_field_accepts_ten_digits() {
        // 10-digit length with a truncated payload: header parses, the
        // payload read then fails with a transport error, not a length error.
        let bytes = b"S9999999999#abc".to_vec();
        let mut reader = &bytes[..];
        match Frame::read(&mut reader).await {
            Err(WireError::Io(_)) => {}
            other => panic!("expected Io error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn length_field_rejects_eleven_digits() {
        let bytes = b"S99999999999#".to_vec();
        let mut reader = &bytes[..];
        match Frame::read(&mut reader).await {
            Err(WireError::LengthOverflow) => {}
            other => panic!("expected LengthOverflow, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn length_field_rejects_non_digit() {
        let bytes = b"V1x#a".to_vec();
        let mut reader = &bytes[..];
        match Frame::read(&mut reader).await {
            Err(WireError::BadLength(b'x')) => {}
            other => panic!("expected BadLength, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_length_field_is_malformed() {
        let bytes = b"V#".to_vec();
        let mut reader = &bytes[..];
        assert!(matches!(
            Frame::read(&mut reader).await,
            Err(WireError::BadLength(DELIMITER))
        ));
    }

    #[tokio::test]
    async fn unknown_tag_rejected() {
        let bytes = b"X3#abc".to_vec();
        let mut reader = &bytes[..];
        match Frame::read(&mut reader).await {
            Err(WireError::UnknownTag(b'X')) => {}
            other => panic!("expected UnknownTag, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn truncated_payload_is_transport_error() {
        let bytes = b"V10#short".to_vec();
        let mut reader = &bytes[..];
        assert!(matches!(Frame::read(&mut reader).await, Err(WireError::Io(_))));
    }

    #[tokio::test]
    async fn message_round_trip_all_tags() {
        let mut replicas = BTreeSet::new();
        replicas.insert("alice".to_string());
        let messages = vec![
            Message::Verify { id: "ryan".into() },
            Message::Heartbeat,
            Message::Host {
                host: "10.1.2.3".into(),
            },
            Message::ReplicaStore(ReplicaChunk {
                filename: "report.txt".into(),
                uploader: "ryan".into(),
                index: 1,
                total: 1,
                data: vec![0, 159, 146, 150],
            }),
            Message::ReplicaRequest(ReplicaFetch {
                filename: "report.txt".into(),
                index: 1,
                total: 1,
            }),
            Message::Delete {
                filename: "report.txt".into(),
            },
            Message::CatalogSync(vec![FileRecord {
                filename: "report.txt".into(),
                uploader: "ryan".into(),
                replicas,
            }]),
            Message::IdList(vec!["ryan".into(), "alice".into()]),
        ];
        for msg in messages {
            let frame = msg.to_frame().unwrap();
            let decoded = Message::from_frame(round_trip(frame).await).unwrap();
            assert_eq!(decoded, msg);
        }
    }

    #[test]
    fn oversize_chunk_encodes_without_truncation() {
        // Encoding must never clamp to the deserialize bound: the payload
        // carries every data byte, and it is the decoder that refuses it.
        let data = vec![7u8; MAX_REPLICA_BYTES + 8192];
        let len = data.len();
        let msg = Message::ReplicaStore(ReplicaChunk {
            filename: "huge.bin".into(),
            uploader: "ryan".into(),
            index: 1,
            total: 1,
            data,
        });
        let frame = msg.to_frame().unwrap();
        assert!(frame.payload.len() > len);
        assert!(Message::from_frame(frame).unwrap_err().is_protocol_error());
    }

    #[tokio::test]
    async fn garbage_structured_payload_is_protocol_error() {
        let frame = Frame::new(Tag::CatalogSync, vec![0xff; 7]);
        let err = Message::from_frame(round_trip(frame).await).unwrap_err();
        assert!(err.is_protocol_error());
    }
}
