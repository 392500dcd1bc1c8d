//! SLCP wire codec.
//!
//! Every frame is a 1-byte kind tag, a 4-byte big-endian payload length and
//! the bincode-serialized message. The header makes frames self-delimiting,
//! so the same codec serves UDP datagrams and the TCP transfer channel.

use crate::DecodeError;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use uuid::Uuid;

/// Tag byte + u32 payload length.
pub const HEADER_LEN: usize = 5;

/// Upper bound on a single payload. A length field above this is treated as
/// a malformed header rather than an instruction to allocate.
pub const MAX_PAYLOAD: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Kind {
    Join = 1,
    Leave = 2,
    Who = 3,
    Whois = 4,
    WhoisReply = 5,
    Chat = 6,
    ImageMeta = 7,
    ImageChunk = 8,
}

impl Kind {
    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Kind::Join),
            2 => Some(Kind::Leave),
            3 => Some(Kind::Who),
            4 => Some(Kind::Whois),
            5 => Some(Kind::WhoisReply),
            6 => Some(Kind::Chat),
            7 => Some(Kind::ImageMeta),
            8 => Some(Kind::ImageChunk),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// Presence announcement; receivers register the sender under `name`.
    Join { name: String },
    /// Graceful departure; receivers drop `name` from their registry.
    Leave { name: String },
    /// Prompts every receiver to re-announce itself to the sender.
    Who,
    /// Unicast name resolution request.
    Whois { name: String },
    WhoisReply { name: String, addr: SocketAddr },
    /// Direct text message.
    Chat { sender: String, text: String },
    /// Opens a transfer session on the receiver.
    ImageMeta {
        id: Uuid,
        sender: String,
        file_name: String,
        total_size: u64,
        chunk_size: u32,
    },
    /// One slice of the image, written at offset `index * chunk_size`.
    ImageChunk { id: Uuid, index: u32, data: Vec<u8> },
}

impl Message {
    pub fn kind(&self) -> Kind {
        match self {
            Message::Join { .. } => Kind::Join,
            Message::Leave { .. } => Kind::Leave,
            Message::Who => Kind::Who,
            Message::Whois { .. } => Kind::Whois,
            Message::WhoisReply { .. } => Kind::WhoisReply,
            Message::Chat { .. } => Kind::Chat,
            Message::ImageMeta { .. } => Kind::ImageMeta,
            Message::ImageChunk { .. } => Kind::ImageChunk,
        }
    }
}

/// Serializes `message` into a self-delimiting frame.
pub fn encode(message: &Message) -> crate::Result<Vec<u8>> {
    let payload = bincode::serialize(message)?;

    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.push(message.kind() as u8);
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Parses the frame header, returning the kind and declared payload length.
/// Does not touch the payload itself.
pub fn decode_header(buf: &[u8]) -> Result<(Kind, usize), DecodeError> {
    if buf.len() < HEADER_LEN {
        return Err(DecodeError::Truncated {
            declared: HEADER_LEN,
            available: buf.len(),
        });
    }

    let kind = Kind::from_tag(buf[0]).ok_or(DecodeError::MalformedHeader)?;
    let len = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
    if len > MAX_PAYLOAD {
        return Err(DecodeError::MalformedHeader);
    }

    Ok((kind, len))
}

/// Decodes one frame from the front of `buf`. Trailing bytes beyond the
/// declared length are ignored.
pub fn decode(buf: &[u8]) -> Result<Message, DecodeError> {
    let (kind, len) = decode_header(buf)?;

    let available = buf.len() - HEADER_LEN;
    if available < len {
        return Err(DecodeError::Truncated {
            declared: len,
            available,
        });
    }

    let payload = &buf[HEADER_LEN..HEADER_LEN + len];
    let message: Message =
        bincode::deserialize(payload).map_err(|_| DecodeError::MalformedHeader)?;

    // A tag that disagrees with the payload is a forged or corrupted header.
    if message.kind() != kind {
        return Err(DecodeError::MalformedHeader);
    }

    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_messages() -> Vec<Message> {
        vec![
            Message::Join {
                name: "alice".into(),
            },
            Message::Leave {
                name: "alice".into(),
            },
            Message::Who,
            Message::Whois { name: "bob".into() },
            Message::WhoisReply {
                name: "bob".into(),
                addr: "192.168.1.7:4000".parse().unwrap(),
            },
            Message::Chat {
                sender: "alice".into(),
                text: "hello over there".into(),
            },
            Message::ImageMeta {
                id: Uuid::new_v4(),
                sender: "alice".into(),
                file_name: "cat.png".into(),
                total_size: 10_000,
                chunk_size: 1_000,
            },
            Message::ImageChunk {
                id: Uuid::new_v4(),
                index: 3,
                data: vec![0xAB; 512],
            },
        ]
    }

    #[test]
    fn round_trips_every_kind() {
        for message in sample_messages() {
            let frame = encode(&message).unwrap();
            assert_eq!(decode(&frame).unwrap(), message);
        }
    }

    #[test]
    fn trailing_bytes_are_ignored() {
        let mut frame = encode(&Message::Who).unwrap();
        frame.extend_from_slice(b"garbage after the frame");
        assert_eq!(decode(&frame).unwrap(), Message::Who);
    }

    #[test]
    fn short_header_is_truncated() {
        let frame = encode(&Message::Who).unwrap();
        assert!(matches!(
            decode(&frame[..3]),
            Err(DecodeError::Truncated { .. })
        ));
        assert!(matches!(decode(&[]), Err(DecodeError::Truncated { .. })));
    }

    #[test]
    fn short_payload_is_truncated_never_partial() {
        let frame = encode(&Message::Chat {
            sender: "alice".into(),
            text: "a longer message body".into(),
        })
        .unwrap();

        // Every prefix shorter than the declared length must fail the same way.
        for cut in HEADER_LEN..frame.len() {
            assert!(matches!(
                decode(&frame[..cut]),
                Err(DecodeError::Truncated { .. })
            ));
        }
    }

    #[test]
    fn unknown_tag_is_malformed() {
        let mut frame = encode(&Message::Who).unwrap();
        frame[0] = 0xFF;
        assert_eq!(decode(&frame), Err(DecodeError::MalformedHeader));
    }

    #[test]
    fn absurd_length_field_is_malformed() {
        let mut frame = encode(&Message::Who).unwrap();
        frame[1..5].copy_from_slice(&u32::MAX.to_be_bytes());
        assert_eq!(decode(&frame), Err(DecodeError::MalformedHeader));
    }

    #[test]
    fn tag_payload_mismatch_is_malformed() {
        let mut frame = encode(&Message::Join {
            name: "alice".into(),
        })
        .unwrap();
        frame[0] = Kind::Leave as u8;
        assert_eq!(decode(&frame), Err(DecodeError::MalformedHeader));
    }

    #[test]
    fn garbage_payload_is_malformed() {
        let mut frame = vec![Kind::Chat as u8];
        frame.extend_from_slice(&4u32.to_be_bytes());
        frame.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(decode(&frame), Err(DecodeError::MalformedHeader));
    }
}
