//! # Datagram Frames
//!
//! Framing used by the UDP transport. Every datagram starts with the
//! protocol id and a frame kind byte:
//!
//! ```text
//! ┌──────────────┬──────┬──────────────────────────────┐
//! │ protocol u32 │ kind │ body (kind-specific)         │
//! └──────────────┴──────┴──────────────────────────────┘
//! ```
//!
//! Datagrams with a foreign protocol id are dropped without a reply.

use super::codec::{ByteReader, ByteWriter, SequenceNumber};
use crate::error::{NetError, NetResult};

/// Identifies HORUS datagrams ("HRS" + wire revision).
pub const PROTOCOL_ID: u32 = 0x4852_5301;

/// Frame kinds on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// Client asks to join.
    Connect = 0,
    /// Host accepts and assigns a peer id.
    ConnectAck = 1,
    /// Reliable, ordered RPC payload.
    Reliable = 2,
    /// Acknowledges a reliable frame.
    Ack = 3,
    /// Unreliable, sequenced state payload.
    State = 4,
    /// Keep-alive.
    Heartbeat = 5,
    /// Graceful leave.
    Disconnect = 6,
}

impl FrameKind {
    const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Connect),
            1 => Some(Self::ConnectAck),
            2 => Some(Self::Reliable),
            3 => Some(Self::Ack),
            4 => Some(Self::State),
            5 => Some(Self::Heartbeat),
            6 => Some(Self::Disconnect),
            _ => None,
        }
    }
}

/// A decoded datagram.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// Client asks to join.
    Connect,
    /// Host accepted the client as `peer`.
    ConnectAck {
        /// Assigned peer id.
        peer: u32,
    },
    /// Reliable RPC payload.
    Reliable {
        /// Per-link reliable sequence.
        sequence: SequenceNumber,
        /// Encoded RPC envelope.
        payload: Vec<u8>,
    },
    /// Receipt for a reliable frame.
    Ack {
        /// Sequence being acknowledged.
        sequence: SequenceNumber,
    },
    /// Entity state payload.
    State {
        /// Per-link state sequence.
        sequence: SequenceNumber,
        /// Encoded snapshot.
        payload: Vec<u8>,
    },
    /// Keep-alive.
    Heartbeat,
    /// Graceful leave.
    Disconnect,
}

impl Frame {
    /// Encodes the frame as one datagram.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::PayloadTooLarge`] if the frame exceeds one datagram.
    pub fn encode(&self) -> NetResult<Vec<u8>> {
        let mut w = ByteWriter::new();
        w.write_u32(PROTOCOL_ID);
        match self {
            Self::Connect => w.write_u8(FrameKind::Connect as u8),
            Self::ConnectAck { peer } => {
                w.write_u8(FrameKind::ConnectAck as u8);
                w.write_u32(*peer);
            }
            Self::Reliable { sequence, payload } => {
                w.write_u8(FrameKind::Reliable as u8);
                w.write_u16(*sequence);
                w.write_bytes(payload);
            }
            Self::Ack { sequence } => {
                w.write_u8(FrameKind::Ack as u8);
                w.write_u16(*sequence);
            }
            Self::State { sequence, payload } => {
                w.write_u8(FrameKind::State as u8);
                w.write_u16(*sequence);
                w.write_bytes(payload);
            }
            Self::Heartbeat => w.write_u8(FrameKind::Heartbeat as u8),
            Self::Disconnect => w.write_u8(FrameKind::Disconnect as u8),
        }
        w.finish()
    }

    /// Decodes a datagram.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Malformed`] for foreign, truncated or unknown frames.
    pub fn decode(datagram: &[u8]) -> NetResult<Self> {
        const MALFORMED: NetError = NetError::Malformed { what: "frame" };

        let mut r = ByteReader::new(datagram);
        if r.read_u32() != Some(PROTOCOL_ID) {
            return Err(MALFORMED);
        }
        let kind = r.read_u8().and_then(FrameKind::from_u8).ok_or(MALFORMED)?;
        let frame = match kind {
            FrameKind::Connect => Self::Connect,
            FrameKind::ConnectAck => Self::ConnectAck {
                peer: r.read_u32().ok_or(MALFORMED)?,
            },
            FrameKind::Reliable => Self::Reliable {
                sequence: r.read_u16().ok_or(MALFORMED)?,
                payload: r.rest().to_vec(),
            },
            FrameKind::Ack => Self::Ack {
                sequence: r.read_u16().ok_or(MALFORMED)?,
            },
            FrameKind::State => Self::State {
                sequence: r.read_u16().ok_or(MALFORMED)?,
                payload: r.rest().to_vec(),
            },
            FrameKind::Heartbeat => Self::Heartbeat,
            FrameKind::Disconnect => Self::Disconnect,
        };
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reliable_frame_keeps_payload() {
        let frame = Frame::Reliable {
            sequence: 513,
            payload: vec![1, 2, 3],
        };
        let bytes = frame.encode().unwrap();
        assert_eq!(Frame::decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn test_foreign_datagram_rejected() {
        assert!(Frame::decode(b"GET / HTTP/1.1").is_err());
        assert!(Frame::decode(&[]).is_err());

        let mut bytes = Frame::Heartbeat.encode().unwrap();
        bytes[4] = 42;
        assert!(Frame::decode(&bytes).is_err());
    }
}
