//! # Wire Protocol
//!
//! Byte-level building blocks shared by the transports and the RPC layer.
//!
//! ## Layers
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ RpcEnvelope / EntitySnapshot            │  <- rpc, replication
//! ├─────────────────────────────────────────┤
//! │ Frame (connect, reliable, state, ack..) │  <- UDP only
//! ├─────────────────────────────────────────┤
//! │ ByteWriter / ByteReader                 │
//! └─────────────────────────────────────────┘
//! ```

pub mod codec;
pub mod frames;

pub use codec::{sequence_newer, ByteReader, ByteWriter, SequenceNumber};
pub use frames::{Frame, FrameKind, PROTOCOL_ID};
