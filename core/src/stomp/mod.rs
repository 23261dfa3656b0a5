//! # GridMQ Wire Adapter Module
//!
//! Text wire-protocol bridge between remote clients and the channel engine.
//!
//! ## Architecture
//!
//! The adapter is built around four components:
//!
//! - [`codec`] - frame encoding/decoding over TCP ([`StompCodec`])
//! - [`converter`] - pure frame/message mapping ([`FrameConverter`])
//! - [`session`] - per-connection state machine ([`ProtocolSession`]):
//!   CONNECT opens a channel context, SEND publishes, SUBSCRIBE starts a
//!   dedicated receive loop, ACK/NACK settle client-ack deliveries,
//!   DISCONNECT (or connection loss) tears everything down
//! - [`server`] - TCP accept loop owning the session set ([`StompServer`])
//!
//! ## Frame flow
//!
//! ```text
//! client ──CONNECT/SEND/SUBSCRIBE──▶ session ──messages──▶ channel engine
//! client ◀─CONNECTED/MESSAGE/ERROR── writer ◀──frames───── receive loops
//! ```

pub mod codec;
pub mod converter;
pub mod frame;
pub mod server;
pub mod session;

pub use codec::{StompCodec, StompCodecError};
pub use converter::{ConversionError, FrameConverter};
pub use frame::{Command, Frame, RESERVED_HEADERS};
pub use server::StompServer;
pub use session::{AckMode, ProtocolSession, SessionState};
