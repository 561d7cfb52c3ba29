//! Shared wire protocol for the snowfight server.
//!
//! This crate contains:
//! - Inbound client message types (`ping`, `join`, `movement`) with the
//!   field defaults the game contract pins
//! - Outbound frame types (pong, hit, batch updates)
//! - Decode/encode helpers: control traffic is UTF-8 JSON in both
//!   directions, per-tick view batches go out as MessagePack-encoded
//!   binary frames

mod error;
mod messages;

pub use error::ProtocolError;
pub use messages::{
    decode_client, decode_ping, BatchUpdate, ClientMessage, Direction, Join, Movement,
    ObjectRecord, ObjectType, Ping, Point, Pong, StateMessage,
};
