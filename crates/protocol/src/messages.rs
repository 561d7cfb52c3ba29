//! Message schemas and frame encoding.
//!
//! Inbound frames are JSON objects tagged by a `type` field. Fields not
//! listed in a schema are ignored; missing optional fields take the
//! defaults pinned by the wire contract.

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// A 2D point on the wire (`{"x": .., "y": ..}`).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Object kind discriminator carried by movement frames and outbound
/// records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectType {
    Player,
    Snowball,
}

/// Inbound client frame, tagged by `type`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    Ping(Ping),
    Join(Join),
    Movement(Movement),
}

/// `{type:"ping", clientTime}`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ping {
    #[serde(default)]
    pub client_time: i64,
}

/// `{type:"join", id, username, position, health, size, timeUpdate}`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Join {
    #[serde(default = "unknown")]
    pub id: String,
    #[serde(default = "unknown")]
    pub username: String,
    #[serde(default)]
    pub position: Point,
    #[serde(default = "default_health")]
    pub health: i32,
    #[serde(default = "default_player_size")]
    pub size: f64,
    #[serde(default)]
    pub time_update: i64,
}

/// `{type:"movement", objectType, ...}` for both players and snowballs.
///
/// A player frame carries either a `direction` set or an explicit
/// `position`; a snowball frame carries the full kinematic payload. The
/// anchor field is canonically `timeUpdate`, with the legacy
/// `timeEmission` spelling accepted as an alias.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Movement {
    #[serde(default = "unknown")]
    pub id: String,
    pub object_type: ObjectType,
    #[serde(default)]
    pub direction: Option<Direction>,
    #[serde(default)]
    pub position: Option<Point>,
    #[serde(default)]
    pub velocity: Option<Point>,
    #[serde(default = "default_snowball_size")]
    pub size: f64,
    #[serde(default = "default_snowball_damage")]
    pub damage: i32,
    #[serde(default)]
    pub charging: bool,
    #[serde(default = "default_life_length")]
    pub life_length: i64,
    #[serde(default, alias = "timeEmission")]
    pub time_update: i64,
}

/// Boolean direction set for steered player movement.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Direction {
    #[serde(default)]
    pub left: bool,
    #[serde(default)]
    pub right: bool,
    #[serde(default)]
    pub up: bool,
    #[serde(default)]
    pub down: bool,
}

fn unknown() -> String {
    "unknown".to_string()
}

fn default_health() -> i32 {
    100
}

fn default_player_size() -> f64 {
    20.0
}

fn default_snowball_size() -> f64 {
    1.0
}

fn default_snowball_damage() -> i32 {
    5
}

fn default_life_length() -> i64 {
    // effectively unbounded when the client declares no TTL
    4_000_000_000_000_000_000
}

/// Decode an inbound JSON frame.
pub fn decode_client(text: &str) -> Result<ClientMessage, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}

/// Targeted decode for the ping fast path. Returns `None` for anything
/// that is not a well-formed ping frame; callers fall back to
/// [`decode_client`].
pub fn decode_ping(text: &str) -> Option<Ping> {
    #[derive(Deserialize)]
    struct Probe<'a> {
        #[serde(rename = "type")]
        kind: &'a str,
        #[serde(rename = "clientTime", default)]
        client_time: i64,
    }

    let probe: Probe = serde_json::from_str(text).ok()?;
    (probe.kind == "ping").then_some(Ping {
        client_time: probe.client_time,
    })
}

/// `{messageType:"pong", serverTime, clientTime}`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pong {
    pub message_type: &'static str,
    pub server_time: i64,
    pub client_time: i64,
}

impl Pong {
    pub fn new(server_time: i64, client_time: i64) -> Self {
        Self {
            message_type: "pong",
            server_time,
            client_time,
        }
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Per-object record listed in batch updates and hit frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRecord {
    pub id: String,
    pub object_type: ObjectType,
    pub username: String,
    pub position: Point,
    pub velocity: Point,
    pub size: f64,
    pub charging: bool,
    pub expire_date: i64,
    pub is_dead: bool,
    pub time_update: i64,
    pub new_health: i32,
}

/// A single-object state frame sent as text JSON, e.g. `hit`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateMessage {
    pub message_type: &'static str,
    #[serde(flatten)]
    pub record: ObjectRecord,
}

impl StateMessage {
    /// One `hit` frame per applied damage event.
    pub fn hit(record: ObjectRecord) -> Self {
        Self {
            message_type: "hit",
            record,
        }
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// One outbound view frame per player tick per connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchUpdate {
    pub message_type: String,
    pub timestamp: i64,
    pub updates: Vec<ObjectRecord>,
}

impl BatchUpdate {
    pub fn new(timestamp: i64, updates: Vec<ObjectRecord>) -> Self {
        Self {
            message_type: "batch_update".to_string(),
            timestamp,
            updates,
        }
    }

    /// MessagePack map encoding, sent as a binary frame.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
