//! Client session state.

use crate::entity::GameObject;
use crate::spatial::SharedObject;
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

/// A connected client, owned by exactly one worker.
#[derive(Debug)]
pub struct ClientHandle {
    /// Connection id, unique for the process lifetime.
    pub id: u64,
    /// Remote address.
    pub addr: SocketAddr,
    /// The player entity attached to this connection.
    pub player: SharedObject,
    /// Outbound queue drained by the connection's writer task.
    outbound: mpsc::UnboundedSender<Message>,
}

impl ClientHandle {
    /// Create a session with a fresh, not-yet-joined player.
    pub fn new(id: u64, addr: SocketAddr, outbound: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            id,
            addr,
            player: Arc::new(RwLock::new(GameObject::player())),
            outbound,
        }
    }

    /// Queue a frame; false once the connection is gone.
    pub fn send(&self, message: Message) -> bool {
        self.outbound.send(message).is_ok()
    }

    pub fn send_text(&self, text: String) -> bool {
        self.send(Message::text(text))
    }

    pub fn send_binary(&self, bytes: Vec<u8>) -> bool {
        self.send(Message::binary(bytes))
    }
}
