//! WebSocket listener and worker wiring.

use crate::config::Config;
use crate::spatial::Grid;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, info, warn};

pub mod client;
pub mod worker;

pub use client::ClientHandle;
pub use worker::{Worker, WorkerEvent};

/// Admission counters for the accept loop: one slot per connection,
/// bounded in total and per remote IP.
struct Admission {
    max_total: usize,
    max_per_ip: usize,
    total: usize,
    per_ip: HashMap<IpAddr, usize>,
}

impl Admission {
    fn new(max_total: usize, max_per_ip: usize) -> Self {
        Self {
            max_total,
            max_per_ip,
            total: 0,
            per_ip: HashMap::new(),
        }
    }

    /// Count a connection against both limits; false refuses it.
    fn admit(&mut self, ip: IpAddr) -> bool {
        if self.total >= self.max_total {
            return false;
        }
        match self.per_ip.get_mut(&ip) {
            Some(held) if *held >= self.max_per_ip => false,
            Some(held) => {
                *held += 1;
                self.total += 1;
                true
            }
            None if self.max_per_ip == 0 => false,
            None => {
                self.per_ip.insert(ip, 1);
                self.total += 1;
                true
            }
        }
    }

    /// Give an admitted connection's slot back.
    fn release(&mut self, ip: IpAddr) {
        if let Some(held) = self.per_ip.get_mut(&ip) {
            self.total = self.total.saturating_sub(1);
            if *held > 1 {
                *held -= 1;
            } else {
                self.per_ip.remove(&ip);
            }
        }
    }
}

/// Bind the listener and run the server. A bind failure propagates out
/// and exits the process nonzero.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let listener =
        TcpListener::bind(format!("{}:{}", config.server.bind, config.server.port)).await?;
    info!("Listening on ws://{}", listener.local_addr()?);
    serve(listener, config).await
}

/// Run the accept loop over an already-bound listener, fanning accepted
/// connections out to the workers round-robin.
pub async fn serve(listener: TcpListener, config: Config) -> anyhow::Result<()> {
    let grid = Arc::new(Grid::new(
        config.arena.width,
        config.arena.height,
        config.arena.cell_size,
    ));

    let mut workers = Vec::with_capacity(config.server.workers.max(1));
    for worker_id in 0..config.server.workers.max(1) {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = Worker::new(worker_id, Arc::clone(&grid), config.clone(), rx);
        tokio::spawn(worker.run());
        workers.push(tx);
    }
    info!(
        "Started {} workers over a {}x{} arena",
        workers.len(),
        config.arena.width,
        config.arena.height
    );

    let admission = Arc::new(RwLock::new(Admission::new(
        config.server.max_connections,
        config.server.ip_limit,
    )));
    let mut next_conn_id: u64 = 0;

    loop {
        let (stream, addr) = listener.accept().await?;

        if !admission.write().await.admit(addr.ip()) {
            warn!("Connection rejected (limit reached): {}", addr);
            continue;
        }

        next_conn_id += 1;
        let conn_id = next_conn_id;
        let worker_tx = workers[conn_id as usize % workers.len()].clone();
        let admission = Arc::clone(&admission);

        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, addr, conn_id, worker_tx).await {
                debug!("Connection error from {}: {}", addr, err);
            }
            admission.write().await.release(addr.ip());
        });
    }
}

/// Handle a single WebSocket connection: attach it to its worker, pump
/// inbound frames into the worker's event queue, and drain the worker's
/// outbound queue into the socket.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    conn_id: u64,
    worker_tx: mpsc::UnboundedSender<WorkerEvent>,
) -> anyhow::Result<()> {
    let ws_stream = accept_async(stream).await?;
    info!("New connection {} from {}", conn_id, addr);

    let (mut write, mut read) = ws_stream.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
    let handle = ClientHandle::new(conn_id, addr, out_tx);
    if worker_tx.send(WorkerEvent::Open { client: handle }).is_err() {
        anyhow::bail!("owning worker is gone");
    }

    // writer task: the worker never blocks on the socket
    let writer = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            if write.send(message).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = read.next().await {
        match message {
            Ok(Message::Text(text)) => {
                let frame = WorkerEvent::Frame {
                    conn_id,
                    text: text.as_str().to_owned(),
                };
                if worker_tx.send(frame).is_err() {
                    break;
                }
            }
            Ok(Message::Binary(data)) => {
                // some clients ship the same JSON in binary frames
                match String::from_utf8(data.to_vec()) {
                    Ok(text) => {
                        if worker_tx.send(WorkerEvent::Frame { conn_id, text }).is_err() {
                            break;
                        }
                    }
                    Err(_) => debug!("Connection {}: non-UTF-8 binary frame dropped", conn_id),
                }
            }
            Ok(Message::Close(_)) => break,
            // tungstenite answers ping/pong control frames itself
            Ok(_) => {}
            Err(err) => {
                debug!("Connection {} error: {}", conn_id, err);
                break;
            }
        }
    }

    worker_tx.send(WorkerEvent::Close { conn_id }).ok();
    writer.abort();
    info!("Connection {} from {} closed", conn_id, addr);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(last: u8) -> IpAddr {
        IpAddr::from([127, 0, 0, last])
    }

    #[test]
    fn admission_enforces_the_total_limit() {
        let mut admission = Admission::new(2, 10);
        assert!(admission.admit(ip(1)));
        assert!(admission.admit(ip(2)));
        assert!(!admission.admit(ip(3)));

        // a released slot becomes available again
        admission.release(ip(1));
        assert!(admission.admit(ip(3)));
    }

    #[test]
    fn admission_enforces_the_per_ip_limit() {
        let mut admission = Admission::new(10, 2);
        assert!(admission.admit(ip(1)));
        assert!(admission.admit(ip(1)));
        assert!(!admission.admit(ip(1)));
        // other IPs are unaffected
        assert!(admission.admit(ip(2)));

        admission.release(ip(1));
        assert!(admission.admit(ip(1)));
    }

    #[test]
    fn release_of_an_unknown_ip_is_harmless() {
        let mut admission = Admission::new(2, 2);
        admission.release(ip(9));
        assert!(admission.admit(ip(1)));
        assert!(admission.admit(ip(1)));
        assert!(!admission.admit(ip(1)));
    }
}
