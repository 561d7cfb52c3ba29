//! Worker: one reactor loop owning its clients and transient objects.
//!
//! All handler and tick work for a worker runs on its own task, so the
//! client set and the snowball map need no locking. The shared grid is
//! the only cross-worker state a worker ever touches.

use crate::config::Config;
use crate::entity::{self, GameObject};
use crate::server::client::ClientHandle;
use crate::spatial::{Grid, SharedObject};
use glam::DVec2;
use parking_lot::RwLock;
use protocol::{BatchUpdate, ClientMessage, Join, Movement, ObjectType, Ping, Pong, StateMessage};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Events fed to a worker by its connection tasks.
#[derive(Debug)]
pub enum WorkerEvent {
    Open { client: ClientHandle },
    Frame { conn_id: u64, text: String },
    Close { conn_id: u64 },
}

/// Server wall clock in milliseconds.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as i64)
}

enum Step {
    Event(Option<WorkerEvent>),
    Players,
    Objects,
}

/// One I/O reactor plus its two periodic tickers.
pub struct Worker {
    id: usize,
    grid: Arc<Grid>,
    config: Config,
    /// Connections owned by this worker.
    clients: HashMap<u64, ClientHandle>,
    /// Snowballs originated by this worker's clients.
    objects: HashMap<String, SharedObject>,
    events: mpsc::UnboundedReceiver<WorkerEvent>,
}

impl Worker {
    pub fn new(
        id: usize,
        grid: Arc<Grid>,
        config: Config,
        events: mpsc::UnboundedReceiver<WorkerEvent>,
    ) -> Self {
        Self {
            id,
            grid,
            config,
            clients: HashMap::new(),
            objects: HashMap::new(),
            events,
        }
    }

    /// Drive the worker until the listener drops its event channel.
    pub async fn run(mut self) {
        let players = Duration::from_millis(self.config.tick.players_ms);
        let objects = Duration::from_millis(self.config.tick.objects_ms);
        let mut player_ticker = interval_at(Instant::now() + players, players);
        player_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut object_ticker = interval_at(Instant::now() + objects, objects);
        object_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Worker {} started", self.id);
        loop {
            let step = tokio::select! {
                event = self.events.recv() => Step::Event(event),
                _ = player_ticker.tick() => Step::Players,
                _ = object_ticker.tick() => Step::Objects,
            };
            match step {
                Step::Event(Some(event)) => self.handle_event(event),
                Step::Event(None) => break,
                Step::Players => self.view_tick(now_ms()),
                Step::Objects => self.object_tick(now_ms()),
            }
        }
        self.shutdown();
    }

    fn shutdown(&mut self) {
        for (_, client) in self.clients.drain() {
            self.grid.remove(&client.player);
        }
        for (_, obj) in self.objects.drain() {
            self.grid.remove(&obj);
        }
        info!("Worker {} stopped", self.id);
    }

    pub fn handle_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Open { client } => {
                debug!(
                    "Worker {}: connection {} from {} attached",
                    self.id, client.id, client.addr
                );
                self.clients.insert(client.id, client);
            }
            WorkerEvent::Frame { conn_id, text } => self.handle_frame(conn_id, &text),
            WorkerEvent::Close { conn_id } => {
                if let Some(client) = self.clients.remove(&conn_id) {
                    self.grid.remove(&client.player);
                    info!("Worker {}: connection {} closed", self.id, conn_id);
                }
            }
        }
    }

    fn handle_frame(&mut self, conn_id: u64, text: &str) {
        // ping frames dominate idle traffic; the token check defers the
        // full tagged decode
        if text.contains("\"ping\"") {
            if let Some(ping) = protocol::decode_ping(text) {
                return self.handle_ping(conn_id, ping);
            }
        }
        match protocol::decode_client(text) {
            Ok(ClientMessage::Ping(ping)) => self.handle_ping(conn_id, ping),
            Ok(ClientMessage::Join(join)) => self.handle_join(conn_id, join),
            Ok(ClientMessage::Movement(movement)) => self.handle_movement(conn_id, movement),
            Err(err) => debug!(
                "Worker {}: dropping malformed frame from connection {}: {}",
                self.id, conn_id, err
            ),
        }
    }

    fn handle_ping(&self, conn_id: u64, ping: Ping) {
        let Some(client) = self.clients.get(&conn_id) else {
            return;
        };
        match Pong::new(now_ms(), ping.client_time).to_json() {
            Ok(json) => {
                client.send_text(json);
            }
            Err(err) => warn!("Worker {}: pong encode failed: {}", self.id, err),
        }
    }

    fn handle_join(&mut self, conn_id: u64, join: Join) {
        let Some(client) = self.clients.get(&conn_id) else {
            return;
        };
        if !self.grid.in_bounds(join.position.x, join.position.y) {
            debug!(
                "Worker {}: join {:?} outside the arena, dropped",
                self.id, join.id
            );
            return;
        }
        let now = now_ms();
        // a repeated join repositions the player rather than indexing it twice
        self.grid.remove(&client.player);
        {
            let mut player = client.player.write();
            player.id = join.id;
            player.username = join.username;
            player.position = DVec2::new(join.position.x, join.position.y);
            player.health = join.health;
            player.size = join.size;
            player.time_update = join.time_update.min(now);
        }
        self.grid.insert(&client.player);
        info!(
            "Worker {}: connection {} joined as {:?}",
            self.id,
            conn_id,
            client.player.read().id
        );
    }

    fn handle_movement(&mut self, conn_id: u64, movement: Movement) {
        match movement.object_type {
            ObjectType::Player => self.handle_player_movement(conn_id, movement),
            ObjectType::Snowball => self.handle_snowball_movement(movement),
        }
    }

    fn handle_player_movement(&mut self, conn_id: u64, movement: Movement) {
        let Some(client) = self.clients.get(&conn_id) else {
            return;
        };
        let now = now_ms();
        let anchor = anchor_from(movement.time_update, now);
        if let Some(direction) = movement.direction {
            // steering only; the next cell transition projects and
            // re-anchors through the grid
            let mut player = client.player.write();
            player.velocity = entity::direction_velocity(&direction);
            player.time_update = anchor;
        } else if let Some(position) = movement.position {
            {
                let mut player = client.player.write();
                player.position = DVec2::new(position.x, position.y);
                player.time_update = anchor;
            }
            self.grid.update(&client.player, now);
        }
    }

    fn handle_snowball_movement(&mut self, movement: Movement) {
        let now = now_ms();
        let anchor = anchor_from(movement.time_update, now);
        let (obj, is_new) = match self.objects.get(&movement.id) {
            Some(obj) => (Arc::clone(obj), false),
            None => {
                let obj: SharedObject =
                    Arc::new(RwLock::new(GameObject::snowball(movement.id.clone())));
                self.objects.insert(movement.id.clone(), Arc::clone(&obj));
                (obj, true)
            }
        };
        {
            // every payload field overwrites, absent position/velocity
            // included (they fall back to zero)
            let mut snowball = obj.write();
            snowball.position = movement
                .position
                .map(|p| DVec2::new(p.x, p.y))
                .unwrap_or(DVec2::ZERO);
            snowball.velocity = movement
                .velocity
                .map(|v| DVec2::new(v.x, v.y))
                .unwrap_or(DVec2::ZERO);
            snowball.size = movement.size;
            snowball.damage = movement.damage;
            snowball.charging = movement.charging;
            snowball.life_length = movement.life_length;
            snowball.time_update = anchor;
        }
        if is_new {
            self.grid.insert(&obj);
        }
    }

    /// Stream each owned client the slice of the arena visible to it,
    /// resolving snowball hits along the way.
    pub fn view_tick(&mut self, now: i64) {
        let view_w = self.config.view.width;
        let view_h = self.config.view.height;
        let conn_ids: Vec<u64> = self.clients.keys().copied().collect();

        for conn_id in conn_ids {
            let Some(client) = self.clients.get(&conn_id) else {
                continue;
            };
            let player = Arc::clone(&client.player);

            if player.read().is_dead {
                self.grid.remove(&player);
                self.clients.remove(&conn_id);
                continue;
            }
            if player.read().expired(now) {
                self.grid.remove(&player);
                continue;
            }

            // keep the index in step with steered movement before
            // querying around the player
            self.grid.update(&player, now);
            let me = player.read().clone();

            let neighbors = self.grid.search(
                me.position.y - view_h,
                me.position.y + view_h,
                me.position.x - view_w,
                me.position.x + view_w,
            );

            let mut updates = Vec::with_capacity(neighbors.len());
            let mut hits: Vec<i32> = Vec::new();
            for neighbor in &neighbors {
                let obj = neighbor.read();
                if obj.id == me.id {
                    continue;
                }
                if obj.is_dead && obj.expired(now) {
                    continue;
                }
                let hostile =
                    obj.damage > 0 && entity::snowball_owner(&obj.id) != Some(me.id.as_str());
                if hostile && !obj.is_dead && obj.overlaps_at(&me, now) {
                    drop(obj);
                    let mut obj = neighbor.write();
                    if obj.collide(&me, now) {
                        hits.push(obj.damage);
                        continue;
                    }
                    // lost the race to another view tick; stream its death
                    updates.push(obj.record(now));
                } else {
                    updates.push(obj.record(now));
                }
            }

            if !hits.is_empty() {
                let mut frames = Vec::with_capacity(hits.len());
                {
                    let mut me = player.write();
                    for damage in hits {
                        if me.is_dead {
                            break;
                        }
                        me.hurt(damage, now);
                        frames.push(StateMessage::hit(me.record(now)));
                    }
                }
                for frame in frames {
                    match frame.to_json() {
                        Ok(json) => {
                            client.send_text(json);
                        }
                        Err(err) => warn!("Worker {}: hit encode failed: {}", self.id, err),
                    }
                }
            }

            match BatchUpdate::new(now, updates).encode() {
                Ok(bytes) => {
                    client.send_binary(bytes);
                }
                Err(err) => warn!(
                    "Worker {}: batch encode failed for connection {}: {}",
                    self.id, conn_id, err
                ),
            }
        }
    }

    /// Advance and cull this worker's snowballs.
    pub fn object_tick(&mut self, now: i64) {
        let ids: Vec<String> = self.objects.keys().cloned().collect();
        for id in ids {
            let Some(obj) = self.objects.get(&id) else {
                continue;
            };
            let (is_dead, is_expired) = {
                let o = obj.read();
                (o.is_dead, o.expired(now))
            };
            if is_dead || is_expired {
                if let Some(obj) = self.objects.remove(&id) {
                    self.grid.remove(&obj);
                }
            } else {
                self.grid.update(obj, now);
            }
        }
    }
}

/// Clamp a client-supplied anchor to the server clock so TTL arithmetic
/// never sees a negative elapsed time; absent anchors land on `now`.
fn anchor_from(client_time: i64, now: i64) -> i64 {
    if client_time > 0 {
        client_time.min(now)
    } else {
        now
    }
}
