//! The game object model shared by players and snowballs.

use glam::DVec2;
use protocol::{Direction, ObjectRecord, ObjectType, Point};

/// Movement speed of a steered player, world units per second.
pub const PLAYER_SPEED: f64 = 200.0;

/// TTL re-anchor applied when an object dies, in milliseconds. Keeps the
/// object visible to view ticks already in flight before its owner
/// unlinks it.
pub const DEATH_GRACE_MS: i64 = 1000;

/// A live object in the arena. Players and snowballs share one record;
/// a player is simply the zero-velocity case of the projection formula.
#[derive(Debug, Clone)]
pub struct GameObject {
    pub id: String,
    pub kind: ObjectType,
    pub username: String,
    /// Anchor position at `time_update`.
    pub position: DVec2,
    /// World units per second.
    pub velocity: DVec2,
    /// Collision radius.
    pub size: f64,
    /// Grid cell currently holding this object; maintained by the grid.
    pub row: i32,
    pub col: i32,
    pub health: i32,
    /// Damage inflicted on contact; zero for harmless objects.
    pub damage: i32,
    /// Wall-clock anchor (ms) for position projection.
    pub time_update: i64,
    /// Remaining TTL (ms) counted from `time_update`.
    pub life_length: i64,
    pub is_dead: bool,
    pub charging: bool,
}

impl GameObject {
    /// A fresh player, attached to a connection before any `join` frame
    /// has populated it.
    pub fn player() -> Self {
        Self {
            id: "unknown".to_string(),
            kind: ObjectType::Player,
            username: "unknown".to_string(),
            position: DVec2::ZERO,
            velocity: DVec2::ZERO,
            size: 1.0,
            row: 0,
            col: 0,
            health: 100,
            damage: 0,
            time_update: 0,
            life_length: i64::MAX,
            is_dead: false,
            charging: false,
        }
    }

    /// A fresh snowball; the creating movement frame overwrites the
    /// kinematic fields right away.
    pub fn snowball(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: ObjectType::Snowball,
            username: "unknown".to_string(),
            position: DVec2::ZERO,
            velocity: DVec2::ZERO,
            size: 1.0,
            row: 0,
            col: 0,
            health: 100,
            damage: 5,
            time_update: 0,
            life_length: 1000,
            is_dead: false,
            charging: false,
        }
    }

    /// Snowballs fly through each other; players do not.
    pub fn is_penetrable(&self) -> bool {
        self.kind == ObjectType::Snowball
    }

    /// Projected position at `now`.
    pub fn position_at(&self, now: i64) -> DVec2 {
        let elapsed = now - self.time_update;
        self.position + self.velocity * (elapsed as f64 / 1000.0)
    }

    /// Whether the TTL counted from the anchor has run out.
    pub fn expired(&self, now: i64) -> bool {
        now.saturating_sub(self.time_update) > self.life_length
    }

    /// Static overlap test on stored positions; marks self dead on
    /// contact. Used for impenetrable barriers.
    pub fn touch(&mut self, other: &GameObject) -> bool {
        if self.is_dead {
            return false;
        }
        let delta = other.position - self.position;
        let reach = other.size + self.size;
        if delta.length_squared() <= reach * reach {
            self.is_dead = true;
            return true;
        }
        false
    }

    /// Overlap between `other`'s stored position and self projected to
    /// `now`, without side effects.
    pub fn overlaps_at(&self, other: &GameObject, now: i64) -> bool {
        let delta = other.position - self.position_at(now);
        let reach = other.size + self.size;
        delta.length_squared() <= reach * reach
    }

    /// Collision test against `other`; on contact self dies and its TTL
    /// re-anchors to the death grace window.
    pub fn collide(&mut self, other: &GameObject, now: i64) -> bool {
        if self.is_dead || !self.overlaps_at(other, now) {
            return false;
        }
        self.mark_dead(now);
        true
    }

    fn mark_dead(&mut self, now: i64) {
        self.is_dead = true;
        self.time_update = now;
        self.life_length = DEATH_GRACE_MS;
    }

    /// Apply damage; death at zero health re-anchors to the grace
    /// window. Returns the new health.
    pub fn hurt(&mut self, damage: i32, now: i64) -> i32 {
        self.health = (self.health - damage).max(0);
        if self.health == 0 && !self.is_dead {
            self.mark_dead(now);
        }
        self.health
    }

    /// The outbound record for this object, positioned by projection.
    pub fn record(&self, now: i64) -> ObjectRecord {
        let position = self.position_at(now);
        ObjectRecord {
            id: self.id.clone(),
            object_type: self.kind,
            username: self.username.clone(),
            position: Point::new(position.x, position.y),
            velocity: Point::new(self.velocity.x, self.velocity.y),
            size: self.size,
            charging: self.charging,
            expire_date: now.saturating_add(self.life_length),
            is_dead: self.is_dead,
            time_update: self.time_update,
            new_health: self.health,
        }
    }
}

/// Velocity for a boolean direction set. Diagonals keep the speed at
/// `PLAYER_SPEED` by dividing both components by √2.
pub fn direction_velocity(direction: &Direction) -> DVec2 {
    let mut velocity = DVec2::ZERO;
    if direction.left {
        velocity.x -= PLAYER_SPEED;
    }
    if direction.right {
        velocity.x += PLAYER_SPEED;
    }
    if direction.up {
        velocity.y -= PLAYER_SPEED;
    }
    if direction.down {
        velocity.y += PLAYER_SPEED;
    }
    if velocity.x != 0.0 && velocity.y != 0.0 {
        velocity /= std::f64::consts::SQRT_2;
    }
    velocity
}

/// Owner player id embedded in a snowball id
/// (`snowball_<owner>_<seq>`); `None` for any other id shape, so the
/// self-damage check never suppresses a hit from a non-snowball.
pub fn snowball_owner(id: &str) -> Option<&str> {
    let rest = id.strip_prefix("snowball_")?;
    let end = rest.find('_')?;
    Some(&rest[..end])
}
