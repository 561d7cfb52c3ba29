//! Game entities.

mod object;

pub use object::{
    direction_velocity, snowball_owner, GameObject, DEATH_GRACE_MS, PLAYER_SPEED,
};
