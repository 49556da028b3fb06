//! Movement anti-cheat.
//!
//! Every field of a client's claimed unit state is sanitized on its own,
//! then position and facing are checked against the last trusted state.
//! A rejected field falls back to its trusted value; accepted fields are
//! kept.

use crate::config::ValidatorOptions;
use crate::registry::StructureRegistry;
use crate::terrain::TerrainMap;
use log::debug;
use shared::{FactionId, MovementUpdate, Offset, Rect, UnitState, Violation, MAP_SIZE, TILE_SIZE};

/// Last server-accepted state of a unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrustedUnit {
    pub state: UnitState,
    /// Time of the last accepted position.
    pub last_update_at: u64,
    /// Server-driven units get wider bounds.
    pub simulated: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationOutcome {
    pub valid: bool,
    pub state: UnitState,
    pub reasons: Vec<Violation>,
    pub position_accepted: bool,
}

/// Static obstacles a unit can collide with.
pub struct Surroundings<'a> {
    pub terrain: &'a TerrainMap,
    pub structures: &'a StructureRegistry,
}

pub struct MovementValidator {
    options: ValidatorOptions,
}

impl MovementValidator {
    pub fn new(options: ValidatorOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ValidatorOptions {
        &self.options
    }

    /// First trusted state of a unit. Nothing to compare against, so only
    /// sanitization applies.
    pub fn initialize(
        &self,
        update: &MovementUpdate,
        faction: FactionId,
        now: u64,
        simulated: bool,
    ) -> TrustedUnit {
        let fallback = UnitState {
            id: update.id,
            faction,
            sequence: 0,
            offset: Offset::default(),
            direction: 0,
            is_moving: 0,
            is_turning: 0,
        };
        TrustedUnit {
            state: self.sanitize(update, &fallback),
            last_update_at: now,
            simulated,
        }
    }

    pub fn validate(
        &self,
        previous: &TrustedUnit,
        update: &MovementUpdate,
        now: u64,
        surroundings: &Surroundings<'_>,
    ) -> ValidationOutcome {
        let trusted = &previous.state;
        let mut state = self.sanitize(update, trusted);
        let mut reasons = Vec::new();
        let mut position_accepted = true;

        let elapsed = now.saturating_sub(previous.last_update_at).max(1);
        let bound = self.movement_bound(elapsed, previous.simulated);
        let dx = state.offset.x - trusted.offset.x;
        let dy = state.offset.y - trusted.offset.y;
        let distance = (dx * dx + dy * dy).sqrt();

        if dx.abs() > bound || dy.abs() > bound || distance > bound + self.options.euclidean_slack {
            reasons.push(Violation::MovementExceedsThreshold);
            state.offset = trusted.offset;
            position_accepted = false;
        } else if self.collides(state.offset, surroundings) {
            reasons.push(Violation::MovementCollision);
            state.offset = trusted.offset;
            position_accepted = false;
        }

        let max_turn = if previous.simulated {
            self.options.max_turn_delta.saturating_mul(4)
        } else {
            self.options.max_turn_delta
        };
        if self.direction_delta(trusted.direction, state.direction) > max_turn {
            reasons.push(Violation::DirectionExceedsThreshold);
            state.direction = trusted.direction;
        }

        if !reasons.is_empty() {
            debug!(
                "Unit {} update {} rejected: {:?}",
                state.id, state.sequence, reasons
            );
        }

        ValidationOutcome {
            valid: reasons.is_empty(),
            state,
            reasons,
            position_accepted,
        }
    }

    /// Largest per-axis displacement allowed after `elapsed_ms`.
    pub fn movement_bound(&self, elapsed_ms: u64, simulated: bool) -> f32 {
        let options = &self.options;
        let cap = options.axis_hard_cap();
        let projected = (elapsed_ms as f32 + options.frame_tolerance_ms) * options.speed_per_ms;
        let mut bound = if projected.is_finite() {
            projected.max(options.min_step).min(cap)
        } else {
            options.min_step
        };

        if simulated {
            let boost = if elapsed_ms < 200 {
                options.min_step * 4.0
            } else {
                options.min_step * 2.0
            };
            bound = bound.max(boost).min(cap);
        }
        bound
    }

    /// True if a unit whose tile starts at `offset` would overlap the map
    /// edge, blocking terrain or a structure.
    pub fn collides(&self, offset: Offset, surroundings: &Surroundings<'_>) -> bool {
        let inset = self.options.collision_inset;
        let rect = Rect::new(
            offset.x + inset,
            offset.y + inset,
            TILE_SIZE - inset * 2.0,
            TILE_SIZE - inset * 2.0,
        );

        if rect.x < 0.0 || rect.y < 0.0 || rect.right() > MAP_SIZE || rect.bottom() > MAP_SIZE {
            return true;
        }

        let left = (rect.x / TILE_SIZE).floor() as i32;
        let right = (rect.right() / TILE_SIZE).floor() as i32;
        let top = (rect.y / TILE_SIZE).floor() as i32;
        let bottom = (rect.bottom() / TILE_SIZE).floor() as i32;
        let terrain = surroundings.terrain;
        if terrain.is_blocking(left, top)
            || terrain.is_blocking(left, bottom)
            || terrain.is_blocking(right, top)
            || terrain.is_blocking(right, bottom)
        {
            return true;
        }

        surroundings.structures.overlaps(&rect)
    }

    fn direction_delta(&self, previous: u8, current: u8) -> u8 {
        let slots = self.options.direction_slots as i32;
        if slots <= 0 {
            return (current as i32 - previous as i32).unsigned_abs() as u8;
        }
        let forward = (current as i32 - previous as i32).rem_euclid(slots);
        let backward = (previous as i32 - current as i32).rem_euclid(slots);
        forward.min(backward) as u8
    }

    fn sanitize(&self, update: &MovementUpdate, fallback: &UnitState) -> UnitState {
        UnitState {
            id: fallback.id,
            faction: fallback.faction,
            sequence: update.sequence,
            offset: Offset::new(
                self.sanitize_coordinate(update.offset.x, fallback.offset.x),
                self.sanitize_coordinate(update.offset.y, fallback.offset.y),
            ),
            direction: self.sanitize_direction(update.direction, fallback.direction),
            is_moving: sanitize_intent(update.is_moving, fallback.is_moving),
            is_turning: sanitize_intent(update.is_turning, fallback.is_turning),
        }
    }

    fn sanitize_coordinate(&self, value: f32, fallback: f32) -> f32 {
        let value = if value.is_finite() { value } else { fallback };
        value.clamp(self.options.min_coordinate, self.options.max_coordinate)
    }

    fn sanitize_direction(&self, value: f32, fallback: u8) -> u8 {
        if !value.is_finite() {
            return fallback;
        }
        let slots = self.options.direction_slots as i64;
        let rounded = value.round() as i64;
        if slots > 0 {
            rounded.rem_euclid(slots) as u8
        } else {
            fallback
        }
    }
}

fn sanitize_intent(value: f32, fallback: i8) -> i8 {
    if !value.is_finite() {
        return fallback;
    }
    value.clamp(-1.0, 1.0).round() as i8
}
