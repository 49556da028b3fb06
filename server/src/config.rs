//! Gameplay constants and the optional JSON world seed.

use crate::error::ConfigError;
use serde::Deserialize;
use shared::{FactionId, MAP_TILES, TILE_SIZE};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Every tunable rule of the construction and production simulation.
#[derive(Debug, Clone)]
pub struct Rules {
    /// Flat cost debited for every non-seed placement.
    pub build_cost: i64,
    pub starting_cash: i64,
    /// Maximum tile distance to the nearest same-faction structure.
    pub chain_radius_tiles: i32,
    pub research_duration_ms: u64,
    pub population_increment: u32,
    pub population_interval_ms: u64,
    pub population_max_house: u32,
    /// Population a non-house structure needs to count as staffed.
    pub population_max_non_house: u32,
    pub production_interval_ms: u64,
    pub factory_item_limit: u32,
    /// Pixel radius around a drop point that counts as "at the factory".
    pub reconcile_radius: f32,
    pub smoke_frames: u8,
    pub client_timeout: Duration,
}

impl Default for Rules {
    fn default() -> Self {
        Self {
            build_cost: 500_000,
            starting_cash: 5_000_000,
            chain_radius_tiles: 20,
            research_duration_ms: 8_000,
            population_increment: 5,
            population_interval_ms: 1_000,
            population_max_house: 100,
            population_max_non_house: 50,
            production_interval_ms: 7_000,
            factory_item_limit: 4,
            reconcile_radius: TILE_SIZE,
            smoke_frames: 8,
            client_timeout: Duration::from_secs(5),
        }
    }
}

impl Rules {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.build_cost < 0 {
            return Err(ConfigError::Invalid("build cost cannot be negative".into()));
        }
        if self.chain_radius_tiles <= 0 {
            return Err(ConfigError::Invalid("chain radius must be positive".into()));
        }
        if self.population_interval_ms == 0 || self.production_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "population and production intervals must be positive".into(),
            ));
        }
        if self.smoke_frames == 0 {
            return Err(ConfigError::Invalid("smoke animation needs at least one frame".into()));
        }
        Ok(())
    }

    pub fn chain_radius_sq(&self) -> i64 {
        let r = self.chain_radius_tiles as i64;
        r * r
    }
}

/// Anti-cheat thresholds for unit movement.
#[derive(Debug, Clone)]
pub struct ValidatorOptions {
    pub min_coordinate: f32,
    pub max_coordinate: f32,
    /// Pixels per millisecond.
    pub speed_per_ms: f32,
    /// Smallest per-axis displacement ever allowed.
    pub min_step: f32,
    pub snap_allowance: f32,
    pub frame_tolerance_ms: f32,
    pub direction_slots: u8,
    pub max_turn_delta: u8,
    /// Extra pixels granted to the Euclidean distance check.
    pub euclidean_slack: f32,
    /// Margin trimmed from each side of a unit's tile before collision.
    pub collision_inset: f32,
}

impl Default for ValidatorOptions {
    fn default() -> Self {
        Self {
            min_coordinate: 0.0,
            max_coordinate: (MAP_TILES - 1) as f32 * TILE_SIZE,
            speed_per_ms: 0.5,
            min_step: 20.0,
            snap_allowance: 96.0,
            frame_tolerance_ms: 50.0,
            direction_slots: 32,
            max_turn_delta: 4,
            euclidean_slack: 8.0,
            collision_inset: 8.0,
        }
    }
}

impl ValidatorOptions {
    pub fn axis_hard_cap(&self) -> f32 {
        self.min_step + self.snap_allowance
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct BlockingTile {
    pub x: i32,
    pub y: i32,
    pub code: u8,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SeedStructure {
    #[serde(default)]
    pub id: Option<String>,
    pub x: i32,
    pub y: i32,
    #[serde(rename = "type")]
    pub kind: u32,
    pub faction: FactionId,
    #[serde(default, rename = "itemsLeft")]
    pub items_left: Option<u32>,
}

/// Boot-time world content loaded from JSON.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorldSeed {
    #[serde(default)]
    pub tiles: Vec<BlockingTile>,
    #[serde(default)]
    pub structures: Vec<SeedStructure>,
    /// Per-faction cash overriding `Rules::starting_cash`.
    #[serde(default)]
    pub cash: HashMap<FactionId, i64>,
}

impl WorldSeed {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let seed: WorldSeed = serde_json::from_str(raw)?;
        for tile in &seed.tiles {
            if tile.x < 0 || tile.y < 0 || tile.x >= MAP_TILES || tile.y >= MAP_TILES {
                return Err(ConfigError::Invalid(format!(
                    "tile ({}, {}) lies outside the map",
                    tile.x, tile.y
                )));
            }
        }
        Ok(seed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rules_are_valid() {
        let rules = Rules::default();
        assert!(rules.validate().is_ok());
        assert_eq!(rules.chain_radius_sq(), 400);
    }

    #[test]
    fn test_rejects_zero_interval() {
        let rules = Rules {
            production_interval_ms: 0,
            ..Rules::default()
        };
        assert!(matches!(rules.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validator_hard_cap() {
        let options = ValidatorOptions::default();
        assert_eq!(options.axis_hard_cap(), 116.0);
        assert_eq!(options.max_coordinate, 24528.0);
    }

    #[test]
    fn test_seed_parsing() {
        let raw = r#"{
            "tiles": [{"x": 4, "y": 5, "code": 2}],
            "structures": [
                {"x": 10, "y": 10, "type": 0, "faction": 1},
                {"id": "hq", "x": 40, "y": 40, "type": 101, "faction": 2, "itemsLeft": 3}
            ],
            "cash": {"2": 0}
        }"#;

        let seed = WorldSeed::from_json(raw).unwrap();
        assert_eq!(seed.tiles.len(), 1);
        assert_eq!(seed.structures.len(), 2);
        assert_eq!(seed.structures[1].id.as_deref(), Some("hq"));
        assert_eq!(seed.structures[1].items_left, Some(3));
        assert_eq!(seed.cash.get(&2), Some(&0));
    }

    #[test]
    fn test_seed_rejects_out_of_map_tile() {
        let raw = r#"{"tiles": [{"x": 512, "y": 0, "code": 1}]}"#;
        assert!(matches!(
            WorldSeed::from_json(raw),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_seed_rejects_garbage() {
        assert!(matches!(
            WorldSeed::from_json("{"),
            Err(ConfigError::Parse(_))
        ));
    }
}
