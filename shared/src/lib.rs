use serde::{Deserialize, Serialize};
use std::fmt;

pub mod build_tree;
pub mod construction;

pub use build_tree::{entry_for, BuildTreeEntry, UnlockKey, UnlockStatus, BUILD_TREE, ROOT_PARENT};
pub use construction::{ConstructionType, Family, STRUCTURE_TILES};

pub const PROTOCOL_VERSION: u32 = 1;
pub const TILE_SIZE: f32 = 48.0;
pub const MAP_TILES: i32 = 512;
pub const MAP_SIZE: f32 = MAP_TILES as f32 * TILE_SIZE;

pub type ClientId = u32;
pub type FactionId = u32;

/// Identity of a placed structure. Defaults to `"{x}_{y}"` of its tile.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StructureId(pub String);

impl StructureId {
    pub fn from_tile(x: i32, y: i32) -> Self {
        StructureId(format!("{}_{}", x, y))
    }
}

impl fmt::Display for StructureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Owner {
    Player(ClientId),
    /// Placed by the server at boot; cannot be demolished by players.
    Seed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    WrongFaction,
    NotLeader,
    InsufficientFunds,
    Collision,
    TooFar,
    ResearchPending,
    Locked,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::WrongFaction => "wrong_faction",
            DenyReason::NotLeader => "not_leader",
            DenyReason::InsufficientFunds => "insufficient_funds",
            DenyReason::Collision => "collision",
            DenyReason::TooFar => "too_far",
            DenyReason::ResearchPending => "research_pending",
            DenyReason::Locked => "locked",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DemolishDenyReason {
    NotFound,
    Protected,
    NotLeader,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchStatus {
    Idle,
    Pending,
    Complete,
}

/// Anti-cheat verdicts attached to a rejected movement update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Violation {
    #[serde(rename = "movement/exceeds_threshold")]
    MovementExceedsThreshold,
    #[serde(rename = "movement/collision")]
    MovementCollision,
    #[serde(rename = "direction/exceeds_threshold")]
    DirectionExceedsThreshold,
}

impl Violation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Violation::MovementExceedsThreshold => "movement/exceeds_threshold",
            Violation::MovementCollision => "movement/collision",
            Violation::DirectionExceedsThreshold => "direction/exceeds_threshold",
        }
    }
}

/// Pixel position of a unit's top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Offset {
    pub x: f32,
    pub y: f32,
}

impl Offset {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Offset) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Axis-aligned rectangle in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    /// Pixel rectangle covered by a tile-anchored footprint.
    pub fn from_tiles(tile_x: i32, tile_y: i32, (width, height): (i32, i32)) -> Self {
        Self {
            x: tile_x as f32 * TILE_SIZE,
            y: tile_y as f32 * TILE_SIZE,
            w: width as f32 * TILE_SIZE,
            h: height as f32 * TILE_SIZE,
        }
    }

    pub fn right(&self) -> f32 {
        self.x + self.w
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.h
    }
}

/// Strict overlap; rectangles that only share an edge do not collide.
pub fn check_collision(a: &Rect, b: &Rect) -> bool {
    a.x < b.right() && a.right() > b.x && a.y < b.bottom() && a.bottom() > b.y
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureSnapshot {
    pub id: StructureId,
    pub owner: Owner,
    pub kind: ConstructionType,
    pub population: u32,
    pub attached_house_id: Option<StructureId>,
    pub x: i32,
    pub y: i32,
    pub faction: FactionId,
    pub items_left: u32,
    pub items_remaining: u32,
    pub item_limit: Option<u32>,
    pub smoke_active: bool,
    pub smoke_frame: u8,
}

/// A client's claimed unit state. Floats arrive unchecked and may be
/// non-finite; the server sanitizes every field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MovementUpdate {
    pub id: ClientId,
    pub sequence: u32,
    pub offset: Offset,
    pub direction: f32,
    pub is_moving: f32,
    pub is_turning: f32,
}

/// Canonical state of a unit as last accepted by the server.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UnitState {
    pub id: ClientId,
    pub faction: FactionId,
    pub sequence: u32,
    pub offset: Offset,
    pub direction: u8,
    pub is_moving: i8,
    pub is_turning: i8,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Packet {
    // Client -> server
    Connect {
        client_version: u32,
        faction: FactionId,
    },
    Heartbeat,
    PlaceStructure {
        id: Option<StructureId>,
        x: i32,
        y: i32,
        kind: ConstructionType,
        faction: FactionId,
    },
    DemolishStructure {
        id: StructureId,
    },
    CollectFactoryItem {
        building_id: StructureId,
        item_type: u32,
        quantity: u32,
    },
    Movement(MovementUpdate),
    Disconnect,

    // Server -> client
    Connected {
        client_id: ClientId,
        faction: FactionId,
        is_leader: bool,
    },
    LeaderChanged {
        faction: FactionId,
        leader: Option<ClientId>,
    },
    StructurePlaced(StructureSnapshot),
    StructureDenied {
        reason: DenyReason,
        x: i32,
        y: i32,
        id: StructureId,
        research_type: Option<ConstructionType>,
        complete_at: Option<u64>,
    },
    StructureRemoved {
        id: StructureId,
    },
    DemolishDenied {
        id: Option<StructureId>,
        reason: DemolishDenyReason,
    },
    PopulationUpdate {
        snapshot: StructureSnapshot,
        removed: bool,
    },
    ResearchUpdate {
        faction: FactionId,
        research_type: ConstructionType,
        state: ResearchStatus,
        complete_at: Option<u64>,
    },
    FactoryPurge {
        faction: FactionId,
        item_type: u32,
    },
    PlayerRejected {
        reasons: Vec<Violation>,
    },
    PlayerCorrected(UnitState),
    PlayerState(UnitState),
    Disconnected {
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_structure_id_from_tile() {
        assert_eq!(StructureId::from_tile(10, 12).0, "10_12");
        assert_eq!(StructureId::from_tile(-1, 0).to_string(), "-1_0");
    }

    #[test]
    fn test_rect_from_tiles() {
        let rect = Rect::from_tiles(2, 3, (3, 3));
        assert_eq!(rect.x, 96.0);
        assert_eq!(rect.y, 144.0);
        assert_eq!(rect.w, 144.0);
        assert_eq!(rect.bottom(), 288.0);
    }

    #[test]
    fn test_collision_detection_overlap() {
        let a = Rect::new(0.0, 0.0, 32.0, 32.0);
        let b = Rect::new(16.0, 16.0, 32.0, 32.0);
        assert!(check_collision(&a, &b));
        assert!(check_collision(&b, &a));
    }

    #[test]
    fn test_collision_detection_exact_touch() {
        let a = Rect::new(0.0, 0.0, 32.0, 32.0);
        let b = Rect::new(32.0, 0.0, 32.0, 32.0);
        assert!(!check_collision(&a, &b));
    }

    #[test]
    fn test_collision_detection_no_collision() {
        let a = Rect::new(0.0, 0.0, 32.0, 32.0);
        let b = Rect::new(100.0, 100.0, 32.0, 32.0);
        assert!(!check_collision(&a, &b));
    }

    #[test]
    fn test_offset_distance() {
        let a = Offset::new(0.0, 0.0);
        let b = Offset::new(3.0, 4.0);
        assert_approx_eq!(a.distance(&b), 5.0, 0.0001);
    }

    #[test]
    fn test_reason_codes_are_stable() {
        assert_eq!(DenyReason::InsufficientFunds.as_str(), "insufficient_funds");
        assert_eq!(DenyReason::ResearchPending.as_str(), "research_pending");
        assert_eq!(
            Violation::MovementExceedsThreshold.as_str(),
            "movement/exceeds_threshold"
        );
    }

    #[test]
    fn test_packet_serialization_structure_denied() {
        let packet = Packet::StructureDenied {
            reason: DenyReason::TooFar,
            x: 500,
            y: 500,
            id: StructureId::from_tile(500, 500),
            research_type: None,
            complete_at: None,
        };

        let serialized = bincode::serialize(&packet).unwrap();
        let deserialized: Packet = bincode::deserialize(&serialized).unwrap();

        match deserialized {
            Packet::StructureDenied { reason, x, id, .. } => {
                assert_eq!(reason, DenyReason::TooFar);
                assert_eq!(x, 500);
                assert_eq!(id.0, "500_500");
            }
            _ => panic!("Wrong packet type after deserialization"),
        }
    }

    #[test]
    fn test_packet_serialization_movement_keeps_non_finite() {
        let packet = Packet::Movement(MovementUpdate {
            id: 3,
            sequence: 9,
            offset: Offset::new(f32::NAN, 12.0),
            direction: f32::INFINITY,
            is_moving: 1.0,
            is_turning: 0.0,
        });

        let serialized = bincode::serialize(&packet).unwrap();
        let deserialized: Packet = bincode::deserialize(&serialized).unwrap();

        match deserialized {
            Packet::Movement(update) => {
                assert!(update.offset.x.is_nan());
                assert!(update.direction.is_infinite());
                assert_eq!(update.sequence, 9);
            }
            _ => panic!("Wrong packet type after deserialization"),
        }
    }
}
