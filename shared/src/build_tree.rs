//! The static build tree.
//!
//! Each entry names the construction type it gates, the type whose
//! completion unlocks it and the status every faction starts with. Parent
//! `0` marks a root.

use crate::construction::ConstructionType;
use serde::{Deserialize, Serialize};

/// Buildability of one unlock key for one faction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnlockStatus {
    Locked,
    Unlockable,
    Built,
    ResearchPending,
}

/// Symbolic name of a buildability gate, e.g. `CAN_BUILD_HOUSE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnlockKey(pub &'static str);

#[derive(Debug, Clone, Copy)]
pub struct BuildTreeEntry {
    pub key: UnlockKey,
    pub kind: ConstructionType,
    pub label: &'static str,
    pub parent: ConstructionType,
    pub initial: UnlockStatus,
}

/// Parent id of root entries.
pub const ROOT_PARENT: ConstructionType = ConstructionType(0);

const fn entry(
    key: &'static str,
    kind: u32,
    label: &'static str,
    parent: u32,
    initial: UnlockStatus,
) -> BuildTreeEntry {
    BuildTreeEntry {
        key: UnlockKey(key),
        kind: ConstructionType(kind),
        label,
        parent: ConstructionType(parent),
        initial,
    }
}

use UnlockStatus::{Locked, Unlockable};

pub const BUILD_TREE: &[BuildTreeEntry] = &[
    entry("CAN_BUILD_HOUSE", 300, "Housing", 0, Unlockable),
    entry("CAN_BUILD_LASER_RESEARCH", 412, "Laser Research", 300, Unlockable),
    entry("CAN_BUILD_LASER_FACTORY", 112, "Laser Factory", 412, Locked),
    entry("CAN_BUILD_BAZOOKA_RESEARCH", 401, "Bazooka Research", 300, Unlockable),
    entry("CAN_BUILD_BAZOOKA_FACTORY", 101, "Bazooka Factory", 401, Locked),
    entry("CAN_BUILD_TURRET_RESEARCH", 409, "Turret Research", 300, Unlockable),
    entry("CAN_BUILD_TURRET_FACTORY", 109, "Turret Factory", 409, Locked),
    entry("CAN_BUILD_CLOAK_RESEARCH", 400, "Cloak Research", 401, Locked),
    entry("CAN_BUILD_CLOAK_FACTORY", 100, "Cloak Factory", 400, Locked),
    entry("CAN_BUILD_MEDKIT_RESEARCH", 402, "MedKit Research", 401, Locked),
    entry("CAN_BUILD_MEDKIT_FACTORY", 102, "MedKit Factory", 402, Locked),
    entry("CAN_BUILD_HOSPITAL", 200, "Hospital", 402, Locked),
    entry("CAN_BUILD_PLASMA_RESEARCH", 411, "Plasma Turret Research", 409, Locked),
    entry("CAN_BUILD_PLASMA_FACTORY", 111, "Plasma Turret Factory", 411, Locked),
    entry("CAN_BUILD_MINE_RESEARCH", 404, "Mine Research", 409, Locked),
    entry("CAN_BUILD_MINE_FACTORY", 104, "Mine Factory", 404, Locked),
    entry("CAN_BUILD_ORB_RESEARCH", 405, "Orb Research", 400, Locked),
    entry("CAN_BUILD_ORB_FACTORY", 105, "Orb Factory", 405, Locked),
    entry("CAN_BUILD_BOMB_RESEARCH", 403, "Time Bomb Research", 400, Locked),
    entry("CAN_BUILD_BOMB_FACTORY", 103, "Time Bomb Factory", 403, Locked),
    entry("CAN_BUILD_SLEEPER_RESEARCH", 410, "Sleeper Research", 411, Locked),
    entry("CAN_BUILD_SLEEPER_FACTORY", 110, "Sleeper Factory", 410, Locked),
    entry("CAN_BUILD_WALL_RESEARCH", 413, "Wall Research", 411, Locked),
    entry("CAN_BUILD_WALL_FACTORY", 108, "Wall Factory", 413, Locked),
    entry("CAN_BUILD_DFG_RESEARCH", 406, "DFG Research", 404, Locked),
    entry("CAN_BUILD_DFG_FACTORY", 107, "DFG Factory", 406, Locked),
    entry("CAN_BUILD_FLARE_RESEARCH", 407, "Flare Gun Research", 405, Locked),
    entry("CAN_BUILD_FLARE_FACTORY", 106, "Flare Gun Factory", 407, Locked),
];

/// Looks up the build tree entry gating `kind`.
pub fn entry_for(kind: ConstructionType) -> Option<&'static BuildTreeEntry> {
    BUILD_TREE.iter().find(|entry| entry.kind == kind)
}
