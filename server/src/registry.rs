//! Arena of placed structures.
//!
//! Structures live in a map keyed by id. A separate id sequence keeps
//! traversal order (newest first) and a coordinate index answers "what
//! stands on this anchor tile".

use shared::{
    check_collision, ConstructionType, FactionId, Owner, Rect, StructureId, MAP_TILES,
};
use std::collections::{HashMap, VecDeque};

/// One occupied slot of a house.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentSlot {
    pub building: StructureId,
    pub population: u32,
}

#[derive(Debug, Clone)]
pub struct Structure {
    pub id: StructureId,
    pub owner: Owner,
    pub kind: ConstructionType,
    pub faction: FactionId,
    pub x: i32,
    pub y: i32,
    pub population: u32,
    pub attached_house: Option<StructureId>,
    /// Only houses hold slots.
    pub attachments: Vec<AttachmentSlot>,
    pub items_left: u32,
    /// Milliseconds of staffed production accumulated towards the next item.
    pub production_ms: u64,
    pub smoke_active: bool,
    pub smoke_frame: u8,
}

impl Structure {
    pub fn new(
        id: StructureId,
        owner: Owner,
        kind: ConstructionType,
        faction: FactionId,
        x: i32,
        y: i32,
    ) -> Self {
        Self {
            id,
            owner,
            kind,
            faction,
            x,
            y,
            population: 0,
            attached_house: None,
            attachments: Vec::new(),
            items_left: 0,
            production_ms: 0,
            smoke_active: false,
            smoke_frame: 0,
        }
    }

    pub fn footprint(&self) -> Rect {
        Rect::from_tiles(self.x, self.y, self.kind.footprint())
    }

    pub fn is_seed(&self) -> bool {
        self.owner == Owner::Seed
    }
}

#[derive(Default)]
pub struct StructureRegistry {
    structures: HashMap<StructureId, Structure>,
    order: VecDeque<StructureId>,
    by_coord: HashMap<(i32, i32), StructureId>,
}

impl StructureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a structure at the head of the traversal order. Returns false
    /// if the id is taken.
    pub fn insert(&mut self, structure: Structure) -> bool {
        if self.structures.contains_key(&structure.id) {
            return false;
        }
        self.order.push_front(structure.id.clone());
        self.by_coord
            .insert((structure.x, structure.y), structure.id.clone());
        self.structures.insert(structure.id.clone(), structure);
        true
    }

    pub fn remove(&mut self, id: &StructureId) -> Option<Structure> {
        let structure = self.structures.remove(id)?;
        self.order.retain(|other| other != id);
        if self.by_coord.get(&(structure.x, structure.y)) == Some(id) {
            self.by_coord.remove(&(structure.x, structure.y));
        }
        Some(structure)
    }

    pub fn get(&self, id: &StructureId) -> Option<&Structure> {
        self.structures.get(id)
    }

    pub fn get_mut(&mut self, id: &StructureId) -> Option<&mut Structure> {
        self.structures.get_mut(id)
    }

    pub fn contains(&self, id: &StructureId) -> bool {
        self.structures.contains_key(id)
    }

    pub fn at_tile(&self, x: i32, y: i32) -> Option<&Structure> {
        self.by_coord
            .get(&(x, y))
            .and_then(|id| self.structures.get(id))
    }

    /// Structures in traversal order.
    pub fn iter(&self) -> impl Iterator<Item = &Structure> {
        self.order.iter().filter_map(|id| self.structures.get(id))
    }

    /// Snapshot of the traversal order, for loops that mutate.
    pub fn ids(&self) -> Vec<StructureId> {
        self.order.iter().cloned().collect()
    }

    pub fn iter_faction(&self, faction: FactionId) -> impl Iterator<Item = &Structure> {
        self.iter().filter(move |s| s.faction == faction)
    }

    pub fn faction_count(&self, faction: FactionId) -> usize {
        self.iter_faction(faction).count()
    }

    pub fn len(&self) -> usize {
        self.structures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.structures.is_empty()
    }

    /// True if a footprint anchored at `(x, y)` leaves the map or overlaps
    /// a standing structure.
    pub fn collides(&self, x: i32, y: i32, kind: ConstructionType) -> bool {
        let (width, height) = kind.footprint();
        // Coordinates come straight off the wire; keep the bound subtraction-only.
        if x < 0 || y < 0 || x > MAP_TILES - width || y > MAP_TILES - height {
            return true;
        }
        let rect = Rect::from_tiles(x, y, (width, height));
        self.iter()
            .any(|existing| check_collision(&rect, &existing.footprint()))
    }

    /// True if any structure footprint overlaps `rect`.
    pub fn overlaps(&self, rect: &Rect) -> bool {
        self.structures
            .values()
            .any(|existing| check_collision(rect, &existing.footprint()))
    }

    /// Items held by a faction's factories of `item_type`.
    pub fn faction_stock(&self, faction: FactionId, item_type: u32) -> u32 {
        self.iter_faction(faction)
            .filter(|s| s.kind.item_type() == Some(item_type))
            .map(|s| s.items_left)
            .sum()
    }
}
