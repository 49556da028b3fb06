//! Factory output and the pickable items it leaves in the world.
//!
//! A factory's `items_left` is the truth. Each tick the reconciler makes the
//! unowned items lying at the factory's drop point match that number,
//! spawning or removing the difference.

use crate::config::Rules;
use crate::registry::{Structure, StructureRegistry};
use log::debug;
use shared::{ClientId, ConstructionType, FactionId, Offset, StructureId, TILE_SIZE};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub struct WorldItem {
    pub id: u64,
    pub item_type: u32,
    pub faction: FactionId,
    pub position: Offset,
    /// Set once a player has picked the item up.
    pub holder: Option<ClientId>,
}

/// Pickable objects lying in (or carried through) the world.
#[derive(Default)]
pub struct WorldItems {
    items: BTreeMap<u64, WorldItem>,
    next_id: u64,
}

impl WorldItems {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn(&mut self, item_type: u32, faction: FactionId, position: Offset) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        self.items.insert(
            id,
            WorldItem {
                id,
                item_type,
                faction,
                position,
                holder: None,
            },
        );
        id
    }

    pub fn get(&self, id: u64) -> Option<&WorldItem> {
        self.items.get(&id)
    }

    pub fn remove(&mut self, id: u64) -> Option<WorldItem> {
        self.items.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &WorldItem> {
        self.items.values()
    }

    fn unowned_near(
        &self,
        item_type: u32,
        faction: FactionId,
        at: Offset,
        radius: f32,
    ) -> impl Iterator<Item = &WorldItem> {
        self.items.values().filter(move |item| {
            item.holder.is_none()
                && item.item_type == item_type
                && item.faction == faction
                && item.position.distance(&at) <= radius
        })
    }

    pub fn count_unowned_near(
        &self,
        item_type: u32,
        faction: FactionId,
        at: Offset,
        radius: f32,
    ) -> usize {
        self.unowned_near(item_type, faction, at, radius).count()
    }

    /// Removes up to `count` matching items. Returns how many went.
    pub fn remove_unowned_near(
        &mut self,
        item_type: u32,
        faction: FactionId,
        at: Offset,
        radius: f32,
        count: usize,
    ) -> usize {
        let doomed: Vec<u64> = self
            .unowned_near(item_type, faction, at, radius)
            .take(count)
            .map(|item| item.id)
            .collect();
        for id in &doomed {
            self.items.remove(id);
        }
        doomed.len()
    }

    /// Hands up to `count` matching items to `holder`.
    pub fn pick_up_near(
        &mut self,
        item_type: u32,
        faction: FactionId,
        at: Offset,
        radius: f32,
        count: usize,
        holder: ClientId,
    ) -> usize {
        let taken: Vec<u64> = self
            .unowned_near(item_type, faction, at, radius)
            .take(count)
            .map(|item| item.id)
            .collect();
        for id in &taken {
            if let Some(item) = self.items.get_mut(id) {
                item.holder = Some(holder);
            }
        }
        taken.len()
    }

    pub fn held_count(&self, faction: FactionId, item_type: u32) -> usize {
        self.items
            .values()
            .filter(|item| {
                item.holder.is_some() && item.faction == faction && item.item_type == item_type
            })
            .count()
    }

    /// Drops every unowned item of the faction and type, wherever it lies.
    pub fn purge(&mut self, faction: FactionId, item_type: u32) -> usize {
        let before = self.items.len();
        self.items.retain(|_, item| {
            !(item.holder.is_none() && item.faction == faction && item.item_type == item_type)
        });
        before - self.items.len()
    }

    pub fn forget_faction(&mut self, faction: FactionId) {
        self.items.retain(|_, item| item.faction != faction);
    }
}

/// Where a factory puts its output, in pixels.
pub fn drop_point(structure: &Structure) -> Offset {
    Offset::new(
        structure.x as f32 * TILE_SIZE + 56.0,
        structure.y as f32 * TILE_SIZE + 102.0,
    )
}

/// True while the faction has a staffed research building of the type
/// gating `kind`. Ungated types always qualify.
pub fn has_active_research_for_building_type(
    registry: &StructureRegistry,
    faction: FactionId,
    kind: ConstructionType,
    staffed_at: u32,
) -> bool {
    let Some(required) = kind.required_research() else {
        return true;
    };
    registry
        .iter_faction(faction)
        .any(|s| s.kind == required && s.population >= staffed_at)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    pub spawned: usize,
    pub removed: usize,
}

pub struct FactoryReconciler {
    radius: f32,
}

impl FactoryReconciler {
    pub fn new(radius: f32) -> Self {
        Self { radius }
    }

    /// Brings the items at every factory's drop point in line with its
    /// `items_left`.
    pub fn reconcile(&self, registry: &StructureRegistry, items: &mut WorldItems) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        for factory in registry.iter() {
            let Some(item_type) = factory.kind.item_type() else {
                continue;
            };
            let at = drop_point(factory);
            let expected = factory.items_left as usize;
            let existing = items.count_unowned_near(item_type, factory.faction, at, self.radius);

            if existing > expected {
                report.removed += items.remove_unowned_near(
                    item_type,
                    factory.faction,
                    at,
                    self.radius,
                    existing - expected,
                );
            } else {
                for _ in existing..expected {
                    items.spawn(item_type, factory.faction, at);
                    report.spawned += 1;
                }
            }
        }

        if report.spawned > 0 || report.removed > 0 {
            debug!(
                "Reconciled factories: {} spawned, {} removed",
                report.spawned, report.removed
            );
        }
        report
    }

    /// Advances production by `elapsed_ms`. Returns the factories whose
    /// visible state changed.
    pub fn accrue(
        &self,
        registry: &mut StructureRegistry,
        items: &WorldItems,
        rules: &Rules,
        elapsed_ms: u64,
    ) -> Vec<StructureId> {
        let mut changed = Vec::new();

        for id in registry.ids() {
            let Some(factory) = registry.get(&id) else {
                continue;
            };
            let Some(item_type) = factory.kind.item_type() else {
                continue;
            };

            let staffed = factory.population >= rules.population_max_non_house;
            let researched = has_active_research_for_building_type(
                registry,
                factory.faction,
                factory.kind,
                rules.population_max_non_house,
            );
            let outstanding = registry.faction_stock(factory.faction, item_type) as usize
                + items.held_count(factory.faction, item_type);
            let producing = staffed && researched && outstanding < rules.factory_item_limit as usize;

            let Some(factory) = registry.get_mut(&id) else {
                continue;
            };
            let was_smoking = factory.smoke_active;
            factory.smoke_active = producing;

            if !producing {
                factory.smoke_frame = 0;
                if was_smoking {
                    changed.push(id);
                }
                continue;
            }

            factory.smoke_frame = (factory.smoke_frame + 1) % rules.smoke_frames;
            factory.production_ms += elapsed_ms;
            if factory.production_ms >= rules.production_interval_ms {
                factory.production_ms = 0;
                factory.items_left += 1;
                debug!("Factory {} produced item {}", factory.id, item_type);
                changed.push(id);
            } else if !was_smoking {
                changed.push(id);
            }
        }

        changed
    }

    /// Dispenses up to `quantity` (at least one) items from a factory to a
    /// member of its faction. Returns how many were handed over.
    pub fn collect(
        &self,
        registry: &mut StructureRegistry,
        items: &mut WorldItems,
        building: &StructureId,
        item_type: u32,
        quantity: u32,
        collector: ClientId,
        collector_faction: FactionId,
    ) -> u32 {
        let Some(factory) = registry.get_mut(building) else {
            return 0;
        };
        if factory.faction != collector_faction || factory.kind.item_type() != Some(item_type) {
            debug!(
                "Client {} cannot collect item {} from {}",
                collector, item_type, building
            );
            return 0;
        }

        let dispensed = factory.items_left.min(quantity.max(1));
        if dispensed == 0 {
            return 0;
        }
        factory.items_left -= dispensed;

        let at = drop_point(factory);
        let taken = items.pick_up_near(
            item_type,
            factory.faction,
            at,
            self.radius,
            dispensed as usize,
            collector,
        );
        // Items not yet reconciled into the world are handed over directly.
        for _ in taken..dispensed as usize {
            let id = items.spawn(item_type, factory.faction, at);
            if let Some(item) = items.items.get_mut(&id) {
                item.holder = Some(collector);
            }
        }
        dispensed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::Owner;

    fn factory(x: i32, y: i32, items_left: u32) -> Structure {
        let mut s = Structure::new(
            StructureId::from_tile(x, y),
            Owner::Player(1),
            ConstructionType(101),
            1,
            x,
            y,
        );
        s.items_left = items_left;
        s
    }

    fn research(x: i32, y: i32, population: u32) -> Structure {
        let mut s = Structure::new(
            StructureId::from_tile(x, y),
            Owner::Player(1),
            ConstructionType(401),
            1,
            x,
            y,
        );
        s.population = population;
        s
    }

    #[test]
    fn test_drop_point() {
        let at = drop_point(&factory(2, 3, 0));
        assert_eq!(at, Offset::new(152.0, 246.0));
    }

    #[test]
    fn test_reconcile_spawns_deficit_and_is_idempotent() {
        let mut registry = StructureRegistry::new();
        registry.insert(factory(10, 10, 3));
        let mut items = WorldItems::new();
        let reconciler = FactoryReconciler::new(TILE_SIZE);

        let first = reconciler.reconcile(&registry, &mut items);
        assert_eq!(first.spawned, 3);
        assert_eq!(items.len(), 3);

        let second = reconciler.reconcile(&registry, &mut items);
        assert_eq!(second, ReconcileReport::default());
        assert_eq!(items.len(), 3);
    }

    #[test]
    fn test_reconcile_removes_excess() {
        let mut registry = StructureRegistry::new();
        let f = factory(10, 10, 1);
        let at = drop_point(&f);
        registry.insert(f);
        let mut items = WorldItems::new();
        for _ in 0..4 {
            items.spawn(1, 1, at);
        }
        // Far away or another faction: not counted.
        items.spawn(1, 1, Offset::new(0.0, 0.0));
        items.spawn(1, 2, at);

        let report = FactoryReconciler::new(TILE_SIZE).reconcile(&registry, &mut items);
        assert_eq!(report.removed, 3);
        assert_eq!(items.count_unowned_near(1, 1, at, TILE_SIZE), 1);
        assert_eq!(items.len(), 3);
    }

    #[test]
    fn test_research_gate_for_production() {
        let mut registry = StructureRegistry::new();
        registry.insert(research(0, 0, 10));
        assert!(!has_active_research_for_building_type(
            &registry,
            1,
            ConstructionType(101),
            50
        ));
        registry.get_mut(&StructureId::from_tile(0, 0)).unwrap().population = 50;
        assert!(has_active_research_for_building_type(
            &registry,
            1,
            ConstructionType(101),
            50
        ));
        assert!(!has_active_research_for_building_type(
            &registry,
            2,
            ConstructionType(101),
            50
        ));
        assert!(has_active_research_for_building_type(
            &registry,
            2,
            ConstructionType::HOUSE,
            50
        ));
    }

    #[test]
    fn test_accrue_requires_staff_and_research() {
        let rules = Rules::default();
        let mut registry = StructureRegistry::new();
        registry.insert(factory(10, 10, 0));
        registry.insert(research(0, 0, rules.population_max_non_house));
        let items = WorldItems::new();
        let reconciler = FactoryReconciler::new(rules.reconcile_radius);
        let id = StructureId::from_tile(10, 10);

        reconciler.accrue(&mut registry, &items, &rules, rules.production_interval_ms);
        assert_eq!(registry.get(&id).unwrap().items_left, 0);

        registry.get_mut(&id).unwrap().population = rules.population_max_non_house;
        let changed = reconciler.accrue(&mut registry, &items, &rules, rules.production_interval_ms);
        assert_eq!(changed, vec![id.clone()]);
        assert_eq!(registry.get(&id).unwrap().items_left, 1);
        assert!(registry.get(&id).unwrap().smoke_active);
    }

    #[test]
    fn test_accrue_stops_at_item_limit() {
        let rules = Rules::default();
        let mut registry = StructureRegistry::new();
        let mut f = factory(10, 10, rules.factory_item_limit);
        f.population = rules.population_max_non_house;
        registry.insert(f);
        registry.insert(research(0, 0, rules.population_max_non_house));
        let items = WorldItems::new();

        FactoryReconciler::new(rules.reconcile_radius).accrue(
            &mut registry,
            &items,
            &rules,
            rules.production_interval_ms,
        );
        let f = registry.get(&StructureId::from_tile(10, 10)).unwrap();
        assert_eq!(f.items_left, rules.factory_item_limit);
        assert!(!f.smoke_active);
    }

    #[test]
    fn test_collect_dispenses_and_marks_held() {
        let mut registry = StructureRegistry::new();
        registry.insert(factory(10, 10, 3));
        let mut items = WorldItems::new();
        let reconciler = FactoryReconciler::new(TILE_SIZE);
        reconciler.reconcile(&registry, &mut items);
        let id = StructureId::from_tile(10, 10);

        assert_eq!(reconciler.collect(&mut registry, &mut items, &id, 1, 0, 7, 1), 1);
        assert_eq!(reconciler.collect(&mut registry, &mut items, &id, 1, 9, 7, 1), 2);
        assert_eq!(reconciler.collect(&mut registry, &mut items, &id, 1, 1, 7, 1), 0);
        assert_eq!(registry.get(&id).unwrap().items_left, 0);
        assert_eq!(items.held_count(1, 1), 3);

        // Nothing left to reconcile away.
        let report = reconciler.reconcile(&registry, &mut items);
        assert_eq!(report, ReconcileReport::default());
    }

    #[test]
    fn test_collect_rejects_other_faction() {
        let mut registry = StructureRegistry::new();
        registry.insert(factory(10, 10, 3));
        let mut items = WorldItems::new();
        let id = StructureId::from_tile(10, 10);
        let reconciler = FactoryReconciler::new(TILE_SIZE);
        assert_eq!(reconciler.collect(&mut registry, &mut items, &id, 1, 1, 7, 2), 0);
        assert_eq!(registry.get(&id).unwrap().items_left, 3);
    }

    #[test]
    fn test_purge() {
        let mut items = WorldItems::new();
        items.spawn(1, 1, Offset::default());
        items.spawn(1, 1, Offset::new(900.0, 900.0));
        items.spawn(2, 1, Offset::default());
        let held = items.spawn(1, 1, Offset::default());
        items.pick_up_near(1, 1, Offset::default(), 1.0, 1, 9);
        assert!(items.get(held).is_some());

        assert_eq!(items.purge(1, 1), 2);
        assert_eq!(items.len(), 2);
    }
}
