//! The construction engine.
//!
//! Owns every piece of state a placement or demolition touches: the
//! structure registry, faction unlocks, research buckets, the economy
//! ledger and the factory items lying in the world. Requests are decided
//! against that state and, when accepted, applied in one pass that returns
//! the packets to broadcast.

use crate::client_manager::Requester;
use crate::config::{Rules, SeedStructure};
use crate::dependency::DependencyGraph;
use crate::economy::EconomyLedger;
use crate::production::{FactoryReconciler, WorldItems};
use crate::registry::{AttachmentSlot, Structure, StructureRegistry};
use crate::research::{ResearchEvent, ResearchKey, ResearchRegistry};
use crate::unlocks::{FactionUnlocks, UnlockMap};
use log::{debug, info};
use shared::{
    ClientId, ConstructionType, DemolishDenyReason, DenyReason, FactionId, Owner, Packet,
    ResearchStatus, StructureId, StructureSnapshot, UnlockStatus,
};
use std::collections::HashSet;

/// Attachment slots per house.
pub const HOUSE_SLOTS: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacementRequest {
    pub id: Option<StructureId>,
    pub x: i32,
    pub y: i32,
    pub kind: ConstructionType,
    pub faction: FactionId,
}

impl PlacementRequest {
    pub fn resolved_id(&self) -> StructureId {
        self.id
            .clone()
            .unwrap_or_else(|| StructureId::from_tile(self.x, self.y))
    }
}

/// Why a placement was refused, with enough context for the client to
/// roll back its prediction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial {
    pub reason: DenyReason,
    pub id: StructureId,
    pub x: i32,
    pub y: i32,
    pub research_type: Option<ConstructionType>,
    pub complete_at: Option<u64>,
}

impl Denial {
    fn new(reason: DenyReason, request: &PlacementRequest) -> Self {
        Self {
            reason,
            id: request.resolved_id(),
            x: request.x,
            y: request.y,
            research_type: None,
            complete_at: None,
        }
    }

    pub fn into_packet(self) -> Packet {
        Packet::StructureDenied {
            reason: self.reason,
            x: self.x,
            y: self.y,
            id: self.id,
            research_type: self.research_type,
            complete_at: self.complete_at,
        }
    }
}

pub struct ConstructionEngine {
    rules: Rules,
    structures: StructureRegistry,
    unlocks: FactionUnlocks,
    research: ResearchRegistry,
    economy: EconomyLedger,
    items: WorldItems,
    reconciler: FactoryReconciler,
    population_ms: u64,
}

impl ConstructionEngine {
    pub fn new(rules: Rules) -> Self {
        Self::with_graph(rules, DependencyGraph::standard())
    }

    pub fn with_graph(rules: Rules, graph: DependencyGraph) -> Self {
        Self {
            structures: StructureRegistry::new(),
            unlocks: FactionUnlocks::new(graph),
            research: ResearchRegistry::new(rules.research_duration_ms),
            economy: EconomyLedger::new(rules.starting_cash),
            items: WorldItems::new(),
            reconciler: FactoryReconciler::new(rules.reconcile_radius),
            population_ms: 0,
            rules,
        }
    }

    pub fn rules(&self) -> &Rules {
        &self.rules
    }

    pub fn structures(&self) -> &StructureRegistry {
        &self.structures
    }

    pub fn economy(&self) -> &EconomyLedger {
        &self.economy
    }

    pub fn economy_mut(&mut self) -> &mut EconomyLedger {
        &mut self.economy
    }

    pub fn research(&self) -> &ResearchRegistry {
        &self.research
    }

    pub fn items(&self) -> &WorldItems {
        &self.items
    }

    pub fn items_mut(&mut self) -> &mut WorldItems {
        &mut self.items
    }

    pub fn unlock_status(&self, faction: FactionId, kind: ConstructionType) -> Option<UnlockStatus> {
        self.unlocks.status(faction, kind)
    }

    pub fn unlock_snapshot(&self, faction: FactionId) -> UnlockMap {
        self.unlocks.snapshot(faction)
    }

    // ---------------------------------------------------------------------
    // Placement
    // ---------------------------------------------------------------------

    /// Decides a placement without touching any state.
    pub fn evaluate_placement(
        &self,
        requester: &Requester,
        request: &PlacementRequest,
    ) -> Result<(), Denial> {
        let faction = request.faction;

        if faction != requester.faction {
            return Err(Denial::new(DenyReason::WrongFaction, request));
        }
        if !requester.is_leader {
            return Err(Denial::new(DenyReason::NotLeader, request));
        }
        if !self.economy.can_afford(faction, self.rules.build_cost) {
            return Err(Denial::new(DenyReason::InsufficientFunds, request));
        }
        if self.structures.contains(&request.resolved_id())
            || self.structures.collides(request.x, request.y, request.kind)
        {
            return Err(Denial::new(DenyReason::Collision, request));
        }
        if !self.within_chain(faction, request.x, request.y, request.kind) {
            return Err(Denial::new(DenyReason::TooFar, request));
        }

        if let Some(required) = request.kind.required_research() {
            if !self.research.has_completed(faction, required) {
                return Err(self.research_denial(request, required));
            }
        }

        match self.unlocks.status(faction, request.kind) {
            None | Some(UnlockStatus::Unlockable) => Ok(()),
            Some(UnlockStatus::ResearchPending) => {
                let parent = self
                    .unlocks
                    .graph()
                    .parent(request.kind)
                    .unwrap_or(request.kind);
                Err(self.research_denial(request, parent))
            }
            Some(UnlockStatus::Locked) | Some(UnlockStatus::Built) => {
                Err(Denial::new(DenyReason::Locked, request))
            }
        }
    }

    fn research_denial(&self, request: &PlacementRequest, research_type: ConstructionType) -> Denial {
        let complete_at = self
            .research
            .state(&ResearchKey::new(request.faction, research_type))
            .and_then(|state| state.complete_at);
        Denial {
            research_type: Some(research_type),
            complete_at,
            ..Denial::new(DenyReason::ResearchPending, request)
        }
    }

    /// Chain rule: within the radius of a same-faction structure, unless the
    /// faction has nothing yet or the type is a command center.
    fn within_chain(&self, faction: FactionId, x: i32, y: i32, kind: ConstructionType) -> bool {
        if kind.is_command_center() {
            return true;
        }
        let limit = self.rules.chain_radius_sq();
        let mut count = 0;
        for existing in self.structures.iter_faction(faction) {
            count += 1;
            let dx = (existing.x - x) as i64;
            let dy = (existing.y - y) as i64;
            if dx * dx + dy * dy <= limit {
                return true;
            }
        }
        count == 0
    }

    /// Validates and applies a placement. Returns the packets to broadcast.
    pub fn place(
        &mut self,
        requester: &Requester,
        request: &PlacementRequest,
    ) -> Result<Vec<Packet>, Denial> {
        if let Err(denial) = self.evaluate_placement(requester, request) {
            debug!(
                "Client {} denied {} at ({}, {}): {}",
                requester.client_id,
                request.kind,
                request.x,
                request.y,
                denial.reason.as_str()
            );
            return Err(denial);
        }

        let id = request.resolved_id();
        self.economy
            .debit(request.faction, &id, self.rules.build_cost);

        let structure = Structure::new(
            id.clone(),
            Owner::Player(requester.client_id),
            request.kind,
            request.faction,
            request.x,
            request.y,
        );
        info!(
            "Faction {} placed {} at ({}, {})",
            request.faction, request.kind, request.x, request.y
        );
        Ok(self.commit_structure(structure))
    }

    /// Places a boot-time structure. Only collision is checked.
    pub fn place_seed(&mut self, seed: &SeedStructure) -> Result<StructureId, DenyReason> {
        let id = seed
            .id
            .clone()
            .map(StructureId)
            .unwrap_or_else(|| StructureId::from_tile(seed.x, seed.y));
        let kind = ConstructionType(seed.kind);

        if self.structures.contains(&id) || self.structures.collides(seed.x, seed.y, kind) {
            return Err(DenyReason::Collision);
        }

        let mut structure = Structure::new(id.clone(), Owner::Seed, kind, seed.faction, seed.x, seed.y);
        structure.items_left = seed.items_left.unwrap_or(0);
        self.commit_structure(structure);
        info!("Seeded {} for faction {} as {}", kind, seed.faction, id);
        Ok(id)
    }

    fn commit_structure(&mut self, structure: Structure) -> Vec<Packet> {
        let id = structure.id.clone();
        let faction = structure.faction;
        let kind = structure.kind;
        let mut events = Vec::new();

        if !self.structures.insert(structure) {
            return events;
        }
        self.unlocks.mark_built(faction, kind);

        if kind.is_research() {
            let status = self.research.status(&ResearchKey::new(faction, kind));
            if status != ResearchStatus::Idle {
                self.unlocks.unlock(faction, kind, status);
            }
        }

        if let Some(snapshot) = self.snapshot_of(&id) {
            events.push(Packet::StructurePlaced(snapshot));
        }

        if kind.is_house() {
            self.backfill_house(&id, &mut events);
        } else {
            self.ensure_attachment(&id, &mut events);
        }
        events
    }

    /// Rolls back a placement whose debit is still pending.
    pub fn deny_placement(&mut self, id: &StructureId, reason: DenyReason) -> Vec<Packet> {
        let Some(record) = self.economy.refund(id) else {
            return Vec::new();
        };
        info!(
            "Placement {} of faction {} revoked ({}), refunded {}",
            id,
            record.faction,
            reason.as_str(),
            record.cost
        );
        self.remove_structure(id)
    }

    // ---------------------------------------------------------------------
    // Demolition
    // ---------------------------------------------------------------------

    pub fn demolish(
        &mut self,
        requester: &Requester,
        id: &StructureId,
    ) -> Result<Vec<Packet>, DemolishDenyReason> {
        let Some(structure) = self.structures.get(id) else {
            return Err(DemolishDenyReason::NotFound);
        };
        if structure.is_seed() {
            return Err(DemolishDenyReason::Protected);
        }
        if structure.faction != requester.faction || !requester.is_leader {
            return Err(DemolishDenyReason::NotLeader);
        }

        info!(
            "Client {} demolished {} of faction {}",
            requester.client_id, id, structure.faction
        );
        Ok(self.remove_structure(id))
    }

    /// Removes a structure with its full cascade. Unknown ids are a no-op.
    pub fn remove_structure(&mut self, id: &StructureId) -> Vec<Packet> {
        let mut events = Vec::new();
        let Some(structure) = self.structures.get(id) else {
            return events;
        };
        let faction = structure.faction;
        let kind = structure.kind;

        if kind.is_house() {
            self.release_house(id, &mut events);
        } else {
            self.detach(id, &mut events);
        }

        for event in self.research.cancel_for_building(id) {
            events.push(self.apply_research_event(event));
        }

        let final_snapshot = self.snapshot_of(id);
        self.structures.remove(id);
        self.economy.forget(id);

        if let Some(item_type) = kind.item_type() {
            let purged = self.items.purge(faction, item_type);
            debug!("Purged {} items of type {} for faction {}", purged, item_type, faction);
            events.push(Packet::FactoryPurge { faction, item_type });
        }

        self.recompute_unlocks(faction);

        if let Some(snapshot) = final_snapshot {
            events.push(Packet::PopulationUpdate {
                snapshot,
                removed: true,
            });
        }
        events.push(Packet::StructureRemoved { id: id.clone() });
        events
    }

    /// Demolishes every non-command-center structure whose blast footprint
    /// touches the square of `radius` tiles around `(x, y)`.
    pub fn destroy_in_radius(&mut self, x: i32, y: i32, radius: i32) -> Vec<Packet> {
        let doomed: Vec<StructureId> = self
            .structures
            .iter()
            .filter(|s| !s.kind.is_command_center())
            .filter(|s| {
                let (w, h) = blast_footprint(s.kind);
                s.x <= x.saturating_add(radius)
                    && s.x + w - 1 >= x.saturating_sub(radius)
                    && s.y <= y.saturating_add(radius)
                    && s.y + h - 1 >= y.saturating_sub(radius)
            })
            .map(|s| s.id.clone())
            .collect();

        let mut events = Vec::new();
        for id in doomed {
            events.extend(self.remove_structure(&id));
        }
        events
    }

    /// Demolishes everything a faction owns.
    pub fn destroy_faction(&mut self, faction: FactionId) -> Vec<Packet> {
        let doomed: Vec<StructureId> = self
            .structures
            .iter_faction(faction)
            .map(|s| s.id.clone())
            .collect();

        let mut events = Vec::new();
        for id in &doomed {
            events.extend(self.remove_structure(id));
        }
        self.items.forget_faction(faction);
        info!("Faction {} destroyed ({} structures)", faction, doomed.len());
        events
    }

    /// Rebuilds a faction's unlocks from its census. Research only counts
    /// while a building of that research type still stands; the bucket
    /// itself keeps its state and is replayed again once one is rebuilt.
    fn recompute_unlocks(&mut self, faction: FactionId) {
        let standing: Vec<ConstructionType> = self
            .structures
            .iter_faction(faction)
            .map(|s| s.kind)
            .collect();
        let research: Vec<(ConstructionType, ResearchStatus)> = self
            .research
            .buckets_for(faction)
            .into_iter()
            .filter(|(research_type, _)| standing.contains(research_type))
            .collect();
        self.unlocks.recompute(faction, research, standing);
    }

    // ---------------------------------------------------------------------
    // Houses
    // ---------------------------------------------------------------------

    /// Same-faction house with the fewest occupied slots; ties go to the
    /// first in traversal order.
    fn find_available_house(&self, faction: FactionId) -> Option<StructureId> {
        let mut best: Option<&Structure> = None;
        for candidate in self.structures.iter_faction(faction) {
            if !candidate.kind.is_house() || candidate.attachments.len() >= HOUSE_SLOTS {
                continue;
            }
            if best.map_or(true, |b| candidate.attachments.len() < b.attachments.len()) {
                best = Some(candidate);
                if candidate.attachments.is_empty() {
                    break;
                }
            }
        }
        best.map(|house| house.id.clone())
    }

    /// Makes sure a non-house structure sits in a house slot if one is free.
    /// A dangling house reference counts as no house.
    fn ensure_attachment(&mut self, id: &StructureId, events: &mut Vec<Packet>) {
        let Some(structure) = self.structures.get(id) else {
            return;
        };
        if structure.kind.is_house() {
            return;
        }
        let faction = structure.faction;

        if let Some(house_id) = structure.attached_house.clone() {
            let attached = self
                .structures
                .get(&house_id)
                .map_or(false, |house| house.attachments.iter().any(|slot| &slot.building == id));
            if attached {
                return;
            }
            if let Some(structure) = self.structures.get_mut(id) {
                structure.attached_house = None;
            }
        }

        if let Some(house_id) = self.find_available_house(faction) {
            self.attach(&house_id, id, events);
        }
    }

    fn attach(&mut self, house_id: &StructureId, id: &StructureId, events: &mut Vec<Packet>) {
        let Some(population) = self.structures.get(id).map(|s| s.population) else {
            return;
        };
        let Some(house) = self.structures.get_mut(house_id) else {
            return;
        };
        if house.attachments.len() >= HOUSE_SLOTS {
            return;
        }
        house.attachments.push(AttachmentSlot {
            building: id.clone(),
            population,
        });
        if let Some(structure) = self.structures.get_mut(id) {
            structure.attached_house = Some(house_id.clone());
        }
        self.refresh_house(house_id);
        debug!("Attached {} to house {}", id, house_id);
        self.push_population(id, events);
        self.push_population(house_id, events);
    }

    fn detach(&mut self, id: &StructureId, events: &mut Vec<Packet>) {
        let Some(house_id) = self
            .structures
            .get_mut(id)
            .and_then(|s| s.attached_house.take())
        else {
            return;
        };

        if let Some(house) = self.structures.get_mut(&house_id) {
            house.attachments.retain(|slot| &slot.building != id);
            self.refresh_house(&house_id);
            self.push_population(&house_id, events);
        }
        if let Some(structure) = self.structures.get_mut(id) {
            clear_staffing(structure);
        }
        self.push_population(id, events);
    }

    /// Empties a house that is about to go; its tenants lose their staff.
    fn release_house(&mut self, house_id: &StructureId, events: &mut Vec<Packet>) {
        let tenants: Vec<StructureId> = match self.structures.get_mut(house_id) {
            Some(house) => house.attachments.drain(..).map(|slot| slot.building).collect(),
            None => return,
        };
        self.refresh_house(house_id);
        for tenant in tenants {
            if let Some(structure) = self.structures.get_mut(&tenant) {
                structure.attached_house = None;
                clear_staffing(structure);
            }
            self.push_population(&tenant, events);
        }
    }

    fn backfill_house(&mut self, house_id: &StructureId, events: &mut Vec<Packet>) {
        let Some(faction) = self.structures.get(house_id).map(|h| h.faction) else {
            return;
        };
        let candidates: Vec<StructureId> = self
            .structures
            .iter_faction(faction)
            .filter(|s| !s.kind.is_house() && s.attached_house.is_none())
            .map(|s| s.id.clone())
            .collect();

        for id in candidates {
            let full = self
                .structures
                .get(house_id)
                .map_or(true, |h| h.attachments.len() >= HOUSE_SLOTS);
            if full {
                break;
            }
            self.attach(house_id, &id, events);
        }
    }

    fn refresh_house(&mut self, house_id: &StructureId) {
        let cap = self.rules.population_max_house;
        if let Some(house) = self.structures.get_mut(house_id) {
            let total: u32 = house.attachments.iter().map(|slot| slot.population).sum();
            house.population = total.min(cap);
        }
    }

    /// Grows every housed structure by one population step.
    pub fn grow_population(&mut self) -> Vec<Packet> {
        let mut events = Vec::new();
        let cap = self.rules.population_max_non_house;
        let increment = self.rules.population_increment;

        for id in self.structures.ids() {
            self.ensure_attachment(&id, &mut events);

            let Some(structure) = self.structures.get_mut(&id) else {
                continue;
            };
            let Some(house_id) = structure.attached_house.clone() else {
                continue;
            };
            if structure.population >= cap {
                continue;
            }
            structure.population = (structure.population + increment).min(cap);
            let population = structure.population;

            if let Some(house) = self.structures.get_mut(&house_id) {
                if let Some(slot) = house.attachments.iter_mut().find(|slot| slot.building == id) {
                    slot.population = population;
                }
            }
            self.refresh_house(&house_id);
            self.push_population(&id, &mut events);
            self.push_population(&house_id, &mut events);
        }
        events
    }

    // ---------------------------------------------------------------------
    // Research and production
    // ---------------------------------------------------------------------

    fn apply_research_event(&mut self, event: ResearchEvent) -> Packet {
        self.unlocks
            .unlock(event.key.faction, event.key.research_type, event.state);
        Packet::ResearchUpdate {
            faction: event.key.faction,
            research_type: event.key.research_type,
            state: event.state,
            complete_at: event.complete_at,
        }
    }

    /// Starts research in staffed research buildings, cancels research
    /// whose building is gone or understaffed and completes due timers.
    pub fn advance_research(&mut self, now: u64) -> Vec<Packet> {
        let staffed_at = self.rules.population_max_non_house;
        let running: Vec<(ResearchKey, StructureId)> = self
            .structures
            .iter()
            .filter(|s| s.kind.is_research() && s.population >= staffed_at)
            .map(|s| (ResearchKey::new(s.faction, s.kind), s.id.clone()))
            .collect();

        let mut events = Vec::new();
        let mut active = HashSet::new();
        for (key, building) in running {
            active.insert(key);
            if let Some(event) = self.research.start(key, &building, now) {
                events.push(self.apply_research_event(event));
            }
        }

        for key in self.research.pending_keys() {
            if !active.contains(&key) {
                if let Some(event) = self.research.cancel(&key) {
                    events.push(self.apply_research_event(event));
                }
            }
        }

        for event in self.research.fire_due(now) {
            events.push(self.apply_research_event(event));
        }
        events
    }

    /// One simulation step of `elapsed_ms` ending at `now`.
    pub fn advance(&mut self, now: u64, elapsed_ms: u64) -> Vec<Packet> {
        let mut events = Vec::new();

        self.population_ms += elapsed_ms;
        while self.population_ms >= self.rules.population_interval_ms {
            self.population_ms -= self.rules.population_interval_ms;
            events.extend(self.grow_population());
        }

        events.extend(self.advance_research(now));

        let changed = self
            .reconciler
            .accrue(&mut self.structures, &self.items, &self.rules, elapsed_ms);
        for id in changed {
            self.push_population(&id, &mut events);
        }
        self.reconciler.reconcile(&self.structures, &mut self.items);

        let committed = self.economy.commit_pending();
        if committed > 0 {
            debug!("Committed {} pending construction costs", committed);
        }
        events
    }

    /// Hands factory output to a player. Returns the packets to broadcast.
    pub fn collect(
        &mut self,
        collector: ClientId,
        faction: FactionId,
        building: &StructureId,
        item_type: u32,
        quantity: u32,
    ) -> Vec<Packet> {
        let dispensed = self.reconciler.collect(
            &mut self.structures,
            &mut self.items,
            building,
            item_type,
            quantity,
            collector,
            faction,
        );
        let mut events = Vec::new();
        if dispensed > 0 {
            debug!("Client {} collected {} from {}", collector, dispensed, building);
            self.push_population(building, &mut events);
        }
        events
    }

    // ---------------------------------------------------------------------
    // Snapshots
    // ---------------------------------------------------------------------

    pub fn snapshot(&self, structure: &Structure) -> StructureSnapshot {
        let (item_limit, items_remaining) = match structure.kind.item_type() {
            Some(item_type) => {
                let limit = self.rules.factory_item_limit;
                let outstanding = self.structures.faction_stock(structure.faction, item_type)
                    + self.items.held_count(structure.faction, item_type) as u32;
                (Some(limit), limit.saturating_sub(outstanding))
            }
            None => (None, 0),
        };

        StructureSnapshot {
            id: structure.id.clone(),
            owner: structure.owner,
            kind: structure.kind,
            population: structure.population,
            attached_house_id: structure.attached_house.clone(),
            x: structure.x,
            y: structure.y,
            faction: structure.faction,
            items_left: structure.items_left,
            items_remaining,
            item_limit,
            smoke_active: structure.smoke_active,
            smoke_frame: structure.smoke_frame,
        }
    }

    pub fn snapshot_of(&self, id: &StructureId) -> Option<StructureSnapshot> {
        self.structures.get(id).map(|s| self.snapshot(s))
    }

    fn push_population(&self, id: &StructureId, events: &mut Vec<Packet>) {
        if let Some(snapshot) = self.snapshot_of(id) {
            events.push(Packet::PopulationUpdate {
                snapshot,
                removed: false,
            });
        }
    }

    /// Everything a newly joined client needs to converge: every standing
    /// structure, oldest first, then every non-idle research bucket.
    pub fn replay_for_join(&self) -> Vec<Packet> {
        let mut packets = Vec::new();
        let ordered: Vec<&Structure> = self.structures.iter().collect();
        for structure in ordered.into_iter().rev() {
            let snapshot = self.snapshot(structure);
            packets.push(Packet::StructurePlaced(snapshot.clone()));
            packets.push(Packet::PopulationUpdate {
                snapshot,
                removed: false,
            });
        }
        for event in self.research.non_idle() {
            packets.push(Packet::ResearchUpdate {
                faction: event.key.faction,
                research_type: event.key.research_type,
                state: event.state,
                complete_at: event.complete_at,
            });
        }
        packets
    }
}

fn clear_staffing(structure: &mut Structure) {
    structure.population = 0;
    structure.items_left = 0;
    structure.production_ms = 0;
    structure.smoke_active = false;
    structure.smoke_frame = 0;
}

/// Footprint used by area damage: houses are hit only on their anchor tile.
fn blast_footprint(kind: ConstructionType) -> (i32, i32) {
    if kind.is_house() {
        (1, 1)
    } else {
        kind.footprint()
    }
}
