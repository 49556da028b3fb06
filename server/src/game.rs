//! The authoritative world.
//!
//! `GameState` owns the construction engine, the movement validator and the
//! trusted unit states. Requests and ticks go in; `Outbound` packets tagged
//! with their recipients come out for the network layer to deliver.

use crate::client_manager::Requester;
use crate::config::{Rules, ValidatorOptions, WorldSeed};
use crate::construction::{ConstructionEngine, PlacementRequest};
use crate::terrain::TerrainMap;
use crate::validator::{MovementValidator, Surroundings, TrustedUnit, ValidationOutcome};
use log::{debug, info, warn};
use shared::{
    ClientId, DenyReason, FactionId, MovementUpdate, Offset, Owner, Packet, StructureId,
    Violation,
};
use std::collections::HashMap;

/// Ids handed to server-driven units start here, clear of client ids.
pub const SIMULATED_UNIT_BASE: u32 = 1 << 31;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    Client(ClientId),
    All,
    AllExcept(ClientId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub to: Recipient,
    pub packet: Packet,
}

impl Outbound {
    pub fn to_client(client_id: ClientId, packet: Packet) -> Self {
        Self {
            to: Recipient::Client(client_id),
            packet,
        }
    }

    pub fn broadcast(packet: Packet) -> Self {
        Self {
            to: Recipient::All,
            packet,
        }
    }
}

fn broadcast_all(packets: Vec<Packet>) -> Vec<Outbound> {
    packets.into_iter().map(Outbound::broadcast).collect()
}

pub struct GameState {
    pub tick: u32,
    /// Simulation clock in milliseconds.
    pub now_ms: u64,
    engine: ConstructionEngine,
    validator: MovementValidator,
    terrain: TerrainMap,
    units: HashMap<u32, TrustedUnit>,
    next_simulated_id: u32,
}

impl GameState {
    pub fn new(rules: Rules, options: ValidatorOptions, terrain: TerrainMap) -> Self {
        Self {
            tick: 0,
            now_ms: 0,
            engine: ConstructionEngine::new(rules),
            validator: MovementValidator::new(options),
            terrain,
            units: HashMap::new(),
            next_simulated_id: SIMULATED_UNIT_BASE,
        }
    }

    /// Builds the world from a seed: terrain, cash overrides and static
    /// structures. Seeds that collide are skipped.
    pub fn from_seed(rules: Rules, options: ValidatorOptions, seed: &WorldSeed) -> Self {
        let mut game = Self::new(rules, options, TerrainMap::from_tiles(&seed.tiles));

        for (faction, cash) in &seed.cash {
            game.engine.economy_mut().set_cash(*faction, *cash);
        }
        for structure in &seed.structures {
            if let Err(reason) = game.engine.place_seed(structure) {
                warn!(
                    "Skipping seed structure {} at ({}, {}): {}",
                    structure.kind,
                    structure.x,
                    structure.y,
                    reason.as_str()
                );
            }
        }
        info!(
            "World seeded with {} structures and {} blocking tiles",
            game.engine.structures().len(),
            seed.tiles.len()
        );
        game
    }

    pub fn engine(&self) -> &ConstructionEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut ConstructionEngine {
        &mut self.engine
    }

    pub fn unit(&self, id: u32) -> Option<&TrustedUnit> {
        self.units.get(&id)
    }

    /// Everything a joining client needs to catch up with the world.
    pub fn add_player(&mut self, client_id: ClientId, faction: FactionId) -> Vec<Outbound> {
        info!("Added player {} to faction {}", client_id, faction);

        let mut outbound: Vec<Outbound> = self
            .engine
            .replay_for_join()
            .into_iter()
            .map(|packet| Outbound::to_client(client_id, packet))
            .collect();

        let mut ids: Vec<u32> = self.units.keys().copied().collect();
        ids.sort_unstable();
        for id in ids {
            if let Some(unit) = self.units.get(&id) {
                outbound.push(Outbound::to_client(client_id, Packet::PlayerState(unit.state)));
            }
        }
        outbound
    }

    /// Detaches a client's trusted unit so it can follow the client to a
    /// new session.
    pub fn take_unit(&mut self, client_id: ClientId) -> Option<TrustedUnit> {
        self.units.remove(&client_id)
    }

    /// Re-keys a carried unit under its new session id.
    pub fn restore_unit(&mut self, client_id: ClientId, faction: FactionId, mut unit: TrustedUnit) {
        unit.state.id = client_id;
        unit.state.faction = faction;
        debug!("Unit restored for client {} at {:?}", client_id, unit.state.offset);
        self.units.insert(client_id, unit);
    }

    pub fn remove_player(&mut self, client_id: &ClientId) {
        self.units.remove(client_id);
        info!("Removed player {}", client_id);
    }

    /// Dispatches a gameplay request from an authenticated client.
    pub fn handle_request(&mut self, requester: &Requester, packet: Packet) -> Vec<Outbound> {
        let client_id = requester.client_id;

        match packet {
            Packet::PlaceStructure {
                id,
                x,
                y,
                kind,
                faction,
            } => {
                let request = PlacementRequest {
                    id,
                    x,
                    y,
                    kind,
                    faction,
                };
                match self.engine.place(requester, &request) {
                    Ok(events) => broadcast_all(events),
                    Err(denial) => vec![Outbound::to_client(client_id, denial.into_packet())],
                }
            }

            Packet::DemolishStructure { id } => match self.engine.demolish(requester, &id) {
                Ok(events) => broadcast_all(events),
                Err(reason) => {
                    debug!("Client {} cannot demolish {}: {:?}", client_id, id, reason);
                    vec![Outbound::to_client(
                        client_id,
                        Packet::DemolishDenied {
                            id: Some(id),
                            reason,
                        },
                    )]
                }
            },

            Packet::CollectFactoryItem {
                building_id,
                item_type,
                quantity,
            } => broadcast_all(self.engine.collect(
                client_id,
                requester.faction,
                &building_id,
                item_type,
                quantity,
            )),

            Packet::Movement(update) => self.update_movement(requester, &update),

            _ => {
                warn!("Unexpected gameplay packet from client {}", client_id);
                Vec::new()
            }
        }
    }

    fn surroundings(&self) -> Surroundings<'_> {
        Surroundings {
            terrain: &self.terrain,
            structures: self.engine.structures(),
        }
    }

    /// Checks a claimed unit state against the last trusted one and stores
    /// whatever survives. Clients only ever move their own unit.
    pub fn update_movement(&mut self, requester: &Requester, update: &MovementUpdate) -> Vec<Outbound> {
        let client_id = requester.client_id;
        let update = MovementUpdate {
            id: client_id,
            ..*update
        };

        let Some(previous) = self.units.get(&client_id).copied() else {
            let unit = self
                .validator
                .initialize(&update, requester.faction, self.now_ms, false);
            if self.validator.collides(unit.state.offset, &self.surroundings()) {
                info!("Unit {} refused a blocked starting position", client_id);
                return vec![Outbound::to_client(
                    client_id,
                    Packet::PlayerRejected {
                        reasons: vec![Violation::MovementCollision],
                    },
                )];
            }
            self.units.insert(client_id, unit);
            return vec![Outbound {
                to: Recipient::AllExcept(client_id),
                packet: Packet::PlayerState(unit.state),
            }];
        };

        let outcome = self.apply_movement(client_id, &previous, &update);
        let mut outbound = Vec::new();
        if !outcome.valid {
            outbound.push(Outbound::to_client(
                client_id,
                Packet::PlayerRejected {
                    reasons: outcome.reasons.clone(),
                },
            ));
            outbound.push(Outbound::to_client(
                client_id,
                Packet::PlayerCorrected(outcome.state),
            ));
        }
        outbound.push(Outbound {
            to: Recipient::AllExcept(client_id),
            packet: Packet::PlayerState(outcome.state),
        });
        outbound
    }

    fn apply_movement(
        &mut self,
        id: u32,
        previous: &TrustedUnit,
        update: &MovementUpdate,
    ) -> ValidationOutcome {
        let now = self.now_ms;
        let outcome = self
            .validator
            .validate(previous, update, now, &self.surroundings());

        if !outcome.valid {
            info!(
                "Unit {} movement rejected: {}",
                id,
                outcome
                    .reasons
                    .iter()
                    .map(|reason| reason.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        let last_update_at = if outcome.position_accepted {
            now
        } else {
            previous.last_update_at
        };
        self.units.insert(
            id,
            TrustedUnit {
                state: outcome.state,
                last_update_at,
                simulated: previous.simulated,
            },
        );
        outcome
    }

    /// Registers a server-driven unit. Returns its id.
    pub fn spawn_simulated_unit(&mut self, faction: FactionId, offset: Offset) -> u32 {
        let id = self.next_simulated_id;
        self.next_simulated_id = self.next_simulated_id.wrapping_add(1).max(SIMULATED_UNIT_BASE);

        let update = MovementUpdate {
            id,
            sequence: 0,
            offset,
            direction: 0.0,
            is_moving: 0.0,
            is_turning: 0.0,
        };
        let unit = self.validator.initialize(&update, faction, self.now_ms, true);
        self.units.insert(id, unit);
        debug!("Spawned simulated unit {} for faction {}", id, faction);
        id
    }

    /// Moves a server-driven unit under the widened bounds.
    pub fn move_simulated_unit(&mut self, update: &MovementUpdate) -> Option<Vec<Outbound>> {
        let previous = self.units.get(&update.id).copied()?;
        if !previous.simulated {
            return None;
        }
        let outcome = self.apply_movement(update.id, &previous, update);
        Some(vec![Outbound::broadcast(Packet::PlayerState(outcome.state))])
    }

    /// Rolls back a placement that was accepted optimistically. The owner
    /// gets the denial, everyone gets the removal.
    pub fn revoke_placement(&mut self, id: &StructureId, reason: DenyReason) -> Vec<Outbound> {
        let Some(snapshot) = self.engine.snapshot_of(id) else {
            return Vec::new();
        };
        let events = self.engine.deny_placement(id, reason);
        if events.is_empty() {
            return Vec::new();
        }

        let mut outbound = Vec::new();
        if let Owner::Player(owner) = snapshot.owner {
            outbound.push(Outbound::to_client(
                owner,
                Packet::StructureDenied {
                    reason,
                    x: snapshot.x,
                    y: snapshot.y,
                    id: id.clone(),
                    research_type: None,
                    complete_at: None,
                },
            ));
        }
        outbound.extend(broadcast_all(events));
        outbound
    }

    pub fn destroy_in_radius(&mut self, x: i32, y: i32, radius: i32) -> Vec<Outbound> {
        broadcast_all(self.engine.destroy_in_radius(x, y, radius))
    }

    pub fn destroy_faction(&mut self, faction: FactionId) -> Vec<Outbound> {
        broadcast_all(self.engine.destroy_faction(faction))
    }

    /// Advances the world clock to `now_ms` and runs one tick.
    pub fn advance(&mut self, now_ms: u64) -> Vec<Outbound> {
        let elapsed = now_ms.saturating_sub(self.now_ms);
        self.now_ms = self.now_ms.max(now_ms);
        self.tick += 1;
        broadcast_all(self.engine.advance(self.now_ms, elapsed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{ConstructionType, Violation};

    fn game() -> GameState {
        GameState::new(Rules::default(), ValidatorOptions::default(), TerrainMap::empty())
    }

    fn leader(client_id: ClientId, faction: FactionId) -> Requester {
        Requester {
            client_id,
            faction,
            is_leader: true,
        }
    }

    fn movement(x: f32, y: f32, direction: f32) -> MovementUpdate {
        MovementUpdate {
            id: 0,
            sequence: 1,
            offset: Offset::new(x, y),
            direction,
            is_moving: 1.0,
            is_turning: 0.0,
        }
    }

    fn place(x: i32, y: i32, kind: ConstructionType, faction: FactionId) -> Packet {
        Packet::PlaceStructure {
            id: None,
            x,
            y,
            kind,
            faction,
        }
    }

    #[test]
    fn test_placement_is_broadcast() {
        let mut game = game();
        let outbound = game.handle_request(&leader(1, 1), place(10, 10, ConstructionType::HOUSE, 1));

        assert!(!outbound.is_empty());
        assert!(outbound.iter().all(|o| o.to == Recipient::All));
        assert!(matches!(outbound[0].packet, Packet::StructurePlaced(_)));
    }

    #[test]
    fn test_denial_goes_to_requester_only() {
        let mut game = game();
        let outbound = game.handle_request(&leader(1, 1), place(10, 10, ConstructionType::HOUSE, 2));

        assert_eq!(outbound.len(), 1);
        assert_eq!(outbound[0].to, Recipient::Client(1));
        match &outbound[0].packet {
            Packet::StructureDenied { reason, .. } => assert_eq!(*reason, DenyReason::WrongFaction),
            other => panic!("unexpected packet {:?}", other),
        }
    }

    #[test]
    fn test_demolish_unknown_is_denied() {
        let mut game = game();
        let outbound = game.handle_request(
            &leader(1, 1),
            Packet::DemolishStructure {
                id: StructureId("nope".into()),
            },
        );
        assert!(matches!(
            outbound[0].packet,
            Packet::DemolishDenied {
                reason: shared::DemolishDenyReason::NotFound,
                ..
            }
        ));
    }

    #[test]
    fn test_first_movement_initializes_unit() {
        let mut game = game();
        let outbound = game.update_movement(&leader(4, 1), &movement(1000.0, 1000.0, 3.0));

        assert_eq!(outbound.len(), 1);
        assert_eq!(outbound[0].to, Recipient::AllExcept(4));
        let unit = game.unit(4).unwrap();
        assert_eq!(unit.state.id, 4);
        assert_eq!(unit.state.direction, 3);
        assert!(!unit.simulated);
    }

    #[test]
    fn test_first_movement_into_structure_is_refused() {
        let mut game = game();
        game.handle_request(&leader(1, 1), place(10, 10, ConstructionType::HOUSE, 1));

        let inside = shared::TILE_SIZE * 10.0;
        let outbound = game.update_movement(&leader(4, 1), &movement(inside, inside, 0.0));
        assert_eq!(outbound.len(), 1);
        assert_eq!(outbound[0].to, Recipient::Client(4));
        match &outbound[0].packet {
            Packet::PlayerRejected { reasons } => assert_eq!(reasons, &vec![Violation::MovementCollision]),
            other => panic!("unexpected packet {:?}", other),
        }
        assert!(game.unit(4).is_none());
    }

    #[test]
    fn test_carried_unit_keeps_its_bound() {
        let mut game = game();
        game.update_movement(&leader(4, 1), &movement(1000.0, 1000.0, 0.0));
        game.advance(100);

        let unit = game.take_unit(4).unwrap();
        game.remove_player(&4);
        game.restore_unit(9, 1, unit);
        assert!(game.unit(4).is_none());
        assert_eq!(game.unit(9).unwrap().state.id, 9);

        // The new session is judged against the carried position, not re-seeded.
        let outbound = game.update_movement(&leader(9, 1), &movement(5000.0, 5000.0, 0.0));
        assert!(matches!(outbound[0].packet, Packet::PlayerRejected { .. }));
        assert_eq!(game.unit(9).unwrap().state.offset, Offset::new(1000.0, 1000.0));
    }

    #[test]
    fn test_teleport_is_corrected() {
        let mut game = game();
        game.update_movement(&leader(4, 1), &movement(1000.0, 1000.0, 0.0));
        game.advance(100);

        let outbound = game.update_movement(&leader(4, 1), &movement(5000.0, 1000.0, 0.0));
        match &outbound[0].packet {
            Packet::PlayerRejected { reasons } => {
                assert_eq!(reasons, &vec![Violation::MovementExceedsThreshold])
            }
            other => panic!("unexpected packet {:?}", other),
        }
        match &outbound[1].packet {
            Packet::PlayerCorrected(state) => assert_eq!(state.offset, Offset::new(1000.0, 1000.0)),
            other => panic!("unexpected packet {:?}", other),
        }
        assert_eq!(game.unit(4).unwrap().last_update_at, 0);
    }

    #[test]
    fn test_accepted_move_updates_trust() {
        let mut game = game();
        game.update_movement(&leader(4, 1), &movement(1000.0, 1000.0, 0.0));
        game.advance(100);

        let outbound = game.update_movement(&leader(4, 1), &movement(1040.0, 1000.0, 1.0));
        assert_eq!(outbound.len(), 1);
        let unit = game.unit(4).unwrap();
        assert_eq!(unit.state.offset, Offset::new(1040.0, 1000.0));
        assert_eq!(unit.last_update_at, 100);
    }

    #[test]
    fn test_simulated_units_get_wider_bounds() {
        let mut game = game();
        let id = game.spawn_simulated_unit(1, Offset::new(1000.0, 1000.0));
        assert!(id >= SIMULATED_UNIT_BASE);
        game.advance(1);

        let update = MovementUpdate {
            id,
            ..movement(1070.0, 1000.0, 0.0)
        };
        game.move_simulated_unit(&update).unwrap();
        assert_eq!(game.unit(id).unwrap().state.offset.x, 1070.0);

        // Player ids cannot be driven this way.
        game.update_movement(&leader(4, 1), &movement(1000.0, 1000.0, 0.0));
        assert!(game
            .move_simulated_unit(&MovementUpdate {
                id: 4,
                ..movement(1000.0, 1000.0, 0.0)
            })
            .is_none());
    }

    #[test]
    fn test_join_replay_is_private() {
        let mut game = game();
        game.handle_request(&leader(1, 1), place(10, 10, ConstructionType::HOUSE, 1));
        game.update_movement(&leader(1, 1), &movement(100.0, 100.0, 0.0));

        let outbound = game.add_player(2, 1);
        assert_eq!(outbound.len(), 3);
        assert!(outbound.iter().all(|o| o.to == Recipient::Client(2)));
        assert!(matches!(outbound[2].packet, Packet::PlayerState(_)));
    }

    #[test]
    fn test_revoke_placement() {
        let mut game = game();
        game.handle_request(&leader(1, 1), place(10, 10, ConstructionType::HOUSE, 1));
        let id = StructureId::from_tile(10, 10);

        let outbound = game.revoke_placement(&id, DenyReason::Collision);
        assert_eq!(outbound[0].to, Recipient::Client(1));
        assert!(outbound
            .iter()
            .any(|o| matches!(o.packet, Packet::StructureRemoved { .. })));
        assert!(!game.engine().structures().contains(&id));
    }

    #[test]
    fn test_seeded_world() {
        let seed = WorldSeed::from_json(
            r#"{
                "tiles": [{"x": 1, "y": 1, "code": 1}],
                "structures": [
                    {"x": 10, "y": 10, "type": 0, "faction": 1},
                    {"x": 11, "y": 11, "type": 300, "faction": 1}
                ],
                "cash": {"1": 42}
            }"#,
        )
        .unwrap();
        let game = GameState::from_seed(Rules::default(), ValidatorOptions::default(), &seed);

        assert_eq!(game.engine().structures().len(), 1);
        assert_eq!(game.engine().economy().cash(1), 42);
        assert!(game.terrain.is_blocking(1, 1));
    }

    #[test]
    fn test_advance_moves_clock() {
        let mut game = game();
        game.advance(16);
        game.advance(32);
        assert_eq!(game.tick, 2);
        assert_eq!(game.now_ms, 32);
    }
}
