//! Performance benchmarks for critical server systems

use bincode::{deserialize, serialize};
use server::client_manager::Requester;
use server::config::{Rules, ValidatorOptions};
use server::game::GameState;
use server::registry::StructureRegistry;
use server::terrain::TerrainMap;
use server::validator::{MovementValidator, Surroundings, TrustedUnit};
use shared::{
    check_collision, ConstructionType, MovementUpdate, Offset, Packet, Rect, StructureId,
    UnitState,
};
use std::time::Instant;

fn rich_world() -> GameState {
    let mut game = GameState::new(Rules::default(), ValidatorOptions::default(), TerrainMap::empty());
    game.engine_mut().economy_mut().set_cash(1, i64::MAX / 2);
    game
}

fn leader() -> Requester {
    Requester {
        client_id: 1,
        faction: 1,
        is_leader: true,
    }
}

fn place(kind: u32, x: i32, y: i32) -> Packet {
    Packet::PlaceStructure {
        id: None,
        x,
        y,
        kind: ConstructionType(kind),
        faction: 1,
    }
}

/// Fills a grid of houses, returning the world
fn housing_grid(side: i32) -> GameState {
    let mut game = rich_world();
    for row in 0..side {
        for col in 0..side {
            game.handle_request(&leader(), place(300, 10 + col * 3, 10 + row * 3));
        }
    }
    game
}

/// Benchmarks footprint collision checks
#[test]
fn benchmark_collision_detection() {
    let a = Rect::from_tiles(10, 10, (3, 3));
    let b = Rect::from_tiles(12, 12, (3, 3));

    let iterations = 100_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let _ = check_collision(&a, &b);
    }

    let duration = start.elapsed();
    println!(
        "Collision detection: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    // Should complete in under 100ms for 100k iterations
    assert!(duration.as_millis() < 100);
}

/// Benchmarks packet serialization performance
#[test]
fn benchmark_packet_serialization() {
    let packet = Packet::Movement(MovementUpdate {
        id: 1,
        sequence: 42,
        offset: Offset::new(480.0, 960.0),
        direction: 12.0,
        is_moving: 1.0,
        is_turning: 0.0,
    });

    let iterations = 10_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let bytes = serialize(&packet).unwrap();
        let _: Packet = deserialize(&bytes).unwrap();
    }

    let duration = start.elapsed();
    println!(
        "Packet serialization: {} round trips in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 1000);
}

/// Benchmarks placement with a growing registry
#[test]
fn benchmark_placement_throughput() {
    let start = Instant::now();
    let game = housing_grid(20);
    let duration = start.elapsed();

    println!(
        "Placement: {} structures in {:?}",
        game.engine().structures().len(),
        duration
    );

    assert_eq!(game.engine().structures().len(), 400);
    assert!(duration.as_millis() < 2000);
}

/// Benchmarks the demolition cascade and unlock recomputation
#[test]
fn benchmark_place_demolish_cycle() {
    let mut game = rich_world();
    game.handle_request(&leader(), place(300, 10, 10));
    let id = StructureId::from_tile(14, 10);

    let iterations = 1_000;
    let start = Instant::now();

    for _ in 0..iterations {
        game.handle_request(&leader(), place(409, 14, 10));
        game.handle_request(&leader(), Packet::DemolishStructure { id: id.clone() });
    }

    let duration = start.elapsed();
    println!(
        "Place/demolish cycle: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(!game.engine().structures().contains(&id));
    assert!(duration.as_millis() < 2000);
}

/// Benchmarks movement validation throughput
#[test]
fn benchmark_movement_validation() {
    let validator = MovementValidator::new(ValidatorOptions::default());
    let terrain = TerrainMap::empty();
    let structures = StructureRegistry::new();
    let surroundings = Surroundings {
        terrain: &terrain,
        structures: &structures,
    };
    let mut trusted = TrustedUnit {
        state: UnitState {
            id: 1,
            faction: 1,
            sequence: 0,
            offset: Offset::new(1_000.0, 1_000.0),
            direction: 0,
            is_moving: 0,
            is_turning: 0,
        },
        last_update_at: 0,
        simulated: false,
    };

    let iterations = 50_000u32;
    let start = Instant::now();

    for i in 1..=iterations {
        let update = MovementUpdate {
            id: 1,
            sequence: i,
            offset: Offset::new(
                trusted.state.offset.x + if i % 2 == 0 { 5.0 } else { -5.0 },
                trusted.state.offset.y,
            ),
            direction: 0.0,
            is_moving: 1.0,
            is_turning: 0.0,
        };
        let now = i as u64 * 16;
        let outcome = validator.validate(&trusted, &update, now, &surroundings);
        assert!(outcome.valid);
        trusted.state = outcome.state;
        trusted.last_update_at = now;
    }

    let duration = start.elapsed();
    println!(
        "Movement validation: {} updates in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 1000);
}

/// Stress test: ticking a populated world
#[test]
fn stress_test_world_ticks() {
    let mut game = housing_grid(10);
    let ticks = 600u32;
    let start = Instant::now();

    for tick in 1..=ticks {
        game.advance(tick as u64 * 16);
    }

    let duration = start.elapsed();
    println!(
        "World ticks: {} ticks over {} structures in {:?} ({:.2} μs/tick)",
        ticks,
        game.engine().structures().len(),
        duration,
        duration.as_micros() as f64 / ticks as f64
    );

    assert_eq!(game.tick, ticks);
    assert!(duration.as_millis() < 2000);
}
