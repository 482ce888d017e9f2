//! Performance benchmarks for the hot paths of a tick

use assert_approx_eq::assert_approx_eq;
use bincode::{deserialize, serialize};
use server::clock::Clock;
use server::config::ServerConfig;
use server::events::Event;
use server::game::Simulation;
use server::viewport::SpatialGrid;
use server::world::EntityId;
use shared::{MobKind, PlayerSummary, ServerPacket, ShipType, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::time::Instant;

fn crowded_simulation(players: u16, mobs: u32) -> Simulation {
    let mut config = ServerConfig::default();
    config.max_players = players as usize;
    let mut sim = Simulation::new(config);

    for n in 0..players {
        let conn = sim.accept(SocketAddr::from(([10, 0, 0, 1], 1000 + n)), 0);
        sim.receive(
            conn,
            shared::ClientPacket::Login {
                protocol: PROTOCOL_VERSION,
                name: format!("p{}", n),
                flag: "XX".to_string(),
                horizon_x: 1000.0,
                horizon_y: 600.0,
            },
            0,
        );
    }
    for n in 0..mobs {
        let x = (n as f32 * 97.0) % 8000.0 - 4000.0;
        let y = (n as f32 * 53.0) % 4000.0 - 2000.0;
        sim.dispatch(
            Event::MobSpawn {
                kind: MobKind::PredatorMissile,
                x,
                y,
                owner: None,
            },
            0,
        );
    }
    sim
}

/// Benchmarks the viewport recompute with a full server
#[test]
fn benchmark_horizon_recompute() {
    let mut sim = crowded_simulation(100, 400);
    sim.tick(16);

    let ticks = 60u64;
    let start = Instant::now();
    for frame in 2..=ticks + 1 {
        let players = sim
            .context()
            .world
            .ids_of(server::world::EntityKind::Player);
        for (i, id) in players.iter().enumerate() {
            let x = ((frame as f32 * 13.0 + i as f32 * 211.0) % 6000.0) - 3000.0;
            sim.dispatch(Event::EntityMoved { id: *id, x, y: 0.0, rot: 0.0 }, frame * 16);
        }
        sim.tick(frame * 16);
        sim.take_outgoing();
    }

    let duration = start.elapsed();
    println!(
        "Horizon recompute: {} ticks with 100 players and 400 mobs in {:?} ({:.2} ms/tick)",
        ticks,
        duration,
        duration.as_secs_f64() * 1000.0 / ticks as f64
    );

    // A tick budget is 16ms; stay well within it even in debug builds
    assert!(duration.as_millis() < 60 * 200);
}

/// Benchmarks grid queries against a naive scan
#[test]
fn benchmark_spatial_grid_query() {
    let mut grid = SpatialGrid::new(512.0);
    for n in 0..10_000u32 {
        let x = (n as f32 * 37.0) % 32000.0 - 16000.0;
        let y = (n as f32 * 71.0) % 16000.0 - 8000.0;
        grid.insert(EntityId(n), x, y);
    }

    let iterations = 1_000;
    let start = Instant::now();
    let mut found = 0;
    for i in 0..iterations {
        let cx = (i as f32 * 31.0) % 30000.0 - 15000.0;
        found += grid.query(cx, 0.0, 1000.0, 600.0).len();
    }

    let duration = start.elapsed();
    println!(
        "Grid query: {} queries in {:?} ({:.2} μs/query, {} hits)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64,
        found
    );

    assert!(duration.as_millis() < 2000);
}

/// Benchmarks packet encoding of the biggest routine packet
#[test]
fn benchmark_packet_serialization() {
    let packet = ServerPacket::LoginOk {
        id: 1,
        team: 1,
        token: 0xdead_beef,
        players: (0..100)
            .map(|id| PlayerSummary {
                id,
                name: format!("player{}", id),
                flag: "XX".to_string(),
                team: id as u16,
                ship: ShipType::Predator,
            })
            .collect(),
    };

    let iterations = 1_000;
    let start = Instant::now();
    for _ in 0..iterations {
        let data = serialize(&packet).unwrap();
        let decoded: ServerPacket = deserialize(&data).unwrap();
        assert!(matches!(decoded, ServerPacket::LoginOk { .. }));
    }

    let duration = start.elapsed();
    println!(
        "LoginOk roster of 100: {} round trips in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 2000);
}

/// Stress test: a long stall is absorbed by one frame jump
#[test]
fn stress_test_clock_stall() {
    let mut clock = Clock::new(16, 0);
    let start = Instant::now();
    for n in 1..=100_000u64 {
        clock.advance(n * 16);
    }
    let (tick, calendar) = clock.advance(100_000 * 16 + 16 * 50);

    println!("Clock: 100k advances in {:?}", start.elapsed());
    assert_eq!(tick.skipped_frames, 49);
    assert_approx_eq!(tick.frame_factor, 4.0);
    assert!(calendar.len() <= 1);
}
