//! Performance benchmarks for critical server systems

use castle_server::chat::ChatLog;
use castle_server::config::ServerConfig;
use castle_server::dispatcher::{Dispatcher, Session};
use castle_server::game::GameState;
use castle_server::resources::ResourceManager;
use castle_server::timer::Timer;
use castle_shared::{codec, framing, Message};
use std::time::{Duration, Instant};

/// Benchmarks message encode and decode
#[test]
fn benchmark_codec_roundtrip() {
    let message = Message::UpgradeListResponse {
        upgrades: (0..20).map(|i| format!("upgrade_{}", i)).collect(),
        technologies: (0..20).map(|i| format!("technology_{}", i)).collect(),
    };

    let iterations = 10_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let payload = codec::encode(&message);
        let decoded = codec::decode(&payload).unwrap();
        assert_eq!(decoded.kind(), message.kind());
    }

    let duration = start.elapsed();
    println!(
        "Codec round trip: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    // Should complete in under 2 seconds
    assert!(duration.as_millis() < 2000);
}

/// Benchmarks framing of a large unit list
#[test]
fn benchmark_large_frame_encoding() {
    let message = Message::PlayerMove {
        x: 10,
        y: 20,
        unit_ids: (0..10_000).collect(),
    };

    let iterations = 1_000;
    let start = Instant::now();

    let mut total = 0;
    for _ in 0..iterations {
        total += framing::encode_frame(&message).len();
    }

    let duration = start.elapsed();
    println!(
        "Large frame encoding: {} frames ({} bytes) in {:?}",
        iterations, total, duration
    );

    assert_eq!(total, iterations * (4 + 5 + 4 + 4 + 4 + 10_000 * 4));
    assert!(duration.as_millis() < 2000);
}

/// Stress tests the dispatcher with many players buying upgrades
#[test]
fn stress_test_upgrade_purchases() {
    let config = ServerConfig {
        world_seed: Some(5),
        ..ServerConfig::default()
    };
    let mut game = GameState::new(&config);
    let dispatcher = Dispatcher::default();

    let players = 500;
    let start = Instant::now();

    for id in 1..=players {
        let mut session = Session::new(id);
        dispatcher
            .dispatch(
                &mut game,
                &mut session,
                Message::Connect {
                    name: format!("player{}", id),
                },
            )
            .unwrap();
        for _ in 0..5 {
            dispatcher
                .dispatch(
                    &mut game,
                    &mut session,
                    Message::RequestUpgrade {
                        name: "weapon".into(),
                    },
                )
                .unwrap();
        }
    }

    let duration = start.elapsed();
    println!(
        "Upgrade purchases: {} players x 5 requests in {:?}",
        players, duration
    );

    // Level never passes the cap, whatever the request count.
    for id in 1..=players {
        assert_eq!(game.upgrades.get_level_by_name(id, "weapon"), 3);
    }
    assert!(duration.as_millis() < 2000);
}

/// Benchmarks the scheduler with many repeating tasks
#[test]
fn benchmark_timer_updates() {
    let start_at = Instant::now();
    let mut timer: Timer<u64> = Timer::new_at(start_at);
    for i in 0..1_000u64 {
        timer.set_interval_at(start_at, Duration::from_millis(10 + i % 50), |count: &mut u64| {
            *count += 1
        });
    }

    let mut fired = 0u64;
    let start = Instant::now();
    for step in 1..=1_000u64 {
        timer.update_at(start_at + Duration::from_millis(step * 10), &mut fired);
    }
    let duration = start.elapsed();

    println!("Timer: {} callbacks in {:?}", fired, duration);
    assert!(fired > 0);
    assert!(duration.as_millis() < 2000);
}

/// Stress tests chat history eviction
#[test]
fn stress_test_chat_history() {
    let mut chat = ChatLog::new(100);
    let start = Instant::now();

    for i in 0..100_000u32 {
        chat.broadcast_message(i % 16 + 1, "gg", false);
    }

    let duration = start.elapsed();
    println!("Chat: 100000 messages in {:?}", duration);

    assert_eq!(chat.len(), 100);
    assert!(duration.as_millis() < 2000);
}

/// Benchmarks node regeneration across a large map
#[test]
fn benchmark_resource_regeneration() {
    let mut resources = ResourceManager::default();
    for i in 0..10_000 {
        resources.add_resource_node(i % 100, i / 100, 2);
    }

    let start = Instant::now();
    for _ in 0..1_000 {
        resources.update(0.1);
    }
    let duration = start.elapsed();

    println!("Regeneration: 10000 nodes x 1000 updates in {:?}", duration);
    assert!(resources.nodes().all(|node| node.available() <= 500));
    assert!(duration.as_millis() < 5000);
}
