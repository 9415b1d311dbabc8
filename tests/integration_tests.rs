//! Integration tests for the castle server
//!
//! These tests run a real server on a loopback port and talk to it over TCP.

use castle_server::config::ServerConfig;
use castle_server::network::{Server, ServerHandle};
use castle_server::persistence::{Persistence, PlayerStore, SledStore};
use castle_shared::{codec, framing, Message};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;

fn test_config() -> ServerConfig {
    ServerConfig {
        bind_host: "127.0.0.1".to_string(),
        port: 0,
        world_seed: Some(11),
        ..ServerConfig::default()
    }
}

async fn start_server(persistence: Persistence) -> (ServerHandle, JoinHandle<()>) {
    let server = Server::bind(test_config(), persistence)
        .await
        .expect("server binds");
    let handle = server.handle();
    let task = tokio::spawn(server.run());
    (handle, task)
}

struct TestClient {
    stream: TcpStream,
}

impl TestClient {
    async fn connect(handle: &ServerHandle) -> Self {
        let stream = TcpStream::connect(handle.local_addr())
            .await
            .expect("client connects");
        Self { stream }
    }

    /// Connects and completes the handshake, returning the player id.
    async fn join(handle: &ServerHandle, name: &str) -> (Self, u32) {
        let mut client = Self::connect(handle).await;
        client.send(Message::Connect { name: name.into() }).await;
        match client.recv().await {
            Some(Message::ConnectResponse { player_id }) => (client, player_id),
            other => panic!("expected ConnectResponse, got {:?}", other),
        }
    }

    async fn send(&mut self, message: Message) {
        framing::write_frame(&mut self.stream, &message)
            .await
            .expect("send succeeds");
    }

    async fn recv(&mut self) -> Option<Message> {
        timeout(
            Duration::from_secs(2),
            framing::read_frame(&mut self.stream, framing::MAX_FRAME_LEN),
        )
        .await
        .expect("reply within timeout")
        .expect("well-formed reply")
    }

    /// Round trip that proves every earlier message has been handled.
    async fn sync(&mut self, timestamp: u64) {
        self.send(Message::Heartbeat { timestamp }).await;
        assert_eq!(self.recv().await, Some(Message::Heartbeat { timestamp }));
    }
}

/// SESSION TESTS
mod session_tests {
    use super::*;

    #[tokio::test]
    async fn connect_assigns_sequential_ids() {
        let (handle, _task) = start_server(Persistence::disabled()).await;

        let (_alice, alice_id) = TestClient::join(&handle, "Alice").await;
        let (_bob, bob_id) = TestClient::join(&handle, "Bob").await;

        assert_eq!(alice_id, 1);
        assert_eq!(bob_id, 2);
        handle.shutdown();
    }

    #[tokio::test]
    async fn gameplay_requires_connect() {
        let (handle, _task) = start_server(Persistence::disabled()).await;
        let mut client = TestClient::connect(&handle).await;

        client.send(Message::UpgradeListRequest).await;
        assert_eq!(client.recv().await, Some(Message::error("not connected")));

        // The connection stays usable.
        client.sync(1).await;
        client.send(Message::Connect { name: "Late".into() }).await;
        assert_eq!(
            client.recv().await,
            Some(Message::ConnectResponse { player_id: 1 })
        );
        handle.shutdown();
    }

    #[tokio::test]
    async fn weapon_upgrade_stops_at_level_three() {
        let (handle, _task) = start_server(Persistence::disabled()).await;
        let (mut client, id) = TestClient::join(&handle, "Alice").await;

        handle.grant_resources(id, "Gold", 10_000);
        handle.grant_resources(id, "Wood", 10_000);
        // Each grant pushes fresh balances.
        assert!(matches!(client.recv().await, Some(Message::ResourceUpdate { .. })));
        assert!(matches!(client.recv().await, Some(Message::ResourceUpdate { .. })));

        let mut levels = Vec::new();
        for _ in 0..4 {
            client
                .send(Message::RequestUpgrade {
                    name: "weapon".into(),
                })
                .await;
            match client.recv().await {
                Some(Message::UpgradeResponse {
                    success, new_level, ..
                }) => {
                    levels.push((success, new_level));
                    if success {
                        assert!(matches!(
                            client.recv().await,
                            Some(Message::ResourceUpdate { .. })
                        ));
                    }
                }
                other => panic!("expected UpgradeResponse, got {:?}", other),
            }
        }

        assert_eq!(levels, vec![(true, 1), (true, 2), (true, 3), (false, 3)]);
        handle.shutdown();
    }

    #[tokio::test]
    async fn locked_upgrade_needs_technology() {
        let (handle, _task) = start_server(Persistence::disabled()).await;
        let (mut client, _) = TestClient::join(&handle, "Alice").await;

        client
            .send(Message::RequestUpgrade {
                name: "armor".into(),
            })
            .await;
        assert_eq!(
            client.recv().await,
            Some(Message::UpgradeResponse {
                success: false,
                name: "armor".into(),
                new_level: 0
            })
        );

        client
            .send(Message::RequestTechnology {
                name: "Basic Armory".into(),
            })
            .await;
        assert_eq!(
            client.recv().await,
            Some(Message::TechnologyResponse {
                success: true,
                name: "Basic Armory".into()
            })
        );

        client
            .send(Message::RequestUpgrade {
                name: "armor".into(),
            })
            .await;
        assert!(matches!(
            client.recv().await,
            Some(Message::UpgradeResponse { success: true, new_level: 1, .. })
        ));
        handle.shutdown();
    }
}

/// CHAT TESTS
mod chat_tests {
    use super::*;

    #[tokio::test]
    async fn chat_reaches_every_client() {
        let (handle, _task) = start_server(Persistence::disabled()).await;
        let (mut alice, _) = TestClient::join(&handle, "Alice").await;
        let (mut bob, _) = TestClient::join(&handle, "Bob").await;

        alice
            .send(Message::Chat {
                team_only: false,
                text: "hello".into(),
            })
            .await;

        let expected = Message::Chat {
            team_only: false,
            text: "Alice: hello".into(),
        };
        assert_eq!(alice.recv().await, Some(expected.clone()));
        assert_eq!(bob.recv().await, Some(expected));
        handle.shutdown();
    }

    #[tokio::test]
    async fn muted_player_is_not_heard() {
        let (handle, _task) = start_server(Persistence::disabled()).await;
        let (mut alice, _) = TestClient::join(&handle, "Alice").await;
        let (mut mallory, mallory_id) = TestClient::join(&handle, "Mallory").await;

        handle.mute_player(mallory_id);
        mallory
            .send(Message::Chat {
                team_only: false,
                text: "hi".into(),
            })
            .await;
        mallory.sync(7).await;

        // The next thing Alice hears is her own message, not Mallory's.
        alice
            .send(Message::Chat {
                team_only: false,
                text: "anyone?".into(),
            })
            .await;
        assert_eq!(
            alice.recv().await,
            Some(Message::Chat {
                team_only: false,
                text: "Alice: anyone?".into()
            })
        );

        handle.unmute_player(mallory_id);
        mallory
            .send(Message::Chat {
                team_only: false,
                text: "back".into(),
            })
            .await;
        assert_eq!(
            alice.recv().await,
            Some(Message::Chat {
                team_only: false,
                text: "Mallory: back".into()
            })
        );
        handle.shutdown();
    }
}

/// PROTOCOL FAILURE TESTS
mod protocol_tests {
    use super::*;

    #[tokio::test]
    async fn truncated_frame_only_closes_sender() {
        let (handle, _task) = start_server(Persistence::disabled()).await;
        let (mut bystander, _) = TestClient::join(&handle, "Bystander").await;
        let mut broken = TestClient::connect(&handle).await;

        // Header declares 10 bytes; the stream ends after 8.
        let payload = codec::encode(&Message::Connect {
            name: "Broken".into(),
        });
        let mut bytes = 10u32.to_be_bytes().to_vec();
        bytes.extend_from_slice(&payload[..8]);
        broken.stream.write_all(&bytes).await.unwrap();
        broken.stream.shutdown().await.unwrap();

        assert_eq!(broken.recv().await, None);

        // The partial Connect never registered anyone.
        bystander.sync(3).await;
        let (_next, next_id) = TestClient::join(&handle, "Next").await;
        assert_eq!(next_id, 3);
        handle.shutdown();
    }

    /// Sends `first` and a chat line in a single write, then checks that
    /// only the bystander's own chat reaches the bystander.
    async fn assert_chat_after_close_is_dropped(first: Vec<u8>) {
        let (handle, _task) = start_server(Persistence::disabled()).await;
        let (mut alice, _) = TestClient::join(&handle, "Alice").await;
        let (mut bob, _) = TestClient::join(&handle, "Bob").await;

        let mut bytes = first;
        bytes.extend(framing::encode_frame(&Message::Chat {
            team_only: false,
            text: "ghost".into(),
        }));
        alice.stream.write_all(&bytes).await.unwrap();

        // Unread input may turn the close into a reset.
        let closed = timeout(
            Duration::from_secs(2),
            framing::read_frame(&mut alice.stream, framing::MAX_FRAME_LEN),
        )
        .await
        .expect("closed within timeout");
        assert!(!matches!(closed, Ok(Some(_))));

        bob.send(Message::Chat {
            team_only: false,
            text: "still here".into(),
        })
        .await;
        assert_eq!(
            bob.recv().await,
            Some(Message::Chat {
                team_only: false,
                text: "Bob: still here".into()
            })
        );
        handle.shutdown();
    }

    #[tokio::test]
    async fn nothing_dispatched_after_disconnect() {
        assert_chat_after_close_is_dropped(framing::encode_frame(&Message::Disconnect)).await;
    }

    #[tokio::test]
    async fn nothing_dispatched_after_unknown_type() {
        // Type 77 with an empty body.
        let mut frame = 5u32.to_be_bytes().to_vec();
        frame.push(77);
        frame.extend_from_slice(&0u32.to_be_bytes());
        assert_chat_after_close_is_dropped(frame).await;
    }

    #[tokio::test]
    async fn length_mismatch_closes_connection() {
        let (handle, _task) = start_server(Persistence::disabled()).await;
        let mut client = TestClient::connect(&handle).await;

        // Frame of 9 bytes whose payload claims a 7 byte body.
        let mut bytes = 9u32.to_be_bytes().to_vec();
        bytes.push(20);
        bytes.extend_from_slice(&7u32.to_be_bytes());
        bytes.extend_from_slice(&[0, 0, 0, 0]);
        client.stream.write_all(&bytes).await.unwrap();

        assert_eq!(client.recv().await, None);
        handle.shutdown();
    }
}

/// MATCH AND PERSISTENCE TESTS
mod match_tests {
    use super::*;

    #[tokio::test]
    async fn match_ends_when_opponent_disconnects() {
        let (handle, _task) = start_server(Persistence::disabled()).await;
        let (mut alice, alice_id) = TestClient::join(&handle, "Alice").await;
        let (mut bob, _) = TestClient::join(&handle, "Bob").await;

        alice.send(Message::JoinGame).await;
        alice.sync(1).await;
        bob.send(Message::JoinGame).await;

        assert_eq!(alice.recv().await, Some(Message::GameStart { match_id: 1 }));
        assert_eq!(bob.recv().await, Some(Message::GameStart { match_id: 1 }));

        bob.send(Message::Disconnect).await;
        assert_eq!(bob.recv().await, None);
        assert_eq!(
            alice.recv().await,
            Some(Message::GameEnd {
                match_id: 1,
                winner: alice_id
            })
        );
        handle.shutdown();
    }

    #[tokio::test]
    async fn progress_is_written_to_store() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let store: Arc<dyn PlayerStore> = Arc::new(SledStore::from_db(db).unwrap());
        let (persistence, worker) = Persistence::start(Arc::clone(&store));
        let (handle, task) = start_server(persistence).await;

        let (mut alice, alice_id) = TestClient::join(&handle, "Alice").await;
        let (mut bob, bob_id) = TestClient::join(&handle, "Bob").await;

        // Node 1 is the first seeded gold node.
        alice
            .send(Message::PlayerHarvest {
                unit_id: 1,
                resource_id: 1,
            })
            .await;
        assert!(matches!(alice.recv().await, Some(Message::ResourceUpdate { .. })));

        alice.send(Message::JoinGame).await;
        alice.sync(1).await;
        bob.send(Message::JoinGame).await;
        assert!(matches!(alice.recv().await, Some(Message::GameStart { .. })));
        assert!(matches!(bob.recv().await, Some(Message::GameStart { .. })));
        alice.send(Message::LeaveGame).await;
        assert!(matches!(bob.recv().await, Some(Message::GameEnd { .. })));

        handle.shutdown();
        task.await.unwrap();
        worker.await.unwrap();

        assert_eq!(store.load_player(alice_id).unwrap().name, "Alice");
        assert_eq!(store.get_total_resources_gathered(alice_id).unwrap(), 10);

        let bob_stats = store.get_player_stats(bob_id).unwrap();
        assert_eq!(bob_stats.matches_played, 1);
        assert_eq!(bob_stats.matches_won, 1);

        let history = store.get_player_match_history(alice_id, 10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].winners, vec![bob_id]);
        assert_eq!(history[0].losers, vec![alice_id]);
        assert_eq!(store.next_match_id().unwrap(), 2);
    }
}
