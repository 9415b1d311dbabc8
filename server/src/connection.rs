//! One client connection: a read task, a write task and a shared handle.
//!
//! The read task turns frames into [`ServerMessage::MessageReceived`] events
//! and reports [`ServerMessage::Disconnected`] exactly once when it ends. The
//! write task drains the connection's outbound queue one frame at a time.
//! Both stop when [`ConnectionHandle::stop`] is called, from any task.

use crate::error::ConnectionError;
use crate::network::ServerMessage;
use castle_shared::{codec, framing, Message, PlayerId};
use log::{debug, info, warn};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    ReadingHeader = 1,
    ReadingBody = 2,
    /// Terminal. Once here a connection never leaves.
    Disconnected = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::ReadingHeader,
            2 => ConnectionState::ReadingBody,
            _ => ConnectionState::Disconnected,
        }
    }
}

pub const DEFAULT_MAX_QUEUED_FRAMES: usize = 1024;

#[derive(Debug, Clone, Copy)]
pub struct ConnectionConfig {
    pub max_frame_len: usize,
    pub idle_timeout: Option<Duration>,
    /// Frames that may wait in the outbound queue. A peer that falls this
    /// far behind is disconnected.
    pub max_queued_frames: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_frame_len: framing::MAX_FRAME_LEN,
            idle_timeout: None,
            max_queued_frames: DEFAULT_MAX_QUEUED_FRAMES,
        }
    }
}

struct Shared {
    player_id: PlayerId,
    addr: SocketAddr,
    state: AtomicU8,
    authenticated: AtomicBool,
    outbound: mpsc::Sender<Vec<u8>>,
    shutdown: watch::Sender<bool>,
}

/// Cloneable reference to a connection, used for sending and stopping.
#[derive(Clone)]
pub struct ConnectionHandle {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("player_id", &self.shared.player_id)
            .field("addr", &self.shared.addr)
            .field("state", &self.state())
            .finish()
    }
}

impl ConnectionHandle {
    pub fn player_id(&self) -> PlayerId {
        self.shared.player_id
    }

    pub fn addr(&self) -> SocketAddr {
        self.shared.addr
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    pub fn is_connected(&self) -> bool {
        self.state() != ConnectionState::Disconnected
    }

    pub fn is_authenticated(&self) -> bool {
        self.shared.authenticated.load(Ordering::Acquire)
    }

    pub fn set_authenticated(&self, authenticated: bool) {
        self.shared
            .authenticated
            .store(authenticated, Ordering::Release);
    }

    /// Queues a message. Returns false once the connection is disconnected.
    pub fn send(&self, message: &Message) -> bool {
        self.send_frame(framing::encode_frame(message))
    }

    /// Queues an already encoded frame. A full queue stops the connection.
    pub fn send_frame(&self, frame: Vec<u8>) -> bool {
        if !self.is_connected() {
            return false;
        }
        match self.shared.outbound.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                if self.stop() {
                    warn!(
                        "Connection {} ({}) is not reading; outbound queue full",
                        self.player_id(),
                        self.addr()
                    );
                }
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Moves the connection to `Disconnected`. Only the first call, from any
    /// task, has an effect; it returns true.
    pub fn stop(&self) -> bool {
        let previous = self
            .shared
            .state
            .swap(ConnectionState::Disconnected as u8, Ordering::AcqRel);
        if previous == ConnectionState::Disconnected as u8 {
            return false;
        }
        self.shared.shutdown.send_replace(true);
        true
    }

    /// Moves from `from` to `to` unless the state has changed meanwhile.
    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.shared
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

pub struct Connection<S> {
    stream: S,
    handle: ConnectionHandle,
    outbound: mpsc::Receiver<Vec<u8>>,
    config: ConnectionConfig,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn new(player_id: PlayerId, addr: SocketAddr, stream: S, config: ConnectionConfig) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(config.max_queued_frames.max(1));
        let (shutdown, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            player_id,
            addr,
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            authenticated: AtomicBool::new(false),
            outbound: outbound_tx,
            shutdown,
        });

        Self {
            stream,
            handle: ConnectionHandle { shared },
            outbound: outbound_rx,
            config,
        }
    }

    pub fn handle(&self) -> ConnectionHandle {
        self.handle.clone()
    }

    /// Spawns the read and write tasks and returns the handle.
    pub fn start(self, events: mpsc::UnboundedSender<ServerMessage>) -> ConnectionHandle {
        let Connection {
            stream,
            handle,
            outbound,
            config,
        } = self;

        let shutdown_rx = handle.shared.shutdown.subscribe();
        if !handle.transition(ConnectionState::Connecting, ConnectionState::ReadingHeader) {
            debug!("Connection {} stopped before start", handle.player_id());
        }

        let (reader, writer) = tokio::io::split(stream);
        tokio::spawn(write_loop(
            writer,
            handle.clone(),
            outbound,
            shutdown_rx.clone(),
        ));
        tokio::spawn(read_loop(reader, handle.clone(), events, shutdown_rx, config));

        handle
    }
}

async fn read_loop<R>(
    mut reader: R,
    handle: ConnectionHandle,
    events: mpsc::UnboundedSender<ServerMessage>,
    mut shutdown: watch::Receiver<bool>,
    config: ConnectionConfig,
) where
    R: AsyncRead + Unpin,
{
    let player_id = handle.player_id();

    let reason = loop {
        if *shutdown.borrow() {
            break ConnectionError::Stopped;
        }

        let next = tokio::select! {
            _ = shutdown.changed() => break ConnectionError::Stopped,
            next = read_next(&mut reader, &handle, &config) => next,
        };

        match next {
            Ok(Some(_)) if !handle.is_connected() => break ConnectionError::Stopped,
            Ok(Some(message)) => {
                let event = ServerMessage::MessageReceived { player_id, message };
                if events.send(event).is_err() {
                    break ConnectionError::Stopped;
                }
            }
            Ok(None) => break ConnectionError::PeerClosed,
            Err(e) => break e,
        }
    };

    handle.stop();
    match &reason {
        ConnectionError::PeerClosed | ConnectionError::Stopped => {
            info!("Connection {} ({}) closed: {}", player_id, handle.addr(), reason)
        }
        _ => warn!("Connection {} ({}) dropped: {}", player_id, handle.addr(), reason),
    }
    let _ = events.send(ServerMessage::Disconnected { player_id, reason });
}

/// Reads one complete frame. `Ok(None)` on a clean close between frames.
async fn read_next<R>(
    reader: &mut R,
    handle: &ConnectionHandle,
    config: &ConnectionConfig,
) -> Result<Option<Message>, ConnectionError>
where
    R: AsyncRead + Unpin,
{
    handle.transition(ConnectionState::ReadingBody, ConnectionState::ReadingHeader);

    let header = framing::read_header(reader, config.max_frame_len);
    let len = match config.idle_timeout {
        Some(limit) => tokio::time::timeout(limit, header)
            .await
            .map_err(|_| ConnectionError::IdleTimeout(limit))??,
        None => header.await?,
    };
    let Some(len) = len else {
        return Ok(None);
    };

    handle.transition(ConnectionState::ReadingHeader, ConnectionState::ReadingBody);
    let body = framing::read_body(reader, len).await?;
    Ok(Some(codec::decode(&body)?))
}

async fn write_loop<W>(
    mut writer: W,
    handle: ConnectionHandle,
    mut outbound: mpsc::Receiver<Vec<u8>>,
    mut shutdown: watch::Receiver<bool>,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            biased;

            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                if let Err(e) = framing::write_raw(&mut writer, &frame).await {
                    debug!("Write to {} failed: {}", handle.player_id(), e);
                    handle.stop();
                    break;
                }
            }
            _ = shutdown.changed() => {
                // Flush whatever was queued before the stop.
                while let Ok(frame) = outbound.try_recv() {
                    if framing::write_raw(&mut writer, &frame).await.is_err() {
                        break;
                    }
                }
                break;
            }
        }
    }

    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use castle_shared::ProtocolError;
    use tokio::io::{duplex, AsyncWriteExt};
    use tokio::time::timeout;

    fn addr() -> SocketAddr {
        "127.0.0.1:4000".parse().unwrap()
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> ServerMessage {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("event within timeout")
            .expect("channel open")
    }

    #[tokio::test]
    async fn test_forwards_messages_with_sender() {
        let (client, server) = duplex(1024);
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let handle = Connection::new(7, addr(), server, ConnectionConfig::default()).start(events_tx);
        assert_eq!(handle.state(), ConnectionState::ReadingHeader);

        let (_client_read, mut client_write) = tokio::io::split(client);
        let message = Message::PlayerMove {
            x: 5,
            y: 10,
            unit_ids: vec![7, 9],
        };
        framing::write_frame(&mut client_write, &message).await.unwrap();

        match next_event(&mut events).await {
            ServerMessage::MessageReceived { player_id, message: m } => {
                assert_eq!(player_id, 7);
                assert_eq!(m, message);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_truncated_frame_disconnects_without_forwarding() {
        let (mut client, server) = duplex(1024);
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let handle = Connection::new(1, addr(), server, ConnectionConfig::default()).start(events_tx);

        // Header declares 10 bytes, only 8 follow before the peer closes.
        client.write_all(&10u32.to_be_bytes()).await.unwrap();
        client.write_all(&[0u8; 8]).await.unwrap();
        drop(client);

        match next_event(&mut events).await {
            ServerMessage::Disconnected { player_id, reason } => {
                assert_eq!(player_id, 1);
                assert!(matches!(
                    reason,
                    ConnectionError::Protocol(ProtocolError::TruncatedFrame {
                        declared: 10,
                        received: 8
                    })
                ));
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(handle.state(), ConnectionState::Disconnected);
        assert!(!handle.send(&Message::Disconnect));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_reported_once() {
        let (_client, server) = duplex(1024);
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let handle = Connection::new(3, addr(), server, ConnectionConfig::default()).start(events_tx);

        let other = handle.clone();
        assert!(handle.stop());
        assert!(!other.stop());
        assert!(!handle.stop());

        match next_event(&mut events).await {
            ServerMessage::Disconnected { reason, .. } => {
                assert!(matches!(reason, ConnectionError::Stopped))
            }
            other => panic!("unexpected event {:?}", other),
        }
        // Read task has exited; nothing else is ever reported.
        assert!(timeout(Duration::from_millis(100), events.recv())
            .await
            .map_or(true, |event| event.is_none()));
    }

    #[tokio::test]
    async fn test_queued_frames_flush_before_stop() {
        let (client, server) = duplex(4096);
        let (events_tx, _events) = mpsc::unbounded_channel();
        let handle = Connection::new(2, addr(), server, ConnectionConfig::default()).start(events_tx);

        assert!(handle.send(&Message::ConnectResponse { player_id: 2 }));
        assert!(handle.send(&Message::error("Server full")));
        handle.stop();

        let (mut client_read, _client_write) = tokio::io::split(client);
        let first = framing::read_frame(&mut client_read, framing::MAX_FRAME_LEN)
            .await
            .unwrap();
        let second = framing::read_frame(&mut client_read, framing::MAX_FRAME_LEN)
            .await
            .unwrap();
        assert_eq!(first, Some(Message::ConnectResponse { player_id: 2 }));
        assert_eq!(second, Some(Message::error("Server full")));
        assert_eq!(
            framing::read_frame(&mut client_read, framing::MAX_FRAME_LEN)
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut client, server) = duplex(1024);
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let config = ConnectionConfig {
            max_frame_len: 16,
            idle_timeout: None,
            ..ConnectionConfig::default()
        };
        Connection::new(4, addr(), server, config).start(events_tx);

        client.write_all(&1024u32.to_be_bytes()).await.unwrap();

        match next_event(&mut events).await {
            ServerMessage::Disconnected { reason, .. } => assert!(matches!(
                reason,
                ConnectionError::Protocol(ProtocolError::FrameTooLarge { len: 1024, max: 16 })
            )),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_idle_timeout() {
        let (_client, server) = duplex(1024);
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let config = ConnectionConfig {
            max_frame_len: framing::MAX_FRAME_LEN,
            idle_timeout: Some(Duration::from_millis(50)),
            ..ConnectionConfig::default()
        };
        Connection::new(5, addr(), server, config).start(events_tx);

        match next_event(&mut events).await {
            ServerMessage::Disconnected { reason, .. } => {
                assert!(matches!(reason, ConnectionError::IdleTimeout(_)))
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_peer_close_between_frames() {
        let (client, server) = duplex(1024);
        let (events_tx, mut events) = mpsc::unbounded_channel();
        Connection::new(6, addr(), server, ConnectionConfig::default()).start(events_tx);
        drop(client);

        match next_event(&mut events).await {
            ServerMessage::Disconnected { reason, .. } => {
                assert!(matches!(reason, ConnectionError::PeerClosed))
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_frame_split_across_reads() {
        let frame = framing::encode_frame(&Message::Connect {
            name: "Alice".into(),
        });
        let stream = tokio_test::io::Builder::new()
            .read(&frame[..3])
            .read(&frame[3..7])
            .read(&frame[7..])
            .build();
        let (events_tx, mut events) = mpsc::unbounded_channel();
        Connection::new(9, addr(), stream, ConnectionConfig::default()).start(events_tx);

        match next_event(&mut events).await {
            ServerMessage::MessageReceived { message, .. } => {
                assert_eq!(message, Message::Connect { name: "Alice".into() })
            }
            other => panic!("unexpected event {:?}", other),
        }
        match next_event(&mut events).await {
            ServerMessage::Disconnected { reason, .. } => {
                assert!(matches!(reason, ConnectionError::PeerClosed))
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_authenticated_flag_shared_between_clones() {
        let (_client, server) = duplex(64);
        let connection = Connection::new(8, addr(), server, ConnectionConfig::default());
        let a = connection.handle();
        let b = connection.handle();

        assert!(!a.is_authenticated());
        b.set_authenticated(true);
        assert!(a.is_authenticated());
        assert_eq!(a.state(), ConnectionState::Connecting);
    }

    #[test]
    fn test_full_outbound_queue_stops_connection() {
        let (_client, server) = duplex(64);
        let config = ConnectionConfig {
            max_queued_frames: 2,
            ..ConnectionConfig::default()
        };
        // Not started, so nothing drains the queue.
        let connection = Connection::new(6, addr(), server, config);
        let handle = connection.handle();

        assert!(handle.send(&Message::Heartbeat { timestamp: 1 }));
        assert!(handle.send(&Message::Heartbeat { timestamp: 2 }));
        assert!(!handle.send(&Message::Heartbeat { timestamp: 3 }));
        assert_eq!(handle.state(), ConnectionState::Disconnected);
        assert!(!handle.send(&Message::Heartbeat { timestamp: 4 }));
    }

    #[tokio::test]
    async fn test_frames_after_stop_are_not_forwarded() {
        let (mut client, server) = duplex(1024);
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let handle = Connection::new(2, addr(), server, ConnectionConfig::default()).start(events_tx);

        framing::write_frame(&mut client, &Message::Disconnect).await.unwrap();
        assert!(matches!(
            next_event(&mut events).await,
            ServerMessage::MessageReceived { message: Message::Disconnect, .. }
        ));

        handle.stop();
        framing::write_frame(&mut client, &Message::Heartbeat { timestamp: 1 })
            .await
            .unwrap();
        assert!(matches!(
            next_event(&mut events).await,
            ServerMessage::Disconnected { reason: ConnectionError::Stopped, .. }
        ));
    }
}
