//! Server network layer: TCP accept loop and the event loop that owns the game

use crate::client_manager::ClientManager;
use crate::config::ServerConfig;
use crate::connection::{Connection, ConnectionConfig};
use crate::dispatcher::{Dispatch, Dispatcher, Outbound, Session};
use crate::error::{ConnectionError, GameLogicError, ServerError};
use crate::game::Game;
use crate::persistence::Persistence;
use castle_shared::{framing, Message, PlayerId};
use log::{debug, info, warn};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// Events delivered to the main server loop
#[derive(Debug)]
pub enum ServerMessage {
    MessageReceived {
        player_id: PlayerId,
        message: Message,
    },
    /// Sent exactly once per connection, by its read task.
    Disconnected {
        player_id: PlayerId,
        reason: ConnectionError,
    },
    Admin(AdminCommand),
    Shutdown,
}

/// Operator actions applied by the event loop between client messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    GrantResources {
        player: PlayerId,
        resource: String,
        amount: u32,
    },
    Mute(PlayerId),
    Unmute(PlayerId),
    /// Disconnects the player and forgets all of their state.
    RemovePlayer(PlayerId),
}

/// Cloneable control handle for a running [`Server`].
///
/// Every method returns false once the server has stopped.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    tx: mpsc::UnboundedSender<ServerMessage>,
    addr: SocketAddr,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn grant_resources(&self, player: PlayerId, resource: &str, amount: u32) -> bool {
        self.admin(AdminCommand::GrantResources {
            player,
            resource: resource.to_string(),
            amount,
        })
    }

    pub fn mute_player(&self, player: PlayerId) -> bool {
        self.admin(AdminCommand::Mute(player))
    }

    pub fn unmute_player(&self, player: PlayerId) -> bool {
        self.admin(AdminCommand::Unmute(player))
    }

    pub fn remove_player(&self, player: PlayerId) -> bool {
        self.admin(AdminCommand::RemovePlayer(player))
    }

    /// Asks the event loop to stop every connection and return.
    pub fn shutdown(&self) -> bool {
        self.tx.send(ServerMessage::Shutdown).is_ok()
    }

    fn admin(&self, command: AdminCommand) -> bool {
        self.tx.send(ServerMessage::Admin(command)).is_ok()
    }
}

/// Main server coordinating connections and game state
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: ServerConfig,
    clients: ClientManager,
    game: Game,
    dispatcher: Dispatcher,
    persistence: Persistence,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
}

impl Server {
    /// Validates `config` and binds the listener. This is the only fatal
    /// step; nothing after it stops the process.
    pub async fn bind(config: ServerConfig, persistence: Persistence) -> Result<Self, ServerError> {
        config.validate()?;

        let addr = config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::Bind { addr, source })?;
        info!("Server listening on {}", local_addr);

        let mut game = Game::new(&config);
        game.state
            .set_next_match_id(persistence.next_match_id().await);

        let (server_tx, server_rx) = mpsc::unbounded_channel();

        Ok(Server {
            listener,
            local_addr,
            clients: ClientManager::new(config.max_clients),
            game,
            dispatcher: Dispatcher::new(config.max_chat_len, config.max_name_len),
            persistence,
            config,
            server_tx,
            server_rx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            tx: self.server_tx.clone(),
            addr: self.local_addr,
        }
    }

    /// Main server loop: accepts, queued events and scheduled game tasks
    pub async fn run(mut self) {
        info!("Server started successfully");

        loop {
            let now = Instant::now();
            let wake = match self.game.next_deadline() {
                Some(deadline) => deadline.min(now + self.config.poll_interval),
                None => now + self.config.poll_interval,
            };

            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => self.accept(stream, addr),
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                },

                event = self.server_rx.recv() => match event {
                    Some(ServerMessage::MessageReceived { player_id, message }) => {
                        self.handle_message(player_id, message);
                    }
                    Some(ServerMessage::Disconnected { player_id, reason }) => {
                        self.handle_disconnect(player_id, &reason);
                    }
                    Some(ServerMessage::Admin(command)) => self.handle_admin(command),
                    // The loop holds a sender, so `None` cannot happen.
                    Some(ServerMessage::Shutdown) | None => {
                        info!("Server shutting down");
                        break;
                    }
                },

                _ = tokio::time::sleep_until(tokio::time::Instant::from_std(wake)) => {
                    let ran = self.game.poll(Instant::now());
                    if ran > 0 {
                        debug!("Ran {} scheduled tasks", ran);
                    }
                },
            }
        }

        self.clients.stop_all();
        info!("Server stopped with {} clients connected", self.clients.len());
    }

    fn accept(&mut self, stream: TcpStream, addr: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not set TCP_NODELAY for {}: {}", addr, e);
        }

        if self.clients.is_full() {
            warn!("Rejecting {}: server full", addr);
            tokio::spawn(reject(stream));
            return;
        }

        let connection_config = ConnectionConfig {
            max_frame_len: self.config.max_frame_len,
            idle_timeout: self.config.idle_timeout,
            max_queued_frames: self.config.max_queued_frames,
        };
        let events = self.server_tx.clone();
        self.clients.add_client(addr, move |id| {
            Connection::new(id, addr, stream, connection_config).start(events)
        });
    }

    fn handle_message(&mut self, player_id: PlayerId, message: Message) {
        let Some(client) = self.clients.get(player_id) else {
            debug!("Dropping message from departed client {}", player_id);
            return;
        };
        let handle = client.handle.clone();
        // Frames read before a stop was handled are dropped.
        if !handle.is_connected() {
            debug!("Dropping message from closed client {}", player_id);
            return;
        }

        let mut session = Session {
            player_id,
            authenticated: handle.is_authenticated(),
        };
        match self
            .dispatcher
            .dispatch(&mut self.game.state, &mut session, message)
        {
            Ok(dispatch) => {
                handle.set_authenticated(session.authenticated);
                let close = dispatch.close;
                self.deliver(dispatch);
                if close {
                    handle.stop();
                }
            }
            Err(e) => {
                warn!("Closing client {}: {}", player_id, e);
                handle.stop();
            }
        }
    }

    fn handle_disconnect(&mut self, player_id: PlayerId, reason: &ConnectionError) {
        if self.clients.remove_client(player_id).is_none() {
            return;
        }
        debug!("Client {} left: {}", player_id, reason);
        let dispatch = self.dispatcher.player_left(&mut self.game.state, player_id);
        self.deliver(dispatch);
    }

    fn handle_admin(&mut self, command: AdminCommand) {
        info!("Admin command: {:?}", command);
        match command {
            AdminCommand::GrantResources {
                player,
                resource,
                amount,
            } => {
                let state = &mut self.game.state;
                state.resources.add_resource(player, &resource, amount);
                self.clients.send_to(
                    player,
                    &Message::ResourceUpdate {
                        resources: state.resources.balances(player),
                    },
                );
            }
            AdminCommand::Mute(player) => {
                self.game.state.chat.mute(player);
            }
            AdminCommand::Unmute(player) => {
                self.game.state.chat.unmute(player);
            }
            AdminCommand::RemovePlayer(player) => {
                if let Some(client) = self.clients.remove_client(player) {
                    client.handle.stop();
                }
                let dispatch = self.dispatcher.remove_player(&mut self.game.state, player);
                self.deliver(dispatch);
            }
        }
    }

    fn deliver(&self, dispatch: Dispatch) {
        for outbound in dispatch.outbound {
            match outbound {
                Outbound::Send { to, message } => {
                    self.clients.send_to(to, &message);
                }
                Outbound::Broadcast { message, exclude } => {
                    self.clients.broadcast(&message, exclude);
                }
            }
        }
        for job in dispatch.jobs {
            self.persistence.submit(job);
        }
    }
}

/// Tells a client the server is full and closes the socket.
async fn reject(mut stream: TcpStream) {
    let frame = framing::encode_frame(&Message::error(GameLogicError::ServerFull.to_string()));
    if let Err(e) = framing::write_raw(&mut stream, &frame).await {
        debug!("Could not send rejection: {}", e);
    }
    let _ = stream.shutdown().await;
}
