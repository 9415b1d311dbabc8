//! Maps each decoded client message onto one [`GameState`] operation.
//!
//! Dispatch is synchronous and never touches sockets or the store. The
//! replies and store work it produces are returned in a [`Dispatch`] for the
//! event loop to deliver.

use crate::error::GameLogicError;
use crate::game::{GameState, MatchEvent};
use crate::persistence::{PlayerRecord, ResourceTransaction, StatsDelta, StoreJob};
use crate::utils::{get_timestamp, validate_name};
use castle_shared::{Message, PlayerId, ProtocolError};
use log::{debug, info};

/// Per-connection state the dispatcher reads and updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    pub player_id: PlayerId,
    pub authenticated: bool,
}

impl Session {
    pub fn new(player_id: PlayerId) -> Self {
        Self {
            player_id,
            authenticated: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Send { to: PlayerId, message: Message },
    /// To every registered connection except `exclude`.
    Broadcast {
        message: Message,
        exclude: Option<PlayerId>,
    },
}

/// Everything produced by handling one message.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub outbound: Vec<Outbound>,
    pub jobs: Vec<StoreJob>,
    /// Close the sender's connection once the outbound messages are queued.
    pub close: bool,
}

impl Dispatch {
    fn reply(to: PlayerId, message: Message) -> Self {
        let mut dispatch = Self::default();
        dispatch.send(to, message);
        dispatch
    }

    fn error(to: PlayerId, err: &GameLogicError) -> Self {
        Self::reply(to, Message::error(err.to_string()))
    }

    fn send(&mut self, to: PlayerId, message: Message) {
        self.outbound.push(Outbound::Send { to, message });
    }

    fn broadcast(&mut self, message: Message) {
        self.outbound.push(Outbound::Broadcast {
            message,
            exclude: None,
        });
    }

    fn push_match_event(&mut self, event: MatchEvent) {
        match event {
            MatchEvent::Started {
                match_id,
                participants,
                start_time,
            } => {
                self.broadcast(Message::GameStart { match_id });
                self.jobs.push(StoreJob::MatchStart {
                    match_id,
                    participants,
                    start_time,
                });
            }
            MatchEvent::Ended {
                match_id,
                winner,
                participants,
                end_time,
            } => {
                self.broadcast(Message::GameEnd {
                    match_id,
                    winner: winner.unwrap_or(0),
                });

                let winners: Vec<PlayerId> = winner.into_iter().collect();
                let losers: Vec<PlayerId> = match winner {
                    Some(w) => participants.iter().copied().filter(|p| *p != w).collect(),
                    None => Vec::new(),
                };
                for player in &participants {
                    self.jobs.push(StoreJob::UpdateStats {
                        player: *player,
                        delta: StatsDelta {
                            matches_played: 1,
                            matches_won: u32::from(winner == Some(*player)),
                            ..Default::default()
                        },
                    });
                }
                self.jobs.push(StoreJob::MatchEnd {
                    match_id,
                    winners,
                    losers,
                    end_time,
                });
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Dispatcher {
    max_chat_len: usize,
    max_name_len: usize,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(256, 32)
    }
}

impl Dispatcher {
    pub fn new(max_chat_len: usize, max_name_len: usize) -> Self {
        Self {
            max_chat_len,
            max_name_len,
        }
    }

    /// Handles one message from `session`.
    ///
    /// Unknown message types are the only error; the caller closes the
    /// connection. Everything else, including rejected requests, becomes a
    /// reply.
    pub fn dispatch(
        &self,
        game: &mut GameState,
        session: &mut Session,
        message: Message,
    ) -> Result<Dispatch, ProtocolError> {
        let player = session.player_id;
        let kind = message
            .message_type()
            .ok_or(ProtocolError::UnknownMessageType(message.kind()))?;

        if kind.is_server_only() {
            debug!("Player {} sent server-only message {:?}", player, kind);
            return Ok(Dispatch::error(player, &GameLogicError::UnexpectedMessage));
        }
        if !session.authenticated && !kind.is_connection_level() {
            debug!("Rejected {:?} from unauthenticated player {}", kind, player);
            return Ok(Dispatch::error(player, &GameLogicError::NotAuthenticated));
        }

        let dispatch = match message {
            Message::Connect { name } => self.connect(game, session, &name),
            Message::Disconnect => Dispatch {
                close: true,
                ..Default::default()
            },
            Message::Heartbeat { timestamp } => {
                Dispatch::reply(player, Message::Heartbeat { timestamp })
            }
            Message::Chat { team_only, text } => self.chat(game, player, team_only, &text),
            Message::RequestUpgrade { name } => Self::request_upgrade(game, player, name),
            Message::RequestTechnology { name } => {
                let success = game.unlock_technology(player, &name);
                Dispatch::reply(player, Message::TechnologyResponse { success, name })
            }
            Message::UpgradeListRequest => {
                let (upgrades, technologies) = game.upgrade_list(player);
                Dispatch::reply(
                    player,
                    Message::UpgradeListResponse {
                        upgrades,
                        technologies,
                    },
                )
            }
            Message::PlayerMove { x, y, unit_ids } => {
                match game.move_units(player, x, y, &unit_ids) {
                    Ok(()) => Dispatch::default(),
                    Err(e) => Dispatch::error(player, &e),
                }
            }
            Message::PlayerBuild {
                x,
                y,
                building_type,
            } => match game.build(player, x, y, building_type) {
                Ok(()) => Dispatch {
                    jobs: vec![StoreJob::UpdateStats {
                        player,
                        delta: StatsDelta {
                            buildings_constructed: 1,
                            ..Default::default()
                        },
                    }],
                    ..Default::default()
                },
                Err(e) => Dispatch::error(player, &e),
            },
            Message::PlayerAttack {
                attacker_id,
                target_id,
            } => match game.attack(player, attacker_id, target_id) {
                Ok(()) => Dispatch::default(),
                Err(e) => Dispatch::error(player, &e),
            },
            Message::PlayerHarvest { resource_id, .. } => Self::harvest(game, player, resource_id),
            Message::JoinGame => {
                let mut dispatch = Dispatch::default();
                if let Some(event) = game.join_game(player) {
                    dispatch.push_match_event(event);
                }
                dispatch
            }
            Message::LeaveGame => self.player_left(game, player),
            // Filtered above.
            Message::ConnectResponse { .. }
            | Message::GameStart { .. }
            | Message::GameEnd { .. }
            | Message::ResourceUpdate { .. }
            | Message::UpgradeResponse { .. }
            | Message::TechnologyResponse { .. }
            | Message::UpgradeListResponse { .. }
            | Message::Error { .. }
            | Message::Unknown { .. } => Dispatch::error(player, &GameLogicError::UnexpectedMessage),
        };

        Ok(dispatch)
    }

    /// Drops `player` from any running match. Used when a connection ends;
    /// the player's resources and upgrades are kept.
    pub fn player_left(&self, game: &mut GameState, player: PlayerId) -> Dispatch {
        let mut dispatch = Dispatch::default();
        if let Some(event) = game.player_left(player) {
            dispatch.push_match_event(event);
        }
        dispatch
    }

    /// Deletes every piece of state held for `player`.
    pub fn remove_player(&self, game: &mut GameState, player: PlayerId) -> Dispatch {
        let mut dispatch = Dispatch::default();
        if let Some(event) = game.remove_player(player) {
            dispatch.push_match_event(event);
        }
        dispatch
    }

    fn connect(&self, game: &mut GameState, session: &mut Session, name: &str) -> Dispatch {
        let player = session.player_id;
        let name = match validate_name(name, self.max_name_len) {
            Ok(name) => name,
            Err(reason) => return Dispatch::error(player, &GameLogicError::InvalidName(reason)),
        };

        game.connect_player(player, name);
        session.authenticated = true;
        info!("Player {} connected as {}", player, name);

        let mut dispatch = Dispatch::reply(player, Message::ConnectResponse { player_id: player });
        dispatch.jobs.push(StoreJob::SavePlayer(PlayerRecord {
            id: player,
            name: name.to_string(),
            last_seen: get_timestamp(),
        }));
        dispatch
    }

    fn chat(&self, game: &mut GameState, player: PlayerId, team_only: bool, text: &str) -> Dispatch {
        if text.trim().is_empty() {
            return Dispatch::error(player, &GameLogicError::ChatRejected("message is empty"));
        }
        if text.len() > self.max_chat_len {
            return Dispatch::error(player, &GameLogicError::ChatRejected("message is too long"));
        }
        if !game.post_chat(player, text, team_only) {
            debug!("Dropped chat from muted player {}", player);
            return Dispatch::default();
        }

        let sender = game
            .player_name(player)
            .map_or_else(|| format!("Player {}", player), str::to_string);
        let mut dispatch = Dispatch::default();
        dispatch.broadcast(Message::Chat {
            team_only,
            text: format!("{}: {}", sender, text),
        });
        dispatch
    }

    fn request_upgrade(game: &mut GameState, player: PlayerId, name: String) -> Dispatch {
        match game.purchase_upgrade(player, &name) {
            Ok(level) => {
                let mut dispatch = Dispatch::reply(
                    player,
                    Message::UpgradeResponse {
                        success: true,
                        name,
                        new_level: i32::from(level),
                    },
                );
                dispatch.send(
                    player,
                    Message::ResourceUpdate {
                        resources: game.resources.balances(player),
                    },
                );
                dispatch
            }
            Err(e) => {
                debug!("Player {} upgrade {} refused: {}", player, name, e);
                let level = game.upgrades.get_level_by_name(player, &name);
                Dispatch::reply(
                    player,
                    Message::UpgradeResponse {
                        success: false,
                        name,
                        new_level: i32::from(level),
                    },
                )
            }
        }
    }

    fn harvest(game: &mut GameState, player: PlayerId, node_id: u32) -> Dispatch {
        let harvest = match game.harvest(player, node_id) {
            Ok(harvest) => harvest,
            Err(e) => return Dispatch::error(player, &e),
        };

        let mut dispatch = Dispatch::reply(
            player,
            Message::ResourceUpdate {
                resources: game.resources.balances(player),
            },
        );
        dispatch
            .jobs
            .push(StoreJob::RecordResource(ResourceTransaction {
                player,
                resource: harvest.resource,
                amount: harvest.amount,
                timestamp: get_timestamp(),
            }));
        dispatch.jobs.push(StoreJob::UpdateStats {
            player,
            delta: StatsDelta {
                resources_gathered: u64::from(harvest.amount),
                ..Default::default()
            },
        });
        dispatch
    }
}
