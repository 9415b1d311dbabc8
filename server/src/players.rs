//! Player arena keyed by [`PlayerId`].

use castle_shared::PlayerId;
use log::info;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    /// Set by `JoinGame`, cleared by `LeaveGame` and disconnects.
    pub ready: bool,
    pub commands_issued: u32,
    pub buildings_built: u32,
    pub resources_gathered: u64,
    /// Where the player's units were last ordered to move.
    pub last_target: Option<(i32, i32)>,
}

impl Player {
    pub fn new(id: PlayerId, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            ready: false,
            commands_issued: 0,
            buildings_built: 0,
            resources_gathered: 0,
            last_target: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct PlayerRegistry {
    players: BTreeMap<PlayerId, Player>,
}

impl PlayerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `id` under `name`, or renames it if already present.
    /// Returns true when the player is new.
    pub fn register(&mut self, id: PlayerId, name: &str) -> bool {
        match self.players.get_mut(&id) {
            Some(player) => {
                if player.name != name {
                    info!("Player {} renamed from {} to {}", id, player.name, name);
                    player.name = name.to_string();
                }
                false
            }
            None => {
                info!("Registered player {} as {}", id, name);
                self.players.insert(id, Player::new(id, name));
                true
            }
        }
    }

    pub fn get(&self, id: PlayerId) -> Option<&Player> {
        self.players.get(&id)
    }

    pub fn get_mut(&mut self, id: PlayerId) -> Option<&mut Player> {
        self.players.get_mut(&id)
    }

    pub fn name(&self, id: PlayerId) -> Option<&str> {
        self.players.get(&id).map(|p| p.name.as_str())
    }

    pub fn remove(&mut self, id: PlayerId) -> Option<Player> {
        self.players.remove(&id)
    }

    pub fn ready_players(&self) -> Vec<PlayerId> {
        self.players
            .values()
            .filter(|p| p.ready)
            .map(|p| p.id)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}
