use crate::chat::ChatLog;
use crate::config::ServerConfig;
use crate::error::GameLogicError;
use crate::map::{OpenField, Terrain};
use crate::players::PlayerRegistry;
use crate::resources::{Harvest, ResourceManager};
use crate::timer::Timer;
use crate::upgrades::UpgradeManager;
use crate::utils::get_timestamp;
use castle_shared::PlayerId;
use log::{debug, info};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

pub const BUILD_SCORE: i64 = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Victory {
    None,
    Winner(PlayerId),
    Draw,
}

#[derive(Debug, Clone)]
pub struct MatchState {
    pub id: u32,
    pub participants: BTreeSet<PlayerId>,
    pub started_at: u64,
}

/// Match transitions caused by a ready change or departure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchEvent {
    Started {
        match_id: u32,
        participants: Vec<PlayerId>,
        start_time: u64,
    },
    Ended {
        match_id: u32,
        /// `None` for a draw.
        winner: Option<PlayerId>,
        /// Everyone who took part, including players who left.
        participants: Vec<PlayerId>,
        end_time: u64,
    },
}

pub struct GameState {
    pub players: PlayerRegistry,
    pub resources: ResourceManager,
    pub upgrades: UpgradeManager,
    pub chat: ChatLog,
    pub terrain: Box<dyn Terrain>,
    pub victory: Victory,
    /// Game time advanced by the regeneration task.
    pub elapsed: Duration,
    scores: HashMap<PlayerId, i64>,
    current_match: Option<MatchState>,
    /// Participants of the running match, including those who have left.
    match_roster: Vec<PlayerId>,
    next_match_id: u32,
    starting_resources: Vec<(String, u32)>,
    harvest_amount: u32,
    min_players_to_start: usize,
}

impl GameState {
    pub fn new(config: &ServerConfig) -> Self {
        let mut resources = ResourceManager::default();
        let mut rng = match config.world_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        resources.seed_nodes(
            &mut rng,
            config.map_width,
            config.map_height,
            config.nodes_per_resource,
        );

        Self {
            players: PlayerRegistry::new(),
            resources,
            upgrades: UpgradeManager::new(config.max_upgrade_level),
            chat: ChatLog::new(config.chat_history_capacity),
            terrain: Box::new(OpenField::new(config.map_width, config.map_height)),
            victory: Victory::None,
            elapsed: Duration::ZERO,
            scores: HashMap::new(),
            current_match: None,
            match_roster: Vec::new(),
            next_match_id: 1,
            starting_resources: config.starting_resources.clone(),
            harvest_amount: config.harvest_amount,
            min_players_to_start: config.min_players_to_start,
        }
    }

    /// Continues match numbering after ids already on record.
    pub fn set_next_match_id(&mut self, id: u32) {
        self.next_match_id = id.max(1);
    }

    /// Registers or renames a player. Starting resources are granted the
    /// first time a player is seen. Returns true for new players.
    pub fn connect_player(&mut self, id: PlayerId, name: &str) -> bool {
        let is_new = self.players.register(id, name);
        if is_new {
            let ledger = self.resources.ledger_mut(id);
            for (resource, amount) in &self.starting_resources {
                ledger.add(resource, *amount);
            }
        }
        is_new
    }

    /// Drops every piece of per-player state.
    pub fn remove_player(&mut self, id: PlayerId) -> Option<MatchEvent> {
        let event = self.player_left(id);
        self.players.remove(id);
        self.resources.remove_player(id);
        self.upgrades.remove_player(id);
        self.scores.remove(&id);
        self.chat.unmute(id);
        info!("Removed player {}", id);
        event
    }

    pub fn player_name(&self, id: PlayerId) -> Option<&str> {
        self.players.name(id)
    }

    /// Records and returns whether the message was accepted (false when the
    /// sender is muted).
    pub fn post_chat(&mut self, sender: PlayerId, text: &str, team_only: bool) -> bool {
        self.chat.broadcast_message(sender, text, team_only)
    }

    pub fn purchase_upgrade(&mut self, player: PlayerId, name: &str) -> Result<u8, GameLogicError> {
        let ledger = self.resources.ledger_mut(player);
        self.upgrades.purchase_upgrade(player, name, ledger)
    }

    pub fn unlock_technology(&mut self, player: PlayerId, name: &str) -> bool {
        self.upgrades.unlock_technology(player, name)
    }

    /// Purchasable upgrades and still-locked technologies.
    pub fn upgrade_list(&self, player: PlayerId) -> (Vec<String>, Vec<String>) {
        let upgrades = match self.resources.ledger(player) {
            Some(ledger) => self.upgrades.get_available_upgrades(player, ledger),
            None => self
                .upgrades
                .get_available_upgrades(player, &Default::default()),
        };
        (upgrades, self.upgrades.get_available_technologies(player))
    }

    pub fn move_units(
        &mut self,
        player: PlayerId,
        x: i32,
        y: i32,
        unit_ids: &[u32],
    ) -> Result<(), GameLogicError> {
        if !self.terrain.is_walkable(x, y) {
            return Err(GameLogicError::InvalidPosition { x, y });
        }
        let entry = self
            .players
            .get_mut(player)
            .ok_or(GameLogicError::UnknownPlayer(player))?;
        entry.last_target = Some((x, y));
        entry.commands_issued += 1;
        debug!("Player {} moves {} units to ({}, {})", player, unit_ids.len(), x, y);
        Ok(())
    }

    pub fn build(
        &mut self,
        player: PlayerId,
        x: i32,
        y: i32,
        building_type: u32,
    ) -> Result<(), GameLogicError> {
        if !self.terrain.is_buildable(x, y) {
            return Err(GameLogicError::InvalidPosition { x, y });
        }
        let entry = self
            .players
            .get_mut(player)
            .ok_or(GameLogicError::UnknownPlayer(player))?;
        entry.buildings_built += 1;
        entry.commands_issued += 1;
        debug!("Player {} builds type {} at ({}, {})", player, building_type, x, y);
        self.add_score(player, BUILD_SCORE);
        Ok(())
    }

    pub fn attack(
        &mut self,
        player: PlayerId,
        attacker_id: u32,
        target_id: u32,
    ) -> Result<(), GameLogicError> {
        if attacker_id == target_id {
            return Err(GameLogicError::AttackSelf);
        }
        let entry = self
            .players
            .get_mut(player)
            .ok_or(GameLogicError::UnknownPlayer(player))?;
        entry.commands_issued += 1;
        Ok(())
    }

    /// Moves up to the configured harvest amount from a node into the
    /// player's ledger.
    pub fn harvest(&mut self, player: PlayerId, node_id: u32) -> Result<Harvest, GameLogicError> {
        let harvest = self.resources.harvest(node_id, self.harvest_amount)?;
        self.resources
            .add_resource(player, &harvest.resource, harvest.amount);
        if let Some(entry) = self.players.get_mut(player) {
            entry.resources_gathered += u64::from(harvest.amount);
            entry.commands_issued += 1;
        }
        self.add_score(player, i64::from(harvest.amount));
        Ok(harvest)
    }

    pub fn add_score(&mut self, player: PlayerId, points: i64) {
        *self.scores.entry(player).or_insert(0) += points;
    }

    pub fn get_player_score(&self, player: PlayerId) -> i64 {
        self.scores.get(&player).copied().unwrap_or(0)
    }

    pub fn current_match(&self) -> Option<&MatchState> {
        self.current_match.as_ref()
    }

    /// Marks the player ready and starts a match once enough players are.
    pub fn join_game(&mut self, player: PlayerId) -> Option<MatchEvent> {
        self.players.get_mut(player)?.ready = true;
        self.try_start_match()
    }

    pub fn leave_game(&mut self, player: PlayerId) -> Option<MatchEvent> {
        self.player_left(player)
    }

    /// Clears the ready flag and drops the player from a running match,
    /// ending it if one or no participants remain.
    pub fn player_left(&mut self, player: PlayerId) -> Option<MatchEvent> {
        if let Some(entry) = self.players.get_mut(player) {
            entry.ready = false;
        }

        let running = self.current_match.as_mut()?;
        if !running.participants.remove(&player) || running.participants.len() > 1 {
            return None;
        }
        self.end_match()
    }

    fn try_start_match(&mut self) -> Option<MatchEvent> {
        if self.current_match.is_some() {
            return None;
        }
        let ready = self.players.ready_players();
        if ready.len() < self.min_players_to_start {
            return None;
        }

        let match_id = self.next_match_id;
        self.next_match_id = self.next_match_id.wrapping_add(1).max(1);
        let start_time = get_timestamp();
        self.victory = Victory::None;
        self.match_roster = ready.clone();
        self.current_match = Some(MatchState {
            id: match_id,
            participants: ready.iter().copied().collect(),
            started_at: start_time,
        });
        info!("Match {} started with players {:?}", match_id, ready);

        Some(MatchEvent::Started {
            match_id,
            participants: ready,
            start_time,
        })
    }

    fn end_match(&mut self) -> Option<MatchEvent> {
        let finished = self.current_match.take()?;
        let winner = finished.participants.iter().next().copied();
        self.victory = match winner {
            Some(id) => Victory::Winner(id),
            None => Victory::Draw,
        };

        let participants = std::mem::take(&mut self.match_roster);
        for id in &participants {
            if let Some(entry) = self.players.get_mut(*id) {
                entry.ready = false;
            }
        }
        info!("Match {} ended: {:?}", finished.id, self.victory);

        Some(MatchEvent::Ended {
            match_id: finished.id,
            winner,
            participants,
            end_time: get_timestamp(),
        })
    }
}

/// The aggregate plus the scheduler that drives its periodic work.
pub struct Game {
    pub state: GameState,
    pub timer: Timer<GameState>,
}

impl Game {
    pub fn new(config: &ServerConfig) -> Self {
        Self::new_at(config, Instant::now())
    }

    pub fn new_at(config: &ServerConfig, now: Instant) -> Self {
        let mut timer = Timer::new_at(now);
        let interval = config.regen_interval;
        let delta = interval.as_secs_f32();
        timer.set_interval_at(now, interval, move |state: &mut GameState| {
            state.resources.update(delta);
            state.elapsed += interval;
        });

        Self {
            state: GameState::new(config),
            timer,
        }
    }

    /// Runs every scheduled task due at `now`.
    pub fn poll(&mut self, now: Instant) -> usize {
        self.timer.update_at(now, &mut self.state)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timer.next_deadline()
    }
}
