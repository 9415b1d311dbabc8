//! Server configuration.
//!
//! Every field has a default; `main` only overrides the port and the data
//! directory. Call [`ServerConfig::validate`] before binding.

use crate::error::ServerError;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 12345;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_host: String,
    pub port: u16,
    /// Maximum number of simultaneously connected clients.
    pub max_clients: usize,
    /// Largest frame payload accepted from a client.
    pub max_frame_len: usize,
    pub chat_history_capacity: usize,
    pub max_chat_len: usize,
    pub max_name_len: usize,
    pub max_upgrade_level: u8,
    /// Period of the resource regeneration task.
    pub regen_interval: Duration,
    /// Longest the event loop sleeps without polling the scheduler.
    pub poll_interval: Duration,
    /// Disconnect clients that send nothing for this long. `None` disables it.
    pub idle_timeout: Option<Duration>,
    /// Outbound frames queued per client before it is dropped as too slow.
    pub max_queued_frames: usize,
    /// Balances granted when a name connects for the first time.
    pub starting_resources: Vec<(String, u32)>,
    /// Most a single harvest command takes from a node.
    pub harvest_amount: u32,
    pub map_width: i32,
    pub map_height: i32,
    pub nodes_per_resource: usize,
    /// Fixed seed for node placement; random when `None`.
    pub world_seed: Option<u64>,
    pub min_players_to_start: usize,
    pub data_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            max_clients: 64,
            max_frame_len: castle_shared::framing::MAX_FRAME_LEN,
            chat_history_capacity: 100,
            max_chat_len: 256,
            max_name_len: 32,
            max_upgrade_level: 3,
            regen_interval: Duration::from_secs(1),
            poll_interval: Duration::from_millis(100),
            idle_timeout: None,
            max_queued_frames: crate::connection::DEFAULT_MAX_QUEUED_FRAMES,
            starting_resources: vec![
                ("Gold".to_string(), 1000),
                ("Wood".to_string(), 500),
                ("Stone".to_string(), 300),
                ("Food".to_string(), 200),
            ],
            harvest_amount: 10,
            map_width: 100,
            map_height: 100,
            nodes_per_resource: 4,
            world_seed: None,
            min_players_to_start: 2,
            data_dir: PathBuf::from("data/castle.sled"),
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.port)
    }

    pub fn validate(&self) -> Result<(), ServerError> {
        let invalid = |msg: &str| Err(ServerError::InvalidConfig(msg.to_string()));

        if self.max_clients == 0 {
            return invalid("max_clients must be at least 1");
        }
        if self.max_frame_len < castle_shared::codec::PAYLOAD_HEADER_LEN {
            return invalid("max_frame_len is smaller than a message header");
        }
        if self.max_queued_frames == 0 {
            return invalid("max_queued_frames must be at least 1");
        }
        if self.chat_history_capacity == 0 {
            return invalid("chat_history_capacity must be at least 1");
        }
        if self.max_upgrade_level == 0 {
            return invalid("max_upgrade_level must be at least 1");
        }
        if self.regen_interval.is_zero() || self.poll_interval.is_zero() {
            return invalid("timer intervals must be non-zero");
        }
        if self.map_width <= 0 || self.map_height <= 0 {
            return invalid("map dimensions must be positive");
        }
        if self.min_players_to_start == 0 {
            return invalid("min_players_to_start must be at least 1");
        }
        Ok(())
    }
}
