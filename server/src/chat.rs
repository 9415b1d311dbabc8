//! Chat history and mute list.

use crate::utils::get_timestamp;
use castle_shared::PlayerId;
use std::collections::{HashSet, VecDeque};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRecord {
    pub sender: PlayerId,
    pub text: String,
    pub team_only: bool,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

/// Bounded, insertion-ordered chat history. The oldest record is evicted
/// first once the capacity is reached.
#[derive(Debug)]
pub struct ChatLog {
    history: VecDeque<ChatRecord>,
    capacity: usize,
    muted: HashSet<PlayerId>,
}

impl Default for ChatLog {
    fn default() -> Self {
        Self::new(100)
    }
}

impl ChatLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            history: VecDeque::with_capacity(capacity),
            capacity,
            muted: HashSet::new(),
        }
    }

    /// Records a message. Returns false, storing nothing, if the sender is
    /// muted.
    pub fn broadcast_message(&mut self, sender: PlayerId, text: &str, team_only: bool) -> bool {
        if self.is_muted(sender) {
            return false;
        }

        self.history.push_back(ChatRecord {
            sender,
            text: text.to_string(),
            team_only,
            timestamp: get_timestamp(),
        });
        while self.history.len() > self.capacity {
            self.history.pop_front();
        }
        true
    }

    /// The last `count` records, oldest first.
    pub fn get_recent_messages(&self, count: usize) -> Vec<ChatRecord> {
        let skip = self.history.len().saturating_sub(count);
        self.history.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// Returns false if the player was already muted.
    pub fn mute(&mut self, player: PlayerId) -> bool {
        self.muted.insert(player)
    }

    pub fn unmute(&mut self, player: PlayerId) -> bool {
        self.muted.remove(&player)
    }

    pub fn is_muted(&self, player: PlayerId) -> bool {
        self.muted.contains(&player)
    }
}
