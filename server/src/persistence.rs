//! Player, stats and match persistence.
//!
//! The store API is blocking. The event loop never calls it directly: it
//! hands [`StoreJob`]s to [`Persistence`], which applies them in submission
//! order on a single blocking worker. A failed job is logged and dropped;
//! gameplay never waits on or retries the store.

use crate::error::PersistenceError;
use castle_shared::PlayerId;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const TREE_PLAYERS: &str = "players";
const TREE_STATS: &str = "stats";
const TREE_MATCHES: &str = "matches";
const TREE_TRANSACTIONS: &str = "resource_transactions";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub id: PlayerId,
    pub name: String,
    /// Milliseconds since the Unix epoch.
    pub last_seen: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerStats {
    pub matches_played: u32,
    pub matches_won: u32,
    pub total_resources_gathered: u64,
    pub total_units_created: u32,
    pub total_buildings_constructed: u32,
}

/// Increments applied to a [`PlayerStats`] record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsDelta {
    pub matches_played: u32,
    pub matches_won: u32,
    pub resources_gathered: u64,
    pub units_created: u32,
    pub buildings_constructed: u32,
}

impl PlayerStats {
    pub fn apply(&mut self, delta: &StatsDelta) {
        self.matches_played = self.matches_played.saturating_add(delta.matches_played);
        self.matches_won = self.matches_won.saturating_add(delta.matches_won);
        self.total_resources_gathered = self
            .total_resources_gathered
            .saturating_add(delta.resources_gathered);
        self.total_units_created = self.total_units_created.saturating_add(delta.units_created);
        self.total_buildings_constructed = self
            .total_buildings_constructed
            .saturating_add(delta.buildings_constructed);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub match_id: u32,
    pub start_time: u64,
    /// `None` while the match is running.
    pub end_time: Option<u64>,
    pub participants: Vec<PlayerId>,
    pub winners: Vec<PlayerId>,
    pub losers: Vec<PlayerId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceTransaction {
    pub player: PlayerId,
    pub resource: String,
    pub amount: u32,
    pub timestamp: u64,
}

pub trait PlayerStore: Send + Sync {
    fn save_player(&self, record: &PlayerRecord) -> Result<(), PersistenceError>;

    fn load_player(&self, id: PlayerId) -> Result<PlayerRecord, PersistenceError>;

    /// Applies `delta` and returns the updated totals.
    fn update_player_stats(
        &self,
        id: PlayerId,
        delta: &StatsDelta,
    ) -> Result<PlayerStats, PersistenceError>;

    /// Zeroed stats for players that have none recorded.
    fn get_player_stats(&self, id: PlayerId) -> Result<PlayerStats, PersistenceError>;

    fn record_match_start(
        &self,
        match_id: u32,
        participants: &[PlayerId],
        start_time: u64,
    ) -> Result<(), PersistenceError>;

    fn record_match_end(
        &self,
        match_id: u32,
        winners: &[PlayerId],
        losers: &[PlayerId],
        end_time: u64,
    ) -> Result<(), PersistenceError>;

    fn record_resource_transaction(&self, tx: &ResourceTransaction) -> Result<(), PersistenceError>;

    fn get_total_resources_gathered(&self, player: PlayerId) -> Result<u64, PersistenceError>;

    /// Most recent matches the player took part in, newest first.
    fn get_player_match_history(
        &self,
        player: PlayerId,
        limit: usize,
    ) -> Result<Vec<MatchRecord>, PersistenceError>;

    /// One past the highest match id on record.
    fn next_match_id(&self) -> Result<u32, PersistenceError>;
}

/// Sled-backed [`PlayerStore`]. Values are bincode-encoded; integer keys are
/// big-endian so trees iterate in numeric order.
pub struct SledStore {
    db: sled::Db,
    players: sled::Tree,
    stats: sled::Tree,
    matches: sled::Tree,
    transactions: sled::Tree,
}

impl SledStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, PersistenceError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = sled::open(path)?;
        info!("Opened player store at {}", path.display());
        Self::from_db(db)
    }

    pub fn from_db(db: sled::Db) -> Result<Self, PersistenceError> {
        Ok(Self {
            players: db.open_tree(TREE_PLAYERS)?,
            stats: db.open_tree(TREE_STATS)?,
            matches: db.open_tree(TREE_MATCHES)?,
            transactions: db.open_tree(TREE_TRANSACTIONS)?,
            db,
        })
    }

    fn serialize<T: Serialize>(value: &T) -> Result<Vec<u8>, PersistenceError> {
        Ok(bincode::serialize(value)?)
    }

    fn deserialize<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, PersistenceError> {
        Ok(bincode::deserialize::<T>(bytes)?)
    }

    fn load_match(&self, match_id: u32) -> Result<MatchRecord, PersistenceError> {
        let Some(bytes) = self.matches.get(match_id.to_be_bytes())? else {
            return Err(PersistenceError::NotFound(format!("match {}", match_id)));
        };
        Self::deserialize(&bytes)
    }

    fn store_match(&self, record: &MatchRecord) -> Result<(), PersistenceError> {
        self.matches
            .insert(record.match_id.to_be_bytes().to_vec(), Self::serialize(record)?)?;
        Ok(())
    }
}

impl PlayerStore for SledStore {
    fn save_player(&self, record: &PlayerRecord) -> Result<(), PersistenceError> {
        self.players
            .insert(record.id.to_be_bytes().to_vec(), Self::serialize(record)?)?;
        Ok(())
    }

    fn load_player(&self, id: PlayerId) -> Result<PlayerRecord, PersistenceError> {
        let Some(bytes) = self.players.get(id.to_be_bytes())? else {
            return Err(PersistenceError::NotFound(format!("player {}", id)));
        };
        Self::deserialize(&bytes)
    }

    fn update_player_stats(
        &self,
        id: PlayerId,
        delta: &StatsDelta,
    ) -> Result<PlayerStats, PersistenceError> {
        let mut stats = self.get_player_stats(id)?;
        stats.apply(delta);
        self.stats
            .insert(id.to_be_bytes().to_vec(), Self::serialize(&stats)?)?;
        Ok(stats)
    }

    fn get_player_stats(&self, id: PlayerId) -> Result<PlayerStats, PersistenceError> {
        match self.stats.get(id.to_be_bytes())? {
            Some(bytes) => Self::deserialize(&bytes),
            None => Ok(PlayerStats::default()),
        }
    }

    fn record_match_start(
        &self,
        match_id: u32,
        participants: &[PlayerId],
        start_time: u64,
    ) -> Result<(), PersistenceError> {
        self.store_match(&MatchRecord {
            match_id,
            start_time,
            end_time: None,
            participants: participants.to_vec(),
            winners: Vec::new(),
            losers: Vec::new(),
        })
    }

    fn record_match_end(
        &self,
        match_id: u32,
        winners: &[PlayerId],
        losers: &[PlayerId],
        end_time: u64,
    ) -> Result<(), PersistenceError> {
        let mut record = self.load_match(match_id)?;
        record.end_time = Some(end_time);
        record.winners = winners.to_vec();
        record.losers = losers.to_vec();
        self.store_match(&record)
    }

    fn record_resource_transaction(&self, tx: &ResourceTransaction) -> Result<(), PersistenceError> {
        let mut key = tx.player.to_be_bytes().to_vec();
        key.extend_from_slice(&self.db.generate_id()?.to_be_bytes());
        self.transactions.insert(key, Self::serialize(tx)?)?;
        Ok(())
    }

    fn get_total_resources_gathered(&self, player: PlayerId) -> Result<u64, PersistenceError> {
        let mut total = 0u64;
        for entry in self.transactions.scan_prefix(player.to_be_bytes()) {
            let (_, bytes) = entry?;
            let tx: ResourceTransaction = Self::deserialize(&bytes)?;
            total = total.saturating_add(u64::from(tx.amount));
        }
        Ok(total)
    }

    fn get_player_match_history(
        &self,
        player: PlayerId,
        limit: usize,
    ) -> Result<Vec<MatchRecord>, PersistenceError> {
        let mut history = Vec::new();
        for entry in self.matches.iter().rev() {
            if history.len() >= limit {
                break;
            }
            let (_, bytes) = entry?;
            let record: MatchRecord = Self::deserialize(&bytes)?;
            if record.participants.contains(&player) {
                history.push(record);
            }
        }
        Ok(history)
    }

    fn next_match_id(&self) -> Result<u32, PersistenceError> {
        match self.matches.last()? {
            Some((key, _)) => {
                let mut id = [0u8; 4];
                if key.len() != id.len() {
                    return Err(PersistenceError::NotFound("valid match key".to_string()));
                }
                id.copy_from_slice(&key);
                Ok(u32::from_be_bytes(id).saturating_add(1))
            }
            None => Ok(1),
        }
    }
}

/// Deferred store work produced while handling a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreJob {
    SavePlayer(PlayerRecord),
    UpdateStats {
        player: PlayerId,
        delta: StatsDelta,
    },
    RecordResource(ResourceTransaction),
    MatchStart {
        match_id: u32,
        participants: Vec<PlayerId>,
        start_time: u64,
    },
    MatchEnd {
        match_id: u32,
        winners: Vec<PlayerId>,
        losers: Vec<PlayerId>,
        end_time: u64,
    },
}

impl StoreJob {
    pub fn apply(&self, store: &dyn PlayerStore) -> Result<(), PersistenceError> {
        match self {
            StoreJob::SavePlayer(record) => store.save_player(record),
            StoreJob::UpdateStats { player, delta } => {
                store.update_player_stats(*player, delta).map(|_| ())
            }
            StoreJob::RecordResource(tx) => store.record_resource_transaction(tx),
            StoreJob::MatchStart {
                match_id,
                participants,
                start_time,
            } => store.record_match_start(*match_id, participants, *start_time),
            StoreJob::MatchEnd {
                match_id,
                winners,
                losers,
                end_time,
            } => store.record_match_end(*match_id, winners, losers, *end_time),
        }
    }
}

/// Optional store plus the worker feeding it.
///
/// Without a store every submission is dropped at `debug` level and the
/// server runs unsaved.
#[derive(Clone, Default)]
pub struct Persistence {
    store: Option<Arc<dyn PlayerStore>>,
    jobs: Option<mpsc::UnboundedSender<StoreJob>>,
}

impl std::fmt::Debug for Persistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Persistence")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl Persistence {
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Spawns the blocking worker. The returned handle completes once every
    /// clone of the `Persistence` is dropped and the queue has drained.
    pub fn start(store: Arc<dyn PlayerStore>) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<StoreJob>();
        let worker_store = Arc::clone(&store);

        let worker = tokio::task::spawn_blocking(move || {
            let mut warned = false;
            while let Some(job) = rx.blocking_recv() {
                if let Err(e) = job.apply(worker_store.as_ref()) {
                    if warned {
                        debug!("Store job {:?} failed: {}", job, e);
                    } else {
                        warn!("Store job failed, continuing without it: {}", e);
                        warned = true;
                    }
                }
            }
            debug!("Persistence worker finished");
        });

        (
            Self {
                store: Some(store),
                jobs: Some(tx),
            },
            worker,
        )
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    pub fn store(&self) -> Option<&Arc<dyn PlayerStore>> {
        self.store.as_ref()
    }

    pub fn submit(&self, job: StoreJob) {
        match &self.jobs {
            Some(jobs) => {
                if jobs.send(job).is_err() {
                    debug!("Persistence worker has stopped; job dropped");
                }
            }
            None => debug!("No store configured; dropping {:?}", job),
        }
    }

    /// Reads the next free match id on the blocking pool. Falls back to 1.
    pub async fn next_match_id(&self) -> u32 {
        let Some(store) = self.store.clone() else {
            return 1;
        };
        match tokio::task::spawn_blocking(move || store.next_match_id()).await {
            Ok(Ok(id)) => id,
            Ok(Err(e)) => {
                warn!("Could not read match ids from store: {}", e);
                1
            }
            Err(e) => {
                warn!("Match id lookup task failed: {}", e);
                1
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> SledStore {
        let db = sled::Config::new().temporary(true).open().unwrap();
        SledStore::from_db(db).unwrap()
    }

    #[test]
    fn test_player_roundtrip() {
        let store = temp_store();
        let record = PlayerRecord {
            id: 1,
            name: "Alice".into(),
            last_seen: 1_700_000_000_000,
        };
        store.save_player(&record).unwrap();
        assert_eq!(store.load_player(1).unwrap(), record);
        assert!(matches!(
            store.load_player(2),
            Err(PersistenceError::NotFound(_))
        ));
    }

    #[test]
    fn test_stats_accumulate() {
        let store = temp_store();
        assert_eq!(store.get_player_stats(3).unwrap(), PlayerStats::default());

        let delta = StatsDelta {
            matches_played: 1,
            buildings_constructed: 2,
            ..StatsDelta::default()
        };
        store.update_player_stats(3, &delta).unwrap();
        let stats = store.update_player_stats(3, &delta).unwrap();

        assert_eq!(stats.matches_played, 2);
        assert_eq!(stats.total_buildings_constructed, 4);
        assert_eq!(store.get_player_stats(3).unwrap(), stats);
    }

    #[test]
    fn test_match_lifecycle_and_history() {
        let store = temp_store();
        store.record_match_start(1, &[1, 2], 100).unwrap();
        store.record_match_end(1, &[1], &[2], 200).unwrap();
        store.record_match_start(2, &[2, 3], 300).unwrap();

        let history = store.get_player_match_history(2, 10).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].match_id, 2);
        assert_eq!(history[0].end_time, None);
        assert_eq!(history[1].winners, vec![1]);
        assert_eq!(history[1].end_time, Some(200));

        assert_eq!(store.get_player_match_history(2, 1).unwrap().len(), 1);
        assert!(store.get_player_match_history(9, 10).unwrap().is_empty());
        assert_eq!(store.next_match_id().unwrap(), 3);
    }

    #[test]
    fn test_match_end_without_start() {
        let store = temp_store();
        assert!(matches!(
            store.record_match_end(7, &[], &[], 0),
            Err(PersistenceError::NotFound(_))
        ));
    }

    #[test]
    fn test_resource_totals() {
        let store = temp_store();
        for amount in [10, 15, 5] {
            store
                .record_resource_transaction(&ResourceTransaction {
                    player: 4,
                    resource: "Wood".into(),
                    amount,
                    timestamp: 0,
                })
                .unwrap();
        }
        store
            .record_resource_transaction(&ResourceTransaction {
                player: 5,
                resource: "Gold".into(),
                amount: 100,
                timestamp: 0,
            })
            .unwrap();

        assert_eq!(store.get_total_resources_gathered(4).unwrap(), 30);
        assert_eq!(store.get_total_resources_gathered(5).unwrap(), 100);
        assert_eq!(store.get_total_resources_gathered(6).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_worker_applies_jobs_in_order() {
        let store: Arc<dyn PlayerStore> = Arc::new(temp_store());
        let (persistence, worker) = Persistence::start(Arc::clone(&store));

        persistence.submit(StoreJob::MatchStart {
            match_id: 1,
            participants: vec![1, 2],
            start_time: 10,
        });
        persistence.submit(StoreJob::MatchEnd {
            match_id: 1,
            winners: vec![2],
            losers: vec![1],
            end_time: 20,
        });
        drop(persistence);
        worker.await.unwrap();

        let history = store.get_player_match_history(1, 10).unwrap();
        assert_eq!(history[0].winners, vec![2]);
        assert_eq!(history[0].end_time, Some(20));
    }

    #[tokio::test]
    async fn test_disabled_persistence_drops_jobs() {
        let persistence = Persistence::disabled();
        assert!(!persistence.is_enabled());
        persistence.submit(StoreJob::UpdateStats {
            player: 1,
            delta: StatsDelta::default(),
        });
        assert_eq!(persistence.next_match_id().await, 1);
    }
}
