//! Player resource ledgers and harvestable world nodes.

use crate::error::GameLogicError;
use castle_shared::PlayerId;
use log::debug;
use rand::Rng;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceKind {
    pub id: u32,
    pub name: String,
    pub initial_amount: u32,
    pub is_renewable: bool,
    /// Units regenerated per second on a renewable node.
    pub respawn_rate: f32,
}

impl ResourceKind {
    pub fn new(id: u32, name: &str, initial_amount: u32, is_renewable: bool, respawn_rate: f32) -> Self {
        Self {
            id,
            name: name.to_string(),
            initial_amount,
            is_renewable,
            respawn_rate,
        }
    }
}

pub fn default_kinds() -> Vec<ResourceKind> {
    vec![
        ResourceKind::new(1, "Gold", 1000, false, 0.0),
        ResourceKind::new(2, "Wood", 500, true, 0.1),
        ResourceKind::new(3, "Stone", 300, true, 0.05),
        ResourceKind::new(4, "Food", 200, true, 0.2),
    ]
}

/// One player's balances. Amounts never go below zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceLedger {
    balances: BTreeMap<String, u32>,
}

impl ResourceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_balances<'a>(balances: impl IntoIterator<Item = (&'a str, u32)>) -> Self {
        let mut ledger = Self::new();
        for (name, amount) in balances {
            ledger.add(name, amount);
        }
        ledger
    }

    pub fn get(&self, name: &str) -> u32 {
        self.balances.get(name).copied().unwrap_or(0)
    }

    /// Saturates at `u32::MAX`.
    pub fn add(&mut self, name: &str, amount: u32) {
        let balance = self.balances.entry(name.to_string()).or_insert(0);
        *balance = balance.saturating_add(amount);
    }

    /// Deducts `amount` if the balance covers it. The ledger is untouched on
    /// failure.
    pub fn spend(&mut self, name: &str, amount: u32) -> bool {
        match self.balances.get_mut(name) {
            Some(balance) if *balance >= amount => {
                *balance -= amount;
                true
            }
            _ => amount == 0,
        }
    }

    /// First cost the ledger cannot cover, if any.
    pub fn check_costs(&self, costs: &[(&str, u32)]) -> Result<(), GameLogicError> {
        for (name, needed) in costs {
            let available = self.get(name);
            if available < *needed {
                return Err(GameLogicError::InsufficientResources {
                    resource: name.to_string(),
                    needed: *needed,
                    available,
                });
            }
        }
        Ok(())
    }

    /// Deducts every cost or none of them.
    pub fn spend_all(&mut self, costs: &[(&str, u32)]) -> Result<(), GameLogicError> {
        self.check_costs(costs)?;
        for (name, amount) in costs {
            self.spend(name, *amount);
        }
        Ok(())
    }

    /// Balances in name order.
    pub fn balances(&self) -> Vec<(String, u32)> {
        self.balances
            .iter()
            .map(|(name, amount)| (name.clone(), *amount))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceNode {
    pub id: u32,
    pub x: i32,
    pub y: i32,
    pub kind_id: u32,
    /// Fractional so slow respawn rates still accumulate between ticks.
    pub current_amount: f32,
}

impl ResourceNode {
    /// Whole units that can be harvested right now.
    pub fn available(&self) -> u32 {
        self.current_amount.max(0.0).floor() as u32
    }
}

/// Outcome of a successful harvest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Harvest {
    pub resource: String,
    pub amount: u32,
}

#[derive(Debug)]
pub struct ResourceManager {
    kinds: Vec<ResourceKind>,
    ledgers: HashMap<PlayerId, ResourceLedger>,
    nodes: BTreeMap<u32, ResourceNode>,
    next_node_id: u32,
}

impl Default for ResourceManager {
    fn default() -> Self {
        Self::new(default_kinds())
    }
}

impl ResourceManager {
    pub fn new(kinds: Vec<ResourceKind>) -> Self {
        Self {
            kinds,
            ledgers: HashMap::new(),
            nodes: BTreeMap::new(),
            next_node_id: 1,
        }
    }

    pub fn kinds(&self) -> &[ResourceKind] {
        &self.kinds
    }

    pub fn kind(&self, id: u32) -> Option<&ResourceKind> {
        self.kinds.iter().find(|kind| kind.id == id)
    }

    pub fn has_ledger(&self, player: PlayerId) -> bool {
        self.ledgers.contains_key(&player)
    }

    pub fn ledger(&self, player: PlayerId) -> Option<&ResourceLedger> {
        self.ledgers.get(&player)
    }

    /// Creates the ledger on first use.
    pub fn ledger_mut(&mut self, player: PlayerId) -> &mut ResourceLedger {
        self.ledgers.entry(player).or_default()
    }

    pub fn add_resource(&mut self, player: PlayerId, name: &str, amount: u32) {
        self.ledger_mut(player).add(name, amount);
    }

    pub fn spend_resource(&mut self, player: PlayerId, name: &str, amount: u32) -> bool {
        self.ledger_mut(player).spend(name, amount)
    }

    pub fn get_resource_amount(&self, player: PlayerId, name: &str) -> u32 {
        self.ledger(player).map_or(0, |ledger| ledger.get(name))
    }

    /// Balances for a `ResourceUpdate`, empty if the player has no ledger.
    pub fn balances(&self, player: PlayerId) -> Vec<(String, u32)> {
        self.ledger(player)
            .map(ResourceLedger::balances)
            .unwrap_or_default()
    }

    /// Places a full node of the given kind. `None` if the kind is unknown.
    pub fn add_resource_node(&mut self, x: i32, y: i32, kind_id: u32) -> Option<u32> {
        let initial = self.kind(kind_id)?.initial_amount;
        let id = self.next_node_id;
        self.next_node_id += 1;
        self.nodes.insert(
            id,
            ResourceNode {
                id,
                x,
                y,
                kind_id,
                current_amount: initial as f32,
            },
        );
        Some(id)
    }

    pub fn remove_resource_node(&mut self, id: u32) -> bool {
        self.nodes.remove(&id).is_some()
    }

    pub fn node(&self, id: u32) -> Option<&ResourceNode> {
        self.nodes.get(&id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &ResourceNode> {
        self.nodes.values()
    }

    /// Scatters `per_kind` nodes of every kind over a `width` x `height` map.
    pub fn seed_nodes<R: Rng>(&mut self, rng: &mut R, width: i32, height: i32, per_kind: usize) {
        let kind_ids: Vec<u32> = self.kinds.iter().map(|kind| kind.id).collect();
        for kind_id in kind_ids {
            for _ in 0..per_kind {
                let x = rng.gen_range(0..width);
                let y = rng.gen_range(0..height);
                self.add_resource_node(x, y, kind_id);
            }
        }
        debug!("Seeded {} resource nodes", self.nodes.len());
    }

    /// Takes up to `max` whole units from a node.
    pub fn harvest(&mut self, node_id: u32, max: u32) -> Result<Harvest, GameLogicError> {
        let node = self
            .nodes
            .get_mut(&node_id)
            .ok_or(GameLogicError::UnknownNode(node_id))?;

        let amount = node.available().min(max);
        if amount == 0 {
            return Err(GameLogicError::NodeDepleted(node_id));
        }
        node.current_amount -= amount as f32;

        let resource = self
            .kinds
            .iter()
            .find(|kind| kind.id == node.kind_id)
            .map(|kind| kind.name.clone())
            .ok_or(GameLogicError::UnknownNode(node_id))?;
        Ok(Harvest { resource, amount })
    }

    /// Regenerates renewable nodes by `respawn_rate * delta_secs`, never past
    /// their kind's initial amount.
    pub fn update(&mut self, delta_secs: f32) {
        for node in self.nodes.values_mut() {
            let Some(kind) = self.kinds.iter().find(|kind| kind.id == node.kind_id) else {
                continue;
            };
            let cap = kind.initial_amount as f32;
            if kind.is_renewable && node.current_amount < cap {
                node.current_amount = (node.current_amount + kind.respawn_rate * delta_secs).min(cap);
            }
        }
    }

    pub fn remove_player(&mut self, player: PlayerId) -> bool {
        self.ledgers.remove(&player).is_some()
    }
}
