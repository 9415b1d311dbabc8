//! Upgrade and technology progression.
//!
//! Upgrades are rows in a static table rather than types. A player owns every
//! upgrade kind from the start at level 0; purchasing raises one level at a
//! time up to the configured maximum.

use crate::error::GameLogicError;
use crate::resources::ResourceLedger;
use castle_shared::PlayerId;
use log::debug;
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum UpgradeKind {
    Weapon,
    Armor,
    Training,
    Resource,
    Defense,
}

impl UpgradeKind {
    pub const ALL: [UpgradeKind; 5] = [
        UpgradeKind::Weapon,
        UpgradeKind::Armor,
        UpgradeKind::Training,
        UpgradeKind::Resource,
        UpgradeKind::Defense,
    ];

    /// Name used on the wire.
    pub fn name(self) -> &'static str {
        self.spec().name
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    pub fn spec(self) -> &'static UpgradeSpec {
        &UPGRADES[self as usize]
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Effect {
    pub attribute: &'static str,
    pub base: f32,
    /// Percentage effects compound; the rest add.
    pub percentage: bool,
}

#[derive(Debug)]
pub struct UpgradeSpec {
    pub name: &'static str,
    pub display_name: &'static str,
    pub description: &'static str,
    /// Effects at level `L` are `base * scaling^(L-1)`.
    pub scaling: f32,
    pub effects: &'static [Effect],
    pub technology: Option<&'static str>,
    /// Charged for every level.
    pub costs: &'static [(&'static str, u32)],
}

const fn pct(attribute: &'static str, base: f32) -> Effect {
    Effect {
        attribute,
        base,
        percentage: true,
    }
}

static UPGRADES: [UpgradeSpec; 5] = [
    UpgradeSpec {
        name: "weapon",
        display_name: "Weapon Upgrade",
        description: "Improves unit attack damage",
        scaling: 1.2,
        effects: &[pct("attack_damage", 2.0), pct("attack_speed", 0.1)],
        technology: None,
        costs: &[("Gold", 100), ("Wood", 50)],
    },
    UpgradeSpec {
        name: "armor",
        display_name: "Armor Upgrade",
        description: "Improves unit defense",
        scaling: 1.15,
        effects: &[pct("armor", 1.5), pct("health", 1.0)],
        technology: Some("Basic Armory"),
        costs: &[("Gold", 100), ("Stone", 75)],
    },
    UpgradeSpec {
        name: "training",
        display_name: "Training Upgrade",
        description: "Improves unit production speed and experience gain",
        scaling: 1.1,
        effects: &[pct("training_speed", 1.25), pct("experience_gain", 1.2)],
        technology: Some("Military Tactics"),
        costs: &[("Gold", 150), ("Food", 100)],
    },
    UpgradeSpec {
        name: "resource",
        display_name: "Resource Upgrade",
        description: "Improves resource gathering and storage",
        scaling: 1.12,
        effects: &[pct("gathering_speed", 1.3), pct("storage_capacity", 1.2)],
        technology: Some("Economic Development"),
        costs: &[("Gold", 75), ("Wood", 75)],
    },
    UpgradeSpec {
        name: "defense",
        display_name: "Defense Upgrade",
        description: "Improves building health and repair speed",
        scaling: 1.18,
        effects: &[
            pct("building_health", 2.0),
            pct("repair_speed", 1.4),
            pct("building_armor", 1.3),
        ],
        technology: Some("Construction Mastery"),
        costs: &[("Gold", 125), ("Stone", 100)],
    },
];

/// Unlockable technologies in catalog order.
pub const TECHNOLOGIES: [&str; 5] = [
    "Basic Smithing",
    "Basic Armory",
    "Military Tactics",
    "Economic Development",
    "Construction Mastery",
];

impl UpgradeSpec {
    /// Applies this upgrade's effects on `attribute` at `level` to `total`.
    pub fn apply(&self, level: u8, attribute: &str, total: f32) -> f32 {
        if level == 0 {
            return total;
        }
        let multiplier = self.scaling.powi(i32::from(level) - 1);
        self.effects
            .iter()
            .filter(|effect| effect.attribute == attribute)
            .fold(total, |total, effect| {
                let value = effect.base * multiplier;
                if effect.percentage {
                    total * (1.0 + value)
                } else {
                    total + value
                }
            })
    }
}

#[derive(Debug, Default, Clone)]
struct PlayerUpgrades {
    levels: [u8; UpgradeKind::ALL.len()],
    technologies: BTreeSet<String>,
}

impl PlayerUpgrades {
    fn level(&self, kind: UpgradeKind) -> u8 {
        self.levels[kind as usize]
    }
}

#[derive(Debug)]
pub struct UpgradeManager {
    players: HashMap<PlayerId, PlayerUpgrades>,
    max_level: u8,
}

impl Default for UpgradeManager {
    fn default() -> Self {
        Self::new(3)
    }
}

impl UpgradeManager {
    pub fn new(max_level: u8) -> Self {
        Self {
            players: HashMap::new(),
            max_level,
        }
    }

    pub fn max_level(&self) -> u8 {
        self.max_level
    }

    /// Everything that would stop `player` from buying the next level of
    /// `name` with `ledger`, checked in order: name, level cap, technology,
    /// costs.
    pub fn check_purchase(
        &self,
        player: PlayerId,
        name: &str,
        ledger: &ResourceLedger,
    ) -> Result<UpgradeKind, GameLogicError> {
        let kind =
            UpgradeKind::from_name(name).ok_or_else(|| GameLogicError::UnknownUpgrade(name.to_string()))?;
        let level = self.get_upgrade_level(player, kind);
        if level >= self.max_level {
            return Err(GameLogicError::MaxLevel {
                name: name.to_string(),
                level,
            });
        }

        let spec = kind.spec();
        if let Some(technology) = spec.technology {
            if !self.has_technology(player, technology) {
                return Err(GameLogicError::MissingTechnology {
                    upgrade: name.to_string(),
                    technology: technology.to_string(),
                });
            }
        }
        ledger.check_costs(spec.costs)?;
        Ok(kind)
    }

    pub fn can_purchase_upgrade(&self, player: PlayerId, name: &str, ledger: &ResourceLedger) -> bool {
        self.check_purchase(player, name, ledger).is_ok()
    }

    /// Buys one level of `name`, charging `ledger`. Returns the new level.
    ///
    /// On any failure neither the ledger nor the level changes.
    pub fn purchase_upgrade(
        &mut self,
        player: PlayerId,
        name: &str,
        ledger: &mut ResourceLedger,
    ) -> Result<u8, GameLogicError> {
        let kind = self.check_purchase(player, name, ledger)?;
        ledger.spend_all(kind.spec().costs)?;

        let upgrades = self.players.entry(player).or_default();
        let level = &mut upgrades.levels[kind as usize];
        *level += 1;
        debug!("Player {} upgraded {} to level {}", player, name, level);
        Ok(*level)
    }

    pub fn get_upgrade_level(&self, player: PlayerId, kind: UpgradeKind) -> u8 {
        self.players.get(&player).map_or(0, |p| p.level(kind))
    }

    /// Level by wire name; 0 for unknown names.
    pub fn get_level_by_name(&self, player: PlayerId, name: &str) -> u8 {
        UpgradeKind::from_name(name).map_or(0, |kind| self.get_upgrade_level(player, kind))
    }

    /// Modifier on `attribute` from a single upgrade, starting at 1.0.
    pub fn get_modifier(&self, player: PlayerId, kind: UpgradeKind, attribute: &str) -> f32 {
        kind.spec()
            .apply(self.get_upgrade_level(player, kind), attribute, 1.0)
    }

    /// Modifier on `attribute` folded over every upgrade the player owns.
    pub fn get_total_modifier(&self, player: PlayerId, attribute: &str) -> f32 {
        UpgradeKind::ALL.into_iter().fold(1.0, |total, kind| {
            kind.spec()
                .apply(self.get_upgrade_level(player, kind), attribute, total)
        })
    }

    /// Returns false for unknown technologies and ones already unlocked.
    pub fn unlock_technology(&mut self, player: PlayerId, name: &str) -> bool {
        if !TECHNOLOGIES.contains(&name) {
            return false;
        }
        self.players
            .entry(player)
            .or_default()
            .technologies
            .insert(name.to_string())
    }

    pub fn has_technology(&self, player: PlayerId, name: &str) -> bool {
        self.players
            .get(&player)
            .is_some_and(|p| p.technologies.contains(name))
    }

    /// Technologies not yet unlocked, in catalog order.
    pub fn get_available_technologies(&self, player: PlayerId) -> Vec<String> {
        TECHNOLOGIES
            .iter()
            .filter(|tech| !self.has_technology(player, tech))
            .map(|tech| tech.to_string())
            .collect()
    }

    /// Upgrades that could be bought right now with `ledger`, sorted by name.
    pub fn get_available_upgrades(&self, player: PlayerId, ledger: &ResourceLedger) -> Vec<String> {
        let mut names: Vec<String> = UpgradeKind::ALL
            .into_iter()
            .filter(|kind| self.can_purchase_upgrade(player, kind.name(), ledger))
            .map(|kind| kind.name().to_string())
            .collect();
        names.sort();
        names
    }

    pub fn remove_player(&mut self, player: PlayerId) -> bool {
        self.players.remove(&player).is_some()
    }
}
