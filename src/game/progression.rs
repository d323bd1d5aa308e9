//! Player Progression Ledger
//!
//! XP, level, rank, mana, plus the completed-mission and fragment sets.
//!
//! All mutation goes through two guarded entry points:
//! [`Progression::award_field_bonus`] and [`Progression::finalize`].
//! Level and rank are always recomputed from XP, never stepped on their own.

use std::collections::BTreeSet;
use serde::{Serialize, Deserialize};
use tracing::info;

use crate::core::config::GameConfig;
use crate::game::mission::{Mission, MissionId, MissionKind};

/// Rank titles by tier (level 1, 2, 3, 4+).
pub const RANK_TITLES: [&str; 4] = [
    "小小地質學家",
    "地形線索搜查員",
    "地質現象調查員",
    "永春大地守護者",
];

/// Rank title for a level.
pub fn rank_for_level(level: u32) -> &'static str {
    match level {
        0 | 1 => RANK_TITLES[0],
        2 => RANK_TITLES[1],
        3 => RANK_TITLES[2],
        _ => RANK_TITLES[3],
    }
}

/// Level for an XP total: floor(xp / per_level) + 1.
pub fn level_for_xp(xp: u32, per_level: u32) -> u32 {
    xp / per_level.max(1) + 1
}

// =============================================================================
// PLAYER STATS
// =============================================================================

/// Process-wide player stats.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerStats {
    /// Level (>= 1), derived from XP
    pub level: u32,
    /// Total XP, never decreases
    pub current_xp: u32,
    /// level * xp_per_level
    pub next_level_xp: u32,
    /// Rank title, derived from level
    pub rank: String,
    /// Mana (0..=max_mana)
    pub mana: u32,
    /// Mana ceiling
    pub max_mana: u32,
    /// SOS charges
    pub sos_count: u32,
}

impl PlayerStats {
    fn new(config: &GameConfig) -> Self {
        let level = 1;
        Self {
            level,
            current_xp: 0,
            next_level_xp: level * config.xp_per_level,
            rank: rank_for_level(level).to_string(),
            mana: config.initial_mana.min(config.max_mana),
            max_mana: config.max_mana,
            sos_count: config.initial_sos,
        }
    }
}

/// Result of an XP award.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct XpAward {
    /// XP granted
    pub amount: u32,
    /// Level before
    pub old_level: u32,
    /// Level after
    pub new_level: u32,
}

impl XpAward {
    /// Did the award cross a level boundary?
    pub fn leveled_up(&self) -> bool {
        self.new_level > self.old_level
    }
}

/// Outcome of a mission finalization.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Finalization {
    /// First completion of a main mission.
    MainCompleted {
        /// XP granted
        xp: XpAward,
        /// Mana actually deducted
        mana_spent: u32,
        /// Newly collected fragment
        fragment: Option<u32>,
    },
    /// Main mission was already completed; nothing changed.
    AlreadyCompleted,
    /// A side mission completion (repeatable).
    SideCompleted {
        /// XP granted
        xp: XpAward,
        /// Mana actually deducted
        mana_spent: u32,
    },
}

impl Finalization {
    /// XP granted by this finalization, if any.
    pub fn xp(&self) -> Option<XpAward> {
        match self {
            Finalization::MainCompleted { xp, .. } | Finalization::SideCompleted { xp, .. } => Some(*xp),
            Finalization::AlreadyCompleted => None,
        }
    }
}

// =============================================================================
// PROGRESSION CONTEXT
// =============================================================================

/// The progression context owned by the mission state machine.
#[derive(Clone, Debug)]
pub struct Progression {
    stats: PlayerStats,
    completed: BTreeSet<MissionId>,
    fragments: BTreeSet<u32>,
    xp_per_level: u32,
    field_xp_bonus: u32,
    mana_cost: u32,
}

impl Progression {
    /// Fresh session progression.
    pub fn new(config: &GameConfig) -> Self {
        Self {
            stats: PlayerStats::new(config),
            completed: BTreeSet::new(),
            fragments: BTreeSet::new(),
            xp_per_level: config.xp_per_level.max(1),
            field_xp_bonus: config.field_xp_bonus,
            mana_cost: config.mana_cost,
        }
    }

    /// Current stats.
    pub fn stats(&self) -> &PlayerStats {
        &self.stats
    }

    /// Completed main missions.
    pub fn completed(&self) -> &BTreeSet<MissionId> {
        &self.completed
    }

    /// Collected fragments.
    pub fn fragments(&self) -> &BTreeSet<u32> {
        &self.fragments
    }

    /// Is this main mission locked in as completed?
    pub fn is_completed(&self, id: &MissionId) -> bool {
        self.completed.contains(id)
    }

    /// XP earned inside the current level.
    pub fn xp_into_level(&self) -> u32 {
        self.stats.current_xp % self.xp_per_level
    }

    /// XP still needed to reach the next level.
    pub fn xp_to_next_level(&self) -> u32 {
        self.stats.next_level_xp.saturating_sub(self.stats.current_xp)
    }

    fn award_xp(&mut self, amount: u32) -> XpAward {
        let old_level = self.stats.level;
        self.stats.current_xp = self.stats.current_xp.saturating_add(amount);
        self.stats.level = level_for_xp(self.stats.current_xp, self.xp_per_level);
        self.stats.next_level_xp = self.stats.level.saturating_mul(self.xp_per_level);
        self.stats.rank = rank_for_level(self.stats.level).to_string();

        let award = XpAward { amount, old_level, new_level: self.stats.level };
        if award.leveled_up() {
            info!(level = award.new_level, rank = %self.stats.rank, "level up");
        }
        award
    }

    fn spend_mana(&mut self, amount: u32) -> u32 {
        let spent = amount.min(self.stats.mana);
        self.stats.mana -= spent;
        spent
    }

    /// Per-field bonus for a newly solved quiz field.
    ///
    /// Main missions only, and only while the mission is not completed.
    pub fn award_field_bonus(&mut self, mission: &Mission) -> Option<XpAward> {
        if mission.kind != MissionKind::Main || self.is_completed(&mission.id) {
            return None;
        }
        let award = self.award_xp(self.field_xp_bonus);
        info!(mission_id = %mission.id, xp = award.amount, total = self.stats.current_xp, "field bonus awarded");
        Some(award)
    }

    /// Apply the completion effects of a mission exactly once per finalization.
    pub fn finalize(&mut self, mission: &Mission) -> Finalization {
        match mission.kind {
            MissionKind::Main => {
                if !self.completed.insert(mission.id.clone()) {
                    return Finalization::AlreadyCompleted;
                }
                let xp = self.award_xp(mission.xp_reward);
                let mana_spent = self.spend_mana(self.mana_cost);
                let fragment = mission.fragment_id.filter(|f| self.fragments.insert(*f));
                info!(
                    mission_id = %mission.id,
                    xp = xp.amount,
                    fragment = ?fragment,
                    mana = self.stats.mana,
                    "main mission completed"
                );
                Finalization::MainCompleted { xp, mana_spent, fragment }
            }
            MissionKind::Side => {
                let xp = self.award_xp(mission.xp_reward);
                let mana_spent = self.spend_mana(self.mana_cost);
                info!(mission_id = %mission.id, xp = xp.amount, mana = self.stats.mana, "side mission completed");
                Finalization::SideCompleted { xp, mana_spent }
            }
        }
    }
}
