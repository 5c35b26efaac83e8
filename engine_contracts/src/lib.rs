//! Wire-shaped state types crossing the turn-engine boundary.
//!
//! The engine keeps richer internal entries and converts to these records
//! when a [`PauseBundle`] or [`TurnTransition`] is handed to the caller.
//! Ids are raw `u32` values here; the engine wraps them in newtypes.
//! Field naming is conventional, byte-exactness is not part of the
//! contract.

use serde::{Deserialize, Serialize};

/// Total influence capacity of a district. The pool is this value minus
/// the sum of all faction influence.
pub const INFLUENCE_CAP: u8 = 10;

/// Quality band of a monitoring roll.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum QualityTier {
    Abysmal,
    VeryPoor,
    Poor,
    Average,
    Good,
    VeryGood,
    Exceptional,
    Legendary,
}

impl QualityTier {
    pub fn from_roll(roll: i32) -> Self {
        if roll >= 30 {
            Self::Legendary
        } else if roll >= 25 {
            Self::Exceptional
        } else if roll >= 20 {
            Self::VeryGood
        } else if roll >= 15 {
            Self::Good
        } else if roll >= 10 {
            Self::Average
        } else if roll >= 5 {
            Self::Poor
        } else if roll >= 1 {
            Self::VeryPoor
        } else {
            Self::Abysmal
        }
    }

    /// Lowest roll mapping to this tier. Abysmal is unbounded below and
    /// reports 0 so offset math never goes negative.
    pub fn floor(self) -> i32 {
        match self {
            Self::Legendary => 30,
            Self::Exceptional => 25,
            Self::VeryGood => 20,
            Self::Good => 15,
            Self::Average => 10,
            Self::Poor => 5,
            Self::VeryPoor => 1,
            Self::Abysmal => 0,
        }
    }

    /// Points of roll above the tier floor, used for within-tier linear
    /// scaling of the probability tables.
    pub fn band_offset(self, roll: i32) -> i32 {
        if self == Self::Abysmal {
            0
        } else {
            (roll - self.floor()).max(0)
        }
    }
}

/// Outcome band of a DC-checked action roll.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeTier {
    CriticalFailure,
    Failure,
    Success,
    CriticalSuccess,
}

impl OutcomeTier {
    pub fn from_roll(roll: i32, dc: i32) -> Self {
        if roll >= dc + 10 {
            Self::CriticalSuccess
        } else if roll >= dc {
            Self::Success
        } else if roll <= dc - 10 {
            Self::CriticalFailure
        } else {
            Self::Failure
        }
    }

    pub fn is_success(self) -> bool {
        matches!(self, Self::Success | Self::CriticalSuccess)
    }
}

/// How a conflict came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    Manual,
    Relationship,
    Target,
    Adjacent,
}

/// Faction-level role within a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactionRole {
    Initiator,
    Target,
    Ally,
    Adjacent,
}

/// Piece-level participation within a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Participation {
    Direct,
    Adjacent,
    AllySupport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStatus {
    Pending,
    Resolved,
}

/// Adjudicated outcome for one enrolled faction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictOutcome {
    Win,
    Loss,
    Draw,
}

/// Primary task bound to a piece for the turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Monitor,
    InfluenceGain,
    InfluenceTake,
    InitiateConflict,
    Freeform,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecayCause {
    Base,
    Saturation,
}

/// One unit of influence lost during the decay phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecayEvent {
    pub district: u32,
    pub faction: u32,
    pub delta: i8,
    pub cause: DecayCause,
}

/// Roll record for a single assigned task.
///
/// `total` is the post-penalty phase-5 value; `draw_adjustment` (0 or -2)
/// is filled in when an adjudication marks the faction as drawing, and the
/// resolution phase re-derives the outcome from `total + draw_adjustment`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRoll {
    pub piece: u32,
    pub faction: u32,
    pub district: u32,
    pub task: TaskKind,
    pub target: Option<u32>,
    pub die: u8,
    pub check_bonus: i32,
    pub manual: i8,
    pub enemy_penalty: i32,
    pub draw_adjustment: i8,
    pub total: i32,
    pub dc: Option<i32>,
    pub outcome: Option<OutcomeTier>,
    pub quality: Option<QualityTier>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictFactionEntry {
    pub faction: u32,
    pub role: FactionRole,
    pub outcome: Option<ConflictOutcome>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictPieceEntry {
    pub piece: u32,
    pub faction: u32,
    pub participation: Participation,
    pub roll: Option<i32>,
    pub outcome: Option<OutcomeTier>,
    pub intended: Option<TaskKind>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub id: u64,
    pub district: u32,
    pub kind: ConflictKind,
    pub factions: Vec<ConflictFactionEntry>,
    pub pieces: Vec<ConflictPieceEntry>,
    pub status: ResolutionStatus,
    pub notes: Option<String>,
}

impl ConflictRecord {
    pub fn enrolled_factions(&self) -> Vec<u32> {
        self.factions.iter().map(|entry| entry.faction).collect()
    }
}

/// Everything the orchestrator needs to adjudicate the suspended turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PauseBundle {
    pub turn: u64,
    pub conflicts: Vec<ConflictRecord>,
}

/// The orchestrator's verdict for one conflict. The three sets must
/// partition the conflict's enrolled factions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Adjudication {
    pub conflict: u64,
    pub winners: Vec<u32>,
    pub losers: Vec<u32>,
    pub drawers: Vec<u32>,
    pub notes: String,
}

impl Adjudication {
    /// True when winners/losers/drawers are pairwise disjoint and cover
    /// exactly the given faction set.
    pub fn partitions(&self, enrolled: &[u32]) -> bool {
        let mut seen: Vec<u32> = Vec::with_capacity(enrolled.len());
        for faction in self
            .winners
            .iter()
            .chain(self.losers.iter())
            .chain(self.drawers.iter())
        {
            if seen.contains(faction) {
                return false;
            }
            seen.push(*faction);
        }
        if seen.len() != enrolled.len() {
            return false;
        }
        enrolled.iter().all(|faction| seen.contains(faction))
    }

    pub fn outcome_for(&self, faction: u32) -> Option<ConflictOutcome> {
        if self.winners.contains(&faction) {
            Some(ConflictOutcome::Win)
        } else if self.losers.contains(&faction) {
            Some(ConflictOutcome::Loss)
        } else if self.drawers.contains(&faction) {
            Some(ConflictOutcome::Draw)
        } else {
            None
        }
    }
}

/// World effect of one resolved action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionEffect {
    /// Influence deltas actually applied (target delta is 0 for gains).
    Influence { faction_delta: i8, target_delta: i8 },
    /// A successful gain found the district pool empty.
    PoolExhausted,
    /// A successful take found the target already stripped to 0.
    TargetExhausted,
    /// The piece's faction lost its conflict; the action was forced to fail.
    ForcedFailure,
    /// The piece was pulled into a conflict as ally support; its own task
    /// was never resolved.
    Voided,
    /// The tier carried no world effect (plain failures, freeform tasks,
    /// initiate-conflict rolls).
    NoEffect,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub piece: u32,
    pub faction: u32,
    pub district: u32,
    pub task: TaskKind,
    pub target: Option<u32>,
    pub tier: Option<OutcomeTier>,
    pub effect: ActionEffect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklyDcUpdate {
    pub district: u32,
    pub previous: i8,
    pub current: i8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitoringSourceKind {
    AgentMonitor,
    SquadronPrimary,
    SquadronSecondary,
    FactionPassive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringSource {
    pub piece: Option<u32>,
    pub kind: MonitoringSourceKind,
    pub roll: i32,
    pub quality: QualityTier,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerceivedFaction {
    pub faction: u32,
    pub influence: u8,
    pub stronghold: Option<bool>,
    pub phantom: bool,
}

/// What a report learned about the district's weekly DC modifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DcModifierReading {
    Exact(i8),
    DirectionOnly { positive: bool },
}

/// Combined intelligence report for one (faction, district) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringReport {
    pub faction: u32,
    pub district: u32,
    pub sources: Vec<MonitoringSource>,
    pub best_roll: i32,
    pub quality: QualityTier,
    pub perceived: Vec<PerceivedFaction>,
    pub dc_modifier: Option<DcModifierReading>,
    pub discovered_rumors: Vec<u32>,
    pub confidence: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RumorDcUpdate {
    pub district: u32,
    pub rumor: u32,
    pub previous: u8,
    pub current: u8,
}

/// Non-fatal inconsistency recorded mid-phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseError {
    pub phase: u8,
    pub message: String,
}

/// Every artifact produced by one complete begin/resume cycle, in
/// document order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TurnTransition {
    pub decay: Vec<DecayEvent>,
    pub rolls: Vec<ActionRoll>,
    pub conflicts: Vec<ConflictRecord>,
    pub outcomes: Vec<ActionOutcome>,
    pub weekly_dc: Vec<WeeklyDcUpdate>,
    pub monitoring: Vec<MonitoringReport>,
    pub rumor_dc: Vec<RumorDcUpdate>,
    pub errors: Vec<PhaseError>,
    pub new_turn_number: u64,
}
