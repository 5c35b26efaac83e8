//! Tuning knobs for the turn pipeline.
//!
//! Builtin defaults match the tabletop ruleset; hosts may override them
//! from JSON. Values the rules fix structurally (tier tables, outcome
//! bands, the slot budgets) live in code, not here.

use bevy_ecs::system::Resource;
use serde::Deserialize;

#[derive(Resource, Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    decay: DecayTuning,
    action: ActionTuning,
    conflict: ConflictTuning,
    monitoring: MonitoringTuning,
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn decay(&self) -> &DecayTuning {
        &self.decay
    }

    pub fn action(&self) -> &ActionTuning {
        &self.action
    }

    pub fn conflict(&self) -> &ConflictTuning {
        &self.conflict
    }

    pub fn monitoring(&self) -> &MonitoringTuning {
        &self.monitoring
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DecayTuning {
    /// Chance per excess influence point of losing one point.
    pub base_chance: f64,
    /// Decay only bites above this influence for stronghold holders.
    pub stronghold_threshold: u8,
    /// Decay threshold for everyone else.
    pub open_threshold: u8,
    /// Saturation-decay chance at district total 9.
    pub saturation_at_nine: f64,
    /// Saturation-decay chance at district total 10.
    pub saturation_at_ten: f64,
}

impl Default for DecayTuning {
    fn default() -> Self {
        Self {
            base_chance: 0.05,
            stronghold_threshold: 5,
            open_threshold: 2,
            saturation_at_nine: 0.10,
            saturation_at_ten: 0.35,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ActionTuning {
    /// Critical gain: chance the attempt reaches for two points.
    pub gain_critical_double: f64,
    /// Critical gain failure: chance of losing one point.
    pub gain_critical_fail_loss: f64,
    /// Plain take success: chance the transfer actually lands.
    pub take_success_chance: f64,
    /// Critical take failure: chance of the self-loss firing.
    pub take_backfire: f64,
    /// Critical take failure: chance the lost point hands to the target.
    pub take_backfire_transfer: f64,
    /// Roll reduction applied to adjudicated draws.
    pub draw_roll_penalty: i8,
}

impl Default for ActionTuning {
    fn default() -> Self {
        Self {
            gain_critical_double: 0.80,
            gain_critical_fail_loss: 0.50,
            take_success_chance: 0.80,
            take_backfire: 0.40,
            take_backfire_transfer: 0.50,
            draw_roll_penalty: 2,
        }
    }
}

/// Resolution of the source ambiguity around `InitiateConflict`: whether
/// the 0.70 / 0.95 probabilities gate adjudication or nothing at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitiateGate {
    /// A manual conflict always stands and is always adjudicated.
    #[default]
    Always,
    /// After action rolls, a failed gate draw retracts the conflict and
    /// frees every piece it enrolled.
    GatedByRoll,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConflictTuning {
    pub initiate_gate: InitiateGate,
    /// Gate chance for a successful initiate roll.
    pub gate_on_success: f64,
    /// Gate chance for a critical initiate roll.
    pub gate_on_critical: f64,
    /// Spontaneous conflict chance for a -1 relationship pair.
    pub cold_war_chance: f64,
    /// Spontaneous conflict chance for a -2 relationship pair.
    pub hot_war_chance: f64,
    /// Join chance per point of mobility for adjacent squadrons.
    pub adjacent_join_per_mobility: f64,
}

impl Default for ConflictTuning {
    fn default() -> Self {
        Self {
            initiate_gate: InitiateGate::Always,
            gate_on_success: 0.70,
            gate_on_critical: 0.95,
            cold_war_chance: 0.10,
            hot_war_chance: 0.40,
            adjacent_join_per_mobility: 0.10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitoringTuning {
    /// Detection probability gained per roll point above the tier floor.
    pub detection_per_point: f64,
    /// Exact-accuracy probability gained per roll point above the floor.
    pub accuracy_per_point: f64,
    /// Phantom base-rate reduction per roll point above the floor.
    pub phantom_per_point: f64,
    /// Influence at which a faction monitors a district passively.
    pub passive_threshold: u8,
}

impl Default for MonitoringTuning {
    fn default() -> Self {
        Self {
            detection_per_point: 0.02,
            accuracy_per_point: 0.01,
            phantom_per_point: 0.01,
            passive_threshold: 4,
        }
    }
}
