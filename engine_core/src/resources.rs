//! Turn-scoped resources shared across the phase systems.

use std::collections::BTreeSet;

use bevy_ecs::system::Resource;

use engine_contracts::{
    ActionOutcome, ActionRoll, ConflictRecord, DecayEvent, MonitoringReport, PhaseError,
    RumorDcUpdate, TurnTransition, WeeklyDcUpdate,
};

use crate::rng::{PhaseTag, TurnRng};
use crate::world::{DistrictId, FactionId, WorldState};

/// Freeze the stronghold flags for the turn (preparation phase).
pub fn snapshot_strongholds(world: &WorldState) -> BTreeSet<(DistrictId, FactionId)> {
    let mut snapshot = BTreeSet::new();
    for district in world.districts() {
        for faction in district.strongholds() {
            snapshot.insert((district.id, faction));
        }
    }
    snapshot
}

/// Per-turn context fixed during the preparation phase.
#[derive(Resource, Debug)]
pub struct TurnContext {
    pub turn: u64,
    pub rng: TurnRng,
    /// Stronghold flags frozen at the top of the turn; decay and DC math
    /// read these rather than live district state.
    strongholds: BTreeSet<(DistrictId, FactionId)>,
}

impl TurnContext {
    pub fn new(turn: u64, rng: TurnRng, strongholds: BTreeSet<(DistrictId, FactionId)>) -> Self {
        Self {
            turn,
            rng,
            strongholds,
        }
    }

    pub fn has_stronghold(&self, district: DistrictId, faction: FactionId) -> bool {
        self.strongholds.contains(&(district, faction))
    }
}

/// Accumulates transition artifacts as the phases run; frozen into a
/// [`TurnTransition`] at turn completion.
#[derive(Resource, Debug, Default)]
pub struct TransitionLog {
    pub decay: Vec<DecayEvent>,
    pub outcomes: Vec<ActionOutcome>,
    pub weekly_dc: Vec<WeeklyDcUpdate>,
    pub monitoring: Vec<MonitoringReport>,
    pub rumor_dc: Vec<RumorDcUpdate>,
    pub errors: Vec<PhaseError>,
}

impl TransitionLog {
    pub fn phase_error(&mut self, phase: PhaseTag, message: impl Into<String>) {
        let message = message.into();
        log::warn!("phase {} error: {}", phase.index(), message);
        self.errors.push(PhaseError {
            phase: phase.index(),
            message,
        });
    }

    pub fn freeze(
        self,
        rolls: Vec<ActionRoll>,
        conflicts: Vec<ConflictRecord>,
        new_turn_number: u64,
    ) -> TurnTransition {
        TurnTransition {
            decay: self.decay,
            rolls,
            conflicts,
            outcomes: self.outcomes,
            weekly_dc: self.weekly_dc,
            monitoring: self.monitoring,
            rumor_dc: self.rumor_dc,
            errors: self.errors,
            new_turn_number,
        }
    }
}
