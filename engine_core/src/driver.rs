//! The turn driver: a pausable state machine over the twelve-phase
//! pipeline.
//!
//! `begin` runs phases 1-5 and either completes the turn outright (no
//! conflicts) or suspends with a [`PauseBundle`]. `resume` applies the
//! adjudications and runs phases 6-12. Invariant violations in phases
//! 1-4 abort the turn and rewind the world; anything later is recorded
//! as a [`engine_contracts::PhaseError`] without rolling back.

use bevy_ecs::system::{Res, ResMut, RunSystemOnce};
use bevy_ecs::world::World;
use log::info;
use thiserror::Error;

use engine_contracts::{Adjudication, PauseBundle, RumorDcUpdate, TurnTransition, WeeklyDcUpdate};

use crate::action::{self, RollLedger};
use crate::assignment::{Assignment, AssignmentError, AssignmentLedger};
use crate::conflict::{self, AdjudicationError, ConflictLedger};
use crate::decay;
use crate::engine_config::EngineConfig;
use crate::monitoring;
use crate::penalty::{self, PenaltyLedger};
use crate::resources::{snapshot_strongholds, TransitionLog, TurnContext};
use crate::rng::{PhaseTag, StreamKey, TurnRng};
use crate::world::{InvariantViolation, RumorId, WorldState};

#[derive(Debug, Error)]
pub enum TurnError {
    #[error("a turn is already in progress")]
    NotIdle,
    #[error("no suspended turn to resume")]
    NotSuspended,
    #[error(transparent)]
    Invariant(#[from] InvariantViolation),
    #[error(transparent)]
    Assignment(#[from] AssignmentError),
    #[error(transparent)]
    Adjudication(#[from] AdjudicationError),
}

/// What `begin` hands back: either the turn ran clean, or it suspended
/// for out-of-band conflict adjudication.
#[derive(Debug)]
pub enum BeginOutcome {
    Paused(PauseBundle),
    Complete(TurnTransition),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DriverState {
    Idle,
    Suspended,
}

/// Owns the world between `begin` and turn completion. Single-threaded;
/// a host embedding it in a threaded application must serialize calls.
pub struct TurnDriver {
    ecs: World,
    state: DriverState,
}

impl TurnDriver {
    pub fn new(config: EngineConfig) -> Self {
        let mut ecs = World::new();
        ecs.insert_resource(config);
        Self {
            ecs,
            state: DriverState::Idle,
        }
    }

    pub fn is_suspended(&self) -> bool {
        self.state == DriverState::Suspended
    }

    /// The world currently held by the driver (rewound baseline plus any
    /// applied phases). `None` before the first `begin`.
    pub fn world(&self) -> Option<&WorldState> {
        self.ecs.get_resource::<WorldState>()
    }

    /// Hand the world back after completion. Refused mid-turn: during the
    /// pause the driver still owns it.
    pub fn take_world(&mut self) -> Option<WorldState> {
        if self.state == DriverState::Suspended {
            return None;
        }
        self.ecs.remove_resource::<WorldState>()
    }

    /// Run phases 1-5.
    pub fn begin(
        &mut self,
        mut world: WorldState,
        assignments: Vec<Assignment>,
        seed: u64,
    ) -> Result<BeginOutcome, TurnError> {
        if self.state != DriverState::Idle {
            return Err(TurnError::NotIdle);
        }

        // Phase 1: preparation. Validate, snapshot, derive the seed.
        world.validate()?;
        world.begin_turn();
        let turn = world.turn();
        info!("turn {turn} begins");
        let context = TurnContext::new(turn, TurnRng::new(seed, turn), snapshot_strongholds(&world));
        self.ecs.insert_resource(world);
        self.ecs.insert_resource(context);
        self.ecs.insert_resource(TransitionLog::default());
        self.ecs.insert_resource(RollLedger::default());
        self.ecs.insert_resource(ConflictLedger::default());

        // Phase 2: influence decay.
        let decayed: Result<(), InvariantViolation> =
            self.ecs.run_system_once(decay::run_decay_phase);
        if let Err(violation) = decayed {
            return Err(self.abort(violation.into()));
        }

        // Phase 3: assignment intake, then the penalty ledger.
        let intake = {
            let world = self
                .ecs
                .resource::<WorldState>();
            AssignmentLedger::from_assignments(world, &assignments)
        };
        let ledger = match intake {
            Ok(ledger) => ledger,
            Err(error) => return Err(self.abort(error.into())),
        };
        self.ecs.insert_resource(ledger);
        let penalties = {
            let world = self.ecs.resource::<WorldState>();
            let context = self.ecs.resource::<TurnContext>();
            penalty::compute_penalties(world, context)
        };
        self.ecs.insert_resource(penalties);

        // Phase 4: conflict detection.
        self.ecs.run_system_once(conflict::run_conflict_detection);

        // Phase 5: action rolls, ally voids, and the initiate gate.
        self.ecs.run_system_once(action::run_action_roll_phase);
        self.ecs.run_system_once(conflict::mark_voided_rolls);
        self.ecs.run_system_once(conflict::apply_initiate_gate);

        if self.ecs.resource::<ConflictLedger>().is_empty() {
            info!("turn {turn}: no conflicts, resolving straight through");
            return Ok(BeginOutcome::Complete(self.run_back_half()));
        }
        self.state = DriverState::Suspended;
        let bundle = {
            let conflicts = self.ecs.resource::<ConflictLedger>();
            let rolls = self.ecs.resource::<RollLedger>();
            conflicts.pause_bundle(rolls, turn)
        };
        info!(
            "turn {turn} suspended with {} conflict(s)",
            bundle.conflicts.len()
        );
        Ok(BeginOutcome::Paused(bundle))
    }

    /// Apply adjudications (phase 6) and run phases 7-12. An invalid
    /// adjudication set leaves the driver suspended so the orchestrator
    /// can correct and retry.
    pub fn resume(&mut self, adjudications: &[Adjudication]) -> Result<TurnTransition, TurnError> {
        if self.state != DriverState::Suspended {
            return Err(TurnError::NotSuspended);
        }
        let applied = self
            .ecs
            .resource_scope(|ecs, mut conflicts: bevy_ecs::world::Mut<ConflictLedger>| {
                let draw_penalty = ecs.resource::<EngineConfig>().action().draw_roll_penalty;
                let mut rolls = ecs.resource_mut::<RollLedger>();
                conflict::apply_adjudications(
                    &mut conflicts,
                    &mut rolls,
                    adjudications,
                    draw_penalty,
                )
            });
        if let Err(error) = applied {
            return Err(error.into());
        }
        self.state = DriverState::Idle;
        Ok(self.run_back_half())
    }

    /// Abandon the in-progress turn and hand back the pre-phase-2 world.
    pub fn reset(&mut self) -> Option<WorldState> {
        let suspended = self.state == DriverState::Suspended;
        self.state = DriverState::Idle;
        self.clear_turn_resources();
        let mut world = self.ecs.remove_resource::<WorldState>()?;
        if suspended {
            world.discard();
        }
        Some(world)
    }

    /// Phases 7-12.
    fn run_back_half(&mut self) -> TurnTransition {
        self.ecs
            .run_system_once(action::run_action_resolution_phase);
        self.ecs.run_system_once(run_dc_walk_phase);
        self.ecs.run_system_once(monitoring::run_monitoring_phase);
        self.ecs
            .run_system_once(monitoring::run_passive_monitoring_phase);
        self.ecs.run_system_once(run_rumor_decay_phase);

        // Phase 12: advance the counter and freeze the transition.
        {
            let mut world = self.ecs.resource_mut::<WorldState>();
            world.advance_turn();
        }
        let new_turn = self.ecs.resource::<WorldState>().turn();
        let rolls = self
            .ecs
            .remove_resource::<RollLedger>()
            .unwrap_or_default();
        let conflicts = self
            .ecs
            .remove_resource::<ConflictLedger>()
            .unwrap_or_default();
        let log = self
            .ecs
            .remove_resource::<TransitionLog>()
            .unwrap_or_default();
        self.clear_turn_resources();
        info!("turn complete; next turn is {new_turn}");
        log.freeze(rolls.records(), conflicts.records(&rolls), new_turn)
    }

    fn clear_turn_resources(&mut self) {
        self.ecs.remove_resource::<TurnContext>();
        self.ecs.remove_resource::<AssignmentLedger>();
        self.ecs.remove_resource::<PenaltyLedger>();
        self.ecs.remove_resource::<RollLedger>();
        self.ecs.remove_resource::<ConflictLedger>();
        self.ecs.remove_resource::<TransitionLog>();
    }

    fn abort(&mut self, error: TurnError) -> TurnError {
        if let Some(mut world) = self.ecs.get_resource_mut::<WorldState>() {
            world.discard();
        }
        self.clear_turn_resources();
        self.state = DriverState::Idle;
        error
    }
}

/// Phase 8: uniform random walk on each district's weekly DC modifier.
pub fn run_dc_walk_phase(
    mut world: ResMut<WorldState>,
    ctx: Res<TurnContext>,
    mut log: ResMut<TransitionLog>,
) {
    for district_id in world.district_ids() {
        let previous = world
            .district(district_id)
            .map(|d| d.weekly_dc_modifier())
            .unwrap_or(0);
        let mut stream = ctx
            .rng
            .stream(StreamKey::new(PhaseTag::DcWalk).district(district_id.0));
        let delta = stream.range(-1, 1);
        let current = (i32::from(previous) + delta).clamp(-2, 2) as i8;
        if let Err(violation) = world.set_weekly_dc(district_id, current) {
            log.phase_error(PhaseTag::DcWalk, violation.to_string());
            continue;
        }
        log.weekly_dc.push(WeeklyDcUpdate {
            district: district_id.0,
            previous,
            current,
        });
    }
}

/// Phase 11: undiscovered rumors get one point easier to find.
pub fn run_rumor_decay_phase(mut world: ResMut<WorldState>, mut log: ResMut<TransitionLog>) {
    for district_id in world.district_ids() {
        let rumors: Vec<(RumorId, u8)> = world
            .district(district_id)
            .map(|d| d.rumors().map(|r| (r.id, r.dc)).collect())
            .unwrap_or_default();
        for (rumor, dc) in rumors {
            if dc == 0 || world.rumor_discovered(rumor) {
                continue;
            }
            let current = dc - 1;
            match world.set_rumor_dc(district_id, rumor, current) {
                Ok(()) => log.rumor_dc.push(RumorDcUpdate {
                    district: district_id.0,
                    rumor: rumor.0,
                    previous: dc,
                    current,
                }),
                Err(violation) => log.phase_error(PhaseTag::RumorDecay, violation.to_string()),
            }
        }
    }
}
