//! Action rolls and influence resolution (phases 5 and 7).
//!
//! Phase 5 rolls every assigned task and records tentative outcome tiers
//! without touching influence. Phase 7 applies the outcome tables,
//! honoring gain/take contention inside each district and the win/loss/
//! draw dispositions left behind by adjudication.

use std::collections::{BTreeMap, BTreeSet};

use bevy_ecs::system::{Res, ResMut, Resource};
use log::debug;

use engine_contracts::{
    ActionEffect, ActionOutcome, ActionRoll, OutcomeTier, QualityTier, TaskKind,
};

use crate::assignment::{Assignment, AssignmentLedger, CheckSpec, Task};
use crate::engine_config::EngineConfig;
use crate::penalty::PenaltyLedger;
use crate::resources::{TransitionLog, TurnContext};
use crate::rng::{PhaseTag, StreamKey};
use crate::world::{District, DistrictId, FactionId, Piece, PieceId, WorldState};

const SALT_TIEBREAK: u32 = 0;
const SALT_BRANCH: u32 = 1;

/// DC adjustment from the acting faction's current influence.
pub fn influence_band_modifier(influence: u8) -> i32 {
    match influence {
        0 => 3,
        1 => 1,
        2 | 3 => -1,
        4 | 5 => 0,
        6 => 1,
        7 => 2,
        8 => 3,
        _ => 4,
    }
}

fn base_dc(district: &District, ctx: &TurnContext, faction: FactionId) -> i32 {
    let mut dc = 11;
    dc -= i32::from(district.likeability(faction));
    dc += influence_band_modifier(district.influence(faction));
    if ctx.has_stronghold(district.id, faction) {
        dc -= 2;
    }
    dc += i32::from(district.weekly_dc_modifier());
    dc
}

/// DC for gaining influence from the district pool.
pub fn gain_dc(district: &District, ctx: &TurnContext, faction: FactionId) -> i32 {
    base_dc(district, ctx, faction).max(5)
}

/// DC for taking influence from `target`: the gain DC plus the targeting
/// surcharge and the relationship modifier.
pub fn take_dc(
    district: &District,
    ctx: &TurnContext,
    world: &WorldState,
    faction: FactionId,
    target: FactionId,
) -> i32 {
    let mut dc = base_dc(district, ctx, faction) + 3;
    if let Some(entry) = world.faction(faction) {
        dc += i32::from(entry.relationship(target));
    }
    dc.max(5)
}

/// Disposition stamped onto a roll before resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Forced {
    /// The faction lost its conflict: the action fails outright.
    Fail,
    /// The piece fought as ally support: the action is never resolved.
    Voided,
}

#[derive(Debug, Clone)]
pub struct RollEntry {
    pub piece: PieceId,
    pub faction: FactionId,
    pub district: DistrictId,
    pub kind: TaskKind,
    pub target: Option<FactionId>,
    pub die: u8,
    pub check_bonus: i32,
    pub manual: i8,
    pub enemy_penalty: i32,
    pub total: i32,
    pub dc: Option<i32>,
    pub quality: Option<QualityTier>,
    pub draw_adjustment: i8,
    pub forced: Option<Forced>,
}

impl RollEntry {
    pub fn effective_total(&self) -> i32 {
        self.total + i32::from(self.draw_adjustment)
    }

    /// Outcome tier against the stored DC, draw adjustment included.
    pub fn outcome(&self) -> Option<OutcomeTier> {
        self.dc
            .map(|dc| OutcomeTier::from_roll(self.effective_total(), dc))
    }

    pub fn effective_quality(&self) -> Option<QualityTier> {
        self.quality
            .map(|_| QualityTier::from_roll(self.effective_total()))
    }

    fn to_record(&self) -> ActionRoll {
        ActionRoll {
            piece: self.piece.0,
            faction: self.faction.0,
            district: self.district.0,
            task: self.kind,
            target: self.target.map(|f| f.0),
            die: self.die,
            check_bonus: self.check_bonus,
            manual: self.manual,
            enemy_penalty: self.enemy_penalty,
            draw_adjustment: self.draw_adjustment,
            total: self.total,
            dc: self.dc,
            outcome: self.outcome(),
            quality: self.effective_quality(),
        }
    }
}

/// Every roll of the turn, keyed by piece ascending.
#[derive(Resource, Debug, Default)]
pub struct RollLedger {
    entries: BTreeMap<PieceId, RollEntry>,
}

impl RollLedger {
    pub fn insert(&mut self, entry: RollEntry) {
        self.entries.insert(entry.piece, entry);
    }

    pub fn get(&self, piece: PieceId) -> Option<&RollEntry> {
        self.entries.get(&piece)
    }

    pub fn get_mut(&mut self, piece: PieceId) -> Option<&mut RollEntry> {
        self.entries.get_mut(&piece)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RollEntry> {
        self.entries.values()
    }

    pub fn records(&self) -> Vec<ActionRoll> {
        self.entries.values().map(RollEntry::to_record).collect()
    }
}

fn check_bonus_for(piece: &Piece, district: &District, task: &Task) -> i32 {
    let profile = match task {
        Task::Monitor => district.monitor_profile,
        Task::InfluenceGain | Task::InfluenceTake { .. } => district.influence_profile,
        Task::InitiateConflict { check, .. } | Task::Freeform { check, .. } => {
            return manual_check_bonus(piece, check);
        }
    };
    match (&piece.body, profile) {
        (crate::world::PieceBody::Agent(sheet), profile) => {
            i32::from(sheet.attributes.get(profile.attribute))
                + i32::from(sheet.skills.get(profile.skill))
        }
        (crate::world::PieceBody::Squadron(sheet), profile) => {
            i32::from(sheet.aptitudes.get(profile.aptitude))
        }
    }
}

fn manual_check_bonus(piece: &Piece, check: &CheckSpec) -> i32 {
    match &piece.body {
        crate::world::PieceBody::Agent(sheet) => {
            let attribute = check
                .attribute
                .map(|a| i32::from(sheet.attributes.get(a)))
                .unwrap_or(0);
            let skill = check
                .skill
                .map(|s| i32::from(sheet.skills.get(s)))
                .unwrap_or(0);
            attribute + skill
        }
        crate::world::PieceBody::Squadron(sheet) => check
            .aptitude
            .map(|a| i32::from(sheet.aptitudes.get(a)))
            .unwrap_or(0),
    }
}

fn dc_for(
    world: &WorldState,
    ctx: &TurnContext,
    district: &District,
    assignment: &Assignment,
    faction: FactionId,
) -> Option<i32> {
    match &assignment.task {
        Task::Monitor => None,
        Task::InfluenceGain => Some(gain_dc(district, ctx, faction)),
        Task::InfluenceTake { target } => Some(take_dc(district, ctx, world, faction, *target)),
        Task::InitiateConflict { dc, .. } | Task::Freeform { dc, .. } => Some(*dc),
    }
}

/// Phase 5: roll every assignment. Influence is not touched here.
pub fn run_action_roll_phase(
    world: Res<WorldState>,
    ctx: Res<TurnContext>,
    assignments: Res<AssignmentLedger>,
    penalties: Res<PenaltyLedger>,
    mut rolls: ResMut<RollLedger>,
    mut log: ResMut<TransitionLog>,
) {
    for assignment in assignments.iter() {
        let Some(piece) = world.piece(assignment.piece) else {
            log.phase_error(
                PhaseTag::ActionRoll,
                format!("assignment references missing piece {}", assignment.piece),
            );
            continue;
        };
        let Some(district) = world.district(assignment.district) else {
            log.phase_error(
                PhaseTag::ActionRoll,
                format!("assignment references missing district {}", assignment.district),
            );
            continue;
        };
        let mut stream = ctx.rng.stream(
            StreamKey::new(PhaseTag::ActionRoll)
                .district(district.id.0)
                .faction(piece.faction.0)
                .piece(piece.id.0),
        );
        let die = stream.d20();
        let check_bonus = check_bonus_for(piece, district, &assignment.task);
        let enemy_penalty = -penalties.total_for(piece.id);
        let total =
            i32::from(die) + check_bonus + i32::from(assignment.manual_modifier) + enemy_penalty;
        let dc = dc_for(&world, &ctx, district, assignment, piece.faction);
        let quality = match assignment.task {
            Task::Monitor => Some(QualityTier::from_roll(total)),
            _ => None,
        };
        debug!(
            "piece {} rolled {} ({:?}) in district {}",
            piece.id,
            total,
            assignment.task.kind(),
            district.id
        );
        rolls.insert(RollEntry {
            piece: piece.id,
            faction: piece.faction,
            district: district.id,
            kind: assignment.task.kind(),
            target: assignment.task.target(),
            die,
            check_bonus,
            manual: assignment.manual_modifier,
            enemy_penalty,
            total,
            dc,
            quality,
            draw_adjustment: 0,
            forced: None,
        });
    }
}

/// Contention order: critical successes first, then post-penalty roll
/// descending, then a seeded tiebreak. Computed once per district.
fn contention_order<'a>(
    entries: &[&'a RollEntry],
    ctx: &TurnContext,
    district: DistrictId,
) -> Vec<&'a RollEntry> {
    let mut ordered: Vec<&RollEntry> = entries.to_vec();
    ordered.sort_by_key(|entry| {
        let tier_rank = match entry.outcome() {
            Some(OutcomeTier::CriticalSuccess) => 0,
            _ => 1,
        };
        let tiebreak = ctx
            .rng
            .stream(
                StreamKey::new(PhaseTag::ActionResolution)
                    .district(district.0)
                    .piece(entry.piece.0)
                    .salt(SALT_TIEBREAK),
            )
            .next_u32();
        (tier_rank, -entry.effective_total(), tiebreak, entry.piece.0)
    });
    ordered
}

fn push_outcome(
    log: &mut TransitionLog,
    entry: &RollEntry,
    tier: Option<OutcomeTier>,
    effect: ActionEffect,
) {
    log.outcomes.push(ActionOutcome {
        piece: entry.piece.0,
        faction: entry.faction.0,
        district: entry.district.0,
        task: entry.kind,
        target: entry.target.map(|f| f.0),
        tier,
        effect,
    });
}

fn apply_influence(
    world: &mut WorldState,
    log: &mut TransitionLog,
    district: DistrictId,
    faction: FactionId,
    delta: i8,
) -> bool {
    let current = match world.district(district) {
        Some(d) => d.influence(faction),
        None => {
            log.phase_error(
                PhaseTag::ActionResolution,
                format!("district {district} vanished during resolution"),
            );
            return false;
        }
    };
    let next = current.saturating_add_signed(delta);
    match world.set_influence(district, faction, next) {
        Ok(()) => true,
        Err(violation) => {
            log.phase_error(PhaseTag::ActionResolution, violation.to_string());
            false
        }
    }
}

/// Phase 7: apply the outcome tables.
pub fn run_action_resolution_phase(
    mut world: ResMut<WorldState>,
    ctx: Res<TurnContext>,
    config: Res<EngineConfig>,
    rolls: Res<RollLedger>,
    mut log: ResMut<TransitionLog>,
) {
    let tuning = config.action();
    for district_id in world.district_ids() {
        let entries: Vec<&RollEntry> = rolls
            .iter()
            .filter(|entry| entry.district == district_id)
            .collect();
        if entries.is_empty() {
            continue;
        }
        let mut recorded: BTreeSet<PieceId> = BTreeSet::new();

        // Gain contention: one ordered draw against the district pool.
        let gains: Vec<&RollEntry> = entries
            .iter()
            .copied()
            .filter(|e| {
                e.kind == TaskKind::InfluenceGain
                    && e.forced.is_none()
                    && e.outcome().is_some_and(OutcomeTier::is_success)
            })
            .collect();
        for entry in contention_order(&gains, &ctx, district_id) {
            recorded.insert(entry.piece);
            let tier = entry.outcome();
            let wants = if tier == Some(OutcomeTier::CriticalSuccess) {
                let mut stream = ctx.rng.stream(
                    StreamKey::new(PhaseTag::ActionResolution)
                        .district(district_id.0)
                        .piece(entry.piece.0)
                        .salt(SALT_BRANCH),
                );
                if stream.chance(tuning.gain_critical_double) {
                    2
                } else {
                    1
                }
            } else {
                1
            };
            let pool = world
                .district(district_id)
                .map(|d| d.pool())
                .unwrap_or(0);
            if pool == 0 {
                push_outcome(&mut log, entry, tier, ActionEffect::PoolExhausted);
                continue;
            }
            let granted = wants.min(i32::from(pool)) as i8;
            if apply_influence(&mut world, &mut log, district_id, entry.faction, granted) {
                push_outcome(
                    &mut log,
                    entry,
                    tier,
                    ActionEffect::Influence {
                        faction_delta: granted,
                        target_delta: 0,
                    },
                );
            }
        }

        // Take contention, per target faction.
        let mut takes_by_target: BTreeMap<FactionId, Vec<&RollEntry>> = BTreeMap::new();
        for entry in entries.iter().copied() {
            if entry.kind == TaskKind::InfluenceTake
                && entry.forced.is_none()
                && entry.outcome().is_some_and(OutcomeTier::is_success)
            {
                if let Some(target) = entry.target {
                    takes_by_target.entry(target).or_default().push(entry);
                }
            }
        }
        for (target, group) in takes_by_target {
            for entry in contention_order(&group, &ctx, district_id) {
                recorded.insert(entry.piece);
                let tier = entry.outcome();
                let mut stream = ctx.rng.stream(
                    StreamKey::new(PhaseTag::ActionResolution)
                        .district(district_id.0)
                        .piece(entry.piece.0)
                        .salt(SALT_BRANCH),
                );
                let target_influence = world
                    .district(district_id)
                    .map(|d| d.influence(target))
                    .unwrap_or(0);
                let pool = world
                    .district(district_id)
                    .map(|d| d.pool())
                    .unwrap_or(0);

                let (gained, lost) = if tier == Some(OutcomeTier::CriticalSuccess) {
                    let branch = stream.fraction();
                    if branch < 0.40 && target_influence >= 2 {
                        (2, 2)
                    } else if branch < 0.80 {
                        if pool >= 1 {
                            (2, 1)
                        } else {
                            (1, 1)
                        }
                    } else {
                        (1, 1)
                    }
                } else if stream.chance(tuning.take_success_chance) {
                    (1, 1)
                } else {
                    push_outcome(&mut log, entry, tier, ActionEffect::NoEffect);
                    continue;
                };

                if target_influence < lost {
                    push_outcome(&mut log, entry, tier, ActionEffect::TargetExhausted);
                    continue;
                }
                let target_ok = apply_influence(
                    &mut world,
                    &mut log,
                    district_id,
                    target,
                    -(lost as i8),
                );
                let self_ok = target_ok
                    && apply_influence(
                        &mut world,
                        &mut log,
                        district_id,
                        entry.faction,
                        gained as i8,
                    );
                if self_ok {
                    push_outcome(
                        &mut log,
                        entry,
                        tier,
                        ActionEffect::Influence {
                            faction_delta: gained as i8,
                            target_delta: -(lost as i8),
                        },
                    );
                }
            }
        }

        // Critical failures and everything that had no pool interaction.
        for entry in entries {
            if recorded.contains(&entry.piece) || entry.kind == TaskKind::Monitor {
                continue;
            }
            match entry.forced {
                Some(Forced::Voided) => {
                    push_outcome(&mut log, entry, None, ActionEffect::Voided);
                    continue;
                }
                Some(Forced::Fail) => {
                    push_outcome(
                        &mut log,
                        entry,
                        Some(OutcomeTier::Failure),
                        ActionEffect::ForcedFailure,
                    );
                    continue;
                }
                None => {}
            }
            let tier = entry.outcome();
            match (entry.kind, tier) {
                (TaskKind::InfluenceGain, Some(OutcomeTier::CriticalFailure)) => {
                    let mut stream = ctx.rng.stream(
                        StreamKey::new(PhaseTag::ActionResolution)
                            .district(district_id.0)
                            .piece(entry.piece.0)
                            .salt(SALT_BRANCH),
                    );
                    let own = world
                        .district(district_id)
                        .map(|d| d.influence(entry.faction))
                        .unwrap_or(0);
                    if stream.chance(tuning.gain_critical_fail_loss) && own >= 1 {
                        if apply_influence(&mut world, &mut log, district_id, entry.faction, -1) {
                            push_outcome(
                                &mut log,
                                entry,
                                tier,
                                ActionEffect::Influence {
                                    faction_delta: -1,
                                    target_delta: 0,
                                },
                            );
                            continue;
                        }
                    }
                    push_outcome(&mut log, entry, tier, ActionEffect::NoEffect);
                }
                (TaskKind::InfluenceTake, Some(OutcomeTier::CriticalFailure)) => {
                    let mut stream = ctx.rng.stream(
                        StreamKey::new(PhaseTag::ActionResolution)
                            .district(district_id.0)
                            .piece(entry.piece.0)
                            .salt(SALT_BRANCH),
                    );
                    let own = world
                        .district(district_id)
                        .map(|d| d.influence(entry.faction))
                        .unwrap_or(0);
                    if stream.chance(tuning.take_backfire) && own >= 1 {
                        let mut target_delta = 0i8;
                        if apply_influence(&mut world, &mut log, district_id, entry.faction, -1) {
                            let pool = world
                                .district(district_id)
                                .map(|d| d.pool())
                                .unwrap_or(0);
                            if stream.chance(tuning.take_backfire_transfer) && pool >= 1 {
                                if let Some(target) = entry.target {
                                    if apply_influence(
                                        &mut world,
                                        &mut log,
                                        district_id,
                                        target,
                                        1,
                                    ) {
                                        target_delta = 1;
                                    }
                                }
                            }
                            push_outcome(
                                &mut log,
                                entry,
                                tier,
                                ActionEffect::Influence {
                                    faction_delta: -1,
                                    target_delta,
                                },
                            );
                            continue;
                        }
                    }
                    push_outcome(&mut log, entry, tier, ActionEffect::NoEffect);
                }
                _ => {
                    // Plain failures, freeform tasks, and initiate-conflict
                    // rolls carry no world effect of their own.
                    push_outcome(&mut log, entry, tier, ActionEffect::NoEffect);
                }
            }
        }
    }
}
