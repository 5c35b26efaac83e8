//! Intelligence gathering (phases 9 and 10).
//!
//! Observations for one (faction, district) pair are combined into a
//! single report: every source runs its own detection pass at its own
//! tier, while accuracy, phantoms, strongholds, DC discovery, rumors,
//! and confidence all key off the best roll. Reports write through to
//! the observing faction's perceived world.

use std::collections::BTreeMap;

use bevy_ecs::system::{Res, ResMut};
use log::debug;

use engine_contracts::{
    DcModifierReading, MonitoringReport, MonitoringSource, MonitoringSourceKind, PerceivedFaction,
    QualityTier, TaskKind, INFLUENCE_CAP,
};

use crate::action::RollLedger;
use crate::assignment::{AssignmentLedger, Task};
use crate::engine_config::EngineConfig;
use crate::monitoring_tables as tables;
use crate::resources::{TransitionLog, TurnContext};
use crate::rng::{PhaseTag, StreamKey, NO_ID};
use crate::world::{DistrictId, FactionId, PieceId, PieceKind, WorldState};

const SALT_SECONDARY: u32 = 0;
const SALT_DETECT: u32 = 1;
const SALT_ACCURACY: u32 = 2;
const SALT_PHANTOM: u32 = 3;
const SALT_PHANTOM_PICK: u32 = 4;
const SALT_PHANTOM_VALUE: u32 = 5;
const SALT_ADJUST: u32 = 6;
const SALT_STRONGHOLD: u32 = 7;
const SALT_DC: u32 = 8;
const SALT_RUMOR: u32 = 9;
const SALT_CONFIDENCE: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Observation {
    pub piece: Option<PieceId>,
    pub kind: MonitoringSourceKind,
    pub roll: i32,
}

#[derive(Debug, Clone, Copy)]
struct PerceivedSlot {
    value: u8,
    phantom: bool,
    stronghold: Option<bool>,
}

/// Collect the active observations of phase 9: agent monitors, squadron
/// primary monitors, and squadron secondary (disadvantage) watches.
/// Pieces whose action was forced or voided by a conflict contribute no
/// primary observation.
pub(crate) fn gather_observations(
    world: &WorldState,
    ctx: &TurnContext,
    assignments: &AssignmentLedger,
    rolls: &RollLedger,
) -> BTreeMap<(DistrictId, FactionId), Vec<Observation>> {
    let mut groups: BTreeMap<(DistrictId, FactionId), Vec<Observation>> = BTreeMap::new();

    for entry in rolls.iter() {
        if entry.kind != TaskKind::Monitor || entry.forced.is_some() {
            continue;
        }
        let Some(piece) = world.piece(entry.piece) else {
            continue;
        };
        let kind = match piece.kind() {
            PieceKind::Agent => MonitoringSourceKind::AgentMonitor,
            PieceKind::Squadron => MonitoringSourceKind::SquadronPrimary,
        };
        groups
            .entry((entry.district, entry.faction))
            .or_default()
            .push(Observation {
                piece: Some(entry.piece),
                kind,
                roll: entry.effective_total(),
            });
    }

    // Squadrons watch their district even while doing something else (or
    // nothing at all), rolling twice and keeping the lower die.
    for piece in world.pieces() {
        let Some(sheet) = piece.squadron_sheet() else {
            continue;
        };
        let Some(district) = piece.district else {
            continue;
        };
        let has_primary_monitor = matches!(
            assignments.get(piece.id).map(|a| &a.task),
            Some(Task::Monitor)
        );
        if has_primary_monitor {
            continue;
        }
        let mut stream = ctx.rng.stream(
            StreamKey::new(PhaseTag::Monitoring)
                .district(district.0)
                .faction(piece.faction.0)
                .piece(piece.id.0)
                .salt(SALT_SECONDARY),
        );
        let die = stream.d20().min(stream.d20());
        let roll = i32::from(die) + i32::from(sheet.aptitudes.monitoring);
        groups
            .entry((district, piece.faction))
            .or_default()
            .push(Observation {
                piece: Some(piece.id),
                kind: MonitoringSourceKind::SquadronSecondary,
                roll,
            });
    }

    groups
}

/// Reduce perceived totals to the district cap: decrement a uniformly
/// chosen entry above the floor of 1; when everything sits at the floor,
/// drop phantoms (lowest value first), then reals by the same rule.
fn clamp_total(
    entries: &mut BTreeMap<FactionId, PerceivedSlot>,
    stream: &mut crate::rng::Stream,
) {
    loop {
        let total: u16 = entries.values().map(|slot| u16::from(slot.value)).sum();
        if total <= u16::from(INFLUENCE_CAP) {
            return;
        }
        let reducible: Vec<FactionId> = entries
            .iter()
            .filter(|(_, slot)| slot.value > 1)
            .map(|(id, _)| *id)
            .collect();
        if !reducible.is_empty() {
            let index = stream.range(0, reducible.len() as i32 - 1) as usize;
            if let Some(slot) = entries.get_mut(&reducible[index]) {
                slot.value -= 1;
            }
            continue;
        }
        let phantoms: Vec<(FactionId, u8)> = entries
            .iter()
            .filter(|(_, slot)| slot.phantom)
            .map(|(id, slot)| (*id, slot.value))
            .collect();
        let pool = if phantoms.is_empty() {
            entries
                .iter()
                .map(|(id, slot)| (*id, slot.value))
                .collect::<Vec<_>>()
        } else {
            phantoms
        };
        let Some(&lowest) = pool.iter().map(|(_, value)| value).min() else {
            return;
        };
        let lowest_entries: Vec<FactionId> = pool
            .iter()
            .filter(|(_, value)| *value == lowest)
            .map(|(id, _)| *id)
            .collect();
        let index = stream.range(0, lowest_entries.len() as i32 - 1) as usize;
        entries.remove(&lowest_entries[index]);
    }
}

#[allow(clippy::too_many_arguments)]
fn resolve_report(
    world: &mut WorldState,
    ctx: &TurnContext,
    config: &EngineConfig,
    phase: PhaseTag,
    district_id: DistrictId,
    observer: FactionId,
    mut sources: Vec<Observation>,
    log: &mut TransitionLog,
) -> Option<MonitoringReport> {
    if sources.is_empty() {
        return None;
    }
    sources.sort_by_key(|source| (-source.roll, source.piece.map(|p| p.0).unwrap_or(NO_ID)));
    let best_roll = sources[0].roll;
    let best_tier = QualityTier::from_roll(best_roll);
    let best_offset = best_tier.band_offset(best_roll);
    let tuning = config.monitoring();

    let (present, weekly_dc, unknown_rumors, absent, adjacent_presence) = {
        let Some(district) = world.district(district_id) else {
            log.phase_error(phase, format!("district {district_id} missing for report"));
            return None;
        };
        let present: Vec<(FactionId, u8)> = district
            .influence_map()
            .iter()
            .map(|(id, value)| (*id, *value))
            .collect();
        let known = world
            .faction(observer)
            .map(|f| f.known_rumors().collect::<Vec<_>>())
            .unwrap_or_default();
        let unknown_rumors: Vec<(crate::world::RumorId, u8)> = district
            .rumors()
            .filter(|rumor| !known.contains(&rumor.id))
            .map(|rumor| (rumor.id, rumor.dc))
            .collect();
        let absent: Vec<FactionId> = world
            .faction_ids()
            .into_iter()
            .filter(|id| district.influence(*id) == 0)
            .collect();
        let adjacent_presence: Vec<FactionId> = absent
            .iter()
            .copied()
            .filter(|id| {
                district.adjacent().any(|neighbor| {
                    world
                        .district(neighbor)
                        .is_some_and(|d| d.influence(*id) > 0)
                })
            })
            .collect();
        (
            present,
            district.weekly_dc_modifier(),
            unknown_rumors,
            absent,
            adjacent_presence,
        )
    };

    let key = |salt: u32| {
        StreamKey::new(phase)
            .district(district_id.0)
            .faction(observer.0)
            .salt(salt)
    };

    // Detection: each source sweeps at its own tier; the union survives.
    let mut entries: BTreeMap<FactionId, PerceivedSlot> = BTreeMap::new();
    for source in &sources {
        let tier = QualityTier::from_roll(source.roll);
        let offset = tier.band_offset(source.roll);
        for &(subject, value) in &present {
            if entries.contains_key(&subject) {
                continue;
            }
            let chance = tables::scale_up(
                tables::detection_chance(tier, value),
                offset,
                tuning.detection_per_point,
            );
            let mut stream = ctx.rng.stream(
                key(SALT_DETECT)
                    .piece(source.piece.map(|p| p.0).unwrap_or(NO_ID))
                    .aux(subject.0),
            );
            if stream.chance(chance) {
                entries.insert(
                    subject,
                    PerceivedSlot {
                        value,
                        phantom: false,
                        stronghold: None,
                    },
                );
            }
        }
    }

    // Accuracy at the best tier.
    let exact_bonus = f64::from(best_offset) * tuning.accuracy_per_point;
    let detected: Vec<(FactionId, u8)> = entries
        .iter()
        .map(|(id, slot)| (*id, slot.value))
        .collect();
    for (subject, actual) in &detected {
        let mut stream = ctx.rng.stream(key(SALT_ACCURACY).aux(subject.0));
        let value = tables::sample_perceived(best_tier, *actual, exact_bonus, &mut stream);
        if let Some(slot) = entries.get_mut(subject) {
            slot.value = value;
        }
    }

    // Phantoms at the best tier.
    let mut phantom_stream = ctx.rng.stream(key(SALT_PHANTOM));
    let phantom_chance = tables::scale_down(
        tables::phantom_chance(best_tier),
        best_offset,
        tuning.phantom_per_point,
    );
    if phantom_stream.chance(phantom_chance) {
        let count = tables::sample_phantom_count(&mut phantom_stream);
        let mut candidates = absent.clone();
        for slot_index in 0..count {
            if candidates.is_empty() {
                break;
            }
            let weights: Vec<f64> = candidates
                .iter()
                .map(|id| {
                    if adjacent_presence.contains(id) {
                        tables::adjacency_multiplier(best_tier)
                    } else {
                        1.0
                    }
                })
                .collect();
            let mut pick_stream = ctx
                .rng
                .stream(key(SALT_PHANTOM_PICK).aux(u32::from(slot_index)));
            let Some(index) = pick_stream.choose_weighted(&weights) else {
                break;
            };
            let phantom = candidates.remove(index);
            let mut value_stream = ctx.rng.stream(key(SALT_PHANTOM_VALUE).aux(phantom.0));
            let value = tables::sample_phantom_value(best_tier, &mut value_stream).max(1);
            debug!(
                "phantom faction {} (value {}) in report for {} / district {}",
                phantom, value, observer, district_id
            );
            entries.insert(
                phantom,
                PerceivedSlot {
                    value,
                    phantom: true,
                    stronghold: None,
                },
            );
        }
    }

    // Keep the report inside the district cap.
    let mut adjust_stream = ctx.rng.stream(key(SALT_ADJUST));
    clamp_total(&mut entries, &mut adjust_stream);

    // Stronghold identification for surviving real entries.
    let survivors: Vec<FactionId> = entries
        .iter()
        .filter(|(_, slot)| !slot.phantom)
        .map(|(id, _)| *id)
        .collect();
    for subject in &survivors {
        if let Some(slot) = entries.get_mut(subject) {
            slot.stronghold = Some(false);
        }
    }
    for subject in &survivors {
        if !ctx.has_stronghold(district_id, *subject) {
            continue;
        }
        let mut stream = ctx.rng.stream(key(SALT_STRONGHOLD).aux(subject.0));
        if stream.chance(tables::stronghold_correct_chance(best_tier)) {
            if let Some(slot) = entries.get_mut(subject) {
                slot.stronghold = Some(true);
            }
        } else if stream.chance(tables::stronghold_false_chance(best_tier)) {
            let decoys: Vec<FactionId> = survivors
                .iter()
                .copied()
                .filter(|id| !ctx.has_stronghold(district_id, *id))
                .collect();
            if !decoys.is_empty() {
                let index = stream.range(0, decoys.len() as i32 - 1) as usize;
                if let Some(slot) = entries.get_mut(&decoys[index]) {
                    slot.stronghold = Some(true);
                }
            }
        }
    }

    // Weekly DC discovery.
    let mut dc_stream = ctx.rng.stream(key(SALT_DC));
    let dc_modifier = if weekly_dc == 0 {
        if dc_stream.chance(tables::zero_modifier_exact_chance(best_roll)) {
            Some(DcModifierReading::Exact(0))
        } else {
            None
        }
    } else {
        let (exact, direction) = tables::dc_discovery_chances(weekly_dc.unsigned_abs(), best_roll);
        let draw = dc_stream.fraction();
        if draw < exact {
            Some(DcModifierReading::Exact(weekly_dc))
        } else if draw < exact + direction {
            let mut positive = weekly_dc > 0;
            if dc_stream.chance(tables::false_direction_chance(best_roll)) {
                positive = !positive;
            }
            Some(DcModifierReading::DirectionOnly { positive })
        } else {
            None
        }
    };

    // Rumor discovery: clean beats land outright, then one weighted pick
    // from the rest of the beatable set.
    let mut discovered: Vec<crate::world::RumorId> = Vec::new();
    let mut beatable: Vec<(crate::world::RumorId, i32)> = Vec::new();
    for (rumor, dc) in &unknown_rumors {
        let margin = best_roll - i32::from(*dc);
        if margin >= 7 {
            discovered.push(*rumor);
        } else if margin >= 0 {
            beatable.push((*rumor, margin));
        }
    }
    if !beatable.is_empty() {
        let weights: Vec<f64> = beatable
            .iter()
            .map(|(_, margin)| f64::from(margin + 1))
            .collect();
        let mut rumor_stream = ctx.rng.stream(key(SALT_RUMOR));
        if let Some(index) = rumor_stream.choose_weighted(&weights) {
            discovered.push(beatable[index].0);
        }
    }

    // Confidence rating.
    let base = i32::from(tables::confidence_base(best_roll));
    let (lo, hi) = tables::confidence_error_bounds(best_roll);
    let confidence = if hi == 0 {
        base
    } else {
        let mut stream = ctx.rng.stream(key(SALT_CONFIDENCE));
        let error = stream.range(lo, hi);
        if stream.chance(0.5) {
            base + error
        } else {
            base - error
        }
    }
    .clamp(1, 10) as u8;

    // Write the beliefs through to the observer's perceived world.
    for (subject, slot) in &entries {
        if let Err(violation) = world.update_perceived(
            observer,
            district_id,
            *subject,
            slot.value,
            slot.stronghold.unwrap_or(false),
            ctx.turn,
        ) {
            log.phase_error(phase, violation.to_string());
        }
    }
    for rumor in &discovered {
        if let Err(violation) = world.add_known_rumor(observer, *rumor) {
            log.phase_error(phase, violation.to_string());
        }
    }

    Some(MonitoringReport {
        faction: observer.0,
        district: district_id.0,
        sources: sources
            .iter()
            .map(|source| MonitoringSource {
                piece: source.piece.map(|p| p.0),
                kind: source.kind,
                roll: source.roll,
                quality: QualityTier::from_roll(source.roll),
            })
            .collect(),
        best_roll,
        quality: best_tier,
        perceived: entries
            .iter()
            .map(|(id, slot)| PerceivedFaction {
                faction: id.0,
                influence: slot.value,
                stronghold: if slot.phantom { None } else { slot.stronghold },
                phantom: slot.phantom,
            })
            .collect(),
        dc_modifier,
        discovered_rumors: discovered.iter().map(|r| r.0).collect(),
        confidence,
    })
}

/// Phase 9: agent and squadron monitoring.
pub fn run_monitoring_phase(
    mut world: ResMut<WorldState>,
    ctx: Res<TurnContext>,
    config: Res<EngineConfig>,
    assignments: Res<AssignmentLedger>,
    rolls: Res<RollLedger>,
    mut log: ResMut<TransitionLog>,
) {
    let groups = gather_observations(&world, &ctx, &assignments, &rolls);
    for ((district, observer), sources) in groups {
        if let Some(report) = resolve_report(
            &mut world,
            &ctx,
            &config,
            PhaseTag::Monitoring,
            district,
            observer,
            sources,
            &mut log,
        ) {
            log.monitoring.push(report);
        }
    }
}

/// Phase 10: passive monitoring for factions holding real ground.
pub fn run_passive_monitoring_phase(
    mut world: ResMut<WorldState>,
    ctx: Res<TurnContext>,
    config: Res<EngineConfig>,
    mut log: ResMut<TransitionLog>,
) {
    let threshold = config.monitoring().passive_threshold;
    let mut observations: Vec<(DistrictId, FactionId, i32)> = Vec::new();
    for district in world.districts() {
        for (&faction, &influence) in district.influence_map() {
            if influence < threshold {
                continue;
            }
            let bonus = world
                .faction(faction)
                .map(|f| i32::from(f.monitoring_bonus))
                .unwrap_or(0);
            let mut stream = ctx.rng.stream(
                StreamKey::new(PhaseTag::PassiveMonitoring)
                    .district(district.id.0)
                    .faction(faction.0),
            );
            let roll = i32::from(stream.d20()) + i32::from(influence / 2) + bonus;
            observations.push((district.id, faction, roll));
        }
    }
    for (district, observer, roll) in observations {
        let sources = vec![Observation {
            piece: None,
            kind: MonitoringSourceKind::FactionPassive,
            roll,
        }];
        if let Some(report) = resolve_report(
            &mut world,
            &ctx,
            &config,
            PhaseTag::PassiveMonitoring,
            district,
            observer,
            sources,
            &mut log,
        ) {
            log.monitoring.push(report);
        }
    }
}
