//! Influence decay (phase 2).
//!
//! Two passes per district: a per-faction Bernoulli loss for every point
//! of influence above the holding threshold, then a saturation check when
//! the district is at or near capacity. Stronghold holders use the frozen
//! phase-1 flags, not live district state.

use bevy_ecs::system::{Res, ResMut};
use log::debug;

use engine_contracts::{DecayCause, DecayEvent};

use crate::engine_config::EngineConfig;
use crate::resources::{TransitionLog, TurnContext};
use crate::rng::{PhaseTag, StreamKey};
use crate::world::{InvariantViolation, WorldState};

const SALT_SATURATION: u32 = 1;

pub fn run_decay_phase(
    mut world: ResMut<WorldState>,
    ctx: Res<TurnContext>,
    config: Res<EngineConfig>,
    mut log: ResMut<TransitionLog>,
) -> Result<(), InvariantViolation> {
    let tuning = config.decay();
    for district_id in world.district_ids() {
        let holdings: Vec<_> = {
            let district = world
                .district(district_id)
                .ok_or(InvariantViolation::UnknownDistrict(district_id))?;
            district
                .influence_map()
                .iter()
                .map(|(faction, value)| (*faction, *value))
                .collect()
        };

        // Base decay: one Bernoulli per point above the threshold.
        for (faction, value) in &holdings {
            let threshold = if ctx.has_stronghold(district_id, *faction) {
                tuning.stronghold_threshold
            } else {
                tuning.open_threshold
            };
            let excess = value.saturating_sub(threshold);
            if excess == 0 {
                continue;
            }
            let mut stream = ctx.rng.stream(
                StreamKey::new(PhaseTag::InfluenceDecay)
                    .district(district_id.0)
                    .faction(faction.0),
            );
            let mut losses = 0u8;
            for _ in 0..excess {
                if stream.chance(tuning.base_chance) {
                    losses += 1;
                }
            }
            if losses == 0 {
                continue;
            }
            let lost = world.apply_decay(district_id, *faction, losses)?;
            debug!(
                "base decay: faction {} lost {} influence in district {}",
                faction, lost, district_id
            );
            for _ in 0..lost {
                log.decay.push(DecayEvent {
                    district: district_id.0,
                    faction: faction.0,
                    delta: -1,
                    cause: DecayCause::Base,
                });
            }
        }

        // Saturation decay over the post-base totals.
        let (total, candidates): (u8, Vec<_>) = {
            let district = world
                .district(district_id)
                .ok_or(InvariantViolation::UnknownDistrict(district_id))?;
            let candidates = district
                .influence_map()
                .iter()
                .map(|(faction, value)| (*faction, *value))
                // A stronghold holder at exactly 1 cannot drop to 0.
                .filter(|(faction, value)| {
                    *value > 1 || !ctx.has_stronghold(district_id, *faction)
                })
                .collect();
            (district.total_influence(), candidates)
        };
        let chance = match total {
            9 => tuning.saturation_at_nine,
            10 => tuning.saturation_at_ten,
            _ => continue,
        };
        let mut stream = ctx.rng.stream(
            StreamKey::new(PhaseTag::InfluenceDecay)
                .district(district_id.0)
                .salt(SALT_SATURATION),
        );
        if !stream.chance(chance) {
            continue;
        }
        let weights: Vec<f64> = candidates.iter().map(|(_, v)| f64::from(*v)).collect();
        let Some(index) = stream.choose_weighted(&weights) else {
            continue;
        };
        let (loser, _) = candidates[index];
        let lost = world.apply_decay(district_id, loser, 1)?;
        if lost > 0 {
            debug!(
                "saturation decay: faction {} lost 1 influence in district {}",
                loser, district_id
            );
            log.decay.push(DecayEvent {
                district: district_id.0,
                faction: loser.0,
                delta: -1,
                cause: DecayCause::Saturation,
            });
        }
    }
    Ok(())
}
