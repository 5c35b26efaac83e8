//! Enemy-piece penalties (computed in phase 3, consumed in phases 5 and 7).
//!
//! Agents land at most one penalty per turn; squadrons spend a
//! mobility-bounded slot budget across their own and adjacent districts.
//! The whole ledger is fixed before any roll is made and stays constant
//! for the rest of the turn.

use std::collections::BTreeMap;

use bevy_ecs::system::Resource;
use log::debug;

use crate::resources::TurnContext;
use crate::rng::{PhaseTag, StreamKey};
use crate::world::{DistrictId, PieceId, PieceKind, WorldState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PenaltySlot {
    AgentSingle,
    SameDistrict,
    AdjacentDistrict,
    EitherDistrict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PenaltyGrant {
    pub source: PieceId,
    pub target: PieceId,
    pub amount: i32,
    pub slot: PenaltySlot,
}

/// Remaining targeting capacity for one squadron.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SlotBudget {
    pub same: u8,
    pub adjacent: u8,
    pub either: u8,
}

impl SlotBudget {
    fn is_empty(&self) -> bool {
        self.same == 0 && self.adjacent == 0 && self.either == 0
    }

    fn consume(&mut self, adjacent: bool) -> Option<PenaltySlot> {
        if adjacent {
            if self.adjacent > 0 {
                self.adjacent -= 1;
                return Some(PenaltySlot::AdjacentDistrict);
            }
        } else if self.same > 0 {
            self.same -= 1;
            return Some(PenaltySlot::SameDistrict);
        }
        if self.either > 0 {
            self.either -= 1;
            return Some(PenaltySlot::EitherDistrict);
        }
        None
    }
}

pub fn slots_for_mobility(mobility: u8) -> SlotBudget {
    match mobility {
        0 => SlotBudget::default(),
        1 => SlotBudget {
            same: 1,
            ..SlotBudget::default()
        },
        2 => SlotBudget {
            either: 1,
            ..SlotBudget::default()
        },
        3 => SlotBudget {
            same: 1,
            adjacent: 1,
            either: 0,
        },
        4 => SlotBudget {
            either: 2,
            ..SlotBudget::default()
        },
        _ => SlotBudget {
            same: 1,
            adjacent: 0,
            either: 2,
        },
    }
}

/// Cumulative penalty per target piece plus the individual grants.
#[derive(Resource, Debug, Default)]
pub struct PenaltyLedger {
    totals: BTreeMap<PieceId, i32>,
    grants: Vec<PenaltyGrant>,
}

impl PenaltyLedger {
    /// Positive magnitude subtracted from the piece's rolls.
    pub fn total_for(&self, piece: PieceId) -> i32 {
        self.totals.get(&piece).copied().unwrap_or(0)
    }

    pub fn grants(&self) -> &[PenaltyGrant] {
        &self.grants
    }

    fn add(&mut self, grant: PenaltyGrant) {
        *self.totals.entry(grant.target).or_insert(0) += grant.amount;
        self.grants.push(grant);
    }
}

struct Candidate {
    piece: PieceId,
    hostile_tier: u8,
    kind_rank: u8,
    amount: i32,
}

/// Enemy pieces of `source_faction` present in `district`, annotated with
/// priority data. `agent_first` flips the kind ranking between the agent
/// and squadron rules.
fn hostile_candidates(
    world: &WorldState,
    district: DistrictId,
    hostiles: &BTreeMap<crate::world::FactionId, i8>,
    agent_first: bool,
    hot_amount: i32,
    cold_amount: i32,
) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    for piece in world.pieces_in_district(district) {
        let Some(&relationship) = hostiles.get(&piece.faction) else {
            continue;
        };
        let hostile_tier = if relationship == -2 { 0 } else { 1 };
        let preferred_kind = if agent_first {
            PieceKind::Agent
        } else {
            PieceKind::Squadron
        };
        let kind_rank = u8::from(piece.kind() != preferred_kind);
        candidates.push(Candidate {
            piece: piece.id,
            hostile_tier,
            kind_rank,
            amount: if relationship == -2 {
                hot_amount
            } else {
                cold_amount
            },
        });
    }
    candidates
}

/// Build the turn's ledger. Agents resolve before squadrons, both in
/// ascending piece order; ties inside a priority band break on a seeded
/// draw so no standing order is favored.
pub fn compute_penalties(world: &WorldState, ctx: &TurnContext) -> PenaltyLedger {
    let mut ledger = PenaltyLedger::default();

    let hostiles_of = |faction: crate::world::FactionId| {
        let mut hostiles = BTreeMap::new();
        if let Some(entry) = world.faction(faction) {
            for (&other, &value) in entry.relationships() {
                if value <= -1 {
                    hostiles.insert(other, value);
                }
            }
        }
        hostiles
    };

    // Agents: a single penalty each, highest-priority target, uniform
    // among ties.
    for piece in world.pieces() {
        if piece.kind() != PieceKind::Agent {
            continue;
        }
        let Some(district) = piece.district else {
            continue;
        };
        let hostiles = hostiles_of(piece.faction);
        if hostiles.is_empty() {
            continue;
        }
        let candidates = hostile_candidates(world, district, &hostiles, true, 4, 2);
        if candidates.is_empty() {
            continue;
        }
        let best = candidates
            .iter()
            .map(|c| (c.hostile_tier, c.kind_rank))
            .min()
            .expect("non-empty candidate list");
        let tied: Vec<&Candidate> = candidates
            .iter()
            .filter(|c| (c.hostile_tier, c.kind_rank) == best)
            .collect();
        let mut stream = ctx.rng.stream(
            StreamKey::new(PhaseTag::AssignmentIntake)
                .district(district.0)
                .piece(piece.id.0),
        );
        let index = stream.range(0, tied.len() as i32 - 1) as usize;
        let chosen = tied[index];
        debug!(
            "agent {} penalizes piece {} by -{}",
            piece.id, chosen.piece, chosen.amount
        );
        ledger.add(PenaltyGrant {
            source: piece.id,
            target: chosen.piece,
            amount: chosen.amount,
            slot: PenaltySlot::AgentSingle,
        });
    }

    // Squadrons: spend the mobility slot budget, same district first,
    // then adjacents in ascending order.
    for piece in world.pieces() {
        let Some(sheet) = piece.squadron_sheet() else {
            continue;
        };
        let Some(district) = piece.district else {
            continue;
        };
        let mut budget = slots_for_mobility(sheet.mobility);
        if budget.is_empty() {
            continue;
        }
        let hostiles = hostiles_of(piece.faction);
        if hostiles.is_empty() {
            continue;
        }

        let mut targeted: Vec<PieceId> = Vec::new();
        let adjacent_ids: Vec<DistrictId> = world
            .district(district)
            .map(|d| d.adjacent().collect())
            .unwrap_or_default();
        let reach = std::iter::once((district, false))
            .chain(adjacent_ids.into_iter().map(|id| (id, true)));

        for (target_district, is_adjacent) in reach {
            if budget.is_empty() {
                break;
            }
            let mut candidates =
                hostile_candidates(world, target_district, &hostiles, false, 2, 1);
            candidates.retain(|c| !targeted.contains(&c.piece));
            candidates.sort_by_key(|c| {
                let tiebreak = ctx
                    .rng
                    .stream(
                        StreamKey::new(PhaseTag::AssignmentIntake)
                            .district(target_district.0)
                            .piece(piece.id.0)
                            .aux(c.piece.0),
                    )
                    .next_u32();
                (c.hostile_tier, c.kind_rank, tiebreak, c.piece.0)
            });
            for candidate in candidates {
                let Some(slot) = budget.consume(is_adjacent) else {
                    break;
                };
                debug!(
                    "squadron {} penalizes piece {} by -{} ({:?})",
                    piece.id, candidate.piece, candidate.amount, slot
                );
                ledger.add(PenaltyGrant {
                    source: piece.id,
                    target: candidate.piece,
                    amount: candidate.amount,
                    slot,
                });
                targeted.push(candidate.piece);
            }
        }
    }

    ledger
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::snapshot_strongholds;
    use crate::rng::TurnRng;
    use crate::world::{
        AgentSheet, District, Faction, FactionId, Piece, SquadronSheet,
    };

    fn context(world: &WorldState) -> TurnContext {
        TurnContext::new(1, TurnRng::new(0xA5A5_A5A5, 1), snapshot_strongholds(world))
    }

    fn squad(mobility: u8) -> SquadronSheet {
        SquadronSheet {
            mobility,
            ..SquadronSheet::default()
        }
    }

    fn two_faction_world() -> WorldState {
        let mut world = WorldState::new();
        world
            .insert_district(District::new(DistrictId(0), "Docks"))
            .unwrap();
        world
            .insert_district(District::new(DistrictId(1), "Market"))
            .unwrap();
        world.add_adjacency(DistrictId(0), DistrictId(1)).unwrap();
        world
            .insert_faction(Faction::new(FactionId(0), "Crimson Veil"))
            .unwrap();
        world
            .insert_faction(Faction::new(FactionId(1), "Gilded Hand"))
            .unwrap();
        world
    }

    #[test]
    fn mobility_slot_table() {
        assert_eq!(slots_for_mobility(0), SlotBudget::default());
        assert_eq!(
            slots_for_mobility(1),
            SlotBudget {
                same: 1,
                adjacent: 0,
                either: 0
            }
        );
        assert_eq!(
            slots_for_mobility(2),
            SlotBudget {
                same: 0,
                adjacent: 0,
                either: 1
            }
        );
        assert_eq!(
            slots_for_mobility(3),
            SlotBudget {
                same: 1,
                adjacent: 1,
                either: 0
            }
        );
        assert_eq!(
            slots_for_mobility(4),
            SlotBudget {
                same: 0,
                adjacent: 0,
                either: 2
            }
        );
        assert_eq!(
            slots_for_mobility(5),
            SlotBudget {
                same: 1,
                adjacent: 0,
                either: 2
            }
        );
    }

    #[test]
    fn agent_lands_one_penalty_on_the_priority_target() {
        let mut world = two_faction_world();
        world
            .set_relationship(FactionId(0), FactionId(1), -2)
            .unwrap();
        world
            .insert_piece(Piece::agent(PieceId(0), FactionId(0), AgentSheet::default()))
            .unwrap();
        // Enemy agent and squadron share the district; the agent outranks.
        world
            .insert_piece(Piece::agent(PieceId(1), FactionId(1), AgentSheet::default()))
            .unwrap();
        world
            .insert_piece(Piece::squadron(PieceId(2), FactionId(1), squad(3)))
            .unwrap();
        for id in 0..3 {
            world.place_piece(PieceId(id), Some(DistrictId(0))).unwrap();
        }

        let ledger = compute_penalties(&world, &context(&world));
        let agent_grants: Vec<_> = ledger
            .grants()
            .iter()
            .filter(|g| g.source == PieceId(0))
            .collect();
        assert_eq!(agent_grants.len(), 1);
        assert_eq!(agent_grants[0].target, PieceId(1));
        assert_eq!(agent_grants[0].amount, 4);
        assert_eq!(agent_grants[0].slot, PenaltySlot::AgentSingle);
        assert_eq!(ledger.total_for(PieceId(1)), 4);
    }

    #[test]
    fn cold_war_halves_the_agent_penalty() {
        let mut world = two_faction_world();
        world
            .set_relationship(FactionId(0), FactionId(1), -1)
            .unwrap();
        world
            .insert_piece(Piece::agent(PieceId(0), FactionId(0), AgentSheet::default()))
            .unwrap();
        world
            .insert_piece(Piece::agent(PieceId(1), FactionId(1), AgentSheet::default()))
            .unwrap();
        world.place_piece(PieceId(0), Some(DistrictId(0))).unwrap();
        world.place_piece(PieceId(1), Some(DistrictId(0))).unwrap();

        let ledger = compute_penalties(&world, &context(&world));
        assert_eq!(ledger.total_for(PieceId(0)), 2, "penalties flow both ways");
        assert_eq!(ledger.total_for(PieceId(1)), 2);
    }

    #[test]
    fn immobile_squadron_applies_nothing() {
        let mut world = two_faction_world();
        world
            .set_relationship(FactionId(0), FactionId(1), -2)
            .unwrap();
        world
            .insert_piece(Piece::squadron(PieceId(0), FactionId(0), squad(0)))
            .unwrap();
        world
            .insert_piece(Piece::agent(PieceId(1), FactionId(1), AgentSheet::default()))
            .unwrap();
        world.place_piece(PieceId(0), Some(DistrictId(0))).unwrap();
        world.place_piece(PieceId(1), Some(DistrictId(0))).unwrap();

        let ledger = compute_penalties(&world, &context(&world));
        assert!(ledger
            .grants()
            .iter()
            .all(|g| g.source != PieceId(0)));
    }

    #[test]
    fn mobility_three_reaches_one_same_and_one_adjacent_target() {
        let mut world = two_faction_world();
        world
            .set_relationship(FactionId(0), FactionId(1), -2)
            .unwrap();
        world
            .insert_piece(Piece::squadron(PieceId(0), FactionId(0), squad(3)))
            .unwrap();
        world
            .insert_piece(Piece::squadron(PieceId(1), FactionId(1), squad(0)))
            .unwrap();
        world
            .insert_piece(Piece::squadron(PieceId(2), FactionId(1), squad(0)))
            .unwrap();
        world
            .insert_piece(Piece::squadron(PieceId(3), FactionId(1), squad(0)))
            .unwrap();
        world.place_piece(PieceId(0), Some(DistrictId(0))).unwrap();
        world.place_piece(PieceId(1), Some(DistrictId(0))).unwrap();
        world.place_piece(PieceId(2), Some(DistrictId(0))).unwrap();
        world.place_piece(PieceId(3), Some(DistrictId(1))).unwrap();

        let ledger = compute_penalties(&world, &context(&world));
        let grants: Vec<_> = ledger
            .grants()
            .iter()
            .filter(|g| g.source == PieceId(0))
            .collect();
        assert_eq!(grants.len(), 2);
        assert!(grants
            .iter()
            .any(|g| g.slot == PenaltySlot::SameDistrict && g.target != PieceId(3)));
        assert!(grants
            .iter()
            .any(|g| g.slot == PenaltySlot::AdjacentDistrict && g.target == PieceId(3)));
        assert!(grants.iter().all(|g| g.amount == 2));
    }

    #[test]
    fn penalties_accumulate_per_target() {
        let mut world = two_faction_world();
        world
            .set_relationship(FactionId(0), FactionId(1), -2)
            .unwrap();
        world
            .insert_piece(Piece::agent(PieceId(0), FactionId(0), AgentSheet::default()))
            .unwrap();
        world
            .insert_piece(Piece::squadron(PieceId(1), FactionId(0), squad(1)))
            .unwrap();
        world
            .insert_piece(Piece::agent(PieceId(2), FactionId(1), AgentSheet::default()))
            .unwrap();
        for id in 0..3 {
            world.place_piece(PieceId(id), Some(DistrictId(0))).unwrap();
        }

        let ledger = compute_penalties(&world, &context(&world));
        // -4 from the hostile agent plus -2 from the squadron.
        assert_eq!(ledger.total_for(PieceId(2)), 6);
    }
}
