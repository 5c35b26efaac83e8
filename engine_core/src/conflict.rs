//! Conflict detection, enrollment, and adjudication (phases 4 and 6).
//!
//! Detection runs manual, relationship, and target rules in that order,
//! then offers adjacent squadrons a mobility-scaled chance to join. A
//! piece belongs to at most one conflict per turn; ally-support pieces
//! lose their own actions for the turn.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use bevy_ecs::system::{Res, ResMut, Resource};
use log::{debug, info};
use thiserror::Error;

use engine_contracts::{
    Adjudication, ConflictFactionEntry, ConflictKind, ConflictOutcome, ConflictPieceEntry,
    ConflictRecord, FactionRole, Participation, PauseBundle, ResolutionStatus,
};

use crate::action::{Forced, RollLedger};
use crate::assignment::{AssignmentLedger, Task};
use crate::engine_config::{EngineConfig, InitiateGate};
use crate::resources::TurnContext;
use crate::rng::{PhaseTag, StreamKey};
use crate::world::{DistrictId, FactionId, PieceId, PieceKind, WorldState};

const SALT_RELATIONSHIP: u32 = 1;
const SALT_ADJACENT: u32 = 2;
const SALT_GATE: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConflictId(pub u64);

impl fmt::Display for ConflictId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct FactionEntry {
    pub role: FactionRole,
    pub outcome: Option<ConflictOutcome>,
}

#[derive(Debug, Clone)]
pub struct PieceEntry {
    pub faction: FactionId,
    pub participation: Participation,
}

#[derive(Debug, Clone)]
pub struct Conflict {
    pub id: ConflictId,
    pub district: DistrictId,
    pub kind: ConflictKind,
    pub factions: BTreeMap<FactionId, FactionEntry>,
    pub pieces: BTreeMap<PieceId, PieceEntry>,
    pub status: ResolutionStatus,
    pub notes: Option<String>,
}

impl Conflict {
    pub fn enrolled_factions(&self) -> Vec<FactionId> {
        self.factions.keys().copied().collect()
    }

    fn to_record(&self, rolls: &RollLedger) -> ConflictRecord {
        ConflictRecord {
            id: self.id.0,
            district: self.district.0,
            kind: self.kind,
            factions: self
                .factions
                .iter()
                .map(|(id, entry)| ConflictFactionEntry {
                    faction: id.0,
                    role: entry.role,
                    outcome: entry.outcome,
                })
                .collect(),
            pieces: self
                .pieces
                .iter()
                .map(|(id, entry)| {
                    let roll = rolls.get(*id);
                    ConflictPieceEntry {
                        piece: id.0,
                        faction: entry.faction.0,
                        participation: entry.participation,
                        roll: roll.map(|r| r.effective_total()),
                        outcome: roll.and_then(|r| r.outcome()),
                        intended: roll.map(|r| r.kind),
                    }
                })
                .collect(),
            status: self.status,
            notes: self.notes.clone(),
        }
    }
}

/// All conflicts of the turn plus the piece-exclusivity index.
#[derive(Resource, Debug, Default)]
pub struct ConflictLedger {
    conflicts: Vec<Conflict>,
    enrolled: BTreeMap<PieceId, ConflictId>,
    voided: BTreeSet<PieceId>,
    next_id: u64,
}

impl ConflictLedger {
    pub fn is_empty(&self) -> bool {
        self.conflicts.is_empty()
    }

    pub fn conflicts(&self) -> &[Conflict] {
        &self.conflicts
    }

    pub fn get(&self, id: ConflictId) -> Option<&Conflict> {
        self.conflicts.iter().find(|c| c.id == id)
    }

    pub fn is_enrolled(&self, piece: PieceId) -> bool {
        self.enrolled.contains_key(&piece)
    }

    pub fn is_voided(&self, piece: PieceId) -> bool {
        self.voided.contains(&piece)
    }

    pub fn voided(&self) -> impl Iterator<Item = PieceId> + '_ {
        self.voided.iter().copied()
    }

    pub fn records(&self, rolls: &RollLedger) -> Vec<ConflictRecord> {
        self.conflicts.iter().map(|c| c.to_record(rolls)).collect()
    }

    pub fn pause_bundle(&self, rolls: &RollLedger, turn: u64) -> PauseBundle {
        PauseBundle {
            turn,
            conflicts: self.records(rolls),
        }
    }

    fn allocate(&mut self) -> ConflictId {
        let id = ConflictId(self.next_id);
        self.next_id += 1;
        id
    }

    fn open(&mut self, district: DistrictId, kind: ConflictKind, notes: Option<String>) -> usize {
        let id = self.allocate();
        self.conflicts.push(Conflict {
            id,
            district,
            kind,
            factions: BTreeMap::new(),
            pieces: BTreeMap::new(),
            status: ResolutionStatus::Pending,
            notes,
        });
        self.conflicts.len() - 1
    }

    fn add_faction(&mut self, index: usize, faction: FactionId, role: FactionRole) {
        self.conflicts[index]
            .factions
            .entry(faction)
            .or_insert(FactionEntry {
                role,
                outcome: None,
            });
    }

    fn enroll(
        &mut self,
        index: usize,
        piece: PieceId,
        faction: FactionId,
        participation: Participation,
    ) {
        let id = self.conflicts[index].id;
        if self.enrolled.contains_key(&piece) {
            return;
        }
        self.conflicts[index].pieces.insert(
            piece,
            PieceEntry {
                faction,
                participation,
            },
        );
        self.enrolled.insert(piece, id);
        if participation == Participation::AllySupport {
            self.voided.insert(piece);
        }
    }

    /// Drop a conflict entirely, freeing every piece it enrolled.
    pub fn retract(&mut self, id: ConflictId) {
        let Some(index) = self.conflicts.iter().position(|c| c.id == id) else {
            return;
        };
        let conflict = self.conflicts.remove(index);
        for piece in conflict.pieces.keys() {
            self.enrolled.remove(piece);
            self.voided.remove(piece);
        }
    }

    fn available_pieces(
        &self,
        world: &WorldState,
        district: DistrictId,
        faction: FactionId,
    ) -> Vec<PieceId> {
        world
            .pieces_in_district(district)
            .into_iter()
            .filter(|piece| piece.faction == faction && !self.is_enrolled(piece.id))
            .map(|piece| piece.id)
            .collect()
    }
}

/// Enroll supporters declared toward the principal faction set.
fn enroll_ally_support(world: &WorldState, ledger: &mut ConflictLedger, index: usize) {
    let district = ledger.conflicts[index].district;
    let principals: Vec<FactionId> = ledger.conflicts[index].factions.keys().copied().collect();
    for ally in world.faction_ids() {
        if ledger.conflicts[index].factions.contains_key(&ally) {
            continue;
        }
        let Some(faction) = world.faction(ally) else {
            continue;
        };
        if !principals.iter().any(|p| faction.supports(*p)) {
            continue;
        }
        let pieces = ledger.available_pieces(world, district, ally);
        if pieces.is_empty() {
            continue;
        }
        debug!(
            "faction {} joins conflict {} as ally support",
            ally, ledger.conflicts[index].id
        );
        ledger.add_faction(index, ally, FactionRole::Ally);
        for piece in pieces {
            ledger.enroll(index, piece, ally, Participation::AllySupport);
        }
    }
}

/// Phase 4: build the turn's conflict set.
pub fn run_conflict_detection(
    world: Res<WorldState>,
    ctx: Res<TurnContext>,
    config: Res<EngineConfig>,
    assignments: Res<AssignmentLedger>,
    mut ledger: ResMut<ConflictLedger>,
) {
    let tuning = config.conflict();

    // 1. Manual conflicts from InitiateConflict tasks.
    for assignment in assignments.iter() {
        let Task::InitiateConflict {
            target,
            description,
            ..
        } = &assignment.task
        else {
            continue;
        };
        let Some(piece) = world.piece(assignment.piece) else {
            continue;
        };
        if ledger.is_enrolled(piece.id) {
            debug!(
                "piece {} already enrolled, skipping manual conflict",
                piece.id
            );
            continue;
        }
        let defenders = ledger.available_pieces(&world, assignment.district, *target);
        if defenders.is_empty() {
            debug!(
                "target faction {} has no available piece in district {}",
                target, assignment.district
            );
            continue;
        }
        let index = ledger.open(
            assignment.district,
            ConflictKind::Manual,
            Some(description.clone()),
        );
        ledger.add_faction(index, piece.faction, FactionRole::Initiator);
        ledger.add_faction(index, *target, FactionRole::Target);
        ledger.enroll(index, piece.id, piece.faction, Participation::Direct);
        for defender in defenders {
            ledger.enroll(index, defender, *target, Participation::Direct);
        }
        enroll_ally_support(&world, &mut ledger, index);
        info!(
            "manual conflict {} opened in district {}",
            ledger.conflicts[index].id, assignment.district
        );
    }

    // 2. Relationship conflicts between co-located hostile factions.
    for district_id in world.district_ids() {
        let mut present: Vec<FactionId> = world
            .pieces_in_district(district_id)
            .iter()
            .map(|piece| piece.faction)
            .collect();
        present.sort();
        present.dedup();
        for (i, &a) in present.iter().enumerate() {
            for &b in present.iter().skip(i + 1) {
                let relationship = world
                    .faction(a)
                    .map(|f| f.relationship(b))
                    .unwrap_or(0);
                let chance = match relationship {
                    -1 => tuning.cold_war_chance,
                    -2 => tuning.hot_war_chance,
                    _ => continue,
                };
                let side_a = ledger.available_pieces(&world, district_id, a);
                let side_b = ledger.available_pieces(&world, district_id, b);
                if side_a.is_empty() || side_b.is_empty() {
                    continue;
                }
                let mut stream = ctx.rng.stream(
                    StreamKey::new(PhaseTag::ConflictDetection)
                        .district(district_id.0)
                        .faction(a.0)
                        .aux(b.0)
                        .salt(SALT_RELATIONSHIP),
                );
                if !stream.chance(chance) {
                    continue;
                }
                let index = ledger.open(district_id, ConflictKind::Relationship, None);
                ledger.add_faction(index, a, FactionRole::Initiator);
                ledger.add_faction(index, b, FactionRole::Target);
                for piece in side_a {
                    ledger.enroll(index, piece, a, Participation::Direct);
                }
                for piece in side_b {
                    ledger.enroll(index, piece, b, Participation::Direct);
                }
                enroll_ally_support(&world, &mut ledger, index);
                info!(
                    "relationship conflict {} between {} and {} in district {}",
                    ledger.conflicts[index].id, a, b, district_id
                );
            }
        }
    }

    // 3. Target conflicts: two factions taking from the same third party.
    for district_id in world.district_ids() {
        let takers: Vec<(PieceId, FactionId, FactionId)> = assignments
            .iter()
            .filter(|a| a.district == district_id)
            .filter_map(|a| match &a.task {
                Task::InfluenceTake { target } => world
                    .piece(a.piece)
                    .map(|piece| (piece.id, piece.faction, *target)),
                _ => None,
            })
            .collect();
        for (i, &(piece_a, faction_a, target_a)) in takers.iter().enumerate() {
            for &(piece_b, faction_b, target_b) in takers.iter().skip(i + 1) {
                if faction_a == faction_b || target_a != target_b {
                    continue;
                }
                if ledger.is_enrolled(piece_a) || ledger.is_enrolled(piece_b) {
                    continue;
                }
                let index = ledger.open(district_id, ConflictKind::Target, None);
                ledger.add_faction(index, faction_a, FactionRole::Initiator);
                ledger.add_faction(index, faction_b, FactionRole::Target);
                ledger.enroll(index, piece_a, faction_a, Participation::Direct);
                ledger.enroll(index, piece_b, faction_b, Participation::Direct);
                enroll_ally_support(&world, &mut ledger, index);
                info!(
                    "target conflict {} over faction {} in district {}",
                    ledger.conflicts[index].id, target_a, district_id
                );
            }
        }
    }

    // 4. Adjacent squadrons of involved factions may pile in.
    for index in 0..ledger.conflicts.len() {
        if ledger.conflicts[index].factions.len() < 2 || ledger.conflicts[index].pieces.len() < 2 {
            continue;
        }
        let district = ledger.conflicts[index].district;
        let involved: Vec<FactionId> = ledger.conflicts[index].factions.keys().copied().collect();
        let adjacent: Vec<DistrictId> = world
            .district(district)
            .map(|d| d.adjacent().collect())
            .unwrap_or_default();
        for faction in involved {
            for &neighbor in &adjacent {
                let squadrons: Vec<(PieceId, u8)> = world
                    .pieces_in_district(neighbor)
                    .into_iter()
                    .filter(|piece| {
                        piece.faction == faction && piece.kind() == PieceKind::Squadron
                    })
                    .filter_map(|piece| {
                        piece
                            .squadron_sheet()
                            .map(|sheet| (piece.id, sheet.mobility))
                    })
                    .collect();
                for (piece, mobility) in squadrons {
                    if ledger.is_enrolled(piece) {
                        continue;
                    }
                    let mut stream = ctx.rng.stream(
                        StreamKey::new(PhaseTag::ConflictDetection)
                            .district(neighbor.0)
                            .faction(faction.0)
                            .piece(piece.0)
                            .salt(SALT_ADJACENT),
                    );
                    let chance = f64::from(mobility) * tuning.adjacent_join_per_mobility;
                    if stream.chance(chance) {
                        debug!(
                            "squadron {} joins conflict {} from adjacent district {}",
                            piece, ledger.conflicts[index].id, neighbor
                        );
                        ledger.enroll(index, piece, faction, Participation::Adjacent);
                    }
                }
            }
        }
    }
}

/// Transfer ally-support voids onto the roll ledger (end of phase 5).
pub fn mark_voided_rolls(ledger: Res<ConflictLedger>, mut rolls: ResMut<RollLedger>) {
    for piece in ledger.voided() {
        if let Some(entry) = rolls.get_mut(piece) {
            entry.forced = Some(Forced::Voided);
        }
    }
}

/// Apply the configured initiate gate after action rolls: a failed draw
/// retracts the manual conflict and frees everything it enrolled.
pub fn apply_initiate_gate(
    ctx: Res<TurnContext>,
    config: Res<EngineConfig>,
    rolls: Res<RollLedger>,
    mut ledger: ResMut<ConflictLedger>,
) {
    let tuning = config.conflict();
    if tuning.initiate_gate == InitiateGate::Always {
        return;
    }
    let manual: Vec<(ConflictId, Option<PieceId>)> = ledger
        .conflicts()
        .iter()
        .filter(|c| c.kind == ConflictKind::Manual)
        .map(|c| {
            let initiator_faction = c
                .factions
                .iter()
                .find(|(_, entry)| entry.role == FactionRole::Initiator)
                .map(|(id, _)| *id);
            let initiator_piece = initiator_faction.and_then(|faction| {
                c.pieces
                    .iter()
                    .find(|(_, entry)| entry.faction == faction)
                    .map(|(id, _)| *id)
            });
            (c.id, initiator_piece)
        })
        .collect();
    for (conflict, piece) in manual {
        let outcome = piece
            .and_then(|p| rolls.get(p))
            .and_then(|entry| entry.outcome());
        let chance = match outcome {
            Some(engine_contracts::OutcomeTier::CriticalSuccess) => tuning.gate_on_critical,
            Some(engine_contracts::OutcomeTier::Success) => tuning.gate_on_success,
            _ => 0.0,
        };
        let passes = piece.is_some_and(|p| {
            ctx.rng
                .stream(
                    StreamKey::new(PhaseTag::ConflictDetection)
                        .piece(p.0)
                        .salt(SALT_GATE),
                )
                .chance(chance)
        });
        if !passes {
            info!("manual conflict {} did not escalate; retracting", conflict);
            ledger.retract(conflict);
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdjudicationError {
    #[error("adjudication names unknown conflict {0}")]
    UnknownConflict(u64),
    #[error("conflict {0} was adjudicated twice")]
    DuplicateAdjudication(u64),
    #[error("conflict {0} is missing an adjudication")]
    MissingAdjudication(u64),
    #[error("adjudication for conflict {0} does not partition its factions")]
    NotAPartition(u64),
    #[error("conflict {0} is already resolved")]
    AlreadyResolved(u64),
}

/// Phase 6: validate and record the orchestrator's verdicts. All-or-
/// nothing: the first invalid adjudication aborts without applying any.
pub fn apply_adjudications(
    ledger: &mut ConflictLedger,
    rolls: &mut RollLedger,
    adjudications: &[Adjudication],
    draw_penalty: i8,
) -> Result<(), AdjudicationError> {
    let mut by_conflict: BTreeMap<u64, &Adjudication> = BTreeMap::new();
    for adjudication in adjudications {
        let conflict = ledger
            .get(ConflictId(adjudication.conflict))
            .ok_or(AdjudicationError::UnknownConflict(adjudication.conflict))?;
        if conflict.status == ResolutionStatus::Resolved {
            return Err(AdjudicationError::AlreadyResolved(adjudication.conflict));
        }
        let enrolled: Vec<u32> = conflict.factions.keys().map(|f| f.0).collect();
        if !adjudication.partitions(&enrolled) {
            return Err(AdjudicationError::NotAPartition(adjudication.conflict));
        }
        if by_conflict
            .insert(adjudication.conflict, adjudication)
            .is_some()
        {
            return Err(AdjudicationError::DuplicateAdjudication(
                adjudication.conflict,
            ));
        }
    }
    for conflict in ledger.conflicts() {
        if conflict.status == ResolutionStatus::Pending
            && !by_conflict.contains_key(&conflict.id.0)
        {
            return Err(AdjudicationError::MissingAdjudication(conflict.id.0));
        }
    }

    for conflict in &mut ledger.conflicts {
        let Some(adjudication) = by_conflict.get(&conflict.id.0) else {
            continue;
        };
        conflict.status = ResolutionStatus::Resolved;
        if !adjudication.notes.is_empty() {
            conflict.notes = Some(adjudication.notes.clone());
        }
        for (faction, entry) in &mut conflict.factions {
            entry.outcome = adjudication.outcome_for(faction.0);
        }
        for (piece, entry) in &conflict.pieces {
            let Some(outcome) = adjudication.outcome_for(entry.faction.0) else {
                continue;
            };
            let Some(roll) = rolls.get_mut(*piece) else {
                continue;
            };
            match outcome {
                ConflictOutcome::Loss => {
                    if roll.forced != Some(Forced::Voided) {
                        roll.forced = Some(Forced::Fail);
                    }
                }
                ConflictOutcome::Draw => {
                    roll.draw_adjustment = -draw_penalty;
                }
                ConflictOutcome::Win => {}
            }
        }
    }
    Ok(())
}
