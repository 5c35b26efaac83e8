//! Per-piece task assignments and their intake validation.

use std::collections::BTreeMap;

use bevy_ecs::system::Resource;
use thiserror::Error;

use engine_contracts::TaskKind;

use crate::world::{
    Aptitude, Attribute, DistrictId, FactionId, PieceId, PieceKind, Skill, WorldState,
};

/// Manual task DCs must sit in this band.
pub const MANUAL_DC_MIN: i32 = 5;
pub const MANUAL_DC_MAX: i32 = 30;

/// Which check a manually-specified task rolls. Agents need an attribute
/// and a skill, squadrons an aptitude; intake enforces the pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CheckSpec {
    pub attribute: Option<Attribute>,
    pub skill: Option<Skill>,
    pub aptitude: Option<Aptitude>,
}

impl CheckSpec {
    pub fn agent(attribute: Attribute, skill: Skill) -> Self {
        Self {
            attribute: Some(attribute),
            skill: Some(skill),
            aptitude: None,
        }
    }

    pub fn squadron(aptitude: Aptitude) -> Self {
        Self {
            attribute: None,
            skill: None,
            aptitude: Some(aptitude),
        }
    }
}

/// The primary task bound to a piece for the turn.
#[derive(Debug, Clone, PartialEq)]
pub enum Task {
    Monitor,
    InfluenceGain,
    InfluenceTake {
        target: FactionId,
    },
    InitiateConflict {
        target: FactionId,
        dc: i32,
        check: CheckSpec,
        description: String,
    },
    Freeform {
        dc: i32,
        check: CheckSpec,
        description: String,
        target: Option<FactionId>,
    },
}

impl Task {
    pub fn kind(&self) -> TaskKind {
        match self {
            Task::Monitor => TaskKind::Monitor,
            Task::InfluenceGain => TaskKind::InfluenceGain,
            Task::InfluenceTake { .. } => TaskKind::InfluenceTake,
            Task::InitiateConflict { .. } => TaskKind::InitiateConflict,
            Task::Freeform { .. } => TaskKind::Freeform,
        }
    }

    pub fn target(&self) -> Option<FactionId> {
        match self {
            Task::Monitor | Task::InfluenceGain => None,
            Task::InfluenceTake { target } => Some(*target),
            Task::InitiateConflict { target, .. } => Some(*target),
            Task::Freeform { target, .. } => *target,
        }
    }

    fn manual_dc(&self) -> Option<i32> {
        match self {
            Task::InitiateConflict { dc, .. } | Task::Freeform { dc, .. } => Some(*dc),
            _ => None,
        }
    }

    fn manual_check(&self) -> Option<&CheckSpec> {
        match self {
            Task::InitiateConflict { check, .. } | Task::Freeform { check, .. } => Some(check),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub piece: PieceId,
    pub district: DistrictId,
    pub task: Task,
    pub manual_modifier: i8,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AssignmentError {
    #[error("assignment names unknown piece {0}")]
    UnknownPiece(PieceId),
    #[error("assignment names unknown district {0}")]
    UnknownDistrict(DistrictId),
    #[error("assignment names unknown faction {0}")]
    UnknownFaction(FactionId),
    #[error("piece {0} was assigned twice")]
    DuplicatePiece(PieceId),
    #[error("piece {piece} is not stationed in district {district}")]
    PieceNotInDistrict { piece: PieceId, district: DistrictId },
    #[error("manual DC {dc} outside [{MANUAL_DC_MIN}, {MANUAL_DC_MAX}]")]
    DcOutOfRange { dc: i32 },
    #[error("manual modifier {0} outside [-10, 10]")]
    ManualModifierOutOfRange(i8),
    #[error("agent task for piece {0} is missing an attribute or skill")]
    MissingAgentCheck(PieceId),
    #[error("squadron task for piece {0} is missing an aptitude")]
    MissingSquadronCheck(PieceId),
    #[error("piece {0} targets its own faction")]
    TargetIsSelf(PieceId),
}

/// Validated assignments, keyed by piece ascending.
#[derive(Resource, Debug, Default)]
pub struct AssignmentLedger {
    by_piece: BTreeMap<PieceId, Assignment>,
}

impl AssignmentLedger {
    /// Validate the raw list against the world. Every error here is fatal
    /// for the turn; nothing is accepted partially.
    pub fn from_assignments(
        world: &WorldState,
        assignments: &[Assignment],
    ) -> Result<Self, AssignmentError> {
        let mut by_piece = BTreeMap::new();
        for assignment in assignments {
            let piece = world
                .piece(assignment.piece)
                .ok_or(AssignmentError::UnknownPiece(assignment.piece))?;
            if world.district(assignment.district).is_none() {
                return Err(AssignmentError::UnknownDistrict(assignment.district));
            }
            if piece.district != Some(assignment.district) {
                return Err(AssignmentError::PieceNotInDistrict {
                    piece: assignment.piece,
                    district: assignment.district,
                });
            }
            if !(-10..=10).contains(&assignment.manual_modifier) {
                return Err(AssignmentError::ManualModifierOutOfRange(
                    assignment.manual_modifier,
                ));
            }
            if let Some(target) = assignment.task.target() {
                if world.faction(target).is_none() {
                    return Err(AssignmentError::UnknownFaction(target));
                }
                if target == piece.faction
                    && !matches!(assignment.task, Task::Freeform { .. })
                {
                    return Err(AssignmentError::TargetIsSelf(assignment.piece));
                }
            }
            if let Some(dc) = assignment.task.manual_dc() {
                if !(MANUAL_DC_MIN..=MANUAL_DC_MAX).contains(&dc) {
                    return Err(AssignmentError::DcOutOfRange { dc });
                }
            }
            if let Some(check) = assignment.task.manual_check() {
                match piece.kind() {
                    PieceKind::Agent => {
                        if check.attribute.is_none() || check.skill.is_none() {
                            return Err(AssignmentError::MissingAgentCheck(assignment.piece));
                        }
                    }
                    PieceKind::Squadron => {
                        if check.aptitude.is_none() {
                            return Err(AssignmentError::MissingSquadronCheck(assignment.piece));
                        }
                    }
                }
            }
            if by_piece
                .insert(assignment.piece, assignment.clone())
                .is_some()
            {
                return Err(AssignmentError::DuplicatePiece(assignment.piece));
            }
        }
        Ok(Self { by_piece })
    }

    pub fn get(&self, piece: PieceId) -> Option<&Assignment> {
        self.by_piece.get(&piece)
    }

    /// Assignments in piece-id order.
    pub fn iter(&self) -> impl Iterator<Item = &Assignment> {
        self.by_piece.values()
    }

    pub fn len(&self) -> usize {
        self.by_piece.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_piece.is_empty()
    }
}
