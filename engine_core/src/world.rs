//! In-memory working set: districts, factions, pieces, and the constrained
//! mutators that keep their invariants intact.
//!
//! The driver owns exactly one [`WorldState`] between `begin` and turn
//! completion. Every mutation goes through a validating method and lands in
//! a pending change log; `commit` drains the log for the store, `discard`
//! rewinds to the snapshot taken at the start of the turn.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use bevy_ecs::system::Resource;
use thiserror::Error;

use engine_contracts::INFLUENCE_CAP;

macro_rules! entity_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub u32);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

entity_id!(
    /// Identifier of a district.
    DistrictId
);
entity_id!(
    /// Identifier of a faction.
    FactionId
);
entity_id!(
    /// Identifier of a piece (agent or squadron).
    PieceId
);
entity_id!(
    /// Identifier of a rumor.
    RumorId
);

/// Agent attributes, each 0..=5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribute {
    Might,
    Finesse,
    Presence,
    Intellect,
    Resolve,
}

/// Agent skills, each 0..=5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skill {
    Infiltration,
    Persuasion,
    Streetwise,
    Observation,
    Intimidation,
    Larceny,
    Lore,
}

/// Squadron aptitudes, each -3..=5 and defaulting to -1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aptitude {
    Monitoring,
    Combat,
    Patrol,
    Logistics,
    Sabotage,
    Escort,
    Suppression,
    Smuggling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AttributeBlock {
    pub might: u8,
    pub finesse: u8,
    pub presence: u8,
    pub intellect: u8,
    pub resolve: u8,
}

impl AttributeBlock {
    pub fn get(&self, attribute: Attribute) -> u8 {
        match attribute {
            Attribute::Might => self.might,
            Attribute::Finesse => self.finesse,
            Attribute::Presence => self.presence,
            Attribute::Intellect => self.intellect,
            Attribute::Resolve => self.resolve,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SkillBlock {
    pub infiltration: u8,
    pub persuasion: u8,
    pub streetwise: u8,
    pub observation: u8,
    pub intimidation: u8,
    pub larceny: u8,
    pub lore: u8,
}

impl SkillBlock {
    pub fn get(&self, skill: Skill) -> u8 {
        match skill {
            Skill::Infiltration => self.infiltration,
            Skill::Persuasion => self.persuasion,
            Skill::Streetwise => self.streetwise,
            Skill::Observation => self.observation,
            Skill::Intimidation => self.intimidation,
            Skill::Larceny => self.larceny,
            Skill::Lore => self.lore,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AptitudeBlock {
    pub monitoring: i8,
    pub combat: i8,
    pub patrol: i8,
    pub logistics: i8,
    pub sabotage: i8,
    pub escort: i8,
    pub suppression: i8,
    pub smuggling: i8,
}

impl Default for AptitudeBlock {
    fn default() -> Self {
        Self {
            monitoring: -1,
            combat: -1,
            patrol: -1,
            logistics: -1,
            sabotage: -1,
            escort: -1,
            suppression: -1,
            smuggling: -1,
        }
    }
}

impl AptitudeBlock {
    pub fn get(&self, aptitude: Aptitude) -> i8 {
        match aptitude {
            Aptitude::Monitoring => self.monitoring,
            Aptitude::Combat => self.combat,
            Aptitude::Patrol => self.patrol,
            Aptitude::Logistics => self.logistics,
            Aptitude::Sabotage => self.sabotage,
            Aptitude::Escort => self.escort,
            Aptitude::Suppression => self.suppression,
            Aptitude::Smuggling => self.smuggling,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AgentSheet {
    pub attributes: AttributeBlock,
    pub skills: SkillBlock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SquadronSheet {
    pub mobility: u8,
    pub aptitudes: AptitudeBlock,
}

impl Default for SquadronSheet {
    fn default() -> Self {
        Self {
            mobility: 0,
            aptitudes: AptitudeBlock::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PieceKind {
    Agent,
    Squadron,
}

impl fmt::Display for PieceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PieceKind::Agent => write!(f, "agent"),
            PieceKind::Squadron => write!(f, "squadron"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PieceBody {
    Agent(AgentSheet),
    Squadron(SquadronSheet),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Piece {
    pub id: PieceId,
    pub faction: FactionId,
    pub district: Option<DistrictId>,
    pub body: PieceBody,
}

impl Piece {
    pub fn agent(id: PieceId, faction: FactionId, sheet: AgentSheet) -> Self {
        Self {
            id,
            faction,
            district: None,
            body: PieceBody::Agent(sheet),
        }
    }

    pub fn squadron(id: PieceId, faction: FactionId, sheet: SquadronSheet) -> Self {
        Self {
            id,
            faction,
            district: None,
            body: PieceBody::Squadron(sheet),
        }
    }

    pub fn kind(&self) -> PieceKind {
        match self.body {
            PieceBody::Agent(_) => PieceKind::Agent,
            PieceBody::Squadron(_) => PieceKind::Squadron,
        }
    }

    pub fn agent_sheet(&self) -> Option<&AgentSheet> {
        match &self.body {
            PieceBody::Agent(sheet) => Some(sheet),
            PieceBody::Squadron(_) => None,
        }
    }

    pub fn squadron_sheet(&self) -> Option<&SquadronSheet> {
        match &self.body {
            PieceBody::Agent(_) => None,
            PieceBody::Squadron(sheet) => Some(sheet),
        }
    }
}

/// Which attribute/skill/aptitude a district rewards for a class of action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckProfile {
    pub attribute: Attribute,
    pub skill: Skill,
    pub aptitude: Aptitude,
}

impl Default for CheckProfile {
    fn default() -> Self {
        Self {
            attribute: Attribute::Presence,
            skill: Skill::Streetwise,
            aptitude: Aptitude::Patrol,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rumor {
    pub id: RumorId,
    pub dc: u8,
    pub newspaper_weight: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct District {
    pub id: DistrictId,
    pub name: String,
    pub commerce: u8,
    pub muster: u8,
    pub aristocracy: u8,
    pub monitor_profile: CheckProfile,
    pub influence_profile: CheckProfile,
    adjacent: BTreeSet<DistrictId>,
    influence: BTreeMap<FactionId, u8>,
    likeability: BTreeMap<FactionId, i8>,
    strongholds: BTreeSet<FactionId>,
    weekly_dc_modifier: i8,
    rumors: BTreeMap<RumorId, Rumor>,
}

impl District {
    pub fn new(id: DistrictId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            commerce: 0,
            muster: 0,
            aristocracy: 0,
            monitor_profile: CheckProfile {
                attribute: Attribute::Intellect,
                skill: Skill::Observation,
                aptitude: Aptitude::Monitoring,
            },
            influence_profile: CheckProfile::default(),
            adjacent: BTreeSet::new(),
            influence: BTreeMap::new(),
            likeability: BTreeMap::new(),
            strongholds: BTreeSet::new(),
            weekly_dc_modifier: 0,
            rumors: BTreeMap::new(),
        }
    }

    pub fn influence(&self, faction: FactionId) -> u8 {
        self.influence.get(&faction).copied().unwrap_or(0)
    }

    /// Factions with non-zero influence, ascending by id.
    pub fn influence_map(&self) -> &BTreeMap<FactionId, u8> {
        &self.influence
    }

    pub fn total_influence(&self) -> u8 {
        self.influence.values().sum()
    }

    pub fn pool(&self) -> u8 {
        INFLUENCE_CAP - self.total_influence()
    }

    pub fn likeability(&self, faction: FactionId) -> i8 {
        self.likeability.get(&faction).copied().unwrap_or(0)
    }

    pub fn has_stronghold(&self, faction: FactionId) -> bool {
        self.strongholds.contains(&faction)
    }

    pub fn strongholds(&self) -> impl Iterator<Item = FactionId> + '_ {
        self.strongholds.iter().copied()
    }

    pub fn weekly_dc_modifier(&self) -> i8 {
        self.weekly_dc_modifier
    }

    pub fn adjacent(&self) -> impl Iterator<Item = DistrictId> + '_ {
        self.adjacent.iter().copied()
    }

    pub fn is_adjacent_to(&self, other: DistrictId) -> bool {
        self.adjacent.contains(&other)
    }

    pub fn rumors(&self) -> impl Iterator<Item = &Rumor> {
        self.rumors.values()
    }

    pub fn rumor(&self, id: RumorId) -> Option<&Rumor> {
        self.rumors.get(&id)
    }
}

/// One faction's belief about another faction's standing in a district.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PerceivedEntry {
    pub influence: u8,
    pub stronghold: bool,
    pub updated_turn: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Faction {
    pub id: FactionId,
    pub name: String,
    pub monitoring_bonus: i8,
    relationships: BTreeMap<FactionId, i8>,
    support: BTreeSet<FactionId>,
    known_rumors: BTreeSet<RumorId>,
    perceived: BTreeMap<DistrictId, BTreeMap<FactionId, PerceivedEntry>>,
}

impl Faction {
    pub fn new(id: FactionId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            monitoring_bonus: 0,
            relationships: BTreeMap::new(),
            support: BTreeSet::new(),
            known_rumors: BTreeSet::new(),
            perceived: BTreeMap::new(),
        }
    }

    /// Relationship with another faction; unknown pairs read as neutral.
    pub fn relationship(&self, other: FactionId) -> i8 {
        self.relationships.get(&other).copied().unwrap_or(0)
    }

    pub fn relationships(&self) -> &BTreeMap<FactionId, i8> {
        &self.relationships
    }

    pub fn supports(&self, other: FactionId) -> bool {
        self.support.contains(&other)
    }

    pub fn knows_rumor(&self, rumor: RumorId) -> bool {
        self.known_rumors.contains(&rumor)
    }

    pub fn known_rumors(&self) -> impl Iterator<Item = RumorId> + '_ {
        self.known_rumors.iter().copied()
    }

    pub fn perceived(&self, district: DistrictId) -> Option<&BTreeMap<FactionId, PerceivedEntry>> {
        self.perceived.get(&district)
    }
}

/// One recorded mutation, in application order.
#[derive(Debug, Clone, PartialEq)]
pub enum WorldChange {
    Influence {
        district: DistrictId,
        faction: FactionId,
        previous: u8,
        current: u8,
    },
    WeeklyDc {
        district: DistrictId,
        previous: i8,
        current: i8,
    },
    RumorDc {
        district: DistrictId,
        rumor: RumorId,
        previous: u8,
        current: u8,
    },
    KnownRumor {
        faction: FactionId,
        rumor: RumorId,
    },
    Perceived {
        faction: FactionId,
        district: DistrictId,
        subject: FactionId,
        influence: u8,
        stronghold: bool,
        turn: u64,
    },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    #[error("district {0} is not part of the world")]
    UnknownDistrict(DistrictId),
    #[error("faction {0} is not part of the world")]
    UnknownFaction(FactionId),
    #[error("piece {0} is not part of the world")]
    UnknownPiece(PieceId),
    #[error("rumor {rumor} is not part of district {district}")]
    UnknownRumor { district: DistrictId, rumor: RumorId },
    #[error("district {0} already exists")]
    DuplicateDistrict(DistrictId),
    #[error("faction {0} already exists")]
    DuplicateFaction(FactionId),
    #[error("piece {0} already exists")]
    DuplicatePiece(PieceId),
    #[error("influence {value} for faction {faction} exceeds the per-faction cap")]
    InfluenceOutOfRange { faction: FactionId, value: u8 },
    #[error(
        "district {district} influence total {total} would exceed {INFLUENCE_CAP}"
    )]
    InfluenceOverCap { district: DistrictId, total: u16 },
    #[error("faction {faction} holds a stronghold in district {district} and cannot drop to 0 influence")]
    StrongholdWithoutInfluence {
        district: DistrictId,
        faction: FactionId,
    },
    #[error("likeability {value} outside [-5, 5]")]
    LikeabilityOutOfRange { value: i8 },
    #[error("weekly DC modifier {value} outside [-2, 2]")]
    WeeklyDcOutOfRange { value: i8 },
    #[error("relationship {value} outside [-2, 2]")]
    RelationshipOutOfRange { value: i8 },
    #[error("faction {0} cannot hold a relationship with itself")]
    SelfRelationship(FactionId),
    #[error("relationship between {a} and {b} is stored asymmetrically")]
    AsymmetricRelationship { a: FactionId, b: FactionId },
    #[error("faction {from} declares support for {to} without a +2 relationship")]
    SupportWithoutAlliance { from: FactionId, to: FactionId },
    #[error("piece {piece} is placed in unknown district {district}")]
    PiecePlacementUnknown { piece: PieceId, district: DistrictId },
    #[error("piece {0} carries a stat outside its legal range")]
    SheetOutOfRange(PieceId),
    #[error("district {0} carries a stat outside [0, 10]")]
    DistrictStatOutOfRange(DistrictId),
}

/// The bulk-loaded working set. See the module docs for the mutation model.
#[derive(Resource, Debug, Clone, Default)]
pub struct WorldState {
    turn: u64,
    districts: BTreeMap<DistrictId, District>,
    factions: BTreeMap<FactionId, Faction>,
    pieces: BTreeMap<PieceId, Piece>,
    pending: Vec<WorldChange>,
    baseline: Option<Box<WorldState>>,
}

impl WorldState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turn(&self) -> u64 {
        self.turn
    }

    pub fn set_turn(&mut self, turn: u64) {
        self.turn = turn;
    }

    pub fn advance_turn(&mut self) {
        self.turn = self.turn.wrapping_add(1);
    }

    // ---- construction -------------------------------------------------

    pub fn insert_district(&mut self, district: District) -> Result<(), InvariantViolation> {
        if self.districts.contains_key(&district.id) {
            return Err(InvariantViolation::DuplicateDistrict(district.id));
        }
        self.districts.insert(district.id, district);
        Ok(())
    }

    pub fn insert_faction(&mut self, faction: Faction) -> Result<(), InvariantViolation> {
        if self.factions.contains_key(&faction.id) {
            return Err(InvariantViolation::DuplicateFaction(faction.id));
        }
        self.factions.insert(faction.id, faction);
        Ok(())
    }

    pub fn insert_piece(&mut self, piece: Piece) -> Result<(), InvariantViolation> {
        if self.pieces.contains_key(&piece.id) {
            return Err(InvariantViolation::DuplicatePiece(piece.id));
        }
        if !self.factions.contains_key(&piece.faction) {
            return Err(InvariantViolation::UnknownFaction(piece.faction));
        }
        if let Some(district) = piece.district {
            if !self.districts.contains_key(&district) {
                return Err(InvariantViolation::PiecePlacementUnknown {
                    piece: piece.id,
                    district,
                });
            }
        }
        self.pieces.insert(piece.id, piece);
        Ok(())
    }

    pub fn add_adjacency(
        &mut self,
        a: DistrictId,
        b: DistrictId,
    ) -> Result<(), InvariantViolation> {
        if !self.districts.contains_key(&a) {
            return Err(InvariantViolation::UnknownDistrict(a));
        }
        if !self.districts.contains_key(&b) {
            return Err(InvariantViolation::UnknownDistrict(b));
        }
        if a == b {
            return Ok(());
        }
        if let Some(district) = self.districts.get_mut(&a) {
            district.adjacent.insert(b);
        }
        if let Some(district) = self.districts.get_mut(&b) {
            district.adjacent.insert(a);
        }
        Ok(())
    }

    pub fn add_rumor(
        &mut self,
        district: DistrictId,
        rumor: Rumor,
    ) -> Result<(), InvariantViolation> {
        let entry = self
            .districts
            .get_mut(&district)
            .ok_or(InvariantViolation::UnknownDistrict(district))?;
        entry.rumors.insert(rumor.id, rumor);
        Ok(())
    }

    pub fn place_piece(
        &mut self,
        piece: PieceId,
        district: Option<DistrictId>,
    ) -> Result<(), InvariantViolation> {
        if let Some(district) = district {
            if !self.districts.contains_key(&district) {
                return Err(InvariantViolation::PiecePlacementUnknown { piece, district });
            }
        }
        let entry = self
            .pieces
            .get_mut(&piece)
            .ok_or(InvariantViolation::UnknownPiece(piece))?;
        entry.district = district;
        Ok(())
    }

    // ---- read access --------------------------------------------------

    pub fn district(&self, id: DistrictId) -> Option<&District> {
        self.districts.get(&id)
    }

    pub fn districts(&self) -> impl Iterator<Item = &District> {
        self.districts.values()
    }

    pub fn district_ids(&self) -> Vec<DistrictId> {
        self.districts.keys().copied().collect()
    }

    pub fn faction(&self, id: FactionId) -> Option<&Faction> {
        self.factions.get(&id)
    }

    pub fn factions(&self) -> impl Iterator<Item = &Faction> {
        self.factions.values()
    }

    pub fn faction_ids(&self) -> Vec<FactionId> {
        self.factions.keys().copied().collect()
    }

    pub fn piece(&self, id: PieceId) -> Option<&Piece> {
        self.pieces.get(&id)
    }

    pub fn pieces(&self) -> impl Iterator<Item = &Piece> {
        self.pieces.values()
    }

    /// Pieces currently placed in `district`, ascending by id.
    pub fn pieces_in_district(&self, district: DistrictId) -> Vec<&Piece> {
        self.pieces
            .values()
            .filter(|piece| piece.district == Some(district))
            .collect()
    }

    // ---- setup-time relationship editing ------------------------------

    pub fn set_relationship(
        &mut self,
        a: FactionId,
        b: FactionId,
        value: i8,
    ) -> Result<(), InvariantViolation> {
        if a == b {
            return Err(InvariantViolation::SelfRelationship(a));
        }
        if !(-2..=2).contains(&value) {
            return Err(InvariantViolation::RelationshipOutOfRange { value });
        }
        if !self.factions.contains_key(&a) {
            return Err(InvariantViolation::UnknownFaction(a));
        }
        if !self.factions.contains_key(&b) {
            return Err(InvariantViolation::UnknownFaction(b));
        }
        if let Some(faction) = self.factions.get_mut(&a) {
            faction.relationships.insert(b, value);
            if value < 2 {
                faction.support.remove(&b);
            }
        }
        if let Some(faction) = self.factions.get_mut(&b) {
            faction.relationships.insert(a, value);
            if value < 2 {
                faction.support.remove(&a);
            }
        }
        Ok(())
    }

    pub fn set_support(
        &mut self,
        from: FactionId,
        to: FactionId,
        flag: bool,
    ) -> Result<(), InvariantViolation> {
        if from == to {
            return Err(InvariantViolation::SelfRelationship(from));
        }
        if flag {
            let relationship = self
                .factions
                .get(&from)
                .ok_or(InvariantViolation::UnknownFaction(from))?
                .relationship(to);
            if relationship != 2 {
                return Err(InvariantViolation::SupportWithoutAlliance { from, to });
            }
        }
        let faction = self
            .factions
            .get_mut(&from)
            .ok_or(InvariantViolation::UnknownFaction(from))?;
        if flag {
            faction.support.insert(to);
        } else {
            faction.support.remove(&to);
        }
        Ok(())
    }

    pub fn set_likeability(
        &mut self,
        district: DistrictId,
        faction: FactionId,
        value: i8,
    ) -> Result<(), InvariantViolation> {
        if !(-5..=5).contains(&value) {
            return Err(InvariantViolation::LikeabilityOutOfRange { value });
        }
        if !self.factions.contains_key(&faction) {
            return Err(InvariantViolation::UnknownFaction(faction));
        }
        let entry = self
            .districts
            .get_mut(&district)
            .ok_or(InvariantViolation::UnknownDistrict(district))?;
        entry.likeability.insert(faction, value);
        Ok(())
    }

    /// Stronghold flags are edited only from outside the turn pipeline.
    pub fn set_stronghold(
        &mut self,
        district: DistrictId,
        faction: FactionId,
        flag: bool,
    ) -> Result<(), InvariantViolation> {
        if !self.factions.contains_key(&faction) {
            return Err(InvariantViolation::UnknownFaction(faction));
        }
        let entry = self
            .districts
            .get_mut(&district)
            .ok_or(InvariantViolation::UnknownDistrict(district))?;
        if flag && entry.influence(faction) == 0 {
            return Err(InvariantViolation::StrongholdWithoutInfluence { district, faction });
        }
        if flag {
            entry.strongholds.insert(faction);
        } else {
            entry.strongholds.remove(&faction);
        }
        Ok(())
    }

    // ---- turn-scoped mutators -----------------------------------------

    pub fn set_influence(
        &mut self,
        district: DistrictId,
        faction: FactionId,
        value: u8,
    ) -> Result<(), InvariantViolation> {
        if value > INFLUENCE_CAP {
            return Err(InvariantViolation::InfluenceOutOfRange { faction, value });
        }
        if !self.factions.contains_key(&faction) {
            return Err(InvariantViolation::UnknownFaction(faction));
        }
        let entry = self
            .districts
            .get_mut(&district)
            .ok_or(InvariantViolation::UnknownDistrict(district))?;
        let previous = entry.influence(faction);
        let total = u16::from(entry.total_influence()) - u16::from(previous) + u16::from(value);
        if total > u16::from(INFLUENCE_CAP) {
            return Err(InvariantViolation::InfluenceOverCap {
                district,
                total,
            });
        }
        if value == 0 && entry.strongholds.contains(&faction) {
            return Err(InvariantViolation::StrongholdWithoutInfluence { district, faction });
        }
        if value == 0 {
            entry.influence.remove(&faction);
        } else {
            entry.influence.insert(faction, value);
        }
        if previous != value {
            self.pending.push(WorldChange::Influence {
                district,
                faction,
                previous,
                current: value,
            });
        }
        Ok(())
    }

    /// Influence loss with clamping at zero; used by the decay phase.
    pub fn apply_decay(
        &mut self,
        district: DistrictId,
        faction: FactionId,
        amount: u8,
    ) -> Result<u8, InvariantViolation> {
        let current = self
            .districts
            .get(&district)
            .ok_or(InvariantViolation::UnknownDistrict(district))?
            .influence(faction);
        let next = current.saturating_sub(amount);
        self.set_influence(district, faction, next)?;
        Ok(current - next)
    }

    pub fn set_weekly_dc(
        &mut self,
        district: DistrictId,
        value: i8,
    ) -> Result<(), InvariantViolation> {
        if !(-2..=2).contains(&value) {
            return Err(InvariantViolation::WeeklyDcOutOfRange { value });
        }
        let entry = self
            .districts
            .get_mut(&district)
            .ok_or(InvariantViolation::UnknownDistrict(district))?;
        let previous = entry.weekly_dc_modifier;
        entry.weekly_dc_modifier = value;
        if previous != value {
            self.pending.push(WorldChange::WeeklyDc {
                district,
                previous,
                current: value,
            });
        }
        Ok(())
    }

    pub fn set_rumor_dc(
        &mut self,
        district: DistrictId,
        rumor: RumorId,
        value: u8,
    ) -> Result<(), InvariantViolation> {
        let entry = self
            .districts
            .get_mut(&district)
            .ok_or(InvariantViolation::UnknownDistrict(district))?;
        let record = entry
            .rumors
            .get_mut(&rumor)
            .ok_or(InvariantViolation::UnknownRumor { district, rumor })?;
        let previous = record.dc;
        record.dc = value;
        if previous != value {
            self.pending.push(WorldChange::RumorDc {
                district,
                rumor,
                previous,
                current: value,
            });
        }
        Ok(())
    }

    pub fn add_known_rumor(
        &mut self,
        faction: FactionId,
        rumor: RumorId,
    ) -> Result<bool, InvariantViolation> {
        let entry = self
            .factions
            .get_mut(&faction)
            .ok_or(InvariantViolation::UnknownFaction(faction))?;
        let inserted = entry.known_rumors.insert(rumor);
        if inserted {
            self.pending.push(WorldChange::KnownRumor { faction, rumor });
        }
        Ok(inserted)
    }

    pub fn update_perceived(
        &mut self,
        faction: FactionId,
        district: DistrictId,
        subject: FactionId,
        influence: u8,
        stronghold: bool,
        turn: u64,
    ) -> Result<(), InvariantViolation> {
        if !self.districts.contains_key(&district) {
            return Err(InvariantViolation::UnknownDistrict(district));
        }
        if !self.factions.contains_key(&subject) {
            return Err(InvariantViolation::UnknownFaction(subject));
        }
        let entry = self
            .factions
            .get_mut(&faction)
            .ok_or(InvariantViolation::UnknownFaction(faction))?;
        entry.perceived.entry(district).or_default().insert(
            subject,
            PerceivedEntry {
                influence,
                stronghold,
                updated_turn: turn,
            },
        );
        self.pending.push(WorldChange::Perceived {
            faction,
            district,
            subject,
            influence,
            stronghold,
            turn,
        });
        Ok(())
    }

    /// True when at least one faction already discovered the rumor.
    pub fn rumor_discovered(&self, rumor: RumorId) -> bool {
        self.factions
            .values()
            .any(|faction| faction.known_rumors.contains(&rumor))
    }

    // ---- turn lifecycle -----------------------------------------------

    /// Snapshot the current state as the rewind point for this turn.
    pub fn begin_turn(&mut self) {
        self.pending.clear();
        let mut snapshot = self.clone();
        snapshot.baseline = None;
        snapshot.pending.clear();
        self.baseline = Some(Box::new(snapshot));
    }

    /// Drain the pending change log for persistence and drop the rewind
    /// snapshot.
    pub fn commit(&mut self) -> Vec<WorldChange> {
        self.baseline = None;
        std::mem::take(&mut self.pending)
    }

    /// Rewind to the snapshot taken by [`Self::begin_turn`].
    pub fn discard(&mut self) {
        if let Some(snapshot) = self.baseline.take() {
            *self = *snapshot;
        }
        self.pending.clear();
    }

    /// Full consistency sweep over the loaded world.
    pub fn validate(&self) -> Result<(), InvariantViolation> {
        for district in self.districts.values() {
            let total: u16 = district.influence.values().map(|v| u16::from(*v)).sum();
            if total > u16::from(INFLUENCE_CAP) {
                return Err(InvariantViolation::InfluenceOverCap {
                    district: district.id,
                    total,
                });
            }
            for (&faction, &value) in &district.influence {
                if !self.factions.contains_key(&faction) {
                    return Err(InvariantViolation::UnknownFaction(faction));
                }
                if value > INFLUENCE_CAP {
                    return Err(InvariantViolation::InfluenceOutOfRange { faction, value });
                }
            }
            for (&faction, &value) in &district.likeability {
                if !self.factions.contains_key(&faction) {
                    return Err(InvariantViolation::UnknownFaction(faction));
                }
                if !(-5..=5).contains(&value) {
                    return Err(InvariantViolation::LikeabilityOutOfRange { value });
                }
            }
            for &faction in &district.strongholds {
                if district.influence(faction) == 0 {
                    return Err(InvariantViolation::StrongholdWithoutInfluence {
                        district: district.id,
                        faction,
                    });
                }
            }
            if !(-2..=2).contains(&district.weekly_dc_modifier) {
                return Err(InvariantViolation::WeeklyDcOutOfRange {
                    value: district.weekly_dc_modifier,
                });
            }
            if district.commerce > 10 || district.muster > 10 || district.aristocracy > 10 {
                return Err(InvariantViolation::DistrictStatOutOfRange(district.id));
            }
            for &neighbor in &district.adjacent {
                let back = self
                    .districts
                    .get(&neighbor)
                    .ok_or(InvariantViolation::UnknownDistrict(neighbor))?;
                if !back.adjacent.contains(&district.id) {
                    return Err(InvariantViolation::UnknownDistrict(neighbor));
                }
            }
        }
        for faction in self.factions.values() {
            for (&other, &value) in &faction.relationships {
                if other == faction.id {
                    return Err(InvariantViolation::SelfRelationship(faction.id));
                }
                if !(-2..=2).contains(&value) {
                    return Err(InvariantViolation::RelationshipOutOfRange { value });
                }
                let mirror = self
                    .factions
                    .get(&other)
                    .ok_or(InvariantViolation::UnknownFaction(other))?;
                if mirror.relationship(faction.id) != value {
                    return Err(InvariantViolation::AsymmetricRelationship {
                        a: faction.id,
                        b: other,
                    });
                }
            }
            for &target in &faction.support {
                if faction.relationship(target) != 2 {
                    return Err(InvariantViolation::SupportWithoutAlliance {
                        from: faction.id,
                        to: target,
                    });
                }
            }
        }
        for piece in self.pieces.values() {
            if !self.factions.contains_key(&piece.faction) {
                return Err(InvariantViolation::UnknownFaction(piece.faction));
            }
            if let Some(district) = piece.district {
                if !self.districts.contains_key(&district) {
                    return Err(InvariantViolation::PiecePlacementUnknown {
                        piece: piece.id,
                        district,
                    });
                }
            }
            let sheet_ok = match &piece.body {
                PieceBody::Agent(sheet) => {
                    let attributes = [
                        sheet.attributes.might,
                        sheet.attributes.finesse,
                        sheet.attributes.presence,
                        sheet.attributes.intellect,
                        sheet.attributes.resolve,
                    ];
                    let skills = [
                        sheet.skills.infiltration,
                        sheet.skills.persuasion,
                        sheet.skills.streetwise,
                        sheet.skills.observation,
                        sheet.skills.intimidation,
                        sheet.skills.larceny,
                        sheet.skills.lore,
                    ];
                    attributes.iter().all(|v| *v <= 5) && skills.iter().all(|v| *v <= 5)
                }
                PieceBody::Squadron(sheet) => {
                    let aptitudes = [
                        sheet.aptitudes.monitoring,
                        sheet.aptitudes.combat,
                        sheet.aptitudes.patrol,
                        sheet.aptitudes.logistics,
                        sheet.aptitudes.sabotage,
                        sheet.aptitudes.escort,
                        sheet.aptitudes.suppression,
                        sheet.aptitudes.smuggling,
                    ];
                    sheet.mobility <= 5 && aptitudes.iter().all(|v| (-3..=5).contains(v))
                }
            };
            if !sheet_ok {
                return Err(InvariantViolation::SheetOutOfRange(piece.id));
            }
        }
        Ok(())
    }
}
