//! Deterministic turn-resolution core for a faction-management campaign.
//!
//! One call to [`TurnDriver::begin`] advances the world through influence
//! decay, assignment intake, conflict detection, and action rolls; when
//! conflicts need a human verdict the driver suspends with a
//! [`engine_contracts::PauseBundle`] and [`TurnDriver::resume`] finishes
//! the turn (resolution, DC walk, monitoring, rumor decay). The same
//! seed, world, and assignments always produce the same
//! [`engine_contracts::TurnTransition`].

pub mod action;
pub mod assignment;
pub mod conflict;
pub mod decay;
pub mod driver;
pub mod engine_config;
pub mod monitoring;
pub mod monitoring_tables;
pub mod penalty;
pub mod resources;
pub mod rng;
pub mod store;
pub mod world;

pub use assignment::{Assignment, AssignmentError, CheckSpec, Task};
pub use driver::{BeginOutcome, TurnDriver, TurnError};
pub use engine_config::{EngineConfig, InitiateGate};
pub use store::{MemoryStore, Store};
pub use world::{
    AgentSheet, Aptitude, AptitudeBlock, Attribute, AttributeBlock, CheckProfile, District,
    DistrictId, Faction, FactionId, InvariantViolation, Piece, PieceId, PieceKind, Rumor, RumorId,
    Skill, SkillBlock, SquadronSheet, WorldChange, WorldState,
};
