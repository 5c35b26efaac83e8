#![allow(dead_code)]

use engine_contracts::{Adjudication, PauseBundle, TurnTransition};
use engine_core::{
    AgentSheet, Aptitude, AptitudeBlock, Assignment, Attribute, AttributeBlock, BeginOutcome,
    CheckSpec, District, DistrictId, EngineConfig, Faction, FactionId, Piece, PieceId, Rumor,
    RumorId, Skill, SkillBlock, SquadronSheet, Task, TurnDriver, WorldState,
};

pub const SCENARIO_SEED: u64 = 0xA5A5_A5A5;

pub fn agent_sheet(attribute: u8, skill: u8) -> AgentSheet {
    AgentSheet {
        attributes: AttributeBlock {
            might: attribute,
            finesse: attribute,
            presence: attribute,
            intellect: attribute,
            resolve: attribute,
        },
        skills: SkillBlock {
            infiltration: skill,
            persuasion: skill,
            streetwise: skill,
            observation: skill,
            intimidation: skill,
            larceny: skill,
            lore: skill,
        },
    }
}

pub fn squadron_sheet(mobility: u8, monitoring: i8) -> SquadronSheet {
    SquadronSheet {
        mobility,
        aptitudes: AptitudeBlock {
            monitoring,
            patrol: 1,
            ..AptitudeBlock::default()
        },
    }
}

/// Three districts, four factions, six pieces: enough of a campaign to
/// exercise every phase.
pub fn campaign_world() -> WorldState {
    let mut world = WorldState::new();
    world.set_turn(1);

    for (id, name) in [(0, "Docks"), (1, "Market"), (2, "Spires")] {
        world
            .insert_district(District::new(DistrictId(id), name))
            .unwrap();
    }
    world.add_adjacency(DistrictId(0), DistrictId(1)).unwrap();
    world.add_adjacency(DistrictId(1), DistrictId(2)).unwrap();

    for (id, name, bonus) in [
        (0, "Crimson Veil", 1),
        (1, "Gilded Hand", 0),
        (2, "Ash Wardens", 0),
        (3, "Lantern Court", 2),
    ] {
        let mut faction = Faction::new(FactionId(id), name);
        faction.monitoring_bonus = bonus;
        world.insert_faction(faction).unwrap();
    }

    world.set_relationship(FactionId(0), FactionId(1), -2).unwrap();
    world.set_relationship(FactionId(0), FactionId(2), -1).unwrap();
    world.set_relationship(FactionId(1), FactionId(3), 2).unwrap();
    world.set_support(FactionId(3), FactionId(1), true).unwrap();

    world.set_influence(DistrictId(0), FactionId(0), 4).unwrap();
    world.set_influence(DistrictId(0), FactionId(1), 3).unwrap();
    world.set_influence(DistrictId(1), FactionId(1), 2).unwrap();
    world.set_influence(DistrictId(1), FactionId(2), 5).unwrap();
    world.set_influence(DistrictId(2), FactionId(3), 6).unwrap();
    world.set_stronghold(DistrictId(0), FactionId(0), true).unwrap();
    world.set_stronghold(DistrictId(2), FactionId(3), true).unwrap();

    world.set_likeability(DistrictId(0), FactionId(0), 2).unwrap();
    world.set_likeability(DistrictId(0), FactionId(1), -1).unwrap();
    world.set_likeability(DistrictId(1), FactionId(2), 1).unwrap();

    world
        .add_rumor(
            DistrictId(0),
            Rumor {
                id: RumorId(0),
                dc: 12,
                newspaper_weight: 2.0,
            },
        )
        .unwrap();
    world
        .add_rumor(
            DistrictId(1),
            Rumor {
                id: RumorId(1),
                dc: 6,
                newspaper_weight: 1.0,
            },
        )
        .unwrap();

    for (id, faction, district, sheet) in [
        (0u32, 0u32, 0u32, agent_sheet(3, 2)),
        (2, 1, 0, agent_sheet(2, 1)),
        (4, 2, 1, agent_sheet(1, 3)),
    ] {
        world
            .insert_piece(Piece::agent(PieceId(id), FactionId(faction), sheet))
            .unwrap();
        world
            .place_piece(PieceId(id), Some(DistrictId(district)))
            .unwrap();
    }
    for (id, faction, district, sheet) in [
        (1u32, 0u32, 1u32, squadron_sheet(3, 2)),
        (3, 1, 0, squadron_sheet(2, 0)),
        (5, 3, 2, squadron_sheet(4, 1)),
    ] {
        world
            .insert_piece(Piece::squadron(PieceId(id), FactionId(faction), sheet))
            .unwrap();
        world
            .place_piece(PieceId(id), Some(DistrictId(district)))
            .unwrap();
    }

    world
}

pub fn campaign_assignments() -> Vec<Assignment> {
    vec![
        Assignment {
            piece: PieceId(0),
            district: DistrictId(0),
            task: Task::Monitor,
            manual_modifier: 0,
        },
        Assignment {
            piece: PieceId(1),
            district: DistrictId(1),
            task: Task::InfluenceGain,
            manual_modifier: 1,
        },
        Assignment {
            piece: PieceId(2),
            district: DistrictId(0),
            task: Task::InfluenceGain,
            manual_modifier: 0,
        },
        Assignment {
            piece: PieceId(4),
            district: DistrictId(1),
            task: Task::InfluenceTake {
                target: FactionId(1),
            },
            manual_modifier: 0,
        },
        Assignment {
            piece: PieceId(5),
            district: DistrictId(2),
            task: Task::Freeform {
                dc: 16,
                check: CheckSpec::squadron(Aptitude::Patrol),
                description: "sweep the spire walkways".into(),
                target: None,
            },
            manual_modifier: 0,
        },
    ]
}

/// Lowest-id enrolled faction wins, everyone else loses.
pub fn default_adjudications(bundle: &PauseBundle) -> Vec<Adjudication> {
    bundle
        .conflicts
        .iter()
        .map(|conflict| {
            let factions = conflict.enrolled_factions();
            Adjudication {
                conflict: conflict.id,
                winners: factions[..1].to_vec(),
                losers: factions[1..].to_vec(),
                drawers: vec![],
                notes: "table ruling".into(),
            }
        })
        .collect()
}

/// Drive one full turn, auto-adjudicating any pause.
pub fn resolve_turn(
    config: EngineConfig,
    world: WorldState,
    assignments: Vec<Assignment>,
    seed: u64,
) -> (TurnTransition, WorldState) {
    let mut driver = TurnDriver::new(config);
    let transition = match driver.begin(world, assignments, seed).expect("turn begins") {
        BeginOutcome::Complete(transition) => transition,
        BeginOutcome::Paused(bundle) => {
            let adjudications = default_adjudications(&bundle);
            driver.resume(&adjudications).expect("turn resumes")
        }
    };
    let world = driver.take_world().expect("world handed back");
    (transition, world)
}

pub fn initiate_task(target: u32) -> Task {
    Task::InitiateConflict {
        target: FactionId(target),
        dc: 14,
        check: CheckSpec::agent(Attribute::Might, Skill::Intimidation),
        description: "press the quarrel".into(),
    }
}
