//! End-to-end rulings: the canonical table situations, driven through the
//! full pipeline with the shared scenario seed.

mod common;

use common::{agent_sheet, resolve_turn, SCENARIO_SEED};
use engine_contracts::{
    ActionEffect, Adjudication, DecayCause, OutcomeTier, ResolutionStatus, TaskKind,
};
use engine_core::{
    Assignment, BeginOutcome, District, DistrictId, EngineConfig, Faction, FactionId, Piece,
    PieceId, Task, TurnDriver, WorldState,
};

fn lone_district_world() -> WorldState {
    let mut world = WorldState::new();
    world.set_turn(1);
    world
        .insert_district(District::new(DistrictId(0), "Docks"))
        .unwrap();
    world
}

fn no_decay() -> EngineConfig {
    EngineConfig::from_json_str(r#"{ "decay": { "base_chance": 0.0 } }"#).unwrap()
}

fn conservation_holds(world: &WorldState) {
    for district_id in world.district_ids() {
        let district = world.district(district_id).unwrap();
        let total: u16 = district
            .influence_map()
            .values()
            .map(|v| u16::from(*v))
            .sum();
        assert!(total <= 10);
        assert_eq!(u16::from(district.pool()) + total, 10);
    }
}

/// S1: a lone faction working an open district at DC 11.
#[test]
fn clean_gain_against_an_open_pool() {
    let mut world = lone_district_world();
    world
        .insert_faction(Faction::new(FactionId(0), "Crimson Veil"))
        .unwrap();
    // +3 likeability cancels the empty-footprint band: DC lands at 11.
    world
        .set_likeability(DistrictId(0), FactionId(0), 3)
        .unwrap();
    world
        .insert_piece(Piece::agent(PieceId(0), FactionId(0), agent_sheet(2, 1)))
        .unwrap();
    world.place_piece(PieceId(0), Some(DistrictId(0))).unwrap();

    let assignments = vec![Assignment {
        piece: PieceId(0),
        district: DistrictId(0),
        task: Task::InfluenceGain,
        manual_modifier: 0,
    }];
    let (transition, world) = resolve_turn(no_decay(), world, assignments, SCENARIO_SEED);

    assert_eq!(transition.rolls.len(), 1);
    let roll = &transition.rolls[0];
    assert_eq!(roll.dc, Some(11));
    assert_eq!(roll.total, i32::from(roll.die) + roll.check_bonus);
    assert_eq!(roll.check_bonus, 3);

    let influence = world
        .district(DistrictId(0))
        .unwrap()
        .influence(FactionId(0));
    let outcome = transition
        .outcomes
        .iter()
        .find(|o| o.piece == 0)
        .expect("gain resolved");
    match roll.outcome.expect("gain has a DC") {
        OutcomeTier::Success => {
            assert_eq!(influence, 1);
            assert_eq!(world.district(DistrictId(0)).unwrap().pool(), 9);
            assert_eq!(
                outcome.effect,
                ActionEffect::Influence {
                    faction_delta: 1,
                    target_delta: 0
                }
            );
        }
        OutcomeTier::CriticalSuccess => assert!((1..=2).contains(&influence)),
        OutcomeTier::Failure => {
            assert_eq!(influence, 0);
            assert_eq!(outcome.effect, ActionEffect::NoEffect);
        }
        OutcomeTier::CriticalFailure => {
            // Nothing to lose at zero footing.
            assert_eq!(influence, 0);
            assert_eq!(outcome.effect, ActionEffect::NoEffect);
        }
    }
    conservation_holds(&world);
}

/// S2: two factions race a pool of 2; the contention order decides who
/// walks away empty.
#[test]
fn contested_gains_share_a_small_pool() {
    let mut world = lone_district_world();
    for (id, name) in [(0, "Crimson Veil"), (1, "Gilded Hand"), (2, "Ash Wardens")] {
        world
            .insert_faction(Faction::new(FactionId(id), name))
            .unwrap();
    }
    world
        .set_influence(DistrictId(0), FactionId(2), 8)
        .unwrap();
    for (piece, faction) in [(0u32, 0u32), (1, 1)] {
        world
            .insert_piece(Piece::agent(
                PieceId(piece),
                FactionId(faction),
                agent_sheet(3, 2),
            ))
            .unwrap();
        world
            .place_piece(PieceId(piece), Some(DistrictId(0)))
            .unwrap();
    }
    let assignments = vec![
        Assignment {
            piece: PieceId(0),
            district: DistrictId(0),
            task: Task::InfluenceGain,
            manual_modifier: 0,
        },
        Assignment {
            piece: PieceId(1),
            district: DistrictId(0),
            task: Task::InfluenceGain,
            manual_modifier: 0,
        },
    ];
    let (transition, world) = resolve_turn(no_decay(), world, assignments, SCENARIO_SEED);

    let district = world.district(DistrictId(0)).unwrap();
    let granted = district.influence(FactionId(0)) + district.influence(FactionId(1));
    assert!(granted <= 2, "pool of 2 cannot hand out {granted}");
    assert_eq!(district.pool(), 2 - granted);

    // Anyone who succeeded but got nothing must have hit an empty pool.
    for outcome in transition
        .outcomes
        .iter()
        .filter(|o| o.task == TaskKind::InfluenceGain)
    {
        if outcome.effect == ActionEffect::PoolExhausted {
            assert_eq!(district.pool(), 0);
        }
    }
    conservation_holds(&world);
}

/// S3: hostile take. The relationship rebate and targeting surcharge both
/// land in the DC.
#[test]
fn take_against_a_hot_war_rival() {
    let mut world = lone_district_world();
    world
        .insert_faction(Faction::new(FactionId(0), "Crimson Veil"))
        .unwrap();
    world
        .insert_faction(Faction::new(FactionId(1), "Gilded Hand"))
        .unwrap();
    world
        .set_relationship(FactionId(0), FactionId(1), -2)
        .unwrap();
    world
        .set_influence(DistrictId(0), FactionId(1), 4)
        .unwrap();
    world
        .insert_piece(Piece::agent(PieceId(0), FactionId(0), agent_sheet(3, 2)))
        .unwrap();
    world.place_piece(PieceId(0), Some(DistrictId(0))).unwrap();

    let assignments = vec![Assignment {
        piece: PieceId(0),
        district: DistrictId(0),
        task: Task::InfluenceTake {
            target: FactionId(1),
        },
        manual_modifier: 0,
    }];
    let (transition, world) = resolve_turn(no_decay(), world, assignments, SCENARIO_SEED);

    let roll = &transition.rolls[0];
    // 11 + 3 (no footing) + 3 (take) - 2 (hot war) = 15.
    assert_eq!(roll.dc, Some(15));

    let district = world.district(DistrictId(0)).unwrap();
    let taken = 4 - district.influence(FactionId(1));
    let gained = district.influence(FactionId(0));
    match roll.outcome.unwrap() {
        OutcomeTier::CriticalSuccess => {
            assert!((1..=2).contains(&taken));
            assert!(gained >= taken, "critical takes never gain less than they strip");
        }
        OutcomeTier::Success => assert!(taken <= 1 && gained == taken),
        OutcomeTier::Failure => assert_eq!(taken, 0),
        OutcomeTier::CriticalFailure => {
            // Backfire can only hand the rival a point.
            assert!(district.influence(FactionId(1)) >= 4);
        }
    }
    conservation_holds(&world);
}

/// S4: saturation decay at a full district strips exactly one point, and
/// the heavy holder eats it most often.
#[test]
fn saturation_decay_prefers_the_heavy_holder() {
    let saturated_world = || {
        let mut world = lone_district_world();
        world
            .insert_faction(Faction::new(FactionId(0), "Crimson Veil"))
            .unwrap();
        world
            .insert_faction(Faction::new(FactionId(1), "Gilded Hand"))
            .unwrap();
        world
            .set_influence(DistrictId(0), FactionId(0), 8)
            .unwrap();
        world
            .set_influence(DistrictId(0), FactionId(1), 2)
            .unwrap();
        world
    };
    let forced = || {
        EngineConfig::from_json_str(
            r#"{ "decay": { "base_chance": 0.0, "saturation_at_ten": 1.0 } }"#,
        )
        .unwrap()
    };

    let mut heavy_losses = 0u32;
    let mut light_losses = 0u32;
    for seed in 0..200u64 {
        let (transition, world) = resolve_turn(forced(), saturated_world(), vec![], seed);
        let saturation: Vec<_> = transition
            .decay
            .iter()
            .filter(|event| event.cause == DecayCause::Saturation)
            .collect();
        assert_eq!(saturation.len(), 1, "exactly one point lost per turn");
        assert_eq!(saturation[0].delta, -1);
        assert_eq!(world.district(DistrictId(0)).unwrap().total_influence(), 9);
        match saturation[0].faction {
            0 => heavy_losses += 1,
            1 => light_losses += 1,
            other => panic!("unknown faction {other} decayed"),
        }
    }
    assert_eq!(heavy_losses + light_losses, 200);
    assert!(
        heavy_losses > light_losses,
        "8:2 weighting should bleed the heavy holder more often \
         ({heavy_losses} vs {light_losses})"
    );
}

/// S6: a manual conflict suspends the turn; the loser's action is forced
/// to fail no matter what it rolled.
#[test]
fn manual_conflict_pause_resume_and_forced_failure() {
    let mut world = lone_district_world();
    world
        .insert_faction(Faction::new(FactionId(0), "Crimson Veil"))
        .unwrap();
    world
        .insert_faction(Faction::new(FactionId(1), "Gilded Hand"))
        .unwrap();
    world
        .set_influence(DistrictId(0), FactionId(1), 2)
        .unwrap();
    world
        .insert_piece(Piece::agent(PieceId(0), FactionId(0), agent_sheet(2, 2)))
        .unwrap();
    world
        .insert_piece(Piece::agent(PieceId(1), FactionId(1), agent_sheet(2, 2)))
        .unwrap();
    world.place_piece(PieceId(0), Some(DistrictId(0))).unwrap();
    world.place_piece(PieceId(1), Some(DistrictId(0))).unwrap();

    let assignments = vec![
        Assignment {
            piece: PieceId(0),
            district: DistrictId(0),
            task: common::initiate_task(1),
            manual_modifier: 0,
        },
        Assignment {
            piece: PieceId(1),
            district: DistrictId(0),
            task: Task::InfluenceGain,
            manual_modifier: 10,
        },
    ];

    let mut driver = TurnDriver::new(no_decay());
    let bundle = match driver.begin(world, assignments, SCENARIO_SEED).unwrap() {
        BeginOutcome::Paused(bundle) => bundle,
        BeginOutcome::Complete(_) => panic!("the initiate task must suspend the turn"),
    };
    assert_eq!(bundle.conflicts.len(), 1);
    let conflict = &bundle.conflicts[0];
    assert_eq!(conflict.pieces.len(), 2);

    let transition = driver
        .resume(&[Adjudication {
            conflict: conflict.id,
            winners: vec![0],
            losers: vec![1],
            drawers: vec![],
            notes: "the veil holds the quay".into(),
        }])
        .unwrap();

    assert_eq!(transition.conflicts[0].status, ResolutionStatus::Resolved);
    let loser = transition
        .outcomes
        .iter()
        .find(|o| o.piece == 1)
        .expect("loser resolved");
    assert_eq!(loser.effect, ActionEffect::ForcedFailure);
    assert_eq!(loser.tier, Some(OutcomeTier::Failure));

    let initiator = transition
        .outcomes
        .iter()
        .find(|o| o.piece == 0)
        .expect("initiator resolved");
    assert_eq!(initiator.task, TaskKind::InitiateConflict);
    assert_eq!(initiator.effect, ActionEffect::NoEffect);

    let world = driver.take_world().unwrap();
    assert_eq!(
        world.district(DistrictId(0)).unwrap().influence(FactionId(1)),
        2,
        "a forced failure moves nothing, even on a high roll"
    );
    conservation_holds(&world);
}
