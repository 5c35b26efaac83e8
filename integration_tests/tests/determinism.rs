mod common;

use common::{campaign_assignments, campaign_world, resolve_turn, SCENARIO_SEED};
use engine_core::{DistrictId, EngineConfig, PieceId};

#[test]
fn identical_inputs_replay_identically() {
    let (first, world_a) = resolve_turn(
        EngineConfig::default(),
        campaign_world(),
        campaign_assignments(),
        SCENARIO_SEED,
    );
    let (second, world_b) = resolve_turn(
        EngineConfig::default(),
        campaign_world(),
        campaign_assignments(),
        SCENARIO_SEED,
    );

    assert_eq!(first, second);
    for district in world_a.district_ids() {
        assert_eq!(
            world_a.district(district).unwrap().influence_map(),
            world_b.district(district).unwrap().influence_map()
        );
        assert_eq!(
            world_a.district(district).unwrap().weekly_dc_modifier(),
            world_b.district(district).unwrap().weekly_dc_modifier()
        );
    }
}

#[test]
fn assignment_order_is_invisible() {
    let (forward, _) = resolve_turn(
        EngineConfig::default(),
        campaign_world(),
        campaign_assignments(),
        SCENARIO_SEED,
    );
    let mut reversed = campaign_assignments();
    reversed.reverse();
    let (backward, _) = resolve_turn(
        EngineConfig::default(),
        campaign_world(),
        reversed,
        SCENARIO_SEED,
    );
    assert_eq!(forward, backward);
}

#[test]
fn pause_and_resume_replays_identically() {
    // Force the hot-war pair in the Docks into conflict so both runs walk
    // the suspend path.
    let config = || {
        EngineConfig::from_json_str(r#"{ "conflict": { "hot_war_chance": 1.0 } }"#).unwrap()
    };
    let (first, _) = resolve_turn(
        config(),
        campaign_world(),
        campaign_assignments(),
        SCENARIO_SEED,
    );
    assert!(
        !first.conflicts.is_empty(),
        "fixture should produce a conflict"
    );
    let (second, _) = resolve_turn(
        config(),
        campaign_world(),
        campaign_assignments(),
        SCENARIO_SEED,
    );
    assert_eq!(first, second);
}

#[test]
fn consecutive_turns_replay_identically() {
    let two_turns = || {
        let (_, world) = resolve_turn(
            EngineConfig::default(),
            campaign_world(),
            campaign_assignments(),
            SCENARIO_SEED,
        );
        resolve_turn(
            EngineConfig::default(),
            world,
            campaign_assignments(),
            SCENARIO_SEED ^ 0xFF,
        )
    };
    let (first, world_a) = two_turns();
    let (second, world_b) = two_turns();
    assert_eq!(first, second);
    assert_eq!(world_a.turn(), 3);
    assert_eq!(world_b.turn(), 3);
    assert_eq!(
        world_a.district(DistrictId(0)).unwrap().influence_map(),
        world_b.district(DistrictId(0)).unwrap().influence_map()
    );
}

#[test]
fn unrelated_pieces_do_not_disturb_existing_streams() {
    // Adding an idle piece far away must not change another piece's roll.
    let (baseline, _) = resolve_turn(
        EngineConfig::default(),
        campaign_world(),
        campaign_assignments(),
        SCENARIO_SEED,
    );
    let mut world = campaign_world();
    world
        .insert_piece(engine_core::Piece::agent(
            PieceId(40),
            engine_core::FactionId(3),
            common::agent_sheet(1, 1),
        ))
        .unwrap();
    let (with_extra, _) = resolve_turn(
        EngineConfig::default(),
        world,
        campaign_assignments(),
        SCENARIO_SEED,
    );

    for roll in &baseline.rolls {
        let matching = with_extra
            .rolls
            .iter()
            .find(|r| r.piece == roll.piece)
            .expect("same piece rolls in both runs");
        assert_eq!(matching, roll);
    }
}
