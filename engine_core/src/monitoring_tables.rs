//! Seven-tier probability tables for the monitoring machine.
//!
//! Base values come straight from the ruleset; within a tier the roll
//! nudges them linearly (detection and exact-accuracy rise, the phantom
//! rate falls). The sampling helpers take a [`Stream`] so every draw
//! stays on the caller's substream.

use engine_contracts::QualityTier;

use crate::rng::Stream;

/// Raise a probability strictly inside (0, 1) by `offset * per_point`.
pub fn scale_up(base: f64, offset: i32, per_point: f64) -> f64 {
    if base <= 0.0 || base >= 1.0 {
        base
    } else {
        (base + f64::from(offset) * per_point).clamp(0.0, 1.0)
    }
}

/// Lower a probability strictly inside (0, 1) by `offset * per_point`.
pub fn scale_down(base: f64, offset: i32, per_point: f64) -> f64 {
    if base <= 0.0 || base >= 1.0 {
        base
    } else {
        (base - f64::from(offset) * per_point).clamp(0.0, 1.0)
    }
}

/// Chance of spotting a faction holding `influence` points.
pub fn detection_chance(tier: QualityTier, influence: u8) -> f64 {
    use QualityTier::*;
    match tier {
        Legendary | Exceptional => 1.0,
        VeryGood => match influence {
            0 => 0.0,
            1 => 0.95,
            _ => 1.0,
        },
        Good => match influence {
            0 => 0.0,
            1 => 0.75,
            2 | 3 => 0.90,
            _ => 1.0,
        },
        Average => match influence {
            0 | 1 => 0.0,
            2 => 0.60,
            3..=5 => 0.80,
            _ => 0.95,
        },
        Poor => match influence {
            0 | 1 => 0.0,
            2 | 3 => 0.50,
            4..=6 => 0.70,
            _ => 0.90,
        },
        VeryPoor => match influence {
            0..=2 => 0.0,
            3 | 4 => 0.40,
            5..=7 => 0.60,
            _ => 0.80,
        },
        Abysmal => match influence {
            0..=3 => 0.0,
            4 | 5 => 0.20,
            6..=8 => 0.40,
            _ => 0.60,
        },
    }
}

fn signed_error(stream: &mut Stream, magnitude: i32) -> i32 {
    if stream.chance(0.5) {
        magnitude
    } else {
        -magnitude
    }
}

fn clamp_perceived(value: i32) -> u8 {
    value.clamp(1, 10) as u8
}

/// Chance that a low tier reports high influence as low (and vice versa).
pub fn inversion_chance(tier: QualityTier) -> f64 {
    match tier {
        QualityTier::Poor => 0.40,
        QualityTier::VeryPoor => 0.60,
        _ => 0.0,
    }
}

/// Sample the perceived influence for a detected faction. `exact_bonus`
/// is the within-tier scaling already multiplied out; it comes out of
/// the widest error bucket.
pub fn sample_perceived(
    tier: QualityTier,
    actual: u8,
    exact_bonus: f64,
    stream: &mut Stream,
) -> u8 {
    use QualityTier::*;
    let actual_i = i32::from(actual);

    // Low tiers may invert the reading outright before magnitude errors.
    if stream.chance(inversion_chance(tier)) {
        if actual >= 6 {
            return stream.range(1, 4) as u8;
        }
        if actual <= 4 {
            return stream.range(6, 10) as u8;
        }
    }

    match tier {
        Legendary => actual,
        Exceptional => {
            if stream.chance(0.90 + exact_bonus) {
                actual
            } else {
                clamp_perceived(actual_i + signed_error(stream, 1))
            }
        }
        VeryGood => {
            let exact = match actual {
                a if a >= 5 => 0.80,
                2..=4 => 0.75,
                _ => 0.70,
            };
            if stream.chance(exact + exact_bonus) {
                actual
            } else if actual == 1 {
                // A lone point can only be overread.
                2
            } else {
                clamp_perceived(actual_i + signed_error(stream, 1))
            }
        }
        Good => {
            let (exact, small) = match actual {
                a if a >= 5 => (0.65, 0.30),
                2..=4 => (0.55, 0.35),
                _ => (0.45, 0.45),
            };
            let draw = stream.fraction();
            if draw < exact + exact_bonus {
                actual
            } else if draw < exact + exact_bonus + small {
                clamp_perceived(actual_i + signed_error(stream, 1))
            } else {
                clamp_perceived(actual_i + signed_error(stream, 2))
            }
        }
        Average => {
            let (exact, small, medium) = match actual {
                a if a >= 6 => (0.40, 0.35, 0.20),
                3..=5 => (0.30, 0.40, 0.25),
                _ => (0.20, 0.45, 0.30),
            };
            let draw = stream.fraction();
            if draw < exact + exact_bonus {
                actual
            } else if draw < exact + exact_bonus + small {
                clamp_perceived(actual_i + signed_error(stream, 1))
            } else if draw < exact + exact_bonus + small + medium {
                clamp_perceived(actual_i + signed_error(stream, 2))
            } else {
                clamp_perceived(actual_i + signed_error(stream, 3))
            }
        }
        Poor => {
            let (exact, small) = match actual {
                a if a >= 7 => (0.20, 0.30),
                4..=6 => (0.10, 0.30),
                _ => (0.05, 0.25),
            };
            let draw = stream.fraction();
            if draw < exact + exact_bonus {
                actual
            } else if draw < exact + exact_bonus + small {
                clamp_perceived(actual_i + stream.range(-2, 2))
            } else {
                clamp_perceived(actual_i + stream.range(-4, 4))
            }
        }
        VeryPoor => {
            let draw = stream.fraction();
            if draw < 0.05 + exact_bonus {
                actual
            } else if draw < 0.20 + exact_bonus {
                clamp_perceived(actual_i + stream.range(-2, 2))
            } else if draw < 0.50 + exact_bonus {
                clamp_perceived(actual_i + stream.range(-4, 4))
            } else {
                clamp_perceived(actual_i + stream.range(-5, 5))
            }
        }
        Abysmal => {
            if stream.chance(0.05) {
                clamp_perceived(actual_i + stream.range(-3, 3))
            } else if stream.chance(0.15) {
                clamp_perceived(actual_i + stream.range(-5, 5))
            } else {
                stream.range(1, 10) as u8
            }
        }
    }
}

/// Base chance of at least one phantom faction appearing in a report.
pub fn phantom_chance(tier: QualityTier) -> f64 {
    use QualityTier::*;
    match tier {
        Legendary | Exceptional => 0.0,
        VeryGood => 0.05,
        Good => 0.15,
        Average => 0.25,
        Poor => 0.35,
        VeryPoor => 0.45,
        Abysmal => 0.60,
    }
}

/// Weight multiplier for phantom candidates seen in adjacent districts.
pub fn adjacency_multiplier(tier: QualityTier) -> f64 {
    use QualityTier::*;
    match tier {
        VeryGood => 2.0,
        Good => 3.0,
        Average => 2.0,
        Poor => 1.5,
        VeryPoor => 1.1,
        _ => 1.0,
    }
}

pub fn sample_phantom_count(stream: &mut Stream) -> u8 {
    let draw = stream.fraction();
    if draw < 0.70 {
        1
    } else if draw < 0.95 {
        2
    } else {
        3
    }
}

pub fn sample_phantom_value(tier: QualityTier, stream: &mut Stream) -> u8 {
    use QualityTier::*;
    match tier {
        VeryGood => {
            if stream.chance(0.80) {
                1
            } else {
                2
            }
        }
        Good => {
            let draw = stream.fraction();
            if draw < 0.70 {
                1
            } else if draw < 0.95 {
                2
            } else {
                3
            }
        }
        Average => {
            let draw = stream.fraction();
            if draw < 0.50 {
                1
            } else if draw < 0.80 {
                2
            } else if draw < 0.95 {
                3
            } else {
                4
            }
        }
        Poor => {
            let draw = stream.fraction();
            if draw < 0.60 {
                stream.range(1, 2) as u8
            } else if draw < 0.90 {
                stream.range(3, 4) as u8
            } else {
                stream.range(5, 6) as u8
            }
        }
        VeryPoor => {
            let draw = stream.fraction();
            if draw < 0.50 {
                stream.range(1, 3) as u8
            } else if draw < 0.90 {
                stream.range(4, 6) as u8
            } else {
                stream.range(7, 8) as u8
            }
        }
        Abysmal => stream.range(1, 10) as u8,
        Legendary | Exceptional => 1,
    }
}

pub fn stronghold_correct_chance(tier: QualityTier) -> f64 {
    use QualityTier::*;
    match tier {
        Legendary | Exceptional => 1.0,
        VeryGood => 0.95,
        Good => 0.85,
        Average => 0.70,
        Poor => 0.50,
        VeryPoor => 0.30,
        Abysmal => 0.20,
    }
}

pub fn stronghold_false_chance(tier: QualityTier) -> f64 {
    use QualityTier::*;
    match tier {
        Poor => 0.10,
        VeryPoor => 0.25,
        Abysmal => 0.40,
        _ => 0.0,
    }
}

/// (exact, direction-only) discovery chances for a non-zero modifier of
/// the given magnitude, keyed by the raw roll.
pub fn dc_discovery_chances(magnitude: u8, roll: i32) -> (f64, f64) {
    if magnitude >= 2 {
        if roll >= 15 {
            (1.0, 0.0)
        } else if roll >= 10 {
            (0.60, 0.30)
        } else if roll >= 5 {
            (0.0, 0.40)
        } else if roll >= 1 {
            (0.0, 0.20)
        } else {
            (0.0, 0.10)
        }
    } else if roll >= 30 {
        (1.0, 0.0)
    } else if roll >= 25 {
        (0.95, 0.05)
    } else if roll >= 20 {
        (0.90, 0.10)
    } else if roll >= 15 {
        (0.70, 0.20)
    } else if roll >= 10 {
        (0.40, 0.40)
    } else if roll >= 5 {
        (0.0, 0.20)
    } else if roll >= 1 {
        (0.0, 0.10)
    } else {
        (0.0, 0.05)
    }
}

/// Chance of correctly reporting "no modifier" when the walk sits at 0.
pub fn zero_modifier_exact_chance(roll: i32) -> f64 {
    if roll >= 30 {
        0.95
    } else if roll >= 25 {
        0.85
    } else if roll >= 20 {
        0.70
    } else if roll >= 15 {
        0.50
    } else if roll >= 10 {
        0.30
    } else if roll >= 5 {
        0.15
    } else if roll >= 1 {
        0.05
    } else {
        0.0
    }
}

/// Chance a direction-only reading points the wrong way.
pub fn false_direction_chance(roll: i32) -> f64 {
    if roll >= 15 {
        0.0
    } else if roll >= 10 {
        0.05
    } else if roll >= 5 {
        0.15
    } else if roll >= 1 {
        0.30
    } else {
        0.50
    }
}

pub fn confidence_base(roll: i32) -> u8 {
    if roll >= 30 {
        10
    } else if roll >= 25 {
        9
    } else if roll >= 20 {
        8
    } else if roll >= 15 {
        7
    } else if roll >= 10 {
        5
    } else if roll >= 5 {
        3
    } else if roll >= 1 {
        2
    } else {
        1
    }
}

/// Inclusive error-magnitude bounds applied to the confidence base.
pub fn confidence_error_bounds(roll: i32) -> (i32, i32) {
    if roll >= 20 {
        (0, 0)
    } else if roll >= 15 {
        (0, 1)
    } else if roll >= 10 {
        (0, 2)
    } else if roll >= 5 {
        (1, 3)
    } else if roll >= 1 {
        (2, 4)
    } else {
        (3, 5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::{PhaseTag, StreamKey, TurnRng};

    fn stream(salt: u32) -> Stream {
        TurnRng::new(0xA5A5_A5A5, 1).stream(StreamKey::new(PhaseTag::Monitoring).salt(salt))
    }

    #[test]
    fn detection_table_spot_checks() {
        assert_eq!(detection_chance(QualityTier::Legendary, 1), 1.0);
        assert_eq!(detection_chance(QualityTier::VeryGood, 1), 0.95);
        assert_eq!(detection_chance(QualityTier::Good, 1), 0.75);
        assert_eq!(detection_chance(QualityTier::Good, 3), 0.90);
        assert_eq!(detection_chance(QualityTier::Average, 1), 0.0);
        assert_eq!(detection_chance(QualityTier::Poor, 5), 0.70);
        assert_eq!(detection_chance(QualityTier::VeryPoor, 2), 0.0);
        assert_eq!(detection_chance(QualityTier::Abysmal, 9), 0.60);
    }

    #[test]
    fn within_tier_scaling_matches_the_worked_example() {
        // Roll 17 in Good: influence 1 detects at 0.75 + 2 * 0.02.
        let offset = QualityTier::Good.band_offset(17);
        let scaled = scale_up(detection_chance(QualityTier::Good, 1), offset, 0.02);
        assert!((scaled - 0.79).abs() < 1e-9);
        // Saturated entries do not scale.
        assert_eq!(scale_up(1.0, offset, 0.02), 1.0);
        assert_eq!(scale_up(0.0, offset, 0.02), 0.0);
    }

    #[test]
    fn perceived_values_stay_in_bounds() {
        for (salt, tier) in [
            (0, QualityTier::Abysmal),
            (1, QualityTier::VeryPoor),
            (2, QualityTier::Poor),
            (3, QualityTier::Average),
            (4, QualityTier::Good),
            (5, QualityTier::VeryGood),
            (6, QualityTier::Exceptional),
        ] {
            let mut stream = stream(salt);
            for actual in 1..=10u8 {
                for _ in 0..40 {
                    let value = sample_perceived(tier, actual, 0.0, &mut stream);
                    assert!((1..=10).contains(&value), "{tier:?} produced {value}");
                }
            }
        }
    }

    #[test]
    fn legendary_is_always_exact() {
        let mut stream = stream(7);
        for actual in 1..=10u8 {
            assert_eq!(
                sample_perceived(QualityTier::Legendary, actual, 0.0, &mut stream),
                actual
            );
        }
    }

    #[test]
    fn phantom_values_respect_tier_ceilings() {
        let mut stream = stream(8);
        for _ in 0..100 {
            assert!(sample_phantom_value(QualityTier::VeryGood, &mut stream) <= 2);
            assert!(sample_phantom_value(QualityTier::Good, &mut stream) <= 3);
            assert!(sample_phantom_value(QualityTier::Average, &mut stream) <= 4);
            assert!(sample_phantom_value(QualityTier::Poor, &mut stream) <= 6);
            assert!(sample_phantom_value(QualityTier::VeryPoor, &mut stream) <= 8);
            assert!(sample_phantom_value(QualityTier::Abysmal, &mut stream) <= 10);
        }
    }

    #[test]
    fn phantom_count_distribution_shape() {
        let mut stream = stream(9);
        let mut seen = [0u32; 4];
        for _ in 0..600 {
            seen[usize::from(sample_phantom_count(&mut stream))] += 1;
        }
        assert_eq!(seen[0], 0);
        assert!(seen[1] > seen[2]);
        assert!(seen[2] > seen[3]);
    }

    #[test]
    fn dc_discovery_bands() {
        assert_eq!(dc_discovery_chances(2, 16), (1.0, 0.0));
        assert_eq!(dc_discovery_chances(2, 11), (0.60, 0.30));
        assert_eq!(dc_discovery_chances(1, 22), (0.90, 0.10));
        assert_eq!(dc_discovery_chances(1, 7), (0.0, 0.20));
        assert!((zero_modifier_exact_chance(17) - 0.50).abs() < f64::EPSILON);
        assert!((false_direction_chance(3) - 0.30).abs() < f64::EPSILON);
        assert_eq!(false_direction_chance(15), 0.0);
    }

    #[test]
    fn confidence_bands() {
        assert_eq!(confidence_base(31), 10);
        assert_eq!(confidence_base(17), 7);
        assert_eq!(confidence_base(12), 5);
        assert_eq!(confidence_base(-3), 1);
        assert_eq!(confidence_error_bounds(21), (0, 0));
        assert_eq!(confidence_error_bounds(8), (1, 3));
    }
}
