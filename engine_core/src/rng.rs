//! Seeded randomness with substream derivation.
//!
//! Every probabilistic branch in the engine draws from a [`Stream`] derived
//! from the turn's master seed plus a [`StreamKey`] naming the phase and the
//! entities involved. Two turns with the same seed, world, and assignments
//! therefore replay identically, and adding or removing unrelated entities
//! cannot perturb an existing entity's draws.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Sentinel for an unused id slot in a [`StreamKey`].
pub const NO_ID: u32 = u32::MAX;

/// Pipeline phase, also the first component of every stream key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum PhaseTag {
    Preparation = 1,
    InfluenceDecay = 2,
    AssignmentIntake = 3,
    ConflictDetection = 4,
    ActionRoll = 5,
    AdjudicationApply = 6,
    ActionResolution = 7,
    DcWalk = 8,
    Monitoring = 9,
    PassiveMonitoring = 10,
    RumorDecay = 11,
    Completion = 12,
}

impl PhaseTag {
    pub fn index(self) -> u8 {
        self as u8
    }
}

/// Key selecting one substream: phase, involved entity ids, and a salt
/// distinguishing multiple draws for the same entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamKey {
    pub phase: PhaseTag,
    pub district: u32,
    pub faction: u32,
    pub piece: u32,
    pub aux: u32,
    pub salt: u32,
}

impl StreamKey {
    pub fn new(phase: PhaseTag) -> Self {
        Self {
            phase,
            district: NO_ID,
            faction: NO_ID,
            piece: NO_ID,
            aux: NO_ID,
            salt: 0,
        }
    }

    pub fn district(mut self, id: u32) -> Self {
        self.district = id;
        self
    }

    pub fn faction(mut self, id: u32) -> Self {
        self.faction = id;
        self
    }

    pub fn piece(mut self, id: u32) -> Self {
        self.piece = id;
        self
    }

    /// Secondary entity id (e.g. the faction being observed, or the piece
    /// being targeted) when the primary slots are already taken.
    pub fn aux(mut self, id: u32) -> Self {
        self.aux = id;
        self
    }

    pub fn salt(mut self, salt: u32) -> Self {
        self.salt = salt;
        self
    }
}

/// Per-turn stream factory. Stateless between calls: the same key always
/// yields the same stream.
#[derive(Debug, Clone, Copy)]
pub struct TurnRng {
    master: u64,
    turn: u64,
}

impl TurnRng {
    pub fn new(master_seed: u64, turn: u64) -> Self {
        Self {
            master: master_seed,
            turn,
        }
    }

    pub fn stream(&self, key: StreamKey) -> Stream {
        let mut state = fold(self.master, self.turn);
        state = fold(state, u64::from(key.phase.index()));
        state = fold(state, u64::from(key.district));
        state = fold(state, u64::from(key.faction));
        state = fold(state, u64::from(key.piece));
        state = fold(state, u64::from(key.aux));
        state = fold(state, u64::from(key.salt));
        Stream(SmallRng::seed_from_u64(state))
    }
}

fn fold(state: u64, value: u64) -> u64 {
    let mut mixed = state ^ value.wrapping_mul(0x9E37_79B9_7F4A_7C15);
    mixed ^= mixed.rotate_left(29);
    mixed = mixed.wrapping_mul(0x517C_C1B7_2722_0A95);
    mixed ^ (mixed >> 31)
}

/// One derived generator with the handful of draw shapes the engine uses.
#[derive(Debug)]
pub struct Stream(SmallRng);

impl Stream {
    pub fn next_u32(&mut self) -> u32 {
        self.0.gen()
    }

    /// Inclusive integer range; degenerate ranges return `lo`.
    pub fn range(&mut self, lo: i32, hi: i32) -> i32 {
        if lo >= hi {
            lo
        } else {
            self.0.gen_range(lo..=hi)
        }
    }

    pub fn d20(&mut self) -> u8 {
        self.0.gen_range(1..=20)
    }

    /// Bernoulli draw; probabilities outside [0, 1] saturate.
    pub fn chance(&mut self, p: f64) -> bool {
        if p <= 0.0 {
            false
        } else if p >= 1.0 {
            true
        } else {
            self.0.gen_bool(p)
        }
    }

    /// Uniform draw in [0, 1).
    pub fn fraction(&mut self) -> f64 {
        self.0.gen()
    }

    /// Index draw proportional to `weights`; entries that are not positive
    /// are skipped. Returns `None` when no weight is positive.
    pub fn choose_weighted(&mut self, weights: &[f64]) -> Option<usize> {
        let total: f64 = weights.iter().filter(|w| **w > 0.0).sum();
        if total <= 0.0 {
            return None;
        }
        let mut remaining = self.0.gen_range(0.0..total);
        for (index, weight) in weights.iter().enumerate() {
            if *weight <= 0.0 {
                continue;
            }
            if remaining < *weight {
                return Some(index);
            }
            remaining -= *weight;
        }
        weights.iter().rposition(|w| *w > 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_keys_replay_identically() {
        let rng = TurnRng::new(0xA5A5_A5A5, 3);
        let key = StreamKey::new(PhaseTag::ActionRoll)
            .district(2)
            .faction(1)
            .piece(7);
        let first: Vec<u32> = {
            let mut stream = rng.stream(key);
            (0..8).map(|_| stream.next_u32()).collect()
        };
        let second: Vec<u32> = {
            let mut stream = rng.stream(key);
            (0..8).map(|_| stream.next_u32()).collect()
        };
        assert_eq!(first, second);
    }

    #[test]
    fn salt_and_ids_separate_streams() {
        let rng = TurnRng::new(17, 1);
        let base = StreamKey::new(PhaseTag::Monitoring).district(0).faction(0);
        let a = rng.stream(base).next_u32();
        let b = rng.stream(base.salt(1)).next_u32();
        let c = rng.stream(base.piece(0)).next_u32();
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn turn_changes_the_stream() {
        let key = StreamKey::new(PhaseTag::InfluenceDecay).district(4);
        let a = TurnRng::new(99, 1).stream(key).next_u32();
        let b = TurnRng::new(99, 2).stream(key).next_u32();
        assert_ne!(a, b);
    }

    #[test]
    fn d20_stays_in_range() {
        let rng = TurnRng::new(5, 1);
        let mut stream = rng.stream(StreamKey::new(PhaseTag::ActionRoll));
        for _ in 0..200 {
            let roll = stream.d20();
            assert!((1..=20).contains(&roll));
        }
    }

    #[test]
    fn chance_saturates() {
        let rng = TurnRng::new(5, 1);
        let mut stream = rng.stream(StreamKey::new(PhaseTag::Monitoring));
        assert!(!stream.chance(0.0));
        assert!(stream.chance(1.0));
        assert!(!stream.chance(-0.5));
        assert!(stream.chance(1.5));
    }

    #[test]
    fn weighted_choice_skips_zero_weights() {
        let rng = TurnRng::new(5, 1);
        let mut stream = rng.stream(StreamKey::new(PhaseTag::Monitoring).salt(9));
        for _ in 0..50 {
            let picked = stream.choose_weighted(&[0.0, 1.0, 0.0]).expect("has weight");
            assert_eq!(picked, 1);
        }
        assert_eq!(stream.choose_weighted(&[0.0, 0.0]), None);
    }
}
