//! Provably-fair dice.
//!
//! Each match gets a secret seed drawn from a CSPRNG. Only `sha256(seed)` is
//! published while the match runs; every roll is a keyed hash of the seed and
//! the roll index, so once the seed is revealed anyone can recompute the full
//! sequence and check it against the commitment.

use backgammon_types::{DiceRoll, MatchId, Seed, DICE_SUFFIX, NAMESPACE, SEED_LENGTH};
use commonware_cryptography::{
    sha256::{Digest, Sha256},
    Hasher,
};
use commonware_utils::union;
use rand::{CryptoRng, RngCore};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, warn};

/// No seed is committed for the match.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("no dice seed for match {0}")]
pub struct UnknownMatch(pub MatchId);

#[inline]
fn dice_namespace() -> Vec<u8> {
    union(NAMESPACE, DICE_SUFFIX)
}

/// Commitment published for `seed`.
pub fn commit_to(seed: &Seed) -> Digest {
    Sha256::hash(seed)
}

/// Dice for `roll_index` under `seed`.
pub fn derive(seed: &Seed, roll_index: u64) -> (u8, u8) {
    let namespace = dice_namespace();
    let die = |k: u8| {
        let mut hasher = Sha256::new();
        hasher.update(&namespace);
        hasher.update(seed);
        hasher.update(&roll_index.to_be_bytes());
        hasher.update(&[k]);
        hasher.finalize().0[0] % 6 + 1
    };
    (die(0), die(1))
}

/// Recompute a roll from a revealed seed.
pub fn verify(seed: &Seed, roll_index: u64, die1: u8, die2: u8) -> bool {
    derive(seed, roll_index) == (die1, die2)
}

/// Check a revealed seed against the commitment published at match start.
pub fn verify_commitment(seed: &Seed, commitment: &Digest) -> bool {
    commit_to(seed) == *commitment
}

/// Holds the secret seed of every live match.
#[derive(Default)]
pub struct DiceService {
    seeds: HashMap<MatchId, (Seed, Digest)>,
}

impl DiceService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Draw a fresh seed for `match_id` and return its commitment.
    pub fn commit<R: RngCore + CryptoRng>(&mut self, match_id: MatchId, rng: &mut R) -> Digest {
        let mut seed = [0u8; SEED_LENGTH];
        rng.fill_bytes(&mut seed);
        let commitment = commit_to(&seed);
        if self.seeds.insert(match_id, (seed, commitment)).is_some() {
            warn!(match_id, "replaced existing dice seed");
        }
        debug!(match_id, commitment = ?commitment, "committed dice seed");
        commitment
    }

    pub fn commitment(&self, match_id: MatchId) -> Option<Digest> {
        self.seeds.get(&match_id).map(|(_, commitment)| *commitment)
    }

    /// Roll number `roll_index` of `match_id`.
    pub fn roll(&self, match_id: MatchId, roll_index: u64) -> Result<DiceRoll, UnknownMatch> {
        let (seed, commitment) = self.seeds.get(&match_id).ok_or(UnknownMatch(match_id))?;
        let (die1, die2) = derive(seed, roll_index);
        Ok(DiceRoll {
            die1,
            die2,
            roll_index,
            commitment: *commitment,
        })
    }

    /// Remove and return the seed of a finished match.
    pub fn reveal(&mut self, match_id: MatchId) -> Option<Seed> {
        self.seeds.remove(&match_id).map(|(seed, _)| seed)
    }

    pub fn len(&self) -> usize {
        self.seeds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seeds.is_empty()
    }
}
