//! Validator sets and proposer election.
use super::View;
use crate::validator::PublicKey;
use anyhow::Context as _;
use braid_consensus_crypto::{keccak256::Keccak256Hasher, ByteFmt};
use num_bigint::BigUint;
use std::collections::BTreeMap;

/// Validator representation inside a validator set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BftValidator {
    /// Validator identity.
    pub node: PublicKey,
    /// Voting power inside the set.
    pub power: u64,
}

/// Immutable set of validators of one epoch.
/// We represent each validator by its public key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BftValidatorSet {
    vec: Vec<BftValidator>,
    indexes: BTreeMap<PublicKey, usize>,
    total_power: u64,
}

impl BftValidatorSet {
    /// Creates a new validator set. Note that the order of the given validators
    /// is NOT preserved in the set.
    pub fn new(validators: impl IntoIterator<Item = BftValidator>) -> anyhow::Result<Self> {
        let mut map = BTreeMap::new();
        let mut total_power: u64 = 0;
        for v in validators {
            anyhow::ensure!(
                !map.contains_key(&v.node),
                "Duplicate validator in validator set"
            );
            total_power = total_power
                .checked_add(v.power)
                .context("Sum of powers overflows in validator set")?;
            map.insert(v.node.clone(), v);
        }
        anyhow::ensure!(
            !map.is_empty(),
            "Validator set must contain at least one validator"
        );
        anyhow::ensure!(total_power > 0, "Validator set must have positive total power");
        let vec: Vec<_> = map.into_values().collect();
        Ok(Self {
            indexes: vec
                .iter()
                .enumerate()
                .map(|(i, v)| (v.node.clone(), i))
                .collect(),
            vec,
            total_power,
        })
    }

    /// Iterates over validators.
    pub fn iter(&self) -> impl Iterator<Item = &BftValidator> {
        self.vec.iter()
    }

    /// Iterates over validator keys.
    pub fn nodes(&self) -> impl Iterator<Item = &PublicKey> {
        self.vec.iter().map(|v| &v.node)
    }

    /// Returns the number of validators.
    #[allow(clippy::len_without_is_empty)] // a valid set is always non-empty by construction
    pub fn len(&self) -> usize {
        self.vec.len()
    }

    /// Returns true if the given node is a member of the set.
    pub fn contains(&self, node: &PublicKey) -> bool {
        self.indexes.contains_key(node)
    }

    /// Voting power of a member, `None` for non-members.
    pub fn power(&self, node: &PublicKey) -> Option<u64> {
        self.indexes.get(node).map(|i| self.vec[*i].power)
    }

    /// Sum of all validators' power.
    pub fn total_power(&self) -> u64 {
        self.total_power
    }

    /// Minimal power which constitutes a quorum: strictly more than
    /// two thirds of the total power.
    pub fn quorum_threshold(&self) -> u64 {
        quorum_threshold(self.total_power)
    }

    /// Combined power of the given members. Non-members and repeated
    /// nodes contribute nothing.
    pub fn power_of<'a>(&self, nodes: impl IntoIterator<Item = &'a PublicKey>) -> u64 {
        let mut seen = vec![false; self.vec.len()];
        let mut sum = 0;
        for n in nodes {
            if let Some(&i) = self.indexes.get(n) {
                if !seen[i] {
                    seen[i] = true;
                    sum += self.vec[i].power;
                }
            }
        }
        sum
    }

    /// Feeds the validator set into a hasher.
    pub fn hash_into(&self, mut h: Keccak256Hasher) -> Keccak256Hasher {
        h = h.u64(self.vec.len() as u64);
        for v in &self.vec {
            h = h.bytes(&v.node.encode()).u64(v.power);
        }
        h
    }

    /// Computes the proposer of the given view.
    /// Selection is pseudo-random and proportional to the voting power,
    /// so validators with zero power never propose.
    pub fn view_leader(&self, view: View) -> PublicKey {
        let eligibility = leader_eligibility(view, self.total_power);
        let mut offset = 0;
        for v in &self.vec {
            offset += v.power;
            if eligibility < offset {
                return v.node.clone();
            }
        }
        // Unreachable, since eligibility < total_power.
        self.vec[self.vec.len() - 1].node.clone()
    }
}

/// Calculate the quorum threshold for a given total power:
/// `floor(2 * total / 3) + 1`.
pub fn quorum_threshold(total_power: u64) -> u64 {
    (u128::from(total_power) * 2 / 3 + 1) as u64
}

/// Pseudo-random number in `[0, total)` derived from the view.
fn leader_eligibility(view: View, total: u64) -> u64 {
    let hash = Keccak256Hasher::new("leader").u64(view.0).finish();
    let ret = BigUint::from_bytes_be(hash.as_bytes()) % BigUint::from(total);
    // The remainder fits into 64 bits, since `total` does. Zero has no digits.
    ret.to_u64_digits().first().copied().unwrap_or(0)
}
