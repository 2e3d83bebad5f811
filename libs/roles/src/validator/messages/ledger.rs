//! Ledger state as seen by consensus.
use super::{BftValidatorSet, Epoch, View};
use crate::validator::{PublicKey, Signature};
use braid_consensus_crypto::keccak256::{Keccak256, Keccak256Hasher};
use std::collections::BTreeMap;

/// Accumulated state of the ledger after executing a prefix of transactions.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct AccumulatorState {
    /// Number of transactions executed so far.
    pub state_version: u64,
    /// Running hash over the executed transactions.
    pub hash: Keccak256,
}

impl AccumulatorState {
    /// Extends the accumulator with a transaction.
    pub fn extend(&self, txn: &[u8]) -> Self {
        Self {
            state_version: self.state_version + 1,
            hash: Keccak256Hasher::new("accumulator")
                .hash(&self.hash)
                .bytes(txn)
                .finish(),
        }
    }
}

/// Ledger header produced by preparing (executing) a vertex.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerHeader {
    /// Epoch of the vertex.
    pub epoch: Epoch,
    /// View of the vertex.
    pub view: View,
    /// Ledger state after the vertex.
    pub accumulator: AccumulatorState,
    /// Validator set of the next epoch. Present iff this header ends the epoch.
    pub next_validator_set: Option<BftValidatorSet>,
}

impl LedgerHeader {
    /// Header of the genesis vertex of an epoch.
    pub fn epoch_genesis(epoch: Epoch, accumulator: AccumulatorState) -> Self {
        Self {
            epoch,
            view: View::genesis(),
            accumulator,
            next_validator_set: None,
        }
    }

    /// Whether committing this header ends the epoch.
    pub fn is_end_of_epoch(&self) -> bool {
        self.next_validator_set.is_some()
    }

    /// Hash of the header.
    pub fn hash(&self) -> Keccak256 {
        let h = Keccak256Hasher::new("ledger_header")
            .u64(self.epoch.0)
            .u64(self.view.0)
            .u64(self.accumulator.state_version)
            .hash(&self.accumulator.hash);
        match &self.next_validator_set {
            Some(set) => set.hash_into(h.bool(true)).finish(),
            None => h.bool(false).finish(),
        }
    }
}

/// A committed ledger header together with the signatures of the QC which committed it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerProof {
    /// Committed header.
    pub header: LedgerHeader,
    /// Signatures of the committing QC. Empty for a genesis proof.
    pub signatures: BTreeMap<PublicKey, Signature>,
}

impl LedgerProof {
    /// Proof of an epoch genesis header, which needs no signatures.
    pub fn genesis(header: LedgerHeader) -> Self {
        Self {
            header,
            signatures: BTreeMap::new(),
        }
    }
}
