//! Epoch configuration.
use super::{BftValidatorSet, Epoch, HighQc, LedgerHeader, LedgerProof, QuorumCertificate, Vertex};
use super::{VerifiedVertex, VertexId};
use std::collections::HashSet;

/// State of a vertex store: the committed root, the uncommitted vertices
/// on top of it and the highest known certificates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VertexStoreState {
    high_qc: HighQc,
    root: VerifiedVertex,
    vertices: Vec<VerifiedVertex>,
}

impl VertexStoreState {
    /// Validates and builds the state. `vertices` need to be ordered
    /// so that every parent precedes its children.
    pub fn new(
        high_qc: HighQc,
        root: VerifiedVertex,
        vertices: Vec<VerifiedVertex>,
    ) -> anyhow::Result<Self> {
        let Some(committed) = high_qc.highest_committed_qc.committed() else {
            anyhow::bail!("highest committed QC doesn't commit anything");
        };
        anyhow::ensure!(
            committed.vertex_id == root.id(),
            "root {:?} is not the committed vertex {:?}",
            root.id(),
            committed.vertex_id
        );
        let mut known: HashSet<VertexId> = [root.id()].into();
        for v in &vertices {
            anyhow::ensure!(
                known.contains(&v.parent_id()),
                "vertex {:?} is missing its parent {:?}",
                v.id(),
                v.parent_id()
            );
            known.insert(v.id());
        }
        anyhow::ensure!(
            known.contains(&high_qc.highest_qc.proposed().vertex_id),
            "vertex of the highest QC is missing"
        );
        Ok(Self {
            high_qc,
            root,
            vertices,
        })
    }

    /// Initial state of an epoch starting at the given ledger header.
    pub fn genesis(ledger_header: LedgerHeader) -> Self {
        let root = VerifiedVertex::new(Vertex::genesis(ledger_header.clone()));
        let qc = QuorumCertificate::genesis(&root, ledger_header);
        Self {
            high_qc: HighQc::genesis(qc),
            root,
            vertices: vec![],
        }
    }

    /// Highest certificates.
    pub fn high_qc(&self) -> &HighQc {
        &self.high_qc
    }

    /// Committed root.
    pub fn root(&self) -> &VerifiedVertex {
        &self.root
    }

    /// Uncommitted vertices, parents first.
    pub fn vertices(&self) -> &[VerifiedVertex] {
        &self.vertices
    }

    /// Epoch of the state.
    pub fn epoch(&self) -> Epoch {
        self.root.epoch()
    }
}

/// Everything a node needs to run consensus in an epoch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BftConfiguration {
    /// Validator set of the epoch.
    pub validator_set: BftValidatorSet,
    /// Initial vertex store state.
    pub vertex_store_state: VertexStoreState,
}

impl BftConfiguration {
    /// Epoch of the configuration.
    pub fn epoch(&self) -> Epoch {
        self.vertex_store_state.epoch()
    }
}

/// Transition to a new epoch, emitted once the ledger commits an end of epoch header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EpochChange {
    /// Proof of the last committed header of the previous epoch.
    pub proof: LedgerProof,
    /// Configuration of the new epoch.
    pub configuration: BftConfiguration,
}

impl EpochChange {
    /// Builds the change which follows the committed end of epoch header.
    pub fn new(proof: LedgerProof) -> anyhow::Result<Self> {
        let Some(validator_set) = proof.header.next_validator_set.clone() else {
            anyhow::bail!("header doesn't end the epoch");
        };
        let genesis = LedgerHeader::epoch_genesis(
            proof.header.epoch.next(),
            proof.header.accumulator.clone(),
        );
        Ok(Self {
            proof,
            configuration: BftConfiguration {
                validator_set,
                vertex_store_state: VertexStoreState::genesis(genesis),
            },
        })
    }

    /// The new epoch.
    pub fn epoch(&self) -> Epoch {
        self.configuration.epoch()
    }

    /// Genesis header of the new epoch.
    pub fn genesis_header(&self) -> &LedgerHeader {
        &self
            .configuration
            .vertex_store_state
            .root()
            .qc()
            .proposed()
            .ledger_header
    }
}
