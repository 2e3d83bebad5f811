//! Interfaces of the state computer driven by consensus.
use braid_consensus_roles::validator;
use std::fmt;

/// A vertex executed on top of its ancestors, together with the resulting ledger header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreparedVertex {
    vertex: validator::VerifiedVertex,
    ledger_header: validator::LedgerHeader,
}

impl PreparedVertex {
    /// Creates a prepared vertex.
    pub fn new(vertex: validator::VerifiedVertex, ledger_header: validator::LedgerHeader) -> Self {
        Self {
            vertex,
            ledger_header,
        }
    }

    /// The vertex.
    pub fn vertex(&self) -> &validator::VerifiedVertex {
        &self.vertex
    }

    /// Id of the vertex.
    pub fn id(&self) -> validator::VertexId {
        self.vertex.id()
    }

    /// View of the vertex.
    pub fn view(&self) -> validator::View {
        self.vertex.view()
    }

    /// Ledger state after executing the vertex.
    pub fn ledger_header(&self) -> &validator::LedgerHeader {
        &self.ledger_header
    }

    /// Header which votes for this vertex attest to.
    pub fn header(&self) -> validator::BftHeader {
        validator::BftHeader {
            view: self.vertex.view(),
            vertex_id: self.vertex.id(),
            ledger_header: self.ledger_header.clone(),
        }
    }
}

/// Result of a commit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerUpdate {
    /// Proof of the latest committed header.
    pub proof: validator::LedgerProof,
    /// Set iff the commit ended the epoch.
    pub epoch_change: Option<validator::EpochChange>,
}

impl LedgerUpdate {
    /// Latest committed header.
    pub fn header(&self) -> &validator::LedgerHeader {
        &self.proof.header
    }
}

/// State computer. Executes vertices speculatively and commits them once consensus is reached.
pub trait Ledger: 'static + fmt::Debug + Send + Sync {
    /// Executes `vertex` on top of `previous`, the uncommitted path from the
    /// root to the vertex's parent. Returns `None` if the vertex is not executable.
    fn prepare(
        &self,
        previous: &[PreparedVertex],
        vertex: &validator::VerifiedVertex,
    ) -> Option<PreparedVertex>;

    /// Commits the vertices, in order. `proof` certifies the last of them.
    fn commit(
        &self,
        vertices: &[PreparedVertex],
        proof: validator::LedgerProof,
    ) -> anyhow::Result<LedgerUpdate>;
}

/// Source of transactions for the proposals of this node.
pub trait ProposalGenerator: 'static + fmt::Debug + Send + Sync {
    /// Transactions for a proposal in `view` extending `prepared`, the uncommitted
    /// path from the root. Implementations should avoid transactions already in the path.
    fn generate_next_txns(
        &self,
        view: validator::View,
        prepared: &[PreparedVertex],
    ) -> Vec<validator::Txn>;
}
