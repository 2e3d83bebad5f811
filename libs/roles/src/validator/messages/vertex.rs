//! Vertices of the consensus DAG.
use super::{Epoch, LedgerHeader, QuorumCertificate, View};
use crate::validator::PublicKey;
use braid_consensus_crypto::{
    keccak256::{Keccak256, Keccak256Hasher},
    ByteFmt,
};
use std::{fmt, sync::Arc};

/// Identity of a vertex: the hash of its content.
#[derive(Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VertexId(pub Keccak256);

impl fmt::Debug for VertexId {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "vertex:{}", self.0.short())
    }
}

/// Opaque transaction. Consensus orders transactions without looking inside.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Txn(pub Vec<u8>);

/// Header of a vertex as certified by votes: the vertex id together with
/// the ledger state resulting from executing it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BftHeader {
    /// View of the vertex.
    pub view: View,
    /// Id of the vertex.
    pub vertex_id: VertexId,
    /// Ledger state after the vertex.
    pub ledger_header: LedgerHeader,
}

impl BftHeader {
    /// Header of the (virtual) ancestor of an epoch genesis vertex.
    pub(crate) fn pre_genesis(ledger_header: LedgerHeader) -> Self {
        Self {
            view: View::genesis(),
            vertex_id: VertexId::default(),
            ledger_header,
        }
    }

    /// Hash of the header.
    pub fn hash(&self) -> Keccak256 {
        Keccak256Hasher::new("bft_header")
            .u64(self.view.0)
            .hash(&self.vertex_id.0)
            .hash(&self.ledger_header.hash())
            .finish()
    }
}

/// Vertex as received from the network, before its id is computed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Vertex {
    /// Epoch of the vertex.
    pub epoch: Epoch,
    /// QC certifying the parent vertex.
    pub qc: QuorumCertificate,
    /// View of the vertex.
    pub view: View,
    /// Ordered transactions.
    pub txns: Vec<Txn>,
    /// Proposer of the vertex. `None` only for genesis vertices.
    pub proposer: Option<PublicKey>,
    /// Set for the empty fallback vertices built by nodes on a local timeout.
    pub is_timeout: bool,
}

impl Vertex {
    /// Genesis vertex of the epoch starting at the given ledger header.
    pub fn genesis(ledger_header: LedgerHeader) -> Self {
        Self {
            epoch: ledger_header.epoch,
            qc: QuorumCertificate::pre_genesis(ledger_header),
            view: View::genesis(),
            txns: vec![],
            proposer: None,
            is_timeout: false,
        }
    }

    /// A regular vertex extending the QC.
    pub fn new(qc: QuorumCertificate, view: View, txns: Vec<Txn>, proposer: PublicKey) -> Self {
        Self {
            epoch: qc.epoch(),
            qc,
            view,
            txns,
            proposer: Some(proposer),
            is_timeout: false,
        }
    }

    /// Empty fallback vertex of a timed out view, proposed in the name of the view leader.
    pub fn timeout(qc: QuorumCertificate, view: View, leader: PublicKey) -> Self {
        Self {
            is_timeout: true,
            ..Self::new(qc, view, vec![], leader)
        }
    }

    /// Hash of the vertex content. QC signatures are excluded, so that
    /// every node builds the same fallback vertex for the same QC.
    pub fn hash(&self) -> Keccak256 {
        let mut h = Keccak256Hasher::new("vertex")
            .u64(self.epoch.0)
            .hash(&self.qc.vote_data.hash())
            .u64(self.view.0)
            .u64(self.txns.len() as u64);
        for txn in &self.txns {
            h = h.bytes(&txn.0);
        }
        h = match &self.proposer {
            Some(p) => h.bool(true).bytes(&p.encode()),
            None => h.bool(false),
        };
        h.bool(self.is_timeout).finish()
    }
}

/// Vertex with its id computed. Cheap to clone.
#[derive(Clone, PartialEq, Eq)]
pub struct VerifiedVertex {
    vertex: Arc<Vertex>,
    id: VertexId,
}

impl VerifiedVertex {
    /// Computes the id of the vertex.
    pub fn new(vertex: Vertex) -> Self {
        Self {
            id: VertexId(vertex.hash()),
            vertex: Arc::new(vertex),
        }
    }

    /// Id of the vertex.
    pub fn id(&self) -> VertexId {
        self.id
    }

    /// The underlying vertex.
    pub fn vertex(&self) -> &Vertex {
        &self.vertex
    }

    /// Epoch of the vertex.
    pub fn epoch(&self) -> Epoch {
        self.vertex.epoch
    }

    /// View of the vertex.
    pub fn view(&self) -> View {
        self.vertex.view
    }

    /// QC of the parent.
    pub fn qc(&self) -> &QuorumCertificate {
        &self.vertex.qc
    }

    /// Id of the parent vertex.
    pub fn parent_id(&self) -> VertexId {
        self.vertex.qc.proposed().vertex_id
    }

    /// Header of the parent vertex.
    pub fn parent_header(&self) -> &BftHeader {
        self.vertex.qc.proposed()
    }

    /// Header of the grandparent vertex.
    pub fn grandparent_header(&self) -> &BftHeader {
        self.vertex.qc.parent()
    }

    /// Proposer, `None` for genesis.
    pub fn proposer(&self) -> Option<&PublicKey> {
        self.vertex.proposer.as_ref()
    }

    /// Transactions of the vertex.
    pub fn txns(&self) -> &[Txn] {
        &self.vertex.txns
    }

    /// Whether this is a fallback vertex of a timed out view.
    pub fn is_timeout(&self) -> bool {
        self.vertex.is_timeout
    }

    /// Whether this is an epoch genesis vertex.
    pub fn is_genesis(&self) -> bool {
        self.view().is_genesis()
    }

    /// Whether the vertex, its parent or its grandparent is a genesis vertex.
    pub fn touches_genesis(&self) -> bool {
        self.is_genesis()
            || self.parent_header().view.is_genesis()
            || self.grandparent_header().view.is_genesis()
    }

    /// Whether the parent is from the directly preceding view.
    pub fn has_direct_parent(&self) -> bool {
        self.parent_header().view.next() == self.view()
    }

    /// Whether the parent's parent is from the view directly preceding the parent's view.
    pub fn parent_has_direct_parent(&self) -> bool {
        self.grandparent_header().view.next() == self.parent_header().view
    }
}

impl fmt::Debug for VerifiedVertex {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("VerifiedVertex")
            .field("id", &self.id)
            .field("epoch", &self.vertex.epoch)
            .field("view", &self.vertex.view)
            .field("parent", &self.parent_id())
            .field("txns", &self.vertex.txns.len())
            .field("is_timeout", &self.vertex.is_timeout)
            .finish()
    }
}
