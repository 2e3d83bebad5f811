//! Messages exchanged when recovering missing vertices.
use super::{HighQc, LedgerProof, Vertex, VertexId};

/// Request for `count` vertices: the given one and its ancestors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GetVerticesRequest {
    /// Id of the newest requested vertex.
    pub vertex_id: VertexId,
    /// Number of vertices, walking back parent by parent.
    pub count: u64,
}

/// Successful response: the requested vertices, newest first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GetVerticesResponse {
    /// Requested vertices.
    pub vertices: Vec<Vertex>,
}

/// The responder doesn't have the requested vertices. It reports
/// its own high QC so that the requester can tell which side is behind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GetVerticesErrorResponse {
    /// High QC of the responder.
    pub high_qc: HighQc,
    /// The failed request.
    pub request: GetVerticesRequest,
}

/// Sent to other validators when a node enters a new epoch,
/// so that lagging peers can start catching up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerStatusUpdate {
    /// Proof of the genesis header of the new epoch.
    pub proof: LedgerProof,
}
