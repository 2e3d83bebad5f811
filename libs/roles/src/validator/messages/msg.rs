//! Network messages of the consensus protocol.
use super::{
    Epoch, GetVerticesErrorResponse, GetVerticesRequest, GetVerticesResponse, LedgerStatusUpdate,
    Proposal, Vote,
};

/// Consensus message exchanged between validators.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConsensusMsg {
    /// Proposal of the view leader.
    Proposal(Proposal),
    /// Vote, sent to the next leader (or broadcast on timeout).
    Vote(Vote),
    /// Request for missing vertices.
    GetVerticesRequest(GetVerticesRequest),
    /// Requested vertices.
    GetVerticesResponse(GetVerticesResponse),
    /// Requested vertices are not available.
    GetVerticesErrorResponse(GetVerticesErrorResponse),
    /// New epoch notification.
    LedgerStatusUpdate(LedgerStatusUpdate),
}

impl ConsensusMsg {
    /// Label of the message kind, for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Proposal(_) => "Proposal",
            Self::Vote(_) => "Vote",
            Self::GetVerticesRequest(_) => "GetVerticesRequest",
            Self::GetVerticesResponse(_) => "GetVerticesResponse",
            Self::GetVerticesErrorResponse(_) => "GetVerticesErrorResponse",
            Self::LedgerStatusUpdate(_) => "LedgerStatusUpdate",
        }
    }

    /// Epoch the message belongs to, for messages which carry one.
    pub fn epoch(&self) -> Option<Epoch> {
        match self {
            Self::Proposal(m) => Some(m.epoch()),
            Self::Vote(m) => Some(m.epoch()),
            Self::GetVerticesErrorResponse(m) => Some(m.high_qc.epoch()),
            Self::LedgerStatusUpdate(m) => Some(m.proof.header.epoch),
            Self::GetVerticesRequest(_) | Self::GetVerticesResponse(_) => None,
        }
    }
}
