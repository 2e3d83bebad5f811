//! Verification of messages from peers. Nothing unverified reaches the later stages.
use super::EpochContext;
use crate::{
    event::ConsensusEvent,
    metrics::{ByzantineLabel, METRICS},
};
use braid_consensus_roles::validator;

/// Why a message failed verification.
#[derive(Debug, thiserror::Error)]
pub(crate) enum VerifyError {
    /// Proposal author is not the leader of the view.
    #[error("invalid leader (correct leader: {correct_leader:?}, received leader: {received_leader:?})")]
    InvalidLeader {
        /// Correct leader.
        correct_leader: validator::PublicKey,
        /// Received leader.
        received_leader: Option<validator::PublicKey>,
    },
    /// Invalid proposal.
    #[error("proposal: {0:#}")]
    Proposal(#[source] validator::ProposalVerifyError),
    /// Invalid vote.
    #[error("vote: {0:#}")]
    Vote(#[source] validator::VoteVerifyError),
    /// Invalid certificate.
    #[error("certificate: {0:#}")]
    Certificate(#[source] validator::CertificateVerifyError),
    /// Vertices of a response are not a chain of this epoch.
    #[error("malformed vertices response: {0}")]
    MalformedResponse(&'static str),
}

impl VerifyError {
    fn label(&self) -> ByzantineLabel {
        match self {
            Self::InvalidLeader { .. } => ByzantineLabel::InvalidLeader,
            _ => ByzantineLabel::InvalidMessage,
        }
    }
}

impl EpochContext {
    /// Verifies a proposal or a vote.
    pub(crate) fn verify_event(&self, event: &ConsensusEvent) -> Result<(), VerifyError> {
        let res = match event {
            ConsensusEvent::Proposal(proposal) => self.verify_proposal(proposal),
            ConsensusEvent::Vote(vote) => vote.verify(&self.validators).map_err(VerifyError::Vote),
        };
        record(res)
    }

    fn verify_proposal(&self, proposal: &validator::Proposal) -> Result<(), VerifyError> {
        proposal
            .verify(&self.validators)
            .map_err(VerifyError::Proposal)?;
        let correct_leader = self.validators.view_leader(proposal.view());
        if proposal.author() != Some(&correct_leader) {
            return Err(VerifyError::InvalidLeader {
                correct_leader,
                received_leader: proposal.author().cloned(),
            });
        }
        Ok(())
    }

    /// Verifies the vertices of a response, which are expected newest first with
    /// every vertex the parent of the previous one.
    pub(crate) fn verify_get_vertices_response(
        &self,
        response: validator::GetVerticesResponse,
    ) -> Result<Vec<validator::VerifiedVertex>, VerifyError> {
        let vertices: Vec<_> = response
            .vertices
            .into_iter()
            .map(validator::VerifiedVertex::new)
            .collect();
        record(self.check_chain(&vertices))?;
        Ok(vertices)
    }

    fn check_chain(&self, vertices: &[validator::VerifiedVertex]) -> Result<(), VerifyError> {
        if vertices.is_empty() {
            return Err(VerifyError::MalformedResponse("no vertices"));
        }
        if vertices.iter().any(|v| v.epoch() != self.epoch) {
            return Err(VerifyError::MalformedResponse("vertex of another epoch"));
        }
        if vertices
            .windows(2)
            .any(|pair| pair[0].parent_id() != pair[1].id())
        {
            return Err(VerifyError::MalformedResponse("vertices are not a chain"));
        }
        for v in vertices {
            v.qc()
                .verify(&self.validators)
                .map_err(VerifyError::Certificate)?;
        }
        Ok(())
    }

    pub(crate) fn verify_get_vertices_error_response(
        &self,
        response: &validator::GetVerticesErrorResponse,
    ) -> Result<(), VerifyError> {
        record(
            response
                .high_qc
                .verify(&self.validators)
                .map_err(VerifyError::Certificate),
        )
    }
}

fn record(res: Result<(), VerifyError>) -> Result<(), VerifyError> {
    if let Err(err) = &res {
        METRICS.byzantine_evidence[&err.label()].inc();
    }
    res
}
