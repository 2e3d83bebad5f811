//! Votes and proposals.
use super::{
    timeout_hash, BftValidatorSet, CertificateVerifyError, Epoch, HighQc, Vertex, VoteData, View,
};
use crate::validator::{PublicKey, SecretKey, Signature};
use braid_consensus_crypto::ed25519::InvalidSignatureError;

/// A vote for a vertex, optionally also attesting a timeout of its view.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Vote {
    /// Author of the vote.
    pub author: PublicKey,
    /// Voted data.
    pub vote_data: VoteData,
    /// Signature over `vote_data.hash()`.
    pub signature: Signature,
    /// High QC of the author at the time of voting.
    pub high_qc: HighQc,
    /// Signature over `timeout_hash(epoch, view)`, set on a local timeout.
    pub timeout_signature: Option<Signature>,
}

impl Vote {
    /// Creates a signed vote.
    pub fn new(key: &SecretKey, vote_data: VoteData, high_qc: HighQc) -> Self {
        Self {
            author: key.public(),
            signature: key.sign_hash(&vote_data.hash()),
            vote_data,
            high_qc,
            timeout_signature: None,
        }
    }

    /// Adds a timeout signature for the view of the vote.
    pub fn with_timeout(self, key: &SecretKey) -> Self {
        Self {
            timeout_signature: Some(key.sign_hash(&timeout_hash(self.epoch(), self.view()))),
            ..self
        }
    }

    /// Epoch of the vote.
    pub fn epoch(&self) -> Epoch {
        self.vote_data.proposed.ledger_header.epoch
    }

    /// View of the vote.
    pub fn view(&self) -> View {
        self.vote_data.proposed.view
    }

    /// Whether the vote carries a timeout signature.
    pub fn is_timeout(&self) -> bool {
        self.timeout_signature.is_some()
    }

    /// Verifies the vote against the validator set.
    pub fn verify(&self, validators: &BftValidatorSet) -> Result<(), VoteVerifyError> {
        if !validators.contains(&self.author) {
            return Err(VoteVerifyError::NonValidatorAuthor {
                author: Box::new(self.author.clone()),
            });
        }
        if self.high_qc.epoch() != self.epoch() {
            return Err(VoteVerifyError::EpochMismatch);
        }
        self.signature
            .verify_hash(&self.vote_data.hash(), &self.author)
            .map_err(VoteVerifyError::BadSignature)?;
        if let Some(sig) = &self.timeout_signature {
            sig.verify_hash(&timeout_hash(self.epoch(), self.view()), &self.author)
                .map_err(VoteVerifyError::BadTimeoutSignature)?;
        }
        self.high_qc
            .verify(validators)
            .map_err(VoteVerifyError::InvalidHighQc)
    }
}

/// Error returned by `Vote::verify()`.
#[derive(Debug, thiserror::Error)]
pub enum VoteVerifyError {
    /// Author is not a validator.
    #[error("author not in validator set: {author:?}")]
    NonValidatorAuthor {
        /// Author.
        author: Box<PublicKey>,
    },
    /// Vote data and high QC are from different epochs.
    #[error("vote and its high QC are from different epochs")]
    EpochMismatch,
    /// Bad vote signature.
    #[error("bad signature: {0:#}")]
    BadSignature(#[source] InvalidSignatureError),
    /// Bad timeout signature.
    #[error("bad timeout signature: {0:#}")]
    BadTimeoutSignature(#[source] InvalidSignatureError),
    /// Invalid high QC.
    #[error("invalid high QC: {0:#}")]
    InvalidHighQc(#[source] CertificateVerifyError),
}

/// A vertex proposed by the leader of its view.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Proposal {
    /// Proposed vertex.
    pub vertex: Vertex,
    /// Signature of the proposer over `vertex.hash()`.
    pub signature: Signature,
    /// High QC of the proposer.
    pub high_qc: HighQc,
}

impl Proposal {
    /// Creates a signed proposal.
    pub fn new(key: &SecretKey, vertex: Vertex, high_qc: HighQc) -> Self {
        Self {
            signature: key.sign_hash(&vertex.hash()),
            vertex,
            high_qc,
        }
    }

    /// Author of the proposal.
    pub fn author(&self) -> Option<&PublicKey> {
        self.vertex.proposer.as_ref()
    }

    /// Epoch of the proposal.
    pub fn epoch(&self) -> Epoch {
        self.vertex.epoch
    }

    /// View of the proposal.
    pub fn view(&self) -> View {
        self.vertex.view
    }

    /// Verifies the proposal against the validator set.
    pub fn verify(&self, validators: &BftValidatorSet) -> Result<(), ProposalVerifyError> {
        let Some(author) = self.author() else {
            return Err(ProposalVerifyError::MissingProposer);
        };
        if !validators.contains(author) {
            return Err(ProposalVerifyError::NonValidatorAuthor {
                author: Box::new(author.clone()),
            });
        }
        if self.vertex.is_timeout {
            return Err(ProposalVerifyError::TimeoutVertex);
        }
        if self.vertex.qc.epoch() != self.epoch() || self.high_qc.epoch() != self.epoch() {
            return Err(ProposalVerifyError::EpochMismatch);
        }
        self.signature
            .verify_hash(&self.vertex.hash(), author)
            .map_err(ProposalVerifyError::BadSignature)?;
        self.vertex
            .qc
            .verify(validators)
            .map_err(ProposalVerifyError::InvalidQc)?;
        self.high_qc
            .verify(validators)
            .map_err(ProposalVerifyError::InvalidHighQc)
    }
}

/// Error returned by `Proposal::verify()`.
#[derive(Debug, thiserror::Error)]
pub enum ProposalVerifyError {
    /// Proposed vertex has no proposer.
    #[error("missing proposer")]
    MissingProposer,
    /// Author is not a validator.
    #[error("author not in validator set: {author:?}")]
    NonValidatorAuthor {
        /// Author.
        author: Box<PublicKey>,
    },
    /// Fallback vertices are never proposed.
    #[error("timeout vertex proposed")]
    TimeoutVertex,
    /// Vertex, its QC and the high QC are from different epochs.
    #[error("epoch mismatch")]
    EpochMismatch,
    /// Bad signature.
    #[error("bad signature: {0:#}")]
    BadSignature(#[source] InvalidSignatureError),
    /// Invalid parent QC.
    #[error("invalid QC: {0:#}")]
    InvalidQc(#[source] CertificateVerifyError),
    /// Invalid high QC.
    #[error("invalid high QC: {0:#}")]
    InvalidHighQc(#[source] CertificateVerifyError),
}
