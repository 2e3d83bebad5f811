//! Quorum and timeout certificates.
use super::{BftHeader, BftValidatorSet, Epoch, LedgerHeader, LedgerProof, VerifiedVertex, View};
use crate::validator::{PublicKey, Signature};
use braid_consensus_crypto::{
    ed25519::InvalidSignatureError,
    keccak256::{Keccak256, Keccak256Hasher},
};
use std::collections::BTreeMap;

/// What a vote attests to: the proposed vertex, its parent, and the vertex
/// which becomes committed once a quorum of votes is collected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VoteData {
    /// Header of the voted vertex.
    pub proposed: BftHeader,
    /// Header of its parent.
    pub parent: BftHeader,
    /// Header of its grandparent, present iff the three form a chain of consecutive views.
    pub committed: Option<BftHeader>,
}

impl VoteData {
    /// Builds the vote data for a vertex with the given (executed) header.
    /// Three-chain rule: the grandparent is committed iff vertex, parent and
    /// grandparent have consecutive views and none of them is a genesis vertex.
    pub fn new(vertex: &VerifiedVertex, proposed: BftHeader) -> Self {
        let parent = vertex.parent_header().clone();
        let committed = if !vertex.touches_genesis()
            && vertex.has_direct_parent()
            && vertex.parent_has_direct_parent()
        {
            Some(vertex.grandparent_header().clone())
        } else {
            None
        };
        Self {
            proposed,
            parent,
            committed,
        }
    }

    /// Hash of the vote data. This is the payload validators sign.
    pub fn hash(&self) -> Keccak256 {
        let h = Keccak256Hasher::new("vote_data")
            .hash(&self.proposed.hash())
            .hash(&self.parent.hash());
        match &self.committed {
            Some(c) => h.bool(true).hash(&c.hash()).finish(),
            None => h.bool(false).finish(),
        }
    }
}

/// Error returned by certificate verification.
#[derive(Debug, thiserror::Error)]
pub enum CertificateVerifyError {
    /// Signer is not a member of the validator set.
    #[error("signer not in validator set: {signer:?}")]
    NonValidatorSigner {
        /// Signer.
        signer: Box<PublicKey>,
    },
    /// Signers don't reach the quorum threshold.
    #[error("signers have not reached quorum: got {got}, want {want}")]
    NotEnoughPower {
        /// Power of the signers.
        got: u64,
        /// Quorum threshold.
        want: u64,
    },
    /// Invalid signature.
    #[error("bad signature of {signer:?}: {source}")]
    BadSignature {
        /// Signer.
        signer: Box<PublicKey>,
        /// Cause.
        #[source]
        source: InvalidSignatureError,
    },
    /// Genesis QC which is not self-referencing or carries signatures.
    #[error("malformed genesis QC")]
    MalformedGenesis,
}

/// Verifies that the signatures over `hash` form a quorum of `validators`.
fn verify_quorum(
    hash: &Keccak256,
    signatures: &BTreeMap<PublicKey, Signature>,
    validators: &BftValidatorSet,
) -> Result<(), CertificateVerifyError> {
    if let Some(signer) = signatures.keys().find(|k| !validators.contains(k)) {
        return Err(CertificateVerifyError::NonValidatorSigner {
            signer: Box::new(signer.clone()),
        });
    }
    let got = validators.power_of(signatures.keys());
    let want = validators.quorum_threshold();
    if got < want {
        return Err(CertificateVerifyError::NotEnoughPower { got, want });
    }
    for (signer, sig) in signatures {
        sig.verify_hash(hash, signer)
            .map_err(|source| CertificateVerifyError::BadSignature {
                signer: Box::new(signer.clone()),
                source,
            })?;
    }
    Ok(())
}

/// A quorum of votes for the same vote data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuorumCertificate {
    /// Certified vote data.
    pub vote_data: VoteData,
    /// Signatures of the voters over `vote_data.hash()`.
    pub signatures: BTreeMap<PublicKey, Signature>,
}

impl QuorumCertificate {
    /// QC embedded in an epoch genesis vertex, pointing at a virtual ancestor.
    pub(crate) fn pre_genesis(ledger_header: LedgerHeader) -> Self {
        let header = BftHeader::pre_genesis(ledger_header);
        Self {
            vote_data: VoteData {
                proposed: header.clone(),
                parent: header.clone(),
                committed: Some(header),
            },
            signatures: BTreeMap::new(),
        }
    }

    /// Self-referencing QC of an epoch genesis vertex. It carries no signatures.
    pub fn genesis(vertex: &VerifiedVertex, ledger_header: LedgerHeader) -> Self {
        let header = BftHeader {
            view: View::genesis(),
            vertex_id: vertex.id(),
            ledger_header,
        };
        Self {
            vote_data: VoteData {
                proposed: header.clone(),
                parent: header.clone(),
                committed: Some(header),
            },
            signatures: BTreeMap::new(),
        }
    }

    /// View of the certified vertex.
    pub fn view(&self) -> View {
        self.vote_data.proposed.view
    }

    /// Epoch of the certified vertex.
    pub fn epoch(&self) -> Epoch {
        self.vote_data.proposed.ledger_header.epoch
    }

    /// Header of the certified vertex.
    pub fn proposed(&self) -> &BftHeader {
        &self.vote_data.proposed
    }

    /// Header of the parent of the certified vertex.
    pub fn parent(&self) -> &BftHeader {
        &self.vote_data.parent
    }

    /// Header committed by this QC, if any.
    pub fn committed(&self) -> Option<&BftHeader> {
        self.vote_data.committed.as_ref()
    }

    /// Whether this is a genesis QC.
    pub fn is_genesis(&self) -> bool {
        self.view().is_genesis()
    }

    /// Signers of the QC.
    pub fn signers(&self) -> impl Iterator<Item = &PublicKey> {
        self.signatures.keys()
    }

    /// Proof of the committed ledger header, if this QC commits one.
    pub fn ledger_proof(&self) -> Option<LedgerProof> {
        Some(LedgerProof {
            header: self.committed()?.ledger_header.clone(),
            signatures: self.signatures.clone(),
        })
    }

    /// Verifies the QC against the validator set of its epoch.
    pub fn verify(&self, validators: &BftValidatorSet) -> Result<(), CertificateVerifyError> {
        if self.is_genesis() {
            let vd = &self.vote_data;
            if !self.signatures.is_empty()
                || vd.parent != vd.proposed
                || vd.committed.as_ref() != Some(&vd.proposed)
            {
                return Err(CertificateVerifyError::MalformedGenesis);
            }
            return Ok(());
        }
        verify_quorum(&self.vote_data.hash(), &self.signatures, validators)
    }
}

/// Payload signed by a timeout signature.
pub fn timeout_hash(epoch: Epoch, view: View) -> Keccak256 {
    Keccak256Hasher::new("timeout")
        .u64(epoch.0)
        .u64(view.0)
        .finish()
}

/// A quorum of timeout signatures for a view. Proves that the view made no progress.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimeoutCertificate {
    /// Epoch of the timed out view.
    pub epoch: Epoch,
    /// Timed out view.
    pub view: View,
    /// Timeout signatures over `timeout_hash(epoch, view)`.
    pub signatures: BTreeMap<PublicKey, Signature>,
}

impl TimeoutCertificate {
    /// Verifies the TC against the validator set of its epoch.
    pub fn verify(&self, validators: &BftValidatorSet) -> Result<(), CertificateVerifyError> {
        verify_quorum(
            &timeout_hash(self.epoch, self.view),
            &self.signatures,
            validators,
        )
    }
}

/// The highest certificates known to a node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HighQc {
    /// Highest QC.
    pub highest_qc: QuorumCertificate,
    /// Highest QC which commits a vertex.
    pub highest_committed_qc: QuorumCertificate,
    /// Highest TC, if newer than the highest QC.
    pub highest_tc: Option<TimeoutCertificate>,
}

impl HighQc {
    /// High QC of a freshly started epoch.
    pub fn genesis(qc: QuorumCertificate) -> Self {
        Self {
            highest_qc: qc.clone(),
            highest_committed_qc: qc,
            highest_tc: None,
        }
    }

    /// Builds a high QC. The TC is dropped if it is not newer than the QC.
    pub fn new(
        highest_qc: QuorumCertificate,
        highest_committed_qc: QuorumCertificate,
        highest_tc: Option<TimeoutCertificate>,
    ) -> Self {
        let highest_tc = highest_tc.filter(|tc| tc.view > highest_qc.view());
        Self {
            highest_qc,
            highest_committed_qc,
            highest_tc,
        }
    }

    /// Epoch of the certificates.
    pub fn epoch(&self) -> Epoch {
        self.highest_qc.epoch()
    }

    /// Highest view certified either by the QC or by the TC.
    pub fn highest_view(&self) -> View {
        match &self.highest_tc {
            Some(tc) => tc.view.max(self.highest_qc.view()),
            None => self.highest_qc.view(),
        }
    }

    /// Verifies all certificates against the validator set.
    pub fn verify(&self, validators: &BftValidatorSet) -> Result<(), CertificateVerifyError> {
        self.highest_qc.verify(validators)?;
        self.highest_committed_qc.verify(validators)?;
        if let Some(tc) = &self.highest_tc {
            tc.verify(validators)?;
        }
        Ok(())
    }
}
