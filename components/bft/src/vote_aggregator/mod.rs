//! Aggregation of votes into quorum and timeout certificates.
use braid_consensus_crypto::keccak256::Keccak256;
use braid_consensus_roles::validator;
use std::collections::{BTreeMap, HashMap, HashSet};


/// Two votes of the same validator in the same view for different data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Equivocation {
    /// The vote received first.
    pub first: validator::Vote,
    /// The conflicting vote.
    pub second: validator::Vote,
}

/// Why a vote was not aggregated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VoteRejection {
    /// Author is not in the validator set.
    InvalidAuthor,
    /// Author already voted in this view for the same data.
    DuplicateVote,
    /// Author already voted in a later view.
    Stale,
    /// Author already voted in this view for different data.
    Equivocation(Box<Equivocation>),
}

/// A certificate formed from collected votes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Quorum {
    /// Votes for the same vote data.
    Qc(validator::QuorumCertificate),
    /// Timeout signatures for the same view.
    Tc(validator::TimeoutCertificate),
}

/// Result of [`VoteAggregator::process_vote`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VoteOutcome {
    /// Vote was aggregated, no new quorum.
    Accepted,
    /// Vote was not aggregated.
    Rejected(VoteRejection),
    /// Vote completed a quorum. Returned once per view and certificate kind.
    QuorumReached(Quorum),
}

/// The vote of a validator currently counted in the aggregates.
#[derive(Debug)]
struct PreviousVote {
    vote: validator::Vote,
    hash: Keccak256,
}

/// Signatures collected for the same vote data.
#[derive(Debug)]
struct QcBuilder {
    vote_data: validator::VoteData,
    signatures: BTreeMap<validator::PublicKey, validator::Signature>,
}

/// Collects votes of the current epoch. Every validator contributes its latest vote only.
#[derive(Debug, Default)]
pub struct VoteAggregator {
    previous_votes: HashMap<validator::PublicKey, PreviousVote>,
    qc_builders: HashMap<Keccak256, QcBuilder>,
    tc_builders: HashMap<validator::View, BTreeMap<validator::PublicKey, validator::Signature>>,
    /// `(view, is_timeout)` pairs for which a quorum was already returned.
    reached: HashSet<(validator::View, bool)>,
    evidence: Vec<Equivocation>,
}

impl VoteAggregator {
    /// Processes a vote. Signatures are expected to be verified already.
    pub fn process_vote(
        &mut self,
        vote: &validator::Vote,
        validators: &validator::BftValidatorSet,
    ) -> VoteOutcome {
        if !validators.contains(&vote.author) {
            return VoteOutcome::Rejected(VoteRejection::InvalidAuthor);
        }
        let hash = vote.vote_data.hash();
        if let Err(rejection) = self.replace_previous_vote(vote, hash) {
            return VoteOutcome::Rejected(rejection);
        }
        if let Some(qc) = self.process_vote_for_qc(vote, hash, validators) {
            return VoteOutcome::QuorumReached(Quorum::Qc(qc));
        }
        if let Some(tc) = self.process_vote_for_tc(vote, validators) {
            return VoteOutcome::QuorumReached(Quorum::Tc(tc));
        }
        VoteOutcome::Accepted
    }

    /// Equivocations detected so far.
    pub fn evidence(&self) -> &[Equivocation] {
        &self.evidence
    }

    /// Records `vote` as the latest vote of its author, removing the author's
    /// contribution from older views.
    fn replace_previous_vote(
        &mut self,
        vote: &validator::Vote,
        hash: Keccak256,
    ) -> Result<(), VoteRejection> {
        if let Some(prev) = self.previous_votes.get(&vote.author) {
            match prev.vote.view().cmp(&vote.view()) {
                std::cmp::Ordering::Greater => return Err(VoteRejection::Stale),
                std::cmp::Ordering::Equal => {
                    if prev.hash != hash {
                        let evidence = Equivocation {
                            first: prev.vote.clone(),
                            second: vote.clone(),
                        };
                        self.evidence.push(evidence.clone());
                        return Err(VoteRejection::Equivocation(Box::new(evidence)));
                    }
                    // The same vote may be re-sent once, with a timeout signature added.
                    if prev.vote.is_timeout() || !vote.is_timeout() {
                        return Err(VoteRejection::DuplicateVote);
                    }
                }
                std::cmp::Ordering::Less => {
                    let prev_view = prev.vote.view();
                    let prev_hash = prev.hash;
                    self.remove_contribution(&vote.author, prev_view, prev_hash);
                }
            }
        }
        self.previous_votes.insert(
            vote.author.clone(),
            PreviousVote {
                vote: vote.clone(),
                hash,
            },
        );
        Ok(())
    }

    fn remove_contribution(
        &mut self,
        author: &validator::PublicKey,
        view: validator::View,
        hash: Keccak256,
    ) {
        if let Some(builder) = self.qc_builders.get_mut(&hash) {
            builder.signatures.remove(author);
            if builder.signatures.is_empty() {
                self.qc_builders.remove(&hash);
            }
        }
        if let Some(signatures) = self.tc_builders.get_mut(&view) {
            signatures.remove(author);
            if signatures.is_empty() {
                self.tc_builders.remove(&view);
            }
        }
    }

    fn process_vote_for_qc(
        &mut self,
        vote: &validator::Vote,
        hash: Keccak256,
        validators: &validator::BftValidatorSet,
    ) -> Option<validator::QuorumCertificate> {
        let builder = self.qc_builders.entry(hash).or_insert_with(|| QcBuilder {
            vote_data: vote.vote_data.clone(),
            signatures: BTreeMap::new(),
        });
        builder
            .signatures
            .insert(vote.author.clone(), vote.signature.clone());
        if validators.power_of(builder.signatures.keys()) < validators.quorum_threshold() {
            return None;
        }
        if !self.reached.insert((vote.view(), false)) {
            return None;
        }
        Some(validator::QuorumCertificate {
            vote_data: builder.vote_data.clone(),
            signatures: builder.signatures.clone(),
        })
    }

    fn process_vote_for_tc(
        &mut self,
        vote: &validator::Vote,
        validators: &validator::BftValidatorSet,
    ) -> Option<validator::TimeoutCertificate> {
        let sig = vote.timeout_signature.as_ref()?;
        let signatures = self.tc_builders.entry(vote.view()).or_default();
        signatures.insert(vote.author.clone(), sig.clone());
        if validators.power_of(signatures.keys()) < validators.quorum_threshold() {
            return None;
        }
        if !self.reached.insert((vote.view(), true)) {
            return None;
        }
        Some(validator::TimeoutCertificate {
            epoch: vote.epoch(),
            view: vote.view(),
            signatures: signatures.clone(),
        })
    }
}
