//! Voting and signing rules which keep an honest validator from equivocating.
//!
//! Every signature produced by a node passes through [`SafetyRules`]. The state
//! that prevents double votes is persisted before a vote is returned, so a
//! restarted node never contradicts votes it sent before the crash.
use crate::PreparedVertex;
use anyhow::Context as _;
use braid_consensus_roles::validator;
use braid_consensus_storage::{PersistentSafetyStateStore, SafetyState};
use std::sync::Arc;


/// Errors that can occur when signing.
#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    /// Already voted in this or a later view.
    #[error("already voted in view {last_voted_view} (vertex view: {view})")]
    DoubleVote {
        /// View of the rejected vote.
        view: validator::View,
        /// Last view this node voted in.
        last_voted_view: validator::View,
    },
    /// Vertex doesn't extend the locked branch.
    #[error("vertex parent QC view {qc_view} is below the locked view {locked_view}")]
    Locked {
        /// View of the vertex parent QC.
        qc_view: validator::View,
        /// Locked view.
        locked_view: validator::View,
    },
    /// This node is not the proposer of the vertex.
    #[error("not the proposer of view {view}")]
    NotProposer {
        /// View of the vertex.
        view: validator::View,
    },
    /// Internal error. Unlike other error types, this one isn't supposed to be easily recoverable.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Signer of votes and proposals.
#[derive(Debug)]
pub(crate) struct SafetyRules {
    key: validator::SecretKey,
    validators: validator::BftValidatorSet,
    store: Arc<dyn PersistentSafetyStateStore>,
    state: SafetyState,
}

impl SafetyRules {
    /// Loads the persisted state. A state from an older epoch is replaced with
    /// a fresh one, since views restart every epoch.
    pub(crate) fn new(
        key: validator::SecretKey,
        epoch: validator::Epoch,
        validators: validator::BftValidatorSet,
        store: Arc<dyn PersistentSafetyStateStore>,
    ) -> anyhow::Result<Self> {
        let state = match store.load().context("store.load()")? {
            Some(state) if state.epoch == epoch => state,
            Some(state) if state.epoch > epoch => {
                anyhow::bail!(
                    "persisted safety state is from epoch {}, ahead of {epoch}",
                    state.epoch
                );
            }
            _ => SafetyState::new(epoch),
        };
        tracing::debug!(
            %epoch,
            locked_view = %state.locked_view,
            last_voted_view = %state.last_voted_view,
            "safety rules initialized"
        );
        Ok(Self {
            key,
            validators,
            store,
            state,
        })
    }

    /// Current state.
    pub(crate) fn state(&self) -> &SafetyState {
        &self.state
    }

    /// Vote cast in `view`, if any.
    pub(crate) fn last_vote_in(&self, view: validator::View) -> Option<&validator::Vote> {
        self.state.last_vote_in(view)
    }

    /// Votes for a prepared vertex.
    pub(crate) fn vote_for(
        &mut self,
        prepared: &PreparedVertex,
        high_qc: validator::HighQc,
    ) -> Result<validator::Vote, Error> {
        let vertex = prepared.vertex();
        if vertex.view() <= self.state.last_voted_view {
            return Err(Error::DoubleVote {
                view: vertex.view(),
                last_voted_view: self.state.last_voted_view,
            });
        }
        self.check_locked(vertex)?;

        let vote_data = validator::VoteData::new(vertex, prepared.header());
        let vote = validator::Vote::new(&self.key, vote_data, high_qc);
        let mut state = self.state.clone();
        state.locked_view = state.locked_view.max(vertex.qc().view());
        state.last_voted_view = vertex.view();
        state.last_vote = Some(vote.clone());
        self.persist(state)?;
        Ok(vote)
    }

    /// Produces the timeout vote of `view`. Re-signs the vote already cast in the
    /// view, or votes for `fallback`, the empty vertex of the view, if there is none.
    pub(crate) fn timeout_for(
        &mut self,
        view: validator::View,
        fallback: &PreparedVertex,
        high_qc: validator::HighQc,
    ) -> Result<validator::Vote, Error> {
        if view < self.state.last_voted_view {
            return Err(Error::DoubleVote {
                view,
                last_voted_view: self.state.last_voted_view,
            });
        }
        let vote = match self.last_vote_in(view) {
            Some(vote) => vote.clone(),
            None => self.vote_for(fallback, high_qc)?,
        };
        self.timeout_vote(vote)
    }

    /// Adds a timeout signature to a vote cast before.
    pub(crate) fn timeout_vote(&mut self, vote: validator::Vote) -> Result<validator::Vote, Error> {
        if vote.is_timeout() {
            return Ok(vote);
        }
        if vote.view() < self.state.last_voted_view {
            return Err(Error::DoubleVote {
                view: vote.view(),
                last_voted_view: self.state.last_voted_view,
            });
        }
        let vote = vote.with_timeout(&self.key);
        let mut state = self.state.clone();
        state.last_voted_view = vote.view();
        state.last_vote = Some(vote.clone());
        self.persist(state)?;
        Ok(vote)
    }

    /// Signs a proposal of this node. Only the leader of the vertex view may propose,
    /// and the vertex has to respect the lock.
    pub(crate) fn sign_proposal(
        &mut self,
        vertex: validator::VerifiedVertex,
        high_qc: validator::HighQc,
    ) -> Result<validator::Proposal, Error> {
        let me = self.key.public();
        if vertex.proposer() != Some(&me) || self.validators.view_leader(vertex.view()) != me {
            return Err(Error::NotProposer {
                view: vertex.view(),
            });
        }
        self.check_locked(&vertex)?;
        let locked_view = self.state.locked_view.max(vertex.qc().view());
        if locked_view != self.state.locked_view {
            let mut state = self.state.clone();
            state.locked_view = locked_view;
            self.persist(state)?;
        }
        Ok(validator::Proposal::new(
            &self.key,
            vertex.vertex().clone(),
            high_qc,
        ))
    }

    fn check_locked(&self, vertex: &validator::VerifiedVertex) -> Result<(), Error> {
        if vertex.qc().view() < self.state.locked_view {
            return Err(Error::Locked {
                qc_view: vertex.qc().view(),
                locked_view: self.state.locked_view,
            });
        }
        Ok(())
    }

    /// Stores the state durably, then makes it current.
    fn persist(&mut self, state: SafetyState) -> anyhow::Result<()> {
        self.store
            .store(&state)
            .context("failed to persist safety state")?;
        self.state = state;
        Ok(())
    }
}
