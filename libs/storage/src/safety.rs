//! Defines storage layer for persistent safety state.
use braid_consensus_roles::validator;
use std::fmt;

/// Storage for [`SafetyState`].
pub trait PersistentSafetyStateStore: 'static + fmt::Debug + Send + Sync {
    /// Gets the safety state, if it is contained in the database.
    fn load(&self) -> anyhow::Result<Option<SafetyState>>;

    /// Stores the given safety state durably.
    fn store(&self, state: &SafetyState) -> anyhow::Result<()>;
}

/// The state that prevents a validator from equivocating, even across restarts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SafetyState {
    /// Epoch the state belongs to. Views restart every epoch.
    pub epoch: validator::Epoch,
    /// The validator never votes for a vertex whose parent QC is older than this.
    pub locked_view: validator::View,
    /// The highest view the validator has voted in.
    pub last_voted_view: validator::View,
    /// The last vote, re-signed with a timeout signature if its view times out.
    pub last_vote: Option<validator::Vote>,
}

impl SafetyState {
    /// Fresh state for an epoch.
    pub fn new(epoch: validator::Epoch) -> Self {
        Self {
            epoch,
            locked_view: validator::View::genesis(),
            last_voted_view: validator::View::genesis(),
            last_vote: None,
        }
    }

    /// Last vote, if it was cast in the given view.
    pub fn last_vote_in(&self, view: validator::View) -> Option<&validator::Vote> {
        self.last_vote.as_ref().filter(|v| v.view() == view)
    }
}
