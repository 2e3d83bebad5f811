//! Events flowing through the consensus pipeline.
use crate::PreparedVertex;
use braid_consensus_roles::validator;
use std::time::Duration;

/// Consensus event received from a peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConsensusEvent {
    /// Proposal of a view leader.
    Proposal(validator::Proposal),
    /// Vote, possibly with a timeout signature.
    Vote(validator::Vote),
}

impl ConsensusEvent {
    /// Epoch of the event.
    pub fn epoch(&self) -> validator::Epoch {
        match self {
            Self::Proposal(p) => p.epoch(),
            Self::Vote(v) => v.epoch(),
        }
    }

    /// View of the event.
    pub fn view(&self) -> validator::View {
        match self {
            Self::Proposal(p) => p.view(),
            Self::Vote(v) => v.view(),
        }
    }

    /// High QC the author had when creating the event.
    pub fn high_qc(&self) -> &validator::HighQc {
        match self {
            Self::Proposal(p) => &p.high_qc,
            Self::Vote(v) => &v.high_qc,
        }
    }

    /// Author of the event, if known.
    pub fn author(&self) -> Option<&validator::PublicKey> {
        match self {
            Self::Proposal(p) => p.author(),
            Self::Vote(v) => Some(&v.author),
        }
    }

    /// Label of the event kind.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Proposal(_) => "Proposal",
            Self::Vote(_) => "Vote",
        }
    }
}

/// The pacemaker entered a new view.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ViewUpdate {
    /// The new current view.
    pub view: validator::View,
    /// High QC which justified the view change.
    pub high_qc: validator::HighQc,
    /// Leader of the current view.
    pub leader: validator::PublicKey,
    /// Leader of the next view. Votes of the current view are sent to it.
    pub next_leader: validator::PublicKey,
}

impl ViewUpdate {
    /// Number of views since the view of the highest committing QC.
    pub fn uncommitted_views(&self) -> u64 {
        self.view
            .0
            .saturating_sub(self.high_qc.highest_committed_qc.view().0)
            .saturating_sub(1)
    }
}

/// A vertex was inserted into the vertex store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BftInsertUpdate {
    /// The inserted vertex.
    pub inserted: PreparedVertex,
    /// Number of vertices in the store after the insertion.
    pub vertex_store_size: usize,
}

/// Local timeout of a view.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScheduledLocalTimeout {
    /// View update which started the view.
    pub view_update: ViewUpdate,
    /// Duration the timeout was scheduled with.
    pub delay: Duration,
    /// Number of times the timeout already fired for this view.
    pub count: u32,
}

impl ScheduledLocalTimeout {
    /// First timeout of the view.
    pub fn new(view_update: ViewUpdate, delay: Duration) -> Self {
        Self {
            view_update,
            delay,
            count: 0,
        }
    }

    /// Timed out view.
    pub fn view(&self) -> validator::View {
        self.view_update.view
    }

    /// The timeout to schedule after this one fired.
    pub fn next_retry(&self, delay: Duration) -> Self {
        Self {
            view_update: self.view_update.clone(),
            delay,
            count: self.count.saturating_add(1),
        }
    }
}

/// A `GetVerticesRequest` went unanswered for too long.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VertexRequestTimeout {
    /// The request.
    pub request: validator::GetVerticesRequest,
}

/// Event scheduled on a timer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TimerEvent {
    /// Pacemaker timeout.
    LocalTimeout {
        /// Epoch of the timeout.
        epoch: validator::Epoch,
        /// Timeout.
        timeout: ScheduledLocalTimeout,
    },
    /// Sync request timeout.
    VertexRequest {
        /// Epoch of the request.
        epoch: validator::Epoch,
        /// Timeout.
        timeout: VertexRequestTimeout,
    },
}

impl TimerEvent {
    /// Epoch in which the timer was scheduled.
    pub fn epoch(&self) -> validator::Epoch {
        match self {
            Self::LocalTimeout { epoch, .. } | Self::VertexRequest { epoch, .. } => *epoch,
        }
    }

    /// Label of the timer kind.
    pub fn label(&self) -> &'static str {
        match self {
            Self::LocalTimeout { .. } => "LocalTimeout",
            Self::VertexRequest { .. } => "VertexRequestTimeout",
        }
    }
}
