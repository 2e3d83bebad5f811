//! Metrics for the consensus module.

use std::time::Duration;

use vise::{
    Buckets, Counter, EncodeLabelSet, EncodeLabelValue, Family, Gauge, Histogram, LabeledFamily,
    Metrics, Unit,
};

/// Label for an input of the consensus component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EncodeLabelValue)]
#[metrics(rename_all = "snake_case")]
pub(crate) enum InputLabel {
    /// `Proposal` message.
    Proposal,
    /// `Vote` message.
    Vote,
    /// `GetVerticesRequest` message.
    GetVerticesRequest,
    /// `GetVerticesResponse` message.
    GetVerticesResponse,
    /// `GetVerticesErrorResponse` message.
    GetVerticesErrorResponse,
    /// `LedgerStatusUpdate` message.
    LedgerStatusUpdate,
    /// Pacemaker timeout.
    LocalTimeout,
    /// Sync request timeout.
    VertexRequestTimeout,
    /// Ledger update from outside of consensus.
    LedgerUpdate,
}

impl InputLabel {
    /// Attaches a result to this label.
    pub(crate) fn with_result<E>(self, result: &Result<(), E>) -> ProcessingLatencyLabels {
        ProcessingLatencyLabels {
            r#type: self,
            result: match result {
                Ok(()) => ResultLabel::Ok,
                Err(_) => ResultLabel::Err,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EncodeLabelValue)]
#[metrics(rename_all = "snake_case")]
enum ResultLabel {
    Ok,
    Err,
}

/// Labels for processing latency metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EncodeLabelSet)]
pub(crate) struct ProcessingLatencyLabels {
    r#type: InputLabel,
    result: ResultLabel,
}

/// Kind of misbehavior detected in a message of a validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EncodeLabelValue)]
#[metrics(rename_all = "snake_case")]
pub(crate) enum ByzantineLabel {
    /// Two different votes in the same view.
    Equivocation,
    /// Proposal from a validator which is not the view leader.
    InvalidLeader,
    /// Bad signature or a certificate below quorum.
    InvalidMessage,
}

/// Metrics defined by the consensus module.
#[derive(Debug, Metrics)]
#[metrics(prefix = "consensus")]
pub(crate) struct ConsensusMetrics {
    /// Current epoch of the node.
    pub(crate) epoch: Gauge<u64>,
    /// Current view of the pacemaker.
    pub(crate) current_view: Gauge<u64>,
    /// Number of views in which the local timeout fired at least once.
    pub(crate) timed_out_views: Counter,
    /// Number of timeout votes sent.
    pub(crate) timeouts_sent: Counter,
    /// Number of proposals sent.
    pub(crate) proposals_sent: Counter,
    /// Number of QCs formed from collected votes.
    pub(crate) vote_quorums: Counter,
    /// Number of TCs formed from collected timeout votes.
    pub(crate) timeout_quorums: Counter,
    /// Number of committed vertices.
    pub(crate) committed_vertices: Counter,
    /// View of the last committed vertex.
    pub(crate) committed_view: Gauge<u64>,
    /// Number of uncommitted vertices in the vertex store.
    pub(crate) vertex_store_size: Gauge<usize>,
    /// Number of `GetVerticesRequest`s sent.
    pub(crate) sync_requests_sent: Counter,
    /// Number of `GetVerticesRequest`s which timed out.
    pub(crate) sync_request_timeouts: Counter,
    /// Number of consensus events received from peers.
    pub(crate) events_received: Counter,
    /// Number of events from future epochs waiting for their epoch.
    pub(crate) queued_epoch_events: Gauge<usize>,
    /// Misbehavior detected in messages of other validators.
    #[metrics(labels = ["kind"])]
    pub(crate) byzantine_evidence: LabeledFamily<ByzantineLabel, Counter>,
    /// Latency of a single view as observed by this node.
    #[metrics(buckets = Buckets::exponential(0.125..=64.0, 2.0), unit = Unit::Seconds)]
    pub(crate) view_latency: Histogram<Duration>,
    /// Latency of processing inputs.
    #[metrics(buckets = Buckets::LATENCIES, unit = Unit::Seconds)]
    pub(crate) message_processing_latency: Family<ProcessingLatencyLabels, Histogram<Duration>>,
}

/// Global instance of [`ConsensusMetrics`].
#[vise::register]
pub(crate) static METRICS: vise::Global<ConsensusMetrics> = vise::Global::new();
