//! Consensus of a single epoch.
//!
//! Messages from peers pass through three stages:
//! the verifier drops messages with bad signatures or certificates, the preprocessor
//! holds back events until their high QC is synced and their view is reached, and the
//! reducer turns them into vertex insertions, votes and certificates.
//! Local events (view changes, insertions) are queued and processed after each input,
//! so that no handler ever re-enters another one.
use crate::{
    config::Config,
    event::{BftInsertUpdate, ConsensusEvent, TimerEvent, ViewUpdate},
    io::OutputMessage,
    pacemaker::Pacemaker,
    safety_rules::SafetyRules,
    sync::BftSync,
    vertex_store::{InsertError, VertexStore},
    vote_aggregator::{Equivocation, VoteAggregator, VoteRejection},
    LedgerUpdate,
};
use anyhow::Context as _;
use braid_consensus_roles::validator;
use std::{collections::VecDeque, sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

mod preprocessor;
mod reducer;
#[cfg(test)]
pub(crate) mod testonly;
mod verifier;

pub(crate) use preprocessor::Preprocessor;
pub(crate) use verifier::VerifyError;

/// Errors that can occur when processing a message.
#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    /// Event for a view the node already left.
    #[error("event for a past view (current view: {current_view})")]
    Old {
        /// Current view of the node.
        current_view: validator::View,
    },
    /// Message failed verification.
    #[error("invalid message: {0:#}")]
    Invalid(#[from] VerifyError),
    /// Event of a view too far ahead of the current one to be queued.
    #[error("event for view {view} is too far ahead (current view: {current_view})")]
    TooFarAhead {
        /// View of the event.
        view: validator::View,
        /// Current view of the node.
        current_view: validator::View,
    },
    /// Vote for a view this node doesn't lead next.
    #[error("not the next leader of view {view}")]
    NotNextLeader {
        /// View of the vote.
        view: validator::View,
    },
    /// High QC of the event is behind the committed root.
    #[error("high QC of the event is below the committed root")]
    StaleHighQc,
    /// Vote was not aggregated.
    #[error("vote rejected: {0:?}")]
    VoteRejected(VoteRejection),
    /// Author voted twice in the same view.
    #[error("equivocation in view {}", .0.first.vote_data.proposed.view)]
    Equivocation(Box<Equivocation>),
    /// Proposed vertex can't be inserted.
    #[error("failed to insert the proposed vertex: {0:#}")]
    Insert(#[source] InsertError),
    /// Internal error. Unlike other error types, this one isn't supposed to be easily recoverable.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl Error {
    /// Errors which happen routinely between honest nodes.
    pub(crate) fn is_benign(&self) -> bool {
        matches!(
            self,
            Self::Old { .. }
                | Self::TooFarAhead { .. }
                | Self::NotNextLeader { .. }
                | Self::StaleHighQc
                | Self::VoteRejected(VoteRejection::DuplicateVote | VoteRejection::Stale)
        )
    }
}

/// Event produced while processing an input, handled before the next input.
#[derive(Debug)]
pub(crate) enum LocalEvent {
    /// The pacemaker moved to a new view.
    ViewUpdate(ViewUpdate),
    /// A vertex was inserted into the store.
    Inserted(BftInsertUpdate),
}

/// State of consensus in an epoch this node validates in.
#[derive(Debug)]
pub(crate) struct EpochContext {
    pub(crate) config: Arc<Config>,
    pub(crate) me: validator::PublicKey,
    pub(crate) epoch: validator::Epoch,
    pub(crate) validators: validator::BftValidatorSet,
    outbound: mpsc::UnboundedSender<OutputMessage>,
    /// Cancelled once the epoch ends, which discards the pending timers.
    cancel: CancellationToken,
    pub(crate) vertex_store: VertexStore,
    pub(crate) safety_rules: SafetyRules,
    pub(crate) pacemaker: Pacemaker,
    pub(crate) vote_aggregator: VoteAggregator,
    pub(crate) sync: BftSync,
    pub(crate) preprocessor: Preprocessor,
    /// Set once a QC or TC was formed in the current view; later votes of the view are ignored.
    pub(crate) has_reached_quorum: bool,
    pub(crate) local_events: VecDeque<LocalEvent>,
    /// Commits not yet reported to the epoch manager.
    pub(crate) ledger_updates: Vec<LedgerUpdate>,
}

impl EpochContext {
    /// Builds the context of the epoch. A persisted vertex store of the same epoch takes
    /// precedence over the initial state of the configuration.
    pub(crate) fn new(
        config: Arc<Config>,
        configuration: &validator::BftConfiguration,
        outbound: mpsc::UnboundedSender<OutputMessage>,
        cancel: CancellationToken,
    ) -> anyhow::Result<Self> {
        let me = config.me();
        let epoch = configuration.epoch();
        let validators = configuration.validator_set.clone();
        let state = match config.vertex_store.load().context("vertex_store.load()")? {
            Some(state) if state.epoch() == epoch => {
                tracing::info!(%epoch, root_view = %state.root().view(), "recovering vertex store");
                state
            }
            _ => configuration.vertex_store_state.clone(),
        };
        let vertex_store =
            VertexStore::new(state, config.ledger.clone(), config.vertex_store.clone())?;
        let safety_rules = SafetyRules::new(
            config.secret_key.clone(),
            epoch,
            validators.clone(),
            config.safety_store.clone(),
        )?;
        let pacemaker = Pacemaker::new(config.pacemaker.clone(), validators.clone());
        let sync = BftSync::new(
            config.sync_patience,
            vertex_store.root().ledger_header().clone(),
        );
        Ok(Self {
            me,
            epoch,
            validators,
            outbound,
            cancel,
            vertex_store,
            safety_rules,
            pacemaker,
            vote_aggregator: VoteAggregator::default(),
            sync,
            preprocessor: Preprocessor::default(),
            has_reached_quorum: false,
            local_events: VecDeque::new(),
            ledger_updates: vec![],
            config,
        })
    }

    /// Enters the first view, justified by the high QC of the store.
    pub(crate) fn start(&mut self) -> anyhow::Result<()> {
        if let Some(update) = self
            .pacemaker
            .process_qc(self.vertex_store.high_qc().clone())
        {
            self.local_events.push_back(LocalEvent::ViewUpdate(update));
        }
        self.process_local_events()
    }

    /// Ends the epoch. Pending timers won't fire anymore.
    pub(crate) fn stop(&self) {
        self.cancel.cancel();
    }

    /// Processes a proposal or a vote from a peer.
    pub(crate) fn process_consensus_event(&mut self, event: ConsensusEvent) -> Result<(), Error> {
        crate::metrics::METRICS.events_received.inc();
        self.verify_event(&event)?;
        let res = self.preprocess(event);
        self.process_local_events()?;
        res
    }

    /// Processes a sync message from a peer.
    pub(crate) fn process_sync_msg(
        &mut self,
        sender: validator::PublicKey,
        msg: validator::ConsensusMsg,
    ) -> Result<(), Error> {
        match msg {
            validator::ConsensusMsg::GetVerticesRequest(request) => {
                self.process_get_vertices_request(sender, request);
            }
            validator::ConsensusMsg::GetVerticesResponse(response) => {
                let vertices = self.verify_get_vertices_response(response)?;
                self.process_get_vertices_response(&sender, vertices)?;
            }
            validator::ConsensusMsg::GetVerticesErrorResponse(response) => {
                self.verify_get_vertices_error_response(&response)?;
                self.process_get_vertices_error_response(&sender, response)?;
            }
            msg => {
                return Err(Error::Internal(anyhow::format_err!(
                    "{} is not a sync message",
                    msg.label()
                )))
            }
        }
        self.process_local_events()?;
        Ok(())
    }

    /// Processes a timer scheduled in this epoch.
    pub(crate) fn process_timer(&mut self, event: TimerEvent) -> anyhow::Result<()> {
        match event {
            TimerEvent::LocalTimeout { timeout, .. } => self.process_local_timeout(timeout)?,
            TimerEvent::VertexRequest { timeout, .. } => {
                self.process_vertex_request_timeout(timeout)?
            }
        }
        self.process_local_events()
    }

    /// Processes a ledger update which didn't originate from this context, e.g. a finished ledger sync.
    pub(crate) fn process_ledger_update(&mut self, update: &LedgerUpdate) -> anyhow::Result<()> {
        self.sync_ledger_update(update)?;
        self.process_local_events()
    }

    /// Commits made since the last call.
    pub(crate) fn take_ledger_updates(&mut self) -> Vec<LedgerUpdate> {
        std::mem::take(&mut self.ledger_updates)
    }

    fn process_local_events(&mut self) -> anyhow::Result<()> {
        while let Some(event) = self.local_events.pop_front() {
            match event {
                LocalEvent::ViewUpdate(update) => {
                    if self.start_view(&update)? {
                        self.has_reached_quorum = false;
                        self.preprocessor_on_view_update(&update)?;
                    }
                }
                LocalEvent::Inserted(update) => {
                    self.pacemaker_on_insert(&update)?;
                    self.reducer_on_insert(&update)?;
                    self.preprocessor_on_insert(&update)?;
                }
            }
        }
        Ok(())
    }

    pub(crate) fn output(&self, msg: OutputMessage) {
        // Closed only during shutdown.
        let _ = self.outbound.send(msg);
    }

    pub(crate) fn send(&self, target: validator::PublicKey, msg: validator::ConsensusMsg) {
        self.output(OutputMessage::Network { target, msg });
    }

    /// Sends the message to every validator of the epoch, this node included.
    pub(crate) fn broadcast(&self, msg: validator::ConsensusMsg) {
        for target in self.validators.nodes() {
            self.send(target.clone(), msg.clone());
        }
    }

    pub(crate) fn schedule_timer(&self, event: TimerEvent, delay: Duration) {
        self.output(OutputMessage::Timer {
            event,
            delay,
            cancel: self.cancel.clone(),
        });
    }
}
