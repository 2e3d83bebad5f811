//! Epoch lifecycle. Routes inputs to the context of the current epoch and replaces the
//! context whenever a commit ends the epoch.
use crate::{
    config::Config,
    event::{ConsensusEvent, TimerEvent},
    io::{InputMessage, OutputMessage},
    metrics::{InputLabel, METRICS},
    pipeline::{EpochContext, Error},
    LedgerUpdate,
};
use anyhow::Context as _;
use braid_consensus_roles::validator;
use std::{collections::VecDeque, sync::Arc, time::Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;


/// Consensus state of the current epoch.
#[derive(Debug)]
enum EpochState {
    /// This node validates in the epoch.
    Active(Box<EpochContext>),
    /// This node is not a validator of the epoch. Consensus messages are ignored.
    Inactive,
}

/// Owns the consensus state of the current epoch.
#[derive(Debug)]
pub(crate) struct EpochManager {
    config: Arc<Config>,
    outbound: mpsc::UnboundedSender<OutputMessage>,
    epoch: validator::Epoch,
    validators: validator::BftValidatorSet,
    state: EpochState,
    /// Consensus events of future epochs, oldest first.
    queued: VecDeque<ConsensusEvent>,
}

impl EpochManager {
    /// Manager starting in the epoch of the given configuration.
    pub(crate) fn new(
        config: Arc<Config>,
        outbound: mpsc::UnboundedSender<OutputMessage>,
        initial: validator::BftConfiguration,
    ) -> anyhow::Result<Self> {
        let epoch = initial.epoch();
        let state = Self::make_state(&config, &outbound, &initial)?;
        METRICS.epoch.set(epoch.0);
        Ok(Self {
            config,
            outbound,
            epoch,
            validators: initial.validator_set,
            state,
            queued: VecDeque::new(),
        })
    }

    fn make_state(
        config: &Arc<Config>,
        outbound: &mpsc::UnboundedSender<OutputMessage>,
        configuration: &validator::BftConfiguration,
    ) -> anyhow::Result<EpochState> {
        if !configuration.validator_set.contains(&config.me()) {
            tracing::info!(epoch = %configuration.epoch(), "not a validator of the epoch");
            return Ok(EpochState::Inactive);
        }
        let ctx = EpochContext::new(
            config.clone(),
            configuration,
            outbound.clone(),
            CancellationToken::new(),
        )
        .context("EpochContext::new()")?;
        Ok(EpochState::Active(Box::new(ctx)))
    }

    /// Current epoch.
    pub(crate) fn epoch(&self) -> validator::Epoch {
        self.epoch
    }

    /// Whether this node validates in the current epoch.
    pub(crate) fn is_active(&self) -> bool {
        matches!(self.state, EpochState::Active(_))
    }

    /// Context of the current epoch, if this node validates in it.
    #[cfg(test)]
    pub(crate) fn context(&self) -> Option<&EpochContext> {
        match &self.state {
            EpochState::Active(ctx) => Some(&**ctx),
            EpochState::Inactive => None,
        }
    }

    /// Number of consensus events waiting for a future epoch.
    #[cfg(test)]
    pub(crate) fn queued_events(&self) -> usize {
        self.queued.len()
    }

    /// Starts consensus in the current epoch.
    pub(crate) fn start(&mut self) -> anyhow::Result<()> {
        tracing::info!(epoch = %self.epoch, active = self.is_active(), "starting epoch");
        if let EpochState::Active(ctx) = &mut self.state {
            ctx.start()?;
        }
        self.process_ledger_updates()
    }

    /// Processes a single input. Only internal errors are returned;
    /// invalid and stale inputs are logged and dropped.
    pub(crate) fn process(&mut self, input: InputMessage) -> anyhow::Result<()> {
        let now = Instant::now();
        let (label, res) = match input {
            InputMessage::Network { sender, msg } => self.process_network(sender, msg),
            InputMessage::Timer(event) => {
                let label = match &event {
                    TimerEvent::LocalTimeout { .. } => InputLabel::LocalTimeout,
                    TimerEvent::VertexRequest { .. } => InputLabel::VertexRequestTimeout,
                };
                (label, self.process_timer(event).map_err(Error::Internal))
            }
            InputMessage::LedgerUpdate(update) => (
                InputLabel::LedgerUpdate,
                self.process_ledger_update(update).map_err(Error::Internal),
            ),
        };
        METRICS.message_processing_latency[&label.with_result(&res)].observe(now.elapsed());
        match res {
            Ok(()) => {}
            Err(Error::Internal(err)) => {
                tracing::error!(?label, "internal error: {err:#}");
                return Err(err);
            }
            Err(err) if err.is_benign() => tracing::debug!(?label, "{err:#}"),
            Err(err) => tracing::warn!(?label, "{err:#}"),
        }
        self.process_ledger_updates()
    }

    fn process_network(
        &mut self,
        sender: validator::PublicKey,
        msg: validator::ConsensusMsg,
    ) -> (InputLabel, Result<(), Error>) {
        match msg {
            validator::ConsensusMsg::Proposal(proposal) => (
                InputLabel::Proposal,
                self.process_consensus_event(ConsensusEvent::Proposal(proposal)),
            ),
            validator::ConsensusMsg::Vote(vote) => (
                InputLabel::Vote,
                self.process_consensus_event(ConsensusEvent::Vote(vote)),
            ),
            validator::ConsensusMsg::LedgerStatusUpdate(update) => {
                self.process_ledger_status_update(sender, update);
                (InputLabel::LedgerStatusUpdate, Ok(()))
            }
            msg => {
                let label = match &msg {
                    validator::ConsensusMsg::GetVerticesRequest(_) => {
                        InputLabel::GetVerticesRequest
                    }
                    validator::ConsensusMsg::GetVerticesResponse(_) => {
                        InputLabel::GetVerticesResponse
                    }
                    _ => InputLabel::GetVerticesErrorResponse,
                };
                (label, self.process_sync_msg(sender, msg))
            }
        }
    }

    fn process_consensus_event(&mut self, event: ConsensusEvent) -> Result<(), Error> {
        let epoch = event.epoch();
        if epoch < self.epoch {
            tracing::trace!(%epoch, current = %self.epoch, "dropping event of a past epoch");
            return Ok(());
        }
        if epoch > self.epoch {
            tracing::debug!(%epoch, current = %self.epoch, view = %event.view(), "queueing event of a future epoch");
            if self.queued.len() >= self.config.max_queued_epoch_events {
                self.queued.pop_front();
            }
            self.queued.push_back(event);
            METRICS.queued_epoch_events.set(self.queued.len());
            return Ok(());
        }
        match &mut self.state {
            EpochState::Active(ctx) => ctx.process_consensus_event(event),
            EpochState::Inactive => Ok(()),
        }
    }

    fn process_sync_msg(
        &mut self,
        sender: validator::PublicKey,
        msg: validator::ConsensusMsg,
    ) -> Result<(), Error> {
        if let Some(epoch) = msg.epoch() {
            if epoch != self.epoch {
                if epoch > self.epoch {
                    tracing::debug!(%epoch, current = %self.epoch, peer = ?sender, "peer is in a later epoch");
                }
                return Ok(());
            }
        }
        match &mut self.state {
            EpochState::Active(ctx) => ctx.process_sync_msg(sender, msg),
            EpochState::Inactive => Ok(()),
        }
    }

    /// A peer started a later epoch: the ledger has to catch up with it.
    fn process_ledger_status_update(
        &mut self,
        sender: validator::PublicKey,
        update: validator::LedgerStatusUpdate,
    ) {
        let epoch = update.proof.header.epoch;
        if epoch <= self.epoch {
            tracing::trace!(%epoch, current = %self.epoch, "ignoring ledger status update");
            return;
        }
        tracing::info!(%epoch, current = %self.epoch, peer = ?sender, "peer is in a later epoch, syncing ledger");
        let _ = self.outbound.send(OutputMessage::LedgerSyncRequired {
            proof: update.proof,
            peers: vec![sender],
        });
    }

    fn process_timer(&mut self, event: TimerEvent) -> anyhow::Result<()> {
        if event.epoch() != self.epoch {
            tracing::trace!(epoch = %event.epoch(), current = %self.epoch, label = event.label(), "dropping timer of another epoch");
            return Ok(());
        }
        match &mut self.state {
            EpochState::Active(ctx) => ctx.process_timer(event),
            EpochState::Inactive => Ok(()),
        }
    }

    fn process_ledger_update(&mut self, update: LedgerUpdate) -> anyhow::Result<()> {
        if let EpochState::Active(ctx) = &mut self.state {
            ctx.process_ledger_update(&update)?;
        }
        self.apply_epoch_change(update)
    }

    /// Handles the commits of the current context, which may end the epoch.
    fn process_ledger_updates(&mut self) -> anyhow::Result<()> {
        loop {
            let updates = match &mut self.state {
                EpochState::Active(ctx) => ctx.take_ledger_updates(),
                EpochState::Inactive => return Ok(()),
            };
            if updates.is_empty() {
                return Ok(());
            }
            for update in updates {
                self.apply_epoch_change(update)?;
            }
        }
    }

    fn apply_epoch_change(&mut self, update: LedgerUpdate) -> anyhow::Result<()> {
        let Some(change) = update.epoch_change else {
            return Ok(());
        };
        if change.epoch() <= self.epoch {
            tracing::debug!(epoch = %change.epoch(), current = %self.epoch, "epoch change already applied");
            return Ok(());
        }
        self.switch_epoch(change)
    }

    /// Replaces the context of the current epoch with the one of the next epoch.
    pub(crate) fn switch_epoch(&mut self, change: validator::EpochChange) -> anyhow::Result<()> {
        let next = change.epoch();
        anyhow::ensure!(
            next == self.epoch.next(),
            "bad epoch change to epoch {next}, current epoch {}",
            self.epoch
        );
        tracing::info!(epoch = %next, validators = change.configuration.validator_set.len(), "switching epoch");
        let me = self.config.me();
        if self.validators.contains(&me) {
            // Peers which are behind learn about the new epoch from us.
            let update = validator::LedgerStatusUpdate {
                proof: validator::LedgerProof::genesis(change.genesis_header().clone()),
            };
            let mut targets: Vec<_> = self
                .validators
                .nodes()
                .chain(change.configuration.validator_set.nodes())
                .filter(|node| *node != &me)
                .cloned()
                .collect();
            targets.sort();
            targets.dedup();
            for target in targets {
                let _ = self.outbound.send(OutputMessage::Network {
                    target,
                    msg: validator::ConsensusMsg::LedgerStatusUpdate(update.clone()),
                });
            }
        }

        if let EpochState::Active(ctx) = &self.state {
            ctx.stop();
        }
        self.state = Self::make_state(&self.config, &self.outbound, &change.configuration)?;
        self.epoch = next;
        self.validators = change.configuration.validator_set;
        METRICS.epoch.set(next.0);

        let queued = std::mem::take(&mut self.queued);
        let (ready, later): (Vec<_>, Vec<_>) = queued
            .into_iter()
            .filter(|event| event.epoch() >= next)
            .partition(|event| event.epoch() == next);
        self.queued = later.into();
        METRICS.queued_epoch_events.set(self.queued.len());

        let EpochState::Active(ctx) = &mut self.state else {
            return Ok(());
        };
        ctx.start()?;
        // Events of lower views are stale by the time the epoch starts.
        let Some(high_view) = ready.iter().map(ConsensusEvent::view).max() else {
            return Ok(());
        };
        for event in ready.into_iter().filter(|e| e.view() == high_view) {
            match ctx.process_consensus_event(event) {
                Ok(()) => {}
                Err(Error::Internal(err)) => return Err(err),
                Err(err) => tracing::debug!("dropping queued event: {err:#}"),
            }
        }
        Ok(())
    }
}
