//! This crate contains the consensus component, which is responsible for reaching agreement
//! on the order of vertices among the validators of an epoch.
//!
//! The algorithm belongs to the HotStuff family: validators vote for vertices proposed by
//! the leader of each view, votes form quorum certificates, and a vertex is committed once
//! it heads a chain of three certified vertices of consecutive views. Views which fail to
//! produce a vertex end with a timeout certificate. An epoch ends when the ledger commits a
//! header carrying the validator set of the next epoch.

use crate::epoch_manager::EpochManager;
use anyhow::Context as _;
use braid_consensus_roles::validator;
use braid_consensus_utils::pipe::ActorPipe;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::Instrument as _;

mod config;
mod epoch_manager;
mod event;
mod io;
mod ledger;
mod metrics;
mod pacemaker;
mod pipeline;
mod safety_rules;
mod sync;
pub mod testonly;
#[cfg(test)]
mod tests;
mod vertex_store;
mod vote_aggregator;

pub use config::{Config, PacemakerConfig};
pub use event::{
    BftInsertUpdate, ConsensusEvent, ScheduledLocalTimeout, TimerEvent,
    VertexRequestTimeout, ViewUpdate,
};
pub use io::{InputMessage, OutputMessage};
pub use ledger::{Ledger, LedgerUpdate, PreparedVertex, ProposalGenerator};
pub use vote_aggregator::{Equivocation, Quorum, VoteAggregator, VoteOutcome, VoteRejection};

impl Config {
    /// Starts the bft component. It will start running, processing incoming messages and
    /// sending output messages. Returns once the other end of the pipe is dropped, or
    /// with an error on an internal failure.
    pub async fn run(
        self,
        initial: validator::BftConfiguration,
        mut pipe: ActorPipe<InputMessage, OutputMessage>,
    ) -> anyhow::Result<()> {
        self.validate().context("Config::validate()")?;
        let me = self.me();
        let span = tracing::info_span!("bft", node = ?me);
        async move {
            tracing::info!(epoch = %initial.epoch(), "starting consensus component");
            let (outbound_send, mut outbound_recv) = mpsc::unbounded_channel();
            let (timer_send, mut timer_recv) = mpsc::unbounded_channel::<TimerEvent>();
            let mut manager = EpochManager::new(Arc::new(self), outbound_send, initial)?;
            manager.start()?;
            loop {
                // Messages to this node are processed before the next input.
                while let Ok(output) = outbound_recv.try_recv() {
                    match output {
                        OutputMessage::Network { target, msg } if target == me => {
                            manager.process(InputMessage::Network {
                                sender: me.clone(),
                                msg,
                            })?;
                        }
                        OutputMessage::Timer {
                            event,
                            delay,
                            cancel,
                        } => {
                            let timers = timer_send.clone();
                            tokio::spawn(async move {
                                tokio::select! {
                                    () = cancel.cancelled() => {}
                                    () = tokio::time::sleep(delay) => {
                                        let _ = timers.send(event);
                                    }
                                }
                            });
                        }
                        output => pipe.send(output),
                    }
                }
                let input = tokio::select! {
                    input = pipe.recv() => match input {
                        Some(input) => input,
                        None => {
                            tracing::info!(epoch = %manager.epoch(), "stopping consensus component");
                            return anyhow::Ok(());
                        }
                    },
                    Some(event) = timer_recv.recv() => InputMessage::Timer(event),
                };
                manager.process(input)?;
            }
        }
        .instrument(span)
        .await
    }
}
