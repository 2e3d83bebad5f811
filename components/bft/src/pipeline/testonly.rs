//! Harness driving a single epoch context.
use super::{EpochContext, Error};
use crate::{
    event::{ConsensusEvent, ScheduledLocalTimeout, TimerEvent},
    io::OutputMessage,
    testonly::{make_config, InMemoryLedger},
};
use braid_consensus_roles::validator::{self, testonly::Setup};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub(crate) struct TestContext {
    pub(crate) setup: Setup,
    pub(crate) ledger: Arc<InMemoryLedger>,
    pub(crate) ctx: EpochContext,
    outbound: mpsc::UnboundedReceiver<OutputMessage>,
}

impl TestContext {
    /// Context of the validator with the given key, at the genesis of the setup.
    pub(crate) fn new(setup: &Setup, key: &validator::SecretKey) -> Self {
        let ledger = InMemoryLedger::new();
        let config = Arc::new(make_config(key.clone(), ledger.clone()));
        let (send, recv) = mpsc::unbounded_channel();
        let configuration = validator::BftConfiguration {
            validator_set: setup.validator_set.clone(),
            vertex_store_state: setup.genesis.clone(),
        };
        let ctx = EpochContext::new(config, &configuration, send, CancellationToken::new()).unwrap();
        Self {
            setup: setup.clone(),
            ledger,
            ctx,
            outbound: recv,
        }
    }

    /// Context of a validator which is none of `excluded`.
    pub(crate) fn new_other_than(setup: &Setup, excluded: &[validator::PublicKey]) -> Self {
        let key = setup
            .keys
            .iter()
            .find(|k| !excluded.contains(&k.public()))
            .unwrap();
        Self::new(setup, key)
    }

    pub(crate) fn me(&self) -> validator::PublicKey {
        self.ctx.me.clone()
    }

    /// Starts the context and returns its outputs.
    pub(crate) fn start(&mut self) -> Vec<OutputMessage> {
        self.ctx.start().unwrap();
        self.outputs()
    }

    /// Drains the outputs. Messages this node sends to itself are processed right away.
    pub(crate) fn outputs(&mut self) -> Vec<OutputMessage> {
        let me = self.me();
        let mut res = vec![];
        while let Ok(output) = self.outbound.try_recv() {
            match output {
                OutputMessage::Network { target, msg } if target == me => {
                    if let Err(Error::Internal(err)) = self.deliver(me.clone(), msg) {
                        panic!("{err:#}");
                    }
                }
                output => res.push(output),
            }
        }
        res
    }

    /// Network messages among the outputs.
    pub(crate) fn sent(&mut self) -> Vec<(validator::PublicKey, validator::ConsensusMsg)> {
        self.outputs()
            .into_iter()
            .filter_map(|output| match output {
                OutputMessage::Network { target, msg } => Some((target, msg)),
                _ => None,
            })
            .collect()
    }

    /// Processes a message from a peer.
    pub(crate) fn deliver(
        &mut self,
        sender: validator::PublicKey,
        msg: validator::ConsensusMsg,
    ) -> Result<(), Error> {
        match msg {
            validator::ConsensusMsg::Proposal(p) => {
                self.ctx.process_consensus_event(ConsensusEvent::Proposal(p))
            }
            validator::ConsensusMsg::Vote(v) => {
                self.ctx.process_consensus_event(ConsensusEvent::Vote(v))
            }
            validator::ConsensusMsg::LedgerStatusUpdate(_) => Ok(()),
            msg => self.ctx.process_sync_msg(sender, msg),
        }
    }

    /// Proposal of the view leader.
    pub(crate) fn proposal(
        &self,
        vertex: &validator::VerifiedVertex,
        high_qc: validator::HighQc,
    ) -> validator::ConsensusMsg {
        let key = self.setup.leader_key(vertex.view());
        validator::ConsensusMsg::Proposal(validator::Proposal::new(
            key,
            vertex.vertex().clone(),
            high_qc,
        ))
    }

    /// Delivers the proposal of the vertex from the view leader.
    pub(crate) fn deliver_proposal(
        &mut self,
        vertex: &validator::VerifiedVertex,
        high_qc: validator::HighQc,
    ) -> Result<(), Error> {
        let leader = self.setup.validator_set.view_leader(vertex.view());
        let msg = self.proposal(vertex, high_qc);
        self.deliver(leader, msg)
    }

    /// Fires the pending local timeout among the outputs.
    pub(crate) fn fire_local_timeout(&mut self, outputs: &[OutputMessage]) -> Vec<OutputMessage> {
        let timeout = local_timeouts(outputs).pop().unwrap();
        self.ctx
            .process_timer(TimerEvent::LocalTimeout {
                epoch: self.ctx.epoch,
                timeout,
            })
            .unwrap();
        self.outputs()
    }
}

/// Local timeouts scheduled in the outputs.
pub(crate) fn local_timeouts(outputs: &[OutputMessage]) -> Vec<ScheduledLocalTimeout> {
    outputs
        .iter()
        .filter_map(|output| match output {
            OutputMessage::Timer {
                event: TimerEvent::LocalTimeout { timeout, .. },
                ..
            } => Some(timeout.clone()),
            _ => None,
        })
        .collect()
}

/// Votes among the network messages of the outputs, with their targets.
pub(crate) fn votes(outputs: &[OutputMessage]) -> Vec<(validator::PublicKey, validator::Vote)> {
    outputs
        .iter()
        .filter_map(|output| match output {
            OutputMessage::Network {
                target,
                msg: validator::ConsensusMsg::Vote(vote),
            } => Some((target.clone(), vote.clone())),
            _ => None,
        })
        .collect()
}

/// Proposals among the network messages of the outputs.
pub(crate) fn proposals(outputs: &[OutputMessage]) -> Vec<validator::Proposal> {
    outputs
        .iter()
        .filter_map(|output| match output {
            OutputMessage::Network {
                msg: validator::ConsensusMsg::Proposal(p),
                ..
            } => Some(p.clone()),
            _ => None,
        })
        .collect()
}

/// Vertex requests among the network messages of the outputs, with their targets.
pub(crate) fn vertex_requests(
    outputs: &[OutputMessage],
) -> Vec<(validator::PublicKey, validator::GetVerticesRequest)> {
    outputs
        .iter()
        .filter_map(|output| match output {
            OutputMessage::Network {
                target,
                msg: validator::ConsensusMsg::GetVerticesRequest(r),
            } => Some((target.clone(), *r)),
            _ => None,
        })
        .collect()
}
