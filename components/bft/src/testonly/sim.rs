//! In-process network of validators driven by a virtual clock.
//!
//! Messages are delivered in FIFO order. Time advances only when no message is in flight,
//! to the deadline of the next pending timer.
use super::{make_config, InMemoryLedger};
use crate::{
    epoch_manager::EpochManager,
    io::{InputMessage, OutputMessage},
    TimerEvent,
};
use anyhow::Context as _;
use braid_consensus_roles::validator::{self, testonly::Setup};
use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Enum representing the behavior of the node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Behavior {
    /// A replica that is always online and behaves honestly.
    Honest,
    /// Same as honest, except that its proposals never leave the node (which is a legit behavior).
    HonestNotProposing,
    /// A replica that is always offline and does not produce any messages.
    Offline,
}

/// Decides whether the message from the first node to the second one gets lost.
pub(crate) type DropPolicy =
    Box<dyn FnMut(&validator::PublicKey, &validator::PublicKey, &validator::ConsensusMsg) -> bool>;

pub(crate) struct Node {
    pub(crate) key: validator::SecretKey,
    pub(crate) behavior: Behavior,
    pub(crate) ledger: Arc<InMemoryLedger>,
    pub(crate) manager: EpochManager,
    outbound: mpsc::UnboundedReceiver<OutputMessage>,
}

impl Node {
    pub(crate) fn is_honest(&self) -> bool {
        self.behavior != Behavior::Offline
    }

    /// Current view of the node, if it validates in the current epoch.
    pub(crate) fn view(&self) -> Option<validator::View> {
        self.manager
            .context()
            .map(|ctx| ctx.pacemaker.current_view())
    }
}

struct Timer {
    node: usize,
    event: TimerEvent,
    cancel: CancellationToken,
}

pub(crate) struct Network {
    pub(crate) nodes: Vec<Node>,
    indexes: HashMap<validator::PublicKey, usize>,
    in_flight: VecDeque<(usize, InputMessage)>,
    /// Pending timers by deadline. The sequence number keeps timers of equal deadlines apart.
    timers: BTreeMap<(Duration, u64), Timer>,
    next_timer: u64,
    now: Duration,
    drop_policy: Option<DropPolicy>,
}

impl Network {
    /// Network of the setup validators with the given behaviors, committing to ledgers
    /// created by `ledger`.
    pub(crate) fn new(
        setup: &Setup,
        behaviors: &[Behavior],
        ledger: impl Fn() -> Arc<InMemoryLedger>,
    ) -> anyhow::Result<Self> {
        anyhow::ensure!(setup.keys.len() == behaviors.len());
        let initial = validator::BftConfiguration {
            validator_set: setup.validator_set.clone(),
            vertex_store_state: setup.genesis.clone(),
        };
        let mut nodes = vec![];
        for (key, behavior) in setup.keys.iter().zip(behaviors) {
            let ledger = ledger();
            let config = Arc::new(make_config(key.clone(), ledger.clone()));
            let (send, recv) = mpsc::unbounded_channel();
            nodes.push(Node {
                key: key.clone(),
                behavior: *behavior,
                ledger,
                manager: EpochManager::new(config, send, initial.clone())?,
                outbound: recv,
            });
        }
        Ok(Self {
            indexes: nodes
                .iter()
                .enumerate()
                .map(|(i, n)| (n.key.public(), i))
                .collect(),
            nodes,
            in_flight: VecDeque::new(),
            timers: BTreeMap::new(),
            next_timer: 0,
            now: Duration::ZERO,
            drop_policy: None,
        })
    }

    /// Loses the messages selected by the policy.
    pub(crate) fn with_drop_policy(mut self, policy: DropPolicy) -> Self {
        self.drop_policy = Some(policy);
        self
    }

    pub(crate) fn honest(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.is_honest())
    }

    /// Starts all the nodes which are online.
    pub(crate) fn start(&mut self) -> anyhow::Result<()> {
        for i in 0..self.nodes.len() {
            if self.nodes[i].is_honest() {
                self.nodes[i].manager.start()?;
            }
            self.route(i)?;
        }
        Ok(())
    }

    /// Delivers the next message, or fires the next timer if there are no messages in flight.
    /// Returns `false` once there is nothing left to do.
    pub(crate) fn step(&mut self) -> anyhow::Result<bool> {
        if let Some((node, input)) = self.in_flight.pop_front() {
            self.deliver(node, input)?;
            return Ok(true);
        }
        while let Some(((at, _), timer)) = self.timers.pop_first() {
            if timer.cancel.is_cancelled() {
                continue;
            }
            self.now = at;
            self.deliver(timer.node, InputMessage::Timer(timer.event))?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Runs the network until `done` holds, failing if it takes longer than `deadline`
    /// of virtual time.
    pub(crate) fn run_until(
        &mut self,
        deadline: Duration,
        mut done: impl FnMut(&Self) -> bool,
    ) -> anyhow::Result<()> {
        while !done(self) {
            anyhow::ensure!(self.now <= deadline, "deadline exceeded at {:?}", self.now);
            anyhow::ensure!(self.step()?, "network stalled at {:?}", self.now);
        }
        Ok(())
    }

    /// Checks that the committed ledgers of the honest nodes don't fork:
    /// of any two, one is a prefix of the other.
    pub(crate) fn check_safety(&self) -> anyhow::Result<()> {
        let ledgers: Vec<_> = self.honest().map(|n| n.ledger.committed_ids()).collect();
        for a in &ledgers {
            for b in &ledgers {
                let n = a.len().min(b.len());
                anyhow::ensure!(a[..n] == b[..n], "committed ledgers fork");
            }
        }
        Ok(())
    }

    fn deliver(&mut self, node: usize, input: InputMessage) -> anyhow::Result<()> {
        if !self.nodes[node].is_honest() {
            return Ok(());
        }
        let name = self.nodes[node].key.public().short_id();
        self.nodes[node]
            .manager
            .process(input)
            .with_context(|| format!("node {name}"))?;
        self.route(node)
    }

    /// Dispatches the outputs of a node.
    fn route(&mut self, from: usize) -> anyhow::Result<()> {
        let sender = self.nodes[from].key.public();
        while let Ok(output) = self.nodes[from].outbound.try_recv() {
            match output {
                OutputMessage::Network { target, msg } => {
                    let Some(to) = self.indexes.get(&target).copied() else {
                        continue;
                    };
                    if self.is_dropped(from, &target, &msg) {
                        tracing::trace!(from = ?sender, to = ?target, label = msg.label(), "message dropped");
                        continue;
                    }
                    self.in_flight.push_back((
                        to,
                        InputMessage::Network {
                            sender: sender.clone(),
                            msg,
                        },
                    ));
                }
                OutputMessage::Timer {
                    event,
                    delay,
                    cancel,
                } => {
                    self.timers.insert(
                        (self.now + delay, self.next_timer),
                        Timer {
                            node: from,
                            event,
                            cancel,
                        },
                    );
                    self.next_timer += 1;
                }
                OutputMessage::LedgerSyncRequired { proof, peers } => {
                    let update = peers.iter().find_map(|peer| {
                        let source = &self.nodes[*self.indexes.get(peer)?];
                        self.nodes[from].ledger.sync_from(&source.ledger, &proof.header)
                    });
                    match update {
                        Some(update) => self
                            .in_flight
                            .push_front((from, InputMessage::LedgerUpdate(update))),
                        None => tracing::debug!(node = ?sender, "ledger sync target not available"),
                    }
                }
            }
        }
        Ok(())
    }

    fn is_dropped(
        &mut self,
        from: usize,
        target: &validator::PublicKey,
        msg: &validator::ConsensusMsg,
    ) -> bool {
        let sender = &self.nodes[from].key.public();
        if sender == target {
            return false;
        }
        if self.nodes[from].behavior == Behavior::HonestNotProposing
            && matches!(msg, validator::ConsensusMsg::Proposal(_))
        {
            return true;
        }
        match &mut self.drop_policy {
            Some(policy) => policy(sender, target, msg),
            None => false,
        }
    }
}
