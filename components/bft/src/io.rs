//! Input and output messages of the bft component.
use crate::{event::TimerEvent, LedgerUpdate};
use braid_consensus_roles::validator;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// All the messages that other components send to the bft component.
#[derive(Debug)]
pub enum InputMessage {
    /// Message received from a peer.
    Network {
        /// Sender of the message.
        sender: validator::PublicKey,
        /// The message.
        msg: validator::ConsensusMsg,
    },
    /// A timer scheduled through [`OutputMessage::Timer`] fired.
    Timer(TimerEvent),
    /// The ledger advanced outside of consensus, e.g. after a ledger sync.
    LedgerUpdate(LedgerUpdate),
}

/// All the messages that the bft component sends to other components.
#[derive(Debug)]
pub enum OutputMessage {
    /// Message to be sent to a peer.
    Network {
        /// Recipient.
        target: validator::PublicKey,
        /// The message.
        msg: validator::ConsensusMsg,
    },
    /// Feed `event` back as [`InputMessage::Timer`] after `delay`, unless `cancel` is cancelled first.
    Timer {
        /// Event to deliver.
        event: TimerEvent,
        /// Delay.
        delay: Duration,
        /// Cancelled when the epoch which scheduled the timer ends.
        cancel: CancellationToken,
    },
    /// The ledger needs to catch up to the proven header before consensus can proceed.
    LedgerSyncRequired {
        /// Target of the sync.
        proof: validator::LedgerProof,
        /// Peers which have the target state.
        peers: Vec<validator::PublicKey>,
    },
}

impl From<TimerEvent> for InputMessage {
    fn from(event: TimerEvent) -> Self {
        Self::Timer(event)
    }
}

impl From<LedgerUpdate> for InputMessage {
    fn from(update: LedgerUpdate) -> Self {
        Self::LedgerUpdate(update)
    }
}
