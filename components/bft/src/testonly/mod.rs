//! This module contains utilities that are only meant for testing purposes.
use crate::{Config, PacemakerConfig};
use braid_consensus_roles::validator;
use braid_consensus_storage::{InMemorySafetyStateStore, InMemoryVertexStore};
use std::{sync::Arc, time::Duration};

mod ledger;
#[cfg(test)]
pub(crate) mod sim;

pub use ledger::*;

/// Config of a validator with in-memory storage, committing to the given ledger.
pub fn make_config(secret_key: validator::SecretKey, ledger: Arc<InMemoryLedger>) -> Config {
    Config {
        proposal_generator: Arc::new(TestProposalGenerator {
            node: secret_key.public(),
        }),
        secret_key,
        pacemaker: PacemakerConfig {
            base_timeout: Duration::from_secs(1),
            ..PacemakerConfig::default()
        },
        sync_patience: Duration::from_millis(500),
        max_queued_epoch_events: 100,
        ledger,
        safety_store: Arc::new(InMemorySafetyStateStore::default()),
        vertex_store: Arc::new(InMemoryVertexStore::default()),
    }
}
