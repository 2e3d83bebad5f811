//! Defines storage layer for vertex store snapshots.
use braid_consensus_roles::validator;
use std::fmt;

/// Storage for snapshots of the vertex store, used for crash recovery.
/// Only the latest snapshot matters.
pub trait PersistentVertexStore: 'static + fmt::Debug + Send + Sync {
    /// Replaces the stored snapshot.
    fn save(&self, state: &validator::VertexStoreState) -> anyhow::Result<()>;

    /// Gets the latest snapshot, if any.
    fn load(&self) -> anyhow::Result<Option<validator::VertexStoreState>>;
}
