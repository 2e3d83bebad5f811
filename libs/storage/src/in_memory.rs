//! In-memory storage implementation.
use crate::{PersistentSafetyStateStore, PersistentVertexStore, SafetyState};
use braid_consensus_roles::validator;
use std::sync::Mutex;

/// In-memory safety state store.
#[derive(Debug, Default)]
pub struct InMemorySafetyStateStore(Mutex<Option<SafetyState>>);

impl PersistentSafetyStateStore for InMemorySafetyStateStore {
    fn load(&self) -> anyhow::Result<Option<SafetyState>> {
        Ok(self.0.lock().unwrap().clone())
    }

    fn store(&self, state: &SafetyState) -> anyhow::Result<()> {
        tracing::trace!(
            epoch = %state.epoch,
            last_voted_view = %state.last_voted_view,
            locked_view = %state.locked_view,
            "storing safety state"
        );
        *self.0.lock().unwrap() = Some(state.clone());
        Ok(())
    }
}

/// In-memory vertex store snapshots.
#[derive(Debug, Default)]
pub struct InMemoryVertexStore(Mutex<Option<validator::VertexStoreState>>);

impl PersistentVertexStore for InMemoryVertexStore {
    fn save(&self, state: &validator::VertexStoreState) -> anyhow::Result<()> {
        *self.0.lock().unwrap() = Some(state.clone());
        Ok(())
    }

    fn load(&self) -> anyhow::Result<Option<validator::VertexStoreState>> {
        Ok(self.0.lock().unwrap().clone())
    }
}
