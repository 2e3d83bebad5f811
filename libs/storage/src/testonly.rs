//! Test-only utilities.
use crate::{PersistentSafetyStateStore, SafetyState};

/// Safety state store whose writes always fail, like a full disk.
#[derive(Debug, Default)]
pub struct FailingSafetyStateStore;

impl PersistentSafetyStateStore for FailingSafetyStateStore {
    fn load(&self) -> anyhow::Result<Option<SafetyState>> {
        Ok(None)
    }

    fn store(&self, _: &SafetyState) -> anyhow::Result<()> {
        anyhow::bail!("disk full")
    }
}
