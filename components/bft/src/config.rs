//! Configuration of the bft component.
use crate::{Ledger, ProposalGenerator};
use braid_consensus_roles::validator;
use braid_consensus_storage::{PersistentSafetyStateStore, PersistentVertexStore};
use std::{sync::Arc, time::Duration};

/// Local timeout settings of the pacemaker.
///
/// The timeout of a view grows exponentially with the number of views
/// since the last commit: `base_timeout * timeout_rate^min(max_timeout_exponent, uncommitted)`.
/// While the node stays in a timed out view, every repeated timeout doubles,
/// up to `2^max_timeout_exponent` times the first one.
#[derive(Debug, Clone, PartialEq)]
pub struct PacemakerConfig {
    /// Timeout of a view directly following a commit.
    pub base_timeout: Duration,
    /// Growth rate of the timeout per uncommitted view.
    pub timeout_rate: f64,
    /// Cap on the exponent.
    pub max_timeout_exponent: u32,
}

impl Default for PacemakerConfig {
    fn default() -> Self {
        Self {
            base_timeout: Duration::from_secs(3),
            timeout_rate: 1.2,
            max_timeout_exponent: 6,
        }
    }
}

impl PacemakerConfig {
    /// Checks that the settings describe a growing, bounded timeout.
    #[allow(clippy::float_arithmetic)]
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(!self.base_timeout.is_zero(), "base_timeout must be positive");
        anyhow::ensure!(
            self.timeout_rate.is_finite() && self.timeout_rate > 1.0,
            "timeout_rate must be greater than 1, got {}",
            self.timeout_rate
        );
        let max = self.base_timeout.as_secs_f64() * self.max_rate_factor();
        anyhow::ensure!(
            max.is_finite() && Duration::try_from_secs_f64(max).is_ok(),
            "maximum timeout is too large"
        );
        anyhow::ensure!(
            self.max_retry_factor()
                .and_then(|f| self.max_timeout().checked_mul(f))
                .is_some(),
            "maximum retry timeout is too large"
        );
        Ok(())
    }

    /// Longest timeout of a view before it is repeated.
    pub fn max_timeout(&self) -> Duration {
        self.timeout(u64::from(self.max_timeout_exponent))
    }

    /// Timeout of a view, given the number of views since the last commit.
    #[allow(clippy::float_arithmetic)]
    pub(crate) fn timeout(&self, uncommitted_views: u64) -> Duration {
        let exponent = uncommitted_views.min(u64::from(self.max_timeout_exponent));
        // Exponent is bounded by `max_timeout_exponent`, which fits into i32 in any sane config.
        let exponent = i32::try_from(exponent).unwrap_or(i32::MAX);
        self.base_timeout.mul_f64(self.timeout_rate.powi(exponent))
    }

    /// Timeout of the `retry`-th repetition of a view timeout whose first
    /// occurrence lasted `first`.
    pub(crate) fn retry_timeout(&self, first: Duration, retry: u32) -> Duration {
        let exponent = retry.min(self.max_timeout_exponent).min(31);
        first.saturating_mul(1 << exponent)
    }

    fn max_retry_factor(&self) -> Option<u32> {
        1u32.checked_shl(self.max_timeout_exponent)
    }

    #[allow(clippy::float_arithmetic)]
    fn max_rate_factor(&self) -> f64 {
        let exponent = i32::try_from(self.max_timeout_exponent).unwrap_or(i32::MAX);
        self.timeout_rate.powi(exponent)
    }
}

/// Configuration of the bft component.
#[derive(Debug)]
pub struct Config {
    /// The validator's secret key.
    pub secret_key: validator::SecretKey,
    /// Local timeout settings.
    pub pacemaker: PacemakerConfig,
    /// How long to wait for a response to a `GetVerticesRequest` before asking another peer.
    pub sync_patience: Duration,
    /// Maximum number of consensus events from future epochs kept until the epoch starts.
    pub max_queued_epoch_events: usize,
    /// State computer which executes and commits vertices.
    pub ledger: Arc<dyn Ledger>,
    /// Source of transactions for proposals.
    pub proposal_generator: Arc<dyn ProposalGenerator>,
    /// Storage of the safety state.
    pub safety_store: Arc<dyn PersistentSafetyStateStore>,
    /// Storage of the vertex store snapshots.
    pub vertex_store: Arc<dyn PersistentVertexStore>,
}

impl Config {
    /// Public key of this node.
    pub fn me(&self) -> validator::PublicKey {
        self.secret_key.public()
    }

    /// Checks the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.pacemaker.validate()?;
        anyhow::ensure!(!self.sync_patience.is_zero(), "sync_patience must be positive");
        anyhow::ensure!(
            self.max_queued_epoch_events > 0,
            "max_queued_epoch_events must be positive"
        );
        Ok(())
    }
}
