//! In-memory ledger and proposal generator.
use crate::{Ledger, LedgerUpdate, PreparedVertex, ProposalGenerator};
use braid_consensus_roles::validator;
use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

/// Ends every epoch at a fixed view.
#[derive(Debug, Clone)]
pub struct EpochSchedule {
    /// First view whose header ends the epoch.
    pub epoch_length: u64,
    /// Validators of the following epoch.
    pub next_validators: validator::BftValidatorSet,
}

#[derive(Debug, Default)]
struct Inner {
    committed: Vec<PreparedVertex>,
    updates: Vec<LedgerUpdate>,
    rejected: HashSet<validator::VertexId>,
}

/// Ledger which executes vertices with `validator::testonly::execute()` and keeps
/// the committed vertices in memory.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    schedule: Option<EpochSchedule>,
    inner: Mutex<Inner>,
}

impl InMemoryLedger {
    /// Ledger which never ends the epoch.
    pub fn new() -> Arc<Self> {
        Arc::default()
    }

    /// Ledger which ends every epoch according to the schedule.
    pub fn with_schedule(schedule: EpochSchedule) -> Arc<Self> {
        Arc::new(Self {
            schedule: Some(schedule),
            inner: Mutex::default(),
        })
    }

    /// Makes `prepare()` refuse the vertex.
    pub fn reject(&self, id: validator::VertexId) {
        self.inner.lock().unwrap().rejected.insert(id);
    }

    /// Committed vertices, in order.
    pub fn committed(&self) -> Vec<PreparedVertex> {
        self.inner.lock().unwrap().committed.clone()
    }

    /// Ids of the committed vertices, in order.
    pub fn committed_ids(&self) -> Vec<validator::VertexId> {
        self.committed().iter().map(|v| v.id()).collect()
    }

    /// Copies the committed vertices of `source` up to the first commit reaching `target`,
    /// the way a ledger sync would. Returns the update of that commit, or `None` if the
    /// source doesn't have it or this ledger is already there.
    pub fn sync_from(
        &self,
        source: &InMemoryLedger,
        target: &validator::LedgerHeader,
    ) -> Option<LedgerUpdate> {
        let (committed, updates) = {
            let source = source.inner.lock().unwrap();
            let n = source
                .updates
                .iter()
                .position(|u| reaches(&u.proof.header, target))?;
            let update = &source.updates[n];
            let len = source
                .committed
                .iter()
                .rposition(|v| v.ledger_header() == &update.proof.header)?;
            (
                source.committed[..=len].to_vec(),
                source.updates[..=n].to_vec(),
            )
        };
        let mut inner = self.inner.lock().unwrap();
        if inner.committed.len() >= committed.len() {
            return None;
        }
        inner.committed = committed;
        inner.updates = updates;
        inner.updates.last().cloned()
    }

    /// Header the ledger would produce for the vertex.
    pub fn execute(&self, vertex: &validator::VerifiedVertex) -> validator::LedgerHeader {
        let parent = &vertex.parent_header().ledger_header;
        let mut header = validator::testonly::execute(parent, vertex);
        if let Some(schedule) = &self.schedule {
            if !parent.is_end_of_epoch() && vertex.view().0 >= schedule.epoch_length {
                header.next_validator_set = Some(schedule.next_validators.clone());
            }
        }
        header
    }
}

impl Ledger for InMemoryLedger {
    fn prepare(
        &self,
        _previous: &[PreparedVertex],
        vertex: &validator::VerifiedVertex,
    ) -> Option<PreparedVertex> {
        if self.inner.lock().unwrap().rejected.contains(&vertex.id()) {
            return None;
        }
        Some(PreparedVertex::new(vertex.clone(), self.execute(vertex)))
    }

    fn commit(
        &self,
        vertices: &[PreparedVertex],
        proof: validator::LedgerProof,
    ) -> anyhow::Result<LedgerUpdate> {
        let Some(last) = vertices.last() else {
            anyhow::bail!("nothing to commit");
        };
        anyhow::ensure!(
            last.ledger_header() == &proof.header,
            "proof doesn't match the last committed vertex"
        );
        let mut inner = self.inner.lock().unwrap();
        // Vertices which a ledger sync already brought in are skipped.
        let new: Vec<_> = vertices
            .iter()
            .filter(|v| !inner.committed.iter().any(|c| c.id() == v.id()))
            .cloned()
            .collect();
        inner.committed.extend(new);
        let epoch_change = if proof.header.is_end_of_epoch() {
            Some(validator::EpochChange::new(proof.clone())?)
        } else {
            None
        };
        let update = LedgerUpdate {
            proof,
            epoch_change,
        };
        inner.updates.push(update.clone());
        Ok(update)
    }
}

/// Whether a ledger which committed `header` has reached `target`.
/// A genesis target is reached by the header ending the previous epoch.
fn reaches(header: &validator::LedgerHeader, target: &validator::LedgerHeader) -> bool {
    if target.view == validator::View::genesis() {
        return header.is_end_of_epoch() && header.epoch.next() == target.epoch;
    }
    header.epoch == target.epoch && header.view >= target.view
}

/// Proposes a single transaction naming the view and the proposer.
#[derive(Debug)]
pub struct TestProposalGenerator {
    /// Proposer.
    pub node: validator::PublicKey,
}

impl ProposalGenerator for TestProposalGenerator {
    fn generate_next_txns(
        &self,
        view: validator::View,
        _prepared: &[PreparedVertex],
    ) -> Vec<validator::Txn> {
        let mut txn = view.0.to_be_bytes().to_vec();
        txn.extend_from_slice(self.node.short_id().as_bytes());
        vec![validator::Txn(txn)]
    }
}
