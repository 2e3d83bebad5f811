//! In-memory DAG of uncommitted vertices, with the three-chain commit rule.
use crate::{event::BftInsertUpdate, metrics, Ledger, LedgerUpdate, PreparedVertex};
use anyhow::Context as _;
use braid_consensus_roles::validator;
use braid_consensus_storage::PersistentVertexStore;
use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::Arc,
};

#[cfg(test)]
mod tests;

/// Errors that can occur when inserting a vertex.
#[derive(Debug, thiserror::Error)]
pub(crate) enum InsertError {
    /// Parent is not in the store. Recoverable by syncing the parent.
    #[error("missing parent {parent:?}")]
    MissingParent {
        /// Id of the parent.
        parent: validator::VertexId,
    },
    /// Vertex view doesn't follow the view of its parent.
    #[error("vertex view {view} is not after its parent view {parent_view}")]
    ViewNotAfterParent {
        /// View of the vertex.
        view: validator::View,
        /// View of the parent.
        parent_view: validator::View,
    },
    /// Vertex belongs to another epoch.
    #[error("vertex from epoch {got}, store is in epoch {want}")]
    WrongEpoch {
        /// Epoch of the vertex.
        got: validator::Epoch,
        /// Epoch of the store.
        want: validator::Epoch,
    },
    /// Ledger refused to execute the vertex.
    #[error("ledger rejected the vertex")]
    LedgerRejected,
    /// Internal error. Unlike other error types, this one isn't supposed to be easily recoverable.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Result of adding a QC to the store.
#[derive(Debug)]
pub(crate) enum QcInsertion {
    /// Certified vertex is not in the store.
    MissingVertex,
    /// QC was added. Carries the ledger update if the QC committed a vertex.
    Added(Option<LedgerUpdate>),
}

/// Vertices of the current epoch which are not committed yet, on top of the committed root.
#[derive(Debug)]
pub(crate) struct VertexStore {
    ledger: Arc<dyn Ledger>,
    persistent: Arc<dyn PersistentVertexStore>,
    root: PreparedVertex,
    vertices: HashMap<validator::VertexId, PreparedVertex>,
    children: HashMap<validator::VertexId, HashSet<validator::VertexId>>,
    high_qc: validator::HighQc,
}

impl VertexStore {
    /// Builds the store from a (genesis or recovered) state. Every vertex is prepared again.
    pub(crate) fn new(
        state: validator::VertexStoreState,
        ledger: Arc<dyn Ledger>,
        persistent: Arc<dyn PersistentVertexStore>,
    ) -> anyhow::Result<Self> {
        let this = Self::build(&state, ledger, persistent)?
            .context("ledger rejected a vertex of the initial state")?;
        this.persist()?;
        Ok(this)
    }

    /// Builds a store from the state, or returns `None` if the ledger can't prepare it.
    fn build(
        state: &validator::VertexStoreState,
        ledger: Arc<dyn Ledger>,
        persistent: Arc<dyn PersistentVertexStore>,
    ) -> anyhow::Result<Option<Self>> {
        let committed = state
            .high_qc()
            .highest_committed_qc
            .committed()
            .context("highest committed QC doesn't commit anything")?;
        let root = PreparedVertex::new(state.root().clone(), committed.ledger_header.clone());
        let mut this = Self {
            ledger,
            persistent,
            root,
            vertices: HashMap::new(),
            children: HashMap::new(),
            high_qc: state.high_qc().clone(),
        };
        for vertex in state.vertices() {
            let previous = this.path_from_root(vertex.parent_id());
            let Some(prepared) = this.ledger.prepare(&previous, vertex) else {
                return Ok(None);
            };
            this.link(prepared);
        }
        Ok(Some(this))
    }

    /// Epoch of the store.
    pub(crate) fn epoch(&self) -> validator::Epoch {
        self.root.vertex().epoch()
    }

    /// Committed root.
    pub(crate) fn root(&self) -> &PreparedVertex {
        &self.root
    }

    /// Highest known certificates.
    pub(crate) fn high_qc(&self) -> &validator::HighQc {
        &self.high_qc
    }

    /// Number of uncommitted vertices.
    pub(crate) fn len(&self) -> usize {
        self.vertices.len()
    }

    /// Whether the vertex is the root or one of the uncommitted vertices.
    pub(crate) fn contains_vertex(&self, id: &validator::VertexId) -> bool {
        self.get(id).is_some()
    }

    /// Gets a vertex, including the root.
    pub(crate) fn get(&self, id: &validator::VertexId) -> Option<&PreparedVertex> {
        if self.root.id() == *id {
            return Some(&self.root);
        }
        self.vertices.get(id)
    }

    /// Up to `count` vertices ending at `id`, newest first.
    /// Returns `None` if fewer are available.
    pub(crate) fn get_vertices(
        &self,
        id: validator::VertexId,
        count: u64,
    ) -> Option<Vec<validator::VerifiedVertex>> {
        let mut res = vec![];
        let mut next = id;
        for _ in 0..count {
            let v = self.get(&next)?;
            res.push(v.vertex().clone());
            next = v.vertex().parent_id();
        }
        Some(res)
    }

    /// Uncommitted path from the root (exclusive) to `id` (inclusive).
    /// Empty if `id` is the root or unknown.
    pub(crate) fn path_from_root(&self, id: validator::VertexId) -> Vec<PreparedVertex> {
        let mut path = VecDeque::new();
        let mut next = id;
        while let Some(v) = self.vertices.get(&next) {
            next = v.vertex().parent_id();
            path.push_front(v.clone());
        }
        path.into()
    }

    /// Inserts a verified vertex. Inserting a known vertex again returns the same update.
    pub(crate) fn insert_vertex(
        &mut self,
        vertex: validator::VerifiedVertex,
    ) -> Result<BftInsertUpdate, InsertError> {
        if let Some(v) = self.get(&vertex.id()) {
            return Ok(BftInsertUpdate {
                inserted: v.clone(),
                vertex_store_size: self.len(),
            });
        }
        if vertex.epoch() != self.epoch() {
            return Err(InsertError::WrongEpoch {
                got: vertex.epoch(),
                want: self.epoch(),
            });
        }
        if vertex.view() <= vertex.qc().view() {
            return Err(InsertError::ViewNotAfterParent {
                view: vertex.view(),
                parent_view: vertex.qc().view(),
            });
        }
        if !self.contains_vertex(&vertex.parent_id()) {
            return Err(InsertError::MissingParent {
                parent: vertex.parent_id(),
            });
        }
        let previous = self.path_from_root(vertex.parent_id());
        let Some(prepared) = self.ledger.prepare(&previous, &vertex) else {
            return Err(InsertError::LedgerRejected);
        };
        self.link(prepared.clone());
        self.persist()?;
        metrics::METRICS.vertex_store_size.set(self.len());
        Ok(BftInsertUpdate {
            inserted: prepared,
            vertex_store_size: self.len(),
        })
    }

    /// Inserts a chain of vertices, oldest first, stopping at the first failure.
    /// Updates of the vertices inserted before the failure are still appended to `updates`.
    pub(crate) fn insert_vertex_chain(
        &mut self,
        chain: impl IntoIterator<Item = validator::VerifiedVertex>,
        updates: &mut Vec<BftInsertUpdate>,
    ) -> Result<(), InsertError> {
        for vertex in chain {
            updates.push(self.insert_vertex(vertex)?);
        }
        Ok(())
    }

    /// Adds a QC for a vertex in the store, committing the vertex it commits.
    /// The high QC advances only if the QC is newer.
    pub(crate) fn add_qc(
        &mut self,
        qc: &validator::QuorumCertificate,
    ) -> anyhow::Result<QcInsertion> {
        if !self.contains_vertex(&qc.proposed().vertex_id) {
            return Ok(QcInsertion::MissingVertex);
        }
        let mut changed = false;
        if qc.view() > self.high_qc.highest_qc.view() {
            self.high_qc = validator::HighQc::new(
                qc.clone(),
                self.high_qc.highest_committed_qc.clone(),
                self.high_qc.highest_tc.clone(),
            );
            changed = true;
        }
        let mut update = None;
        if let Some(committed) = qc.committed() {
            if committed.view > self.root.view() {
                update = Some(self.commit(committed.vertex_id, qc)?);
                self.high_qc.highest_committed_qc = qc.clone();
                changed = true;
            }
        }
        if changed {
            self.persist()?;
        }
        Ok(QcInsertion::Added(update))
    }

    /// Records a TC if it is newer than the known certificates.
    pub(crate) fn insert_timeout_certificate(&mut self, tc: &validator::TimeoutCertificate) {
        if tc.view <= self.high_qc.highest_view() {
            return;
        }
        self.high_qc.highest_tc = Some(tc.clone());
    }

    /// Replaces the store contents with a state fetched from peers.
    /// Returns `false` if the ledger can't prepare the state.
    pub(crate) fn try_rebuild(
        &mut self,
        state: &validator::VertexStoreState,
    ) -> anyhow::Result<bool> {
        anyhow::ensure!(
            state.epoch() == self.epoch(),
            "rebuilding from epoch {} in epoch {}",
            state.epoch(),
            self.epoch()
        );
        let Some(mut rebuilt) = Self::build(state, self.ledger.clone(), self.persistent.clone())?
        else {
            return Ok(false);
        };
        if let Some(tc) = self.high_qc.highest_tc.clone() {
            rebuilt.insert_timeout_certificate(&tc);
        }
        *self = rebuilt;
        self.persist()?;
        metrics::METRICS.vertex_store_size.set(self.len());
        tracing::info!(root = ?self.root.id(), view = %self.root.view(), "vertex store rebuilt");
        Ok(true)
    }

    /// Snapshot of the store.
    pub(crate) fn state(&self) -> anyhow::Result<validator::VertexStoreState> {
        let mut vertices = vec![];
        let mut queue = VecDeque::from([self.root.id()]);
        while let Some(id) = queue.pop_front() {
            let Some(children) = self.children.get(&id) else {
                continue;
            };
            let mut children: Vec<_> =
                children.iter().filter_map(|c| self.vertices.get(c)).collect();
            children.sort_by_key(|c| (c.view(), c.id()));
            for c in children {
                vertices.push(c.vertex().clone());
                queue.push_back(c.id());
            }
        }
        validator::VertexStoreState::new(self.high_qc.clone(), self.root.vertex().clone(), vertices)
    }

    fn link(&mut self, prepared: PreparedVertex) {
        let id = prepared.id();
        self.children
            .entry(prepared.vertex().parent_id())
            .or_default()
            .insert(id);
        self.vertices.insert(id, prepared);
    }

    /// Commits the path from the root to `id`, which becomes the new root.
    /// Branches not descending from the new root are pruned.
    fn commit(
        &mut self,
        id: validator::VertexId,
        qc: &validator::QuorumCertificate,
    ) -> anyhow::Result<LedgerUpdate> {
        let path = self.path_from_root(id);
        let Some(new_root) = path.last().cloned() else {
            anyhow::bail!("committed vertex {id:?} is not in the store");
        };
        let proof = qc.ledger_proof().context("QC doesn't commit anything")?;
        let update = self
            .ledger
            .commit(&path, proof)
            .context("ledger.commit()")?;

        let mut parent = self.root.id();
        for v in &path {
            for s in self.children.remove(&parent).unwrap_or_default() {
                if s != v.id() {
                    self.remove_subtree(s);
                }
            }
            self.vertices.remove(&v.id());
            parent = v.id();
        }
        self.root = new_root;

        metrics::METRICS.committed_vertices.inc_by(path.len() as u64);
        metrics::METRICS.committed_view.set(self.root.view().0);
        metrics::METRICS.vertex_store_size.set(self.len());
        tracing::info!(
            epoch = %self.epoch(),
            view = %self.root.view(),
            vertex = ?self.root.id(),
            count = path.len(),
            "committed"
        );
        Ok(update)
    }

    fn remove_subtree(&mut self, id: validator::VertexId) {
        let mut stack = vec![id];
        while let Some(id) = stack.pop() {
            self.vertices.remove(&id);
            if let Some(children) = self.children.remove(&id) {
                stack.extend(children);
            }
        }
    }

    fn persist(&self) -> anyhow::Result<()> {
        let state = self.state().context("state()")?;
        self.persistent.save(&state).context("persistent.save()")
    }
}
