//! Recovery of missing vertices from peers.
//!
//! Whenever a message refers to a QC whose vertex is not in the local store,
//! the chain leading to it is fetched from the QC signers, parent by parent.
//! If the committed vertex of the remote high QC is unknown too, the last three
//! committed vertices are fetched instead, and the vertex store is rebuilt on
//! top of them once the ledger has caught up.
use crate::{
    event::{TimerEvent, VertexRequestTimeout},
    io::OutputMessage,
    metrics,
    pipeline::{EpochContext, LocalEvent},
    vertex_store::{InsertError, QcInsertion},
    LedgerUpdate,
};
use braid_consensus_roles::validator;
use rand::seq::SliceRandom as _;
use std::{
    collections::{BTreeMap, HashMap},
    time::Duration,
};

#[cfg(test)]
mod tests;

/// Number of vertices fetched to rebuild the store on top of a new committed vertex.
const COMMITTED_CHAIN_LEN: u64 = 3;

/// Result of [`EpochContext::sync_to_qc`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SyncResult {
    /// The QC is in the store.
    Synced,
    /// Missing vertices are being fetched.
    InProgress,
    /// The QC can't be synced to.
    Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncStage {
    /// Fetching the vertices ending at the committed vertex of the remote high QC.
    GetCommittedVertices,
    /// Waiting for the ledger to reach the committed state.
    LedgerSync,
    /// Fetching the chain ending at the vertex of the remote highest QC.
    GetQcVertices,
}

/// Sync towards a single high QC.
#[derive(Debug)]
struct SyncState {
    high_qc: validator::HighQc,
    author: validator::PublicKey,
    stage: SyncStage,
    /// Fetched vertices: oldest first during the QC stage, newest first during the committed stage.
    fetched: Vec<validator::VerifiedVertex>,
}

/// An outstanding `GetVerticesRequest`.
#[derive(Debug)]
struct RequestState {
    /// Peers to ask, in order of preference.
    authors: Vec<validator::PublicKey>,
    /// Syncs waiting for the response, keyed by the vertex of their highest QC.
    sync_ids: Vec<validator::VertexId>,
}

/// State of the vertex sync of an epoch.
#[derive(Debug)]
pub(crate) struct BftSync {
    patience: Duration,
    syncing: HashMap<validator::VertexId, SyncState>,
    requests: HashMap<validator::GetVerticesRequest, RequestState>,
    /// Syncs waiting for the ledger, by the state version they need.
    ledger_syncing: BTreeMap<u64, Vec<validator::VertexId>>,
    current_ledger_header: validator::LedgerHeader,
}

impl BftSync {
    pub(crate) fn new(patience: Duration, current_ledger_header: validator::LedgerHeader) -> Self {
        Self {
            patience,
            syncing: HashMap::new(),
            requests: HashMap::new(),
            ledger_syncing: BTreeMap::new(),
            current_ledger_header,
        }
    }

    /// Whether a sync towards the QC of the vertex is in progress.
    pub(crate) fn is_syncing(&self, id: &validator::VertexId) -> bool {
        self.syncing.contains_key(id)
    }

    /// Outstanding requests.
    #[cfg(test)]
    pub(crate) fn pending_requests(&self) -> Vec<validator::GetVerticesRequest> {
        self.requests.keys().copied().collect()
    }
}

/// `author` followed by the other `signers`, without `me`.
fn sync_authors<'a>(
    me: &validator::PublicKey,
    author: &validator::PublicKey,
    signers: impl Iterator<Item = &'a validator::PublicKey>,
) -> Vec<validator::PublicKey> {
    let mut authors = vec![author.clone()];
    authors.extend(signers.filter(|s| *s != author).cloned());
    authors.retain(|a| a != me);
    authors
}

impl EpochContext {
    /// Makes sure that the vertex of `high_qc.highest_qc` is in the store,
    /// fetching the missing chain from `author` and the QC signers if it isn't.
    pub(crate) fn sync_to_qc(
        &mut self,
        high_qc: &validator::HighQc,
        author: &validator::PublicKey,
    ) -> anyhow::Result<SyncResult> {
        let qc = &high_qc.highest_qc;
        if qc.view() < self.vertex_store.root().view() {
            return Ok(SyncResult::Invalid);
        }
        if let Some(tc) = &high_qc.highest_tc {
            self.vertex_store.insert_timeout_certificate(tc);
        }
        // Commit first, so that the highest QC lands in a pruned store.
        if high_qc.highest_committed_qc.view() > self.vertex_store.high_qc().highest_committed_qc.view()
        {
            self.add_qc(&high_qc.highest_committed_qc)?;
        }
        if self.add_qc(qc)? {
            if let Some(update) = self.pacemaker.process_qc(self.vertex_store.high_qc().clone()) {
                self.local_events.push_back(LocalEvent::ViewUpdate(update));
            }
            return Ok(SyncResult::Synced);
        }
        if qc.is_genesis() {
            return Ok(SyncResult::Invalid);
        }
        if self.sync.is_syncing(&qc.proposed().vertex_id) {
            return Ok(SyncResult::InProgress);
        }
        Ok(self.start_sync(high_qc.clone(), author.clone()))
    }

    /// Adds a QC to the store. Returns `false` if its vertex is missing.
    pub(crate) fn add_qc(&mut self, qc: &validator::QuorumCertificate) -> anyhow::Result<bool> {
        match self.vertex_store.add_qc(qc)? {
            QcInsertion::MissingVertex => Ok(false),
            QcInsertion::Added(update) => {
                if let Some(update) = update {
                    self.process_committed(update);
                }
                Ok(true)
            }
        }
    }

    /// Feeds a commit of this node back into the sync and queues it for the epoch manager.
    fn process_committed(&mut self, update: LedgerUpdate) {
        self.sync.current_ledger_header = update.header().clone();
        self.sync
            .syncing
            .retain(|_, s| s.high_qc.highest_qc.view() > update.header().view);
        self.ledger_updates.push(update);
    }

    fn start_sync(&mut self, high_qc: validator::HighQc, author: validator::PublicKey) -> SyncResult {
        let id = high_qc.highest_qc.proposed().vertex_id;
        let (stage, request, signers) = if self.requires_ledger_sync(&high_qc) {
            let committed = &high_qc.highest_committed_qc;
            tracing::info!(
                committed_view = %committed.view(),
                root_view = %self.vertex_store.root().view(),
                "syncing committed vertices"
            );
            let request = validator::GetVerticesRequest {
                vertex_id: committed.proposed().vertex_id,
                count: COMMITTED_CHAIN_LEN,
            };
            (
                SyncStage::GetCommittedVertices,
                request,
                committed.signers().cloned().collect::<Vec<_>>(),
            )
        } else {
            tracing::debug!(view = %high_qc.highest_qc.view(), vertex = ?id, "syncing QC");
            let request = validator::GetVerticesRequest {
                vertex_id: id,
                count: 1,
            };
            (
                SyncStage::GetQcVertices,
                request,
                high_qc.highest_qc.signers().cloned().collect(),
            )
        };
        let authors = sync_authors(&self.me, &author, signers.iter());
        if authors.is_empty() {
            tracing::warn!(vertex = ?id, "no peers to sync from");
            return SyncResult::Invalid;
        }
        self.sync.syncing.insert(
            id,
            SyncState {
                high_qc,
                author,
                stage,
                fetched: vec![],
            },
        );
        self.send_request(request, authors, id);
        SyncResult::InProgress
    }

    /// Whether the committed vertex of `high_qc` is beyond the local root and unknown.
    fn requires_ledger_sync(&self, high_qc: &validator::HighQc) -> bool {
        let Some(committed) = high_qc.highest_committed_qc.committed() else {
            return false;
        };
        !self.vertex_store.contains_vertex(&committed.vertex_id)
            && self.vertex_store.root().view() < committed.view
    }

    /// Attaches the sync to the request, sending the request if nobody waits for it yet.
    fn send_request(
        &mut self,
        request: validator::GetVerticesRequest,
        authors: Vec<validator::PublicKey>,
        sync_id: validator::VertexId,
    ) {
        let state = self
            .sync
            .requests
            .entry(request)
            .or_insert_with(|| RequestState {
                authors,
                sync_ids: vec![],
            });
        let target = state
            .sync_ids
            .is_empty()
            .then(|| state.authors.first().cloned())
            .flatten();
        state.sync_ids.push(sync_id);
        let Some(target) = target else {
            return;
        };
        tracing::debug!(?request, ?target, "requesting vertices");
        self.schedule_timer(
            TimerEvent::VertexRequest {
                epoch: self.epoch,
                timeout: VertexRequestTimeout { request },
            },
            self.sync.patience,
        );
        self.send(target, validator::ConsensusMsg::GetVerticesRequest(request));
        metrics::METRICS.sync_requests_sent.inc();
    }

    /// Serves vertices to a peer.
    pub(crate) fn process_get_vertices_request(
        &mut self,
        sender: validator::PublicKey,
        request: validator::GetVerticesRequest,
    ) {
        let msg = match self.vertex_store.get_vertices(request.vertex_id, request.count) {
            Some(vertices) => {
                validator::ConsensusMsg::GetVerticesResponse(validator::GetVerticesResponse {
                    vertices: vertices.into_iter().map(|v| v.vertex().clone()).collect(),
                })
            }
            None => {
                tracing::debug!(?request, ?sender, "requested vertices are not available");
                validator::ConsensusMsg::GetVerticesErrorResponse(
                    validator::GetVerticesErrorResponse {
                        high_qc: self.vertex_store.high_qc().clone(),
                        request,
                    },
                )
            }
        };
        self.send(sender, msg);
    }

    /// Processes verified vertices, newest first, each the parent of the previous one.
    pub(crate) fn process_get_vertices_response(
        &mut self,
        sender: &validator::PublicKey,
        vertices: Vec<validator::VerifiedVertex>,
    ) -> anyhow::Result<()> {
        let Some(first) = vertices.first() else {
            return Ok(());
        };
        let request = validator::GetVerticesRequest {
            vertex_id: first.id(),
            count: vertices.len() as u64,
        };
        let Some(state) = self.sync.requests.remove(&request) else {
            tracing::debug!(?request, ?sender, "unexpected vertices response");
            return Ok(());
        };
        for sync_id in state.sync_ids {
            let Some(stage) = self.sync.syncing.get(&sync_id).map(|s| s.stage) else {
                continue;
            };
            match stage {
                SyncStage::GetQcVertices => self.process_qc_response(sync_id, &vertices)?,
                SyncStage::GetCommittedVertices => {
                    self.process_committed_response(sync_id, &vertices)?
                }
                SyncStage::LedgerSync => {}
            }
        }
        Ok(())
    }

    fn process_qc_response(
        &mut self,
        sync_id: validator::VertexId,
        vertices: &[validator::VerifiedVertex],
    ) -> anyhow::Result<()> {
        let Some(vertex) = vertices.first().cloned() else {
            return Ok(());
        };
        let parent = vertex.parent_id();
        if self.vertex_store.contains_vertex(&parent) {
            let Some(mut state) = self.sync.syncing.remove(&sync_id) else {
                return Ok(());
            };
            state.fetched.insert(0, vertex);
            let mut updates = vec![];
            let res = self
                .vertex_store
                .insert_vertex_chain(state.fetched, &mut updates);
            self.local_events
                .extend(updates.into_iter().map(LocalEvent::Inserted));
            match res {
                Ok(()) => {}
                Err(InsertError::Internal(err)) => return Err(err),
                Err(err) => {
                    tracing::warn!(vertex = ?sync_id, "dropping fetched chain: {err:#}");
                    return Ok(());
                }
            }
            self.sync_to_qc(&state.high_qc, &state.author)?;
            return Ok(());
        }

        let root_view = self.vertex_store.root().view();
        let Some(state) = self.sync.syncing.get_mut(&sync_id) else {
            return Ok(());
        };
        if vertex.qc().view() < root_view {
            tracing::debug!(vertex = ?sync_id, "fetched chain doesn't connect to the root");
            self.sync.syncing.remove(&sync_id);
            return Ok(());
        }
        state.fetched.insert(0, vertex.clone());
        let authors = sync_authors(&self.me, &state.author, vertex.qc().signers());
        let request = validator::GetVerticesRequest {
            vertex_id: parent,
            count: 1,
        };
        self.send_request(request, authors, sync_id);
        Ok(())
    }

    fn process_committed_response(
        &mut self,
        sync_id: validator::VertexId,
        vertices: &[validator::VerifiedVertex],
    ) -> anyhow::Result<()> {
        let current_version = self.sync.current_ledger_header.accumulator.state_version;
        let me = self.me.clone();
        let Some(state) = self.sync.syncing.get_mut(&sync_id) else {
            return Ok(());
        };
        state.fetched.extend(vertices.iter().cloned());
        let Some(proof) = state.high_qc.highest_committed_qc.ledger_proof() else {
            self.sync.syncing.remove(&sync_id);
            return Ok(());
        };
        let version = proof.header.accumulator.state_version;
        if version <= current_version {
            return self.rebuild_and_sync_qc(sync_id);
        }
        state.stage = SyncStage::LedgerSync;
        let peers = state
            .high_qc
            .highest_committed_qc
            .signers()
            .filter(|s| **s != me)
            .cloned()
            .collect();
        self.sync
            .ledger_syncing
            .entry(version)
            .or_default()
            .push(sync_id);
        tracing::info!(version, current_version, "ledger is behind, requesting ledger sync");
        self.output(OutputMessage::LedgerSyncRequired { proof, peers });
        Ok(())
    }

    /// Rebuilds the store on top of the fetched committed vertices, then continues towards the highest QC.
    fn rebuild_and_sync_qc(&mut self, sync_id: validator::VertexId) -> anyhow::Result<()> {
        let Some(state) = self.sync.syncing.remove(&sync_id) else {
            return Ok(());
        };
        if self.requires_ledger_sync(&state.high_qc) {
            let mut fetched = state.fetched.clone();
            fetched.sort_by_key(|v| v.view());
            let mut fetched = fetched.into_iter();
            if let Some(root) = fetched.next() {
                let committed_qc = state.high_qc.highest_committed_qc.clone();
                let high_qc = validator::HighQc::new(
                    committed_qc.clone(),
                    committed_qc,
                    self.vertex_store.high_qc().highest_tc.clone(),
                );
                match validator::VertexStoreState::new(high_qc, root, fetched.collect()) {
                    Ok(rebuilt) => {
                        if self.vertex_store.try_rebuild(&rebuilt)? {
                            if let Some(update) =
                                self.pacemaker.process_qc(self.vertex_store.high_qc().clone())
                            {
                                self.local_events.push_back(LocalEvent::ViewUpdate(update));
                            }
                            self.replay_synced_events()?;
                        } else {
                            tracing::warn!("ledger refused the fetched committed vertices");
                        }
                    }
                    Err(err) => tracing::warn!("invalid committed vertices: {err:#}"),
                }
            }
        }
        self.sync_to_qc(&state.high_qc, &state.author)?;
        Ok(())
    }

    /// The peer doesn't have the requested vertices. If it is ahead of us, sync to its high QC instead.
    pub(crate) fn process_get_vertices_error_response(
        &mut self,
        sender: &validator::PublicKey,
        response: validator::GetVerticesErrorResponse,
    ) -> anyhow::Result<()> {
        if !self.sync.requests.contains_key(&response.request) {
            return Ok(());
        }
        if response.high_qc.highest_qc.view() > self.vertex_store.high_qc().highest_qc.view() {
            tracing::debug!(?sender, view = %response.high_qc.highest_qc.view(), "peer is ahead, syncing to its high QC");
            self.sync_to_qc(&response.high_qc, sender)?;
        }
        Ok(())
    }

    /// Retries the syncs waiting for the request with another peer.
    pub(crate) fn process_vertex_request_timeout(
        &mut self,
        timeout: VertexRequestTimeout,
    ) -> anyhow::Result<()> {
        let Some(state) = self.sync.requests.remove(&timeout.request) else {
            return Ok(());
        };
        metrics::METRICS.sync_request_timeouts.inc();
        tracing::debug!(request = ?timeout.request, "vertex request timed out");
        let rng = &mut rand::thread_rng();
        // Prefer anyone but the peer which didn't answer.
        let candidates = match state.authors.len() {
            0 | 1 => &state.authors[..],
            _ => &state.authors[1..],
        };
        for sync_id in state.sync_ids {
            let Some(sync) = self.sync.syncing.remove(&sync_id) else {
                continue;
            };
            let Some(author) = candidates.choose(rng).cloned() else {
                continue;
            };
            self.sync_to_qc(&sync.high_qc, &author)?;
        }
        Ok(())
    }

    /// Resumes the syncs which were waiting for the ledger to reach the update.
    pub(crate) fn sync_ledger_update(&mut self, update: &LedgerUpdate) -> anyhow::Result<()> {
        let header = update.header();
        if header.epoch != self.epoch
            || header.accumulator.state_version
                < self.sync.current_ledger_header.accumulator.state_version
        {
            return Ok(());
        }
        self.sync.current_ledger_header = header.clone();
        let version = header.accumulator.state_version;
        let pending = self
            .sync
            .ledger_syncing
            .split_off(&version.saturating_add(1));
        let ready = std::mem::replace(&mut self.sync.ledger_syncing, pending);
        for sync_id in ready.into_values().flatten() {
            self.rebuild_and_sync_qc(sync_id)?;
        }
        let view = header.view;
        self.sync
            .syncing
            .retain(|_, s| s.high_qc.highest_qc.view() > view);
        Ok(())
    }
}
