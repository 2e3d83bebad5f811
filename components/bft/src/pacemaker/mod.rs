//! View synchronization: entering views on QCs and TCs, proposing as the leader,
//! and timing out views which make no progress.
use crate::{
    config::PacemakerConfig,
    event::{BftInsertUpdate, ScheduledLocalTimeout, TimerEvent, ViewUpdate},
    metrics,
    pipeline::{EpochContext, LocalEvent},
    safety_rules,
    vertex_store::InsertError,
};
use braid_consensus_roles::validator;
use std::time::{Duration, Instant};


/// View state of the node.
#[derive(Debug)]
pub(crate) struct Pacemaker {
    config: PacemakerConfig,
    validators: validator::BftValidatorSet,
    /// View the node moved to, possibly not started yet.
    current_view: validator::View,
    /// High QC which justified `current_view`.
    high_qc: Option<validator::HighQc>,
    /// Last started view.
    latest_view_update: Option<ViewUpdate>,
    is_view_timed_out: bool,
    /// Fallback vertex this node votes for once it is inserted.
    timeout_vote_vertex_id: Option<validator::VertexId>,
    view_start: Instant,
}

impl Pacemaker {
    pub(crate) fn new(config: PacemakerConfig, validators: validator::BftValidatorSet) -> Self {
        Self {
            config,
            validators,
            current_view: validator::View::genesis(),
            high_qc: None,
            latest_view_update: None,
            is_view_timed_out: false,
            timeout_vote_vertex_id: None,
            view_start: Instant::now(),
        }
    }

    pub(crate) fn current_view(&self) -> validator::View {
        self.current_view
    }

    pub(crate) fn latest_view_update(&self) -> Option<&ViewUpdate> {
        self.latest_view_update.as_ref()
    }

    pub(crate) fn is_view_timed_out(&self) -> bool {
        self.is_view_timed_out
    }

    /// Moves to the view after the highest view certified by `high_qc`.
    /// Certificates of views before the current one are ignored.
    pub(crate) fn process_qc(&mut self, high_qc: validator::HighQc) -> Option<ViewUpdate> {
        let view = high_qc.highest_view();
        if view < self.current_view {
            tracing::trace!(%view, current_view = %self.current_view, "ignoring QC of a past view");
            return None;
        }
        let next = view.next();
        self.high_qc = Some(high_qc.clone());
        if next <= self.current_view {
            return None;
        }
        self.current_view = next;
        Some(ViewUpdate {
            view: next,
            high_qc,
            leader: self.validators.view_leader(next),
            next_leader: self.validators.view_leader(next.next()),
        })
    }

    /// Records the start of a view. Returns `false` for views which are not newer than the last started one.
    pub(crate) fn process_view_update(&mut self, update: &ViewUpdate) -> bool {
        if self
            .latest_view_update
            .as_ref()
            .is_some_and(|latest| update.view <= latest.view)
        {
            return false;
        }
        self.latest_view_update = Some(update.clone());
        self.is_view_timed_out = false;
        self.timeout_vote_vertex_id = None;
        metrics::METRICS.view_latency.observe(self.view_start.elapsed());
        self.view_start = Instant::now();
        metrics::METRICS.current_view.set(update.view.0);
        true
    }

    /// Timeout of the view started by the update.
    pub(crate) fn timeout(&self, update: &ViewUpdate) -> Duration {
        self.config.timeout(update.uncommitted_views())
    }

    /// Delay until the timeout fires again, doubling on every repetition.
    pub(crate) fn retry_timeout(&self, timeout: &ScheduledLocalTimeout) -> Duration {
        self.config.retry_timeout(
            self.timeout(&timeout.view_update),
            timeout.count.saturating_add(1),
        )
    }

    /// Marks the current view as timed out. Returns `false` if the timeout is for another view.
    pub(crate) fn process_local_timeout(&mut self, timeout: &ScheduledLocalTimeout) -> bool {
        let Some(latest) = &self.latest_view_update else {
            return false;
        };
        if timeout.view() != latest.view {
            tracing::trace!(view = %timeout.view(), current_view = %latest.view, "ignoring timeout of another view");
            return false;
        }
        self.is_view_timed_out = true;
        if timeout.count == 0 {
            metrics::METRICS.timed_out_views.inc();
        }
        true
    }
}

impl EpochContext {
    /// Starts the view of the update: schedules its local timeout and proposes
    /// if this node is the leader. Stale updates are ignored.
    pub(crate) fn start_view(&mut self, update: &ViewUpdate) -> anyhow::Result<bool> {
        if !self.pacemaker.process_view_update(update) {
            return Ok(false);
        }
        tracing::info!(epoch = %self.epoch, view = %update.view, leader = ?update.leader, "starting view");
        let delay = self.pacemaker.timeout(update);
        self.schedule_timer(
            TimerEvent::LocalTimeout {
                epoch: self.epoch,
                timeout: ScheduledLocalTimeout::new(update.clone(), delay),
            },
            delay,
        );
        if update.leader == self.me {
            self.propose(update)?;
        }
        Ok(true)
    }

    fn propose(&mut self, update: &ViewUpdate) -> anyhow::Result<()> {
        let qc = &update.high_qc.highest_qc;
        // Nothing new can be executed after the end of the epoch.
        let txns = if qc.proposed().ledger_header.is_end_of_epoch() {
            vec![]
        } else {
            let prepared = self.vertex_store.path_from_root(qc.proposed().vertex_id);
            self.config
                .proposal_generator
                .generate_next_txns(update.view, &prepared)
        };
        let vertex = validator::VerifiedVertex::new(validator::Vertex::new(
            qc.clone(),
            update.view,
            txns,
            self.me.clone(),
        ));
        match self
            .safety_rules
            .sign_proposal(vertex, update.high_qc.clone())
        {
            Ok(proposal) => {
                tracing::debug!(view = %update.view, txns = proposal.vertex.txns.len(), "proposing");
                self.broadcast(validator::ConsensusMsg::Proposal(proposal));
                metrics::METRICS.proposals_sent.inc();
            }
            Err(safety_rules::Error::Internal(err)) => return Err(err),
            Err(err) => tracing::warn!(view = %update.view, "not proposing: {err:#}"),
        }
        Ok(())
    }

    /// Handles the local timeout of a view: sends a timeout vote and reschedules the timeout.
    pub(crate) fn process_local_timeout(
        &mut self,
        timeout: ScheduledLocalTimeout,
    ) -> anyhow::Result<()> {
        if !self.pacemaker.process_local_timeout(&timeout) {
            return Ok(());
        }
        let view = timeout.view();
        tracing::info!(epoch = %self.epoch, %view, count = timeout.count, "local timeout");

        if let Some(vote) = self.safety_rules.last_vote_in(view).cloned() {
            match self.safety_rules.timeout_vote(vote) {
                Ok(vote) => self.broadcast_timeout_vote(vote),
                Err(safety_rules::Error::Internal(err)) => return Err(err),
                Err(err) => tracing::warn!(%view, "no timeout vote: {err:#}"),
            }
        } else {
            self.create_timeout_vertex_and_vote(&timeout.view_update)?;
        }

        let delay = self.pacemaker.retry_timeout(&timeout);
        self.schedule_timer(
            TimerEvent::LocalTimeout {
                epoch: self.epoch,
                timeout: timeout.next_retry(delay),
            },
            delay,
        );
        Ok(())
    }

    /// Inserts the fallback vertex of the view. The vote follows once the insert update is processed.
    fn create_timeout_vertex_and_vote(&mut self, update: &ViewUpdate) -> anyhow::Result<()> {
        let vertex = validator::VerifiedVertex::new(validator::Vertex::timeout(
            update.high_qc.highest_qc.clone(),
            update.view,
            update.leader.clone(),
        ));
        self.pacemaker.timeout_vote_vertex_id = Some(vertex.id());
        match self.vertex_store.insert_vertex(vertex) {
            Ok(inserted) => self.local_events.push_back(LocalEvent::Inserted(inserted)),
            Err(InsertError::Internal(err)) => return Err(err),
            Err(err) => tracing::warn!(view = %update.view, "failed to insert timeout vertex: {err:#}"),
        }
        Ok(())
    }

    /// Votes for the fallback vertex of a timed out view once it is inserted.
    pub(crate) fn pacemaker_on_insert(&mut self, update: &BftInsertUpdate) -> anyhow::Result<()> {
        if !self.pacemaker.is_view_timed_out
            || self.pacemaker.timeout_vote_vertex_id != Some(update.inserted.id())
        {
            return Ok(());
        }
        let Some(view_update) = self.pacemaker.latest_view_update.clone() else {
            return Ok(());
        };
        self.pacemaker.timeout_vote_vertex_id = None;
        match self
            .safety_rules
            .timeout_for(view_update.view, &update.inserted, view_update.high_qc)
        {
            Ok(vote) => self.broadcast_timeout_vote(vote),
            Err(safety_rules::Error::Internal(err)) => return Err(err),
            Err(err) => tracing::warn!(view = %view_update.view, "no timeout vote: {err:#}"),
        }
        Ok(())
    }

    fn broadcast_timeout_vote(&mut self, vote: validator::Vote) {
        self.broadcast(validator::ConsensusMsg::Vote(vote));
        metrics::METRICS.timeouts_sent.inc();
    }
}
