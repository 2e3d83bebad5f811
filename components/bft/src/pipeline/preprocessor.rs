//! Holds back events until the vertex of their high QC is in the store and their view has started.
use super::{EpochContext, Error};
use crate::{
    event::{BftInsertUpdate, ConsensusEvent, ViewUpdate},
    sync::SyncResult,
};
use braid_consensus_roles::validator;
use std::collections::BTreeMap;

/// Events more than this many views ahead of the current view are dropped.
pub(crate) const MAX_VIEWS_AHEAD: u64 = 64;
/// Cap on the number of queued events of future views.
pub(crate) const MAX_QUEUED_VIEW_EVENTS: usize = 1024;

/// Events waiting to be processed.
#[derive(Debug, Default)]
pub(crate) struct Preprocessor {
    /// Events waiting for the vertex of their highest QC to be synced.
    syncing_events: Vec<ConsensusEvent>,
    /// Events of future views.
    view_queues: BTreeMap<validator::View, Vec<ConsensusEvent>>,
    /// Number of events in `view_queues`.
    queued: usize,
}

#[cfg(test)]
impl Preprocessor {
    /// Number of queued events of future views.
    pub(crate) fn queued_view_events(&self) -> usize {
        self.queued
    }
}

impl EpochContext {
    /// Passes a verified event on to the reducer once it can be processed.
    pub(crate) fn preprocess(&mut self, event: ConsensusEvent) -> Result<(), Error> {
        let current_view = self.pacemaker.current_view();
        if event.view() < current_view {
            return Err(Error::Old { current_view });
        }
        if let ConsensusEvent::Vote(vote) = &event {
            // Regular votes go to the leader of the next view, timeout votes to everyone.
            if !vote.is_timeout() && self.validators.view_leader(vote.view().next()) != self.me {
                return Err(Error::NotNextLeader { view: vote.view() });
            }
        }
        let Some(author) = event.author().cloned() else {
            return Err(Error::Internal(anyhow::format_err!(
                "verified event without an author"
            )));
        };
        match self.sync_to_qc(event.high_qc(), &author)? {
            SyncResult::Synced => self.process_on_current_view_or_queue(event),
            SyncResult::Invalid => Err(Error::StaleHighQc),
            SyncResult::InProgress => {
                tracing::trace!(view = %event.view(), label = event.label(), "waiting for sync");
                self.preprocessor.syncing_events.push(event);
                Ok(())
            }
        }
    }

    fn process_on_current_view_or_queue(&mut self, event: ConsensusEvent) -> Result<(), Error> {
        let current_view = self.pacemaker.current_view();
        match event.view().cmp(&current_view) {
            std::cmp::Ordering::Less => Err(Error::Old { current_view }),
            std::cmp::Ordering::Equal => self.reduce(event),
            std::cmp::Ordering::Greater => {
                let view = event.view();
                if view.0 - current_view.0 > MAX_VIEWS_AHEAD
                    || self.preprocessor.queued >= MAX_QUEUED_VIEW_EVENTS
                {
                    return Err(Error::TooFarAhead { view, current_view });
                }
                self.preprocessor.view_queues.entry(view).or_default().push(event);
                self.preprocessor.queued += 1;
                Ok(())
            }
        }
    }

    /// Replays the events of the new view and drops the events of the views left behind.
    pub(crate) fn preprocessor_on_view_update(&mut self, update: &ViewUpdate) -> anyhow::Result<()> {
        let queues = &mut self.preprocessor.view_queues;
        *queues = queues.split_off(&update.view);
        let ready = queues.remove(&update.view).unwrap_or_default();
        self.preprocessor.queued = queues.values().map(Vec::len).sum();
        self.preprocessor
            .syncing_events
            .retain(|e| e.view() >= update.view);
        self.replay_all(ready)
    }

    /// Replays the events which were waiting for the inserted vertex.
    pub(crate) fn preprocessor_on_insert(&mut self, update: &BftInsertUpdate) -> anyhow::Result<()> {
        let id = update.inserted.id();
        let (ready, waiting) = std::mem::take(&mut self.preprocessor.syncing_events)
            .into_iter()
            .partition(|e| e.high_qc().highest_qc.proposed().vertex_id == id);
        self.preprocessor.syncing_events = waiting;
        self.replay_all(ready)
    }

    /// Replays the events whose highest QC vertex is in the store, e.g. after the store was rebuilt.
    pub(crate) fn replay_synced_events(&mut self) -> anyhow::Result<()> {
        let (ready, waiting) = std::mem::take(&mut self.preprocessor.syncing_events)
            .into_iter()
            .partition(|e| {
                self.vertex_store
                    .contains_vertex(&e.high_qc().highest_qc.proposed().vertex_id)
            });
        self.preprocessor.syncing_events = waiting;
        self.replay_all(ready)
    }

    fn replay_all(&mut self, events: Vec<ConsensusEvent>) -> anyhow::Result<()> {
        for event in events {
            self.replay(event)?;
        }
        Ok(())
    }

    fn replay(&mut self, event: ConsensusEvent) -> anyhow::Result<()> {
        match self.preprocess(event) {
            Ok(()) => Ok(()),
            Err(Error::Internal(err)) => Err(err),
            Err(err) => {
                tracing::debug!("dropping replayed event: {err:#}");
                Ok(())
            }
        }
    }
}
