//! Reduces events of the current view into vertex insertions, votes and certificates.
use super::{EpochContext, Error, LocalEvent};
use crate::{
    event::{BftInsertUpdate, ConsensusEvent},
    metrics::{ByzantineLabel, METRICS},
    safety_rules,
    vote_aggregator::{Quorum, VoteOutcome, VoteRejection},
};
use braid_consensus_roles::validator;

impl EpochContext {
    pub(crate) fn reduce(&mut self, event: ConsensusEvent) -> Result<(), Error> {
        match event {
            ConsensusEvent::Proposal(proposal) => self.reduce_proposal(proposal),
            ConsensusEvent::Vote(vote) => self.reduce_vote(vote),
        }
    }

    /// Inserts the proposed vertex. The vote follows once the insert update is processed.
    fn reduce_proposal(&mut self, proposal: validator::Proposal) -> Result<(), Error> {
        tracing::debug!(view = %proposal.view(), author = ?proposal.author(), "processing proposal");
        let vertex = validator::VerifiedVertex::new(proposal.vertex);
        match self.vertex_store.insert_vertex(vertex) {
            Ok(update) => {
                self.local_events.push_back(LocalEvent::Inserted(update));
                Ok(())
            }
            Err(crate::vertex_store::InsertError::Internal(err)) => Err(Error::Internal(err)),
            Err(err) => Err(Error::Insert(err)),
        }
    }

    fn reduce_vote(&mut self, vote: validator::Vote) -> Result<(), Error> {
        if self.has_reached_quorum {
            tracing::trace!(view = %vote.view(), author = ?vote.author, "quorum already reached, ignoring vote");
            return Ok(());
        }
        match self.vote_aggregator.process_vote(&vote, &self.validators) {
            VoteOutcome::Accepted => Ok(()),
            VoteOutcome::Rejected(VoteRejection::Equivocation(evidence)) => {
                METRICS.byzantine_evidence[&ByzantineLabel::Equivocation].inc();
                Err(Error::Equivocation(evidence))
            }
            VoteOutcome::Rejected(rejection) => Err(Error::VoteRejected(rejection)),
            VoteOutcome::QuorumReached(quorum) => {
                self.has_reached_quorum = true;
                let store_high_qc = self.vertex_store.high_qc();
                let high_qc = match quorum {
                    Quorum::Qc(qc) => {
                        tracing::debug!(view = %qc.view(), "formed QC");
                        METRICS.vote_quorums.inc();
                        validator::HighQc::new(
                            qc,
                            store_high_qc.highest_committed_qc.clone(),
                            store_high_qc.highest_tc.clone(),
                        )
                    }
                    Quorum::Tc(tc) => {
                        tracing::debug!(view = %tc.view, "formed TC");
                        METRICS.timeout_quorums.inc();
                        validator::HighQc::new(
                            store_high_qc.highest_qc.clone(),
                            store_high_qc.highest_committed_qc.clone(),
                            Some(tc),
                        )
                    }
                };
                self.sync_to_qc(&high_qc, &vote.author)?;
                Ok(())
            }
        }
    }

    /// Votes for a vertex of the current view once it is inserted,
    /// unless the view already timed out.
    pub(crate) fn reducer_on_insert(&mut self, update: &BftInsertUpdate) -> anyhow::Result<()> {
        let Some(view_update) = self.pacemaker.latest_view_update().cloned() else {
            return Ok(());
        };
        let vertex = update.inserted.vertex();
        if vertex.view() != view_update.view
            || vertex.is_timeout()
            || self.pacemaker.is_view_timed_out()
        {
            return Ok(());
        }
        match self
            .safety_rules
            .vote_for(&update.inserted, view_update.high_qc)
        {
            Ok(vote) => {
                tracing::debug!(view = %vote.view(), next_leader = ?view_update.next_leader, "voting");
                self.send(view_update.next_leader, validator::ConsensusMsg::Vote(vote));
            }
            Err(safety_rules::Error::Internal(err)) => return Err(err),
            Err(err) => tracing::debug!(view = %vertex.view(), "not voting: {err:#}"),
        }
        Ok(())
    }
}
