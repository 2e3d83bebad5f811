use super::*;
use crate::{
    event::ConsensusEvent,
    pipeline::testonly::{vertex_requests, TestContext},
};
use assert_matches::assert_matches;
use braid_consensus_roles::validator::{testonly::Setup, View};
use pretty_assertions::assert_eq;
use rand::Rng as _;

#[test]
fn serves_vertices() {
    let rng = &mut rand::thread_rng();
    let setup = Setup::new(rng, 4);
    let mut tc = TestContext::new(&setup, &setup.keys[0]);
    let peer = setup.keys[1].public();
    let root = setup.genesis.root().clone();

    let request = validator::GetVerticesRequest {
        vertex_id: root.id(),
        count: 1,
    };
    tc.deliver(peer.clone(), validator::ConsensusMsg::GetVerticesRequest(request))
        .unwrap();
    let unknown = validator::GetVerticesRequest {
        vertex_id: rng.gen(),
        count: 1,
    };
    tc.deliver(peer.clone(), validator::ConsensusMsg::GetVerticesRequest(unknown))
        .unwrap();

    let sent = tc.sent();
    assert_eq!(
        vec![
            (
                peer.clone(),
                validator::ConsensusMsg::GetVerticesResponse(validator::GetVerticesResponse {
                    vertices: vec![root.vertex().clone()],
                })
            ),
            (
                peer,
                validator::ConsensusMsg::GetVerticesErrorResponse(
                    validator::GetVerticesErrorResponse {
                        high_qc: setup.genesis_high_qc(),
                        request: unknown,
                    }
                )
            ),
        ],
        sent
    );
}

#[test]
fn syncs_missing_chain_parent_by_parent() {
    let rng = &mut rand::thread_rng();
    let setup = Setup::new(rng, 4);
    let chain = setup.make_chain(&[1, 2]);
    let mut tc = TestContext::new(&setup, &setup.keys[0]);
    tc.start();
    let author = setup.keys[1].public();

    let high_qc = validator::HighQc::new(chain[1].1.clone(), setup.genesis_qc().clone(), None);
    assert_eq!(
        SyncResult::InProgress,
        tc.ctx.sync_to_qc(&high_qc, &author).unwrap()
    );
    // Asking again doesn't send another request.
    assert_eq!(
        SyncResult::InProgress,
        tc.ctx.sync_to_qc(&high_qc, &author).unwrap()
    );
    let requests = vertex_requests(&tc.outputs());
    assert_eq!(
        vec![(
            author.clone(),
            validator::GetVerticesRequest {
                vertex_id: chain[1].0.id(),
                count: 1
            }
        )],
        requests
    );

    let respond = |tc: &mut TestContext, vertex: &validator::VerifiedVertex| {
        let response = validator::GetVerticesResponse {
            vertices: vec![vertex.vertex().clone()],
        };
        tc.deliver(
            author.clone(),
            validator::ConsensusMsg::GetVerticesResponse(response),
        )
        .unwrap();
    };
    respond(&mut tc, &chain[1].0);
    // Parent is missing too.
    let requests = vertex_requests(&tc.outputs());
    assert_eq!(1, requests.len());
    assert_eq!(chain[0].0.id(), requests[0].1.vertex_id);
    assert!(!tc.ctx.vertex_store.contains_vertex(&chain[1].0.id()));

    respond(&mut tc, &chain[0].0);
    assert!(tc.ctx.vertex_store.contains_vertex(&chain[0].0.id()));
    assert!(tc.ctx.vertex_store.contains_vertex(&chain[1].0.id()));
    assert_eq!(&high_qc, tc.ctx.vertex_store.high_qc());
    assert_eq!(View(3), tc.ctx.pacemaker.current_view());
    assert!(!tc.ctx.sync.is_syncing(&chain[1].0.id()));
    assert!(tc.ctx.sync.pending_requests().is_empty());
}

#[test]
fn unexpected_response_is_ignored() {
    let rng = &mut rand::thread_rng();
    let setup = Setup::new(rng, 4);
    let chain = setup.make_chain(&[1]);
    let mut tc = TestContext::new(&setup, &setup.keys[0]);
    tc.start();
    let response = validator::GetVerticesResponse {
        vertices: vec![chain[0].0.vertex().clone()],
    };
    tc.deliver(
        setup.keys[1].public(),
        validator::ConsensusMsg::GetVerticesResponse(response),
    )
    .unwrap();
    assert!(!tc.ctx.vertex_store.contains_vertex(&chain[0].0.id()));
}

#[test]
fn broken_chain_is_rejected() {
    let rng = &mut rand::thread_rng();
    let setup = Setup::new(rng, 4);
    let chain = setup.make_chain(&[1, 2, 3]);
    let mut tc = TestContext::new(&setup, &setup.keys[0]);
    tc.start();
    // Vertex 2 is missing between 3 and 1.
    let response = validator::GetVerticesResponse {
        vertices: vec![chain[2].0.vertex().clone(), chain[0].0.vertex().clone()],
    };
    assert_matches!(
        tc.deliver(
            setup.keys[1].public(),
            validator::ConsensusMsg::GetVerticesResponse(response)
        ),
        Err(crate::pipeline::Error::Invalid(_))
    );
    let empty = validator::GetVerticesResponse { vertices: vec![] };
    assert_matches!(
        tc.deliver(
            setup.keys[1].public(),
            validator::ConsensusMsg::GetVerticesResponse(empty)
        ),
        Err(crate::pipeline::Error::Invalid(_))
    );
}

#[test]
fn request_timeout_asks_another_peer() {
    let rng = &mut rand::thread_rng();
    let setup = Setup::new(rng, 4);
    let chain = setup.make_chain(&[1]);
    let mut tc = TestContext::new(&setup, &setup.keys[0]);
    tc.start();
    let author = setup.keys[1].public();
    let high_qc = validator::HighQc::new(chain[0].1.clone(), setup.genesis_qc().clone(), None);
    tc.ctx.sync_to_qc(&high_qc, &author).unwrap();
    let (_, request) = vertex_requests(&tc.outputs()).pop().unwrap();

    tc.ctx
        .process_timer(TimerEvent::VertexRequest {
            epoch: tc.ctx.epoch,
            timeout: VertexRequestTimeout { request },
        })
        .unwrap();
    let retries = vertex_requests(&tc.outputs());
    assert_eq!(1, retries.len());
    assert_eq!(request, retries[0].1);
    assert_ne!(author, retries[0].0);
    assert_ne!(tc.me(), retries[0].0);
    assert!(tc.ctx.sync.is_syncing(&chain[0].0.id()));

    // A timeout of a request which was already answered does nothing.
    tc.ctx
        .process_timer(TimerEvent::VertexRequest {
            epoch: tc.ctx.epoch,
            timeout: VertexRequestTimeout {
                request: validator::GetVerticesRequest {
                    vertex_id: rng.gen(),
                    count: 1,
                },
            },
        })
        .unwrap();
    assert!(vertex_requests(&tc.outputs()).is_empty());
}

#[test]
fn error_response_from_peer_ahead() {
    let rng = &mut rand::thread_rng();
    let setup = Setup::new(rng, 4);
    let chain = setup.make_chain(&[1, 2]);
    let mut tc = TestContext::new(&setup, &setup.keys[0]);
    tc.start();
    let author = setup.keys[1].public();
    let high_qc = validator::HighQc::new(chain[0].1.clone(), setup.genesis_qc().clone(), None);
    tc.ctx.sync_to_qc(&high_qc, &author).unwrap();
    let (_, request) = vertex_requests(&tc.outputs()).pop().unwrap();

    // The peer pruned the vertex, but knows a higher QC.
    let peer_high_qc =
        validator::HighQc::new(chain[1].1.clone(), setup.genesis_qc().clone(), None);
    let response = validator::GetVerticesErrorResponse {
        high_qc: peer_high_qc,
        request,
    };
    tc.deliver(
        author.clone(),
        validator::ConsensusMsg::GetVerticesErrorResponse(response),
    )
    .unwrap();
    assert!(tc.ctx.sync.is_syncing(&chain[1].0.id()));
    let requests = vertex_requests(&tc.outputs());
    assert_eq!(author, requests[0].0);
    assert_eq!(chain[1].0.id(), requests[0].1.vertex_id);
}

#[test]
fn committed_sync_rebuilds_the_store() {
    let rng = &mut rand::thread_rng();
    let setup = Setup::new(rng, 4);
    let chain = setup.make_chain(&[1, 2, 3, 4]);
    let leader = setup.validator_set.view_leader(View(5));
    let mut tc = TestContext::new_other_than(&setup, &[leader.clone()]);
    tc.start();

    // QC of view 4 commits view 2, far ahead of this node.
    let qc4 = chain[3].1.clone();
    let high_qc = validator::HighQc::new(qc4.clone(), qc4.clone(), None);
    let v5 = setup.make_vertex(&qc4, View(5), vec![]);
    tc.deliver_proposal(&v5, high_qc).unwrap();
    let requests = vertex_requests(&tc.outputs());
    assert_eq!(
        vec![(
            leader.clone(),
            validator::GetVerticesRequest {
                vertex_id: chain[3].0.id(),
                count: 3
            }
        )],
        requests
    );

    let response = validator::GetVerticesResponse {
        vertices: chain[1..]
            .iter()
            .rev()
            .map(|(v, _)| v.vertex().clone())
            .collect(),
    };
    tc.deliver(
        leader.clone(),
        validator::ConsensusMsg::GetVerticesResponse(response),
    )
    .unwrap();
    // The ledger has to catch up first.
    let proof = qc4.ledger_proof().unwrap();
    let sync_required: Vec<_> = tc
        .outputs()
        .into_iter()
        .filter_map(|output| match output {
            OutputMessage::LedgerSyncRequired { proof, peers } => Some((proof, peers)),
            _ => None,
        })
        .collect();
    assert_eq!(1, sync_required.len());
    assert_eq!(proof, sync_required[0].0);
    assert!(!sync_required[0].1.contains(&tc.me()));
    assert_eq!(View(0), tc.ctx.vertex_store.root().view());

    tc.ctx
        .process_ledger_update(&LedgerUpdate {
            proof,
            epoch_change: None,
        })
        .unwrap();
    assert_eq!(chain[1].0.id(), tc.ctx.vertex_store.root().id());
    assert_eq!(View(5), tc.ctx.pacemaker.current_view());
    // The proposal waiting for the sync got processed.
    assert!(tc.ctx.vertex_store.contains_vertex(&v5.id()));
    assert_eq!(
        Some(View(5)),
        tc.ctx
            .safety_rules
            .last_vote_in(View(5))
            .map(|v| v.view())
    );
}

#[test]
fn ledger_update_drops_syncs_behind_it() {
    let rng = &mut rand::thread_rng();
    let setup = Setup::new(rng, 4);
    let chain = setup.make_chain(&[1, 2]);
    let mut tc = TestContext::new(&setup, &setup.keys[0]);
    tc.start();
    let high_qc = validator::HighQc::new(chain[0].1.clone(), setup.genesis_qc().clone(), None);
    tc.ctx
        .sync_to_qc(&high_qc, &setup.keys[1].public())
        .unwrap();
    assert!(tc.ctx.sync.is_syncing(&chain[0].0.id()));

    // The ledger got to view 2 through a ledger sync.
    let update = LedgerUpdate {
        proof: validator::LedgerProof {
            header: setup.make_header(&chain[1].0).ledger_header,
            signatures: chain[1].1.signatures.clone(),
        },
        epoch_change: None,
    };
    tc.ctx.process_ledger_update(&update).unwrap();
    assert!(!tc.ctx.sync.is_syncing(&chain[0].0.id()));
}

#[test]
fn event_waits_for_sync() {
    let rng = &mut rand::thread_rng();
    let setup = Setup::new(rng, 4);
    let chain = setup.make_chain(&[1]);
    let leader = setup.validator_set.view_leader(View(2));
    let mut tc = TestContext::new_other_than(&setup, &[leader]);
    tc.start();
    let high_qc = validator::HighQc::new(chain[0].1.clone(), setup.genesis_qc().clone(), None);
    let v2 = setup.make_vertex(&chain[0].1, View(2), vec![]);
    let validator::ConsensusMsg::Proposal(proposal) = tc.proposal(&v2, high_qc) else {
        unreachable!();
    };
    tc.ctx
        .process_consensus_event(ConsensusEvent::Proposal(proposal))
        .unwrap();
    assert!(tc.ctx.sync.is_syncing(&chain[0].0.id()));
    assert!(!tc.ctx.vertex_store.contains_vertex(&v2.id()));
}
