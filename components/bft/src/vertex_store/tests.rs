use super::*;
use crate::testonly::InMemoryLedger;
use assert_matches::assert_matches;
use braid_consensus_roles::validator::{testonly::Setup, Txn, Vertex, VerifiedVertex, View};
use braid_consensus_storage::InMemoryVertexStore;
use pretty_assertions::assert_eq;

fn make_store(setup: &Setup) -> (VertexStore, Arc<InMemoryLedger>, Arc<InMemoryVertexStore>) {
    let ledger = InMemoryLedger::new();
    let persistent = Arc::new(InMemoryVertexStore::default());
    let store = VertexStore::new(setup.genesis.clone(), ledger.clone(), persistent.clone()).unwrap();
    (store, ledger, persistent)
}

#[test]
fn three_chain_commits_first_vertex_only() {
    let rng = &mut rand::thread_rng();
    let setup = Setup::new(rng, 4);
    let (mut store, ledger, _) = make_store(&setup);
    let chain = setup.make_chain(&[1, 2, 3]);
    for (v, _) in &chain {
        store.insert_vertex(v.clone()).unwrap();
    }

    for (_, qc) in &chain[..2] {
        assert_matches!(store.add_qc(qc).unwrap(), QcInsertion::Added(None));
    }
    assert!(ledger.committed().is_empty());

    let update = assert_matches!(
        store.add_qc(&chain[2].1).unwrap(),
        QcInsertion::Added(Some(update)) => update
    );
    assert_eq!(vec![chain[0].0.id()], ledger.committed_ids());
    assert_eq!(View(1), update.header().view);
    assert_eq!(chain[0].0.id(), store.root().id());
    assert_eq!(chain[2].1, store.high_qc().highest_qc);
    assert_eq!(chain[2].1, store.high_qc().highest_committed_qc);
    assert_eq!(2, store.len());
}

#[test]
fn gap_in_views_does_not_commit() {
    let rng = &mut rand::thread_rng();
    let setup = Setup::new(rng, 4);
    let (mut store, ledger, _) = make_store(&setup);
    let chain = setup.make_chain(&[1, 2, 4]);
    for (v, qc) in &chain {
        store.insert_vertex(v.clone()).unwrap();
        assert_matches!(store.add_qc(qc).unwrap(), QcInsertion::Added(None));
    }
    assert!(ledger.committed().is_empty());
}

#[test]
fn commit_prunes_other_branches() {
    let rng = &mut rand::thread_rng();
    let setup = Setup::new(rng, 4);
    let (mut store, ledger, _) = make_store(&setup);
    let chain = setup.make_chain(&[1, 2, 3, 4]);
    // A competing branch on top of genesis.
    let fork = setup.make_vertex(setup.genesis_qc(), View(2), vec![Txn(vec![7])]);
    let fork_child = setup.make_vertex(&setup.make_qc(&fork), View(3), vec![]);
    store.insert_vertex(fork.clone()).unwrap();
    store.insert_vertex(fork_child.clone()).unwrap();
    for (v, qc) in &chain {
        store.insert_vertex(v.clone()).unwrap();
        store.add_qc(qc).unwrap();
    }
    // QC of view 4 commits view 2, the QC of view 3 committed view 1 before.
    assert_eq!(
        vec![chain[0].0.id(), chain[1].0.id()],
        ledger.committed_ids()
    );
    assert!(!store.contains_vertex(&fork.id()));
    assert!(!store.contains_vertex(&fork_child.id()));
    assert!(!store.contains_vertex(&chain[0].0.id()));
    assert_eq!(chain[1].0.id(), store.root().id());
    assert_eq!(2, store.len());
}

#[test]
fn insert_is_idempotent() {
    let rng = &mut rand::thread_rng();
    let setup = Setup::new(rng, 4);
    let (mut store, _, _) = make_store(&setup);
    let (v1, _) = setup.make_chain(&[1]).pop().unwrap();
    let first = store.insert_vertex(v1.clone()).unwrap();
    let second = store.insert_vertex(v1).unwrap();
    assert_eq!(first, second);
    assert_eq!(1, store.len());
}

#[test]
fn vertex_with_parent_view_is_rejected() {
    let rng = &mut rand::thread_rng();
    let setup = Setup::new(rng, 4);
    let (mut store, _, _) = make_store(&setup);
    let (v1, qc1) = setup.make_chain(&[1]).pop().unwrap();
    store.insert_vertex(v1).unwrap();
    let leader = setup.validator_set.view_leader(View(1));
    let bad = VerifiedVertex::new(Vertex::new(qc1, View(1), vec![], leader));
    assert_matches!(
        store.insert_vertex(bad),
        Err(InsertError::ViewNotAfterParent { view, parent_view }) => {
            assert_eq!(View(1), view);
            assert_eq!(View(1), parent_view);
        }
    );
}

#[test]
fn missing_parent() {
    let rng = &mut rand::thread_rng();
    let setup = Setup::new(rng, 4);
    let (mut store, _, _) = make_store(&setup);
    let chain = setup.make_chain(&[1, 2]);
    assert_matches!(
        store.insert_vertex(chain[1].0.clone()),
        Err(InsertError::MissingParent { parent }) => assert_eq!(chain[0].0.id(), parent)
    );
    assert_matches!(
        store.add_qc(&chain[1].1).unwrap(),
        QcInsertion::MissingVertex
    );
}

#[test]
fn ledger_rejection() {
    let rng = &mut rand::thread_rng();
    let setup = Setup::new(rng, 4);
    let (mut store, ledger, _) = make_store(&setup);
    let (v1, _) = setup.make_chain(&[1]).pop().unwrap();
    ledger.reject(v1.id());
    assert_matches!(store.insert_vertex(v1), Err(InsertError::LedgerRejected));
    assert_eq!(0, store.len());
}

#[test]
fn chain_insert_keeps_updates_before_failure() {
    let rng = &mut rand::thread_rng();
    let setup = Setup::new(rng, 4);
    let (mut store, ledger, _) = make_store(&setup);
    let chain = setup.make_chain(&[1, 2, 3]);
    ledger.reject(chain[2].0.id());

    let mut updates = vec![];
    assert_matches!(
        store.insert_vertex_chain(chain.iter().map(|(v, _)| v.clone()), &mut updates),
        Err(InsertError::LedgerRejected)
    );
    assert_eq!(
        vec![chain[0].0.id(), chain[1].0.id()],
        updates.iter().map(|u| u.inserted.id()).collect::<Vec<_>>()
    );
    assert_eq!(2, store.len());
}

#[test]
fn vertices_and_paths() {
    let rng = &mut rand::thread_rng();
    let setup = Setup::new(rng, 4);
    let (mut store, _, _) = make_store(&setup);
    let chain = setup.make_chain(&[1, 2, 3]);
    for (v, _) in &chain {
        store.insert_vertex(v.clone()).unwrap();
    }
    let ids: Vec<_> = store
        .get_vertices(chain[2].0.id(), 4)
        .unwrap()
        .iter()
        .map(|v| v.id())
        .collect();
    assert_eq!(
        vec![
            chain[2].0.id(),
            chain[1].0.id(),
            chain[0].0.id(),
            setup.genesis.root().id()
        ],
        ids
    );
    assert_eq!(None, store.get_vertices(chain[2].0.id(), 5));

    let path: Vec<_> = store
        .path_from_root(chain[2].0.id())
        .iter()
        .map(|v| v.id())
        .collect();
    assert_eq!(chain.iter().map(|(v, _)| v.id()).collect::<Vec<_>>(), path);
    assert!(store.path_from_root(setup.genesis.root().id()).is_empty());
}

#[test]
fn timeout_certificate_updates_high_qc() {
    let rng = &mut rand::thread_rng();
    let setup = Setup::new(rng, 4);
    let (mut store, _, _) = make_store(&setup);
    store.insert_timeout_certificate(&setup.make_tc(View(3)));
    assert_eq!(View(3), store.high_qc().highest_view());
    // Older TCs are ignored.
    store.insert_timeout_certificate(&setup.make_tc(View(2)));
    assert_eq!(View(3), store.high_qc().highest_view());
}

#[test]
fn snapshot_recovers_the_store() {
    let rng = &mut rand::thread_rng();
    let setup = Setup::new(rng, 4);
    let (mut store, ledger, persistent) = make_store(&setup);
    let chain = setup.make_chain(&[1, 2, 3, 4]);
    for (v, qc) in &chain {
        store.insert_vertex(v.clone()).unwrap();
        store.add_qc(qc).unwrap();
    }
    let snapshot = persistent.load().unwrap().unwrap();
    assert_eq!(store.state().unwrap(), snapshot);

    let recovered = VertexStore::new(snapshot, ledger, persistent).unwrap();
    assert_eq!(store.root(), recovered.root());
    assert_eq!(store.high_qc(), recovered.high_qc());
    assert_eq!(store.len(), recovered.len());
}

#[test]
fn rebuild_replaces_contents() {
    let rng = &mut rand::thread_rng();
    let setup = Setup::new(rng, 4);
    let chain = setup.make_chain(&[1, 2, 3, 4]);

    // Peer which already committed view 1.
    let (mut peer, _, _) = make_store(&setup);
    for (v, qc) in &chain {
        peer.insert_vertex(v.clone()).unwrap();
        peer.add_qc(qc).unwrap();
    }

    let (mut store, _, _) = make_store(&setup);
    assert!(store.try_rebuild(&peer.state().unwrap()).unwrap());
    assert_eq!(peer.root(), store.root());
    assert_eq!(peer.high_qc(), store.high_qc());
    assert!(store.contains_vertex(&chain[3].0.id()));
}
