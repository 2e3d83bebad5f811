use crate::{
    testonly::{
        make_config,
        sim::{Behavior, Network},
        EpochSchedule, InMemoryLedger,
    },
    InputMessage, OutputMessage,
};
use braid_consensus_roles::validator::{self, testonly::Setup, View};
use braid_consensus_utils::pipe;
use rand::{seq::SliceRandom as _, Rng as _};
use std::{
    collections::{HashMap, HashSet},
    time::Duration,
};
use test_casing::test_casing;

/// Number of views all the online nodes have to reach.
const VIEWS: u64 = 30;

fn reached_view(net: &Network, view: View) -> bool {
    net.honest().all(|n| n.view().is_some_and(|v| v >= view))
}

#[test]
fn responsive_with_a_proposal_drop_per_view() {
    braid_consensus_utils::testonly::abort_on_panic();
    let rng = &mut rand::thread_rng();
    let setup = Setup::new(rng, 4);
    let nodes: Vec<_> = setup.keys.iter().map(|k| k.public()).collect();

    // In every view, one node other than the leader misses the proposal.
    let mut victims: HashMap<View, validator::PublicKey> = HashMap::new();
    let policy = move |from: &validator::PublicKey,
                       to: &validator::PublicKey,
                       msg: &validator::ConsensusMsg| {
        let validator::ConsensusMsg::Proposal(proposal) = msg else {
            return false;
        };
        let victim = victims.entry(proposal.view()).or_insert_with(|| {
            let others: Vec<_> = nodes.iter().filter(|n| *n != from).collect();
            (*others.choose(&mut rand::thread_rng()).unwrap()).clone()
        });
        *victim == *to
    };
    let mut net = Network::new(&setup, &[Behavior::Honest; 4], InMemoryLedger::new)
        .unwrap()
        .with_drop_policy(Box::new(policy));
    net.start().unwrap();
    net.run_until(Duration::from_secs(10), |net| reached_view(net, View(VIEWS)))
        .unwrap();
    net.check_safety().unwrap();
    for node in net.honest() {
        assert!(!node.ledger.committed().is_empty());
    }
}

#[test_casing(3, [
    [Behavior::Honest; 4],
    [Behavior::Offline, Behavior::Honest, Behavior::Honest, Behavior::Honest],
    [Behavior::HonestNotProposing, Behavior::Honest, Behavior::Honest, Behavior::Honest],
])]
#[test]
fn no_fork(behaviors: [Behavior; 4]) {
    braid_consensus_utils::testonly::abort_on_panic();
    let rng = &mut rand::thread_rng();
    let setup = Setup::new(rng, 4);
    // Random losses of any message kind; sync and timeouts have to make up for them.
    let policy = |_: &validator::PublicKey,
                  _: &validator::PublicKey,
                  _: &validator::ConsensusMsg| rand::thread_rng().gen_bool(0.02);
    let mut net = Network::new(&setup, &behaviors, InMemoryLedger::new)
        .unwrap()
        .with_drop_policy(Box::new(policy));
    net.start().unwrap();
    net.run_until(Duration::from_secs(600), |net| reached_view(net, View(VIEWS)))
        .unwrap();
    net.check_safety().unwrap();
    let committed: Vec<_> = net.honest().map(|n| n.ledger.committed().len()).collect();
    assert!(committed.iter().any(|n| *n > 0), "nothing committed");
}

#[test]
fn epochs_advance() {
    braid_consensus_utils::testonly::abort_on_panic();
    let rng = &mut rand::thread_rng();
    let setup = Setup::new(rng, 4);
    let schedule = EpochSchedule {
        epoch_length: 4,
        next_validators: setup.validator_set.clone(),
    };
    let mut net = Network::new(&setup, &[Behavior::Honest; 4], || {
        InMemoryLedger::with_schedule(schedule.clone())
    })
    .unwrap();
    net.start().unwrap();
    let last = validator::Epoch(4);
    net.run_until(Duration::from_secs(300), |net| {
        net.honest().all(|n| n.manager.epoch() >= last)
    })
    .unwrap();
    net.check_safety().unwrap();

    for node in net.honest() {
        // Every finished epoch ends with a committed header carrying the next validators.
        let epochs: HashSet<_> = node
            .ledger
            .committed()
            .iter()
            .filter(|v| v.ledger_header().is_end_of_epoch())
            .map(|v| v.ledger_header().epoch)
            .collect();
        for epoch in 1..last.0 {
            assert!(epochs.contains(&validator::Epoch(epoch)));
        }
        assert!(node.manager.is_active());
    }
}

#[tokio::test]
async fn runner_commits() {
    braid_consensus_utils::testonly::abort_on_panic();
    let rng = &mut rand::thread_rng();
    let setup = Setup::new(rng, 4);
    let initial = validator::BftConfiguration {
        validator_set: setup.validator_set.clone(),
        vertex_store_state: setup.genesis.clone(),
    };

    let mut ledgers = vec![];
    let mut inputs = HashMap::new();
    let mut outputs = vec![];
    for key in &setup.keys {
        let ledger = InMemoryLedger::new();
        ledgers.push(ledger.clone());
        let (actor, dispatcher) = pipe::new::<InputMessage, OutputMessage>();
        tokio::spawn(make_config(key.clone(), ledger).run(initial.clone(), actor));
        inputs.insert(key.public(), dispatcher.send);
        outputs.push((key.public(), dispatcher.recv));
    }
    // Connects the outputs of every node with the inputs of the others.
    for (sender, mut recv) in outputs {
        let inputs = inputs.clone();
        tokio::spawn(async move {
            while let Some(output) = recv.recv().await {
                if let OutputMessage::Network { target, msg } = output {
                    if let Some(send) = inputs.get(&target) {
                        let _ = send.send(InputMessage::Network {
                            sender: sender.clone(),
                            msg,
                        });
                    }
                }
            }
        });
    }

    // Runs on the real clock: the nodes never go idle, so a paused clock would never advance.
    tokio::time::timeout(Duration::from_secs(60), async {
        while ledgers.iter().any(|l| l.committed().len() < 5) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    let ids: Vec<_> = ledgers.iter().map(|l| l.committed_ids()).collect();
    for other in &ids[1..] {
        let n = ids[0].len().min(other.len());
        assert_eq!(ids[0][..n], other[..n]);
    }
}
