//! Test-only utilities.
use super::{
    timeout_hash, AccumulatorState, BftHeader, BftValidator, BftValidatorSet, Epoch, HighQc,
    LedgerHeader, PublicKey, QuorumCertificate, SecretKey, TimeoutCertificate, Txn,
    VerifiedVertex, Vertex, VertexId, VertexStoreState, View, Vote, VoteData,
};
use rand::{
    distributions::{Distribution, Standard},
    Rng,
};

impl Distribution<View> for Standard {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> View {
        View(rng.gen_range(1..1000))
    }
}

impl Distribution<Epoch> for Standard {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Epoch {
        Epoch(rng.gen_range(1..100))
    }
}

impl Distribution<VertexId> for Standard {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> VertexId {
        VertexId(rng.gen())
    }
}

impl Distribution<Txn> for Standard {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Txn {
        let n = rng.gen_range(1..32);
        Txn((0..n).map(|_| rng.gen()).collect())
    }
}

/// Deterministic execution of a vertex on top of its parent's ledger header.
/// Children of an end of epoch header don't change the ledger.
pub fn execute(parent: &LedgerHeader, vertex: &VerifiedVertex) -> LedgerHeader {
    if parent.is_end_of_epoch() {
        return parent.clone();
    }
    let mut accumulator = parent.accumulator.clone();
    for txn in vertex.txns() {
        accumulator = accumulator.extend(&txn.0);
    }
    LedgerHeader {
        epoch: vertex.epoch(),
        view: vertex.view(),
        accumulator,
        next_validator_set: None,
    }
}

/// Validators and genesis of a test epoch.
#[derive(Debug, Clone)]
pub struct Setup {
    /// Validators' secret keys.
    pub keys: Vec<SecretKey>,
    /// Validator set.
    pub validator_set: BftValidatorSet,
    /// Genesis vertex store state.
    pub genesis: VertexStoreState,
}

impl Setup {
    /// Setup with `validators` validators of power 1, in epoch 1.
    pub fn new(rng: &mut impl Rng, validators: usize) -> Self {
        Self::new_with_powers(rng, vec![1; validators])
    }

    /// Setup with validators of the given powers, in epoch 1.
    pub fn new_with_powers(rng: &mut impl Rng, powers: Vec<u64>) -> Self {
        let keys: Vec<SecretKey> = powers.iter().map(|_| rng.gen()).collect();
        let validator_set = BftValidatorSet::new(keys.iter().zip(&powers).map(|(k, p)| {
            BftValidator {
                node: k.public(),
                power: *p,
            }
        }))
        .unwrap();
        let genesis = VertexStoreState::genesis(LedgerHeader::epoch_genesis(
            Epoch(1),
            AccumulatorState::default(),
        ));
        Self {
            keys,
            validator_set,
            genesis,
        }
    }

    /// Epoch of the setup.
    pub fn epoch(&self) -> Epoch {
        self.genesis.epoch()
    }

    /// Genesis QC.
    pub fn genesis_qc(&self) -> &QuorumCertificate {
        &self.genesis.high_qc().highest_qc
    }

    /// Genesis high QC.
    pub fn genesis_high_qc(&self) -> HighQc {
        self.genesis.high_qc().clone()
    }

    /// Secret key of a validator.
    pub fn key(&self, node: &PublicKey) -> &SecretKey {
        self.keys.iter().find(|k| &k.public() == node).unwrap()
    }

    /// Secret key of the leader of the view.
    pub fn leader_key(&self, view: View) -> &SecretKey {
        self.key(&self.validator_set.view_leader(view))
    }

    /// Vertex in the given view extending the QC, proposed by the view leader.
    pub fn make_vertex(&self, qc: &QuorumCertificate, view: View, txns: Vec<Txn>) -> VerifiedVertex {
        let leader = self.validator_set.view_leader(view);
        VerifiedVertex::new(Vertex::new(qc.clone(), view, txns, leader))
    }

    /// Header of the vertex, as computed by `execute()`.
    pub fn make_header(&self, vertex: &VerifiedVertex) -> BftHeader {
        BftHeader {
            view: vertex.view(),
            vertex_id: vertex.id(),
            ledger_header: execute(&vertex.parent_header().ledger_header, vertex),
        }
    }

    /// Vote of the given validator for the vertex.
    pub fn make_vote(&self, key: &SecretKey, vertex: &VerifiedVertex) -> Vote {
        let vote_data = VoteData::new(vertex, self.make_header(vertex));
        Vote::new(key, vote_data, self.genesis_high_qc())
    }

    /// QC signed by all validators for the vertex.
    pub fn make_qc(&self, vertex: &VerifiedVertex) -> QuorumCertificate {
        let vote_data = VoteData::new(vertex, self.make_header(vertex));
        let hash = vote_data.hash();
        QuorumCertificate {
            signatures: self
                .keys
                .iter()
                .map(|k| (k.public(), k.sign_hash(&hash)))
                .collect(),
            vote_data,
        }
    }

    /// TC signed by all validators for the view.
    pub fn make_tc(&self, view: View) -> TimeoutCertificate {
        let hash = timeout_hash(self.epoch(), view);
        TimeoutCertificate {
            epoch: self.epoch(),
            view,
            signatures: self
                .keys
                .iter()
                .map(|k| (k.public(), k.sign_hash(&hash)))
                .collect(),
        }
    }

    /// Chain of vertices on top of genesis with the given views,
    /// each together with the QC certifying it.
    pub fn make_chain(&self, views: &[u64]) -> Vec<(VerifiedVertex, QuorumCertificate)> {
        let mut qc = self.genesis_qc().clone();
        let mut chain = vec![];
        for v in views {
            let vertex = self.make_vertex(&qc, View(*v), vec![Txn(v.to_be_bytes().to_vec())]);
            qc = self.make_qc(&vertex);
            chain.push((vertex, qc.clone()));
        }
        chain
    }
}
