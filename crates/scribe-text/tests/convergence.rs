//! Convergence tests for the sequence CRDT
//!
//! Replicas edit concurrently and exchange character operations in
//! arbitrary order. Every replica must end with the same document.

use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use scribe_core::SiteId;
use scribe_text::{Char, EditDelta, Index, SequenceCrdt};

#[derive(Clone, Debug)]
enum Op {
    Insert(Char),
    Delete(Char),
}

/// A set of replicas with one inbound queue each.
struct Cluster {
    replicas: Vec<SequenceCrdt>,
    queues: Vec<Vec<Op>>,
}

impl Cluster {
    fn new(n: usize, seed: u64) -> Self {
        Self {
            replicas: (0..n)
                .map(|i| SequenceCrdt::with_seed(SiteId::new(format!("site-{i}")), seed.wrapping_add(i as u64)))
                .collect(),
            queues: vec![Vec::new(); n],
        }
    }

    fn broadcast(&mut self, from: usize, ops: Vec<Op>) {
        for (to, queue) in self.queues.iter_mut().enumerate() {
            if to != from {
                queue.extend(ops.iter().cloned());
            }
        }
    }

    fn insert(&mut self, at: usize, index: Index, text: &str) {
        let chars = self.replicas[at]
            .local_insert(&EditDelta::insertion(index, text))
            .unwrap();
        self.broadcast(at, chars.into_iter().map(Op::Insert).collect());
    }

    fn remove(&mut self, at: usize, index: Index, text: &str) {
        let chars = self.replicas[at]
            .local_delete(&EditDelta::removal(index, text))
            .unwrap();
        self.broadcast(at, chars.into_iter().map(Op::Delete).collect());
    }

    fn deliver(&mut self, to: usize, op: Op) {
        match op {
            Op::Insert(ch) => {
                self.replicas[to].remote_insert(ch).unwrap();
            }
            Op::Delete(ch) => {
                self.replicas[to].remote_delete(ch);
            }
        }
    }

    /// Deliver queued operations in a random order, each with probability `p`.
    fn deliver_some(&mut self, rng: &mut StdRng, p: f64) {
        for to in 0..self.replicas.len() {
            let mut queue = std::mem::take(&mut self.queues[to]);
            let mut kept = Vec::new();
            while !queue.is_empty() {
                let op = queue.swap_remove(rng.gen_range(0..queue.len()));
                if rng.gen_bool(p) {
                    self.deliver(to, op);
                } else {
                    kept.push(op);
                }
            }
            self.queues[to] = kept;
        }
    }

    fn deliver_all(&mut self, rng: &mut StdRng) {
        self.deliver_some(rng, 1.0);
    }

    fn assert_converged(&self) {
        let text = self.replicas[0].text();
        for replica in &self.replicas {
            assert_eq!(replica.text(), text);
            assert_eq!(replica.document(), self.replicas[0].document());
            assert!(replica.pending_deletes().is_empty());
        }
    }
}

/// Map a character offset to a cursor position.
fn index_of(text: &[char], offset: usize) -> Index {
    let row = text[..offset].iter().filter(|&&c| c == '\n').count();
    let line_start = text[..offset]
        .iter()
        .rposition(|&c| c == '\n')
        .map_or(0, |p| p + 1);
    Index::new(row, offset - line_start)
}

/// Make one random edit on `at` and queue its operations.
fn random_edit(cluster: &mut Cluster, at: usize, rng: &mut StdRng) {
    let text: Vec<char> = cluster.replicas[at].text().chars().collect();
    if text.is_empty() || rng.gen_bool(0.6) {
        let offset = rng.gen_range(0..=text.len());
        let len = rng.gen_range(1..=4);
        let fresh: String = (0..len)
            .map(|_| ['a', 'b', 'c', '\n'][rng.gen_range(0..4)])
            .collect();
        cluster.insert(at, index_of(&text, offset), &fresh);
    } else {
        let start = rng.gen_range(0..text.len());
        let len = rng.gen_range(1..=(text.len() - start).min(3));
        let gone: String = text[start..start + len].iter().collect();
        cluster.remove(at, index_of(&text, start), &gone);
    }
}

/// Concurrent inserts at the same cursor converge whichever arrives first.
#[test]
fn test_concurrent_inserts_at_same_position() {
    let mut rng = StdRng::seed_from_u64(1);
    let mut cluster = Cluster::new(2, 11);
    cluster.insert(0, Index::new(0, 0), "aaaa");
    cluster.insert(1, Index::new(0, 0), "bbbb");
    cluster.deliver_all(&mut rng);

    cluster.assert_converged();
    let text = cluster.replicas[0].text();
    assert_eq!(text.matches('a').count(), 4);
    assert_eq!(text.matches('b').count(), 4);
}

/// Delivery order does not change the result.
#[test]
fn test_exchange_order_irrelevant() {
    let a = SiteId::new("a");
    let b = SiteId::new("b");

    let mut a1 = SequenceCrdt::with_seed(a.clone(), 3);
    let mut b1 = SequenceCrdt::with_seed(b.clone(), 4);
    let from_a = a1.local_insert(&EditDelta::insertion(Index::new(0, 0), "aaaa")).unwrap();
    let from_b = b1.local_insert(&EditDelta::insertion(Index::new(0, 0), "bbbb")).unwrap();

    for ch in from_b.iter().rev() {
        a1.remote_insert(ch.clone()).unwrap();
    }
    for ch in &from_a {
        b1.remote_insert(ch.clone()).unwrap();
    }
    assert_eq!(a1.text(), b1.text());
}

/// A deletion relayed through a third replica waits for its insert.
#[test]
fn test_delete_overtakes_insert() {
    let mut cluster = Cluster::new(3, 5);
    cluster.insert(0, Index::new(0, 0), "hello");
    let to_b = std::mem::take(&mut cluster.queues[1]);
    for op in to_b {
        cluster.deliver(1, op);
    }
    cluster.remove(1, Index::new(0, 1), "ell");

    // Replica 2 sees the deletions first.
    let queue = std::mem::take(&mut cluster.queues[2]);
    let (deletes, inserts): (Vec<_>, Vec<_>) =
        queue.into_iter().partition(|op| matches!(op, Op::Delete(_)));
    for op in deletes {
        cluster.deliver(2, op);
    }
    assert_eq!(cluster.replicas[2].text(), "");
    assert_eq!(cluster.replicas[2].pending_deletes().len(), 3);
    for op in inserts {
        cluster.deliver(2, op);
    }

    let mut rng = StdRng::seed_from_u64(9);
    cluster.deliver_all(&mut rng);
    cluster.assert_converged();
    assert_eq!(cluster.replicas[0].text(), "ho");
}

/// Multi-line edits from several replicas converge.
#[test]
fn test_multiline_concurrent_edits() {
    let mut rng = StdRng::seed_from_u64(2);
    let mut cluster = Cluster::new(4, 21);
    cluster.insert(0, Index::new(0, 0), "one\ntwo\nthree");
    cluster.deliver_all(&mut rng);

    cluster.insert(1, Index::new(1, 3), "\ninserted");
    cluster.remove(2, Index::new(0, 1), "ne\ntw");
    cluster.insert(3, Index::new(2, 5), "!\n");
    cluster.deliver_all(&mut rng);

    cluster.assert_converged();
    assert_eq!(cluster.replicas[0].text(), "oo\ninserted\nthree!\n");
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn replicas_converge(seed in any::<u64>(), peers in 2usize..5, rounds in 1usize..6) {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut cluster = Cluster::new(peers, seed);
        for _ in 0..rounds {
            for at in 0..peers {
                for _ in 0..rng.gen_range(1..4) {
                    random_edit(&mut cluster, at, &mut rng);
                }
            }
            cluster.deliver_some(&mut rng, 0.5);
        }
        cluster.deliver_all(&mut rng);
        cluster.assert_converged();
    }
}
