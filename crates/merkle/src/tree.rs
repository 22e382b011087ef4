//! Sorted-pair binary Merkle tree.
//!
//! Layer 0 is the sorted, de-duplicated leaf set. Each next layer pairs
//! `(0,1), (2,3), ...`; an unpaired trailing node is carried up unchanged
//! (odd-carry). Parents are `keccak256(min(a,b) || max(a,b))`.
//!
//! A carried level contributes nothing to a proof: the verifier folds
//! every proof element it receives and never inserts placeholders.

use rayon::prelude::*;
use tracing::debug;

use dropcraft_core::{format_hash, keccak256, Hash32};

/// Layers with at least this many pairs are hashed on the rayon pool.
pub const PARALLEL_PAIR_THRESHOLD: usize = 4096;

/// Errors from tree construction and proof lookup.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MerkleError {
    #[error("Empty distribution: no leaves to build a tree from")]
    EmptyDistribution,

    #[error("Leaf not found: {0}")]
    LeafNotFound(String),
}

pub type Result<T> = std::result::Result<T, MerkleError>;

/// Hash two nodes into their parent, independent of argument order.
pub fn combine(a: &Hash32, b: &Hash32) -> Hash32 {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(lo);
    buf[32..].copy_from_slice(hi);
    keccak256(&buf)
}

/// Fold a leaf with its proof and compare against the root.
pub fn verify_proof(root: &Hash32, leaf: &Hash32, proof: &[Hash32]) -> bool {
    let folded = proof.iter().fold(*leaf, |acc, sibling| combine(&acc, sibling));
    folded == *root
}

fn pair_or_carry(chunk: &[Hash32]) -> Hash32 {
    match chunk {
        [a, b] => combine(a, b),
        _ => chunk[0],
    }
}

fn next_layer(layer: &[Hash32]) -> Vec<Hash32> {
    if layer.len() / 2 >= PARALLEL_PAIR_THRESHOLD {
        // Indexed collect keeps output in chunk order.
        layer.par_chunks(2).map(pair_or_carry).collect()
    } else {
        layer.chunks(2).map(pair_or_carry).collect()
    }
}

/// A binary Merkle tree over a set of leaf hashes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleTree {
    /// All nodes stored level by level, bottom-up. `layers[0]` = sorted leaves.
    layers: Vec<Vec<Hash32>>,
}

impl MerkleTree {
    /// Build a tree from leaf hashes.
    ///
    /// Input order and duplicates do not matter: the topology is a pure
    /// function of the sorted unique leaf set.
    pub fn build<I>(leaves: I) -> Result<Self>
    where
        I: IntoIterator<Item = Hash32>,
    {
        let mut base: Vec<Hash32> = leaves.into_iter().collect();
        if base.is_empty() {
            return Err(MerkleError::EmptyDistribution);
        }
        if base.len() / 2 >= PARALLEL_PAIR_THRESHOLD {
            base.par_sort_unstable();
        } else {
            base.sort_unstable();
        }
        let before = base.len();
        base.dedup();
        if base.len() != before {
            debug!("Dropped {} duplicate leaves", before - base.len());
        }

        let mut layers = vec![base];
        loop {
            let top = &layers[layers.len() - 1];
            if top.len() <= 1 {
                break;
            }
            let next = next_layer(top);
            layers.push(next);
        }

        debug!(
            "Built Merkle tree: {} leaves, {} layers, root {}",
            layers[0].len(),
            layers.len(),
            format_hash(&layers[layers.len() - 1][0]),
        );

        Ok(Self { layers })
    }

    /// The Merkle root.
    pub fn root(&self) -> Hash32 {
        self.layers[self.layers.len() - 1][0]
    }

    /// Sorted unique leaves (layer 0).
    pub fn leaves(&self) -> &[Hash32] {
        &self.layers[0]
    }

    /// All layers, bottom-up.
    pub fn layers(&self) -> &[Vec<Hash32>] {
        &self.layers
    }

    /// Number of unique leaves.
    pub fn leaf_count(&self) -> usize {
        self.layers[0].len()
    }

    /// Number of layers above the leaves, i.e. `ceil(log2(leaf_count))`.
    pub fn depth(&self) -> usize {
        self.layers.len() - 1
    }

    pub fn contains(&self, leaf: &Hash32) -> bool {
        self.layers[0].binary_search(leaf).is_ok()
    }

    /// Sibling path from `leaf` up to (excluding) the root.
    ///
    /// Levels where the node was carried without a partner are skipped.
    pub fn proof(&self, leaf: &Hash32) -> Result<Vec<Hash32>> {
        let mut idx = self.layers[0]
            .binary_search(leaf)
            .map_err(|_| MerkleError::LeafNotFound(format_hash(leaf)))?;

        let mut proof = Vec::with_capacity(self.depth());
        for layer in &self.layers[..self.layers.len() - 1] {
            let sibling = idx ^ 1;
            if sibling < layer.len() {
                proof.push(layer[sibling]);
            }
            idx /= 2;
        }
        Ok(proof)
    }

    /// Verify a proof against this tree's root.
    pub fn verify(&self, leaf: &Hash32, proof: &[Hash32]) -> bool {
        verify_proof(&self.root(), leaf, proof)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::seq::SliceRandom;

    fn leaf(n: u32) -> Hash32 {
        keccak256(&n.to_be_bytes())
    }

    fn sorted(mut v: Vec<Hash32>) -> Vec<Hash32> {
        v.sort();
        v
    }

    #[test]
    fn test_combine_is_symmetric() {
        let a = leaf(1);
        let b = leaf(2);
        assert_eq!(combine(&a, &b), combine(&b, &a));
        assert_ne!(combine(&a, &b), combine(&a, &a));
    }

    #[test]
    fn test_empty_fails() {
        assert_eq!(
            MerkleTree::build(Vec::new()),
            Err(MerkleError::EmptyDistribution)
        );
    }

    #[test]
    fn test_single_leaf() {
        let l = leaf(1);
        let tree = MerkleTree::build(vec![l]).unwrap();

        assert_eq!(tree.root(), l);
        assert_eq!(tree.depth(), 0);
        let proof = tree.proof(&l).unwrap();
        assert!(proof.is_empty());
        assert!(verify_proof(&tree.root(), &l, &proof));
    }

    #[test]
    fn test_two_leaves() {
        let (a, b) = (leaf(1), leaf(2));
        let tree = MerkleTree::build(vec![a, b]).unwrap();
        assert_eq!(tree.root(), combine(&a, &b));
        assert_eq!(tree.proof(&a).unwrap(), vec![b]);
        assert_eq!(tree.proof(&b).unwrap(), vec![a]);
    }

    #[test]
    fn test_power_of_two() {
        let s = sorted((0..4).map(leaf).collect());
        let tree = MerkleTree::build(s.clone()).unwrap();

        let h01 = combine(&s[0], &s[1]);
        let h23 = combine(&s[2], &s[3]);
        assert_eq!(tree.root(), combine(&h01, &h23));
        assert_eq!(tree.depth(), 2);

        assert_eq!(tree.proof(&s[0]).unwrap(), vec![s[1], h23]);
        assert_eq!(tree.proof(&s[3]).unwrap(), vec![s[2], h01]);
    }

    #[test]
    fn test_three_leaves_odd_carry() {
        let s = sorted((0..3).map(leaf).collect());
        let tree = MerkleTree::build(s.clone()).unwrap();

        // The third leaf is carried unhashed to layer 1.
        let h01 = combine(&s[0], &s[1]);
        assert_eq!(tree.layers()[1], vec![h01, s[2]]);
        assert_eq!(tree.root(), combine(&h01, &s[2]));

        assert_eq!(tree.proof(&s[0]).unwrap(), vec![s[1], s[2]]);
        assert_eq!(tree.proof(&s[1]).unwrap(), vec![s[0], s[2]]);
        // Carried leaf skips level 0 entirely.
        assert_eq!(tree.proof(&s[2]).unwrap(), vec![h01]);
    }

    #[test]
    fn test_five_leaves_double_carry() {
        let s = sorted((0..5).map(leaf).collect());
        let tree = MerkleTree::build(s.clone()).unwrap();

        let h01 = combine(&s[0], &s[1]);
        let h23 = combine(&s[2], &s[3]);
        let h0123 = combine(&h01, &h23);
        assert_eq!(tree.depth(), 3);
        assert_eq!(tree.layers()[2], vec![h0123, s[4]]);
        assert_eq!(tree.root(), combine(&h0123, &s[4]));

        // Carried at two levels, paired once at the top.
        assert_eq!(tree.proof(&s[4]).unwrap(), vec![h0123]);
        assert_eq!(tree.proof(&s[2]).unwrap(), vec![s[3], h01, s[4]]);
    }

    #[test]
    fn test_duplicates_removed() {
        let a = leaf(1);
        let b = leaf(2);
        let with_dups = MerkleTree::build(vec![a, b, a, a]).unwrap();
        let without = MerkleTree::build(vec![b, a]).unwrap();
        assert_eq!(with_dups.leaf_count(), 2);
        assert_eq!(with_dups.root(), without.root());
    }

    #[test]
    fn test_leaf_not_found() {
        let tree = MerkleTree::build((0..5).map(leaf)).unwrap();
        let missing = leaf(99);
        assert!(!tree.contains(&missing));
        assert_eq!(
            tree.proof(&missing),
            Err(MerkleError::LeafNotFound(format_hash(&missing)))
        );
    }

    #[test]
    fn test_wrong_root_and_tampered_proof_fail() {
        let leaves: Vec<Hash32> = (0..6).map(leaf).collect();
        let tree = MerkleTree::build(leaves.clone()).unwrap();
        let mut proof = tree.proof(&leaves[0]).unwrap();

        assert!(!verify_proof(&[0xFF; 32], &leaves[0], &proof));
        proof[0][0] ^= 1;
        assert!(!tree.verify(&leaves[0], &proof));
    }

    #[test]
    fn test_dropping_a_proof_level_fails() {
        let leaves: Vec<Hash32> = (0..7).map(leaf).collect();
        let tree = MerkleTree::build(leaves.clone()).unwrap();
        for l in &leaves {
            let mut proof = tree.proof(l).unwrap();
            proof.pop();
            assert!(!tree.verify(l, &proof));
        }
    }

    #[test]
    fn test_permutation_same_root() {
        let mut leaves: Vec<Hash32> = (0..33).map(leaf).collect();
        let expected = MerkleTree::build(leaves.clone()).unwrap().root();
        let mut rng = rand::thread_rng();
        for _ in 0..10 {
            leaves.shuffle(&mut rng);
            assert_eq!(MerkleTree::build(leaves.clone()).unwrap().root(), expected);
        }
    }

    #[test]
    fn test_parallel_layer_matches_sequential() {
        let n = (PARALLEL_PAIR_THRESHOLD * 2 + 3) as u32;
        let leaves: Vec<Hash32> = (0..n).map(leaf).collect();
        let tree = MerkleTree::build(leaves.clone()).unwrap();

        let mut layer = sorted(leaves);
        while layer.len() > 1 {
            layer = layer.chunks(2).map(pair_or_carry).collect();
        }
        assert_eq!(tree.root(), layer[0]);
    }

    #[test]
    fn test_proof_lengths() {
        for n in 1u32..=40 {
            let leaves: Vec<Hash32> = (0..n).map(leaf).collect();
            let tree = MerkleTree::build(leaves.clone()).unwrap();
            let depth = (n as f64).log2().ceil() as usize;
            assert_eq!(tree.depth(), depth, "depth for {} leaves", n);
            for l in &leaves {
                let proof = tree.proof(l).unwrap();
                assert!(proof.len() <= depth);
                if n.is_power_of_two() {
                    assert_eq!(proof.len(), depth);
                }
                assert!(tree.verify(l, &proof), "proof for {} leaves", n);
            }
        }
    }

    proptest! {
        #[test]
        fn prop_every_leaf_verifies(raw in proptest::collection::vec(any::<[u8; 32]>(), 1..64)) {
            let tree = MerkleTree::build(raw.clone()).unwrap();
            for l in &raw {
                let proof = tree.proof(l).unwrap();
                prop_assert!(verify_proof(&tree.root(), l, &proof));
            }
        }

        #[test]
        fn prop_root_ignores_order(mut raw in proptest::collection::vec(any::<[u8; 32]>(), 1..64)) {
            let root = MerkleTree::build(raw.clone()).unwrap().root();
            raw.reverse();
            prop_assert_eq!(MerkleTree::build(raw).unwrap().root(), root);
        }
    }
}
