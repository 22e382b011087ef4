//! DropCraft Merkle
//!
//! Leaf encoding, sorted-pair Merkle tree and proof generation for airdrop
//! distributions.
//!
//! Leaves are `keccak256(abi.encodePacked(uint256 index, address account,
//! uint256 amount))`, the format the claim contract rebuilds from its call
//! arguments. Internal nodes hash the two children in ascending byte order,
//! so a verifier folds a proof without tracking left/right positions.

pub mod leaf;
pub mod tree;

pub use leaf::{encode_leaf, leaf_preimage, LEAF_PREIMAGE_LEN};
pub use tree::{combine, verify_proof, MerkleError, MerkleTree, PARALLEL_PAIR_THRESHOLD};
