//! Canonical leaf encoding.
//!
//! Layout (`abi.encodePacked(uint256, address, uint256)`):
//! `index (32B BE) || address (20B) || amount (32B BE)`, hashed with keccak-256.
//!
//! This layout is fixed by the on-chain claim contract and MUST NOT change
//! once a root has been published.

use dropcraft_core::{keccak256, Address, Amount, Hash32};

/// Length of the packed leaf preimage in bytes.
pub const LEAF_PREIMAGE_LEN: usize = 32 + 20 + 32;

/// Tightly packed bytes of one `(index, address, amount)` claim.
pub fn leaf_preimage(index: u64, address: &Address, amount: &Amount) -> [u8; LEAF_PREIMAGE_LEN] {
    let mut out = [0u8; LEAF_PREIMAGE_LEN];
    out[24..32].copy_from_slice(&index.to_be_bytes());
    out[32..52].copy_from_slice(address.as_bytes());
    amount.to_big_endian(&mut out[52..84]);
    out
}

/// Hash one distribution entry into a leaf.
pub fn encode_leaf(index: u64, address: &Address, amount: &Amount) -> Hash32 {
    keccak256(&leaf_preimage(index, address, amount))
}
