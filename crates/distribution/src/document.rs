use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use dropcraft_core::{serde_hex, total, Address, Amount, ContributionMap, Hash32, InputError};
use dropcraft_merkle::{encode_leaf, verify_proof, MerkleTree};
use dropcraft_normalizer::{normalize, NormalizeParams};

use crate::{DistributionError, Result};

/// One indexed recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DistributionEntry {
    pub index: u64,
    pub address: Address,
    pub amount: Amount,
}

impl DistributionEntry {
    pub fn leaf(&self) -> Hash32 {
        encode_leaf(self.index, &self.address, &self.amount)
    }
}

/// Indexed recipients in index order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Distribution {
    entries: Vec<DistributionEntry>,
    total: Amount,
}

impl Distribution {
    /// Assign indices `0..n` in ascending address order.
    pub fn from_contributions(contributions: &ContributionMap) -> Result<Self> {
        if contributions.is_empty() {
            return Err(InputError::Empty.into());
        }
        let total = total(contributions)?;
        let entries = contributions
            .iter()
            .enumerate()
            .map(|(i, (address, amount))| DistributionEntry {
                index: i as u64,
                address: *address,
                amount: *amount,
            })
            .collect();
        Ok(Self { entries, total })
    }

    pub fn entries(&self) -> &[DistributionEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total(&self) -> Amount {
        self.total
    }

    pub fn leaves(&self) -> Vec<Hash32> {
        self.entries.iter().map(DistributionEntry::leaf).collect()
    }

    pub fn build_tree(&self) -> Result<MerkleTree> {
        Ok(MerkleTree::build(self.leaves())?)
    }

    /// Hash every entry, build the tree and attach a proof to each claim.
    pub fn to_document(&self) -> Result<DistributionDocument> {
        let leaves = self.leaves();
        let tree = MerkleTree::build(leaves.iter().copied())?;

        let mut claims = BTreeMap::new();
        for (entry, leaf) in self.entries.iter().zip(&leaves) {
            let proof = tree.proof(leaf)?;
            claims.insert(
                entry.address,
                ClaimRecord {
                    index: entry.index,
                    amount: entry.amount,
                    proof,
                },
            );
        }

        info!(
            "Built distribution: {} claims, depth {}, total {}",
            claims.len(),
            tree.depth(),
            self.total
        );

        Ok(DistributionDocument {
            merkle_root: tree.root(),
            token_total: self.total,
            claims,
        })
    }
}

/// What a recipient submits to claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRecord {
    pub index: u64,
    #[serde(with = "serde_hex::amount")]
    pub amount: Amount,
    #[serde(with = "serde_hex::hashes")]
    pub proof: Vec<Hash32>,
}

/// The published artifact: root, total and every claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionDocument {
    #[serde(with = "serde_hex::hash")]
    pub merkle_root: Hash32,
    #[serde(with = "serde_hex::amount")]
    pub token_total: Amount,
    pub claims: BTreeMap<Address, ClaimRecord>,
}

impl DistributionDocument {
    pub fn claim(&self, address: &Address) -> Result<&ClaimRecord> {
        self.claims
            .get(address)
            .ok_or(DistributionError::ClaimNotFound(*address))
    }

    /// Leaf hash the claim contract will rebuild for `address`.
    pub fn leaf_for(&self, address: &Address) -> Result<Hash32> {
        let claim = self.claim(address)?;
        Ok(encode_leaf(claim.index, address, &claim.amount))
    }

    /// Check the stored proof for `address` against the stored root.
    pub fn verify_claim(&self, address: &Address) -> Result<bool> {
        let leaf = self.leaf_for(address)?;
        let claim = self.claim(address)?;
        Ok(verify_proof(&self.merkle_root, &leaf, &claim.proof))
    }

    /// Rebuild the indexed distribution from the claims.
    ///
    /// Indices must be exactly `0..n`.
    pub fn distribution(&self) -> Result<Distribution> {
        if self.claims.is_empty() {
            return Err(InputError::Empty.into());
        }
        let mut entries: Vec<DistributionEntry> = self
            .claims
            .iter()
            .map(|(address, claim)| DistributionEntry {
                index: claim.index,
                address: *address,
                amount: claim.amount,
            })
            .collect();
        entries.sort_by_key(|e| e.index);
        for (position, entry) in entries.iter().enumerate() {
            if entry.index != position as u64 {
                return Err(DistributionError::InvalidDocument(format!(
                    "claim indices are not 0..{}: {} has index {}",
                    entries.len(),
                    entry.address,
                    entry.index
                )));
            }
        }
        let total = entries
            .iter()
            .try_fold(Amount::zero(), |acc, e| acc.checked_add(e.amount))
            .ok_or(InputError::Overflow)?;
        Ok(Distribution { entries, total })
    }

    /// Full consistency check: dense indices, total, root and every proof.
    pub fn validate(&self) -> Result<()> {
        let distribution = self.distribution()?;
        if distribution.total() != self.token_total {
            return Err(DistributionError::InvalidDocument(format!(
                "tokenTotal {} does not match the sum of claims {}",
                self.token_total,
                distribution.total()
            )));
        }

        let tree = distribution.build_tree()?;
        if tree.root() != self.merkle_root {
            return Err(DistributionError::InvalidDocument(
                "merkleRoot does not match the claims".to_string(),
            ));
        }

        for entry in distribution.entries() {
            let claim = self.claim(&entry.address)?;
            if !verify_proof(&self.merkle_root, &entry.leaf(), &claim.proof) {
                return Err(DistributionError::InvalidDocument(format!(
                    "proof for {} does not fold to the root",
                    entry.address
                )));
            }
        }
        debug!("Validated distribution document with {} claims", self.claims.len());
        Ok(())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Write to `path` (tmp + rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        write_atomic(path, &self.to_json()?)?;
        info!("Saved distribution document to {}", path.display());
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }
}

/// Normalize, index and commit a finalized contribution map.
pub fn build_document(
    contributions: &ContributionMap,
    params: &NormalizeParams,
) -> Result<DistributionDocument> {
    let normalized = normalize(contributions, params)?;
    Distribution::from_contributions(&normalized)?.to_document()
}

pub(crate) fn write_atomic(path: &Path, contents: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, contents)?;
    std::fs::rename(&tmp_path, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dropcraft_merkle::MerkleError;
    use dropcraft_normalizer::NormalizeError;

    fn addr(b: u8) -> Address {
        Address::from_bytes([b; 20])
    }

    fn amt(v: u64) -> Amount {
        Amount::from(v)
    }

    fn worked_example() -> ContributionMap {
        [(addr(0xa1), amt(5)), (addr(0xb2), amt(25)), (addr(0xc3), amt(100))]
            .into_iter()
            .collect()
    }

    #[test]
    fn test_indices_follow_address_order() {
        let map: ContributionMap = [(addr(9), amt(1)), (addr(3), amt(2)), (addr(5), amt(3))]
            .into_iter()
            .collect();
        let distribution = Distribution::from_contributions(&map).unwrap();
        let order: Vec<(u64, Address)> = distribution
            .entries()
            .iter()
            .map(|e| (e.index, e.address))
            .collect();
        assert_eq!(order, vec![(0, addr(3)), (1, addr(5)), (2, addr(9))]);
        assert_eq!(distribution.total(), amt(6));
    }

    #[test]
    fn test_empty_rejected() {
        let err = Distribution::from_contributions(&ContributionMap::new()).unwrap_err();
        assert!(matches!(err, DistributionError::Input(InputError::Empty)));
    }

    #[test]
    fn test_worked_example_document() {
        let params = NormalizeParams::new(amt(20), amt(5));
        let doc = build_document(&worked_example(), &params).unwrap();

        assert_eq!(doc.token_total, amt(130));
        assert_eq!(doc.claims.len(), 3);
        assert_eq!(doc.claim(&addr(0xa1)).unwrap().amount, amt(20));
        assert_eq!(doc.claim(&addr(0xb2)).unwrap().amount, amt(25));
        assert_eq!(doc.claim(&addr(0xc3)).unwrap().amount, amt(85));
        assert_eq!(doc.claim(&addr(0xa1)).unwrap().index, 0);
        assert_eq!(doc.claim(&addr(0xc3)).unwrap().index, 2);

        for address in doc.claims.keys() {
            assert!(doc.verify_claim(address).unwrap());
        }
        doc.validate().unwrap();
    }

    #[test]
    fn test_single_recipient() {
        let map: ContributionMap = [(addr(1), amt(500))].into_iter().collect();
        let doc = Distribution::from_contributions(&map).unwrap().to_document().unwrap();
        let claim = doc.claim(&addr(1)).unwrap();
        assert!(claim.proof.is_empty());
        assert_eq!(doc.merkle_root, encode_leaf(0, &addr(1), &amt(500)));
        assert!(doc.verify_claim(&addr(1)).unwrap());
    }

    #[test]
    fn test_zero_amount_still_claimable() {
        let map: ContributionMap = [(addr(1), amt(0)), (addr(2), amt(7))].into_iter().collect();
        let doc = Distribution::from_contributions(&map).unwrap().to_document().unwrap();
        assert_eq!(doc.claim(&addr(1)).unwrap().amount, Amount::zero());
        assert!(doc.verify_claim(&addr(1)).unwrap());
    }

    #[test]
    fn test_claim_not_found() {
        let doc = build_document(&worked_example(), &NormalizeParams::new(amt(20), amt(5))).unwrap();
        let err = doc.verify_claim(&addr(0xee)).unwrap_err();
        assert!(matches!(err, DistributionError::ClaimNotFound(a) if a == addr(0xee)));
    }

    #[test]
    fn test_normalize_failure_propagates() {
        let map: ContributionMap = [(addr(1), amt(5)), (addr(2), amt(22))].into_iter().collect();
        let err = build_document(&map, &NormalizeParams::new(amt(20), amt(5))).unwrap_err();
        assert!(matches!(
            err,
            DistributionError::Normalize(NormalizeError::InsufficientSurplus { .. })
        ));
    }

    #[test]
    fn test_json_shape() {
        let doc = build_document(&worked_example(), &NormalizeParams::new(amt(20), amt(5))).unwrap();
        let value: serde_json::Value = serde_json::from_str(&doc.to_json().unwrap()).unwrap();

        assert_eq!(value["tokenTotal"], "0x82");
        let root = value["merkleRoot"].as_str().unwrap();
        assert!(root.starts_with("0x"));
        assert_eq!(root.len(), 66);

        let key = addr(0xc3).to_checksum();
        assert_eq!(value["claims"][&key]["amount"], "0x55");
        assert_eq!(value["claims"][&key]["index"], 2);
        assert!(value["claims"][&key]["proof"].is_array());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("distribution.json");

        let doc = build_document(&worked_example(), &NormalizeParams::new(amt(20), amt(5))).unwrap();
        doc.save(&path).unwrap();
        assert!(!path.with_extension("json.tmp").exists());

        let loaded = DistributionDocument::load(&path).unwrap();
        assert_eq!(loaded, doc);
        loaded.validate().unwrap();
    }

    #[test]
    fn test_tampered_amount_detected() {
        let mut doc =
            build_document(&worked_example(), &NormalizeParams::new(amt(20), amt(5))).unwrap();
        doc.claims.get_mut(&addr(0xa1)).unwrap().amount = amt(21);
        assert!(!doc.verify_claim(&addr(0xa1)).unwrap());
        assert!(matches!(doc.validate(), Err(DistributionError::InvalidDocument(_))));
    }

    #[test]
    fn test_tampered_root_detected() {
        let mut doc =
            build_document(&worked_example(), &NormalizeParams::new(amt(20), amt(5))).unwrap();
        doc.merkle_root[0] ^= 0xff;
        assert!(matches!(doc.validate(), Err(DistributionError::InvalidDocument(_))));
    }

    #[test]
    fn test_sparse_indices_rejected() {
        let mut doc =
            build_document(&worked_example(), &NormalizeParams::new(amt(20), amt(5))).unwrap();
        doc.claims.get_mut(&addr(0xc3)).unwrap().index = 7;
        assert!(matches!(doc.distribution(), Err(DistributionError::InvalidDocument(_))));
    }

    #[test]
    fn test_empty_document_tree_error() {
        let doc = DistributionDocument {
            merkle_root: [0u8; 32],
            token_total: Amount::zero(),
            claims: BTreeMap::new(),
        };
        assert!(matches!(doc.validate(), Err(DistributionError::Input(InputError::Empty))));
        assert!(matches!(
            MerkleTree::build(Vec::<Hash32>::new()),
            Err(MerkleError::EmptyDistribution)
        ));
    }
}
