use crate::crypto::GENESIS_HASH;
use crate::error::ChainError;
use chrono::{DateTime, SubsecRound, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::validation::verify_chain;

/// Textual timestamp format fed into the block hash.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// How the fields of a block are framed before hashing.
///
/// `Concat` is the legacy contract: fields are concatenated with no
/// delimiter, so adjacent fields can trade bytes without changing the
/// digest. `LengthPrefixed` frames every field with its big-endian `u64`
/// length and is not compatible with chains built under `Concat`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashScheme {
    #[default]
    Concat,
    LengthPrefixed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub index: u64,
    pub timestamp: DateTime<Utc>,
    pub tourist_id: String,
    pub data_hash: String,
    #[serde(with = "hex_bytes")]
    pub itinerary: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub emergency: Vec<u8>,
    pub prev_hash: String,
    pub hash: String,
}

impl Block {
    pub fn genesis(timestamp: DateTime<Utc>) -> Self {
        Block {
            index: 0,
            timestamp: timestamp.trunc_subsecs(0),
            tourist_id: String::new(),
            data_hash: String::new(),
            itinerary: Vec::new(),
            emergency: Vec::new(),
            prev_hash: String::new(),
            hash: GENESIS_HASH.to_string(),
        }
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0
    }

    /// Recomputes the digest of every field except `hash`.
    pub fn calculate_hash(&self, scheme: HashScheme) -> String {
        let index = self.index.to_string();
        let timestamp = self.timestamp.format(TIMESTAMP_FORMAT).to_string();
        let fields: [&[u8]; 7] = [
            index.as_bytes(),
            timestamp.as_bytes(),
            self.tourist_id.as_bytes(),
            self.data_hash.as_bytes(),
            &self.itinerary,
            &self.emergency,
            self.prev_hash.as_bytes(),
        ];

        let mut hasher = Sha256::new();
        for field in fields {
            if scheme == HashScheme::LengthPrefixed {
                hasher.update((field.len() as u64).to_be_bytes());
            }
            hasher.update(field);
        }
        hex::encode(hasher.finalize())
    }
}

/// The append-only chain of registration blocks.
///
/// All mutation goes through [`Ledger::append`], which performs the
/// read-last / hash / push sequence under a single write lock.
#[derive(Debug)]
pub struct Ledger {
    blocks: RwLock<Vec<Block>>,
    scheme: HashScheme,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

impl Ledger {
    /// Create a ledger holding only the genesis block.
    pub fn new() -> Self {
        Self::with_scheme(HashScheme::default())
    }

    pub fn with_scheme(scheme: HashScheme) -> Self {
        let ledger = Ledger {
            blocks: RwLock::new(Vec::new()),
            scheme,
        };
        ledger.initialize();
        ledger
    }

    /// Insert the genesis block if the chain is empty. Returns `true` when
    /// a genesis block was inserted, `false` when the call was a no-op.
    pub fn initialize(&self) -> bool {
        let mut blocks = self.blocks.write();
        if !blocks.is_empty() {
            return false;
        }
        blocks.push(Block::genesis(Utc::now()));
        true
    }

    pub fn scheme(&self) -> HashScheme {
        self.scheme
    }

    pub fn append(
        &self,
        tourist_id: &str,
        data_hash: &str,
        itinerary: Vec<u8>,
        emergency: Vec<u8>,
    ) -> Result<Block, ChainError> {
        let timestamp = Utc::now().trunc_subsecs(0);

        let mut blocks = self.blocks.write();
        if blocks.is_empty() {
            blocks.push(Block::genesis(timestamp));
        }
        let last = blocks
            .last()
            .ok_or_else(|| ChainError::InvalidGenesis("chain is empty".to_string()))?;

        let mut block = Block {
            index: last.index.checked_add(1).ok_or(ChainError::IndexOverflow)?,
            timestamp,
            tourist_id: tourist_id.to_string(),
            data_hash: data_hash.to_string(),
            itinerary,
            emergency,
            prev_hash: last.hash.clone(),
            hash: String::new(),
        };
        block.hash = block.calculate_hash(self.scheme);
        blocks.push(block.clone());

        Ok(block)
    }

    pub fn len(&self) -> usize {
        self.blocks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.read().is_empty()
    }

    pub fn last(&self) -> Option<Block> {
        self.blocks.read().last().cloned()
    }

    pub fn get(&self, index: u64) -> Option<Block> {
        let index = usize::try_from(index).ok()?;
        self.blocks.read().get(index).cloned()
    }

    /// Copy of the whole chain, for export and offline verification.
    pub fn snapshot(&self) -> Vec<Block> {
        self.blocks.read().clone()
    }

    pub fn find_by_subject(&self, tourist_id: &str) -> Option<Block> {
        self.blocks
            .read()
            .iter()
            .rev()
            .find(|b| !b.is_genesis() && b.tourist_id == tourist_id)
            .cloned()
    }

    pub fn verify(&self) -> Result<(), ChainError> {
        verify_chain(&self.blocks.read(), self.scheme)
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn fixed_block() -> Block {
        Block {
            index: 1,
            timestamp: Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap(),
            tourist_id: "5f0c2b1e-0000-4000-8000-000000000001".to_string(),
            data_hash: "ab".repeat(32),
            itinerary: br#"[{"city":"Goa"}]"#.to_vec(),
            emergency: br#"[{"name":"A"}]"#.to_vec(),
            prev_hash: GENESIS_HASH.to_string(),
            hash: String::new(),
        }
    }

    #[test]
    fn test_new_ledger_has_only_genesis() {
        let ledger = Ledger::new();
        assert_eq!(ledger.len(), 1);
        let genesis = ledger.last().unwrap();
        assert_eq!(genesis.index, 0);
        assert_eq!(genesis.hash, GENESIS_HASH);
        assert!(genesis.tourist_id.is_empty());
        assert!(genesis.prev_hash.is_empty());
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let ledger = Ledger::new();
        assert!(!ledger.initialize());
        assert!(!ledger.initialize());
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_concat_hash_matches_field_concatenation() {
        let block = fixed_block();
        let record = format!(
            "1{}{}{}{}{}{}",
            "2024-03-09T14:05:07Z",
            block.tourist_id,
            block.data_hash,
            r#"[{"city":"Goa"}]"#,
            r#"[{"name":"A"}]"#,
            GENESIS_HASH,
        );
        let expected = hex::encode(Sha256::digest(record.as_bytes()));
        assert_eq!(block.calculate_hash(HashScheme::Concat), expected);
    }

    #[test]
    fn test_length_prefixed_separates_shifted_boundaries() {
        let mut a = fixed_block();
        a.tourist_id = "ab".to_string();
        a.data_hash = "c".to_string();
        let mut b = fixed_block();
        b.tourist_id = "a".to_string();
        b.data_hash = "bc".to_string();

        assert_eq!(
            a.calculate_hash(HashScheme::Concat),
            b.calculate_hash(HashScheme::Concat)
        );
        assert_ne!(
            a.calculate_hash(HashScheme::LengthPrefixed),
            b.calculate_hash(HashScheme::LengthPrefixed)
        );
    }

    #[test]
    fn test_append_links_blocks() {
        let ledger = Ledger::new();
        let first = ledger.append("t1", &"11".repeat(32), vec![1], vec![2]).unwrap();
        let second = ledger.append("t2", &"22".repeat(32), vec![3], vec![4]).unwrap();

        assert_eq!(first.index, 1);
        assert_eq!(first.prev_hash, GENESIS_HASH);
        assert_eq!(second.index, 2);
        assert_eq!(second.prev_hash, first.hash);
        assert_eq!(second.hash, second.calculate_hash(HashScheme::Concat));
        assert!(ledger.verify().is_ok());
    }

    #[test]
    fn test_find_by_subject_and_get() {
        let ledger = Ledger::new();
        ledger.append("alpha", "h1", vec![], vec![]).unwrap();
        ledger.append("beta", "h2", vec![], vec![]).unwrap();

        assert_eq!(ledger.find_by_subject("beta").unwrap().index, 2);
        assert!(ledger.find_by_subject("gamma").is_none());
        assert!(ledger.find_by_subject("").is_none());
        assert_eq!(ledger.get(1).unwrap().tourist_id, "alpha");
        assert!(ledger.get(99).is_none());
    }

    #[test]
    fn test_concurrent_appends_stay_linear() {
        let ledger = Arc::new(Ledger::with_scheme(HashScheme::LengthPrefixed));
        std::thread::scope(|scope| {
            for t in 0..8 {
                let ledger = Arc::clone(&ledger);
                scope.spawn(move || {
                    for i in 0..25 {
                        let subject = format!("t{}-{}", t, i);
                        ledger.append(&subject, "hash", vec![], vec![]).unwrap();
                    }
                });
            }
        });

        let blocks = ledger.snapshot();
        assert_eq!(blocks.len(), 201);
        let prev_hashes: HashSet<_> = blocks.iter().map(|b| b.prev_hash.clone()).collect();
        assert_eq!(prev_hashes.len(), blocks.len());
        for (i, block) in blocks.iter().enumerate() {
            assert_eq!(block.index, i as u64);
        }
        assert!(ledger.verify().is_ok());
    }

    #[test]
    fn test_block_json_keeps_every_field() {
        let ledger = Ledger::new();
        ledger.append("t1", "h1", b"{}".to_vec(), b"[]".to_vec()).unwrap();
        let blocks = ledger.snapshot();

        let json = serde_json::to_string(&blocks).unwrap();
        let decoded: Vec<Block> = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, blocks);
        assert_eq!(decoded[0].hash, GENESIS_HASH);
        assert!(json.contains("\"itinerary\":\"7b7d\""));
    }
}
