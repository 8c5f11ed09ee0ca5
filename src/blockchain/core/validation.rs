use crate::crypto::GENESIS_HASH;
use crate::error::ChainError;

use super::chain::{Block, HashScheme};

/// Check the genesis sentinel, then every later block's index, hash and
/// link to its predecessor. Returns the first fault found.
pub fn verify_chain(blocks: &[Block], scheme: HashScheme) -> Result<(), ChainError> {
    let genesis = blocks
        .first()
        .ok_or_else(|| ChainError::InvalidGenesis("chain is empty".to_string()))?;
    validate_genesis(genesis)?;

    for (i, pair) in blocks.windows(2).enumerate() {
        let (prev, block) = (&pair[0], &pair[1]);
        let index = i + 1;

        if prev.index.checked_add(1) != Some(block.index) {
            return Err(ChainError::IndexGap { index });
        }
        if block.hash != block.calculate_hash(scheme) {
            return Err(ChainError::HashMismatch { index });
        }
        if block.prev_hash != prev.hash {
            return Err(ChainError::BrokenLink { index });
        }
    }
    Ok(())
}

fn validate_genesis(block: &Block) -> Result<(), ChainError> {
    if block.index != 0 {
        return Err(ChainError::InvalidGenesis(format!(
            "expected index 0, got {}",
            block.index
        )));
    }
    if block.hash != GENESIS_HASH {
        return Err(ChainError::InvalidGenesis(format!(
            "expected sentinel hash, got {}",
            block.hash
        )));
    }
    if !block.tourist_id.is_empty()
        || !block.data_hash.is_empty()
        || !block.itinerary.is_empty()
        || !block.emergency.is_empty()
        || !block.prev_hash.is_empty()
    {
        return Err(ChainError::InvalidGenesis(
            "genesis block carries a payload".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::Ledger;
    use chrono::Duration;

    fn sample_chain(scheme: HashScheme) -> Vec<Block> {
        let ledger = Ledger::with_scheme(scheme);
        for i in 0..4 {
            ledger
                .append(
                    &format!("tourist-{}", i),
                    &format!("{:064x}", i),
                    format!("[{}]", i).into_bytes(),
                    b"[]".to_vec(),
                )
                .unwrap();
        }
        ledger.snapshot()
    }

    #[test]
    fn test_untouched_chain_is_valid() {
        for scheme in [HashScheme::Concat, HashScheme::LengthPrefixed] {
            assert!(verify_chain(&sample_chain(scheme), scheme).is_ok());
        }
    }

    #[test]
    fn test_empty_chain_is_invalid() {
        assert!(matches!(
            verify_chain(&[], HashScheme::Concat),
            Err(ChainError::InvalidGenesis(_))
        ));
    }

    #[test]
    fn test_any_field_mutation_is_caught_at_its_index() {
        let mutations: [fn(&mut Block); 8] = [
            |b| b.index += 10,
            |b| b.timestamp += Duration::seconds(1),
            |b| b.tourist_id.push('x'),
            |b| b.data_hash = "f".repeat(64),
            |b| b.itinerary.push(b'!'),
            |b| b.emergency = b"[1]".to_vec(),
            |b| b.prev_hash = "0".repeat(64),
            |b| b.hash = "0".repeat(64),
        ];

        for target in 1..5 {
            for mutate in &mutations {
                let mut blocks = sample_chain(HashScheme::Concat);
                mutate(&mut blocks[target]);
                let err = verify_chain(&blocks, HashScheme::Concat).unwrap_err();
                assert_eq!(err.index(), Some(target), "{:?}", err);
            }
        }
    }

    #[test]
    fn test_recomputed_hash_still_breaks_successor_link() {
        let mut blocks = sample_chain(HashScheme::Concat);
        blocks[2].tourist_id = "forged".to_string();
        blocks[2].hash = blocks[2].calculate_hash(HashScheme::Concat);

        assert_eq!(
            verify_chain(&blocks, HashScheme::Concat),
            Err(ChainError::BrokenLink { index: 3 })
        );
    }

    #[test]
    fn test_tampered_genesis_is_rejected() {
        let mut blocks = sample_chain(HashScheme::Concat);
        blocks[0].tourist_id = "intruder".to_string();
        assert!(matches!(
            verify_chain(&blocks, HashScheme::Concat),
            Err(ChainError::InvalidGenesis(_))
        ));
    }

    #[test]
    fn test_scheme_mismatch_is_detected() {
        let blocks = sample_chain(HashScheme::Concat);
        assert_eq!(
            verify_chain(&blocks, HashScheme::LengthPrefixed),
            Err(ChainError::HashMismatch { index: 1 })
        );
    }
}
