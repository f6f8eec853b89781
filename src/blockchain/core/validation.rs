use crate::error::{ChainError, Result};
use serde::Serialize;
use std::fmt;

use super::chain::{Block, Ledger};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DefectKind {
    /// Recomputed digest differs from the stored hash.
    HashMismatch,
    /// `previousBlockHash` differs from the stored hash one height below.
    LinkBroken,
    MissingBlock,
    UnreadableRecord,
}

impl fmt::Display for DefectKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DefectKind::HashMismatch => write!(f, "hash mismatch"),
            DefectKind::LinkBroken => write!(f, "broken link to previous block"),
            DefectKind::MissingBlock => write!(f, "block missing from store"),
            DefectKind::UnreadableRecord => write!(f, "unreadable block record"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainDefect {
    pub height: u64,
    pub kind: DefectKind,
}

/// True when the block's stored hash matches its contents.
pub fn block_hash_is_valid(block: &Block) -> Result<bool> {
    let recomputed = block.compute_hash()?;
    if recomputed != block.hash {
        tracing::warn!(
            height = block.height,
            stored = %block.hash,
            recomputed = %recomputed,
            "block.invalid_hash"
        );
        return Ok(false);
    }
    Ok(true)
}

impl Ledger {
    /// Detects tampering with a single block. It says nothing about whether
    /// the block is still attached to the chain; see [`Ledger::validate_chain`].
    pub fn validate_block(&self, height: u64) -> Result<bool> {
        block_hash_is_valid(&self.get_block(height)?)
    }

    /// Walks the chain from genesis and returns every defect found. An empty
    /// list means the chain is consistent.
    ///
    /// Appends are blocked for the duration of the walk.
    pub fn validate_chain(&self) -> Result<Vec<ChainDefect>> {
        let current = self.height.read();
        let mut defects = Vec::new();
        let mut previous_hash: Option<String> = None;

        for height in 0..(*current + 1) as u64 {
            let block = match self.load_block(height, *current) {
                Ok(block) => block,
                Err(ChainError::BlockNotFound(_)) => {
                    defects.push(ChainDefect {
                        height,
                        kind: DefectKind::MissingBlock,
                    });
                    previous_hash = None;
                    continue;
                }
                Err(ChainError::SerializationError(e)) => {
                    tracing::warn!(height, error = %e, "chain.unreadable_record");
                    defects.push(ChainDefect {
                        height,
                        kind: DefectKind::UnreadableRecord,
                    });
                    previous_hash = None;
                    continue;
                }
                Err(e) => return Err(e),
            };

            if !block_hash_is_valid(&block)? {
                defects.push(ChainDefect {
                    height,
                    kind: DefectKind::HashMismatch,
                });
            }

            let link_ok = match &previous_hash {
                _ if height == 0 => block.previous_block_hash.is_empty(),
                Some(expected) => block.previous_block_hash == *expected,
                // Nothing readable below to compare against; already reported.
                None => true,
            };
            if !link_ok {
                tracing::warn!(
                    height,
                    previous_hash = %block.previous_block_hash,
                    "chain.link_broken"
                );
                defects.push(ChainDefect {
                    height,
                    kind: DefectKind::LinkBroken,
                });
            }

            previous_hash = Some(block.hash);
        }

        tracing::info!(
            blocks = *current + 1,
            defects = defects.len(),
            "chain.validated"
        );
        Ok(defects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{BlockStore, InMemoryPersistence};
    use serde_json::json;

    fn chain_of(n: usize) -> (Ledger, InMemoryPersistence) {
        let store = InMemoryPersistence::new();
        let ledger = Ledger::open(Box::new(store.clone())).unwrap();
        for i in 0..n {
            ledger.append(json!(format!("block {}", i))).unwrap();
        }
        (ledger, store)
    }

    fn rewrite(store: &InMemoryPersistence, height: u64, edit: impl FnOnce(&mut Block)) {
        let mut block = Block::from_record(&store.get(height).unwrap().unwrap()).unwrap();
        edit(&mut block);
        store.put(height, &block.to_record().unwrap()).unwrap();
    }

    #[test]
    fn test_fresh_chain_has_no_defects() {
        let (ledger, _) = chain_of(10);
        assert!(ledger.validate_chain().unwrap().is_empty());
        for h in 0..=10 {
            assert!(ledger.validate_block(h).unwrap());
        }
    }

    #[test]
    fn test_tampered_body_is_single_hash_mismatch() {
        let (ledger, store) = chain_of(5);
        rewrite(&store, 3, |b| b.body = json!("forged"));

        assert!(!ledger.validate_block(3).unwrap());
        assert_eq!(
            ledger.validate_chain().unwrap(),
            vec![ChainDefect {
                height: 3,
                kind: DefectKind::HashMismatch
            }]
        );
    }

    #[test]
    fn test_resealed_block_breaks_next_link() {
        let (ledger, store) = chain_of(5);
        rewrite(&store, 2, |b| {
            b.body = json!("forged");
            b.hash = b.compute_hash().unwrap();
        });

        assert!(ledger.validate_block(2).unwrap());
        assert_eq!(
            ledger.validate_chain().unwrap(),
            vec![ChainDefect {
                height: 3,
                kind: DefectKind::LinkBroken
            }]
        );
    }

    #[test]
    fn test_reports_every_defect() {
        let (ledger, store) = chain_of(6);
        rewrite(&store, 1, |b| b.time += 1);
        rewrite(&store, 4, |b| b.previous_block_hash = "00".repeat(32));

        let defects = ledger.validate_chain().unwrap();
        assert_eq!(
            defects,
            vec![
                ChainDefect {
                    height: 1,
                    kind: DefectKind::HashMismatch
                },
                ChainDefect {
                    height: 4,
                    kind: DefectKind::HashMismatch
                },
                ChainDefect {
                    height: 4,
                    kind: DefectKind::LinkBroken
                },
            ]
        );
    }

    #[test]
    fn test_missing_and_unreadable_records() {
        let (ledger, store) = chain_of(4);
        store.remove(2).unwrap();
        store.put(3, b"not json").unwrap();

        let defects = ledger.validate_chain().unwrap();
        assert_eq!(
            defects,
            vec![
                ChainDefect {
                    height: 2,
                    kind: DefectKind::MissingBlock
                },
                ChainDefect {
                    height: 3,
                    kind: DefectKind::UnreadableRecord
                },
            ]
        );
    }

    #[test]
    fn test_genesis_with_previous_hash_is_link_broken() {
        let (ledger, store) = chain_of(0);
        rewrite(&store, 0, |b| {
            b.previous_block_hash = "ab".to_string();
            b.hash = b.compute_hash().unwrap();
        });
        // Height 1 does not exist yet, so only genesis is reported.
        assert_eq!(
            ledger.validate_chain().unwrap(),
            vec![ChainDefect {
                height: 0,
                kind: DefectKind::LinkBroken
            }]
        );
    }

    #[test]
    fn test_validate_block_not_found() {
        let (ledger, _) = chain_of(1);
        assert!(matches!(
            ledger.validate_block(9),
            Err(ChainError::BlockNotFound(9))
        ));
    }
}
