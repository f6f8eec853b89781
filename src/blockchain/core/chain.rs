use crate::crypto::sha256_hex;
use crate::error::{ChainError, Result};
use crate::persistence::BlockStore;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of the block created when a ledger is bootstrapped on an empty store.
pub const GENESIS_BODY: &str = "First block in the chain - Genesis block";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub hash: String,
    pub height: u64,
    pub body: Value,
    pub time: i64,
    pub previous_block_hash: String,
}

/// Borrowed view of a block with its hash cleared; serializes to exactly the
/// bytes that are hashed.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HashPreimage<'a> {
    hash: &'a str,
    height: u64,
    body: &'a Value,
    time: i64,
    previous_block_hash: &'a str,
}

impl Block {
    fn unsealed(height: u64, body: Value, time: i64, previous_block_hash: String) -> Self {
        Block {
            hash: String::new(),
            height,
            body,
            time,
            previous_block_hash,
        }
    }

    pub fn is_genesis(&self) -> bool {
        self.height == 0
    }

    /// Canonical serialization with `hash` cleared.
    pub fn hash_preimage(&self) -> Result<Vec<u8>> {
        let preimage = HashPreimage {
            hash: "",
            height: self.height,
            body: &self.body,
            time: self.time,
            previous_block_hash: &self.previous_block_hash,
        };
        Ok(serde_json::to_vec(&preimage)?)
    }

    pub fn compute_hash(&self) -> Result<String> {
        Ok(sha256_hex(&self.hash_preimage()?))
    }

    /// Stored form of the block.
    pub fn to_record(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_record(record: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(record)?)
    }
}

/// The append-only ledger.
///
/// `height` caches the index of the newest committed block (`-1` before
/// genesis). `append` holds its write guard across the whole
/// read-modify-write of height and record; readers hold the read guard, so a
/// reader never sees a height whose record is still being written.
pub struct Ledger {
    pub(crate) store: Box<dyn BlockStore>,
    pub(crate) height: RwLock<i64>,
}

impl Ledger {
    /// Opens the ledger over `store`, writing the genesis block first if the
    /// store is empty.
    pub fn open(store: Box<dyn BlockStore>) -> Result<Self> {
        let ledger = Self::open_unbootstrapped(store)?;
        if ledger.get_height() < 0 {
            let genesis = ledger.append(Value::String(GENESIS_BODY.to_string()))?;
            tracing::info!(hash = %genesis.hash, "ledger.genesis_created");
        }
        Ok(ledger)
    }

    /// Opens the ledger without writing a genesis block; the first `append`
    /// on an empty store becomes height 0.
    pub fn open_unbootstrapped(store: Box<dyn BlockStore>) -> Result<Self> {
        let count = store.count()?;
        let height = count as i64 - 1;

        if let Some((last_key, _)) = store.scan_all()?.last() {
            if *last_key as i64 != height {
                tracing::warn!(
                    records = count,
                    last_height = *last_key,
                    "ledger.height_gap_detected"
                );
            }
        }

        tracing::info!(height, "ledger.opened");
        Ok(Ledger {
            store,
            height: RwLock::new(height),
        })
    }

    /// Appends `body` as a new block. Height, timestamp, link and hash are
    /// all assigned here.
    pub fn append(&self, body: Value) -> Result<Block> {
        let mut height = self.height.write();
        let next_height = (*height + 1) as u64;

        let previous_block_hash = if next_height == 0 {
            String::new()
        } else {
            let record = self.store.get(next_height - 1)?.ok_or_else(|| {
                ChainError::IntegrityError(format!(
                    "Block {} is missing from the store; cannot link block {}",
                    next_height - 1,
                    next_height
                ))
            })?;
            let previous = Block::from_record(&record).map_err(|e| {
                ChainError::IntegrityError(format!(
                    "Block {} is unreadable; cannot link block {}: {}",
                    next_height - 1,
                    next_height,
                    e
                ))
            })?;
            previous.hash
        };

        let mut block = Block::unsealed(
            next_height,
            body,
            chrono::Utc::now().timestamp(),
            previous_block_hash,
        );
        block.hash = block.compute_hash()?;

        if let Err(e) = self.store.put(next_height, &block.to_record()?) {
            tracing::error!(height = next_height, error = %e, "ledger.append_failed");
            return Err(e);
        }
        *height = next_height as i64;

        tracing::info!(
            height = block.height,
            hash = %block.hash,
            previous_hash = %block.previous_block_hash,
            "ledger.block_appended"
        );
        Ok(block)
    }

    /// Index of the newest block, or `-1` if the chain has no genesis yet.
    pub fn get_height(&self) -> i64 {
        *self.height.read()
    }

    pub fn get_block(&self, height: u64) -> Result<Block> {
        let current = self.height.read();
        self.load_block(height, *current)
    }

    /// Reads a block while the caller already holds a guard on `height`.
    pub(crate) fn load_block(&self, height: u64, current: i64) -> Result<Block> {
        if height as i64 > current || height > i64::MAX as u64 {
            return Err(ChainError::BlockNotFound(height as i64));
        }
        let record = self
            .store
            .get(height)?
            .ok_or(ChainError::BlockNotFound(height as i64))?;
        Block::from_record(&record)
    }

    /// The whole chain in height order.
    pub fn blocks(&self) -> Result<Vec<Block>> {
        let current = self.height.read();
        self.store
            .scan_all()?
            .into_iter()
            .filter(|(height, _)| (*height as i64) <= *current)
            .map(|(_, record)| Block::from_record(&record))
            .collect()
    }

    pub fn find_by_hash(&self, hash: &str) -> Result<Option<Block>> {
        Ok(self
            .blocks()?
            .into_iter()
            .find(|block| block.hash.eq_ignore_ascii_case(hash)))
    }
}
