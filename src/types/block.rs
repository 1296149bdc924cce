use serde::{Deserialize, Serialize};

use crate::crypto::fast_hash;
use crate::errors::ChainResult;

use super::MinerTransaction;

/// Blocks produced during the leader window carry this major version.
pub const BLOCK_MAJOR_VERSION: u8 = 14;

/// Coinbase outputs unlock this many blocks after inclusion.
pub const COINBASE_UNLOCK_WINDOW: u64 = 60;

/// A block value carries no cached hash: [`Block::block_hash`] is pure over
/// the serialized bytes, so mutating the coinbase extra can never leave a
/// stale hash behind.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub major_version: u8,
    pub minor_version: u8,
    pub timestamp: u64,
    pub prev_id: [u8; 32],
    pub nonce: u32,
    pub miner_tx: MinerTransaction,
}

impl Block {
    /// Canonical byte image of the block. This is the image signatures cover
    /// and the image gossiped between nodes.
    pub fn to_blob(&self) -> ChainResult<Vec<u8>> {
        bincode::serialize(self).map_err(Into::into)
    }

    pub fn from_blob(blob: &[u8]) -> ChainResult<Self> {
        bincode::deserialize(blob).map_err(Into::into)
    }

    /// Serialize then parse, yielding a value free of whatever mutation
    /// history the original carried. Both the leader and the validator
    /// round-trip through this before hashing so they agree byte-for-byte on
    /// the image under the signature.
    pub fn canonicalize(&self) -> ChainResult<Self> {
        Self::from_blob(&self.to_blob()?)
    }

    pub fn block_hash(&self) -> ChainResult<[u8; 32]> {
        Ok(fast_hash(&self.to_blob()?))
    }
}

/// Everything the core hands back for one round of block production.
#[derive(Clone, Debug)]
pub struct BlockTemplate {
    pub block: Block,
    pub difficulty: u64,
    pub height: u64,
    pub expected_reward: u64,
}
