//! Chain-core capability surface and the in-process core behind it.
//!
//! The leader service and the validator never depend on the full daemon;
//! they talk to [`ChainCore`], which exposes exactly the three calls the
//! subsystem needs. The core calls back only through the injected validator
//! hook on block arrival, so the two sides stay acyclic.

use std::sync::Arc;

use ed25519_dalek::Keypair;
use parking_lot::RwLock;
use rand::rngs::OsRng;
use tracing::{info, warn};

use crate::crypto::fast_hash;
use crate::errors::{ChainError, ChainResult};
use crate::tx_extra;
use crate::types::{Block, BlockTemplate, MinerTransaction, BLOCK_MAJOR_VERSION};
use crate::validator::LeaderValidator;

/// Largest block blob the core accepts.
pub const MAX_BLOCK_BLOB_SIZE: usize = 500_000;

/// Flat coinbase reward during the migration window; emission economics are
/// frozen while proof-of-work is off.
pub const BASE_REWARD: u64 = 35_000_000_000;

/// Zero-byte run the template builder appends after the caller's entries.
const TEMPLATE_EXTRA_PADDING: usize = 8;

/// Capability interface the consensus subsystem holds on the chain core.
pub trait ChainCore: Send + Sync {
    /// Build a block template extending the current tip. `extra_nonce` is
    /// placed into the coinbase extra before sizing so reward and weight
    /// math already account for metadata of that size.
    fn get_block_template(&self, payout_address: &str, extra_nonce: &[u8])
        -> ChainResult<BlockTemplate>;

    fn check_incoming_block_size(&self, blob: &[u8]) -> bool;

    /// Hand a fully formed block to the core. `false` means the block was
    /// refused; the caller must not retry.
    fn handle_block_found(&self, block: Block) -> bool;
}

#[derive(Clone, Copy)]
struct ChainTip {
    height: u64,
    hash: [u8; 32],
}

/// In-process chain core: tracks the tip, builds coinbase templates and runs
/// the leader-validator hook on every submitted block.
pub struct Core {
    tip: RwLock<ChainTip>,
    blocks: RwLock<Vec<Block>>,
    validator: RwLock<Option<Arc<LeaderValidator>>>,
    max_block_blob_size: usize,
}

impl Core {
    pub fn new() -> ChainResult<Self> {
        let genesis = Block {
            major_version: 1,
            minor_version: 0,
            timestamp: 0,
            prev_id: [0u8; 32],
            nonce: 0,
            miner_tx: MinerTransaction::coinbase(0, BASE_REWARD, String::new(), Vec::new()),
        };
        let hash = fast_hash(&genesis.to_blob()?);
        Ok(Self {
            tip: RwLock::new(ChainTip { height: 0, hash }),
            blocks: RwLock::new(vec![genesis]),
            validator: RwLock::new(None),
            max_block_blob_size: MAX_BLOCK_BLOB_SIZE,
        })
    }

    /// One-way injection of the validator hook; the validator never gets a
    /// handle back onto the core.
    pub fn set_leader_validator(&self, validator: Arc<LeaderValidator>) {
        *self.validator.write() = Some(validator);
    }

    pub fn tip_height(&self) -> u64 {
        self.tip.read().height
    }

    pub fn block_by_height(&self, height: u64) -> Option<Block> {
        self.blocks.read().get(height as usize).cloned()
    }
}

impl ChainCore for Core {
    fn get_block_template(
        &self,
        payout_address: &str,
        extra_nonce: &[u8],
    ) -> ChainResult<BlockTemplate> {
        if payout_address.is_empty() {
            return Err(ChainError::Config("template payout address is empty".into()));
        }
        let tip = *self.tip.read();
        let height = tip.height + 1;

        let mut extra = Vec::new();
        tx_extra::add_tx_pub_key(&mut extra, &one_time_tx_pubkey());
        if !extra_nonce.is_empty() {
            tx_extra::add_extra_nonce(&mut extra, extra_nonce)?;
        }
        tx_extra::add_padding(&mut extra, TEMPLATE_EXTRA_PADDING);

        let miner_tx =
            MinerTransaction::coinbase(height, BASE_REWARD, payout_address.to_string(), extra);
        let block = Block {
            major_version: BLOCK_MAJOR_VERSION,
            minor_version: 0,
            timestamp: unix_time(),
            prev_id: tip.hash,
            nonce: 0,
            miner_tx,
        };

        Ok(BlockTemplate {
            block,
            difficulty: 1,
            height,
            expected_reward: BASE_REWARD,
        })
    }

    fn check_incoming_block_size(&self, blob: &[u8]) -> bool {
        blob.len() <= self.max_block_blob_size
    }

    fn handle_block_found(&self, block: Block) -> bool {
        let height = self.tip.read().height + 1;

        if let Some(validator) = self.validator.read().as_ref() {
            if validator.is_enabled() && !validator.validate_block(&block, height) {
                warn!(height, "leader validator refused submitted block");
                return false;
            }
        }

        let blob = match block.to_blob() {
            Ok(blob) => blob,
            Err(err) => {
                warn!(height, %err, "submitted block does not serialize");
                return false;
            }
        };
        if !self.check_incoming_block_size(&blob) {
            warn!(height, size = blob.len(), "submitted block exceeds size limit");
            return false;
        }

        let mut tip = self.tip.write();
        if block.prev_id != tip.hash {
            warn!(height, "submitted block does not extend the current tip");
            return false;
        }
        let hash = fast_hash(&blob);
        self.blocks.write().push(block);
        tip.height = height;
        tip.hash = hash;
        info!(height, hash = %hex::encode(hash), "block accepted");
        true
    }
}

fn one_time_tx_pubkey() -> [u8; 32] {
    Keypair::generate(&mut OsRng).public.to_bytes()
}

fn unix_time() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_extends_tip_and_reserves_extra_nonce() {
        let core = Core::new().unwrap();
        let reserve = vec![0u8; 170];
        let template = core.get_block_template("XCA-payout", &reserve).unwrap();

        assert_eq!(template.height, 1);
        assert_eq!(template.expected_reward, BASE_REWARD);
        assert_eq!(template.block.miner_tx.input_height, 1);

        // The placeholder is in the extra during sizing and strips cleanly.
        let stripped = tx_extra::strip_template_entries(&template.block.miner_tx.extra).unwrap();
        assert!(stripped.len() < template.block.miner_tx.extra.len());
        assert!(tx_extra::get_leader_info(&template.block.miner_tx.extra).is_none());
    }

    #[test]
    fn oversized_extra_nonce_is_refused() {
        let core = Core::new().unwrap();
        let err = core
            .get_block_template("XCA-payout", &[0u8; 256])
            .unwrap_err();
        assert!(matches!(err, ChainError::Consensus(_)));
    }

    #[test]
    fn submission_without_validator_extends_tip() {
        let core = Core::new().unwrap();
        let template = core.get_block_template("XCA-payout", &[]).unwrap();
        assert!(core.handle_block_found(template.block));
        assert_eq!(core.tip_height(), 1);
        assert!(core.block_by_height(1).is_some());
    }

    #[test]
    fn stale_block_is_refused() {
        let core = Core::new().unwrap();
        let template = core.get_block_template("XCA-payout", &[]).unwrap();
        assert!(core.handle_block_found(template.block.clone()));
        // Same template again no longer extends the tip.
        assert!(!core.handle_block_found(template.block));
        assert_eq!(core.tip_height(), 1);
    }

    #[test]
    fn size_check_bounds_blob_length() {
        let core = Core::new().unwrap();
        assert!(core.check_incoming_block_size(&[0u8; 1000]));
        assert!(!core.check_incoming_block_size(&vec![0u8; MAX_BLOCK_BLOB_SIZE + 1]));
    }
}
