//! Consensus-boundary validation of leader-signed blocks.
//!
//! Every incoming block during the migration window must carry leader
//! metadata in its coinbase extra, name an allow-listed seed identity, and
//! verify against the Ed25519 key registered for that identity. The key is
//! always taken from the registry, never from the block itself.

use std::sync::atomic::{AtomicBool, Ordering};

use ed25519_dalek::Signature;
use tracing::{debug, warn};

use crate::crypto::{public_key_from_hex, verify_hash};
use crate::errors::ChainResult;
use crate::seeds::SEED_IDENTITIES;
use crate::tx_extra;
use crate::types::Block;

/// One allow-list slot as snapshotted into a validator.
#[derive(Clone, Debug)]
pub struct SeedEntry {
    pub address: String,
    pub pubkey_hex: String,
}

#[derive(Clone, Debug)]
pub struct ValidatorConfig {
    /// When set, only this leader id is accepted; `None` admits any
    /// allow-listed identity.
    pub expected_leader_id: Option<String>,
    pub allow_list: Vec<SeedEntry>,
}

impl ValidatorConfig {
    /// Snapshot the compiled-in seed registry.
    pub fn from_seed_registry(expected_leader_id: Option<String>) -> Self {
        Self {
            expected_leader_id,
            allow_list: SEED_IDENTITIES
                .iter()
                .map(|seed| SeedEntry {
                    address: seed.address.to_string(),
                    pubkey_hex: seed.ed25519_pubkey_hex.to_string(),
                })
                .collect(),
        }
    }
}

/// Stateless apart from the enable flag; safe to call from any thread.
pub struct LeaderValidator {
    config: ValidatorConfig,
    enabled: AtomicBool,
}

impl LeaderValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self {
            config,
            enabled: AtomicBool::new(false),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Accept or reject one block. `true` means the block was produced by an
    /// authorized leader; a disabled validator rejects so the caller falls
    /// back to whatever other rules it runs.
    pub fn validate_block(&self, block: &Block, height: u64) -> bool {
        if !self.is_enabled() {
            warn!(height, "leader validator called while disabled");
            return false;
        }

        if height == 0 {
            return true;
        }

        let Some((raw_id, signature_bytes)) = tx_extra::get_leader_info(&block.miner_tx.extra)
        else {
            warn!(height, "block carries no leader metadata");
            return false;
        };

        let Ok(leader_id) = String::from_utf8(raw_id) else {
            warn!(height, "leader id is not valid UTF-8");
            return false;
        };

        let Some(entry) = self
            .config
            .allow_list
            .iter()
            .find(|entry| entry.address == leader_id)
        else {
            warn!(height, %leader_id, "leader id is not an authorized seed identity");
            return false;
        };

        if entry.pubkey_hex.is_empty() {
            warn!(
                height,
                %leader_id,
                "seed identity has no registered public key; slot is unprovisioned"
            );
            return false;
        }
        let public_key = match public_key_from_hex(&entry.pubkey_hex) {
            Ok(key) => key,
            Err(err) => {
                warn!(height, %leader_id, %err, "registered seed public key is unusable");
                return false;
            }
        };

        if let Some(expected) = self
            .config
            .expected_leader_id
            .as_deref()
            .filter(|pin| !pin.is_empty())
        {
            if expected != leader_id {
                warn!(height, %leader_id, expected, "block signed by unexpected leader");
                return false;
            }
        }

        let signing_hash = match self.reconstruct_signing_hash(block) {
            Ok(hash) => hash,
            Err(err) => {
                warn!(height, %err, "failed to reconstruct signing image");
                return false;
            }
        };

        let Ok(signature) = Signature::from_bytes(&signature_bytes) else {
            warn!(height, %leader_id, "embedded signature bytes are not a valid signature");
            return false;
        };
        if let Err(err) = verify_hash(&public_key, &signing_hash, &signature) {
            warn!(height, %leader_id, %err, "leader signature does not verify");
            return false;
        }

        debug!(height, %leader_id, "leader block accepted");
        true
    }

    /// Rebuild the exact byte image the leader signed: the block with the
    /// leader-info entry removed, round-tripped through serialization so no
    /// mutation history survives into the hash.
    fn reconstruct_signing_hash(&self, block: &Block) -> ChainResult<[u8; 32]> {
        let stripped = tx_extra::remove_leader_info(&block.miner_tx.extra)
            .unwrap_or_else(|| block.miner_tx.extra.clone());
        let mut image = block.clone();
        image.miner_tx.extra = stripped;
        let image = image.canonicalize()?;
        image.block_hash()
    }
}
