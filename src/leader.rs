//! Slot-driven leader service.
//!
//! While running, the service wakes at every slot boundary, asks the core
//! for a template, stamps it with the slot timestamp and a deterministic
//! nonce, signs the canonical byte image and submits the finished block.
//! The worker is a dedicated thread; `stop` raises a flag the loop checks at
//! one-second ticks, so cancellation latency stays under a second.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ed25519_dalek::Keypair;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::chain::ChainCore;
use crate::crypto::{fast_hash, sign_hash, verify_hash};
use crate::errors::{ChainError, ChainResult};
use crate::tx_extra;
use crate::types::Block;

/// Production slot duration. Development networks run 30-second slots by
/// setting [`LeaderConfig::slot_duration_secs`] directly; the value is never
/// configurable over the network.
pub const SLOT_DURATION_SECS: u64 = 300;

/// Upper bound on the serialized leader-info entry: tag (1) + length varint
/// (<=3) + id length varint (<=3) + id (<=128) + signature (64). The
/// template carries this many zero bytes so weight and reward math already
/// account for the metadata added after signing.
pub const LEADER_EXTRA_RESERVE: usize = 170;

/// Pause after a panicking loop iteration before trying again.
const LOOP_BACKOFF: Duration = Duration::from_secs(5);

/// Why one slot's block generation was abandoned. None of these stop the
/// service; the slot is skipped, never retried.
#[derive(Debug, Error)]
pub enum SlotError {
    #[error("block template unavailable: {0}")]
    TemplateUnavailable(ChainError),
    #[error("block signing failed: {0}")]
    SigningFailure(ChainError),
    #[error("leader metadata did not survive re-serialization: {0}")]
    CodecRoundTrip(String),
    #[error("block blob of {0} bytes exceeds the core size limit")]
    SizeTooLarge(usize),
    #[error("core rejected the submitted block")]
    CoreRejected,
}

pub struct LeaderConfig {
    /// Wallet address doubling as the on-wire leader identity.
    pub leader_id: String,
    pub keypair: Keypair,
    /// Destination of the coinbase reward.
    pub payout_address: String,
    pub slot_duration_secs: u64,
    /// With proof-of-work off the nonce is derived deterministically.
    pub enable_pow: bool,
}

impl fmt::Debug for LeaderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeaderConfig")
            .field("leader_id", &self.leader_id)
            .field("public_key", &hex::encode(self.keypair.public.to_bytes()))
            .field("payout_address", &self.payout_address)
            .field("slot_duration_secs", &self.slot_duration_secs)
            .field("enable_pow", &self.enable_pow)
            .finish()
    }
}

struct ServiceInner {
    core: Arc<dyn ChainCore>,
    config: LeaderConfig,
    running: AtomicBool,
    stop_requested: AtomicBool,
    /// Highest slot a generation attempt succeeded for; written only by the
    /// worker thread.
    last_generated_slot: AtomicU64,
}

pub struct LeaderService {
    inner: Arc<ServiceInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for LeaderService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeaderService").finish_non_exhaustive()
    }
}

impl LeaderService {
    pub fn new(core: Arc<dyn ChainCore>, config: LeaderConfig) -> ChainResult<Self> {
        if config.slot_duration_secs == 0 {
            return Err(ChainError::Config("slot duration must be non-zero".into()));
        }
        info!(
            leader_id = %config.leader_id,
            slot_duration = config.slot_duration_secs,
            pow = config.enable_pow,
            "leader service initialized"
        );
        Ok(Self {
            inner: Arc::new(ServiceInner {
                core,
                config,
                running: AtomicBool::new(false),
                stop_requested: AtomicBool::new(false),
                last_generated_slot: AtomicU64::new(0),
            }),
            worker: Mutex::new(None),
        })
    }

    pub fn start(&self) -> ChainResult<()> {
        if self
            .inner
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ChainError::Consensus("leader service already running".into()));
        }
        self.inner.stop_requested.store(false, Ordering::SeqCst);

        let inner = Arc::clone(&self.inner);
        let handle = thread::Builder::new()
            .name("leader-slots".into())
            .spawn(move || inner.service_loop())
            .map_err(ChainError::Io)?;
        *self.worker.lock() = Some(handle);
        info!("leader service started");
        Ok(())
    }

    /// Idempotent; joins the worker before returning.
    pub fn stop(&self) {
        self.inner.stop_requested.store(true, Ordering::SeqCst);
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("leader worker thread panicked during shutdown");
            }
            info!("leader service stopped");
        }
        self.inner.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn next_slot_timestamp(&self, now: u64) -> u64 {
        self.inner.next_slot_timestamp(now)
    }

    pub fn is_slot_boundary(&self, timestamp: u64) -> bool {
        timestamp % self.inner.config.slot_duration_secs == 0
    }

    pub fn last_generated_slot(&self) -> u64 {
        self.inner.last_generated_slot.load(Ordering::SeqCst)
    }

    /// Produce, sign and submit one block for the given slot.
    pub fn generate_block(&self, slot_timestamp: u64) -> Result<(), SlotError> {
        self.inner.generate_block(slot_timestamp)
    }
}

impl Drop for LeaderService {
    fn drop(&mut self) {
        self.stop();
    }
}

impl ServiceInner {
    fn next_slot_timestamp(&self, now: u64) -> u64 {
        let remainder = now % self.config.slot_duration_secs;
        if remainder == 0 {
            now
        } else {
            now + (self.config.slot_duration_secs - remainder)
        }
    }

    fn service_loop(&self) {
        info!("leader slot loop started");

        while !self.stop_requested.load(Ordering::SeqCst) {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.slot_iteration()));
            match outcome {
                Ok(true) => {}
                Ok(false) => break,
                Err(_) => {
                    error!("leader slot iteration panicked; backing off");
                    self.interruptible_sleep(LOOP_BACKOFF.as_secs());
                }
            }
        }

        info!("leader slot loop stopped");
    }

    /// One pass of the slot loop. Returns `false` when a stop request was
    /// observed mid-wait.
    fn slot_iteration(&self) -> bool {
        let now = unix_time();
        let next_slot = self.next_slot_timestamp(now);

        if next_slot <= self.last_generated_slot.load(Ordering::SeqCst) {
            self.interruptible_sleep(1);
            return true;
        }

        if now < next_slot {
            info!(
                wait_secs = next_slot - now,
                slot = next_slot,
                "waiting for next slot"
            );
            if !self.interruptible_sleep(next_slot - now) {
                return false;
            }
        }

        match self.generate_block(next_slot) {
            Ok(()) => {
                self.last_generated_slot.store(next_slot, Ordering::SeqCst);
                info!(slot = next_slot, "block generated for slot");
            }
            Err(err) => {
                // The slot is gone; retrying would land a block in the past.
                warn!(slot = next_slot, %err, "slot skipped");
            }
        }

        self.interruptible_sleep(1)
    }

    /// Sleep in one-second ticks, watching the stop flag. Returns `false`
    /// if a stop request cut the sleep short.
    fn interruptible_sleep(&self, seconds: u64) -> bool {
        for _ in 0..seconds {
            if self.stop_requested.load(Ordering::SeqCst) {
                return false;
            }
            thread::sleep(Duration::from_secs(1));
        }
        !self.stop_requested.load(Ordering::SeqCst)
    }

    fn generate_block(&self, slot_timestamp: u64) -> Result<(), SlotError> {
        let reserve = vec![0u8; LEADER_EXTRA_RESERVE];
        let template = self
            .core
            .get_block_template(&self.config.payout_address, &reserve)
            .map_err(SlotError::TemplateUnavailable)?;

        let mut block = template.block;
        block.timestamp = slot_timestamp;
        if !self.config.enable_pow {
            block.nonce = deterministic_nonce(&self.config.leader_id, slot_timestamp);
        }

        // Drop the sizing placeholder and builder padding; what remains is
        // the exact image the validator will reconstruct.
        block.miner_tx.extra = tx_extra::strip_template_entries(&block.miner_tx.extra)
            .map_err(|err| SlotError::CodecRoundTrip(err.to_string()))?;

        let block = block
            .canonicalize()
            .map_err(|err| SlotError::CodecRoundTrip(err.to_string()))?;
        let signing_hash = block.block_hash().map_err(SlotError::SigningFailure)?;

        let signature = sign_hash(&self.config.keypair, &signing_hash);
        verify_hash(&self.config.keypair.public, &signing_hash, &signature)
            .map_err(SlotError::SigningFailure)?;

        let mut block = block;
        tx_extra::add_leader_info(
            &mut block.miner_tx.extra,
            self.config.leader_id.as_bytes(),
            &signature.to_bytes(),
        );

        let blob = block
            .to_blob()
            .map_err(|err| SlotError::CodecRoundTrip(err.to_string()))?;
        let block = Block::from_blob(&blob)
            .map_err(|err| SlotError::CodecRoundTrip(err.to_string()))?;
        let (embedded_id, _) = tx_extra::get_leader_info(&block.miner_tx.extra)
            .ok_or_else(|| SlotError::CodecRoundTrip("metadata missing after reparse".into()))?;
        if embedded_id != self.config.leader_id.as_bytes() {
            return Err(SlotError::CodecRoundTrip(
                "metadata changed identity after reparse".into(),
            ));
        }

        if !self.core.check_incoming_block_size(&blob) {
            return Err(SlotError::SizeTooLarge(blob.len()));
        }

        info!(
            slot = slot_timestamp,
            height = template.height,
            hash = %hex::encode(signing_hash),
            "submitting leader block"
        );
        if !self.core.handle_block_found(block) {
            return Err(SlotError::CoreRejected);
        }
        Ok(())
    }
}

/// Nonce used while proof-of-work is disabled: the first four bytes, little
/// endian, of the fast hash over the leader id and the decimal slot
/// timestamp. Stable for a given (leader, slot) pair.
pub fn deterministic_nonce(leader_id: &str, slot_timestamp: u64) -> u32 {
    let data = format!("{leader_id}{slot_timestamp}");
    let digest = fast_hash(data.as_bytes());
    u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]])
}

fn unix_time() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or_default()
}
