//! Daemon-level wiring for the migration-window consensus.
//!
//! Builds the leader service and the validator from the command-line
//! switches, runs the startup key checks and owns both for the life of the
//! daemon. Followers get only the validator; the configured leader gets
//! both.

use std::sync::Arc;

use tracing::{info, warn};

use crate::chain::ChainCore;
use crate::crypto::{derive_leader_keypair, signing_self_test};
use crate::errors::{ChainError, ChainResult};
use crate::leader::{LeaderConfig, LeaderService, SLOT_DURATION_SECS};
use crate::seeds::{self, SEED_IDENTITIES};
use crate::validator::{LeaderValidator, ValidatorConfig};

/// Command-line surface of the subsystem.
#[derive(Clone, Debug, Default)]
pub struct ConsensusOptions {
    /// `--temp-consensus-enabled`
    pub enabled: bool,
    /// `--temp-consensus-leader`
    pub leader: bool,
    /// Delegate public address; leader id and coinbase payout destination.
    pub delegate_address: Option<String>,
    /// 128 hex characters: `[seed(32)][pubkey(32)]`.
    pub delegate_secret_key: Option<String>,
}

pub struct TempConsensus {
    enabled: bool,
    is_leader: bool,
    leader_service: Option<LeaderService>,
    validator: Option<Arc<LeaderValidator>>,
}

impl std::fmt::Debug for TempConsensus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TempConsensus")
            .field("enabled", &self.enabled)
            .field("is_leader", &self.is_leader)
            .finish_non_exhaustive()
    }
}

impl TempConsensus {
    pub fn new(options: &ConsensusOptions, core: Arc<dyn ChainCore>) -> ChainResult<Self> {
        if !options.enabled {
            info!("temporary consensus disabled");
            return Ok(Self {
                enabled: false,
                is_leader: false,
                leader_service: None,
                validator: None,
            });
        }

        info!(leader = options.leader, "temporary consensus enabled");

        let mut leader_service = None;
        if options.leader {
            let address = options.delegate_address.clone().ok_or_else(|| {
                ChainError::Config(
                    "leader mode requires --delegate-address".into(),
                )
            })?;
            let secret_hex = options.delegate_secret_key.as_deref().ok_or_else(|| {
                ChainError::Config(
                    "leader mode requires --delegate-secret-key".into(),
                )
            })?;

            if !seeds::is_authorized(&address) {
                return Err(ChainError::Config(format!(
                    "delegate address {address} is not an authorized seed identity"
                )));
            }

            let keypair = derive_leader_keypair(secret_hex)?;
            signing_self_test(&keypair)?;
            info!(
                leader_id = %address,
                public_key = %hex::encode(keypair.public.to_bytes()),
                "leader key material verified"
            );
            warn_unprovisioned_seeds(&keypair);

            let config = LeaderConfig {
                leader_id: address.clone(),
                keypair,
                payout_address: address,
                slot_duration_secs: SLOT_DURATION_SECS,
                enable_pow: false,
            };
            leader_service = Some(LeaderService::new(core, config)?);
        }

        // Followers may pin a single leader by naming it; omitting the
        // address admits any allow-listed seed.
        let validator = Arc::new(LeaderValidator::new(ValidatorConfig::from_seed_registry(
            options.delegate_address.clone(),
        )));
        validator.set_enabled(true);
        info!("leader validator initialized");

        Ok(Self {
            enabled: true,
            is_leader: options.leader,
            leader_service,
            validator: Some(validator),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_leader(&self) -> bool {
        self.is_leader
    }

    /// Validator hook for the daemon to inject into the chain core.
    pub fn validator(&self) -> Option<Arc<LeaderValidator>> {
        self.validator.clone()
    }

    pub fn run(&self) -> ChainResult<()> {
        if !self.enabled {
            return Ok(());
        }
        if let Some(service) = &self.leader_service {
            service.start()?;
        }
        info!("temporary consensus services running");
        Ok(())
    }

    pub fn stop(&self) {
        if !self.enabled {
            return;
        }
        if let Some(service) = &self.leader_service {
            service.stop();
        }
        if let Some(validator) = &self.validator {
            validator.set_enabled(false);
        }
        info!("temporary consensus services stopped");
    }
}

impl Drop for TempConsensus {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Development-mode provisioning aid: name every registry slot that still
/// has no public key and print the freshly derived one so the operator can
/// paste it into the registry.
fn warn_unprovisioned_seeds(keypair: &ed25519_dalek::Keypair) {
    for seed in &SEED_IDENTITIES {
        if seed.ed25519_pubkey_hex.is_empty() {
            warn!(
                address = seed.address,
                derived_pubkey = %hex::encode(keypair.public.to_bytes()),
                "seed registry slot has no public key; fill it before the window opens"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Core;
    use ed25519_dalek::{Keypair, PublicKey, SecretKey};

    fn core() -> Arc<dyn ChainCore> {
        Arc::new(Core::new().unwrap())
    }

    fn secret_hex_for_seed(seed: [u8; 32]) -> String {
        let secret = SecretKey::from_bytes(&seed).unwrap();
        let public = PublicKey::from(&secret);
        let keypair = Keypair { secret, public };
        format!(
            "{}{}",
            hex::encode(seed),
            hex::encode(keypair.public.to_bytes())
        )
    }

    #[test]
    fn disabled_subsystem_is_inert() {
        let consensus = TempConsensus::new(&ConsensusOptions::default(), core()).unwrap();
        assert!(!consensus.is_enabled());
        assert!(consensus.validator().is_none());
        consensus.run().unwrap();
        consensus.stop();
    }

    #[test]
    fn follower_gets_enabled_validator() {
        let options = ConsensusOptions {
            enabled: true,
            ..Default::default()
        };
        let consensus = TempConsensus::new(&options, core()).unwrap();
        assert!(consensus.is_enabled());
        assert!(!consensus.is_leader());
        let validator = consensus.validator().expect("follower runs a validator");
        assert!(validator.is_enabled());
        consensus.stop();
        assert!(!validator.is_enabled());
    }

    #[test]
    fn leader_mode_requires_delegate_flags() {
        let options = ConsensusOptions {
            enabled: true,
            leader: true,
            ..Default::default()
        };
        let err = TempConsensus::new(&options, core()).unwrap_err();
        assert!(matches!(err, ChainError::Config(_)));

        let options = ConsensusOptions {
            enabled: true,
            leader: true,
            delegate_address: Some(SEED_IDENTITIES[0].address.to_string()),
            delegate_secret_key: None,
        };
        let err = TempConsensus::new(&options, core()).unwrap_err();
        assert!(matches!(err, ChainError::Config(_)));
    }

    #[test]
    fn unauthorized_delegate_address_is_fatal() {
        let options = ConsensusOptions {
            enabled: true,
            leader: true,
            delegate_address: Some("XCAnot-in-the-registry".into()),
            delegate_secret_key: Some(secret_hex_for_seed([9u8; 32])),
        };
        let err = TempConsensus::new(&options, core()).unwrap_err();
        assert!(matches!(err, ChainError::Config(_)));
    }

    #[test]
    fn malformed_secret_key_is_fatal() {
        let options = ConsensusOptions {
            enabled: true,
            leader: true,
            delegate_address: Some(SEED_IDENTITIES[0].address.to_string()),
            delegate_secret_key: Some("abcd".into()),
        };
        let err = TempConsensus::new(&options, core()).unwrap_err();
        assert!(matches!(err, ChainError::Config(_)));
    }

    #[test]
    fn authorized_leader_starts_and_stops() {
        let options = ConsensusOptions {
            enabled: true,
            leader: true,
            delegate_address: Some(SEED_IDENTITIES[0].address.to_string()),
            delegate_secret_key: Some(secret_hex_for_seed([9u8; 32])),
        };
        let consensus = TempConsensus::new(&options, core()).unwrap();
        assert!(consensus.is_leader());
        consensus.run().unwrap();
        consensus.stop();
    }
}
