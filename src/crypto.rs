//! Ed25519 key handling and the chain's fast hash.
//!
//! Block signatures produced during the leader window are plain Ed25519
//! detached signatures. The chain's legacy ring-signature routines share the
//! 64-byte signature shape but implement a different scheme; everything in
//! this subsystem must dispatch through [`ed25519_dalek`] instead.

use ed25519_dalek::{
    Keypair, PublicKey, SecretKey, Signature, Signer, Verifier, KEYPAIR_LENGTH, PUBLIC_KEY_LENGTH,
    SECRET_KEY_LENGTH,
};

use crate::errors::{ChainError, ChainResult};

/// Fixed message signed by the startup canary.
pub const SIGNING_SELF_TEST_MESSAGE: &[u8] = b"temporary_consensus_test";

/// The chain's fast hash over arbitrary bytes.
pub fn fast_hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// Derive the leader signing keypair from the delegate secret-key input.
///
/// The input is 128 hex characters encoding `[seed(32)][pubkey(32)]`. The
/// keypair is derived from the seed; the embedded trailing public key must
/// match the derived one or the input is rejected as mis-provisioned.
pub fn derive_leader_keypair(secret_hex: &str) -> ChainResult<Keypair> {
    let bytes = hex::decode(secret_hex.trim())
        .map_err(|err| ChainError::Config(format!("invalid delegate secret key encoding: {err}")))?;
    if bytes.len() != KEYPAIR_LENGTH {
        return Err(ChainError::Config(format!(
            "delegate secret key must be {} hex characters, got {}",
            KEYPAIR_LENGTH * 2,
            secret_hex.trim().len()
        )));
    }
    let secret = SecretKey::from_bytes(&bytes[..SECRET_KEY_LENGTH])
        .map_err(|err| ChainError::Crypto(format!("invalid Ed25519 seed: {err}")))?;
    let public = PublicKey::from(&secret);
    if bytes[SECRET_KEY_LENGTH..] != public.as_bytes()[..] {
        return Err(ChainError::Config(
            "embedded public key does not match the key derived from the seed".into(),
        ));
    }
    Ok(Keypair { secret, public })
}

pub fn public_key_from_hex(data: &str) -> ChainResult<PublicKey> {
    let bytes = hex::decode(data)
        .map_err(|err| ChainError::Crypto(format!("invalid public key encoding: {err}")))?;
    if bytes.len() != PUBLIC_KEY_LENGTH {
        return Err(ChainError::Crypto(format!(
            "public key must be {PUBLIC_KEY_LENGTH} bytes, got {}",
            bytes.len()
        )));
    }
    PublicKey::from_bytes(&bytes)
        .map_err(|err| ChainError::Crypto(format!("invalid public key bytes: {err}")))
}

pub fn sign_hash(keypair: &Keypair, hash: &[u8; 32]) -> Signature {
    keypair.sign(hash)
}

pub fn verify_hash(public_key: &PublicKey, hash: &[u8; 32], signature: &Signature) -> ChainResult<()> {
    public_key
        .verify(hash, signature)
        .map_err(|err| ChainError::Crypto(format!("signature verification failed: {err}")))
}

/// Startup canary: sign a fixed message and verify it with the derived
/// public key. A keypair that fails this round-trip must never be used for
/// block signing.
pub fn signing_self_test(keypair: &Keypair) -> ChainResult<()> {
    let digest = fast_hash(SIGNING_SELF_TEST_MESSAGE);
    let signature = keypair.sign(&digest);
    keypair
        .public
        .verify(&digest, &signature)
        .map_err(|err| ChainError::Crypto(format!("signing self-test failed: {err}")))
}
