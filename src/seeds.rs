//! Compile-time registry of the seed identities authorized to lead during
//! the migration window.
//!
//! The textual wallet address doubles as the leader id on the wire; the
//! Ed25519 public key is what followers verify block signatures against. An
//! empty public-key string marks a slot that has not been provisioned yet:
//! startup logs the derived key for the operator to paste back, and the
//! validator refuses blocks claiming that slot until the constant is filled.

/// One authorized seed identity.
#[derive(Clone, Copy, Debug)]
pub struct SeedIdentity {
    pub address: &'static str,
    pub ed25519_pubkey_hex: &'static str,
}

/// Wallet addresses are fixed-length on this network.
pub const WALLET_ADDRESS_LENGTH: usize = 98;

pub const SEED_IDENTITIES: [SeedIdentity; 4] = [
    SeedIdentity {
        address: "XCAsFc2DELsgYHK7LuvDP7EZT3CXRrvs7VGhjAqH4thbP9kAGcW3UKMzAcg5kGghmw6PgunAw8NhA8FcSgkfKUSHezEXLqT4NN",
        ed25519_pubkey_hex: "795f5a4acb9ac8390d314cefbbf64a58df6924f7f8cb566422af348c3064a62e",
    },
    SeedIdentity {
        address: "XCAuZ9i65ZcyGnPBZfgZRyqtJKLNx9f3RH25fmDq3vAUbs6ASE4rUe9wYYRf1XtwhXVNTik6uzunmwg5yipfBKpbxwPENiMJYq",
        ed25519_pubkey_hex: "9c141793d704894ba121ebdf1996b1356d2c28a952293e7a8d8151879788fb70",
    },
    SeedIdentity {
        address: "XCA7pjW1qArors8MGDYtPVoGMGCAETpgyzENZ5J2VercEANtHP2hZMwnoZStMVFAZUEjePxCqbmGSxgxAu5eawqoSvp6mwm6Wi",
        ed25519_pubkey_hex: "7980a1e3db5032dc8d64de4665353335ce93fbce000c44542ac796b33c518a36",
    },
    SeedIdentity {
        address: "XCAenoBqwmJY37a6GDo8bcpTiQXFbqXQNcMXEQtCHf6wx9h6GcMTTUENEnrvoKag6ZKtyoGSshzQHHsqT7r2fGYWHx5diiFCSs",
        ed25519_pubkey_hex: "e3fca4e54751565567fb4e7e0c4b0773c967eb846f587d557ad77f47c5447a0c",
    },
];

/// Seed daemons polled by the block-hash audit helper.
pub const SEED_AUDIT_HOSTS: [&str; 4] = [
    "seed1.xcash.tech",
    "seed2.xcash.tech",
    "seed3.xcash.tech",
    "seed5.xcash.tech",
];

/// Look an address up in the allow-list, returning its slot index.
pub fn find(leader_id: &str) -> Option<(usize, &'static SeedIdentity)> {
    SEED_IDENTITIES
        .iter()
        .enumerate()
        .find(|(_, seed)| seed.address == leader_id)
}

pub fn is_authorized(leader_id: &str) -> bool {
    find(leader_id).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_entries_are_well_formed() {
        for seed in &SEED_IDENTITIES {
            assert_eq!(seed.address.len(), WALLET_ADDRESS_LENGTH);
            assert!(seed.address.starts_with("XCA"));
            assert!(
                seed.ed25519_pubkey_hex.is_empty() || seed.ed25519_pubkey_hex.len() == 64,
                "pubkey hex must be empty or 32 bytes"
            );
            if !seed.ed25519_pubkey_hex.is_empty() {
                hex::decode(seed.ed25519_pubkey_hex).expect("pubkey constant decodes");
            }
        }
    }

    #[test]
    fn lookup_matches_exact_address_only() {
        let (index, seed) = find(SEED_IDENTITIES[2].address).expect("known seed found");
        assert_eq!(index, 2);
        assert_eq!(seed.address, SEED_IDENTITIES[2].address);
        assert!(find("XCAnot-a-seed").is_none());
        assert!(!is_authorized(""));
    }
}
