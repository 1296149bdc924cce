use serde::{Deserialize, Serialize};

use super::Address;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub amount: u64,
    pub target: Address,
}

/// Coinbase transaction. The free-form `extra` byte array carries the TLV
/// stream read and written by [`crate::tx_extra`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinerTransaction {
    pub version: u64,
    pub unlock_height: u64,
    /// Height claimed by the coinbase "gen" input.
    pub input_height: u64,
    pub outputs: Vec<TxOutput>,
    pub extra: Vec<u8>,
}

impl MinerTransaction {
    pub fn coinbase(height: u64, reward: u64, payout: Address, extra: Vec<u8>) -> Self {
        Self {
            version: 2,
            unlock_height: height + super::block::COINBASE_UNLOCK_WINDOW,
            input_height: height,
            outputs: vec![TxOutput {
                amount: reward,
                target: payout,
            }],
            extra,
        }
    }
}
