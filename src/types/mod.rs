mod block;
mod transaction;

pub use block::{Block, BlockTemplate, BLOCK_MAJOR_VERSION, COINBASE_UNLOCK_WINDOW};
pub use transaction::{MinerTransaction, TxOutput};

/// Textual wallet address.
pub type Address = String;
