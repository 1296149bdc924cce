//! X-Cash chain daemon with the temporary leader-based consensus used while
//! the network migrates off delegated proof-of-stake.
//!
//! During the migration window one authorized seed node (the leader)
//! produces a signed block at every slot boundary; every other node runs
//! only the validator and refuses blocks that are not signed by an
//! allow-listed seed identity. Proof-of-work is off; the signature in the
//! coinbase extra is the only admission rule.
//!
//! The [`leader`] service drives block production, [`tx_extra`] carries the
//! leader metadata inside the coinbase, and [`validator`] checks it at the
//! consensus boundary. [`chain`] exposes the narrow core interface both
//! sides talk to, and [`audit`] cross-checks stored blocks against the seed
//! daemons.

pub mod audit;
pub mod chain;
pub mod config;
pub mod crypto;
pub mod errors;
pub mod leader;
pub mod seeds;
pub mod temp_consensus;
pub mod tx_extra;
pub mod types;
pub mod validator;
