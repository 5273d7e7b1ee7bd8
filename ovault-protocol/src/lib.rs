// Cross-chain vault orchestration: route registry, bridge adapters, vault and
// the hub Composer, plus a simulated delivery layer to drive them.

pub mod bridge;
pub mod composer;
pub mod config;
pub mod data_structures;
pub mod error;
pub mod events;
pub mod onchain;
pub mod routing;
pub mod simulation;
pub mod storage;
pub mod vault;
pub mod verification;

pub mod test_utils;

pub use error::{BridgeError, Disposition, ErrorKind};
