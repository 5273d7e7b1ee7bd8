// Simulated delivery layer and deployment harness

pub mod config;
pub mod deployment;
pub mod network;
pub mod relayer;

pub use config::SimulationConfig;
pub use deployment::build_network;
pub use network::{DeadLetter, Network, RelayReport};
pub use relayer::{spawn_relayer, RelayerHandle, RelayerStats};
