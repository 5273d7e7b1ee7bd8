// Route and security configuration for bridge adapters

pub mod diagnostics;
pub mod registry;
pub mod security;

pub use diagnostics::{diagnose_path, PathEnd, PathSide, PathStatus};
pub use registry::{ChainRoute, OutboundRoute, RouteChange, RouteRegistry};
pub use security::{SecurityConfig, VerifierId};
