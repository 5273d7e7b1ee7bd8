// Simulated on-chain state: token ledger, messaging endpoint and the per-chain container

pub mod chain;
pub mod endpoint;
pub mod interface;
pub mod ledger;

pub use chain::{
    AdapterRole, Chain, CrossChainReceipt, DeliveryOutcome, DepositRequest, HubInfo,
    RedeemRequest,
};
pub use endpoint::{Endpoint, InboundOrder};
pub use interface::{DeliveryLayer, DispatchReceipt, OutboundRequest};
pub use ledger::Ledger;
