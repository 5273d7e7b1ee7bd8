use ethers::types::Address;

use crate::bridge::fees::{FeeBreakdown, SendOptions};
use crate::data_structures::{Amount, ChainId, Guid};
use crate::error::BridgeError;
use crate::routing::security::SecurityConfig;

/// Everything an adapter hands to the delivery layer for one send.
/// The delivery layer assigns nonce and GUID.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundRequest {
    pub dest_chain_id: ChainId,
    pub sender: Address,
    pub receiver: Address,
    pub origin: Address,
    pub recipient: Address,
    pub amount: Amount,
    pub compose_payload: Option<Vec<u8>>,
    pub native_value: Amount,
    pub send_config: SecurityConfig,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DispatchReceipt {
    pub guid: Guid,
    pub nonce: u64,
}

/// Send side of the cross-chain messaging layer, as seen by adapters.
///
/// The receive side is the chain's `receive_packet`, which the delivery layer
/// calls only after verifier quorum and confirmation depth are met.
pub trait DeliveryLayer {
    /// Native fee required to deliver a message of `payload_size` bytes.
    fn estimate_fee(
        &self,
        dest_chain_id: ChainId,
        payload_size: usize,
        security: &SecurityConfig,
        options: &SendOptions,
    ) -> Result<FeeBreakdown, BridgeError>;

    /// Accepts a message for delivery.
    fn dispatch(&mut self, request: OutboundRequest) -> Result<DispatchReceipt, BridgeError>;

    /// Account that collects native fees on this chain.
    fn fee_collector(&self) -> Address;
}
