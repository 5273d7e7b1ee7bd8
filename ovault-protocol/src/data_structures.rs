use std::fmt;

use ethers::types::{Address, H256};
use ethers::utils::keccak256;
use serde::{Deserialize, Serialize};

use crate::bridge::fees::SendOptions;
use crate::error::BridgeError;
use crate::routing::security::SecurityConfig;

/// Endpoint id of a chain (LayerZero-style `eid`).
pub type ChainId = u32;

/// Token amounts in local decimals.
pub type Amount = u128;

/// Globally unique message identifier.
pub type Guid = H256;

/// Symbol of the gas token every chain ledger carries.
pub const NATIVE_TOKEN: &str = "NATIVE";

// A token on a single chain's ledger. The same symbol on two chains names two
// independent ledger entries.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenId(pub String);

impl TokenId {
    pub fn new(symbol: impl Into<String>) -> Self {
        TokenId(symbol.into())
    }

    pub fn native() -> Self {
        TokenId(NATIVE_TOKEN.to_string())
    }

    pub fn is_native(&self) -> bool {
        self.0 == NATIVE_TOKEN
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A directed messaging path between two adapters. Nonces are sequenced per path.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PathKey {
    pub source_chain_id: ChainId,
    pub sender: Address,
    pub dest_chain_id: ChainId,
    pub receiver: Address,
}

impl PathKey {
    /// String form used as a map key in persisted state.
    pub fn storage_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for PathKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{:?}->{}:{:?}",
            self.source_chain_id, self.sender, self.dest_chain_id, self.receiver
        )
    }
}

/// keccak256(nonce ‖ srcChainId ‖ sender ‖ dstChainId ‖ receiver), big-endian packed.
pub fn compute_guid(
    nonce: u64,
    source_chain_id: ChainId,
    sender: &Address,
    dest_chain_id: ChainId,
    receiver: &Address,
) -> Guid {
    let mut packed = Vec::with_capacity(8 + 4 + 20 + 4 + 20);
    packed.extend_from_slice(&nonce.to_be_bytes());
    packed.extend_from_slice(&source_chain_id.to_be_bytes());
    packed.extend_from_slice(sender.as_bytes());
    packed.extend_from_slice(&dest_chain_id.to_be_bytes());
    packed.extend_from_slice(receiver.as_bytes());
    H256::from(keccak256(packed))
}

// Cross-chain token transfer as finalized by the destination adapter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeMessage {
    pub guid: Guid,
    pub nonce: u64,
    pub source_chain_id: ChainId,
    pub dest_chain_id: ChainId,
    pub sender: Address,   // source adapter (claimed by the message)
    pub receiver: Address, // destination adapter
    pub origin: Address,   // end user that initiated the send
    pub recipient: Address,
    pub amount: Amount,
    pub compose_payload: Option<Vec<u8>>,
}

impl BridgeMessage {
    pub fn path(&self) -> PathKey {
        PathKey {
            source_chain_id: self.source_chain_id,
            sender: self.sender,
            dest_chain_id: self.dest_chain_id,
            receiver: self.receiver,
        }
    }
}

/// What the Composer should do with the funds a message delivers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComposeAction {
    /// Assets in, vault shares out.
    Deposit,
    /// Vault shares in, assets out.
    Redeem,
}

/// Instruction carried in a message's compose payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposeInstruction {
    pub action: ComposeAction,
    pub vault_id: String,
    /// Floor on the converted amount: minSharesOut for deposits, minimum assets for redeems.
    pub min_amount_out: Amount,
    pub refund_address: Address,
    pub dest_chain_id: ChainId,
    pub recipient: Address,
    #[serde(default)]
    pub outbound_options: SendOptions,
}

impl ComposeInstruction {
    pub fn encode(&self) -> Result<Vec<u8>, BridgeError> {
        serde_json::to_vec(self).map_err(|e| BridgeError::MalformedComposePayload {
            reason: e.to_string(),
        })
    }

    pub fn decode(payload: &[u8]) -> Result<Self, BridgeError> {
        serde_json::from_slice(payload).map_err(|e| BridgeError::MalformedComposePayload {
            reason: e.to_string(),
        })
    }
}

/// A message as carried by the delivery layer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    pub message: BridgeMessage,
    /// Native value the executor forwards to the recipient (compose gas budget).
    pub native_value: Amount,
    pub sent_at_block: u64,
    /// Sender-side security config in force when the packet was dispatched.
    pub send_config: SecurityConfig,
}

impl Packet {
    pub fn guid(&self) -> Guid {
        self.message.guid
    }

    pub fn path(&self) -> PathKey {
        self.message.path()
    }

    /// Digest verifiers sign over.
    pub fn hash(&self) -> H256 {
        let m = &self.message;
        let payload_hash = keccak256(m.compose_payload.as_deref().unwrap_or_default());
        let mut packed = Vec::with_capacity(32 + 8 + 4 + 4 + 20 * 4 + 16 * 2 + 32);
        packed.extend_from_slice(m.guid.as_bytes());
        packed.extend_from_slice(&m.nonce.to_be_bytes());
        packed.extend_from_slice(&m.source_chain_id.to_be_bytes());
        packed.extend_from_slice(&m.dest_chain_id.to_be_bytes());
        packed.extend_from_slice(m.sender.as_bytes());
        packed.extend_from_slice(m.receiver.as_bytes());
        packed.extend_from_slice(m.origin.as_bytes());
        packed.extend_from_slice(m.recipient.as_bytes());
        packed.extend_from_slice(&m.amount.to_be_bytes());
        packed.extend_from_slice(&self.native_value.to_be_bytes());
        packed.extend_from_slice(&payload_hash);
        packed.extend_from_slice(&self.send_config.digest());
        H256::from(keccak256(packed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u64) -> Address {
        Address::from_low_u64_be(n)
    }

    fn sample_message(amount: Amount) -> BridgeMessage {
        let guid = compute_guid(1, 30102, &addr(10), 30101, &addr(20));
        BridgeMessage {
            guid,
            nonce: 1,
            source_chain_id: 30102,
            dest_chain_id: 30101,
            sender: addr(10),
            receiver: addr(20),
            origin: addr(1),
            recipient: addr(1),
            amount,
            compose_payload: None,
        }
    }

    #[test]
    fn guid_is_deterministic_and_nonce_sensitive() {
        let a = compute_guid(1, 30102, &addr(10), 30101, &addr(20));
        let b = compute_guid(1, 30102, &addr(10), 30101, &addr(20));
        let c = compute_guid(2, 30102, &addr(10), 30101, &addr(20));
        let d = compute_guid(1, 30110, &addr(10), 30101, &addr(20));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn path_key_round_trips_message_fields() {
        let msg = sample_message(5);
        let path = msg.path();
        assert_eq!(path.source_chain_id, 30102);
        assert_eq!(path.receiver, addr(20));
        assert!(path.storage_key().starts_with("30102:0x"));
    }

    #[test]
    fn compose_instruction_decode_rejects_garbage() {
        let err = ComposeInstruction::decode(b"\x01\x02not json").unwrap_err();
        assert!(matches!(err, BridgeError::MalformedComposePayload { .. }));

        let instruction = ComposeInstruction {
            action: ComposeAction::Deposit,
            vault_id: "eagle".to_string(),
            min_amount_out: 90,
            refund_address: addr(1),
            dest_chain_id: 30102,
            recipient: addr(1),
            outbound_options: SendOptions::default(),
        };
        let decoded = ComposeInstruction::decode(&instruction.encode().unwrap()).unwrap();
        assert_eq!(decoded, instruction);
    }

    #[test]
    fn packet_hash_covers_amount() {
        let config = SecurityConfig::new(["dvn-a"], 1);
        let p1 = Packet {
            message: sample_message(5),
            native_value: 0,
            sent_at_block: 3,
            send_config: config.clone(),
        };
        let mut p2 = p1.clone();
        p2.message.amount = 6;
        assert_ne!(p1.hash(), p2.hash());
        assert_eq!(p1.hash(), p1.clone().hash());
    }

    #[test]
    fn packet_hash_covers_send_config() {
        let p1 = Packet {
            message: sample_message(5),
            native_value: 0,
            sent_at_block: 3,
            send_config: SecurityConfig::new(["dvn-a", "dvn-b"], 1),
        };
        let mut fewer = p1.clone();
        fewer.send_config = SecurityConfig::new(["dvn-a"], 1);
        let mut shallower = p1.clone();
        shallower.send_config.required_confirmations = 0;
        let optional = Packet {
            send_config: p1.send_config.clone().with_optional(["dvn-c"], 1),
            ..p1.clone()
        };
        assert_ne!(p1.hash(), fewer.hash());
        assert_ne!(p1.hash(), shallower.hash());
        assert_ne!(p1.hash(), optional.hash());
    }

    #[test]
    fn native_token_id() {
        assert!(TokenId::native().is_native());
        assert!(!TokenId::new("USD1").is_native());
        assert_eq!(TokenId::new("USD1").to_string(), "USD1");
    }
}
