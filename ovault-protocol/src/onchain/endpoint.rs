use std::collections::BTreeMap;

use ed25519_dalek::VerifyingKey;
use ethers::types::Address;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::bridge::fees::{FeeBreakdown, FeeSchedule, SendOptions};
use crate::data_structures::{compute_guid, BridgeMessage, ChainId, Packet, PathKey};
use crate::error::BridgeError;
use crate::onchain::interface::{DeliveryLayer, DispatchReceipt, OutboundRequest};
use crate::routing::security::{SecurityConfig, VerifierId};
use crate::verification::{verify_attestation, Attestation};

/// Where an inbound nonce sits relative to the path's last finalized nonce.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InboundOrder {
    /// Exactly the next nonce on the path.
    Next,
    /// Already finalized once.
    Redelivery,
}

/// A chain's view of the messaging layer: outbound nonces and outbox,
/// inbound nonce tracking and verifier keys.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Endpoint {
    chain_id: ChainId,
    treasury: Address,
    fee_schedule: FeeSchedule,
    block_number: u64,
    // Keyed by PathKey::storage_key()
    outbound_nonces: BTreeMap<String, u64>,
    inbound_nonces: BTreeMap<String, u64>,
    verifier_keys: BTreeMap<VerifierId, VerifyingKey>,
    outbox: Vec<Packet>,
}

impl Endpoint {
    pub fn new(chain_id: ChainId, treasury: Address, fee_schedule: FeeSchedule) -> Self {
        Endpoint {
            chain_id,
            treasury,
            fee_schedule,
            block_number: 0,
            outbound_nonces: BTreeMap::new(),
            inbound_nonces: BTreeMap::new(),
            verifier_keys: BTreeMap::new(),
            outbox: Vec::new(),
        }
    }

    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    pub fn fee_schedule(&self) -> &FeeSchedule {
        &self.fee_schedule
    }

    pub(crate) fn set_block_number(&mut self, block_number: u64) {
        self.block_number = block_number;
    }

    pub fn register_verifier(&mut self, id: VerifierId, key: VerifyingKey) {
        info!("Endpoint {}: registered verifier {}", self.chain_id, id);
        self.verifier_keys.insert(id, key);
    }

    pub fn verifier_keys(&self) -> &BTreeMap<VerifierId, VerifyingKey> {
        &self.verifier_keys
    }

    pub fn outbound_nonce(&self, path: &PathKey) -> u64 {
        self.outbound_nonces
            .get(&path.storage_key())
            .copied()
            .unwrap_or(0)
    }

    pub fn inbound_nonce(&self, path: &PathKey) -> u64 {
        self.inbound_nonces
            .get(&path.storage_key())
            .copied()
            .unwrap_or(0)
    }

    pub fn outbox_len(&self) -> usize {
        self.outbox.len()
    }

    pub fn drain_outbox(&mut self) -> Vec<Packet> {
        std::mem::take(&mut self.outbox)
    }

    /// Checks that sender and receiver agree on security config and that
    /// enough valid attestations with enough confirmations are present.
    ///
    /// The advertised send config is covered by the packet hash, so it is only
    /// compared once at least one registered verifier has signed this packet.
    pub fn verify(
        &self,
        packet: &Packet,
        receive_config: &SecurityConfig,
        attestations: &[Attestation],
    ) -> Result<(), BridgeError> {
        let path = packet.path().storage_key();
        let attested = self.valid_attestations(packet, attestations);
        if !attested.is_empty() {
            if let Some(detail) = packet.send_config.mismatch(receive_config) {
                return Err(BridgeError::SecurityConfigMismatch { path, detail });
            }
        }
        receive_config.check_quorum(&path, &attested)
    }

    fn valid_attestations(
        &self,
        packet: &Packet,
        attestations: &[Attestation],
    ) -> BTreeMap<VerifierId, u64> {
        let mut attested: BTreeMap<VerifierId, u64> = BTreeMap::new();
        for att in attestations {
            match self.verifier_keys.get(&att.verifier) {
                Some(key) if verify_attestation(att, packet, key) => {
                    let seen = attested.entry(att.verifier.clone()).or_insert(0);
                    *seen = (*seen).max(att.confirmations);
                }
                Some(_) => warn!(
                    "Endpoint {}: invalid attestation from {} for {:?}",
                    self.chain_id,
                    att.verifier,
                    packet.guid()
                ),
                None => debug!(
                    "Endpoint {}: ignoring attestation from unregistered verifier {}",
                    self.chain_id, att.verifier
                ),
            }
        }
        attested
    }

    /// Per-path ordering: only the next nonce finalizes, earlier ones are
    /// redeliveries, later ones wait.
    pub fn check_order(&self, path: &PathKey, nonce: u64) -> Result<InboundOrder, BridgeError> {
        let last = self.inbound_nonce(path);
        if nonce <= last {
            Ok(InboundOrder::Redelivery)
        } else if nonce == last + 1 {
            Ok(InboundOrder::Next)
        } else {
            Err(BridgeError::OutOfOrder {
                path: path.storage_key(),
                expected: last + 1,
                got: nonce,
            })
        }
    }

    pub fn commit_inbound(&mut self, path: &PathKey, nonce: u64) {
        self.inbound_nonces.insert(path.storage_key(), nonce);
    }
}

impl DeliveryLayer for Endpoint {
    fn estimate_fee(
        &self,
        dest_chain_id: ChainId,
        payload_size: usize,
        security: &SecurityConfig,
        options: &SendOptions,
    ) -> Result<FeeBreakdown, BridgeError> {
        let fee = self
            .fee_schedule
            .estimate(payload_size, security.paid_verifier_count(), options)?;
        debug!(
            "Endpoint {}: fee to {} for {} payload bytes: {:?}",
            self.chain_id, dest_chain_id, payload_size, fee
        );
        Ok(fee)
    }

    fn dispatch(&mut self, request: OutboundRequest) -> Result<DispatchReceipt, BridgeError> {
        let path = PathKey {
            source_chain_id: self.chain_id,
            sender: request.sender,
            dest_chain_id: request.dest_chain_id,
            receiver: request.receiver,
        };
        let nonce = self.outbound_nonce(&path) + 1;
        let guid = compute_guid(
            nonce,
            self.chain_id,
            &request.sender,
            request.dest_chain_id,
            &request.receiver,
        );
        let packet = Packet {
            message: BridgeMessage {
                guid,
                nonce,
                source_chain_id: self.chain_id,
                dest_chain_id: request.dest_chain_id,
                sender: request.sender,
                receiver: request.receiver,
                origin: request.origin,
                recipient: request.recipient,
                amount: request.amount,
                compose_payload: request.compose_payload,
            },
            native_value: request.native_value,
            sent_at_block: self.block_number,
            send_config: request.send_config,
        };
        self.outbound_nonces.insert(path.storage_key(), nonce);
        self.outbox.push(packet);
        info!(
            "Endpoint {}: dispatched {:?} (nonce {}) on {}",
            self.chain_id, guid, nonce, path
        );
        Ok(DispatchReceipt { guid, nonce })
    }

    fn fee_collector(&self) -> Address {
        self.treasury
    }
}
