// ovault-protocol/src/verification/attestation.rs

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier as _, VerifyingKey};
use ethers::types::H256;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::data_structures::Packet;
use crate::routing::security::VerifierId;

/// A verifier's signed statement that it has seen `packet_hash` with the given
/// number of confirmations on the source chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attestation {
    pub verifier: VerifierId,
    pub packet_hash: H256,
    pub confirmations: u64,
    pub signature: Signature,
}

/// Bytes covered by an attestation signature.
pub fn attestation_message(packet_hash: &H256, confirmations: u64) -> Vec<u8> {
    let mut msg = Vec::with_capacity(32 + 8);
    msg.extend_from_slice(packet_hash.as_bytes());
    msg.extend_from_slice(&confirmations.to_be_bytes());
    msg
}

/// Off-chain verifier (DVN) holding an ed25519 key.
#[derive(Clone, Debug)]
pub struct Verifier {
    id: VerifierId,
    signing_key: SigningKey,
}

impl Verifier {
    /// Deterministic key derived from SHA-256 of the verifier id, so every
    /// process building the same deployment agrees on verifier keys.
    pub fn from_id(id: VerifierId) -> Self {
        let seed: [u8; 32] = Sha256::digest(id.0.as_bytes()).into();
        Verifier {
            id,
            signing_key: SigningKey::from_bytes(&seed),
        }
    }

    pub fn id(&self) -> &VerifierId {
        &self.id
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn attest(&self, packet: &Packet, confirmations: u64) -> Attestation {
        let packet_hash = packet.hash();
        let signature = self
            .signing_key
            .sign(&attestation_message(&packet_hash, confirmations));
        Attestation {
            verifier: self.id.clone(),
            packet_hash,
            confirmations,
            signature,
        }
    }
}

/// Checks the signature and that it covers this exact packet.
pub fn verify_attestation(attestation: &Attestation, packet: &Packet, key: &VerifyingKey) -> bool {
    if attestation.packet_hash != packet.hash() {
        return false;
    }
    let msg = attestation_message(&attestation.packet_hash, attestation.confirmations);
    key.verify(&msg, &attestation.signature).is_ok()
}
