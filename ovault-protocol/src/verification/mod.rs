pub mod attestation;

use std::collections::BTreeMap;

use crate::data_structures::Packet;
use crate::routing::security::VerifierId;

pub use attestation::{verify_attestation, Attestation, Verifier};

/// All verifiers known to a deployment.
#[derive(Clone, Debug, Default)]
pub struct VerifierSet {
    verifiers: BTreeMap<VerifierId, Verifier>,
}

impl VerifierSet {
    pub fn new(ids: impl IntoIterator<Item = VerifierId>) -> Self {
        VerifierSet {
            verifiers: ids
                .into_iter()
                .map(|id| (id.clone(), Verifier::from_id(id)))
                .collect(),
        }
    }

    pub fn get(&self, id: &VerifierId) -> Option<&Verifier> {
        self.verifiers.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Verifier> {
        self.verifiers.values()
    }

    /// Attestations from every verifier the sender's config names.
    /// Verifiers unknown to this set simply don't attest.
    pub fn attest(&self, packet: &Packet, confirmations: u64) -> Vec<Attestation> {
        packet
            .send_config
            .attesters()
            .filter_map(|id| self.verifiers.get(id))
            .map(|v| v.attest(packet, confirmations))
            .collect()
    }
}
