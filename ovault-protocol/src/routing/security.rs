use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use ethers::utils::keccak256;
use serde::{Deserialize, Serialize};

use crate::error::BridgeError;

/// Identifier of an off-chain verifier (DVN).
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VerifierId(pub String);

impl VerifierId {
    pub fn new(id: impl Into<String>) -> Self {
        VerifierId(id.into())
    }
}

impl fmt::Display for VerifierId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Verifier and confirmation requirements for one remote chain.
///
/// The same config is used as the send-side config toward the remote chain and
/// as the receive-side config for packets coming from it. A packet only
/// finalizes when the sender's config (carried in the packet) agrees with the
/// receiver's.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub required_verifiers: BTreeSet<VerifierId>,
    pub required_confirmations: u64,
    #[serde(default)]
    pub optional_verifiers: BTreeSet<VerifierId>,
    #[serde(default)]
    pub optional_threshold: usize,
}

impl SecurityConfig {
    pub fn new<'a>(required: impl IntoIterator<Item = &'a str>, confirmations: u64) -> Self {
        SecurityConfig {
            required_verifiers: required.into_iter().map(VerifierId::new).collect(),
            required_confirmations: confirmations,
            optional_verifiers: BTreeSet::new(),
            optional_threshold: 0,
        }
    }

    pub fn with_optional<'a>(
        mut self,
        optional: impl IntoIterator<Item = &'a str>,
        threshold: usize,
    ) -> Self {
        self.optional_verifiers = optional.into_iter().map(VerifierId::new).collect();
        self.optional_threshold = threshold;
        self
    }

    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.required_verifiers.is_empty() {
            return Err(BridgeError::InvalidSecurityConfig {
                reason: "required verifier set is empty".to_string(),
            });
        }
        if self.optional_threshold > self.optional_verifiers.len() {
            return Err(BridgeError::InvalidSecurityConfig {
                reason: format!(
                    "optional threshold {} exceeds {} optional verifiers",
                    self.optional_threshold,
                    self.optional_verifiers.len()
                ),
            });
        }
        if !self.optional_verifiers.is_empty() && self.optional_threshold == 0 {
            return Err(BridgeError::InvalidSecurityConfig {
                reason: "optional verifiers configured with a zero threshold".to_string(),
            });
        }
        if let Some(dup) = self
            .required_verifiers
            .intersection(&self.optional_verifiers)
            .next()
        {
            return Err(BridgeError::InvalidSecurityConfig {
                reason: format!("verifier {} is both required and optional", dup),
            });
        }
        Ok(())
    }

    /// Every verifier that may attest under this config.
    pub fn attesters(&self) -> impl Iterator<Item = &VerifierId> {
        self.required_verifiers
            .iter()
            .chain(self.optional_verifiers.iter())
    }

    /// keccak256 over confirmations, both verifier sets (length-prefixed ids)
    /// and the optional threshold.
    pub fn digest(&self) -> [u8; 32] {
        fn push_set(packed: &mut Vec<u8>, set: &BTreeSet<VerifierId>) {
            packed.extend_from_slice(&(set.len() as u64).to_be_bytes());
            for id in set {
                packed.extend_from_slice(&(id.0.len() as u64).to_be_bytes());
                packed.extend_from_slice(id.0.as_bytes());
            }
        }
        let mut packed = Vec::new();
        packed.extend_from_slice(&self.required_confirmations.to_be_bytes());
        push_set(&mut packed, &self.required_verifiers);
        push_set(&mut packed, &self.optional_verifiers);
        packed.extend_from_slice(&(self.optional_threshold as u64).to_be_bytes());
        keccak256(packed)
    }

    /// Number of verifiers the sender pays for.
    pub fn paid_verifier_count(&self) -> usize {
        self.required_verifiers.len() + self.optional_threshold
    }

    /// Describes how `receive` differs from this (send-side) config, if at all.
    pub fn mismatch(&self, receive: &SecurityConfig) -> Option<String> {
        if self == receive {
            return None;
        }
        let mut diffs = Vec::new();
        if self.required_verifiers != receive.required_verifiers {
            diffs.push(format!(
                "required verifiers send={:?} receive={:?}",
                names(&self.required_verifiers),
                names(&receive.required_verifiers)
            ));
        }
        if self.required_confirmations != receive.required_confirmations {
            diffs.push(format!(
                "confirmations send={} receive={}",
                self.required_confirmations, receive.required_confirmations
            ));
        }
        if self.optional_verifiers != receive.optional_verifiers
            || self.optional_threshold != receive.optional_threshold
        {
            diffs.push(format!(
                "optional verifiers send={:?}/{} receive={:?}/{}",
                names(&self.optional_verifiers),
                self.optional_threshold,
                names(&receive.optional_verifiers),
                receive.optional_threshold
            ));
        }
        Some(diffs.join("; "))
    }

    /// Checks collected attestations (verifier -> observed confirmations) against quorum.
    pub fn check_quorum(
        &self,
        path: &str,
        attested: &BTreeMap<VerifierId, u64>,
    ) -> Result<(), BridgeError> {
        let confirmed = |id: &VerifierId| {
            attested
                .get(id)
                .map_or(false, |c| *c >= self.required_confirmations)
        };

        let mut missing: Vec<VerifierId> = self
            .required_verifiers
            .iter()
            .filter(|id| !confirmed(id))
            .cloned()
            .collect();

        let optional_ok = self.optional_verifiers.iter().filter(|id| confirmed(id)).count();
        if optional_ok < self.optional_threshold {
            missing.extend(
                self.optional_verifiers
                    .iter()
                    .filter(|id| !confirmed(id))
                    .cloned(),
            );
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(BridgeError::VerificationPending {
                path: path.to_string(),
                missing,
            })
        }
    }
}

fn names(set: &BTreeSet<VerifierId>) -> Vec<&str> {
    set.iter().map(|v| v.0.as_str()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_empty_required_set() {
        let cfg = SecurityConfig::new(Vec::<&str>::new(), 1);
        assert!(matches!(
            cfg.validate(),
            Err(BridgeError::InvalidSecurityConfig { .. })
        ));
    }

    #[test]
    fn validate_checks_optional_threshold() {
        let too_high = SecurityConfig::new(["lz-labs"], 1).with_optional(["nethermind"], 2);
        assert!(too_high.validate().is_err());

        let overlap = SecurityConfig::new(["lz-labs"], 1).with_optional(["lz-labs"], 1);
        assert!(overlap.validate().is_err());

        let ok = SecurityConfig::new(["lz-labs"], 1).with_optional(["nethermind", "horizen"], 1);
        assert!(ok.validate().is_ok());
        assert_eq!(ok.paid_verifier_count(), 2);
    }

    #[test]
    fn mismatch_reports_each_difference() {
        let send = SecurityConfig::new(["lz-labs"], 1);
        let receive = SecurityConfig::new(["lz-labs", "google-cloud"], 15);
        assert!(send.mismatch(&send.clone()).is_none());

        let detail = send.mismatch(&receive).unwrap();
        assert!(detail.contains("required verifiers"));
        assert!(detail.contains("confirmations send=1 receive=15"));
    }

    #[test]
    fn quorum_needs_every_required_verifier() {
        let cfg = SecurityConfig::new(["lz-labs", "google-cloud"], 2);
        let mut attested = BTreeMap::new();
        attested.insert(VerifierId::new("lz-labs"), 2);
        attested.insert(VerifierId::new("google-cloud"), 1);

        match cfg.check_quorum("p", &attested) {
            Err(BridgeError::VerificationPending { missing, .. }) => {
                assert_eq!(missing, vec![VerifierId::new("google-cloud")]);
            }
            other => panic!("expected pending verification, got {:?}", other),
        }

        attested.insert(VerifierId::new("google-cloud"), 3);
        assert!(cfg.check_quorum("p", &attested).is_ok());
    }

    #[test]
    fn quorum_counts_optional_threshold() {
        let cfg = SecurityConfig::new(["lz-labs"], 0).with_optional(["a", "b", "c"], 2);
        let mut attested = BTreeMap::new();
        attested.insert(VerifierId::new("lz-labs"), 0);
        attested.insert(VerifierId::new("a"), 0);
        assert!(cfg.check_quorum("p", &attested).is_err());
        attested.insert(VerifierId::new("c"), 0);
        assert!(cfg.check_quorum("p", &attested).is_ok());
    }
}
