// Static readiness check for one direction of a bridge path

use std::collections::BTreeMap;
use std::fmt;

use ed25519_dalek::VerifyingKey;
use ethers::types::Address;
use serde::{Deserialize, Serialize};

use crate::routing::registry::RouteRegistry;
use crate::routing::security::VerifierId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PathSide {
    Source,
    Destination,
}

/// First problem found on a path, or `Ready`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PathStatus {
    Ready,
    NoRoute {
        side: PathSide,
    },
    PeerMismatch {
        side: PathSide,
        expected: Address,
        configured: Address,
    },
    SecurityConfigMissing {
        side: PathSide,
    },
    SecurityConfigMismatch {
        detail: String,
    },
    UnknownVerifier {
        side: PathSide,
        verifier: VerifierId,
    },
}

impl PathStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, PathStatus::Ready)
    }
}

impl fmt::Display for PathStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathStatus::Ready => write!(f, "ready"),
            PathStatus::NoRoute { side } => write!(f, "{:?} has no route", side),
            PathStatus::PeerMismatch {
                side,
                expected,
                configured,
            } => write!(
                f,
                "{:?} peer is {:?}, expected {:?}",
                side, configured, expected
            ),
            PathStatus::SecurityConfigMissing { side } => {
                write!(f, "{:?} has no security config", side)
            }
            PathStatus::SecurityConfigMismatch { detail } => {
                write!(f, "security configs disagree: {}", detail)
            }
            PathStatus::UnknownVerifier { side, verifier } => {
                write!(f, "{:?} endpoint does not know verifier {}", side, verifier)
            }
        }
    }
}

/// One adapter at one end of a path.
#[derive(Clone, Copy, Debug)]
pub struct PathEnd<'a> {
    pub address: Address,
    pub routes: &'a RouteRegistry,
}

/// Checks everything a packet from `source` to `destination` needs to finalize:
/// both routes point at each other, both sides carry a security config, the
/// configs agree, and the destination endpoint knows every verifier it waits on.
pub fn diagnose_path(
    source: PathEnd<'_>,
    destination: PathEnd<'_>,
    destination_verifiers: &BTreeMap<VerifierId, VerifyingKey>,
) -> PathStatus {
    let src_chain = source.routes.local_chain_id();
    let dst_chain = destination.routes.local_chain_id();

    let ends = [
        (PathSide::Source, source, dst_chain, destination.address),
        (PathSide::Destination, destination, src_chain, source.address),
    ];
    for (side, end, remote, expected) in ends {
        match end.routes.route(remote).and_then(|r| r.remote_address) {
            None => return PathStatus::NoRoute { side },
            Some(configured) if configured != expected => {
                return PathStatus::PeerMismatch {
                    side,
                    expected,
                    configured,
                }
            }
            Some(_) => {}
        }
    }

    let send_config = match source.routes.security_config(dst_chain) {
        Ok(config) => config,
        Err(_) => {
            return PathStatus::SecurityConfigMissing {
                side: PathSide::Source,
            }
        }
    };
    let receive_config = match destination.routes.security_config(src_chain) {
        Ok(config) => config,
        Err(_) => {
            return PathStatus::SecurityConfigMissing {
                side: PathSide::Destination,
            }
        }
    };
    if let Some(detail) = send_config.mismatch(receive_config) {
        return PathStatus::SecurityConfigMismatch { detail };
    }
    if let Some(verifier) = receive_config
        .attesters()
        .find(|id| !destination_verifiers.contains_key(*id))
    {
        return PathStatus::UnknownVerifier {
            side: PathSide::Destination,
            verifier: verifier.clone(),
        };
    }
    PathStatus::Ready
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::security::SecurityConfig;
    use crate::verification::Verifier;

    fn addr(n: u64) -> Address {
        Address::from_low_u64_be(n)
    }

    fn registries(config: SecurityConfig) -> (RouteRegistry, RouteRegistry) {
        let owner = addr(0xA0);
        let mut hub = RouteRegistry::new(30101, owner);
        let mut spoke = RouteRegistry::new(30102, owner);
        hub.set_route(owner, 30102, addr(0x21)).unwrap();
        hub.set_security_config(owner, 30102, config.clone()).unwrap();
        spoke.set_route(owner, 30101, addr(0x11)).unwrap();
        spoke.set_security_config(owner, 30101, config).unwrap();
        (hub, spoke)
    }

    fn keys(ids: &[&str]) -> BTreeMap<VerifierId, VerifyingKey> {
        ids.iter()
            .map(|id| {
                let v = Verifier::from_id(VerifierId::new(*id));
                (v.id().clone(), v.verifying_key())
            })
            .collect()
    }

    #[test]
    fn consistent_path_is_ready() {
        let (hub, spoke) = registries(SecurityConfig::new(["lz-labs", "google-cloud"], 1));
        let status = diagnose_path(
            PathEnd { address: addr(0x21), routes: &spoke },
            PathEnd { address: addr(0x11), routes: &hub },
            &keys(&["lz-labs", "google-cloud"]),
        );
        assert!(status.is_ready(), "{}", status);
    }

    #[test]
    fn reports_first_problem() {
        let (mut hub, spoke) = registries(SecurityConfig::new(["lz-labs"], 1));
        let verifiers = keys(&["lz-labs"]);
        let src = PathEnd { address: addr(0x21), routes: &spoke };

        let status = diagnose_path(src, PathEnd { address: addr(0x99), routes: &hub }, &verifiers);
        assert_eq!(
            status,
            PathStatus::PeerMismatch {
                side: PathSide::Source,
                expected: addr(0x99),
                configured: addr(0x11)
            }
        );

        hub.set_security_config(addr(0xA0), 30102, SecurityConfig::new(["lz-labs", "google-cloud"], 1))
            .unwrap();
        let status = diagnose_path(src, PathEnd { address: addr(0x11), routes: &hub }, &verifiers);
        assert!(matches!(status, PathStatus::SecurityConfigMismatch { .. }));

        hub.remove_route(addr(0xA0), 30102).unwrap();
        let status = diagnose_path(src, PathEnd { address: addr(0x11), routes: &hub }, &verifiers);
        assert_eq!(status, PathStatus::NoRoute { side: PathSide::Destination });
    }

    #[test]
    fn unknown_destination_verifier() {
        let (hub, spoke) = registries(SecurityConfig::new(["lz-labs", "nethermind"], 1));
        let status = diagnose_path(
            PathEnd { address: addr(0x21), routes: &spoke },
            PathEnd { address: addr(0x11), routes: &hub },
            &keys(&["lz-labs"]),
        );
        assert_eq!(
            status,
            PathStatus::UnknownVerifier {
                side: PathSide::Destination,
                verifier: VerifierId::new("nethermind")
            }
        );
    }
}
