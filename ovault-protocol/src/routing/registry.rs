use std::collections::BTreeMap;

use ethers::types::Address;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::bridge::fees::SendOptions;
use crate::data_structures::ChainId;
use crate::error::BridgeError;
use crate::routing::security::SecurityConfig;

/// Per-remote-chain entry of an adapter's route table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainRoute {
    pub local_chain_id: ChainId,
    pub remote_chain_id: ChainId,
    /// Trusted peer adapter on the remote chain.
    pub remote_address: Option<Address>,
    pub security_config: Option<SecurityConfig>,
    #[serde(default)]
    pub enforced_options: SendOptions,
}

impl ChainRoute {
    fn empty(local_chain_id: ChainId, remote_chain_id: ChainId) -> Self {
        ChainRoute {
            local_chain_id,
            remote_chain_id,
            remote_address: None,
            security_config: None,
            enforced_options: SendOptions::default(),
        }
    }
}

/// Emitted for every privileged registry mutation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteChange {
    RouteSet {
        remote_chain_id: ChainId,
        previous: Option<Address>,
        remote_address: Address,
    },
    RouteRemoved {
        remote_chain_id: ChainId,
        previous: Address,
    },
    SecurityConfigSet {
        remote_chain_id: ChainId,
        config: SecurityConfig,
    },
    EnforcedOptionsSet {
        remote_chain_id: ChainId,
        options: SendOptions,
    },
}

/// Outbound view of a configured route.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundRoute {
    pub peer: Address,
    pub security_config: SecurityConfig,
    pub enforced_options: SendOptions,
}

/// Route table of one adapter. Only the owner may mutate it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRegistry {
    local_chain_id: ChainId,
    owner: Address,
    routes: BTreeMap<ChainId, ChainRoute>,
}

impl RouteRegistry {
    pub fn new(local_chain_id: ChainId, owner: Address) -> Self {
        RouteRegistry {
            local_chain_id,
            owner,
            routes: BTreeMap::new(),
        }
    }

    pub fn local_chain_id(&self) -> ChainId {
        self.local_chain_id
    }

    pub fn owner(&self) -> Address {
        self.owner
    }

    pub fn ensure_owner(&self, caller: Address, action: &str) -> Result<(), BridgeError> {
        if caller != self.owner {
            warn!(
                "Chain {}: {:?} attempted '{}' without ownership",
                self.local_chain_id, caller, action
            );
            return Err(BridgeError::Unauthorized {
                caller,
                action: action.to_string(),
            });
        }
        Ok(())
    }

    pub fn set_route(
        &mut self,
        caller: Address,
        remote_chain_id: ChainId,
        remote_address: Address,
    ) -> Result<RouteChange, BridgeError> {
        self.ensure_owner(caller, "set route")?;
        if remote_address.is_zero() {
            return Err(BridgeError::InvalidConfig {
                reason: format!("zero peer address for remote chain {}", remote_chain_id),
            });
        }
        if remote_chain_id == self.local_chain_id {
            return Err(BridgeError::InvalidConfig {
                reason: format!("route from chain {} to itself", remote_chain_id),
            });
        }
        let local = self.local_chain_id;
        let route = self
            .routes
            .entry(remote_chain_id)
            .or_insert_with(|| ChainRoute::empty(local, remote_chain_id));
        let previous = route.remote_address.replace(remote_address);
        info!(
            "Chain {}: route to {} set to {:?} (was {:?})",
            local, remote_chain_id, remote_address, previous
        );
        Ok(RouteChange::RouteSet {
            remote_chain_id,
            previous,
            remote_address,
        })
    }

    /// Clears the peer address. Security config and enforced options stay so the
    /// route can be re-enabled without reconfiguring them.
    pub fn remove_route(
        &mut self,
        caller: Address,
        remote_chain_id: ChainId,
    ) -> Result<RouteChange, BridgeError> {
        self.ensure_owner(caller, "remove route")?;
        let previous = self
            .routes
            .get_mut(&remote_chain_id)
            .and_then(|r| r.remote_address.take())
            .ok_or(BridgeError::NoRoute {
                local_chain_id: self.local_chain_id,
                remote_chain_id,
            })?;
        info!(
            "Chain {}: route to {} removed (was {:?})",
            self.local_chain_id, remote_chain_id, previous
        );
        Ok(RouteChange::RouteRemoved {
            remote_chain_id,
            previous,
        })
    }

    pub fn set_security_config(
        &mut self,
        caller: Address,
        remote_chain_id: ChainId,
        config: SecurityConfig,
    ) -> Result<RouteChange, BridgeError> {
        self.ensure_owner(caller, "set security config")?;
        config.validate()?;
        let local = self.local_chain_id;
        let route = self
            .routes
            .entry(remote_chain_id)
            .or_insert_with(|| ChainRoute::empty(local, remote_chain_id));
        route.security_config = Some(config.clone());
        info!(
            "Chain {}: security config for {} set ({} required verifiers, {} confirmations)",
            local,
            remote_chain_id,
            config.required_verifiers.len(),
            config.required_confirmations
        );
        Ok(RouteChange::SecurityConfigSet {
            remote_chain_id,
            config,
        })
    }

    pub fn set_enforced_options(
        &mut self,
        caller: Address,
        remote_chain_id: ChainId,
        options: SendOptions,
    ) -> Result<RouteChange, BridgeError> {
        self.ensure_owner(caller, "set enforced options")?;
        let local = self.local_chain_id;
        let route = self
            .routes
            .entry(remote_chain_id)
            .or_insert_with(|| ChainRoute::empty(local, remote_chain_id));
        route.enforced_options = options;
        Ok(RouteChange::EnforcedOptionsSet {
            remote_chain_id,
            options,
        })
    }

    pub fn route(&self, remote_chain_id: ChainId) -> Option<&ChainRoute> {
        self.routes.get(&remote_chain_id)
    }

    pub fn routes(&self) -> impl Iterator<Item = &ChainRoute> {
        self.routes.values()
    }

    /// Configured peer for `remote_chain_id`, or NoRoute.
    pub fn get_route(&self, remote_chain_id: ChainId) -> Result<Address, BridgeError> {
        self.routes
            .get(&remote_chain_id)
            .and_then(|r| r.remote_address)
            .ok_or(BridgeError::NoRoute {
                local_chain_id: self.local_chain_id,
                remote_chain_id,
            })
    }

    pub fn security_config(&self, remote_chain_id: ChainId) -> Result<&SecurityConfig, BridgeError> {
        self.routes
            .get(&remote_chain_id)
            .and_then(|r| r.security_config.as_ref())
            .ok_or(BridgeError::SecurityConfigMissing {
                local_chain_id: self.local_chain_id,
                remote_chain_id,
            })
    }

    /// Gate applied to every inbound message before anything is finalized.
    /// Returns the receive-side security config for the source chain.
    pub fn check_inbound(
        &self,
        source_chain_id: ChainId,
        claimed_sender: Address,
    ) -> Result<&SecurityConfig, BridgeError> {
        let expected = self.get_route(source_chain_id)?;
        if expected != claimed_sender {
            return Err(BridgeError::SenderMismatch {
                remote_chain_id: source_chain_id,
                expected,
                got: claimed_sender,
            });
        }
        self.security_config(source_chain_id)
    }

    /// Everything needed to send toward `dest_chain_id`.
    pub fn outbound(&self, dest_chain_id: ChainId) -> Result<OutboundRoute, BridgeError> {
        let peer = self.get_route(dest_chain_id)?;
        let security_config = self.security_config(dest_chain_id)?.clone();
        let enforced_options = self
            .routes
            .get(&dest_chain_id)
            .map(|r| r.enforced_options)
            .unwrap_or_default();
        Ok(OutboundRoute {
            peer,
            security_config,
            enforced_options,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> Address {
        Address::from_low_u64_be(0xA0)
    }

    fn peer() -> Address {
        Address::from_low_u64_be(0xB1)
    }

    #[test]
    fn set_and_get_route() {
        let mut reg = RouteRegistry::new(30101, owner());
        assert!(matches!(
            reg.get_route(30102),
            Err(BridgeError::NoRoute { remote_chain_id: 30102, .. })
        ));

        let change = reg.set_route(owner(), 30102, peer()).unwrap();
        assert_eq!(
            change,
            RouteChange::RouteSet {
                remote_chain_id: 30102,
                previous: None,
                remote_address: peer()
            }
        );
        assert_eq!(reg.get_route(30102).unwrap(), peer());

        // Overwrite reports the previous peer
        let other = Address::from_low_u64_be(0xB2);
        match reg.set_route(owner(), 30102, other).unwrap() {
            RouteChange::RouteSet { previous, .. } => assert_eq!(previous, Some(peer())),
            c => panic!("unexpected change {:?}", c),
        }
    }

    #[test]
    fn non_owner_cannot_mutate() {
        let mut reg = RouteRegistry::new(30101, owner());
        let stranger = Address::from_low_u64_be(0xEE);
        assert!(matches!(
            reg.set_route(stranger, 30102, peer()),
            Err(BridgeError::Unauthorized { .. })
        ));
        assert!(reg
            .set_security_config(stranger, 30102, SecurityConfig::new(["lz-labs"], 1))
            .is_err());
        assert!(reg.route(30102).is_none());
    }

    #[test]
    fn inbound_checks_route_sender_then_config() {
        let mut reg = RouteRegistry::new(30101, owner());
        assert!(matches!(
            reg.check_inbound(30102, peer()),
            Err(BridgeError::NoRoute { .. })
        ));

        reg.set_route(owner(), 30102, peer()).unwrap();
        assert!(matches!(
            reg.check_inbound(30102, Address::from_low_u64_be(0x99)),
            Err(BridgeError::SenderMismatch { .. })
        ));
        assert!(matches!(
            reg.check_inbound(30102, peer()),
            Err(BridgeError::SecurityConfigMissing { .. })
        ));

        reg.set_security_config(owner(), 30102, SecurityConfig::new(["lz-labs"], 1))
            .unwrap();
        assert!(reg.check_inbound(30102, peer()).is_ok());
    }

    #[test]
    fn remove_route_keeps_security_config() {
        let mut reg = RouteRegistry::new(30101, owner());
        reg.set_route(owner(), 30102, peer()).unwrap();
        reg.set_security_config(owner(), 30102, SecurityConfig::new(["lz-labs"], 1))
            .unwrap();

        reg.remove_route(owner(), 30102).unwrap();
        assert!(reg.get_route(30102).is_err());
        assert!(reg.security_config(30102).is_ok());
        assert!(matches!(
            reg.remove_route(owner(), 30102),
            Err(BridgeError::NoRoute { .. })
        ));
    }

    #[test]
    fn invalid_security_config_is_refused() {
        let mut reg = RouteRegistry::new(30101, owner());
        let err = reg
            .set_security_config(owner(), 30102, SecurityConfig::default())
            .unwrap_err();
        assert!(matches!(err, BridgeError::InvalidSecurityConfig { .. }));
    }

    #[test]
    fn outbound_merges_enforced_options() {
        let mut reg = RouteRegistry::new(30101, owner());
        reg.set_route(owner(), 30102, peer()).unwrap();
        assert!(matches!(
            reg.outbound(30102),
            Err(BridgeError::SecurityConfigMissing { .. })
        ));
        reg.set_security_config(owner(), 30102, SecurityConfig::new(["lz-labs"], 1))
            .unwrap();
        let enforced = SendOptions {
            executor_gas: 80_000,
            compose_gas: 0,
            compose_value: 0,
        };
        reg.set_enforced_options(owner(), 30102, enforced).unwrap();
        let out = reg.outbound(30102).unwrap();
        assert_eq!(out.peer, peer());
        assert_eq!(out.enforced_options.executor_gas, 80_000);
    }
}
