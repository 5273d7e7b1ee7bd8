use std::collections::BTreeSet;
use std::path::Path;

use ethers::types::Address;
use serde::{Deserialize, Serialize};

use crate::bridge::adapter::{AdapterKind, AdapterSettings};
use crate::bridge::fees::{FeeSchedule, SendOptions, SlippageMode};
use crate::data_structures::{Amount, ChainId, TokenId};
use crate::error::BridgeError;
use crate::routing::security::{SecurityConfig, VerifierId};

/// Deployment configs with a different version are refused.
pub const CONFIG_VERSION: u32 = 1;

/// One bridge adapter on one chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterConfig {
    pub address: Address,
    pub token: TokenId,
    pub kind: AdapterKind,
    #[serde(default)]
    pub fee_bps: u16,
    #[serde(default)]
    pub fee_recipient: Option<Address>,
    #[serde(default = "default_conversion_rate")]
    pub decimal_conversion_rate: Amount,
}

fn default_conversion_rate() -> Amount {
    1
}

impl AdapterConfig {
    pub fn settings(&self, treasury: Address, slippage_mode: SlippageMode) -> AdapterSettings {
        AdapterSettings {
            fee_bps: self.fee_bps,
            fee_recipient: self.fee_recipient.unwrap_or(treasury),
            decimal_conversion_rate: self.decimal_conversion_rate,
            slippage_mode,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    pub chain_id: ChainId,
    pub name: String,
    pub admin: Address,
    /// Receives native messaging fees.
    pub treasury: Address,
    pub asset_adapter: AdapterConfig,
    pub share_adapter: AdapterConfig,
}

/// The vault and its Composer, deployed on the hub chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultConfig {
    pub vault_id: String,
    pub vault_address: Address,
    pub composer_address: Address,
    pub asset: TokenId,
    pub share: TokenId,
    /// Deposited by the hub admin at deployment; dead shares stay with the admin.
    #[serde(default)]
    pub seed_assets: Amount,
}

/// Route plus security settings for one directed pair of chains.
/// A usable path needs a connection in each direction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub from: ChainId,
    pub to: ChainId,
    pub security: SecurityConfig,
    #[serde(default)]
    pub enforced_options: SendOptions,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisBalance {
    pub chain_id: ChainId,
    pub token: TokenId,
    pub account: Address,
    pub amount: Amount,
}

/// Everything needed to stand up a deployment; replaces per-script addresses.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentConfig {
    pub version: u32,
    pub hub_chain_id: ChainId,
    pub chains: Vec<ChainConfig>,
    pub vault: VaultConfig,
    pub verifiers: Vec<VerifierId>,
    pub connections: Vec<ConnectionConfig>,
    #[serde(default)]
    pub fees: FeeSchedule,
    #[serde(default)]
    pub slippage_mode: SlippageMode,
    #[serde(default)]
    pub genesis: Vec<GenesisBalance>,
}

impl DeploymentConfig {
    pub fn from_json_str(json: &str) -> Result<Self, BridgeError> {
        let config: DeploymentConfig =
            serde_json::from_str(json).map_err(|e| BridgeError::InvalidConfig {
                reason: format!("deployment config: {}", e),
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, BridgeError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn to_json_pretty(&self) -> Result<String, BridgeError> {
        serde_json::to_string_pretty(self).map_err(|e| BridgeError::InvalidConfig {
            reason: format!("deployment config: {}", e),
        })
    }

    pub fn chain(&self, chain_id: ChainId) -> Result<&ChainConfig, BridgeError> {
        self.chains
            .iter()
            .find(|c| c.chain_id == chain_id)
            .ok_or(BridgeError::UnknownChain { chain_id })
    }

    /// Adds a connection in each direction with the same settings.
    pub fn connect_bidirectional(
        &mut self,
        a: ChainId,
        b: ChainId,
        security: SecurityConfig,
        enforced_options: SendOptions,
    ) {
        for (from, to) in [(a, b), (b, a)] {
            self.connections.push(ConnectionConfig {
                from,
                to,
                security: security.clone(),
                enforced_options,
            });
        }
    }

    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.version != CONFIG_VERSION {
            return Err(invalid(format!(
                "config version {} (expected {})",
                self.version, CONFIG_VERSION
            )));
        }

        let mut chain_ids = BTreeSet::new();
        for chain in &self.chains {
            if !chain_ids.insert(chain.chain_id) {
                return Err(invalid(format!("chain {} defined twice", chain.chain_id)));
            }
            if chain.asset_adapter.address == chain.share_adapter.address {
                return Err(invalid(format!(
                    "chain {}: asset and share adapters share an address",
                    chain.chain_id
                )));
            }
            if chain.asset_adapter.token != self.vault.asset
                || chain.share_adapter.token != self.vault.share
            {
                return Err(invalid(format!(
                    "chain {}: adapters must bridge {} and {}",
                    chain.chain_id, self.vault.asset, self.vault.share
                )));
            }
            for adapter in [&chain.asset_adapter, &chain.share_adapter] {
                adapter
                    .settings(chain.treasury, self.slippage_mode)
                    .validate()?;
            }
        }
        if !chain_ids.contains(&self.hub_chain_id) {
            return Err(BridgeError::UnknownChain {
                chain_id: self.hub_chain_id,
            });
        }
        if self.vault.asset == self.vault.share {
            return Err(invalid("vault asset and share must differ".to_string()));
        }

        let verifiers: BTreeSet<&VerifierId> = self.verifiers.iter().collect();
        let mut seen = BTreeSet::new();
        for conn in &self.connections {
            for id in [conn.from, conn.to] {
                if !chain_ids.contains(&id) {
                    return Err(BridgeError::UnknownChain { chain_id: id });
                }
            }
            if conn.from == conn.to {
                return Err(invalid(format!("connection from chain {} to itself", conn.from)));
            }
            if !seen.insert((conn.from, conn.to)) {
                return Err(invalid(format!(
                    "connection {} -> {} defined twice",
                    conn.from, conn.to
                )));
            }
            conn.security.validate()?;
            if let Some(unknown) = conn.security.attesters().find(|v| !verifiers.contains(v)) {
                return Err(BridgeError::UnknownVerifier {
                    verifier: unknown.clone(),
                });
            }
        }

        for balance in &self.genesis {
            if !chain_ids.contains(&balance.chain_id) {
                return Err(BridgeError::UnknownChain {
                    chain_id: balance.chain_id,
                });
            }
        }
        Ok(())
    }
}

fn invalid(reason: String) -> BridgeError {
    BridgeError::InvalidConfig { reason }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{two_chain_config, HUB, SPOKE};

    #[test]
    fn json_round_trip_keeps_config() {
        let config = two_chain_config();
        let json = config.to_json_pretty().unwrap();
        let parsed = DeploymentConfig::from_json_str(&json).unwrap();
        assert_eq!(parsed, config);
        assert_eq!(parsed.chain(SPOKE).unwrap().asset_adapter.kind, AdapterKind::MintBurn);
    }

    #[test]
    fn rejects_wrong_version() {
        let mut config = two_chain_config();
        config.version = CONFIG_VERSION + 1;
        assert!(matches!(config.validate(), Err(BridgeError::InvalidConfig { .. })));
    }

    #[test]
    fn rejects_connections_to_unknown_chains_and_verifiers() {
        let mut config = two_chain_config();
        config.connect_bidirectional(HUB, 40000, SecurityConfig::new(["lz-labs"], 1), SendOptions::default());
        assert_eq!(
            config.validate(),
            Err(BridgeError::UnknownChain { chain_id: 40000 })
        );

        let mut config = two_chain_config();
        config.connections[0].security = SecurityConfig::new(["lz-labs", "unlisted"], 1);
        assert_eq!(
            config.validate(),
            Err(BridgeError::UnknownVerifier {
                verifier: VerifierId::new("unlisted")
            })
        );
    }

    #[test]
    fn rejects_duplicate_connection() {
        let mut config = two_chain_config();
        let first = config.connections[0].clone();
        config.connections.push(first);
        assert!(matches!(config.validate(), Err(BridgeError::InvalidConfig { .. })));
    }
}
