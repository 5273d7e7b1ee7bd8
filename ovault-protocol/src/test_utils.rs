// ovault-protocol/src/test_utils.rs
// Shared fixtures for unit and scenario tests

use ethers::types::Address;

use crate::bridge::adapter::AdapterKind;
use crate::bridge::fees::{FeeSchedule, SendOptions, SlippageMode};
use crate::config::{
    AdapterConfig, ChainConfig, DeploymentConfig, GenesisBalance, VaultConfig, CONFIG_VERSION,
};
use crate::data_structures::{Amount, ChainId, TokenId};
use crate::error::BridgeError;
use crate::onchain::chain::{DepositRequest, RedeemRequest};
use crate::routing::security::{SecurityConfig, VerifierId};
use crate::simulation::{build_network, Network, SimulationConfig};

pub const HUB: ChainId = 30101;
pub const SPOKE: ChainId = 30102;
pub const THIRD: ChainId = 30110;

pub const USER_USD1: Amount = 1_000;
pub const USER_NATIVE: Amount = 10_000_000;
pub const LOCKBOX_LIQUIDITY: Amount = 10_000;
pub const VAULT_SEED: Amount = 1_000;
/// Native value forwarded to the Composer for the outbound leg.
pub const COMPOSE_VALUE: Amount = 1_000_000;

pub fn addr(n: u64) -> Address {
    Address::from_low_u64_be(n)
}

pub fn user(n: u64) -> Address {
    addr(0x1000 + n)
}

pub fn admin() -> Address {
    addr(0xA0)
}

pub fn treasury() -> Address {
    addr(0xFE)
}

pub fn composer_address() -> Address {
    addr(0xC0)
}

pub fn vault_address() -> Address {
    addr(0x50)
}

pub fn asset_adapter(chain_id: ChainId) -> Address {
    addr(u64::from(chain_id) * 16 + 1)
}

pub fn share_adapter(chain_id: ChainId) -> Address {
    addr(u64::from(chain_id) * 16 + 2)
}

pub fn usd1() -> TokenId {
    TokenId::new("USD1")
}

pub fn eagle() -> TokenId {
    TokenId::new("EAGLE")
}

pub fn native() -> TokenId {
    TokenId::native()
}

pub fn default_security() -> SecurityConfig {
    SecurityConfig::new(["lz-labs", "google-cloud"], 1)
}

pub fn compose_options() -> SendOptions {
    SendOptions {
        executor_gas: 100_000,
        compose_gas: 200_000,
        compose_value: COMPOSE_VALUE,
    }
}

fn adapter_config(address: Address, token: TokenId, kind: AdapterKind) -> AdapterConfig {
    AdapterConfig {
        address,
        token,
        kind,
        fee_bps: 0,
        fee_recipient: None,
        decimal_conversion_rate: 1,
    }
}

/// Hub chains hold lockboxes over the real tokens; spokes mint and burn.
pub fn chain_config(chain_id: ChainId, name: &str, is_hub: bool) -> ChainConfig {
    let kind = if is_hub {
        AdapterKind::LockUnlock
    } else {
        AdapterKind::MintBurn
    };
    ChainConfig {
        chain_id,
        name: name.to_string(),
        admin: admin(),
        treasury: treasury(),
        asset_adapter: adapter_config(asset_adapter(chain_id), usd1(), kind),
        share_adapter: adapter_config(share_adapter(chain_id), eagle(), kind),
    }
}

fn user_genesis(chain_id: ChainId) -> Vec<GenesisBalance> {
    (1..=3)
        .flat_map(|n| {
            [
                GenesisBalance {
                    chain_id,
                    token: usd1(),
                    account: user(n),
                    amount: USER_USD1,
                },
                GenesisBalance {
                    chain_id,
                    token: native(),
                    account: user(n),
                    amount: USER_NATIVE,
                },
            ]
        })
        .collect()
}

fn config_for(spokes: &[(ChainId, &str)]) -> DeploymentConfig {
    let mut chains = vec![chain_config(HUB, "ethereum", true)];
    chains.extend(spokes.iter().map(|(id, name)| chain_config(*id, name, false)));

    let mut genesis = vec![GenesisBalance {
        chain_id: HUB,
        token: usd1(),
        account: asset_adapter(HUB),
        amount: LOCKBOX_LIQUIDITY,
    }];
    for chain in &chains {
        genesis.extend(user_genesis(chain.chain_id));
    }

    let mut config = DeploymentConfig {
        version: CONFIG_VERSION,
        hub_chain_id: HUB,
        chains,
        vault: VaultConfig {
            vault_id: "eagle-usd1".to_string(),
            vault_address: vault_address(),
            composer_address: composer_address(),
            asset: usd1(),
            share: eagle(),
            seed_assets: VAULT_SEED,
        },
        verifiers: vec![
            VerifierId::new("lz-labs"),
            VerifierId::new("google-cloud"),
            VerifierId::new("nethermind"),
        ],
        connections: Vec::new(),
        fees: FeeSchedule::default(),
        slippage_mode: SlippageMode::AfterFee,
        genesis,
    };
    let ids: Vec<ChainId> = config.chains.iter().map(|c| c.chain_id).collect();
    for (i, a) in ids.iter().enumerate() {
        for b in &ids[i + 1..] {
            config.connect_bidirectional(*a, *b, default_security(), SendOptions::default());
        }
    }
    config
}

/// Hub plus one spoke, fully connected.
pub fn two_chain_config() -> DeploymentConfig {
    config_for(&[(SPOKE, "arbitrum")])
}

/// Hub plus two spokes, every pair connected.
pub fn three_chain_config() -> DeploymentConfig {
    config_for(&[(SPOKE, "arbitrum"), (THIRD, "base")])
}

pub fn two_chain_network() -> Result<Network, BridgeError> {
    build_network(&two_chain_config(), SimulationConfig::default())
}

pub fn three_chain_network() -> Result<Network, BridgeError> {
    build_network(&three_chain_config(), SimulationConfig::default())
}

/// Deposit with compose options and a fee cap that covers both legs.
pub fn deposit_request(
    dest_chain_id: ChainId,
    amount: Amount,
    min_shares_out: Amount,
    recipient: Address,
) -> DepositRequest {
    DepositRequest {
        dest_chain_id,
        amount,
        min_shares_out,
        recipient,
        refund_address: None,
        options: compose_options(),
        outbound_options: SendOptions::default(),
        fee: USER_NATIVE / 2,
    }
}

pub fn redeem_request(
    dest_chain_id: ChainId,
    shares: Amount,
    min_assets_out: Amount,
    recipient: Address,
) -> RedeemRequest {
    RedeemRequest {
        dest_chain_id,
        shares,
        min_assets_out,
        recipient,
        refund_address: None,
        options: compose_options(),
        outbound_options: SendOptions::default(),
        fee: USER_NATIVE / 2,
    }
}
