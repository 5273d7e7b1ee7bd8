// Stands up a whole deployment from a DeploymentConfig

use log::info;

use crate::bridge::adapter::BridgeAdapter;
use crate::composer::vault_composer::Composer;
use crate::config::DeploymentConfig;
use crate::error::BridgeError;
use crate::onchain::chain::{AdapterRole, Chain, HubInfo};
use crate::simulation::config::SimulationConfig;
use crate::simulation::network::Network;
use crate::vault::Vault;
use crate::verification::VerifierSet;

/// Deploys every chain in `config`, wires routes and security configs in both
/// directions, credits genesis balances and seeds the vault.
pub fn build_network(config: &DeploymentConfig, sim: SimulationConfig) -> Result<Network, BridgeError> {
    config.validate()?;
    let mut network = Network::new(sim, VerifierSet::new(config.verifiers.iter().cloned()));
    let hub = HubInfo {
        chain_id: config.hub_chain_id,
        composer: config.vault.composer_address,
        vault_id: config.vault.vault_id.clone(),
    };

    for cc in &config.chains {
        let mut chain = Chain::new(cc.chain_id, cc.name.clone(), cc.admin, cc.treasury, config.fees.clone());
        for (role, ac) in [(AdapterRole::Asset, &cc.asset_adapter), (AdapterRole::Share, &cc.share_adapter)] {
            let adapter = BridgeAdapter::new(
                ac.address,
                cc.chain_id,
                ac.token.clone(),
                ac.kind,
                cc.admin,
                ac.settings(cc.treasury, config.slippage_mode),
            )?;
            chain.install_adapter(adapter, Some(role))?;
        }
        for verifier in network.verifiers().iter() {
            chain.register_verifier(cc.admin, verifier.id().clone(), verifier.verifying_key())?;
        }
        chain.set_hub(hub.clone());

        if cc.chain_id == config.hub_chain_id {
            let vc = &config.vault;
            chain.install_vault(Vault::new(
                vc.vault_id.clone(),
                vc.vault_address,
                cc.admin,
                vc.asset.clone(),
                vc.share.clone(),
            ))?;
            chain.install_composer(Composer::new(
                vc.composer_address,
                cc.admin,
                cc.chain_id,
                vc.vault_id.clone(),
                cc.asset_adapter.address,
                cc.share_adapter.address,
            ))?;
        }
        network.add_chain(chain)?;
    }

    for conn in &config.connections {
        let local = config.chain(conn.from)?;
        let remote = config.chain(conn.to)?;
        let chain = network.chain_mut(conn.from)?;
        for (mine, theirs) in [
            (&local.asset_adapter, &remote.asset_adapter),
            (&local.share_adapter, &remote.share_adapter),
        ] {
            chain.configure_path(
                local.admin,
                mine.address,
                conn.to,
                theirs.address,
                conn.security.clone(),
                conn.enforced_options,
            )?;
        }
    }

    for balance in &config.genesis {
        network
            .chain_mut(balance.chain_id)?
            .credit(&balance.token, balance.account, balance.amount)?;
    }

    let seed = config.vault.seed_assets;
    if seed > 0 {
        let admin = config.chain(config.hub_chain_id)?.admin;
        let hub_chain = network.chain_mut(config.hub_chain_id)?;
        hub_chain.credit(&config.vault.asset, admin, seed)?;
        hub_chain.vault_deposit(admin, seed, admin)?;
    }

    info!(
        "Deployment ready: {} chains, hub {}, {} connections",
        config.chains.len(),
        config.hub_chain_id,
        config.connections.len()
    );
    Ok(network)
}
