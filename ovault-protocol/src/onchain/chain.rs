use std::collections::BTreeMap;

use ed25519_dalek::VerifyingKey;
use ethers::types::Address;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::bridge::adapter::{
    AdapterKind, BridgeAdapter, FeeQuote, ReceiveOutcome, SendParams, SendReceipt,
};
use crate::bridge::fees::{FeeSchedule, SendOptions};
use crate::composer::types::{
    ComposeOutcome, ComposeState, PendingCompose, RefundReceipt, ResubmitOptions,
};
use crate::composer::vault_composer::{ComposeEnv, Composer};
use crate::data_structures::{
    Amount, ChainId, ComposeAction, ComposeInstruction, Guid, Packet, TokenId,
};
use crate::error::BridgeError;
use crate::events::{ChainEvent, EventLog};
use crate::onchain::endpoint::{Endpoint, InboundOrder};
use crate::onchain::ledger::Ledger;
use crate::routing::registry::{RouteChange, RouteRegistry};
use crate::routing::security::{SecurityConfig, VerifierId};
use crate::vault::Vault;
use crate::verification::Attestation;

/// Where the vault lives, as seen from any chain of the deployment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubInfo {
    pub chain_id: ChainId,
    pub composer: Address,
    pub vault_id: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdapterRole {
    Asset,
    Share,
}

/// Result of a successful `receive_packet`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered {
        guid: Guid,
        recipient: Address,
        amount: Amount,
        compose: Option<ComposeOutcome>,
    },
    AlreadyProcessed {
        guid: Guid,
    },
}

impl DeliveryOutcome {
    pub fn guid(&self) -> Guid {
        match self {
            DeliveryOutcome::Delivered { guid, .. } | DeliveryOutcome::AlreadyProcessed { guid } => {
                *guid
            }
        }
    }
}

/// User request for `deposit_cross_chain`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DepositRequest {
    pub dest_chain_id: ChainId,
    pub amount: Amount,
    pub min_shares_out: Amount,
    pub recipient: Address,
    /// Defaults to the caller.
    pub refund_address: Option<Address>,
    /// Options of the leg toward the hub; `compose_value` funds the share leg.
    pub options: SendOptions,
    /// Options of the share leg sent by the Composer.
    pub outbound_options: SendOptions,
    /// Native fee paid for the first leg.
    pub fee: Amount,
}

/// User request for `redeem_cross_chain`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RedeemRequest {
    pub dest_chain_id: ChainId,
    pub shares: Amount,
    pub min_assets_out: Amount,
    pub recipient: Address,
    pub refund_address: Option<Address>,
    pub options: SendOptions,
    pub outbound_options: SendOptions,
    pub fee: Amount,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CrossChainReceipt {
    /// Funds left for the hub; the Composer finishes the flow there.
    Sent(SendReceipt),
    /// Executed on the hub directly.
    Local {
        amount_out: Amount,
        outbound: Option<SendReceipt>,
    },
}

/// One chain of the deployment: a serialized ledger plus the contracts on it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Chain {
    chain_id: ChainId,
    name: String,
    admin: Address,
    block_number: u64,
    ledger: Ledger,
    endpoint: Endpoint,
    adapters: BTreeMap<Address, BridgeAdapter>,
    asset_adapter: Option<Address>,
    share_adapter: Option<Address>,
    vault: Option<Vault>,
    composer: Option<Composer>,
    hub: Option<HubInfo>,
    events: EventLog,
}

impl Chain {
    pub fn new(
        chain_id: ChainId,
        name: impl Into<String>,
        admin: Address,
        treasury: Address,
        fee_schedule: FeeSchedule,
    ) -> Self {
        Chain {
            chain_id,
            name: name.into(),
            admin,
            block_number: 0,
            ledger: Ledger::new(),
            endpoint: Endpoint::new(chain_id, treasury, fee_schedule),
            adapters: BTreeMap::new(),
            asset_adapter: None,
            share_adapter: None,
            vault: None,
            composer: None,
            hub: None,
            events: EventLog::default(),
        }
    }

    // --- Accessors ---

    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn admin(&self) -> Address {
        self.admin
    }

    pub fn block_number(&self) -> u64 {
        self.block_number
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn hub(&self) -> Option<&HubInfo> {
        self.hub.as_ref()
    }

    pub fn balance_of(&self, token: &TokenId, account: &Address) -> Amount {
        self.ledger.balance_of(token, account)
    }

    pub fn adapter(&self, address: &Address) -> Result<&BridgeAdapter, BridgeError> {
        self.adapters.get(address).ok_or(BridgeError::UnknownAdapter {
            chain_id: self.chain_id,
            address: *address,
        })
    }

    pub fn adapters(&self) -> impl Iterator<Item = &BridgeAdapter> {
        self.adapters.values()
    }

    fn role_address(&self, role: AdapterRole) -> Result<Address, BridgeError> {
        let slot = match role {
            AdapterRole::Asset => self.asset_adapter,
            AdapterRole::Share => self.share_adapter,
        };
        slot.ok_or(BridgeError::InvalidConfig {
            reason: format!("chain {} has no {:?} adapter", self.chain_id, role),
        })
    }

    pub fn role_adapter(&self, role: AdapterRole) -> Result<&BridgeAdapter, BridgeError> {
        let address = self.role_address(role)?;
        self.adapter(&address)
    }

    pub fn vault(&self) -> Result<&Vault, BridgeError> {
        self.vault.as_ref().ok_or(BridgeError::VaultNotDeployed {
            chain_id: self.chain_id,
        })
    }

    pub fn composer(&self) -> Result<&Composer, BridgeError> {
        self.composer
            .as_ref()
            .ok_or(BridgeError::ComposerNotDeployed {
                chain_id: self.chain_id,
            })
    }

    pub fn compose_state(&self, guid: &Guid) -> Option<ComposeState> {
        self.composer.as_ref().and_then(|c| c.state(guid))
    }

    pub fn pending_composes(&self) -> Vec<&PendingCompose> {
        self.composer
            .as_ref()
            .map(|c| c.pending_composes().collect())
            .unwrap_or_default()
    }

    // --- Deployment ---

    pub fn install_adapter(
        &mut self,
        adapter: BridgeAdapter,
        role: Option<AdapterRole>,
    ) -> Result<(), BridgeError> {
        if adapter.chain_id() != self.chain_id {
            return Err(BridgeError::InvalidConfig {
                reason: format!(
                    "adapter for chain {} installed on chain {}",
                    adapter.chain_id(),
                    self.chain_id
                ),
            });
        }
        if self.adapters.contains_key(&adapter.address()) {
            return Err(BridgeError::InvalidConfig {
                reason: format!("adapter {:?} already installed", adapter.address()),
            });
        }
        let address = adapter.address();
        match role {
            Some(AdapterRole::Asset) => self.asset_adapter = Some(address),
            Some(AdapterRole::Share) => self.share_adapter = Some(address),
            None => {}
        }
        info!(
            "Chain {}: installed {:?} adapter {:?} for {}",
            self.chain_id,
            adapter.kind(),
            address,
            adapter.token()
        );
        self.adapters.insert(address, adapter);
        Ok(())
    }

    pub fn install_vault(&mut self, vault: Vault) -> Result<(), BridgeError> {
        if self.vault.is_some() {
            return Err(BridgeError::InvalidConfig {
                reason: format!("chain {} already has a vault", self.chain_id),
            });
        }
        info!("Chain {}: installed vault {}", self.chain_id, vault.vault_id());
        self.vault = Some(vault);
        Ok(())
    }

    /// The Composer's adapters and vault must already be installed.
    pub fn install_composer(&mut self, composer: Composer) -> Result<(), BridgeError> {
        let vault = self.vault()?;
        if vault.vault_id() != composer.vault_id() {
            return Err(BridgeError::UnknownVault {
                vault_id: composer.vault_id().to_string(),
            });
        }
        if composer.asset_adapter() == composer.share_adapter() {
            return Err(BridgeError::InvalidConfig {
                reason: "composer asset and share adapters must differ".to_string(),
            });
        }
        let asset = self.adapter(&composer.asset_adapter())?;
        let share = self.adapter(&composer.share_adapter())?;
        if asset.token() != vault.asset() || share.token() != vault.share() {
            return Err(BridgeError::InvalidConfig {
                reason: "composer adapters do not bridge the vault's asset and share".to_string(),
            });
        }
        info!(
            "Chain {}: installed composer {:?}",
            self.chain_id,
            composer.address()
        );
        self.composer = Some(composer);
        Ok(())
    }

    pub fn set_hub(&mut self, hub: HubInfo) {
        self.hub = Some(hub);
    }

    /// Genesis/faucet credit; not reachable from user flows.
    pub fn credit(&mut self, token: &TokenId, to: Address, amount: Amount) -> Result<(), BridgeError> {
        self.ledger.mint(token, to, amount)
    }

    pub fn advance_block(&mut self) {
        self.block_number += 1;
        self.endpoint.set_block_number(self.block_number);
    }

    // Runs `f` against the chain and restores the previous state if it fails
    fn transact<R>(
        &mut self,
        f: impl FnOnce(&mut Chain) -> Result<R, BridgeError>,
    ) -> Result<R, BridgeError> {
        let backup = self.clone();
        let result = f(self);
        if result.is_err() {
            *self = backup;
        }
        result
    }

    // --- Administration ---

    fn ensure_admin(&self, caller: Address, action: &str) -> Result<(), BridgeError> {
        if caller != self.admin {
            return Err(BridgeError::Unauthorized {
                caller,
                action: action.to_string(),
            });
        }
        Ok(())
    }

    fn update_routes(
        &mut self,
        adapter: Address,
        f: impl FnOnce(&mut RouteRegistry) -> Result<RouteChange, BridgeError>,
    ) -> Result<RouteChange, BridgeError> {
        let chain_id = self.chain_id;
        let registry = self
            .adapters
            .get_mut(&adapter)
            .ok_or(BridgeError::UnknownAdapter {
                chain_id,
                address: adapter,
            })?
            .routes_mut();
        let change = f(registry)?;
        self.events.record(
            self.block_number,
            ChainEvent::Route {
                adapter,
                change: change.clone(),
            },
        );
        Ok(change)
    }

    pub fn set_route(
        &mut self,
        caller: Address,
        adapter: Address,
        remote_chain_id: ChainId,
        remote_address: Address,
    ) -> Result<RouteChange, BridgeError> {
        self.update_routes(adapter, |r| r.set_route(caller, remote_chain_id, remote_address))
    }

    pub fn remove_route(
        &mut self,
        caller: Address,
        adapter: Address,
        remote_chain_id: ChainId,
    ) -> Result<RouteChange, BridgeError> {
        self.update_routes(adapter, |r| r.remove_route(caller, remote_chain_id))
    }

    pub fn set_security_config(
        &mut self,
        caller: Address,
        adapter: Address,
        remote_chain_id: ChainId,
        config: SecurityConfig,
    ) -> Result<RouteChange, BridgeError> {
        self.update_routes(adapter, |r| {
            r.set_security_config(caller, remote_chain_id, config)
        })
    }

    pub fn set_enforced_options(
        &mut self,
        caller: Address,
        adapter: Address,
        remote_chain_id: ChainId,
        options: SendOptions,
    ) -> Result<RouteChange, BridgeError> {
        self.update_routes(adapter, |r| {
            r.set_enforced_options(caller, remote_chain_id, options)
        })
    }

    /// Sets peer, security config and enforced options together, or none of them.
    pub fn configure_path(
        &mut self,
        caller: Address,
        adapter: Address,
        remote_chain_id: ChainId,
        remote_address: Address,
        config: SecurityConfig,
        options: SendOptions,
    ) -> Result<(), BridgeError> {
        self.transact(|chain| {
            chain.set_security_config(caller, adapter, remote_chain_id, config)?;
            chain.set_enforced_options(caller, adapter, remote_chain_id, options)?;
            chain.set_route(caller, adapter, remote_chain_id, remote_address)?;
            Ok(())
        })
    }

    pub fn set_adapter_paused(
        &mut self,
        caller: Address,
        adapter: Address,
        paused: bool,
    ) -> Result<(), BridgeError> {
        let chain_id = self.chain_id;
        self.adapters
            .get_mut(&adapter)
            .ok_or(BridgeError::UnknownAdapter {
                chain_id,
                address: adapter,
            })?
            .set_paused(caller, paused)?;
        self.events.record(
            self.block_number,
            ChainEvent::PauseToggled {
                component: adapter,
                paused,
            },
        );
        Ok(())
    }

    pub fn set_vault_paused(&mut self, caller: Address, paused: bool) -> Result<(), BridgeError> {
        let chain_id = self.chain_id;
        let vault = self
            .vault
            .as_mut()
            .ok_or(BridgeError::VaultNotDeployed { chain_id })?;
        vault.set_paused(caller, paused)?;
        let component = vault.address();
        self.events.record(
            self.block_number,
            ChainEvent::PauseToggled { component, paused },
        );
        Ok(())
    }

    pub fn report_total_assets(&mut self, caller: Address, total_assets: Amount) -> Result<(), BridgeError> {
        let chain_id = self.chain_id;
        self.vault
            .as_mut()
            .ok_or(BridgeError::VaultNotDeployed { chain_id })?
            .report_total_assets(caller, total_assets)
    }

    pub fn register_verifier(
        &mut self,
        caller: Address,
        id: VerifierId,
        key: VerifyingKey,
    ) -> Result<(), BridgeError> {
        self.ensure_admin(caller, "register verifier")?;
        self.endpoint.register_verifier(id.clone(), key);
        self.events
            .record(self.block_number, ChainEvent::VerifierRegistered { verifier: id });
        Ok(())
    }

    // --- Token and vault operations ---

    pub fn approve(&mut self, caller: Address, token: &TokenId, spender: Address, amount: Amount) {
        self.ledger.approve(token, caller, spender, amount);
    }

    pub fn transfer(
        &mut self,
        caller: Address,
        token: &TokenId,
        to: Address,
        amount: Amount,
    ) -> Result<(), BridgeError> {
        self.ledger.transfer(token, caller, to, amount)
    }

    pub fn vault_deposit(&mut self, caller: Address, assets: Amount, receiver: Address) -> Result<Amount, BridgeError> {
        let chain_id = self.chain_id;
        let vault = self
            .vault
            .as_mut()
            .ok_or(BridgeError::VaultNotDeployed { chain_id })?;
        let shares = vault.deposit(&mut self.ledger, caller, assets, receiver)?;
        self.events.record(
            self.block_number,
            ChainEvent::VaultDeposit {
                caller,
                receiver,
                assets,
                shares,
            },
        );
        Ok(shares)
    }

    pub fn vault_redeem(&mut self, caller: Address, shares: Amount, receiver: Address) -> Result<Amount, BridgeError> {
        let chain_id = self.chain_id;
        let vault = self
            .vault
            .as_mut()
            .ok_or(BridgeError::VaultNotDeployed { chain_id })?;
        let assets = vault.redeem(&mut self.ledger, caller, shares, receiver)?;
        self.events.record(
            self.block_number,
            ChainEvent::VaultRedeem {
                caller,
                receiver,
                shares,
                assets,
            },
        );
        Ok(assets)
    }

    pub fn donate(&mut self, caller: Address, assets: Amount) -> Result<(), BridgeError> {
        let chain_id = self.chain_id;
        self.vault
            .as_mut()
            .ok_or(BridgeError::VaultNotDeployed { chain_id })?
            .donate(&mut self.ledger, caller, assets)
    }

    // --- Sending ---

    pub fn quote_send(&self, adapter: Address, params: &SendParams) -> Result<FeeQuote, BridgeError> {
        self.adapter(&adapter)?.quote(&self.endpoint, params)
    }

    pub fn send(
        &mut self,
        caller: Address,
        adapter: Address,
        params: SendParams,
        fee: Amount,
    ) -> Result<SendReceipt, BridgeError> {
        let chain_id = self.chain_id;
        let dest_chain_id = params.dest_chain_id;
        let adapter_ref = self
            .adapters
            .get_mut(&adapter)
            .ok_or(BridgeError::UnknownAdapter {
                chain_id,
                address: adapter,
            })?;
        let receipt = adapter_ref.send(&mut self.ledger, &mut self.endpoint, caller, params, fee)?;
        self.events.record(
            self.block_number,
            ChainEvent::PacketSent {
                adapter,
                guid: receipt.guid,
                dest_chain_id,
                amount: receipt.amount_received,
            },
        );
        Ok(receipt)
    }

    fn hub_info(&self) -> Result<HubInfo, BridgeError> {
        self.hub.clone().ok_or(BridgeError::InvalidConfig {
            reason: format!("chain {} does not know the hub", self.chain_id),
        })
    }

    // First leg of a cross-chain vault operation from a spoke: funds go to the
    // hub Composer with an instruction in the compose payload
    fn compose_leg(
        &self,
        caller: Address,
        role: AdapterRole,
        amount: Amount,
        instruction: ComposeInstruction,
        options: SendOptions,
    ) -> Result<(Address, SendParams), BridgeError> {
        let hub = self.hub_info()?;
        let adapter = self.role_address(role)?;
        debug!(
            "Chain {}: {:?} leg for {:?} toward hub {}",
            self.chain_id, instruction.action, caller, hub.chain_id
        );
        Ok((
            adapter,
            SendParams {
                dest_chain_id: hub.chain_id,
                recipient: hub.composer,
                amount,
                // The share/asset floor in the instruction protects the user
                min_amount_out: 0,
                compose_payload: Some(instruction.encode()?),
                options,
            },
        ))
    }

    fn deposit_instruction(&self, caller: Address, hub: &HubInfo, req: &DepositRequest) -> ComposeInstruction {
        ComposeInstruction {
            action: ComposeAction::Deposit,
            vault_id: hub.vault_id.clone(),
            min_amount_out: req.min_shares_out,
            refund_address: req.refund_address.unwrap_or(caller),
            dest_chain_id: req.dest_chain_id,
            recipient: req.recipient,
            outbound_options: req.outbound_options,
        }
    }

    fn redeem_instruction(&self, caller: Address, hub: &HubInfo, req: &RedeemRequest) -> ComposeInstruction {
        ComposeInstruction {
            action: ComposeAction::Redeem,
            vault_id: hub.vault_id.clone(),
            min_amount_out: req.min_assets_out,
            refund_address: req.refund_address.unwrap_or(caller),
            dest_chain_id: req.dest_chain_id,
            recipient: req.recipient,
            outbound_options: req.outbound_options,
        }
    }

    /// Native fee the caller must attach to `deposit_cross_chain`.
    pub fn quote_deposit_cross_chain(&self, caller: Address, req: &DepositRequest) -> Result<FeeQuote, BridgeError> {
        let hub = self.hub_info()?;
        if hub.chain_id == self.chain_id {
            let shares = self.vault()?.preview_deposit(req.amount)?;
            return self.quote_hub_leg(AdapterRole::Share, shares, req.dest_chain_id, req.recipient, req.outbound_options);
        }
        let instruction = self.deposit_instruction(caller, &hub, req);
        let (adapter, params) = self.compose_leg(caller, AdapterRole::Asset, req.amount, instruction, req.options)?;
        self.quote_send(adapter, &params)
    }

    /// Native fee the caller must attach to `redeem_cross_chain`.
    pub fn quote_redeem_cross_chain(&self, caller: Address, req: &RedeemRequest) -> Result<FeeQuote, BridgeError> {
        let hub = self.hub_info()?;
        if hub.chain_id == self.chain_id {
            let assets = self.vault()?.preview_redeem(req.shares)?;
            return self.quote_hub_leg(AdapterRole::Asset, assets, req.dest_chain_id, req.recipient, req.outbound_options);
        }
        let instruction = self.redeem_instruction(caller, &hub, req);
        let (adapter, params) = self.compose_leg(caller, AdapterRole::Share, req.shares, instruction, req.options)?;
        self.quote_send(adapter, &params)
    }

    fn quote_hub_leg(
        &self,
        role: AdapterRole,
        amount: Amount,
        dest_chain_id: ChainId,
        recipient: Address,
        options: SendOptions,
    ) -> Result<FeeQuote, BridgeError> {
        let params = SendParams {
            dest_chain_id,
            recipient,
            amount,
            min_amount_out: 0,
            compose_payload: None,
            options,
        };
        self.quote_send(self.role_address(role)?, &params)
    }

    /// Deposit `amount` of the vault asset and deliver the shares to
    /// `recipient` on `dest_chain_id`.
    pub fn deposit_cross_chain(&mut self, caller: Address, req: DepositRequest) -> Result<CrossChainReceipt, BridgeError> {
        let hub = self.hub_info()?;
        if hub.chain_id == self.chain_id {
            return self.transact(|chain| chain.deposit_on_hub(caller, &req));
        }
        let instruction = self.deposit_instruction(caller, &hub, &req);
        let (adapter, params) = self.compose_leg(caller, AdapterRole::Asset, req.amount, instruction, req.options)?;
        let receipt = self.send(caller, adapter, params, req.fee)?;
        info!(
            "Chain {}: deposit of {} toward chain {} started ({:?})",
            self.chain_id, req.amount, req.dest_chain_id, receipt.guid
        );
        Ok(CrossChainReceipt::Sent(receipt))
    }

    /// Redeem `shares` and deliver the assets to `recipient` on `dest_chain_id`.
    pub fn redeem_cross_chain(&mut self, caller: Address, req: RedeemRequest) -> Result<CrossChainReceipt, BridgeError> {
        let hub = self.hub_info()?;
        if hub.chain_id == self.chain_id {
            return self.transact(|chain| chain.redeem_on_hub(caller, &req));
        }
        let instruction = self.redeem_instruction(caller, &hub, &req);
        let (adapter, params) = self.compose_leg(caller, AdapterRole::Share, req.shares, instruction, req.options)?;
        let receipt = self.send(caller, adapter, params, req.fee)?;
        info!(
            "Chain {}: redeem of {} shares toward chain {} started ({:?})",
            self.chain_id, req.shares, req.dest_chain_id, receipt.guid
        );
        Ok(CrossChainReceipt::Sent(receipt))
    }

    fn deposit_on_hub(&mut self, caller: Address, req: &DepositRequest) -> Result<CrossChainReceipt, BridgeError> {
        let chain_id = self.chain_id;
        let vault = self
            .vault
            .as_mut()
            .ok_or(BridgeError::VaultNotDeployed { chain_id })?;
        let share = vault.share().clone();
        let shares = vault.deposit_with_min(&mut self.ledger, caller, req.amount, caller, req.min_shares_out)?;
        self.events.record(
            self.block_number,
            ChainEvent::VaultDeposit {
                caller,
                receiver: caller,
                assets: req.amount,
                shares,
            },
        );
        let outbound = self.forward_from_hub(caller, AdapterRole::Share, &share, shares, req.min_shares_out, req.dest_chain_id, req.recipient, req.outbound_options, req.fee)?;
        Ok(CrossChainReceipt::Local {
            amount_out: shares,
            outbound,
        })
    }

    fn redeem_on_hub(&mut self, caller: Address, req: &RedeemRequest) -> Result<CrossChainReceipt, BridgeError> {
        let chain_id = self.chain_id;
        let vault = self
            .vault
            .as_mut()
            .ok_or(BridgeError::VaultNotDeployed { chain_id })?;
        let asset = vault.asset().clone();
        let assets = vault.redeem_with_min(&mut self.ledger, caller, req.shares, caller, req.min_assets_out)?;
        self.events.record(
            self.block_number,
            ChainEvent::VaultRedeem {
                caller,
                receiver: caller,
                shares: req.shares,
                assets,
            },
        );
        let outbound = self.forward_from_hub(caller, AdapterRole::Asset, &asset, assets, req.min_assets_out, req.dest_chain_id, req.recipient, req.outbound_options, req.fee)?;
        Ok(CrossChainReceipt::Local {
            amount_out: assets,
            outbound,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn forward_from_hub(
        &mut self,
        caller: Address,
        role: AdapterRole,
        token: &TokenId,
        amount: Amount,
        min_amount_out: Amount,
        dest_chain_id: ChainId,
        recipient: Address,
        options: SendOptions,
        fee: Amount,
    ) -> Result<Option<SendReceipt>, BridgeError> {
        if dest_chain_id == self.chain_id {
            self.ledger.transfer(token, caller, recipient, amount)?;
            return Ok(None);
        }
        let adapter = self.role_address(role)?;
        let params = SendParams {
            dest_chain_id,
            recipient,
            amount,
            min_amount_out,
            compose_payload: None,
            options,
        };
        if self.adapter(&adapter)?.kind() != AdapterKind::LockUnlock {
            return self.send(caller, adapter, params, fee).map(Some);
        }
        // The lock is part of this call, so the caller's own standing
        // allowance to the lockbox is left as it was.
        let prior = self.ledger.allowance(token, &caller, &adapter);
        self.ledger.approve(token, caller, adapter, amount);
        let receipt = self.send(caller, adapter, params, fee);
        self.ledger.approve(token, caller, adapter, prior);
        receipt.map(Some)
    }

    // --- Receiving ---

    /// Delivery-layer callback. Runs every fail-closed check before anything is
    /// finalized; a redelivered guid returns `AlreadyProcessed`.
    pub fn receive_packet(
        &mut self,
        packet: &Packet,
        attestations: &[Attestation],
    ) -> Result<DeliveryOutcome, BridgeError> {
        let message = &packet.message;
        if message.dest_chain_id != self.chain_id {
            return Err(BridgeError::WrongDestination {
                expected: self.chain_id,
                got: message.dest_chain_id,
            });
        }
        let adapter = self.adapter(&message.receiver)?;
        // A consumed guid changes nothing, so it short-circuits route,
        // verification and ordering checks that may have changed since.
        if adapter.is_consumed(&message.guid) {
            let guid = message.guid;
            self.events.record(
                self.block_number,
                ChainEvent::AlreadyProcessed {
                    adapter: message.receiver,
                    guid,
                },
            );
            info!("Chain {}: {:?} already processed", self.chain_id, guid);
            return Ok(DeliveryOutcome::AlreadyProcessed { guid });
        }
        let receive_config = adapter
            .routes()
            .check_inbound(message.source_chain_id, message.sender)?
            .clone();
        let token = adapter.token().clone();
        self.endpoint.verify(packet, &receive_config, attestations)?;
        let path = message.path();
        let order = self.endpoint.check_order(&path, message.nonce)?;

        let composes = message.compose_payload.is_some()
            && self
                .composer
                .as_ref()
                .map_or(false, |c| c.address() == message.recipient);
        if composes {
            self.ensure_compose_ready()?;
        }
        let native = TokenId::native();
        self.ledger
            .total_supply(&native)
            .checked_add(packet.native_value)
            .ok_or(BridgeError::ArithmeticOverflow)?;

        let chain_id = self.chain_id;
        let adapter = self
            .adapters
            .get_mut(&message.receiver)
            .ok_or(BridgeError::UnknownAdapter {
                chain_id,
                address: message.receiver,
            })?;
        match adapter.receive(&mut self.ledger, message)? {
            ReceiveOutcome::AlreadyProcessed { guid } => {
                self.events.record(
                    self.block_number,
                    ChainEvent::AlreadyProcessed {
                        adapter: message.receiver,
                        guid,
                    },
                );
                info!("Chain {}: {:?} already processed", self.chain_id, guid);
                return Ok(DeliveryOutcome::AlreadyProcessed { guid });
            }
            ReceiveOutcome::Delivered { .. } => {}
        }

        if order == InboundOrder::Next {
            self.endpoint.commit_inbound(&path, message.nonce);
        }
        if packet.native_value > 0 {
            self.ledger
                .mint(&native, message.recipient, packet.native_value)?;
        }
        self.events.record(
            self.block_number,
            ChainEvent::PacketReceived {
                adapter: message.receiver,
                guid: message.guid,
                source_chain_id: message.source_chain_id,
                recipient: message.recipient,
                amount: message.amount,
            },
        );

        let compose = if composes {
            let native_value = packet.native_value;
            Some(self.with_compose_env(|composer, env| {
                composer.handle_compose(env, message, token, native_value)
            })?)
        } else {
            if message.compose_payload.is_some() {
                warn!(
                    "Chain {}: compose payload on {:?} ignored, recipient {:?} is not the composer",
                    self.chain_id, message.guid, message.recipient
                );
            }
            None
        };

        Ok(DeliveryOutcome::Delivered {
            guid: message.guid,
            recipient: message.recipient,
            amount: message.amount,
            compose,
        })
    }

    // --- Compose resolution ---

    pub fn retry_compose(
        &mut self,
        caller: Address,
        guid: Guid,
        options: ResubmitOptions,
    ) -> Result<ComposeOutcome, BridgeError> {
        self.with_compose_env(|composer, env| composer.retry_compose(env, caller, guid, options))?
    }

    pub fn refund_compose(&mut self, caller: Address, guid: Guid) -> Result<RefundReceipt, BridgeError> {
        self.with_compose_env(|composer, env| composer.refund(env, caller, guid))?
    }

    fn ensure_compose_ready(&self) -> Result<(), BridgeError> {
        let composer = self.composer()?;
        self.vault()?;
        self.adapter(&composer.asset_adapter())?;
        self.adapter(&composer.share_adapter())?;
        Ok(())
    }

    // Lends the Composer exclusive access to the ledger, vault, its two adapters
    // and the endpoint for one synchronous call
    fn with_compose_env<R>(
        &mut self,
        f: impl FnOnce(&mut Composer, &mut ComposeEnv<'_>) -> R,
    ) -> Result<R, BridgeError> {
        self.ensure_compose_ready()?;
        let chain_id = self.chain_id;
        let (mut composer, mut vault) = match (self.composer.take(), self.vault.take()) {
            (Some(c), Some(v)) => (c, v),
            (c, v) => {
                self.composer = c;
                self.vault = v;
                return Err(BridgeError::ComposerNotDeployed { chain_id });
            }
        };
        let asset_address = composer.asset_adapter();
        let share_address = composer.share_adapter();
        let (mut asset, mut share) = match (
            self.adapters.remove(&asset_address),
            self.adapters.remove(&share_address),
        ) {
            (Some(a), Some(s)) => (a, s),
            (a, s) => {
                if let Some(a) = a {
                    self.adapters.insert(asset_address, a);
                }
                if let Some(s) = s {
                    self.adapters.insert(share_address, s);
                }
                self.composer = Some(composer);
                self.vault = Some(vault);
                return Err(BridgeError::UnknownAdapter {
                    chain_id,
                    address: asset_address,
                });
            }
        };

        let result = {
            let mut env = ComposeEnv {
                chain_id,
                block_number: self.block_number,
                ledger: &mut self.ledger,
                vault: &mut vault,
                asset_adapter: &mut asset,
                share_adapter: &mut share,
                endpoint: &mut self.endpoint,
                events: &mut self.events,
            };
            f(&mut composer, &mut env)
        };

        self.adapters.insert(asset_address, asset);
        self.adapters.insert(share_address, share);
        self.vault = Some(vault);
        self.composer = Some(composer);
        Ok(result)
    }

    pub fn drain_outbox(&mut self) -> Vec<Packet> {
        self.endpoint.drain_outbox()
    }
}
