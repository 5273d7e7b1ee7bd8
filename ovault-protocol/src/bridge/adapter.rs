use std::collections::BTreeSet;

use ethers::types::Address;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::bridge::fees::{
    calculate_token_fee, remove_dust, FeeBreakdown, SendOptions, SlippageMode, MAX_FEE_BPS,
};
use crate::data_structures::{Amount, BridgeMessage, ChainId, Guid, TokenId};
use crate::error::BridgeError;
use crate::onchain::interface::{DeliveryLayer, OutboundRequest};
use crate::onchain::ledger::Ledger;
use crate::routing::registry::RouteRegistry;

/// How an adapter holds the token it bridges.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdapterKind {
    /// Lockbox over an existing token: locks on send, unlocks on receive.
    LockUnlock,
    /// Owns the token supply on this chain: burns on send, mints on receive.
    MintBurn,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterSettings {
    pub fee_bps: u16,
    pub fee_recipient: Address,
    pub decimal_conversion_rate: Amount,
    pub slippage_mode: SlippageMode,
}

impl Default for AdapterSettings {
    fn default() -> Self {
        AdapterSettings {
            fee_bps: 0,
            fee_recipient: Address::zero(),
            decimal_conversion_rate: 1,
            slippage_mode: SlippageMode::AfterFee,
        }
    }
}

impl AdapterSettings {
    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.fee_bps > MAX_FEE_BPS {
            return Err(BridgeError::InvalidConfig {
                reason: format!("fee {} bps exceeds maximum {}", self.fee_bps, MAX_FEE_BPS),
            });
        }
        if self.fee_bps > 0 && self.fee_recipient.is_zero() {
            return Err(BridgeError::InvalidConfig {
                reason: "token fee configured without a fee recipient".to_string(),
            });
        }
        if self.decimal_conversion_rate == 0 {
            return Err(BridgeError::InvalidConfig {
                reason: "decimal conversion rate must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SendParams {
    pub dest_chain_id: ChainId,
    pub recipient: Address,
    pub amount: Amount,
    pub min_amount_out: Amount,
    pub compose_payload: Option<Vec<u8>>,
    pub options: SendOptions,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeeQuote {
    pub native_fee: Amount,
    pub breakdown: FeeBreakdown,
    /// Amount debited from the sender after dust removal.
    pub amount_sent: Amount,
    /// Amount the recipient gets after the bridge token fee.
    pub amount_received: Amount,
    pub token_fee: Amount,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SendReceipt {
    pub guid: Guid,
    pub nonce: u64,
    pub amount_sent: Amount,
    pub amount_received: Amount,
    pub native_fee: Amount,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReceiveOutcome {
    Delivered {
        guid: Guid,
        recipient: Address,
        amount: Amount,
    },
    /// Redelivery of a consumed guid; nothing changed.
    AlreadyProcessed { guid: Guid },
}

/// Bridge adapter for one token on one chain (asset or vault share).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeAdapter {
    address: Address,
    chain_id: ChainId,
    token: TokenId,
    kind: AdapterKind,
    routes: RouteRegistry,
    settings: AdapterSettings,
    consumed: BTreeSet<Guid>,
    paused: bool,
}

impl BridgeAdapter {
    pub fn new(
        address: Address,
        chain_id: ChainId,
        token: TokenId,
        kind: AdapterKind,
        owner: Address,
        settings: AdapterSettings,
    ) -> Result<Self, BridgeError> {
        settings.validate()?;
        Ok(BridgeAdapter {
            address,
            chain_id,
            token,
            kind,
            routes: RouteRegistry::new(chain_id, owner),
            settings,
            consumed: BTreeSet::new(),
            paused: false,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    pub fn token(&self) -> &TokenId {
        &self.token
    }

    pub fn kind(&self) -> AdapterKind {
        self.kind
    }

    pub fn settings(&self) -> &AdapterSettings {
        &self.settings
    }

    pub fn routes(&self) -> &RouteRegistry {
        &self.routes
    }

    pub fn routes_mut(&mut self) -> &mut RouteRegistry {
        &mut self.routes
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn set_paused(&mut self, caller: Address, paused: bool) -> Result<(), BridgeError> {
        self.routes.ensure_owner(caller, "pause adapter")?;
        self.paused = paused;
        info!(
            "Adapter {:?} on chain {}: paused={}",
            self.address, self.chain_id, paused
        );
        Ok(())
    }

    pub fn is_consumed(&self, guid: &Guid) -> bool {
        self.consumed.contains(guid)
    }

    pub fn consumed_count(&self) -> usize {
        self.consumed.len()
    }

    // (amount_sent, amount_received, token_fee)
    fn split_amount(&self, amount: Amount) -> Result<(Amount, Amount, Amount), BridgeError> {
        let sent = remove_dust(amount, self.settings.decimal_conversion_rate);
        if sent == 0 {
            return Err(BridgeError::InvalidAmount {
                reason: format!(
                    "{} is below the minimum transferable unit {}",
                    amount, self.settings.decimal_conversion_rate
                ),
            });
        }
        let token_fee = calculate_token_fee(sent, self.settings.fee_bps);
        Ok((sent, sent - token_fee, token_fee))
    }

    /// Pure fee estimate. Route and security config are checked first so a
    /// misconfigured path never shows up as a fee problem.
    pub fn quote<D: DeliveryLayer + ?Sized>(
        &self,
        delivery: &D,
        params: &SendParams,
    ) -> Result<FeeQuote, BridgeError> {
        let route = self.routes.outbound(params.dest_chain_id)?;
        let (amount_sent, amount_received, token_fee) = self.split_amount(params.amount)?;
        let options = params.options.merge_enforced(&route.enforced_options);
        let payload_size = params.compose_payload.as_ref().map_or(0, |p| p.len());
        let breakdown = delivery.estimate_fee(
            params.dest_chain_id,
            payload_size,
            &route.security_config,
            &options,
        )?;
        Ok(FeeQuote {
            native_fee: breakdown.total()?,
            breakdown,
            amount_sent,
            amount_received,
            token_fee,
        })
    }

    /// Debits (locks or burns) `from` and hands the message to the delivery layer.
    /// All checks run before the first ledger mutation.
    pub fn send<D: DeliveryLayer + ?Sized>(
        &mut self,
        ledger: &mut Ledger,
        delivery: &mut D,
        from: Address,
        params: SendParams,
        fee: Amount,
    ) -> Result<SendReceipt, BridgeError> {
        if self.paused {
            return Err(BridgeError::AdapterPaused {
                adapter: self.address,
            });
        }
        if params.amount == 0 {
            return Err(BridgeError::InvalidAmount {
                reason: "cannot send zero".to_string(),
            });
        }

        let quote = self.quote(&*delivery, &params)?;
        self.settings.slippage_mode.check(
            quote.amount_sent,
            quote.amount_received,
            params.min_amount_out,
        )?;
        if fee < quote.native_fee {
            return Err(BridgeError::InsufficientFee {
                required: quote.native_fee,
                provided: fee,
            });
        }

        let native = TokenId::native();
        ledger.ensure_balance(&native, from, quote.native_fee)?;
        ledger.ensure_balance(&self.token, from, quote.amount_sent)?;
        if self.kind == AdapterKind::LockUnlock {
            ledger.ensure_allowance(&self.token, from, self.address, quote.amount_sent)?;
        }

        let route = self.routes.outbound(params.dest_chain_id)?;
        let options = params.options.merge_enforced(&route.enforced_options);

        ledger.transfer(&native, from, delivery.fee_collector(), quote.native_fee)?;
        match self.kind {
            AdapterKind::LockUnlock => {
                ledger.transfer_from(&self.token, self.address, from, self.address, quote.amount_sent)?;
                if quote.token_fee > 0 {
                    ledger.transfer(
                        &self.token,
                        self.address,
                        self.settings.fee_recipient,
                        quote.token_fee,
                    )?;
                }
            }
            AdapterKind::MintBurn => {
                if quote.token_fee > 0 {
                    ledger.transfer(&self.token, from, self.settings.fee_recipient, quote.token_fee)?;
                }
                ledger.burn(&self.token, from, quote.amount_received)?;
            }
        }

        let receipt = delivery.dispatch(OutboundRequest {
            dest_chain_id: params.dest_chain_id,
            sender: self.address,
            receiver: route.peer,
            origin: from,
            recipient: params.recipient,
            amount: quote.amount_received,
            compose_payload: params.compose_payload,
            native_value: options.compose_value,
            send_config: route.security_config,
        })?;

        info!(
            "Adapter {:?} on chain {}: sent {} {} to chain {} ({:?})",
            self.address,
            self.chain_id,
            quote.amount_received,
            self.token,
            params.dest_chain_id,
            receipt.guid
        );
        Ok(SendReceipt {
            guid: receipt.guid,
            nonce: receipt.nonce,
            amount_sent: quote.amount_sent,
            amount_received: quote.amount_received,
            native_fee: quote.native_fee,
        })
    }

    /// Finalizes an inbound message. The consumed-guid check and the credit
    /// happen together; nothing is credited if any check fails.
    pub fn receive(
        &mut self,
        ledger: &mut Ledger,
        message: &BridgeMessage,
    ) -> Result<ReceiveOutcome, BridgeError> {
        if message.receiver != self.address {
            return Err(BridgeError::UnknownAdapter {
                chain_id: self.chain_id,
                address: message.receiver,
            });
        }
        if self.consumed.contains(&message.guid) {
            debug!(
                "Adapter {:?} on chain {}: {:?} already processed",
                self.address, self.chain_id, message.guid
            );
            return Ok(ReceiveOutcome::AlreadyProcessed { guid: message.guid });
        }
        self.routes
            .check_inbound(message.source_chain_id, message.sender)?;

        if self.paused {
            warn!(
                "Adapter {:?} on chain {}: holding {:?} while paused",
                self.address, self.chain_id, message.guid
            );
            return Err(BridgeError::AdapterPaused {
                adapter: self.address,
            });
        }

        match self.kind {
            AdapterKind::LockUnlock => {
                let available = ledger.balance_of(&self.token, &self.address);
                if available < message.amount {
                    return Err(BridgeError::InsufficientLiquidity {
                        token: self.token.clone(),
                        required: message.amount,
                        available,
                    });
                }
                ledger.transfer(&self.token, self.address, message.recipient, message.amount)?;
            }
            AdapterKind::MintBurn => {
                ledger.mint(&self.token, message.recipient, message.amount)?;
            }
        }
        self.consumed.insert(message.guid);

        info!(
            "Adapter {:?} on chain {}: delivered {} {} to {:?} ({:?})",
            self.address, self.chain_id, message.amount, self.token, message.recipient, message.guid
        );
        Ok(ReceiveOutcome::Delivered {
            guid: message.guid,
            recipient: message.recipient,
            amount: message.amount,
        })
    }
}
