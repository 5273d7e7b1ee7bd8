// Composer: turns an inbound bridged amount into a vault deposit (or redeem)
// and sends the result on to its destination chain.

use std::collections::BTreeMap;

use ethers::types::Address;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::bridge::adapter::{AdapterKind, BridgeAdapter, SendParams};
use crate::composer::types::{
    ComposeOutcome, ComposeRecord, ComposeState, PendingCompose, RefundReceipt, ResubmitOptions,
};
use crate::data_structures::{
    Amount, BridgeMessage, ChainId, ComposeAction, ComposeInstruction, Guid, TokenId,
};
use crate::error::BridgeError;
use crate::events::{ChainEvent, EventLog};
use crate::onchain::endpoint::Endpoint;
use crate::onchain::ledger::Ledger;
use crate::vault::Vault;

/// Mutable chain state a compose touches. Borrowed from the chain for the
/// duration of one synchronous call.
pub struct ComposeEnv<'a> {
    pub chain_id: ChainId,
    pub block_number: u64,
    pub ledger: &'a mut Ledger,
    pub vault: &'a mut Vault,
    pub asset_adapter: &'a mut BridgeAdapter,
    pub share_adapter: &'a mut BridgeAdapter,
    pub endpoint: &'a mut Endpoint,
    pub events: &'a mut EventLog,
}

// Copy of everything an attempt may mutate; restoring it reverts the attempt
struct Checkpoint {
    ledger: Ledger,
    vault: Vault,
    asset_adapter: BridgeAdapter,
    share_adapter: BridgeAdapter,
    endpoint: Endpoint,
    events_len: usize,
}

impl Checkpoint {
    fn capture(env: &ComposeEnv<'_>) -> Self {
        Checkpoint {
            ledger: env.ledger.clone(),
            vault: env.vault.clone(),
            asset_adapter: env.asset_adapter.clone(),
            share_adapter: env.share_adapter.clone(),
            endpoint: env.endpoint.clone(),
            events_len: env.events.len(),
        }
    }

    fn restore(self, env: &mut ComposeEnv<'_>) {
        *env.ledger = self.ledger;
        *env.vault = self.vault;
        *env.asset_adapter = self.asset_adapter;
        *env.share_adapter = self.share_adapter;
        *env.endpoint = self.endpoint;
        env.events.truncate(self.events_len);
    }
}

// Result of a committed attempt
struct Executed {
    states: Vec<ComposeState>,
    amount_out: Amount,
    outbound_guid: Option<Guid>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Composer {
    address: Address,
    owner: Address,
    chain_id: ChainId,
    vault_id: String,
    asset_adapter: Address,
    share_adapter: Address,
    records: BTreeMap<Guid, ComposeRecord>,
    pending: BTreeMap<Guid, PendingCompose>,
}

impl Composer {
    pub fn new(
        address: Address,
        owner: Address,
        chain_id: ChainId,
        vault_id: impl Into<String>,
        asset_adapter: Address,
        share_adapter: Address,
    ) -> Self {
        Composer {
            address,
            owner,
            chain_id,
            vault_id: vault_id.into(),
            asset_adapter,
            share_adapter,
            records: BTreeMap::new(),
            pending: BTreeMap::new(),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn owner(&self) -> Address {
        self.owner
    }

    pub fn vault_id(&self) -> &str {
        &self.vault_id
    }

    pub fn asset_adapter(&self) -> Address {
        self.asset_adapter
    }

    pub fn share_adapter(&self) -> Address {
        self.share_adapter
    }

    pub fn record(&self, guid: &Guid) -> Option<&ComposeRecord> {
        self.records.get(guid)
    }

    pub fn state(&self, guid: &Guid) -> Option<ComposeState> {
        self.records.get(guid).map(|r| r.state)
    }

    pub fn pending(&self, guid: &Guid) -> Option<&PendingCompose> {
        self.pending.get(guid)
    }

    pub fn pending_composes(&self) -> impl Iterator<Item = &PendingCompose> {
        self.pending.values()
    }

    fn transition(env: &mut ComposeEnv<'_>, record: &mut ComposeRecord, to: ComposeState) {
        let from = record.state;
        debug_assert!(
            from.can_transition_to(to),
            "illegal compose transition {:?} -> {:?}",
            from,
            to
        );
        record.state = to;
        record.history.push(to);
        env.events.record(
            env.block_number,
            ChainEvent::ComposeTransition {
                guid: record.guid,
                from: Some(from),
                to,
            },
        );
        info!("Composer: {:?} {:?} -> {:?}", record.guid, from, to);
    }

    /// Compose hook invoked right after the adapter finalized `message` to this
    /// Composer. The delivered funds (`message.amount` of `token`, plus
    /// `native_value`) are already in the Composer's balance. Never fails the
    /// delivery: errors become a PendingCompose.
    pub fn handle_compose(
        &mut self,
        env: &mut ComposeEnv<'_>,
        message: &BridgeMessage,
        token: TokenId,
        native_value: Amount,
    ) -> ComposeOutcome {
        let guid = message.guid;
        if self.records.contains_key(&guid) {
            warn!("Composer: duplicate compose for {:?} ignored", guid);
            return ComposeOutcome::Failed {
                guid,
                error: BridgeError::DuplicateCompose { guid },
            };
        }

        let decoded = match &message.compose_payload {
            Some(payload) => ComposeInstruction::decode(payload),
            None => Err(BridgeError::MalformedComposePayload {
                reason: "missing compose payload".to_string(),
            }),
        };
        let instruction = decoded.as_ref().ok().cloned();
        let refund_address = instruction
            .as_ref()
            .map_or(message.origin, |i| i.refund_address);

        self.records.insert(
            guid,
            ComposeRecord {
                guid,
                source_chain_id: message.source_chain_id,
                from_adapter: message.receiver,
                token,
                amount: message.amount,
                instruction,
                refund_address,
                state: ComposeState::Received,
                history: vec![ComposeState::Received],
                native_budget: native_value,
                attempts: 0,
                amount_out: None,
                outbound_guid: None,
                last_error: None,
            },
        );
        env.events.record(
            env.block_number,
            ChainEvent::ComposeTransition {
                guid,
                from: None,
                to: ComposeState::Received,
            },
        );
        info!(
            "Composer: received {:?} ({} units from chain {})",
            guid, message.amount, message.source_chain_id
        );

        match self.validate(message.receiver, decoded) {
            Ok(_) => self.attempt(env, guid, None, None),
            Err(e) => self.fail(env, guid, e),
        }
    }

    /// Permissionless re-attempt at the current exchange rate.
    pub fn retry_compose(
        &mut self,
        env: &mut ComposeEnv<'_>,
        caller: Address,
        guid: Guid,
        options: ResubmitOptions,
    ) -> Result<ComposeOutcome, BridgeError> {
        let record = self
            .records
            .get(&guid)
            .ok_or(BridgeError::UnknownCompose { guid })?;
        if record.state.is_terminal() || !self.pending.contains_key(&guid) {
            return Err(BridgeError::AlreadyResolved { guid });
        }
        if options.min_amount_out.is_some() && caller != record.refund_address {
            return Err(BridgeError::Unauthorized {
                caller,
                action: "change the compose slippage floor".to_string(),
            });
        }
        let from_adapter = record.from_adapter;
        let instruction = record
            .instruction
            .clone()
            .ok_or(BridgeError::MalformedComposePayload {
                reason: "payload could not be decoded".to_string(),
            });

        if let Some(record) = self.records.get_mut(&guid) {
            Self::transition(env, record, ComposeState::Retried);
        }
        info!("Composer: retry of {:?} requested by {:?}", guid, caller);

        let outcome = match self.validate(from_adapter, instruction) {
            Ok(_) => self.attempt(
                env,
                guid,
                Some((caller, options.extra_fee)),
                options.min_amount_out,
            ),
            Err(e) => self.fail(env, guid, e),
        };
        Ok(outcome)
    }

    /// Returns held funds to the refund address. Callable by the refund
    /// address or the Composer owner.
    pub fn refund(
        &mut self,
        env: &mut ComposeEnv<'_>,
        caller: Address,
        guid: Guid,
    ) -> Result<RefundReceipt, BridgeError> {
        let record = self
            .records
            .get(&guid)
            .ok_or(BridgeError::UnknownCompose { guid })?;
        if !self.pending.contains_key(&guid) {
            return Err(BridgeError::AlreadyResolved { guid });
        }
        if caller != record.refund_address && caller != self.owner {
            return Err(BridgeError::Unauthorized {
                caller,
                action: "refund compose".to_string(),
            });
        }

        let token = record.token.clone();
        let amount = record.amount;
        let budget = record.native_budget;
        let refund_address = record.refund_address;
        let native = TokenId::native();

        env.ledger.ensure_balance(&token, self.address, amount)?;
        env.ledger.ensure_balance(&native, self.address, budget)?;
        env.ledger.transfer(&token, self.address, refund_address, amount)?;
        env.ledger.transfer(&native, self.address, refund_address, budget)?;

        self.pending.remove(&guid);
        if let Some(record) = self.records.get_mut(&guid) {
            record.native_budget = 0;
            Self::transition(env, record, ComposeState::Refunded);
        }
        env.events.record(
            env.block_number,
            ChainEvent::ComposeRefunded {
                guid,
                refund_address,
                token: token.clone(),
                amount,
            },
        );
        info!(
            "Composer: refunded {} {} (+{} native) for {:?} to {:?}",
            amount, token, budget, guid, refund_address
        );
        Ok(RefundReceipt {
            guid,
            refund_address,
            token,
            amount,
            native_returned: budget,
        })
    }

    // Trusted source, decodable payload, our vault, action matching the adapter
    fn validate(
        &self,
        from_adapter: Address,
        decoded: Result<ComposeInstruction, BridgeError>,
    ) -> Result<ComposeInstruction, BridgeError> {
        let expected = if from_adapter == self.asset_adapter {
            ComposeAction::Deposit
        } else if from_adapter == self.share_adapter {
            ComposeAction::Redeem
        } else {
            return Err(BridgeError::UntrustedComposeSource {
                adapter: from_adapter,
            });
        };
        let instruction = decoded?;
        if instruction.vault_id != self.vault_id {
            return Err(BridgeError::UnknownVault {
                vault_id: instruction.vault_id,
            });
        }
        if instruction.action != expected {
            return Err(BridgeError::ComposeActionMismatch {
                reason: format!(
                    "{:?} requested for funds delivered by adapter {:?}",
                    instruction.action, from_adapter
                ),
            });
        }
        Ok(instruction)
    }

    fn fail(&mut self, env: &mut ComposeEnv<'_>, guid: Guid, error: BridgeError) -> ComposeOutcome {
        if let Some(record) = self.records.get_mut(&guid) {
            Self::transition(env, record, ComposeState::ComposeFailed);
            record.attempts += 1;
            record.last_error = Some(error.to_string());

            let pending = self.pending.entry(guid).or_insert_with(|| PendingCompose {
                guid,
                token: record.token.clone(),
                amount: record.amount,
                native_budget: record.native_budget,
                refund_address: record.refund_address,
                reason: String::new(),
                attempts: 0,
                failed_at_block: env.block_number,
            });
            pending.reason = error.to_string();
            pending.attempts = record.attempts;
            pending.native_budget = record.native_budget;
            pending.failed_at_block = env.block_number;
        }
        warn!("Composer: compose {:?} failed: {}", guid, error);
        ComposeOutcome::Failed { guid, error }
    }

    // One atomic attempt: either every effect commits or the checkpoint is restored
    fn attempt(
        &mut self,
        env: &mut ComposeEnv<'_>,
        guid: Guid,
        extra_fee: Option<(Address, Amount)>,
        min_override: Option<Amount>,
    ) -> ComposeOutcome {
        let record = match self.records.get_mut(&guid) {
            Some(record) => {
                Self::transition(env, record, ComposeState::Composing);
                record.clone()
            }
            None => {
                return ComposeOutcome::Failed {
                    guid,
                    error: BridgeError::UnknownCompose { guid },
                }
            }
        };
        let instruction = match record.instruction.clone() {
            Some(i) => i,
            None => {
                let error = BridgeError::MalformedComposePayload {
                    reason: "payload could not be decoded".to_string(),
                };
                return self.fail(env, guid, error);
            }
        };

        let checkpoint = Checkpoint::capture(env);
        match self.execute(env, &record, &instruction, extra_fee, min_override) {
            Ok(done) => {
                if let Some(record) = self.records.get_mut(&guid) {
                    for state in &done.states {
                        Self::transition(env, record, *state);
                    }
                    Self::transition(env, record, ComposeState::Completed);
                    record.amount_out = Some(done.amount_out);
                    record.outbound_guid = done.outbound_guid;
                    record.native_budget = 0;
                    record.last_error = None;
                    if let (Some(min), Some(ins)) = (min_override, record.instruction.as_mut()) {
                        ins.min_amount_out = min;
                    }
                }
                self.pending.remove(&guid);
                ComposeOutcome::Completed {
                    guid,
                    amount_out: done.amount_out,
                    outbound_guid: done.outbound_guid,
                }
            }
            Err(e) => {
                checkpoint.restore(env);
                self.fail(env, guid, e)
            }
        }
    }

    fn execute(
        &self,
        env: &mut ComposeEnv<'_>,
        record: &ComposeRecord,
        instruction: &ComposeInstruction,
        extra_fee: Option<(Address, Amount)>,
        min_override: Option<Amount>,
    ) -> Result<Executed, BridgeError> {
        let native = TokenId::native();
        let mut budget = record.native_budget;
        if let Some((payer, amount)) = extra_fee.filter(|(_, amount)| *amount > 0) {
            env.ledger.transfer(&native, payer, self.address, amount)?;
            budget = budget
                .checked_add(amount)
                .ok_or(BridgeError::ArithmeticOverflow)?;
        }
        let min_out = min_override.unwrap_or(instruction.min_amount_out);

        let mut states = Vec::new();
        let amount_out = match instruction.action {
            ComposeAction::Deposit => {
                let shares = env.vault.deposit_with_min(
                    env.ledger,
                    self.address,
                    record.amount,
                    self.address,
                    min_out,
                )?;
                env.events.record(
                    env.block_number,
                    ChainEvent::VaultDeposit {
                        caller: self.address,
                        receiver: self.address,
                        assets: record.amount,
                        shares,
                    },
                );
                states.push(ComposeState::Deposited);
                shares
            }
            ComposeAction::Redeem => {
                let assets = env.vault.redeem_with_min(
                    env.ledger,
                    self.address,
                    record.amount,
                    self.address,
                    min_out,
                )?;
                env.events.record(
                    env.block_number,
                    ChainEvent::VaultRedeem {
                        caller: self.address,
                        receiver: self.address,
                        shares: record.amount,
                        assets,
                    },
                );
                states.push(ComposeState::Redeemed);
                assets
            }
        };

        let (adapter, sent_state) = match instruction.action {
            ComposeAction::Deposit => (&mut *env.share_adapter, ComposeState::SharesSent),
            ComposeAction::Redeem => (&mut *env.asset_adapter, ComposeState::AssetsSent),
        };
        let token = adapter.token().clone();

        let mut fee_paid = 0;
        let outbound_guid = if instruction.dest_chain_id == env.chain_id {
            env.ledger
                .transfer(&token, self.address, instruction.recipient, amount_out)?;
            None
        } else {
            if adapter.kind() == AdapterKind::LockUnlock {
                env.ledger
                    .approve(&token, self.address, adapter.address(), amount_out);
            }
            let params = SendParams {
                dest_chain_id: instruction.dest_chain_id,
                recipient: instruction.recipient,
                amount: amount_out,
                min_amount_out: min_out,
                compose_payload: None,
                options: instruction.outbound_options,
            };
            let quote = adapter.quote(&*env.endpoint, &params)?;
            if quote.native_fee > budget {
                return Err(BridgeError::InsufficientFee {
                    required: quote.native_fee,
                    provided: budget,
                });
            }
            let receipt = adapter.send(
                env.ledger,
                env.endpoint,
                self.address,
                params,
                quote.native_fee,
            )?;
            env.events.record(
                env.block_number,
                ChainEvent::PacketSent {
                    adapter: adapter.address(),
                    guid: receipt.guid,
                    dest_chain_id: instruction.dest_chain_id,
                    amount: receipt.amount_received,
                },
            );
            fee_paid = receipt.native_fee;
            states.push(sent_state);
            Some(receipt.guid)
        };

        let leftover = budget - fee_paid;
        if leftover > 0 {
            env.ledger
                .transfer(&native, self.address, record.refund_address, leftover)?;
        }

        Ok(Executed {
            states,
            amount_out,
            outbound_guid,
        })
    }
}
