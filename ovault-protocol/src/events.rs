use ethers::types::Address;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::composer::types::ComposeState;
use crate::data_structures::{Amount, ChainId, Guid, TokenId};
use crate::routing::registry::RouteChange;
use crate::routing::security::VerifierId;

/// Structured record of everything observable that happened on a chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainEvent {
    Route {
        adapter: Address,
        change: RouteChange,
    },
    PacketSent {
        adapter: Address,
        guid: Guid,
        dest_chain_id: ChainId,
        amount: Amount,
    },
    PacketReceived {
        adapter: Address,
        guid: Guid,
        source_chain_id: ChainId,
        recipient: Address,
        amount: Amount,
    },
    AlreadyProcessed {
        adapter: Address,
        guid: Guid,
    },
    ComposeTransition {
        guid: Guid,
        from: Option<ComposeState>,
        to: ComposeState,
    },
    ComposeRefunded {
        guid: Guid,
        refund_address: Address,
        token: TokenId,
        amount: Amount,
    },
    VaultDeposit {
        caller: Address,
        receiver: Address,
        assets: Amount,
        shares: Amount,
    },
    VaultRedeem {
        caller: Address,
        receiver: Address,
        shares: Amount,
        assets: Amount,
    },
    PauseToggled {
        component: Address,
        paused: bool,
    },
    VerifierRegistered {
        verifier: VerifierId,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedEvent {
    pub block_number: u64,
    pub event: ChainEvent,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLog {
    events: Vec<RecordedEvent>,
}

impl EventLog {
    pub fn record(&mut self, block_number: u64, event: ChainEvent) {
        debug!("Event @{}: {:?}", block_number, event);
        self.events.push(RecordedEvent {
            block_number,
            event,
        });
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChainEvent> {
        self.events.iter().map(|r| &r.event)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Drops everything recorded after `len` (used when an atomic unit rolls back).
    pub(crate) fn truncate(&mut self, len: usize) {
        self.events.truncate(len);
    }

    /// Compose states `guid` went through, in order.
    pub fn compose_trail(&self, guid: &Guid) -> Vec<ComposeState> {
        self.iter()
            .filter_map(|e| match e {
                ChainEvent::ComposeTransition { guid: g, to, .. } if g == guid => Some(*to),
                _ => None,
            })
            .collect()
    }
}
