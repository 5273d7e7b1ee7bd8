// Types for the vault Composer state machine

use ethers::types::Address;
use serde::{Deserialize, Serialize};

use crate::data_structures::{Amount, ChainId, ComposeAction, ComposeInstruction, Guid, TokenId};
use crate::error::BridgeError;

// Lifecycle of one composed message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComposeState {
    Received,
    Composing,
    Deposited,
    SharesSent,
    Redeemed,
    AssetsSent,
    Completed,
    ComposeFailed,
    Retried,
    Refunded,
}

impl ComposeState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ComposeState::Completed | ComposeState::Refunded)
    }

    pub fn can_transition_to(&self, next: ComposeState) -> bool {
        use ComposeState::*;
        matches!(
            (self, next),
            (Received, Composing)
                | (Received, ComposeFailed)
                | (Composing, Deposited)
                | (Composing, Redeemed)
                | (Composing, ComposeFailed)
                | (Deposited, SharesSent)
                | (Deposited, Completed) // same-chain recipient
                | (Redeemed, AssetsSent)
                | (Redeemed, Completed)
                | (SharesSent, Completed)
                | (AssetsSent, Completed)
                | (ComposeFailed, Retried)
                | (ComposeFailed, Refunded)
                | (Retried, Composing)
                | (Retried, ComposeFailed)
        )
    }
}

// Full record of a composed message, kept after resolution for auditing
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposeRecord {
    pub guid: Guid,
    pub source_chain_id: ChainId,
    pub from_adapter: Address,
    pub token: TokenId,
    pub amount: Amount,
    // None when the payload could not be decoded
    pub instruction: Option<ComposeInstruction>,
    pub refund_address: Address,
    pub state: ComposeState,
    pub history: Vec<ComposeState>,
    // Native value held for the outbound leg
    pub native_budget: Amount,
    pub attempts: u32,
    pub amount_out: Option<Amount>,
    pub outbound_guid: Option<Guid>,
    pub last_error: Option<String>,
}

impl ComposeRecord {
    pub fn action(&self) -> Option<ComposeAction> {
        self.instruction.as_ref().map(|i| i.action)
    }
}

/// Funds held by the Composer for a failed compose, awaiting retry or refund.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCompose {
    pub guid: Guid,
    pub token: TokenId,
    pub amount: Amount,
    pub native_budget: Amount,
    pub refund_address: Address,
    pub reason: String,
    pub attempts: u32,
    pub failed_at_block: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ComposeOutcome {
    Completed {
        guid: Guid,
        amount_out: Amount,
        // None for same-chain delivery
        outbound_guid: Option<Guid>,
    },
    Failed {
        guid: Guid,
        error: BridgeError,
    },
}

impl ComposeOutcome {
    pub fn guid(&self) -> Guid {
        match self {
            ComposeOutcome::Completed { guid, .. } | ComposeOutcome::Failed { guid, .. } => *guid,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, ComposeOutcome::Completed { .. })
    }
}

/// Caller-supplied parameters for `retry_compose`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResubmitOptions {
    // Native value added to the outbound fee budget, paid by the caller
    pub extra_fee: Amount,
    // New floor; only the refund address may change it
    pub min_amount_out: Option<Amount>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefundReceipt {
    pub guid: Guid,
    pub refund_address: Address,
    pub token: TokenId,
    pub amount: Amount,
    pub native_returned: Amount,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions() {
        use ComposeState::*;
        let path = [Received, Composing, Deposited, SharesSent, Completed];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{:?} -> {:?}", pair[0], pair[1]);
        }
        assert!(Completed.is_terminal());
    }

    #[test]
    fn terminal_states_are_final() {
        use ComposeState::*;
        for next in [Received, Composing, ComposeFailed, Retried, Refunded, Completed] {
            assert!(!Refunded.can_transition_to(next));
            assert!(!Completed.can_transition_to(next));
        }
        assert!(ComposeFailed.can_transition_to(Retried));
        assert!(ComposeFailed.can_transition_to(Refunded));
        assert!(!Deposited.can_transition_to(Refunded));
    }
}
