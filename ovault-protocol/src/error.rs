use ethers::types::Address;
use thiserror::Error;

use crate::data_structures::{Amount, ChainId, Guid, TokenId};
use crate::routing::security::VerifierId;

/// Coarse classification used by operators to tell failure classes apart.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Configuration,
    Fee,
    Slippage,
    Balance,
    State,
    Resolution,
    Delivery,
    Storage,
}

/// What the delivery layer does with a packet whose receive failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Disposition {
    /// Held at the head of its path and attempted again later.
    Stuck,
    /// Fatal to the message; dead-lettered with the error.
    Rejected,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    // Configuration errors
    #[error("No route configured on chain {local_chain_id} for remote chain {remote_chain_id}")]
    NoRoute {
        local_chain_id: ChainId,
        remote_chain_id: ChainId,
    },

    #[error("Sender mismatch for remote chain {remote_chain_id}: expected {expected:?}, got {got:?}")]
    SenderMismatch {
        remote_chain_id: ChainId,
        expected: Address,
        got: Address,
    },

    #[error("Security config missing on chain {local_chain_id} for remote chain {remote_chain_id}")]
    SecurityConfigMissing {
        local_chain_id: ChainId,
        remote_chain_id: ChainId,
    },

    #[error("Security config mismatch on path {path}: {detail}")]
    SecurityConfigMismatch { path: String, detail: String },

    #[error("Invalid security config: {reason}")]
    InvalidSecurityConfig { reason: String },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("Unauthorized: {caller:?} may not {action}")]
    Unauthorized { caller: Address, action: String },

    #[error("Compose from untrusted adapter {adapter:?}")]
    UntrustedComposeSource { adapter: Address },

    #[error("Unknown adapter {address:?} on chain {chain_id}")]
    UnknownAdapter { chain_id: ChainId, address: Address },

    #[error("Unknown chain {chain_id}")]
    UnknownChain { chain_id: ChainId },

    #[error("Packet for chain {got} delivered to chain {expected}")]
    WrongDestination { expected: ChainId, got: ChainId },

    #[error("No composer deployed on chain {chain_id}")]
    ComposerNotDeployed { chain_id: ChainId },

    #[error("No vault deployed on chain {chain_id}")]
    VaultNotDeployed { chain_id: ChainId },

    #[error("Unknown vault {vault_id}")]
    UnknownVault { vault_id: String },

    #[error("Unknown verifier {verifier}")]
    UnknownVerifier { verifier: VerifierId },

    // Fee errors
    #[error("Insufficient fee: required {required}, provided {provided}")]
    InsufficientFee { required: Amount, provided: Amount },

    // Slippage errors
    #[error("Slippage exceeded: minimum {min_amount_out}, actual {actual}")]
    SlippageExceeded { min_amount_out: Amount, actual: Amount },

    // Balance errors
    #[error("Insufficient {token} balance for {account:?}: required {required}, available {available}")]
    InsufficientBalance {
        token: TokenId,
        account: Address,
        required: Amount,
        available: Amount,
    },

    #[error("Insufficient {token} allowance from {owner:?} to {spender:?}: required {required}, available {available}")]
    InsufficientAllowance {
        token: TokenId,
        owner: Address,
        spender: Address,
        required: Amount,
        available: Amount,
    },

    #[error("Insufficient {token} liquidity in lockbox: required {required}, available {available}")]
    InsufficientLiquidity {
        token: TokenId,
        required: Amount,
        available: Amount,
    },

    #[error("Invalid amount: {reason}")]
    InvalidAmount { reason: String },

    #[error("Deposit would mint zero shares")]
    ZeroShares,

    #[error("Arithmetic overflow")]
    ArithmeticOverflow,

    // State errors
    #[error("Adapter {adapter:?} is paused")]
    AdapterPaused { adapter: Address },

    #[error("Vault is paused")]
    VaultPaused,

    #[error("Corrupt exchange rate: total assets {total_assets}, total shares {total_shares}")]
    CorruptExchangeRate {
        total_assets: Amount,
        total_shares: Amount,
    },

    #[error("Malformed compose payload: {reason}")]
    MalformedComposePayload { reason: String },

    #[error("Compose action mismatch: {reason}")]
    ComposeActionMismatch { reason: String },

    // Resolution errors
    #[error("Unknown compose {guid:?}")]
    UnknownCompose { guid: Guid },

    #[error("Compose {guid:?} already resolved")]
    AlreadyResolved { guid: Guid },

    #[error("Compose {guid:?} already recorded")]
    DuplicateCompose { guid: Guid },

    // Delivery errors
    #[error("Out of order on path {path}: expected nonce {expected}, got {got}")]
    OutOfOrder { path: String, expected: u64, got: u64 },

    #[error("Verification pending on path {path}: missing {missing:?}")]
    VerificationPending { path: String, missing: Vec<VerifierId> },

    #[error("Unknown packet {guid:?}")]
    UnknownPacket { guid: Guid },

    // Storage errors
    #[error("Storage error: {reason}")]
    Storage { reason: String },
}

impl BridgeError {
    pub fn kind(&self) -> ErrorKind {
        use BridgeError::*;
        match self {
            NoRoute { .. }
            | SenderMismatch { .. }
            | SecurityConfigMissing { .. }
            | SecurityConfigMismatch { .. }
            | InvalidSecurityConfig { .. }
            | InvalidConfig { .. }
            | Unauthorized { .. }
            | UntrustedComposeSource { .. }
            | UnknownAdapter { .. }
            | UnknownChain { .. }
            | WrongDestination { .. }
            | ComposerNotDeployed { .. }
            | VaultNotDeployed { .. }
            | UnknownVault { .. }
            | UnknownVerifier { .. } => ErrorKind::Configuration,
            InsufficientFee { .. } => ErrorKind::Fee,
            SlippageExceeded { .. } => ErrorKind::Slippage,
            InsufficientBalance { .. }
            | InsufficientAllowance { .. }
            | InsufficientLiquidity { .. }
            | InvalidAmount { .. }
            | ZeroShares
            | ArithmeticOverflow => ErrorKind::Balance,
            AdapterPaused { .. }
            | VaultPaused
            | CorruptExchangeRate { .. }
            | MalformedComposePayload { .. }
            | ComposeActionMismatch { .. } => ErrorKind::State,
            UnknownCompose { .. } | AlreadyResolved { .. } | DuplicateCompose { .. } => {
                ErrorKind::Resolution
            }
            OutOfOrder { .. } | VerificationPending { .. } | UnknownPacket { .. } => {
                ErrorKind::Delivery
            }
            Storage { .. } => ErrorKind::Storage,
        }
    }

    /// Receive-side errors that may clear without the message changing are held;
    /// everything else is fatal to the message.
    pub fn disposition(&self) -> Disposition {
        use BridgeError::*;
        match self {
            SecurityConfigMissing { .. }
            | SecurityConfigMismatch { .. }
            | VerificationPending { .. }
            | OutOfOrder { .. }
            | AdapterPaused { .. }
            | InsufficientLiquidity { .. } => Disposition::Stuck,
            _ => Disposition::Rejected,
        }
    }

    pub fn is_configuration(&self) -> bool {
        self.kind() == ErrorKind::Configuration
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(e: std::io::Error) -> Self {
        BridgeError::Storage {
            reason: e.to_string(),
        }
    }
}
