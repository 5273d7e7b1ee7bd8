// Hub-side orchestration of vault deposits and redemptions arriving from other chains

pub mod types;
pub mod vault_composer;

pub use types::{
    ComposeOutcome, ComposeRecord, ComposeState, PendingCompose, RefundReceipt, ResubmitOptions,
};
pub use vault_composer::{ComposeEnv, Composer};
