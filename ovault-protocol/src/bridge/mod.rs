pub mod adapter;
pub mod fees;

pub use adapter::{
    AdapterKind, AdapterSettings, BridgeAdapter, FeeQuote, ReceiveOutcome, SendParams,
    SendReceipt,
};
pub use fees::{FeeBreakdown, FeeSchedule, SendOptions, SlippageMode};
