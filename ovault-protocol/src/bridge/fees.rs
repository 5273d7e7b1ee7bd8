use serde::{Deserialize, Serialize};

use crate::data_structures::Amount;
use crate::error::BridgeError;

/// Maximum bridge token fee (1%).
pub const MAX_FEE_BPS: u16 = 100;

/// Basis points denominator.
pub const BPS_DENOMINATOR: u128 = 10_000;

/// Fixed part of every message: recipient, amount, origin.
pub const MESSAGE_HEADER_BYTES: usize = 32 + 8 + 32;

/// Executor options attached to a send.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendOptions {
    /// Gas for `receive` on the destination.
    pub executor_gas: u64,
    /// Gas for the compose call on the destination.
    pub compose_gas: u64,
    /// Native value forwarded to the compose target.
    pub compose_value: Amount,
}

impl SendOptions {
    /// Caller options raised to the enforced minimums of the route.
    pub fn merge_enforced(&self, enforced: &SendOptions) -> SendOptions {
        SendOptions {
            executor_gas: self.executor_gas.max(enforced.executor_gas),
            compose_gas: self.compose_gas.max(enforced.compose_gas),
            compose_value: self.compose_value.max(enforced.compose_value),
        }
    }
}

/// Native-fee pricing of the delivery layer on one chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub base_fee: Amount,
    pub per_byte_fee: Amount,
    pub per_verifier_fee: Amount,
    pub gas_price: Amount,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        FeeSchedule {
            base_fee: 1_000,
            per_byte_fee: 2,
            per_verifier_fee: 500,
            gas_price: 1,
        }
    }
}

/// Itemized native fee.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeBreakdown {
    pub base: Amount,
    pub payload: Amount,
    pub verification: Amount,
    pub execution: Amount,
    pub compose_value: Amount,
}

impl FeeBreakdown {
    pub fn total(&self) -> Result<Amount, BridgeError> {
        [self.payload, self.verification, self.execution, self.compose_value]
            .iter()
            .try_fold(self.base, |acc, x| acc.checked_add(*x))
            .ok_or(BridgeError::ArithmeticOverflow)
    }
}

impl FeeSchedule {
    pub fn estimate(
        &self,
        payload_size: usize,
        verifier_count: usize,
        options: &SendOptions,
    ) -> Result<FeeBreakdown, BridgeError> {
        let bytes = (MESSAGE_HEADER_BYTES + payload_size) as u128;
        let gas = u128::from(options.executor_gas) + u128::from(options.compose_gas);
        Ok(FeeBreakdown {
            base: self.base_fee,
            payload: self
                .per_byte_fee
                .checked_mul(bytes)
                .ok_or(BridgeError::ArithmeticOverflow)?,
            verification: self
                .per_verifier_fee
                .checked_mul(verifier_count as u128)
                .ok_or(BridgeError::ArithmeticOverflow)?,
            execution: self
                .gas_price
                .checked_mul(gas)
                .ok_or(BridgeError::ArithmeticOverflow)?,
            compose_value: options.compose_value,
        })
    }
}

/// Token fee in basis points, rounded down.
pub fn calculate_token_fee(amount: Amount, fee_bps: u16) -> Amount {
    // amount * bps can only overflow for amounts near u128::MAX; split to stay exact
    let bps = u128::from(fee_bps);
    (amount / BPS_DENOMINATOR) * bps + (amount % BPS_DENOMINATOR) * bps / BPS_DENOMINATOR
}

/// Truncates to a multiple of the shared-decimals conversion rate.
pub fn remove_dust(amount: Amount, decimal_conversion_rate: Amount) -> Amount {
    if decimal_conversion_rate <= 1 {
        return amount;
    }
    (amount / decimal_conversion_rate) * decimal_conversion_rate
}

/// Which amount a slippage floor is compared with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlippageMode {
    /// Gross amount after dust removal, before the bridge token fee.
    BeforeFee,
    /// Amount the recipient actually receives.
    #[default]
    AfterFee,
}

impl SlippageMode {
    pub fn checked_amount(&self, gross: Amount, net: Amount) -> Amount {
        match self {
            SlippageMode::BeforeFee => gross,
            SlippageMode::AfterFee => net,
        }
    }

    pub fn check(&self, gross: Amount, net: Amount, min_amount_out: Amount) -> Result<(), BridgeError> {
        let actual = self.checked_amount(gross, net);
        if actual < min_amount_out {
            return Err(BridgeError::SlippageExceeded {
                min_amount_out,
                actual,
            });
        }
        Ok(())
    }
}
