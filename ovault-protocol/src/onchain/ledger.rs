use std::collections::BTreeMap;

use ethers::types::Address;
use serde::{Deserialize, Serialize};

use crate::data_structures::{Amount, TokenId};
use crate::error::BridgeError;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
struct TokenState {
    total_supply: Amount,
    balances: BTreeMap<Address, Amount>,
    // owner -> spender -> allowance
    allowances: BTreeMap<Address, BTreeMap<Address, Amount>>,
}

/// Token balances of a single chain, including its native gas token.
///
/// Every mutating call either fully applies or leaves the ledger untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ledger {
    tokens: BTreeMap<TokenId, TokenState>,
}

impl Ledger {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn balance_of(&self, token: &TokenId, account: &Address) -> Amount {
        self.tokens
            .get(token)
            .and_then(|t| t.balances.get(account))
            .copied()
            .unwrap_or(0)
    }

    pub fn total_supply(&self, token: &TokenId) -> Amount {
        self.tokens.get(token).map_or(0, |t| t.total_supply)
    }

    pub fn allowance(&self, token: &TokenId, owner: &Address, spender: &Address) -> Amount {
        self.tokens
            .get(token)
            .and_then(|t| t.allowances.get(owner))
            .and_then(|a| a.get(spender))
            .copied()
            .unwrap_or(0)
    }

    pub fn mint(&mut self, token: &TokenId, to: Address, amount: Amount) -> Result<(), BridgeError> {
        let state = self.tokens.entry(token.clone()).or_default();
        let supply = state
            .total_supply
            .checked_add(amount)
            .ok_or(BridgeError::ArithmeticOverflow)?;
        // balance <= supply, so this cannot overflow once supply didn't
        *state.balances.entry(to).or_insert(0) += amount;
        state.total_supply = supply;
        Ok(())
    }

    pub fn burn(&mut self, token: &TokenId, from: Address, amount: Amount) -> Result<(), BridgeError> {
        self.ensure_balance(token, from, amount)?;
        if let Some(state) = self.tokens.get_mut(token) {
            if let Some(balance) = state.balances.get_mut(&from) {
                *balance -= amount;
            }
            state.total_supply -= amount;
        }
        Ok(())
    }

    pub fn transfer(
        &mut self,
        token: &TokenId,
        from: Address,
        to: Address,
        amount: Amount,
    ) -> Result<(), BridgeError> {
        self.ensure_balance(token, from, amount)?;
        if amount == 0 || from == to {
            return Ok(());
        }
        if let Some(state) = self.tokens.get_mut(token) {
            if let Some(balance) = state.balances.get_mut(&from) {
                *balance -= amount;
            }
            *state.balances.entry(to).or_insert(0) += amount;
        }
        Ok(())
    }

    pub fn approve(&mut self, token: &TokenId, owner: Address, spender: Address, amount: Amount) {
        self.tokens
            .entry(token.clone())
            .or_default()
            .allowances
            .entry(owner)
            .or_default()
            .insert(spender, amount);
    }

    /// Spends `spender`'s allowance over `from`'s balance.
    pub fn transfer_from(
        &mut self,
        token: &TokenId,
        spender: Address,
        from: Address,
        to: Address,
        amount: Amount,
    ) -> Result<(), BridgeError> {
        self.ensure_allowance(token, from, spender, amount)?;
        self.transfer(token, from, to, amount)?;
        if let Some(allowance) = self
            .tokens
            .get_mut(token)
            .and_then(|t| t.allowances.get_mut(&from))
            .and_then(|a| a.get_mut(&spender))
        {
            *allowance -= amount;
        }
        Ok(())
    }

    pub fn ensure_balance(
        &self,
        token: &TokenId,
        account: Address,
        required: Amount,
    ) -> Result<(), BridgeError> {
        let available = self.balance_of(token, &account);
        if available < required {
            return Err(BridgeError::InsufficientBalance {
                token: token.clone(),
                account,
                required,
                available,
            });
        }
        Ok(())
    }

    pub fn ensure_allowance(
        &self,
        token: &TokenId,
        owner: Address,
        spender: Address,
        required: Amount,
    ) -> Result<(), BridgeError> {
        let available = self.allowance(token, &owner, &spender);
        if available < required {
            return Err(BridgeError::InsufficientAllowance {
                token: token.clone(),
                owner,
                spender,
                required,
                available,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usd1() -> TokenId {
        TokenId::new("USD1")
    }

    fn addr(n: u64) -> Address {
        Address::from_low_u64_be(n)
    }

    #[test]
    fn mint_burn_track_supply() {
        let mut ledger = Ledger::new();
        ledger.mint(&usd1(), addr(1), 500).unwrap();
        ledger.mint(&usd1(), addr(2), 250).unwrap();
        assert_eq!(ledger.total_supply(&usd1()), 750);

        ledger.burn(&usd1(), addr(1), 200).unwrap();
        assert_eq!(ledger.balance_of(&usd1(), &addr(1)), 300);
        assert_eq!(ledger.total_supply(&usd1()), 550);

        let err = ledger.burn(&usd1(), addr(2), 251).unwrap_err();
        assert!(matches!(err, BridgeError::InsufficientBalance { available: 250, .. }));
        assert_eq!(ledger.total_supply(&usd1()), 550);
    }

    #[test]
    fn transfer_requires_balance() {
        let mut ledger = Ledger::new();
        ledger.mint(&usd1(), addr(1), 100).unwrap();
        assert!(ledger.transfer(&usd1(), addr(1), addr(2), 101).is_err());
        ledger.transfer(&usd1(), addr(1), addr(2), 60).unwrap();
        assert_eq!(ledger.balance_of(&usd1(), &addr(1)), 40);
        assert_eq!(ledger.balance_of(&usd1(), &addr(2)), 60);
        assert_eq!(ledger.total_supply(&usd1()), 100);
    }

    #[test]
    fn transfer_from_spends_allowance() {
        let mut ledger = Ledger::new();
        ledger.mint(&usd1(), addr(1), 100).unwrap();

        let err = ledger
            .transfer_from(&usd1(), addr(9), addr(1), addr(9), 10)
            .unwrap_err();
        assert!(matches!(err, BridgeError::InsufficientAllowance { .. }));

        ledger.approve(&usd1(), addr(1), addr(9), 50);
        ledger
            .transfer_from(&usd1(), addr(9), addr(1), addr(9), 30)
            .unwrap();
        assert_eq!(ledger.allowance(&usd1(), &addr(1), &addr(9)), 20);
        assert_eq!(ledger.balance_of(&usd1(), &addr(9)), 30);
    }

    #[test]
    fn failed_transfer_from_leaves_allowance() {
        let mut ledger = Ledger::new();
        ledger.mint(&usd1(), addr(1), 5).unwrap();
        ledger.approve(&usd1(), addr(1), addr(9), 50);
        assert!(ledger
            .transfer_from(&usd1(), addr(9), addr(1), addr(9), 10)
            .is_err());
        assert_eq!(ledger.allowance(&usd1(), &addr(1), &addr(9)), 50);
        assert_eq!(ledger.balance_of(&usd1(), &addr(1)), 5);
    }
}
