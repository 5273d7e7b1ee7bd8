use ethers::types::{Address, U256};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::data_structures::{Amount, TokenId};
use crate::error::BridgeError;
use crate::onchain::ledger::Ledger;

/// floor(a * b / c) with a 256-bit intermediate.
pub fn mul_div_floor(a: Amount, b: Amount, c: Amount) -> Result<Amount, BridgeError> {
    if c == 0 {
        return Err(BridgeError::ArithmeticOverflow);
    }
    let result = U256::from(a) * U256::from(b) / U256::from(c);
    if result > U256::from(u128::MAX) {
        return Err(BridgeError::ArithmeticOverflow);
    }
    Ok(result.as_u128())
}

/// Exchange-rate state of the vault.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultPosition {
    pub total_assets: Amount,
    pub total_shares: Amount,
}

impl VaultPosition {
    fn ensure_sound(&self) -> Result<(), BridgeError> {
        if self.total_shares > 0 && self.total_assets == 0 {
            return Err(BridgeError::CorruptExchangeRate {
                total_assets: self.total_assets,
                total_shares: self.total_shares,
            });
        }
        Ok(())
    }

    /// shares = floor(assets * totalShares / totalAssets); 1:1 at genesis.
    pub fn convert_to_shares(&self, assets: Amount) -> Result<Amount, BridgeError> {
        self.ensure_sound()?;
        if self.total_shares == 0 {
            return Ok(assets);
        }
        mul_div_floor(assets, self.total_shares, self.total_assets)
    }

    /// assets = floor(shares * totalAssets / totalShares).
    pub fn convert_to_assets(&self, shares: Amount) -> Result<Amount, BridgeError> {
        self.ensure_sound()?;
        if self.total_shares == 0 {
            return Err(BridgeError::InvalidAmount {
                reason: "no shares outstanding".to_string(),
            });
        }
        mul_div_floor(shares, self.total_assets, self.total_shares)
    }
}

// Single-asset ERC-4626 style vault. Every deposit/redeem is one read-modify-write
// of the position under `&mut self`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vault {
    vault_id: String,
    address: Address,
    owner: Address,
    asset: TokenId,
    share: TokenId,
    position: VaultPosition,
    paused: bool,
}

impl Vault {
    pub fn new(vault_id: impl Into<String>, address: Address, owner: Address, asset: TokenId, share: TokenId) -> Self {
        Vault {
            vault_id: vault_id.into(),
            address,
            owner,
            asset,
            share,
            position: VaultPosition::default(),
            paused: false,
        }
    }

    pub fn vault_id(&self) -> &str {
        &self.vault_id
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn asset(&self) -> &TokenId {
        &self.asset
    }

    pub fn share(&self) -> &TokenId {
        &self.share
    }

    pub fn position(&self) -> VaultPosition {
        self.position
    }

    pub fn total_assets(&self) -> Amount {
        self.position.total_assets
    }

    pub fn total_supply(&self) -> Amount {
        self.position.total_shares
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    fn ensure_owner(&self, caller: Address, action: &str) -> Result<(), BridgeError> {
        if caller != self.owner {
            return Err(BridgeError::Unauthorized {
                caller,
                action: action.to_string(),
            });
        }
        Ok(())
    }

    fn ensure_live(&self) -> Result<(), BridgeError> {
        if self.paused {
            return Err(BridgeError::VaultPaused);
        }
        Ok(())
    }

    pub fn set_paused(&mut self, caller: Address, paused: bool) -> Result<(), BridgeError> {
        self.ensure_owner(caller, "pause vault")?;
        self.paused = paused;
        info!("Vault {}: paused={}", self.vault_id, paused);
        Ok(())
    }

    pub fn preview_deposit(&self, assets: Amount) -> Result<Amount, BridgeError> {
        self.position.convert_to_shares(assets)
    }

    pub fn preview_redeem(&self, shares: Amount) -> Result<Amount, BridgeError> {
        self.position.convert_to_assets(shares)
    }

    pub fn deposit(
        &mut self,
        ledger: &mut Ledger,
        caller: Address,
        assets: Amount,
        receiver: Address,
    ) -> Result<Amount, BridgeError> {
        self.deposit_with_min(ledger, caller, assets, receiver, 0)
    }

    /// Pulls `assets` from `caller`, mints shares to `receiver`.
    pub fn deposit_with_min(
        &mut self,
        ledger: &mut Ledger,
        caller: Address,
        assets: Amount,
        receiver: Address,
        min_shares_out: Amount,
    ) -> Result<Amount, BridgeError> {
        self.ensure_live()?;
        if assets == 0 {
            return Err(BridgeError::InvalidAmount {
                reason: "cannot deposit zero".to_string(),
            });
        }
        let shares = self.preview_deposit(assets)?;
        if shares == 0 {
            return Err(BridgeError::ZeroShares);
        }
        if shares < min_shares_out {
            return Err(BridgeError::SlippageExceeded {
                min_amount_out: min_shares_out,
                actual: shares,
            });
        }
        let next = VaultPosition {
            total_assets: self
                .position
                .total_assets
                .checked_add(assets)
                .ok_or(BridgeError::ArithmeticOverflow)?,
            total_shares: self
                .position
                .total_shares
                .checked_add(shares)
                .ok_or(BridgeError::ArithmeticOverflow)?,
        };

        ledger.transfer(&self.asset, caller, self.address, assets)?;
        if let Err(e) = ledger.mint(&self.share, receiver, shares) {
            // Undo the pull so the ledger is untouched on failure
            ledger.transfer(&self.asset, self.address, caller, assets)?;
            return Err(e);
        }
        self.position = next;

        info!(
            "Vault {}: deposit {} assets -> {} shares for {:?} (position {}/{})",
            self.vault_id, assets, shares, receiver, next.total_assets, next.total_shares
        );
        Ok(shares)
    }

    pub fn redeem(
        &mut self,
        ledger: &mut Ledger,
        caller: Address,
        shares: Amount,
        receiver: Address,
    ) -> Result<Amount, BridgeError> {
        self.redeem_with_min(ledger, caller, shares, receiver, 0)
    }

    /// Burns `caller`'s shares, pays assets to `receiver`.
    pub fn redeem_with_min(
        &mut self,
        ledger: &mut Ledger,
        caller: Address,
        shares: Amount,
        receiver: Address,
        min_assets_out: Amount,
    ) -> Result<Amount, BridgeError> {
        self.ensure_live()?;
        if shares == 0 {
            return Err(BridgeError::InvalidAmount {
                reason: "cannot redeem zero".to_string(),
            });
        }
        if shares > self.position.total_shares {
            return Err(BridgeError::InvalidAmount {
                reason: format!(
                    "redeeming {} of {} outstanding shares",
                    shares, self.position.total_shares
                ),
            });
        }
        let assets = self.preview_redeem(shares)?;
        if assets < min_assets_out {
            return Err(BridgeError::SlippageExceeded {
                min_amount_out: min_assets_out,
                actual: assets,
            });
        }
        if assets == 0 {
            return Err(BridgeError::InvalidAmount {
                reason: format!("{} shares redeem for zero assets", shares),
            });
        }
        ledger.ensure_balance(&self.share, caller, shares)?;
        let available = ledger.balance_of(&self.asset, &self.address);
        if available < assets {
            warn!(
                "Vault {}: reported assets {} exceed held {}",
                self.vault_id, self.position.total_assets, available
            );
            return Err(BridgeError::InsufficientLiquidity {
                token: self.asset.clone(),
                required: assets,
                available,
            });
        }

        ledger.burn(&self.share, caller, shares)?;
        ledger.transfer(&self.asset, self.address, receiver, assets)?;
        self.position.total_shares -= shares;
        self.position.total_assets = self.position.total_assets.saturating_sub(assets);

        info!(
            "Vault {}: redeem {} shares -> {} assets for {:?} (position {}/{})",
            self.vault_id,
            shares,
            assets,
            receiver,
            self.position.total_assets,
            self.position.total_shares
        );
        Ok(assets)
    }

    /// Assets sent in without minting shares; raises the share price.
    pub fn donate(&mut self, ledger: &mut Ledger, from: Address, assets: Amount) -> Result<(), BridgeError> {
        let total_assets = self
            .position
            .total_assets
            .checked_add(assets)
            .ok_or(BridgeError::ArithmeticOverflow)?;
        ledger.transfer(&self.asset, from, self.address, assets)?;
        self.position.total_assets = total_assets;
        Ok(())
    }

    /// Strategy report of assets under management (gain or loss).
    pub fn report_total_assets(&mut self, caller: Address, total_assets: Amount) -> Result<(), BridgeError> {
        self.ensure_owner(caller, "report total assets")?;
        info!(
            "Vault {}: total assets reported {} -> {}",
            self.vault_id, self.position.total_assets, total_assets
        );
        self.position.total_assets = total_assets;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u64) -> Address {
        Address::from_low_u64_be(n)
    }

    fn owner() -> Address {
        addr(0xA0)
    }

    fn setup(seed: Amount) -> (Vault, Ledger) {
        let mut vault = Vault::new("eagle", addr(0x50), owner(), TokenId::new("USD1"), TokenId::new("EAGLE"));
        let mut ledger = Ledger::new();
        ledger.mint(vault.asset(), owner(), 1_000_000).unwrap();
        ledger.mint(vault.asset(), addr(1), 1_000_000).unwrap();
        if seed > 0 {
            vault.deposit(&mut ledger, owner(), seed, owner()).unwrap();
        }
        (vault, ledger)
    }

    #[test]
    fn genesis_deposit_is_one_to_one() {
        let (mut vault, mut ledger) = setup(0);
        assert_eq!(vault.preview_deposit(250).unwrap(), 250);
        let shares = vault.deposit(&mut ledger, addr(1), 250, addr(1)).unwrap();
        assert_eq!(shares, 250);
        assert_eq!(vault.position(), VaultPosition { total_assets: 250, total_shares: 250 });
    }

    #[test]
    fn preview_matches_deposit_across_rates() {
        // 1000/1000, then a donation moves the rate
        let (mut vault, mut ledger) = setup(1_000);
        for (donation, deposit) in [(0, 100), (100, 100), (37, 333), (0, 50)] {
            if donation > 0 {
                vault.donate(&mut ledger, owner(), donation).unwrap();
            }
            let pos = vault.position();
            let preview = vault.preview_deposit(deposit).unwrap();
            let expected = deposit * pos.total_shares / pos.total_assets;
            assert_eq!(preview, expected);
            let minted = vault.deposit(&mut ledger, addr(1), deposit, addr(1)).unwrap();
            assert_eq!(minted, preview);
        }
    }

    #[test]
    fn deposit_floor_and_slippage() {
        let (mut vault, mut ledger) = setup(1_000);
        vault.donate(&mut ledger, owner(), 100).unwrap();
        // 100 * 1000 / 1100 = 90.9 -> 90
        assert!(matches!(
            vault.deposit_with_min(&mut ledger, addr(1), 100, addr(1), 91),
            Err(BridgeError::SlippageExceeded { actual: 90, .. })
        ));
        assert_eq!(vault.total_assets(), 1_100);
        let shares = vault
            .deposit_with_min(&mut ledger, addr(1), 100, addr(1), 90)
            .unwrap();
        assert_eq!(shares, 90);
    }

    #[test]
    fn zero_share_deposit_fails() {
        let (mut vault, mut ledger) = setup(10);
        vault.report_total_assets(owner(), 1_000).unwrap();
        // 5 * 10 / 1000 = 0
        assert_eq!(
            vault.deposit(&mut ledger, addr(1), 5, addr(1)),
            Err(BridgeError::ZeroShares)
        );
    }

    #[test]
    fn paused_vault_refuses_deposit_and_redeem() {
        let (mut vault, mut ledger) = setup(1_000);
        assert!(vault.set_paused(addr(1), true).is_err());
        vault.set_paused(owner(), true).unwrap();
        assert_eq!(
            vault.deposit(&mut ledger, addr(1), 100, addr(1)),
            Err(BridgeError::VaultPaused)
        );
        assert_eq!(
            vault.redeem(&mut ledger, owner(), 100, owner()),
            Err(BridgeError::VaultPaused)
        );
    }

    #[test]
    fn corrupt_rate_is_detected() {
        let (mut vault, mut ledger) = setup(1_000);
        vault.report_total_assets(owner(), 0).unwrap();
        assert!(matches!(
            vault.deposit(&mut ledger, addr(1), 100, addr(1)),
            Err(BridgeError::CorruptExchangeRate { total_assets: 0, total_shares: 1_000 })
        ));
        assert!(matches!(
            vault.preview_redeem(10),
            Err(BridgeError::CorruptExchangeRate { .. })
        ));
    }

    #[test]
    fn redeem_pays_current_rate() {
        let (mut vault, mut ledger) = setup(1_000);
        vault.donate(&mut ledger, owner(), 500).unwrap();
        assert_eq!(vault.preview_redeem(100).unwrap(), 150);
        let assets = vault.redeem(&mut ledger, owner(), 100, addr(7)).unwrap();
        assert_eq!(assets, 150);
        assert_eq!(ledger.balance_of(vault.asset(), &addr(7)), 150);
        assert_eq!(vault.position(), VaultPosition { total_assets: 1_350, total_shares: 900 });
    }

    #[test]
    fn redeem_requires_share_balance() {
        let (mut vault, mut ledger) = setup(1_000);
        assert!(matches!(
            vault.redeem(&mut ledger, addr(1), 10, addr(1)),
            Err(BridgeError::InsufficientBalance { .. })
        ));
        assert_eq!(vault.total_supply(), 1_000);
    }

    #[test]
    fn mul_div_uses_wide_intermediate() {
        let big = u128::MAX / 2;
        assert_eq!(mul_div_floor(big, 4, 4).unwrap(), big);
        assert!(mul_div_floor(u128::MAX, 2, 1).is_err());
        assert!(mul_div_floor(1, 1, 0).is_err());
    }
}
