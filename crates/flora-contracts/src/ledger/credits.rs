use std::collections::BTreeMap;

use crate::errors::GenerationError;
use crate::store::{keys, KeyValueStore};

/// Credit balance of one signed-in user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CreditLedger {
    balance: u64,
}

impl CreditLedger {
    pub fn new(balance: u64) -> Self {
        Self { balance }
    }

    pub fn balance(&self) -> u64 {
        self.balance
    }

    pub fn can_afford(&self, cost: u64) -> bool {
        self.balance >= cost
    }

    /// Deducts `cost` only when it is affordable; the balance never goes
    /// below zero.
    pub fn charge(&mut self, cost: u64) -> Result<u64, GenerationError> {
        if !self.can_afford(cost) {
            return Err(GenerationError::InsufficientCredits {
                balance: self.balance,
                cost,
            });
        }
        self.balance -= cost;
        Ok(self.balance)
    }

    pub fn refund(&mut self, cost: u64) -> u64 {
        self.balance = self.balance.saturating_add(cost);
        self.balance
    }

    pub fn deposit(&mut self, credits: u64) -> u64 {
        self.refund(credits)
    }

    pub fn load(store: &KeyValueStore, user_id: &str) -> Self {
        let balances: BTreeMap<String, u64> = store.get(keys::CREDIT_BALANCE, BTreeMap::new());
        Self::new(balances.get(user_id).copied().unwrap_or_default())
    }

    pub fn save(&self, store: &mut KeyValueStore, user_id: &str) -> anyhow::Result<()> {
        let mut balances: BTreeMap<String, u64> =
            store.get(keys::CREDIT_BALANCE, BTreeMap::new());
        balances.insert(user_id.to_string(), self.balance);
        store.set(keys::CREDIT_BALANCE, &balances)
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::GenerationError;
    use crate::store::KeyValueStore;

    use super::CreditLedger;

    #[test]
    fn can_afford_iff_balance_covers_cost() {
        for balance in [0u64, 5, 10, 11] {
            for cost in [0u64, 5, 10, 20] {
                assert_eq!(CreditLedger::new(balance).can_afford(cost), balance >= cost);
            }
        }
    }

    #[test]
    fn charge_refuses_unaffordable_cost_without_mutation() {
        let mut ledger = CreditLedger::new(5);
        assert_eq!(
            ledger.charge(10),
            Err(GenerationError::InsufficientCredits { balance: 5, cost: 10 })
        );
        assert_eq!(ledger.balance(), 5);
    }

    #[test]
    fn charge_then_refund_restores_balance() -> anyhow::Result<()> {
        let mut ledger = CreditLedger::new(20);
        assert_eq!(ledger.charge(10)?, 10);
        assert_eq!(ledger.refund(10), 20);
        Ok(())
    }

    #[test]
    fn charge_exact_balance_reaches_zero() -> anyhow::Result<()> {
        let mut ledger = CreditLedger::new(10);
        assert_eq!(ledger.charge(10)?, 0);
        assert!(!ledger.can_afford(1));
        Ok(())
    }

    #[test]
    fn balances_are_kept_per_user() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("state.json");
        let mut store = KeyValueStore::open(&path);
        CreditLedger::new(30).save(&mut store, "u-1")?;
        CreditLedger::new(5).save(&mut store, "u-2")?;

        let reopened = KeyValueStore::open(&path);
        assert_eq!(CreditLedger::load(&reopened, "u-1").balance(), 30);
        assert_eq!(CreditLedger::load(&reopened, "u-2").balance(), 5);
        assert_eq!(CreditLedger::load(&reopened, "nobody").balance(), 0);
        Ok(())
    }
}
