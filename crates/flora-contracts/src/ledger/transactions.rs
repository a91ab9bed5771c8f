use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::store::{keys, KeyValueStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Grant,
    Purchase,
    Charge,
    Refund,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub user_id: String,
    pub kind: TransactionKind,
    /// Signed credit delta applied to the balance.
    pub credits: i64,
    #[serde(default)]
    pub amount_usd: f64,
    #[serde(default)]
    pub package_id: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    fn new(user_id: &str, kind: TransactionKind, credits: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            kind,
            credits,
            amount_usd: 0.0,
            package_id: None,
            note: None,
            created_at: Utc::now(),
        }
    }

    pub fn grant(user_id: &str, credits: u64, note: &str) -> Self {
        let mut tx = Self::new(user_id, TransactionKind::Grant, signed(credits));
        tx.note = Some(note.to_string());
        tx
    }

    pub fn purchase(user_id: &str, package_id: &str, credits: u64, amount_usd: f64) -> Self {
        let mut tx = Self::new(user_id, TransactionKind::Purchase, signed(credits));
        tx.package_id = Some(package_id.to_string());
        tx.amount_usd = amount_usd;
        tx
    }

    pub fn charge(user_id: &str, credits: u64, note: &str) -> Self {
        let mut tx = Self::new(user_id, TransactionKind::Charge, -signed(credits));
        tx.note = Some(note.to_string());
        tx
    }

    pub fn refund(user_id: &str, credits: u64, note: &str) -> Self {
        let mut tx = Self::new(user_id, TransactionKind::Refund, signed(credits));
        tx.note = Some(note.to_string());
        tx
    }
}

/// Credit deltas saturate instead of wrapping.
fn signed(credits: u64) -> i64 {
    i64::try_from(credits).unwrap_or(i64::MAX)
}

pub fn list_transactions(store: &KeyValueStore) -> Vec<Transaction> {
    store.get(keys::TRANSACTIONS, Vec::new())
}

pub fn transactions_for(store: &KeyValueStore, user_id: &str) -> Vec<Transaction> {
    list_transactions(store)
        .into_iter()
        .filter(|tx| tx.user_id == user_id)
        .collect()
}

pub fn record_transaction(store: &mut KeyValueStore, tx: Transaction) -> anyhow::Result<()> {
    store.append(keys::TRANSACTIONS, tx)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::store::{keys, KeyValueStore};

    use super::{
        list_transactions, record_transaction, transactions_for, Transaction, TransactionKind,
    };

    #[test]
    fn signed_deltas_follow_kind() {
        assert_eq!(Transaction::charge("u", 10, "edit").credits, -10);
        assert_eq!(Transaction::refund("u", 10, "edit").credits, 10);
        let purchase = Transaction::purchase("u", "pro", 500, 19.99);
        assert_eq!(purchase.kind, TransactionKind::Purchase);
        assert_eq!(purchase.package_id.as_deref(), Some("pro"));
    }

    #[test]
    fn oversized_credit_amounts_saturate() {
        assert_eq!(Transaction::grant("u", u64::MAX, "bulk").credits, i64::MAX);
        assert_eq!(Transaction::charge("u", u64::MAX, "edit").credits, -i64::MAX);
        assert_eq!(Transaction::purchase("u", "pro", 1 << 63, 1.0).credits, i64::MAX);
    }

    #[test]
    fn history_is_append_only_and_filterable() -> anyhow::Result<()> {
        let mut store = KeyValueStore::in_memory();
        record_transaction(&mut store, Transaction::grant("a", 30, "welcome"))?;
        record_transaction(&mut store, Transaction::charge("a", 10, "edit"))?;
        record_transaction(&mut store, Transaction::grant("b", 30, "welcome"))?;

        assert_eq!(list_transactions(&store).len(), 3);
        let a_rows = transactions_for(&store, "a");
        assert_eq!(a_rows.len(), 2);
        assert_eq!(a_rows.iter().map(|tx| tx.credits).sum::<i64>(), 20);
        Ok(())
    }

    #[test]
    fn unreadable_history_is_kept() -> anyhow::Result<()> {
        let mut store = KeyValueStore::in_memory();
        store.set(keys::TRANSACTIONS, &json!([{"id": "t-1", "kind": "mystery"}]))?;
        assert!(record_transaction(&mut store, Transaction::grant("a", 30, "welcome")).is_err());
        assert_eq!(store.get(keys::TRANSACTIONS, json!(null)), json!([{"id": "t-1", "kind": "mystery"}]));
        Ok(())
    }
}
