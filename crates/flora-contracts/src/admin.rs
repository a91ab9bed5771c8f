use indexmap::IndexMap;
use serde::Serialize;

use crate::ledger::{Transaction, TransactionKind};
use crate::models::{ResultSource, UserProfile};
use crate::usage::UsageEntry;

#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct UserFinancials {
    pub user_id: String,
    pub email: Option<String>,
    pub revenue_usd: f64,
    pub cost_usd: f64,
    pub profit_usd: f64,
    pub credits_purchased: u64,
    pub credits_spent: u64,
    pub generations: u64,
    pub mock_generations: u64,
}

impl UserFinancials {
    fn new(user_id: &str, email: Option<&str>) -> Self {
        Self {
            user_id: user_id.to_string(),
            email: email.map(str::to_string),
            ..Self::default()
        }
    }

    fn absorb(&mut self, other: &UserFinancials) {
        self.revenue_usd += other.revenue_usd;
        self.cost_usd += other.cost_usd;
        self.credits_purchased += other.credits_purchased;
        self.credits_spent += other.credits_spent;
        self.generations += other.generations;
        self.mock_generations += other.mock_generations;
        self.profit_usd = round_cents(self.revenue_usd - self.cost_usd);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinancialReport {
    pub rows: IndexMap<String, UserFinancials>,
    pub totals: UserFinancials,
}

/// Revenue, provider cost and profit per user.
///
/// Rows follow directory order; activity from ids outside the directory
/// (the guest owner, deleted users) is appended in first-seen order.
pub fn financial_report(
    users: &[UserProfile],
    transactions: &[Transaction],
    usage: &[UsageEntry],
) -> FinancialReport {
    let mut rows: IndexMap<String, UserFinancials> = users
        .iter()
        .map(|user| (user.id.clone(), UserFinancials::new(&user.id, Some(&user.email))))
        .collect();

    for tx in transactions {
        let row = rows
            .entry(tx.user_id.clone())
            .or_insert_with(|| UserFinancials::new(&tx.user_id, None));
        if tx.kind == TransactionKind::Purchase {
            row.revenue_usd += tx.amount_usd;
            row.credits_purchased += tx.credits.max(0) as u64;
        }
    }

    for entry in usage {
        let row = rows
            .entry(entry.user_id.clone())
            .or_insert_with(|| UserFinancials::new(&entry.user_id, None));
        row.generations += 1;
        row.credits_spent += entry.credits;
        row.cost_usd += entry.api_cost_usd;
        if entry.source == ResultSource::Mock {
            row.mock_generations += 1;
        }
    }

    let mut totals = UserFinancials::new("total", None);
    for row in rows.values_mut() {
        row.revenue_usd = round_cents(row.revenue_usd);
        row.cost_usd = round_micros(row.cost_usd);
        row.profit_usd = round_cents(row.revenue_usd - row.cost_usd);
        totals.absorb(row);
    }
    totals.revenue_usd = round_cents(totals.revenue_usd);
    totals.cost_usd = round_micros(totals.cost_usd);

    FinancialReport { rows, totals }
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn round_micros(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}
