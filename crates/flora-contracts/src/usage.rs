use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Mode, ResultSource};
use crate::store::{keys, KeyValueStore};

/// One completed generation, kept for the admin rollup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEntry {
    pub id: String,
    pub user_id: String,
    pub mode: Mode,
    /// Credits kept after any refund.
    pub credits: u64,
    pub api_cost_usd: f64,
    pub source: ResultSource,
    #[serde(default)]
    pub fallback: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl UsageEntry {
    pub fn new(
        user_id: &str,
        mode: Mode,
        credits: u64,
        api_cost_usd: f64,
        source: ResultSource,
        fallback: Option<&str>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            mode,
            credits,
            api_cost_usd,
            source,
            fallback: fallback.map(str::to_string),
            created_at: Utc::now(),
        }
    }
}

pub fn list_usage(store: &KeyValueStore) -> Vec<UsageEntry> {
    store.get(keys::USAGE_LOG, Vec::new())
}

pub fn record_usage(store: &mut KeyValueStore, entry: UsageEntry) -> anyhow::Result<()> {
    store.append(keys::USAGE_LOG, entry)
}

#[cfg(test)]
mod tests {
    use crate::models::{Mode, ResultSource};
    use crate::store::KeyValueStore;

    use super::{list_usage, record_usage, UsageEntry};

    #[test]
    fn usage_log_appends() -> anyhow::Result<()> {
        let mut store = KeyValueStore::in_memory();
        record_usage(
            &mut store,
            UsageEntry::new("u-1", Mode::Edit, 10, 0.039, ResultSource::Service, None),
        )?;
        record_usage(
            &mut store,
            UsageEntry::new("u-1", Mode::Humanize, 0, 0.0, ResultSource::Mock, Some("no_credential")),
        )?;
        let rows = list_usage(&store);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].fallback.as_deref(), Some("no_credential"));
        Ok(())
    }
}
