use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use flora_contracts::models::{normalize_email, CostTable};

use crate::pipeline::FailurePolicy;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image";
pub const DEFAULT_STARTING_CREDITS: u64 = 30;

const DEFAULT_REQUEST_TIMEOUT_S: f64 = 90.0;
const DEFAULT_MOCK_DELAY_MS: u64 = 3000;

/// Credential baked in at build time; the lowest-precedence source.
const BUILD_DEFAULT_CREDENTIAL: Option<&str> = option_env!("FLORA_DEFAULT_API_KEY");

#[derive(Debug, Clone)]
pub struct StudioConfig {
    pub data_dir: PathBuf,
    pub default_credential: Option<String>,
    pub api_base: String,
    pub image_model: String,
    pub request_timeout: Duration,
    pub mock_delay: Duration,
    pub mock_image_url: Option<String>,
    pub failure_policy: FailurePolicy,
    pub admin_emails: Vec<String>,
    pub store_quota_bytes: Option<usize>,
    pub costs: CostTable,
    pub starting_credits: u64,
}

impl StudioConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            default_credential: BUILD_DEFAULT_CREDENTIAL.map(str::to_string),
            api_base: DEFAULT_API_BASE.to_string(),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
            request_timeout: Duration::from_secs_f64(DEFAULT_REQUEST_TIMEOUT_S),
            mock_delay: Duration::from_millis(DEFAULT_MOCK_DELAY_MS),
            mock_image_url: None,
            failure_policy: FailurePolicy::Fallback,
            admin_emails: Vec::new(),
            store_quota_bytes: None,
            costs: CostTable::default(),
            starting_credits: DEFAULT_STARTING_CREDITS,
        }
    }

    /// Defaults overlaid with `FLORA_*` / `GEMINI_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let data_dir = non_empty_env("FLORA_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(".flora"));
        let mut config = Self::new(data_dir);

        if let Some(key) = non_empty_env("GEMINI_API_KEY").or_else(|| non_empty_env("GOOGLE_API_KEY")) {
            config.default_credential = Some(key);
        }
        if let Some(base) = non_empty_env("GEMINI_API_BASE") {
            config.api_base = base.trim_end_matches('/').to_string();
        }
        if let Some(model) = non_empty_env("FLORA_IMAGE_MODEL") {
            config.image_model = model;
        }
        if let Some(raw) = non_empty_env("FLORA_REQUEST_TIMEOUT_S") {
            let seconds: f64 = raw
                .parse()
                .with_context(|| format!("FLORA_REQUEST_TIMEOUT_S is not a number: {raw}"))?;
            config.request_timeout = Duration::from_secs_f64(seconds.clamp(1.0, 600.0));
        }
        if let Some(raw) = non_empty_env("FLORA_MOCK_DELAY_MS") {
            let millis: u64 = raw
                .parse()
                .with_context(|| format!("FLORA_MOCK_DELAY_MS is not an integer: {raw}"))?;
            config.mock_delay = Duration::from_millis(millis);
        }
        config.mock_image_url = non_empty_env("FLORA_MOCK_IMAGE_URL");
        if let Some(raw) = non_empty_env("FLORA_FAILURE_POLICY") {
            config.failure_policy = raw.parse()?;
        }
        if let Some(raw) = non_empty_env("FLORA_ADMIN_EMAILS") {
            config.admin_emails = parse_admin_emails(&raw)?;
        }
        if let Some(raw) = non_empty_env("FLORA_STORE_QUOTA_BYTES") {
            let quota: usize = raw
                .parse()
                .with_context(|| format!("FLORA_STORE_QUOTA_BYTES is not an integer: {raw}"))?;
            config.store_quota_bytes = Some(quota);
        }
        let standard = parse_u64_env("FLORA_COST_STANDARD")?.unwrap_or(config.costs.standard);
        let humanize = parse_u64_env("FLORA_COST_HUMANIZE")?.unwrap_or(config.costs.humanize);
        config.costs = CostTable::new(standard, humanize, config.costs.api_cost_usd)?;
        if let Some(credits) = parse_u64_env("FLORA_STARTING_CREDITS")? {
            config.starting_credits = credits;
        }
        Ok(config)
    }

    pub fn with_default_credential(mut self, credential: Option<&str>) -> Self {
        self.default_credential = credential.map(str::to_string);
        self
    }

    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_mock_delay(mut self, delay: Duration) -> Self {
        self.mock_delay = delay;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_admin_emails(mut self, emails: &[&str]) -> Self {
        self.admin_emails = emails
            .iter()
            .filter_map(|email| normalize_email(email).ok())
            .collect();
        self
    }

    pub fn with_costs(mut self, costs: CostTable) -> Self {
        self.costs = costs;
        self
    }

    pub fn with_starting_credits(mut self, credits: u64) -> Self {
        self.starting_credits = credits;
        self
    }

    pub fn with_store_quota(mut self, quota_bytes: Option<usize>) -> Self {
        self.store_quota_bytes = quota_bytes;
        self
    }

    pub fn is_admin_email(&self, email: &str) -> bool {
        normalize_email(email)
            .map(|email| self.admin_emails.contains(&email))
            .unwrap_or(false)
    }

    pub fn state_path(&self) -> PathBuf {
        self.data_dir.join("state.json")
    }

    pub fn events_path(&self) -> PathBuf {
        self.data_dir.join("events.jsonl")
    }
}

fn parse_admin_emails(raw: &str) -> Result<Vec<String>> {
    raw.split([',', ';', ' '])
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(normalize_email)
        .collect()
}

fn parse_u64_env(key: &str) -> Result<Option<u64>> {
    non_empty_env(key)
        .map(|raw| {
            raw.parse::<u64>()
                .with_context(|| format!("{key} is not an integer: {raw}"))
        })
        .transpose()
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
