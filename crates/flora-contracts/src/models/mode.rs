use std::fmt;
use std::str::FromStr;

use anyhow::bail;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Edit,
    Create,
    Humanize,
}

impl Mode {
    pub const ALL: [Mode; 3] = [Mode::Edit, Mode::Create, Mode::Humanize];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Edit => "edit",
            Self::Create => "create",
            Self::Humanize => "humanize",
        }
    }

    /// Humanize works from the scene alone; the other modes need a described change.
    pub fn requires_instruction(self) -> bool {
        !matches!(self, Self::Humanize)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> anyhow::Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "edit" | "modify" => Ok(Self::Edit),
            "create" | "add" => Ok(Self::Create),
            "humanize" | "render" | "photoreal" => Ok(Self::Humanize),
            other => bail!("unknown mode '{other}' (expected edit, create or humanize)"),
        }
    }
}

/// Fixed credit prices per mode plus the provider cost of one real call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostTable {
    pub standard: u64,
    pub humanize: u64,
    pub api_cost_usd: f64,
}

impl Default for CostTable {
    fn default() -> Self {
        Self {
            standard: 10,
            humanize: 20,
            api_cost_usd: 0.039,
        }
    }
}

impl CostTable {
    pub fn new(standard: u64, humanize: u64, api_cost_usd: f64) -> anyhow::Result<Self> {
        let table = Self {
            standard,
            humanize,
            api_cost_usd,
        };
        table.validate()?;
        Ok(table)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.standard == 0 {
            bail!("standard cost must be positive");
        }
        if self.humanize <= self.standard {
            bail!(
                "humanize cost ({}) must exceed the standard cost ({})",
                self.humanize,
                self.standard
            );
        }
        if !self.api_cost_usd.is_finite() || self.api_cost_usd < 0.0 {
            bail!("api cost must be a non-negative amount");
        }
        Ok(())
    }

    pub fn cost_for(&self, mode: Mode) -> u64 {
        match mode {
            Mode::Edit | Mode::Create => self.standard,
            Mode::Humanize => self.humanize,
        }
    }
}
