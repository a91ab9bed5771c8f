use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Everything the studio reports to `events.jsonl`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SessionStarted,
    SignedIn,
    SignedOut,
    GenerationStarted,
    GenerationFallback,
    GenerationFinished,
    GenerationRejected,
    CreditsCharged,
    CreditsRefunded,
    CreditsPurchased,
    ProjectSaved,
    ProjectDeleted,
    AdminSettingsUpdated,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SessionStarted => "session_started",
            Self::SignedIn => "signed_in",
            Self::SignedOut => "signed_out",
            Self::GenerationStarted => "generation_started",
            Self::GenerationFallback => "generation_fallback",
            Self::GenerationFinished => "generation_finished",
            Self::GenerationRejected => "generation_rejected",
            Self::CreditsCharged => "credits_charged",
            Self::CreditsRefunded => "credits_refunded",
            Self::CreditsPurchased => "credits_purchased",
            Self::ProjectSaved => "project_saved",
            Self::ProjectDeleted => "project_deleted",
            Self::AdminSettingsUpdated => "admin_settings_updated",
        }
    }
}

/// One line of the log. Event-specific fields sit next to the envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudioEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub session_id: String,
    pub ts: DateTime<Utc>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// Append-only JSONL log scoped to one studio session.
#[derive(Debug, Clone)]
pub struct EventLog {
    path: PathBuf,
    session_id: String,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            session_id: session_id.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `fields` must be a JSON object (or null for none).
    pub fn record(&self, kind: EventKind, fields: Value) -> anyhow::Result<StudioEvent> {
        let fields = match fields {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => bail!("{} fields must be an object, got {other}", kind.as_str()),
        };
        let event = StudioEvent {
            kind,
            session_id: self.session_id.clone(),
            ts: Utc::now(),
            fields,
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let line = serde_json::to_string(&event)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        writeln!(file, "{line}")?;
        Ok(event)
    }
}

/// Reads a log back, skipping lines that are not studio events.
pub fn read_events(path: &Path) -> anyhow::Result<Vec<StudioEvent>> {
    let file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err).with_context(|| format!("failed to open {}", path.display())),
    };
    let mut events = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if let Ok(event) = serde_json::from_str::<StudioEvent>(&line) {
            events.push(event);
        }
    }
    Ok(events)
}
