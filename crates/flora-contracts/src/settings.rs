use std::fmt;

use serde::{Deserialize, Serialize};

use crate::store::{keys, KeyValueStore};

const MIN_CREDENTIAL_LEN: usize = 20;
const PLACEHOLDER_MARKERS: [&str; 6] = [
    "placeholder",
    "your_api_key",
    "your-api-key",
    "changeme",
    "replace_me",
    "api_key_here",
];

/// Values an administrator can change at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AdminSettings {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub image_model: Option<String>,
    #[serde(default)]
    pub mock_image_url: Option<String>,
}

impl AdminSettings {
    pub fn load(store: &KeyValueStore) -> Self {
        store.get(keys::ADMIN_SETTINGS, Self::default())
    }

    pub fn save(&self, store: &mut KeyValueStore) -> anyhow::Result<()> {
        store.set(keys::ADMIN_SETTINGS, self)
    }

    pub fn redacted(&self) -> Self {
        Self {
            api_key: self.api_key.as_deref().map(redact),
            ..self.clone()
        }
    }
}

/// Access token for the generative service.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Accepts only well-formed, non-placeholder tokens.
    pub fn parse(raw: &str) -> Option<Self> {
        let value = raw.trim();
        if value.len() < MIN_CREDENTIAL_LEN {
            return None;
        }
        if !value.chars().all(|ch| ch.is_ascii_graphic()) {
            return None;
        }
        let lowered = value.to_ascii_lowercase();
        if PLACEHOLDER_MARKERS
            .iter()
            .any(|marker| lowered.contains(marker))
        {
            return None;
        }
        if value.chars().all(|ch| ch == value.chars().next().unwrap_or('x')) {
            return None;
        }
        Some(Self(value.to_string()))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential({})", redact(&self.0))
    }
}

/// The settings override wins over the baseline default; anything malformed
/// counts as absent.
pub fn resolve_credential(settings: &AdminSettings, default: Option<&str>) -> Option<Credential> {
    settings
        .api_key
        .as_deref()
        .and_then(Credential::parse)
        .or_else(|| default.and_then(Credential::parse))
}

pub fn resolve_stored_credential(store: &KeyValueStore, default: Option<&str>) -> Option<Credential> {
    resolve_credential(&AdminSettings::load(store), default)
}

fn redact(raw: &str) -> String {
    let tail = raw
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<char>>()
        .into_iter()
        .rev()
        .collect::<String>();
    format!("…{tail}")
}

#[cfg(test)]
mod tests {
    use crate::store::KeyValueStore;

    use super::{resolve_credential, resolve_stored_credential, AdminSettings, Credential};

    const KEY_A: &str = "AIzaSyA-valid-looking-key-0001";
    const KEY_B: &str = "AIzaSyB-valid-looking-key-0002";

    fn settings(api_key: Option<&str>) -> AdminSettings {
        AdminSettings {
            api_key: api_key.map(str::to_string),
            ..AdminSettings::default()
        }
    }

    #[test]
    fn override_takes_precedence_over_default() {
        let resolved = resolve_credential(&settings(Some(KEY_A)), Some(KEY_B));
        assert_eq!(resolved.as_ref().map(Credential::expose), Some(KEY_A));
    }

    #[test]
    fn malformed_override_falls_through_to_default() {
        for bad in ["", "   ", "YOUR_API_KEY_GOES_HERE_PLEASE", "short", "has spaces in the middle of it"] {
            let resolved = resolve_credential(&settings(Some(bad)), Some(KEY_B));
            assert_eq!(resolved.as_ref().map(Credential::expose), Some(KEY_B), "{bad}");
        }
    }

    #[test]
    fn nothing_usable_means_no_credential() {
        assert!(resolve_credential(&settings(None), None).is_none());
        assert!(resolve_credential(&settings(Some("placeholder-placeholder")), Some("")).is_none());
        assert!(Credential::parse(&"x".repeat(40)).is_none());
    }

    #[test]
    fn stored_settings_are_consulted() -> anyhow::Result<()> {
        let mut store = KeyValueStore::in_memory();
        assert!(resolve_stored_credential(&store, None).is_none());
        settings(Some(KEY_A)).save(&mut store)?;
        let resolved = resolve_stored_credential(&store, None);
        assert_eq!(resolved.as_ref().map(Credential::expose), Some(KEY_A));
        Ok(())
    }

    #[test]
    fn debug_and_redaction_hide_the_secret() {
        let credential = Credential::parse(KEY_A).unwrap_or_else(|| panic!("valid key"));
        assert!(!format!("{credential:?}").contains("valid-looking"));
        let redacted = settings(Some(KEY_A)).redacted();
        assert_eq!(redacted.api_key.as_deref(), Some("…0001"));
    }
}
