use anyhow::bail;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const SUPPORTED_LANGUAGES: [&str; 6] = ["en", "es", "pt", "fr", "de", "it"];
pub const DEFAULT_LANGUAGE: &str = "en";

/// Owner id recorded for activity of unauthenticated sessions.
pub const GUEST_OWNER_ID: &str = "guest";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

impl UserProfile {
    pub fn new(email: &str, name: &str, role: Role) -> anyhow::Result<Self> {
        let email = normalize_email(email)?;
        let name = name.trim();
        let name = if name.is_empty() {
            email.split('@').next().unwrap_or_default().to_string()
        } else {
            name.to_string()
        };
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            email,
            name,
            role,
            created_at: Utc::now(),
        })
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

pub fn normalize_email(raw: &str) -> anyhow::Result<String> {
    let email = raw.trim().to_ascii_lowercase();
    let valid = email
        .split_once('@')
        .map(|(local, domain)| !local.is_empty() && domain.contains('.') && !domain.starts_with('.'))
        .unwrap_or(false);
    if !valid || email.chars().any(char::is_whitespace) {
        bail!("'{}' is not a valid email address", raw.trim());
    }
    Ok(email)
}

/// Who is driving the current session.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Session {
    #[default]
    Guest,
    User(UserProfile),
}

impl Session {
    pub fn user(&self) -> Option<&UserProfile> {
        match self {
            Self::Guest => None,
            Self::User(profile) => Some(profile),
        }
    }

    pub fn owner_id(&self) -> &str {
        self.user()
            .map(|profile| profile.id.as_str())
            .unwrap_or(GUEST_OWNER_ID)
    }

    pub fn is_guest(&self) -> bool {
        matches!(self, Self::Guest)
    }
}

/// Custom palette and foliage a user wants applied to photoreal renders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct StylePreferences {
    #[serde(default)]
    pub colors: Vec<String>,
    #[serde(default)]
    pub foliage: Vec<String>,
    #[serde(default)]
    pub style: Option<String>,
}

impl StylePreferences {
    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
            && self.foliage.is_empty()
            && self.style.as_deref().map(str::trim).unwrap_or("").is_empty()
    }

    /// One-line description suitable for an instruction clause.
    pub fn describe(&self) -> Option<String> {
        if self.is_empty() {
            return None;
        }
        let mut clauses = Vec::new();
        if let Some(style) = self.style.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            clauses.push(format!("style: {style}"));
        }
        if !self.colors.is_empty() {
            clauses.push(format!("color palette: {}", self.colors.join(", ")));
        }
        if !self.foliage.is_empty() {
            clauses.push(format!("foliage: {}", self.foliage.join(", ")));
        }
        Some(clauses.join("; "))
    }
}

pub fn normalize_language(raw: &str) -> anyhow::Result<String> {
    let code = raw
        .trim()
        .to_ascii_lowercase()
        .split(['-', '_'])
        .next()
        .unwrap_or_default()
        .to_string();
    if !SUPPORTED_LANGUAGES.contains(&code.as_str()) {
        bail!(
            "unsupported language '{}' (supported: {})",
            raw.trim(),
            SUPPORTED_LANGUAGES.join(", ")
        );
    }
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::{normalize_email, normalize_language, Role, Session, StylePreferences, UserProfile};

    #[test]
    fn profile_defaults_name_from_email() -> anyhow::Result<()> {
        let profile = UserProfile::new("  Ana@Example.com ", "", Role::User)?;
        assert_eq!(profile.email, "ana@example.com");
        assert_eq!(profile.name, "ana");
        assert!(!profile.is_admin());
        Ok(())
    }

    #[test]
    fn email_validation() {
        assert!(normalize_email("florist@shop.io").is_ok());
        assert!(normalize_email("no-at-sign").is_err());
        assert!(normalize_email("@shop.io").is_err());
        assert!(normalize_email("a b@shop.io").is_err());
    }

    #[test]
    fn guest_session_owner_is_guest() -> anyhow::Result<()> {
        assert_eq!(Session::Guest.owner_id(), "guest");
        let profile = UserProfile::new("a@b.co", "A", Role::Admin)?;
        let session = Session::User(profile.clone());
        assert_eq!(session.owner_id(), profile.id);
        assert!(!session.is_guest());
        Ok(())
    }

    #[test]
    fn preferences_description() {
        assert_eq!(StylePreferences::default().describe(), None);
        let prefs = StylePreferences {
            colors: vec!["blush".to_string(), "ivory".to_string()],
            foliage: vec!["eucalyptus".to_string()],
            style: Some("romantic".to_string()),
        };
        assert_eq!(
            prefs.describe().as_deref(),
            Some("style: romantic; color palette: blush, ivory; foliage: eucalyptus")
        );
    }

    #[test]
    fn language_codes_are_normalized() -> anyhow::Result<()> {
        assert_eq!(normalize_language("pt-BR")?, "pt");
        assert_eq!(normalize_language("ES")?, "es");
        assert!(normalize_language("tlh").is_err());
        Ok(())
    }
}
