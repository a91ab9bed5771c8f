mod kv;

pub use kv::{KeyValueStore, PersistError};

/// Document keys of the persisted application state. Each key holds an
/// independent JSON document.
pub mod keys {
    pub const USER_PROFILE: &str = "user_profile";
    pub const USER_DIRECTORY: &str = "user_directory";
    pub const GUEST_USAGE: &str = "guest_usage";
    pub const PROJECTS: &str = "projects";
    pub const CREDIT_BALANCE: &str = "credit_balance";
    pub const TRANSACTIONS: &str = "transactions";
    pub const USAGE_LOG: &str = "usage_log";
    pub const CREDIT_PACKAGES: &str = "credit_packages";
    pub const ADMIN_SETTINGS: &str = "admin_settings";
    pub const LANGUAGE: &str = "language";
    pub const STYLE_PREFERENCES: &str = "style_preferences";
}
