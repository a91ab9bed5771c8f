pub mod admin;
pub mod errors;
pub mod events;
pub mod ledger;
pub mod media;
pub mod models;
pub mod projects;
pub mod settings;
pub mod store;
pub mod usage;
