/// Database configuration and connection management
pub mod database;

/// Application settings and the default behavior catalog loaded from config.toml
pub mod settings;

pub use settings::{AppConfig, BehaviorConfig, LedgerSettings};
