//! Infrastructure - configuration, preferences and metrics
//!
//! This module contains infrastructure concerns:
//! - `config` - Runtime configuration (TOML loading, defaults)
//! - `preferences` - User preference store (contact, zones, sharing flag)
//! - `metrics` - Lock-free metrics collection

pub mod config;
pub mod metrics;
pub mod preferences;

// Re-export commonly used types
pub use config::{Config, GatewayMode, LocationSource};
pub use metrics::Metrics;
pub use preferences::{
    read_or_default, FilePreferenceStore, MemoryPreferenceStore, PreferenceError, PreferenceStore,
    PreferencesUpdate, UserPreferences,
};
