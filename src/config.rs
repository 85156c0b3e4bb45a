//! Configuration module for FleetWatch.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;

/// Sentinel configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct SentinelConfig {
    /// Path to the SQLite database file (default: "fleetwatch.db")
    pub db_path: String,
    /// Buffer depth of the probe dispatch bus (default: 100)
    pub dispatch_depth: usize,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            db_path: "fleetwatch.db".to_string(),
            dispatch_depth: 100,
        }
    }
}

impl SentinelConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `FLEETWATCH_DB_PATH`: database file path (default: "fleetwatch.db")
    /// - `FLEETWATCH_DISPATCH_DEPTH`: dispatch bus depth (default: 100)
    pub fn load() -> Self {
        let mut cfg = Self::default();

        if let Ok(db_path) = env::var("FLEETWATCH_DB_PATH") {
            cfg.db_path = db_path;
        }

        if let Ok(depth_str) = env::var("FLEETWATCH_DISPATCH_DEPTH") {
            if let Ok(depth) = depth_str.parse() {
                cfg.dispatch_depth = depth;
            }
        }

        cfg
    }
}
