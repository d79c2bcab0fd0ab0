use std::env;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Grid
    pub grid_cols: u16,
    pub grid_rows: u16,

    // Policy engine
    pub tick_interval_secs: u64,
    pub eval_timeout_secs: u64,
    pub default_sla_hours: i64,

    // Reference data
    pub taxonomy_file: String,
    pub policy_file: String,
    /// Cell → administrative district table. Absent means the
    /// admin_district grouping backend is unavailable.
    pub district_file: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        Self {
            grid_cols: numeric_env("GRID_COLS", 14),
            grid_rows: numeric_env("GRID_ROWS", 8),
            tick_interval_secs: numeric_env("TICK_INTERVAL_SECS", 60),
            eval_timeout_secs: numeric_env("EVAL_TIMEOUT_SECS", 30),
            default_sla_hours: numeric_env("DEFAULT_SLA_HOURS", 72),
            taxonomy_file: required_env("TAXONOMY_FILE"),
            policy_file: required_env("POLICY_FILE"),
            district_file: env::var("DISTRICT_FILE").ok(),
        }
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}

fn numeric_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(v) => v
            .parse()
            .unwrap_or_else(|_| panic!("{key} must be a number")),
        Err(_) => default,
    }
}
