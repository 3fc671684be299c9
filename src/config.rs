use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub linkability: LinkabilityConfig,
    pub batch: BatchConfig,
    pub watch: WatchConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
    /// JSON fixture file imported by `shieldlink import` when no path is given.
    pub fixtures: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LinkabilityConfig {
    pub default_limit: usize,
    pub default_tolerance_zat: u64,
    /// Search window on either side of the queried transaction.
    pub window_days: i64,
    /// Trailing window for the exact-amount rarity count.
    pub rarity_window_days: i64,
    /// Raw candidates fetched before scoring.
    pub candidate_cap: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BatchConfig {
    pub min_batch_count: usize,
    pub min_amount_zat: u64,
    pub time_window_days: i64,
    pub limit: usize,
    /// Patterns below this score are noise.
    pub min_score: u8,
    /// Upper bound on deshields pulled for one population scan.
    pub population_cap: usize,
    /// How far before the first deshield to look for the funding shield.
    pub shield_lookback_days: i64,
    /// Relative tolerance for grouping near-identical amounts; 0 groups exact amounts only.
    pub amount_tolerance_bps: u32,
    /// Smallest per-transaction amount `detect_for_shield` will consider.
    pub per_tx_floor_zat: u64,
    pub shield_candidate_cap: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WatchConfig {
    pub interval_seconds: u64,
    pub persist_patterns: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "data/ledger.db".into(),
            fixtures: None,
        }
    }
}

impl Default for LinkabilityConfig {
    fn default() -> Self {
        Self {
            default_limit: 5,
            default_tolerance_zat: 100_000,
            window_days: 90,
            rarity_window_days: 90,
            candidate_cap: 50,
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            min_batch_count: 3,
            min_amount_zat: 100_000_000,
            time_window_days: 30,
            limit: 50,
            min_score: 30,
            population_cap: 10_000,
            shield_lookback_days: 90,
            amount_tolerance_bps: 0,
            per_tx_floor_zat: 1_000_000,
            shield_candidate_cap: 50,
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 600,
            persist_patterns: true,
        }
    }
}

impl Config {
    /// Load config from a TOML file. Falls back to defaults if file doesn't exist.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("Config file {} not found, using defaults", path.display());
            return Self::default();
        }
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::parse(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse {}: {e}, using defaults", path.display());
                Self::default()
            }),
            Err(e) => {
                tracing::warn!("Failed to read {}: {e}, using defaults", path.display());
                Self::default()
            }
        }
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }
}
