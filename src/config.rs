use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Top-level config loaded from `pipeline.toml`, following the same
/// `#[serde(default)]`-everywhere shape `rush-api`'s `WideConfig` uses.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PipelineConfig {
    #[serde(default)]
    pub crm: CrmConfig,
    #[serde(default)]
    pub telemetry: ChStoreConfig,
    #[serde(default)]
    pub mart: ChStoreConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub loader: LoaderConfig,
    #[serde(default)]
    pub invalidator: InvalidatorConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_retention_days() -> u32 {
    365
}

#[derive(Debug, Clone, Deserialize)]
pub struct CrmConfig {
    #[serde(default = "default_crm_url")]
    pub database_url: String,
    /// `direct` queries the operational CRM tables; `replica` queries a
    /// CDC-fed replica schema with the same logical shape (spec §4.1).
    #[serde(default)]
    pub mode: SourceMode,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

impl Default for CrmConfig {
    fn default() -> Self {
        Self {
            database_url: default_crm_url(),
            mode: SourceMode::default(),
            pool_size: default_pool_size(),
        }
    }
}

fn default_crm_url() -> String {
    "postgres://localhost/crm".to_string()
}

fn default_pool_size() -> u32 {
    4
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceMode {
    #[default]
    Direct,
    Replica,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChStoreConfig {
    #[serde(default = "default_ch_url")]
    pub url: String,
    #[serde(default = "default_ch_database")]
    pub database: String,
    #[serde(default = "default_ch_user")]
    pub user: String,
    #[serde(default)]
    pub password: String,
}

impl Default for ChStoreConfig {
    fn default() -> Self {
        Self {
            url: default_ch_url(),
            database: default_ch_database(),
            user: default_ch_user(),
            password: String::new(),
        }
    }
}

fn default_ch_url() -> String {
    "http://localhost:8123".to_string()
}

fn default_ch_database() -> String {
    "prosthesis_mart".to_string()
}

fn default_ch_user() -> String {
    "default".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_schedule_period_secs")]
    pub period_secs: u64,
    #[serde(default = "default_lookback_secs")]
    pub lookback_secs: u64,
    /// Added to `period_secs` to derive the minimum acceptable
    /// `lookback_secs` (spec §4.6: `lookback ≥ period + upstream_delay`).
    #[serde(default = "default_upstream_delay_secs")]
    pub upstream_delay_secs: u64,
    #[serde(default = "default_run_ceiling_secs")]
    pub run_ceiling_secs: u64,
    #[serde(default = "default_extract_timeout_secs")]
    pub extract_timeout_secs: u64,
    #[serde(default = "default_transform_timeout_secs")]
    pub transform_timeout_secs: u64,
    #[serde(default = "default_load_timeout_secs")]
    pub load_timeout_secs: u64,
    #[serde(default = "default_invalidation_timeout_secs")]
    pub invalidation_timeout_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            period_secs: default_schedule_period_secs(),
            lookback_secs: default_lookback_secs(),
            upstream_delay_secs: default_upstream_delay_secs(),
            run_ceiling_secs: default_run_ceiling_secs(),
            extract_timeout_secs: default_extract_timeout_secs(),
            transform_timeout_secs: default_transform_timeout_secs(),
            load_timeout_secs: default_load_timeout_secs(),
            invalidation_timeout_secs: default_invalidation_timeout_secs(),
        }
    }
}

fn default_schedule_period_secs() -> u64 {
    15 * 60
}

fn default_lookback_secs() -> u64 {
    2 * 60 * 60
}

fn default_upstream_delay_secs() -> u64 {
    5 * 60
}

fn default_run_ceiling_secs() -> u64 {
    30 * 60
}

fn default_extract_timeout_secs() -> u64 {
    10 * 60
}

fn default_transform_timeout_secs() -> u64 {
    5 * 60
}

fn default_load_timeout_secs() -> u64 {
    15 * 60
}

fn default_invalidation_timeout_secs() -> u64 {
    5
}

impl ScheduleConfig {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }

    pub fn lookback(&self) -> Duration {
        Duration::from_secs(self.lookback_secs)
    }

    pub fn run_ceiling(&self) -> Duration {
        Duration::from_secs(self.run_ceiling_secs)
    }

    pub fn extract_timeout(&self) -> Duration {
        Duration::from_secs(self.extract_timeout_secs)
    }

    pub fn transform_timeout(&self) -> Duration {
        Duration::from_secs(self.transform_timeout_secs)
    }

    pub fn load_timeout(&self) -> Duration {
        Duration::from_secs(self.load_timeout_secs)
    }

    pub fn invalidation_timeout(&self) -> Duration {
        Duration::from_secs(self.invalidation_timeout_secs)
    }

    /// `lookback_window` must cover at least one full schedule period plus
    /// the slowest acceptable upstream aggregation delay, or a corrected
    /// hour could fall outside every future run's window before it is ever
    /// re-extracted (spec §4.6).
    pub fn validate(&self) -> Result<(), String> {
        let min_lookback = self.period_secs + self.upstream_delay_secs;
        if self.lookback_secs < min_lookback {
            return Err(format!(
                "lookback_secs ({}) must be >= period_secs + upstream_delay_secs ({})",
                self.lookback_secs, min_lookback
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoaderConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
        }
    }
}

fn default_batch_size() -> usize {
    10_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvalidatorConfig {
    pub endpoint: Option<String>,
    #[serde(default = "default_invalidator_parallelism")]
    pub parallelism: usize,
    #[serde(default = "default_bulk_threshold")]
    pub bulk_threshold: usize,
}

impl Default for InvalidatorConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            parallelism: default_invalidator_parallelism(),
            bulk_threshold: default_bulk_threshold(),
        }
    }
}

fn default_invalidator_parallelism() -> usize {
    8
}

fn default_bulk_threshold() -> usize {
    1000
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_attempts")]
    pub attempts: u32,
    #[serde(default = "default_backoff_initial_secs")]
    pub backoff_initial_secs: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_retry_attempts(),
            backoff_initial_secs: default_backoff_initial_secs(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_backoff_initial_secs() -> u64 {
    5 * 60
}

fn default_backoff_factor() -> f64 {
    1.0
}

impl RetryConfig {
    pub fn backoff_initial(&self) -> Duration {
        Duration::from_secs(self.backoff_initial_secs)
    }
}

impl PipelineConfig {
    /// Load config from a TOML file. Returns defaults if the file doesn't exist.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("config file not found at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let config: PipelineConfig = toml::from_str(&contents)?;
        tracing::info!("loaded config from {}", path.display());
        config
            .schedule
            .validate()
            .map_err(|e| anyhow::anyhow!("invalid schedule config: {e}"))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_lookback_satisfies_validate() {
        assert!(ScheduleConfig::default().validate().is_ok());
    }

    #[test]
    fn lookback_shorter_than_period_plus_delay_is_rejected() {
        let cfg = ScheduleConfig {
            period_secs: 900,
            lookback_secs: 600,
            upstream_delay_secs: 300,
            ..ScheduleConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn lookback_exactly_at_minimum_is_accepted() {
        let cfg = ScheduleConfig {
            period_secs: 900,
            lookback_secs: 1200,
            upstream_delay_secs: 300,
            ..ScheduleConfig::default()
        };
        assert!(cfg.validate().is_ok());
    }
}
