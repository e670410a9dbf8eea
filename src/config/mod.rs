//! Configuration module for the fusion engine

mod template;

use serde::{Deserialize, Serialize};

use crate::utils::error::{Error, Result};

pub use template::generate_commented_config_template;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Configuration file version
    pub version: String,

    /// Correlation engine configuration
    #[serde(default)]
    pub engine: EngineConfig,

    /// Offline buffer configuration
    #[serde(default)]
    pub buffer: BufferConfig,

    /// Retention and lifecycle configuration
    #[serde(default)]
    pub retention: RetentionConfig,
}

/// Correlation engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Correlation window relative to observed_at, in hours
    #[serde(default = "default_temporal_window_hours")]
    pub temporal_window_hours: f64,

    /// Spatial correlation threshold in kilometres
    #[serde(default = "default_spatial_threshold_km")]
    pub spatial_threshold_km: f64,

    /// Minimum pairwise score required to join an existing cluster
    #[serde(default = "default_min_correlation_score")]
    pub min_correlation_score: f64,

    /// Weight of the temporal term
    #[serde(default = "default_w_temporal")]
    pub w_temporal: f64,

    /// Weight of the spatial term
    #[serde(default = "default_w_spatial")]
    pub w_spatial: f64,

    /// Weight of the symptom term
    #[serde(default = "default_w_symptom")]
    pub w_symptom: f64,

    /// Weight of the severity term
    #[serde(default = "default_w_severity")]
    pub w_severity: f64,

    /// Symptom term value for a same-category (non-exact) match
    #[serde(default = "default_partial_symptom_score")]
    pub partial_symptom_score: f64,

    /// Hard cap on cluster membership before force-close
    #[serde(default = "default_max_cluster_members")]
    pub max_cluster_members: usize,

    /// Hard cap on cluster wall-clock age (hours) before force-close
    #[serde(default = "default_max_cluster_age_hours")]
    pub max_cluster_age_hours: f64,
}

/// Offline buffer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Buffer database directory; defaults to a per-user data dir
    pub db_path: Option<String>,

    /// Maximum sync attempts before a record lands on the operator queue
    #[serde(default = "default_max_buffer_retry_attempts")]
    pub max_retry_attempts: u32,

    /// Base delay for exponential retry backoff, in seconds
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,

    /// Days a SYNCED record is kept before purge
    #[serde(default = "default_synced_retention_days")]
    pub synced_retention_days: i64,

    /// Interval between sync passes, in seconds
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,

    /// Maximum records synced concurrently in one pass
    #[serde(default = "default_sync_parallelism")]
    pub sync_parallelism: usize,
}

/// Retention and lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Event store database directory; defaults to a per-user data dir
    pub db_path: Option<String>,

    /// Days a fused event stays in the HOT tier before decay to COLD
    #[serde(default = "default_hot_threshold_days")]
    pub hot_threshold_days: i64,

    /// Days a COLD record is retained before its key is shredded
    #[serde(default = "default_cold_retention_days")]
    pub cold_retention_days: i64,

    /// Interval between lifecycle scans, in seconds
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            engine: EngineConfig::default(),
            buffer: BufferConfig::default(),
            retention: RetentionConfig::default(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            temporal_window_hours: default_temporal_window_hours(),
            spatial_threshold_km: default_spatial_threshold_km(),
            min_correlation_score: default_min_correlation_score(),
            w_temporal: default_w_temporal(),
            w_spatial: default_w_spatial(),
            w_symptom: default_w_symptom(),
            w_severity: default_w_severity(),
            partial_symptom_score: default_partial_symptom_score(),
            max_cluster_members: default_max_cluster_members(),
            max_cluster_age_hours: default_max_cluster_age_hours(),
        }
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            max_retry_attempts: default_max_buffer_retry_attempts(),
            backoff_base_secs: default_backoff_base_secs(),
            synced_retention_days: default_synced_retention_days(),
            sync_interval_secs: default_sync_interval_secs(),
            sync_parallelism: default_sync_parallelism(),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            hot_threshold_days: default_hot_threshold_days(),
            cold_retention_days: default_cold_retention_days(),
            scan_interval_secs: default_scan_interval_secs(),
        }
    }
}

// --------- Helper default functions for serde ---------
fn default_temporal_window_hours() -> f64 {
    24.0
}
fn default_spatial_threshold_km() -> f64 {
    50.0
}
fn default_min_correlation_score() -> f64 {
    0.6
}
fn default_w_temporal() -> f64 {
    0.3
}
fn default_w_spatial() -> f64 {
    0.3
}
fn default_w_symptom() -> f64 {
    0.25
}
fn default_w_severity() -> f64 {
    0.15
}
fn default_partial_symptom_score() -> f64 {
    0.3
}
fn default_max_cluster_members() -> usize {
    200
}
fn default_max_cluster_age_hours() -> f64 {
    72.0
}
fn default_max_buffer_retry_attempts() -> u32 {
    8
}
fn default_backoff_base_secs() -> u64 {
    30
}
fn default_synced_retention_days() -> i64 {
    7
}
fn default_sync_interval_secs() -> u64 {
    60
}
fn default_sync_parallelism() -> usize {
    4
}
fn default_hot_threshold_days() -> i64 {
    180
}
fn default_cold_retention_days() -> i64 {
    1825
}
fn default_scan_interval_secs() -> u64 {
    3600
}

impl Config {
    /// Serialize default config to TOML string
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).expect("serialize default config")
    }

    /// Load configuration from a specific file path
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(|e| {
            Error::ConfigError(format!("Failed to read config file {:?}: {}", path.as_ref(), e))
        })?;
        let cfg: Self = toml::from_str(&content)
            .map_err(|e| Error::ConfigError(format!("Failed to parse config file: {}", e)))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Save the configuration to a file
    pub fn save<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::ConfigError(format!("Failed to serialize config: {}", e)))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::ConfigError(format!("Failed to create directory {:?}: {}", parent, e))
            })?;
        }
        std::fs::write(path, content).map_err(|e| {
            Error::ConfigError(format!("Failed to write config file {:?}: {}", path, e))
        })?;
        Ok(())
    }

    /// Validate the configuration for required fields and reasonable values
    pub fn validate(&self) -> Result<()> {
        if self.version.trim().is_empty() {
            return Err(Error::ConfigError(
                "Config version must be set (e.g., '0.1.0')".to_string(),
            ));
        }
        if self.engine.temporal_window_hours <= 0.0 {
            return Err(Error::ConfigError(
                "engine.temporal_window_hours must be > 0".to_string(),
            ));
        }
        if self.engine.spatial_threshold_km <= 0.0 {
            return Err(Error::ConfigError(
                "engine.spatial_threshold_km must be > 0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.engine.min_correlation_score) {
            return Err(Error::ConfigError(
                "engine.min_correlation_score must be within [0,1]".to_string(),
            ));
        }
        let weight_sum = self.engine.w_temporal
            + self.engine.w_spatial
            + self.engine.w_symptom
            + self.engine.w_severity;
        if (weight_sum - 1.0).abs() > 1e-9 {
            return Err(Error::ConfigError(format!(
                "engine weights must sum to 1, got {}",
                weight_sum
            )));
        }
        if !(0.0..=1.0).contains(&self.engine.partial_symptom_score) {
            return Err(Error::ConfigError(
                "engine.partial_symptom_score must be within [0,1]".to_string(),
            ));
        }
        if self.engine.max_cluster_members == 0 {
            return Err(Error::ConfigError(
                "engine.max_cluster_members must be > 0".to_string(),
            ));
        }
        if self.buffer.max_retry_attempts == 0 {
            return Err(Error::ConfigError(
                "buffer.max_retry_attempts must be > 0".to_string(),
            ));
        }
        if self.buffer.sync_parallelism == 0 {
            return Err(Error::ConfigError(
                "buffer.sync_parallelism must be > 0".to_string(),
            ));
        }
        if self.retention.hot_threshold_days <= 0
            || self.retention.cold_retention_days <= self.retention.hot_threshold_days
        {
            return Err(Error::ConfigError(
                "retention tiers must satisfy 0 < hot_threshold_days < cold_retention_days"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        // Try to load from current directory
        if let Ok(config) = Self::from_file("config.toml") {
            return Ok(config);
        }

        // Try to load from user config directory
        if let Some(mut path) = dirs::config_dir() {
            path.push("episignal");
            path.push("config.toml");
            if path.exists() {
                return Self::from_file(path);
            }
        }

        // Return default config if no config file found
        Ok(Self::default())
    }
}
