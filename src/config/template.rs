//! Configuration template generation

use std::fs;
use std::path::Path;

/// Generate a configuration file with comments explaining each field
pub fn generate_commented_config_template<P: AsRef<Path>>(path: P) -> std::io::Result<()> {
    let toml_str = r#"# episignal Configuration
# This is a template configuration file with all available options.
# Uncomment and modify the values as needed.

version = "0.1.0"

[engine]
# Correlation window relative to the signal's observed_at, in hours
temporal_window_hours = 24.0

# Spatial correlation threshold in kilometres
spatial_threshold_km = 50.0

# Minimum pairwise score required to join an existing cluster
min_correlation_score = 0.6

# Scoring term weights; must sum to 1
w_temporal = 0.3
w_spatial = 0.3
w_symptom = 0.25
w_severity = 0.15

# Symptom term value when symptoms differ but share a category
partial_symptom_score = 0.3

# Force-close caps bounding cluster memory
max_cluster_members = 200
max_cluster_age_hours = 72.0

[buffer]
# Buffer database directory (defaults to the per-user data dir)
# db_path = "/var/lib/episignal/buffer"

# Sync attempts before a record is surfaced to the operator queue
max_retry_attempts = 8

# Base delay for exponential retry backoff, in seconds
backoff_base_secs = 30

# Days a SYNCED record is kept before purge
synced_retention_days = 7

# Interval between sync passes, in seconds
sync_interval_secs = 60

# Maximum records synced concurrently in one pass
sync_parallelism = 4

[retention]
# Event store database directory (defaults to the per-user data dir)
# db_path = "/var/lib/episignal/events"

# Days a fused event stays HOT before decay to COLD archival storage
hot_threshold_days = 180

# Days a COLD record is retained before its key is shredded
cold_retention_days = 1825

# Interval between lifecycle scans, in seconds
scan_interval_secs = 3600
"#;
    fs::write(path, toml_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn template_parses_as_valid_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        generate_commented_config_template(&path).unwrap();
        let cfg = Config::from_file(&path).unwrap();
        assert!(cfg.validate().is_ok());
    }
}
