use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Longest retention window any tier, extension or query may span (~100 years).
pub const MAX_RETENTION_DAYS: i64 = 36_525;

/// Bounds for `sweep.creating_grace_secs`.
pub const MIN_CREATING_GRACE_SECS: u64 = 60;
pub const MAX_CREATING_GRACE_SECS: u64 = 86_400;

/// Top-level daemon configuration (loaded from sarc.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SarcConfig {
    pub daemon: DaemonConfig,
    pub storage: StorageConfig,
    pub secrets: SecretsConfig,
    pub kdf: KdfConfig,
    pub retention: RetentionConfig,
    pub retry: RetryConfig,
    pub metadata: MetadataConfig,
    pub sessions: SessionsConfig,
    pub sweep: SweepConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// HTTP API listen address (default: 127.0.0.1:8480)
    pub listen: String,
    /// Prometheus metrics endpoint (default: 127.0.0.1:9480)
    pub metrics_addr: Option<String>,
    /// Log level (default: info)
    pub log_level: String,
    /// Log format: "json" or "text"
    pub log_format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// S3-compatible endpoint
    pub endpoint: String,
    /// S3 region (default: us-east-1)
    pub region: String,
    /// Bucket holding archive ciphertext
    pub bucket: String,
    /// Object key prefix under which archives are written
    pub key_prefix: String,
    /// Enforce HTTPS for S3 connections (warn/error on HTTP endpoints)
    pub enforce_tls: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretsConfig {
    /// File holding the 32-byte master key (raw or base64)
    pub master_key_file: Option<PathBuf>,
}

/// Argon2id work factor used when archiving.
///
/// Each archive records the parameters it was sealed with, so changing these
/// only affects new archives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfConfig {
    /// Memory cost in KiB (default: 65536 = 64 MiB)
    pub mem_cost_kib: u32,
    /// Time cost / iterations (default: 3)
    pub time_cost: u32,
    /// Parallelism (default: 4)
    pub parallelism: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Standard tier lifetime in days (default: 365)
    pub standard_days: i64,
    /// Extended tier lifetime in days (default: 1095)
    pub extended_days: i64,
    /// Upper bound for a single extension request in days
    pub max_extension_days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per object-store call, including the first
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    /// SQLite database holding archive metadata rows
    pub db_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// Directory of session exports (`{session_id}.json`)
    pub export_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Run the periodic reconciliation + lifecycle sweep
    pub enabled: bool,
    pub interval_secs: u64,
    /// Age after which a row stuck in `creating` is treated as abandoned
    pub creating_grace_secs: u64,
    /// Delete expired standard/extended archives instead of only flagging them
    pub purge_expired: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8480".into(),
            metrics_addr: Some("127.0.0.1:9480".into()),
            log_level: "info".into(),
            log_format: "json".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9000".into(),
            region: "us-east-1".into(),
            bucket: "session-archives".into(),
            key_prefix: "archives".into(),
            enforce_tls: false,
        }
    }
}

impl Default for KdfConfig {
    fn default() -> Self {
        Self {
            mem_cost_kib: 65536,
            time_cost: 3,
            parallelism: 4,
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            standard_days: 365,
            extended_days: 3 * 365,
            max_extension_days: 3650,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
            max_delay_ms: 5000,
        }
    }
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("/var/lib/sarc/archives.db"),
        }
    }
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            export_dir: PathBuf::from("/var/lib/sarc/sessions"),
        }
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 3600,
            creating_grace_secs: 900,
            purge_expired: false,
        }
    }
}

impl SarcConfig {
    /// Reject configurations that would weaken retention or key derivation.
    pub fn validate(&self) -> crate::SarcResult<()> {
        use crate::SarcError;

        if self.retention.standard_days <= 0 {
            return Err(SarcError::Config(
                "retention.standard_days must be positive".into(),
            ));
        }
        if self.retention.extended_days < self.retention.standard_days {
            return Err(SarcError::Config(
                "retention.extended_days must be >= retention.standard_days".into(),
            ));
        }
        for (name, days) in [
            ("retention.standard_days", self.retention.standard_days),
            ("retention.extended_days", self.retention.extended_days),
            ("retention.max_extension_days", self.retention.max_extension_days),
        ] {
            if !(0..=MAX_RETENTION_DAYS).contains(&days) {
                return Err(SarcError::Config(format!(
                    "{name} must be between 0 and {MAX_RETENTION_DAYS}, got {days}"
                )));
            }
        }
        if !(MIN_CREATING_GRACE_SECS..=MAX_CREATING_GRACE_SECS)
            .contains(&self.sweep.creating_grace_secs)
        {
            return Err(SarcError::Config(format!(
                "sweep.creating_grace_secs must be between {MIN_CREATING_GRACE_SECS} and \
                 {MAX_CREATING_GRACE_SECS}, got {}",
                self.sweep.creating_grace_secs
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(SarcError::Config("retry.max_attempts must be >= 1".into()));
        }
        if self.kdf.time_cost == 0 || self.kdf.parallelism == 0 {
            return Err(SarcError::Config(
                "kdf.time_cost and kdf.parallelism must be >= 1".into(),
            ));
        }
        if self.storage.bucket.is_empty() || self.storage.bucket.contains('/') {
            return Err(SarcError::Config(format!(
                "storage.bucket is not a valid bucket name: {:?}",
                self.storage.bucket
            )));
        }
        // an empty prefix would let the orphan sweep claim the whole bucket
        if self.storage.key_prefix.trim_matches('/').is_empty() {
            return Err(SarcError::Config(
                "storage.key_prefix must name a directory inside the bucket".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[daemon]
listen = "0.0.0.0:8080"
log_level = "debug"
log_format = "text"

[storage]
endpoint = "https://s3.example.com"
region = "eu-west-1"
bucket = "crisis-archives"
key_prefix = "prod"
enforce_tls = true

[secrets]
master_key_file = "/run/secrets/master.key"

[kdf]
mem_cost_kib = 131072
time_cost = 4
parallelism = 2

[retention]
standard_days = 400

[retry]
max_attempts = 5

[sweep]
enabled = false
purge_expired = true
"#;
        let config: SarcConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(config.daemon.listen, "0.0.0.0:8080");
        assert_eq!(config.daemon.log_level, "debug");
        assert_eq!(config.storage.endpoint, "https://s3.example.com");
        assert!(config.storage.enforce_tls);
        assert_eq!(config.storage.bucket, "crisis-archives");
        assert_eq!(
            config.secrets.master_key_file,
            Some(PathBuf::from("/run/secrets/master.key"))
        );
        assert_eq!(config.kdf.mem_cost_kib, 131072);
        assert_eq!(config.retention.standard_days, 400);
        assert_eq!(config.retention.extended_days, 1095);
        assert_eq!(config.retry.max_attempts, 5);
        assert!(!config.sweep.enabled);
        assert!(config.sweep.purge_expired);
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_defaults() {
        let config: SarcConfig = toml::from_str("").unwrap();

        assert_eq!(config.daemon.listen, "127.0.0.1:8480");
        assert_eq!(config.storage.key_prefix, "archives");
        assert_eq!(config.kdf.mem_cost_kib, 65536);
        assert_eq!(config.retention.standard_days, 365);
        assert_eq!(config.retention.extended_days, 1095);
        assert_eq!(config.retry.max_attempts, 3);
        assert!(config.secrets.master_key_file.is_none());
        assert!(!config.sweep.purge_expired);
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_shrunk_extended_tier() {
        let mut config = SarcConfig::default();
        config.retention.extended_days = 30;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let mut config = SarcConfig::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unbounded_retention() {
        let mut config = SarcConfig::default();
        config.retention.standard_days = 1_000_000_000;
        config.retention.extended_days = 1_000_000_000;
        assert!(config.validate().is_err());

        let mut config = SarcConfig::default();
        config.retention.max_extension_days = MAX_RETENTION_DAYS + 1;
        assert!(config.validate().is_err());

        let mut config = SarcConfig::default();
        config.retention.max_extension_days = -1;
        assert!(config.validate().is_err());

        let mut config = SarcConfig::default();
        config.retention.standard_days = MAX_RETENTION_DAYS;
        config.retention.extended_days = MAX_RETENTION_DAYS;
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_bounds_creating_grace() {
        let mut config = SarcConfig::default();
        config.sweep.creating_grace_secs = u64::MAX;
        assert!(config.validate().is_err());

        config.sweep.creating_grace_secs = 0;
        assert!(config.validate().is_err());

        config.sweep.creating_grace_secs = MAX_CREATING_GRACE_SECS;
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_empty_key_prefix() {
        for prefix in ["", "/", "///"] {
            let mut config = SarcConfig::default();
            config.storage.key_prefix = prefix.into();
            assert!(config.validate().is_err(), "prefix {prefix:?} accepted");
        }
        let mut config = SarcConfig::default();
        config.storage.key_prefix = "/tenant-a/archives/".into();
        config.validate().unwrap();
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = SarcConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: SarcConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.daemon.listen, parsed.daemon.listen);
        assert_eq!(config.storage.endpoint, parsed.storage.endpoint);
        assert_eq!(config.metadata.db_path, parsed.metadata.db_path);
    }
}
