//! Server configuration
//!
//! Layered: optional YAML file, then `IMAGEINF__*` environment variables
//! (`__` separates nesting, e.g. `IMAGEINF__SYNC__MAX_FILES=10`), then
//! command-line overrides.

use imageinf_classifiers::{BackendOptions, DEFAULT_MODEL};
use imageinf_pipeline::JobConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const ENV_PREFIX: &str = "IMAGEINF";

/// Top-level server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address
    pub listen: String,

    /// Listen port
    pub port: u16,

    /// Model used when a request names none
    pub default_model: String,

    /// Root of the on-disk image cache
    pub cache_dir: PathBuf,

    /// Timeout for a single files-service download
    pub files_timeout_secs: u64,

    pub sync: SyncSettings,

    pub jobs: JobSettings,

    pub auth: AuthSettings,

    pub models: BackendOptions,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0".to_string(),
            port: 8080,
            default_model: DEFAULT_MODEL.to_string(),
            cache_dir: default_cache_dir(),
            files_timeout_secs: 60,
            sync: SyncSettings::default(),
            jobs: JobSettings::default(),
            auth: AuthSettings::default(),
            models: BackendOptions::default(),
        }
    }
}

/// Limits for the synchronous endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Larger requests must use the asynchronous endpoint
    pub max_files: usize,

    /// How long a synchronous caller waits for its job
    pub timeout_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            max_files: 5,
            timeout_secs: 300,
        }
    }
}

/// Worker pool and result store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobSettings {
    pub workers: usize,

    pub queue_capacity: usize,

    /// Worker-side hard limit; `None` disables it
    pub time_limit_secs: Option<u64>,

    /// Finished jobs are forgotten after this long
    pub result_ttl_secs: u64,

    pub poll_interval_ms: u64,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_capacity: 256,
            time_limit_secs: Some(300),
            result_ttl_secs: 86_400,
            poll_interval_ms: 100,
        }
    }
}

impl JobSettings {
    pub fn job_config(&self) -> JobConfig {
        JobConfig {
            workers: self.workers,
            queue_capacity: self.queue_capacity,
            time_limit: self.time_limit_secs.map(Duration::from_secs),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            sweep_interval: Some(Duration::from_secs(60)),
        }
    }

    pub fn result_ttl(&self) -> Duration {
        Duration::from_secs(self.result_ttl_secs)
    }
}

/// Token validation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// Tenant base URLs (`scheme://host`) whose tokens are accepted
    pub allowed_tenants: Vec<String>,

    /// Skip signature verification; for local development only
    pub dev_mode: bool,

    /// Timeout for tenant public key lookups
    pub key_fetch_timeout_secs: u64,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            allowed_tenants: vec![
                "https://designsafe.tapis.io".to_string(),
                "https://portals.tapis.io".to_string(),
            ],
            dev_mode: false,
            key_fetch_timeout_secs: 10,
        }
    }
}

/// Command-line values that take precedence over file and environment
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub listen: Option<String>,
    pub port: Option<u16>,
    pub cache_dir: Option<PathBuf>,
    pub default_model: Option<String>,
    pub dev_mode: bool,
    pub preload: bool,
}

impl ServerConfig {
    /// Load configuration from file, environment and CLI overrides
    pub fn load(config_path: &str, overrides: &ConfigOverrides) -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::new(config_path, config::FileFormat::Yaml).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("auth.allowed_tenants")
                    .try_parsing(true),
            )
            .build()?;

        let mut config: ServerConfig = settings.try_deserialize()?;
        config.apply(overrides);
        Ok(config)
    }

    /// Apply CLI overrides
    pub fn apply(&mut self, overrides: &ConfigOverrides) {
        if let Some(listen) = &overrides.listen {
            self.listen = listen.clone();
        }
        if let Some(port) = overrides.port {
            self.port = port;
        }
        if let Some(cache_dir) = &overrides.cache_dir {
            self.cache_dir = cache_dir.clone();
        }
        if let Some(model) = &overrides.default_model {
            self.default_model = model.clone();
        }
        if overrides.dev_mode {
            self.auth.dev_mode = true;
        }
        if overrides.preload {
            self.models.preload = true;
        }
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync.timeout_secs)
    }

    pub fn files_timeout(&self) -> Duration {
        Duration::from_secs(self.files_timeout_secs)
    }
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|dir| dir.join("imageinf"))
        .unwrap_or_else(|| PathBuf::from("./cache"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.default_model, "google/vit-base-patch16-224");
        assert_eq!(config.sync.max_files, 5);
        assert_eq!(config.sync.timeout_secs, 300);
        assert_eq!(config.jobs.workers, 2);
        assert_eq!(config.jobs.time_limit_secs, Some(300));
        assert_eq!(config.auth.allowed_tenants.len(), 2);
        assert!(!config.auth.dev_mode);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = ServerConfig::load("/nonexistent/imageinf.yaml", &ConfigOverrides::default()).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.jobs.queue_capacity, 256);
    }

    #[test]
    fn test_yaml_file_and_overrides() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "port: 9000\nsync:\n  max_files: 3\nmodels:\n  device: cpu\nauth:\n  allowed_tenants:\n    - https://tacc.tapis.io\n"
        )
        .unwrap();

        let overrides = ConfigOverrides {
            port: Some(9100),
            dev_mode: true,
            ..Default::default()
        };
        let config = ServerConfig::load(file.path().to_str().unwrap(), &overrides).unwrap();

        assert_eq!(config.port, 9100);
        assert_eq!(config.sync.max_files, 3);
        // Unset nested fields keep their defaults
        assert_eq!(config.sync.timeout_secs, 300);
        assert_eq!(config.models.device, imageinf_classifiers::DeviceSpec::Cpu);
        assert!(!config.models.preload);
        assert_eq!(config.auth.allowed_tenants, vec!["https://tacc.tapis.io".to_string()]);
        assert!(config.auth.dev_mode);
    }

    #[test]
    fn test_preload_override() {
        let mut config = ServerConfig::default();
        config.apply(&ConfigOverrides {
            preload: true,
            ..Default::default()
        });
        assert!(config.models.preload);
    }

    #[test]
    fn test_job_config_conversion() {
        let settings = JobSettings {
            time_limit_secs: None,
            poll_interval_ms: 250,
            ..Default::default()
        };
        let config = settings.job_config();
        assert!(config.time_limit.is_none());
        assert_eq!(config.poll_interval, Duration::from_millis(250));
    }
}
