use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration file structure for the listener.
///
/// Every field has a default matching the public OpenShift CI setup, so a
/// configuration file is only needed to point at other endpoints or to tune
/// the classifier. Files are looked up in the current directory, then in the
/// user configuration directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// Google Cloud endpoints and credentials
    #[serde(default)]
    pub gcp: GcpConfig,

    /// Subscription consumption settings
    #[serde(default)]
    pub listener: ListenerConfig,

    /// Artifact bucket settings
    #[serde(default)]
    pub router: RouterConfig,

    /// Anomaly classifier settings
    #[serde(default)]
    pub classifier: ClassifierConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GcpConfig {
    /// Pub/Sub REST endpoint
    #[serde(default = "default_pubsub_url")]
    pub pubsub_url: String,

    /// Cloud Storage JSON API endpoint
    #[serde(default = "default_storage_url")]
    pub storage_url: String,

    /// GCE metadata server used to mint access tokens
    #[serde(default = "default_metadata_url")]
    pub metadata_url: String,

    /// Static OAuth2 access token
    pub token: Option<String>,

    /// Fall back to the metadata server when no token is given
    #[serde(default = "default_true")]
    pub use_metadata_server: bool,

    /// Retries for connection errors, 429 and 5xx responses
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay between retries
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ListenerConfig {
    /// Maximum number of outstanding messages
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,

    /// Stop listening after this many seconds
    pub timeout_secs: Option<u64>,

    /// Pause after a pull that returned nothing
    #[serde(default = "default_idle_delay_ms")]
    pub idle_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RouterConfig {
    /// Bucket holding the CI job artifacts
    #[serde(default = "default_bucket")]
    pub bucket: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClassifierConfig {
    /// Directory holding one persisted model per job group
    #[serde(default = "default_model_dir")]
    pub model_dir: PathBuf,

    /// Distance above which an event line is reported as anomalous
    #[serde(default = "default_threshold")]
    pub threshold: f32,

    /// Write a JSON anomaly report per scored job into this directory
    pub report_dir: Option<PathBuf>,
}

impl Default for GcpConfig {
    fn default() -> Self {
        Self {
            pubsub_url: default_pubsub_url(),
            storage_url: default_storage_url(),
            metadata_url: default_metadata_url(),
            token: None,
            use_metadata_server: true,
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay_secs(),
        }
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            max_messages: default_max_messages(),
            timeout_secs: None,
            idle_delay_ms: default_idle_delay_ms(),
        }
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            bucket: default_bucket(),
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            model_dir: default_model_dir(),
            threshold: default_threshold(),
            report_dir: None,
        }
    }
}

fn default_pubsub_url() -> String {
    "https://pubsub.googleapis.com".to_string()
}

fn default_storage_url() -> String {
    "https://storage.googleapis.com".to_string()
}

fn default_metadata_url() -> String {
    "http://metadata.google.internal".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_delay_secs() -> u64 {
    10
}

fn default_max_messages() -> usize {
    10
}

fn default_idle_delay_ms() -> u64 {
    1000
}

fn default_bucket() -> String {
    "origin-ci-test".to_string()
}

fn default_model_dir() -> PathBuf {
    PathBuf::from("/tmp/ocpci_lr")
}

fn default_threshold() -> f32 {
    0.2
}

const CONFIG_STEM: &str = "ocpci-logreduce";

impl ListenerConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

impl GcpConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

impl Config {
    /// Load configuration from a file.
    ///
    /// Searches for configuration files in this order:
    /// 1. Specified path
    /// 2. ./ocpci-logreduce.{toml,json,yaml,yml}
    /// 3. `<config dir>/ocpci-logreduce/config.toml`
    ///
    /// Returns default configuration if no file is found.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load_from_path(path);
        }

        let mut candidates: Vec<PathBuf> = ["toml", "json", "yaml", "yml"]
            .iter()
            .map(|ext| PathBuf::from(format!("{CONFIG_STEM}.{ext}")))
            .collect();

        if let Some(dir) = dirs::config_dir() {
            candidates.push(dir.join(CONFIG_STEM).join("config.toml"));
        }

        for candidate in &candidates {
            if candidate.exists() {
                return Self::load_from_path(candidate);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file path.
    fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");

        match extension {
            "toml" => toml::from_str(&contents)
                .with_context(|| format!("Failed to parse TOML config: {}", path.display())),
            "json" => serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display())),
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display())),
            _ => toml::from_str(&contents)
                .or_else(|_| serde_json::from_str(&contents))
                .or_else(|_| serde_yaml::from_str(&contents))
                .with_context(|| format!("Failed to parse config file: {}", path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.router.bucket, "origin-ci-test");
        assert_eq!(config.listener.max_messages, 10);
        assert_eq!(config.classifier.model_dir, PathBuf::from("/tmp/ocpci_lr"));
        assert!((config.classifier.threshold - 0.2).abs() < f32::EPSILON);
        assert!(config.listener.timeout().is_none());
        assert!(config.gcp.use_metadata_server);
    }

    #[test]
    fn test_load_toml_config() {
        let mut temp_file = NamedTempFile::with_suffix(".toml").unwrap();
        let toml_content = r#"
[gcp]
token = "ya29.test-token"
max-retries = 2

[listener]
max-messages = 4
timeout-secs = 30

[classifier]
model-dir = "/var/lib/ocpci"
threshold = 0.35
"#;
        write!(temp_file, "{}", toml_content).unwrap();

        let config = Config::load_from_path(temp_file.path()).unwrap();
        assert_eq!(config.gcp.token, Some("ya29.test-token".to_string()));
        assert_eq!(config.gcp.max_retries, 2);
        assert_eq!(config.gcp.pubsub_url, "https://pubsub.googleapis.com");
        assert_eq!(config.listener.max_messages, 4);
        assert_eq!(config.listener.timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.classifier.model_dir, PathBuf::from("/var/lib/ocpci"));
        assert!((config.classifier.threshold - 0.35).abs() < f32::EPSILON);
        assert_eq!(config.router.bucket, "origin-ci-test");
    }

    #[test]
    fn test_load_yaml_config() {
        let mut temp_file = NamedTempFile::with_suffix(".yaml").unwrap();
        let yaml_content = r#"
router:
  bucket: test-platform-results
classifier:
  report-dir: /tmp/reports
"#;
        write!(temp_file, "{}", yaml_content).unwrap();

        let config = Config::load_from_path(temp_file.path()).unwrap();
        assert_eq!(config.router.bucket, "test-platform-results");
        assert_eq!(
            config.classifier.report_dir,
            Some(PathBuf::from("/tmp/reports"))
        );
    }

    #[test]
    fn test_load_missing_explicit_config_fails() {
        let result = Config::load(Some(Path::new("does-not-exist.toml")));
        assert!(result.is_err());
    }
}
