//! Configuration Loader
//! - Explicit `HarnessConfig` passed into the factory
//! - Layering: defaults < TOML file < environment variables
//! - Provides CLI argument parsing with clap

use crate::error::Result;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Explicit envoy binary; skips any docker download
pub const ENV_ENVOY_BINARY: &str = "ENVOY_BINARY";
/// Tag of the envoy image used for extraction and container mode
pub const ENV_ENVOY_IMAGE_TAG: &str = "ENVOY_IMAGE_TAG";
/// Control-plane address handed to containerized envoy
pub const ENV_CONTROL_PLANE_IP: &str = "GLOO_IP";
/// Root directory for temp dirs
pub const ENV_TEMP_ROOT: &str = "HELPER_TMP";

pub const DEFAULT_IMAGE: &str = "soloio/envoy";
pub const DEFAULT_IMAGE_TAG: &str = "latest";
pub const DEFAULT_DOCKER_BIN: &str = "docker";
pub const DEFAULT_STOP_GRACE_MS: u64 = 5_000;

// =============================================================================
// Platform
// =============================================================================

/// Host platform, decides how the factory obtains envoy
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Platform {
    /// Native binary extracted from the image
    Linux,
    /// No native binary; envoy only runs inside docker
    MacOs,
    Other(String),
}

impl Platform {
    pub fn current() -> Self {
        Self::from_os(std::env::consts::OS)
    }

    pub fn from_os(os: &str) -> Self {
        match os {
            "linux" => Platform::Linux,
            "macos" | "darwin" => Platform::MacOs,
            other => Platform::Other(other.to_string()),
        }
    }
}

impl Default for Platform {
    fn default() -> Self {
        Self::current()
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Platform::Linux => f.write_str("linux"),
            Platform::MacOs => f.write_str("macos"),
            Platform::Other(os) => f.write_str(os),
        }
    }
}

// =============================================================================
// Harness Configuration
// =============================================================================

/// Everything the factory and its instances need to know about the environment.
///
/// Built with [`HarnessConfig::default`], [`HarnessConfig::from_env`] or
/// [`HarnessConfig::load`]; fields are public so tests can set them directly.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct HarnessConfig {
    /// Use this envoy binary as-is (`ENVOY_BINARY`)
    pub binary_path: Option<PathBuf>,
    /// Image repository, without tag
    pub image: String,
    /// Image tag (`ENVOY_IMAGE_TAG`)
    pub image_tag: String,
    /// Control-plane address for container mode (`GLOO_IP`); discovered when unset
    pub control_plane_addr: Option<String>,
    /// Parent of all temp dirs (`HELPER_TMP`); system temp dir when unset
    pub temp_root: Option<PathBuf>,
    /// Docker CLI executable
    pub docker_bin: PathBuf,
    /// How long a terminated envoy process gets before SIGKILL
    pub stop_grace_ms: u64,
    #[serde(skip)]
    pub platform: Platform,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            binary_path: None,
            image: DEFAULT_IMAGE.to_string(),
            image_tag: DEFAULT_IMAGE_TAG.to_string(),
            control_plane_addr: None,
            temp_root: None,
            docker_bin: PathBuf::from(DEFAULT_DOCKER_BIN),
            stop_grace_ms: DEFAULT_STOP_GRACE_MS,
            platform: Platform::current(),
        }
    }
}

impl HarnessConfig {
    /// Defaults overlaid with the process environment
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    /// Defaults, then `path` (if any), then the process environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_toml_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Overlay recognized variables. Empty values count as unset.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(path) = get(ENV_ENVOY_BINARY) {
            self.binary_path = Some(PathBuf::from(path));
        }
        if let Some(tag) = get(ENV_ENVOY_IMAGE_TAG) {
            self.image_tag = tag;
        }
        if let Some(addr) = get(ENV_CONTROL_PLANE_IP) {
            self.control_plane_addr = Some(addr);
        }
        if let Some(root) = get(ENV_TEMP_ROOT) {
            self.temp_root = Some(PathBuf::from(root));
        }
    }

    /// `image:tag`
    pub fn image_ref(&self) -> String {
        format!("{}:{}", self.image, self.image_tag)
    }

    pub fn temp_root(&self) -> PathBuf {
        self.temp_root.clone().unwrap_or_else(std::env::temp_dir)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

// =============================================================================
// CLI Configuration
// =============================================================================

/// Output format for harness events
#[derive(ValueEnum, Clone, Debug, Default, PartialEq)]
pub enum OutputFormat {
    /// Human-readable output (to stderr)
    #[default]
    Human,
    /// Machine-readable NDJSON (to stdout)
    Json,
}

/// envoy-harness - provision envoy for control-plane integration tests
#[derive(Parser)]
#[command(name = "envoy-harness", version, about = "Provision envoy for control-plane tests")]
pub struct Cli {
    /// Output format (also: ENVOY_HARNESS_FORMAT env var)
    #[arg(long, value_enum, default_value_t = OutputFormat::Human, env = "ENVOY_HARNESS_FORMAT")]
    pub format: OutputFormat,

    /// TOML file with harness settings; environment variables take precedence
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Subcommands
#[derive(Subcommand, Clone, Debug, PartialEq)]
pub enum Commands {
    /// Print the bootstrap config for a control plane
    Render {
        /// Control-plane address
        #[arg(long, default_value = "localhost")]
        address: String,
        /// Control-plane xDS port
        #[arg(long, default_value_t = crate::instance::DEFAULT_XDS_PORT)]
        port: u32,
    },
    /// Print the control-plane address containerized envoy would use
    Address,
    /// Start envoy and keep it running until interrupted
    Run {
        /// Control-plane xDS port
        #[arg(long, default_value_t = crate::instance::DEFAULT_XDS_PORT)]
        port: u32,
        /// Wait this many seconds for the admin port before reporting
        #[arg(long)]
        wait_ready: Option<u64>,
    },
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = HarnessConfig::default();
        assert_eq!(config.binary_path, None);
        assert_eq!(config.image_ref(), "soloio/envoy:latest");
        assert_eq!(config.docker_bin, PathBuf::from("docker"));
        assert_eq!(config.stop_grace(), Duration::from_secs(5));
    }

    #[test]
    fn test_apply_env_sets_all_fields() {
        let mut config = HarnessConfig::default();
        config.apply_env(lookup(&[
            ("ENVOY_BINARY", "/usr/bin/proxybin"),
            ("ENVOY_IMAGE_TAG", "v0.1.2"),
            ("GLOO_IP", "10.1.2.3"),
            ("HELPER_TMP", "/scratch"),
        ]));

        assert_eq!(config.binary_path, Some(PathBuf::from("/usr/bin/proxybin")));
        assert_eq!(config.image_ref(), "soloio/envoy:v0.1.2");
        assert_eq!(config.control_plane_addr.as_deref(), Some("10.1.2.3"));
        assert_eq!(config.temp_root(), PathBuf::from("/scratch"));
    }

    #[test]
    fn test_apply_env_ignores_empty_values() {
        let mut config = HarnessConfig::default();
        config.apply_env(lookup(&[("ENVOY_BINARY", ""), ("ENVOY_IMAGE_TAG", "")]));
        assert_eq!(config.binary_path, None);
        assert_eq!(config.image_tag, "latest");
    }

    #[test]
    fn test_temp_root_falls_back_to_system_temp() {
        let config = HarnessConfig::default();
        assert_eq!(config.temp_root(), std::env::temp_dir());
    }

    #[test]
    fn test_parse_toml() {
        let config = HarnessConfig::from_toml_str(
            r#"
image = "registry.local/envoy"
image_tag = "v1.2.3"
control_plane_addr = "192.168.1.10"
stop_grace_ms = 250
"#,
        )
        .unwrap();
        assert_eq!(config.image_ref(), "registry.local/envoy:v1.2.3");
        assert_eq!(config.control_plane_addr.as_deref(), Some("192.168.1.10"));
        assert_eq!(config.stop_grace(), Duration::from_millis(250));
        // untouched keys keep their defaults
        assert_eq!(config.docker_bin, PathBuf::from("docker"));
    }

    #[test]
    fn test_parse_empty_toml() {
        let config = HarnessConfig::from_toml_str("").unwrap();
        assert_eq!(config, HarnessConfig::default());
    }

    #[test]
    fn test_parse_toml_rejects_unknown_keys() {
        let err = HarnessConfig::from_toml_str("envoy_version = 3").unwrap_err();
        assert!(matches!(err, crate::error::HarnessError::Config(_)));
    }

    #[test]
    fn test_env_overrides_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("harness.toml");
        std::fs::write(&path, "image_tag = \"from-file\"\n").unwrap();

        let mut config = HarnessConfig::from_toml_file(&path).unwrap();
        config.apply_env(lookup(&[("ENVOY_IMAGE_TAG", "from-env")]));
        assert_eq!(config.image_tag, "from-env");
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let temp_dir = TempDir::new().unwrap();
        let err = HarnessConfig::from_toml_file(&temp_dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, crate::error::HarnessError::Io(_)));
    }

    #[test]
    fn test_platform_from_os() {
        assert_eq!(Platform::from_os("linux"), Platform::Linux);
        assert_eq!(Platform::from_os("macos"), Platform::MacOs);
        assert_eq!(
            Platform::from_os("windows"),
            Platform::Other("windows".to_string())
        );
        assert_eq!(Platform::from_os("freebsd").to_string(), "freebsd");
    }
}
