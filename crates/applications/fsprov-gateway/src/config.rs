//! Gateway configuration sources
//!
//! Capacity settings are read fresh on every capacity check so that edits to
//! `filesystem_gateway.yml` take effect without a restart.

use async_trait::async_trait;
use fsprov_core::{ConfigSource, GatewayConfig, ProvisionerError, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Name of the gateway configuration file
pub const CONFIG_FILE_NAME: &str = "filesystem_gateway.yml";

/// Environment variable naming the configuration directory
pub const CONFIG_DIR_ENV: &str = "CLOUD_FOUNDRY_CONFIG_PATH";

/// Default configuration path
///
/// `$CLOUD_FOUNDRY_CONFIG_PATH/filesystem_gateway.yml`, or
/// `./config/filesystem_gateway.yml` when the variable is unset.
pub fn default_config_path() -> PathBuf {
    let base = std::env::var_os(CONFIG_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config"));
    base.join(CONFIG_FILE_NAME)
}

/// Parse and validate a YAML configuration document
pub fn parse_config(raw: &str) -> Result<GatewayConfig> {
    let config: GatewayConfig = serde_yaml::from_str(raw)?;
    config.validate()?;
    Ok(config)
}

/// Configuration re-read from a YAML file on every load
#[derive(Debug, Clone)]
pub struct YamlConfigFile {
    path: PathBuf,
}

impl YamlConfigFile {
    /// Configuration source reading `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// File this source reads
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ConfigSource for YamlConfigFile {
    async fn load(&self) -> Result<GatewayConfig> {
        debug!(path = %self.path.display(), "Loading gateway configuration");
        let raw = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            ProvisionerError::config(format!("cannot read {}: {}", self.path.display(), e))
        })?;
        parse_config(&raw)
    }
}

/// Fixed configuration
#[derive(Debug, Clone)]
pub struct StaticConfig(pub GatewayConfig);

#[async_trait]
impl ConfigSource for StaticConfig {
    async fn load(&self) -> Result<GatewayConfig> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
max_fs_size: 2048
available_storage: 10240
host: 192.168.1.10
storage_root: /tmp/fsprov
backend_timeout_secs: 5
"#;

    #[test]
    fn test_parse_config() {
        let config = parse_config(SAMPLE).unwrap();
        assert_eq!(config.max_fs_size, 2048);
        assert_eq!(config.available_storage, 10240);
        assert_eq!(config.host, "192.168.1.10");
        assert_eq!(config.storage_root, "/tmp/fsprov");
        assert_eq!(config.node_id, "gateway");
        assert_eq!(config.backend_timeout_secs, 5);
    }

    #[test]
    fn test_parse_config_rejects_invalid() {
        assert!(matches!(
            parse_config("max_fs_size: 0\navailable_storage: 10\nhost: h\n"),
            Err(ProvisionerError::Config(_))
        ));
        assert!(matches!(
            parse_config("available_storage: 10\n"),
            Err(ProvisionerError::Yaml(_))
        ));
    }

    #[tokio::test]
    async fn test_yaml_file_is_reread_on_every_load() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, SAMPLE).unwrap();

        let source = YamlConfigFile::new(&path);
        assert_eq!(source.load().await.unwrap().available_storage, 10240);

        std::fs::write(&path, SAMPLE.replace("10240", "4096")).unwrap();
        assert_eq!(source.load().await.unwrap().available_storage, 4096);
    }

    #[tokio::test]
    async fn test_missing_file_is_config_error() {
        let source = YamlConfigFile::new("/nonexistent/filesystem_gateway.yml");
        assert!(matches!(source.load().await, Err(ProvisionerError::Config(_))));
    }

    #[test]
    fn test_default_path_file_name() {
        assert!(default_config_path().ends_with(CONFIG_FILE_NAME));
    }
}
