mod server;

use std::fs;
use std::path::Path;

use serde::Deserialize;

pub use server::{ArtifactConfig, AuthConfig, ServerConfig, WebhookConfig};

use crate::error::{Error, Result};

pub const CONFIG_FILE: &str = "mbee.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub artifacts: ArtifactConfig,
    pub webhooks: WebhookConfig,
}

impl Config {
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| Error::Config(e.to_string()))
    }

    /// Loads `mbee.toml` from `data_dir`, falling back to defaults when the
    /// file does not exist. `server.data_dir` is always set to `data_dir`.
    pub fn load(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(CONFIG_FILE);
        let mut config = if path.exists() {
            let contents = fs::read_to_string(&path)?;
            Self::from_toml(&contents)
                .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?
        } else {
            Self::default()
        };
        config.server.data_dir = data_dir.to_path_buf();
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 9080);
        assert_eq!(config.auth.session_timeout_secs, 28_800);
        assert!(matches!(config.artifacts, ArtifactConfig::Local { path: None }));
        assert_eq!(config.webhooks.timeout_secs, 10);
    }

    #[test]
    fn test_parse_partial_file() {
        let config = Config::from_toml(
            r#"
            [server]
            port = 8000

            [artifacts]
            strategy = "s3"
            bucket = "mbee-blobs"
            endpoint = "http://localhost:9000"
            force_path_style = true
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 8000);
        assert_eq!(config.server.host, "127.0.0.1");
        match config.artifacts {
            ArtifactConfig::S3 {
                bucket,
                region,
                endpoint,
                force_path_style,
                ..
            } => {
                assert_eq!(bucket, "mbee-blobs");
                assert_eq!(region, "us-east-1");
                assert_eq!(endpoint.as_deref(), Some("http://localhost:9000"));
                assert!(force_path_style);
            }
            other => panic!("unexpected artifact config {other:?}"),
        }
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        assert!(matches!(
            Config::from_toml("[server]\nport = \"high\""),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_load_sets_data_dir() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join(CONFIG_FILE),
            "[auth]\nsession_timeout_secs = 60\n",
        )
        .unwrap();

        let config = Config::load(temp_dir.path()).unwrap();
        assert_eq!(config.auth.session_timeout_secs, 60);
        assert_eq!(config.server.data_dir, temp_dir.path());

        let missing = Config::load(&PathBuf::from("/nonexistent/mbee")).unwrap();
        assert_eq!(missing.server.port, 9080);
    }
}
