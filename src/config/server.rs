use std::net::SocketAddr;
use std::path::PathBuf;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Holds the database, the config file and locally stored blobs.
    pub data_dir: PathBuf,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }

    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("mbee.db")
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9080,
            data_dir: PathBuf::from("./data"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Lifetime of tokens issued by `/api/login`.
    pub session_timeout_secs: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_timeout_secs: 8 * 60 * 60,
        }
    }
}

/// Where blobs are stored.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "strategy", rename_all = "lowercase")]
pub enum ArtifactConfig {
    /// Files under `path`, or `<data_dir>/artifacts` when unset.
    Local {
        #[serde(default)]
        path: Option<PathBuf>,
    },
    S3 {
        bucket: String,
        #[serde(default = "default_region")]
        region: String,
        #[serde(default)]
        endpoint: Option<String>,
        #[serde(default)]
        prefix: Option<String>,
        #[serde(default)]
        force_path_style: bool,
    },
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self::Local { path: None }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Per-request timeout for outgoing webhook deliveries.
    pub timeout_secs: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self { timeout_secs: 10 }
    }
}
