//! Blob storage behind artifact records.
//!
//! Blobs are addressed by `(project id, location, filename)`. The project id is
//! a composite `org:project` id; strategies turn its segments into directory
//! or key components.

mod local;
#[cfg(feature = "s3")]
mod s3;

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

pub use local::LocalStrategy;
#[cfg(feature = "s3")]
pub use s3::S3Strategy;

use crate::config::{ArtifactConfig, Config};
use crate::error::{Error, Result};
use crate::types::BlobInfo;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("blob not found: {0}")]
    NotFound(String),
    #[error("invalid blob path: {0}")]
    InvalidPath(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage backend error: {0}")]
    Backend(String),
}

pub type ArtifactResult<T> = std::result::Result<T, ArtifactError>;

impl From<ArtifactError> for Error {
    fn from(err: ArtifactError) -> Self {
        match err {
            ArtifactError::NotFound(what) => Error::NotFound(format!("Blob [{what}]")),
            ArtifactError::InvalidPath(msg) => Error::validation("location", msg),
            other => Error::Storage(other.to_string()),
        }
    }
}

pub type BlobReader = Pin<Box<dyn AsyncRead + Send>>;

#[async_trait]
pub trait ArtifactStrategy: Send + Sync {
    /// Name recorded on artifacts stored through this strategy.
    fn name(&self) -> &'static str;

    /// Stores a blob, replacing any existing one. Returns the stored size.
    async fn put(
        &self,
        project: &str,
        location: &str,
        filename: &str,
        data: Bytes,
    ) -> ArtifactResult<u64>;

    /// Opens a blob for streaming. Returns the reader and the blob size.
    async fn open(
        &self,
        project: &str,
        location: &str,
        filename: &str,
    ) -> ArtifactResult<(BlobReader, u64)>;

    /// Size of a stored blob without reading it; `None` when absent.
    async fn size(&self, project: &str, location: &str, filename: &str) -> ArtifactResult<Option<u64>>;

    /// Returns false when there was nothing to delete.
    async fn delete(&self, project: &str, location: &str, filename: &str) -> ArtifactResult<bool>;

    async fn list(&self, project: &str) -> ArtifactResult<Vec<BlobInfo>>;

    /// Removes every blob stored for `project`.
    async fn delete_project(&self, project: &str) -> ArtifactResult<()>;

    async fn get(&self, project: &str, location: &str, filename: &str) -> ArtifactResult<Bytes> {
        let (mut reader, size) = self.open(project, location, filename).await?;
        let mut buf = Vec::with_capacity(usize::try_from(size).unwrap_or(0));
        reader.read_to_end(&mut buf).await?;
        Ok(Bytes::from(buf))
    }
}

/// Splits a composite project id into its path components.
pub(crate) fn project_segments(project: &str) -> ArtifactResult<Vec<&str>> {
    let segments: Vec<&str> = project.split(crate::id::ID_DELIMITER).collect();
    if segments.len() != 2 || segments.iter().any(|s| s.is_empty() || s.starts_with('.')) {
        return Err(ArtifactError::InvalidPath(format!(
            "[{project}] is not a project id"
        )));
    }
    Ok(segments)
}

/// Splits a location into directory components, rejecting traversal.
pub(crate) fn location_segments(location: &str) -> ArtifactResult<Vec<&str>> {
    crate::validators::validate_location(location)
        .map_err(|e| ArtifactError::InvalidPath(e.to_string()))?;
    Ok(location
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect())
}

pub(crate) fn check_filename(filename: &str) -> ArtifactResult<()> {
    crate::validators::validate_filename(filename)
        .map_err(|e| ArtifactError::InvalidPath(e.to_string()))
}

/// Builds the strategy selected in the configuration.
pub async fn from_config(config: &Config) -> Result<Arc<dyn ArtifactStrategy>> {
    match &config.artifacts {
        ArtifactConfig::Local { path } => {
            let base = path
                .clone()
                .unwrap_or_else(|| config.server.data_dir.join("artifacts"));
            Ok(Arc::new(LocalStrategy::new(base)))
        }
        #[cfg(feature = "s3")]
        ArtifactConfig::S3 {
            bucket,
            region,
            endpoint,
            prefix,
            force_path_style,
        } => {
            let strategy = S3Strategy::new(
                bucket,
                region,
                endpoint.clone(),
                prefix.clone(),
                *force_path_style,
            )
            .await;
            Ok(Arc::new(strategy))
        }
        #[cfg(not(feature = "s3"))]
        ArtifactConfig::S3 { .. } => Err(Error::Config(
            "the s3 artifact strategy requires building with the `s3` feature".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_segments() {
        assert_eq!(project_segments("acme:rocket").unwrap(), vec!["acme", "rocket"]);
        assert!(project_segments("acme").is_err());
        assert!(project_segments("acme:rocket:master").is_err());
        assert!(project_segments("acme:").is_err());
    }

    #[test]
    fn test_location_segments() {
        assert!(location_segments("").unwrap().is_empty());
        assert_eq!(location_segments("a/b/").unwrap(), vec!["a", "b"]);
        assert!(location_segments("../etc").is_err());
    }

    #[test]
    fn test_error_mapping() {
        let err: Error = ArtifactError::NotFound("x".to_string()).into();
        assert!(matches!(err, Error::NotFound(_)));
        let err: Error = ArtifactError::InvalidPath("x".to_string()).into();
        assert!(matches!(err, Error::Validation { .. }));
        let err: Error = ArtifactError::Backend("x".to_string()).into();
        assert!(matches!(err, Error::Storage(_)));
    }

    #[tokio::test]
    async fn test_local_is_default() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let mut config = Config::default();
        config.server.data_dir = temp_dir.path().to_path_buf();
        let strategy = from_config(&config).await.unwrap();
        assert_eq!(strategy.name(), "local");
    }
}
