//! S3-compatible blob storage.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::SdkError;
use bytes::Bytes;

use super::{
    ArtifactError, ArtifactResult, ArtifactStrategy, BlobReader, check_filename,
    location_segments, project_segments,
};
use crate::types::BlobInfo;

/// Stores blobs under `<prefix>/<org>/<project>/<location>/<filename>`.
pub struct S3Strategy {
    client: Client,
    bucket: String,
    prefix: Option<String>,
}

impl std::fmt::Debug for S3Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Strategy")
            .field("bucket", &self.bucket)
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

fn backend_error<E>(err: SdkError<E>) -> ArtifactError
where
    E: std::error::Error + Send + Sync + 'static,
{
    ArtifactError::Backend(err.to_string())
}

fn is_not_found<E>(err: &SdkError<E>) -> bool {
    matches!(err, SdkError::ServiceError(service_err) if service_err.raw().status().as_u16() == 404)
}

impl S3Strategy {
    /// Credentials come from the standard AWS provider chain.
    pub async fn new(
        bucket: &str,
        region: &str,
        endpoint: Option<String>,
        prefix: Option<String>,
        force_path_style: bool,
    ) -> Self {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_string()))
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(endpoint_url) = endpoint {
            builder = builder.endpoint_url(endpoint_url);
        }
        if force_path_style {
            builder = builder.force_path_style(true);
        }

        Self {
            client: Client::from_conf(builder.build()),
            bucket: bucket.to_string(),
            prefix: prefix.map(|p| p.trim_matches('/').to_string()).filter(|p| !p.is_empty()),
        }
    }

    fn project_key(&self, project: &str) -> ArtifactResult<String> {
        let segments = project_segments(project)?.join("/");
        Ok(match &self.prefix {
            Some(prefix) => format!("{prefix}/{segments}"),
            None => segments,
        })
    }

    fn blob_key(&self, project: &str, location: &str, filename: &str) -> ArtifactResult<String> {
        check_filename(filename)?;
        let mut key = self.project_key(project)?;
        for segment in location_segments(location)? {
            key.push('/');
            key.push_str(segment);
        }
        key.push('/');
        key.push_str(filename);
        Ok(key)
    }

    async fn list_keys(&self, prefix: &str) -> ArtifactResult<Vec<(String, u64)>> {
        let mut results = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);

            if let Some(token) = continuation_token.take() {
                request = request.continuation_token(token);
            }

            let output = request.send().await.map_err(backend_error)?;

            for obj in output.contents() {
                if let Some(key) = obj.key() {
                    let size = obj.size().and_then(|s| u64::try_from(s).ok()).unwrap_or(0);
                    results.push((key.to_string(), size));
                }
            }

            if output.is_truncated() == Some(true) {
                continuation_token = output.next_continuation_token().map(str::to_string);
            } else {
                break;
            }
        }

        Ok(results)
    }
}

#[async_trait]
impl ArtifactStrategy for S3Strategy {
    fn name(&self) -> &'static str {
        "s3"
    }

    async fn put(
        &self,
        project: &str,
        location: &str,
        filename: &str,
        data: Bytes,
    ) -> ArtifactResult<u64> {
        let key = self.blob_key(project, location, filename)?;
        let size = data.len() as u64;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(data.into())
            .send()
            .await
            .map_err(backend_error)?;
        Ok(size)
    }

    async fn open(
        &self,
        project: &str,
        location: &str,
        filename: &str,
    ) -> ArtifactResult<(BlobReader, u64)> {
        let key = self.blob_key(project, location, filename)?;
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| {
                if is_not_found(&e) {
                    ArtifactError::NotFound(key.clone())
                } else {
                    backend_error(e)
                }
            })?;

        let size = output
            .content_length()
            .and_then(|len| u64::try_from(len).ok())
            .unwrap_or(0);
        Ok((Box::pin(output.body.into_async_read()), size))
    }

    async fn size(&self, project: &str, location: &str, filename: &str) -> ArtifactResult<Option<u64>> {
        let key = self.blob_key(project, location, filename)?;
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
        {
            Ok(output) => Ok(Some(
                output
                    .content_length()
                    .and_then(|len| u64::try_from(len).ok())
                    .unwrap_or(0),
            )),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(backend_error(e)),
        }
    }

    async fn delete(&self, project: &str, location: &str, filename: &str) -> ArtifactResult<bool> {
        // delete_object succeeds on missing keys, so check first.
        if self.size(project, location, filename).await?.is_none() {
            return Ok(false);
        }
        let key = self.blob_key(project, location, filename)?;

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(backend_error)?;
        Ok(true)
    }

    async fn list(&self, project: &str) -> ArtifactResult<Vec<BlobInfo>> {
        let root = format!("{}/", self.project_key(project)?);
        let mut blobs: Vec<BlobInfo> = self
            .list_keys(&root)
            .await?
            .into_iter()
            .filter_map(|(key, size)| {
                let relative = key.strip_prefix(&root)?;
                let (location, filename) = match relative.rsplit_once('/') {
                    Some((location, filename)) => (location.to_string(), filename.to_string()),
                    None => (String::new(), relative.to_string()),
                };
                Some(BlobInfo {
                    location,
                    filename,
                    size,
                })
            })
            .collect();

        blobs.sort_by(|a, b| (&a.location, &a.filename).cmp(&(&b.location, &b.filename)));
        Ok(blobs)
    }

    async fn delete_project(&self, project: &str) -> ArtifactResult<()> {
        let root = format!("{}/", self.project_key(project)?);
        for (key, _) in self.list_keys(&root).await? {
            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(&key)
                .send()
                .await
                .map_err(backend_error)?;
        }
        Ok(())
    }
}
