use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufReader};
use uuid::Uuid;

use super::{
    ArtifactError, ArtifactResult, ArtifactStrategy, BlobReader, check_filename,
    location_segments, project_segments,
};
use crate::types::BlobInfo;

const TMP_DIR: &str = ".tmp";

/// Stores blobs as files under `<base>/<org>/<project>/<location>/<filename>`.
pub struct LocalStrategy {
    base_path: PathBuf,
}

impl LocalStrategy {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    fn project_dir(&self, project: &str) -> ArtifactResult<PathBuf> {
        let mut path = self.base_path.clone();
        for segment in project_segments(project)? {
            path.push(segment);
        }
        Ok(path)
    }

    fn blob_path(&self, project: &str, location: &str, filename: &str) -> ArtifactResult<PathBuf> {
        check_filename(filename)?;
        let mut path = self.project_dir(project)?;
        for segment in location_segments(location)? {
            path.push(segment);
        }
        path.push(filename);
        Ok(path)
    }

    fn temp_path(&self) -> PathBuf {
        self.base_path
            .join(TMP_DIR)
            .join(Uuid::new_v4().to_string())
    }
}

fn not_found(project: &str, location: &str, filename: &str) -> impl FnOnce(std::io::Error) -> ArtifactError {
    let key = format!("{project}/{location}/{filename}");
    move |e| {
        if e.kind() == ErrorKind::NotFound {
            ArtifactError::NotFound(key)
        } else {
            ArtifactError::Io(e)
        }
    }
}

#[async_trait]
impl ArtifactStrategy for LocalStrategy {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn put(
        &self,
        project: &str,
        location: &str,
        filename: &str,
        data: Bytes,
    ) -> ArtifactResult<u64> {
        let final_path = self.blob_path(project, location, filename)?;

        let temp_path = self.temp_path();
        if let Some(parent) = temp_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut temp_file = File::create(&temp_path).await?;
        temp_file.write_all(&data).await?;
        temp_file.sync_all().await?;

        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        fs::rename(&temp_path, &final_path).await?;

        tracing::debug!(path = %final_path.display(), size = data.len(), "stored blob");
        Ok(data.len() as u64)
    }

    async fn open(
        &self,
        project: &str,
        location: &str,
        filename: &str,
    ) -> ArtifactResult<(BlobReader, u64)> {
        let path = self.blob_path(project, location, filename)?;
        let file = File::open(&path)
            .await
            .map_err(not_found(project, location, filename))?;

        let size = file.metadata().await?.len();

        Ok((Box::pin(BufReader::new(file)), size))
    }

    async fn size(&self, project: &str, location: &str, filename: &str) -> ArtifactResult<Option<u64>> {
        let path = self.blob_path(project, location, filename)?;
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(Some(meta.len())),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ArtifactError::Io(e)),
        }
    }

    async fn delete(&self, project: &str, location: &str, filename: &str) -> ArtifactResult<bool> {
        let path = self.blob_path(project, location, filename)?;

        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ArtifactError::Io(e)),
        }
    }

    async fn list(&self, project: &str) -> ArtifactResult<Vec<BlobInfo>> {
        let root = self.project_dir(project)?;
        let mut blobs = Vec::new();
        let mut pending = vec![(root, String::new())];

        while let Some((dir, location)) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(ArtifactError::Io(e)),
            };

            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().into_owned();
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    let nested = if location.is_empty() {
                        name
                    } else {
                        format!("{location}/{name}")
                    };
                    pending.push((entry.path(), nested));
                } else if file_type.is_file() {
                    blobs.push(BlobInfo {
                        location: location.clone(),
                        filename: name,
                        size: entry.metadata().await?.len(),
                    });
                }
            }
        }

        blobs.sort_by(|a, b| (&a.location, &a.filename).cmp(&(&b.location, &b.filename)));
        Ok(blobs)
    }

    async fn delete_project(&self, project: &str) -> ArtifactResult<()> {
        let dir = self.project_dir(project)?;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ArtifactError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    const PROJECT: &str = "acme:rocket";

    #[tokio::test]
    async fn test_put_and_open() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalStrategy::new(temp_dir.path());

        let size = storage
            .put(PROJECT, "models/v1", "engine.xmi", Bytes::from_static(b"<xmi/>"))
            .await
            .unwrap();
        assert_eq!(size, 6);
        assert!(temp_dir
            .path()
            .join("acme/rocket/models/v1/engine.xmi")
            .exists());

        let (mut reader, size) = storage.open(PROJECT, "models/v1", "engine.xmi").await.unwrap();
        assert_eq!(size, 6);
        let mut content = Vec::new();
        reader.read_to_end(&mut content).await.unwrap();
        assert_eq!(content, b"<xmi/>");

        let bytes = storage.get(PROJECT, "models/v1", "engine.xmi").await.unwrap();
        assert_eq!(&bytes[..], b"<xmi/>");
    }

    #[tokio::test]
    async fn test_put_replaces_existing() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalStrategy::new(temp_dir.path());

        storage.put(PROJECT, "", "a.txt", Bytes::from_static(b"one")).await.unwrap();
        storage.put(PROJECT, "", "a.txt", Bytes::from_static(b"three")).await.unwrap();

        let bytes = storage.get(PROJECT, "", "a.txt").await.unwrap();
        assert_eq!(&bytes[..], b"three");
        assert_eq!(storage.size(PROJECT, "", "a.txt").await.unwrap(), Some(5));
    }

    #[tokio::test]
    async fn test_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalStrategy::new(temp_dir.path());

        assert!(matches!(
            storage.open(PROJECT, "", "missing.txt").await,
            Err(ArtifactError::NotFound(_))
        ));
        assert_eq!(storage.size(PROJECT, "", "missing.txt").await.unwrap(), None);
        assert!(!storage.delete(PROJECT, "", "missing.txt").await.unwrap());
        assert!(storage.list(PROJECT).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_traversal() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalStrategy::new(temp_dir.path());

        assert!(matches!(
            storage.put(PROJECT, "../other", "a.txt", Bytes::new()).await,
            Err(ArtifactError::InvalidPath(_))
        ));
        assert!(matches!(
            storage.put(PROJECT, "", "..", Bytes::new()).await,
            Err(ArtifactError::InvalidPath(_))
        ));
    }

    #[tokio::test]
    async fn test_list_and_delete_project() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalStrategy::new(temp_dir.path());

        storage.put(PROJECT, "", "root.txt", Bytes::from_static(b"r")).await.unwrap();
        storage.put(PROJECT, "a/b", "deep.txt", Bytes::from_static(b"dd")).await.unwrap();
        storage.put("acme:other", "", "x.txt", Bytes::from_static(b"x")).await.unwrap();

        let blobs = storage.list(PROJECT).await.unwrap();
        assert_eq!(
            blobs,
            vec![
                BlobInfo {
                    location: String::new(),
                    filename: "root.txt".to_string(),
                    size: 1,
                },
                BlobInfo {
                    location: "a/b".to_string(),
                    filename: "deep.txt".to_string(),
                    size: 2,
                },
            ]
        );

        storage.delete_project(PROJECT).await.unwrap();
        assert!(storage.list(PROJECT).await.unwrap().is_empty());
        assert_eq!(storage.list("acme:other").await.unwrap().len(), 1);
    }
}
