//! Engine artifacts on local disk.
//!
//! ```text
//! <engines_dir>/
//!   <version>/
//!     query-engine
//! ```
//!
//! A missing executable is fetched from `<mirror>/<version>/<platform>/query-engine`,
//! written next to its final path and renamed into place, so a crash
//! mid-download never leaves a truncated executable behind.

use accelerate_core::{ArtifactError, EngineArtifact, EngineProvisioner};
use accelerate_types::EngineVersion;
use async_trait::async_trait;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

const EXECUTABLE_NAME: &str = "query-engine";

/// Looks up engine executables by version, downloading missing ones.
#[derive(Debug)]
pub struct EngineDirectory {
    root: PathBuf,
    mirror: Option<String>,
    platform: String,
    client: reqwest::Client,
    /// Serializes acquisitions of the same version.
    locks: DashMap<EngineVersion, Arc<Mutex<()>>>,
}

impl EngineDirectory {
    pub fn new(root: impl Into<PathBuf>, platform: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            mirror: None,
            platform: platform.into(),
            client: reqwest::Client::new(),
            locks: DashMap::new(),
        }
    }

    /// Download missing executables from `mirror`.
    pub fn with_mirror(mut self, mirror: impl Into<String>) -> Self {
        self.mirror = Some(mirror.into().trim_end_matches('/').to_string());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the executable for `version` lives.
    pub fn executable_path(&self, version: &EngineVersion) -> PathBuf {
        self.root.join(version.as_str()).join(EXECUTABLE_NAME)
    }

    async fn download(
        &self,
        mirror: &str,
        version: &EngineVersion,
        dest: &Path,
    ) -> Result<(), ArtifactError> {
        let url = format!("{}/{}/{}/{}", mirror, version, self.platform, EXECUTABLE_NAME);
        info!(%url, "Downloading query engine");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ArtifactError::Download(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ArtifactError::Download(format!(
                "{} answered {}",
                url,
                response.status()
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ArtifactError::Download(e.to_string()))?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let partial = dest.with_extension("partial");
        tokio::fs::write(&partial, &bytes).await?;
        mark_executable(&partial).await?;
        tokio::fs::rename(&partial, dest).await?;

        debug!(path = %dest.display(), size = bytes.len(), "Query engine installed");
        Ok(())
    }
}

#[cfg(unix)]
async fn mark_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).await
}

#[cfg(not(unix))]
async fn mark_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[async_trait]
impl EngineProvisioner for EngineDirectory {
    async fn acquire(&self, version: &EngineVersion) -> Result<EngineArtifact, ArtifactError> {
        if !version.is_path_safe() {
            return Err(ArtifactError::UnsupportedVersion(version.to_string()));
        }

        let lock = self.locks.entry(version.clone()).or_default().clone();
        let result = {
            let _guard = lock.lock().await;
            self.locate_or_download(version).await
        };

        drop(lock);
        // Only this map still holds the lock once no acquisition waits on it.
        self.locks
            .remove_if(version, |_, lock| Arc::strong_count(lock) == 1);
        result
    }
}

impl EngineDirectory {
    async fn locate_or_download(
        &self,
        version: &EngineVersion,
    ) -> Result<EngineArtifact, ArtifactError> {
        let path = self.executable_path(version);
        if tokio::fs::try_exists(&path).await? {
            return Ok(EngineArtifact::Binary(path));
        }

        let Some(mirror) = &self.mirror else {
            return Err(ArtifactError::NotFound(path.display().to_string()));
        };
        self.download(mirror, version, &path).await?;
        Ok(EngineArtifact::Binary(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use axum::Router;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Serve a fake executable and count downloads.
    async fn mirror(hits: Arc<AtomicUsize>) -> String {
        let app = Router::new().route(
            "/{version}/{platform}/query-engine",
            get(move || {
                let hits = hits.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    "#!/bin/sh\nexit 0\n"
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_existing_executable_is_used() {
        let dir = TempDir::new().unwrap();
        let engines = EngineDirectory::new(dir.path(), "debian-openssl-3.0.x");
        let version = EngineVersion::new("abc123");
        let path = engines.executable_path(&version);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"binary").unwrap();

        assert_eq!(
            engines.acquire(&version).await.unwrap(),
            EngineArtifact::Binary(path)
        );
    }

    #[tokio::test]
    async fn test_missing_without_mirror() {
        let dir = TempDir::new().unwrap();
        let engines = EngineDirectory::new(dir.path(), "debian-openssl-3.0.x");

        assert!(matches!(
            engines.acquire(&EngineVersion::new("abc123")).await,
            Err(ArtifactError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_version_locks_released_after_acquire() {
        let dir = TempDir::new().unwrap();
        let engines = EngineDirectory::new(dir.path(), "debian-openssl-3.0.x");

        for n in 0..32 {
            let version = EngineVersion::new(format!("client-chosen-{}", n));
            assert!(engines.acquire(&version).await.is_err());
        }
        assert!(engines.locks.is_empty());
    }

    #[tokio::test]
    async fn test_path_traversal_refused() {
        let dir = TempDir::new().unwrap();
        let engines = EngineDirectory::new(dir.path(), "debian-openssl-3.0.x");

        for version in ["..", "../etc", "a/b", ""] {
            assert!(matches!(
                engines.acquire(&EngineVersion::new(version)).await,
                Err(ArtifactError::UnsupportedVersion(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_concurrent_acquisitions_download_once() {
        let hits = Arc::new(AtomicUsize::new(0));
        let url = mirror(hits.clone()).await;
        let dir = TempDir::new().unwrap();
        let engines = Arc::new(
            EngineDirectory::new(dir.path(), "debian-openssl-3.0.x").with_mirror(format!("{}/", url)),
        );
        let version = EngineVersion::new("abc123");

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let engines = engines.clone();
                let version = version.clone();
                tokio::spawn(async move { engines.acquire(&version).await })
            })
            .collect();
        for task in tasks {
            let artifact = task.await.unwrap().unwrap();
            assert_eq!(artifact, EngineArtifact::Binary(engines.executable_path(&version)));
        }

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(engines.locks.is_empty());
        let installed = engines.executable_path(&version);
        assert!(installed.exists());
        assert!(!installed.with_extension("partial").exists());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&installed).unwrap().permissions().mode();
            assert_eq!(mode & 0o111, 0o111);
        }
    }

    #[tokio::test]
    async fn test_mirror_error_reported() {
        let hits = Arc::new(AtomicUsize::new(0));
        let url = mirror(hits).await;
        let dir = TempDir::new().unwrap();
        let engines = EngineDirectory::new(dir.path(), "debian-openssl-3.0.x")
            .with_mirror(format!("{}/missing", url));

        assert!(matches!(
            engines.acquire(&EngineVersion::new("abc123")).await,
            Err(ArtifactError::Download(_))
        ));
    }
}
