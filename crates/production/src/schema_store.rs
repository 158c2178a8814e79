//! Filesystem schema persistence.

use accelerate_core::{SchemaStore, SchemaStoreError};
use accelerate_types::EngineKey;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

static NEXT_STAGING_ID: AtomicU64 = AtomicU64::new(0);

/// Stores one file per (version, hash, datasource) triple.
///
/// Files are named by [`EngineKey::digest_hex`], so connection strings never
/// appear on disk.
#[derive(Debug, Clone)]
pub struct FileSchemaStore {
    dir: PathBuf,
}

impl FileSchemaStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &EngineKey) -> PathBuf {
        self.dir.join(format!("{}.prisma", key.digest_hex()))
    }
}

#[async_trait]
impl SchemaStore for FileSchemaStore {
    async fn load(&self, key: &EngineKey) -> Option<String> {
        let path = self.path_for(key);
        match tokio::fs::read_to_string(&path).await {
            Ok(schema) => Some(schema),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read schema snapshot");
                None
            }
        }
    }

    async fn save(&self, key: &EngineKey, schema: &str) -> Result<(), SchemaStoreError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(key);
        if tokio::fs::try_exists(&path).await? {
            return Ok(());
        }

        // Each writer stages its own file. Linking never replaces an existing
        // target, so concurrent saves of one key keep the first snapshot.
        let tmp = self.dir.join(format!(
            "{}.{}-{}.tmp",
            key.digest_hex(),
            std::process::id(),
            NEXT_STAGING_ID.fetch_add(1, Ordering::Relaxed)
        ));
        tokio::fs::write(&tmp, schema).await?;
        let linked = tokio::fs::hard_link(&tmp, &path).await;
        if let Err(e) = tokio::fs::remove_file(&tmp).await {
            debug!(path = %tmp.display(), error = %e, "Failed to remove staged schema file");
        }

        match linked {
            Ok(()) => {
                debug!(key = %key, path = %path.display(), "Persisted schema snapshot");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
