//! On-disk image cache keyed by (system, path)

use bytes::Bytes;
use imageinf_core::{Error, FileReference, Result};
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Cache rooted at a directory; entries live at `<root>/<system>/<path>`.
///
/// Writes go to a temp file in the destination directory and are renamed
/// into place, so a concurrent reader sees either no file or the full file.
#[derive(Debug, Clone)]
pub struct FileCache {
    root: PathBuf,
}

impl FileCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Cache location for `file`. Rejects keys that would escape the root.
    pub fn path_for(&self, file: &FileReference) -> Result<PathBuf> {
        let reject = |msg: &str| Error::retrieval(&file.system_id, &file.path, msg);

        let system = file.system_id.trim_matches('/');
        let rel = file.path.trim_matches('/');
        if system.is_empty() || system.contains('/') || system == "." || system == ".." {
            return Err(reject("invalid system id"));
        }
        if rel.is_empty() {
            return Err(reject("empty path"));
        }

        let mut path = self.root.join(system);
        for component in Path::new(rel).components() {
            match component {
                Component::Normal(part) => path.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(reject("path escapes the cache root"));
                }
            }
        }
        Ok(path)
    }

    /// Cached bytes for `file`, or `None` on a miss
    pub async fn get(&self, file: &FileReference) -> Result<Option<Bytes>> {
        let path = self.path_for(file)?;
        match fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Store `data` for `file`, replacing any existing entry atomically
    pub async fn put(&self, file: &FileReference, data: Bytes) -> Result<PathBuf> {
        let final_path = self.path_for(file)?;
        let dir = final_path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| Error::internal("cache entry has no parent directory"))?;
        fs::create_dir_all(&dir).await?;

        let target = final_path.clone();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut temp = tempfile::NamedTempFile::new_in(&dir)?;
            temp.write_all(&data)?;
            temp.as_file().sync_all()?;
            temp.persist(&target).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| Error::internal(format!("cache write task failed: {}", e)))??;

        debug!(path = %final_path.display(), "Cached file");
        Ok(final_path)
    }
}
