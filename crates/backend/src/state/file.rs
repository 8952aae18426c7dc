use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::trace;

use super::{StateStore, StoreError};

/// One JSON file per key under a directory
///
/// Writes go to a temporary file that is then renamed over the target, so a
/// crash mid-write leaves the previous state in place.
#[derive(Debug, Clone)]
pub struct FileStateStore {
  dir: PathBuf,
}

impl FileStateStore {
  pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
    let dir = dir.into();
    tokio::fs::create_dir_all(&dir).await.map_err(|source| StoreError::Io {
      key: dir.display().to_string(),
      source,
    })?;
    Ok(Self { dir })
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  fn path_for(&self, key: &str) -> PathBuf {
    let file_name: String = key
      .chars()
      .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
      .collect();
    self.dir.join(format!("{file_name}.json"))
  }
}

#[async_trait]
impl StateStore for FileStateStore {
  async fn load(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
    let path = self.path_for(key);
    let bytes = match tokio::fs::read(&path).await {
      Ok(bytes) => bytes,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
      Err(source) => {
        return Err(StoreError::Io {
          key: key.to_string(),
          source,
        });
      }
    };

    serde_json::from_slice(&bytes).map(Some).map_err(|source| StoreError::Serde {
      key: key.to_string(),
      source,
    })
  }

  async fn save(&self, key: &str, value: serde_json::Value) -> Result<(), StoreError> {
    let path = self.path_for(key);
    let tmp = path.with_extension("json.tmp");
    let bytes = serde_json::to_vec_pretty(&value).map_err(|source| StoreError::Serde {
      key: key.to_string(),
      source,
    })?;

    let io_err = |source| StoreError::Io {
      key: key.to_string(),
      source,
    };
    tokio::fs::write(&tmp, &bytes).await.map_err(io_err)?;
    tokio::fs::rename(&tmp, &path).await.map_err(io_err)?;

    trace!(key, path = %path.display(), bytes = bytes.len(), "State saved");
    Ok(())
  }

  async fn remove(&self, key: &str) -> Result<(), StoreError> {
    match tokio::fs::remove_file(self.path_for(key)).await {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
      Err(source) => Err(StoreError::Io {
        key: key.to_string(),
        source,
      }),
    }
  }
}
