use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use tokio::{io::AsyncWriteExt, sync::Mutex};

use super::{Credential, TokenStore};
use crate::error::{Error, Result};

/// Keeps the credential in a JSON file, so it survives process restarts.
///
/// Writes go to a sibling temporary file which is then renamed over the target.
/// Readers therefore see either the old or the new credential, never a partial one.
#[derive(Debug)]
pub struct FileTokenStore {
    path: PathBuf,
    tmp_path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileTokenStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(".tmp");
        let tmp_path = path.with_file_name(tmp_name);

        Self {
            path,
            tmp_path,
            write_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write_tmp(&self, contents: &[u8]) -> std::io::Result<()> {
        let mut file = tokio::fs::File::create(&self.tmp_path).await?;
        file.write_all(contents).await?;
        file.sync_all().await
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn save(&self, credential: &Credential) -> Result<()> {
        let contents = serde_json::to_vec(credential)
            .map_err(|e| Error::StorageFailed(format!("Failed to serialize credential: {e}")))?;

        let _guard = self.write_lock.lock().await;

        if let Err(e) = self.write_tmp(&contents).await {
            // The target file is untouched at this point.
            let _ = tokio::fs::remove_file(&self.tmp_path).await;
            return Err(Error::StorageFailed(format!(
                "Failed to write `{}`: {e}",
                self.tmp_path.display()
            )));
        }

        tokio::fs::rename(&self.tmp_path, &self.path)
            .await
            .map_err(|e| {
                Error::StorageFailed(format!("Failed to replace `{}`: {e}", self.path.display()))
            })
    }

    async fn load(&self) -> Result<Option<Credential>> {
        let contents = match tokio::fs::read(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::StorageFailed(format!(
                    "Failed to read `{}`: {e}",
                    self.path.display()
                )))
            }
        };

        serde_json::from_slice(&contents).map(Some).map_err(|e| {
            Error::StorageFailed(format!(
                "Stored credential in `{}` is corrupt: {e}",
                self.path.display()
            ))
        })
    }
}
