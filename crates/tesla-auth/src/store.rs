//! Durable storage for the refresh token
//!
//! One plaintext token in one file. The authorization server rotates the
//! token on some refreshes; every rotation overwrites the slot. Writes are
//! atomic (temp file + rename) and the file is 0600 on unix since the
//! token grants account access until revoked. Single-process,
//! single-writer by assumption; there is no cross-process locking.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Error, Result};

/// Single-slot refresh token file.
pub struct RefreshTokenStore {
    path: PathBuf,
}

impl RefreshTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored token. A missing file is "no token yet", not an
    /// error; an unreadable file surfaces.
    pub async fn load(&self) -> Result<Option<String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => {
                let token = contents.trim();
                if token.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(token.to_string()))
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no refresh token file");
                Ok(None)
            }
            Err(e) => Err(Error::Io(format!("reading refresh token file: {e}"))),
        }
    }

    /// Overwrite the slot with a new token.
    pub async fn save(&self, token: &str) -> Result<()> {
        write_atomic(&self.path, token).await?;
        info!(path = %self.path.display(), "persisted refresh token");
        Ok(())
    }
}

/// Write the token file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. This prevents a truncated token file if the process crashes
/// mid-write. Sets file permissions to 0600 (owner read/write only).
async fn write_atomic(path: &Path, token: &str) -> Result<()> {
    // A bare relative filename has an empty parent; treat it as ".".
    let dir = match path.parent() {
        Some(d) if !d.as_os_str().is_empty() => d.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let tmp_path = dir.join(format!(".refresh_token.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, token.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp token file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting token file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp token file: {e}")))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = RefreshTokenStore::new(dir.path().join("token"));
        assert_eq!(store.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn save_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = RefreshTokenStore::new(dir.path().join("token"));

        store.save("rt_first").await.unwrap();
        assert_eq!(store.load().await.unwrap().as_deref(), Some("rt_first"));
    }

    #[tokio::test]
    async fn save_overwrites_previous_token() {
        let dir = tempfile::tempdir().unwrap();
        let store = RefreshTokenStore::new(dir.path().join("token"));

        store.save("rt_first").await.unwrap();
        store.save("rt_second").await.unwrap();
        assert_eq!(store.load().await.unwrap().as_deref(), Some("rt_second"));
    }

    #[tokio::test]
    async fn empty_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token");
        tokio::fs::write(&path, "").await.unwrap();

        let store = RefreshTokenStore::new(path);
        assert_eq!(store.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn trailing_newline_is_trimmed() {
        // Hand-edited token files usually end with a newline.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token");
        tokio::fs::write(&path, "rt_pasted\n").await.unwrap();

        let store = RefreshTokenStore::new(path);
        assert_eq!(store.load().await.unwrap().as_deref(), Some("rt_pasted"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_permissions_are_0600() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token");
        let store = RefreshTokenStore::new(path.clone());
        store.save("rt_secret").await.unwrap();

        let metadata = tokio::fs::metadata(&path).await.unwrap();
        let mode = metadata.permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "token file must be 0600, got {mode:o}");
    }

    #[tokio::test]
    async fn no_temp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = RefreshTokenStore::new(dir.path().join("token"));
        store.save("rt_x").await.unwrap();

        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        assert_eq!(names, vec!["token"]);
    }
}
