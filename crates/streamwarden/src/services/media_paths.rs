//! Per-channel media directory management.
//!
//! Every channel owns `<media_root>/<channel_id>`. Its contents (HLS
//! playlists, segments, recordings) are ephemeral and purged on stop,
//! restart and delete.

use std::path::PathBuf;

use tokio::fs;
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct MediaPaths {
    base: PathBuf,
}

impl MediaPaths {
    pub fn new(base: PathBuf) -> Self {
        Self { base }
    }

    pub fn channel_dir(&self, channel_id: Uuid) -> PathBuf {
        self.base.join(channel_id.to_string())
    }

    /// Create the channel directory if needed and return it.
    pub async fn ensure(&self, channel_id: Uuid) -> std::io::Result<PathBuf> {
        let dir = self.channel_dir(channel_id);
        fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// Remove the directory's contents, keeping the directory itself.
    pub async fn purge(&self, channel_id: Uuid) -> std::io::Result<()> {
        let dir = self.channel_dir(channel_id);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        fs::create_dir_all(&dir).await
    }

    /// Remove the directory entirely, for channel deletion.
    pub async fn remove(&self, channel_id: Uuid) -> std::io::Result<()> {
        let dir = self.channel_dir(channel_id);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ensure_purge_remove() {
        let tmp = tempfile::tempdir().unwrap();
        let media = MediaPaths::new(tmp.path().to_path_buf());
        let id = Uuid::new_v4();

        let dir = media.ensure(id).await.unwrap();
        assert!(dir.exists());

        tokio::fs::write(dir.join("index.m3u8"), b"#EXTM3U").await.unwrap();
        media.purge(id).await.unwrap();
        assert!(dir.exists());
        assert!(!dir.join("index.m3u8").exists());

        media.remove(id).await.unwrap();
        assert!(!dir.exists());
        // removing twice is fine
        media.remove(id).await.unwrap();
    }
}
