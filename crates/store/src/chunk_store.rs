use camino::{Utf8Path, Utf8PathBuf};
use meshfile_primitives::{Digest, MAX_CHUNK_SIZE};
use rand::Rng;
use tokio::fs;
use tracing::{debug, warn};

use crate::error::StoreError;

/// A local content-addressed blob store, flat directory, file name is the
/// lower-case hex digest, permissions `0644` (spec.md §4.4, §6 "Chunk file
/// layout"). The file system is the source of truth — there is no in-memory
/// index, and concurrent readers are always safe.
#[derive(Clone, Debug)]
pub struct ChunkStore {
    root: Utf8PathBuf,
}

impl ChunkStore {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    fn path_for(&self, digest: Digest) -> Utf8PathBuf {
        self.root.join(digest.to_hex())
    }

    /// Atomically writes `data` under `digest`: the store creates its root
    /// directory (`0755`) if absent, writes to a sibling temp file, sets
    /// `0644`, and renames into place — a reader never observes a partial
    /// write. Idempotent byte-for-byte if two writers race on the same
    /// digest, since both write identical bytes by construction.
    pub async fn put(&self, digest: Digest, data: &[u8]) -> Result<(), StoreError> {
        if data.len() > MAX_CHUNK_SIZE {
            return Err(StoreError::ChunkTooLarge(data.len()));
        }

        fs::create_dir_all(&self.root).await?;
        set_permissions(&self.root, 0o755).await?;

        let tmp_path = self.root.join(format!(
            ".tmp-{}-{:016x}",
            digest.to_hex(),
            rand::thread_rng().gen::<u64>()
        ));
        fs::write(&tmp_path, data).await?;
        set_permissions(&tmp_path, 0o644).await?;

        let final_path = self.path_for(digest);
        fs::rename(&tmp_path, &final_path).await?;
        debug!(chunk_hash = %digest, bytes = data.len(), "wrote chunk");
        Ok(())
    }

    /// Reads the bytes stored under `digest`.
    ///
    /// # Errors
    /// Returns `StoreError::NotFound` if no chunk is stored under `digest`.
    pub async fn get(&self, digest: Digest) -> Result<Vec<u8>, StoreError> {
        match fs::read(self.path_for(digest)).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound(digest)),
            Err(e) => {
                warn!(chunk_hash = %digest, error = %e, "chunk read failed");
                Err(StoreError::Io(e))
            }
        }
    }

    /// Returns existence and size without reading the chunk's bytes.
    pub async fn stat(&self, digest: Digest) -> Result<ChunkStat, StoreError> {
        match fs::metadata(self.path_for(digest)).await {
            Ok(meta) => Ok(ChunkStat {
                exists: true,
                size: meta.len(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(ChunkStat { exists: false, size: 0 })
            }
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    pub async fn exists(&self, digest: Digest) -> Result<bool, StoreError> {
        Ok(self.stat(digest).await?.exists)
    }
}

#[cfg(unix)]
async fn set_permissions(path: &Utf8Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let permissions = std::fs::Permissions::from_mode(mode);
    fs::set_permissions(path, permissions).await
}

#[cfg(not(unix))]
async fn set_permissions(_path: &Utf8Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ChunkStat {
    pub exists: bool,
    pub size: u64,
}

#[cfg(test)]
mod tests {
    use meshfile_primitives::chunk::sha256;

    use super::*;

    fn digest_of(data: &[u8]) -> Digest {
        Digest::new(sha256(data))
    }

    #[tokio::test]
    async fn put_then_get_round_trips() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = ChunkStore::new(Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap());

        let data = b"some chunk bytes";
        let digest = digest_of(data);
        store.put(digest, data).await?;

        assert_eq!(store.get(digest).await?, data);
        let stat = store.stat(digest).await?;
        assert!(stat.exists);
        assert_eq!(stat.size, data.len() as u64);
        Ok(())
    }

    #[tokio::test]
    async fn missing_chunk_reports_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::new(Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap());

        let missing = Digest::zero();
        assert!(matches!(store.get(missing).await, Err(StoreError::NotFound(_))));
        assert!(!store.exists(missing).await.unwrap());
    }

    #[tokio::test]
    async fn oversized_chunk_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::new(Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap());

        let data = vec![0_u8; MAX_CHUNK_SIZE + 1];
        let digest = digest_of(&data);
        assert!(matches!(
            store.put(digest, &data).await,
            Err(StoreError::ChunkTooLarge(_))
        ));
    }
}
