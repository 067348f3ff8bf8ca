//! Archive packaging and one-time downloads for generated portfolios.
//!
//! Lifecycle of a generated archive:
//! Requested → Synthesizing → Packed → AwaitingDownload → Delivered | Expired.
//! `pack` writes `<name>.partial` and renames it only after the zip writer is
//! finished and the file synced, so a listed archive is always complete.
//! `claim` renames the archive out of the public namespace before streaming
//! it, which makes each download one-shot; the claimed file is removed when
//! the response body is dropped. Archives nobody downloads are removed by
//! `sweep_expired`.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use futures_util::{stream, Stream};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};
use uuid::Uuid;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::portfolio::synthesizer::FileTree;

const ARCHIVE_EXTENSION: &str = ".zip";
const PARTIAL_SUFFIX: &str = ".partial";
const CLAIMED_SUFFIX: &str = ".sending";
const MAX_FILE_NAME_LEN: usize = 128;
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum PackageError {
    #[error("failed to write archive: {0}")]
    ArchiveWrite(String),

    #[error("download '{0}' not found")]
    DownloadFileNotFound(String),

    #[error("invalid download file name '{0}'")]
    InvalidFileName(String),

    #[error("download storage error: {0}")]
    Io(#[from] std::io::Error),

    #[error("packaging task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl From<zip::result::ZipError> for PackageError {
    fn from(e: zip::result::ZipError) -> Self {
        PackageError::ArchiveWrite(e.to_string())
    }
}

/// Temporary storage for generated portfolio archives.
pub struct DownloadStore {
    dir: PathBuf,
}

impl DownloadStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Unique archive name: `<project>-<millis>-<random>.zip`.
    pub fn archive_name(project: &str) -> String {
        let millis = chrono::Utc::now().timestamp_millis();
        let random = Uuid::new_v4().simple().to_string();
        format!("{project}-{millis}-{}{ARCHIVE_EXTENSION}", &random[..8])
    }

    /// Packs `tree` into `<dir>/<file_name>`, returning the archive size.
    pub async fn pack(&self, tree: FileTree, file_name: &str) -> Result<u64, PackageError> {
        validate_file_name(file_name)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        let dest = self.dir.join(file_name);
        let size = tokio::task::spawn_blocking(move || write_archive(&tree, &dest)).await??;
        info!("Packed portfolio archive {file_name} ({size} bytes)");
        Ok(size)
    }

    /// Takes exclusive ownership of a packed archive for a single download.
    pub async fn claim(&self, file_name: &str) -> Result<ClaimedDownload, PackageError> {
        validate_file_name(file_name)?;
        let source = self.dir.join(file_name);
        let claimed = self
            .dir
            .join(format!("{file_name}.{}{CLAIMED_SUFFIX}", Uuid::new_v4().simple()));

        match tokio::fs::rename(&source, &claimed).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PackageError::DownloadFileNotFound(file_name.to_string()))
            }
            Err(e) => return Err(e.into()),
        }

        let guard = RemoveOnDrop(claimed);
        let file = tokio::fs::File::open(&guard.0).await?;
        let len = file.metadata().await?.len();
        Ok(ClaimedDownload {
            file_name: file_name.to_string(),
            file,
            len,
            guard,
        })
    }

    /// Deletes archives (and abandoned partial/claimed files) older than `max_age`.
    pub async fn sweep_expired(&self, max_age: Duration) -> Result<usize, PackageError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let now = SystemTime::now();
        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let age = metadata
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or_default();
            if age < max_age {
                continue;
            }
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(
                    "Failed to remove expired archive {}: {e}",
                    entry.path().display()
                ),
            }
        }

        if removed > 0 {
            info!("Swept {removed} expired portfolio archive(s)");
        }
        Ok(removed)
    }
}

/// Periodically removes archives that were never downloaded.
pub async fn run_expiry_sweeper(
    store: std::sync::Arc<DownloadStore>,
    ttl: Duration,
    every: Duration,
) {
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        if let Err(e) = store.sweep_expired(ttl).await {
            warn!("Portfolio archive sweep failed: {e}");
        }
    }
}

/// A claimed archive ready to stream; deleted once the stream is dropped.
#[derive(Debug)]
pub struct ClaimedDownload {
    pub file_name: String,
    pub len: u64,
    file: tokio::fs::File,
    guard: RemoveOnDrop,
}

impl ClaimedDownload {
    pub fn into_stream(self) -> impl Stream<Item = std::io::Result<Bytes>> + Send + 'static {
        stream::unfold(Some((self.file, self.guard)), |state| async move {
            let (mut file, guard) = state?;
            let mut chunk = vec![0u8; STREAM_CHUNK_SIZE];
            match file.read(&mut chunk).await {
                Ok(0) => None,
                Ok(n) => {
                    chunk.truncate(n);
                    Some((Ok(Bytes::from(chunk)), Some((file, guard))))
                }
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}

#[derive(Debug)]
struct RemoveOnDrop(PathBuf);

impl Drop for RemoveOnDrop {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.0) {
            Ok(()) => debug!("Removed delivered archive {}", self.0.display()),
            Err(e) => warn!(
                "Failed to remove delivered archive {}: {e}",
                self.0.display()
            ),
        }
    }
}

/// Streams every file of `tree` into a deflate archive at `dest`.
///
/// Blocking. On error no file is left at `dest` or at its partial path.
pub fn write_archive(tree: &FileTree, dest: &Path) -> Result<u64, PackageError> {
    let mut partial = dest.as_os_str().to_owned();
    partial.push(PARTIAL_SUFFIX);
    let partial = PathBuf::from(partial);

    let result = write_entries(tree, &partial).and_then(|size| {
        std::fs::rename(&partial, dest).map_err(|e| PackageError::ArchiveWrite(e.to_string()))?;
        Ok(size)
    });

    if result.is_err() {
        if let Err(e) = std::fs::remove_file(&partial) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove partial archive {}: {e}", partial.display());
            }
        }
    }
    result
}

fn write_entries(tree: &FileTree, path: &Path) -> Result<u64, PackageError> {
    let write_err = |e: std::io::Error| PackageError::ArchiveWrite(e.to_string());

    let file = File::create(path).map_err(write_err)?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(9))
        .unix_permissions(0o644);

    for (name, content) in tree.iter() {
        zip.start_file(name, options)?;
        zip.write_all(content.as_bytes()).map_err(write_err)?;
    }

    // The archive counts as written only once the underlying file is closed out.
    let writer = zip.finish()?;
    let file = writer
        .into_inner()
        .map_err(|e| write_err(e.into_error()))?;
    file.sync_all().map_err(write_err)?;
    let size = file.metadata().map_err(write_err)?.len();
    Ok(size)
}

fn validate_file_name(file_name: &str) -> Result<(), PackageError> {
    let valid = file_name.len() <= MAX_FILE_NAME_LEN
        && file_name.ends_with(ARCHIVE_EXTENSION)
        && !file_name.starts_with('.')
        && !file_name.contains("..")
        && file_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(PackageError::InvalidFileName(file_name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portfolio::synthesizer::GeneratedFile;
    use futures_util::StreamExt;
    use std::io::Read;
    use zip::ZipArchive;

    fn sample_tree() -> FileTree {
        let mut tree = FileTree::default();
        for (path, content) in [
            ("package.json", "{\n  \"name\": \"ada-portfolio\"\n}\n"),
            ("src/App.tsx", "export default function App() { return null; }\n"),
            ("README.md", "# Ada — ünïcödé\n"),
        ] {
            tree.insert(GeneratedFile {
                path,
                content: content.to_string(),
            })
            .unwrap();
        }
        tree
    }

    async fn collect(download: ClaimedDownload) -> Vec<u8> {
        let mut body = Vec::new();
        let mut stream = Box::pin(download.into_stream());
        while let Some(chunk) = stream.next().await {
            body.extend_from_slice(&chunk.unwrap());
        }
        body
    }

    #[tokio::test]
    async fn test_pack_then_extract_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let store = DownloadStore::new(dir.path().join("portfolios"));
        let tree = sample_tree();
        let name = DownloadStore::archive_name("ada-portfolio");

        let size = store.pack(tree.clone(), &name).await.unwrap();
        let bytes = std::fs::read(store.dir().join(&name)).unwrap();
        assert_eq!(bytes.len() as u64, size);

        let mut archive = ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), tree.len());
        for (path, content) in tree.iter() {
            let mut entry = archive.by_name(path).unwrap();
            assert_eq!(entry.compression(), CompressionMethod::Deflated);
            let mut extracted = Vec::new();
            entry.read_to_end(&mut extracted).unwrap();
            assert_eq!(extracted, content.as_bytes());
        }
        assert!(!store.dir().join(format!("{name}{PARTIAL_SUFFIX}")).exists());
    }

    #[tokio::test]
    async fn test_download_is_one_time() {
        let dir = tempfile::tempdir().unwrap();
        let store = DownloadStore::new(dir.path());
        let name = DownloadStore::archive_name("ada-portfolio");
        store.pack(sample_tree(), &name).await.unwrap();
        let packed = std::fs::read(dir.path().join(&name)).unwrap();

        let download = store.claim(&name).await.unwrap();
        assert_eq!(download.len, packed.len() as u64);
        assert!(format!("{download:?}").contains(&name));
        assert!(matches!(
            store.claim(&name).await.unwrap_err(),
            PackageError::DownloadFileNotFound(_)
        ));

        assert_eq!(collect(download).await, packed);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_dropped_download_still_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let store = DownloadStore::new(dir.path());
        let name = DownloadStore::archive_name("ada-portfolio");
        store.pack(sample_tree(), &name).await.unwrap();

        drop(store.claim(&name).await.unwrap());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_claim_unknown_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = DownloadStore::new(dir.path());
        assert!(matches!(
            store.claim("portfolio-nobody-1-abcdef12.zip").await.unwrap_err(),
            PackageError::DownloadFileNotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_rejects_traversal_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = DownloadStore::new(dir.path());
        for name in ["../secret.zip", "a/b.zip", "archive.tar", ".hidden.zip", "x..zip"] {
            assert!(
                matches!(
                    store.claim(name).await.unwrap_err(),
                    PackageError::InvalidFileName(_)
                ),
                "{name} accepted"
            );
        }
    }

    #[tokio::test]
    async fn test_write_failure_leaves_no_files() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("missing-dir").join("out.zip");
        let err = write_archive(&sample_tree(), &dest).unwrap_err();
        assert!(matches!(err, PackageError::ArchiveWrite(_)));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_sweep_removes_only_expired_archives() {
        let dir = tempfile::tempdir().unwrap();
        let store = DownloadStore::new(dir.path());
        let name = DownloadStore::archive_name("ada-portfolio");
        store.pack(sample_tree(), &name).await.unwrap();

        assert_eq!(store.sweep_expired(Duration::from_secs(3600)).await.unwrap(), 0);
        assert!(dir.path().join(&name).exists());

        assert_eq!(store.sweep_expired(Duration::ZERO).await.unwrap(), 1);
        assert!(!dir.path().join(&name).exists());
    }

    #[tokio::test]
    async fn test_sweep_missing_directory_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let store = DownloadStore::new(dir.path().join("never-created"));
        assert_eq!(store.sweep_expired(Duration::ZERO).await.unwrap(), 0);
    }

    #[test]
    fn test_archive_names_are_unique_and_valid() {
        let a = DownloadStore::archive_name("ada-portfolio");
        let b = DownloadStore::archive_name("ada-portfolio");
        assert_ne!(a, b);
        assert!(a.starts_with("ada-portfolio-"));
        assert!(validate_file_name(&a).is_ok());
    }
}
