//! Filesystem storage: `<base>/<container id>/log`, append-only.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use eko_core::{
    Error, LogStream, Result, StorageMetadata, StreamHandle, TimestampMs, cursor, next_chunk,
};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::backend::StorageBackend;
use crate::tailer::{DEFAULT_POLL_INTERVAL, Tailer};

/// Name of the log file inside each container directory.
pub const LOG_FILE_NAME: &str = "log";

/// Bytes read per step when scanning a log file backwards for its last line.
const TAIL_BLOCK_SIZE: u64 = 4 * 1024;
/// Upper bound on bytes scanned for the last line.
const MAX_TAIL_BYTES: usize = 1024 * 1024;

/// Stores each container's logs in its own directory.
#[derive(Debug, Clone)]
pub struct FsStorage {
    base_dir: PathBuf,
    tail_poll_interval: Duration,
}

impl FsStorage {
    /// Create the base directory if needed and open storage on it.
    pub async fn open(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        tokio::fs::create_dir_all(&base_dir).await.map_err(|e| {
            Error::Storage(format!(
                "failed to create folder {} for the fs storage: {e}",
                base_dir.display()
            ))
        })?;

        Ok(Self {
            base_dir,
            tail_poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    /// Override how often `read_logs` streams poll for appended lines.
    #[must_use]
    pub const fn with_tail_poll_interval(mut self, interval: Duration) -> Self {
        self.tail_poll_interval = interval;
        self
    }

    /// Path of a container's log file.
    pub fn log_path(&self, container_id: &str) -> Result<PathBuf> {
        Ok(self.container_dir(container_id)?.join(LOG_FILE_NAME))
    }

    fn container_dir(&self, container_id: &str) -> Result<PathBuf> {
        let valid = !container_id.is_empty()
            && container_id != "."
            && container_id != ".."
            && !container_id.contains(['/', '\\']);
        if !valid {
            return Err(Error::Storage(format!(
                "container id '{container_id}' cannot be used as a directory name"
            )));
        }
        Ok(self.base_dir.join(container_id))
    }
}

#[async_trait]
impl StorageBackend for FsStorage {
    async fn save_logs(&self, container_id: &str, mut logs: LogStream) -> Result<StreamHandle> {
        let container_dir = self.container_dir(container_id)?;
        tokio::fs::create_dir_all(&container_dir).await?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(container_dir.join(LOG_FILE_NAME))
            .await
            .map_err(|e| {
                Error::Storage(format!(
                    "failed to open log file of container {container_id}: {e}"
                ))
            })?;

        Ok(StreamHandle::spawn(container_id, |cancel| async move {
            let outcome = async {
                while let Some(chunk) = next_chunk(&mut logs, &cancel).await {
                    file.write_all(&chunk?).await?;
                    // Readers tail the file, so every chunk must reach it.
                    file.flush().await?;
                }
                Ok::<_, Error>(())
            }
            .await;

            file.flush().await?;
            outcome
        }))
    }

    async fn read_logs(&self, container_id: &str) -> Result<Option<LogStream>> {
        let path = self.log_path(container_id)?;
        if !tokio::fs::try_exists(&path).await? {
            return Ok(None);
        }

        Ok(Some(Tailer::new(path, self.tail_poll_interval).start()))
    }

    async fn latest_log_timestamp(&self, container_id: &str) -> Result<Option<TimestampMs>> {
        let path = self.log_path(container_id)?;
        let Some(tail) = read_tail(&path).await? else {
            return Ok(None);
        };

        let timestamp = cursor::latest_timestamp(&tail);
        if timestamp.is_none() && !tail.is_empty() {
            tracing::warn!(container_id, "last persisted line has no timestamp, resuming from start");
        }
        Ok(timestamp)
    }

    async fn logged_containers(&self) -> Result<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.base_dir).await.map_err(|e| {
            Error::Storage(format!("failed to retrieve logged containers list: {e}"))
        })?;

        let mut containers = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                containers.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        containers.sort();
        Ok(containers)
    }

    async fn is_healthy(&self) -> bool {
        tokio::fs::metadata(&self.base_dir)
            .await
            .is_ok_and(|meta| meta.is_dir())
    }

    fn metadata(&self) -> StorageMetadata {
        StorageMetadata {
            name: "fs".to_string(),
            connection_string: self.base_dir.display().to_string(),
        }
    }

    async fn destroy(&self) {
        tracing::debug!(base_dir = %self.base_dir.display(), "fs storage released");
    }
}

/// Read the end of `path`, far enough back to hold its whole last line.
///
/// `None` if the file does not exist. Empty when the last line is longer
/// than [`MAX_TAIL_BYTES`], so no fragment of it is taken for a timestamp.
async fn read_tail(path: &Path) -> std::io::Result<Option<Vec<u8>>> {
    let mut file = match File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    let mut end = file.metadata().await?.len();
    let mut tail: Vec<u8> = Vec::new();

    while end > 0 && !holds_last_line(&tail) && tail.len() < MAX_TAIL_BYTES {
        let start = end.saturating_sub(TAIL_BLOCK_SIZE);
        file.seek(SeekFrom::Start(start)).await?;

        #[allow(clippy::cast_possible_truncation)]
        let mut block = vec![0; (end - start) as usize];
        file.read_exact(&mut block).await?;
        block.extend_from_slice(&tail);
        tail = block;
        end = start;
    }

    if end > 0 && !holds_last_line(&tail) {
        tracing::warn!(
            path = %path.display(),
            "last line exceeds tail scan limit, resuming from start"
        );
        return Ok(Some(Vec::new()));
    }
    Ok(Some(tail))
}

/// Whether a line break precedes the last non-blank byte.
fn holds_last_line(tail: &[u8]) -> bool {
    tail.iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .is_some_and(|last| tail[..last].contains(&b'\n'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures_util::StreamExt;

    fn stream_of(chunks: &[&'static [u8]]) -> LogStream {
        let items: Vec<std::io::Result<Bytes>> = chunks
            .iter()
            .map(|c| Ok(Bytes::from_static(c)))
            .collect();
        Box::pin(futures_util::stream::iter(items))
    }

    #[tokio::test]
    async fn test_save_appends_to_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::open(dir.path()).await.unwrap();

        let handle = storage
            .save_logs("c1", stream_of(&[b"2024-01-01T00:00:00Z a\n"]))
            .await
            .unwrap();
        handle.finished().await.unwrap();
        let handle = storage
            .save_logs("c1", stream_of(&[b"2024-01-01T00:00:01Z b\n"]))
            .await
            .unwrap();
        handle.finished().await.unwrap();

        let content = tokio::fs::read_to_string(dir.path().join("c1").join("log"))
            .await
            .unwrap();
        assert_eq!(content, "2024-01-01T00:00:00Z a\n2024-01-01T00:00:01Z b\n");
    }

    #[tokio::test]
    async fn test_latest_timestamp_reads_last_line() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::open(dir.path()).await.unwrap();
        assert_eq!(storage.latest_log_timestamp("c1").await.unwrap(), None);

        let long_line = format!("2024-01-01T00:00:00Z {}\n", "x".repeat(10_000));
        tokio::fs::create_dir_all(dir.path().join("c1")).await.unwrap();
        tokio::fs::write(
            dir.path().join("c1").join("log"),
            format!("{long_line}2024-01-01T00:00:02.500Z tail {}\n", "y".repeat(9_000)),
        )
        .await
        .unwrap();

        assert_eq!(
            storage.latest_log_timestamp("c1").await.unwrap(),
            Some(1_704_067_202_500)
        );
    }

    #[tokio::test]
    async fn test_oversized_last_line_resets_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::open(dir.path()).await.unwrap();
        tokio::fs::create_dir_all(dir.path().join("c1")).await.unwrap();

        // The scan window starts mid-line on something that parses as a timestamp.
        let fragment = "2024-01-01T00:00:09Z ";
        let filler = "z".repeat(MAX_TAIL_BYTES - fragment.len() - 1);
        let window = format!("{fragment}{filler}\n");
        tokio::fs::write(
            dir.path().join("c1").join("log"),
            format!("2024-01-01T00:00:00Z first\n2024-01-01T00:00:01Z huge {window}"),
        )
        .await
        .unwrap();

        assert_eq!(storage.latest_log_timestamp("c1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_corrupt_last_line_resets_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::open(dir.path()).await.unwrap();
        tokio::fs::create_dir_all(dir.path().join("c1")).await.unwrap();
        tokio::fs::write(
            dir.path().join("c1").join("log"),
            "2024-01-01T00:00:00Z fine\ngarbled line\n",
        )
        .await
        .unwrap();

        assert_eq!(storage.latest_log_timestamp("c1").await.unwrap(), None);

        // Saving still works and appends after the corrupt line.
        let handle = storage
            .save_logs("c1", stream_of(&[b"2024-01-01T00:00:05Z again\n"]))
            .await
            .unwrap();
        handle.finished().await.unwrap();
        assert_eq!(
            storage.latest_log_timestamp("c1").await.unwrap(),
            Some(1_704_067_205_000)
        );
    }

    #[tokio::test]
    async fn test_logged_containers_lists_directories() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::open(dir.path()).await.unwrap();
        for id in ["b", "a"] {
            storage
                .save_logs(id, stream_of(&[b"x\n"]))
                .await
                .unwrap()
                .finished()
                .await
                .unwrap();
        }
        tokio::fs::write(dir.path().join("stray-file"), b"").await.unwrap();

        assert_eq!(storage.logged_containers().await.unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_read_logs_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::open(dir.path()).await.unwrap();
        assert!(storage.read_logs("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_logs_streams_content() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::open(dir.path())
            .await
            .unwrap()
            .with_tail_poll_interval(Duration::from_millis(20));
        storage
            .save_logs("c1", stream_of(&[b"2024-01-01T00:00:00Z a\n"]))
            .await
            .unwrap()
            .finished()
            .await
            .unwrap();

        let mut logs = storage.read_logs("c1").await.unwrap().unwrap();
        assert_eq!(
            &logs.next().await.unwrap().unwrap()[..],
            b"2024-01-01T00:00:00Z a\n"
        );
    }

    #[tokio::test]
    async fn test_health_and_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("logs");
        let storage = FsStorage::open(&base).await.unwrap();
        assert!(storage.is_healthy().await);
        assert_eq!(storage.metadata().name, "fs");

        tokio::fs::remove_dir_all(&base).await.unwrap();
        assert!(!storage.is_healthy().await);
        storage.destroy().await;
        storage.destroy().await;
    }

    #[tokio::test]
    async fn test_rejects_path_like_ids() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::open(dir.path()).await.unwrap();
        assert!(storage.save_logs("../x", stream_of(&[])).await.is_err());
        assert!(storage.log_path("..").is_err());
    }

    #[test]
    fn test_holds_last_line() {
        assert!(!holds_last_line(b"partial"));
        assert!(!holds_last_line(b"partial\n\n"));
        assert!(holds_last_line(b"x\nlast\n"));
    }
}
