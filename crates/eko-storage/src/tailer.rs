//! Resumable tailing of append-only files.

use std::io::SeekFrom;
use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use eko_core::LogStream;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Default delay before re-reading a file that reached its end.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

const CHUNK_SIZE: usize = 64 * 1024;
const CHANNEL_CAPACITY: usize = 64;

/// Turns a growing file into a never-ending byte stream.
///
/// Each pass reads from the last delivered offset to the current end of file,
/// then sleeps for the poll interval and reopens the file at that offset.
#[derive(Debug, Clone)]
pub struct Tailer {
    path: PathBuf,
    poll_interval: Duration,
}

impl Tailer {
    /// Create a tailer for `path`.
    pub fn new(path: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        Self {
            path: path.into(),
            poll_interval,
        }
    }

    /// Start tailing. The task stops when the returned stream is dropped.
    pub fn start(self) -> LogStream {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

        tokio::spawn(async move {
            let mut position = 0;
            loop {
                match self.read_from(position, &tx).await {
                    Ok(Some(next)) => position = next,
                    // Receiver dropped
                    Ok(None) => return,
                    Err(e) => {
                        tracing::warn!(path = %self.path.display(), error = %e, "tailing stopped");
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                }

                tokio::select! {
                    () = tx.closed() => return,
                    () = tokio::time::sleep(self.poll_interval) => {}
                }
            }
        });

        Box::pin(ReceiverStream::new(rx))
    }

    /// Forward everything between `position` and the current end of file.
    ///
    /// Returns the new offset, or `None` once nobody listens anymore.
    async fn read_from(
        &self,
        mut position: u64,
        tx: &mpsc::Sender<std::io::Result<Bytes>>,
    ) -> std::io::Result<Option<u64>> {
        let mut file = File::open(&self.path).await?;
        file.seek(SeekFrom::Start(position)).await?;

        let mut buf = vec![0; CHUNK_SIZE];
        loop {
            let read = file.read(&mut buf).await?;
            if read == 0 {
                return Ok(Some(position));
            }
            position += read as u64;
            if tx.send(Ok(Bytes::copy_from_slice(&buf[..read]))).await.is_err() {
                return Ok(None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use tokio::io::AsyncWriteExt;

    async fn append(path: &std::path::Path, data: &[u8]) {
        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(path)
            .await
            .unwrap();
        file.write_all(data).await.unwrap();
        file.flush().await.unwrap();
    }

    #[tokio::test]
    async fn test_delivers_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log");
        tokio::fs::write(&path, b"2024-01-01T00:00:00Z one\n").await.unwrap();

        let mut stream = Tailer::new(&path, DEFAULT_POLL_INTERVAL).start();
        let chunk = stream.next().await.unwrap().unwrap();
        assert_eq!(&chunk[..], b"2024-01-01T00:00:00Z one\n");
    }

    #[tokio::test]
    async fn test_delivers_appended_line_within_one_poll() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log");
        tokio::fs::write(&path, b"").await.unwrap();

        let mut stream = Tailer::new(&path, DEFAULT_POLL_INTERVAL).start();

        tokio::time::sleep(Duration::from_secs(2)).await;
        append(&path, b"2024-01-01T00:00:00Z hello\n").await;

        let chunk = tokio::time::timeout(Duration::from_millis(1_100), stream.next())
            .await
            .expect("line not delivered within one poll interval")
            .unwrap()
            .unwrap();
        assert_eq!(&chunk[..], b"2024-01-01T00:00:00Z hello\n");
    }

    #[tokio::test]
    async fn test_does_not_repeat_delivered_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log");
        tokio::fs::write(&path, b"a\n").await.unwrap();

        let mut stream = Tailer::new(&path, Duration::from_millis(20)).start();
        assert_eq!(&stream.next().await.unwrap().unwrap()[..], b"a\n");

        append(&path, b"b\n").await;
        assert_eq!(&stream.next().await.unwrap().unwrap()[..], b"b\n");
    }

    #[tokio::test]
    async fn test_missing_file_ends_with_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut stream = Tailer::new(dir.path().join("absent"), DEFAULT_POLL_INTERVAL).start();
        assert!(stream.next().await.unwrap().is_err());
        assert!(stream.next().await.is_none());
    }
}
