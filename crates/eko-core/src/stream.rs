//! Log byte streams and the handles owning their save pipelines.

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{Error, Result};

/// A live, possibly unbounded, stream of log bytes.
pub type LogStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// Owns one running save pipeline (log stream to storage) for a container.
///
/// Closing the handle cancels the pipeline; the pipeline drops the stream and
/// its writer when it returns. Completion is observed through [`finished`].
///
/// [`finished`]: StreamHandle::finished
#[derive(Debug)]
pub struct StreamHandle {
    container_id: String,
    cancel: CancellationToken,
    task: JoinHandle<Result<()>>,
}

impl StreamHandle {
    /// Spawn `pipeline` on the runtime, handing it the token that signals a close.
    pub fn spawn<F, Fut>(container_id: impl Into<String>, pipeline: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(pipeline(cancel.clone()));
        Self {
            container_id: container_id.into(),
            cancel,
            task,
        }
    }

    /// Container whose logs this pipeline persists.
    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    /// Token that closes the pipeline when cancelled.
    pub fn closer(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Ask the pipeline to stop and release its stream.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Wait for the pipeline to end, normally or with an error.
    pub async fn finished(self) -> Result<()> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(Error::Stream(format!(
                "save pipeline for container {} aborted: {e}",
                self.container_id
            ))),
        }
    }
}

/// Next chunk of `logs`, or `None` once the stream ends or `cancel` fires.
pub async fn next_chunk(
    logs: &mut LogStream,
    cancel: &CancellationToken,
) -> Option<std::io::Result<Bytes>> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => None,
        item = logs.next() => item,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::ReceiverStream;

    fn channel_stream() -> (mpsc::Sender<std::io::Result<Bytes>>, LogStream) {
        let (tx, rx) = mpsc::channel(8);
        (tx, Box::pin(ReceiverStream::new(rx)))
    }

    #[tokio::test]
    async fn test_close_stops_pipeline() {
        let (_tx, mut logs) = channel_stream();
        let handle = StreamHandle::spawn("c1", |cancel| async move {
            while let Some(chunk) = next_chunk(&mut logs, &cancel).await {
                chunk?;
            }
            Ok(())
        });

        assert_eq!(handle.container_id(), "c1");
        handle.close();
        handle.finished().await.unwrap();
    }

    #[tokio::test]
    async fn test_stream_error_surfaces() {
        let (tx, mut logs) = channel_stream();
        let handle = StreamHandle::spawn("c1", |cancel| async move {
            while let Some(chunk) = next_chunk(&mut logs, &cancel).await {
                chunk?;
            }
            Ok(())
        });

        tx.send(Err(std::io::Error::other("boom"))).await.unwrap();
        assert!(matches!(handle.finished().await, Err(Error::Io(_))));
    }

    #[tokio::test]
    async fn test_stream_end_finishes() {
        let (tx, mut logs) = channel_stream();
        let handle = StreamHandle::spawn("c1", |cancel| async move {
            let mut total = 0;
            while let Some(chunk) = next_chunk(&mut logs, &cancel).await {
                total += chunk?.len();
            }
            assert_eq!(total, 5);
            Ok(())
        });

        tx.send(Ok(Bytes::from_static(b"hello"))).await.unwrap();
        drop(tx);
        handle.finished().await.unwrap();
    }
}
