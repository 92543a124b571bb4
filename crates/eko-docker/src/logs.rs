//! Docker log streaming.

use bollard::Docker;
use bollard::container::LogsOptions;
use eko_core::{LogStream, TimestampMs, cursor};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Buffered chunks between the daemon connection and the consumer.
const CHANNEL_CAPACITY: usize = 256;

/// Follows one container's timestamped stdout/stderr.
pub struct LogFollower {
    docker: Docker,
    container_id: String,
    since: Option<TimestampMs>,
}

impl LogFollower {
    /// Prepare a follower starting at `since` (a resume cursor), or from the beginning.
    pub fn new(docker: Docker, container_id: impl Into<String>, since: Option<TimestampMs>) -> Self {
        Self {
            docker,
            container_id: container_id.into(),
            since,
        }
    }

    /// Start streaming logs from the container.
    ///
    /// The forwarding task stops once the returned stream is dropped.
    pub fn start(self) -> LogStream {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

        tokio::spawn(async move {
            let options = LogsOptions::<String> {
                follow: true,
                stdout: true,
                stderr: true,
                timestamps: true,
                since: self.since.map_or(0, since_seconds),
                tail: "all".to_string(),
                ..Default::default()
            };

            let mut stream = self.docker.logs(&self.container_id, Some(options));
            let mut resume = ResumeFilter::new(self.since);

            while let Some(result) = stream.next().await {
                match result {
                    Ok(output) => {
                        let frame = output.into_bytes();
                        if !resume.admit(&frame) {
                            continue;
                        }
                        if tx.send(Ok(frame)).await.is_err() {
                            // Receiver dropped, stop streaming
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(container_id = %self.container_id, error = %e, "log stream error");
                        let _ = tx.send(Err(std::io::Error::other(e))).await;
                        break;
                    }
                }
            }
        });

        Box::pin(ReceiverStream::new(rx))
    }
}

/// Docker's `since` has second precision; round the margin-adjusted cursor down.
fn since_seconds(cursor_ms: TimestampMs) -> i64 {
    cursor::resume_point(cursor_ms).div_euclid(1_000)
}

/// Drops the frames Docker replays from before the resume point.
///
/// The daemon starts at the whole second below the cursor, so frames older than
/// `cursor - RESUME_MARGIN_MS` were already persisted. Filtering stops at the
/// first frame at or after the resume point.
#[derive(Debug, Clone, Copy)]
struct ResumeFilter {
    resume_at: Option<TimestampMs>,
}

impl ResumeFilter {
    fn new(since: Option<TimestampMs>) -> Self {
        Self {
            resume_at: since.map(cursor::resume_point),
        }
    }

    /// Whether `frame` should be forwarded.
    fn admit(&mut self, frame: &[u8]) -> bool {
        let Some(resume_at) = self.resume_at else {
            return true;
        };
        match cursor::parse_line_timestamp(&String::from_utf8_lossy(frame)) {
            Some(ts) if ts < resume_at => false,
            Some(_) => {
                self.resume_at = None;
                true
            }
            // Untimestamped frames are passed on; filtering continues.
            None => true,
        }
    }
}
