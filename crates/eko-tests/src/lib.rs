//! Test doubles shared by the eko integration tests.
//!
//! [`FakeSource`] plays a Docker endpoint whose containers and log streams the
//! test controls; [`MemoryStorage`] persists into memory and can be made
//! unhealthy.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use eko_core::{
    Container, Error, LogStream, Result, StorageMetadata, StreamHandle, TimestampMs, cursor,
    next_chunk,
};
use eko_docker::{ContainerSource, SourceFactory};
use eko_processor::{Processor, ProcessorConfig};
use eko_storage::StorageBackend;
use tokio::sync::{Notify, mpsc};
use tokio_stream::wrappers::ReceiverStream;

/// Sender feeding one fake container log stream.
pub type LogSender = mpsc::Sender<std::io::Result<Bytes>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[derive(Default)]
struct SourceState {
    unhealthy: bool,
    listings: HashMap<String, Vec<Container>>,
    failing_opens: HashSet<String>,
    open_calls: Vec<(String, Option<TimestampMs>)>,
    list_calls: usize,
    streams: HashMap<String, LogSender>,
    hang_listing: bool,
    hang_open: HashSet<String>,
    listing_gate: Option<Arc<Notify>>,
}

/// A scripted container runtime.
#[derive(Default)]
pub struct FakeSource {
    state: Mutex<SourceState>,
}

impl FakeSource {
    /// Create a healthy source with no containers.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make `filter` list the containers with `ids`.
    pub fn set_containers(&self, filter: &str, ids: &[&str]) {
        let containers = ids
            .iter()
            .map(|id| Container::new(*id, format!("/{id}")))
            .collect();
        lock(&self.state)
            .listings
            .insert(filter.to_string(), containers);
    }

    /// Toggle the health check.
    pub fn set_healthy(&self, healthy: bool) {
        lock(&self.state).unhealthy = !healthy;
    }

    /// Make opening logs of `id` fail (or succeed again).
    pub fn fail_open(&self, id: &str, fail: bool) {
        let mut state = lock(&self.state);
        if fail {
            state.failing_opens.insert(id.to_string());
        } else {
            state.failing_opens.remove(id);
        }
    }

    /// Make `list_active` never answer (or answer again).
    pub fn hang_listing(&self, hang: bool) {
        lock(&self.state).hang_listing = hang;
    }

    /// Make opening logs of `id` never answer (or answer again).
    pub fn hang_open(&self, id: &str, hang: bool) {
        let mut state = lock(&self.state);
        if hang {
            state.hang_open.insert(id.to_string());
        } else {
            state.hang_open.remove(id);
        }
    }

    /// Hold the next `list_active` call until [`release_listing`] is called.
    ///
    /// [`release_listing`]: FakeSource::release_listing
    pub fn hold_listing(&self) {
        lock(&self.state).listing_gate = Some(Arc::new(Notify::new()));
    }

    /// Let the held listing through; later listings are not held.
    pub fn release_listing(&self) {
        if let Some(gate) = lock(&self.state).listing_gate.take() {
            gate.notify_one();
        }
    }

    /// Every `open_log_stream` call that reached the source, in order.
    pub fn open_calls(&self) -> Vec<(String, Option<TimestampMs>)> {
        lock(&self.state).open_calls.clone()
    }

    /// Number of `open_log_stream` calls for `id`.
    pub fn open_count(&self, id: &str) -> usize {
        lock(&self.state)
            .open_calls
            .iter()
            .filter(|(opened, _)| opened == id)
            .count()
    }

    /// Number of `list_active` calls.
    pub fn list_count(&self) -> usize {
        lock(&self.state).list_calls
    }

    /// Sender of the most recent stream opened for `id`.
    pub fn stream(&self, id: &str) -> Option<LogSender> {
        lock(&self.state).streams.get(id).cloned()
    }

    /// Whether the most recent stream of `id` still has a reader.
    pub fn is_streaming(&self, id: &str) -> bool {
        self.stream(id).is_some_and(|tx| !tx.is_closed())
    }

    /// End the most recent stream of `id`.
    pub fn end_stream(&self, id: &str) {
        lock(&self.state).streams.remove(id);
    }

    /// Fail the most recent stream of `id` mid-flight.
    pub async fn fail_stream(&self, id: &str) {
        let tx = lock(&self.state).streams.remove(id);
        if let Some(tx) = tx {
            let _ = tx.send(Err(std::io::Error::other("connection reset"))).await;
        }
    }

    /// Factory handing out this source for every endpoint.
    pub fn factory(self: &Arc<Self>) -> SourceFactory {
        let source = Arc::clone(self);
        Arc::new(move |_address: &str| {
            let source: Arc<dyn ContainerSource> = source.clone();
            Ok(source)
        })
    }
}

#[async_trait]
impl ContainerSource for FakeSource {
    async fn list_active(&self, filter: &str) -> Result<Vec<Container>> {
        let (hang, gate) = {
            let mut state = lock(&self.state);
            state.list_calls += 1;
            (state.hang_listing, state.listing_gate.clone())
        };
        if hang {
            std::future::pending::<()>().await;
        }
        if let Some(gate) = gate {
            gate.notified().await;
        }
        Ok(lock(&self.state)
            .listings
            .get(filter)
            .cloned()
            .unwrap_or_default())
    }

    async fn open_log_stream(
        &self,
        container_id: &str,
        since: Option<TimestampMs>,
    ) -> Result<LogStream> {
        let hang = {
            let mut state = lock(&self.state);
            state.open_calls.push((container_id.to_string(), since));
            state.hang_open.contains(container_id)
        };
        if hang {
            std::future::pending::<()>().await;
        }

        let mut state = lock(&self.state);
        if state.failing_opens.contains(container_id) {
            return Err(Error::Docker(format!(
                "failed to listen to logs from container {container_id}"
            )));
        }

        let (tx, rx) = mpsc::channel(64);
        state.streams.insert(container_id.to_string(), tx);
        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn is_healthy(&self) -> bool {
        !lock(&self.state).unhealthy
    }
}

#[derive(Default)]
struct StorageState {
    unhealthy: bool,
    logs: HashMap<String, Vec<u8>>,
    save_calls: Vec<String>,
}

/// In-memory storage backend.
#[derive(Default)]
pub struct MemoryStorage {
    state: Arc<Mutex<StorageState>>,
}

impl MemoryStorage {
    /// Create a healthy, empty storage.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Toggle the health check.
    pub fn set_healthy(&self, healthy: bool) {
        lock(&self.state).unhealthy = !healthy;
    }

    /// Pretend `content` was persisted for `id` earlier.
    pub fn preload(&self, id: &str, content: &str) {
        lock(&self.state)
            .logs
            .insert(id.to_string(), content.as_bytes().to_vec());
    }

    /// Everything persisted for `id`.
    pub fn content(&self, id: &str) -> String {
        lock(&self.state)
            .logs
            .get(id)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
            .unwrap_or_default()
    }

    /// Container ids passed to `save_logs`, in order.
    pub fn save_calls(&self) -> Vec<String> {
        lock(&self.state).save_calls.clone()
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn save_logs(&self, container_id: &str, mut logs: LogStream) -> Result<StreamHandle> {
        lock(&self.state).save_calls.push(container_id.to_string());

        let state = Arc::clone(&self.state);
        let id = container_id.to_string();
        Ok(StreamHandle::spawn(container_id, |cancel| async move {
            while let Some(chunk) = next_chunk(&mut logs, &cancel).await {
                let chunk = chunk?;
                lock(&state)
                    .logs
                    .entry(id.clone())
                    .or_default()
                    .extend_from_slice(&chunk);
            }
            Ok(())
        }))
    }

    async fn read_logs(&self, container_id: &str) -> Result<Option<LogStream>> {
        let content = lock(&self.state).logs.get(container_id).cloned();
        Ok(content.map(|bytes| {
            let stream: LogStream =
                Box::pin(futures::stream::iter(vec![Ok(Bytes::from(bytes))]));
            stream
        }))
    }

    async fn latest_log_timestamp(&self, container_id: &str) -> Result<Option<TimestampMs>> {
        Ok(lock(&self.state)
            .logs
            .get(container_id)
            .and_then(|bytes| cursor::latest_timestamp(bytes)))
    }

    async fn logged_containers(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = lock(&self.state).logs.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn is_healthy(&self) -> bool {
        !lock(&self.state).unhealthy
    }

    fn metadata(&self) -> StorageMetadata {
        StorageMetadata {
            name: "memory".to_string(),
            connection_string: "memory".to_string(),
        }
    }

    async fn destroy(&self) {}
}

/// Factory handing out a distinct source per endpoint address.
pub fn endpoint_factory(sources: Vec<(&str, Arc<FakeSource>)>) -> SourceFactory {
    let sources: HashMap<String, Arc<FakeSource>> = sources
        .into_iter()
        .map(|(address, source)| (address.to_string(), source))
        .collect();
    Arc::new(move |address: &str| -> Result<Arc<dyn ContainerSource>> {
        let source = sources
            .get(address)
            .cloned()
            .ok_or_else(|| Error::InvalidConnection(address.to_string()))?;
        Ok(source)
    })
}

/// Processor timings short enough for tests.
pub fn fast_config() -> ProcessorConfig {
    ProcessorConfig {
        observation_interval: Duration::from_millis(50),
        call_timeout: Duration::from_millis(500),
        shutdown_grace: Duration::from_secs(1),
    }
}

/// Tracked container ids of `endpoint`, sorted.
pub async fn tracked(processor: &Processor, endpoint: &str) -> Vec<String> {
    processor
        .subscriptions()
        .await
        .unwrap_or_default()
        .into_iter()
        .find(|s| s.endpoint == endpoint)
        .map(|s| s.tracked)
        .unwrap_or_default()
}

/// Poll `processor` until `endpoint` tracks exactly `expected`.
pub async fn wait_for_tracked(processor: &Processor, endpoint: &str, expected: &[&str]) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let current = tracked(processor, endpoint).await;
        if current == expected {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "expected {expected:?} to be tracked on {endpoint}, found {current:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Poll `condition` until it holds, panicking after five seconds.
pub async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
