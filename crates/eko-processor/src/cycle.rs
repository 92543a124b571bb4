//! One reconciliation pass over a single endpoint.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use eko_core::{Container, Error, Result, StreamHandle};
use eko_docker::ContainerSource;
use eko_storage::StorageBackend;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A pipeline started by a cycle, not yet registered with the driver.
pub(crate) struct Started {
    pub handle: StreamHandle,
    pub filters: HashSet<String>,
}

/// What a cycle found and started.
pub(crate) struct CycleReport {
    pub endpoint: String,
    /// `(filter, ids of containers it matched)` for every successful listing.
    pub observed: Vec<(String, Vec<String>)>,
    pub started: Vec<Started>,
}

impl CycleReport {
    pub fn empty(endpoint: String) -> Self {
        Self {
            endpoint,
            observed: Vec::new(),
            started: Vec::new(),
        }
    }
}

/// Inputs of a cycle, snapshotted from the registry by the driver.
pub(crate) struct Cycle {
    pub endpoint: String,
    pub source: Arc<dyn ContainerSource>,
    pub storage: Arc<dyn StorageBackend>,
    pub queries: Vec<String>,
    pub tracked: HashSet<String>,
    pub call_timeout: Duration,
    pub shutdown: CancellationToken,
}

impl Cycle {
    /// Discover containers matching any query and start pipelines for new ones.
    ///
    /// Failures are logged and leave the container untracked for the next cycle.
    pub async fn run(self) -> CycleReport {
        let mut report = CycleReport::empty(self.endpoint.clone());

        if !self.bounded("docker health check", async { Ok(self.source.is_healthy().await) })
            .await
            .unwrap_or(false)
        {
            info!(endpoint = %self.endpoint, "docker is unhealthy at the moment, observation is skipped");
            return report;
        }

        if !self.bounded("storage health check", async { Ok(self.storage.is_healthy().await) })
            .await
            .unwrap_or(false)
        {
            info!(
                endpoint = %self.endpoint,
                storage = %self.storage.metadata(),
                "storage is unhealthy at the moment, observation is skipped"
            );
            return report;
        }

        let mut started: HashMap<String, Started> = HashMap::new();

        for filter in &self.queries {
            let containers = match self
                .bounded("listing containers", self.source.list_active(filter))
                .await
            {
                Ok(containers) => containers,
                Err(e) => {
                    warn!(endpoint = %self.endpoint, filter = %filter, error = %e, "container listing failed");
                    continue;
                }
            };

            report.observed.push((
                filter.clone(),
                containers.iter().map(|c| c.id.clone()).collect(),
            ));

            for container in containers {
                if self.tracked.contains(&container.id) {
                    continue;
                }
                if let Some(pipeline) = started.get_mut(&container.id) {
                    pipeline.filters.insert(filter.clone());
                    continue;
                }
                if self.shutdown.is_cancelled() {
                    break;
                }

                match self.start(&container).await {
                    Ok(handle) => {
                        started.insert(
                            container.id.clone(),
                            Started {
                                handle,
                                filters: HashSet::from([filter.clone()]),
                            },
                        );
                    }
                    Err(e) => {
                        warn!(
                            endpoint = %self.endpoint,
                            container_id = %container.id,
                            error = %e,
                            "failed to start saving logs, retrying next cycle"
                        );
                    }
                }
            }
        }

        report.started = started.into_values().collect();
        report
    }

    /// Resume cursor, then log stream, then save pipeline.
    async fn start(&self, container: &Container) -> Result<StreamHandle> {
        let since = self
            .bounded(
                "reading resume cursor",
                self.storage.latest_log_timestamp(&container.id),
            )
            .await?;
        debug!(container_id = %container.id, ?since, "opening log stream");

        let logs = self
            .bounded(
                "opening log stream",
                self.source.open_log_stream(&container.id, since),
            )
            .await?;

        self.bounded("starting save", self.storage.save_logs(&container.id, logs))
            .await
    }

    /// Run `call` under the call timeout, giving up early on shutdown.
    async fn bounded<T>(&self, what: &str, call: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            () = self.shutdown.cancelled() => Err(Error::ProcessorStopped),
            outcome = tokio::time::timeout(self.call_timeout, call) => outcome.unwrap_or_else(|_| {
                Err(Error::Timeout(format!("{what} on {}", self.endpoint)))
            }),
        }
    }
}
