//! The processor façade and the driver task behind it.
//!
//! A single driver task owns the [`Registry`]. Subscribe calls, timer ticks,
//! finished cycles and finished pipelines all reach it through one `select!`
//! loop, so mutations of the tracked table never interleave. Endpoint cycles
//! run as separate tasks and report back, so a slow endpoint does not hold up
//! the others.

use std::collections::HashSet;
use std::sync::Arc;

use eko_core::{Error, Result};
use eko_docker::SourceFactory;
use eko_storage::StorageBackend;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ProcessorConfig;
use crate::cycle::{Cycle, CycleReport};
use crate::registry::{Registry, Subscription, Tracked};

const COMMAND_CAPACITY: usize = 64;

enum Command {
    Subscribe {
        endpoint: String,
        filter: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Unsubscribe {
        endpoint: String,
        filter: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Subscriptions {
        reply: oneshot::Sender<Vec<Subscription>>,
    },
    Destroy {
        reply: oneshot::Sender<()>,
    },
}

/// Outcome of a save pipeline the driver was tracking.
struct PipelineExit {
    endpoint: String,
    container_id: String,
    seq: u64,
    outcome: Result<()>,
}

/// Keeps the logs of subscribed containers flowing into storage.
///
/// Cloning is cheap; every clone talks to the same driver task.
#[derive(Debug, Clone)]
pub struct Processor {
    commands: mpsc::Sender<Command>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Subscribe { endpoint, filter, .. } => {
                write!(f, "Subscribe({endpoint}, {filter})")
            }
            Self::Unsubscribe { endpoint, filter, .. } => {
                write!(f, "Unsubscribe({endpoint}, {filter})")
            }
            Self::Subscriptions { .. } => write!(f, "Subscriptions"),
            Self::Destroy { .. } => write!(f, "Destroy"),
        }
    }
}

impl Processor {
    /// Spawn the driver task. Must be called inside a tokio runtime.
    pub fn start(
        storage: Arc<dyn StorageBackend>,
        connect: SourceFactory,
        config: ProcessorConfig,
    ) -> Self {
        let (commands, rx) = mpsc::channel(COMMAND_CAPACITY);
        let driver = Driver {
            registry: Registry::default(),
            storage,
            connect,
            config,
            cycles: JoinSet::new(),
            pipelines: JoinSet::new(),
            shutdown: CancellationToken::new(),
            next_seq: 0,
        };
        tokio::spawn(driver.run(rx));
        Self { commands }
    }

    /// Watch containers matching `filter` on `endpoint`.
    ///
    /// Connects to an unseen endpoint first; adding a filter twice is a no-op.
    /// A reconciliation cycle for the endpoint starts right away.
    pub async fn subscribe(&self, endpoint: &str, filter: &str) -> Result<()> {
        self.request(|reply| Command::Subscribe {
            endpoint: endpoint.to_string(),
            filter: filter.to_string(),
            reply,
        })
        .await?
    }

    /// Stop watching `filter` on `endpoint`.
    ///
    /// Pipelines of containers that no remaining filter matches are closed.
    pub async fn unsubscribe(&self, endpoint: &str, filter: &str) -> Result<()> {
        self.request(|reply| Command::Unsubscribe {
            endpoint: endpoint.to_string(),
            filter: filter.to_string(),
            reply,
        })
        .await?
    }

    /// Snapshot of every endpoint's filters and tracked containers.
    pub async fn subscriptions(&self) -> Result<Vec<Subscription>> {
        self.request(|reply| Command::Subscriptions { reply }).await
    }

    /// Stop the timer, close every tracked stream and end the driver.
    ///
    /// Calling it on a stopped processor does nothing.
    pub async fn destroy(&self) -> Result<()> {
        match self.request(|reply| Command::Destroy { reply }).await {
            Ok(()) | Err(Error::ProcessorStopped) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| Error::ProcessorStopped)?;
        rx.await.map_err(|_| Error::ProcessorStopped)
    }
}

struct Driver {
    registry: Registry,
    storage: Arc<dyn StorageBackend>,
    connect: SourceFactory,
    config: ProcessorConfig,
    cycles: JoinSet<CycleReport>,
    pipelines: JoinSet<PipelineExit>,
    shutdown: CancellationToken,
    next_seq: u64,
}

impl Driver {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        let mut ticker = tokio::time::interval(self.config.ticker_period());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; subscriptions trigger their own first cycle.
        ticker.tick().await;

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => {
                        if let Some(reply) = self.handle(command) {
                            self.shutdown().await;
                            let _ = reply.send(());
                            return;
                        }
                    }
                    None => {
                        self.shutdown().await;
                        return;
                    }
                },
                _ = ticker.tick() => self.observe_all(),
                Some(joined) = self.cycles.join_next(), if !self.cycles.is_empty() => match joined {
                    Ok(report) => self.apply_report(report),
                    Err(e) => error!(error = %e, "reconciliation cycle task failed"),
                },
                Some(joined) = self.pipelines.join_next(), if !self.pipelines.is_empty() => match joined {
                    Ok(exit) => self.untrack(exit),
                    Err(e) => error!(error = %e, "pipeline watcher failed"),
                },
            }
        }
    }

    /// Apply a command; returns the reply channel when the command is a destroy.
    fn handle(&mut self, command: Command) -> Option<oneshot::Sender<()>> {
        debug!(?command, "processor command");
        match command {
            Command::Subscribe {
                endpoint,
                filter,
                reply,
            } => {
                let _ = reply.send(self.subscribe(&endpoint, filter));
            }
            Command::Unsubscribe {
                endpoint,
                filter,
                reply,
            } => {
                let _ = reply.send(self.unsubscribe(&endpoint, &filter));
            }
            Command::Subscriptions { reply } => {
                let _ = reply.send(self.registry.snapshot());
            }
            Command::Destroy { reply } => return Some(reply),
        }
        None
    }

    fn subscribe(&mut self, endpoint: &str, filter: String) -> Result<()> {
        if !self.registry.contains(endpoint) {
            let source = (self.connect)(endpoint)?;
            self.registry.insert(endpoint, source);
            info!(endpoint, "subscribed to new docker endpoint");
        }

        if let Some(sub) = self.registry.get_mut(endpoint) {
            if sub.queries.insert(filter.clone()) {
                info!(endpoint, filter = %filter, "container filter added");
            }
        }

        self.observe(endpoint);
        Ok(())
    }

    fn unsubscribe(&mut self, endpoint: &str, filter: &str) -> Result<()> {
        let sub = self
            .registry
            .get_mut(endpoint)
            .ok_or_else(|| Error::NotSubscribed(endpoint.to_string()))?;

        let Some(orphaned) = sub.remove_query(filter) else {
            debug!(endpoint, filter, "filter was not subscribed");
            return Ok(());
        };
        info!(endpoint, filter, "container filter removed");

        // Entries stay tracked until their pipeline reports back, so a cycle in
        // between cannot open a second stream for the same container.
        for (container_id, closer) in orphaned {
            info!(endpoint, container_id = %container_id, "closing log stream of unmatched container");
            closer.cancel();
        }
        Ok(())
    }

    fn observe_all(&mut self) {
        let endpoints: Vec<String> = self.registry.endpoints().cloned().collect();
        for endpoint in endpoints {
            self.observe(&endpoint);
        }
    }

    /// Start a cycle for `endpoint` unless one is already running.
    fn observe(&mut self, endpoint: &str) {
        let Some(sub) = self.registry.get_mut(endpoint) else {
            return;
        };
        if sub.queries.is_empty() {
            return;
        }
        if sub.cycle_running {
            sub.rerun_requested = true;
            return;
        }
        sub.cycle_running = true;
        sub.rerun_requested = false;

        let cycle = Cycle {
            endpoint: endpoint.to_string(),
            source: Arc::clone(&sub.source),
            storage: Arc::clone(&self.storage),
            queries: sub.queries.iter().cloned().collect(),
            tracked: sub.tracked.keys().cloned().collect(),
            call_timeout: self.config.call_timeout,
            shutdown: self.shutdown.clone(),
        };

        let endpoint = endpoint.to_string();
        self.cycles.spawn(async move {
            // A panicking cycle must still report, or the endpoint stays marked as running.
            match tokio::spawn(cycle.run()).await {
                Ok(report) => report,
                Err(e) => {
                    error!(endpoint = %endpoint, error = %e, "reconciliation cycle panicked");
                    CycleReport::empty(endpoint)
                }
            }
        });
    }

    fn apply_report(&mut self, report: CycleReport) {
        let stopping = self.shutdown.is_cancelled();
        let Some(sub) = self.registry.get_mut(&report.endpoint) else {
            for started in report.started {
                started.handle.close();
            }
            return;
        };
        sub.cycle_running = false;

        for (filter, container_ids) in &report.observed {
            sub.observe_matches(filter, container_ids);
        }

        for started in report.started {
            let container_id = started.handle.container_id().to_string();
            let filters: HashSet<String> = started
                .filters
                .into_iter()
                .filter(|f| sub.queries.contains(f))
                .collect();

            if stopping || filters.is_empty() || sub.tracked.contains_key(&container_id) {
                debug!(endpoint = %report.endpoint, container_id = %container_id, "discarding started pipeline");
                started.handle.close();
                continue;
            }

            self.next_seq += 1;
            let seq = self.next_seq;
            sub.tracked.insert(
                container_id.clone(),
                Tracked {
                    seq,
                    closer: started.handle.closer(),
                    matched_by: filters,
                },
            );
            info!(endpoint = %report.endpoint, container_id = %container_id, "saving container logs");

            let endpoint = report.endpoint.clone();
            let handle = started.handle;
            self.pipelines.spawn(async move {
                let outcome = handle.finished().await;
                PipelineExit {
                    endpoint,
                    container_id,
                    seq,
                    outcome,
                }
            });
        }

        let rerun = sub.rerun_requested && !stopping;
        if rerun {
            self.observe(&report.endpoint);
        }
    }

    fn untrack(&mut self, exit: PipelineExit) {
        let Some(sub) = self.registry.get_mut(&exit.endpoint) else {
            return;
        };
        if !sub.untrack(&exit.container_id, exit.seq) {
            return;
        }

        match exit.outcome {
            Ok(()) => info!(
                endpoint = %exit.endpoint,
                container_id = %exit.container_id,
                "log stream finished"
            ),
            Err(e) => warn!(
                endpoint = %exit.endpoint,
                container_id = %exit.container_id,
                error = %e,
                "log stream failed"
            ),
        }
    }

    /// Close every tracked stream and wait, bounded, for the pipelines to end.
    async fn shutdown(&mut self) {
        self.shutdown.cancel();

        while let Some(joined) = self.cycles.join_next().await {
            if let Ok(report) = joined {
                for started in report.started {
                    started.handle.close();
                }
            }
        }

        for (endpoint, sub) in self.registry.iter_mut() {
            sub.cycle_running = false;
            for (container_id, tracked) in &sub.tracked {
                tracked.closer.cancel();
                info!(endpoint = %endpoint, container_id = %container_id, "closed log stream");
            }
        }

        let drained = tokio::time::timeout(self.config.shutdown_grace, async {
            while let Some(joined) = self.pipelines.join_next().await {
                if let Ok(exit) = joined {
                    self.untrack(exit);
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                pending = self.pipelines.len(),
                "pipelines did not finish within the shutdown grace period"
            );
        }
    }
}
