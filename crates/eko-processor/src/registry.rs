//! Per-endpoint subscription state.
//!
//! Only the driver task touches the registry, so nothing here is locked.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use eko_docker::ContainerSource;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

/// A container with a running save pipeline.
pub(crate) struct Tracked {
    /// Distinguishes this pipeline from earlier ones of the same container.
    pub seq: u64,
    /// Closes the pipeline.
    pub closer: CancellationToken,
    /// Filters last seen matching the container.
    pub matched_by: HashSet<String>,
}

/// State of one container-runtime endpoint.
pub(crate) struct EndpointSubscription {
    pub source: Arc<dyn ContainerSource>,
    pub queries: BTreeSet<String>,
    /// Keyed by container id: at most one pipeline per container.
    pub tracked: HashMap<String, Tracked>,
    pub cycle_running: bool,
    pub rerun_requested: bool,
}

impl EndpointSubscription {
    pub fn new(source: Arc<dyn ContainerSource>) -> Self {
        Self {
            source,
            queries: BTreeSet::new(),
            tracked: HashMap::new(),
            cycle_running: false,
            rerun_requested: false,
        }
    }

    /// Record that `filter` currently matches `container_ids`.
    pub fn observe_matches(&mut self, filter: &str, container_ids: &[String]) {
        if !self.queries.contains(filter) {
            return;
        }
        for id in container_ids {
            if let Some(tracked) = self.tracked.get_mut(id) {
                tracked.matched_by.insert(filter.to_string());
            }
        }
    }

    /// Drop `filter` and return the containers no remaining filter matches.
    ///
    /// Returns `None` when the filter was not subscribed.
    pub fn remove_query(&mut self, filter: &str) -> Option<Vec<(String, CancellationToken)>> {
        if !self.queries.remove(filter) {
            return None;
        }

        let mut orphaned = Vec::new();
        for (id, tracked) in &mut self.tracked {
            tracked.matched_by.remove(filter);
            if tracked.matched_by.is_empty() {
                orphaned.push((id.clone(), tracked.closer.clone()));
            }
        }
        Some(orphaned)
    }

    /// Remove the tracking entry of `container_id` if it belongs to pipeline `seq`.
    pub fn untrack(&mut self, container_id: &str, seq: u64) -> bool {
        if self.tracked.get(container_id).is_some_and(|t| t.seq == seq) {
            self.tracked.remove(container_id);
            return true;
        }
        false
    }
}

/// Snapshot of one endpoint's subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    /// Endpoint address.
    pub endpoint: String,
    /// Active filters, sorted.
    pub filters: Vec<String>,
    /// Ids of tracked containers, sorted.
    pub tracked: Vec<String>,
}

/// All endpoint subscriptions of a processor.
#[derive(Default)]
pub(crate) struct Registry {
    endpoints: HashMap<String, EndpointSubscription>,
}

impl Registry {
    pub fn contains(&self, endpoint: &str) -> bool {
        self.endpoints.contains_key(endpoint)
    }

    pub fn insert(&mut self, endpoint: &str, source: Arc<dyn ContainerSource>) {
        self.endpoints
            .insert(endpoint.to_string(), EndpointSubscription::new(source));
    }

    pub fn get_mut(&mut self, endpoint: &str) -> Option<&mut EndpointSubscription> {
        self.endpoints.get_mut(endpoint)
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &String> {
        self.endpoints.keys()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut EndpointSubscription)> {
        self.endpoints.iter_mut()
    }

    pub fn snapshot(&self) -> Vec<Subscription> {
        let mut subscriptions: Vec<Subscription> = self
            .endpoints
            .iter()
            .map(|(endpoint, sub)| {
                let mut tracked: Vec<String> = sub.tracked.keys().cloned().collect();
                tracked.sort();
                Subscription {
                    endpoint: endpoint.clone(),
                    filters: sub.queries.iter().cloned().collect(),
                    tracked,
                }
            })
            .collect();
        subscriptions.sort_by(|a, b| a.endpoint.cmp(&b.endpoint));
        subscriptions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use eko_core::{Container, LogStream, Result, TimestampMs};

    struct NoSource;

    #[async_trait]
    impl ContainerSource for NoSource {
        async fn list_active(&self, _filter: &str) -> Result<Vec<Container>> {
            Ok(Vec::new())
        }

        async fn open_log_stream(&self, id: &str, _since: Option<TimestampMs>) -> Result<LogStream> {
            Err(eko_core::Error::Docker(format!("no logs for {id}")))
        }

        async fn is_healthy(&self) -> bool {
            true
        }
    }

    fn subscription(queries: &[&str]) -> EndpointSubscription {
        let mut sub = EndpointSubscription::new(Arc::new(NoSource));
        sub.queries = queries.iter().map(ToString::to_string).collect();
        sub
    }

    fn track(sub: &mut EndpointSubscription, id: &str, seq: u64, filters: &[&str]) {
        sub.tracked.insert(
            id.to_string(),
            Tracked {
                seq,
                closer: CancellationToken::new(),
                matched_by: filters.iter().map(ToString::to_string).collect(),
            },
        );
    }

    #[test]
    fn test_remove_query_orphans_only_exclusive_matches() {
        let mut sub = subscription(&["a", "b"]);
        track(&mut sub, "c1", 1, &["a"]);
        track(&mut sub, "c2", 2, &["a", "b"]);

        let orphaned = sub.remove_query("a").unwrap();
        let ids: Vec<_> = orphaned.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["c1"]);
        assert!(sub.tracked["c2"].matched_by.contains("b"));
        assert!(sub.remove_query("a").is_none());
    }

    #[test]
    fn test_observe_matches_ignores_unknown_filters() {
        let mut sub = subscription(&["a", "b"]);
        track(&mut sub, "c1", 1, &["a"]);

        sub.observe_matches("b", &["c1".to_string(), "c9".to_string()]);
        sub.observe_matches("gone", &["c1".to_string()]);

        let matched = &sub.tracked["c1"].matched_by;
        assert!(matched.contains("a") && matched.contains("b"));
        assert!(!matched.contains("gone"));
    }

    #[test]
    fn test_untrack_requires_matching_seq() {
        let mut sub = subscription(&["a"]);
        track(&mut sub, "c1", 2, &["a"]);

        assert!(!sub.untrack("c1", 1));
        assert!(sub.tracked.contains_key("c1"));
        assert!(sub.untrack("c1", 2));
        assert!(!sub.untrack("c1", 2));
    }

    #[test]
    fn test_snapshot_is_sorted() {
        let mut registry = Registry::default();
        registry.insert("z", Arc::new(NoSource));
        registry.insert("a", Arc::new(NoSource));
        let sub = registry.get_mut("a").unwrap();
        sub.queries.insert("label=x".to_string());
        track(sub, "c2", 1, &["label=x"]);
        track(sub, "c1", 2, &["label=x"]);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot[0].endpoint, "a");
        assert_eq!(snapshot[0].tracked, vec!["c1", "c2"]);
        assert_eq!(snapshot[1].endpoint, "z");
        assert!(snapshot[1].filters.is_empty());
    }
}
