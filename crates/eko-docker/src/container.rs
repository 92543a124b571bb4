//! Docker-backed container source.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::ListContainersOptions;
use eko_core::{Container, Error, LogStream, Result, TimestampMs};

use crate::endpoint::Endpoint;
use crate::logs::LogFollower;
use crate::source::{ContainerSource, SourceFactory};

/// Seconds bollard waits on a single daemon request.
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// Lists containers and follows their logs on one Docker daemon.
#[derive(Debug, Clone)]
pub struct DockerSource {
    docker: Docker,
    address: String,
}

impl DockerSource {
    /// Connect to the daemon at `address` (see [`Endpoint::parse`]).
    pub fn connect(address: &str) -> Result<Self> {
        let docker = match Endpoint::parse(address)? {
            Endpoint::Local(socket_path) => Docker::connect_with_socket(
                &socket_path,
                REQUEST_TIMEOUT_SECS,
                bollard::API_DEFAULT_VERSION,
            ),
            Endpoint::Remote(host) => {
                Docker::connect_with_http(&host, REQUEST_TIMEOUT_SECS, bollard::API_DEFAULT_VERSION)
            }
        }
        .map_err(|e| {
            Error::Docker(format!(
                "failed to connect to docker daemon with connection {address}: {e}"
            ))
        })?;

        Ok(Self {
            docker,
            address: address.to_string(),
        })
    }

    /// Check if Docker is available.
    pub async fn ping(&self) -> Result<()> {
        self.docker
            .ping()
            .await
            .map_err(|e| Error::Docker(e.to_string()))?;
        Ok(())
    }

    /// Factory connecting a [`DockerSource`] per endpoint address.
    pub fn factory() -> SourceFactory {
        Arc::new(|address: &str| {
            let source: Arc<dyn ContainerSource> = Arc::new(Self::connect(address)?);
            Ok(source)
        })
    }
}

#[async_trait]
impl ContainerSource for DockerSource {
    async fn list_active(&self, filter: &str) -> Result<Vec<Container>> {
        let options = ListContainersOptions::<String> {
            filters: parse_filter(filter),
            ..Default::default()
        };

        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| {
                Error::Docker(format!(
                    "failed to gather containers from {} with filter {filter}: {e}",
                    self.address
                ))
            })?;

        Ok(containers
            .into_iter()
            .filter_map(|c| {
                let id = c.id?;
                let name = c
                    .names
                    .unwrap_or_default()
                    .iter()
                    .map(|n| n.trim_start_matches('/'))
                    .collect::<Vec<_>>()
                    .join(",");
                Some(Container { id, name })
            })
            .collect())
    }

    async fn open_log_stream(
        &self,
        container_id: &str,
        since: Option<TimestampMs>,
    ) -> Result<LogStream> {
        // The logs endpoint only reports a missing container once polled, so
        // surface it here as a typed failure.
        self.docker
            .inspect_container(container_id, None)
            .await
            .map_err(|e| {
                Error::Docker(format!(
                    "failed to listen to logs from container {container_id}: {e}"
                ))
            })?;

        Ok(LogFollower::new(self.docker.clone(), container_id, since).start())
    }

    async fn is_healthy(&self) -> bool {
        self.ping().await.is_ok()
    }
}

/// Turn `key=value key2=value2` clauses into Docker list filters.
///
/// Only the first `=` splits a clause, so `label=env=prod` filters on the label
/// `env=prod`. Clauses without `=` are ignored.
pub fn parse_filter(filter: &str) -> HashMap<String, Vec<String>> {
    let mut filters: HashMap<String, Vec<String>> = HashMap::new();
    for (key, value) in filter
        .split_whitespace()
        .filter_map(|clause| clause.split_once('='))
        .filter(|(key, value)| !key.is_empty() && !value.is_empty())
    {
        filters
            .entry(key.to_string())
            .or_default()
            .push(value.to_string());
    }
    filters
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_label_filter() {
        let filters = parse_filter("label=env=prod");
        assert_eq!(filters.get("label"), Some(&vec!["env=prod".to_string()]));
    }

    #[test]
    fn test_parse_multiple_clauses() {
        let filters = parse_filter("label=env=prod  name=api label=tier=web status");
        assert_eq!(
            filters.get("label"),
            Some(&vec!["env=prod".to_string(), "tier=web".to_string()])
        );
        assert_eq!(filters.get("name"), Some(&vec!["api".to_string()]));
        assert!(!filters.contains_key("status"));
    }

    #[test]
    fn test_parse_empty_filter() {
        assert!(parse_filter("").is_empty());
        assert!(parse_filter("=x y=").is_empty());
    }

    #[test]
    fn test_connect_rejects_bad_address() {
        assert!(matches!(
            DockerSource::connect("docker.sock"),
            Err(Error::InvalidConnection(_))
        ));
    }
}
