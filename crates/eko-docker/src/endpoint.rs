//! Docker endpoint addresses.

use eko_core::{ConnectionString, Error, Result};

/// How to reach a Docker daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Unix socket path.
    Local(String),
    /// `host:port` reachable over plain HTTP.
    Remote(String),
}

impl Endpoint {
    /// Parse `local::<socket>`, `remote::<host:port>` or a `unix://`, `tcp://`,
    /// `http://` URL.
    pub fn parse(address: &str) -> Result<Self> {
        if let Some(path) = address.strip_prefix("unix://") {
            return Ok(Self::Local(path.to_string()));
        }
        for scheme in ["tcp://", "http://"] {
            if let Some(host) = address.strip_prefix(scheme) {
                return Ok(Self::Remote(host.trim_end_matches('/').to_string()));
            }
        }

        let connection = ConnectionString::parse(address)?;
        match connection.name.as_str() {
            "local" => Ok(Self::Local(connection.remainder)),
            "remote" => Ok(Self::Remote(connection.remainder)),
            _ => Err(Error::InvalidConnection(format!(
                "unknown docker connection type in {address}. It should be \
                 'local::/var/run/docker.sock' or 'remote::183.12.13.1:2391'"
            ))),
        }
    }
}
