//! `name::remainder` connection strings.
//!
//! Storage definitions (`fs::./logs`, `mongo::mongodb://host/db`) and Docker
//! endpoints (`local::/var/run/docker.sock`, `remote::host:port`) share this form.

use std::str::FromStr;

use crate::{Error, Result};

/// Separator between the backend name and its backend-specific remainder.
pub const SEPARATOR: &str = "::";

/// A parsed `name::remainder` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionString {
    /// Backend name, ASCII letters only.
    pub name: String,
    /// Everything after the first separator.
    pub remainder: String,
}

impl ConnectionString {
    /// Parse a connection string.
    pub fn parse(input: &str) -> Result<Self> {
        let (name, remainder) = input.split_once(SEPARATOR).ok_or_else(|| {
            Error::InvalidConnection(format!(
                "{input} doesn't match the pattern <name>{SEPARATOR}<connection>"
            ))
        })?;

        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(Error::InvalidConnection(format!(
                "{input} has an invalid backend name '{name}'"
            )));
        }
        if remainder.is_empty() {
            return Err(Error::InvalidConnection(format!(
                "{input} has an empty connection part"
            )));
        }

        Ok(Self {
            name: name.to_string(),
            remainder: remainder.to_string(),
        })
    }
}

impl FromStr for ConnectionString {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl std::fmt::Display for ConnectionString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{SEPARATOR}{}", self.name, self.remainder)
    }
}
