//! MongoDB storage: one document per container with a `logs` array of lines.
//!
//! Document ids are derived from the first 24 hex characters of the container
//! id, so two containers sharing that prefix share a document.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use eko_core::{
    Error, LogStream, Result, StorageMetadata, StreamHandle, TimestampMs, cursor, next_chunk,
};
use futures_util::TryStreamExt;
use mongodb::bson::oid::ObjectId;
use mongodb::bson::{Document, doc};
use mongodb::{Client, Collection, Database};

use crate::backend::StorageBackend;

/// Collection holding one document per container.
pub const COLLECTION: &str = "containers";
/// Lines buffered before they are pushed to the container document.
pub const BATCH_SIZE: usize = 25;
/// Database used when the connection string names none.
const DEFAULT_DATABASE: &str = "eko";

/// Stores container logs in MongoDB.
#[derive(Debug)]
pub struct MongoStorage {
    client: Client,
    db: Database,
    connection_string: String,
    destroyed: AtomicBool,
}

impl MongoStorage {
    /// Connect to the deployment behind `connection_string`.
    pub async fn connect(connection_string: &str) -> Result<Self> {
        let client = Client::with_uri_str(connection_string)
            .await
            .map_err(|e| Error::Storage(format!("failed to connect to mongo storage: {e}")))?;
        let db = client
            .default_database()
            .unwrap_or_else(|| client.database(DEFAULT_DATABASE));

        Ok(Self {
            client,
            db,
            connection_string: connection_string.to_string(),
            destroyed: AtomicBool::new(false),
        })
    }

    fn containers(&self) -> Collection<Document> {
        self.db.collection(COLLECTION)
    }
}

#[async_trait]
impl StorageBackend for MongoStorage {
    async fn save_logs(&self, container_id: &str, mut logs: LogStream) -> Result<StreamHandle> {
        let id = container_object_id(container_id)?;
        let collection = self.containers();

        Ok(StreamHandle::spawn(container_id, move |cancel| async move {
            let mut lines = LineBuffer::default();
            let mut batch = Vec::new();

            let outcome = async {
                while let Some(chunk) = next_chunk(&mut logs, &cancel).await {
                    batch.extend(lines.push(&chunk?));
                    if batch.len() >= BATCH_SIZE {
                        push_lines(&collection, id, std::mem::take(&mut batch)).await?;
                    }
                }
                Ok::<_, Error>(())
            }
            .await;

            // Flush the trailing partial batch whether the stream ended, failed or was closed.
            batch.extend(lines.finish());
            let flushed = if batch.is_empty() {
                Ok(())
            } else {
                push_lines(&collection, id, batch).await
            };

            outcome.and(flushed)
        }))
    }

    async fn read_logs(&self, container_id: &str) -> Result<Option<LogStream>> {
        let id = container_object_id(container_id)?;
        let document = self
            .containers()
            .find_one(doc! { "_id": id })
            .projection(doc! { "logs": 1 })
            .await
            .map_err(|e| Error::Storage(format!("failed to retrieve container logs: {e}")))?;

        let Some(document) = document else {
            return Ok(None);
        };

        let lines: Vec<std::io::Result<Bytes>> = document
            .get_array("logs")
            .map(|logs| {
                logs.iter()
                    .filter_map(|line| line.as_str())
                    .map(|line| Ok(Bytes::from(format!("{line}\n"))))
                    .collect()
            })
            .unwrap_or_default();

        Ok(Some(Box::pin(futures_util::stream::iter(lines))))
    }

    async fn latest_log_timestamp(&self, container_id: &str) -> Result<Option<TimestampMs>> {
        let id = container_object_id(container_id)?;
        let document = self
            .containers()
            .find_one(doc! { "_id": id })
            .projection(doc! { "logs": { "$slice": -1 } })
            .await
            .map_err(|e| {
                Error::Storage(format!(
                    "failed to retrieve latest container log timestamp: {e}"
                ))
            })?;

        Ok(document
            .as_ref()
            .and_then(|d| d.get_array("logs").ok())
            .and_then(|logs| logs.last())
            .and_then(|line| line.as_str())
            .and_then(cursor::parse_line_timestamp))
    }

    async fn logged_containers(&self) -> Result<Vec<String>> {
        let documents: Vec<Document> = self
            .containers()
            .find(doc! {})
            .projection(doc! { "_id": 1 })
            .await
            .map_err(|e| Error::Storage(format!("failed to retrieve logged containers list: {e}")))?
            .try_collect()
            .await
            .map_err(|e| Error::Storage(format!("failed to retrieve logged containers list: {e}")))?;

        Ok(documents
            .iter()
            .filter_map(|d| d.get_object_id("_id").ok())
            .map(|id| id.to_hex())
            .collect())
    }

    async fn is_healthy(&self) -> bool {
        self.db.run_command(doc! { "ping": 1 }).await.is_ok()
    }

    fn metadata(&self) -> StorageMetadata {
        StorageMetadata {
            name: "mongo".to_string(),
            connection_string: self.connection_string.clone(),
        }
    }

    async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.client.clone().shutdown().immediate(true).await;
        tracing::debug!("mongo storage connection closed");
    }
}

/// Map a container id onto a document id (its first 24 hex characters).
pub fn container_object_id(container_id: &str) -> Result<ObjectId> {
    container_id
        .get(..24)
        .and_then(|prefix| ObjectId::parse_str(prefix).ok())
        .ok_or_else(|| {
            Error::Storage(format!(
                "container id '{container_id}' has no 24 hex character prefix"
            ))
        })
}

async fn push_lines(
    collection: &Collection<Document>,
    id: ObjectId,
    lines: Vec<String>,
) -> Result<()> {
    collection
        .update_one(
            doc! { "_id": id },
            doc! { "$push": { "logs": { "$each": lines } } },
        )
        .upsert(true)
        .await
        .map_err(|e| Error::Storage(format!("failed to append logs: {e}")))?;
    Ok(())
}

/// Splits a byte stream into complete lines, holding back a trailing partial one.
#[derive(Debug, Default)]
struct LineBuffer {
    partial: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.partial.extend_from_slice(chunk);
        let Some(last_break) = self.partial.iter().rposition(|b| *b == b'\n') else {
            return Vec::new();
        };

        let rest = self.partial.split_off(last_break + 1);
        let complete = std::mem::replace(&mut self.partial, rest);
        complete
            .split(|b| *b == b'\n')
            .filter(|line| !line.is_empty())
            .map(|line| String::from_utf8_lossy(line).into_owned())
            .collect()
    }

    fn finish(&mut self) -> Option<String> {
        if self.partial.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.partial).into_owned();
        self.partial.clear();
        Some(line)
    }
}
