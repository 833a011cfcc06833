use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use log::debug;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_stream::wrappers::ReceiverStream;

use crate::config::RemoteConfig;
use crate::errors::{SyncError, SyncResult};
use crate::types::Collection;

/// A document as the remote store hands it out: an id plus its fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteDoc {
    pub id: String,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl RemoteDoc {
    pub fn new(id: impl Into<String>, fields: Value) -> Self {
        let fields = match fields {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Fold the id into the fields and deserialize a canonical record;
    /// deserialization routes through the record's sanitizing document shape.
    pub fn into_record<T: DeserializeOwned>(self) -> Result<T, serde_json::Error> {
        let mut fields = self.fields;
        fields.insert("id".to_string(), Value::String(self.id));
        serde_json::from_value(Value::Object(fields))
    }

    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }
}

/// A full-collection snapshot, or the error that kept one from arriving.
pub type SnapshotStream = BoxStream<'static, SyncResult<Vec<RemoteDoc>>>;

/// Trait for the remote document store
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Subscribe to a collection, newest first. Each item is a complete
    /// snapshot; a failed fetch yields an `Err` item and the stream keeps
    /// going so a recovered connection resumes delivering snapshots.
    async fn subscribe(&self, collection: Collection) -> SyncResult<SnapshotStream>;

    /// Point write by id (an upsert: the id given becomes the permanent id).
    async fn put(&self, collection: Collection, id: &str, fields: Value) -> SyncResult<()>;

    /// Point delete by id.
    async fn delete(&self, collection: Collection, id: &str) -> SyncResult<()>;

    /// Query documents whose `field` equals `value`.
    async fn query_by_field(
        &self,
        collection: Collection,
        field: &str,
        value: &str,
    ) -> SyncResult<Vec<RemoteDoc>>;
}

/// Implementation of RemoteStore that talks to an HTTP document API.
/// Snapshot subscriptions are realized by polling the list endpoint.
pub struct ApiRemoteStore {
    client: Client,
    base_url: String,
    poll_interval: Duration,
}

impl ApiRemoteStore {
    pub fn new(config: &RemoteConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: config.api_base.trim_end_matches('/').to_string(),
            poll_interval: Duration::from_secs(config.poll_interval_secs.max(1)),
        }
    }

    fn collection_url(&self, collection: Collection) -> String {
        format!("{}/api/{}", self.base_url, collection.as_str())
    }

    async fn fetch_snapshot(
        client: &Client,
        url: &str,
    ) -> SyncResult<Vec<RemoteDoc>> {
        let response = client
            .get(url)
            .query(&[("order_by", "createdAt"), ("dir", "desc")])
            .send()
            .await
            .map_err(|e| SyncError::Network(format!("failed to fetch snapshot: {}", e)))?;

        if response.status().is_success() {
            response
                .json::<Vec<RemoteDoc>>()
                .await
                .map_err(|e| SyncError::Network(format!("failed to parse snapshot: {}", e)))
        } else {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to get error details".to_string());
            Err(SyncError::RemoteRejected(format!(
                "snapshot endpoint returned error {}: {}",
                status, error_text
            )))
        }
    }
}

#[async_trait]
impl RemoteStore for ApiRemoteStore {
    async fn subscribe(&self, collection: Collection) -> SyncResult<SnapshotStream> {
        let client = self.client.clone();
        let url = self.collection_url(collection);
        let interval = self.poll_interval;
        let (tx, rx) = tokio::sync::mpsc::channel(8);

        tokio::spawn(async move {
            loop {
                let snapshot = Self::fetch_snapshot(&client, &url).await;
                if let Err(err) = &snapshot {
                    debug!("snapshot poll for {} failed: {}", url, err);
                }
                if tx.send(snapshot).await.is_err() {
                    // Subscriber went away; stop polling.
                    break;
                }
                tokio::time::sleep(interval).await;
            }
        });

        Ok(ReceiverStream::new(rx).boxed())
    }

    async fn put(&self, collection: Collection, id: &str, fields: Value) -> SyncResult<()> {
        let url = format!("{}/{}", self.collection_url(collection), id);
        let response = self
            .client
            .put(&url)
            .json(&fields)
            .send()
            .await
            .map_err(|e| SyncError::Network(format!("failed to write document: {}", e)))?;

        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to get error details".to_string());
            Err(SyncError::RemoteRejected(format!(
                "write returned error {}: {}",
                status, error_text
            )))
        }
    }

    async fn delete(&self, collection: Collection, id: &str) -> SyncResult<()> {
        let url = format!("{}/{}", self.collection_url(collection), id);
        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(|e| SyncError::Network(format!("failed to delete document: {}", e)))?;

        // A document already gone counts as deleted.
        if response.status().is_success() || response.status() == reqwest::StatusCode::NOT_FOUND {
            Ok(())
        } else {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to get error details".to_string());
            Err(SyncError::RemoteRejected(format!(
                "delete returned error {}: {}",
                status, error_text
            )))
        }
    }

    async fn query_by_field(
        &self,
        collection: Collection,
        field: &str,
        value: &str,
    ) -> SyncResult<Vec<RemoteDoc>> {
        let response = self
            .client
            .get(self.collection_url(collection))
            .query(&[("field", field), ("equals", value)])
            .send()
            .await
            .map_err(|e| SyncError::Network(format!("failed to query documents: {}", e)))?;

        if response.status().is_success() {
            response
                .json::<Vec<RemoteDoc>>()
                .await
                .map_err(|e| SyncError::Network(format!("failed to parse query response: {}", e)))
        } else {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to get error details".to_string());
            Err(SyncError::RemoteRejected(format!(
                "query returned error {}: {}",
                status, error_text
            )))
        }
    }
}

/// Mock implementation for testing
#[cfg(test)]
pub struct MockRemoteStore {
    docs: std::sync::Mutex<std::collections::HashMap<(Collection, String), Value>>,
    write_log: std::sync::Mutex<Vec<(Collection, String)>>,
    delete_log: std::sync::Mutex<Vec<(Collection, String)>>,
    fail_writes: std::sync::atomic::AtomicBool,
    fail_deletes: std::sync::atomic::AtomicBool,
    write_delay: std::sync::Mutex<Option<Duration>>,
}

#[cfg(test)]
impl MockRemoteStore {
    pub fn new() -> Self {
        Self {
            docs: std::sync::Mutex::new(std::collections::HashMap::new()),
            write_log: std::sync::Mutex::new(Vec::new()),
            delete_log: std::sync::Mutex::new(Vec::new()),
            fail_writes: std::sync::atomic::AtomicBool::new(false),
            fail_deletes: std::sync::atomic::AtomicBool::new(false),
            write_delay: std::sync::Mutex::new(None),
        }
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn set_write_delay(&self, delay: Duration) {
        *self.write_delay.lock().unwrap() = Some(delay);
    }

    pub fn writes(&self) -> Vec<(Collection, String)> {
        self.write_log.lock().unwrap().clone()
    }

    pub fn deletes(&self) -> Vec<(Collection, String)> {
        self.delete_log.lock().unwrap().clone()
    }

    pub fn doc(&self, collection: Collection, id: &str) -> Option<Value> {
        self.docs
            .lock()
            .unwrap()
            .get(&(collection, id.to_string()))
            .cloned()
    }
}

#[cfg(test)]
#[async_trait]
impl RemoteStore for MockRemoteStore {
    async fn subscribe(&self, _collection: Collection) -> SyncResult<SnapshotStream> {
        Ok(futures::stream::empty().boxed())
    }

    async fn put(&self, collection: Collection, id: &str, fields: Value) -> SyncResult<()> {
        let delay = *self.write_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_writes.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(SyncError::Network("mock remote unreachable".to_string()));
        }
        self.write_log
            .lock()
            .unwrap()
            .push((collection, id.to_string()));
        self.docs
            .lock()
            .unwrap()
            .insert((collection, id.to_string()), fields);
        Ok(())
    }

    async fn delete(&self, collection: Collection, id: &str) -> SyncResult<()> {
        if self.fail_deletes.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(SyncError::Network("mock remote unreachable".to_string()));
        }
        self.delete_log
            .lock()
            .unwrap()
            .push((collection, id.to_string()));
        self.docs.lock().unwrap().remove(&(collection, id.to_string()));
        Ok(())
    }

    async fn query_by_field(
        &self,
        collection: Collection,
        field: &str,
        value: &str,
    ) -> SyncResult<Vec<RemoteDoc>> {
        if self.fail_deletes.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(SyncError::Network("mock remote unreachable".to_string()));
        }
        let docs = self.docs.lock().unwrap();
        Ok(docs
            .iter()
            .filter(|((c, _), fields)| {
                *c == collection && fields.get(field).and_then(Value::as_str) == Some(value)
            })
            .map(|((_, id), fields)| RemoteDoc::new(id.clone(), fields.clone()))
            .collect())
    }
}
