//! Queue backed by a storage prefix.
//!
//! Each message is one object named `{id}.{extension}` whose contents are the
//! raw body. Receiving lists and reads objects in name order; completing
//! deletes the object. Ids are UUIDv7 when produced here, so name order is
//! roughly arrival order.

use async_trait::async_trait;
use bytes::Bytes;
use object_store::PutPayload;
use object_store::path::Path;
use snafu::prelude::*;
use std::collections::HashMap;
use tracing::{debug, warn};

use parcel_core::{StorageError, StorageProvider, StorageProviderRef};

use crate::error::{MissingReceiptSnafu, QueueError, QueueStorageSnafu};
use crate::message::OrderMessage;

use super::{ErrorChannel, MessageSource};

/// Message queue stored as one object per message.
#[derive(Debug, Clone)]
pub struct StorageQueue {
    storage: StorageProviderRef,
    extension: String,
}

impl StorageQueue {
    /// Open a queue at the given storage URL.
    pub async fn new(
        url: &str,
        storage_options: HashMap<String, String>,
        extension: impl Into<String>,
    ) -> Result<Self, StorageError> {
        let storage = StorageProvider::for_url_with_options(url, storage_options).await?;
        Ok(Self::with_storage(storage.into(), extension))
    }

    pub fn with_storage(storage: StorageProviderRef, extension: impl Into<String>) -> Self {
        Self {
            storage,
            extension: extension.into(),
        }
    }

    pub fn canonical_url(&self) -> &str {
        self.storage.canonical_url()
    }

    /// Producer side: store a body under a fresh time-ordered id.
    pub async fn enqueue(&self, body: impl Into<Bytes>) -> Result<OrderMessage, QueueError> {
        let message = OrderMessage::new(uuid::Uuid::now_v7().to_string(), body);
        self.put(&message).await?;
        Ok(message)
    }

    /// Message ids currently stored, in receive order.
    pub async fn pending(&self) -> Result<Vec<String>, QueueError> {
        Ok(self
            .list_messages()
            .await?
            .into_iter()
            .filter_map(|path| self.message_id(&path))
            .collect())
    }

    /// Read the stored body of a message by id.
    pub async fn read(&self, id: &str) -> Result<Bytes, QueueError> {
        let path = self.object_path(id);
        self.storage.get(&path).await.context(QueueStorageSnafu {
            path: path.to_string(),
        })
    }

    async fn put(&self, message: &OrderMessage) -> Result<(), QueueError> {
        let path = self.object_path(message.id());
        self.storage
            .put_payload(&path, PutPayload::from(message.body().clone()))
            .await
            .context(QueueStorageSnafu {
                path: path.to_string(),
            })
    }

    async fn list_messages(&self) -> Result<Vec<Path>, QueueError> {
        let mut paths: Vec<Path> = self
            .storage
            .list()
            .await
            .context(QueueStorageSnafu {
                path: self.canonical_url(),
            })?
            .into_iter()
            .filter(|path| self.message_id(path).is_some())
            .collect();
        paths.sort();
        Ok(paths)
    }

    fn object_path(&self, id: &str) -> Path {
        if self.extension.is_empty() {
            Path::from(id)
        } else {
            Path::from(format!("{id}.{}", self.extension))
        }
    }

    /// Id for a listed object, or `None` for objects that are not messages
    /// (nested paths, other extensions, in-progress uploads).
    fn message_id(&self, path: &Path) -> Option<String> {
        let mut parts = path.parts();
        let name = parts.next()?;
        if parts.next().is_some() {
            return None;
        }
        let name = name.as_ref();
        if name.contains('#') || name.starts_with('.') {
            return None;
        }
        if self.extension.is_empty() {
            return Some(name.to_string());
        }
        name.strip_suffix(&format!(".{}", self.extension))
            .filter(|id| !id.is_empty())
            .map(str::to_string)
    }
}

#[async_trait]
impl MessageSource for StorageQueue {
    async fn receive(&self, max: usize) -> Result<Vec<OrderMessage>, QueueError> {
        let mut batch = Vec::new();

        for path in self.list_messages().await? {
            if batch.len() >= max {
                break;
            }
            let Some(id) = self.message_id(&path) else {
                continue;
            };

            match self.storage.get(&path).await {
                Ok(body) => batch.push(OrderMessage::new(id, body).with_receipt(path.to_string())),
                Err(e) if e.is_not_found() => {
                    debug!(%path, "Message completed by another consumer, skipping");
                }
                Err(source) => {
                    return Err(QueueError::QueueStorage {
                        path: path.to_string(),
                        source,
                    });
                }
            }
        }

        Ok(batch)
    }

    async fn complete(&self, message: &OrderMessage) -> Result<(), QueueError> {
        let receipt = message.receipt().context(MissingReceiptSnafu {
            id: message.id(),
        })?;
        let path = Path::from(receipt);

        match self.storage.delete(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => {
                warn!(%path, id = message.id(), "Message already removed from queue");
                Ok(())
            }
            Err(source) => Err(QueueError::QueueStorage {
                path: path.to_string(),
                source,
            }),
        }
    }
}

#[async_trait]
impl ErrorChannel for StorageQueue {
    async fn send(&self, message: &OrderMessage) -> Result<(), QueueError> {
        self.put(message).await
    }
}
