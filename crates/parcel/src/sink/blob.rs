//! Blob storage sink.

use async_trait::async_trait;
use bytes::Bytes;
use object_store::PutPayload;
use object_store::path::Path;
use snafu::prelude::*;
use std::collections::HashMap;
use tracing::debug;

use parcel_core::{StorageError, StorageProvider, StorageProviderRef};

use crate::error::{BlobWriteSnafu, WriteError};

use super::DurableSink;

/// Writes each message body to `{prefix}/{key}.{extension}`.
#[derive(Debug, Clone)]
pub struct BlobSink {
    storage: StorageProviderRef,
    extension: String,
}

impl BlobSink {
    /// Open a sink at the given storage URL.
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

    /// Object name for a blob key.
    pub fn object_name(&self, key: &str) -> String {
        if self.extension.is_empty() {
            key.to_string()
        } else {
            format!("{key}.{}", self.extension)
        }
    }

    fn content_type(&self) -> &'static str {
        match self.extension.as_str() {
            "json" => "application/json",
            "xml" => "application/xml",
            "txt" => "text/plain",
            _ => "application/octet-stream",
        }
    }

    pub fn storage(&self) -> &StorageProviderRef {
        &self.storage
    }
}

#[async_trait]
impl DurableSink for BlobSink {
    async fn write(&self, key: &str, body: Bytes) -> Result<(), WriteError> {
        let path = Path::from(self.object_name(key));
        debug!(url = self.storage.canonical_url(), %path, size = body.len(), "Writing blob");

        self.storage
            .put_with_content_type(&path, PutPayload::from(body), self.content_type())
            .await
            .context(BlobWriteSnafu)
    }
}
