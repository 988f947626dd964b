//! Object storage abstraction.
//!
//! A single [`StorageProvider`] wraps S3, GCS, Azure Blob Storage or the local
//! filesystem behind `object_store`, scoped to a key prefix parsed from the
//! configured URL. Every request emits a counter and a latency histogram.

mod azure;
mod gcs;
mod local;
mod s3;
mod url_parser;

pub use azure::AzureConfig;
pub use gcs::GcsConfig;
pub use local::LocalConfig;
pub use s3::S3Config;
pub use url_parser::BackendConfig;

use bytes::Bytes;
use futures::TryStreamExt;
use object_store::path::Path;
use object_store::{
    Attribute, AttributeValue, Attributes, BackoffConfig, ObjectStore, PutOptions, PutPayload,
    RetryConfig,
};
use snafu::prelude::*;
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::emit;
use crate::error::{ObjectStoreSnafu, StorageError};
use crate::metrics::events::{RequestStatus, StorageOperation, StorageRequest};

/// A reference-counted storage provider.
pub type StorageProviderRef = Arc<StorageProvider>;

/// Client-level retries stay short; delivery retries are handled by the caller.
pub(crate) fn client_retry_config() -> RetryConfig {
    RetryConfig {
        backoff: BackoffConfig::default(),
        max_retries: 3,
        retry_timeout: Duration::from_secs(30),
    }
}

/// Storage provider bound to one bucket/container and key prefix.
#[derive(Clone)]
pub struct StorageProvider {
    pub(crate) config: BackendConfig,
    pub(crate) object_store: Arc<dyn ObjectStore>,
    pub(crate) canonical_url: String,
}

impl std::fmt::Debug for StorageProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StorageProvider<{}>", self.canonical_url)
    }
}

impl StorageProvider {
    /// Create a storage provider for the given URL with backend options
    /// (for example `aws_access_key_id` or `google_service_account`).
    pub async fn for_url_with_options(
        url: &str,
        options: HashMap<String, String>,
    ) -> Result<Self, StorageError> {
        match BackendConfig::parse_url(url)? {
            BackendConfig::S3(config) => Self::construct_s3(config, options),
            BackendConfig::Gcs(config) => Self::construct_gcs(config, options),
            BackendConfig::Azure(config) => Self::construct_azure(config, options),
            BackendConfig::Local(config) => Self::construct_local(config).await,
        }
    }

    /// Create a storage provider for the given URL using ambient credentials.
    pub async fn for_url(url: &str) -> Result<Self, StorageError> {
        Self::for_url_with_options(url, HashMap::new()).await
    }

    /// List every object below the configured prefix.
    ///
    /// Returned paths are relative to the prefix, so they can be passed back
    /// to [`get`](Self::get) and [`delete`](Self::delete) unchanged.
    pub async fn list(&self) -> Result<Vec<Path>, StorageError> {
        let prefix = self.config.key();
        let skip = prefix.map(|key| key.parts().count()).unwrap_or_default();

        let start = Instant::now();
        let result: Result<Vec<_>, _> = self.object_store.list(prefix).try_collect().await;
        record(StorageOperation::List, start, &result);

        Ok(result
            .context(ObjectStoreSnafu)?
            .into_iter()
            .map(|meta| meta.location.parts().skip(skip).collect())
            .collect())
    }

    /// Get the contents of an object.
    pub async fn get(&self, path: &Path) -> Result<Bytes, StorageError> {
        let path = self.qualify_path(path);
        let start = Instant::now();
        let result = match self.object_store.get(&path).await {
            Ok(response) => response.bytes().await,
            Err(e) => Err(e),
        };
        record(StorageOperation::Get, start, &result);

        result.context(ObjectStoreSnafu)
    }

    /// Write a payload, overwriting any existing object at the path.
    pub async fn put_payload(&self, path: &Path, payload: PutPayload) -> Result<(), StorageError> {
        self.put_opts(path, payload, PutOptions::default()).await
    }

    /// Write a payload tagged with a content type.
    ///
    /// The local filesystem does not support attributes, so the content type
    /// is dropped there.
    pub async fn put_with_content_type(
        &self,
        path: &Path,
        payload: PutPayload,
        content_type: &'static str,
    ) -> Result<(), StorageError> {
        if matches!(self.config, BackendConfig::Local(_)) {
            return self.put_payload(path, payload).await;
        }

        let opts = PutOptions {
            attributes: Attributes::from_iter([(
                Attribute::ContentType,
                AttributeValue::from(content_type),
            )]),
            ..Default::default()
        };
        self.put_opts(path, payload, opts).await
    }

    async fn put_opts(
        &self,
        path: &Path,
        payload: PutPayload,
        opts: PutOptions,
    ) -> Result<(), StorageError> {
        let path = self.qualify_path(path);
        let start = Instant::now();
        let result = self.object_store.put_opts(&path, payload, opts).await;
        record(StorageOperation::Put, start, &result);

        result.context(ObjectStoreSnafu)?;
        Ok(())
    }

    /// Delete an object.
    pub async fn delete(&self, path: &Path) -> Result<(), StorageError> {
        let path = self.qualify_path(path);
        let start = Instant::now();
        let result = self.object_store.delete(&path).await;
        record(StorageOperation::Delete, start, &result);

        result.context(ObjectStoreSnafu)
    }

    /// Qualify a path with the configured key prefix.
    pub fn qualify_path<'a>(&self, path: &'a Path) -> Cow<'a, Path> {
        match self.config.key() {
            Some(prefix) => Cow::Owned(prefix.parts().chain(path.parts()).collect()),
            None => Cow::Borrowed(path),
        }
    }

    /// The normalized URL this provider points at, for logs.
    pub fn canonical_url(&self) -> &str {
        &self.canonical_url
    }
}

fn record<T>(operation: StorageOperation, start: Instant, result: &Result<T, object_store::Error>) {
    emit!(StorageRequest {
        operation,
        status: RequestStatus::from_result(result),
        duration: start.elapsed(),
    });
}
