//! In-process sink, used for embedding and tests.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use tokio::sync::Mutex;

use crate::error::WriteError;

use super::DurableSink;

/// Keeps written bodies in memory, keyed by blob key.
#[derive(Debug, Default)]
pub struct MemorySink {
    objects: Mutex<BTreeMap<String, Bytes>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &str) -> Option<Bytes> {
        self.objects.lock().await.get(key).cloned()
    }

    /// Snapshot of all stored objects, ordered by key.
    pub async fn objects(&self) -> Vec<(String, Bytes)> {
        self.objects
            .lock()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.objects.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.lock().await.is_empty()
    }
}

#[async_trait]
impl DurableSink for MemorySink {
    async fn write(&self, key: &str, body: Bytes) -> Result<(), WriteError> {
        self.objects.lock().await.insert(key.to_string(), body);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_same_key_overwrites() {
        let sink = MemorySink::new();
        sink.write("k", Bytes::from_static(b"first")).await.unwrap();
        sink.write("k", Bytes::from_static(b"second")).await.unwrap();

        assert_eq!(sink.len().await, 1);
        assert_eq!(sink.get("k").await.unwrap().as_ref(), b"second");
    }
}
