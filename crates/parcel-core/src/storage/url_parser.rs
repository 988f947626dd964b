//! URL parsing for storage backends.
//!
//! Maps the URL forms operators paste into config (S3, GCS, Azure, local
//! filesystem) to a backend configuration.

use object_store::path::Path;
use regex::{Captures, Regex};
use snafu::prelude::*;
use std::sync::LazyLock;

use crate::error::{InvalidUrlSnafu, StorageError};

use super::{AzureConfig, GcsConfig, LocalConfig, S3Config};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backend {
    S3,
    Gcs,
    Azure,
    Local,
}

/// Patterns are tried in order; the first match wins.
const PATTERNS: &[(Backend, &str)] = &[
    (
        Backend::S3,
        r"^https://s3\.(?P<region>[\w\-]+)\.amazonaws\.com/(?P<bucket>[a-z0-9\-\.]+)(/(?P<key>.+))?$",
    ),
    (
        Backend::S3,
        r"^https://(?P<bucket>[a-z0-9\-\.]+)\.s3\.(?P<region>[\w\-]+)\.amazonaws\.com(/(?P<key>.+))?$",
    ),
    (
        Backend::S3,
        r"^[sS]3[aA]?::(?P<protocol>https?)://(?P<endpoint>[^:/]+):(?P<port>\d+)/(?P<bucket>[a-z0-9\-\.]+)(/(?P<key>.+))?$",
    ),
    (
        Backend::S3,
        r"^[sS]3[aA]?://(?P<bucket>[a-z0-9\-\.]+)(/(?P<key>.+))?$",
    ),
    (
        Backend::Gcs,
        r"^https://storage\.googleapis\.com/(?P<bucket>[a-z0-9\-_\.]+)(/(?P<key>.+))?$",
    ),
    (
        Backend::Gcs,
        r"^https://(?P<bucket>[a-z0-9\-_\.]+)\.storage\.googleapis\.com(/(?P<key>.+))?$",
    ),
    (
        Backend::Gcs,
        r"^[gG][sS]://(?P<bucket>[a-z0-9\-\._]+)(/(?P<key>.+))?$",
    ),
    (
        Backend::Azure,
        r"^abfss?://(?P<container>[a-z0-9\-]+)@(?P<account>[a-z0-9]+)\.dfs\.core\.windows\.net(/(?P<key>.+))?$",
    ),
    (
        Backend::Azure,
        r"^https://(?P<account>[a-z0-9]+)\.(blob|dfs)\.core\.windows\.net/(?P<container>[a-z0-9\-]+)(/(?P<key>.+))?$",
    ),
    (Backend::Local, r"^file://(?P<path>.*)$"),
    (Backend::Local, r"^file:(?P<path>.*)$"),
    (Backend::Local, r"^(?P<path>/.*)$"),
];

static MATCHERS: LazyLock<Vec<(Backend, Regex)>> = LazyLock::new(|| {
    PATTERNS
        .iter()
        .map(|(backend, pattern)| {
            (
                *backend,
                Regex::new(pattern).expect("storage URL patterns are valid"),
            )
        })
        .collect()
});

/// Backend configuration enum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    S3(S3Config),
    Gcs(GcsConfig),
    Azure(AzureConfig),
    Local(LocalConfig),
}

impl BackendConfig {
    /// Parse a URL into a backend configuration.
    pub fn parse_url(url: &str) -> Result<Self, StorageError> {
        let Some((backend, caps)) = MATCHERS
            .iter()
            .find_map(|(backend, regex)| regex.captures(url).map(|caps| (*backend, caps)))
        else {
            return InvalidUrlSnafu { url }.fail();
        };

        let required = |name: &str| -> Result<String, StorageError> {
            caps.name(name)
                .map(|m| m.as_str().to_string())
                .context(InvalidUrlSnafu { url })
        };

        Ok(match backend {
            Backend::S3 => BackendConfig::S3(S3Config {
                endpoint: std::env::var("AWS_ENDPOINT")
                    .ok()
                    .or_else(|| s3_endpoint(&caps)),
                region: std::env::var("AWS_DEFAULT_REGION")
                    .ok()
                    .or_else(|| caps.name("region").map(|m| m.as_str().to_string())),
                bucket: required("bucket")?,
                key: key(&caps),
            }),
            Backend::Gcs => BackendConfig::Gcs(GcsConfig {
                bucket: required("bucket")?,
                key: key(&caps),
            }),
            Backend::Azure => BackendConfig::Azure(AzureConfig {
                account: required("account")?,
                container: required("container")?,
                key: key(&caps),
            }),
            Backend::Local => {
                let path = required("path")?;
                let path = if path.starts_with('/') {
                    path
                } else {
                    format!("/{path}")
                };
                BackendConfig::Local(LocalConfig {
                    path: path.trim_end_matches('/').to_string(),
                })
            }
        })
    }

    /// Key prefix inside the bucket/container, if any.
    pub(crate) fn key(&self) -> Option<&Path> {
        match self {
            BackendConfig::S3(s3) => s3.key.as_ref(),
            BackendConfig::Gcs(gcs) => gcs.key.as_ref(),
            BackendConfig::Azure(azure) => azure.key.as_ref(),
            BackendConfig::Local(_) => None,
        }
    }
}

fn key(caps: &Captures) -> Option<Path> {
    caps.name("key")
        .map(|m| m.as_str().trim_end_matches('/'))
        .filter(|k| !k.is_empty())
        .map(Path::from)
}

fn s3_endpoint(caps: &Captures) -> Option<String> {
    let endpoint = caps.name("endpoint")?;
    let port = caps
        .name("port")
        .and_then(|p| p.as_str().parse::<u16>().ok())
        .unwrap_or(443);
    let protocol = caps.name("protocol").map(|p| p.as_str()).unwrap_or("https");
    Some(format!("{protocol}://{}:{port}", endpoint.as_str()))
}
