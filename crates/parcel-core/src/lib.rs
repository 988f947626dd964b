//! parcel-core: Shared components for the parcel delivery pipeline.
//!
//! - `storage/` - Multi-cloud blob storage abstraction (S3, GCS, Azure, local)
//! - `metrics/` - Prometheus metrics infrastructure and storage/polling events
//! - `config/` - Environment variable interpolation, YAML loading, CLI args
//! - `polling` - Generic polling loop trait and runner
//! - `signal` - Signal handling for graceful shutdown
//! - `error` - Common error types

pub mod config;
pub mod error;
pub mod metrics;
pub mod polling;
pub mod signal;
pub mod storage;
pub mod tracing;

pub use config::{CliArgs, MetricsConfig, interpolate, parse_yaml};
pub use error::{ConfigError, MetricsError, StorageError};
pub use metrics::{
    DEFAULT_METRICS_ADDR, MetricsController, init_global as init_metrics,
    init_test as init_metrics_test,
};
pub use polling::{IterationResult, PollingProcessor, random_jitter, run_polling_loop};
pub use signal::{shutdown_signal, shutdown_token};
pub use storage::{StorageProvider, StorageProviderRef};
pub use self::tracing::init_tracing;
