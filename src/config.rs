//! # Enrichment Engine Configuration
//!
//! Typed configuration for the orchestration engine. Every tunable that the
//! engine reads at runtime lives here: chunk sizing and concurrency bounds
//! for sub-batch execution, the poll budget and cadence for asynchronous
//! searches, default stage toggles, and database connection settings.
//!
//! Stage enablement is an explicit struct rather than an untyped option bag
//! so invalid combinations are rejected at load time, not inside a stage.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{EnrichmentError, Result};
use crate::stages::StageKind;

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    pub batching: BatchingConfig,
    pub search: SearchWorkerConfig,
    pub stages: StageToggles,
    pub database: DatabaseConfig,
}

/// Sub-batch decomposition and chunk execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchingConfig {
    /// Fixed chunk size for splitting a batch's records into sub-batches.
    pub chunk_size: usize,
    /// Maximum sub-batch chunks in flight at once per stage. External
    /// services enforce their own concurrent-request ceilings; the engine
    /// must not trigger throttling itself.
    pub max_concurrent_chunks: usize,
    /// Immediate in-chunk retries for a transient service error before the
    /// chunk is marked failed and left for explicit resume.
    pub transient_retry_attempts: u32,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 100,
            max_concurrent_chunks: 3,
            transient_retry_attempts: 2,
        }
    }
}

/// Asynchronous search worker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchWorkerConfig {
    /// Interval between worker ticks, in milliseconds.
    pub poll_interval_ms: u64,
    /// Minimum age of `last_polled_at` before a search is due again.
    pub poll_backoff_ms: u64,
    /// Poll-attempt budget per search before it is forced to `timeout`.
    pub max_poll_attempts: i32,
}

impl Default for SearchWorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5_000,
            poll_backoff_ms: 10_000,
            max_poll_attempts: 30,
        }
    }
}

impl SearchWorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn poll_backoff(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.poll_backoff_ms as i64)
    }
}

/// Per-stage enablement flags plus thresholds shared by matching stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StageToggles {
    pub enable_classification: bool,
    pub enable_supplier_match: bool,
    pub enable_address_validation: bool,
    pub enable_merchant_match: bool,
    pub enable_payment_prediction: bool,
    /// Minimum match confidence accepted by the supplier-network stage.
    pub confidence_threshold: f64,
}

impl Default for StageToggles {
    fn default() -> Self {
        Self {
            enable_classification: true,
            enable_supplier_match: true,
            enable_address_validation: true,
            enable_merchant_match: true,
            enable_payment_prediction: true,
            confidence_threshold: 0.85,
        }
    }
}

impl StageToggles {
    /// Whether the given pipeline stage is enabled for this run.
    pub fn enabled(&self, kind: StageKind) -> bool {
        match kind {
            StageKind::Classification => self.enable_classification,
            StageKind::SupplierMatch => self.enable_supplier_match,
            StageKind::AddressValidation => self.enable_address_validation,
            StageKind::MerchantMatch => self.enable_merchant_match,
            StageKind::PaymentPrediction => self.enable_payment_prediction,
        }
    }

    /// Toggles with every stage disabled; useful for selective runs.
    pub fn none() -> Self {
        Self {
            enable_classification: false,
            enable_supplier_match: false,
            enable_address_validation: false,
            enable_merchant_match: false,
            enable_payment_prediction: false,
            ..Self::default()
        }
    }
}

/// Database connection settings, consumed only when constructing the
/// Postgres-backed store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/enrichment_development".to_string(),
            max_connections: 10,
        }
    }
}

impl EnrichmentConfig {
    /// Load configuration from an optional TOML file plus `ENRICHMENT_*`
    /// environment overrides (e.g. `ENRICHMENT_BATCHING__CHUNK_SIZE=50`).
    pub fn load() -> Result<Self> {
        Self::load_from(
            &std::env::var("ENRICHMENT_CONFIG").unwrap_or_else(|_| "config/enrichment".to_string()),
        )
    }

    /// Load configuration from an explicit file path (extension optional).
    pub fn load_from(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("ENRICHMENT").separator("__"))
            .build()
            .map_err(|e| EnrichmentError::Configuration(e.to_string()))?;

        let loaded: EnrichmentConfig = settings
            .try_deserialize()
            .map_err(|e| EnrichmentError::Configuration(e.to_string()))?;

        loaded.validate()?;
        Ok(loaded)
    }

    /// Validate cross-field constraints the type system cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.batching.chunk_size == 0 {
            return Err(EnrichmentError::Configuration(
                "batching.chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.batching.max_concurrent_chunks == 0 {
            return Err(EnrichmentError::Configuration(
                "batching.max_concurrent_chunks must be greater than zero".to_string(),
            ));
        }
        if self.search.max_poll_attempts <= 0 {
            return Err(EnrichmentError::Configuration(
                "search.max_poll_attempts must be greater than zero".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.stages.confidence_threshold) {
            return Err(EnrichmentError::Configuration(format!(
                "stages.confidence_threshold must be within [0.0, 1.0], got {}",
                self.stages.confidence_threshold
            )));
        }
        Ok(())
    }
}
