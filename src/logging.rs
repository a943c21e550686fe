//! # Structured Logging Module
//!
//! Environment-aware structured logging for debugging long-running enrichment
//! pipelines: stage transitions, sub-batch execution, and asynchronous search
//! polling all emit structured events through `tracing`.

use chrono::Utc;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use uuid::Uuid;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration.
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let log_level = get_log_level(&environment);

        let subscriber = tracing_subscriber::registry().with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_filter(EnvFilter::new(log_level)),
        );

        // Use try_init to avoid a panic if the host already set a subscriber
        if subscriber.try_init().is_err() {
            tracing::debug!(
                "Global tracing subscriber already initialized - continuing with existing subscriber"
            );
        }

        tracing::info!(
            environment = %environment,
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

/// Get current environment from environment variables
fn get_environment() -> String {
    std::env::var("ENRICHMENT_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> String {
    match environment {
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

/// Log structured data for pipeline stage operations
pub fn log_stage_operation(
    operation: &str,
    batch_id: Uuid,
    stage: &str,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        batch_id = %batch_id,
        stage = %stage,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "🧩 STAGE_OPERATION"
    );
}

/// Log structured data for batch job / sub-batch operations
pub fn log_job_operation(
    operation: &str,
    batch_job_id: Uuid,
    service: Option<&str>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        batch_job_id = %batch_job_id,
        service = service,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "📦 JOB_OPERATION"
    );
}

/// Log structured data for asynchronous search operations
pub fn log_search_operation(
    operation: &str,
    search_id: Uuid,
    external_search_id: Option<&str>,
    status: &str,
    poll_attempts: Option<i32>,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        search_id = %search_id,
        external_search_id = external_search_id,
        status = %status,
        poll_attempts = poll_attempts,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "🔎 SEARCH_OPERATION"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "❌ ERROR"
    );
}
