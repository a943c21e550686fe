//! # Enrichment Stages
//!
//! One module per enrichment kind, each implementing the uniform
//! [`StageModule`] contract. Stage modules own no scheduling logic: the
//! pipeline orchestrator sequences them, and bulk stages hand fan-out to the
//! sub-batch manager. Ordering is fixed because later stages consume fields
//! produced earlier: classification writes `cleaned_name`/`payee_type`,
//! merchant match only processes business payees, prediction consumes the
//! merchant output.

pub mod address_validation;
pub mod classification;
pub mod merchant_match;
pub mod payment_prediction;
pub mod supplier_match;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use uuid::Uuid;

use crate::config::StageToggles;
use crate::error::{EnrichmentError, Result};

pub use address_validation::AddressValidationStage;
pub use classification::ClassificationStage;
pub use merchant_match::MerchantMatchStage;
pub use payment_prediction::PaymentPredictionStage;
pub use supplier_match::SupplierMatchStage;

/// The five enrichment stages in their fixed pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Classification,
    SupplierMatch,
    AddressValidation,
    MerchantMatch,
    PaymentPrediction,
}

impl StageKind {
    /// Position in the fixed pipeline order, 1-based.
    pub fn order(&self) -> u8 {
        match self {
            Self::Classification => 1,
            Self::SupplierMatch => 2,
            Self::AddressValidation => 3,
            Self::MerchantMatch => 4,
            Self::PaymentPrediction => 5,
        }
    }

    /// All stages in execution order.
    pub fn ordered() -> [StageKind; 5] {
        [
            Self::Classification,
            Self::SupplierMatch,
            Self::AddressValidation,
            Self::MerchantMatch,
            Self::PaymentPrediction,
        ]
    }

    /// Whether a failure of this stage must abort the rest of the pipeline.
    /// Classification is the only hard prerequisite: every downstream stage
    /// reads the fields it produces.
    pub fn is_hard_prerequisite(&self) -> bool {
        matches!(self, Self::Classification)
    }

    /// Human-readable label for progress messages.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Classification => "Identity classification",
            Self::SupplierMatch => "Supplier network matching",
            Self::AddressValidation => "Address validation",
            Self::MerchantMatch => "Merchant network matching",
            Self::PaymentPrediction => "Payment method prediction",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Classification => write!(f, "classification"),
            Self::SupplierMatch => write!(f, "supplier_match"),
            Self::AddressValidation => write!(f, "address_validation"),
            Self::MerchantMatch => write!(f, "merchant_match"),
            Self::PaymentPrediction => write!(f, "payment_prediction"),
        }
    }
}

impl std::str::FromStr for StageKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "classification" => Ok(Self::Classification),
            "supplier_match" => Ok(Self::SupplierMatch),
            "address_validation" => Ok(Self::AddressValidation),
            "merchant_match" => Ok(Self::MerchantMatch),
            "payment_prediction" => Ok(Self::PaymentPrediction),
            _ => Err(format!("Invalid stage kind: {s}")),
        }
    }
}

/// Outcome of one stage execution over a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StageOutcome {
    /// The stage ran; summary is the human-readable progress message.
    Completed {
        summary: String,
        processed: u32,
        failed: u32,
    },
    /// Nothing to do (no eligible records).
    Skipped { reason: String },
}

/// Uniform contract every enrichment stage implements.
#[async_trait]
pub trait StageModule: Send + Sync {
    fn kind(&self) -> StageKind;

    async fn execute(&self, batch_id: Uuid, toggles: &StageToggles) -> Result<StageOutcome>;
}

/// Run `operation` and retry it on transient service errors, up to
/// `attempts` extra tries. Any other error, and transient errors past the
/// budget, propagate to the caller.
pub(crate) async fn with_transient_retry<T, F, Fut>(attempts: u32, operation: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut tries_left = attempts;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && tries_left > 0 => {
                tries_left -= 1;
                tracing::debug!(error = %err, tries_left, "retrying transient service error");
            }
            Err(err) => return Err(err),
        }
    }
}

/// Extract a required string field from a service response payload.
pub(crate) fn response_str(payload: &serde_json::Value, field: &str) -> Result<String> {
    payload
        .get(field)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| {
            EnrichmentError::TerminalService(format!("service response missing `{field}`"))
        })
}
