use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identity classification assigned to a payee by the classification stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayeeType {
    Business,
    Individual,
    Government,
    Unknown,
}

impl fmt::Display for PayeeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Business => write!(f, "business"),
            Self::Individual => write!(f, "individual"),
            Self::Government => write!(f, "government"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

impl std::str::FromStr for PayeeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "business" => Ok(Self::Business),
            "individual" => Ok(Self::Individual),
            "government" => Ok(Self::Government),
            "unknown" => Ok(Self::Unknown),
            _ => Err(format!("Invalid payee type: {s}")),
        }
    }
}

/// Accepted supplier-network match written by the supplier-match stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupplierMatch {
    pub supplier_id: String,
    pub confidence: f64,
}

/// PayeeRecord is the enrichment subject. The classification stage writes
/// `cleaned_name`/`payee_type`, which every downstream stage reads; later
/// stages each own one result field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayeeRecord {
    pub id: Uuid,
    pub batch_id: Uuid,
    pub original_name: String,
    pub address: Option<String>,
    pub cleaned_name: Option<String>,
    pub payee_type: Option<PayeeType>,
    pub supplier_match: Option<SupplierMatch>,
    pub validated_address: Option<String>,
    pub merchant_category: Option<String>,
    pub predicted_payment_method: Option<String>,
    /// Most recent per-record enrichment failure, for diagnosis.
    pub enrichment_error: Option<String>,
}

impl PayeeRecord {
    pub fn new(batch_id: Uuid, original_name: &str, address: Option<&str>) -> Self {
        Self {
            id: Uuid::new_v4(),
            batch_id,
            original_name: original_name.to_string(),
            address: address.map(str::to_string),
            cleaned_name: None,
            payee_type: None,
            supplier_match: None,
            validated_address: None,
            merchant_category: None,
            predicted_payment_method: None,
            enrichment_error: None,
        }
    }

    /// Whether the classification stage has produced the fields downstream
    /// stages depend on.
    pub fn is_classified(&self) -> bool {
        self.cleaned_name.is_some() && self.payee_type.is_some()
    }

    pub fn is_business(&self) -> bool {
        self.payee_type == Some(PayeeType::Business)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_gate() {
        let mut record = PayeeRecord::new(Uuid::new_v4(), "Acme Supply Co.", None);
        assert!(!record.is_classified());
        record.cleaned_name = Some("ACME SUPPLY".into());
        record.payee_type = Some(PayeeType::Business);
        assert!(record.is_classified());
        assert!(record.is_business());
    }
}
