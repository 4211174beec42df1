use crate::error::FieldOpsError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A strictly positive monetary amount read off a document.
///
/// Zero and negative values are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self, FieldOpsError> {
        if value > Decimal::ZERO {
            Ok(Self(value))
        } else {
            Err(FieldOpsError::ValidationError(
                "Amount must be positive".to_string(),
            ))
        }
    }

    /// Parses an OCR'd figure such as `1,234.50` or `$99.00`.
    pub fn parse(raw: &str) -> Result<Self, FieldOpsError> {
        let cleaned: String = raw
            .chars()
            .filter(|c| *c != ',' && *c != '$')
            .collect();
        let value = cleaned
            .parse::<Decimal>()
            .map_err(|e| FieldOpsError::ValidationError(format!("Invalid amount {raw:?}: {e}")))?;
        Self::new(value)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = FieldOpsError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Default, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Invoice,
    Receipt,
    PurchaseOrder,
    Bill,
    #[default]
    Unknown,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Invoice => "invoice",
            DocumentType::Receipt => "receipt",
            DocumentType::PurchaseOrder => "purchase_order",
            DocumentType::Bill => "bill",
            DocumentType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct LineItem {
    pub description: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub quantity: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub unit_price: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
}

/// Structured fields pulled out of recognised document text.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Default)]
pub struct ExtractedData {
    pub document_number: Option<String>,
    /// Calendar date formatted `YYYY-MM-DD`.
    pub date: Option<String>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub amount: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub total_amount: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub tax_amount: Option<Decimal>,
    pub vendor_name: Option<String>,
    pub vendor_address: Option<String>,
    #[serde(default)]
    pub line_items: Vec<LineItem>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct ProcessResponse {
    pub success: bool,
    pub confidence: f64,
    pub document_type: DocumentType,
    pub extracted_data: ExtractedData,
    pub raw_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub tesseract_available: bool,
}

/// Raw output of a text recognition pass.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Recognition {
    pub text: String,
    /// Mean word confidence on a 0..=1 scale.
    pub confidence: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_amount_validation() {
        assert!(Amount::new(dec!(1.0)).is_ok());
        assert!(matches!(
            Amount::new(dec!(0.0)),
            Err(FieldOpsError::ValidationError(_))
        ));
        assert!(matches!(
            Amount::new(dec!(-1.0)),
            Err(FieldOpsError::ValidationError(_))
        ));
    }

    #[test]
    fn test_amount_parse_strips_grouping() {
        assert_eq!(Amount::parse("1,234.50").unwrap().value(), dec!(1234.50));
        assert_eq!(Amount::parse("$99.00").unwrap().value(), dec!(99.00));
        assert!(Amount::parse(",").is_err());
        assert!(Amount::parse("0.00").is_err());
    }

    #[test]
    fn test_document_type_wire_format() {
        let json = serde_json::to_string(&DocumentType::PurchaseOrder).unwrap();
        assert_eq!(json, "\"purchase_order\"");
        assert_eq!(DocumentType::default(), DocumentType::Unknown);
    }

    #[test]
    fn test_extracted_data_amounts_serialize_as_numbers() {
        let data = ExtractedData {
            total_amount: Some(dec!(12.50)),
            ..Default::default()
        };
        let value = serde_json::to_value(&data).unwrap();
        assert_eq!(value["total_amount"], serde_json::json!(12.5));
        assert!(value["tax_amount"].is_null());
        assert_eq!(value["line_items"], serde_json::json!([]));
    }

    #[test]
    fn test_process_response_omits_missing_error() {
        let response = ProcessResponse {
            success: true,
            confidence: 0.9,
            document_type: DocumentType::Receipt,
            extracted_data: ExtractedData::default(),
            raw_text: "RECEIPT".to_string(),
            error: None,
        };
        let value = serde_json::to_value(&response).unwrap();
        assert!(value.get("error").is_none());
        assert_eq!(value["document_type"], "receipt");
    }
}
