//! Conversion between Xero JSON documents and [`LedgerRecord`]s.

use crate::domain::accounting::{EntityKind, LedgerRecord};
use crate::error::{FieldOpsError, Result};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde_json::{Map, Value, json};
use std::str::FromStr;
use uuid::Uuid;

static MS_DATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^/Date\((-?\d+)([+-]\d{4})?\)/$").unwrap());

const UPDATED_FIELD: &str = "UpdatedDateUTC";

/// Parses Xero timestamps: the legacy `/Date(1573755038314+0000)/` form,
/// RFC 3339, or a naive ISO-8601 value taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Some(caps) = MS_DATE.captures(raw) {
        let millis: i64 = caps[1].parse().ok()?;
        return Utc.timestamp_millis_opt(millis).single();
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Reads a money value sent either as a JSON number or a string.
pub fn decimal_of(value: &Value) -> Option<Decimal> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return None,
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}

fn text(value: &Value, field: &str) -> Option<String> {
    value
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn nested_id(value: &Value, object: &str, field: &str) -> Option<String> {
    value.get(object).and_then(|inner| text(inner, field))
}

/// Decides which local kind a document from a shared collection belongs to.
pub fn kind_of_remote(value: &Value) -> EntityKind {
    match value.get("Type").and_then(Value::as_str) {
        Some("ACCPAY") => EntityKind::Bill,
        Some("ACCREC") => EntityKind::Invoice,
        Some("ACCRECCREDIT") | Some("ACCPAYCREDIT") => EntityKind::CreditNote,
        Some("SPEND") => EntityKind::Expense,
        _ => EntityKind::BankTransaction,
    }
}

/// Builds a clean ledger record from a Xero document. The record gets a fresh
/// local id; callers merging into an existing record keep their own.
pub fn from_remote(kind: EntityKind, value: &Value) -> Result<LedgerRecord> {
    let remote_id = text(value, kind.id_field()).ok_or_else(|| {
        FieldOpsError::ValidationError(format!("{kind} without {}", kind.id_field()))
    })?;

    let contact_remote_id = if kind.has_contact() {
        nested_id(value, "Contact", "ContactID")
    } else {
        None
    };
    let parent_remote_id = if kind == EntityKind::Payment {
        nested_id(value, "Invoice", "InvoiceID")
    } else {
        None
    };
    let status = text(value, "Status").or_else(|| text(value, "ContactStatus"));
    let updated_at = text(value, UPDATED_FIELD)
        .and_then(|raw| parse_timestamp(&raw))
        .unwrap_or_else(Utc::now);

    Ok(LedgerRecord {
        id: Uuid::new_v4(),
        kind,
        remote_id: Some(remote_id),
        reference: text(value, kind.reference_field()),
        contact_id: None,
        contact_remote_id,
        parent_id: None,
        parent_remote_id,
        total: kind
            .total_field()
            .and_then(|field| value.get(field))
            .and_then(decimal_of),
        status,
        updated_at,
        dirty: false,
        payload: value.clone(),
    })
}

/// Renders a ledger record as the JSON body Xero expects for create or update.
pub fn to_remote(record: &LedgerRecord) -> Value {
    let kind = record.kind;
    let mut body = match &record.payload {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    body.remove(UPDATED_FIELD);

    match &record.remote_id {
        Some(id) => body.insert(kind.id_field().to_string(), json!(id)),
        None => body.remove(kind.id_field()),
    };
    if let Some(reference) = &record.reference {
        body.insert(kind.reference_field().to_string(), json!(reference));
    }
    if let Some(code) = kind.type_code() {
        if kind.shares_collection() {
            body.insert("Type".to_string(), json!(code));
        } else {
            body.entry("Type").or_insert_with(|| json!(code));
        }
    }
    if let Some(contact) = &record.contact_remote_id {
        body.insert("Contact".to_string(), json!({ "ContactID": contact }));
    }
    if kind == EntityKind::Payment {
        if let Some(parent) = &record.parent_remote_id {
            body.insert("Invoice".to_string(), json!({ "InvoiceID": parent }));
        }
        if let Some(total) = record.total {
            body.insert("Amount".to_string(), json!(total.to_f64()));
        }
    }

    Value::Object(body)
}
