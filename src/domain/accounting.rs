use crate::error::FieldOpsError;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// The accounting entities mirrored between the local ledger and Xero.
///
/// `ALL` lists them in dependency order: contacts and items are referenced by
/// documents, and payments reference invoices or bills, so syncing in this
/// order lets each pass resolve the links the next one needs.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Contact,
    Item,
    Invoice,
    Bill,
    CreditNote,
    PurchaseOrder,
    BankTransaction,
    Expense,
    Payment,
}

impl EntityKind {
    pub const ALL: [EntityKind; 9] = [
        EntityKind::Contact,
        EntityKind::Item,
        EntityKind::Invoice,
        EntityKind::Bill,
        EntityKind::CreditNote,
        EntityKind::PurchaseOrder,
        EntityKind::BankTransaction,
        EntityKind::Expense,
        EntityKind::Payment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Contact => "contact",
            EntityKind::Item => "item",
            EntityKind::Invoice => "invoice",
            EntityKind::Bill => "bill",
            EntityKind::CreditNote => "credit_note",
            EntityKind::PurchaseOrder => "purchase_order",
            EntityKind::BankTransaction => "bank_transaction",
            EntityKind::Expense => "expense",
            EntityKind::Payment => "payment",
        }
    }

    /// Name of the Xero collection, used both as URL segment and JSON envelope key.
    pub fn collection(&self) -> &'static str {
        match self {
            EntityKind::Contact => "Contacts",
            EntityKind::Item => "Items",
            EntityKind::Invoice | EntityKind::Bill => "Invoices",
            EntityKind::CreditNote => "CreditNotes",
            EntityKind::PurchaseOrder => "PurchaseOrders",
            EntityKind::BankTransaction | EntityKind::Expense => "BankTransactions",
            EntityKind::Payment => "Payments",
        }
    }

    pub fn id_field(&self) -> &'static str {
        match self {
            EntityKind::Contact => "ContactID",
            EntityKind::Item => "ItemID",
            EntityKind::Invoice | EntityKind::Bill => "InvoiceID",
            EntityKind::CreditNote => "CreditNoteID",
            EntityKind::PurchaseOrder => "PurchaseOrderID",
            EntityKind::BankTransaction | EntityKind::Expense => "BankTransactionID",
            EntityKind::Payment => "PaymentID",
        }
    }

    /// Human-facing identifier used to match unlinked local records.
    pub fn reference_field(&self) -> &'static str {
        match self {
            EntityKind::Contact => "Name",
            EntityKind::Item => "Code",
            EntityKind::Invoice | EntityKind::Bill => "InvoiceNumber",
            EntityKind::CreditNote => "CreditNoteNumber",
            EntityKind::PurchaseOrder => "PurchaseOrderNumber",
            EntityKind::BankTransaction | EntityKind::Expense | EntityKind::Payment => {
                "Reference"
            }
        }
    }

    pub fn total_field(&self) -> Option<&'static str> {
        match self {
            EntityKind::Contact | EntityKind::Item => None,
            EntityKind::Payment => Some("Amount"),
            _ => Some("Total"),
        }
    }

    /// Xero `Type` code for kinds that share a collection or carry a direction.
    pub fn type_code(&self) -> Option<&'static str> {
        match self {
            EntityKind::Invoice => Some("ACCREC"),
            EntityKind::Bill => Some("ACCPAY"),
            EntityKind::CreditNote => Some("ACCRECCREDIT"),
            EntityKind::BankTransaction => Some("RECEIVE"),
            EntityKind::Expense => Some("SPEND"),
            _ => None,
        }
    }

    /// Kinds stored in the same Xero collection as another kind, told apart by `Type`.
    pub fn shares_collection(&self) -> bool {
        matches!(
            self,
            EntityKind::Invoice | EntityKind::Bill | EntityKind::BankTransaction | EntityKind::Expense
        )
    }

    /// Xero rejects updates to payments; they can only be created or deleted.
    pub fn supports_update(&self) -> bool {
        !matches!(self, EntityKind::Payment)
    }

    /// Whether records of this kind reference a contact.
    pub fn has_contact(&self) -> bool {
        !matches!(self, EntityKind::Contact | EntityKind::Item | EntityKind::Payment)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = FieldOpsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| FieldOpsError::ValidationError(format!("Unknown entity kind: {s}")))
    }
}

/// A local copy of an accounting entity and its link to Xero.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct LedgerRecord {
    pub id: Uuid,
    pub kind: EntityKind,
    /// Xero identifier, `None` until the record has been pushed or linked.
    pub remote_id: Option<String>,
    pub reference: Option<String>,
    pub contact_id: Option<Uuid>,
    pub contact_remote_id: Option<String>,
    /// Invoice or bill a payment applies to.
    pub parent_id: Option<Uuid>,
    pub parent_remote_id: Option<String>,
    pub total: Option<Decimal>,
    pub status: Option<String>,
    pub updated_at: DateTime<Utc>,
    /// Set when the record changed locally and Xero has not seen the change.
    pub dirty: bool,
    /// Remaining Xero fields (line items, dates, addresses) kept verbatim.
    pub payload: serde_json::Value,
}

impl LedgerRecord {
    pub fn new(kind: EntityKind, reference: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            remote_id: None,
            reference: Some(reference.into()),
            contact_id: None,
            contact_remote_id: None,
            parent_id: None,
            parent_remote_id: None,
            total: None,
            status: None,
            updated_at: Utc::now(),
            dirty: true,
            payload: serde_json::Value::Object(Default::default()),
        }
    }

    pub fn is_linked(&self) -> bool {
        self.remote_id.is_some()
    }

    pub fn needs_push(&self) -> bool {
        !self.is_linked() || self.dirty
    }

    /// Records a local edit so the next sync pushes it.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
        self.dirty = true;
    }

    pub fn mark_synced(&mut self, remote_id: String) {
        self.remote_id = Some(remote_id);
        self.dirty = false;
    }
}

/// OAuth2 credentials for one connected Xero organisation.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct TokenSet {
    pub access_token: String,
    /// Single use: Xero rotates it on every refresh.
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub tenant_id: Option<String>,
}

impl TokenSet {
    pub fn expires_within(&self, margin: Duration, now: DateTime<Utc>) -> bool {
        self.expires_at - margin <= now
    }
}

/// Outcome of one bidirectional pass over a single entity kind.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct SyncReport {
    pub kind: EntityKind,
    pub pulled_created: usize,
    pub pulled_updated: usize,
    pub linked: usize,
    pub pushed_created: usize,
    pub pushed_updated: usize,
    pub skipped: usize,
    pub failures: Vec<String>,
}

impl SyncReport {
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            pulled_created: 0,
            pulled_updated: 0,
            linked: 0,
            pushed_created: 0,
            pushed_updated: 0,
            skipped: 0,
            failures: Vec::new(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}
