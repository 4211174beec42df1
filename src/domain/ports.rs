use super::accounting::{EntityKind, LedgerRecord, TokenSet};
use super::document::Recognition;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use image::GrayImage;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

/// Local system of record for mirrored accounting entities.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn store(&self, record: LedgerRecord) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<LedgerRecord>>;
    async fn find_by_remote_id(&self, kind: EntityKind, remote_id: &str)
    -> Result<Option<LedgerRecord>>;
    /// Looks up an unlinked record of `kind` carrying `reference`.
    async fn find_unlinked_by_reference(
        &self,
        kind: EntityKind,
        reference: &str,
    ) -> Result<Option<LedgerRecord>>;
    async fn all(&self, kind: EntityKind) -> Result<Vec<LedgerRecord>>;
    async fn checkpoint(&self, kind: EntityKind) -> Result<Option<DateTime<Utc>>>;
    async fn set_checkpoint(&self, kind: EntityKind, at: DateTime<Utc>) -> Result<()>;
}

/// Remote accounting system (Xero) addressed by entity kind.
#[async_trait]
pub trait AccountingApi: Send + Sync {
    async fn list(&self, kind: EntityKind, modified_since: Option<DateTime<Utc>>)
    -> Result<Vec<Value>>;
    async fn fetch(&self, kind: EntityKind, remote_id: &str) -> Result<Option<Value>>;
    /// Creates the entity, or updates it when the payload carries the id field.
    async fn upsert(&self, kind: EntityKind, payload: Value) -> Result<Value>;
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn load(&self) -> Result<Option<TokenSet>>;
    async fn save(&self, tokens: TokenSet) -> Result<()>;
    async fn clear(&self) -> Result<()>;
}

#[async_trait]
pub trait TextRecognizer: Send + Sync {
    async fn recognize(&self, image: &GrayImage) -> Result<Recognition>;
    async fn is_available(&self) -> bool;
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct StoredObject {
    pub key: String,
    pub size: u64,
    pub content_type: Option<String>,
}

/// Blob storage for uploaded field documentation.
#[async_trait]
pub trait DocumentStorage: Send + Sync {
    async fn put(&self, key: &str, bytes: &[u8], content_type: Option<&str>)
    -> Result<StoredObject>;
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn delete(&self, key: &str) -> Result<bool>;
}

pub type SharedLedgerStore = Arc<dyn LedgerStore>;
pub type SharedTokenStore = Arc<dyn TokenStore>;
pub type SharedAccountingApi = Arc<dyn AccountingApi>;
pub type SharedRecognizer = Arc<dyn TextRecognizer>;
pub type SharedDocumentStorage = Arc<dyn DocumentStorage>;
