use crate::domain::accounting::{EntityKind, LedgerRecord, TokenSet};
use crate::domain::ports::{LedgerStore, TokenStore};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Ledger {
    records: HashMap<Uuid, LedgerRecord>,
    checkpoints: HashMap<EntityKind, DateTime<Utc>>,
}

/// A thread-safe in-memory ledger.
///
/// Uses `Arc<RwLock<..>>` so clones share the same records. Lookups by remote
/// id or reference scan the map, which is fine for tests and small tenants.
#[derive(Default, Clone)]
pub struct InMemoryLedgerStore {
    inner: Arc<RwLock<Ledger>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn store(&self, record: LedgerRecord) -> Result<()> {
        let mut ledger = self.inner.write().await;
        ledger.records.insert(record.id, record);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<LedgerRecord>> {
        let ledger = self.inner.read().await;
        Ok(ledger.records.get(&id).cloned())
    }

    async fn find_by_remote_id(
        &self,
        kind: EntityKind,
        remote_id: &str,
    ) -> Result<Option<LedgerRecord>> {
        let ledger = self.inner.read().await;
        Ok(ledger
            .records
            .values()
            .find(|r| r.kind == kind && r.remote_id.as_deref() == Some(remote_id))
            .cloned())
    }

    async fn find_unlinked_by_reference(
        &self,
        kind: EntityKind,
        reference: &str,
    ) -> Result<Option<LedgerRecord>> {
        let ledger = self.inner.read().await;
        Ok(ledger
            .records
            .values()
            .find(|r| {
                r.kind == kind && !r.is_linked() && r.reference.as_deref() == Some(reference)
            })
            .cloned())
    }

    async fn all(&self, kind: EntityKind) -> Result<Vec<LedgerRecord>> {
        let ledger = self.inner.read().await;
        let mut records: Vec<LedgerRecord> = ledger
            .records
            .values()
            .filter(|r| r.kind == kind)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.updated_at);
        Ok(records)
    }

    async fn checkpoint(&self, kind: EntityKind) -> Result<Option<DateTime<Utc>>> {
        let ledger = self.inner.read().await;
        Ok(ledger.checkpoints.get(&kind).copied())
    }

    async fn set_checkpoint(&self, kind: EntityKind, at: DateTime<Utc>) -> Result<()> {
        let mut ledger = self.inner.write().await;
        ledger.checkpoints.insert(kind, at);
        Ok(())
    }
}

/// Token storage that forgets everything on restart.
#[derive(Default, Clone)]
pub struct InMemoryTokenStore {
    tokens: Arc<RwLock<Option<TokenSet>>>,
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tokens(tokens: TokenSet) -> Self {
        Self {
            tokens: Arc::new(RwLock::new(Some(tokens))),
        }
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn load(&self) -> Result<Option<TokenSet>> {
        Ok(self.tokens.read().await.clone())
    }

    async fn save(&self, tokens: TokenSet) -> Result<()> {
        *self.tokens.write().await = Some(tokens);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        *self.tokens.write().await = None;
        Ok(())
    }
}
