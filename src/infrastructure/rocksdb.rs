use crate::domain::accounting::{EntityKind, LedgerRecord, TokenSet};
use crate::domain::ports::{LedgerStore, TokenStore};
use crate::error::{FieldOpsError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

/// Column Family for ledger records, keyed by local id.
pub const CF_LEDGER: &str = "ledger";
/// Column Family for per-kind sync checkpoints, keyed by kind name.
pub const CF_CHECKPOINTS: &str = "checkpoints";
/// Column Family holding the single Xero token set.
pub const CF_TOKENS: &str = "tokens";
/// Index Column Family: `<kind>\0<remote id>` to local id.
pub const CF_REMOTE_IDS: &str = "remote_ids";
/// Index Column Family over unlinked records: `<kind>\0<reference>\0<local id>`.
pub const CF_REFERENCES: &str = "references";

const TOKEN_KEY: &[u8] = b"xero";

/// A persistent store implementation using RocksDB.
///
/// Serves as both the ledger and the token store, each concern in its own
/// Column Family. Values are JSON documents.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path, creating the
    /// column families on first use.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let families = [CF_LEDGER, CF_CHECKPOINTS, CF_TOKENS, CF_REMOTE_IDS, CF_REFERENCES]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()));

        let db = DB::open_cf_descriptors(&opts, path, families)?;

        Ok(Self { db: Arc::new(db) })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| FieldOpsError::StorageError(format!("{name} column family not found")))
    }

    fn put_json<T: Serialize>(&self, family: &str, key: &[u8], value: &T) -> Result<()> {
        let cf = self.cf(family)?;
        let bytes = serde_json::to_vec(value)?;
        self.db.put_cf(cf, key, bytes)?;
        Ok(())
    }

    fn get_json<T: DeserializeOwned>(&self, family: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(family)?;
        match self.db.get_cf(cf, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn index_keys(record: &LedgerRecord) -> (Option<Vec<u8>>, Option<Vec<u8>>) {
        let remote = record
            .remote_id
            .as_deref()
            .map(|remote_id| index_key(&[record.kind.as_str(), remote_id]));
        let reference = match (&record.remote_id, &record.reference) {
            (None, Some(reference)) => {
                let mut key = index_key(&[record.kind.as_str(), reference]);
                key.push(0);
                key.extend_from_slice(record.id.as_bytes());
                Some(key)
            }
            _ => None,
        };
        (remote, reference)
    }

    /// Writes the record and moves its index entries. New entries go in
    /// before the record, stale ones come out after it. Lookups re-check the
    /// record an entry points at.
    fn write_record(&self, record: &LedgerRecord) -> Result<()> {
        let remote_ids = self.cf(CF_REMOTE_IDS)?;
        let references = self.cf(CF_REFERENCES)?;

        let stale = self
            .get_json::<LedgerRecord>(CF_LEDGER, record.id.as_bytes())?
            .map(|previous| Self::index_keys(&previous))
            .unwrap_or_default();
        let (remote, reference) = Self::index_keys(record);

        if let Some(key) = &remote {
            self.db.put_cf(remote_ids, key, record.id.as_bytes())?;
        }
        if let Some(key) = &reference {
            self.db.put_cf(references, key, b"")?;
        }
        self.put_json(CF_LEDGER, record.id.as_bytes(), record)?;

        if let Some(key) = stale.0.filter(|key| Some(key) != remote.as_ref()) {
            self.db.delete_cf(remote_ids, key)?;
        }
        if let Some(key) = stale.1.filter(|key| Some(key) != reference.as_ref()) {
            self.db.delete_cf(references, key)?;
        }
        Ok(())
    }

    fn scan_ledger(&self, mut keep: impl FnMut(&LedgerRecord) -> bool) -> Result<Vec<LedgerRecord>> {
        let cf = self.cf(CF_LEDGER)?;
        let mut records = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            let record: LedgerRecord = serde_json::from_slice(&value)?;
            if keep(&record) {
                records.push(record);
            }
        }
        Ok(records)
    }
}

/// Joins index key parts with NUL, which never appears in Xero ids or references.
fn index_key(parts: &[&str]) -> Vec<u8> {
    parts.join("\0").into_bytes()
}

#[async_trait]
impl LedgerStore for RocksDBStore {
    async fn store(&self, record: LedgerRecord) -> Result<()> {
        self.write_record(&record)
    }

    async fn get(&self, id: Uuid) -> Result<Option<LedgerRecord>> {
        self.get_json(CF_LEDGER, id.as_bytes())
    }

    async fn find_by_remote_id(
        &self,
        kind: EntityKind,
        remote_id: &str,
    ) -> Result<Option<LedgerRecord>> {
        let cf = self.cf(CF_REMOTE_IDS)?;
        let Some(id) = self.db.get_cf(cf, index_key(&[kind.as_str(), remote_id]))? else {
            return Ok(None);
        };
        let id = Uuid::from_slice(&id)
            .map_err(|e| FieldOpsError::StorageError(format!("corrupt remote id index: {e}")))?;
        let record: Option<LedgerRecord> = self.get_json(CF_LEDGER, id.as_bytes())?;
        Ok(record.filter(|r| r.kind == kind && r.remote_id.as_deref() == Some(remote_id)))
    }

    async fn find_unlinked_by_reference(
        &self,
        kind: EntityKind,
        reference: &str,
    ) -> Result<Option<LedgerRecord>> {
        let cf = self.cf(CF_REFERENCES)?;
        let mut prefix = index_key(&[kind.as_str(), reference]);
        prefix.push(0);

        for item in self.db.iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward)) {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            let Ok(id) = Uuid::from_slice(&key[prefix.len()..]) else {
                continue;
            };
            if let Some(record) = self.get_json::<LedgerRecord>(CF_LEDGER, id.as_bytes())?
                && !record.is_linked()
                && record.reference.as_deref() == Some(reference)
            {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    async fn all(&self, kind: EntityKind) -> Result<Vec<LedgerRecord>> {
        let mut records = self.scan_ledger(|r| r.kind == kind)?;
        records.sort_by_key(|r| r.updated_at);
        Ok(records)
    }

    async fn checkpoint(&self, kind: EntityKind) -> Result<Option<DateTime<Utc>>> {
        self.get_json(CF_CHECKPOINTS, kind.as_str().as_bytes())
    }

    async fn set_checkpoint(&self, kind: EntityKind, at: DateTime<Utc>) -> Result<()> {
        self.put_json(CF_CHECKPOINTS, kind.as_str().as_bytes(), &at)
    }
}

#[async_trait]
impl TokenStore for RocksDBStore {
    async fn load(&self) -> Result<Option<TokenSet>> {
        self.get_json(CF_TOKENS, TOKEN_KEY)
    }

    async fn save(&self, tokens: TokenSet) -> Result<()> {
        self.put_json(CF_TOKENS, TOKEN_KEY, &tokens)
    }

    async fn clear(&self) -> Result<()> {
        let cf = self.cf(CF_TOKENS)?;
        self.db.delete_cf(cf, TOKEN_KEY)?;
        Ok(())
    }
}
