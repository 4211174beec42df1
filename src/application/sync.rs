use crate::domain::accounting::{EntityKind, LedgerRecord, SyncReport};
use crate::domain::ports::{SharedAccountingApi, SharedLedgerStore};
use crate::error::{FieldOpsError, Result};
use crate::infrastructure::xero::mapping;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// What happened to one remote record during a pull.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Applied {
    Created,
    Updated,
    Linked,
    /// The local copy has newer unpushed edits and was left alone.
    Kept,
}

enum Pushed {
    Created(LedgerRecord),
    Updated(LedgerRecord),
    Skipped(&'static str),
}

/// Bidirectional sync between the local ledger and the accounting system.
///
/// Each kind is pulled first, then pushed. Remote changes win over local ones
/// unless the local record is dirty and was edited after the remote copy.
///
/// Passes never overlap: `sync_all`, `sync_kind`, `pull_one` and
/// `create_remote` each hold the engine's lock, so an unlinked record is
/// created remotely at most once.
pub struct SyncEngine {
    store: SharedLedgerStore,
    api: SharedAccountingApi,
    running: Mutex<()>,
}

impl SyncEngine {
    /// Creates an engine mirroring `store` against `api`.
    ///
    /// # Arguments
    ///
    /// * `store` - The local ledger, also holding the per-kind checkpoints.
    /// * `api` - The remote accounting system.
    pub fn new(store: SharedLedgerStore, api: SharedAccountingApi) -> Self {
        Self {
            store,
            api,
            running: Mutex::new(()),
        }
    }

    /// Syncs every kind in dependency order, so contacts exist remotely before
    /// the invoices that reference them are pushed.
    pub async fn sync_all(&self) -> Result<Vec<SyncReport>> {
        let _running = self.running.lock().await;
        let mut reports = Vec::with_capacity(EntityKind::ALL.len());
        for kind in EntityKind::ALL {
            reports.push(self.run_kind(kind).await?);
        }
        Ok(reports)
    }

    /// Remote failures are recorded in the report; only local storage errors abort.
    pub async fn sync_kind(&self, kind: EntityKind) -> Result<SyncReport> {
        let _running = self.running.lock().await;
        self.run_kind(kind).await
    }

    #[instrument(skip(self))]
    async fn run_kind(&self, kind: EntityKind) -> Result<SyncReport> {
        let mut report = SyncReport::new(kind);
        let started = Utc::now();
        let since = self.store.checkpoint(kind).await?;

        let pulled_cleanly = match self.api.list(kind, since).await {
            Ok(remote) => {
                let mut clean = true;
                for value in remote {
                    match self.apply_remote(kind, &value).await {
                        Ok(Applied::Created) => report.pulled_created += 1,
                        Ok(Applied::Updated) => report.pulled_updated += 1,
                        Ok(Applied::Linked) => report.linked += 1,
                        Ok(Applied::Kept) => report.skipped += 1,
                        Err(e @ FieldOpsError::ValidationError(_)) => {
                            clean = false;
                            report.failures.push(format!("pull: {e}"));
                        }
                        Err(e) => return Err(e),
                    }
                }
                clean
            }
            Err(e) => {
                warn!(error = %e, "pull failed");
                report.failures.push(format!("pull: {e}"));
                false
            }
        };

        for record in self.store.all(kind).await? {
            if !record.needs_push() {
                continue;
            }
            let id = record.id;
            match self.push(record).await {
                Ok(Pushed::Created(record)) => {
                    self.store_pushed(record).await?;
                    report.pushed_created += 1;
                }
                Ok(Pushed::Updated(record)) => {
                    self.store_pushed(record).await?;
                    report.pushed_updated += 1;
                }
                Ok(Pushed::Skipped(reason)) => {
                    debug!(%id, reason, "push skipped");
                    report.skipped += 1;
                }
                Err(e) => {
                    warn!(%id, error = %e, "push failed");
                    report.failures.push(format!("push {id}: {e}"));
                }
            }
        }

        if pulled_cleanly {
            self.store.set_checkpoint(kind, started).await?;
        }

        info!(
            pulled_created = report.pulled_created,
            pulled_updated = report.pulled_updated,
            linked = report.linked,
            pushed_created = report.pushed_created,
            pushed_updated = report.pushed_updated,
            skipped = report.skipped,
            failures = report.failures.len(),
            "sync finished"
        );
        Ok(report)
    }

    /// Fetches a single remote record and applies it. Returns `false` when the
    /// record no longer exists remotely or the local copy was kept.
    #[instrument(skip(self))]
    pub async fn pull_one(&self, kind: EntityKind, remote_id: &str) -> Result<bool> {
        let _running = self.running.lock().await;
        let Some(value) = self.api.fetch(kind, remote_id).await? else {
            debug!("remote record not found");
            return Ok(false);
        };
        let kind = if kind.shares_collection() {
            mapping::kind_of_remote(&value)
        } else {
            kind
        };
        Ok(self.apply_remote(kind, &value).await? != Applied::Kept)
    }

    /// Records a new local entity and creates it remotely. If the remote call
    /// fails the record stays in the ledger, dirty, for the next sync.
    #[instrument(skip(self, record), fields(kind = %record.kind))]
    pub async fn create_remote(&self, mut record: LedgerRecord) -> Result<LedgerRecord> {
        if record.is_linked() {
            return Err(FieldOpsError::InvalidState(format!(
                "{} {} already exists remotely",
                record.kind, record.id
            )));
        }
        let _running = self.running.lock().await;
        record.dirty = true;
        self.store.store(record.clone()).await?;

        match self.push(record).await? {
            Pushed::Created(record) | Pushed::Updated(record) => self.store_pushed(record).await,
            Pushed::Skipped(reason) => Err(FieldOpsError::InvalidState(reason.to_string())),
        }
    }

    /// Stores a pushed record. If the ledger copy was edited while the push
    /// was in flight, the edit is kept and stays dirty; only the remote link
    /// is taken from the push.
    async fn store_pushed(&self, pushed: LedgerRecord) -> Result<LedgerRecord> {
        let record = match self.store.get(pushed.id).await? {
            Some(mut current) if edited_since(&current, pushed.updated_at) => {
                debug!(id = %current.id, "record edited during push, kept dirty");
                current.remote_id = pushed.remote_id;
                current.contact_remote_id = current.contact_remote_id.or(pushed.contact_remote_id);
                current.parent_remote_id = current.parent_remote_id.or(pushed.parent_remote_id);
                current.dirty = true;
                current
            }
            _ => pushed,
        };
        self.store.store(record.clone()).await?;
        Ok(record)
    }

    async fn apply_remote(&self, kind: EntityKind, value: &Value) -> Result<Applied> {
        let mut incoming = mapping::from_remote(kind, value)?;
        let remote_id = incoming.remote_id.clone().unwrap_or_default();

        let (local, applied) = match self.store.find_by_remote_id(kind, &remote_id).await? {
            Some(local) if local.dirty && local.updated_at > incoming.updated_at => {
                return Ok(Applied::Kept);
            }
            Some(local) => (Some(local), Applied::Updated),
            None => match &incoming.reference {
                Some(reference) => match self.store.find_unlinked_by_reference(kind, reference).await? {
                    Some(local) => (Some(local), Applied::Linked),
                    None => (None, Applied::Created),
                },
                None => (None, Applied::Created),
            },
        };

        if let Some(local) = local {
            incoming.id = local.id;
        }
        self.resolve_local_links(&mut incoming).await?;
        self.store.store(incoming).await?;
        Ok(applied)
    }

    async fn resolve_local_links(&self, record: &mut LedgerRecord) -> Result<()> {
        if let Some(contact) = &record.contact_remote_id {
            record.contact_id = self
                .store
                .find_by_remote_id(EntityKind::Contact, contact)
                .await?
                .map(|r| r.id);
        }
        if let Some(parent) = &record.parent_remote_id {
            let mut found = None;
            for kind in [EntityKind::Invoice, EntityKind::Bill] {
                if let Some(r) = self.store.find_by_remote_id(kind, parent).await? {
                    found = Some(r.id);
                    break;
                }
            }
            record.parent_id = found;
        }
        Ok(())
    }

    /// Fills in remote ids of referenced records from the ledger.
    async fn resolve_remote_links(&self, record: &mut LedgerRecord) -> Result<()> {
        if record.contact_remote_id.is_none()
            && let Some(contact_id) = record.contact_id
            && let Some(contact) = self.store.get(contact_id).await?
        {
            record.contact_remote_id = contact.remote_id;
        }
        if record.parent_remote_id.is_none()
            && let Some(parent_id) = record.parent_id
            && let Some(parent) = self.store.get(parent_id).await?
        {
            record.parent_remote_id = parent.remote_id;
        }
        Ok(())
    }

    async fn push(&self, mut record: LedgerRecord) -> Result<Pushed> {
        let kind = record.kind;
        let was_linked = record.is_linked();

        if was_linked && !kind.supports_update() {
            return Ok(Pushed::Skipped("kind cannot be updated remotely"));
        }
        self.resolve_remote_links(&mut record).await?;
        if kind.has_contact() && record.contact_remote_id.is_none() {
            return Ok(Pushed::Skipped("contact not synced yet"));
        }
        if kind == EntityKind::Payment && record.parent_remote_id.is_none() {
            return Ok(Pushed::Skipped("invoice not synced yet"));
        }

        let returned = self.api.upsert(kind, mapping::to_remote(&record)).await?;
        let remote = mapping::from_remote(kind, &returned)?;

        record.remote_id = remote.remote_id;
        record.status = remote.status.or(record.status);
        record.total = remote.total.or(record.total);
        record.payload = remote.payload;
        record.dirty = false;

        Ok(if was_linked {
            Pushed::Updated(record)
        } else {
            Pushed::Created(record)
        })
    }
}

fn edited_since(record: &LedgerRecord, snapshot: DateTime<Utc>) -> bool {
    record.updated_at != snapshot
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{AccountingApi, LedgerStore};
    use crate::infrastructure::in_memory::InMemoryLedgerStore;
    use async_trait::async_trait;
    use chrono::Duration;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    /// Remote side kept in memory; upserts assign sequential ids.
    #[derive(Default)]
    struct FakeAccounting {
        records: Mutex<HashMap<EntityKind, Vec<Value>>>,
        upserts: Mutex<Vec<(EntityKind, Value)>>,
        fail_list: bool,
        reject_upserts: bool,
        upsert_delay: Option<std::time::Duration>,
    }

    impl FakeAccounting {
        fn with(kind: EntityKind, values: Vec<Value>) -> Self {
            let fake = Self::default();
            fake.records.lock().unwrap().insert(kind, values);
            fake
        }

        fn upserts(&self) -> Vec<(EntityKind, Value)> {
            self.upserts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AccountingApi for FakeAccounting {
        async fn list(&self, kind: EntityKind, _since: Option<DateTime<Utc>>) -> Result<Vec<Value>> {
            if self.fail_list {
                return Err(FieldOpsError::RemoteError {
                    status: 503,
                    body: "down".to_string(),
                });
            }
            Ok(self.records.lock().unwrap().get(&kind).cloned().unwrap_or_default())
        }

        async fn fetch(&self, kind: EntityKind, remote_id: &str) -> Result<Option<Value>> {
            let records = self.records.lock().unwrap();
            Ok(records
                .get(&kind)
                .and_then(|values| values.iter().find(|v| v[kind.id_field()] == remote_id))
                .cloned())
        }

        async fn upsert(&self, kind: EntityKind, mut payload: Value) -> Result<Value> {
            if let Some(delay) = self.upsert_delay {
                tokio::time::sleep(delay).await;
            }
            if self.reject_upserts {
                return Err(FieldOpsError::RemoteError {
                    status: 400,
                    body: "ValidationException".to_string(),
                });
            }
            let mut upserts = self.upserts.lock().unwrap();
            if payload.get(kind.id_field()).is_none() {
                payload[kind.id_field()] = json!(format!("{}-{}", kind, upserts.len() + 1));
            }
            payload["Status"] = json!("AUTHORISED");
            upserts.push((kind, payload.clone()));
            Ok(payload)
        }
    }

    fn engine(store: &InMemoryLedgerStore, api: FakeAccounting) -> (SyncEngine, Arc<FakeAccounting>) {
        let api = Arc::new(api);
        (SyncEngine::new(Arc::new(store.clone()), api.clone()), api)
    }

    #[tokio::test]
    async fn test_pull_inserts_links_and_updates() {
        let store = InMemoryLedgerStore::new();
        let unlinked = LedgerRecord::new(EntityKind::Contact, "Acme Electrical");
        let mut linked = LedgerRecord::new(EntityKind::Contact, "Old Name");
        linked.mark_synced("c-2".to_string());
        store.store(unlinked.clone()).await.unwrap();
        store.store(linked.clone()).await.unwrap();

        let api = FakeAccounting::with(
            EntityKind::Contact,
            vec![
                json!({ "ContactID": "c-1", "Name": "Acme Electrical" }),
                json!({ "ContactID": "c-2", "Name": "New Name" }),
                json!({ "ContactID": "c-3", "Name": "Brand New Ltd" }),
            ],
        );
        let (engine, _) = engine(&store, api);

        let report = engine.sync_kind(EntityKind::Contact).await.unwrap();
        assert_eq!(report.linked, 1);
        assert_eq!(report.pulled_updated, 1);
        assert_eq!(report.pulled_created, 1);
        assert!(report.is_clean());

        let relinked = store.get(unlinked.id).await.unwrap().unwrap();
        assert_eq!(relinked.remote_id.as_deref(), Some("c-1"));
        assert!(!relinked.dirty);

        let renamed = store.get(linked.id).await.unwrap().unwrap();
        assert_eq!(renamed.reference.as_deref(), Some("New Name"));
        assert_eq!(store.all(EntityKind::Contact).await.unwrap().len(), 3);
        assert!(store.checkpoint(EntityKind::Contact).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_newer_local_edit_survives_pull() {
        let store = InMemoryLedgerStore::new();
        let mut local = LedgerRecord::new(EntityKind::Contact, "Edited Locally");
        local.mark_synced("c-1".to_string());
        local.touch();
        store.store(local.clone()).await.unwrap();

        let stale = (Utc::now() - Duration::days(1)).to_rfc3339();
        let api = FakeAccounting::with(
            EntityKind::Contact,
            vec![json!({ "ContactID": "c-1", "Name": "Remote Name", "UpdatedDateUTC": stale })],
        );
        let (engine, api) = engine(&store, api);

        let report = engine.sync_kind(EntityKind::Contact).await.unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.pushed_updated, 1);

        let (_, pushed) = &api.upserts()[0];
        assert_eq!(pushed["Name"], "Edited Locally");
        assert_eq!(pushed["ContactID"], "c-1");
        assert!(!store.get(local.id).await.unwrap().unwrap().dirty);
    }

    #[tokio::test]
    async fn test_push_waits_for_contact() {
        let store = InMemoryLedgerStore::new();
        let contact = LedgerRecord::new(EntityKind::Contact, "Acme Electrical");
        let mut invoice = LedgerRecord::new(EntityKind::Invoice, "INV-0042");
        invoice.contact_id = Some(contact.id);
        store.store(contact.clone()).await.unwrap();
        store.store(invoice.clone()).await.unwrap();

        let (engine, api) = engine(&store, FakeAccounting::default());

        // the invoice goes first here on purpose: its contact has no remote id yet
        let report = engine.sync_kind(EntityKind::Invoice).await.unwrap();
        assert_eq!(report.skipped, 1);
        assert!(api.upserts().is_empty());

        let reports = engine.sync_all().await.unwrap();
        assert_eq!(reports.len(), EntityKind::ALL.len());
        assert_eq!(reports[0].pushed_created, 1);

        let pushed = api.upserts();
        assert_eq!(pushed.len(), 2);
        assert_eq!(pushed[1].0, EntityKind::Invoice);
        assert_eq!(pushed[1].1["Contact"]["ContactID"], "contact-1");
        assert_eq!(pushed[1].1["Type"], "ACCREC");

        let synced = store.get(invoice.id).await.unwrap().unwrap();
        assert!(synced.is_linked());
        assert_eq!(synced.status.as_deref(), Some("AUTHORISED"));
    }

    #[tokio::test]
    async fn test_payments_are_never_updated() {
        let store = InMemoryLedgerStore::new();
        let mut invoice = LedgerRecord::new(EntityKind::Invoice, "INV-1");
        invoice.contact_remote_id = Some("c-1".to_string());
        invoice.mark_synced("inv-1".to_string());

        let mut waiting = LedgerRecord::new(EntityKind::Payment, "PAY-1");
        waiting.total = Some(dec!(50));
        let mut ready = LedgerRecord::new(EntityKind::Payment, "PAY-2");
        ready.parent_id = Some(invoice.id);
        ready.total = Some(dec!(75));
        let mut edited = LedgerRecord::new(EntityKind::Payment, "PAY-3");
        edited.mark_synced("pay-3".to_string());
        edited.touch();

        for record in [&invoice, &waiting, &ready, &edited] {
            store.store(record.clone()).await.unwrap();
        }
        let (engine, api) = engine(&store, FakeAccounting::default());

        let report = engine.sync_kind(EntityKind::Payment).await.unwrap();
        assert_eq!(report.pushed_created, 1);
        assert_eq!(report.skipped, 2);

        let pushed = api.upserts();
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0].1["Invoice"]["InvoiceID"], "inv-1");
        assert_eq!(pushed[0].1["Amount"], 75.0);
    }

    #[tokio::test]
    async fn test_failed_pull_keeps_checkpoint() {
        let store = InMemoryLedgerStore::new();
        let api = FakeAccounting {
            fail_list: true,
            ..Default::default()
        };
        let (engine, _) = engine(&store, api);

        let report = engine.sync_kind(EntityKind::Item).await.unwrap();
        assert_eq!(report.failures.len(), 1);
        assert!(store.checkpoint(EntityKind::Item).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_push_failure_is_recorded_and_loop_continues() {
        let store = InMemoryLedgerStore::new();
        store.store(LedgerRecord::new(EntityKind::Item, "CABLE-01")).await.unwrap();
        store.store(LedgerRecord::new(EntityKind::Item, "BREAKER-20A")).await.unwrap();
        let api = FakeAccounting {
            reject_upserts: true,
            ..Default::default()
        };
        let (engine, _) = engine(&store, api);

        let report = engine.sync_kind(EntityKind::Item).await.unwrap();
        assert_eq!(report.failures.len(), 2);
        assert!(!report.is_clean());
        // the pull itself worked
        assert!(store.checkpoint(EntityKind::Item).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_pull_one_resolves_shared_collection_kind() {
        let store = InMemoryLedgerStore::new();
        let api = FakeAccounting::with(
            EntityKind::Invoice,
            vec![json!({
                "InvoiceID": "inv-9",
                "Type": "ACCPAY",
                "InvoiceNumber": "SUP-881",
                "Total": 412.3
            })],
        );
        let (engine, _) = engine(&store, api);

        assert!(engine.pull_one(EntityKind::Invoice, "inv-9").await.unwrap());
        assert!(!engine.pull_one(EntityKind::Invoice, "missing").await.unwrap());

        let bill = store
            .find_by_remote_id(EntityKind::Bill, "inv-9")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(bill.total, Some(dec!(412.3)));
    }

    #[tokio::test]
    async fn test_create_remote() {
        let store = InMemoryLedgerStore::new();
        let (engine, api) = engine(&store, FakeAccounting::default());

        let created = engine
            .create_remote(LedgerRecord::new(EntityKind::Contact, "Spark Bros Ltd"))
            .await
            .unwrap();
        assert_eq!(created.remote_id.as_deref(), Some("contact-1"));
        assert_eq!(api.upserts().len(), 1);
        assert_eq!(store.get(created.id).await.unwrap(), Some(created.clone()));

        let again = engine.create_remote(created).await;
        assert!(matches!(again, Err(FieldOpsError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_create_remote_keeps_record_on_failure() {
        let store = InMemoryLedgerStore::new();
        let api = FakeAccounting {
            reject_upserts: true,
            ..Default::default()
        };
        let (engine, _) = engine(&store, api);

        let record = LedgerRecord::new(EntityKind::Item, "CABLE-01");
        assert!(engine.create_remote(record.clone()).await.is_err());

        let kept = store.get(record.id).await.unwrap().unwrap();
        assert!(kept.needs_push());
    }

    fn slow_upserts() -> FakeAccounting {
        FakeAccounting {
            upsert_delay: Some(std::time::Duration::from_millis(50)),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_overlapping_syncs_create_once() {
        let store = InMemoryLedgerStore::new();
        let contact = LedgerRecord::new(EntityKind::Contact, "Acme Electrical");
        store.store(contact.clone()).await.unwrap();
        let (engine, api) = engine(&store, slow_upserts());

        let (first, second) = tokio::join!(
            engine.sync_kind(EntityKind::Contact),
            engine.sync_kind(EntityKind::Contact)
        );
        let created = first.unwrap().pushed_created + second.unwrap().pushed_created;

        assert_eq!(created, 1);
        assert_eq!(api.upserts().len(), 1);
        let synced = store.get(contact.id).await.unwrap().unwrap();
        assert_eq!(synced.remote_id.as_deref(), Some("contact-1"));
        assert_eq!(store.all(EntityKind::Contact).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_create_remote_and_sync_do_not_overlap() {
        let store = InMemoryLedgerStore::new();
        let contact = LedgerRecord::new(EntityKind::Contact, "Acme Electrical");
        store.store(contact.clone()).await.unwrap();
        let (engine, api) = engine(&store, slow_upserts());

        let (created, _) = tokio::join!(
            engine.create_remote(contact.clone()),
            engine.sync_kind(EntityKind::Contact)
        );

        assert!(created.unwrap().is_linked());
        assert_eq!(api.upserts().len(), 1);
    }

    #[tokio::test]
    async fn test_edit_during_push_stays_dirty() {
        let store = InMemoryLedgerStore::new();
        let contact = LedgerRecord::new(EntityKind::Contact, "Acme Electrical");
        store.store(contact.clone()).await.unwrap();
        let (engine, _) = engine(&store, slow_upserts());

        let edit = async {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            let mut edited = store.get(contact.id).await.unwrap().unwrap();
            edited.reference = Some("Acme Electrical Pty".to_string());
            edited.touch();
            store.store(edited).await.unwrap();
        };
        let (report, _) = tokio::join!(engine.sync_kind(EntityKind::Contact), edit);
        assert_eq!(report.unwrap().pushed_created, 1);

        let stored = store.get(contact.id).await.unwrap().unwrap();
        assert_eq!(stored.remote_id.as_deref(), Some("contact-1"));
        assert_eq!(stored.reference.as_deref(), Some("Acme Electrical Pty"));
        assert!(stored.dirty);
    }
}
