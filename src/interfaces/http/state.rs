use crate::application::extraction::DocumentProcessor;
use crate::application::sync::SyncEngine;
use crate::config::XeroConfig;
use crate::domain::ports::{SharedDocumentStorage, SharedLedgerStore, SharedTokenStore};
use crate::error::Result;
use crate::infrastructure::xero::{TokenManager, XeroClient, XeroOAuth};
use reqwest::Client;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// How long an issued OAuth `state` stays valid.
pub const STATE_TTL: Duration = Duration::from_secs(10 * 60);
const XERO_TIMEOUT: Duration = Duration::from_secs(30);

pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub processor: DocumentProcessor,
    pub storage: SharedDocumentStorage,
    pub xero: Option<XeroState>,
}

impl AppState {
    pub fn new(processor: DocumentProcessor, storage: SharedDocumentStorage) -> Self {
        Self {
            processor,
            storage,
            xero: None,
        }
    }

    pub fn with_xero(mut self, xero: XeroState) -> Self {
        self.xero = Some(xero);
        self
    }
}

/// Everything needed to talk to one Xero organisation.
pub struct XeroState {
    pub tokens: Arc<TokenManager>,
    pub sync: SyncEngine,
    pub webhook_key: Option<String>,
    pending: OAuthStates,
}

impl XeroState {
    pub fn new(config: XeroConfig, ledger: SharedLedgerStore, token_store: SharedTokenStore) -> Result<Self> {
        let http = Client::builder().timeout(XERO_TIMEOUT).build()?;
        let tokens = Arc::new(TokenManager::new(
            XeroOAuth::new(http.clone(), config.clone()),
            token_store,
        ));
        let client = XeroClient::new(http, &config, tokens.clone());

        Ok(Self {
            tokens,
            sync: SyncEngine::new(ledger, Arc::new(client)),
            webhook_key: config.webhook_key,
            pending: OAuthStates::default(),
        })
    }

    pub fn issue_state(&self) -> String {
        self.pending.issue(Instant::now())
    }

    pub fn take_state(&self, state: &str) -> bool {
        self.pending.take(state, Instant::now())
    }
}

/// `state` values handed out on `/xero/connect`, each usable once.
#[derive(Default)]
pub struct OAuthStates {
    issued: Mutex<HashMap<String, Instant>>,
}

impl OAuthStates {
    pub fn issue(&self, now: Instant) -> String {
        let state = Uuid::new_v4().simple().to_string();
        let mut issued = self.issued.lock().unwrap_or_else(|e| e.into_inner());
        issued.retain(|_, at| now.saturating_duration_since(*at) < STATE_TTL);
        issued.insert(state.clone(), now);
        state
    }

    pub fn take(&self, state: &str, now: Instant) -> bool {
        let mut issued = self.issued.lock().unwrap_or_else(|e| e.into_inner());
        issued
            .remove(state)
            .is_some_and(|at| now.saturating_duration_since(at) < STATE_TTL)
    }
}
