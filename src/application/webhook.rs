use crate::application::sync::SyncEngine;
use crate::domain::accounting::EntityKind;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{debug, info, warn};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-xero-signature";

/// Base64 HMAC-SHA256 of `body` under the webhook key.
pub fn sign(key: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(key.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(body);
    STANDARD.encode(mac.finalize().into_bytes())
}

/// Checks the `x-xero-signature` header against the raw request body.
/// The comparison runs in constant time.
pub fn verify_signature(key: &str, body: &[u8], header: &str) -> bool {
    let Ok(expected) = STANDARD.decode(header.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(key.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    pub resource_url: String,
    pub resource_id: String,
    pub event_date_utc: String,
    pub event_type: String,
    pub event_category: String,
    pub tenant_id: String,
    #[serde(default)]
    pub tenant_type: Option<String>,
}

impl WebhookEvent {
    pub fn kind(&self) -> Option<EntityKind> {
        match self.event_category.as_str() {
            "CONTACT" => Some(EntityKind::Contact),
            "INVOICE" => Some(EntityKind::Invoice),
            "CREDITNOTE" => Some(EntityKind::CreditNote),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    #[serde(default)]
    pub events: Vec<WebhookEvent>,
    pub first_event_sequence: i64,
    pub last_event_sequence: i64,
    pub entropy: String,
}

impl WebhookPayload {
    /// Xero sends an empty, signed batch when a webhook is first registered.
    pub fn is_intent_to_receive(&self) -> bool {
        self.events.is_empty()
    }
}

/// Pulls every record the batch mentions for the connected tenant.
/// Returns how many records were applied; failures are logged and skipped.
pub async fn dispatch(engine: &SyncEngine, tenant_id: Option<&str>, payload: &WebhookPayload) -> usize {
    let mut applied = 0;
    for event in &payload.events {
        if tenant_id != Some(event.tenant_id.as_str()) {
            debug!(tenant_id = %event.tenant_id, "event for another tenant ignored");
            continue;
        }
        let Some(kind) = event.kind() else {
            debug!(category = %event.event_category, "event category ignored");
            continue;
        };
        match engine.pull_one(kind, &event.resource_id).await {
            Ok(true) => applied += 1,
            Ok(false) => {}
            Err(e) => warn!(resource_id = %event.resource_id, error = %e, "webhook pull failed"),
        }
    }
    info!(
        events = payload.events.len(),
        applied,
        first = payload.first_event_sequence,
        last = payload.last_event_sequence,
        "webhook batch processed"
    );
    applied
}
