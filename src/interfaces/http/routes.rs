use super::error::{ApiError, ApiResult};
use super::state::{SharedState, XeroState};
use crate::application::webhook::{self, SIGNATURE_HEADER, WebhookPayload};
use crate::domain::accounting::SyncReport;
use crate::domain::document::{HealthResponse, ProcessResponse};
use crate::domain::ports::StoredObject;
use crate::error::FieldOpsError;
use crate::infrastructure::file_storage::{content_type_for, storage_key};
use axum::Json;
use axum::body::Bytes;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Redirect};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

struct Upload {
    file_name: String,
    content_type: Option<String>,
    bytes: Bytes,
}

/// Reads the `file` part and any plain text fields of a multipart form.
async fn read_form(mut multipart: Multipart) -> ApiResult<(Upload, Vec<(String, String)>)> {
    let mut upload = None;
    let mut fields = Vec::new();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            let file_name = field.file_name().unwrap_or("upload").to_string();
            let content_type = field.content_type().map(str::to_string);
            let bytes = field.bytes().await?;
            upload = Some(Upload {
                file_name,
                content_type,
                bytes,
            });
        } else {
            fields.push((name, field.text().await?));
        }
    }

    let upload = upload.ok_or_else(|| ApiError::MalformedPayload("missing file field".to_string()))?;
    Ok((upload, fields))
}

fn xero(state: &SharedState) -> ApiResult<&XeroState> {
    state.xero.as_ref().ok_or(ApiError::XeroDisabled)
}

pub async fn health_handler(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(state.processor.health().await)
}

pub async fn process_handler(
    State(state): State<SharedState>,
    multipart: Multipart,
) -> ApiResult<Json<ProcessResponse>> {
    let (upload, _) = read_form(multipart).await?;
    info!(file_name = %upload.file_name, size = upload.bytes.len(), "processing document");

    let response = state
        .processor
        .process(upload.content_type.as_deref(), &upload.bytes)
        .await?;
    Ok(Json(response))
}

pub async fn upload_document_handler(
    State(state): State<SharedState>,
    multipart: Multipart,
) -> ApiResult<(StatusCode, Json<StoredObject>)> {
    let (upload, fields) = read_form(multipart).await?;
    let limit = state.processor.limits().max_image_size;
    if upload.bytes.len() > limit {
        return Err(FieldOpsError::PayloadTooLarge { limit }.into());
    }

    let category = fields
        .iter()
        .find(|(name, _)| name == "category")
        .map(|(_, value)| value.as_str())
        .unwrap_or("documents");
    let key = storage_key(category, &upload.file_name);

    let stored = state
        .storage
        .put(&key, &upload.bytes, upload.content_type.as_deref())
        .await?;
    info!(key = %stored.key, size = stored.size, "document uploaded");
    Ok((StatusCode::CREATED, Json(stored)))
}

pub async fn download_document_handler(
    State(state): State<SharedState>,
    Path(key): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let bytes = state.storage.get(&key).await?.ok_or(ApiError::NotFound)?;
    Ok(([(header::CONTENT_TYPE, content_type_for(&key))], bytes))
}

pub async fn xero_connect_handler(State(state): State<SharedState>) -> ApiResult<Redirect> {
    let xero = xero(&state)?;
    let url = xero.tokens.oauth().authorize_url(&xero.issue_state())?;
    Ok(Redirect::to(&url))
}

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct XeroStatus {
    pub connected: bool,
    pub tenant_id: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

pub async fn xero_callback_handler(
    State(state): State<SharedState>,
    Query(params): Query<CallbackParams>,
) -> ApiResult<Json<XeroStatus>> {
    let xero = xero(&state)?;

    if let Some(error) = params.error {
        return Err(ApiError::MalformedPayload(format!("authorisation declined: {error}")));
    }
    let issued = params.state.as_deref().is_some_and(|s| xero.take_state(s));
    if !issued {
        warn!("Xero callback with unknown state");
        return Err(FieldOpsError::InvalidState("unknown or expired OAuth state".into()).into());
    }
    let code = params
        .code
        .ok_or_else(|| ApiError::MalformedPayload("missing code".to_string()))?;

    let tokens = xero.tokens.connect(&code).await?;
    info!(tenant_id = tokens.tenant_id.as_deref().unwrap_or(""), "Xero connected");
    Ok(Json(XeroStatus {
        connected: true,
        tenant_id: tokens.tenant_id,
        expires_at: Some(tokens.expires_at),
    }))
}

pub async fn xero_status_handler(State(state): State<SharedState>) -> ApiResult<Json<XeroStatus>> {
    let xero = xero(&state)?;
    let status = match xero.tokens.current().await? {
        Some(tokens) => XeroStatus {
            connected: true,
            tenant_id: tokens.tenant_id,
            expires_at: Some(tokens.expires_at),
        },
        None => XeroStatus {
            connected: false,
            tenant_id: None,
            expires_at: None,
        },
    };
    Ok(Json(status))
}

pub async fn xero_sync_handler(State(state): State<SharedState>) -> ApiResult<Json<Vec<SyncReport>>> {
    let xero = xero(&state)?;
    // fail fast instead of recording a NotConnected failure for every kind
    xero.tokens.access().await?;
    Ok(Json(xero.sync.sync_all().await?))
}

/// Verifies the signature and acknowledges at once; the records are pulled
/// in a background task.
pub async fn xero_webhook_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<StatusCode> {
    let xero = xero(&state)?;
    let key = xero.webhook_key.as_deref().ok_or(ApiError::XeroDisabled)?;

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !webhook::verify_signature(key, &body, signature) {
        warn!("webhook rejected: bad signature");
        return Err(ApiError::InvalidSignature);
    }

    let payload: WebhookPayload =
        serde_json::from_slice(&body).map_err(|e| ApiError::MalformedPayload(e.to_string()))?;
    if payload.is_intent_to_receive() {
        info!("webhook intent to receive acknowledged");
        return Ok(StatusCode::OK);
    }

    let state = state.clone();
    tokio::spawn(async move {
        let Some(xero) = state.xero.as_ref() else {
            return;
        };
        let tenant_id = match xero.tokens.current().await {
            Ok(tokens) => tokens.and_then(|t| t.tenant_id),
            Err(e) => {
                warn!(error = %e, "cannot load Xero tokens for webhook");
                return;
            }
        };
        webhook::dispatch(&xero.sync, tenant_id.as_deref(), &payload).await;
    });

    Ok(StatusCode::OK)
}
