//! Adapters implementing the domain ports: storage backends, the Tesseract
//! subprocess, image clean-up, and HTTP clients for the OCR service and Xero.

pub mod file_storage;
pub mod imaging;
pub mod in_memory;
pub mod ocr_client;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
pub mod tesseract;
pub mod token_file;
pub mod xero;

use crate::error::{FieldOpsError, Result};
use reqwest::Response;

/// Turns a non-2xx response into [`FieldOpsError::RemoteError`], keeping the body.
pub async fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(FieldOpsError::RemoteError {
        status: status.as_u16(),
        body,
    })
}
