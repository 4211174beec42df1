use crate::domain::document::{HealthResponse, ProcessResponse};
use crate::error::Result;
use crate::infrastructure::ensure_success;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// HTTP client for a remote OCR service exposing `/process` and `/health`.
#[derive(Debug, Clone)]
pub struct OcrClient {
    base_url: String,
    http: Client,
}

impl OcrClient {
    /// `timeout` bounds each request, OCR included.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    pub async fn process(
        &self,
        file_name: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<ProcessResponse> {
        let part = Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str(content_type)?;
        let form = Form::new().part("file", part);

        debug!(url = %self.base_url, file_name, "submitting document for OCR");
        let response = self
            .http
            .post(format!("{}/process", self.base_url))
            .multipart(form)
            .send()
            .await?;

        Ok(ensure_success(response).await?.json().await?)
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        let response = self
            .http
            .get(format!("{}/health", self.base_url))
            .send()
            .await?;
        Ok(ensure_success(response).await?.json().await?)
    }
}
