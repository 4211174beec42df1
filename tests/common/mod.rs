#![allow(dead_code)]

use async_trait::async_trait;
use fieldops::application::extraction::{DocumentProcessor, ProcessingLimits};
use fieldops::domain::document::Recognition;
use fieldops::domain::ports::TextRecognizer;
use fieldops::error::Result;
use fieldops::infrastructure::file_storage::LocalDocumentStorage;
use fieldops::interfaces::http::router;
use fieldops::interfaces::http::state::AppState;
use image::{GrayImage, ImageFormat, Luma};
use std::io::Cursor;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;

pub const INVOICE_TEXT: &str = "ACME ELECTRICAL LTD
123 Main Street, Springfield, IL 62704
TAX INVOICE
Invoice Number: INV-1042
Date: 03/15/2024
Cable tray 3 12.50 37.50
Labour 2 45.00 90.00
Subtotal: $127.50
GST: $12.75
Total: $140.25";

/// Recognizer returning canned text, standing in for Tesseract.
pub struct FixedRecognizer(pub Recognition);

#[async_trait]
impl TextRecognizer for FixedRecognizer {
    async fn recognize(&self, _image: &GrayImage) -> Result<Recognition> {
        Ok(self.0.clone())
    }

    async fn is_available(&self) -> bool {
        true
    }
}

pub fn processor(text: &str, confidence: f64) -> DocumentProcessor {
    let recognizer = Arc::new(FixedRecognizer(Recognition {
        text: text.to_string(),
        confidence,
    }));
    DocumentProcessor::new(recognizer, ProcessingLimits::default())
}

pub fn app_state(text: &str, confidence: f64, document_root: &Path) -> AppState {
    AppState::new(
        processor(text, confidence),
        Arc::new(LocalDocumentStorage::new(document_root)),
    )
}

/// Binds the router on an ephemeral port and serves it in the background.
pub async fn spawn_app(state: AppState) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let app = router(Arc::new(state));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    address
}

pub fn png_bytes() -> Vec<u8> {
    let mut buffer = Cursor::new(Vec::new());
    GrayImage::from_pixel(32, 32, Luma([255]))
        .write_to(&mut buffer, ImageFormat::Png)
        .unwrap();
    buffer.into_inner()
}
