use crate::application::{classifier, parser};
use crate::domain::document::{
    DocumentType, ExtractedData, HealthResponse, ProcessResponse, Recognition,
};
use crate::domain::ports::SharedRecognizer;
use crate::error::{FieldOpsError, Result};
use crate::infrastructure::imaging::{self, DEFAULT_MAX_DIMENSION};
use image::GrayImage;
use tracing::{debug, info, instrument};

pub const SUPPORTED_FORMATS: [&str; 4] = ["image/jpeg", "image/png", "image/webp", "image/tiff"];
pub const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const LOW_CONFIDENCE_ERROR: &str = "No text detected in image or confidence too low";

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingLimits {
    pub max_image_size: usize,
    pub max_dimension: u32,
    pub min_confidence: f64,
}

impl Default for ProcessingLimits {
    fn default() -> Self {
        Self {
            max_image_size: 10 * 1024 * 1024,
            max_dimension: DEFAULT_MAX_DIMENSION,
            min_confidence: 0.1,
        }
    }
}

/// Runs an uploaded document image through clean-up, recognition,
/// classification and field extraction.
pub struct DocumentProcessor {
    recognizer: SharedRecognizer,
    limits: ProcessingLimits,
}

impl DocumentProcessor {
    /// Creates a new `DocumentProcessor`.
    ///
    /// # Arguments
    ///
    /// * `recognizer` - The OCR engine that reads the cleaned-up image.
    /// * `limits` - Upload size, resize bound and minimum confidence.
    pub fn new(recognizer: SharedRecognizer, limits: ProcessingLimits) -> Self {
        Self { recognizer, limits }
    }

    pub fn limits(&self) -> &ProcessingLimits {
        &self.limits
    }

    /// Rejects uploads the pipeline cannot handle before any decoding work.
    pub fn validate(&self, content_type: Option<&str>, size: usize) -> Result<()> {
        let media_type = content_type
            .and_then(|ct| ct.split(';').next())
            .map(|ct| ct.trim().to_ascii_lowercase())
            .unwrap_or_default();

        if !SUPPORTED_FORMATS.contains(&media_type.as_str()) {
            return Err(FieldOpsError::UnsupportedMediaType {
                content_type: content_type.unwrap_or("none").to_string(),
                supported: SUPPORTED_FORMATS.join(", "),
            });
        }

        if size > self.limits.max_image_size {
            return Err(FieldOpsError::PayloadTooLarge {
                limit: self.limits.max_image_size,
            });
        }

        Ok(())
    }

    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    pub async fn process(&self, content_type: Option<&str>, bytes: &[u8]) -> Result<ProcessResponse> {
        self.validate(content_type, bytes.len())?;

        let owned = bytes.to_vec();
        let max_dimension = self.limits.max_dimension;
        let binary = tokio::task::spawn_blocking(move || -> Result<GrayImage> {
            let image = imaging::decode_oriented(&owned)?;
            let image = imaging::resize_to_fit(image, max_dimension);
            Ok(imaging::preprocess(&image))
        })
        .await
        .map_err(|e| FieldOpsError::InternalError(Box::new(e)))??;

        debug!(width = binary.width(), height = binary.height(), "image preprocessed");

        let recognition = self.recognizer.recognize(&binary).await?;
        Ok(self.interpret(recognition))
    }

    /// Classifies and parses recognised text, or reports why it was unusable.
    pub fn interpret(&self, recognition: Recognition) -> ProcessResponse {
        let Recognition { text, confidence } = recognition;
        let text = text.trim().to_string();

        if text.is_empty() || confidence < self.limits.min_confidence {
            info!(confidence, "document rejected: no usable text");
            return ProcessResponse {
                success: false,
                confidence,
                document_type: DocumentType::Unknown,
                extracted_data: ExtractedData::default(),
                raw_text: text,
                error: Some(LOW_CONFIDENCE_ERROR.to_string()),
            };
        }

        let document_type = classifier::classify(&text);
        let extracted_data = parser::parse(&text);
        info!(%document_type, confidence, "document processed");

        ProcessResponse {
            success: true,
            confidence,
            document_type,
            extracted_data,
            raw_text: text,
            error: None,
        }
    }

    pub async fn health(&self) -> HealthResponse {
        HealthResponse {
            status: "healthy".to_string(),
            version: SERVICE_VERSION.to_string(),
            tesseract_available: self.recognizer.is_available().await,
        }
    }
}
