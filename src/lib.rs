//! Back-office services for a field-operations platform: OCR extraction of
//! invoices, receipts, purchase orders and bills from photographed documents,
//! document storage, and a bidirectional accounting sync with Xero.
//!
//! The crate follows a hexagonal layout. `domain` holds the entities and the
//! ports (async traits), `application` the pipelines built on them,
//! `infrastructure` the adapters (Tesseract, image processing, storage
//! backends, Xero), and `interfaces` the HTTP and CSV surfaces.

pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod interfaces;
pub mod telemetry;
