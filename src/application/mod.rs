//! Application layer: the document-understanding pipeline (classification,
//! field parsing, OCR orchestration) and the accounting sync with its webhook
//! entry point.

pub mod classifier;
pub mod extraction;
pub mod parser;
pub mod sync;
pub mod webhook;
