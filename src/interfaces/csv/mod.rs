pub mod extraction_writer;

pub use extraction_writer::ExtractionWriter;
