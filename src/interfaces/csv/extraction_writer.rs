use crate::domain::document::{DocumentType, ProcessResponse};
use crate::error::Result;
use rust_decimal::Decimal;
use serde::Serialize;
use std::io::Write;

#[derive(Debug, Serialize)]
struct ExtractionRow<'a> {
    file: &'a str,
    success: bool,
    document_type: DocumentType,
    confidence: String,
    document_number: Option<&'a str>,
    date: Option<&'a str>,
    total_amount: Option<Decimal>,
    tax_amount: Option<Decimal>,
    vendor_name: Option<&'a str>,
}

/// Writes one CSV row per processed document.
///
/// The header is emitted with the first row; a writer that never receives a
/// row produces no output at all.
pub struct ExtractionWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> ExtractionWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write(&mut self, file: &str, response: &ProcessResponse) -> Result<()> {
        let data = &response.extracted_data;
        self.writer.serialize(ExtractionRow {
            file,
            success: response.success,
            document_type: response.document_type,
            confidence: format!("{:.2}", response.confidence),
            document_number: data.document_number.as_deref(),
            date: data.date.as_deref(),
            total_amount: data.total_amount,
            tax_amount: data.tax_amount,
            vendor_name: data.vendor_name.as_deref(),
        })?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::document::ExtractedData;
    use rust_decimal_macros::dec;

    #[test]
    fn test_writes_header_and_rows() {
        let invoice = ProcessResponse {
            success: true,
            confidence: 0.914,
            document_type: DocumentType::Invoice,
            extracted_data: ExtractedData {
                document_number: Some("INV-0042".to_string()),
                date: Some("2024-03-15".to_string()),
                total_amount: Some(dec!(1150.00)),
                tax_amount: Some(dec!(150.00)),
                vendor_name: Some("ACME ELECTRICAL LTD".to_string()),
                ..Default::default()
            },
            raw_text: String::new(),
            error: None,
        };
        let blank = ProcessResponse {
            success: false,
            confidence: 0.0,
            document_type: DocumentType::Unknown,
            extracted_data: ExtractedData::default(),
            raw_text: String::new(),
            error: Some("No text detected in image or confidence too low".to_string()),
        };

        let mut out = Vec::new();
        {
            let mut writer = ExtractionWriter::new(&mut out);
            writer.write("inv.png", &invoice).unwrap();
            writer.write("blank.png", &blank).unwrap();
            writer.flush().unwrap();
        }
        let csv = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(
            lines[0],
            "file,success,document_type,confidence,document_number,date,total_amount,tax_amount,vendor_name"
        );
        assert_eq!(
            lines[1],
            "inv.png,true,invoice,0.91,INV-0042,2024-03-15,1150.00,150.00,ACME ELECTRICAL LTD"
        );
        assert_eq!(lines[2], "blank.png,false,unknown,0.00,,,,,");
    }
}
