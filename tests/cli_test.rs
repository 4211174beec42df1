mod common;

use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use common::{INVOICE_TEXT, app_state, png_bytes, spawn_app};
use predicates::prelude::*;
use std::io::Write;
use std::process::Command;

#[test]
fn test_parse_text_end_to_end() -> Result<(), Box<dyn std::error::Error>> {
    let mut file = tempfile::NamedTempFile::new()?;
    write!(file, "{INVOICE_TEXT}")?;

    let mut cmd = Command::new(cargo_bin!("fieldops"));
    cmd.arg("parse-text").arg(file.path());

    cmd.assert()
        .success()
        .stdout(predicate::str::contains(r#""document_type": "invoice""#))
        .stdout(predicate::str::contains(r#""document_number": "INV-1042""#))
        .stdout(predicate::str::contains(r#""date": "2024-03-15""#))
        .stdout(predicate::str::contains(r#""vendor_name": "ACME ELECTRICAL LTD""#));

    Ok(())
}

#[test]
fn test_parse_text_reads_stdin() {
    let mut cmd = assert_cmd::Command::new(cargo_bin!("fieldops"));
    cmd.arg("parse-text").arg("-").write_stdin("CORNER HARDWARE\nReceipt #5531\nCash 20.00\nChange 0.20\nTotal 19.80");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains(r#""document_type": "receipt""#));
}

#[test]
fn test_sign_webhook_prints_signature() -> Result<(), Box<dyn std::error::Error>> {
    let mut body = tempfile::NamedTempFile::new()?;
    write!(body, "The quick brown fox jumps over the lazy dog")?;

    let mut cmd = Command::new(cargo_bin!("fieldops"));
    cmd.arg("sign-webhook").arg("--key").arg("key").arg(body.path());

    cmd.assert()
        .success()
        .stdout("97yD9DBThCSxMpjmqm+xQ+9NWaFJRhdZl0edvC0aPNg=\n");

    Ok(())
}

#[test]
fn test_extract_reports_unreadable_files() {
    let mut cmd = Command::new(cargo_bin!("fieldops"));
    cmd.arg("extract").arg("does/not/exist.png");

    cmd.assert()
        .success()
        .stderr(predicate::str::contains("Error processing does/not/exist.png"));
}

#[test]
fn test_extract_requires_files() {
    let mut cmd = Command::new(cargo_bin!("fieldops"));
    cmd.arg("extract");

    cmd.assert().failure();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_extract_through_service() {
    let dir = tempfile::tempdir().unwrap();
    let address = spawn_app(app_state(INVOICE_TEXT, 0.91, dir.path())).await;

    let image = dir.path().join("invoice.png");
    std::fs::write(&image, png_bytes()).unwrap();

    let output = tokio::task::spawn_blocking(move || {
        Command::new(cargo_bin!("fieldops"))
            .arg("extract")
            .arg("--service-url")
            .arg(format!("http://{address}"))
            .arg(&image)
            .output()
            .unwrap()
    })
    .await
    .unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    let mut lines = stdout.lines();
    assert_eq!(
        lines.next(),
        Some("file,success,document_type,confidence,document_number,date,total_amount,tax_amount,vendor_name")
    );
    let row = lines.next().unwrap();
    assert!(row.contains("invoice.png,true,invoice,0.91,INV-1042,2024-03-15,140.25,12.75"));
}
