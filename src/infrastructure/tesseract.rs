use crate::domain::document::Recognition;
use crate::domain::ports::TextRecognizer;
use crate::error::{FieldOpsError, Result};
use crate::infrastructure::imaging::encode_png;
use async_trait::async_trait;
use image::GrayImage;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

const WORD_LEVEL: u32 = 5;
const VERSION_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs the Tesseract CLI as a subprocess.
///
/// The image goes in on stdin as PNG and results come back on stdout in TSV
/// form, which carries both the words and their confidences in one pass.
#[derive(Debug, Clone)]
pub struct TesseractEngine {
    command: PathBuf,
    lang: String,
    timeout: Duration,
}

impl TesseractEngine {
    pub fn new(command: impl Into<PathBuf>, lang: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            lang: lang.into(),
            timeout,
        }
    }

    async fn run(&self, png: Vec<u8>) -> Result<String> {
        let mut child = Command::new(&self.command)
            .args(["stdin", "stdout", "-l", self.lang.as_str(), "--psm", "6", "tsv"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                FieldOpsError::OcrError(format!(
                    "failed to start {}: {e}",
                    self.command.display()
                ))
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| FieldOpsError::OcrError("tesseract stdin unavailable".to_string()))?;

        // stdin is fed while stdout drains, otherwise a large image can fill
        // both pipes and stall the child
        let feed = async move {
            stdin.write_all(&png).await?;
            stdin.shutdown().await
        };

        let work = async {
            let (fed, output) = tokio::join!(feed, child.wait_with_output());
            fed?;
            output
        };

        let output = tokio::time::timeout(self.timeout, work)
            .await
            .map_err(|_| {
                FieldOpsError::OcrError(format!(
                    "tesseract timed out after {}s",
                    self.timeout.as_secs()
                ))
            })??;

        if !output.status.success() {
            return Err(FieldOpsError::OcrError(format!(
                "tesseract exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl TextRecognizer for TesseractEngine {
    async fn recognize(&self, image: &GrayImage) -> Result<Recognition> {
        let png = encode_png(image)?;
        debug!(
            width = image.width(),
            height = image.height(),
            bytes = png.len(),
            "running tesseract"
        );
        let tsv = self.run(png).await?;
        Ok(parse_tsv(&tsv))
    }

    async fn is_available(&self) -> bool {
        let probe = Command::new(&self.command)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();

        match tokio::time::timeout(VERSION_TIMEOUT, probe).await {
            Ok(Ok(status)) => status.success(),
            Ok(Err(e)) => {
                warn!(command = %self.command.display(), error = %e, "tesseract probe failed");
                false
            }
            Err(_) => {
                warn!(command = %self.command.display(), "tesseract probe timed out");
                false
            }
        }
    }
}

/// Rebuilds text and mean confidence from Tesseract's TSV output.
///
/// Words are grouped by (page, block, paragraph, line) and each group becomes
/// one output line. Confidence averages every row with a positive score and
/// is scaled to 0..=1; rows marked `-1` are layout, not words.
pub fn parse_tsv(tsv: &str) -> Recognition {
    let mut lines: BTreeMap<(u32, u32, u32, u32), Vec<&str>> = BTreeMap::new();
    let mut confidence_sum = 0.0;
    let mut confidence_count = 0usize;

    for row in tsv.lines().skip(1) {
        let columns: Vec<&str> = row.split('\t').collect();
        if columns.len() < 12 {
            continue;
        }

        let conf: f64 = columns[10].trim().parse().unwrap_or(-1.0);
        if conf > 0.0 {
            confidence_sum += conf;
            confidence_count += 1;
        }

        let level: u32 = columns[0].parse().unwrap_or(0);
        let word = columns[11].trim();
        if level != WORD_LEVEL || word.is_empty() {
            continue;
        }

        let key = (
            columns[1].parse().unwrap_or(0),
            columns[2].parse().unwrap_or(0),
            columns[3].parse().unwrap_or(0),
            columns[4].parse().unwrap_or(0),
        );
        lines.entry(key).or_default().push(word);
    }

    let text = lines
        .values()
        .map(|words| words.join(" "))
        .collect::<Vec<_>>()
        .join("\n");

    let confidence = if confidence_count == 0 {
        0.0
    } else {
        confidence_sum / confidence_count as f64 / 100.0
    };

    Recognition { text, confidence }
}
