use clap::{Parser, Subcommand};
use fieldops::application::extraction::DocumentProcessor;
use fieldops::application::{classifier, parser, webhook};
use fieldops::config::Config;
use fieldops::domain::document::{DocumentType, ExtractedData, ProcessResponse};
use fieldops::domain::ports::{SharedLedgerStore, SharedTokenStore};
use fieldops::infrastructure::file_storage::{LocalDocumentStorage, content_type_for};
use fieldops::infrastructure::in_memory::InMemoryLedgerStore;
#[cfg(feature = "storage-rocksdb")]
use fieldops::infrastructure::rocksdb::RocksDBStore;
use fieldops::infrastructure::ocr_client::OcrClient;
use fieldops::infrastructure::tesseract::TesseractEngine;
use fieldops::infrastructure::token_file::FileTokenStore;
use fieldops::interfaces::csv::ExtractionWriter;
use fieldops::interfaces::http::{self, state::AppState, state::XeroState};
use fieldops::telemetry;
use miette::{IntoDiagnostic, Result, miette};
use serde::Serialize;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP service
    Serve {
        /// Path to persistent database (optional). If provided, uses RocksDB.
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
    /// Extract document data from image files, printing CSV to stdout
    Extract {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Send images to a running service instead of running Tesseract locally
        #[arg(long)]
        service_url: Option<String>,
    },
    /// Classify and parse already recognised text, printing JSON
    ParseText {
        /// Text file, or `-` for stdin
        file: PathBuf,
    },
    /// Print the Xero webhook signature of a request body
    SignWebhook {
        #[arg(long)]
        key: String,

        file: PathBuf,
    },
    /// Run one full sync with Xero, printing the per-kind reports as JSON
    Sync {
        /// Path to persistent database (optional). If provided, uses RocksDB.
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
}

#[derive(Serialize)]
struct TextAnalysis {
    document_type: DocumentType,
    extracted_data: ExtractedData,
}

struct Stores {
    ledger: SharedLedgerStore,
    tokens: Option<SharedTokenStore>,
}

fn in_memory_stores() -> Stores {
    Stores {
        ledger: Arc::new(InMemoryLedgerStore::new()),
        tokens: None,
    }
}

fn open_stores(db_path: Option<PathBuf>) -> Result<Stores> {
    match db_path {
        #[cfg(feature = "storage-rocksdb")]
        Some(path) => {
            let store = RocksDBStore::open(path).into_diagnostic()?;
            Ok(Stores {
                ledger: Arc::new(store.clone()),
                tokens: Some(Arc::new(store)),
            })
        }
        #[cfg(not(feature = "storage-rocksdb"))]
        Some(_) => {
            eprintln!(
                "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
            );
            Ok(in_memory_stores())
        }
        None => Ok(in_memory_stores()),
    }
}

fn xero_state(config: &Config, stores: Stores) -> Result<Option<XeroState>> {
    let Some(xero) = config.xero.clone() else {
        return Ok(None);
    };
    let tokens = stores
        .tokens
        .unwrap_or_else(|| Arc::new(FileTokenStore::new(&xero.token_path)));
    XeroState::new(xero, stores.ledger, tokens)
        .map(Some)
        .into_diagnostic()
}

fn read_input(path: &Path) -> Result<Vec<u8>> {
    if path == Path::new("-") {
        let mut buffer = Vec::new();
        io::stdin().read_to_end(&mut buffer).into_diagnostic()?;
        return Ok(buffer);
    }
    std::fs::read(path).into_diagnostic()
}

enum Extractor {
    Local(DocumentProcessor),
    Remote(OcrClient),
}

impl Extractor {
    async fn process(&self, path: &Path) -> fieldops::error::Result<ProcessResponse> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let content_type = content_type_for(&file_name);
        let bytes = tokio::fs::read(path).await?;

        match self {
            Extractor::Local(processor) => processor.process(Some(content_type), &bytes).await,
            Extractor::Remote(client) => client.process(&file_name, content_type, bytes).await,
        }
    }
}

async fn serve(db_path: Option<PathBuf>) -> Result<()> {
    let config = Config::load().into_diagnostic()?;
    let stores = open_stores(db_path)?;

    let recognizer = Arc::new(TesseractEngine::new(
        &config.tesseract_cmd,
        &config.tesseract_lang,
        config.processing_timeout,
    ));
    let processor = DocumentProcessor::new(recognizer, config.limits());
    let storage = Arc::new(LocalDocumentStorage::new(&config.document_root));

    let mut state = AppState::new(processor, storage);
    if let Some(xero) = xero_state(&config, stores)? {
        state = state.with_xero(xero);
    }

    let listener = TcpListener::bind(config.bind_address())
        .await
        .into_diagnostic()?;
    http::serve(listener, Arc::new(state)).await.into_diagnostic()
}

async fn extract(files: Vec<PathBuf>, service_url: Option<String>) -> Result<()> {
    let config = Config::load().into_diagnostic()?;
    let extractor = match service_url {
        Some(url) => Extractor::Remote(OcrClient::new(url, config.processing_timeout).into_diagnostic()?),
        None => {
            let recognizer = Arc::new(TesseractEngine::new(
                &config.tesseract_cmd,
                &config.tesseract_lang,
                config.processing_timeout,
            ));
            Extractor::Local(DocumentProcessor::new(recognizer, config.limits()))
        }
    };

    let stdout = io::stdout();
    let mut writer = ExtractionWriter::new(stdout.lock());
    for path in files {
        match extractor.process(&path).await {
            Ok(response) => writer
                .write(&path.display().to_string(), &response)
                .into_diagnostic()?,
            Err(e) => eprintln!("Error processing {}: {}", path.display(), e),
        }
    }
    writer.flush().into_diagnostic()
}

fn parse_text(file: &Path) -> Result<()> {
    let bytes = read_input(file)?;
    let text = String::from_utf8_lossy(&bytes);

    let analysis = TextAnalysis {
        document_type: classifier::classify(&text),
        extracted_data: parser::parse(&text),
    };
    println!("{}", serde_json::to_string_pretty(&analysis).into_diagnostic()?);
    Ok(())
}

fn sign_webhook(key: &str, file: &Path) -> Result<()> {
    let body = read_input(file)?;
    println!("{}", webhook::sign(key, &body));
    Ok(())
}

async fn sync(db_path: Option<PathBuf>) -> Result<()> {
    let stores = open_stores(db_path)?;
    let config = Config::load().into_diagnostic()?;
    let xero = xero_state(&config, stores)?
        .ok_or_else(|| miette!("Xero integration is not configured (set XERO_CLIENT_ID)"))?;

    xero.tokens.access().await.into_diagnostic()?;
    let reports = xero.sync.sync_all().await.into_diagnostic()?;
    println!("{}", serde_json::to_string_pretty(&reports).into_diagnostic()?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { db_path } => serve(db_path).await,
        Command::Extract { files, service_url } => extract(files, service_url).await,
        Command::ParseText { file } => parse_text(&file),
        Command::SignWebhook { key, file } => sign_webhook(&key, &file),
        Command::Sync { db_path } => sync(db_path).await,
    }
}
