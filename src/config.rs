use crate::application::extraction::ProcessingLimits;
use crate::error::{FieldOpsError, Result};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

pub const SECRETS_DIR: &str = "/run/secrets";
pub const DEFAULT_XERO_SCOPES: &str =
    "offline_access accounting.transactions accounting.contacts accounting.settings";

/// Runtime settings, read from the environment once at start-up.
///
/// `LOG_LEVEL` is read separately by [`crate::telemetry::init`], which has to
/// run before this is loaded.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub tesseract_cmd: String,
    pub tesseract_lang: String,
    pub max_image_size: usize,
    pub processing_timeout: Duration,
    pub max_image_dimension: u32,
    pub min_ocr_confidence: f64,
    pub document_root: PathBuf,
    /// `None` unless `XERO_CLIENT_ID` is set.
    pub xero: Option<XeroConfig>,
}

#[derive(Debug, Clone)]
pub struct XeroConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub scopes: String,
    pub webhook_key: Option<String>,
    pub token_path: PathBuf,
    pub api_url: String,
    pub identity_url: String,
    pub login_url: String,
    pub calls_per_minute: u32,
}

impl XeroConfig {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: "http://localhost:8000/xero/callback".to_string(),
            scopes: DEFAULT_XERO_SCOPES.to_string(),
            webhook_key: None,
            token_path: PathBuf::from("xero-tokens.json"),
            api_url: "https://api.xero.com".to_string(),
            identity_url: "https://identity.xero.com".to_string(),
            login_url: "https://login.xero.com".to_string(),
            calls_per_minute: 60,
        }
    }

    /// Points every Xero endpoint at one base URL (used against test servers).
    pub fn with_base_url(mut self, base: &str) -> Self {
        let base = base.trim_end_matches('/').to_string();
        self.api_url = base.clone();
        self.identity_url = base.clone();
        self.login_url = base;
        self
    }

    pub fn authorize_url(&self) -> String {
        format!("{}/identity/connect/authorize", self.login_url)
    }

    pub fn token_url(&self) -> String {
        format!("{}/connect/token", self.identity_url)
    }

    pub fn connections_url(&self) -> String {
        format!("{}/connections", self.api_url)
    }

    pub fn accounting_url(&self) -> String {
        format!("{}/api.xro/2.0", self.api_url)
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok(), Path::new(SECRETS_DIR))
    }

    /// Builds the configuration from an arbitrary key lookup. Secrets missing
    /// from the lookup are read from `<secrets_dir>/<NAME>`.
    pub fn from_lookup<F>(lookup: F, secrets_dir: &Path) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let source = Source { lookup, secrets_dir };

        let xero = match source.get("XERO_CLIENT_ID") {
            Some(client_id) => Some(source.xero(client_id)?),
            None => {
                info!("XERO_CLIENT_ID not set, Xero integration disabled");
                None
            }
        };

        Ok(Self {
            host: source.try_load("OCR_HOST", "0.0.0.0")?,
            port: source.try_load("OCR_PORT", "8000")?,
            tesseract_cmd: source.try_load("TESSERACT_CMD", "/usr/bin/tesseract")?,
            tesseract_lang: source.try_load("TESSERACT_LANG", "eng")?,
            max_image_size: source.try_load("MAX_IMAGE_SIZE", "10485760")?,
            processing_timeout: Duration::from_secs(source.try_load("PROCESSING_TIMEOUT", "300")?),
            max_image_dimension: source.try_load("MAX_IMAGE_DIMENSION", "2000")?,
            min_ocr_confidence: source.try_load("MIN_OCR_CONFIDENCE", "0.1")?,
            document_root: source.try_load("DOCUMENT_ROOT", "./uploads")?,
            xero,
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn limits(&self) -> ProcessingLimits {
        ProcessingLimits {
            max_image_size: self.max_image_size,
            max_dimension: self.max_image_dimension,
            min_confidence: self.min_ocr_confidence,
        }
    }
}

struct Source<'a, F> {
    lookup: F,
    secrets_dir: &'a Path,
}

impl<F> Source<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.trim().is_empty())
    }

    fn try_load<T: FromStr>(&self, key: &str, default: &str) -> Result<T>
    where
        T::Err: Display,
    {
        let raw = self.get(key).unwrap_or_else(|| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        });
        raw.trim().parse().map_err(|e| {
            warn!("Invalid {key} value: {e}");
            FieldOpsError::ConfigError(format!("invalid {key} value {raw:?}: {e}"))
        })
    }

    fn read_secret(&self, name: &str) -> Option<String> {
        if let Some(value) = self.get(name) {
            return Some(value);
        }
        let path = self.secrets_dir.join(name);
        match std::fs::read_to_string(&path) {
            Ok(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
            Err(e) => {
                warn!("Failed to read {name} from {}: {e}", path.display());
                None
            }
        }
    }

    fn xero(&self, client_id: String) -> Result<XeroConfig> {
        let client_secret = self.read_secret("XERO_CLIENT_SECRET").ok_or_else(|| {
            FieldOpsError::ConfigError("XERO_CLIENT_ID is set but XERO_CLIENT_SECRET is missing".into())
        })?;
        let defaults = XeroConfig::new(client_id, client_secret);

        Ok(XeroConfig {
            redirect_uri: self.try_load("XERO_REDIRECT_URI", &defaults.redirect_uri)?,
            scopes: self.try_load("XERO_SCOPES", &defaults.scopes)?,
            webhook_key: self.read_secret("XERO_WEBHOOK_KEY"),
            token_path: self.try_load("XERO_TOKEN_FILE", "xero-tokens.json")?,
            api_url: self.try_load("XERO_API_URL", &defaults.api_url)?,
            identity_url: self.try_load("XERO_IDENTITY_URL", &defaults.identity_url)?,
            login_url: self.try_load("XERO_LOGIN_URL", &defaults.login_url)?,
            calls_per_minute: self.try_load("XERO_CALLS_PER_MINUTE", "60")?,
            ..defaults
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::from_lookup(lookup(&[]), dir.path()).unwrap();

        assert_eq!(config.bind_address(), "0.0.0.0:8000");
        assert_eq!(config.tesseract_cmd, "/usr/bin/tesseract");
        assert_eq!(config.tesseract_lang, "eng");
        assert_eq!(config.max_image_size, 10_485_760);
        assert_eq!(config.processing_timeout, Duration::from_secs(300));
        assert_eq!(config.limits(), ProcessingLimits::default());
        assert_eq!(config.document_root, PathBuf::from("./uploads"));
        assert!(config.xero.is_none());
    }

    #[test]
    fn test_invalid_value_is_an_error() {
        let dir = tempdir().unwrap();
        let result = Config::from_lookup(lookup(&[("OCR_PORT", "eighty")]), dir.path());
        assert!(matches!(result, Err(FieldOpsError::ConfigError(_))));
    }

    #[test]
    fn test_xero_secret_from_secrets_dir() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("XERO_CLIENT_SECRET"), "s3cret\n").unwrap();

        let config = Config::from_lookup(
            lookup(&[("XERO_CLIENT_ID", "client"), ("XERO_CALLS_PER_MINUTE", "30")]),
            dir.path(),
        )
        .unwrap();

        let xero = config.xero.unwrap();
        assert_eq!(xero.client_secret, "s3cret");
        assert_eq!(xero.calls_per_minute, 30);
        assert!(xero.webhook_key.is_none());
        assert_eq!(xero.token_url(), "https://identity.xero.com/connect/token");
        assert_eq!(xero.accounting_url(), "https://api.xero.com/api.xro/2.0");
    }

    #[test]
    fn test_xero_requires_secret() {
        let dir = tempdir().unwrap();
        let result = Config::from_lookup(lookup(&[("XERO_CLIENT_ID", "client")]), dir.path());
        assert!(matches!(result, Err(FieldOpsError::ConfigError(_))));
    }
}
