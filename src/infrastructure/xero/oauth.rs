use crate::config::XeroConfig;
use crate::domain::accounting::TokenSet;
use crate::domain::ports::SharedTokenStore;
use crate::error::{FieldOpsError, Result};
use crate::infrastructure::ensure_success;
use chrono::{Duration, Utc};
use reqwest::{Client, Url};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

/// Tokens are refreshed when they expire within this many seconds.
pub const REFRESH_MARGIN_SECS: i64 = 60;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    expires_in: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Connection {
    tenant_id: String,
    #[serde(default)]
    tenant_type: Option<String>,
    #[serde(default)]
    tenant_name: Option<String>,
}

/// Xero's OAuth2 authorization-code flow.
#[derive(Debug, Clone)]
pub struct XeroOAuth {
    http: Client,
    config: XeroConfig,
}

impl XeroOAuth {
    pub fn new(http: Client, config: XeroConfig) -> Self {
        Self { http, config }
    }

    pub fn config(&self) -> &XeroConfig {
        &self.config
    }

    /// Consent URL the user is redirected to; `state` comes back on the callback.
    pub fn authorize_url(&self, state: &str) -> Result<String> {
        let url = Url::parse_with_params(
            &self.config.authorize_url(),
            &[
                ("response_type", "code"),
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("scope", self.config.scopes.as_str()),
                ("state", state),
            ],
        )
        .map_err(|e| FieldOpsError::ConfigError(format!("invalid Xero login URL: {e}")))?;
        Ok(url.to_string())
    }

    /// Trades an authorization code for tokens and picks the organisation to use.
    #[instrument(skip_all)]
    pub async fn exchange_code(&self, code: &str) -> Result<TokenSet> {
        let response = self
            .token_request(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.config.redirect_uri.as_str()),
            ])
            .await?;
        let tenant_id = self.tenant_for(&response.access_token).await?;
        Ok(into_token_set(response, Some(tenant_id)))
    }

    /// Spends `refresh_token`; the returned set carries its replacement.
    #[instrument(skip_all)]
    pub async fn refresh(&self, refresh_token: &str, tenant_id: Option<String>) -> Result<TokenSet> {
        let response = self
            .token_request(&[("grant_type", "refresh_token"), ("refresh_token", refresh_token)])
            .await?;
        Ok(into_token_set(response, tenant_id))
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenResponse> {
        let response = self
            .http
            .post(self.config.token_url())
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(form)
            .send()
            .await?;
        Ok(ensure_success(response).await?.json().await?)
    }

    async fn tenant_for(&self, access_token: &str) -> Result<String> {
        let response = self
            .http
            .get(self.config.connections_url())
            .bearer_auth(access_token)
            .send()
            .await?;
        let connections: Vec<Connection> = ensure_success(response).await?.json().await?;

        let chosen = connections
            .iter()
            .find(|c| c.tenant_type.as_deref() == Some("ORGANISATION"))
            .or_else(|| connections.first())
            .ok_or_else(|| {
                FieldOpsError::InvalidState("no Xero organisation was authorised".into())
            })?;
        info!(
            tenant_id = %chosen.tenant_id,
            tenant_name = chosen.tenant_name.as_deref().unwrap_or(""),
            "Xero organisation selected"
        );
        Ok(chosen.tenant_id.clone())
    }
}

fn into_token_set(response: TokenResponse, tenant_id: Option<String>) -> TokenSet {
    TokenSet {
        access_token: response.access_token,
        refresh_token: response.refresh_token,
        expires_at: Utc::now() + Duration::seconds(response.expires_in),
        tenant_id,
    }
}

/// Credentials for one API call.
#[derive(Debug, Clone, PartialEq)]
pub struct Credentials {
    pub access_token: String,
    pub tenant_id: String,
}

/// Hands out valid access tokens, refreshing and persisting them as needed.
///
/// Refreshes are serialised behind a mutex: a Xero refresh token is single
/// use, so two concurrent refreshes would leave one caller with a dead token.
pub struct TokenManager {
    oauth: XeroOAuth,
    store: SharedTokenStore,
    refresh_lock: Mutex<()>,
}

impl TokenManager {
    pub fn new(oauth: XeroOAuth, store: SharedTokenStore) -> Self {
        Self {
            oauth,
            store,
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn oauth(&self) -> &XeroOAuth {
        &self.oauth
    }

    pub async fn current(&self) -> Result<Option<TokenSet>> {
        self.store.load().await
    }

    /// Completes the authorization-code flow and stores the tokens.
    pub async fn connect(&self, code: &str) -> Result<TokenSet> {
        let tokens = self.oauth.exchange_code(code).await?;
        self.store.save(tokens.clone()).await?;
        Ok(tokens)
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.store.clear().await
    }

    pub async fn access(&self) -> Result<Credentials> {
        let margin = Duration::seconds(REFRESH_MARGIN_SECS);

        let tokens = self.store.load().await?.ok_or(FieldOpsError::NotConnected)?;
        if !tokens.expires_within(margin, Utc::now()) {
            return credentials(tokens);
        }

        let _guard = self.refresh_lock.lock().await;
        // another task may have refreshed while we waited
        let tokens = self.store.load().await?.ok_or(FieldOpsError::NotConnected)?;
        if !tokens.expires_within(margin, Utc::now()) {
            return credentials(tokens);
        }

        let refreshed = self
            .oauth
            .refresh(&tokens.refresh_token, tokens.tenant_id.clone())
            .await
            .inspect_err(|e| warn!(error = %e, "Xero token refresh failed"))?;
        self.store.save(refreshed.clone()).await?;
        info!(expires_at = %refreshed.expires_at, "Xero access token refreshed");
        credentials(refreshed)
    }
}

fn credentials(tokens: TokenSet) -> Result<Credentials> {
    let tenant_id = tokens.tenant_id.ok_or(FieldOpsError::NotConnected)?;
    Ok(Credentials {
        access_token: tokens.access_token,
        tenant_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::in_memory::InMemoryTokenStore;
    use std::sync::Arc;

    fn oauth() -> XeroOAuth {
        XeroOAuth::new(Client::new(), XeroConfig::new("client-1", "secret"))
    }

    #[test]
    fn test_authorize_url_carries_parameters() {
        let url = oauth().authorize_url("abc123").unwrap();
        let parsed = Url::parse(&url).unwrap();
        let params: Vec<(String, String)> = parsed
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        assert!(url.starts_with("https://login.xero.com/identity/connect/authorize?"));
        assert!(params.contains(&("client_id".to_string(), "client-1".to_string())));
        assert!(params.contains(&("state".to_string(), "abc123".to_string())));
        assert!(params.contains(&("response_type".to_string(), "code".to_string())));
        assert!(params.iter().any(|(k, v)| k == "scope" && v.contains("offline_access")));
    }

    #[tokio::test]
    async fn test_access_without_tokens_is_not_connected() {
        let manager = TokenManager::new(oauth(), Arc::new(InMemoryTokenStore::new()));
        assert!(matches!(manager.access().await, Err(FieldOpsError::NotConnected)));
    }

    #[tokio::test]
    async fn test_fresh_token_is_used_as_is() {
        let tokens = TokenSet {
            access_token: "live".to_string(),
            refresh_token: "r".to_string(),
            expires_at: Utc::now() + Duration::minutes(30),
            tenant_id: Some("tenant-1".to_string()),
        };
        let manager = TokenManager::new(oauth(), Arc::new(InMemoryTokenStore::with_tokens(tokens)));

        let credentials = manager.access().await.unwrap();
        assert_eq!(credentials.access_token, "live");
        assert_eq!(credentials.tenant_id, "tenant-1");
    }
}
