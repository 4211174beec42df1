//! Xero accounting integration: OAuth2 tokens, a rate-limited API client and
//! the JSON mapping onto ledger records.

pub mod client;
pub mod mapping;
pub mod oauth;
pub mod rate_limit;

pub use client::XeroClient;
pub use oauth::{Credentials, TokenManager, XeroOAuth};
