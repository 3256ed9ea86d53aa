//! The external tunnel registry seam.
//!
//! The registry owns tunnel identities. The controller only ever lists and
//! creates them; it never deletes an identity.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A registry account and the bearer token used to act on it.
#[derive(Clone, PartialEq, Eq)]
pub struct Account {
    pub id: String,
    token: String,
}

/// A tunnel as listed by the registry.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct TunnelRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub deleted_at: Option<String>,
}

/// The credentials document read by `cloudflared` from its credentials file.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(rename = "AccountTag")]
    pub account_tag: String,
    #[serde(rename = "TunnelSecret")]
    pub tunnel_secret: String,
    #[serde(rename = "TunnelID")]
    pub tunnel_id: String,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("tunnel registry is unavailable: {0}")]
    Unavailable(String),

    #[error("tunnel registry rejected the request: {0}")]
    Rejected(String),

    #[error("tunnel registry credentials are unusable: {0}")]
    Credentials(String),

    #[error("unexpected tunnel registry response: {0}")]
    Response(String),
}

#[async_trait::async_trait]
pub trait Registry: Send + Sync {
    /// Lists the account's tunnels that have not been deleted.
    async fn list_tunnels(&self, account: &Account) -> Result<Vec<TunnelRecord>, Error>;

    /// Creates a tunnel that authenticates with `secret`, a base64-encoded
    /// value chosen by the caller.
    async fn create_tunnel(
        &self,
        account: &Account,
        name: &str,
        secret: &str,
    ) -> Result<TunnelRecord, Error>;
}

/// Resolves the account to act on.
///
/// Implementations read the account on every call so that rotated tokens
/// take effect without a restart.
#[async_trait::async_trait]
pub trait AccountSource: Send + Sync {
    async fn account(&self) -> Result<Account, Error>;
}

// === impl Account ===

impl Account {
    pub fn new(id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            token: token.into(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("id", &self.id)
            .field("token", &"<redacted>")
            .finish()
    }
}

// === impl TunnelRecord ===

impl TunnelRecord {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.as_deref().is_some_and(|at| !at.is_empty())
    }
}

/// Finds the live tunnel with the given name, if any.
pub fn find_by_name<'t>(tunnels: &'t [TunnelRecord], name: &str) -> Option<&'t TunnelRecord> {
    tunnels.iter().find(|t| !t.is_deleted() && t.name == name)
}

/// Finds the live tunnel with the given ID, if any.
pub fn find_by_id<'t>(tunnels: &'t [TunnelRecord], id: &str) -> Option<&'t TunnelRecord> {
    tunnels.iter().find(|t| !t.is_deleted() && t.id == id)
}

// === impl Credentials ===

impl Credentials {
    pub fn new(account: &Account, secret: impl Into<String>, tunnel_id: impl Into<String>) -> Self {
        Self {
            account_tag: account.id.clone(),
            tunnel_secret: secret.into(),
            tunnel_id: tunnel_id.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("account_tag", &self.account_tag)
            .field("tunnel_id", &self.tunnel_id)
            .finish_non_exhaustive()
    }
}

// === impl Error ===

impl Error {
    /// Transient errors leave tunnel state untouched and are retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}
