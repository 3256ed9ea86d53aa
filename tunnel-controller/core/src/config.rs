//! Rendering of the `cloudflared` configuration document.
//!
//! The document is regenerated in full from the ingress rules on every pass.
//! Hostname rules keep their declared order and are followed by the catch-all
//! rule, if any, and then by a fixed fallback that answers 404.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Path at which the credentials Secret is mounted in the daemon.
pub const CREDENTIALS_FILE: &str = "/etc/cloudflared/creds/credentials.json";

/// Address on which the daemon serves metrics and its readiness endpoint.
pub const METRICS_ADDR: &str = "0.0.0.0:2000";

/// The service of the rule that terminates every rendered document.
pub const FALLBACK_SERVICE: &str = "http_status:404";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    pub service: String,
}

/// The document consumed by `cloudflared tunnel --config`.
///
/// Field order is significant: it is the order in which the fields are
/// serialized, so identical input always yields byte-identical YAML.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelConfig {
    pub tunnel: String,
    #[serde(rename = "credentials-file")]
    pub credentials_file: String,
    pub metrics: String,
    pub ingress: Vec<IngressRule>,
}

#[derive(Debug, Error)]
#[error("failed to encode tunnel configuration: {0}")]
pub struct EncodeError(#[from] serde_yaml::Error);

// === impl IngressRule ===

impl IngressRule {
    pub fn new(hostname: impl Into<String>, service: impl Into<String>) -> Self {
        let hostname = hostname.into();
        Self {
            hostname: (!hostname.is_empty()).then_some(hostname),
            service: service.into(),
        }
    }

    pub fn catch_all(service: impl Into<String>) -> Self {
        Self {
            hostname: None,
            service: service.into(),
        }
    }

    pub fn fallback() -> Self {
        Self::catch_all(FALLBACK_SERVICE)
    }

    /// An empty hostname matches every request.
    pub fn is_catch_all(&self) -> bool {
        self.hostname.as_deref().map_or(true, str::is_empty)
    }
}

// === impl TunnelConfig ===

impl TunnelConfig {
    pub fn render<'r>(
        rules: impl IntoIterator<Item = &'r IngressRule>,
        tunnel: &str,
        credentials_file: &str,
    ) -> Self {
        let (catch_all, hosts): (Vec<_>, Vec<_>) = rules
            .into_iter()
            .map(|rule| {
                if rule.is_catch_all() {
                    IngressRule::catch_all(rule.service.clone())
                } else {
                    rule.clone()
                }
            })
            .partition(IngressRule::is_catch_all);

        let mut ingress = hosts;
        ingress.extend(catch_all);
        ingress.push(IngressRule::fallback());

        Self {
            tunnel: tunnel.to_string(),
            credentials_file: credentials_file.to_string(),
            metrics: METRICS_ADDR.to_string(),
            ingress,
        }
    }

    pub fn to_yaml(&self) -> Result<String, EncodeError> {
        serde_yaml::to_string(self).map_err(Into::into)
    }
}
