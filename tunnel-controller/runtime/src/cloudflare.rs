//! A [`Registry`] backed by the Cloudflare v4 API.

use crate::{
    core::{
        registry::{Error, Registry},
        Account, TunnelRecord,
    },
    metrics::RegistryMetrics,
};
use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

pub(crate) const DEFAULT_BASE_URL: &str = "https://api.cloudflare.com/client/v4";

pub(crate) struct CloudflareApi {
    http: reqwest::Client,
    base_url: String,
    metrics: RegistryMetrics,
}

/// The envelope wrapping every API response.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    code: i64,
    message: String,
}

#[derive(Debug, Serialize)]
struct CreateTunnel<'a> {
    name: &'a str,
    config_src: &'static str,
    tunnel_secret: &'a str,
}

// === impl CloudflareApi ===

impl CloudflareApi {
    pub(crate) fn new(
        base_url: &str,
        timeout: Duration,
        metrics: RegistryMetrics,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("tunnel-controller/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            metrics,
        })
    }

    fn tunnels_url(&self, account: &Account) -> String {
        format!("{}/accounts/{}/cfd_tunnel", self.base_url, account.id)
    }

    async fn send<T: DeserializeOwned>(&self, req: reqwest::RequestBuilder) -> Result<T, Error> {
        let rsp = req
            .send()
            .await
            .map_err(|e| Error::Unavailable(e.to_string()))?;
        let status = rsp.status();
        let body = rsp
            .text()
            .await
            .map_err(|e| Error::Unavailable(e.to_string()))?;
        decode(status, &body)
    }
}

#[async_trait::async_trait]
impl Registry for CloudflareApi {
    async fn list_tunnels(&self, account: &Account) -> Result<Vec<TunnelRecord>, Error> {
        let observer = self.metrics.start("list_tunnels");
        let req = self
            .http
            .get(format!("{}?is_deleted=false", self.tunnels_url(account)))
            .bearer_auth(account.token());
        let result = self.send(req).await;
        observer.end(&result);
        result
    }

    async fn create_tunnel(
        &self,
        account: &Account,
        name: &str,
        secret: &str,
    ) -> Result<TunnelRecord, Error> {
        let observer = self.metrics.start("create_tunnel");
        let req = self
            .http
            .post(self.tunnels_url(account))
            .bearer_auth(account.token())
            .json(&CreateTunnel {
                name,
                config_src: "local",
                tunnel_secret: secret,
            });
        let result = self.send::<TunnelRecord>(req).await;
        observer.end(&result);

        let created = result?;
        debug!(id = %created.id, %name, "Created registry tunnel");
        Ok(created)
    }
}

/// Maps an API response onto its result or a classified error.
fn decode<T: DeserializeOwned>(status: StatusCode, body: &str) -> Result<T, Error> {
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        return Err(Error::Unavailable(describe(status, body)));
    }

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(Error::Credentials(describe(status, body)));
    }

    if !status.is_success() {
        return Err(Error::Rejected(describe(status, body)));
    }

    let envelope = serde_json::from_str::<Envelope<T>>(body)
        .map_err(|e| Error::Response(format!("failed to decode response: {e}")))?;
    if !envelope.success {
        return Err(Error::Rejected(messages(&envelope.errors).unwrap_or_else(
            || "request was not successful".to_string(),
        )));
    }
    envelope
        .result
        .ok_or_else(|| Error::Response("response has no result".to_string()))
}

fn describe(status: StatusCode, body: &str) -> String {
    let detail = serde_json::from_str::<Envelope<serde_json::Value>>(body)
        .ok()
        .and_then(|e| messages(&e.errors));
    match detail {
        Some(detail) => format!("HTTP {status}: {detail}"),
        None => format!("HTTP {status}"),
    }
}

fn messages(errors: &[ApiMessage]) -> Option<String> {
    if errors.is_empty() {
        return None;
    }
    let messages = errors
        .iter()
        .map(|e| format!("{} (code {})", e.message, e.code))
        .collect::<Vec<_>>();
    Some(messages.join("; "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn lists_tunnels() {
        let body = r#"{
            "success": true,
            "errors": [],
            "messages": [],
            "result": [
                {"id": "f70ff985-a4ef-4643-bbbc-4a0ed4fc8415", "name": "edge", "deleted_at": null, "status": "healthy"},
                {"id": "0e1b2c3d-0000-0000-0000-000000000000", "name": "old", "deleted_at": "2024-01-01T00:00:00Z"}
            ]
        }"#;
        let tunnels = decode::<Vec<TunnelRecord>>(StatusCode::OK, body).expect("must decode");
        assert_eq!(tunnels.len(), 2);
        assert_eq!(tunnels[0].name, "edge");
        assert!(!tunnels[0].is_deleted());
        assert!(tunnels[1].is_deleted());
    }

    #[test]
    fn decodes_created_tunnel() {
        let body = r#"{"success": true, "errors": [], "result": {"id": "abc", "name": "edge"}}"#;
        let created = decode::<TunnelRecord>(StatusCode::OK, body).expect("must decode");
        assert_eq!(created.id, "abc");
    }

    #[test]
    fn classifies_failures() {
        let err = decode::<TunnelRecord>(StatusCode::SERVICE_UNAVAILABLE, "<html>")
            .expect_err("5xx must fail");
        assert!(err.is_transient(), "{err}");

        let err = decode::<TunnelRecord>(StatusCode::TOO_MANY_REQUESTS, "")
            .expect_err("429 must fail");
        assert!(err.is_transient(), "{err}");

        let body = r#"{"success": false, "errors": [{"code": 1013, "message": "You already have a tunnel with this name"}], "result": null}"#;
        let err = decode::<TunnelRecord>(StatusCode::CONFLICT, body).expect_err("409 must fail");
        assert!(!err.is_transient());
        assert!(matches!(err, Error::Rejected(_)));
        assert!(err.to_string().contains("already have a tunnel"), "{err}");

        let body = r#"{"success": false, "errors": [{"code": 10000, "message": "Authentication error"}]}"#;
        let err = decode::<TunnelRecord>(StatusCode::FORBIDDEN, body).expect_err("403 must fail");
        assert!(matches!(err, Error::Credentials(_)), "{err}");
    }

    #[test]
    fn unsuccessful_envelope_is_rejected() {
        let body = r#"{"success": false, "errors": [{"code": 1003, "message": "Invalid account"}], "result": null}"#;
        let err = decode::<Vec<TunnelRecord>>(StatusCode::OK, body).expect_err("must fail");
        assert!(matches!(err, Error::Rejected(_)));
        assert!(err.to_string().contains("Invalid account (code 1003)"), "{err}");

        let err = decode::<Vec<TunnelRecord>>(StatusCode::OK, "not json").expect_err("must fail");
        assert!(matches!(err, Error::Response(_)));
    }
}
