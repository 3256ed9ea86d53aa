use crate::condition::Condition;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The key under which a credentials Secret stores the daemon's credentials.
pub const CREDENTIALS_KEY: &str = "credentials.json";

/// The key holding the secret a new tunnel is created with. It is stored
/// before the registry call so that an interrupted provisioning can resume.
pub const TUNNEL_SECRET_KEY: &str = "tunnelSecret";

/// A Cloudflare tunnel identity and the Secret holding its credentials.
///
/// When `tunnelID` is empty the controller creates a new registry tunnel
/// named after the resource. Otherwise the existing tunnel is reused and its
/// credentials are expected in `credentialsSecret`.
#[derive(Clone, Debug, Default, PartialEq, Eq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "cloudflare.laininthewired.github.io",
    version = "v1beta1",
    kind = "Tunnel",
    status = "TunnelStatus",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"TunnelID","type":"string","jsonPath":".status.tunnelID"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct TunnelSpec {
    #[serde(rename = "tunnelID", default, skip_serializing_if = "Option::is_none")]
    pub tunnel_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_secret: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TunnelStatus {
    #[serde(default)]
    pub phase: TunnelPhase,

    /// The registry identity, recorded once it is known.
    #[serde(rename = "tunnelID", default, skip_serializing_if = "Option::is_none")]
    pub tunnel_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum TunnelPhase {
    #[default]
    Pending,
    Provisioning,
    Running,
    Failed,
    Terminating,
}

// === impl Tunnel ===

impl Tunnel {
    pub fn phase(&self) -> TunnelPhase {
        self.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }

    /// The identity the user asked to reuse, if any.
    pub fn requested_id(&self) -> Option<&str> {
        non_empty(self.spec.tunnel_id.as_deref())
    }

    /// The identity recorded after provisioning or reuse.
    pub fn resolved_id(&self) -> Option<&str> {
        non_empty(self.status.as_ref().and_then(|s| s.tunnel_id.as_deref()))
    }

    pub fn credentials_secret_name(&self) -> String {
        match non_empty(self.spec.credentials_secret.as_deref()) {
            Some(name) => name.to_string(),
            None => default_credentials_secret(&self.name_any()),
        }
    }

    /// Whether the spec changed since the controller last acted on it.
    pub fn spec_changed(&self) -> bool {
        let observed = self.status.as_ref().and_then(|s| s.observed_generation);
        match (self.metadata.generation, observed) {
            (Some(generation), Some(observed)) => generation > observed,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    pub fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default()
    }
}

pub fn default_credentials_secret(tunnel: &str) -> String {
    format!("{tunnel}-credentials")
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

// === impl TunnelPhase ===

impl TunnelPhase {
    /// Whether the controller may move a tunnel from `self` to `next`.
    ///
    /// `Failed` only returns to `Pending` after the user edits the spec, and
    /// `Terminating` is final.
    pub fn can_transition_to(self, next: Self) -> bool {
        use TunnelPhase::*;

        match (self, next) {
            (a, b) if a == b => true,
            (Terminating, _) => false,
            (_, Terminating) => true,
            (Pending, Provisioning | Running | Failed) => true,
            (Provisioning, Running | Failed) => true,
            (Failed, Pending) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TunnelPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
