use crate::condition::Condition;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tunnel_controller_core as core;

/// Routes a set of hostnames through a Cloudflare tunnel served by an
/// in-cluster `cloudflared` deployment.
#[derive(Clone, Debug, PartialEq, Eq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "cloudflare.laininthewired.github.io",
    version = "v1beta1",
    kind = "Cloudflare",
    status = "CloudflareStatus",
    namespaced
)]
pub struct CloudflareSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ingress: Vec<IngressRule>,

    /// Names both the registry tunnel and the `Tunnel` resource bound to it.
    pub tunnel_name: String,

    #[serde(default = "default_replicas")]
    pub replicas: i32,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct IngressRule {
    /// An empty hostname matches all requests.
    #[serde(default)]
    pub hostname: String,
    pub service: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct CloudflareStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

fn default_replicas() -> i32 {
    1
}

// === impl Cloudflare ===

impl Cloudflare {
    /// The name shared by the generated ConfigMap and Deployment.
    pub fn child_name(&self) -> String {
        child_name(&self.name_any())
    }

    pub fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default()
    }
}

pub fn child_name(ingress: &str) -> String {
    format!("cloudflare-{ingress}")
}

// === impl IngressRule ===

impl IngressRule {
    pub fn is_catch_all(&self) -> bool {
        self.hostname.is_empty()
    }
}

impl From<&IngressRule> for core::IngressRule {
    fn from(rule: &IngressRule) -> Self {
        core::IngressRule::new(rule.hostname.clone(), rule.service.clone())
    }
}
