#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod conditions;
mod ingress;

#[cfg(test)]
mod tests;

pub use self::{
    conditions::{now, ConditionSet},
    ingress::{aggregate, Health, Observed, Verdict},
};
use tunnel_controller_k8s_api::{self as k8s, Condition, TunnelStatus};

/// Builds a merge patch that replaces an ingress resource's conditions.
///
/// A merge patch replaces lists wholesale, so the written condition set is
/// always exactly `conditions`.
pub fn ingress_patch(conditions: &[Condition]) -> k8s::Patch<serde_json::Value> {
    k8s::Patch::Merge(serde_json::json!({
        "apiVersion": k8s::API_VERSION,
        "kind": "Cloudflare",
        "status": { "conditions": conditions },
    }))
}

pub fn tunnel_patch(status: &TunnelStatus) -> k8s::Patch<serde_json::Value> {
    k8s::Patch::Merge(serde_json::json!({
        "apiVersion": k8s::API_VERSION,
        "kind": "Tunnel",
        "status": status,
    }))
}
