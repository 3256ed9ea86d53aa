#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod cloudflare;
pub mod condition;
pub mod labels;
pub mod tunnel;

pub use self::{
    cloudflare::{Cloudflare, CloudflareSpec, CloudflareStatus, IngressRule},
    condition::{Condition, ConditionStatus, ConditionType},
    labels::Labels,
    tunnel::{Tunnel, TunnelPhase, TunnelSpec, TunnelStatus},
};
pub use k8s_openapi::{
    apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition,
    api::{
        self,
        apps::v1::{Deployment, DeploymentSpec, DeploymentStatus},
        core::v1::{ConfigMap, Secret},
    },
    apimachinery::pkg::apis::meta::v1::OwnerReference,
};
pub use kube::{
    api::{Api, ObjectMeta, Patch, PatchParams, PostParams, ResourceExt},
    Client, CustomResourceExt, Error, Resource,
};

pub const API_GROUP: &str = "cloudflare.laininthewired.github.io";
pub const API_VERSION: &str = "cloudflare.laininthewired.github.io/v1beta1";

/// The definitions of every custom resource served by the controller.
pub fn crds() -> Vec<CustomResourceDefinition> {
    vec![Cloudflare::crd(), Tunnel::crd()]
}
