#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use tunnel_controller_core as core;
pub use tunnel_controller_k8s_api as k8s;
pub use tunnel_controller_k8s_status as status;

mod admission;
mod args;
mod cloudflare;
mod credentials;
mod error;
mod fields;
mod ingress;
mod metrics;
mod store;
mod tunnel;
mod validation;


pub use self::{args::Args, error::Error};

use kube::runtime::controller::Action;
use std::{sync::Arc, time::Duration};
use tracing::warn;

/// How long a failed reconciliation waits before it is retried.
const RETRY_INTERVAL: Duration = Duration::from_secs(15);

/// State shared by every reconciliation pass.
struct Context<S> {
    store: S,
    registry: Arc<dyn core::Registry>,
    accounts: Arc<dyn core::AccountSource>,
    settings: Settings,
    metrics: metrics::ControllerMetrics,
}

#[derive(Clone, Debug)]
struct Settings {
    field_manager: String,
    image: String,
    /// Delay before re-checking a Deployment with no available replicas.
    requeue_unavailable: Duration,
    /// Delay before confirming that freshly written credentials are readable.
    confirm_interval: Duration,
}

fn error_policy<K, S>(obj: Arc<K>, error: &Error, _ctx: Arc<Context<S>>) -> Action
where
    K: k8s::ResourceExt,
{
    warn!(
        %error,
        ns = %obj.namespace().unwrap_or_default(),
        name = %obj.name_any(),
        "Reconciliation failed"
    );
    Action::requeue(RETRY_INTERVAL)
}
