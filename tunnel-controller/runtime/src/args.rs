use crate::{
    admission::Admission,
    cloudflare::{CloudflareApi, DEFAULT_BASE_URL},
    credentials::SecretAccounts,
    error_policy, ingress,
    k8s::{self, labels, Api, Cloudflare, ConfigMap, Deployment, Secret, Tunnel},
    metrics::{ControllerMetrics, RegistryMetrics},
    store::KubeStore,
    tunnel, Context, Settings,
};
use anyhow::{bail, Result};
use clap::Parser;
use futures::prelude::*;
use kube::runtime::{watcher, Controller};
use prometheus_client::registry::Registry;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{debug, info_span, Instrument};

/// Delay before checking that freshly written credentials are readable.
const CONFIRM_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Parser)]
#[clap(
    name = "tunnel-controller",
    about = "Manages Cloudflare tunnel daemons for ingress resources"
)]
pub struct Args {
    #[clap(
        long,
        default_value = "tunnel_controller=info,warn",
        env = "TUNNEL_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    server: kubert::ServerArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Disables the admission controller server.
    #[clap(long)]
    admission_controller_disabled: bool,

    #[clap(long, default_value = "cloudflare/cloudflared:2025.1.0")]
    cloudflared_image: String,

    /// Field manager used for every write; also labels generated objects.
    #[clap(long, default_value = "cloudflared-operator-controller-manager")]
    field_manager: String,

    /// Secret holding the registry API token and account ID.
    #[clap(long, default_value = "cloudflare-api-token")]
    api_token_secret_name: String,

    #[clap(long, default_value = "default")]
    api_token_secret_namespace: String,

    #[clap(long, default_value = DEFAULT_BASE_URL)]
    registry_url: String,

    #[clap(long, default_value = "10000")]
    registry_timeout_ms: u64,

    /// Delay before re-checking a daemon with no available replicas.
    #[clap(long, default_value = "10")]
    requeue_unavailable_secs: u64,

    /// Prints the custom resource definitions as YAML and exits.
    #[clap(long)]
    print_crds: bool,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            server,
            admission_controller_disabled,
            cloudflared_image,
            field_manager,
            api_token_secret_name,
            api_token_secret_namespace,
            registry_url,
            registry_timeout_ms,
            requeue_unavailable_secs,
            print_crds,
        } = self;

        if print_crds {
            return print_crds_yaml();
        }

        let server = if admission_controller_disabled {
            None
        } else {
            Some(server)
        };

        let mut prom = <Registry>::default();
        let controller_metrics =
            ControllerMetrics::register(prom.sub_registry_with_prefix("reconcile"));
        let registry_metrics =
            RegistryMetrics::register(prom.sub_registry_with_prefix("registry"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .with_optional_server(server)
            .build()
            .await?;

        let client = runtime.client();
        let store = KubeStore::new(client.clone());
        let accounts = Arc::new(SecretAccounts::new(
            store.clone(),
            api_token_secret_namespace,
            api_token_secret_name,
        ));
        let registry = Arc::new(CloudflareApi::new(
            &registry_url,
            Duration::from_millis(registry_timeout_ms),
            registry_metrics,
        )?);

        let selector = labels::created_by_selector(&field_manager);
        let ctx = Arc::new(Context {
            store: store.clone(),
            registry: registry.clone(),
            accounts: accounts.clone(),
            settings: Settings {
                field_manager,
                image: cloudflared_image,
                requeue_unavailable: Duration::from_secs(requeue_unavailable_secs),
                confirm_interval: CONFIRM_INTERVAL,
            },
            metrics: controller_metrics,
        });

        // Spawn the ingress controller. Changes to any generated child,
        // including the bound Tunnel's status, trigger another pass.
        let owned = || watcher::Config::default().labels(&selector);
        let ingresses = Controller::new(
            Api::<Cloudflare>::all(client.clone()),
            watcher::Config::default(),
        )
        .owns(Api::<ConfigMap>::all(client.clone()), owned())
        .owns(Api::<Deployment>::all(client.clone()), owned())
        .owns(Api::<Tunnel>::all(client.clone()), owned())
        .run(ingress::reconcile::<KubeStore>, error_policy, ctx.clone())
        .for_each(|res| async move {
            if let Ok((obj, action)) = res {
                debug!(%obj, ?action, "Reconciled");
            }
        });
        tokio::spawn(ingresses.instrument(info_span!("cloudflares")));

        // Spawn the tunnel lifecycle controller.
        let tunnels = Controller::new(
            Api::<Tunnel>::all(client.clone()),
            watcher::Config::default(),
        )
        .owns(Api::<Secret>::all(client), owned())
        .run(tunnel::reconcile::<KubeStore>, error_policy, ctx)
        .for_each(|res| async move {
            if let Ok((obj, action)) = res {
                debug!(%obj, ?action, "Reconciled");
            }
        });
        tokio::spawn(tunnels.instrument(info_span!("tunnels")));

        let admission = Admission::new(store, registry, accounts);
        let runtime = runtime.spawn_server(move || admission.clone());

        // Block on the shutdown signal.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

fn print_crds_yaml() -> Result<()> {
    for crd in k8s::crds() {
        print!("---\n{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}
