//! Reconciles `Cloudflare` resources into a bound `Tunnel`, a ConfigMap
//! holding the rendered daemon configuration and the daemon's Deployment.

use crate::{
    core::{self, config::CREDENTIALS_FILE, TunnelConfig},
    fields,
    k8s::{
        Cloudflare, ConfigMap, Deployment, Labels, ObjectMeta, OwnerReference, Resource,
        ResourceExt, Tunnel, TunnelSpec,
    },
    status::{self, Observed},
    store::Store,
    Context, Error,
};
use kube::runtime::controller::Action;
use serde_json::json;
use std::{collections::BTreeMap, sync::Arc};
use tracing::{debug, info, info_span, warn, Instrument};

pub(crate) const CONFIG_KEY: &str = "config.yaml";
const CONFIG_DIR: &str = "/etc/cloudflared/config";
const CREDENTIALS_DIR: &str = "/etc/cloudflared/creds";
const CONTAINER_NAME: &str = "cloudflared";
const METRICS_PORT: u16 = 2000;

pub(crate) async fn reconcile<S: Store>(
    ingress: Arc<Cloudflare>,
    ctx: Arc<Context<S>>,
) -> Result<Action, Error> {
    let span = info_span!(
        "cloudflare",
        ns = %ingress.namespace().unwrap_or_default(),
        name = %ingress.name_any(),
    );
    let result = reconcile_pass(&ingress, &ctx).instrument(span).await;
    ctx.metrics.reconciled("Cloudflare", &result);
    result
}

async fn reconcile_pass<S: Store>(ingress: &Cloudflare, ctx: &Context<S>) -> Result<Action, Error> {
    let ns = ingress
        .namespace()
        .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
    if ingress.meta().deletion_timestamp.is_some() {
        debug!("Resource is being deleted");
        return Ok(Action::await_change());
    }

    // Conditions describe the children as they were found at the start of the
    // pass. Writes made below trigger another pass through the owned-object
    // watches, which reports their outcome.
    let name = ingress.child_name();
    let config_map = ctx.store.get::<ConfigMap>(&ns, &name).await?;
    let deployment = ctx.store.get::<Deployment>(&ns, &name).await?;
    let observed = Observed {
        config_map: config_map.is_some(),
        deployment: deployment.as_ref().map(available_replicas),
    };

    let converged = converge(ingress, &ns, config_map, deployment, ctx).await;
    let updated = update_status(ingress, &ns, observed, ctx).await;
    match (converged, updated) {
        (Ok(()), updated) => updated,
        (Err(error), updated) => {
            if let Err(status_error) = updated {
                warn!(error = %status_error, "Failed to update status");
            }
            Err(error)
        }
    }
}

async fn converge<S: Store>(
    ingress: &Cloudflare,
    ns: &str,
    config_map: Option<ConfigMap>,
    deployment: Option<Deployment>,
    ctx: &Context<S>,
) -> Result<(), Error> {
    let owner = ingress
        .controller_owner_ref(&())
        .ok_or(Error::MissingObjectKey(".metadata.uid"))?;
    let labels = Labels::new(ingress.name_any(), &ctx.settings.field_manager);

    let tunnel = ensure_tunnel(ingress, ns, &owner, &labels, ctx).await?;
    let tunnel_ref = tunnel
        .resolved_id()
        .or_else(|| tunnel.requested_id())
        .unwrap_or(ingress.spec.tunnel_name.as_str());

    let name = ingress.child_name();
    let data = render_config(ingress, tunnel_ref)?;
    converge_config_map(ns, &name, data, config_map, &owner, &labels, ctx).await?;

    let desired = desired_deployment(
        ingress,
        ns,
        &owner,
        &labels,
        &tunnel.credentials_secret_name(),
        &ctx.settings.image,
    )
    .map_err(|e| Error::Encode("Deployment", e))?;
    converge_deployment(ns, desired, deployment.as_ref(), ctx).await
}

/// Returns the `Tunnel` bound to the ingress resource, creating it if needed.
async fn ensure_tunnel<S: Store>(
    ingress: &Cloudflare,
    ns: &str,
    owner: &OwnerReference,
    labels: &Labels,
    ctx: &Context<S>,
) -> Result<Tunnel, Error> {
    let tunnel_name = &ingress.spec.tunnel_name;
    if let Some(tunnel) = ctx.store.get::<Tunnel>(ns, tunnel_name).await? {
        return Ok(tunnel);
    }

    let tunnel = Tunnel {
        metadata: ObjectMeta {
            name: Some(tunnel_name.clone()),
            namespace: Some(ns.to_string()),
            labels: Some(labels.to_map()),
            owner_references: Some(vec![owner.clone()]),
            ..Default::default()
        },
        spec: TunnelSpec::default(),
        status: None,
    };
    let tunnel = ctx
        .store
        .create(ns, &tunnel, &ctx.settings.field_manager)
        .await?;
    info!(tunnel = %tunnel_name, "Created Tunnel");
    Ok(tunnel)
}

fn render_config(ingress: &Cloudflare, tunnel: &str) -> Result<BTreeMap<String, String>, Error> {
    let rules = ingress
        .spec
        .ingress
        .iter()
        .map(core::IngressRule::from)
        .collect::<Vec<_>>();
    let yaml = TunnelConfig::render(&rules, tunnel, CREDENTIALS_FILE).to_yaml()?;
    Ok(BTreeMap::from([(CONFIG_KEY.to_string(), yaml)]))
}

async fn converge_config_map<S: Store>(
    ns: &str,
    name: &str,
    data: BTreeMap<String, String>,
    live: Option<ConfigMap>,
    owner: &OwnerReference,
    labels: &Labels,
    ctx: &Context<S>,
) -> Result<(), Error> {
    let manager = &ctx.settings.field_manager;
    match live {
        None => {
            let config_map = ConfigMap {
                metadata: ObjectMeta {
                    name: Some(name.to_string()),
                    namespace: Some(ns.to_string()),
                    labels: Some(labels.to_map()),
                    owner_references: Some(vec![owner.clone()]),
                    ..Default::default()
                },
                data: Some(data),
                ..Default::default()
            };
            ctx.store.create(ns, &config_map, manager).await?;
            info!(configmap = %name, "Created ConfigMap");
        }

        Some(live) if live.data.as_ref() == Some(&data) => {
            debug!(configmap = %name, "ConfigMap is current");
        }

        Some(mut live) => {
            live.data = Some(data);
            live.binary_data = None;
            ctx.store.replace(ns, &live, manager).await?;
            info!(configmap = %name, "Replaced ConfigMap");
        }
    }
    Ok(())
}

async fn converge_deployment<S: Store>(
    ns: &str,
    desired: Deployment,
    live: Option<&Deployment>,
    ctx: &Context<S>,
) -> Result<(), Error> {
    let manager = &ctx.settings.field_manager;
    if let Some(live) = live {
        let applied = fields::is_applied(live, &desired, manager)
            .map_err(|e| Error::Encode("Deployment", e))?;
        if applied {
            debug!(deployment = %desired.name_any(), "Deployment is current");
            return Ok(());
        }
    }

    ctx.store.apply(ns, &desired, manager).await?;
    info!(deployment = %desired.name_any(), "Applied Deployment");
    Ok(())
}

pub(crate) fn desired_deployment(
    ingress: &Cloudflare,
    ns: &str,
    owner: &OwnerReference,
    labels: &Labels,
    credentials_secret: &str,
    image: &str,
) -> serde_json::Result<Deployment> {
    let name = ingress.child_name();
    serde_json::from_value(json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {
            "name": name,
            "namespace": ns,
            "labels": labels.to_map(),
            "ownerReferences": [owner],
        },
        "spec": {
            "replicas": ingress.spec.replicas,
            "selector": { "matchLabels": labels.selector() },
            "template": {
                "metadata": { "labels": labels.to_map() },
                "spec": {
                    "containers": [{
                        "name": CONTAINER_NAME,
                        "image": image,
                        "args": [
                            "tunnel",
                            "--config",
                            format!("{CONFIG_DIR}/{CONFIG_KEY}"),
                            "--http2-origin",
                            "run",
                        ],
                        "livenessProbe": {
                            "httpGet": { "path": "/ready", "port": METRICS_PORT },
                            "initialDelaySeconds": 10,
                            "periodSeconds": 10,
                            "failureThreshold": 1,
                        },
                        "volumeMounts": [
                            { "name": "config", "mountPath": CONFIG_DIR, "readOnly": true },
                            { "name": "creds", "mountPath": CREDENTIALS_DIR, "readOnly": true },
                        ],
                    }],
                    "volumes": [
                        {
                            "name": "config",
                            "configMap": {
                                "name": name,
                                "items": [{ "key": CONFIG_KEY, "path": CONFIG_KEY }],
                            },
                        },
                        { "name": "creds", "secret": { "secretName": credentials_secret } },
                    ],
                },
            },
        },
    }))
}

fn available_replicas(deployment: &Deployment) -> i32 {
    deployment
        .status
        .as_ref()
        .and_then(|s| s.available_replicas)
        .unwrap_or(0)
}

async fn update_status<S: Store>(
    ingress: &Cloudflare,
    ns: &str,
    observed: Observed,
    ctx: &Context<S>,
) -> Result<Action, Error> {
    let health = status::aggregate(observed);
    let current = ingress.conditions();
    let conditions = health.conditions(current, &status::now());

    if conditions.as_slice() != current {
        ctx.store
            .patch_status::<Cloudflare>(
                ns,
                &ingress.name_any(),
                &status::ingress_patch(&conditions),
                &ctx.settings.field_manager,
            )
            .await?;
        debug!(?observed, "Updated status");
    }

    if health.requeue {
        return Ok(Action::requeue(ctx.settings.requeue_unavailable));
    }
    Ok(Action::await_change())
}
