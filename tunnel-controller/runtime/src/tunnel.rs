//! Drives a `Tunnel` through its lifecycle.
//!
//! A tunnel without an ID is provisioned: a tunnel secret is stored in the
//! credentials Secret, the registry creates a new identity named after the
//! resource with that secret, the full credentials are stored next to it and
//! the ID is recorded in the status. A provisioning pass that finds a
//! same-named identity and a stored tunnel secret adopts that identity instead
//! of creating another one. A tunnel with an ID reuses an existing identity
//! whose credentials the user has already stored. Registry identities are never
//! deleted.

use crate::{
    core::{
        registry::{self, find_by_id, find_by_name},
        Account, Credentials,
    },
    credentials::read_key,
    k8s::{
        condition::{REASON_OK, REASON_RECONCILING, REASON_UNAVAILABLE},
        tunnel::{CREDENTIALS_KEY, TUNNEL_SECRET_KEY},
        ConditionStatus, ConditionType, Labels, ObjectMeta, Resource, ResourceExt, Secret, Tunnel,
        TunnelPhase, TunnelStatus,
    },
    status::{self, ConditionSet},
    store::Store,
    Context, Error,
};
use k8s_openapi::ByteString;
use kube::runtime::controller::Action;
use rand::RngCore;
use std::{collections::BTreeMap, sync::Arc};
use tracing::{debug, info, info_span, warn, Instrument};

const REASON_CREDENTIALS_MISSING: &str = "CredentialsMissing";
const REASON_PROVISIONING_FAILED: &str = "ProvisioningFailed";

/// Length of generated tunnel secrets, in bytes.
const SECRET_LEN: usize = 32;

pub(crate) async fn reconcile<S: Store>(
    tunnel: Arc<Tunnel>,
    ctx: Arc<Context<S>>,
) -> Result<Action, Error> {
    let span = info_span!(
        "tunnel",
        ns = %tunnel.namespace().unwrap_or_default(),
        name = %tunnel.name_any(),
    );
    let result = reconcile_pass(&tunnel, &ctx).instrument(span).await;
    ctx.metrics.reconciled("Tunnel", &result);
    result
}

async fn reconcile_pass<S: Store>(tunnel: &Tunnel, ctx: &Context<S>) -> Result<Action, Error> {
    let ns = tunnel
        .namespace()
        .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;

    // The watch cache may trail this controller's own status writes.
    let Some(tunnel) = ctx.store.get::<Tunnel>(&ns, &tunnel.name_any()).await? else {
        debug!("Tunnel no longer exists");
        return Ok(Action::await_change());
    };
    let tunnel = &tunnel;
    let mut lifecycle = Lifecycle::new(tunnel, ctx)?;

    if tunnel.meta().deletion_timestamp.is_some() {
        return lifecycle.terminate().await;
    }

    match tunnel.phase() {
        TunnelPhase::Pending => match tunnel.requested_id() {
            Some(id) => lifecycle.reuse(id).await,
            None => lifecycle.provision().await,
        },
        TunnelPhase::Provisioning => lifecycle.confirm().await,
        TunnelPhase::Running => lifecycle.check_credentials().await,
        TunnelPhase::Failed if tunnel.spec_changed() => lifecycle.retry().await,
        TunnelPhase::Failed | TunnelPhase::Terminating => Ok(Action::await_change()),
    }
}

/// One pass over a single tunnel.
///
/// Tracks the status as written during the pass so that consecutive writes
/// build on each other.
struct Lifecycle<'a, S> {
    tunnel: &'a Tunnel,
    ns: String,
    name: String,
    status: TunnelStatus,
    ctx: &'a Context<S>,
}

/// The conditions reported alongside a phase.
struct Report {
    available: (ConditionStatus, &'static str, String),
    degraded: (ConditionStatus, &'static str, String),
}

// === impl Lifecycle ===

impl<'a, S: Store> Lifecycle<'a, S> {
    fn new(tunnel: &'a Tunnel, ctx: &'a Context<S>) -> Result<Self, Error> {
        let ns = tunnel
            .namespace()
            .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
        Ok(Self {
            tunnel,
            ns,
            name: tunnel.name_any(),
            status: tunnel.status.clone().unwrap_or_default(),
            ctx,
        })
    }

    /// Creates a registry identity and stores its credentials, or adopts the
    /// identity an earlier attempt created.
    async fn provision(&mut self) -> Result<Action, Error> {
        if self.status.phase == TunnelPhase::Pending {
            self.transition(TunnelPhase::Provisioning, None, Report::provisioning())
                .await?;
        }

        let account = match self.ctx.accounts.account().await {
            Ok(account) => account,
            Err(error) => return self.registry_failed(error).await,
        };
        let tunnels = match self.ctx.registry.list_tunnels(&account).await {
            Ok(tunnels) => tunnels,
            Err(error) => return self.registry_failed(error).await,
        };

        let secret_name = self.tunnel.credentials_secret_name();
        let stored = self
            .ctx
            .store
            .get::<Secret>(&self.ns, &secret_name)
            .await?
            .and_then(|s| read_key(&s, TUNNEL_SECRET_KEY));

        let credentials = match (find_by_name(&tunnels, &self.name), stored) {
            (Some(existing), Some(secret)) => {
                info!(id = %existing.id, "Adopting tunnel identity from an earlier attempt");
                Credentials::new(&account, secret, existing.id.clone())
            }
            (Some(existing), None) => {
                return self
                    .fail(format!(
                        "tunnel name {:?} is already in use by tunnel {}",
                        self.name, existing.id
                    ))
                    .await;
            }
            (None, stored) => {
                let secret = match stored {
                    Some(secret) => secret,
                    None => {
                        let secret = generate_secret()?;
                        self.store_secret(&secret_name, TUNNEL_SECRET_KEY, secret.clone())
                            .await?;
                        secret
                    }
                };
                match self.create(&account, &secret).await {
                    Ok(credentials) => credentials,
                    Err(error) => return self.registry_failed(error).await,
                }
            }
        };

        let json = credentials
            .to_json()
            .map_err(|e| Error::Encode("credentials", e))?;
        self.store_secret(&secret_name, CREDENTIALS_KEY, json).await?;
        info!(secret = %secret_name, "Stored tunnel credentials");

        self.transition(
            TunnelPhase::Provisioning,
            Some(&credentials.tunnel_id),
            Report::provisioning(),
        )
        .await?;
        Ok(Action::requeue(self.ctx.settings.confirm_interval))
    }

    async fn create(
        &self,
        account: &Account,
        secret: &str,
    ) -> Result<Credentials, registry::Error> {
        let created = self
            .ctx
            .registry
            .create_tunnel(account, &self.name, secret)
            .await?;
        info!(id = %created.id, "Provisioned tunnel identity");
        Ok(Credentials::new(account, secret, created.id))
    }

    /// Completes provisioning once the credentials can be read back.
    async fn confirm(&mut self) -> Result<Action, Error> {
        let Some(id) = self.tunnel.resolved_id().map(str::to_string) else {
            // The identity was not recorded. Provisioning adopts it if it was
            // created.
            return self.provision().await;
        };

        let secret_name = self.tunnel.credentials_secret_name();
        if !self.has_credentials(&secret_name).await? {
            debug!(secret = %secret_name, "Credentials are not readable yet");
            return Ok(Action::requeue(self.ctx.settings.confirm_interval));
        }

        self.transition(TunnelPhase::Running, Some(&id), Report::running())
            .await?;
        Ok(Action::await_change())
    }

    /// Binds an existing registry identity.
    async fn reuse(&mut self, id: &str) -> Result<Action, Error> {
        let Some(secret_name) = self
            .tunnel
            .spec
            .credentials_secret
            .clone()
            .filter(|s| !s.is_empty())
        else {
            return self
                .fail(format!("credentialsSecret must be set to reuse tunnel {id}"))
                .await;
        };

        if !self.has_credentials(&secret_name).await? {
            return self
                .fail(format!(
                    "Secret {secret_name} does not exist or has no {CREDENTIALS_KEY} key"
                ))
                .await;
        }

        let account = match self.ctx.accounts.account().await {
            Ok(account) => account,
            Err(error) => return self.registry_failed(error).await,
        };
        let tunnels = match self.ctx.registry.list_tunnels(&account).await {
            Ok(tunnels) => tunnels,
            Err(error) => return self.registry_failed(error).await,
        };
        if find_by_id(&tunnels, id).is_none() {
            return self
                .fail(format!("tunnel {id} does not exist in the registry"))
                .await;
        }

        info!(%id, "Reusing tunnel identity");
        self.transition(TunnelPhase::Running, Some(id), Report::running())
            .await?;
        Ok(Action::await_change())
    }

    /// Reports whether a running tunnel's credentials are still present.
    async fn check_credentials(&mut self) -> Result<Action, Error> {
        let secret_name = self.tunnel.credentials_secret_name();
        if self.has_credentials(&secret_name).await? {
            self.transition(TunnelPhase::Running, None, Report::running())
                .await?;
            return Ok(Action::await_change());
        }

        warn!(secret = %secret_name, "Tunnel credentials are missing");
        self.transition(
            TunnelPhase::Running,
            None,
            Report::credentials_missing(&secret_name),
        )
        .await?;
        Ok(Action::requeue(self.ctx.settings.requeue_unavailable))
    }

    /// Returns a failed tunnel whose spec was edited to `Pending`.
    async fn retry(&mut self) -> Result<Action, Error> {
        info!("Spec changed, retrying failed tunnel");
        self.transition(TunnelPhase::Pending, None, Report::pending())
            .await?;
        Ok(Action::await_change())
    }

    async fn terminate(&mut self) -> Result<Action, Error> {
        match self
            .transition(TunnelPhase::Terminating, None, Report::terminating())
            .await
        {
            Err(error) if error.is_not_found() => Ok(Action::await_change()),
            result => result.map(|()| Action::await_change()),
        }
    }

    async fn registry_failed(&mut self, error: registry::Error) -> Result<Action, Error> {
        if error.is_transient() {
            return Err(error.into());
        }
        self.fail(error.to_string()).await
    }

    async fn fail(&mut self, message: String) -> Result<Action, Error> {
        warn!(%message, "Tunnel failed");
        self.transition(TunnelPhase::Failed, None, Report::failed(message))
            .await?;
        Ok(Action::await_change())
    }

    async fn has_credentials(&self, secret_name: &str) -> Result<bool, Error> {
        let secret = self.ctx.store.get::<Secret>(&self.ns, secret_name).await?;
        Ok(secret.is_some_and(|s| read_key(&s, CREDENTIALS_KEY).is_some()))
    }

    /// Sets one key of the tunnel's credentials Secret, creating the Secret
    /// when it does not exist. Nothing is written when the key already holds
    /// `value`.
    async fn store_secret(
        &self,
        secret_name: &str,
        key: &str,
        value: String,
    ) -> Result<(), Error> {
        let value = ByteString(value.into_bytes());
        let manager = &self.ctx.settings.field_manager;

        match self.ctx.store.get::<Secret>(&self.ns, secret_name).await? {
            Some(mut secret) => {
                let data = secret.data.get_or_insert_with(BTreeMap::new);
                if data.get(key) == Some(&value) {
                    return Ok(());
                }
                data.insert(key.to_string(), value);
                if let Some(string_data) = secret.string_data.as_mut() {
                    string_data.remove(key);
                }
                self.ctx.store.replace(&self.ns, &secret, manager).await?;
            }
            None => {
                let owner = self
                    .tunnel
                    .controller_owner_ref(&())
                    .ok_or(Error::MissingObjectKey(".metadata.uid"))?;
                let secret = Secret {
                    metadata: ObjectMeta {
                        name: Some(secret_name.to_string()),
                        namespace: Some(self.ns.clone()),
                        labels: Some(Labels::new(&self.name, manager).to_map()),
                        owner_references: Some(vec![owner]),
                        ..Default::default()
                    },
                    data: Some(BTreeMap::from([(key.to_string(), value)])),
                    type_: Some("Opaque".to_string()),
                    ..Default::default()
                };
                self.ctx.store.create(&self.ns, &secret, manager).await?;
            }
        }
        Ok(())
    }

    /// Moves to `phase`, recording `tunnel_id` unless an ID is already known.
    ///
    /// Nothing is written when the status would not change.
    async fn transition(
        &mut self,
        phase: TunnelPhase,
        tunnel_id: Option<&str>,
        report: Report,
    ) -> Result<(), Error> {
        let from = self.status.phase;
        if !from.can_transition_to(phase) {
            return Err(Error::Transition { from, to: phase });
        }

        let now = status::now();
        let mut conditions = ConditionSet::new(&self.status.conditions);
        for (type_, (status, reason, message)) in [
            (ConditionType::Available, &report.available),
            (ConditionType::Degraded, &report.degraded),
        ] {
            conditions.set(type_, *status, reason, message, &now);
        }

        let next = TunnelStatus {
            phase,
            tunnel_id: self
                .status
                .tunnel_id
                .clone()
                .filter(|id| !id.is_empty())
                .or_else(|| tunnel_id.map(str::to_string)),
            observed_generation: self.tunnel.metadata.generation,
            conditions: conditions.into_vec(),
        };
        if next == self.status {
            return Ok(());
        }

        self.ctx
            .store
            .patch_status::<Tunnel>(
                &self.ns,
                &self.name,
                &status::tunnel_patch(&next),
                &self.ctx.settings.field_manager,
            )
            .await?;
        if from != phase {
            info!(%from, to = %phase, "Tunnel phase changed");
        }
        self.status = next;
        Ok(())
    }
}

/// Generates a random base64-encoded tunnel secret.
pub(crate) fn generate_secret() -> Result<String, Error> {
    let mut bytes = vec![0u8; SECRET_LEN];
    rand::thread_rng().fill_bytes(&mut bytes);

    // ByteString serializes as standard base64.
    serde_json::to_value(ByteString(bytes))
        .and_then(serde_json::from_value)
        .map_err(|e| Error::Encode("tunnel secret", e))
}

// === impl Report ===

impl Report {
    fn provisioning() -> Self {
        Self {
            available: (
                ConditionStatus::False,
                REASON_RECONCILING,
                "Provisioning tunnel identity".to_string(),
            ),
            degraded: (ConditionStatus::False, REASON_RECONCILING, String::new()),
        }
    }

    fn running() -> Self {
        Self {
            available: (ConditionStatus::True, REASON_OK, String::new()),
            degraded: (ConditionStatus::False, REASON_OK, String::new()),
        }
    }

    fn credentials_missing(secret: &str) -> Self {
        let message = format!("Secret {secret} does not hold {CREDENTIALS_KEY}");
        Self {
            available: (ConditionStatus::False, REASON_UNAVAILABLE, message.clone()),
            degraded: (ConditionStatus::True, REASON_CREDENTIALS_MISSING, message),
        }
    }

    fn failed(message: String) -> Self {
        Self {
            available: (ConditionStatus::False, REASON_UNAVAILABLE, message.clone()),
            degraded: (ConditionStatus::True, REASON_PROVISIONING_FAILED, message),
        }
    }

    fn pending() -> Self {
        Self {
            available: (
                ConditionStatus::False,
                REASON_RECONCILING,
                "Spec changed".to_string(),
            ),
            degraded: (ConditionStatus::False, REASON_RECONCILING, String::new()),
        }
    }

    fn terminating() -> Self {
        Self {
            available: (
                ConditionStatus::False,
                REASON_UNAVAILABLE,
                "Tunnel is being deleted".to_string(),
            ),
            degraded: (ConditionStatus::False, REASON_OK, String::new()),
        }
    }
}
