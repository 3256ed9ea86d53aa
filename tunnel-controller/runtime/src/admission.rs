use crate::{
    core::{self, AccountSource, Registry},
    k8s::{Cloudflare, CloudflareSpec, Tunnel, TunnelSpec},
    store::Store,
    validation,
};
use anyhow::{anyhow, Result};
use futures::future;
use http_body_util::BodyExt;
use hyper::{http, Request, Response};
use kube::{
    core::{admission::Operation, DynamicObject},
    Resource, ResourceExt,
};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// Validates `Cloudflare` and `Tunnel` resources before they are persisted.
pub(crate) struct Admission<S> {
    store: S,
    registry: Arc<dyn Registry>,
    accounts: Arc<dyn AccountSource>,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read request body: {0}")]
    Request(#[from] hyper::Error),

    #[error("failed to encode json response: {0}")]
    Json(#[from] serde_json::Error),
}

type AdmissionRequest = kube::core::admission::AdmissionRequest<DynamicObject>;
type AdmissionResponse = kube::core::admission::AdmissionResponse;
type AdmissionReview = kube::core::admission::AdmissionReview<DynamicObject>;

#[async_trait::async_trait]
trait Validate<T> {
    /// Checks `spec`, given the spec it replaces on update.
    async fn validate(self, ns: &str, name: &str, spec: T, old: Option<T>) -> Result<()>;
}

type Body = http_body_util::Full<bytes::Bytes>;

// === impl Admission ===

impl<S: Clone> Clone for Admission<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            registry: self.registry.clone(),
            accounts: self.accounts.clone(),
        }
    }
}

impl<S: Store> tower::Service<Request<hyper::body::Incoming>> for Admission<S> {
    type Response = Response<Body>;
    type Error = Error;
    type Future = future::BoxFuture<'static, Result<Response<Body>, Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::result::Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<hyper::body::Incoming>) -> Self::Future {
        trace!(?req);
        if req.method() != http::Method::POST {
            return Box::pin(future::ok(not_found()));
        }
        let mutate = match req.uri().path() {
            "/" | "/validate" => false,
            "/mutate" => true,
            _ => return Box::pin(future::ok(not_found())),
        };

        let admission = self.clone();
        Box::pin(async move {
            use bytes::Buf;
            let bytes = req.into_body().collect().await?.to_bytes();
            let review: AdmissionReview = match serde_json::from_reader(bytes.reader()) {
                Ok(review) => review,
                Err(error) => {
                    warn!(%error, "Failed to parse request body");
                    return json_response(AdmissionResponse::invalid(error).into_review());
                }
            };
            trace!(?review);

            let rsp = match review.try_into() {
                // Defaulting admits every object unchanged.
                Ok(req) if mutate => AdmissionResponse::from(&req),
                Ok(req) => {
                    debug!(?req);
                    admission.admit(req).await
                }
                Err(error) => {
                    warn!(%error, "Invalid admission request");
                    AdmissionResponse::invalid(error)
                }
            };
            debug!(?rsp);
            json_response(rsp.into_review())
        })
    }
}

impl<S: Store> Admission<S> {
    pub(crate) fn new(
        store: S,
        registry: Arc<dyn Registry>,
        accounts: Arc<dyn AccountSource>,
    ) -> Self {
        Self {
            store,
            registry,
            accounts,
        }
    }

    pub(crate) async fn admit(self, req: AdmissionRequest) -> AdmissionResponse {
        if matches!(req.operation, Operation::Delete) {
            return AdmissionResponse::from(&req);
        }

        if is_kind::<Cloudflare>(&req) {
            return self.admit_spec::<CloudflareSpec>(req).await;
        }

        if is_kind::<Tunnel>(&req) {
            return self.admit_spec::<TunnelSpec>(req).await;
        }

        AdmissionResponse::invalid(format_args!(
            "unsupported resource type: {}.{}.{}",
            req.kind.group, req.kind.version, req.kind.kind
        ))
    }

    async fn admit_spec<T>(self, req: AdmissionRequest) -> AdmissionResponse
    where
        T: DeserializeOwned,
        Self: Validate<T>,
    {
        let rsp = AdmissionResponse::from(&req);

        let kind = req.kind.kind.clone();
        let (obj, spec, old) = match parse_spec::<T>(req) {
            Ok(parsed) => parsed,
            Err(error) => {
                info!(%error, "Failed to parse {} spec", kind);
                return rsp.deny(error);
            }
        };

        let ns = obj.namespace().unwrap_or_default();
        let name = obj.name_any();
        if let Err(error) = self.validate(&ns, &name, spec, old).await {
            info!(%error, %ns, %name, %kind, "Denied");
            return rsp.deny(error);
        }

        rsp
    }
}

fn is_kind<T>(req: &AdmissionRequest) -> bool
where
    T: Resource,
    T::DynamicType: Default,
{
    let dt = Default::default();
    req.kind.group.eq_ignore_ascii_case(&T::group(&dt))
        && req.kind.kind.eq_ignore_ascii_case(&T::kind(&dt))
}

fn not_found() -> Response<Body> {
    Response::builder()
        .status(http::StatusCode::NOT_FOUND)
        .body(Body::default())
        .expect("not found response must be valid")
}

fn json_response(rsp: AdmissionReview) -> Result<Response<Body>, Error> {
    let bytes = serde_json::to_vec(&rsp)?;
    Ok(Response::builder()
        .status(http::StatusCode::OK)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Body::from(bytes))
        .expect("admission review response must be valid"))
}

fn parse_spec<T: DeserializeOwned>(req: AdmissionRequest) -> Result<(DynamicObject, T, Option<T>)> {
    let obj = req
        .object
        .ok_or_else(|| anyhow!("admission request missing 'object'"))?;
    let spec = spec_of(&obj)?;
    let old = req.old_object.as_ref().map(spec_of).transpose()?;
    Ok((obj, spec, old))
}

fn spec_of<T: DeserializeOwned>(obj: &DynamicObject) -> Result<T> {
    let data = obj
        .data
        .get("spec")
        .cloned()
        .ok_or_else(|| anyhow!("admission request missing 'spec'"))?;
    Ok(serde_json::from_value(data)?)
}

#[async_trait::async_trait]
impl<S: Store> Validate<CloudflareSpec> for Admission<S> {
    async fn validate(
        self,
        ns: &str,
        _name: &str,
        spec: CloudflareSpec,
        old: Option<CloudflareSpec>,
    ) -> Result<()> {
        validation::validate_ingress(&spec)?;

        let renamed = match old {
            Some(old) => old.tunnel_name != spec.tunnel_name,
            None => true,
        };
        if !renamed {
            return Ok(());
        }

        // A Tunnel that asks for an existing identity binds it on purpose.
        let bound = self.store.get::<Tunnel>(ns, &spec.tunnel_name).await?;
        let reusing = bound.as_ref().and_then(|t| t.requested_id());
        core::ensure_name_available(
            &*self.registry,
            &*self.accounts,
            &spec.tunnel_name,
            reusing,
        )
        .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl<S: Store> Validate<TunnelSpec> for Admission<S> {
    async fn validate(
        self,
        _ns: &str,
        _name: &str,
        spec: TunnelSpec,
        old: Option<TunnelSpec>,
    ) -> Result<()> {
        validation::validate_tunnel(&spec, old.as_ref())
    }
}
