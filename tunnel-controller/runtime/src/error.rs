use crate::{core, k8s::TunnelPhase};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("kubernetes API request failed: {0}")]
    Kube(#[from] kube::Error),

    #[error(transparent)]
    Registry(#[from] core::registry::Error),

    #[error(transparent)]
    Render(#[from] core::EncodeError),

    #[error("failed to encode {0}: {1}")]
    Encode(&'static str, #[source] serde_json::Error),

    #[error("object is missing {0}")]
    MissingObjectKey(&'static str),

    #[error("tunnel cannot move from {from} to {to}")]
    Transition { from: TunnelPhase, to: TunnelPhase },
}

impl Error {
    pub(crate) fn is_not_found(&self) -> bool {
        matches!(self, Self::Kube(kube::Error::Api(rsp)) if rsp.code == 404)
    }
}
