use crate::ConditionSet;
use tunnel_controller_k8s_api::{
    condition::{REASON_OK, REASON_RECONCILING, REASON_UNAVAILABLE},
    Condition, ConditionStatus, ConditionType,
};

/// What a reconciliation pass saw of an ingress resource's children.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Observed {
    pub config_map: bool,
    /// The Deployment's available replica count, if the Deployment exists.
    pub deployment: Option<i32>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Verdict {
    pub status: ConditionStatus,
    pub reason: &'static str,
    pub message: &'static str,
}

/// The health of an ingress resource derived from its children.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Health {
    pub available: Verdict,
    pub degraded: Verdict,
    /// Set when the pass should be retried after a delay even if nothing
    /// changes.
    pub requeue: bool,
}

/// Derives conditions from observed state.
///
/// Checks run in order and later checks override earlier ones.
pub fn aggregate(observed: Observed) -> Health {
    let mut health = Health {
        available: Verdict::new(true, REASON_OK, ""),
        degraded: Verdict::new(false, REASON_OK, ""),
        requeue: false,
    };

    if !observed.config_map {
        health.degraded = Verdict::new(true, REASON_RECONCILING, "ConfigMap not found");
        health.available = Verdict::new(false, REASON_RECONCILING, "");
    }

    match observed.deployment {
        None => {
            health.degraded = Verdict::new(true, REASON_RECONCILING, "Deployment not found");
            health.available = Verdict::new(false, REASON_RECONCILING, "");
        }
        Some(available) if available <= 0 => {
            health.available = Verdict::new(false, REASON_UNAVAILABLE, "AvailableReplicas is 0");
            health.requeue = true;
        }
        Some(_) => {}
    }

    health
}

// === impl Verdict ===

impl Verdict {
    fn new(status: bool, reason: &'static str, message: &'static str) -> Self {
        Self {
            status: status.into(),
            reason,
            message,
        }
    }
}

// === impl Health ===

impl Health {
    /// Merges this verdict into the live conditions.
    pub fn conditions(&self, current: &[Condition], now: &str) -> Vec<Condition> {
        let mut set = ConditionSet::new(current);
        for (type_, verdict) in [
            (ConditionType::Available, &self.available),
            (ConditionType::Degraded, &self.degraded),
        ] {
            set.set(type_, verdict.status, verdict.reason, verdict.message, now);
        }
        set.into_vec()
    }
}
