use crate::Error;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::{
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};
use tokio::time;

#[derive(Clone, Debug)]
pub(crate) struct ControllerMetrics {
    reconciles: Family<ReconcileLabels, Counter>,
}

#[derive(Clone, Debug)]
pub(crate) struct RegistryMetrics {
    requests: Family<RequestLabels, Counter>,
    latency: Family<OperationLabels, Histogram>,
}

/// Observes a single registry request.
pub(crate) struct RequestObserver {
    start: time::Instant,
    metrics: RegistryMetrics,
    operation: &'static str,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct ReconcileLabels {
    kind: &'static str,
    outcome: &'static str,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct RequestLabels {
    operation: &'static str,
    outcome: &'static str,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct OperationLabels {
    operation: &'static str,
}

// === impl ControllerMetrics ===

impl ControllerMetrics {
    pub(crate) fn register(reg: &mut Registry) -> Self {
        let reconciles = Family::<ReconcileLabels, Counter>::default();
        reg.register(
            "reconciles",
            "Total number of reconciliation passes by resource kind and outcome",
            reconciles.clone(),
        );

        Self { reconciles }
    }

    pub(crate) fn reconciled<T>(&self, kind: &'static str, result: &Result<T, Error>) {
        let outcome = match result {
            Ok(_) => "ok",
            Err(Error::Registry(e)) if e.is_transient() => "registry_unavailable",
            Err(_) => "error",
        };
        self.reconciles
            .get_or_create(&ReconcileLabels { kind, outcome })
            .inc();
    }
}

// === impl RegistryMetrics ===

impl RegistryMetrics {
    pub(crate) fn register(reg: &mut Registry) -> Self {
        let requests = Family::<RequestLabels, Counter>::default();
        reg.register(
            "requests",
            "Total number of tunnel registry requests by operation and outcome",
            requests.clone(),
        );

        let latency = Family::<OperationLabels, Histogram>::new_with_constructor(|| {
            Histogram::new([0.05, 0.1, 0.5, 1.0, 5.0, 10.0])
        });
        reg.register_with_unit(
            "latency",
            "Histogram of tunnel registry request latency (seconds)",
            prometheus_client::registry::Unit::Seconds,
            latency.clone(),
        );

        Self { requests, latency }
    }

    pub(crate) fn start(&self, operation: &'static str) -> RequestObserver {
        RequestObserver {
            start: time::Instant::now(),
            metrics: self.clone(),
            operation,
        }
    }
}

// === impl RequestObserver ===

impl RequestObserver {
    pub(crate) fn end<T>(self, result: &Result<T, crate::core::registry::Error>) {
        use crate::core::registry::Error;

        let outcome = match result {
            Ok(_) => "ok",
            Err(Error::Unavailable(_)) => "unavailable",
            Err(Error::Rejected(_)) => "rejected",
            Err(Error::Credentials(_)) => "credentials",
            Err(Error::Response(_)) => "invalid_response",
        };
        let operation = self.operation;
        self.metrics
            .requests
            .get_or_create(&RequestLabels { operation, outcome })
            .inc();
        self.metrics
            .latency
            .get_or_create(&OperationLabels { operation })
            .observe(self.start.elapsed().as_secs_f64());
    }
}
