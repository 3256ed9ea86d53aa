use std::collections::BTreeMap;

pub const NAME: &str = "app.kubernetes.io/name";
pub const INSTANCE: &str = "app.kubernetes.io/instance";
pub const CREATED_BY: &str = "app.kubernetes.io/created-by";

/// The value of [`NAME`] on every daemon workload.
pub const DAEMON: &str = "cloudflared";

pub type Map = BTreeMap<String, String>;

/// The labels carried by every object the controller generates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Labels {
    instance: String,
    created_by: String,
}

// === impl Labels ===

impl Labels {
    pub fn new(instance: impl Into<String>, created_by: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
            created_by: created_by.into(),
        }
    }

    /// The labels that select the daemon's pods.
    pub fn selector(&self) -> Map {
        [(NAME, DAEMON), (INSTANCE, self.instance.as_str())]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    pub fn to_map(&self) -> Map {
        let mut labels = self.selector();
        labels.insert(CREATED_BY.to_string(), self.created_by.clone());
        labels
    }
}

/// Selects every object created by the given field manager.
pub fn created_by_selector(field_manager: &str) -> String {
    format!("{CREATED_BY}={field_manager}")
}
