#[cfg(not(test))]
use chrono::offset::Utc;
use chrono::SecondsFormat;
use tunnel_controller_k8s_api::{Condition, ConditionStatus, ConditionType};

/// An order-preserving set of conditions holding at most one entry per type.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConditionSet(Vec<Condition>);

/// The current time, formatted as a condition transition time.
pub fn now() -> String {
    #[cfg(not(test))]
    let timestamp = Utc::now();
    #[cfg(test)]
    let timestamp = chrono::DateTime::<chrono::Utc>::MIN_UTC;

    timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
}

// === impl ConditionSet ===

impl ConditionSet {
    /// Starts from the live conditions. Later duplicates of a type are
    /// dropped.
    pub fn new(conditions: &[Condition]) -> Self {
        let mut set = Vec::<Condition>::with_capacity(conditions.len());
        for c in conditions {
            if !set.iter().any(|s| s.type_ == c.type_) {
                set.push(c.clone());
            }
        }
        Self(set)
    }

    #[cfg(test)]
    pub(crate) fn get(&self, type_: ConditionType) -> Option<&Condition> {
        self.0.iter().find(|c| c.type_ == type_)
    }

    /// Replaces the condition of the given type in place, or appends it.
    ///
    /// The transition time only moves when the status changes.
    pub fn set(
        &mut self,
        type_: ConditionType,
        status: ConditionStatus,
        reason: &str,
        message: &str,
        now: &str,
    ) {
        match self.0.iter_mut().find(|c| c.type_ == type_) {
            Some(c) => {
                if c.status != status {
                    c.status = status;
                    c.last_transition_time = now.to_string();
                }
                c.reason = reason.to_string();
                c.message = message.to_string();
            }
            None => self.0.push(Condition {
                type_,
                status,
                reason: reason.to_string(),
                message: message.to_string(),
                last_transition_time: now.to_string(),
            }),
        }
    }

    pub fn as_slice(&self) -> &[Condition] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<Condition> {
        self.0
    }
}
