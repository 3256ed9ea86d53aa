use crate::{aggregate, ingress_patch, now, tunnel_patch, ConditionSet, Observed};
use pretty_assertions::assert_eq;
use tunnel_controller_k8s_api::{
    self as k8s, Condition, ConditionStatus, ConditionType, TunnelPhase, TunnelStatus,
};

fn condition(type_: ConditionType, status: ConditionStatus, reason: &str) -> Condition {
    Condition {
        type_,
        status,
        reason: reason.to_string(),
        message: String::new(),
        last_transition_time: "2024-01-01T00:00:00Z".to_string(),
    }
}

fn find(conditions: &[Condition], type_: ConditionType) -> &Condition {
    let mut matching = conditions.iter().filter(|c| c.type_ == type_);
    let c = matching.next().expect("condition must be present");
    assert!(matching.next().is_none(), "duplicate {type_} condition");
    c
}

#[test]
fn healthy() {
    let health = aggregate(Observed {
        config_map: true,
        deployment: Some(2),
    });
    assert!(!health.requeue);

    let conditions = health.conditions(&[], &now());
    assert_eq!(conditions.len(), 2);
    assert_eq!(conditions[0].type_, ConditionType::Available);
    assert_eq!(conditions[0].status, ConditionStatus::True);
    assert_eq!(conditions[0].reason, "OK");
    assert_eq!(conditions[1].type_, ConditionType::Degraded);
    assert_eq!(conditions[1].status, ConditionStatus::False);
}

#[test]
fn missing_deployment() {
    let health = aggregate(Observed {
        config_map: false,
        deployment: None,
    });
    assert!(!health.requeue);

    let conditions = health.conditions(&[], &now());
    let degraded = find(&conditions, ConditionType::Degraded);
    assert_eq!(degraded.status, ConditionStatus::True);
    assert_eq!(degraded.reason, "Reconciling");
    assert_eq!(degraded.message, "Deployment not found");

    let available = find(&conditions, ConditionType::Available);
    assert_eq!(available.status, ConditionStatus::False);
    assert_eq!(available.reason, "Reconciling");
}

#[test]
fn missing_config_map() {
    let health = aggregate(Observed {
        config_map: false,
        deployment: Some(1),
    });
    let conditions = health.conditions(&[], &now());
    let degraded = find(&conditions, ConditionType::Degraded);
    assert_eq!(degraded.status, ConditionStatus::True);
    assert_eq!(degraded.message, "ConfigMap not found");
    assert_eq!(
        find(&conditions, ConditionType::Available).status,
        ConditionStatus::False
    );
}

#[test]
fn unavailable_replicas_requeue() {
    let health = aggregate(Observed {
        config_map: true,
        deployment: Some(0),
    });
    assert!(health.requeue);

    let conditions = health.conditions(&[], &now());
    let available = find(&conditions, ConditionType::Available);
    assert_eq!(available.status, ConditionStatus::False);
    assert_eq!(available.reason, "Unavailable");
    assert_eq!(available.message, "AvailableReplicas is 0");
    assert_eq!(
        find(&conditions, ConditionType::Degraded).status,
        ConditionStatus::False
    );
}

#[test]
fn unavailable_reasons_are_bounded() {
    for config_map in [true, false] {
        for deployment in [None, Some(0), Some(1)] {
            let conditions = aggregate(Observed {
                config_map,
                deployment,
            })
            .conditions(&[], &now());
            let available = find(&conditions, ConditionType::Available);
            if available.status == ConditionStatus::False {
                assert!(
                    ["Reconciling", "Unavailable"].contains(&available.reason.as_str()),
                    "{available:?}"
                );
            }
            find(&conditions, ConditionType::Degraded);
        }
    }
}

#[test]
fn transition_time_only_moves_with_status() {
    let current = vec![
        condition(ConditionType::Degraded, ConditionStatus::False, "OK"),
        condition(ConditionType::Available, ConditionStatus::False, "Reconciling"),
    ];

    // Neither status changes, only Available's reason.
    let conditions = aggregate(Observed {
        config_map: true,
        deployment: Some(0),
    })
    .conditions(&current, &now());

    // Order of the live conditions is preserved.
    assert_eq!(conditions[0].type_, ConditionType::Degraded);
    assert_eq!(conditions[0].last_transition_time, "2024-01-01T00:00:00Z");
    assert_eq!(conditions[1].type_, ConditionType::Available);
    assert_eq!(conditions[1].reason, "Unavailable");
    assert_eq!(conditions[1].last_transition_time, "2024-01-01T00:00:00Z");

    let conditions = aggregate(Observed {
        config_map: true,
        deployment: Some(1),
    })
    .conditions(&current, &now());
    assert_eq!(conditions[1].status, ConditionStatus::True);
    assert_eq!(conditions[1].last_transition_time, now());
}

#[test]
fn steady_state_is_unchanged() {
    let observed = Observed {
        config_map: true,
        deployment: Some(1),
    };
    let first = aggregate(observed).conditions(&[], "2024-01-01T00:00:00Z");
    let second = aggregate(observed).conditions(&first, &now());
    assert_eq!(first, second);
}

#[test]
fn duplicate_types_collapse() {
    let set = ConditionSet::new(&[
        condition(ConditionType::Available, ConditionStatus::True, "OK"),
        condition(ConditionType::Available, ConditionStatus::False, "Reconciling"),
    ]);
    assert_eq!(set.as_slice().len(), 1);
    assert_eq!(
        set.get(ConditionType::Available).map(|c| c.status),
        Some(ConditionStatus::True)
    );
    assert!(set.get(ConditionType::Degraded).is_none());
}

#[test]
fn patches_carry_status() {
    let conditions = vec![condition(ConditionType::Available, ConditionStatus::True, "OK")];
    let k8s::Patch::Merge(value) = ingress_patch(&conditions) else {
        panic!("ingress status must be merge patched");
    };
    assert_eq!(value["kind"], "Cloudflare");
    assert_eq!(value["status"]["conditions"][0]["type"], "Available");
    assert_eq!(
        value["status"]["conditions"][0]["lastTransitionTime"],
        "2024-01-01T00:00:00Z"
    );

    let status = TunnelStatus {
        phase: TunnelPhase::Running,
        tunnel_id: Some("abc".to_string()),
        observed_generation: Some(1),
        conditions,
    };
    let k8s::Patch::Merge(value) = tunnel_patch(&status) else {
        panic!("tunnel status must be merge patched");
    };
    assert_eq!(value["status"]["phase"], "Running");
    assert_eq!(value["status"]["tunnelID"], "abc");
}
