use super::*;
use crate::{
    core::{
        config::{CREDENTIALS_FILE, METRICS_ADDR},
        IngressRule as ConfigRule, TunnelConfig,
    },
    ingress::{reconcile, CONFIG_KEY},
    k8s::{labels, ConditionStatus, ConfigMap, Deployment, Tunnel, TunnelSpec},
    Error,
};
use kube::runtime::controller::Action;
use pretty_assertions::assert_eq;

const CHILD: &str = "cloudflare-web";

async fn pass(store: &FakeStore, ctx: &Arc<Context<FakeStore>>) -> Result<Action, Error> {
    let ingress = store
        .object::<Cloudflare>(NS, "web")
        .expect("ingress resource must exist");
    reconcile(Arc::new(ingress), ctx.clone()).await
}

fn rendered(store: &FakeStore) -> TunnelConfig {
    let config_map = store
        .object::<ConfigMap>(NS, CHILD)
        .expect("ConfigMap must exist");
    let data = config_map.data.expect("ConfigMap must have data");
    serde_yaml::from_str(&data[CONFIG_KEY]).expect("config must parse")
}

fn conditions(store: &FakeStore) -> Vec<Condition> {
    store
        .object::<Cloudflare>(NS, "web")
        .expect("ingress resource must exist")
        .conditions()
        .to_vec()
}

fn setup() -> (FakeStore, Arc<Context<FakeStore>>, Cloudflare) {
    let store = FakeStore::default();
    let ctx = context(&store, &Arc::new(FakeRegistry::default()));
    let ingress = store.seed(&cloudflare(
        "web",
        "edge",
        &[("a.example.com", "http://svc-a:80")],
    ));
    (store, ctx, ingress)
}

#[tokio::test]
async fn first_pass_creates_children() {
    let (store, ctx, ingress) = setup();
    let uid = ingress.uid().expect("seeded objects have a uid");

    let action = pass(&store, &ctx).await.expect("pass must succeed");
    assert_eq!(action, Action::await_change());
    assert_eq!(
        store.take_writes(),
        [
            "create Tunnel/edge",
            "create ConfigMap/cloudflare-web",
            "apply Deployment/cloudflare-web",
            "patch_status Cloudflare/web",
        ]
    );

    let tunnel = store.object::<Tunnel>(NS, "edge").expect("Tunnel must exist");
    assert_eq!(owners(&tunnel), [uid.clone()]);
    assert_eq!(tunnel.spec, TunnelSpec::default());
    assert_eq!(
        tunnel.labels().get(labels::CREATED_BY).map(String::as_str),
        Some(MANAGER)
    );

    let config_map = store.object::<ConfigMap>(NS, CHILD).expect("ConfigMap must exist");
    assert_eq!(owners(&config_map), [uid.clone()]);
    assert_eq!(
        rendered(&store),
        TunnelConfig {
            tunnel: "edge".to_string(),
            credentials_file: CREDENTIALS_FILE.to_string(),
            metrics: METRICS_ADDR.to_string(),
            ingress: vec![
                ConfigRule::new("a.example.com", "http://svc-a:80"),
                ConfigRule::fallback(),
            ],
        }
    );

    let deployment = store
        .object::<Deployment>(NS, CHILD)
        .expect("Deployment must exist");
    assert_eq!(owners(&deployment), [uid]);
    let spec = deployment.spec.expect("Deployment must have a spec");
    assert_eq!(spec.replicas, Some(1));
    let pod = spec.template.spec.expect("template must have a pod spec");
    assert_eq!(pod.containers.len(), 1);
    assert_eq!(pod.containers[0].image.as_deref(), Some(IMAGE));
    assert_eq!(
        pod.containers[0].args.as_deref().unwrap_or_default(),
        [
            "tunnel",
            "--config",
            "/etc/cloudflared/config/config.yaml",
            "--http2-origin",
            "run",
        ]
    );
    let secrets = pod
        .volumes
        .iter()
        .flatten()
        .filter_map(|v| v.secret.as_ref()?.secret_name.clone())
        .collect::<Vec<_>>();
    assert_eq!(secrets, ["edge-credentials"]);

    // Conditions describe the children as found before they were created.
    let conditions = conditions(&store);
    let degraded = find(&conditions, ConditionType::Degraded);
    assert_eq!(degraded.status, ConditionStatus::True);
    assert_eq!(degraded.reason, "Reconciling");
    assert_eq!(degraded.message, "Deployment not found");
    let available = find(&conditions, ConditionType::Available);
    assert_eq!(available.status, ConditionStatus::False);
    assert_eq!(available.reason, "Reconciling");
}

#[tokio::test]
async fn steady_state_makes_no_writes() {
    let (store, ctx, _) = setup();
    pass(&store, &ctx).await.expect("pass must succeed");
    store.set_status::<Deployment>(NS, CHILD, json!({ "replicas": 1, "availableReplicas": 1 }));
    store.take_writes();

    let action = pass(&store, &ctx).await.expect("pass must succeed");
    assert_eq!(action, Action::await_change());
    assert_eq!(store.take_writes(), ["patch_status Cloudflare/web"]);
    let conditions = conditions(&store);
    assert_eq!(
        find(&conditions, ConditionType::Available).status,
        ConditionStatus::True
    );
    assert_eq!(
        find(&conditions, ConditionType::Degraded).status,
        ConditionStatus::False
    );

    let action = pass(&store, &ctx).await.expect("pass must succeed");
    assert_eq!(action, Action::await_change());
    assert_eq!(store.take_writes(), Vec::<String>::new());
}

#[tokio::test]
async fn unavailable_daemon_is_requeued() {
    let (store, ctx, _) = setup();
    pass(&store, &ctx).await.expect("pass must succeed");
    store.set_status::<Deployment>(NS, CHILD, json!({ "replicas": 1, "availableReplicas": 0 }));

    let action = pass(&store, &ctx).await.expect("pass must succeed");
    assert_eq!(action, Action::requeue(REQUEUE_UNAVAILABLE));

    let conditions = conditions(&store);
    let available = find(&conditions, ConditionType::Available);
    assert_eq!(available.status, ConditionStatus::False);
    assert_eq!(available.reason, "Unavailable");
    assert_eq!(available.message, "AvailableReplicas is 0");
    assert_eq!(
        find(&conditions, ConditionType::Degraded).status,
        ConditionStatus::False
    );
}

#[tokio::test]
async fn config_follows_tunnel_identity() {
    let (store, ctx, _) = setup();
    pass(&store, &ctx).await.expect("pass must succeed");
    store.set_status::<Tunnel>(NS, "edge", json!({ "phase": "Running", "tunnelID": "tunnel-7" }));
    store.take_writes();

    pass(&store, &ctx).await.expect("pass must succeed");
    assert_eq!(
        store.take_writes(),
        [
            "replace ConfigMap/cloudflare-web",
            "patch_status Cloudflare/web",
        ]
    );
    assert_eq!(rendered(&store).tunnel, "tunnel-7");
}

#[tokio::test]
async fn spec_changes_are_applied() {
    let (store, ctx, _) = setup();
    pass(&store, &ctx).await.expect("pass must succeed");
    store.take_writes();

    let mut ingress = store.object::<Cloudflare>(NS, "web").expect("must exist");
    ingress.spec.replicas = 3;
    ingress.spec.ingress.push(crate::k8s::IngressRule {
        hostname: String::new(),
        service: "http://default:80".to_string(),
    });
    store.seed(&ingress);

    pass(&store, &ctx).await.expect("pass must succeed");
    assert_eq!(
        store.take_writes(),
        [
            "replace ConfigMap/cloudflare-web",
            "apply Deployment/cloudflare-web",
            "patch_status Cloudflare/web",
        ]
    );

    let deployment = store.object::<Deployment>(NS, CHILD).expect("must exist");
    assert_eq!(deployment.spec.and_then(|s| s.replicas), Some(3));
    let ingress = rendered(&store).ingress;
    assert_eq!(
        ingress,
        [
            ConfigRule::new("a.example.com", "http://svc-a:80"),
            ConfigRule::catch_all("http://default:80"),
            ConfigRule::fallback(),
        ]
    );
}

#[tokio::test]
async fn failed_writes_still_report_status() {
    let (store, ctx, _) = setup();
    store.fail::<Deployment>("apply", 500);

    let error = pass(&store, &ctx).await.expect_err("pass must fail");
    assert!(matches!(error, Error::Kube(_)), "{error}");
    assert_eq!(
        store.take_writes(),
        [
            "create Tunnel/edge",
            "create ConfigMap/cloudflare-web",
            "patch_status Cloudflare/web",
        ]
    );
    let conditions = conditions(&store);
    assert_eq!(
        find(&conditions, ConditionType::Degraded).message,
        "Deployment not found"
    );
}

#[tokio::test]
async fn failed_reads_abort_the_pass() {
    let (store, ctx, _) = setup();
    store.fail::<ConfigMap>("get", 500);

    pass(&store, &ctx).await.expect_err("pass must fail");
    assert_eq!(store.take_writes(), Vec::<String>::new());
    assert!(conditions(&store).is_empty());
}

#[tokio::test]
async fn deleted_resources_are_skipped() {
    let store = FakeStore::default();
    let ctx = context(&store, &Arc::new(FakeRegistry::default()));
    store.seed(&deleting(cloudflare("web", "edge", &[])));

    let action = pass(&store, &ctx).await.expect("pass must succeed");
    assert_eq!(action, Action::await_change());
    assert_eq!(store.take_writes(), Vec::<String>::new());
}
