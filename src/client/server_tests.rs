use super::*;
use crate::registry::InMemoryRegistry;
use crate::retry::{limit, no_delay, RetryPolicy, SelectorKind};
use crate::watcher::EventKind;
use axum::{
    routing::{get, put},
    Router,
};
use std::collections::HashMap;
use tokio::net::TcpListener;
use tokio::time::{sleep, timeout};

/// Serves `router` on an ephemeral local port and returns its base URL.
async fn serve(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

async fn setup_test_registry() -> (InMemoryRegistry, String) {
    let registry = InMemoryRegistry::new();
    let url = serve(crate::web::router(registry.clone())).await;
    (registry, url)
}

/// An address nothing listens on.
async fn dead_endpoint() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

fn config(attempts: u32) -> ClientConfig {
    ClientConfig::default()
        .with_timeout(Duration::from_secs(5))
        .with_retry(RetryPolicy {
            selector: SelectorKind::RoundRobin,
            limit: limit(attempts),
            backoff: no_delay(),
        })
}

fn create_test_instance(app: &str, id: &str) -> Instance {
    let mut instance = Instance::new(app, id);
    instance.host_name = "127.0.0.1".to_string();
    instance.ip_addr = "127.0.0.1".to_string();
    instance.vip_address = app.to_lowercase();
    instance.port = crate::registry::Port(7300);
    instance.metadata = {
        let mut map = HashMap::new();
        map.insert("protocol".to_string(), "http".to_string());
        map
    };
    instance
}

#[tokio::test]
async fn test_register_query_deregister() {
    let (registry, url) = setup_test_registry().await;
    let client = Client::new([format!("{}/", url)], config(1)).unwrap();
    let instance = create_test_instance("BILLING", "billing-1");

    client.register(&instance).await.expect("Failed to register instance");
    client.heartbeat(&instance).await.expect("Failed to send heartbeat");

    let apps = client.apps().await.expect("Failed to list apps");
    assert_eq!(apps.len(), 1);
    assert_eq!(apps[0].name, "BILLING");
    assert_eq!(apps[0].instances, vec![instance.clone()]);

    let app = client.app("BILLING").await.expect("Failed to get app");
    assert_eq!(app.instances.len(), 1);

    let fetched = client.app_instance("BILLING", "billing-1").await.unwrap();
    assert_eq!(fetched, instance);
    let fetched = client.instance("billing-1").await.unwrap();
    assert_eq!(fetched, instance);

    client.deregister(&instance).await.expect("Failed to deregister instance");
    assert!(registry.snapshot().await.is_empty());
}

#[tokio::test]
async fn test_status_override_and_removal() {
    let (registry, url) = setup_test_registry().await;
    let client = Client::new([url], config(1)).unwrap();
    let instance = create_test_instance("BILLING", "billing-1");
    client.register(&instance).await.unwrap();

    client
        .status_override(&instance, Status::OutOfService)
        .await
        .expect("Failed to override status");
    let overridden = registry.app_instance("BILLING", "billing-1").await.unwrap();
    assert_eq!(overridden.status, Status::OutOfService);
    assert_eq!(overridden.overridden_status, Status::OutOfService);

    client
        .remove_status_override(&instance, Status::Up)
        .await
        .expect("Failed to remove status override");
    let restored = registry.app_instance("BILLING", "billing-1").await.unwrap();
    assert_eq!(restored.status, Status::Up);
    assert_eq!(restored.overridden_status, Status::Unknown);
}

#[tokio::test]
async fn test_unexpected_status_is_surfaced() {
    let (_registry, url) = setup_test_registry().await;
    let client = Client::new([url], config(2)).unwrap();
    let instance = create_test_instance("BILLING", "unknown");

    let err = client.deregister(&instance).await.unwrap_err();
    assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));

    client.register(&instance).await.unwrap();
    let err = client.register(&instance).await.unwrap_err();
    assert_eq!(err.status(), Some(StatusCode::CONFLICT));
}

#[tokio::test]
async fn test_fails_over_to_next_endpoint() {
    let (registry, url) = setup_test_registry().await;
    let client = Client::new([dead_endpoint().await, url], config(2)).unwrap();
    let instance = create_test_instance("BILLING", "billing-1");

    client.register(&instance).await.expect("second endpoint should be used");
    assert_eq!(registry.snapshot().await.len(), 1);
}

#[tokio::test]
async fn test_transport_error_after_exhausting_attempts() {
    let client = Client::new([dead_endpoint().await], config(3)).unwrap();

    let err = client.apps().await.unwrap_err();
    assert!(matches!(err, ClientError::Transport { .. }));
}

#[tokio::test]
async fn test_malformed_body_is_a_decode_error() {
    let url = serve(Router::new().route("/apps", get(|| async { "<applications/>" }))).await;
    let client = Client::new([url], config(2)).unwrap();

    let err = client.apps().await.unwrap_err();
    assert!(matches!(err, ClientError::Decode { .. }));
}

#[tokio::test]
async fn test_decode_failure_retries_on_next_endpoint() {
    let broken = serve(Router::new().route("/apps", get(|| async { "not json" }))).await;
    let (registry, url) = setup_test_registry().await;
    registry
        .register("BILLING", create_test_instance("BILLING", "billing-1"))
        .await
        .unwrap();
    let client = Client::new([broken, url], config(2)).unwrap();

    let apps = client.apps().await.expect("second endpoint should answer");
    assert_eq!(apps.len(), 1);
}

#[tokio::test]
async fn test_watch_over_http() {
    let (registry, url) = setup_test_registry().await;
    let client = Client::new([url], config(1)).unwrap();
    let mut watcher = client.watch(Duration::from_millis(50));

    client.register(&create_test_instance("BILLING", "billing-1")).await.unwrap();

    let event = timeout(Duration::from_secs(5), watcher.next_event())
        .await
        .expect("timed out waiting for event")
        .expect("watcher stopped");
    assert_eq!(event.kind, EventKind::Registered);
    assert_eq!(event.instance.instance_id, "billing-1");

    registry.deregister("BILLING", "billing-1").await.unwrap();
    let event = timeout(Duration::from_secs(5), watcher.next_event())
        .await
        .expect("timed out waiting for event")
        .expect("watcher stopped");
    assert_eq!(event.kind, EventKind::Deregistered);

    watcher.shutdown().await;
}

#[tokio::test]
async fn test_background_heartbeat_renews_lease() {
    let (registry, url) = setup_test_registry().await;
    let client = Client::new([url], config(1)).unwrap();
    let instance = create_test_instance("BILLING", "billing-1");
    client.register(&instance).await.unwrap();

    let registered = registry.app_instance("BILLING", "billing-1").await.unwrap();
    let heartbeat = client.start_heartbeat(instance, Duration::from_millis(50));
    sleep(Duration::from_millis(300)).await;
    heartbeat.shutdown().await;

    let renewed = registry.app_instance("BILLING", "billing-1").await.unwrap();
    assert!(
        renewed.lease_info.last_renewal_timestamp > registered.lease_info.last_renewal_timestamp
    );
}

#[tokio::test]
async fn test_heartbeat_stops_while_request_is_pending() {
    // answers heartbeats only after an hour
    let router = Router::new().route(
        "/apps/:app/:id",
        put(|| async {
            sleep(Duration::from_secs(3600)).await;
            StatusCode::OK
        }),
    );
    let url = serve(router).await;
    let client = Client::new([url], config(1).with_timeout(Duration::from_secs(3600))).unwrap();

    let heartbeat = client.start_heartbeat(
        create_test_instance("BILLING", "billing-1"),
        Duration::from_millis(20),
    );
    sleep(Duration::from_millis(100)).await;

    timeout(Duration::from_secs(5), heartbeat.shutdown())
        .await
        .expect("heartbeat did not stop while a request was in flight");
}
