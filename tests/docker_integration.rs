//! End-to-end tests against a real Docker daemon.
//!
//! These pull or build LocalStack images and take minutes, so they are
//! ignored by default. Run them with:
//!
//! ```text
//! cargo test --test docker_integration -- --ignored --test-threads=1
//! ```

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use localstack_harness::docker::{BollardEngine, ContainerEngine};
use localstack_harness::service::{self, AVAILABLE_SERVICES, Service};
use localstack_harness::{Instance, LocalstackError};

fn engine() -> BollardEngine {
    BollardEngine::connect_local().expect("docker client")
}

fn instance(version: &str) -> Arc<Instance> {
    Arc::new(
        Instance::builder()
            .version(version)
            .label("localstack-harness.test", "docker_integration")
            .build()
            .expect("instance"),
    )
}

async fn accepts_connections(endpoint: &str) -> bool {
    matches!(
        tokio::time::timeout(Duration::from_secs(2), TcpStream::connect(endpoint)).await,
        Ok(Ok(_))
    )
}

fn assert_host_port(endpoint: &str) {
    let (host, port) = endpoint.rsplit_once(':').expect("host:port");
    assert!(!host.is_empty(), "empty host in {endpoint}");
    let port: u16 = port.parse().expect("numeric port");
    assert_ne!(port, 0);
}

#[tokio::test]
#[ignore = "requires a running Docker daemon"]
async fn test_daemon_answers_ping() {
    engine().ping().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running Docker daemon"]
async fn test_fixed_port_instance_shares_one_endpoint() {
    let instance = instance("latest");
    instance.start(&[]).await.unwrap();

    let endpoints: HashSet<String> = AVAILABLE_SERVICES
        .iter()
        .map(|s| instance.endpoint(*s))
        .collect();
    assert_eq!(endpoints.len(), 1);
    endpoints.iter().for_each(|e| assert_host_port(e));

    instance.stop().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running Docker daemon"]
async fn test_legacy_instance_has_distinct_endpoints() {
    let instance = instance("0.11.4");
    instance.start(&[]).await.unwrap();

    let endpoints: Vec<String> = AVAILABLE_SERVICES
        .iter()
        .map(|s| instance.endpoint(*s))
        .collect();
    endpoints.iter().for_each(|e| assert_host_port(e));
    let distinct: HashSet<&String> = endpoints.iter().collect();
    assert_eq!(distinct.len(), endpoints.len());

    instance.stop().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running Docker daemon"]
async fn test_restart_releases_previous_container() {
    let instance = instance("latest");
    instance.start(&[]).await.unwrap();
    let old_id = instance.container_id().unwrap();
    let old_endpoint = instance.endpoint(service::SQS);

    instance.start(&[]).await.unwrap();

    // The engine may hand the same host port to the new container.
    if instance.endpoint(service::SQS) != old_endpoint {
        assert!(!accepts_connections(&old_endpoint).await);
    }
    let running = engine().list_running().await.unwrap();
    assert!(running.iter().all(|c| c.id != old_id));

    instance.stop().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running Docker daemon"]
async fn test_stop_twice_clears_endpoints() {
    let instance = instance("latest");
    instance.start(&[]).await.unwrap();

    instance.stop().await.unwrap();
    instance.stop().await.unwrap();

    for service in AVAILABLE_SERVICES {
        assert_eq!(instance.endpoint(service), "");
    }
}

#[tokio::test]
#[ignore = "requires a running Docker daemon"]
async fn test_selected_subset_only_opens_selected_ports() {
    let instance = instance("0.11.4");
    instance.start(&[service::SQS]).await.unwrap();

    let open: Vec<Service> = vec![service::SQS, service::DYNAMODB];
    for service in open.iter().copied() {
        assert!(accepts_connections(&instance.endpoint(service)).await);
    }

    // Ports of services that were not started are published but nothing
    // listens behind them; look them up on the container directly.
    let id = instance.container_id().unwrap();
    let ports = engine().inspect_ports(&id).await.unwrap();
    let host_port = ports
        .get(service::KINESIS.port)
        .and_then(|b| b.first())
        .map(|b| b.host_port.clone())
        .unwrap();
    assert!(!accepts_connections(&format!("localhost:{host_port}")).await);

    instance.stop().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running Docker daemon"]
async fn test_short_timeout_container_tears_itself_down() {
    let instance = Arc::new(
        Instance::builder()
            .version("latest")
            .timeout(Duration::from_secs(1))
            .build()
            .unwrap(),
    );

    let result = instance.start(&[]).await;
    if let Err(e) = &result {
        assert!(matches!(e, LocalstackError::ContainerDisappeared { .. }));
    }

    let mut gone = false;
    for _ in 0..30 {
        let running = engine().list_running().await.unwrap();
        if running
            .iter()
            .all(|c| !c.image.starts_with("localstack-harness:latest-1s"))
        {
            gone = true;
            break;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    assert!(gone);
}

#[tokio::test]
#[ignore = "requires a running Docker daemon"]
async fn test_cancellation_stops_container() {
    let instance = instance("latest");
    let cancel = CancellationToken::new();

    instance
        .start_with_cancellation(cancel.clone(), &[])
        .await
        .unwrap();
    let id = instance.container_id().unwrap();

    cancel.cancel();
    let mut gone = false;
    for _ in 0..30 {
        let running = engine().list_running().await.unwrap();
        if running.iter().all(|c| c.id != id) {
            gone = true;
            break;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    assert!(gone);
    assert_eq!(instance.endpoint(service::SQS), "");
}
