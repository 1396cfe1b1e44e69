// shadowwall-core/src/honeypot/tests_registry.rs

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::common::ServiceType;
use crate::error::DeceptionError;

use super::{HoneypotRegistry, InstanceState, RegistryConfig};

/// Registry bound to loopback. Tests that share a service type get their
/// own port slice so parallel test runs cannot collide.
fn test_registry(max_instances: usize, generic_range: Option<(u16, u16)>) -> Arc<HoneypotRegistry> {
    let mut config = RegistryConfig {
        bind_addr: "127.0.0.1".to_string(),
        max_instances,
        ..RegistryConfig::default()
    };
    if let Some(range) = generic_range {
        config.port_ranges.insert(ServiceType::Generic, range);
    }
    Arc::new(HoneypotRegistry::new(config))
}

#[tokio::test]
async fn test_deploy_ssh_takes_first_port_in_range() {
    let registry = test_registry(10, None);

    let id = registry.deploy(ServiceType::Ssh, None).await.unwrap();
    let status = registry.status();

    let inst = &status.honeypots[&id];
    assert_eq!(inst.port, 2200);
    assert_eq!(inst.state, InstanceState::Running);
    assert_eq!(status.running_instances, 1);
    assert!(id.starts_with("ssh_2200_"));

    registry.shutdown();
}

#[tokio::test]
async fn test_quota_never_exceeded() {
    let registry = test_registry(2, Some((3700, 3709)));

    let a = registry.deploy(ServiceType::Generic, None).await.unwrap();
    let _b = registry.deploy(ServiceType::Generic, None).await.unwrap();

    let err = registry.deploy(ServiceType::Generic, None).await.unwrap_err();
    assert!(matches!(err, DeceptionError::MaxInstancesReached(2)));
    assert_eq!(registry.running_count(), 2);

    // Quota is about running instances: stopping one frees a slot.
    registry.stop(&a);
    registry.deploy(ServiceType::Generic, None).await.unwrap();
    assert_eq!(registry.running_count(), 2);

    registry.shutdown();
}

#[tokio::test]
async fn test_concurrent_deploys_respect_quota_and_ports() {
    let registry = test_registry(3, Some((3720, 3729)));

    let mut handles = Vec::new();
    for _ in 0..6 {
        let reg = registry.clone();
        handles.push(tokio::spawn(async move {
            reg.deploy(ServiceType::Generic, None).await
        }));
    }

    let mut ok = 0;
    let mut quota_hits = 0;
    let mut ports = Vec::new();
    for h in handles {
        match h.await.unwrap() {
            Ok(id) => {
                ok += 1;
                ports.push(registry.status().honeypots[&id].port);
            }
            Err(DeceptionError::MaxInstancesReached(_)) => quota_hits += 1,
            Err(e) => panic!("unexpected deploy error: {}", e),
        }
    }

    assert_eq!(ok, 3);
    assert_eq!(quota_hits, 3);
    ports.sort_unstable();
    ports.dedup();
    assert_eq!(ports.len(), 3, "two deploys claimed the same port");

    registry.shutdown();
}

#[tokio::test]
async fn test_port_allocation_exhausted() {
    let registry = test_registry(10, Some((3740, 3741)));

    registry.deploy(ServiceType::Generic, None).await.unwrap();
    registry.deploy(ServiceType::Generic, None).await.unwrap();

    let err = registry.deploy(ServiceType::Generic, None).await.unwrap_err();
    assert!(matches!(err, DeceptionError::PortAllocationExhausted(3740, 3741)));

    registry.shutdown();
}

#[tokio::test]
async fn test_stop_is_idempotent_and_releases_port() {
    let registry = test_registry(10, Some((3760, 3760)));

    let id = registry.deploy(ServiceType::Generic, None).await.unwrap();
    registry.stop(&id);
    assert_eq!(registry.status().honeypots[&id].state, InstanceState::Stopped);

    // Second stop is a no-op, not an error.
    registry.stop(&id);
    assert_eq!(registry.status().honeypots[&id].state, InstanceState::Stopped);
    assert_eq!(registry.running_count(), 0);

    // Stopping an unknown instance is also a no-op.
    registry.stop("no_such_instance");

    // The single port in the range is free again; retry until the OS has
    // fully released the listener.
    let mut redeployed = None;
    for _ in 0..50 {
        match registry.deploy(ServiceType::Generic, None).await {
            Ok(id2) => {
                redeployed = Some(id2);
                break;
            }
            Err(_) => tokio::time::sleep(Duration::from_millis(50)).await,
        }
    }
    let id2 = redeployed.expect("port was not released after stop");
    assert_eq!(registry.status().honeypots[&id2].port, 3760);

    registry.shutdown();
}

#[tokio::test]
async fn test_unknown_service_rejected_without_side_effects() {
    let registry = test_registry(10, None);

    let err = registry.deploy_named("gopher", None).await.unwrap_err();
    assert!(matches!(err, DeceptionError::UnknownServiceType(_)));
    assert_eq!(registry.status().total_instances, 0);
}

#[tokio::test]
async fn test_collect_drains_exactly_once_and_feeds_subscribers() {
    let registry = test_registry(10, Some((3780, 3789)));
    let mut feed = registry.subscribe();

    let id = registry.deploy(ServiceType::Generic, None).await.unwrap();
    let port = registry.status().honeypots[&id].port;

    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let mut buf = [0u8; 64];
    let _ = stream.read(&mut buf).await.unwrap();
    stream.write_all(b"id\n").await.unwrap();
    drop(stream);

    // The session record lands in the emulator buffer asynchronously.
    let mut drained = 0;
    for _ in 0..50 {
        drained += registry.collect_once();
        if drained >= 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(drained, 1);

    // Counter moved by exactly the drained count; buffer now empty.
    let status = registry.status();
    assert_eq!(status.honeypots[&id].interactions, 1);
    assert!(status.honeypots[&id].last_interaction.is_some());
    assert_eq!(registry.collect_once(), 0);

    // Subscriber saw the same record.
    let rec = feed.try_recv().expect("subscriber did not receive the record");
    assert_eq!(rec.instance_id, id);
    assert_eq!(rec.commands, vec!["id"]);

    registry.shutdown();
}

#[tokio::test]
async fn test_monitor_marks_dead_emulator_errored() {
    let registry = test_registry(10, Some((3790, 3799)));

    let id = registry.deploy(ServiceType::Generic, None).await.unwrap();

    // Kill the accept loop behind the registry's back, then let the
    // monitor notice. Removing the emulator entry simulates a crashed one.
    if let Some((_, decoy)) = registry.emulators.remove(&id) {
        decoy.stop();
    }
    registry.monitor_once();

    assert_eq!(registry.status().honeypots[&id].state, InstanceState::Errored);
    assert_eq!(registry.running_count(), 0);

    registry.shutdown();
}

#[tokio::test]
async fn test_recent_log_retention_covers_evaluation_horizon() {
    let registry = test_registry(10, None);
    let now = crate::common::now_ts();

    // An interaction observed shortly after a worst-case-aged response
    // deployed (dwell plus one evaluation interval ago) must survive
    // pruning so the evaluation pass can still count it. Entries past the
    // retention horizon are dropped.
    registry.push_recent(now - 20000, ServiceType::Ssh);
    registry.push_recent(now - 7500, ServiceType::Ssh);
    registry.prune_recent();

    assert_eq!(registry.interactions_since(0), 1);
    assert_eq!(registry.interactions_since(now - 7501), 1);
}

#[tokio::test]
async fn test_adaptive_deployment_grows_targeted_service() {
    let registry = test_registry(10, Some((3800, 3809)));

    registry.deploy(ServiceType::Generic, None).await.unwrap();
    assert_eq!(registry.running_count_of(ServiceType::Generic), 1);

    // Simulate a burst of recent interactions against the generic decoys.
    let now = crate::common::now_ts();
    for _ in 0..11 {
        registry.push_recent(now, ServiceType::Generic);
    }

    registry.adaptive_deploy_once().await;
    assert_eq!(registry.running_count_of(ServiceType::Generic), 2);

    registry.shutdown();
}
