// shadowwall-core/src/deception/tests_controller.rs

use std::sync::Arc;

use crate::common::{now_ts, HoneypotInteraction, IocEvent, ServiceType, ThreatEvent};
use crate::honeypot::{HoneypotRegistry, RegistryConfig};

use super::strategy::{DeceptionStrategy, StrategyCatalog, StrategyKind};
use super::{ControllerConfig, DeceptionController};

/// Controller over a loopback registry. Honeypot-backed tests get their
/// own port slices so parallel tests cannot collide on real sockets.
fn test_controller(base_port: Option<u16>) -> Arc<DeceptionController> {
    let mut config = RegistryConfig {
        bind_addr: "127.0.0.1".to_string(),
        max_instances: 20,
        ..RegistryConfig::default()
    };
    if let Some(base) = base_port {
        config.port_ranges.insert(ServiceType::Ssh, (base, base + 9));
        config.port_ranges.insert(ServiceType::Http, (base + 10, base + 19));
        config.port_ranges.insert(ServiceType::Ftp, (base + 20, base + 29));
        config.port_ranges.insert(ServiceType::Telnet, (base + 30, base + 39));
    }
    let registry = Arc::new(HoneypotRegistry::new(config));
    Arc::new(DeceptionController::new(
        registry,
        Arc::new(StrategyCatalog::builtin()),
        ControllerConfig {
            dwell_secs: 0,
            ..ControllerConfig::default()
        },
    ))
}

fn threat(id: &str, threat_type: &str) -> ThreatEvent {
    ThreatEvent {
        id: id.to_string(),
        threat_type: threat_type.to_string(),
        source_ip: Some("198.51.100.7".parse().unwrap()),
        confidence: 0.9,
        timestamp: now_ts(),
    }
}

fn interaction(source: &str, commands: &[&str]) -> HoneypotInteraction {
    HoneypotInteraction {
        timestamp: now_ts(),
        instance_id: "ssh_2200_0".to_string(),
        source_ip: source.parse().unwrap(),
        source_port: 50000,
        service: ServiceType::Ssh,
        interaction_type: "authentication_attempt".to_string(),
        duration: 1.2,
        commands: commands.iter().map(|c| c.to_string()).collect(),
        payloads: Vec::new(),
        successful: false,
        session_data: serde_json::json!({}),
    }
}

#[tokio::test]
async fn test_port_scan_deploys_adaptive_honeypots() {
    let controller = test_controller(Some(4100));

    let response = controller
        .respond_to_threat(&threat("t1", "port_scan"))
        .await
        .expect("port_scan should produce a response");

    // Only adaptive_honeypot targets port_scan; its 0.8 score carries over.
    assert_eq!(response.strategies_deployed, vec!["adaptive_honeypot"]);
    assert!((response.success_probability - 0.8).abs() < 1e-9);

    // One decoy each for ssh, http and ftp.
    let registry = &controller.registry;
    assert_eq!(registry.running_count_of(ServiceType::Ssh), 1);
    assert_eq!(registry.running_count_of(ServiceType::Http), 1);
    assert_eq!(registry.running_count_of(ServiceType::Ftp), 1);

    // A second threat tops each service up to the per-service cap of 2.
    controller.respond_to_threat(&threat("t2", "port_scan")).await.unwrap();
    assert_eq!(registry.running_count_of(ServiceType::Ssh), 2);
    assert_eq!(controller.active_response_count(), 2);

    // At the cap nothing deploys, so no third response is recorded.
    assert!(controller.respond_to_threat(&threat("t3", "port_scan")).await.is_none());
    assert_eq!(controller.active_response_count(), 2);

    registry.shutdown();
}

#[tokio::test]
async fn test_unmatched_threat_type_is_noop() {
    let controller = test_controller(None);

    let response = controller.respond_to_threat(&threat("t1", "quantum_fuzzing")).await;
    assert!(response.is_none());
    assert_eq!(controller.active_response_count(), 0);
    assert_eq!(controller.registry.status().total_instances, 0);
}

#[tokio::test]
async fn test_success_probability_mean_and_cap() {
    let controller = test_controller(None);
    let catalog = controller.catalog();

    // Two simulated tactics targeting the same type: mean of their scores.
    catalog.update("data_breadcrumbs", |_| 0.8);
    catalog.register(DeceptionStrategy {
        id: "canary_shares".to_string(),
        name: "Canary File Shares".to_string(),
        description: "Expose trap file shares with marked documents".to_string(),
        target_threats: vec!["credential_theft".to_string()],
        effectiveness_score: 0.7,
        deployment_cost: 0.2,
        kind: StrategyKind::DataBreadcrumb,
    });

    let response = controller
        .respond_to_threat(&threat("t1", "credential_theft"))
        .await
        .unwrap();
    assert!((response.success_probability - 0.75).abs() < 1e-9);

    // A perfect-score strategy still reports at most the 0.95 ceiling.
    catalog.update("data_breadcrumbs", |_| 1.0);
    catalog.update("canary_shares", |_| 1.0);
    let response = controller
        .respond_to_threat(&threat("t2", "credential_theft"))
        .await
        .unwrap();
    assert!((response.success_probability - 0.95).abs() < 1e-9);
}

#[tokio::test]
async fn test_ioc_nudges_scores_within_band() {
    let controller = test_controller(None);
    let catalog = controller.catalog();

    let high = IocEvent {
        ioc_type: "ip_reputation".to_string(),
        threat_types: vec!["port_scan".to_string()],
        confidence: 1.0,
        timestamp: now_ts(),
    };

    // (1.0 - 0.5) * 0.1 = +0.05 per event, saturating at 1.0.
    controller.adapt_to_new_threat(&high).await;
    assert!((catalog.score_of("adaptive_honeypot").unwrap() - 0.85).abs() < 1e-9);
    for _ in 0..10 {
        controller.adapt_to_new_threat(&high).await;
    }
    assert!((catalog.score_of("adaptive_honeypot").unwrap() - 1.0).abs() < 1e-9);

    // Low confidence walks it down, never below the floor.
    let low = IocEvent { confidence: 0.0, ..high.clone() };
    for _ in 0..30 {
        controller.adapt_to_new_threat(&low).await;
    }
    assert!((catalog.score_of("adaptive_honeypot").unwrap() - 0.1).abs() < 1e-9);
}

#[tokio::test]
async fn test_preemptive_response_is_currently_noop() {
    let controller = test_controller(None);

    let ioc = IocEvent {
        ioc_type: "campaign_report".to_string(),
        threat_types: vec!["credential_theft".to_string()],
        confidence: 0.9,
        timestamp: now_ts(),
    };
    controller.adapt_to_new_threat(&ioc).await;

    // No catalog strategy targets the synthetic preemptive_response type,
    // so the preemptive path records nothing.
    assert_eq!(controller.active_response_count(), 0);
}

#[tokio::test]
async fn test_sophisticated_attacker_raises_mimicry() {
    let controller = test_controller(None);
    let catalog = controller.catalog();
    assert!((catalog.score_of("behavioral_mimicry").unwrap() - 0.85).abs() < 1e-9);

    let commands = ["ls -la", "wget http://x", "nc target 4444", "chmod +x f"];
    for _ in 0..10 {
        controller.learn_from_interaction(&interaction("203.0.113.9", &commands));
    }
    // 10 interactions, 4 techniques: gate not crossed yet.
    assert!((catalog.score_of("behavioral_mimicry").unwrap() - 0.85).abs() < 1e-9);

    controller.learn_from_interaction(&interaction("203.0.113.9", &commands));
    assert!((catalog.score_of("behavioral_mimicry").unwrap() - 0.90).abs() < 1e-9);

    let status = controller.status();
    assert_eq!(status.learning_profiles, 1);
}

#[tokio::test]
async fn test_evaluation_is_exactly_once() {
    let controller = test_controller(None);

    let response = controller
        .respond_to_threat(&threat("t1", "credential_theft"))
        .await
        .unwrap();
    assert_eq!(controller.active_response_count(), 1);

    // 12 interactions after deployment: sample saturates at 1.0.
    for _ in 0..12 {
        controller.registry.push_recent(response.deployed_at + 5, ServiceType::Ssh);
    }

    controller.evaluate_responses_once(response.deployed_at + 10);
    assert_eq!(controller.active_response_count(), 0);

    let status = controller.status();
    let perf = &status.performance["data_breadcrumbs"];
    assert_eq!(perf.deployments, 1);
    assert!((perf.average_effectiveness - 1.0).abs() < 1e-9);

    // Already evaluated and removed: a second pass records nothing.
    controller.evaluate_responses_once(response.deployed_at + 20);
    assert_eq!(controller.status().performance["data_breadcrumbs"].deployments, 1);
}

#[tokio::test]
async fn test_adjustment_moves_score_toward_ledger_mean() {
    let controller = test_controller(None);
    let catalog = controller.catalog();

    // Five saturated samples against adaptive_honeypot (score 0.8).
    {
        let mut ledger = controller.ledger.lock();
        for _ in 0..5 {
            ledger.record("adaptive_honeypot", 1.0);
        }
        // Too few samples for decoy_services: must stay untouched.
        ledger.record("decoy_services", 0.0);
    }

    controller.adjust_scores_once();
    assert!((catalog.score_of("adaptive_honeypot").unwrap() - 0.82).abs() < 1e-9);
    assert!((catalog.score_of("decoy_services").unwrap() - 0.7).abs() < 1e-9);
}
