// shadowwall-core/src/honeypot/mod.rs
//
// Honeypot lifecycle: deployment with port allocation and quota
// enforcement, health monitoring, interaction collection and adaptive
// re-deployment. The registry is the sole authority over port and quota
// state; everything else goes through its methods.

pub mod emulator;

#[cfg(test)]
mod tests_registry;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::{DashMap, DashSet};
use log::{error, info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};

use crate::common::{now_ts, HoneypotInteraction, ServiceType};
use crate::error::DeceptionError;
use crate::InstanceId;

use emulator::DecoyService;

const SUBSCRIBER_CHANNEL_CAPACITY: usize = 1024;

/// Lifecycle state of a deployed decoy. Stopped and Errored are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    Requested,
    Running,
    Stopped,
    Errored,
}

/// A deployed decoy. Owned exclusively by the registry; counters are
/// written by the collector, state by the health monitor and stop().
#[derive(Debug, Clone, Serialize)]
pub struct HoneypotInstance {
    pub instance_id: InstanceId,
    pub service_type: ServiceType,
    pub port: u16,
    pub bind_addr: String,
    pub state: InstanceState,
    pub interactions: u64,
    pub last_interaction: Option<u64>,
    pub created_at: u64,
    pub config: serde_json::Value,
}

#[derive(Clone)]
pub struct RegistryConfig {
    pub bind_addr: String,
    pub max_instances: usize,
    /// Per-service allocation ranges. Registry state, as deployments may be
    /// re-homed per environment; defaults to the platform-wide table.
    pub port_ranges: HashMap<ServiceType, (u16, u16)>,
    pub collect_interval: Duration,
    pub monitor_interval: Duration,
    pub adaptive_enabled: bool,
    pub adaptive_interval: Duration,
    /// Recent-interaction count above which a service is considered
    /// heavily targeted by the adaptive deployment loop.
    pub targeting_threshold: usize,
    /// Upper bound of running instances per service the adaptive loop
    /// will grow to.
    pub adaptive_instance_cap: usize,
    /// Window for "recent" interaction accounting, seconds.
    pub learning_window_secs: u64,
    /// Retention of the recent-interaction log, seconds. Must cover the
    /// longest look-back any consumer uses: response dwell plus one
    /// evaluation interval on the controller side, and the adaptive
    /// learning window.
    pub recent_retention_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            max_instances: 10,
            port_ranges: ServiceType::ALL
                .iter()
                .map(|s| (*s, s.default_port_range()))
                .collect(),
            collect_interval: Duration::from_secs(10),
            monitor_interval: Duration::from_secs(60),
            adaptive_enabled: true,
            adaptive_interval: Duration::from_secs(300),
            targeting_threshold: 10,
            adaptive_instance_cap: 3,
            learning_window_secs: 3600,
            recent_retention_secs: 10800,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub honeypots_deployed: u64,
    pub total_interactions: u64,
    pub unique_attackers: usize,
    pub most_targeted_service: Option<ServiceType>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstanceSummary {
    pub service_type: ServiceType,
    pub port: u16,
    pub state: InstanceState,
    pub interactions: u64,
    pub last_interaction: Option<u64>,
    pub uptime_secs: u64,
}

/// Read-only snapshot for the dashboard and other collaborators.
#[derive(Debug, Clone, Serialize)]
pub struct HoneypotStatus {
    pub total_instances: usize,
    pub running_instances: usize,
    pub total_interactions: u64,
    pub honeypots: HashMap<InstanceId, InstanceSummary>,
    pub statistics: RegistryStats,
}

// --- Registry ---

pub struct HoneypotRegistry {
    config: RegistryConfig,
    instances: DashMap<InstanceId, HoneypotInstance>,
    emulators: DashMap<InstanceId, Arc<DecoyService>>,

    // Serializes quota check, port scan and bind across concurrent deploys.
    alloc_lock: tokio::sync::Mutex<()>,

    subscribers: Mutex<Vec<mpsc::Sender<HoneypotInteraction>>>,
    // Timestamps of drained interactions, pruned to the learning window.
    recent: Mutex<VecDeque<(u64, ServiceType)>>,

    deployed_total: AtomicU64,
    interactions_total: AtomicU64,
    attackers: DashSet<std::net::IpAddr>,
    per_service: DashMap<ServiceType, u64>,

    shutdown_tx: watch::Sender<bool>,
}

impl HoneypotRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            instances: DashMap::new(),
            emulators: DashMap::new(),
            alloc_lock: tokio::sync::Mutex::new(()),
            subscribers: Mutex::new(Vec::new()),
            recent: Mutex::new(VecDeque::new()),
            deployed_total: AtomicU64::new(0),
            interactions_total: AtomicU64::new(0),
            attackers: DashSet::new(),
            per_service: DashMap::new(),
            shutdown_tx,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Deploy a new decoy of the given service type.
    ///
    /// Quota check, port scan and bind run under a single critical section:
    /// two concurrent deploys can neither double-claim a port nor slip past
    /// the instance quota on a stale count. The scan takes the first port in
    /// the service range that no running instance holds and that actually
    /// binds at the OS level. The bound listener is handed to the emulator
    /// as-is. External processes racing this component for the same OS port
    /// range remain possible; only deploys through this registry are
    /// serialized.
    pub async fn deploy(
        &self,
        service: ServiceType,
        custom_config: Option<serde_json::Value>,
    ) -> Result<InstanceId, DeceptionError> {
        let _guard = self.alloc_lock.lock().await;

        if self.running_count() >= self.config.max_instances {
            warn!("Maximum honeypot instances reached ({})", self.config.max_instances);
            return Err(DeceptionError::MaxInstancesReached(self.config.max_instances));
        }

        let (lo, hi) = self
            .config
            .port_ranges
            .get(&service)
            .copied()
            .unwrap_or_else(|| service.default_port_range());

        let mut bound = None;
        for port in lo..=hi {
            if self.port_held(port) {
                continue;
            }
            match TcpListener::bind(format!("{}:{}", self.config.bind_addr, port)).await {
                Ok(listener) => {
                    bound = Some((port, listener));
                    break;
                }
                Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => continue,
                Err(e) => return Err(DeceptionError::ServiceStartFailure(e.to_string())),
            }
        }
        let (port, listener) = match bound {
            Some(b) => b,
            None => {
                error!("No available ports for {} honeypot in {}-{}", service, lo, hi);
                return Err(DeceptionError::PortAllocationExhausted(lo, hi));
            }
        };

        let instance_id = format!("{}_{}_{}", service, port, now_ts());
        let config_value = custom_config.unwrap_or_else(|| serde_json::json!({}));

        let decoy = Arc::new(DecoyService::new(
            instance_id.clone(),
            service,
            port,
            &config_value,
        ));
        decoy.start(listener);

        let instance = HoneypotInstance {
            instance_id: instance_id.clone(),
            service_type: service,
            port,
            bind_addr: self.config.bind_addr.clone(),
            state: InstanceState::Running,
            interactions: 0,
            last_interaction: None,
            created_at: now_ts(),
            config: config_value,
        };

        self.emulators.insert(instance_id.clone(), decoy);
        self.instances.insert(instance_id.clone(), instance);
        self.deployed_total.fetch_add(1, Ordering::Relaxed);

        info!("Deployed {} honeypot on port {} (ID: {})", service, port, instance_id);
        Ok(instance_id)
    }

    /// Deploy by service name. Unknown names are rejected without side
    /// effects; this is the entry point for operator/automation requests
    /// that arrive as strings.
    pub async fn deploy_named(
        &self,
        service: &str,
        custom_config: Option<serde_json::Value>,
    ) -> Result<InstanceId, DeceptionError> {
        let service = ServiceType::parse(service)?;
        self.deploy(service, custom_config).await
    }

    /// Deploy one decoy per requested service, skipping per-service failures.
    pub async fn deploy_initial(&self, services: &[ServiceType]) {
        for service in services {
            if let Err(e) = self.deploy(*service, None).await {
                error!("Failed to deploy initial {} honeypot: {}", service, e);
            }
        }
    }

    /// Stop a decoy. Idempotent: stopping an unknown or already-stopped
    /// instance is a no-op. Running instances transition to Stopped and
    /// release their port.
    pub fn stop(&self, instance_id: &str) {
        if let Some((_, decoy)) = self.emulators.remove(instance_id) {
            decoy.stop();
        }
        if let Some(mut inst) = self.instances.get_mut(instance_id) {
            if inst.state == InstanceState::Running {
                inst.state = InstanceState::Stopped;
                info!("Stopped honeypot {}", instance_id);
            }
        }
    }

    pub fn running_count(&self) -> usize {
        self.instances
            .iter()
            .filter(|e| e.state == InstanceState::Running)
            .count()
    }

    pub fn running_count_of(&self, service: ServiceType) -> usize {
        self.instances
            .iter()
            .filter(|e| e.state == InstanceState::Running && e.service_type == service)
            .count()
    }

    fn port_held(&self, port: u16) -> bool {
        self.instances
            .iter()
            .any(|e| e.port == port && e.state == InstanceState::Running)
    }

    /// Subscribe to the drained interaction feed. Slow subscribers lose
    /// overflow records; closed subscribers are dropped on the next cycle.
    pub fn subscribe(&self) -> mpsc::Receiver<HoneypotInteraction> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        self.subscribers.lock().push(tx);
        rx
    }

    /// One collection cycle: swap out every emulator's pending buffer,
    /// fold the records into the owning instance's counters and forward
    /// them to subscribers. Returns the number of records drained.
    pub fn collect_once(&self) -> usize {
        let mut drained_total = 0;

        for entry in self.emulators.iter() {
            let drained = entry.value().drain();
            if drained.is_empty() {
                continue;
            }
            drained_total += drained.len();

            if let Some(mut inst) = self.instances.get_mut(entry.key()) {
                inst.interactions += drained.len() as u64;
                let max_ts = drained.iter().map(|r| r.timestamp).max();
                inst.last_interaction = inst.last_interaction.max(max_ts);
            }

            self.interactions_total.fetch_add(drained.len() as u64, Ordering::Relaxed);
            for rec in &drained {
                info!("Honeypot interaction: {} from {}", rec.service, rec.source_ip);
                self.attackers.insert(rec.source_ip);
                *self.per_service.entry(rec.service).or_insert(0) += 1;
            }

            {
                let mut recent = self.recent.lock();
                for rec in &drained {
                    recent.push_back((rec.timestamp, rec.service));
                }
            }
            self.prune_recent();

            let mut subs = self.subscribers.lock();
            subs.retain(|tx| {
                for rec in &drained {
                    match tx.try_send(rec.clone()) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            warn!("Interaction subscriber is lagging, dropping record");
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => return false,
                    }
                }
                true
            });
        }

        drained_total
    }

    /// Count drained interactions with timestamp strictly after `ts`.
    /// Backed by the bounded recent log; callers compare against response
    /// deployment times, which are well inside the retention window.
    pub fn interactions_since(&self, ts: u64) -> usize {
        self.recent.lock().iter().filter(|(t, _)| *t > ts).count()
    }

    // Drops entries older than the retention horizon. Retention is wider
    // than the learning window: response evaluation looks back up to its
    // dwell plus one evaluation interval.
    fn prune_recent(&self) {
        let cutoff = now_ts().saturating_sub(self.config.recent_retention_secs);
        let mut recent = self.recent.lock();
        while matches!(recent.front(), Some((ts, _)) if *ts < cutoff) {
            recent.pop_front();
        }
    }

    /// One health-monitor pass: a Running instance whose emulator stopped
    /// accepting transitions to Errored. Never restarts anything; the
    /// restart decision belongs to the controller layer.
    pub fn monitor_once(&self) {
        for mut entry in self.instances.iter_mut() {
            if entry.state != InstanceState::Running {
                continue;
            }
            let alive = self
                .emulators
                .get(&entry.instance_id)
                .map(|e| e.is_accepting())
                .unwrap_or(false);
            if !alive {
                warn!("Honeypot {} stopped accepting, marking errored", entry.instance_id);
                entry.state = InstanceState::Errored;
            }
        }
    }

    /// One adaptive-deployment pass: grow coverage for service types that
    /// are heavily targeted inside the learning window.
    pub async fn adaptive_deploy_once(&self) {
        let cutoff = now_ts().saturating_sub(self.config.learning_window_secs);
        let mut counts: HashMap<ServiceType, usize> = HashMap::new();
        {
            let recent = self.recent.lock();
            for (ts, service) in recent.iter() {
                if *ts >= cutoff {
                    *counts.entry(*service).or_default() += 1;
                }
            }
        }

        for (service, count) in counts {
            if count <= self.config.targeting_threshold {
                continue;
            }
            if self.running_count_of(service) >= self.config.adaptive_instance_cap {
                continue;
            }
            match self.deploy(service, None).await {
                Ok(id) => info!(
                    "Adaptively deployed {} honeypot {} due to high targeting ({} recent)",
                    service, id, count
                ),
                Err(e) => warn!("Adaptive {} deployment failed: {}", service, e),
            }
        }
    }

    /// Read-only status snapshot.
    pub fn status(&self) -> HoneypotStatus {
        let now = now_ts();
        let honeypots: HashMap<InstanceId, InstanceSummary> = self
            .instances
            .iter()
            .map(|e| {
                (
                    e.instance_id.clone(),
                    InstanceSummary {
                        service_type: e.service_type,
                        port: e.port,
                        state: e.state,
                        interactions: e.interactions,
                        last_interaction: e.last_interaction,
                        uptime_secs: now.saturating_sub(e.created_at),
                    },
                )
            })
            .collect();

        let most_targeted = self
            .per_service
            .iter()
            .max_by_key(|e| *e.value())
            .map(|e| *e.key());

        HoneypotStatus {
            total_instances: self.instances.len(),
            running_instances: self.running_count(),
            total_interactions: self.instances.iter().map(|e| e.interactions).sum(),
            honeypots,
            statistics: RegistryStats {
                honeypots_deployed: self.deployed_total.load(Ordering::Relaxed),
                total_interactions: self.interactions_total.load(Ordering::Relaxed),
                unique_attackers: self.attackers.len(),
                most_targeted_service: most_targeted,
            },
        }
    }

    /// Spawn the background loops (collector, health monitor, adaptive
    /// deployment) as one task. They run until shutdown() and survive
    /// per-iteration failures.
    pub fn start(self: &Arc<Self>) {
        let registry = self.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut collect = tokio::time::interval(registry.config.collect_interval);
            let mut monitor = tokio::time::interval(registry.config.monitor_interval);
            let mut adaptive = tokio::time::interval(registry.config.adaptive_interval);

            loop {
                tokio::select! {
                    _ = collect.tick() => {
                        registry.collect_once();
                    }
                    _ = monitor.tick() => {
                        registry.monitor_once();
                    }
                    _ = adaptive.tick() => {
                        if registry.config.adaptive_enabled {
                            registry.adaptive_deploy_once().await;
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        });
    }

    /// Stop every emulator and the background loops. Must be called before
    /// discarding the registry so no listening socket is orphaned.
    pub fn shutdown(&self) {
        info!("Stopping honeypot registry...");
        let _ = self.shutdown_tx.send(true);
        let ids: Vec<InstanceId> = self.instances.iter().map(|e| e.instance_id.clone()).collect();
        for id in ids {
            self.stop(&id);
        }
    }

    #[cfg(test)]
    pub(crate) fn push_recent(&self, ts: u64, service: ServiceType) {
        self.recent.lock().push_back((ts, service));
    }
}
