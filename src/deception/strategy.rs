// shadowwall-core/src/deception/strategy.rs
//
// Deception strategy catalog. The catalog is the sole authority over
// effectiveness scores: every mutation path funnels through update(),
// which clamps into [SCORE_MIN, SCORE_MAX].

use std::collections::{HashMap, VecDeque};

use log::debug;
use parking_lot::RwLock;
use serde::Serialize;

use crate::StrategyId;

pub const SCORE_MIN: f64 = 0.1;
pub const SCORE_MAX: f64 = 1.0;

/// Minimum score for a strategy to be considered during selection.
pub const SELECTION_FLOOR: f64 = 0.5;

/// Maximum strategies deployed against one threat.
pub const MAX_SELECTED: usize = 3;

/// Ledger window per strategy.
pub const LEDGER_CAP: usize = 100;

/// Deployment routine tag. Closed set: dispatch is a pattern match, not
/// open registration, since the catalog is fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    HoneypotDeployment,
    ServiceEmulation,
    NetworkTopology,
    DataBreadcrumb,
    BehavioralMimicry,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeceptionStrategy {
    pub id: StrategyId,
    pub name: String,
    pub description: String,
    /// Threat types this strategy addresses; "all" matches everything.
    pub target_threats: Vec<String>,
    /// Learned value, always within [SCORE_MIN, SCORE_MAX].
    pub effectiveness_score: f64,
    /// Advisory deployment cost.
    pub deployment_cost: f64,
    pub kind: StrategyKind,
}

fn clamp_score(score: f64) -> f64 {
    score.clamp(SCORE_MIN, SCORE_MAX)
}

pub struct StrategyCatalog {
    strategies: RwLock<HashMap<StrategyId, DeceptionStrategy>>,
}

impl StrategyCatalog {
    /// The five built-in deception tactics.
    pub fn builtin() -> Self {
        let mut strategies = HashMap::new();
        let defs = [
            DeceptionStrategy {
                id: "adaptive_honeypot".to_string(),
                name: "Adaptive Honeypot Deployment".to_string(),
                description: "Deploy honeypots that mimic attacker targets".to_string(),
                target_threats: vec![
                    "port_scan".to_string(),
                    "service_enumeration".to_string(),
                    "lateral_movement".to_string(),
                ],
                effectiveness_score: 0.8,
                deployment_cost: 0.3,
                kind: StrategyKind::HoneypotDeployment,
            },
            DeceptionStrategy {
                id: "decoy_services".to_string(),
                name: "Decoy Service Emulation".to_string(),
                description: "Create fake services that appear vulnerable".to_string(),
                target_threats: vec![
                    "vulnerability_scan".to_string(),
                    "exploit_attempt".to_string(),
                ],
                effectiveness_score: 0.7,
                deployment_cost: 0.2,
                kind: StrategyKind::ServiceEmulation,
            },
            DeceptionStrategy {
                id: "network_deception".to_string(),
                name: "Network Topology Deception".to_string(),
                description: "Create fake network segments and hosts".to_string(),
                target_threats: vec![
                    "network_mapping".to_string(),
                    "reconnaissance".to_string(),
                ],
                effectiveness_score: 0.6,
                deployment_cost: 0.4,
                kind: StrategyKind::NetworkTopology,
            },
            DeceptionStrategy {
                id: "data_breadcrumbs".to_string(),
                name: "Deceptive Data Breadcrumbs".to_string(),
                description: "Plant fake credentials and data to mislead attackers".to_string(),
                target_threats: vec![
                    "credential_theft".to_string(),
                    "data_exfiltration".to_string(),
                ],
                effectiveness_score: 0.9,
                deployment_cost: 0.1,
                kind: StrategyKind::DataBreadcrumb,
            },
            DeceptionStrategy {
                id: "behavioral_mimicry".to_string(),
                name: "Behavioral Mimicry".to_string(),
                description: "Mimic normal user behavior in honeypots".to_string(),
                target_threats: vec![
                    "behavioral_analysis".to_string(),
                    "ai_detection".to_string(),
                ],
                effectiveness_score: 0.85,
                deployment_cost: 0.5,
                kind: StrategyKind::BehavioralMimicry,
            },
        ];
        for s in defs {
            strategies.insert(s.id.clone(), s);
        }
        Self {
            strategies: RwLock::new(strategies),
        }
    }

    /// Register an additional tactic. Operators may extend the catalog at
    /// startup; scores are clamped into the valid band on the way in.
    pub fn register(&self, mut strategy: DeceptionStrategy) {
        strategy.effectiveness_score = clamp_score(strategy.effectiveness_score);
        self.strategies.write().insert(strategy.id.clone(), strategy);
    }

    pub fn get(&self, id: &str) -> Option<DeceptionStrategy> {
        self.strategies.read().get(id).cloned()
    }

    pub fn score_of(&self, id: &str) -> Option<f64> {
        self.strategies.read().get(id).map(|s| s.effectiveness_score)
    }

    /// Strategies applicable to a threat type: target list contains the
    /// type or the "all" sentinel, score above the selection floor. Ordered
    /// by descending score with the id as deterministic tie-break, capped
    /// at MAX_SELECTED to avoid over-deployment.
    pub fn select_for(&self, threat_type: &str) -> Vec<DeceptionStrategy> {
        let map = self.strategies.read();
        let mut suitable: Vec<DeceptionStrategy> = map
            .values()
            .filter(|s| {
                s.target_threats.iter().any(|t| t == threat_type || t == "all")
                    && s.effectiveness_score > SELECTION_FLOOR
            })
            .cloned()
            .collect();

        suitable.sort_by(|a, b| {
            b.effectiveness_score
                .partial_cmp(&a.effectiveness_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        suitable.truncate(MAX_SELECTED);
        suitable
    }

    /// Apply a score mutation, clamped into the valid band. Returns the new
    /// score, or None for an unknown strategy.
    pub fn update<F>(&self, id: &str, f: F) -> Option<f64>
    where
        F: FnOnce(f64) -> f64,
    {
        let mut map = self.strategies.write();
        let strategy = map.get_mut(id)?;
        strategy.effectiveness_score = clamp_score(f(strategy.effectiveness_score));
        debug!("Updated {} effectiveness to {:.2}", id, strategy.effectiveness_score);
        Some(strategy.effectiveness_score)
    }

    /// Nudge every strategy whose target list literally names `threat_type`.
    pub fn nudge_targeting(&self, threat_type: &str, delta: f64) {
        let ids: Vec<StrategyId> = {
            let map = self.strategies.read();
            map.values()
                .filter(|s| s.target_threats.iter().any(|t| t == threat_type))
                .map(|s| s.id.clone())
                .collect()
        };
        for id in ids {
            self.update(&id, |score| score + delta);
        }
    }

    pub fn snapshot(&self) -> HashMap<StrategyId, DeceptionStrategy> {
        self.strategies.read().clone()
    }
}

// --- Performance ledger ---

#[derive(Debug, Clone, Serialize)]
pub struct LedgerSummary {
    pub deployments: usize,
    pub average_effectiveness: f64,
    pub recent_trend: Vec<f64>,
}

/// Per-strategy sliding window of observed effectiveness samples from the
/// delayed response evaluation.
#[derive(Default)]
pub struct PerformanceLedger {
    samples: HashMap<StrategyId, VecDeque<f64>>,
}

impl PerformanceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, id: &str, sample: f64) {
        let window = self.samples.entry(id.to_string()).or_default();
        window.push_back(sample);
        while window.len() > LEDGER_CAP {
            window.pop_front();
        }
    }

    pub fn mean(&self, id: &str) -> Option<f64> {
        let window = self.samples.get(id)?;
        if window.is_empty() {
            return None;
        }
        Some(window.iter().sum::<f64>() / window.len() as f64)
    }

    pub fn len(&self, id: &str) -> usize {
        self.samples.get(id).map(|w| w.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn strategy_ids(&self) -> Vec<StrategyId> {
        self.samples.keys().cloned().collect()
    }

    pub fn summaries(&self) -> HashMap<StrategyId, LedgerSummary> {
        self.samples
            .iter()
            .filter(|(_, w)| !w.is_empty())
            .map(|(id, w)| {
                let trend_from = w.len().saturating_sub(5);
                (
                    id.clone(),
                    LedgerSummary {
                        deployments: w.len(),
                        average_effectiveness: w.iter().sum::<f64>() / w.len() as f64,
                        recent_trend: w.iter().skip(trend_from).copied().collect(),
                    },
                )
            })
            .collect()
    }
}
