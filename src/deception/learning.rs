// shadowwall-core/src/deception/learning.rs
//
// Per-attacker behavioral learning: running profiles keyed by source IP
// and a keyword classifier that turns raw command lines into technique
// labels. The labels feed back into strategy scoring.

use std::collections::HashSet;
use std::net::IpAddr;

use serde::Serialize;

use crate::common::{now_ts, ServiceType};

/// Sophistication gate: an attacker with this many interactions and
/// distinct techniques is considered advanced enough to justify raising
/// the behavioral_mimicry strategy.
pub const SOPHISTICATION_INTERACTIONS: u64 = 10;
pub const SOPHISTICATION_TECHNIQUES: usize = 3;

#[derive(Debug, Clone, Serialize)]
pub struct AttackerProfile {
    pub source_ip: IpAddr,
    pub interactions: u64,
    pub services_targeted: HashSet<ServiceType>,
    /// Running share of sessions the attacker "won".
    pub success_rate: f64,
    pub techniques: HashSet<&'static str>,
    pub first_seen: u64,
    pub last_seen: u64,
}

impl AttackerProfile {
    pub fn new(source_ip: IpAddr) -> Self {
        let now = now_ts();
        Self {
            source_ip,
            interactions: 0,
            services_targeted: HashSet::new(),
            success_rate: 0.0,
            techniques: HashSet::new(),
            first_seen: now,
            last_seen: now,
        }
    }

    /// Fold one observed session into the profile. Returns true when the
    /// profile is past the sophistication gate after this observation.
    pub fn observe(&mut self, service: ServiceType, successful: bool, commands: &[String]) -> bool {
        self.interactions += 1;
        self.services_targeted.insert(service);
        self.last_seen = now_ts();

        // newRate = (oldRate * (n-1) + outcome) / n
        let n = self.interactions as f64;
        let outcome = if successful { 1.0 } else { 0.0 };
        self.success_rate = (self.success_rate * (n - 1.0) + outcome) / n;

        for command in commands {
            if let Some(technique) = classify_technique(command) {
                self.techniques.insert(technique);
            }
        }

        self.interactions > SOPHISTICATION_INTERACTIONS
            && self.techniques.len() > SOPHISTICATION_TECHNIQUES
    }
}

/// Keyword classification of one command line. Rules are checked in order;
/// anything non-empty that matches nothing is "unknown".
pub fn classify_technique(command: &str) -> Option<&'static str> {
    let command = command.trim().to_lowercase();
    if command.is_empty() {
        return None;
    }

    const RULES: [(&str, &[&str]); 5] = [
        ("discovery", &["ls", "dir", "cat", "type"]),
        ("download", &["wget", "curl", "download"]),
        ("lateral_movement", &["nc", "netcat", "telnet"]),
        ("process_discovery", &["ps", "top", "tasklist"]),
        ("privilege_escalation", &["chmod", "chown", "icacls"]),
    ];

    for (label, keywords) in RULES {
        if keywords.iter().any(|k| command.contains(k)) {
            return Some(label);
        }
    }
    Some("unknown")
}
