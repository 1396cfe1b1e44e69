// shadowwall-core/src/common/mod.rs

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

use crate::error::DeceptionError;
use crate::{InstanceId, ThreatId};

/// Decoy service protocol variant. The set is closed: every variant has a
/// scripted emulator and a dedicated port range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    Ssh,
    Http,
    Ftp,
    Telnet,
    Smtp,
    Generic,
}

impl ServiceType {
    pub const ALL: [ServiceType; 6] = [
        ServiceType::Ssh,
        ServiceType::Http,
        ServiceType::Ftp,
        ServiceType::Telnet,
        ServiceType::Smtp,
        ServiceType::Generic,
    ];

    /// Default allocation range. Fixed for compatibility with the rest of
    /// the platform (dashboard and capture pipeline key off these).
    pub fn default_port_range(self) -> (u16, u16) {
        match self {
            ServiceType::Ssh => (2200, 2299),
            ServiceType::Http => (8000, 8099),
            ServiceType::Ftp => (2100, 2199),
            ServiceType::Telnet => (2300, 2399),
            ServiceType::Smtp => (2500, 2599),
            ServiceType::Generic => (2700, 2799),
        }
    }

    pub fn parse(name: &str) -> Result<Self, DeceptionError> {
        match name {
            "ssh" => Ok(ServiceType::Ssh),
            "http" => Ok(ServiceType::Http),
            "ftp" => Ok(ServiceType::Ftp),
            "telnet" => Ok(ServiceType::Telnet),
            "smtp" => Ok(ServiceType::Smtp),
            "generic" => Ok(ServiceType::Generic),
            other => Err(DeceptionError::UnknownServiceType(other.to_string())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ServiceType::Ssh => "ssh",
            ServiceType::Http => "http",
            ServiceType::Ftp => "ftp",
            ServiceType::Telnet => "telnet",
            ServiceType::Smtp => "smtp",
            ServiceType::Generic => "generic",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded session with one decoy instance. Immutable after creation:
/// the emulator produces it, the collector moves it, subscribers read it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HoneypotInteraction {
    /// Session start (unix seconds).
    pub timestamp: u64,
    pub instance_id: InstanceId,
    pub source_ip: IpAddr,
    pub source_port: u16,
    pub service: ServiceType,
    /// What kind of exchange this was (authentication_attempt, web_request, ...).
    pub interaction_type: String,
    /// Session duration in seconds.
    pub duration: f64,
    /// Commands / request lines observed, in order.
    pub commands: Vec<String>,
    /// Raw captures, hex encoded, in order.
    pub payloads: Vec<String>,
    /// Whether the remote party "succeeded" at the scripted exchange.
    /// Decoys never grant access, so this is false for all built-in scripts.
    pub successful: bool,
    /// Protocol extras (client banner, user agent, ...).
    pub session_data: serde_json::Value,
}

/// Threat event from the external detection pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatEvent {
    pub id: ThreatId,
    pub threat_type: String,
    pub source_ip: Option<IpAddr>,
    pub confidence: f64,
    pub timestamp: u64,
}

impl ThreatEvent {
    pub fn new(threat_type: impl Into<String>) -> Self {
        let threat_type = threat_type.into();
        Self {
            id: format!("threat_{}_{}", threat_type, now_ts()),
            threat_type,
            source_ip: None,
            confidence: 0.5,
            timestamp: now_ts(),
        }
    }
}

/// Indicator-of-compromise event from the intelligence feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IocEvent {
    pub ioc_type: String,
    pub threat_types: Vec<String>,
    pub confidence: f64,
    pub timestamp: u64,
}

/// Current unix time in seconds.
pub fn now_ts() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
