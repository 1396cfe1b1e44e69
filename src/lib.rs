// shadowwall-core/src/lib.rs

pub mod common;
pub mod error;
pub mod honeypot;
pub mod deception;

// Shared identifier aliases.
pub type InstanceId = String;
pub type StrategyId = String;
pub type ThreatId = String;
