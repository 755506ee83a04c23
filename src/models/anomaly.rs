use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::models::{Id, TenantId};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Numeric weight used by the risk formula.
    pub fn score(&self) -> u32 {
        match self {
            Severity::Low => 10,
            Severity::Medium => 30,
            Severity::High => 60,
            Severity::Critical => 100,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            _ => Err(format!("Invalid Severity: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Detector {
    RapidRescan,
    MultiDevice,
    OffHours,
    DenialPattern,
}

impl std::fmt::Display for Detector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Detector::RapidRescan => write!(f, "rapid_rescan"),
            Detector::MultiDevice => write!(f, "multi_device"),
            Detector::OffHours => write!(f, "off_hours"),
            Detector::DenialPattern => write!(f, "denial_pattern"),
        }
    }
}

impl FromStr for Detector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rapid_rescan" => Ok(Detector::RapidRescan),
            "multi_device" => Ok(Detector::MultiDevice),
            "off_hours" => Ok(Detector::OffHours),
            "denial_pattern" => Ok(Detector::DenialPattern),
            _ => Err(format!("Invalid Detector: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyFinding {
    pub id: Id,
    pub tenant_id: TenantId,
    pub ticket_id: String,
    pub device_id: String,
    pub detector: Detector,
    pub severity: Severity,
    pub risk_score: u32,
    pub details: Option<String>,
    pub detected_at: NaiveDateTime,
}
