//! Global exit control switch.

use crate::domain::{ParseEnumError, TimeMs};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMode {
    Running,
    /// Stops still fire; targets, trailing and time-stop are suppressed.
    PauseProfit,
    /// No automatic trigger fires.
    PauseAll,
    /// Every evaluable position is closed at market.
    EmergencyFlatten,
}

impl ControlMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlMode::Running => "RUNNING",
            ControlMode::PauseProfit => "PAUSE_PROFIT",
            ControlMode::PauseAll => "PAUSE_ALL",
            ControlMode::EmergencyFlatten => "EMERGENCY_FLATTEN",
        }
    }
}

impl fmt::Display for ControlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ControlMode {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RUNNING" => Ok(ControlMode::Running),
            "PAUSE_PROFIT" => Ok(ControlMode::PauseProfit),
            "PAUSE_ALL" => Ok(ControlMode::PauseAll),
            "EMERGENCY_FLATTEN" => Ok(ControlMode::EmergencyFlatten),
            other => Err(ParseEnumError::new("ControlMode", other)),
        }
    }
}

/// Singleton control row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitControl {
    pub mode: ControlMode,
    pub reason: Option<String>,
    pub updated_by: Option<String>,
    pub updated_ts: TimeMs,
}

impl Default for ExitControl {
    fn default() -> Self {
        ExitControl {
            mode: ControlMode::Running,
            reason: None,
            updated_by: None,
            updated_ts: TimeMs::new(0),
        }
    }
}
