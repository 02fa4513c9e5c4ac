use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use crate::error::Result;

pub const DEFAULT_BAUD: u32 = 9600;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortConfig{
    pub name: String,
    pub baud_rate: u32,
    pub timeout_ms: u64,
}

impl PortConfig{
    pub fn new(name: &str) -> Self{
        PortConfig{
            name: name.to_string(),
            baud_rate: DEFAULT_BAUD,
            timeout_ms: 1000,
        }
    }
}

/// Delays used by the gear actuators, in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GearTiming{
    pub single_hop_ms: u64,        // neutral <-> forward/reverse
    pub indirect_first_hop_ms: u64, // forward <-> reverse, hop into neutral
    pub indirect_second_hop_ms: u64,
    pub confirm_timeout_ms: u64,
    pub confirm_poll_ms: u64,
    pub step_interval_ms: u64,     // per voltage step while a link is open
    pub token_interval_ms: u64,    // spacing between transmitted tokens
}

impl Default for GearTiming{
    fn default() -> Self{
        GearTiming{
            single_hop_ms: 500,
            indirect_first_hop_ms: 1000,
            indirect_second_hop_ms: 500,
            confirm_timeout_ms: 1000,
            confirm_poll_ms: 10,
            step_interval_ms: 800,
            token_interval_ms: 250,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RudderTiming{
    pub step_interval_ms: u64,
    pub mode_settle_ms: u64,
}

impl Default for RudderTiming{
    fn default() -> Self{
        RudderTiming{
            step_interval_ms: 80,
            mode_settle_ms: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorTiming{
    pub side_skew_ms: u64,
    pub neutral_skew_ms: u64,
    pub feedback_settle_ms: u64,
    pub call_settle_ms: u64,
    pub call_hold_ms: u64,
    pub tick_interval_ms: u64,
    pub command_timeout_ms: u64,
}

impl Default for SupervisorTiming{
    fn default() -> Self{
        SupervisorTiming{
            side_skew_ms: 100,
            neutral_skew_ms: 80,
            feedback_settle_ms: 30,
            call_settle_ms: 500,
            call_hold_ms: 2000,
            tick_interval_ms: 3000,
            command_timeout_ms: 60_000,
        }
    }
}

/// Initial shadow values applied at start-up and by the calibrate call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Calibration{
    pub gear_left_volts: f64,
    pub gear_right_volts: f64,
    pub rudder_left_deg: f64,
    pub rudder_right_deg: f64,
}

impl Default for Calibration{
    fn default() -> Self{
        Calibration{
            gear_left_volts: 2.71,
            gear_right_volts: 2.71,
            rudder_left_deg: 0.0,
            rudder_right_deg: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HelmConfig{
    pub gear_port: PortConfig,
    pub left_rudder_port: PortConfig,
    pub right_rudder_port: PortConfig,
    pub gear_timing: GearTiming,
    pub rudder_timing: RudderTiming,
    pub supervisor_timing: SupervisorTiming,
    pub calibration: Calibration,
}

impl Default for HelmConfig{
    fn default() -> Self{
        HelmConfig{
            gear_port: PortConfig::new("COM11"),
            left_rudder_port: PortConfig::new("COM12"),
            right_rudder_port: PortConfig::new("COM13"),
            gear_timing: GearTiming::default(),
            rudder_timing: RudderTiming::default(),
            supervisor_timing: SupervisorTiming::default(),
            calibration: Calibration::default(),
        }
    }
}

impl HelmConfig{
    pub fn load(path: impl AsRef<Path>) -> Result<Self>{
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()>{
        let json = serde_json::to_string_pretty(self)?;
        let mut file = fs::File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}

pub(crate) fn ms(value: u64) -> Duration{
    Duration::from_millis(value)
}
