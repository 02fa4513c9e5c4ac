/**
 * Telemetry snapshot
 *
 * Latest-known values reported by the lever board and the two rudder
 * boards. Each serial reader writes only its own section; actuator workers
 * and status queries read whatever is there. No cross-field atomicity.
 */

pub mod decoder;

pub use decoder::{SentenceDecoder, TelemetryDecoder, TelemetryUpdate};

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::Serialize;
use crate::side::Side;

pub type FieldMap = HashMap<String, String>;

/// Which board a reader thread is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetrySource{
    GearBoard,
    Rudder(Side),
}

fn field_map(pairs: &[(&str, &str)]) -> FieldMap{
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

fn engine_defaults(instance: &str) -> FieldMap{
    field_map(&[
        ("EngineInstance", instance),
        ("EngineSpeed", "0"),
        ("EngineBoostPressure", "0"),
        ("EngineTiltTrim", "0"),
        ("TransmissionGear", "0"),
        ("OilPressure", "0"),
        ("OilTemperature", "0"),
        ("DiscreteStatus", "0"),
    ])
}

#[derive(Debug, Clone, Serialize)]
pub struct GearBoardTelemetry{
    pub board: FieldMap,
    pub engines: [FieldMap; 2],
    /// Whether the board has reported a voltage for each side since reset.
    pub voltage_reported: [bool; 2],
}

impl Default for GearBoardTelemetry{
    fn default() -> Self{
        Self{
            board: field_map(&[
                ("NEUTRAL_LED", "0"),
                ("ACTIVE_LED", "0"),
                ("SYNC_LED", "0"),
                ("LPS_L_vol", "0"),
                ("LPS_R_vol", "0"),
            ]),
            engines: [engine_defaults("0"), engine_defaults("1")],
            voltage_reported: [false, false],
        }
    }
}

impl GearBoardTelemetry{
    fn voltage_key(side: Side) -> &'static str{
        match side{
            Side::Left => "LPS_L_vol",
            Side::Right => "LPS_R_vol",
        }
    }

    fn apply(&mut self, update: TelemetryUpdate){
        let target = match update.get("EngineInstance").map(String::as_str){
            Some("0") => &mut self.engines[0],
            Some("1") => &mut self.engines[1],
            _ =>{
                for side in Side::BOTH{
                    if update.contains_key(Self::voltage_key(side)){
                        self.voltage_reported[side.index()] = true;
                    }
                }
                &mut self.board
            }
        };
        target.extend(update);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RudderTelemetry{
    pub fields: FieldMap,
}

impl Default for RudderTelemetry{
    fn default() -> Self{
        Self{
            fields: field_map(&[
                ("RudderOrder", "0"),
                ("RudderFeedback", "0"),
                ("Pilot_Mode", "None"),
                ("Heading", "0"),
                ("Course", "0"),
            ]),
        }
    }
}

/// Process-wide record of the latest decoded board values.
#[derive(Debug, Default)]
pub struct TelemetrySnapshot{
    gear: RwLock<GearBoardTelemetry>,
    rudders: [RwLock<RudderTelemetry>; 2],
}

impl TelemetrySnapshot{
    pub fn new() -> Self{
        Self::default()
    }

    fn gear_read(&self) -> RwLockReadGuard<'_, GearBoardTelemetry>{
        self.gear.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn gear_write(&self) -> RwLockWriteGuard<'_, GearBoardTelemetry>{
        self.gear.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn rudder_read(&self, side: Side) -> RwLockReadGuard<'_, RudderTelemetry>{
        self.rudders[side.index()].read().unwrap_or_else(PoisonError::into_inner)
    }

    fn rudder_write(&self, side: Side) -> RwLockWriteGuard<'_, RudderTelemetry>{
        self.rudders[side.index()].write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Merges one decoded line into the section owned by `source`.
    pub fn apply(&self, source: TelemetrySource, update: TelemetryUpdate){
        match source{
            TelemetrySource::GearBoard => self.gear_write().apply(update),
            TelemetrySource::Rudder(side) => self.rudder_write(side).fields.extend(update),
        }
    }

    pub fn set_gear_field(&self, key: &str, value: impl Into<String>){
        let mut update = TelemetryUpdate::new();
        update.insert(key.to_string(), value.into());
        self.apply(TelemetrySource::GearBoard, update);
    }

    pub fn set_rudder_field(&self, side: Side, key: &str, value: impl Into<String>){
        let mut update = TelemetryUpdate::new();
        update.insert(key.to_string(), value.into());
        self.apply(TelemetrySource::Rudder(side), update);
    }

    pub fn gear_field(&self, key: &str) -> Option<String>{
        self.gear_read().board.get(key).cloned()
    }

    /// Voltage reported by the lever board, in volts (board sends millivolts).
    pub fn gear_voltage(&self, side: Side) -> Option<f64>{
        let gear = self.gear_read();
        if !gear.voltage_reported[side.index()]{
            return None;
        }
        gear.board.get(GearBoardTelemetry::voltage_key(side))
            .and_then(|raw| raw.trim().parse::<f64>().ok())
            .map(|mv| mv * 0.001)
    }

    pub fn gear_voltage_millivolts(&self, side: Side) -> i32{
        self.gear_read().board.get(GearBoardTelemetry::voltage_key(side))
            .and_then(|raw| raw.trim().parse::<f64>().ok())
            .map(|mv| mv.round() as i32)
            .unwrap_or(0)
    }

    pub fn set_gear_voltage_millivolts(&self, side: Side, millivolts: i32){
        self.set_gear_field(GearBoardTelemetry::voltage_key(side), millivolts.to_string());
    }

    pub fn active_led(&self) -> Option<String>{
        self.gear_field("ACTIVE_LED")
    }

    pub fn rudder_field(&self, side: Side, key: &str) -> Option<String>{
        self.rudder_read(side).fields.get(key).cloned()
    }

    pub fn rudder_feedback(&self, side: Side) -> Option<i32>{
        self.rudder_field(side, "RudderFeedback")
            .and_then(|raw| raw.trim().parse::<f64>().ok())
            .map(|deg| deg as i32)
    }

    pub fn heading(&self, side: Side) -> Option<f64>{
        self.rudder_field(side, "Heading")
            .and_then(|raw| raw.trim().parse::<f64>().ok())
    }

    pub fn gear_board(&self) -> GearBoardTelemetry{
        self.gear_read().clone()
    }

    pub fn rudder(&self, side: Side) -> RudderTelemetry{
        self.rudder_read(side).clone()
    }

    pub fn reset_gear_board(&self){
        *self.gear_write() = GearBoardTelemetry::default();
    }
}

#[cfg(test)]
mod tests{
    use super::*;

    fn update(pairs: &[(&str, &str)]) -> TelemetryUpdate{
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_voltage_unreported_until_board_speaks(){
        let snapshot = TelemetrySnapshot::new();
        assert_eq!(snapshot.gear_voltage(Side::Left), None);

        snapshot.apply(TelemetrySource::GearBoard, update(&[("LPS_L_vol", "2710")]));
        let volts = snapshot.gear_voltage(Side::Left).unwrap();
        assert!((volts - 2.71).abs() < 1e-9);
        assert_eq!(snapshot.gear_voltage(Side::Right), None);
    }

    #[test]
    fn test_engine_instances_routed(){
        let snapshot = TelemetrySnapshot::new();
        snapshot.apply(TelemetrySource::GearBoard, update(&[("EngineInstance", "1"), ("EngineSpeed", "1500")]));
        let gear = snapshot.gear_board();
        assert_eq!(gear.engines[1]["EngineSpeed"], "1500");
        assert_eq!(gear.engines[0]["EngineSpeed"], "0");
        assert!(!gear.board.contains_key("EngineSpeed"));
    }

    #[test]
    fn test_rudder_sections_are_separate(){
        let snapshot = TelemetrySnapshot::new();
        snapshot.apply(TelemetrySource::Rudder(Side::Right), update(&[("RudderFeedback", "-7")]));
        assert_eq!(snapshot.rudder_feedback(Side::Right), Some(-7));
        assert_eq!(snapshot.rudder_feedback(Side::Left), Some(0));
    }

    #[test]
    fn test_reset_gear_board(){
        let snapshot = TelemetrySnapshot::new();
        snapshot.set_gear_voltage_millivolts(Side::Left, 2190);
        snapshot.set_gear_field("ACTIVE_LED", "1");
        snapshot.reset_gear_board();
        assert_eq!(snapshot.active_led().as_deref(), Some("0"));
        assert_eq!(snapshot.gear_voltage(Side::Left), None);
    }
}
