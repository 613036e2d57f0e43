//! The fixed set of measurements collected from eSight

use crate::model::EntityClass;
use serde::Serialize;

/// One measurement definition: which counter to register and read back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    SendingRate,
    ReceivingRate,
    CpuUsage,
    MemUsage,
    FanSpeed,
    Voltage,
}

impl MetricKind {
    pub const INTERFACE: [MetricKind; 2] = [MetricKind::SendingRate, MetricKind::ReceivingRate];
    pub const PROCESSING_UNIT: [MetricKind; 2] = [MetricKind::CpuUsage, MetricKind::MemUsage];
    pub const FAN: [MetricKind; 1] = [MetricKind::FanSpeed];
    pub const POWER: [MetricKind; 1] = [MetricKind::Voltage];

    pub fn entity_class(self) -> EntityClass {
        match self {
            MetricKind::SendingRate | MetricKind::ReceivingRate => EntityClass::Interface,
            _ => EntityClass::Slot,
        }
    }

    /// `measUnitKey`, also used as `indicatorsGroupKey` on task creation
    pub fn unit_key(self) -> &'static str {
        match self {
            MetricKind::SendingRate | MetricKind::ReceivingRate => "ifXTrafficStat",
            MetricKind::CpuUsage => "CpuState",
            MetricKind::MemUsage => "MemState",
            MetricKind::FanSpeed => "hwEnvMainFan",
            MetricKind::Voltage => "hwEntityExtentMIB",
        }
    }

    /// `measTypeKey`, also the indicator key on task creation
    pub fn type_key(self) -> &'static str {
        match self {
            MetricKind::SendingRate => "ifHCOutOctetsSpeed",
            MetricKind::ReceivingRate => "ifHCInOctetsSpeed",
            MetricKind::CpuUsage => "cpuUsage",
            MetricKind::MemUsage => "memUsage",
            MetricKind::FanSpeed => "hwEntityFanSpeed",
            MetricKind::Voltage => "hwEntityVoltage",
        }
    }

    /// Key of this metric inside published snapshots
    pub fn friendly_name(self) -> &'static str {
        match self {
            MetricKind::SendingRate => "sending_rate",
            MetricKind::ReceivingRate => "receiving_rate",
            MetricKind::CpuUsage => "cpu_usage",
            MetricKind::MemUsage => "mem_usage",
            MetricKind::FanSpeed => "fan_speed",
            MetricKind::Voltage => "voltage",
        }
    }

    pub fn id_suffix(self) -> &'static str {
        match self {
            MetricKind::SendingRate => "out",
            MetricKind::ReceivingRate => "in",
            MetricKind::CpuUsage => "cpu",
            MetricKind::MemUsage => "mem",
            MetricKind::FanSpeed => "fan",
            MetricKind::Voltage => "volt",
        }
    }

    /// `indicatorsData` payload for task creation (a JSON document in a string)
    pub fn indicators_data(self) -> String {
        serde_json::json!([{
            "indicatorKey": self.type_key(),
            "symbol": "",
            "thresholdValue": ""
        }])
        .to_string()
    }

    /// `indexKeys` payload for history queries (a JSON document in a string)
    pub fn index_keys(self) -> String {
        serde_json::json!([{
            "resourceType": self.entity_class().resource_type(),
            "measUnitKey": self.unit_key(),
            "measTypeKey": self.type_key()
        }])
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_groups_match_entity_class() {
        for kind in MetricKind::INTERFACE {
            assert_eq!(kind.entity_class(), EntityClass::Interface);
        }
        for kind in MetricKind::PROCESSING_UNIT
            .iter()
            .chain(MetricKind::FAN.iter())
            .chain(MetricKind::POWER.iter())
        {
            assert_eq!(kind.entity_class(), EntityClass::Slot);
        }
    }

    #[test]
    fn test_indicators_data_is_json_string() {
        let parsed: serde_json::Value =
            serde_json::from_str(&MetricKind::CpuUsage.indicators_data()).unwrap();
        assert_eq!(parsed[0]["indicatorKey"], "cpuUsage");
        assert_eq!(parsed[0]["symbol"], "");
    }

    #[test]
    fn test_index_keys() {
        let parsed: serde_json::Value =
            serde_json::from_str(&MetricKind::SendingRate.index_keys()).unwrap();
        assert_eq!(parsed[0]["resourceType"], "interface");
        assert_eq!(parsed[0]["measUnitKey"], "ifXTrafficStat");
        assert_eq!(parsed[0]["measTypeKey"], "ifHCOutOctetsSpeed");
    }
}
