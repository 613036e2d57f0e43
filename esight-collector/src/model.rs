//! eSight inventory records and the entities built from them
//!
//! Numeric and string codes from the REST API are decoded into closed enums
//! here; nothing past this module sees the raw codes.

use serde::{Deserialize, Serialize};

/// Device category string for routers
const ROUTER_CATEGORY: &str = "ne.category.route";
/// Device category string for switches
const SWITCH_CATEGORY: &str = "ne.category.switch";

/// Slot statuses that count as active
const ACTIVE_SLOT_STATUSES: [i64; 5] = [3, 11, 13, 15, 16];

/// Name fragment identifying a processing-unit board
const PROCESSING_UNIT_MARKER: &str = "IPU";

/// Operational status code as reported by eSight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperStatus(pub i64);

impl OperStatus {
    pub const UNAVAILABLE: OperStatus = OperStatus(3);

    /// Interfaces are eligible unless reported unavailable
    pub fn interface_eligible(self) -> bool {
        self != Self::UNAVAILABLE
    }

    pub fn slot_eligible(self) -> bool {
        ACTIVE_SLOT_STATUSES.contains(&self.0)
    }
}

/// Physical class of a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum PhysicalClass {
    /// Boards, including processing units and clock boards
    Board,
    Power,
    Fan,
    Other(i64),
}

impl From<i64> for PhysicalClass {
    fn from(code: i64) -> Self {
        match code {
            9 => PhysicalClass::Board,
            6 => PhysicalClass::Power,
            7 => PhysicalClass::Fan,
            other => PhysicalClass::Other(other),
        }
    }
}

impl From<PhysicalClass> for i64 {
    fn from(class: PhysicalClass) -> Self {
        match class {
            PhysicalClass::Board => 9,
            PhysicalClass::Power => 6,
            PhysicalClass::Fan => 7,
            PhysicalClass::Other(code) => code,
        }
    }
}

/// Network element category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DeviceCategory {
    Router,
    Switch,
    Other(String),
}

impl From<String> for DeviceCategory {
    fn from(category: String) -> Self {
        match category.as_str() {
            ROUTER_CATEGORY => DeviceCategory::Router,
            SWITCH_CATEGORY => DeviceCategory::Switch,
            _ => DeviceCategory::Other(category),
        }
    }
}

impl From<DeviceCategory> for String {
    fn from(category: DeviceCategory) -> Self {
        match category {
            DeviceCategory::Router => ROUTER_CATEGORY.to_string(),
            DeviceCategory::Switch => SWITCH_CATEGORY.to_string(),
            DeviceCategory::Other(other) => other,
        }
    }
}

/// Entry of `GET /network/port`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceRecord {
    pub name: String,
    pub nedn: String,
    pub operstatus: OperStatus,
}

/// Entry of `GET /network/nedevice`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub nedn: String,
    pub necategory: DeviceCategory,
    #[serde(default)]
    pub nename: Option<String>,
}

/// Entry of `GET /network/slot`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotRecord {
    pub nedn: String,
    pub slotname: String,
    pub serialnum: String,
    pub physicalclass: PhysicalClass,
    pub operstatus: OperStatus,
}

impl SlotRecord {
    pub fn is_processing_unit(&self) -> bool {
        self.physicalclass == PhysicalClass::Board && self.slotname.contains(PROCESSING_UNIT_MARKER)
    }
}

/// Entity class, one publish channel each
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityClass {
    Interface,
    Slot,
}

impl EntityClass {
    /// `subResourceType` / `resourceType` value sent to eSight
    pub fn resource_type(self) -> &'static str {
        match self {
            EntityClass::Interface => "interface",
            EntityClass::Slot => "slot",
        }
    }
}

/// A monitorable element discovered from the inventory
#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    Interface(InterfaceRecord),
    Slot(SlotRecord),
}

impl Entity {
    pub fn class(&self) -> EntityClass {
        match self {
            Entity::Interface(_) => EntityClass::Interface,
            Entity::Slot(_) => EntityClass::Slot,
        }
    }

    /// Distinguished name of the owning device
    pub fn device_dn(&self) -> &str {
        match self {
            Entity::Interface(interface) => &interface.nedn,
            Entity::Slot(slot) => &slot.nedn,
        }
    }

    /// Identity used in task ids: interface name or slot serial number
    pub fn identity(&self) -> &str {
        match self {
            Entity::Interface(interface) => &interface.name,
            Entity::Slot(slot) => &slot.serialnum,
        }
    }

    /// Key of this entity in published snapshots
    pub fn label(&self) -> &str {
        match self {
            Entity::Interface(interface) => &interface.name,
            Entity::Slot(slot) => &slot.slotname,
        }
    }

    /// Sub-resource name as eSight expects it in task and history calls
    pub fn sub_resource_name(&self) -> String {
        match self {
            Entity::Interface(interface) => interface.name.clone(),
            Entity::Slot(slot) => format!("Slot:{}", slot.slotname.replace(' ', "%20")),
        }
    }
}
