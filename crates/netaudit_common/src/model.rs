//! Inventory data model
//!
//! Typed records for one audit snapshot: devices, their interfaces and the
//! IP addresses assigned to them. Records are immutable inputs for the
//! duration of a run; only the remediation executor mutates them, and it
//! persists every mutation back through the inventory source.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A network device as known to the inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Identity key, unique among devices.
    pub id: String,
    pub name: String,
    pub location: String,
    pub role: String,
    #[serde(default)]
    pub serial: String,
    /// Primary management IPv4 address, as text. May carry a prefix
    /// (`10.0.0.1/24`) or not, depending on the backing store.
    #[serde(default)]
    pub primary_ip4: Option<String>,
    #[serde(default)]
    pub status: String,
    /// Free-form custom fields (e.g. `config_snippet`).
    #[serde(default)]
    pub custom_fields: HashMap<String, String>,
}

impl Device {
    /// Host part of the primary IPv4 address, with any prefix length
    /// stripped (`10.0.0.1/24` -> `10.0.0.1`). None when unset or empty.
    pub fn primary_ip4_host(&self) -> Option<String> {
        let addr = self.primary_ip4.as_deref()?.trim();
        if addr.is_empty() {
            return None;
        }
        let host = addr.split('/').next().unwrap_or(addr);
        match host.parse::<std::net::IpAddr>() {
            Ok(ip) => Some(ip.to_string()),
            Err(_) => Some(host.to_string()),
        }
    }
}

/// A physical or logical interface on a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interface {
    /// Identity key, unique among interfaces.
    pub id: String,
    /// Identity key of the owning device.
    pub device: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// LAG the interface is a member of, if any.
    #[serde(default)]
    pub lag: Option<String>,
    /// Cable attached to the interface, if any.
    #[serde(default)]
    pub cable: Option<String>,
    /// Far-end endpoint when the cable path is traced, if any.
    #[serde(default)]
    pub connected_endpoint: Option<String>,
    /// Addresses assigned to this interface (materialized back-reference
    /// from the IPAM side).
    #[serde(default)]
    pub ip_addresses: Vec<String>,
}

fn default_true() -> bool {
    true
}

/// What an IP address is assigned to.
///
/// The backing store exposes this as a generic object reference; here it is
/// an explicit tagged variant so rules and reports resolve it without any
/// runtime type inspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AssignedObject {
    None,
    Interface { device: String, name: String },
    VmInterface { vm: String, name: String },
}

impl Default for AssignedObject {
    fn default() -> Self {
        Self::None
    }
}

impl AssignedObject {
    /// Short label for the object type, empty when unassigned.
    pub fn kind_label(&self) -> &'static str {
        match self {
            AssignedObject::None => "",
            AssignedObject::Interface { .. } => "interface",
            AssignedObject::VmInterface { .. } => "vminterface",
        }
    }

    /// Human-readable name of the assignment target.
    pub fn display_name(&self) -> String {
        match self {
            AssignedObject::None => String::new(),
            AssignedObject::Interface { device, name } => format!("{} {}", device, name),
            AssignedObject::VmInterface { vm, name } => format!("{} {}", vm, name),
        }
    }

    /// Label used in duplicate reasons: the display name, or "Unassigned".
    pub fn reason_label(&self) -> String {
        match self {
            AssignedObject::None => "Unassigned".to_string(),
            other => other.display_name(),
        }
    }
}

/// An IP address record from the IPAM side of the inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpAddress {
    /// Identity key, unique among IP addresses.
    pub id: String,
    /// Address text, usually in CIDR form (`10.0.0.1/24`).
    pub address: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub tenant: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub assigned: AssignedObject,
}

/// One record of the inventory snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "variant", rename_all = "snake_case")]
pub enum InventoryRecord {
    Device(Device),
    Interface(Interface),
    IpAddress(IpAddress),
}

impl InventoryRecord {
    /// Identity key, unique within the record's variant collection.
    pub fn key(&self) -> &str {
        match self {
            InventoryRecord::Device(d) => &d.id,
            InventoryRecord::Interface(i) => &i.id,
            InventoryRecord::IpAddress(a) => &a.id,
        }
    }

    /// Variant name as used in filters and reports.
    pub fn variant(&self) -> &'static str {
        match self {
            InventoryRecord::Device(_) => "device",
            InventoryRecord::Interface(_) => "interface",
            InventoryRecord::IpAddress(_) => "ip_address",
        }
    }

    /// Named field lookup for filter matching. Unknown fields yield None.
    pub fn field(&self, name: &str) -> Option<String> {
        match self {
            InventoryRecord::Device(d) => match name {
                "id" => Some(d.id.clone()),
                "name" => Some(d.name.clone()),
                "location" => Some(d.location.clone()),
                "role" => Some(d.role.clone()),
                "serial" => Some(d.serial.clone()),
                "status" => Some(d.status.clone()),
                _ => None,
            },
            InventoryRecord::Interface(i) => match name {
                "id" => Some(i.id.clone()),
                "name" => Some(i.name.clone()),
                "device" => Some(i.device.clone()),
                "description" => Some(i.description.clone()),
                _ => None,
            },
            InventoryRecord::IpAddress(a) => match name {
                "id" => Some(a.id.clone()),
                "address" => Some(a.address.clone()),
                "status" => Some(a.status.clone()),
                "tenant" => a.tenant.clone(),
                "description" => Some(a.description.clone()),
                _ => None,
            },
        }
    }

    pub fn as_device(&self) -> Option<&Device> {
        match self {
            InventoryRecord::Device(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_interface(&self) -> Option<&Interface> {
        match self {
            InventoryRecord::Interface(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_ip_address(&self) -> Option<&IpAddress> {
        match self {
            InventoryRecord::IpAddress(a) => Some(a),
            _ => None,
        }
    }
}

/// Conjunction of field-equality constraints over one record variant.
///
/// `RecordFilter::devices().eq("location", "fra1").eq("role", "leaf")`
/// matches leaf devices in fra1. An empty filter matches every record of
/// its variant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFilter {
    /// Variant the filter selects ("device", "interface", "ip_address");
    /// None matches all variants.
    pub variant: Option<String>,
    /// Field-equality constraints, all of which must hold.
    pub constraints: Vec<(String, String)>,
}

impl RecordFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn devices() -> Self {
        Self {
            variant: Some("device".to_string()),
            constraints: Vec::new(),
        }
    }

    pub fn interfaces() -> Self {
        Self {
            variant: Some("interface".to_string()),
            constraints: Vec::new(),
        }
    }

    pub fn ip_addresses() -> Self {
        Self {
            variant: Some("ip_address".to_string()),
            constraints: Vec::new(),
        }
    }

    /// Add a field-equality constraint.
    pub fn eq(mut self, field: &str, value: &str) -> Self {
        self.constraints
            .push((field.to_string(), value.to_string()));
        self
    }

    /// True when the record satisfies every constraint.
    pub fn matches(&self, record: &InventoryRecord) -> bool {
        if let Some(variant) = &self.variant {
            if record.variant() != variant {
                return false;
            }
        }
        self.constraints
            .iter()
            .all(|(field, value)| record.field(field).as_deref() == Some(value.as_str()))
    }
}
