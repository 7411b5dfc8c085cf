//! Normalized domain records produced by a probe.
//!
//! Everything here is built eagerly and validated at construction time: an
//! [`InterfaceRecord`] either carries all derived attributes or the probe
//! fails with a validation error.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use serde::Serialize;

use crate::error::ProbeError;
use crate::textfsm::ParsedRecord;

/// Resolved username/password pair for one device.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// Which end of a link an interface belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceSide {
    A,
    B,
}

impl InterfaceSide {
    fn from_token(token: &str) -> Result<Self, ProbeError> {
        match token {
            "a" => Ok(InterfaceSide::A),
            "b" => Ok(InterfaceSide::B),
            other => Err(ProbeError::Validation(format!(
                "interface side must be 'a' or 'b', got '{other}'"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InterfaceSide::A => "a",
            InterfaceSide::B => "b",
        }
    }
}

/// Role of an interface within a link group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceKind {
    Service,
    Member,
}

impl InterfaceKind {
    fn from_token(token: &str) -> Result<Self, ProbeError> {
        match token {
            "service" => Ok(InterfaceKind::Service),
            "member" => Ok(InterfaceKind::Member),
            other => Err(ProbeError::Validation(format!(
                "interface type must be 'service' or 'member', got '{other}'"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InterfaceKind::Service => "service",
            InterfaceKind::Member => "member",
        }
    }
}

/// Attributes decoded from the `/k1:v1/k2:v2/.../` description micro-format.
///
/// `side`, `type` and `name` are mandatory; any further keys (such as `env`)
/// are kept verbatim in `extra`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterfaceAttributes {
    pub side: InterfaceSide,
    pub kind: InterfaceKind,
    pub name: String,
    pub extra: BTreeMap<String, String>,
}

impl InterfaceAttributes {
    /// Decodes a description like `/env:uat/side:a/type:service/name:transit/`.
    ///
    /// Malformed segments or missing required keys fail the whole probe.
    pub fn decode(description: &str) -> Result<Self, ProbeError> {
        let mut fields = decode_micro_format(description)?;
        let side = fields.remove("side").ok_or_else(|| {
            ProbeError::Validation(format!("description '{description}' is missing 'side'"))
        })?;
        let kind = fields.remove("type").ok_or_else(|| {
            ProbeError::Validation(format!("description '{description}' is missing 'type'"))
        })?;
        let name = fields.remove("name").ok_or_else(|| {
            ProbeError::Validation(format!("description '{description}' is missing 'name'"))
        })?;

        Ok(Self {
            side: InterfaceSide::from_token(&side)?,
            kind: InterfaceKind::from_token(&kind)?,
            name,
            extra: fields,
        })
    }
}

/// Splits `/k1:v1/k2:v2/.../` into a key/value map.
///
/// The leading segment (before the first `/`) and the trailing one (after
/// the last `/`) are ignored, so free text around the encoding is allowed.
pub fn decode_micro_format(description: &str) -> Result<BTreeMap<String, String>, ProbeError> {
    let segments: Vec<&str> = description.split('/').collect();
    if segments.len() < 3 {
        return Err(ProbeError::Validation(format!(
            "description '{description}' does not carry a /key:value/ encoding"
        )));
    }
    let mut fields = BTreeMap::new();
    for segment in &segments[1..segments.len() - 1] {
        let (key, value) = segment.split_once(':').ok_or_else(|| {
            ProbeError::Validation(format!(
                "malformed description segment '{segment}' in '{description}'"
            ))
        })?;
        fields.insert(key.to_string(), value.to_string());
    }
    Ok(fields)
}

/// Maps a status token to a boolean: `up` (any case) is true, everything
/// else (`down`, `administratively down`, ...) is false.
pub fn status_is_up(token: &str) -> bool {
    token.eq_ignore_ascii_case("up")
}

/// QoS policy attached to a tunnel interface with an active service policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QosPolicy {
    /// Service-policy name reported on the interface.
    pub policy_name: String,
    /// Class-map enforcing the policer.
    pub class_map: String,
    /// Committed information rate in bits per second.
    pub cir_bps: u64,
}

/// One normalized interface, fully validated.
#[derive(Debug, Clone, Serialize)]
pub struct InterfaceRecord {
    pub interface: String,
    pub description: String,
    pub attributes: InterfaceAttributes,
    pub ip_address: Ipv4Addr,
    /// Remote end of the tunnel: by addressing convention always one higher
    /// than the local address.
    pub tunnel_remote_address: Ipv4Addr,
    pub admin_up: bool,
    pub oper_up: bool,
    pub input_packets: u64,
    pub output_packets: u64,
    pub input_errors: u64,
    pub output_errors: u64,
    pub input_rate_bps: u64,
    pub output_rate_bps: u64,
    pub input_drops: u64,
    pub output_drops: u64,
    pub qos: Option<QosPolicy>,
}

impl InterfaceRecord {
    /// Builds a record from a parsed `show interface` block.
    ///
    /// All derived attributes are computed here; any missing or unparsable
    /// field aborts the whole probe.
    pub fn from_parsed(record: &ParsedRecord) -> Result<Self, ProbeError> {
        let interface = required_field(record, "INTERFACE")?.to_string();
        let description = required_field(record, "DESCRIPTION")?.to_string();
        let attributes = InterfaceAttributes::decode(&description)?;

        let ip_text = required_field(record, "IP_ADDRESS")?;
        let ip_address: Ipv4Addr = ip_text.parse().map_err(|_| {
            ProbeError::Validation(format!(
                "interface {interface}: invalid address '{ip_text}'"
            ))
        })?;
        let tunnel_remote_address = Ipv4Addr::from(u32::from(ip_address).wrapping_add(1));

        Ok(Self {
            admin_up: status_is_up(required_field(record, "LINK_STATUS")?),
            oper_up: status_is_up(required_field(record, "PROTOCOL_STATUS")?),
            input_packets: counter(record, &interface, "INPUT_PACKETS")?,
            output_packets: counter(record, &interface, "OUTPUT_PACKETS")?,
            input_errors: counter(record, &interface, "INPUT_ERRORS")?,
            output_errors: counter(record, &interface, "OUTPUT_ERRORS")?,
            input_rate_bps: counter(record, &interface, "INPUT_RATE")?,
            output_rate_bps: counter(record, &interface, "OUTPUT_RATE")?,
            input_drops: counter(record, &interface, "QUEUE_DROPS")?,
            output_drops: counter(record, &interface, "QUEUE_OUTPUT_DROPS")?,
            interface,
            description,
            attributes,
            ip_address,
            tunnel_remote_address,
            qos: None,
        })
    }

    /// Whether this interface is a tunnel endpoint (by naming convention).
    pub fn is_tunnel(&self) -> bool {
        self.interface.starts_with("Tunnel")
    }
}

fn required_field<'a>(record: &'a ParsedRecord, key: &str) -> Result<&'a str, ProbeError> {
    record
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| ProbeError::Validation(format!("interface record is missing {key}")))
}

fn counter(record: &ParsedRecord, interface: &str, key: &str) -> Result<u64, ProbeError> {
    let text = record.get(key).map(String::as_str).ok_or_else(|| {
        ProbeError::Validation(format!("interface {interface}: missing counter {key}"))
    })?;
    text.parse().map_err(|_| {
        ProbeError::Validation(format!(
            "interface {interface}: counter {key} is not numeric: '{text}'"
        ))
    })
}

/// Cumulative hit counters for the API device's security rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SecurityRuleHitCounts {
    pub counts: BTreeMap<String, u64>,
}
