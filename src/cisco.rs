//! Normalizer for CLI devices (Cisco IOS style).
//!
//! Runs a fixed command sequence over a [`DeviceSession`], feeds the raw
//! output through the built-in templates and assembles the probe report.
//! Any parse or validation failure aborts the whole probe; no partial
//! report is ever produced.

use std::time::SystemTime;

use log::{debug, info};
use serde::Serialize;

use crate::error::ProbeError;
use crate::model::{InterfaceRecord, QosPolicy};
use crate::session::DeviceSession;
use crate::templates;

/// System resource figures reported by a CLI device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CiscoResourceRecord {
    pub cpu_used_1m_pct: f64,
    pub cpu_used_5m_pct: f64,
    pub mem_total: u64,
    pub mem_used: u64,
    pub mem_free: u64,
}

/// Full normalized result of one CLI device probe.
#[derive(Debug, Clone, Serialize)]
pub struct CiscoReport {
    pub hostname: String,
    pub resources: CiscoResourceRecord,
    pub interfaces: Vec<InterfaceRecord>,
    /// When the session transport was last (re)established.
    pub session_established: SystemTime,
}

/// Probes one CLI device through its persistent session.
pub async fn collect(session: &DeviceSession) -> Result<CiscoReport, ProbeError> {
    let addr = session.addr();

    let version_out = session.execute_cached("show version").await?;
    let hostname = parse_hostname(&version_out)?;
    info!("{addr}: probing device '{hostname}'");

    let cpu_out = session.execute("show processes cpu").await?;
    let (cpu_used_1m_pct, cpu_used_5m_pct) = parse_cpu(&cpu_out)?;

    let mem_out = session.execute("show processes memory").await?;
    let (mem_total, mem_used, mem_free) = parse_memory(&mem_out)?;

    let interface_out = session.execute("show interface").await?;
    let parsed = templates::show_interface()?.parse(&interface_out)?;
    debug!("{addr}: `show interface` produced {} records", parsed.len());

    let mut interfaces = Vec::with_capacity(parsed.len());
    for record in &parsed {
        let mut interface = InterfaceRecord::from_parsed(record)?;
        if interface.is_tunnel() {
            let qos_out = session
                .execute_cached(&format!("show policy-map interface {}", interface.interface))
                .await?;
            interface.qos = parse_qos(&qos_out)?;
        }
        interfaces.push(interface);
    }
    info!("{addr}: normalized {} interfaces", interfaces.len());

    Ok(CiscoReport {
        hostname,
        resources: CiscoResourceRecord {
            cpu_used_1m_pct,
            cpu_used_5m_pct,
            mem_total,
            mem_used,
            mem_free,
        },
        interfaces,
        session_established: session.established_at().await,
    })
}

/// Extracts the hostname from `show version` output.
fn parse_hostname(output: &str) -> Result<String, ProbeError> {
    templates::show_version()?
        .parse(output)?
        .first()
        .and_then(|record| record.get("HOSTNAME").cloned())
        .ok_or_else(|| {
            ProbeError::Validation("`show version` did not yield a hostname".to_string())
        })
}

/// Extracts 1-minute and 5-minute CPU utilization from `show processes cpu`.
///
/// Only the line starting with `CPU` is fed to the template.
fn parse_cpu(output: &str) -> Result<(f64, f64), ProbeError> {
    let line = output
        .lines()
        .find(|line| line.starts_with("CPU"))
        .ok_or_else(|| {
            ProbeError::Validation(
                "`show processes cpu` has no CPU utilization summary line".to_string(),
            )
        })?;
    let records = templates::show_processes_cpu()?.parse(line)?;
    let record = records.first().ok_or_else(|| {
        ProbeError::Validation("failed to parse `show processes cpu` summary".to_string())
    })?;
    Ok((
        numeric(record.get("CPU_USAGE_1_MIN"), "CPU_USAGE_1_MIN")?,
        numeric(record.get("CPU_USAGE_5_MIN"), "CPU_USAGE_5_MIN")?,
    ))
}

/// Extracts total/used/free from the processor-pool line of
/// `show processes memory`.
fn parse_memory(output: &str) -> Result<(u64, u64, u64), ProbeError> {
    let line = output
        .lines()
        .find(|line| line.starts_with("Processor Pool"))
        .ok_or_else(|| {
            ProbeError::Validation(
                "`show processes memory` has no processor pool summary line".to_string(),
            )
        })?;
    let records = templates::show_processes_memory()?.parse(line)?;
    let record = records.first().ok_or_else(|| {
        ProbeError::Validation("failed to parse `show processes memory` summary".to_string())
    })?;
    Ok((
        integer(record.get("MEMORY_TOTAL"), "MEMORY_TOTAL")?,
        integer(record.get("MEMORY_USED"), "MEMORY_USED")?,
        integer(record.get("MEMORY_FREE"), "MEMORY_FREE")?,
    ))
}

/// Extracts the QoS policy from `show policy-map interface` output, if the
/// interface has one attached.
fn parse_qos(output: &str) -> Result<Option<QosPolicy>, ProbeError> {
    let records = templates::show_policy_map_interface()?.parse(output)?;
    let Some(record) = records.first() else {
        return Ok(None);
    };
    let policy_name = record.get("SERVICE_POLICY_INPUT").cloned().ok_or_else(|| {
        ProbeError::Validation("QoS record is missing the service-policy name".to_string())
    })?;
    let class_map = record.get("CLASS_MAP").cloned().ok_or_else(|| {
        ProbeError::Validation("QoS record is missing the class-map name".to_string())
    })?;
    let cir_bps = integer(record.get("CIR_BPS"), "CIR_BPS")?;
    Ok(Some(QosPolicy {
        policy_name,
        class_map,
        cir_bps,
    }))
}

fn numeric(value: Option<&String>, key: &str) -> Result<f64, ProbeError> {
    let text = value
        .ok_or_else(|| ProbeError::Validation(format!("missing field {key}")))?;
    text.parse()
        .map_err(|_| ProbeError::Validation(format!("field {key} is not numeric: '{text}'")))
}

fn integer(value: Option<&String>, key: &str) -> Result<u64, ProbeError> {
    let text = value
        .ok_or_else(|| ProbeError::Validation(format!("missing field {key}")))?;
    text.parse()
        .map_err(|_| ProbeError::Validation(format!("field {key} is not numeric: '{text}'")))
}
