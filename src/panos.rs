//! Normalizer for XML-API devices (PAN-OS firewalls).
//!
//! Unlike the CLI path there is no persistent session: a client is built
//! for one probe, authenticated via the keygen endpoint, and dropped when
//! the probe finishes. Operational command results come back as XML whose
//! `result` element wraps free text, so the interesting figures are pulled
//! out with regexes after the markup layer is peeled off.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use async_trait::async_trait;
use log::{debug, info};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::config;
use crate::error::ProbeError;
use crate::model::{Credentials, SecurityRuleHitCounts};

/// Operational requests issued against the device API.
const CMD_SYSTEM_RESOURCES: &str = "<show><system><resources></resources></system></show>";
const CMD_SYSTEM_INFO: &str = "<show><system><info></info></system></show>";
const CMD_RULE_HIT_COUNTS: &str = "<show><rule-hit-count><vsys><vsys-name><entry name='vsys1'>\
     <rule-base><entry name='security'><rules><all/></rules></entry></rule-base>\
     </entry></vsys-name></vsys></rule-hit-count></show>";
const RULEBASE_XPATH: &str =
    "/config/devices/entry[@name='localhost.localdomain']/vsys/entry/rulebase";

static CPU_IDLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"%Cpu.*, ([\d.]+) .*id").expect("cpu idle regex"));
static MEMORY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?s)MiB Mem.*?(\S+) total.*? (\S+) free.*? (\S+) used.*? (\S+) buff/cache.*?\n.*?MiB Swap.*? (\S+) total.*? (\S+) free.*? (\S+) used.*? (\S+) avail Mem",
    )
    .expect("memory summary regex")
});
static UPTIME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+) days,").expect("uptime regex"));

/// Abstract XML-API transport, implemented by [`PanosClient`] and by the
/// scripted transports in the fixture tests.
#[async_trait]
pub trait PanosTransport: Send + Sync {
    /// Issues an operational command, returning the raw XML response.
    async fn op(&self, cmd: &str) -> Result<String, ProbeError>;
    /// Fetches a configuration subtree by xpath, returning the raw XML
    /// response.
    async fn get_config(&self, xpath: &str) -> Result<String, ProbeError>;
}

/// System resource figures reported by an API device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PanosResourceRecord {
    pub cpu_used_pct: f64,
    pub mem_total_mb: f64,
    pub mem_free_mb: f64,
    /// Sourced from the swap summary's `avail Mem` token.
    pub mem_avail_mb: f64,
}

/// Full normalized result of one API device probe.
#[derive(Debug, Clone, Serialize)]
pub struct PanosReport {
    pub resources: PanosResourceRecord,
    pub uptime_days: u64,
    pub rule_hits: SecurityRuleHitCounts,
}

/// Probes one API device through a single-use transport.
pub async fn collect(transport: &dyn PanosTransport) -> Result<PanosReport, ProbeError> {
    let rulebase_xml = transport.get_config(RULEBASE_XPATH).await?;
    let rule_bases = count_rule_bases(&rulebase_xml)?;
    if rule_bases != 1 {
        return Err(ProbeError::Assumption(format!(
            "expected exactly one security rule-base, device returned {rule_bases}"
        )));
    }

    let hit_xml = transport.op(CMD_RULE_HIT_COUNTS).await?;
    let rule_hits = parse_hit_counts(&hit_xml)?;
    debug!("hit counts collected for {} security rules", rule_hits.counts.len());

    let resources_xml = transport.op(CMD_SYSTEM_RESOURCES).await?;
    let resources = parse_system_resources(&extract_result_text(&resources_xml)?)?;

    let info_xml = transport.op(CMD_SYSTEM_INFO).await?;
    let uptime_days = parse_uptime_days(&info_xml);
    info!(
        "system resources: cpu {:.1}% used, {:.1} MiB total, up {} days",
        resources.cpu_used_pct, resources.mem_total_mb, uptime_days
    );

    Ok(PanosReport {
        resources,
        uptime_days,
        rule_hits,
    })
}

/// XML-API client backed by reqwest.
///
/// Authentication happens once at construction through the keygen
/// endpoint; the key is then threaded as a query parameter on every
/// request. Device certificates are self-signed in practice, hence the
/// disabled verification.
pub struct PanosClient {
    http: reqwest::Client,
    endpoint: String,
    key: String,
}

impl PanosClient {
    pub async fn connect(addr: Ipv4Addr, credentials: &Credentials) -> Result<Self, ProbeError> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .connect_timeout(config::CONNECT_TIMEOUT)
            .timeout(config::COMMAND_TIMEOUT)
            .build()?;
        let endpoint = format!("https://{addr}/api/");
        debug!("{addr}: requesting API key");
        let body = http
            .get(&endpoint)
            .query(&[
                ("type", "keygen"),
                ("user", credentials.username.as_str()),
                ("password", credentials.password.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let key = extract_api_key(&body)?;
        Ok(Self {
            http,
            endpoint,
            key,
        })
    }

    async fn request(&self, params: &[(&str, &str)]) -> Result<String, ProbeError> {
        let body = self
            .http
            .get(&self.endpoint)
            .query(params)
            .query(&[("key", self.key.as_str())])
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        ensure_success(&body)?;
        Ok(body)
    }
}

#[async_trait]
impl PanosTransport for PanosClient {
    async fn op(&self, cmd: &str) -> Result<String, ProbeError> {
        self.request(&[("type", "op"), ("cmd", cmd)]).await
    }

    async fn get_config(&self, xpath: &str) -> Result<String, ProbeError> {
        self.request(&[("type", "config"), ("action", "get"), ("xpath", xpath)])
            .await
    }
}

fn extract_api_key(xml: &str) -> Result<String, ProbeError> {
    let doc = roxmltree::Document::parse(xml)?;
    ensure_success_doc(&doc)?;
    doc.descendants()
        .find(|node| node.has_tag_name("key"))
        .and_then(|node| node.text())
        .map(str::to_string)
        .ok_or_else(|| ProbeError::Connection("keygen response has no key element".to_string()))
}

fn ensure_success(xml: &str) -> Result<(), ProbeError> {
    let doc = roxmltree::Document::parse(xml)?;
    ensure_success_doc(&doc)
}

fn ensure_success_doc(doc: &roxmltree::Document<'_>) -> Result<(), ProbeError> {
    let status = doc.root_element().attribute("status").unwrap_or("");
    if status != "success" {
        let detail = doc
            .root_element()
            .descendants()
            .filter_map(|node| node.text())
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join("; ");
        return Err(ProbeError::Connection(format!(
            "API returned status '{status}': {detail}"
        )));
    }
    Ok(())
}

/// Counts `rulebase` elements in a configuration response.
fn count_rule_bases(xml: &str) -> Result<usize, ProbeError> {
    let doc = roxmltree::Document::parse(xml)?;
    Ok(doc
        .descendants()
        .filter(|node| node.has_tag_name("rulebase"))
        .count())
}

/// Builds the rule-name to hit-count mapping from a hit-count response.
///
/// Every `entry` element that directly carries a `hit-count` child is
/// taken as one security rule.
fn parse_hit_counts(xml: &str) -> Result<SecurityRuleHitCounts, ProbeError> {
    let doc = roxmltree::Document::parse(xml)?;
    let mut counts = BTreeMap::new();
    for entry in doc.descendants().filter(|node| node.has_tag_name("entry")) {
        let Some(hits) = entry
            .children()
            .find(|child| child.has_tag_name("hit-count"))
        else {
            continue;
        };
        let name = entry.attribute("name").ok_or_else(|| {
            ProbeError::Validation("hit-count entry has no rule name".to_string())
        })?;
        let value = hits.text().unwrap_or("").trim();
        let value: u64 = value.parse().map_err(|_| {
            ProbeError::Validation(format!(
                "hit count for rule '{name}' is not numeric: '{value}'"
            ))
        })?;
        counts.insert(name.to_string(), value);
    }
    Ok(SecurityRuleHitCounts { counts })
}

/// Unwraps the free-text payload of a `result` element.
fn extract_result_text(xml: &str) -> Result<String, ProbeError> {
    let doc = roxmltree::Document::parse(xml)?;
    doc.descendants()
        .find(|node| node.has_tag_name("result"))
        .and_then(|node| node.text())
        .map(str::to_string)
        .ok_or_else(|| {
            ProbeError::Validation("operational response has no result payload".to_string())
        })
}

/// Pulls CPU and memory figures out of `show system resources` text.
///
/// CPU usage is derived as `100 - idle`. The available-memory figure is
/// taken from the swap summary line, matching the device's own layout of
/// the resources block.
fn parse_system_resources(text: &str) -> Result<PanosResourceRecord, ProbeError> {
    let idle = CPU_IDLE_RE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .ok_or_else(|| {
            ProbeError::Validation(
                "`show system resources` has no CPU idle percentage".to_string(),
            )
        })?;
    let idle: f64 = idle.as_str().parse().map_err(|_| {
        ProbeError::Validation(format!("CPU idle is not numeric: '{}'", idle.as_str()))
    })?;

    let mem = MEMORY_RE.captures(text).ok_or_else(|| {
        ProbeError::Validation("`show system resources` has no memory summary".to_string())
    })?;
    Ok(PanosResourceRecord {
        cpu_used_pct: 100.0 - idle,
        mem_total_mb: mem_figure(&mem, 1)?,
        mem_free_mb: mem_figure(&mem, 2)?,
        mem_avail_mb: mem_figure(&mem, 8)?,
    })
}

fn mem_figure(caps: &regex::Captures<'_>, group: usize) -> Result<f64, ProbeError> {
    let text = caps
        .get(group)
        .map(|m| m.as_str())
        .unwrap_or("");
    text.parse().map_err(|_| {
        ProbeError::Validation(format!("memory figure is not numeric: '{text}'"))
    })
}

/// Scans `show system info` output for a leading day count. No match
/// means the device has been up for less than a day.
fn parse_uptime_days(text: &str) -> u64 {
    UPTIME_RE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}
