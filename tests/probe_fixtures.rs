use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use async_trait::async_trait;
use netprobe::cisco;
use netprobe::error::ProbeError;
use netprobe::model::{Credentials, InterfaceKind, InterfaceSide};
use netprobe::panos::{self, PanosTransport};
use netprobe::session::{CliConnector, CliTransport, SessionRegistry};

const SHOW_VERSION: &str = include_str!("fixtures/cisco_show_version.txt");
const SHOW_PROCESSES_CPU: &str = include_str!("fixtures/cisco_show_processes_cpu.txt");
const SHOW_PROCESSES_MEMORY: &str = include_str!("fixtures/cisco_show_processes_memory.txt");
const SHOW_INTERFACE: &str = include_str!("fixtures/cisco_show_interface.txt");
const SHOW_POLICY_MAP: &str = include_str!("fixtures/cisco_show_policy_map.txt");

const PANOS_RESOURCES: &str = include_str!("fixtures/panos_system_resources.xml");
const PANOS_SYSTEM_INFO: &str = include_str!("fixtures/panos_system_info.xml");
const PANOS_HIT_COUNTS: &str = include_str!("fixtures/panos_hit_counts.xml");
const PANOS_RULEBASE: &str = include_str!("fixtures/panos_rulebase.xml");

const PANOS_TWO_RULEBASES: &str = "<response status=\"success\"><result>\
    <rulebase><security/></rulebase><rulebase><nat/></rulebase>\
    </result></response>";

/// CLI transport that answers commands from a fixed script.
struct ScriptedTransport {
    outputs: HashMap<String, String>,
}

#[async_trait]
impl CliTransport for ScriptedTransport {
    async fn find_prompt(&mut self) -> Result<String, ProbeError> {
        Ok("core-rtr-1#".to_string())
    }

    async fn send_command(&mut self, command: &str) -> Result<String, ProbeError> {
        self.outputs
            .get(command)
            .cloned()
            .ok_or_else(|| ProbeError::Connection(format!("unscripted command '{command}'")))
    }

    async fn disconnect(&mut self) {}
}

struct ScriptedConnector {
    outputs: HashMap<String, String>,
}

#[async_trait]
impl CliConnector for ScriptedConnector {
    async fn connect(
        &self,
        _addr: Ipv4Addr,
        _credentials: &Credentials,
    ) -> Result<Box<dyn CliTransport>, ProbeError> {
        Ok(Box::new(ScriptedTransport {
            outputs: self.outputs.clone(),
        }))
    }
}

fn cisco_script() -> HashMap<String, String> {
    HashMap::from([
        ("show version".to_string(), SHOW_VERSION.to_string()),
        ("show processes cpu".to_string(), SHOW_PROCESSES_CPU.to_string()),
        (
            "show processes memory".to_string(),
            SHOW_PROCESSES_MEMORY.to_string(),
        ),
        ("show interface".to_string(), SHOW_INTERFACE.to_string()),
        (
            "show policy-map interface Tunnel10".to_string(),
            SHOW_POLICY_MAP.to_string(),
        ),
    ])
}

async fn scripted_cisco_probe(
    outputs: HashMap<String, String>,
) -> Result<cisco::CiscoReport, ProbeError> {
    let registry = SessionRegistry::new(Arc::new(ScriptedConnector { outputs }));
    let session = registry
        .acquire(Ipv4Addr::new(192, 0, 2, 10), &Credentials::new("probe", "secret"))
        .await?;
    cisco::collect(&session).await
}

#[tokio::test]
async fn cli_probe_builds_a_full_report_from_fixtures() {
    let report = scripted_cisco_probe(cisco_script()).await.expect("collect");

    assert_eq!(report.hostname, "core-rtr-1");
    assert_eq!(report.resources.cpu_used_1m_pct, 1.0);
    assert_eq!(report.resources.cpu_used_5m_pct, 2.0);
    assert_eq!(report.resources.mem_total, 998245600);
    assert_eq!(report.resources.mem_used, 146094348);
    assert_eq!(report.resources.mem_free, 852151252);
    assert_eq!(report.interfaces.len(), 2);
}

#[tokio::test]
async fn cli_probe_normalizes_interface_attributes() {
    let report = scripted_cisco_probe(cisco_script()).await.expect("collect");

    let gi = &report.interfaces[0];
    assert_eq!(gi.interface, "GigabitEthernet1");
    assert!(gi.admin_up);
    assert!(gi.oper_up);
    assert_eq!(gi.ip_address, Ipv4Addr::new(10, 0, 0, 5));
    assert_eq!(gi.tunnel_remote_address, Ipv4Addr::new(10, 0, 0, 6));
    assert_eq!(gi.attributes.side, InterfaceSide::A);
    assert_eq!(gi.attributes.kind, InterfaceKind::Service);
    assert_eq!(gi.attributes.name, "transit");
    assert_eq!(gi.attributes.extra.get("env").map(String::as_str), Some("uat"));
    assert_eq!(gi.input_packets, 9000);
    assert_eq!(gi.output_packets, 8000);
    assert_eq!(gi.input_errors, 3);
    assert_eq!(gi.output_errors, 4);
    assert_eq!(gi.input_drops, 11);
    assert_eq!(gi.output_drops, 7);
    assert_eq!(gi.input_rate_bps, 2000);
    assert_eq!(gi.output_rate_bps, 1000);
    assert!(gi.qos.is_none());
}

#[tokio::test]
async fn cli_probe_attaches_qos_to_tunnels_only() {
    let report = scripted_cisco_probe(cisco_script()).await.expect("collect");

    let tunnel = &report.interfaces[1];
    assert_eq!(tunnel.interface, "Tunnel10");
    assert!(tunnel.is_tunnel());
    assert!(tunnel.admin_up);
    assert!(!tunnel.oper_up);
    let qos = tunnel.qos.as_ref().expect("tunnel carries a policy");
    assert_eq!(qos.policy_name, "limit64mb");
    assert_eq!(qos.class_map, "limit64mb");
    assert_eq!(qos.cir_bps, 64_000_000);
}

#[tokio::test]
async fn malformed_interface_description_fails_the_whole_probe() {
    let mut outputs = cisco_script();
    let broken = SHOW_INTERFACE.replace("/env:uat/side:b/type:member/name:transit/", "/env:uat/side-b/");
    outputs.insert("show interface".to_string(), broken);

    let err = scripted_cisco_probe(outputs).await.expect_err("must fail");
    assert!(matches!(err, ProbeError::Validation(_)));
}

/// XML-API transport answering operational requests from fixtures.
struct ScriptedPanos {
    rulebase: &'static str,
}

#[async_trait]
impl PanosTransport for ScriptedPanos {
    async fn op(&self, cmd: &str) -> Result<String, ProbeError> {
        if cmd.contains("resources") {
            Ok(PANOS_RESOURCES.to_string())
        } else if cmd.contains("rule-hit-count") {
            Ok(PANOS_HIT_COUNTS.to_string())
        } else if cmd.contains("info") {
            Ok(PANOS_SYSTEM_INFO.to_string())
        } else {
            Err(ProbeError::Connection(format!("unscripted op '{cmd}'")))
        }
    }

    async fn get_config(&self, _xpath: &str) -> Result<String, ProbeError> {
        Ok(self.rulebase.to_string())
    }
}

#[tokio::test]
async fn api_probe_builds_a_full_report_from_fixtures() {
    let transport = ScriptedPanos {
        rulebase: PANOS_RULEBASE,
    };
    let report = panos::collect(&transport).await.expect("collect");

    assert!((report.resources.cpu_used_pct - 1.8).abs() < 1e-9);
    assert_eq!(report.resources.mem_total_mb, 1000.0);
    assert_eq!(report.resources.mem_free_mb, 400.0);
    assert_eq!(report.resources.mem_avail_mb, 300.0);
    assert_eq!(report.uptime_days, 44);

    assert_eq!(report.rule_hits.counts.len(), 3);
    assert_eq!(report.rule_hits.counts["allow-dns"], 120);
    assert_eq!(report.rule_hits.counts["allow-web"], 998877);
    assert_eq!(report.rule_hits.counts["deny-all"], 9);
}

#[tokio::test]
async fn api_probe_rejects_more_than_one_rule_base() {
    let transport = ScriptedPanos {
        rulebase: PANOS_TWO_RULEBASES,
    };
    let err = panos::collect(&transport).await.expect_err("must fail");
    assert!(matches!(err, ProbeError::Assumption(_)));
}
