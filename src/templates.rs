//! Built-in command output templates for CLI devices.
//!
//! Template sources are embedded as string constants and compiled once on
//! first use; every accessor hands out the same compiled [`Template`].
//! The interface table template follows the ntc-templates
//! `cisco_ios_show_interfaces` lineage, extended with the input/output
//! queue-drop captures the upstream template does not render.

use once_cell::sync::OnceCell;

use crate::error::ProbeError;
use crate::textfsm::Template;

const SHOW_VERSION_TMPL: &str = r"Value Required HOSTNAME (\S+)

Start
  ^${HOSTNAME}\s+uptime\s+is\s+.+$$ -> Record
";

const SHOW_PROCESSES_CPU_TMPL: &str = r"Value CPU_USAGE_5_SEC (\d+)
Value CPU_INTERRUPTION_5_SEC (\d+)
Value CPU_USAGE_1_MIN (\d+)
Value CPU_USAGE_5_MIN (\d+)

Start
  ^\s*CPU\s+utilization\s+for\s+five\s+seconds:\s+${CPU_USAGE_5_SEC}%/${CPU_INTERRUPTION_5_SEC}%;\s+one\s+minute:\s+${CPU_USAGE_1_MIN}%;\s+five\s+minutes:\s+${CPU_USAGE_5_MIN}%\s*$$ -> Record
  ^\s*$$
  ^. -> Error
";

const SHOW_PROCESSES_MEMORY_TMPL: &str = r"Value MEMORY_TOTAL (\d+)
Value MEMORY_USED (\d+)
Value MEMORY_FREE (\d+)

Start
  ^Processor\s+Pool\s+Total:\s+${MEMORY_TOTAL}\s+Used:\s+${MEMORY_USED}\s+Free:\s+${MEMORY_FREE}
  ^\s*$$
  ^. -> Error
";

const SHOW_POLICY_MAP_INTERFACE_TMPL: &str = r"Value SERVICE_POLICY_INPUT (\S+)
Value CLASS_MAP (\S+)
Value CIR_BPS (\d+)

Start
  ^\s*Service-policy input: ${SERVICE_POLICY_INPUT}$$
  ^\s*Class-map:\s${CLASS_MAP}\s.*?$$
  ^\s*police:\s.*$$
  ^\s*cir\s${CIR_BPS}\sbps,.*$$ -> Record
";

const SHOW_INTERFACE_TMPL: &str = r"Value Required INTERFACE (\S+)
Value LINK_STATUS (.+?)
Value PROTOCOL_STATUS (.+?)
Value HARDWARE_TYPE ([\w \-]+)
Value MAC_ADDRESS ([a-fA-F0-9]{4}\.[a-fA-F0-9]{4}\.[a-fA-F0-9]{4})
Value BIA ([a-fA-F0-9]{4}\.[a-fA-F0-9]{4}\.[a-fA-F0-9]{4})
Value DESCRIPTION (.+?)
Value IP_ADDRESS (\d+\.\d+\.\d+\.\d+)
Value PREFIX_LENGTH (\d+)
Value MTU (\d+)
Value DUPLEX (([Ff]ull|[Aa]uto|[Hh]alf|[Aa]-).*?)
Value SPEED (.*?)
Value MEDIA_TYPE (\S+.*)
Value BANDWIDTH (\d+\s+\w+)
Value DELAY (\d+\s+\S+)
Value ENCAPSULATION (.+?)
Value LAST_INPUT (.+?)
Value LAST_OUTPUT (.+?)
Value LAST_OUTPUT_HANG (.+?)
Value QUEUE_STRATEGY (.+)
Value INPUT_RATE (\d+)
Value OUTPUT_RATE (\d+)
Value INPUT_PPS (\d+)
Value OUTPUT_PPS (\d+)
Value INPUT_PACKETS (\d+)
Value OUTPUT_PACKETS (\d+)
Value RUNTS (\d+)
Value GIANTS (\d+)
Value INPUT_ERRORS (\d+)
Value CRC (\d+)
Value FRAME (\d+)
Value OVERRUN (\d+)
Value ABORT (\d+)
Value OUTPUT_ERRORS (\d+)
Value VLAN_ID (\d+)
Value VLAN_ID_INNER (\d+)
Value VLAN_ID_OUTER (\d+)
Value QUEUE_SIZE (\d+)
Value QUEUE_MAX (\d+)
Value QUEUE_DROPS (\d+)
Value QUEUE_FLUSHES (\d+)
Value QUEUE_OUTPUT_DROPS (\d+)

Start
  ^\S+\s+is\s+.+?,\s+line\s+protocol.*$$ -> Continue.Record
  ^${INTERFACE}\s+is\s+${LINK_STATUS},\s+line\s+protocol\s+is\s+${PROTOCOL_STATUS}\s*$$
  ^\s+Hardware\s+is\s+${HARDWARE_TYPE} -> Continue
  ^.+address\s+is\s+${MAC_ADDRESS}\s+\(bia\s+${BIA}\)\s*$$
  ^\s+Description:\s+${DESCRIPTION}\s*$$
  ^\s+Internet\s+address\s+is\s+${IP_ADDRESS}\/${PREFIX_LENGTH}\s*$$
  ^\s+MTU\s+${MTU}.*BW\s+${BANDWIDTH}.*DLY\s+${DELAY},\s*$$
  ^\s+Encapsulation\s+${ENCAPSULATION}, Vlan ID\s+${VLAN_ID}.+$$
  ^\s+Encapsulation\s+${ENCAPSULATION}, outer ID\s+${VLAN_ID_OUTER}, inner ID\s+${VLAN_ID_INNER}.+$$
  ^\s+Encapsulation\s+${ENCAPSULATION},.+$$
  ^\s+Last\s+input\s+${LAST_INPUT},\s+output\s+${LAST_OUTPUT},\s+output\s+hang\s+${LAST_OUTPUT_HANG}\s*$$
  ^\s+Input\s+queue:\s+${QUEUE_SIZE}\/${QUEUE_MAX}\/${QUEUE_DROPS}\/${QUEUE_FLUSHES}\s+\(size\/max\/drops\/flushes\);\s+Total output\s+drops:\s+${QUEUE_OUTPUT_DROPS}\s*$$
  ^\s+Queueing\s+strategy:\s+${QUEUE_STRATEGY}\s*$$
  ^\s+${DUPLEX},\s+${SPEED},.+media\stype\sis\s${MEDIA_TYPE}$$
  ^\s+${DUPLEX},\s+${SPEED},.+TX/FX$$
  ^\s+${DUPLEX},\s+${SPEED}$$
  ^.*input\s+rate\s+${INPUT_RATE}\s+\w+/sec,\s+${INPUT_PPS}\s+packets.+$$
  ^.*output\s+rate\s+${OUTPUT_RATE}\s+\w+/sec,\s+${OUTPUT_PPS}\s+packets.+$$
  ^\s+${INPUT_PACKETS}\s+packets\s+input,\s+\d+\s+bytes,\s+\d+\s+no\s+buffer\s*$$
  ^\s+${RUNTS}\s+runts,\s+${GIANTS}\s+giants,\s+\d+\s+throttles\s*$$
  ^\s+${INPUT_ERRORS}\s+input\s+errors,\s+${CRC}\s+CRC,\s+${FRAME}\s+frame,\s+${OVERRUN}\s+overrun,\s+\d+\s+ignored\s*$$
  ^\s+${INPUT_ERRORS}\s+input\s+errors,\s+${CRC}\s+CRC,\s+${FRAME}\s+frame,\s+${OVERRUN}\s+overrun,\s+\d+\s+ignored,\s+${ABORT}\s+abort\s*$$
  ^\s+${OUTPUT_PACKETS}\s+packets\s+output,\s+\d+\s+bytes,\s+\d+\s+underruns\s*$$
  ^\s+${OUTPUT_ERRORS}\s+output\s+errors,\s+\d+\s+collisions,\s+\d+\s+interface\s+resets\s*$$
  # Capture time-stamp if vty line has command time-stamping turned on
  ^Load\s+for\s+
  ^Time\s+source\s+is
";

fn compiled(cell: &'static OnceCell<Template>, source: &str) -> Result<&'static Template, ProbeError> {
    cell.get_or_try_init(|| Template::compile(source))
}

/// Template for the hostname line of `show version`.
pub fn show_version() -> Result<&'static Template, ProbeError> {
    static CELL: OnceCell<Template> = OnceCell::new();
    compiled(&CELL, SHOW_VERSION_TMPL)
}

/// Template for the one-line CPU utilization summary of `show processes cpu`.
///
/// Expects `CPU utilization for five seconds: 0%/0%; one minute: 1%; five minutes: 1%`.
pub fn show_processes_cpu() -> Result<&'static Template, ProbeError> {
    static CELL: OnceCell<Template> = OnceCell::new();
    compiled(&CELL, SHOW_PROCESSES_CPU_TMPL)
}

/// Template for the processor-pool summary line of `show processes memory`.
pub fn show_processes_memory() -> Result<&'static Template, ProbeError> {
    static CELL: OnceCell<Template> = OnceCell::new();
    compiled(&CELL, SHOW_PROCESSES_MEMORY_TMPL)
}

/// Template for the full `show interface` table, one record per interface.
pub fn show_interface() -> Result<&'static Template, ProbeError> {
    static CELL: OnceCell<Template> = OnceCell::new();
    compiled(&CELL, SHOW_INTERFACE_TMPL)
}

/// Template for `show policy-map interface <name>` QoS output.
pub fn show_policy_map_interface() -> Result<&'static Template, ProbeError> {
    static CELL: OnceCell<Template> = OnceCell::new();
    compiled(&CELL, SHOW_POLICY_MAP_INTERFACE_TMPL)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_builtin_templates_compile() {
        show_version().expect("show version");
        show_processes_cpu().expect("show processes cpu");
        show_processes_memory().expect("show processes memory");
        show_interface().expect("show interface");
        show_policy_map_interface().expect("show policy-map interface");
    }

    #[test]
    fn accessor_returns_the_same_compiled_template() {
        let a = show_interface().expect("first") as *const Template;
        let b = show_interface().expect("second") as *const Template;
        assert_eq!(a, b);
    }

    #[test]
    fn cpu_template_extracts_one_and_five_minute_usage() {
        let line = "CPU utilization for five seconds: 0%/0%; one minute: 1%; five minutes: 2%";
        let records = show_processes_cpu()
            .expect("template")
            .parse(line)
            .expect("parse");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["CPU_USAGE_1_MIN"], "1");
        assert_eq!(records[0]["CPU_USAGE_5_MIN"], "2");
        assert_eq!(records[0]["CPU_USAGE_5_SEC"], "0");
    }

    #[test]
    fn cpu_template_errors_on_unexpected_line() {
        let err = show_processes_cpu()
            .expect("template")
            .parse("not a cpu line")
            .expect_err("must abort");
        assert!(matches!(err, ProbeError::Grammar { line_no: 1, .. }));
    }

    #[test]
    fn memory_template_extracts_pool_summary() {
        let line = "Processor Pool Total:  998245600 Used:  146094348 Free:  852151252";
        let records = show_processes_memory()
            .expect("template")
            .parse(line)
            .expect("parse");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["MEMORY_TOTAL"], "998245600");
        assert_eq!(records[0]["MEMORY_USED"], "146094348");
        assert_eq!(records[0]["MEMORY_FREE"], "852151252");
    }

    #[test]
    fn version_template_extracts_hostname() {
        let out = "Cisco IOS XE Software, Version 17.06.05\nrouter-uat-1 uptime is 2 weeks, 3 days\n";
        let records = show_version().expect("template").parse(out).expect("parse");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["HOSTNAME"], "router-uat-1");
    }

    #[test]
    fn policy_map_template_associates_class_map_and_cir() {
        let out = "\
  Service-policy input: limit64mb

    Class-map: limit64mb (match-all)
      0 packets, 0 bytes
      police:
          cir 64000000 bps, bc 2000000 bytes
";
        let records = show_policy_map_interface()
            .expect("template")
            .parse(out)
            .expect("parse");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["SERVICE_POLICY_INPUT"], "limit64mb");
        assert_eq!(records[0]["CLASS_MAP"], "limit64mb");
        assert_eq!(records[0]["CIR_BPS"], "64000000");
    }

    #[test]
    fn interface_template_yields_one_record_per_interface() {
        let out = "\
GigabitEthernet1 is up, line protocol is up
  Hardware is vNIC, address is 0050.56aa.bbcc (bia 0050.56aa.bbcc)
  Description: /env:uat/side:a/type:service/name:transit/
  Internet address is 10.0.0.5/30
  MTU 1500 bytes, BW 1000000 Kbit/sec, DLY 10 usec,
  Input queue: 0/375/11/0 (size/max/drops/flushes); Total output drops: 7
  5 minute input rate 2000 bits/sec, 3 packets/sec
  5 minute output rate 1000 bits/sec, 2 packets/sec
     9000 packets input, 1000000 bytes, 0 no buffer
     3 input errors, 0 CRC, 0 frame, 0 overrun, 0 ignored
     8000 packets output, 900000 bytes, 0 underruns
     4 output errors, 0 collisions, 1 interface resets
Tunnel10 is up, line protocol is down
  Hardware is Tunnel
  Description: /env:uat/side:b/type:member/name:transit/
  Internet address is 10.1.0.1/30
  Input queue: 0/375/0/0 (size/max/drops/flushes); Total output drops: 0
  5 minute input rate 0 bits/sec, 0 packets/sec
  5 minute output rate 0 bits/sec, 0 packets/sec
     0 packets input, 0 bytes, 0 no buffer
     0 input errors, 0 CRC, 0 frame, 0 overrun, 0 ignored
     0 packets output, 0 bytes, 0 underruns
     0 output errors, 0 collisions, 0 interface resets
";
        let records = show_interface().expect("template").parse(out).expect("parse");
        assert_eq!(records.len(), 2);

        let gi = &records[0];
        assert_eq!(gi["INTERFACE"], "GigabitEthernet1");
        assert_eq!(gi["LINK_STATUS"], "up");
        assert_eq!(gi["PROTOCOL_STATUS"], "up");
        assert_eq!(gi["IP_ADDRESS"], "10.0.0.5");
        assert_eq!(gi["QUEUE_DROPS"], "11");
        assert_eq!(gi["QUEUE_OUTPUT_DROPS"], "7");
        assert_eq!(gi["INPUT_PACKETS"], "9000");
        assert_eq!(gi["OUTPUT_PACKETS"], "8000");
        assert_eq!(gi["INPUT_ERRORS"], "3");
        assert_eq!(gi["OUTPUT_ERRORS"], "4");
        assert_eq!(gi["INPUT_RATE"], "2000");
        assert_eq!(gi["OUTPUT_RATE"], "1000");

        let tun = &records[1];
        assert_eq!(tun["INTERFACE"], "Tunnel10");
        assert_eq!(tun["PROTOCOL_STATUS"], "down");
        assert_eq!(tun["DESCRIPTION"], "/env:uat/side:b/type:member/name:transit/");
    }
}
