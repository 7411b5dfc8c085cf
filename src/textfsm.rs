//! TextFSM-style template grammar engine.
//!
//! A template declares named values and a set of states, each holding an
//! ordered list of line-match rules. [`Template::compile`] parses the
//! declarative source once into prebuilt regexes; [`Template::parse`] then
//! runs a single forward pass over raw command output and produces one
//! [`ParsedRecord`] per `Record` action. Parsing is a pure function of
//! (compiled template, input text).
//!
//! Supported value options are `Required` (the record is dropped at emit
//! time if the value is unset) and `Filldown` (the value persists across
//! emitted records until re-captured). Supported rule actions are `Next`
//! (default), `Continue`, `Record`, `Continue.Record`, a state transition,
//! `Record <State>`, and `Error`.

use std::collections::HashMap;

use log::trace;
use regex::Regex;

use crate::error::ProbeError;

/// One structured result emitted by a template's `Record` action.
///
/// Maps value name to captured text; values never captured since the last
/// record reset are absent.
pub type ParsedRecord = HashMap<String, String>;

#[derive(Debug, Clone)]
struct ValueDef {
    name: String,
    required: bool,
    filldown: bool,
    pattern: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineOp {
    /// Advance to the next input line after this rule.
    Next,
    /// Keep evaluating the remaining rules of the state on the same line.
    Continue,
}

#[derive(Debug)]
struct Rule {
    regex: Regex,
    /// Indices into `Template::values` captured by this rule.
    captures: Vec<usize>,
    line_op: LineOp,
    record: bool,
    error: bool,
    next_state: Option<usize>,
}

#[derive(Debug)]
struct State {
    name: String,
    rules: Vec<Rule>,
}

/// A compiled line-matching template.
///
/// Immutable once compiled; safe to share and reuse across parses.
#[derive(Debug)]
pub struct Template {
    values: Vec<ValueDef>,
    states: Vec<State>,
    start: usize,
}

impl Template {
    /// Compiles declarative template source into an executable template.
    pub fn compile(source: &str) -> Result<Template, ProbeError> {
        let mut values: Vec<ValueDef> = Vec::new();
        // (state name, rule lines with 1-based source line numbers)
        let mut raw_states: Vec<(String, Vec<(usize, String)>)> = Vec::new();

        for (idx, raw) in source.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.trim_end();
            if line.trim().is_empty() || line.trim_start().starts_with('#') {
                continue;
            }

            if let Some(rest) = line.strip_prefix("Value ") {
                if !raw_states.is_empty() {
                    return Err(ProbeError::Template(format!(
                        "line {line_no}: Value definition after first state"
                    )));
                }
                values.push(parse_value(rest, line_no)?);
            } else if !line.starts_with(char::is_whitespace) {
                let name = line.trim().to_string();
                if raw_states.iter().any(|(n, _)| *n == name) {
                    return Err(ProbeError::Template(format!(
                        "line {line_no}: duplicate state '{name}'"
                    )));
                }
                raw_states.push((name, Vec::new()));
            } else {
                let Some((_, rules)) = raw_states.last_mut() else {
                    return Err(ProbeError::Template(format!(
                        "line {line_no}: rule outside of any state"
                    )));
                };
                rules.push((line_no, line.trim().to_string()));
            }
        }

        if values.is_empty() {
            return Err(ProbeError::Template("template declares no values".into()));
        }

        let state_index: HashMap<String, usize> = raw_states
            .iter()
            .enumerate()
            .map(|(i, (name, _))| (name.clone(), i))
            .collect();
        let Some(&start) = state_index.get("Start") else {
            return Err(ProbeError::Template("missing 'Start' state".into()));
        };

        let mut states = Vec::with_capacity(raw_states.len());
        for (name, raw_rules) in &raw_states {
            let mut rules = Vec::with_capacity(raw_rules.len());
            for (line_no, raw_rule) in raw_rules {
                rules.push(compile_rule(raw_rule, *line_no, &values, &state_index)?);
            }
            states.push(State {
                name: name.clone(),
                rules,
            });
        }

        Ok(Template {
            values,
            states,
            start,
        })
    }

    /// Runs the template over raw text, producing one record per `Record`
    /// action (plus the implicit record at end of input).
    ///
    /// Fails with [`ProbeError::Grammar`] if a line drives an `Error` rule.
    /// Records missing a `Required` value at emit time are dropped, not
    /// emitted partially.
    pub fn parse(&self, text: &str) -> Result<Vec<ParsedRecord>, ProbeError> {
        let mut slots: Vec<Option<String>> = vec![None; self.values.len()];
        let mut records = Vec::new();
        let mut state = self.start;

        'lines: for (idx, line) in text.lines().enumerate() {
            let mut rule_idx = 0;
            while let Some(rule) = self.states[state].rules.get(rule_idx) {
                let Some(caps) = rule.regex.captures(line) else {
                    rule_idx += 1;
                    continue;
                };
                if rule.error {
                    trace!("error rule fired in state '{}'", self.states[state].name);
                    return Err(ProbeError::at_line(idx + 1, line));
                }
                for &vi in &rule.captures {
                    if let Some(m) = caps.name(&self.values[vi].name) {
                        slots[vi] = Some(m.as_str().to_string());
                    }
                }
                if rule.record {
                    self.emit(&mut slots, &mut records);
                }
                if let Some(next) = rule.next_state {
                    state = next;
                }
                match rule.line_op {
                    LineOp::Next => continue 'lines,
                    LineOp::Continue => rule_idx += 1,
                }
            }
        }

        // TextFSM emits the accumulator once more at end of input.
        self.emit(&mut slots, &mut records);
        Ok(records)
    }

    /// Packages the current slot values into a record, dropping it when a
    /// required value is unset, then resets the non-Filldown slots.
    fn emit(&self, slots: &mut [Option<String>], records: &mut Vec<ParsedRecord>) {
        if slots.iter().all(Option::is_none) {
            return;
        }
        let complete = self
            .values
            .iter()
            .zip(slots.iter())
            .all(|(value, slot)| !value.required || slot.is_some());
        if complete {
            let record: ParsedRecord = self
                .values
                .iter()
                .zip(slots.iter())
                .filter_map(|(value, slot)| {
                    slot.as_ref().map(|text| (value.name.clone(), text.clone()))
                })
                .collect();
            records.push(record);
        } else {
            trace!("dropping record missing required value");
        }
        for (value, slot) in self.values.iter().zip(slots.iter_mut()) {
            if !value.filldown {
                *slot = None;
            }
        }
    }
}

/// Parses `[Required] [Filldown] NAME (pattern)` after the `Value` keyword.
fn parse_value(rest: &str, line_no: usize) -> Result<ValueDef, ProbeError> {
    let open = rest.find('(').ok_or_else(|| {
        ProbeError::Template(format!("line {line_no}: value without (pattern)"))
    })?;
    let close = rest.rfind(')').ok_or_else(|| {
        ProbeError::Template(format!("line {line_no}: unterminated value pattern"))
    })?;
    if close < open {
        return Err(ProbeError::Template(format!(
            "line {line_no}: malformed value pattern"
        )));
    }
    let pattern = rest[open + 1..close].to_string();

    let mut required = false;
    let mut filldown = false;
    let mut name = None;
    for token in rest[..open].split_whitespace() {
        match token {
            "Required" => required = true,
            "Filldown" => filldown = true,
            other => {
                if name.is_some() {
                    return Err(ProbeError::Template(format!(
                        "line {line_no}: unknown value option '{other}'"
                    )));
                }
                name = Some(other.to_string());
            }
        }
    }
    let name = name.ok_or_else(|| {
        ProbeError::Template(format!("line {line_no}: value without a name"))
    })?;
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ProbeError::Template(format!(
            "line {line_no}: invalid value name '{name}'"
        )));
    }

    Ok(ValueDef {
        name,
        required,
        filldown,
        pattern,
    })
}

/// Compiles one `^pattern [-> action]` rule line.
fn compile_rule(
    raw: &str,
    line_no: usize,
    values: &[ValueDef],
    state_index: &HashMap<String, usize>,
) -> Result<Rule, ProbeError> {
    let (pattern, action) = match raw.rsplit_once(" -> ") {
        Some((pattern, action)) => (pattern.trim_end(), action.trim()),
        None => (raw, ""),
    };
    if !pattern.starts_with('^') {
        return Err(ProbeError::Template(format!(
            "line {line_no}: rule pattern must start with '^'"
        )));
    }

    let (regex, captures) = expand_pattern(pattern, line_no, values)?;

    let mut line_op = LineOp::Next;
    let mut record = false;
    let mut error = false;
    let mut next_state = None;

    if !action.is_empty() {
        let mut tokens = action.split_whitespace();
        let head = tokens.next().unwrap_or_default();
        let tail = tokens.next();
        if tokens.next().is_some() {
            return Err(ProbeError::Template(format!(
                "line {line_no}: malformed action '{action}'"
            )));
        }

        let transition = |target: &str| -> Result<usize, ProbeError> {
            state_index.get(target).copied().ok_or_else(|| {
                ProbeError::Template(format!(
                    "line {line_no}: transition to undeclared state '{target}'"
                ))
            })
        };

        match head {
            "Error" => error = true,
            "Next" => {}
            "Continue" => line_op = LineOp::Continue,
            "Record" => record = true,
            "Next.Record" => record = true,
            "Continue.Record" => {
                line_op = LineOp::Continue;
                record = true;
            }
            other => next_state = Some(transition(other)?),
        }
        if let Some(target) = tail {
            if error || line_op == LineOp::Continue || next_state.is_some() {
                return Err(ProbeError::Template(format!(
                    "line {line_no}: '{head}' cannot be combined with a state"
                )));
            }
            next_state = Some(transition(target)?);
        }
    }

    Ok(Rule {
        regex,
        captures,
        line_op,
        record,
        error,
        next_state,
    })
}

/// Expands `${NAME}` references into named capture groups and `$$` into the
/// end-of-line anchor, then compiles the result.
fn expand_pattern(
    pattern: &str,
    line_no: usize,
    values: &[ValueDef],
) -> Result<(Regex, Vec<usize>), ProbeError> {
    static REFERENCE: once_cell::sync::Lazy<Regex> =
        once_cell::sync::Lazy::new(|| Regex::new(r"\$\{(\w+)\}").expect("reference regex"));

    let mut captures = Vec::new();
    for caps in REFERENCE.captures_iter(pattern) {
        let name = &caps[1];
        let idx = values.iter().position(|v| v.name == name).ok_or_else(|| {
            ProbeError::Template(format!(
                "line {line_no}: reference to undeclared value '{name}'"
            ))
        })?;
        if !captures.contains(&idx) {
            captures.push(idx);
        }
    }

    let expanded = REFERENCE.replace_all(pattern, |caps: &regex::Captures<'_>| {
        let name = &caps[1];
        let value = values
            .iter()
            .find(|v| v.name == name)
            .expect("reference validated above");
        format!("(?P<{}>{})", value.name, value.pattern)
    });
    let expanded = expanded.replace("$$", "$");

    let regex = Regex::new(&expanded).map_err(|e| {
        ProbeError::Template(format!("line {line_no}: invalid pattern: {e}"))
    })?;
    Ok((regex, captures))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE_TMPL: &str = "\
Value Required NAME (\\S+)
Value COUNT (\\d+)

Start
  ^\\s*Name\\s+Count\\s*$$ -> Rows

Rows
  ^\\s*${NAME}\\s+${COUNT}\\s*$$ -> Record
";

    const TABLE_INPUT: &str = "\
 Name  Count
 alpha 3
 junk line without a count column
 beta  7
";

    #[test]
    fn parses_table_with_state_transition() {
        let template = Template::compile(TABLE_TMPL).expect("compile");
        let records = template.parse(TABLE_INPUT).expect("parse");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["NAME"], "alpha");
        assert_eq!(records[0]["COUNT"], "3");
        assert_eq!(records[1]["NAME"], "beta");
        assert_eq!(records[1]["COUNT"], "7");
    }

    #[test]
    fn parse_is_deterministic() {
        let template = Template::compile(TABLE_TMPL).expect("compile");
        let first = template.parse(TABLE_INPUT).expect("first parse");
        let second = template.parse(TABLE_INPUT).expect("second parse");
        assert_eq!(first, second);
    }

    #[test]
    fn unmatched_lines_are_skipped_silently() {
        let template = Template::compile(TABLE_TMPL).expect("compile");
        let records = template
            .parse("complete noise\n Name  Count\n gamma 1\n")
            .expect("parse");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["NAME"], "gamma");
    }

    #[test]
    fn first_matching_rule_wins() {
        let tmpl = "\
Value KIND (\\w+)

Start
  ^status: ${KIND} -> Record
  ^status: (?:\\w+) fallback-never-captures -> Record
";
        let template = Template::compile(tmpl).expect("compile");
        let records = template.parse("status: up fallback-never-captures\n").expect("parse");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["KIND"], "up");
    }

    #[test]
    fn record_missing_required_value_is_dropped() {
        let tmpl = "\
Value Required NAME (\\S+)
Value SPEED (\\d+)

Start
  ^name ${NAME}
  ^speed ${SPEED}
  ^--- -> Record
";
        let template = Template::compile(tmpl).expect("compile");
        // First block has no name line, so its record must be dropped.
        let input = "speed 100\n---\nname eth0\nspeed 200\n---\n";
        let records = template.parse(input).expect("parse");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["NAME"], "eth0");
        assert_eq!(records[0]["SPEED"], "200");
    }

    #[test]
    fn filldown_value_persists_across_records() {
        let tmpl = "\
Value Filldown HOST (\\S+)
Value Required PORT (\\d+)

Start
  ^host ${HOST}
  ^port ${PORT} -> Record
";
        let template = Template::compile(tmpl).expect("compile");
        let records = template
            .parse("host router1\nport 22\nport 23\n")
            .expect("parse");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["HOST"], "router1");
        assert_eq!(records[1]["HOST"], "router1");
        assert_eq!(records[1]["PORT"], "23");
    }

    #[test]
    fn continue_record_emits_previous_record_on_header_line() {
        // Mirrors the interface-table idiom: the block header both flushes
        // the previous block and re-captures on the same line.
        let tmpl = "\
Value Required IFACE (\\S+)
Value MTU (\\d+)

Start
  ^\\S+ is -> Continue.Record
  ^${IFACE} is
  ^\\s+MTU ${MTU}
";
        let template = Template::compile(tmpl).expect("compile");
        let input = "eth0 is up\n  MTU 1500\neth1 is down\n  MTU 9000\n";
        let records = template.parse(input).expect("parse");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["IFACE"], "eth0");
        assert_eq!(records[0]["MTU"], "1500");
        assert_eq!(records[1]["IFACE"], "eth1");
        assert_eq!(records[1]["MTU"], "9000");
    }

    #[test]
    fn error_rule_aborts_with_line_diagnostics() {
        let tmpl = "\
Value CPU (\\d+)

Start
  ^cpu ${CPU} -> Record
  ^\\s*$$
  ^. -> Error
";
        let template = Template::compile(tmpl).expect("compile");
        let err = template.parse("garbage input\n").expect_err("must abort");
        match err {
            ProbeError::Grammar { line_no, line } => {
                assert_eq!(line_no, 1);
                assert_eq!(line, "garbage input");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn end_of_input_emits_pending_record() {
        let tmpl = "\
Value TOTAL (\\d+)

Start
  ^Total: ${TOTAL}
";
        let template = Template::compile(tmpl).expect("compile");
        let records = template.parse("Total: 4096\n").expect("parse");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["TOTAL"], "4096");
    }

    #[test]
    fn end_of_input_emits_nothing_when_accumulator_empty() {
        let template = Template::compile(TABLE_TMPL).expect("compile");
        let records = template.parse("no rows at all\n").expect("parse");
        assert!(records.is_empty());
    }

    #[test]
    fn compile_rejects_undeclared_value_reference() {
        let tmpl = "\
Value A (\\d+)

Start
  ^${MISSING} -> Record
";
        let err = Template::compile(tmpl).expect_err("must fail");
        assert!(matches!(err, ProbeError::Template(_)));
    }

    #[test]
    fn compile_rejects_transition_to_unknown_state() {
        let tmpl = "\
Value A (\\d+)

Start
  ^x -> Nowhere
";
        let err = Template::compile(tmpl).expect_err("must fail");
        assert!(matches!(err, ProbeError::Template(_)));
    }

    #[test]
    fn compile_rejects_missing_start_state() {
        let tmpl = "\
Value A (\\d+)

Rows
  ^row ${A} -> Record
";
        let err = Template::compile(tmpl).expect_err("must fail");
        assert!(matches!(err, ProbeError::Template(_)));
    }

    #[test]
    fn compile_rejects_continue_combined_with_a_state() {
        let tmpl = "\
Value A (\\d+)

Start
  ^row ${A} -> Continue Rows

Rows
  ^row (?:\\d+)
";
        let err = Template::compile(tmpl).expect_err("must fail");
        assert!(matches!(err, ProbeError::Template(_)));
    }

    #[test]
    fn record_with_state_transition_switches_rule_set() {
        let tmpl = "\
Value Required NAME (\\S+)

Start
  ^entry ${NAME} -> Record Done

Done
  ^entry (?:\\S+)
";
        let template = Template::compile(tmpl).expect("compile");
        let records = template
            .parse("entry one\nentry two\n")
            .expect("parse");
        // Second line lands in Done, which captures nothing.
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["NAME"], "one");
    }
}
