//! Breakpoint request types and `bkpt` tuple decoding.

use std::fmt;

use smol_str::SmolStr;

use crate::error::{MiError, Result};
use crate::protocol::{quote_argument, Tuple, Value};

/// Coordinator-assigned request id, stable for the request's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u32);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchAccess {
    Write,
    Read,
    ReadWrite,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakpointLocation {
    Source { file: String, line: u32 },
    Function(String),
    Address(u64),
    /// Data watchpoint on an expression.
    Watch {
        expression: String,
        access: WatchAccess,
    },
}

impl BreakpointLocation {
    pub(super) fn is_watch(&self) -> bool {
        matches!(self, Self::Watch { .. })
    }

    /// Insert command for this location, options included.
    pub(super) fn insert_command(&self, options: &BreakpointOptions) -> String {
        match self {
            Self::Watch { expression, access } => {
                let flag = match access {
                    WatchAccess::Write => "",
                    WatchAccess::Read => " -r",
                    WatchAccess::ReadWrite => " -a",
                };
                format!("-break-watch{flag} {}", quote_argument(expression))
            }
            _ => {
                let mut command = String::from("-break-insert -f");
                if options.temporary {
                    command.push_str(" -t");
                }
                if let Some(condition) = &options.condition {
                    command.push_str(" -c ");
                    command.push_str(&quote_argument(condition));
                }
                if options.ignore_count > 0 {
                    command.push_str(&format!(" -i {}", options.ignore_count));
                }
                command.push(' ');
                command.push_str(&self.linespec());
                command
            }
        }
    }

    fn linespec(&self) -> String {
        match self {
            Self::Source { file, line } => quote_argument(&format!("{file}:{line}")),
            Self::Function(name) => quote_argument(name),
            Self::Address(address) => format!("*{address:#x}"),
            Self::Watch { expression, .. } => quote_argument(expression),
        }
    }
}

impl fmt::Display for BreakpointLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source { file, line } => write!(f, "{file}:{line}"),
            Self::Function(name) => f.write_str(name),
            Self::Address(address) => write!(f, "*{address:#x}"),
            Self::Watch { expression, .. } => write!(f, "watch {expression}"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BreakpointOptions {
    pub condition: Option<String>,
    /// Hits to skip before stopping.
    pub ignore_count: u32,
    pub temporary: bool,
}

/// One concrete debugger location of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundLocation {
    /// Debugger id: `3` for a single location, `3.1`, `3.2` for several.
    pub id: SmolStr,
    pub address: Option<u64>,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub function: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakpointState {
    /// Waiting for the debugger to resolve the location.
    Requested,
    Bound(Vec<BoundLocation>),
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakpointRequest {
    pub id: RequestId,
    pub location: BreakpointLocation,
    pub options: BreakpointOptions,
    /// Debugger breakpoint number, once the debugger accepted the request.
    pub number: Option<SmolStr>,
    pub state: BreakpointState,
    pub hit_count: u32,
}

impl BreakpointRequest {
    #[must_use]
    pub fn is_bound(&self) -> bool {
        matches!(self.state, BreakpointState::Bound(_))
    }

    #[must_use]
    pub fn locations(&self) -> &[BoundLocation] {
        match &self.state {
            BreakpointState::Bound(locations) => locations,
            _ => &[],
        }
    }

    /// Every debugger id this request answers to.
    pub(super) fn index_keys(&self) -> Vec<SmolStr> {
        let mut keys = self.number.iter().cloned().collect::<Vec<_>>();
        for location in self.locations() {
            if !keys.contains(&location.id) {
                keys.push(location.id.clone());
            }
        }
        keys
    }

    /// Distinct debugger numbers to delete; location ids map to their parent number.
    pub(super) fn delete_numbers(&self) -> Vec<SmolStr> {
        let mut numbers = self.number.iter().cloned().collect::<Vec<_>>();
        for location in self.locations() {
            let number = SmolStr::new(parent_number(&location.id));
            if !numbers.contains(&number) {
                numbers.push(number);
            }
        }
        numbers
    }
}

fn parent_number(id: &str) -> &str {
    id.split_once('.').map_or(id, |(number, _)| number)
}

/// What the debugger reported for one breakpoint number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct Resolution {
    pub number: SmolStr,
    pub locations: Vec<BoundLocation>,
    pub hit_count: Option<u32>,
}

impl Resolution {
    pub(super) fn is_pending(&self) -> bool {
        self.locations.is_empty()
    }
}

const PENDING: &str = "<PENDING>";
const MULTIPLE: &str = "<MULTIPLE>";

/// Decode a breakpoint value: a `bkpt` tuple, or the legacy list of the
/// parent tuple followed by one tuple per location.
pub(super) fn resolve(value: &Value) -> Result<Resolution> {
    let tuples = match value {
        Value::Tuple(tuple) => vec![tuple],
        Value::List(list) => list.values().filter_map(Value::as_tuple).collect(),
        Value::String(_) => Vec::new(),
    };
    let Some((parent, rest)) = tuples.split_first() else {
        return Err(MiError::ContractViolation(
            "breakpoint reply without a tuple".into(),
        ));
    };
    resolve_tuples(parent, rest)
}

pub(super) fn resolve_tuples(parent: &Tuple, rest: &[&Tuple]) -> Result<Resolution> {
    let number = parent
        .get_str("number")
        .ok_or_else(|| MiError::ContractViolation("breakpoint without number".into()))?;
    let hit_count = parent.get_str("times").and_then(|times| times.parse().ok());
    let addr = parent.get_str("addr");

    let mut locations = Vec::new();
    if let Some(list) = parent.get("locations").and_then(Value::as_list) {
        locations.extend(list.values().filter_map(Value::as_tuple).map(bound_location));
    }
    let prefix = format!("{number}.");
    locations.extend(
        rest.iter()
            .filter(|tuple| {
                tuple
                    .get_str("number")
                    .is_some_and(|id| id.starts_with(&prefix))
            })
            .map(|tuple| bound_location(tuple)),
    );

    let pending = addr == Some(PENDING) || parent.get("pending").is_some();
    if locations.is_empty() && !pending && addr != Some(MULTIPLE) {
        locations.push(bound_location(parent));
    }
    Ok(Resolution {
        number: SmolStr::new(number),
        locations,
        hit_count,
    })
}

fn bound_location(fields: &Tuple) -> BoundLocation {
    BoundLocation {
        id: SmolStr::new(fields.get_str("number").unwrap_or_default()),
        address: fields.get_str("addr").and_then(parse_address),
        file: fields
            .get_str("fullname")
            .or_else(|| fields.get_str("file"))
            .map(str::to_string),
        line: fields.get_str("line").and_then(|line| line.parse().ok()),
        function: fields.get_str("func").map(str::to_string),
    }
}

fn parse_address(text: &str) -> Option<u64> {
    let hex = text.strip_prefix("0x")?;
    u64::from_str_radix(hex, 16).ok()
}

/// Watchpoint replies name the tuple after the watch flavour.
pub(super) const WATCH_FIELDS: [&str; 3] = ["wpt", "hw-rwpt", "hw-awpt"];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_value;

    #[test]
    fn insert_command_carries_options() {
        let options = BreakpointOptions {
            condition: Some("i == 3".into()),
            ignore_count: 2,
            temporary: true,
        };
        let location = BreakpointLocation::Source {
            file: "src/main.c".into(),
            line: 42,
        };
        assert_eq!(
            location.insert_command(&options),
            r#"-break-insert -f -t -c "i == 3" -i 2 "src/main.c:42""#
        );
        assert_eq!(
            BreakpointLocation::Address(0x4005d0).insert_command(&BreakpointOptions::default()),
            "-break-insert -f *0x4005d0"
        );
    }

    #[test]
    fn watch_command_selects_access_flag() {
        let watch = BreakpointLocation::Watch {
            expression: "counter".into(),
            access: WatchAccess::ReadWrite,
        };
        assert_eq!(
            watch.insert_command(&BreakpointOptions::default()),
            r#"-break-watch -a "counter""#
        );
    }

    #[test]
    fn pending_breakpoint_has_no_locations() {
        let value = parse_value(
            r#"{number="2",type="breakpoint",addr="<PENDING>",pending="lib.c:10",times="0"}"#,
        )
        .unwrap();
        let resolution = resolve(&value).unwrap();
        assert_eq!(resolution.number.as_str(), "2");
        assert!(resolution.is_pending());
        assert_eq!(resolution.hit_count, Some(0));
    }

    #[test]
    fn nested_locations_bind_each_entry() {
        let value = parse_value(concat!(
            r#"{number="1",addr="<MULTIPLE>",times="0",locations=["#,
            r#"{number="1.1",addr="0x1000",func="f<int>",file="t.h",fullname="/src/t.h",line="7"},"#,
            r#"{number="1.2",addr="0x2000",func="f<long>",file="t.h",fullname="/src/t.h",line="7"}]}"#
        ))
        .unwrap();
        let resolution = resolve(&value).unwrap();
        let ids = resolution
            .locations
            .iter()
            .map(|location| location.id.as_str())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["1.1", "1.2"]);
        assert_eq!(resolution.locations[1].address, Some(0x2000));
        assert_eq!(resolution.locations[0].file.as_deref(), Some("/src/t.h"));
    }

    #[test]
    fn delete_numbers_collapse_location_ids() {
        let request = BreakpointRequest {
            id: RequestId(1),
            location: BreakpointLocation::Function("f".into()),
            options: BreakpointOptions::default(),
            number: Some("4".into()),
            state: BreakpointState::Bound(vec![
                BoundLocation {
                    id: "4.1".into(),
                    address: None,
                    file: None,
                    line: None,
                    function: None,
                },
                BoundLocation {
                    id: "4.2".into(),
                    address: None,
                    file: None,
                    line: None,
                    function: None,
                },
            ]),
            hit_count: 0,
        };
        assert_eq!(request.delete_numbers(), vec![SmolStr::new("4")]);
        assert_eq!(request.index_keys().len(), 3);
    }
}
