//! MI record and value types.

use std::fmt;

use indexmap::IndexMap;
use smol_str::SmolStr;

use crate::error::{MiError, Result};

/// A parsed MI value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    String(String),
    Tuple(Tuple),
    List(List),
}

impl Value {
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(text) => Some(text),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_tuple(&self) -> Option<&Tuple> {
        match self {
            Self::Tuple(tuple) => Some(tuple),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_list(&self) -> Option<&List> {
        match self {
            Self::List(list) => Some(list),
            _ => None,
        }
    }

    /// Field lookup on a tuple value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.as_tuple().and_then(|tuple| tuple.get(name))
    }

    #[must_use]
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }
}

/// Ordered `name=value` pairs.
///
/// A key that appears more than once collapses into a list holding every value
/// for that key in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tuple {
    fields: IndexMap<SmolStr, Value>,
    repeated: Vec<SmolStr>,
}

impl Tuple {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<SmolStr>, value: Value) {
        let name = name.into();
        let Some(existing) = self.fields.get_mut(&name) else {
            self.fields.insert(name, value);
            return;
        };
        if self.repeated.contains(&name) {
            if let Value::List(list) = existing {
                list.push(None, value);
                return;
            }
        }
        let first = std::mem::replace(existing, Value::List(List::new()));
        let mut list = List::new();
        list.push(None, first);
        list.push(None, value);
        *existing = Value::List(list);
        self.repeated.push(name);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    #[must_use]
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    /// Every value stored under `name`, flattening repeated keys.
    pub fn get_all<'a>(&'a self, name: &str) -> Box<dyn Iterator<Item = &'a Value> + 'a> {
        match self.fields.get(name) {
            Some(Value::List(list)) if self.repeated.iter().any(|key| key == name) => {
                Box::new(list.values())
            }
            Some(value) => Box::new(std::iter::once(value)),
            None => Box::new(std::iter::empty()),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// One list element; `name` is absent for bare values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListItem {
    pub name: Option<SmolStr>,
    pub value: Value,
}

/// Ordered sequence of values or `name=value` pairs (mixed forms allowed).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct List {
    items: Vec<ListItem>,
}

impl List {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: Option<SmolStr>, value: Value) {
        self.items.push(ListItem { name, value });
    }

    #[must_use]
    pub fn items(&self) -> &[ListItem] {
        &self.items
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.items.iter().map(|item| &item.value)
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.items.get(index).map(|item| &item.value)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Status class of a result record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultClass {
    Done,
    Running,
    Connected,
    Error,
    Exit,
}

impl ResultClass {
    pub(crate) fn parse(text: &str) -> Option<Self> {
        match text {
            "done" => Some(Self::Done),
            "running" => Some(Self::Running),
            "connected" => Some(Self::Connected),
            "error" => Some(Self::Error),
            "exit" => Some(Self::Exit),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Done => "done",
            Self::Running => "running",
            Self::Connected => "connected",
            Self::Error => "error",
            Self::Exit => "exit",
        }
    }
}

/// Reply to a command (`^class,...`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultRecord {
    pub token: Option<u32>,
    pub class: ResultClass,
    pub results: Tuple,
}

impl ResultRecord {
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.results.get(name)
    }

    #[must_use]
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.results.get_str(name)
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.class == ResultClass::Error
    }

    /// The `msg` field of an error record.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        if self.is_error() {
            Some(self.get_str("msg").unwrap_or("unknown error"))
        } else {
            None
        }
    }

    /// Turn an `^error` record into [`MiError::Command`].
    pub fn into_result(self) -> Result<Self> {
        if self.is_error() {
            return Err(MiError::Command {
                message: self.get_str("msg").unwrap_or("unknown error").to_string(),
                code: self.get_str("code").map(SmolStr::new),
            });
        }
        Ok(self)
    }
}

/// Async record flavour by class marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncKind {
    /// `*` execution state changes.
    Exec,
    /// `+` progress of slow operations.
    Status,
    /// `=` supplementary notifications.
    Notify,
}

/// Stream record flavour by class marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// `~` console output.
    Console,
    /// `@` debuggee output.
    Target,
    /// `&` debugger log output.
    Log,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsyncRecord {
    pub token: Option<u32>,
    pub kind: AsyncKind,
    pub class: SmolStr,
    pub results: Tuple,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRecord {
    pub kind: StreamKind,
    pub text: String,
}

/// Notification not tied to a command reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutOfBandRecord {
    Async(AsyncRecord),
    Stream(StreamRecord),
}

impl OutOfBandRecord {
    #[must_use]
    pub fn class(&self) -> &str {
        match self {
            Self::Async(record) => &record.class,
            Self::Stream(record) => match record.kind {
                StreamKind::Console => "console",
                StreamKind::Target => "target",
                StreamKind::Log => "log",
            },
        }
    }

    /// Payload of a `=<class>` notification.
    #[must_use]
    pub fn notification(&self, class: &str) -> Option<&Tuple> {
        match self {
            Self::Async(record) if record.kind == AsyncKind::Notify && record.class.as_str() == class => {
                Some(&record.results)
            }
            _ => None,
        }
    }

    /// Payload of a `*<class>` execution record.
    #[must_use]
    pub fn exec(&self, class: &str) -> Option<&Tuple> {
        match self {
            Self::Async(record) if record.kind == AsyncKind::Exec && record.class.as_str() == class => {
                Some(&record.results)
            }
            _ => None,
        }
    }
}

/// Any single line of MI output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Result(ResultRecord),
    OutOfBand(OutOfBandRecord),
}

/// Quote a command argument as an MI C-string.
#[must_use]
pub fn quote_argument(text: &str) -> String {
    let mut quoted = String::with_capacity(text.len() + 2);
    quoted.push('"');
    for ch in text.chars() {
        match ch {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            '\t' => quoted.push_str("\\t"),
            _ => quoted.push(ch),
        }
    }
    quoted.push('"');
    quoted
}

fn write_c_string(f: &mut fmt::Formatter<'_>, text: &str) -> fmt::Result {
    f.write_str("\"")?;
    for ch in text.chars() {
        match ch {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\r' => f.write_str("\\r")?,
            '\t' => f.write_str("\\t")?,
            ch if ch.is_ascii_control() => write!(f, "\\{:03o}", ch as u32)?,
            ch => write!(f, "{ch}")?,
        }
    }
    f.write_str("\"")
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(text) => write_c_string(f, text),
            Self::Tuple(tuple) => write!(f, "{tuple}"),
            Self::List(list) => write!(f, "{list}"),
        }
    }
}

impl Tuple {
    /// Comma-separated `name=value` pairs. A repeated key is written once per
    /// value so the text parses back into the same tuple.
    fn write_fields(&self, f: &mut fmt::Formatter<'_>, leading_comma: bool) -> fmt::Result {
        let mut needs_comma = leading_comma;
        for name in self.fields.keys() {
            for value in self.get_all(name) {
                if needs_comma {
                    f.write_str(",")?;
                }
                needs_comma = true;
                write!(f, "{name}={value}")?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        self.write_fields(f, false)?;
        f.write_str("}")
    }
}

impl fmt::Display for List {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (idx, item) in self.items.iter().enumerate() {
            if idx > 0 {
                f.write_str(",")?;
            }
            if let Some(name) = &item.name {
                write!(f, "{name}=")?;
            }
            write!(f, "{}", item.value)?;
        }
        f.write_str("]")
    }
}

fn write_record(
    f: &mut fmt::Formatter<'_>,
    token: Option<u32>,
    marker: char,
    class: &str,
    results: &Tuple,
) -> fmt::Result {
    if let Some(token) = token {
        write!(f, "{token}")?;
    }
    write!(f, "{marker}{class}")?;
    results.write_fields(f, true)
}

impl fmt::Display for ResultRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_record(f, self.token, '^', self.class.as_str(), &self.results)
    }
}

impl fmt::Display for OutOfBandRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Async(record) => {
                let marker = match record.kind {
                    AsyncKind::Exec => '*',
                    AsyncKind::Status => '+',
                    AsyncKind::Notify => '=',
                };
                write_record(f, record.token, marker, &record.class, &record.results)
            }
            Self::Stream(record) => {
                let marker = match record.kind {
                    StreamKind::Console => "~",
                    StreamKind::Target => "@",
                    StreamKind::Log => "&",
                };
                f.write_str(marker)?;
                write_c_string(f, &record.text)
            }
        }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Result(record) => write!(f, "{record}"),
            Self::OutOfBand(record) => write!(f, "{record}"),
        }
    }
}
