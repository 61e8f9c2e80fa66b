//! Variable-object node data and reply decoding.

use indexmap::IndexSet;
use smol_str::SmolStr;

use crate::error::{MiError, Result};
use crate::protocol::{Tuple, Value};

/// Thread and frame a watch is evaluated in; `None` uses the debugger's selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvalContext {
    pub thread: Option<u32>,
    pub frame: Option<u32>,
}

impl EvalContext {
    #[must_use]
    pub fn new(thread: u32, frame: u32) -> Self {
        Self {
            thread: Some(thread),
            frame: Some(frame),
        }
    }

    pub(super) fn command_options(&self) -> String {
        let mut options = String::new();
        if let Some(thread) = self.thread {
            options.push_str(&format!(" --thread {thread}"));
        }
        if let Some(frame) = self.frame {
            options.push_str(&format!(" --frame {frame}"));
        }
        options
    }
}

/// What a watch represents; drives host presentation, not store behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableKind {
    /// `$`-prefixed register or convenience variable.
    Register,
    /// Pointer type; the value carries a memory address.
    Pointer,
    /// Struct, union, array or class with children.
    Aggregate,
    Computed,
}

impl VariableKind {
    pub(super) fn classify(expression: &str, type_name: &str, has_children: bool) -> Self {
        if expression.starts_with('$') {
            Self::Register
        } else if type_name.trim_end().ends_with('*') {
            Self::Pointer
        } else if has_children {
            Self::Aggregate
        } else {
            Self::Computed
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableState {
    Live,
    /// Left scope; only `delete` is accepted.
    Invalid,
}

/// Value display radix for `-var-set-format`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayFormat {
    Natural,
    Hexadecimal,
    Decimal,
    Octal,
    Binary,
}

impl DisplayFormat {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Natural => "natural",
            Self::Hexadecimal => "hexadecimal",
            Self::Decimal => "decimal",
            Self::Octal => "octal",
            Self::Binary => "binary",
        }
    }
}

/// One live expression watch.
///
/// `children` holds child handles in debugger order; a child's display name is
/// its own `expression` and need not be unique among siblings. `parent` is a
/// lookup key into the same store, never an owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableNode {
    pub handle: SmolStr,
    pub expression: String,
    pub full_expression: String,
    pub type_name: String,
    pub value: String,
    pub has_children: bool,
    pub children: IndexSet<SmolStr>,
    pub populated: bool,
    pub parent: Option<SmolStr>,
    pub state: VariableState,
    pub kind: VariableKind,
}

impl VariableNode {
    /// Build a node from a `-var-create` reply or a `child={...}` tuple.
    pub(super) fn from_reply(
        fields: &Tuple,
        expression: String,
        full_expression: String,
        parent: Option<SmolStr>,
    ) -> Result<Self> {
        let handle = fields
            .get_str("name")
            .ok_or_else(|| MiError::ContractViolation("variable reply without name".into()))?;
        let type_name = fields.get_str("type").unwrap_or_default().to_string();
        let has_children = child_count(fields, "numchild")? > 0 || dynamic_more(fields);
        let kind = VariableKind::classify(&expression, &type_name, has_children);
        Ok(Self {
            handle: SmolStr::new(handle),
            expression,
            full_expression,
            type_name,
            value: fields.get_str("value").unwrap_or_default().to_string(),
            has_children,
            children: IndexSet::new(),
            populated: false,
            parent,
            state: VariableState::Live,
            kind,
        })
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.state == VariableState::Live
    }

    /// Address held by a pointer watch (`0x601040 <buf>` → `0x601040`).
    #[must_use]
    pub fn memory_address(&self) -> Option<u64> {
        if self.kind != VariableKind::Pointer {
            return None;
        }
        let word = self.value.split_whitespace().next()?;
        let hex = word
            .strip_prefix("0x")
            .or_else(|| word.strip_prefix("0X"))?;
        u64::from_str_radix(hex, 16).ok()
    }

    pub(super) fn reclassify(&mut self) {
        self.kind = VariableKind::classify(&self.expression, &self.type_name, self.has_children);
    }
}

/// Numeric field such as `numchild`; absent counts as zero.
pub(super) fn child_count(fields: &Tuple, name: &str) -> Result<usize> {
    match fields.get_str(name) {
        None => Ok(0),
        Some(text) => text.parse().map_err(|_| {
            MiError::ContractViolation(format!("{name} is not a count: {text:?}"))
        }),
    }
}

/// Pretty-printed varobjs report `dynamic="1"` with `has_more` instead of a count.
fn dynamic_more(fields: &Tuple) -> bool {
    fields.get_str("dynamic") == Some("1") && fields.get_str("has_more") == Some("1")
}

/// Extract every `child={...}` tuple of a `-var-list-children` reply, in order.
pub(super) fn child_tuples(children: &Value) -> Result<Vec<&Tuple>> {
    let list = children
        .as_list()
        .ok_or_else(|| MiError::ContractViolation("children is not a list".into()))?;
    (0..list.len())
        .map(|index| {
            list.get(index).and_then(Value::as_tuple).ok_or_else(|| {
                MiError::ContractViolation(format!("child {index} is not a tuple"))
            })
        })
        .collect()
}

pub(super) fn child_expression(parent: &str, exp: &str) -> String {
    format!("{parent}.{exp}")
}
