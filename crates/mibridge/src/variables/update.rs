//! `-var-update` changelist decoding and application.
//! - changelist: typed entries from the reply
//! - StoreState::apply_changes: scope, type, value and child-count updates

use smol_str::SmolStr;
use tracing::debug;

use crate::error::{MiError, Result};
use crate::protocol::{ResultRecord, Tuple, Value};

use super::node::{child_count, child_tuples};
use super::StoreState;

/// What one update changed, per reported variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableChange {
    pub handle: SmolStr,
    /// New value text, when the debugger reported one.
    pub value: Option<String>,
    pub in_scope: bool,
    pub type_changed: bool,
}

/// Outcome of [`super::VariableStore::update`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub changed: Vec<VariableChange>,
    /// Handles marked invalid, subtrees included.
    pub invalidated: Vec<SmolStr>,
    /// Children instantiated from `new_children`.
    pub added: Vec<SmolStr>,
    /// Handles dropped from the store by type changes or shrinking child counts.
    pub removed: Vec<SmolStr>,
}

impl ChangeSet {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty()
            && self.invalidated.is_empty()
            && self.added.is_empty()
            && self.removed.is_empty()
    }
}

#[derive(Debug)]
pub(super) struct UpdateEntry<'a> {
    handle: &'a str,
    value: Option<&'a str>,
    in_scope: bool,
    type_changed: bool,
    new_type: Option<&'a str>,
    new_num_children: Option<usize>,
    new_children: Vec<&'a Tuple>,
}

impl<'a> UpdateEntry<'a> {
    fn parse(fields: &'a Tuple) -> Result<Self> {
        let handle = fields
            .get_str("name")
            .ok_or_else(|| MiError::ContractViolation("changelist entry without name".into()))?;
        // `invalid` means the frame the watch was created in is gone for good.
        let in_scope = !matches!(fields.get_str("in_scope"), Some("false" | "invalid"));
        let new_num_children = match fields.get_str("new_num_children") {
            Some(_) => Some(child_count(fields, "new_num_children")?),
            None => None,
        };
        let new_children = match fields.get("new_children") {
            Some(children) => child_tuples(children)?,
            None => Vec::new(),
        };
        Ok(Self {
            handle,
            value: fields.get_str("value"),
            in_scope,
            type_changed: fields.get_str("type_changed") == Some("true"),
            new_type: fields.get_str("new_type"),
            new_num_children,
            new_children,
        })
    }
}

/// Decode the `changelist` of a `-var-update` reply.
pub(super) fn changelist(record: &ResultRecord) -> Result<Vec<UpdateEntry<'_>>> {
    let list = record
        .get("changelist")
        .and_then(Value::as_list)
        .ok_or_else(|| MiError::ContractViolation("-var-update reply without changelist".into()))?;
    list.values()
        .map(|entry| {
            entry
                .as_tuple()
                .ok_or_else(|| {
                    MiError::ContractViolation("changelist entry is not a tuple".into())
                })
                .and_then(UpdateEntry::parse)
        })
        .collect()
}

impl StoreState {
    pub(super) fn apply_changes(&mut self, entries: Vec<UpdateEntry<'_>>) -> Result<ChangeSet> {
        let mut changes = ChangeSet::default();
        for entry in entries {
            let handle = SmolStr::new(entry.handle);
            if !self.nodes.contains_key(&handle) {
                debug!(handle = %handle, "update for untracked variable");
                continue;
            }

            if !entry.in_scope {
                changes.invalidated.extend(self.invalidate_subtree(&handle));
                changes.changed.push(VariableChange {
                    handle,
                    value: None,
                    in_scope: false,
                    type_changed: false,
                });
                continue;
            }

            if entry.type_changed {
                changes.removed.extend(self.drop_children(&handle, 0));
                if let Some(node) = self.nodes.get_mut(&handle) {
                    if let Some(new_type) = entry.new_type {
                        new_type.clone_into(&mut node.type_name);
                    }
                    node.populated = false;
                }
            }

            if let Some(count) = entry.new_num_children {
                changes.removed.extend(self.drop_children(&handle, count));
                if let Some(node) = self.nodes.get_mut(&handle) {
                    node.has_children = count > 0;
                }
            }

            for child in &entry.new_children {
                let added = self.insert_child(&handle, child)?;
                changes.added.push(added);
            }

            if let Some(node) = self.nodes.get_mut(&handle) {
                if let Some(value) = entry.value {
                    value.clone_into(&mut node.value);
                }
                if !entry.new_children.is_empty() {
                    node.has_children = true;
                }
                node.reclassify();
            }
            changes.changed.push(VariableChange {
                handle,
                value: entry.value.map(str::to_string),
                in_scope: true,
                type_changed: entry.type_changed,
            });
        }
        Ok(changes)
    }

    /// Remove children past index `keep` (all of them for 0), subtrees included.
    fn drop_children(&mut self, handle: &SmolStr, keep: usize) -> Vec<SmolStr> {
        let trailing = match self.nodes.get_mut(handle) {
            Some(node) if node.children.len() > keep => node
                .children
                .drain(keep..)
                .collect::<Vec<_>>(),
            _ => return Vec::new(),
        };
        trailing
            .iter()
            .flat_map(|child| self.remove_subtree(child))
            .collect()
    }
}
