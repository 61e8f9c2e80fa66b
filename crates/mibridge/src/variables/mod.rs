//! Variable-object store.
//! - node: VariableNode, EvalContext, VariableKind, DisplayFormat
//! - update: changelist decoding and ChangeSet application
//!
//! Nodes live in one arena keyed by debugger handle. The arena lock is never
//! held while a command is in flight.

mod node;
mod update;


use std::collections::HashMap;

use parking_lot::Mutex;
use smol_str::SmolStr;
use tracing::{debug, warn};

use crate::channel::MiChannel;
use crate::error::{MiError, Result};
use crate::protocol::{quote_argument, ResultRecord, Tuple};

pub use node::{DisplayFormat, EvalContext, VariableKind, VariableNode, VariableState};
pub use update::{ChangeSet, VariableChange};

use node::{child_count, child_expression, child_tuples};

#[derive(Debug, Default)]
struct StoreState {
    nodes: HashMap<SmolStr, VariableNode>,
    roots: Vec<SmolStr>,
    /// Set by the first contract violation; the store refuses work afterwards.
    faulted: Option<String>,
}

impl StoreState {
    fn check(&self) -> Result<()> {
        match &self.faulted {
            Some(reason) => Err(MiError::ContractViolation(reason.clone())),
            None => Ok(()),
        }
    }

    fn live(&self, handle: &str) -> Result<&VariableNode> {
        let node = self
            .nodes
            .get(handle)
            .ok_or_else(|| MiError::NotFound(handle.to_string()))?;
        if !node.is_live() {
            return Err(MiError::OutOfScope(node.handle.clone()));
        }
        Ok(node)
    }

    /// `handle` and every descendant, parents before children.
    fn subtree(&self, handle: &SmolStr) -> Vec<SmolStr> {
        let mut order = Vec::new();
        let mut stack = vec![handle.clone()];
        while let Some(next) = stack.pop() {
            if let Some(node) = self.nodes.get(&next) {
                stack.extend(node.children.iter().rev().cloned());
                order.push(next);
            }
        }
        order
    }

    /// Drop a subtree from the arena, descendants first. The caller detaches the root.
    fn remove_subtree(&mut self, handle: &SmolStr) -> Vec<SmolStr> {
        let mut removed = self.subtree(handle);
        removed.reverse();
        for handle in &removed {
            self.nodes.remove(handle);
        }
        removed
    }

    fn invalidate_subtree(&mut self, handle: &SmolStr) -> Vec<SmolStr> {
        let handles = self.subtree(handle);
        for handle in &handles {
            if let Some(node) = self.nodes.get_mut(handle) {
                node.state = VariableState::Invalid;
            }
        }
        handles
    }

    fn detach(&mut self, handle: &SmolStr, parent: Option<&SmolStr>) {
        match parent.and_then(|parent| self.nodes.get_mut(parent)) {
            Some(parent) => {
                parent.children.shift_remove(handle);
            }
            None => self.roots.retain(|root| root != handle),
        }
    }

    /// Track one `child={...}` entry under `parent`; a known handle is kept as is.
    fn insert_child(&mut self, parent: &SmolStr, fields: &Tuple) -> Result<SmolStr> {
        let parent_expression = self
            .nodes
            .get(parent)
            .map(|node| node.full_expression.clone())
            .ok_or_else(|| MiError::NotFound(parent.to_string()))?;
        let exp = fields
            .get_str("exp")
            .ok_or_else(|| MiError::ContractViolation("child without exp".into()))?;
        let child = VariableNode::from_reply(
            fields,
            exp.to_string(),
            child_expression(&parent_expression, exp),
            Some(parent.clone()),
        )?;
        let handle = child.handle.clone();
        self.nodes.entry(handle.clone()).or_insert(child);
        if let Some(parent) = self.nodes.get_mut(parent) {
            parent.children.insert(handle.clone());
        }
        Ok(handle)
    }

    fn fault(&mut self, error: &MiError) {
        if let MiError::ContractViolation(reason) = error {
            if self.faulted.is_none() {
                warn!("variable store disabled: {reason}");
                self.faulted = Some(reason.clone());
            }
        }
    }
}

/// Live expression watches backed by debugger variable objects.
///
/// Handles come from `-var-create` and `-var-list-children`; each is released
/// by exactly one `delete`, after which it reports `NotFound`.
#[derive(Debug)]
pub struct VariableStore<C> {
    channel: C,
    state: Mutex<StoreState>,
}

impl<C: MiChannel> VariableStore<C> {
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            state: Mutex::new(StoreState::default()),
        }
    }

    /// Create a root watch. Aggregates get one level of children immediately.
    pub fn create(&self, expression: &str, context: EvalContext) -> Result<VariableNode> {
        self.state.lock().check()?;
        let command = format!(
            "-var-create{} - * {}",
            context.command_options(),
            quote_argument(expression)
        );
        let reply = self.channel.send(&command)?;
        if let Some(message) = reply.error_message() {
            return Err(MiError::Evaluation {
                expression: expression.to_string(),
                message: message.to_string(),
            });
        }

        let node = self.guard(|state| {
            let node = VariableNode::from_reply(
                &reply.results,
                expression.to_string(),
                expression.to_string(),
                None,
            )?;
            if state.nodes.contains_key(&node.handle) {
                return Err(MiError::ContractViolation(format!(
                    "debugger reused variable handle {}",
                    node.handle
                )));
            }
            state.roots.push(node.handle.clone());
            state.nodes.insert(node.handle.clone(), node.clone());
            Ok(node)
        })?;
        debug!(handle = %node.handle, expression, "variable created");

        if node.has_children {
            if let Err(err) = self.populate(&node.handle) {
                if let Err(release) = self.channel.execute(&format!("-var-delete {}", node.handle))
                {
                    warn!(handle = %node.handle, "cannot release variable: {release}");
                }
                self.discard(&node.handle);
                return Err(err);
            }
        }
        self.get(&node.handle)
    }

    /// Populate one level of children; a populated node is left untouched.
    pub fn expand(&self, handle: &str) -> Result<Vec<VariableNode>> {
        let populated = {
            let state = self.state.lock();
            state.check()?;
            let node = state.live(handle)?;
            node.populated || !node.has_children
        };
        if !populated {
            self.populate(handle)?;
        }
        self.children(handle)
    }

    /// Pull changes for `handle` and its children from the debugger.
    pub fn update(&self, handle: &str) -> Result<ChangeSet> {
        {
            let state = self.state.lock();
            state.check()?;
            state.live(handle)?;
        }
        let reply = self
            .channel
            .execute(&format!("-var-update --all-values {handle}"))?;
        self.guard(|state| {
            let entries = update::changelist(&reply)?;
            state.apply_changes(entries)
        })
    }

    /// Release `handle` in the debugger, then drop it and its subtree locally.
    pub fn delete(&self, handle: &str) -> Result<()> {
        {
            let state = self.state.lock();
            state.check()?;
            if !state.nodes.contains_key(handle) {
                return Err(MiError::NotFound(handle.to_string()));
            }
        }
        self.channel.execute(&format!("-var-delete {handle}"))?;
        let removed = self.discard(handle);
        debug!(handle, removed = removed.len(), "variable deleted");
        Ok(())
    }

    /// Assign a new value; the node takes the value the debugger echoes back.
    pub fn assign(&self, handle: &str, value: &str) -> Result<VariableNode> {
        {
            let state = self.state.lock();
            state.check()?;
            state.live(handle)?;
        }
        let reply = self.channel.execute(&format!(
            "-var-assign {handle} {}",
            quote_argument(value)
        ))?;
        self.store_value(handle, &reply)
    }

    pub fn set_format(&self, handle: &str, format: DisplayFormat) -> Result<VariableNode> {
        {
            let state = self.state.lock();
            state.check()?;
            state.live(handle)?;
        }
        let reply = self
            .channel
            .execute(&format!("-var-set-format {handle} {}", format.as_str()))?;
        self.store_value(handle, &reply)
    }

    pub fn get(&self, handle: &str) -> Result<VariableNode> {
        self.state
            .lock()
            .nodes
            .get(handle)
            .cloned()
            .ok_or_else(|| MiError::NotFound(handle.to_string()))
    }

    /// Known children of `handle`, in debugger order.
    pub fn children(&self, handle: &str) -> Result<Vec<VariableNode>> {
        let state = self.state.lock();
        let node = state
            .nodes
            .get(handle)
            .ok_or_else(|| MiError::NotFound(handle.to_string()))?;
        Ok(node
            .children
            .iter()
            .filter_map(|child| state.nodes.get(child).cloned())
            .collect())
    }

    #[must_use]
    pub fn roots(&self) -> Vec<VariableNode> {
        let state = self.state.lock();
        state
            .roots
            .iter()
            .filter_map(|root| state.nodes.get(root).cloned())
            .collect()
    }

    /// Number of tracked nodes, children included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn populate(&self, handle: &str) -> Result<()> {
        let reply = self
            .channel
            .execute(&format!("-var-list-children --all-values {handle}"))?;
        self.guard(|state| {
            let parent = SmolStr::new(handle);
            if !state.nodes.contains_key(&parent) {
                return Err(MiError::NotFound(handle.to_string()));
            }
            let expected = child_count(&reply.results, "numchild")?;
            let tuples = match reply.get("children") {
                Some(children) => child_tuples(children)?,
                None if expected == 0 => Vec::new(),
                None => {
                    return Err(MiError::ContractViolation(format!(
                        "-var-list-children {handle} reported {expected} children without a list"
                    )))
                }
            };
            for fields in tuples {
                state.insert_child(&parent, fields)?;
            }
            if let Some(node) = state.nodes.get_mut(&parent) {
                node.populated = true;
            }
            Ok(())
        })
    }

    fn store_value(&self, handle: &str, reply: &ResultRecord) -> Result<VariableNode> {
        self.guard(|state| {
            let value = reply.get_str("value").ok_or_else(|| {
                MiError::ContractViolation(format!("no value in reply for {handle}"))
            })?;
            let node = state
                .nodes
                .get_mut(handle)
                .ok_or_else(|| MiError::NotFound(handle.to_string()))?;
            value.clone_into(&mut node.value);
            Ok(node.clone())
        })
    }

    fn discard(&self, handle: &str) -> Vec<SmolStr> {
        let mut state = self.state.lock();
        let handle = SmolStr::new(handle);
        let parent = state.nodes.get(&handle).and_then(|node| node.parent.clone());
        state.detach(&handle, parent.as_ref());
        state.remove_subtree(&handle)
    }

    /// Run `apply` under the arena lock, latching any contract violation.
    fn guard<T>(&self, apply: impl FnOnce(&mut StoreState) -> Result<T>) -> Result<T> {
        let mut state = self.state.lock();
        let result = apply(&mut state);
        if let Err(err) = &result {
            state.fault(err);
        }
        result
    }
}
