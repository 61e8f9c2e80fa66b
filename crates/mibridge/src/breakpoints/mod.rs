//! Breakpoint lifecycle coordination.
//! - request: request/location types and `bkpt` decoding
//!
//! Requests move `Requested -> Bound | Error` and are removed by `delete`.
//! A secondary index maps every debugger id (number and `n.m` location ids)
//! to its request so stop events resolve without a scan.

mod request;


use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use smol_str::SmolStr;
use tracing::{debug, info, warn};

use crate::channel::MiChannel;
use crate::error::{MiError, Result};
use crate::protocol::{OutOfBandRecord, ResultRecord, Value};
use crate::session::{MiSession, SessionEvent, SubscriptionId};

pub use request::{
    BoundLocation, BreakpointLocation, BreakpointOptions, BreakpointRequest, BreakpointState,
    RequestId, WatchAccess,
};

use request::{resolve, resolve_tuples, Resolution, WATCH_FIELDS};

/// Breakpoint notification queued for the next `refresh`.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Notice {
    Modified(Value),
    Deleted(SmolStr),
}

impl Notice {
    fn from_record(record: &OutOfBandRecord) -> Option<Self> {
        if let Some(fields) = record.notification("breakpoint-modified") {
            return fields.get("bkpt").cloned().map(Self::Modified);
        }
        record
            .notification("breakpoint-deleted")
            .and_then(|fields| fields.get_str("id"))
            .map(|id| Self::Deleted(SmolStr::new(id)))
    }
}

type Inbox = Arc<Mutex<VecDeque<Notice>>>;

#[derive(Debug, Default)]
struct CoordinatorState {
    requests: IndexMap<RequestId, BreakpointRequest>,
    index: HashMap<SmolStr, RequestId>,
    next_id: u32,
    /// Set by the first contract violation; the coordinator refuses work afterwards.
    faulted: Option<String>,
}

impl CoordinatorState {
    fn check(&self) -> Result<()> {
        match &self.faulted {
            Some(reason) => Err(MiError::ContractViolation(reason.clone())),
            None => Ok(()),
        }
    }

    fn fault(&mut self, error: &MiError) {
        if let MiError::ContractViolation(reason) = error {
            if self.faulted.is_none() {
                warn!("breakpoint coordinator disabled: {reason}");
                self.faulted = Some(reason.clone());
            }
        }
    }

    fn insert(&mut self, request: BreakpointRequest) {
        for key in request.index_keys() {
            self.index.insert(key, request.id);
        }
        self.requests.insert(request.id, request);
    }

    fn remove(&mut self, id: RequestId) -> Option<BreakpointRequest> {
        let request = self.requests.shift_remove(&id)?;
        self.unindex(&request);
        Some(request)
    }

    fn unindex(&mut self, request: &BreakpointRequest) {
        for key in request.index_keys() {
            if self.index.get(&key) == Some(&request.id) {
                self.index.remove(&key);
            }
        }
    }

    /// Move a request to `state`; returns false when nothing changed.
    fn transition(&mut self, id: RequestId, state: BreakpointState) -> bool {
        let Some(current) = self.requests.get(&id) else {
            return false;
        };
        if current.state == state {
            return false;
        }
        let mut updated = current.clone();
        self.unindex(&updated);
        if let BreakpointState::Error(message) = &state {
            debug!(request = %id, "breakpoint error: {message}");
            updated.number = None;
        }
        updated.state = state;
        self.insert(updated);
        true
    }

    fn apply_resolution(&mut self, id: RequestId, resolution: Resolution) -> bool {
        if let (Some(hits), Some(request)) = (resolution.hit_count, self.requests.get_mut(&id)) {
            request.hit_count = hits;
        }
        let state = if resolution.is_pending() {
            BreakpointState::Requested
        } else {
            BreakpointState::Bound(resolution.locations)
        };
        let changed = self.transition(id, state);
        if changed {
            if let Some(request) = self.requests.get(&id) {
                info!(
                    request = %id,
                    locations = request.locations().len(),
                    "breakpoint {}",
                    if request.is_bound() { "bound" } else { "pending" }
                );
            }
        }
        changed
    }

    fn apply_notice(&mut self, notice: Notice) -> Result<Option<RequestId>> {
        match notice {
            Notice::Modified(value) => {
                let resolution = resolve(&value)?;
                let Some(&id) = self.index.get(&resolution.number) else {
                    return Ok(None);
                };
                Ok(self.apply_resolution(id, resolution).then_some(id))
            }
            Notice::Deleted(number) => {
                let Some(&id) = self.index.get(&number) else {
                    return Ok(None);
                };
                Ok(self
                    .transition(id, BreakpointState::Error("deleted by debugger".into()))
                    .then_some(id))
            }
        }
    }
}

/// Tracks breakpoint requests against one debugger session.
#[derive(Debug)]
pub struct BreakpointCoordinator<C> {
    channel: C,
    state: Mutex<CoordinatorState>,
    inbox: Inbox,
}

impl<C: MiChannel> BreakpointCoordinator<C> {
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            state: Mutex::new(CoordinatorState::default()),
            inbox: Arc::default(),
        }
    }

    /// Queue this session's breakpoint notifications for the next `refresh`.
    pub fn attach(&self, session: &MiSession) -> SubscriptionId {
        let inbox = Arc::clone(&self.inbox);
        session.subscribe(move |event| {
            if let SessionEvent::OutOfBand(record) = event {
                if let Some(notice) = Notice::from_record(record) {
                    inbox.lock().push_back(notice);
                }
            }
        })
    }

    /// Queue a notification received by other means; false when it is not breakpoint related.
    pub fn observe(&self, record: &OutOfBandRecord) -> bool {
        match Notice::from_record(record) {
            Some(notice) => {
                self.inbox.lock().push_back(notice);
                true
            }
            None => false,
        }
    }

    /// Insert a breakpoint. A debugger error yields an `Error` request, not a failure.
    ///
    /// A reply that names no breakpoint disables the coordinator: every later
    /// `request`, `refresh`, `delete` and `clear` returns the same violation.
    pub fn request(
        &self,
        location: BreakpointLocation,
        options: BreakpointOptions,
    ) -> Result<BreakpointRequest> {
        let id = {
            let mut state = self.state.lock();
            state.check()?;
            state.next_id += 1;
            RequestId(state.next_id)
        };
        let reply = self.channel.send(&location.insert_command(&options))?;

        let mut request = BreakpointRequest {
            id,
            location,
            options,
            number: None,
            state: BreakpointState::Requested,
            hit_count: 0,
        };
        match reply.error_message() {
            Some(message) => request.state = BreakpointState::Error(message.to_string()),
            None => {
                let resolution = self.guard(|_| inserted(&reply))?;
                request.number = Some(resolution.number.clone());
                request.hit_count = resolution.hit_count.unwrap_or(0);
                if !resolution.is_pending() {
                    request.state = BreakpointState::Bound(resolution.locations);
                }
                if request.location.is_watch() {
                    self.configure_watch(&mut request, &resolution.number);
                }
            }
        }
        debug!(request = %id, location = %request.location, state = ?request.state, "breakpoint requested");
        self.state.lock().insert(request.clone());
        Ok(request)
    }

    /// Apply queued notifications, then re-query every request still pending.
    ///
    /// Returns the requests whose state changed; a second call with no new
    /// debugger information returns nothing.
    pub fn refresh(&self) -> Result<Vec<RequestId>> {
        self.state.lock().check()?;
        let notices = std::mem::take(&mut *self.inbox.lock());
        let mut changed = Vec::new();
        let pending = self.guard(|state| {
            for notice in notices {
                if let Some(id) = state.apply_notice(notice)? {
                    if !changed.contains(&id) {
                        changed.push(id);
                    }
                }
            }
            Ok(state
                .requests
                .values()
                .filter(|request| request.state == BreakpointState::Requested)
                .filter_map(|request| request.number.clone().map(|number| (request.id, number)))
                .collect::<Vec<_>>())
        })?;

        for (id, number) in pending {
            let reply = self.channel.send(&format!("-break-info {number}"))?;
            let updated = self.guard(|state| {
                Ok(match reply.error_message() {
                    Some(message) => {
                        state.transition(id, BreakpointState::Error(message.to_string()))
                    }
                    None => match breakpoint_table(&reply, &number)? {
                        Some(resolution) => state.apply_resolution(id, resolution),
                        None => state
                            .transition(id, BreakpointState::Error("deleted by debugger".into())),
                    },
                })
            })?;
            if updated && !changed.contains(&id) {
                changed.push(id);
            }
        }
        Ok(changed)
    }

    /// Delete every debugger breakpoint behind `id` and forget the request.
    ///
    /// The request is removed even when a delete command fails; those failures
    /// come back as [`MiError::PartialDelete`].
    pub fn delete(&self, id: RequestId) -> Result<()> {
        let request = {
            let mut state = self.state.lock();
            state.check()?;
            state
                .remove(id)
                .ok_or_else(|| MiError::NotFound(id.to_string()))?
        };

        let mut failures = Vec::new();
        for number in request.delete_numbers() {
            match self.channel.execute(&format!("-break-delete {number}")) {
                Ok(_) => {}
                Err(MiError::Command { message, .. }) => failures.push((number, message)),
                Err(err) => {
                    if err.is_fatal() {
                        return Err(err);
                    }
                    failures.push((number, err.to_string()));
                }
            }
        }
        if failures.is_empty() {
            debug!(request = %id, "breakpoint deleted");
            return Ok(());
        }
        warn!(request = %id, failed = failures.len(), "breakpoint partially deleted");
        Err(MiError::PartialDelete {
            request: id.0,
            failures,
        })
    }

    /// Request owning a debugger breakpoint id (`3` or `3.2`).
    #[must_use]
    pub fn find_by_subprocess_id(&self, id: &str) -> Option<BreakpointRequest> {
        let state = self.state.lock();
        let request = state.index.get(id)?;
        state.requests.get(request).cloned()
    }

    /// Record the hit count reported for a stop at debugger breakpoint `id`.
    pub fn record_hit(&self, id: &str, times: u32) -> Option<RequestId> {
        let mut state = self.state.lock();
        let request = *state.index.get(id)?;
        let entry = state.requests.get_mut(&request)?;
        entry.hit_count = times;
        Some(request)
    }

    #[must_use]
    pub fn get(&self, id: RequestId) -> Option<BreakpointRequest> {
        self.state.lock().requests.get(&id).cloned()
    }

    /// Snapshot in request order.
    #[must_use]
    pub fn requests(&self) -> Vec<BreakpointRequest> {
        self.state.lock().requests.values().cloned().collect()
    }

    /// Delete every request; the first failure is returned after all were attempted.
    pub fn clear(&self) -> Result<()> {
        let ids = {
            let state = self.state.lock();
            state.check()?;
            state.requests.keys().copied().collect::<Vec<_>>()
        };
        let mut first_error = None;
        for id in ids {
            if let Err(err) = self.delete(id) {
                if err.is_fatal() {
                    return Err(err);
                }
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Run `apply` under the state lock, latching any contract violation.
    fn guard<T>(&self, apply: impl FnOnce(&mut CoordinatorState) -> Result<T>) -> Result<T> {
        let mut state = self.state.lock();
        let result = apply(&mut state);
        if let Err(err) = &result {
            state.fault(err);
        }
        result
    }

    /// Apply condition and ignore count to a freshly created watchpoint.
    fn configure_watch(&self, request: &mut BreakpointRequest, number: &str) {
        let mut commands = Vec::new();
        if let Some(condition) = &request.options.condition {
            commands.push(format!("-break-condition {number} {condition}"));
        }
        if request.options.ignore_count > 0 {
            commands.push(format!("-break-after {number} {}", request.options.ignore_count));
        }
        for command in commands {
            match self.channel.execute(&command) {
                Ok(_) => {}
                Err(err) => {
                    warn!(request = %request.id, "watchpoint option rejected: {err}");
                    request.state = BreakpointState::Error(err.to_string());
                    return;
                }
            }
        }
    }
}

/// Resolution carried by an insert reply (`bkpt=` or a watchpoint tuple).
fn inserted(reply: &ResultRecord) -> Result<Resolution> {
    let value = std::iter::once("bkpt")
        .chain(WATCH_FIELDS)
        .find_map(|field| reply.get(field))
        .ok_or_else(|| MiError::ContractViolation("insert reply without breakpoint".into()))?;
    resolve(value)
}

/// Resolution for `number` in a `-break-info` table; `None` when the debugger no longer lists it.
fn breakpoint_table(reply: &ResultRecord, number: &str) -> Result<Option<Resolution>> {
    let body = reply
        .get("BreakpointTable")
        .and_then(|table| table.get("body"))
        .and_then(Value::as_list)
        .ok_or_else(|| MiError::ContractViolation("-break-info reply without table body".into()))?;
    let tuples = body.values().filter_map(Value::as_tuple).collect::<Vec<_>>();
    let Some(position) = tuples
        .iter()
        .position(|tuple| tuple.get_str("number") == Some(number))
    else {
        return Ok(None);
    };
    resolve_tuples(tuples[position], &tuples[position + 1..]).map(Some)
}
