//! MI command channel.
//! - MiSession: token assignment, one in-flight command, reply correlation
//! - reader: background line reader and out-of-band fan-out
//! - transport: duplex stream, line framing, wire transcript

mod reader;
mod transport;

#[cfg(test)]
mod tests;

use std::collections::HashSet;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::channel::MiChannel;
use crate::error::{MiError, Result};
use crate::protocol::{OutOfBandRecord, ResultRecord};

pub use transport::{Transcript, Transport};

/// Event published to subscribers, in wire order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    OutOfBand(OutOfBandRecord),
    /// Result record not claimed by the in-flight command.
    UnmatchedResult(ResultRecord),
    /// A line that failed to parse.
    Diagnostic { line: String, error: MiError },
    /// The transport closed; published once.
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&SessionEvent) + Send + Sync>;
type ReplySender = Sender<Result<ResultRecord>>;

#[derive(Debug, Default)]
struct TokenTable {
    waiting: Option<(u32, ReplySender)>,
    expired: HashSet<u32>,
}

impl TokenTable {
    fn claim(&mut self, token: u32) -> Option<ReplySender> {
        match &self.waiting {
            Some((waiting, _)) if *waiting == token => self.waiting.take().map(|(_, tx)| tx),
            _ => None,
        }
    }

    fn waiting_token(&self) -> Option<u32> {
        self.waiting.as_ref().map(|(token, _)| *token)
    }
}

pub(crate) struct Shared {
    table: Mutex<TokenTable>,
    subscribers: Mutex<Vec<(SubscriptionId, Handler)>>,
    next_subscription: AtomicU64,
    terminated: AtomicBool,
    transcript: Option<Transcript>,
}

impl Shared {
    fn publish(&self, event: &SessionEvent) {
        let handlers = self
            .subscribers
            .lock()
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect::<Vec<_>>();
        for handler in handlers {
            handler(event);
        }
    }

    fn terminate(&self) -> bool {
        let waiting = {
            let mut table = self.table.lock();
            if self.terminated.swap(true, Ordering::SeqCst) {
                return false;
            }
            table.waiting.take()
        };
        if let Some((token, tx)) = waiting {
            debug!(token, "failing in-flight command: session terminated");
            let _ = tx.send(Err(MiError::SessionTerminated));
        }
        true
    }
}

/// Clears the in-flight flag when a `send` returns.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Synchronous MI command channel over a [`Transport`].
///
/// One background thread drains the transport. `send` blocks the caller until
/// the reply with its token arrives; everything else goes to subscribers.
/// Handlers run on the reader thread and must not call `send`.
pub struct MiSession {
    shared: Arc<Shared>,
    writer: Mutex<Option<Box<dyn Write + Send>>>,
    next_token: AtomicU32,
    in_flight: AtomicBool,
    timeout: Option<Duration>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl MiSession {
    pub fn start(transport: Transport) -> Result<Self> {
        Self::with_options(transport, None, None)
    }

    pub fn with_options(
        transport: Transport,
        timeout: Option<Duration>,
        transcript: Option<Transcript>,
    ) -> Result<Self> {
        let Transport { reader, writer } = transport;
        let shared = Arc::new(Shared {
            table: Mutex::new(TokenTable::default()),
            subscribers: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
            terminated: AtomicBool::new(false),
            transcript,
        });
        let handle = reader::spawn(reader, Arc::clone(&shared))?;
        Ok(Self {
            shared,
            writer: Mutex::new(Some(writer)),
            next_token: AtomicU32::new(1),
            in_flight: AtomicBool::new(false),
            timeout,
            reader: Mutex::new(Some(handle)),
        })
    }

    /// Issue one command and block until its reply.
    ///
    /// `command` is written as `<token><command>\n`; it normally starts with `-`.
    /// An `^error` reply is returned as a record, not as an error.
    pub fn send(&self, command: &str) -> Result<ResultRecord> {
        if self.is_terminated() {
            return Err(MiError::SessionTerminated);
        }
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Err(MiError::ProtocolBusy);
        }
        let _in_flight = InFlight(&self.in_flight);

        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = crossbeam_channel::bounded(1);
        {
            let mut table = self.shared.table.lock();
            if self.shared.terminated.load(Ordering::SeqCst) {
                return Err(MiError::SessionTerminated);
            }
            table.waiting = Some((token, tx));
        }

        let line = format!("{token}{}", command.trim_end_matches(['\r', '\n']));
        debug!(token, command = %line, "mi send");
        if let Err(err) = self.write(&line) {
            self.shared.table.lock().claim(token);
            return Err(err);
        }

        let outcome = match self.timeout {
            Some(timeout) => rx.recv_timeout(timeout),
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match outcome {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                let mut table = self.shared.table.lock();
                if table.claim(token).is_some() {
                    table.expired.insert(token);
                    warn!(token, "mi command timed out");
                    return Err(MiError::Timeout(self.timeout.unwrap_or_default()));
                }
                drop(table);
                // The reader claimed the token between the deadline and the lock.
                rx.recv().unwrap_or(Err(MiError::SessionTerminated))
            }
            Err(RecvTimeoutError::Disconnected) => Err(MiError::SessionTerminated),
        }
    }

    /// Host-facing raw command entry point.
    pub fn send_raw(&self, command: &str) -> Result<ResultRecord> {
        self.send(command)
    }

    /// Register a handler for every non-reply event, delivered in registration order.
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.shared.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.shared.subscribers.lock().push((id, Arc::new(handler)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.shared.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|(existing, _)| *existing != id);
        subscribers.len() != before
    }

    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.shared.terminated.load(Ordering::SeqCst)
    }

    /// Stop accepting commands, close the write side and join the reader.
    ///
    /// The join blocks until the debugger closes its output, which it normally
    /// does once its input reaches EOF. Called from a subscriber, the reader is
    /// left to finish on its own.
    pub fn close(&self) {
        if self.shared.terminate() {
            self.shared.publish(&SessionEvent::Terminated);
        }
        self.writer.lock().take();
        let Some(handle) = self.reader.lock().take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            debug!("close called on the reader thread; not joining");
            return;
        }
        if handle.join().is_err() {
            warn!("mi reader thread panicked");
        }
    }

    fn write(&self, line: &str) -> Result<()> {
        let mut guard = self.writer.lock();
        let Some(writer) = guard.as_mut() else {
            return Err(MiError::SessionTerminated);
        };
        if let Some(transcript) = &self.shared.transcript {
            transcript.record("->", line);
        }
        trace!("-> {line}");
        transport::write_line(writer.as_mut(), line).map_err(|err| match err.kind() {
            io::ErrorKind::BrokenPipe => MiError::SessionTerminated,
            _ => MiError::Transport(err.to_string()),
        })
    }
}

impl MiChannel for MiSession {
    fn send(&self, command: &str) -> Result<ResultRecord> {
        MiSession::send(self, command)
    }
}

impl std::fmt::Debug for MiSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiSession")
            .field("next_token", &self.next_token.load(Ordering::Relaxed))
            .field("terminated", &self.is_terminated())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
