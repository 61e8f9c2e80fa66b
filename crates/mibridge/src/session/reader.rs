//! Background reader: parse each line, resolve the in-flight command or publish.

use std::io::BufRead;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, trace, warn};

use crate::error::{MiError, Result};
use crate::parser;
use crate::protocol::Record;

use super::transport::read_line;
use super::{SessionEvent, Shared};

const PROMPT: &str = "(gdb)";

pub(super) fn spawn(
    mut reader: Box<dyn BufRead + Send>,
    shared: Arc<Shared>,
) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("mi-reader".to_string())
        .spawn(move || {
            loop {
                match read_line(&mut reader) {
                    Ok(Some(line)) => handle_line(&shared, &line),
                    Ok(None) => {
                        debug!("mi transport closed");
                        break;
                    }
                    Err(err) => {
                        warn!("mi transport read failed: {err}");
                        break;
                    }
                }
            }
            if shared.terminate() {
                shared.publish(&SessionEvent::Terminated);
            }
        })
        .map_err(|err| MiError::Transport(format!("cannot spawn reader: {err}")))
}

fn handle_line(shared: &Shared, line: &str) {
    if let Some(transcript) = &shared.transcript {
        transcript.record("<-", line);
    }
    trace!("<- {line}");
    let trimmed = line.trim_end();
    if trimmed.is_empty() || trimmed == PROMPT {
        return;
    }

    match parser::parse(trimmed) {
        Ok(Record::Result(record)) => {
            let Some(token) = record.token else {
                shared.publish(&SessionEvent::UnmatchedResult(record));
                return;
            };
            let claimed = {
                let mut table = shared.table.lock();
                match table.claim(token) {
                    Some(tx) => Some(tx),
                    None if table.expired.remove(&token) => {
                        debug!(token, "discarding reply to expired command");
                        return;
                    }
                    None => None,
                }
            };
            match claimed {
                Some(tx) => {
                    let _ = tx.send(Ok(record));
                }
                None => shared.publish(&SessionEvent::UnmatchedResult(record)),
            }
        }
        Ok(Record::OutOfBand(record)) => shared.publish(&SessionEvent::OutOfBand(record)),
        Err(error) => {
            warn!("{error}");
            let desynced = {
                let mut table = shared.table.lock();
                match table.waiting_token() {
                    Some(token) if is_reply_for(trimmed, token) => {
                        table.claim(token).map(|tx| (token, tx))
                    }
                    _ => None,
                }
            };
            if let Some((token, tx)) = desynced {
                let _ = tx.send(Err(MiError::ProtocolDesync { token }));
            }
            shared.publish(&SessionEvent::Diagnostic {
                line: trimmed.to_string(),
                error,
            });
        }
    }
}

/// True when an unparseable line still carries `<token>^`.
fn is_reply_for(line: &str, token: u32) -> bool {
    line.strip_prefix(token.to_string().as_str())
        .is_some_and(|rest| rest.starts_with('^'))
}
