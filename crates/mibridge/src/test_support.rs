//! Shared unit-test helpers.
//! - ScriptedChannel: canned replies for the state components
//! - pipe/FakeDebugger: in-memory duplex stream for session tests

use std::collections::VecDeque;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use crate::channel::MiChannel;
use crate::error::{MiError, Result};
use crate::parser;
use crate::protocol::{Record, ResultRecord};
use crate::session::{MiSession, Transport};

/// Replies to commands in script order, asserting each command's prefix.
#[derive(Debug, Default)]
pub(crate) struct ScriptedChannel {
    script: Mutex<VecDeque<(String, Result<String>)>>,
    sent: Mutex<Vec<String>>,
}

impl ScriptedChannel {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn reply(&self, command_prefix: &str, line: &str) -> &Self {
        self.script
            .lock()
            .push_back((command_prefix.to_string(), Ok(line.to_string())));
        self
    }

    pub(crate) fn fail(&self, command_prefix: &str, error: MiError) -> &Self {
        self.script
            .lock()
            .push_back((command_prefix.to_string(), Err(error)));
        self
    }

    pub(crate) fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    pub(crate) fn remaining(&self) -> usize {
        self.script.lock().len()
    }
}

impl MiChannel for ScriptedChannel {
    fn send(&self, command: &str) -> Result<ResultRecord> {
        self.sent.lock().push(command.to_string());
        let (prefix, reply) = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| panic!("unscripted command: {command}"));
        assert!(
            command.starts_with(&prefix),
            "expected command starting with {prefix:?}, got {command:?}"
        );
        match parser::parse(&reply?)? {
            Record::Result(record) => Ok(record),
            Record::OutOfBand(record) => panic!("scripted reply is not a result: {record:?}"),
        }
    }
}

pub(crate) struct PipeReader {
    rx: Receiver<Vec<u8>>,
    buffer: Vec<u8>,
    pos: usize,
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos >= self.buffer.len() {
            match self.rx.recv() {
                Ok(chunk) => {
                    self.buffer = chunk;
                    self.pos = 0;
                }
                Err(_) => return Ok(0),
            }
        }
        let count = buf.len().min(self.buffer.len() - self.pos);
        buf[..count].copy_from_slice(&self.buffer[self.pos..self.pos + count]);
        self.pos += count;
        Ok(count)
    }
}

pub(crate) struct PipeWriter {
    tx: Sender<Vec<u8>>,
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx
            .send(buf.to_vec())
            .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub(crate) fn pipe() -> (PipeWriter, PipeReader) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (
        PipeWriter { tx },
        PipeReader {
            rx,
            buffer: Vec::new(),
            pos: 0,
        },
    )
}

/// Debugger side of an in-memory session.
pub(crate) struct FakeDebugger {
    input: BufReader<PipeReader>,
    output: Option<PipeWriter>,
}

impl FakeDebugger {
    /// Next command written by the session, split into token and text.
    pub(crate) fn next_command(&mut self) -> (u32, String) {
        let mut line = String::new();
        self.input.read_line(&mut line).unwrap();
        let line = line.trim_end();
        let digits = line.chars().take_while(char::is_ascii_digit).count();
        let token = line[..digits].parse().unwrap();
        (token, line[digits..].to_string())
    }

    pub(crate) fn emit(&mut self, line: &str) {
        if let Some(output) = self.output.as_mut() {
            output.write_all(line.as_bytes()).unwrap();
            output.write_all(b"\n").unwrap();
        }
    }

    pub(crate) fn hang_up(&mut self) {
        self.output.take();
    }
}

pub(crate) fn fake_session(timeout: Option<Duration>) -> (MiSession, FakeDebugger) {
    let (to_debugger, debugger_input) = pipe();
    let (debugger_output, from_debugger) = pipe();
    let session =
        MiSession::with_options(Transport::new(from_debugger, to_debugger), timeout, None).unwrap();
    let debugger = FakeDebugger {
        input: BufReader::new(debugger_input),
        output: Some(debugger_output),
    };
    (session, debugger)
}
