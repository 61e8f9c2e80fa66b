#![allow(dead_code)]

use std::io::{self, BufRead, BufReader, Read, Write};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use mibridge::{MiSession, SessionEvent, Transport};

/// Responder output line that makes the fake debugger close its stdout.
pub const HANG_UP: &str = "<hang-up>";

pub struct PipeReader {
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

pub struct PipeWriter {
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

pub fn pipe() -> (PipeWriter, PipeReader) {
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

/// Scripted debugger thread on the far side of an in-memory transport.
///
/// The responder maps each command (token stripped) to output lines; lines
/// starting with `^` get the command's token prepended, every other line is
/// written as is, and a `(gdb) ` prompt follows each batch.
pub struct FakeGdb {
    pub commands: Arc<Mutex<Vec<String>>>,
    pub events: Arc<Mutex<Vec<SessionEvent>>>,
    handle: Option<JoinHandle<()>>,
}

impl FakeGdb {
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }

    pub fn events(&self) -> Vec<SessionEvent> {
        self.events.lock().clone()
    }

    /// Block until a `*<class>` record was published; events arrive after the reply.
    pub fn wait_for_exec(&self, class: &str) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            let seen = self.events.lock().iter().any(|event| match event {
                SessionEvent::OutOfBand(record) => record.exec(class).is_some(),
                _ => false,
            });
            if seen {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("no *{class} record within deadline");
    }

    /// Wait for the debugger thread after the session closed its side.
    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.join().unwrap();
        }
    }
}

pub fn start<F>(mut respond: F) -> (MiSession, FakeGdb)
where
    F: FnMut(&str) -> Vec<String> + Send + 'static,
{
    let (to_gdb, gdb_input) = pipe();
    let (mut gdb_output, from_gdb) = pipe();
    let commands = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&commands);

    let handle = thread::spawn(move || {
        let mut input = BufReader::new(gdb_input);
        let mut line = String::new();
        while input.read_line(&mut line).unwrap_or(0) > 0 {
            let text = line.trim_end();
            let digits = text.chars().take_while(char::is_ascii_digit).count();
            let (token, command) = text.split_at(digits);
            seen.lock().push(command.to_string());
            for output in respond(command) {
                if output == HANG_UP {
                    return;
                }
                let output = if output.starts_with('^') {
                    format!("{token}{output}\n")
                } else {
                    format!("{output}\n")
                };
                if gdb_output.write_all(output.as_bytes()).is_err() {
                    return;
                }
            }
            if gdb_output.write_all(b"(gdb) \n").is_err() {
                return;
            }
            line.clear();
        }
    });

    let session = MiSession::start(Transport::new(from_gdb, to_gdb)).unwrap();
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    session.subscribe(move |event| sink.lock().push(event.clone()));
    (
        session,
        FakeGdb {
            commands,
            events,
            handle: Some(handle),
        },
    )
}

pub fn lines(items: &[&str]) -> Vec<String> {
    items.iter().map(|item| (*item).to_string()).collect()
}
