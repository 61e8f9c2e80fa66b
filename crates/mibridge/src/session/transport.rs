//! Line transport to the debugger process.
//! - Transport: duplex byte stream (any Read/Write pair or child pipes)
//! - read_line: one MI line without its terminator
//! - Transcript: optional `->`/`<-` wire log

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::process::Child;

use parking_lot::Mutex;
use tracing::warn;

use crate::error::{MiError, Result};

/// Duplex byte stream connected to the debugger's stdin/stdout.
pub struct Transport {
    pub(super) reader: Box<dyn BufRead + Send>,
    pub(super) writer: Box<dyn Write + Send>,
}

impl Transport {
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        Self {
            reader: Box::new(BufReader::new(reader)),
            writer: Box::new(writer),
        }
    }

    /// Take the piped stdin/stdout of an already spawned debugger.
    pub fn from_child(child: &mut Child) -> Result<Self> {
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| MiError::Transport("debugger stdin is not piped".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MiError::Transport("debugger stdout is not piped".to_string()))?;
        Ok(Self::new(stdout, stdin))
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport").finish_non_exhaustive()
    }
}

pub(super) fn read_line<R: BufRead + ?Sized>(reader: &mut R) -> io::Result<Option<String>> {
    let mut buffer = Vec::new();
    let bytes = reader.read_until(b'\n', &mut buffer)?;
    if bytes == 0 {
        return Ok(None);
    }
    while matches!(buffer.last(), Some(b'\n' | b'\r')) {
        buffer.pop();
    }
    Ok(Some(String::from_utf8_lossy(&buffer).into_owned()))
}

pub(super) fn write_line<W: Write + ?Sized>(writer: &mut W, line: &str) -> io::Result<()> {
    writer.write_all(line.as_bytes())?;
    writer.write_all(b"\n")?;
    writer.flush()
}

/// Wire transcript: outgoing lines as `-> `, incoming as `<- `.
#[derive(Debug)]
pub struct Transcript {
    file: Mutex<BufWriter<File>>,
}

impl Transcript {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|err| {
            MiError::Transport(format!("cannot create transcript {}: {err}", path.display()))
        })?;
        Ok(Self {
            file: Mutex::new(BufWriter::new(file)),
        })
    }

    pub(super) fn record(&self, direction: &str, line: &str) {
        let mut file = self.file.lock();
        let written = writeln!(file, "{direction} {line}").and_then(|()| file.flush());
        if let Err(err) = written {
            warn!("mi transcript write failed: {err}");
        }
    }
}
