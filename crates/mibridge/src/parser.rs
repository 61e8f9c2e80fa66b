//! MI output line parser.
//! - parse: one line -> result record or out-of-band record
//! - values: c-strings, `{}` tuples, `[]` lists (bare or keyed elements)

use smol_str::SmolStr;

use crate::error::{MiError, Result};
use crate::protocol::{
    AsyncKind, AsyncRecord, List, OutOfBandRecord, Record, ResultClass, ResultRecord, StreamKind,
    StreamRecord, Tuple, Value,
};

const MAX_NESTING: usize = 512;

/// Parse a single line of MI output.
pub fn parse(line: &str) -> Result<Record> {
    let line = line.trim_end_matches(['\r', '\n']);
    let mut cursor = Cursor::new(line);
    let token = cursor.token()?;
    let offset = cursor.pos;
    let marker = cursor
        .bump()
        .ok_or_else(|| cursor.error("expected record class marker"))?;

    let stream_kind = match marker {
        b'~' => Some(StreamKind::Console),
        b'@' => Some(StreamKind::Target),
        b'&' => Some(StreamKind::Log),
        _ => None,
    };
    if let Some(kind) = stream_kind {
        if token.is_some() {
            return Err(MiError::malformed(line, 0, "stream record cannot carry a token"));
        }
        let text = cursor.c_string()?;
        cursor.expect_end()?;
        return Ok(Record::OutOfBand(OutOfBandRecord::Stream(StreamRecord {
            kind,
            text,
        })));
    }

    let async_kind = match marker {
        b'^' => None,
        b'*' => Some(AsyncKind::Exec),
        b'+' => Some(AsyncKind::Status),
        b'=' => Some(AsyncKind::Notify),
        _ => {
            return Err(MiError::malformed(
                line,
                offset,
                "expected record class marker",
            ))
        }
    };

    let class_offset = cursor.pos;
    let class = cursor.class_name()?;
    let results = cursor.results()?;

    match async_kind {
        None => {
            let class = ResultClass::parse(class).ok_or_else(|| {
                MiError::malformed(line, class_offset, "unknown result class")
            })?;
            Ok(Record::Result(ResultRecord {
                token,
                class,
                results,
            }))
        }
        Some(kind) => Ok(Record::OutOfBand(OutOfBandRecord::Async(AsyncRecord {
            token,
            kind,
            class: SmolStr::new(class),
            results,
        }))),
    }
}

/// Parse a standalone value (`"..."`, `{...}` or `[...]`).
pub fn parse_value(text: &str) -> Result<Value> {
    let mut cursor = Cursor::new(text);
    let value = cursor.value(0)?;
    cursor.expect_end()?;
    Ok(value)
}

struct Cursor<'a> {
    line: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(line: &'a str) -> Self {
        Self {
            line,
            bytes: line.as_bytes(),
            pos: 0,
        }
    }

    fn error(&self, message: &str) -> MiError {
        MiError::malformed(self.line, self.pos, message)
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.pos += 1;
        Some(byte)
    }

    fn eat(&mut self, expected: u8) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: u8, message: &str) -> Result<()> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(self.error(message))
        }
    }

    fn expect_end(&self) -> Result<()> {
        if self.pos == self.bytes.len() {
            Ok(())
        } else {
            Err(self.error("unexpected trailing input"))
        }
    }

    fn token(&mut self) -> Result<Option<u32>> {
        let start = self.pos;
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.pos += 1;
        }
        if start == self.pos {
            return Ok(None);
        }
        self.line[start..self.pos]
            .parse::<u32>()
            .map(Some)
            .map_err(|_| MiError::malformed(self.line, start, "token out of range"))
    }

    fn class_name(&mut self) -> Result<&'a str> {
        let start = self.pos;
        while matches!(self.peek(), Some(b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'_' | b'-')) {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(self.error("missing class name"));
        }
        Ok(&self.line[start..self.pos])
    }

    fn results(&mut self) -> Result<Tuple> {
        let mut results = Tuple::new();
        let mut last_name: Option<&'a str> = None;
        while self.pos < self.bytes.len() {
            self.expect(b',', "expected ','")?;
            if self.peek() == Some(b'{') {
                // Older debuggers append extra breakpoint locations as bare tuples.
                let Some(name) = last_name else {
                    return Err(self.error("tuple without a preceding result"));
                };
                let value = self.value(0)?;
                results.insert(name, value);
                continue;
            }
            let (name, value) = self.result(0)?;
            results.insert(name, value);
            last_name = Some(name);
        }
        Ok(results)
    }

    fn result(&mut self, depth: usize) -> Result<(&'a str, Value)> {
        let name = self.name()?;
        self.expect(b'=', "expected '=' after result name")?;
        let value = self.value(depth)?;
        Ok((name, value))
    }

    fn name(&mut self) -> Result<&'a str> {
        let start = self.pos;
        while let Some(byte) = self.peek() {
            if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.') {
                self.pos += 1;
            } else {
                break;
            }
        }
        if start == self.pos {
            return Err(self.error("expected result name"));
        }
        Ok(&self.line[start..self.pos])
    }

    fn value(&mut self, depth: usize) -> Result<Value> {
        if depth > MAX_NESTING {
            return Err(self.error("value nesting too deep"));
        }
        match self.peek() {
            Some(b'"') => self.c_string().map(Value::String),
            Some(b'{') => self.tuple(depth + 1).map(Value::Tuple),
            Some(b'[') => self.list(depth + 1).map(Value::List),
            Some(_) => Err(self.error("expected value")),
            None => Err(self.error("unexpected end of line")),
        }
    }

    fn tuple(&mut self, depth: usize) -> Result<Tuple> {
        self.expect(b'{', "expected '{'")?;
        let mut tuple = Tuple::new();
        if self.eat(b'}') {
            return Ok(tuple);
        }
        loop {
            let (name, value) = self.result(depth)?;
            tuple.insert(name, value);
            match self.bump() {
                Some(b',') => continue,
                Some(b'}') => return Ok(tuple),
                Some(_) => {
                    self.pos -= 1;
                    return Err(self.error("expected ',' or '}' in tuple"));
                }
                None => return Err(self.error("unterminated tuple")),
            }
        }
    }

    fn list(&mut self, depth: usize) -> Result<List> {
        self.expect(b'[', "expected '['")?;
        let mut list = List::new();
        if self.eat(b']') {
            return Ok(list);
        }
        loop {
            if matches!(self.peek(), Some(b'"' | b'{' | b'[')) {
                let value = self.value(depth)?;
                list.push(None, value);
            } else {
                let (name, value) = self.result(depth)?;
                list.push(Some(SmolStr::new(name)), value);
            }
            match self.bump() {
                Some(b',') => continue,
                Some(b']') => return Ok(list),
                Some(_) => {
                    self.pos -= 1;
                    return Err(self.error("expected ',' or ']' in list"));
                }
                None => return Err(self.error("unterminated list")),
            }
        }
    }

    fn c_string(&mut self) -> Result<String> {
        self.expect(b'"', "expected '\"'")?;
        let mut out = Vec::new();
        loop {
            let Some(byte) = self.bump() else {
                return Err(self.error("unterminated string"));
            };
            match byte {
                b'"' => break,
                b'\\' => self.escape(&mut out)?,
                _ => out.push(byte),
            }
        }
        Ok(match String::from_utf8(out) {
            Ok(text) => text,
            Err(err) => String::from_utf8_lossy(err.as_bytes()).into_owned(),
        })
    }

    fn escape(&mut self, out: &mut Vec<u8>) -> Result<()> {
        let Some(byte) = self.bump() else {
            return Err(self.error("unterminated escape"));
        };
        match byte {
            b'n' => out.push(b'\n'),
            b't' => out.push(b'\t'),
            b'r' => out.push(b'\r'),
            b'a' => out.push(0x07),
            b'b' => out.push(0x08),
            b'f' => out.push(0x0c),
            b'v' => out.push(0x0b),
            b'e' => out.push(0x1b),
            b'0'..=b'7' => {
                let mut code = u32::from(byte - b'0');
                for _ in 0..2 {
                    match self.peek() {
                        Some(digit @ b'0'..=b'7') => {
                            code = code * 8 + u32::from(digit - b'0');
                            self.pos += 1;
                        }
                        _ => break,
                    }
                }
                let code = u8::try_from(code).map_err(|_| self.error("octal escape out of range"))?;
                out.push(code);
            }
            other => out.push(other),
        }
        Ok(())
    }
}
