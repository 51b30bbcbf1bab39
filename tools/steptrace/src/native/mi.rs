//! GDB/MI output records.
//!
//! ```text
//! 12^done,frame={level="0",func="main",file="a.cpp",fullname="/w/a.cpp",line="9"}
//! *stopped,reason="end-stepping-range",thread-id="1"
//! ~"text for the console\n"
//! (gdb)
//! ```

use crate::errors::TraceError;

pub type MiResults = Vec<(String, MiValue)>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MiValue {
    Const(String),
    Tuple(MiResults),
    /// A `name=value` member of a list is stored as a one-entry tuple.
    List(Vec<MiValue>),
}

impl MiValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Const(text) => Some(text.as_str()),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[MiValue]> {
        match self {
            Self::List(items) => Some(items.as_slice()),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&MiValue> {
        match self {
            Self::Tuple(results) => find(results, key),
            _ => None,
        }
    }
}

pub fn find<'a>(results: &'a [(String, MiValue)], key: &str) -> Option<&'a MiValue> {
    results
        .iter()
        .find(|(name, _)| name == key)
        .map(|(_, value)| value)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncKind {
    Exec,
    Status,
    Notify,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Console,
    Target,
    Log,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MiRecord {
    Result {
        token: Option<u64>,
        class: String,
        results: MiResults,
    },
    Async {
        kind: AsyncKind,
        token: Option<u64>,
        class: String,
        results: MiResults,
    },
    Stream {
        kind: StreamKind,
        text: String,
    },
    Prompt,
    /// Anything that is not MI syntax, typically the debuggee writing to the
    /// debugger's own terminal.
    Unrecognized(String),
}

pub fn parse_record(line: &str) -> Result<MiRecord, TraceError> {
    let trimmed = line.trim_end();
    if trimmed == "(gdb)" {
        return Ok(MiRecord::Prompt);
    }

    let mut cursor = Cursor::new(trimmed);
    let token = cursor.token();
    let Some(marker) = cursor.bump() else {
        return Ok(MiRecord::Unrecognized(line.to_string()));
    };

    let record = match marker {
        b'^' => {
            let class = cursor.identifier()?;
            MiRecord::Result {
                token,
                class,
                results: cursor.results_tail()?,
            }
        }
        b'*' | b'+' | b'=' => {
            let kind = match marker {
                b'*' => AsyncKind::Exec,
                b'+' => AsyncKind::Status,
                _ => AsyncKind::Notify,
            };
            let class = cursor.identifier()?;
            MiRecord::Async {
                kind,
                token,
                class,
                results: cursor.results_tail()?,
            }
        }
        b'~' | b'@' | b'&' if token.is_none() => {
            let kind = match marker {
                b'~' => StreamKind::Console,
                b'@' => StreamKind::Target,
                _ => StreamKind::Log,
            };
            MiRecord::Stream {
                kind,
                text: cursor.cstring()?,
            }
        }
        _ => return Ok(MiRecord::Unrecognized(line.to_string())),
    };

    if !cursor.at_end() {
        return Err(cursor.error("trailing characters"));
    }
    Ok(record)
}

/// Quotes `text` as an MI c-string argument.
pub fn quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for ch in text.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
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

    fn error(&self, what: &str) -> TraceError {
        TraceError::Protocol(format!(
            "malformed MI record ({what} at byte {}): {}",
            self.pos,
            self.line.chars().take(256).collect::<String>()
        ))
    }

    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.pos += 1;
        Some(byte)
    }

    fn expect(&mut self, byte: u8) -> Result<(), TraceError> {
        if self.bump() == Some(byte) {
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", byte as char)))
        }
    }

    fn token(&mut self) -> Option<u64> {
        let start = self.pos;
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.pos += 1;
        }
        if start == self.pos {
            return None;
        }
        self.line[start..self.pos].parse().ok()
    }

    fn identifier(&mut self) -> Result<String, TraceError> {
        let start = self.pos;
        while matches!(self.peek(), Some(b) if b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
        {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(self.error("expected identifier"));
        }
        Ok(self.line[start..self.pos].to_string())
    }

    fn results_tail(&mut self) -> Result<MiResults, TraceError> {
        let mut results = Vec::new();
        while self.peek() == Some(b',') {
            self.pos += 1;
            results.push(self.result()?);
        }
        Ok(results)
    }

    fn result(&mut self) -> Result<(String, MiValue), TraceError> {
        let name = self.identifier()?;
        self.expect(b'=')?;
        Ok((name, self.value()?))
    }

    fn value(&mut self) -> Result<MiValue, TraceError> {
        match self.peek() {
            Some(b'"') => Ok(MiValue::Const(self.cstring()?)),
            Some(b'{') => self.tuple(),
            Some(b'[') => self.list(),
            _ => Err(self.error("expected value")),
        }
    }

    fn tuple(&mut self) -> Result<MiValue, TraceError> {
        self.expect(b'{')?;
        let mut results = Vec::new();
        if self.peek() == Some(b'}') {
            self.pos += 1;
            return Ok(MiValue::Tuple(results));
        }
        loop {
            results.push(self.result()?);
            match self.bump() {
                Some(b',') => continue,
                Some(b'}') => return Ok(MiValue::Tuple(results)),
                _ => return Err(self.error("unterminated tuple")),
            }
        }
    }

    fn list(&mut self) -> Result<MiValue, TraceError> {
        self.expect(b'[')?;
        let mut items = Vec::new();
        if self.peek() == Some(b']') {
            self.pos += 1;
            return Ok(MiValue::List(items));
        }
        loop {
            let item = match self.peek() {
                Some(b'"') | Some(b'{') | Some(b'[') => self.value()?,
                _ => {
                    let (name, value) = self.result()?;
                    MiValue::Tuple(vec![(name, value)])
                }
            };
            items.push(item);
            match self.bump() {
                Some(b',') => continue,
                Some(b']') => return Ok(MiValue::List(items)),
                _ => return Err(self.error("unterminated list")),
            }
        }
    }

    fn cstring(&mut self) -> Result<String, TraceError> {
        self.expect(b'"')?;
        let mut out = Vec::new();
        loop {
            let Some(byte) = self.bump() else {
                return Err(self.error("unterminated string"));
            };
            match byte {
                b'"' => break,
                b'\\' => {
                    let Some(escaped) = self.bump() else {
                        return Err(self.error("dangling escape"));
                    };
                    match escaped {
                        b'n' => out.push(b'\n'),
                        b't' => out.push(b'\t'),
                        b'r' => out.push(b'\r'),
                        b'a' => out.push(0x07),
                        b'b' => out.push(0x08),
                        b'f' => out.push(0x0c),
                        b'v' => out.push(0x0b),
                        b'e' => out.push(0x1b),
                        b'0'..=b'7' => {
                            let mut code = u32::from(escaped - b'0');
                            for _ in 0..2 {
                                match self.peek() {
                                    Some(digit @ b'0'..=b'7') => {
                                        code = code * 8 + u32::from(digit - b'0');
                                        self.pos += 1;
                                    }
                                    _ => break,
                                }
                            }
                            out.push((code & 0xff) as u8);
                        }
                        other => out.push(other),
                    }
                }
                other => out.push(other),
            }
        }
        Ok(String::from_utf8_lossy(&out).into_owned())
    }
}
