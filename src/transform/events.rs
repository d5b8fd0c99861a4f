//! Pull-based JSON event reader.
//!
//! Turns a byte stream into a flat sequence of structural and scalar
//! [`Event`]s without building a document. Memory use is bounded by the
//! nesting depth and the longest single string or number, never by the size
//! of the input. Scalar text is kept verbatim; numbers in particular are
//! handed out as their source text so callers choose how to parse them.

use crate::error::{Error, Result};
use std::io::BufRead;

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    StartObject,
    EndObject,
    StartArray,
    EndArray,
    /// Object member name; the member's value follows.
    Key(String),
    String(String),
    /// Number in its source text form.
    Number(String),
    Bool(bool),
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Container {
    Object,
    Array,
}

/// What the grammar allows next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    Value,
    /// Right after `[`
    ValueOrEnd,
    /// Right after `{`
    KeyOrEnd,
    /// After a `,` inside an object
    Key,
    Colon,
    CommaOrEnd,
    Done,
}

pub struct JsonEvents<R> {
    reader: R,
    containers: Vec<Container>,
    expect: Expect,
    offset: u64,
    failed: bool,
}

impl<R: BufRead> JsonEvents<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            containers: Vec::new(),
            expect: Expect::Value,
            offset: 0,
            failed: false,
        }
    }

    /// Bytes consumed so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Current container nesting depth.
    pub fn depth(&self) -> usize {
        self.containers.len()
    }

    fn peek(&mut self) -> Result<Option<u8>> {
        let buf = self.reader.fill_buf()?;
        Ok(buf.first().copied())
    }

    fn bump(&mut self) {
        self.reader.consume(1);
        self.offset += 1;
    }

    fn syntax(&self, message: &str) -> Error {
        Error::InvalidResponse(format!("malformed JSON at byte {}: {}", self.offset, message))
    }

    fn skip_whitespace(&mut self) -> Result<Option<u8>> {
        loop {
            match self.peek()? {
                Some(b' ' | b'\n' | b'\r' | b'\t') => self.bump(),
                other => return Ok(other),
            }
        }
    }

    fn after_value(&mut self) {
        self.expect = if self.containers.is_empty() {
            Expect::Done
        } else {
            Expect::CommaOrEnd
        };
    }

    fn close(&mut self, container: Container) -> Result<Event> {
        if self.containers.pop() != Some(container) {
            return Err(self.syntax("mismatched closing bracket"));
        }
        self.bump();
        self.after_value();
        Ok(match container {
            Container::Object => Event::EndObject,
            Container::Array => Event::EndArray,
        })
    }

    fn read_value(&mut self) -> Result<Event> {
        match self.skip_whitespace()? {
            Some(b'{') => {
                self.bump();
                self.containers.push(Container::Object);
                self.expect = Expect::KeyOrEnd;
                Ok(Event::StartObject)
            }
            Some(b'[') => {
                self.bump();
                self.containers.push(Container::Array);
                self.expect = Expect::ValueOrEnd;
                Ok(Event::StartArray)
            }
            Some(b'"') => {
                let s = self.read_string()?;
                self.after_value();
                Ok(Event::String(s))
            }
            Some(b'-' | b'0'..=b'9') => {
                let n = self.read_number()?;
                self.after_value();
                Ok(Event::Number(n))
            }
            Some(b't') => {
                self.read_literal(b"true")?;
                self.after_value();
                Ok(Event::Bool(true))
            }
            Some(b'f') => {
                self.read_literal(b"false")?;
                self.after_value();
                Ok(Event::Bool(false))
            }
            Some(b'n') => {
                self.read_literal(b"null")?;
                self.after_value();
                Ok(Event::Null)
            }
            Some(_) => Err(self.syntax("expected a value")),
            None => Err(self.syntax("unexpected end of input")),
        }
    }

    fn read_string(&mut self) -> Result<String> {
        self.bump(); // opening quote
        let mut raw = Vec::new();
        let mut has_escape = false;
        let mut escaped = false;
        loop {
            let byte = match self.peek()? {
                Some(b) => b,
                None => return Err(self.syntax("unterminated string")),
            };
            self.bump();
            if escaped {
                escaped = false;
                raw.push(byte);
                continue;
            }
            match byte {
                b'"' => break,
                b'\\' => {
                    has_escape = true;
                    escaped = true;
                    raw.push(byte);
                }
                0x00..=0x1f => return Err(self.syntax("control character in string")),
                _ => raw.push(byte),
            }
        }

        if !has_escape {
            return String::from_utf8(raw).map_err(|_| self.syntax("invalid UTF-8 in string"));
        }
        // Escapes are rare in this data; let serde_json decode them.
        raw.insert(0, b'"');
        raw.push(b'"');
        serde_json::from_slice::<String>(&raw).map_err(|e| self.syntax(&e.to_string()))
    }

    fn read_number(&mut self) -> Result<String> {
        let mut text = String::new();
        while let Some(byte) = self.peek()? {
            match byte {
                b'0'..=b'9' | b'-' | b'+' | b'.' | b'e' | b'E' => {
                    text.push(byte as char);
                    self.bump();
                }
                _ => break,
            }
        }
        if text.parse::<f64>().is_err() {
            return Err(self.syntax(&format!("invalid number {:?}", text)));
        }
        Ok(text)
    }

    fn read_literal(&mut self, literal: &[u8]) -> Result<()> {
        for expected in literal {
            match self.peek()? {
                Some(b) if b == *expected => self.bump(),
                _ => return Err(self.syntax("invalid literal")),
            }
        }
        Ok(())
    }

    fn next_event(&mut self) -> Result<Option<Event>> {
        loop {
            match self.expect {
                Expect::Done => {
                    return match self.skip_whitespace()? {
                        None => Ok(None),
                        Some(_) => Err(self.syntax("trailing characters after document")),
                    };
                }
                Expect::Value => return self.read_value().map(Some),
                Expect::ValueOrEnd => {
                    if self.skip_whitespace()? == Some(b']') {
                        return self.close(Container::Array).map(Some);
                    }
                    return self.read_value().map(Some);
                }
                Expect::KeyOrEnd | Expect::Key => {
                    match self.skip_whitespace()? {
                        Some(b'}') if self.expect == Expect::KeyOrEnd => {
                            return self.close(Container::Object).map(Some);
                        }
                        Some(b'"') => {
                            let key = self.read_string()?;
                            self.expect = Expect::Colon;
                            return Ok(Some(Event::Key(key)));
                        }
                        _ => return Err(self.syntax("expected object key")),
                    }
                }
                Expect::Colon => {
                    if self.skip_whitespace()? != Some(b':') {
                        return Err(self.syntax("expected ':'"));
                    }
                    self.bump();
                    self.expect = Expect::Value;
                }
                Expect::CommaOrEnd => {
                    let top = self.containers.last().copied();
                    match (self.skip_whitespace()?, top) {
                        (Some(b','), Some(Container::Object)) => {
                            self.bump();
                            self.expect = Expect::Key;
                        }
                        (Some(b','), Some(Container::Array)) => {
                            self.bump();
                            self.expect = Expect::Value;
                        }
                        (Some(b'}'), Some(Container::Object)) => {
                            return self.close(Container::Object).map(Some)
                        }
                        (Some(b']'), Some(Container::Array)) => {
                            return self.close(Container::Array).map(Some)
                        }
                        (None, _) => return Err(self.syntax("unexpected end of input")),
                        _ => return Err(self.syntax("expected ',' or closing bracket")),
                    }
                }
            }
        }
    }
}

impl<R: BufRead> Iterator for JsonEvents<R> {
    type Item = Result<Event>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_event() {
            Ok(Some(event)) => Some(Ok(event)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
