//! Event definitions
//!
//! An [`Event`] is one durable record of a key mutation. Both backends store
//! the same events; only the file backend uses the line encoding below.
//!
//! ## Line Format
//! ```text
//! ┌──────────┬─────┬──────────┬─────┬───────┬─────┬────────┬────┐
//! │ sequence │ TAB │ typecode │ TAB │  key  │ TAB │ value  │ LF │
//! └──────────┴─────┴──────────┴─────┴───────┴─────┴────────┴────┘
//! ```
//! Type codes: `1` = Delete, `2` = Put (`0` is reserved).
//! Backslash, tab, LF and CR inside keys and values are escaped as
//! `\\`, `\t`, `\n` and `\r`.

use std::fmt;

use crate::error::{Result, TlogError};

/// Kind of mutation recorded by an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EventType {
    Delete = 1,
    Put = 2,
}

impl EventType {
    /// Integer code used on disk and in the `event_type` column
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Decode an on-disk type code
    pub fn from_code(code: i64) -> Result<Self> {
        match code {
            1 => Ok(EventType::Delete),
            2 => Ok(EventType::Put),
            other => Err(TlogError::InvalidEvent(format!(
                "unknown event type code {}",
                other
            ))),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::Delete => f.write_str("DELETE"),
            EventType::Put => f.write_str("PUT"),
        }
    }
}

/// A single entry in the transaction log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Position in the log; `0` until the backend assigns one
    pub sequence: u64,

    /// Put or Delete
    pub event_type: EventType,

    /// Key being mutated (never empty in a valid event)
    pub key: String,

    /// New value for Put, always empty for Delete
    pub value: String,
}

impl Event {
    /// Create an unsequenced Put event
    pub fn put(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            sequence: 0,
            event_type: EventType::Put,
            key: key.into(),
            value: value.into(),
        }
    }

    /// Create an unsequenced Delete event
    pub fn delete(key: impl Into<String>) -> Self {
        Self {
            sequence: 0,
            event_type: EventType::Delete,
            key: key.into(),
            value: String::new(),
        }
    }

    /// Return the same event stamped with `sequence`
    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    /// Check the event can be recorded
    pub fn validate(&self) -> Result<()> {
        if self.key.is_empty() {
            return Err(TlogError::InvalidEvent(format!(
                "{} event with empty key",
                self.event_type
            )));
        }
        Ok(())
    }

    /// Encode as one log line, including the trailing newline
    pub fn to_line(&self) -> String {
        let mut line = String::with_capacity(24 + self.key.len() + self.value.len());
        line.push_str(&self.sequence.to_string());
        line.push('\t');
        line.push_str(&self.event_type.code().to_string());
        line.push('\t');
        escape_into(&self.key, &mut line);
        line.push('\t');
        if self.event_type == EventType::Put {
            escape_into(&self.value, &mut line);
        }
        line.push('\n');
        line
    }

    /// Parse one log line (without its newline).
    ///
    /// `line_no` is 1-based and only used for error reporting.
    pub fn from_line(line: &str, line_no: u64) -> Result<Self> {
        let corrupt = |reason: String| TlogError::Corruption {
            line: line_no,
            reason,
        };

        let mut fields = line.splitn(4, '\t');
        let (Some(sequence), Some(code), Some(key), Some(value)) =
            (fields.next(), fields.next(), fields.next(), fields.next())
        else {
            return Err(corrupt(format!("expected 4 tab-separated fields in {:?}", line)));
        };

        // Written values never hold a raw tab, so one here means two records
        // ran together on a single line.
        if value.contains('\t') {
            return Err(corrupt(format!("unescaped tab in value field of {:?}", line)));
        }

        let sequence: u64 = sequence
            .parse()
            .map_err(|e| corrupt(format!("bad sequence {:?}: {}", sequence, e)))?;
        let code: i64 = code
            .parse()
            .map_err(|e| corrupt(format!("bad event type {:?}: {}", code, e)))?;
        let event_type = EventType::from_code(code).map_err(|e| corrupt(e.to_string()))?;

        let key = unescape(key).map_err(&corrupt)?;
        if key.is_empty() {
            return Err(corrupt("empty key".to_string()));
        }

        // Delete values are meaningless; whatever was stored is dropped.
        let value = match event_type {
            EventType::Put => unescape(value).map_err(&corrupt)?,
            EventType::Delete => String::new(),
        };

        Ok(Self {
            sequence,
            event_type,
            key,
            value,
        })
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.event_type {
            EventType::Put => write!(f, "#{} PUT {} = {}", self.sequence, self.key, self.value),
            EventType::Delete => write!(f, "#{} DELETE {}", self.sequence, self.key),
        }
    }
}

fn escape_into(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
}

fn unescape(field: &str) -> std::result::Result<String, String> {
    if !field.contains('\\') {
        return Ok(field.to_string());
    }

    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => return Err(format!("unknown escape \\{}", other)),
            None => return Err("dangling escape at end of field".to_string()),
        }
    }
    Ok(out)
}
