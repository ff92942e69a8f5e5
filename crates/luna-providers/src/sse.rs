//! Incremental Server-Sent Events decoder.
//!
//! Handles:
//! - Byte buffering (UTF-8 sequences may straddle network chunks)
//! - Line splitting (both `\n` and `\r\n`)
//! - Field parsing (`data:`, `event:`, `id:`, `retry:`, `:` comments)
//! - Event assembly (multi-line `data:` until a blank line)
//!
//! Providers feed raw body bytes in and decode each event's JSON according
//! to their own format.

/// An SSE line extracted from the stream.
#[derive(Debug, Clone, PartialEq)]
enum SseLine {
    Data(String),
    Event(String),
    Id(String),
    Retry(u64),
    Empty,
    Comment,
}

/// A parsed SSE event (assembled from one or more lines).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SseEvent {
    pub data: String,
    pub event: Option<String>,
    pub id: Option<String>,
    pub retry: Option<u64>,
}

fn field<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    let value = line.strip_prefix(name)?.strip_prefix(':')?;
    Some(value.strip_prefix(' ').unwrap_or(value))
}

fn parse_line(line: &str) -> SseLine {
    if line.is_empty() {
        return SseLine::Empty;
    }
    if line.starts_with(':') {
        return SseLine::Comment;
    }
    if let Some(data) = field(line, "data") {
        return SseLine::Data(data.to_string());
    }
    if let Some(event) = field(line, "event") {
        return SseLine::Event(event.to_string());
    }
    if let Some(id) = field(line, "id") {
        return SseLine::Id(id.to_string());
    }
    if let Some(retry) = field(line, "retry") {
        if let Ok(value) = retry.trim().parse::<u64>() {
            return SseLine::Retry(value);
        }
    }
    // Unknown field
    SseLine::Comment
}

/// Push-based SSE decoder. Feed it body bytes, collect complete events.
#[derive(Debug, Default)]
pub struct SseDecoder {
    bytes: Vec<u8>,
    data_lines: Vec<String>,
    event: Option<String>,
    id: Option<String>,
    retry: Option<u64>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes and return every event completed by them.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.bytes.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.bytes.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.bytes.drain(..=pos).collect();
            let mut line = String::from_utf8_lossy(&raw[..raw.len() - 1]).into_owned();
            if line.ends_with('\r') {
                line.pop();
            }
            if let Some(event) = self.apply(parse_line(&line)) {
                events.push(event);
            }
        }
        events
    }

    /// Flush a trailing event that was never terminated by a blank line.
    pub fn finish(&mut self) -> Option<SseEvent> {
        if !self.bytes.is_empty() {
            let rest = std::mem::take(&mut self.bytes);
            let line = String::from_utf8_lossy(&rest).into_owned();
            let line = line.trim_end_matches('\r');
            if let Some(event) = self.apply(parse_line(line)) {
                return Some(event);
            }
        }
        self.take_event()
    }

    fn apply(&mut self, line: SseLine) -> Option<SseEvent> {
        match line {
            SseLine::Data(data) => self.data_lines.push(data),
            SseLine::Event(event) => self.event = Some(event),
            SseLine::Id(id) => self.id = Some(id),
            SseLine::Retry(retry) => self.retry = Some(retry),
            SseLine::Comment => {}
            SseLine::Empty => return self.take_event(),
        }
        None
    }

    fn take_event(&mut self) -> Option<SseEvent> {
        let has_content = !self.data_lines.is_empty()
            || self.event.is_some()
            || self.id.is_some()
            || self.retry.is_some();
        if !has_content {
            return None;
        }
        let data = self.data_lines.join("\n");
        self.data_lines.clear();
        Some(SseEvent {
            data,
            event: self.event.take(),
            id: self.id.take(),
            retry: self.retry.take(),
        })
    }
}
