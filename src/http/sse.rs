use std::collections::BTreeMap;

/// Tells the streaming loop whether to keep reading after an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SseControl {
    Continue,
    Stop,
}

/// One dispatched server-sent event.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SseEvent {
    /// The `event` field; "message" when the stream never set one.
    pub event_type: String,
    /// All `data` lines, joined with `\n`.
    pub data: String,
    pub id: String,
    /// The `retry` field, verbatim; reconnection is the caller's business.
    pub retry: String,
    /// Fields outside the WHATWG set, by name.
    pub fields: BTreeMap<String, String>,
}

impl SseEvent {
    /// Renders the event back into its canonical text-record form.
    pub fn to_record(&self) -> String {
        let mut record = String::new();
        if self.event_type != "message" && !self.event_type.is_empty() {
            record.push_str("event: ");
            record.push_str(&self.event_type);
            record.push('\n');
        }
        if !self.id.is_empty() {
            record.push_str("id: ");
            record.push_str(&self.id);
            record.push('\n');
        }
        if !self.retry.is_empty() {
            record.push_str("retry: ");
            record.push_str(&self.retry);
            record.push('\n');
        }
        for line in self.data.split('\n') {
            if !self.data.is_empty() {
                record.push_str("data: ");
                record.push_str(line);
                record.push('\n');
            }
        }
        record
    }
}

/// Incremental SSE stream parser. Bytes go in via [`SseParser::feed`] in
/// arbitrary slices; completed events come out in dispatch order. Feeding
/// the stream one byte at a time yields the same events as feeding it whole.
#[derive(Debug, Default)]
pub struct SseParser {
    line: Vec<u8>,
    event_type: Option<String>,
    data_lines: Vec<String>,
    id: Option<String>,
    retry: Option<String>,
    fields: BTreeMap<String, String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8], events: &mut Vec<SseEvent>) {
        for &byte in bytes {
            if byte == b'\n' {
                let mut line = std::mem::take(&mut self.line);
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                self.take_line(&line, events);
            } else {
                self.line.push(byte);
            }
        }
    }

    /// Dispatches the trailing unterminated event at end-of-stream, if any.
    pub fn finish(&mut self, events: &mut Vec<SseEvent>) {
        if !self.line.is_empty() {
            let mut line = std::mem::take(&mut self.line);
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            self.take_line(&line, events);
        }
        if let Some(event) = self.dispatch() {
            events.push(event);
        }
    }

    fn take_line(&mut self, line: &[u8], events: &mut Vec<SseEvent>) {
        if line.is_empty() {
            if let Some(event) = self.dispatch() {
                events.push(event);
            }
            return;
        }
        if line[0] == b':' {
            return;
        }

        let text = String::from_utf8_lossy(line);
        let (field, value) = match text.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (text.as_ref(), ""),
        };

        match field {
            "event" => self.event_type = Some(value.to_owned()),
            "data" => self.data_lines.push(value.to_owned()),
            "id" => self.id = Some(value.to_owned()),
            "retry" => self.retry = Some(value.to_owned()),
            other => {
                self.fields.insert(other.to_owned(), value.to_owned());
            }
        }
    }

    /// An event exists only if one of `data`, `event`, `id`, `retry` was
    /// set since the last dispatch; comment-only or custom-field-only blocks
    /// produce nothing.
    fn dispatch(&mut self) -> Option<SseEvent> {
        let seen = self.event_type.is_some()
            || !self.data_lines.is_empty()
            || self.id.is_some()
            || self.retry.is_some();
        let fields = std::mem::take(&mut self.fields);
        if !seen {
            return None;
        }

        let event_type = match self.event_type.take() {
            Some(event_type) if !event_type.is_empty() => event_type,
            _ => "message".to_owned(),
        };
        let data = std::mem::take(&mut self.data_lines).join("\n");
        Some(SseEvent {
            event_type,
            data,
            id: self.id.take().unwrap_or_default(),
            retry: self.retry.take().unwrap_or_default(),
            fields,
        })
    }
}

/// Parses a complete stream in one pass.
pub fn parse_sse_stream(stream: &[u8]) -> Vec<SseEvent> {
    let mut parser = SseParser::new();
    let mut events = Vec::new();
    parser.feed(stream, &mut events);
    parser.finish(&mut events);
    events
}
