use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Kind of a destination: FIFO queue or publish/subscribe topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DestinationKind {
    Queue,
    Topic,
}

impl DestinationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DestinationKind::Queue => "queue",
            DestinationKind::Topic => "topic",
        }
    }
}

/// A named, typed, addressable target for messages.
///
/// Identity is `(name, kind)`; the `temporary` flag marks destinations whose
/// lifetime is bound to the context that created them and does not take part
/// in equality or hashing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Destination {
    pub name: String,
    pub kind: DestinationKind,
    pub temporary: bool,
}

impl PartialEq for Destination {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.kind == other.kind
    }
}

impl Eq for Destination {}

impl std::hash::Hash for Destination {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.kind.hash(state);
    }
}

impl Destination {
    /// Create a durable queue destination.
    pub fn queue(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: DestinationKind::Queue,
            temporary: false,
        }
    }

    /// Create a durable topic destination.
    pub fn topic(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: DestinationKind::Topic,
            temporary: false,
        }
    }

    /// Create a temporary destination of the given kind.
    pub fn temporary(name: impl Into<String>, kind: DestinationKind) -> Self {
        Self {
            name: name.into(),
            kind,
            temporary: true,
        }
    }

    /// Parse a destination path such as `/queue/orders` or `/temp-topic/x`.
    ///
    /// Returns `None` when the leading segment is unknown or the name part is
    /// empty.
    pub fn parse(path: &str) -> Option<Self> {
        let rest = path.strip_prefix('/')?;
        let (prefix, name) = rest.split_once('/')?;
        if name.is_empty() {
            return None;
        }
        let (kind, temporary) = match prefix {
            "queue" => (DestinationKind::Queue, false),
            "topic" => (DestinationKind::Topic, false),
            "temp-queue" => (DestinationKind::Queue, true),
            "temp-topic" => (DestinationKind::Topic, true),
            _ => return None,
        };
        Some(Self {
            name: name.to_string(),
            kind,
            temporary,
        })
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match (self.kind, self.temporary) {
            (DestinationKind::Queue, false) => "queue",
            (DestinationKind::Topic, false) => "topic",
            (DestinationKind::Queue, true) => "temp-queue",
            (DestinationKind::Topic, true) => "temp-topic",
        };
        write!(f, "/{}/{}", prefix, self.name)
    }
}

/// Header value: a closed set of scalar variants so wire encoding stays
/// well-defined across languages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HeaderValue {
    Text(String),
    Int(i64),
    Float(f64),
    Binary(Bytes),
}

impl HeaderValue {
    /// Render the value as wire-protocol header text. Binary values render as
    /// lowercase hex so the mapping is lossless.
    pub fn wire_value(&self) -> String {
        match self {
            HeaderValue::Text(s) => s.clone(),
            HeaderValue::Int(i) => i.to_string(),
            HeaderValue::Float(f) => f.to_string(),
            HeaderValue::Binary(b) => b.iter().map(|byte| format!("{:02x}", byte)).collect(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            HeaderValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        HeaderValue::Text(value.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        HeaderValue::Text(value)
    }
}

impl From<i64> for HeaderValue {
    fn from(value: i64) -> Self {
        HeaderValue::Int(value)
    }
}

/// Insertion-ordered `name -> HeaderValue` mapping.
///
/// `set` replaces an existing entry in place so header order is stable across
/// a frame -> message -> frame round trip.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Headers {
    entries: Vec<(String, HeaderValue)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<HeaderValue>) {
        let name = name.into();
        let value = value.into();
        if let Some(entry) = self.entries.iter_mut().find(|(n, _)| *n == name) {
            entry.1 = value;
        } else {
            self.entries.push((name, value));
        }
    }

    pub fn get(&self, name: &str) -> Option<&HeaderValue> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn remove(&mut self, name: &str) -> Option<HeaderValue> {
        let idx = self.entries.iter().position(|(n, _)| n == name)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &HeaderValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A message exchanged through channels.
///
/// The payload is opaque bytes; headers carry application metadata.
/// Correlation id and reply-to are typed fields used by the request/reply
/// machinery. A `time_to_live_ms` of 0 means the message never expires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub payload: Bytes,
    pub headers: Headers,
    pub correlation_id: Option<String>,
    pub reply_to: Option<Destination>,
    pub time_to_live_ms: u64,
    pub timestamp_ms: u64,
}

impl Message {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            headers: Headers::new(),
            correlation_id: None,
            reply_to: None,
            time_to_live_ms: 0,
            timestamp_ms: now_millis(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<HeaderValue>) -> Self {
        self.headers.set(name, value);
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_reply_to(mut self, destination: Destination) -> Self {
        self.reply_to = Some(destination);
        self
    }

    pub fn with_ttl_ms(mut self, ttl_ms: u64) -> Self {
        self.time_to_live_ms = ttl_ms;
        self
    }

    /// Whether the message has outlived its time-to-live as of `now_ms`.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.time_to_live_ms != 0 && self.timestamp_ms + self.time_to_live_ms <= now_ms
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
