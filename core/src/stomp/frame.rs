//! Wire frame model: command, headers, body.

use bytes::Bytes;
use std::fmt;

/// Frame commands understood by the adapter.
///
/// Client-originated: CONNECT, SEND, SUBSCRIBE, UNSUBSCRIBE, ACK, NACK,
/// DISCONNECT. Server-originated: CONNECTED, MESSAGE, RECEIPT, ERROR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Connect,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Message,
    Ack,
    Nack,
    Disconnect,
    Receipt,
    Error,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Connected => "CONNECTED",
            Command::Send => "SEND",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Message => "MESSAGE",
            Command::Ack => "ACK",
            Command::Nack => "NACK",
            Command::Disconnect => "DISCONNECT",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CONNECT" => Some(Command::Connect),
            "CONNECTED" => Some(Command::Connected),
            "SEND" => Some(Command::Send),
            "SUBSCRIBE" => Some(Command::Subscribe),
            "UNSUBSCRIBE" => Some(Command::Unsubscribe),
            "MESSAGE" => Some(Command::Message),
            "ACK" => Some(Command::Ack),
            "NACK" => Some(Command::Nack),
            "DISCONNECT" => Some(Command::Disconnect),
            "RECEIPT" => Some(Command::Receipt),
            "ERROR" => Some(Command::Error),
            _ => None,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Well-known header names.
pub mod headers {
    pub const DESTINATION: &str = "destination";
    pub const ID: &str = "id";
    pub const ACK: &str = "ack";
    pub const SUBSCRIPTION: &str = "subscription";
    pub const MESSAGE_ID: &str = "message-id";
    pub const CONTENT_LENGTH: &str = "content-length";
    pub const RECEIPT: &str = "receipt";
    pub const RECEIPT_ID: &str = "receipt-id";
    pub const CORRELATION_ID: &str = "correlation-id";
    pub const REPLY_TO: &str = "reply-to";
    pub const TTL: &str = "ttl";
    pub const SESSION: &str = "session";
    pub const SERVER: &str = "server";
    pub const MESSAGE: &str = "message";
}

/// Headers derived or re-derived by the adapter rather than copied between
/// frames and messages.
pub const RESERVED_HEADERS: [&str; 4] = [
    headers::DESTINATION,
    headers::CONTENT_LENGTH,
    headers::SUBSCRIPTION,
    headers::MESSAGE_ID,
];

/// One unit of the wire protocol: command line, header lines, body.
///
/// Headers keep arrival order; lookups return the first match, per the
/// first-wins rule for repeated header names.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub command: Command,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// First value for the named header, if present.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Build an ERROR frame with a short `message` header and a longer body.
    pub fn error(short: &str, detail: &str) -> Self {
        Frame::new(Command::Error)
            .with_header(headers::MESSAGE, short)
            .with_body(detail.to_string())
    }
}
