//! Conversion between wire frames and channel messages.
//!
//! All mapping of frames to messages and headers lives here, in pure
//! functions: the session state machine never touches header conventions
//! directly. Reserved headers (`destination`, `content-length`,
//! `subscription`, `message-id`) are derived on the way out and never copied
//! into a message; everything else round-trips.

use super::frame::{headers, Command, Frame, RESERVED_HEADERS};
use crate::protocol::{Destination, Message};
use thiserror::Error;

/// A frame that cannot be mapped to a message.
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("missing mandatory header: {0}")]
    MissingHeader(&'static str),

    #[error("invalid destination path: {0}")]
    InvalidDestination(String),

    #[error("invalid {name} header: {value}")]
    InvalidHeader { name: &'static str, value: String },
}

pub type Result<T> = std::result::Result<T, ConversionError>;

/// Bidirectional, pure frame/message mapping.
pub struct FrameConverter;

impl FrameConverter {
    /// Map an inbound SEND frame to its destination and message.
    ///
    /// `correlation-id`, `reply-to`, and `ttl` headers lift into the typed
    /// message fields; reserved headers are dropped; all other headers are
    /// carried as text values.
    pub fn from_frame(frame: &Frame) -> Result<(Destination, Message)> {
        let path = frame
            .header(headers::DESTINATION)
            .ok_or(ConversionError::MissingHeader(headers::DESTINATION))?;
        let destination = Destination::parse(path)
            .ok_or_else(|| ConversionError::InvalidDestination(path.to_string()))?;

        let mut message = Message::new(frame.body.clone());
        for (name, value) in &frame.headers {
            if RESERVED_HEADERS.contains(&name.as_str()) {
                continue;
            }
            match name.as_str() {
                headers::CORRELATION_ID => message.correlation_id = Some(value.clone()),
                headers::REPLY_TO => {
                    message.reply_to = Some(Destination::parse(value).ok_or_else(|| {
                        ConversionError::InvalidDestination(value.to_string())
                    })?);
                }
                headers::TTL => {
                    message.time_to_live_ms =
                        value.parse().map_err(|_| ConversionError::InvalidHeader {
                            name: headers::TTL,
                            value: value.clone(),
                        })?;
                }
                _ => message.headers.set(name.as_str(), value.as_str()),
            }
        }
        Ok((destination, message))
    }

    /// Map a message delivered from `destination` to an outbound MESSAGE
    /// frame. Total over any valid message; reserved headers are re-derived.
    pub fn to_frame(destination: &Destination, message: &Message) -> Frame {
        let mut frame = Frame::new(Command::Message)
            .with_header(headers::DESTINATION, destination.to_string())
            .with_header(headers::CONTENT_LENGTH, message.payload.len().to_string());

        if let Some(correlation_id) = &message.correlation_id {
            frame = frame.with_header(headers::CORRELATION_ID, correlation_id.clone());
        }
        if let Some(reply_to) = &message.reply_to {
            frame = frame.with_header(headers::REPLY_TO, reply_to.to_string());
        }
        if message.time_to_live_ms != 0 {
            frame = frame.with_header(headers::TTL, message.time_to_live_ms.to_string());
        }
        for (name, value) in message.headers.iter() {
            frame = frame.with_header(name, value.wire_value());
        }

        frame.with_body(message.payload.clone())
    }
}
