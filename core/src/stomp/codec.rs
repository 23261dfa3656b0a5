//! Wire codec: text frames over TCP.
//!
//! Frame layout: a command line, zero or more `name:value` header lines, a
//! blank line, then the body terminated by a NUL byte. When a
//! `content-length` header is present the body length is taken from it (so
//! bodies may contain NUL bytes); otherwise the body runs to the first NUL.
//! Bare newlines between frames are keepalives and are skipped.

use super::frame::{headers, Command, Frame};
use bytes::{Buf, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// Codec-level failures. These desynchronize framing, so the session treats
/// them as fatal for the connection.
#[derive(Debug, Error)]
pub enum StompCodecError {
    #[error("frame exceeds maximum size of {max} bytes")]
    FrameTooLarge { max: usize },

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("malformed header line: {0}")]
    MalformedHeader(String),

    #[error("invalid content-length: {0}")]
    InvalidContentLength(String),

    #[error("frame body missing NUL terminator")]
    MissingTerminator,

    #[error("command line is not valid UTF-8")]
    InvalidEncoding,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Text frame codec with a configurable frame size limit.
pub struct StompCodec {
    max_frame_size: usize,
}

impl StompCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

/// Unescape a header value: `\n`, `\c`, and `\\` encode newline, colon, and
/// backslash.
fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('c') => out.push(':'),
                Some('\\') => out.push('\\'),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            ':' => out.push_str("\\c"),
            '\\' => out.push_str("\\\\"),
            other => out.push(other),
        }
    }
    out
}

impl Decoder for StompCodec {
    type Item = Frame;
    type Error = StompCodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, Self::Error> {
        // Keepalive newlines between frames.
        while matches!(src.first(), Some(b'\n') | Some(b'\r')) {
            src.advance(1);
        }
        if src.is_empty() {
            return Ok(None);
        }

        // Locate the blank line separating headers from body.
        let header_end = match find_blank_line(src) {
            Some(idx) => idx,
            None => {
                if src.len() > self.max_frame_size {
                    return Err(StompCodecError::FrameTooLarge {
                        max: self.max_frame_size,
                    });
                }
                return Ok(None);
            }
        };

        let prelude = std::str::from_utf8(&src[..header_end])
            .map_err(|_| StompCodecError::InvalidEncoding)?;
        let mut lines = prelude.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l));

        let command_line = lines.next().unwrap_or("");
        let command = Command::parse(command_line)
            .ok_or_else(|| StompCodecError::UnknownCommand(command_line.to_string()))?;

        let mut header_list = Vec::new();
        let mut content_length: Option<usize> = None;
        for line in lines {
            if line.is_empty() {
                continue;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| StompCodecError::MalformedHeader(line.to_string()))?;
            let value = unescape(value);
            if name == headers::CONTENT_LENGTH && content_length.is_none() {
                content_length = Some(
                    value
                        .parse()
                        .map_err(|_| StompCodecError::InvalidContentLength(value.clone()))?,
                );
            }
            header_list.push((name.to_string(), value));
        }

        // Body start is just past the blank line.
        let body_start = header_end + blank_line_width(src, header_end);

        let (body_len, frame_len) = match content_length {
            Some(len) => {
                let frame_len = body_start + len + 1;
                if frame_len > self.max_frame_size {
                    return Err(StompCodecError::FrameTooLarge {
                        max: self.max_frame_size,
                    });
                }
                if src.len() < frame_len {
                    return Ok(None);
                }
                if src[body_start + len] != 0 {
                    return Err(StompCodecError::MissingTerminator);
                }
                (len, frame_len)
            }
            None => match src[body_start..].iter().position(|&b| b == 0) {
                Some(len) => {
                    let frame_len = body_start + len + 1;
                    if frame_len > self.max_frame_size {
                        return Err(StompCodecError::FrameTooLarge {
                            max: self.max_frame_size,
                        });
                    }
                    (len, frame_len)
                }
                None => {
                    if src.len() > self.max_frame_size {
                        return Err(StompCodecError::FrameTooLarge {
                            max: self.max_frame_size,
                        });
                    }
                    return Ok(None);
                }
            },
        };

        let mut frame_bytes = src.split_to(frame_len);
        frame_bytes.advance(body_start);
        let body = frame_bytes.split_to(body_len).freeze();

        Ok(Some(Frame {
            command,
            headers: header_list,
            body,
        }))
    }
}

impl Encoder<Frame> for StompCodec {
    type Error = StompCodecError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(frame.command.as_str().as_bytes());
        dst.extend_from_slice(b"\n");
        for (name, value) in &frame.headers {
            dst.extend_from_slice(name.as_bytes());
            dst.extend_from_slice(b":");
            dst.extend_from_slice(escape(value).as_bytes());
            dst.extend_from_slice(b"\n");
        }
        // Derive content-length unless the caller set it, so bodies with NUL
        // bytes always survive the trip.
        if frame.header(headers::CONTENT_LENGTH).is_none() && !frame.body.is_empty() {
            dst.extend_from_slice(
                format!("{}:{}\n", headers::CONTENT_LENGTH, frame.body.len()).as_bytes(),
            );
        }
        dst.extend_from_slice(b"\n");
        dst.extend_from_slice(&frame.body);
        dst.extend_from_slice(&[0]);
        Ok(())
    }
}

/// Index of the `\n` that ends the header section, i.e. the first empty line.
fn find_blank_line(src: &BytesMut) -> Option<usize> {
    let mut i = 0;
    while i < src.len() {
        if src[i] == b'\n' {
            match src.get(i + 1) {
                Some(b'\n') => return Some(i),
                Some(b'\r') if src.get(i + 2) == Some(&b'\n') => return Some(i),
                _ => {}
            }
        }
        i += 1;
    }
    None
}

/// Width of the header/body separator at `header_end`: `\n\n` or `\n\r\n`.
fn blank_line_width(src: &BytesMut, header_end: usize) -> usize {
    if src.get(header_end + 1) == Some(&b'\r') {
        3
    } else {
        2
    }
}
