//! # GridMQ Protocol Module
//!
//! Destination-addressed message model shared by the channel engine and the
//! wire adapter.
//!
//! ## Destinations
//!
//! A [`Destination`] is a named, typed target for messages:
//!
//! - **Queue** - replicated FIFO collection, each message consumed by exactly
//!   one receiver
//! - **Topic** - publish/subscribe feed, each message fanned out to every
//!   live subscriber
//!
//! Destinations have a path form used on the wire and in configuration:
//! `/queue/orders`, `/topic/prices`, and the temporary variants
//! `/temp-queue/...` and `/temp-topic/...`.
//!
//! ## Messages
//!
//! A [`Message`] carries an opaque [`bytes::Bytes`] payload plus an
//! insertion-ordered header mapping with a closed set of scalar value types
//! ([`HeaderValue`]). Correlation id and reply-to destination are first-class
//! fields rather than headers so the request/reply machinery never has to
//! guess at header conventions.
//!
//! ## Modules
//!
//! - [`messages`] - message, header, and destination definitions

pub mod messages;

pub use messages::*;
