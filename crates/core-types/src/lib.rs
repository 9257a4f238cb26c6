//! # Core Types
//!
//! Shared vocabulary for the NMEA GPS engine.
//!
//! This crate defines:
//! - **Events**: [`GpsEvent`] and the [`EventCategory`] used to route it
//! - **Decoder contract**: [`Decoder`] and its [`DecodeResult`]
//! - **Peripheral contract**: the UART driver surface the engine consumes
//!   (see [`peripheral`])
//! - **Configuration**: [`UartConfig`] and its line-parameter enums
//! - **Logging**: the `gps_*!` macros used across the workspace

#![deny(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing,
    clippy::todo
)]

use serde::{Deserialize, Serialize};

pub mod config;
pub mod logging;
pub mod peripheral;

pub use config::{ConfigError, DataBits, Parity, StopBits, UartConfig};
pub use peripheral::{
    NotificationQueue, PeripheralError, QueueDisconnected, SerialDriver, SerialStream, UartEvent,
};

#[doc(hidden)]
pub use tracing as __tracing;

/// Coarse classification of engine events, used to route delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventCategory {
    /// A sentence of a supported kind was decoded.
    NmeaUpdate,
    /// A well-formed line whose kind is outside the supported set.
    Unknown,
}

impl EventCategory {
    pub const ALL: [EventCategory; 2] = [EventCategory::NmeaUpdate, EventCategory::Unknown];

    /// Numeric event id (stable, matches registration order of the categories).
    pub fn id(self) -> i32 {
        match self {
            EventCategory::NmeaUpdate => 0,
            EventCategory::Unknown => 1,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            EventCategory::NmeaUpdate => "NMEA_UPDATE",
            EventCategory::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for EventCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// An event published by the engine to registered handlers.
///
/// `R` is the decoder's record type. Events are consumed once by the bus
/// delivery step and then dropped.
#[derive(Debug, Clone, PartialEq)]
pub enum GpsEvent<R> {
    /// Decoded record of a supported kind.
    NmeaUpdate(R),
    /// Raw bytes of a line the decoder did not classify.
    Unknown(Vec<u8>),
}

impl<R> GpsEvent<R> {
    pub fn category(&self) -> EventCategory {
        match self {
            GpsEvent::NmeaUpdate(_) => EventCategory::NmeaUpdate,
            GpsEvent::Unknown(_) => EventCategory::Unknown,
        }
    }

    pub fn as_update(&self) -> Option<&R> {
        match self {
            GpsEvent::NmeaUpdate(record) => Some(record),
            GpsEvent::Unknown(_) => None,
        }
    }

    /// Raw bytes of an unknown statement, lossily rendered as text.
    pub fn unknown_text(&self) -> Option<std::borrow::Cow<'_, str>> {
        match self {
            GpsEvent::Unknown(raw) => Some(String::from_utf8_lossy(raw)),
            GpsEvent::NmeaUpdate(_) => None,
        }
    }
}

/// Outcome of decoding one record.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeResult<R> {
    /// Nothing decodable in the input (not an error).
    NoData,
    /// The decoder recognised the sentence but its fields contain errors.
    Rejected { errors: u32 },
    /// A record of a supported kind.
    Record(R),
    /// A well-formed sentence whose tag is outside the supported set.
    UnrecognizedTag(String),
}

/// Trait for turning one terminated line into a typed record.
/// This is intended to be implemented by protocol plugins (NMEA, ...).
pub trait Decoder: Send + 'static {
    /// The closed set of records this decoder produces.
    type Record: Send + 'static;

    /// Decode exactly one line. `line` includes its terminator but not the
    /// trailing NUL of the runtime buffer.
    fn decode(&mut self, line: &[u8]) -> DecodeResult<Self::Record>;

    /// Get the unique name of this decoder (e.g., "nmea").
    fn id(&self) -> &'static str;

    /// Get a human-readable name (e.g., "NMEA 0183").
    fn name(&self) -> &'static str;
}
