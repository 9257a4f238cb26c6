//! # Framing
//!
//! Reassembles terminator-delimited records out of a UART driver.
//!
//! - [`RuntimeBuffer`]: fixed-capacity, NUL-terminated home of one record
//! - [`extract_line`]: copies the next pattern-delimited record into it

#![deny(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing,
    clippy::todo
)]

pub mod buffer;
pub mod lines;

pub use buffer::{BufferError, RuntimeBuffer};
pub use lines::{extract_line, ExtractError};
