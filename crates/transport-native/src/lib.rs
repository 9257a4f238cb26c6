//! # Native Transport
//!
//! Host-side stand-in for the UART peripheral.
//!
//! - [`SoftUartDriver`] implements [`core_types::SerialDriver`] in software:
//!   a fixed-size ring buffer, pattern detection with a bounded position
//!   queue, and a bounded notification queue, behaving like the on-chip
//!   driver including its loss modes.
//! - [`SoftUartFeeder`] is the "wire": whatever is fed through it arrives at
//!   the driver as received bytes.
//! - [`ReaderPump`] moves bytes from any [`std::io::Read`] (a TTY device
//!   node, a capture file, stdin) into a feeder on its own thread, optionally
//!   paced to a baud rate.

#![deny(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing,
    clippy::todo
)]

pub mod pump;
pub mod soft_uart;

pub use pump::ReaderPump;
pub use soft_uart::{OpenFault, SoftUart, SoftUartDriver, SoftUartEvents, SoftUartFeeder};
