//! # GPS Engine
//!
//! Turns a UART byte stream into typed GPS events.
//!
//! ## Components
//!
//! - **GpsHandle**: brings the port, the worker thread and the event bus up
//!   and down as one unit (see [`lifecycle`])
//! - **GpsWorker**: drains driver notifications, recovers from hardware
//!   faults, extracts lines and drives event delivery (see [`worker`])
//! - **dispatch**: maps one decoder verdict onto at most one bus event
//!
//! ## Threading
//!
//! All line handling and all handler invocations happen on a single worker
//! thread named `nmea-gps`. Handlers may be added and removed from any
//! thread.

#![deny(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing,
    clippy::todo
)]

pub mod constants;
pub mod dispatch;
pub mod lifecycle;
pub mod worker;

pub use dispatch::{dispatch, DispatchError, Dispatched};
pub use lifecycle::{EngineOptions, GpsHandle, InitError};
pub use worker::{GpsWorker, WorkerParts};
