//! # Event Bus
//!
//! Decouples the decoder side of the GPS engine from an arbitrary,
//! dynamically changing set of consumers.
//!
//! This crate defines:
//! - **EventBus**: the single-consumer loop, driven by `pump` on its owner's
//!   thread
//! - **BusHandle**: cloneable producer and registration side, usable from
//!   any thread
//! - **BusError**: registration and posting failures
//!
//! ## Delivery model
//!
//! - Events are delivered in post order
//! - Each event reaches every matching handler, in registration order,
//!   before the next event is dequeued
//! - A full queue drops the event; nothing is retained after delivery
//!
//! ## Example
//!
//! ```
//! use core_types::{EventCategory, GpsEvent};
//! use event_bus::{BusConfig, EventBus};
//! use std::time::Duration;
//!
//! let bus: EventBus<GpsEvent<&'static str>> = EventBus::new(BusConfig::default());
//! let id = bus
//!     .register(Some(EventCategory::NmeaUpdate), |event| println!("{:?}", event))
//!     .unwrap();
//!
//! bus.post(GpsEvent::NmeaUpdate("GGA"), Duration::from_millis(100)).unwrap();
//! assert_eq!(bus.pump(Duration::from_millis(10)), 1);
//! bus.unregister(Some(EventCategory::NmeaUpdate), id).unwrap();
//! ```

#![deny(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing,
    clippy::todo
)]

pub mod bus;

pub use bus::{
    BusConfig, BusError, BusEvent, BusHandle, EventBus, FilterLabel, HandlerId, WeakBusHandle,
};
