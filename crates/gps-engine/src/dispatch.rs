//! Decode dispatch: one extracted line in, at most one bus event out.

use std::time::Duration;

use core_types::{gps_error, gps_warn, DecodeResult, Decoder, GpsEvent};
use event_bus::{BusError, BusHandle};
use thiserror::Error;

use crate::constants::bus::POST_TIMEOUT_MS;

/// What a successfully dispatched line produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    /// The line held nothing to decode.
    NoData,
    /// An NMEA_UPDATE event was posted (or dropped by a full bus).
    Update,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Decoder rejected the line with {errors} error(s)")]
    DecodeRejected { errors: u32 },
    /// An UNKNOWN event carrying the line was posted before this is returned.
    #[error("Unexpected record type '{tag}'")]
    UnexpectedRecordType { tag: String },
}

/// Decode `line` and post the outcome to `bus`.
///
/// Posting is best effort: an event that cannot be queued within
/// `POST_TIMEOUT_MS` is logged and dropped without failing the dispatch.
pub fn dispatch<D>(
    decoder: &mut D,
    line: &[u8],
    bus: &BusHandle<GpsEvent<D::Record>>,
) -> Result<Dispatched, DispatchError>
where
    D: Decoder + ?Sized,
{
    match decoder.decode(line) {
        DecodeResult::NoData => Ok(Dispatched::NoData),
        DecodeResult::Rejected { errors } => Err(DispatchError::DecodeRejected {
            errors: errors.max(1),
        }),
        DecodeResult::Record(record) => {
            post(bus, GpsEvent::NmeaUpdate(record));
            Ok(Dispatched::Update)
        }
        DecodeResult::UnrecognizedTag(tag) => {
            post(bus, GpsEvent::Unknown(line.to_vec()));
            Err(DispatchError::UnexpectedRecordType { tag })
        }
    }
}

fn post<R: Send + 'static>(bus: &BusHandle<GpsEvent<R>>, event: GpsEvent<R>) {
    let category = event.category();
    match bus.post(event, Duration::from_millis(POST_TIMEOUT_MS)) {
        Ok(()) => {}
        Err(BusError::QueueFull(waited)) => {
            gps_warn!("{} event dropped: event queue still full after {:?}", category, waited);
        }
        Err(e) => gps_error!("{} event dropped: {}", category, e),
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use core_types::EventCategory;
    use event_bus::{BusConfig, EventBus};
    use std::sync::{Arc, Mutex};

    /// Decodes "n:<u32>" lines; "?<tag>" is an unknown tag, "!" a rejection.
    struct NumberDecoder;

    impl Decoder for NumberDecoder {
        type Record = u32;

        fn decode(&mut self, line: &[u8]) -> DecodeResult<u32> {
            let text = std::str::from_utf8(line).unwrap().trim_end();
            if let Some(n) = text.strip_prefix("n:") {
                return DecodeResult::Record(n.parse().unwrap());
            }
            if let Some(tag) = text.strip_prefix('?') {
                return DecodeResult::UnrecognizedTag(tag.to_string());
            }
            if text == "!" {
                return DecodeResult::Rejected { errors: 2 };
            }
            DecodeResult::NoData
        }

        fn id(&self) -> &'static str {
            "number"
        }

        fn name(&self) -> &'static str {
            "Number"
        }
    }

    fn recording_bus() -> (EventBus<GpsEvent<u32>>, Arc<Mutex<Vec<GpsEvent<u32>>>>) {
        let bus = EventBus::new(BusConfig::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.register(None, move |e: &GpsEvent<u32>| sink.lock().unwrap().push(e.clone()))
            .unwrap();
        (bus, seen)
    }

    #[test]
    fn test_record_posts_one_update() {
        let (bus, seen) = recording_bus();
        let result = dispatch(&mut NumberDecoder, b"n:42\r\n", &bus.handle());

        assert_eq!(result, Ok(Dispatched::Update));
        assert_eq!(bus.pump_pending(), 1);
        assert_eq!(*seen.lock().unwrap(), vec![GpsEvent::NmeaUpdate(42)]);
    }

    #[test]
    fn test_no_data_posts_nothing() {
        let (bus, seen) = recording_bus();
        assert_eq!(dispatch(&mut NumberDecoder, b"\r\n", &bus.handle()), Ok(Dispatched::NoData));
        assert_eq!(bus.pump_pending(), 0);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_rejection_posts_nothing() {
        let (bus, _seen) = recording_bus();
        assert_eq!(
            dispatch(&mut NumberDecoder, b"!\n", &bus.handle()),
            Err(DispatchError::DecodeRejected { errors: 2 })
        );
        assert_eq!(bus.pending(), 0);
    }

    #[test]
    fn test_unknown_tag_posts_raw_line_then_fails() {
        let (bus, seen) = recording_bus();
        let result = dispatch(&mut NumberDecoder, b"?ZDA\r\n", &bus.handle());

        assert_eq!(
            result,
            Err(DispatchError::UnexpectedRecordType { tag: "ZDA".into() })
        );
        assert_eq!(bus.pump_pending(), 1);
        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].category(), EventCategory::Unknown);
        assert_eq!(seen[0], GpsEvent::Unknown(b"?ZDA\r\n".to_vec()));
    }

    #[test]
    fn test_full_bus_drops_event_but_dispatch_succeeds() {
        let bus: EventBus<GpsEvent<u32>> = EventBus::new(BusConfig {
            queue_size: 1,
            ..BusConfig::default()
        });
        let handle = bus.handle();

        assert_eq!(dispatch(&mut NumberDecoder, b"n:1\n", &handle), Ok(Dispatched::Update));
        assert_eq!(dispatch(&mut NumberDecoder, b"n:2\n", &handle), Ok(Dispatched::Update));
        assert_eq!(bus.pending(), 1);
    }
}
