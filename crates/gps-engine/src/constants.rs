//! Centralized timing and sizing constants for the GPS engine
//!
//! Every wait the worker performs and every buffer it allocates is defined
//! here. The values are those of the on-target driver configuration the
//! engine was first deployed with.
//!
//! **Before changing any constant:**
//! 1. Read its full documentation comment
//! 2. Check the related constants it is derived from or bounded by
//! 3. Re-run the engine integration tests

/// Worker loop timing
pub mod worker {
    /// Longest wait for one driver notification (milliseconds)
    ///
    /// **Value**: 200ms
    ///
    /// **Rationale**: Bounds how long a stop request or a queued bus event
    /// can wait while the UART is idle. At 9600 baud a 1 Hz receiver emits
    /// a burst of sentences roughly every second, so the worker wakes at
    /// least 5 times between bursts.
    ///
    /// **Used in**: worker.rs (`GpsWorker::step`)
    pub const EVENT_WAIT_MS: u64 = 200;

    /// Time slice given to event delivery per iteration (milliseconds)
    ///
    /// **Value**: 50ms
    ///
    /// **Rationale**: Handlers run synchronously on the worker thread. While
    /// they run the driver keeps buffering; 50ms at 115200 baud is ~576
    /// bytes, well inside the ring buffer.
    ///
    /// **Used in**: worker.rs (`GpsWorker::step`)
    pub const BUS_PUMP_MS: u64 = 50;

    /// Name of the worker thread
    pub const THREAD_NAME: &str = "nmea-gps";
}

/// Line extraction
pub mod extract {
    /// Timeout for reading one terminated line out of the driver (milliseconds)
    ///
    /// **Value**: 100ms
    ///
    /// **Rationale**: The pattern notification is raised once the terminator
    /// is already in the ring buffer, so the read normally completes at
    /// once. The timeout only matters if the driver flushed in between.
    ///
    /// **Used in**: worker.rs (`GpsWorker::handle_pattern`)
    pub const READ_TIMEOUT_MS: u64 = 100;

    /// Line terminator the driver's pattern detector watches for
    pub const PATTERN: u8 = b'\n';

    /// Consecutive terminator bytes that make one pattern match
    pub const PATTERN_COUNT: u8 = 1;
}

/// Buffer sizes
pub mod buffer {
    /// Driver receive ring buffer (bytes)
    ///
    /// **Value**: 2048 bytes
    ///
    /// **Rationale**: Holds ~2 seconds of output at 9600 baud, enough for a
    /// full epoch of GGA/GSA/GSV/RMC/VTG from a multi-constellation receiver.
    ///
    /// **Used in**: lifecycle.rs (`GpsHandle::init`)
    pub const RING_BUFFER_SIZE: usize = 2048;

    /// Runtime buffer holding one extracted line (bytes, including NUL)
    ///
    /// **Value**: `RING_BUFFER_SIZE / 2` = 1024 bytes
    ///
    /// **Rationale**: NMEA limits a sentence to 82 characters, but the
    /// extractor copies everything up to the terminator, including any
    /// garbage that preceded it. Lines longer than this are dropped and
    /// the ring buffer flushed.
    ///
    /// **Constraint**: must be at least half of the ring buffer size
    /// (checked by `GpsHandle::init_with`).
    pub const RUNTIME_BUFFER_SIZE: usize = RING_BUFFER_SIZE / 2;
}

/// Event bus sizing and posting
pub mod bus {
    /// Events that can wait for delivery
    ///
    /// **Value**: 16 events
    ///
    /// **Rationale**: A receiver epoch rarely exceeds 10 sentences, and the
    /// bus is pumped after every notification.
    pub const QUEUE_SIZE: usize = 16;

    /// Registrations a bus accepts before reporting out-of-memory
    pub const MAX_HANDLERS: usize = 16;

    /// Longest wait for room in the event queue (milliseconds)
    ///
    /// **Value**: 100ms
    ///
    /// **Rationale**: The worker is both producer and consumer of the bus,
    /// so a full queue cannot drain while it waits. The wait only bounds
    /// the stall before the event is dropped.
    ///
    /// **Used in**: dispatch.rs (`dispatch`)
    pub const POST_TIMEOUT_MS: u64 = 100;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_buffer_is_half_the_ring() {
        assert_eq!(buffer::RUNTIME_BUFFER_SIZE * 2, buffer::RING_BUFFER_SIZE);
    }

    #[test]
    fn test_delivery_slice_shorter_than_notification_wait() {
        assert!(worker::BUS_PUMP_MS < worker::EVENT_WAIT_MS);
    }
}
