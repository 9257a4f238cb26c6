use std::time::Duration;
use thiserror::Error;

use crate::config::UartConfig;

/// Notification delivered by the UART driver through its bounded queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UartEvent {
    /// Bytes arrived in the ring buffer.
    Data { len: usize },
    /// Hardware RX FIFO overflowed before the driver drained it.
    FifoOverflow,
    /// Driver ring buffer is full; incoming bytes were dropped.
    BufferFull,
    /// RX line break detected.
    Break,
    ParityError,
    FrameError,
    /// The configured terminator was seen; its offset is in the pattern queue.
    PatternDetected,
    /// Any driver notification this engine does not know about.
    Other(u32),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PeripheralError {
    #[error("Driver install failed: {0}")]
    Install(String),
    #[error("Line parameter configuration failed: {0}")]
    Config(String),
    #[error("RX pin assignment failed: {0}")]
    Pin(String),
    #[error("Pattern detection setup failed: {0}")]
    Pattern(String),
    #[error("Read failed: {0}")]
    Read(String),
    #[error("Driver delete failed: {0}")]
    Close(String),
    #[error("Port not open")]
    NotOpen,
}

/// The producer side of the notification queue has gone away.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Notification queue disconnected")]
pub struct QueueDisconnected;

/// Receiving half of the driver's notification queue.
pub trait NotificationQueue: Send + 'static {
    /// Wait up to `timeout` for the next notification.
    /// `Ok(None)` means the wait timed out.
    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<UartEvent>, QueueDisconnected>;

    /// Discard every pending notification.
    fn reset(&mut self);
}

/// An opened UART stream.
///
/// Setup operations are called once by the lifecycle manager in the order
/// they are declared; the rest are used by the worker loop only.
pub trait SerialStream: Send + 'static {
    fn configure(&mut self, config: &UartConfig) -> Result<(), PeripheralError>;

    fn set_rx_pin(&mut self, pin: u32) -> Result<(), PeripheralError>;

    /// Flag every run of `count` consecutive `pattern` bytes.
    fn enable_pattern_detection(&mut self, pattern: u8, count: u8) -> Result<(), PeripheralError>;

    /// Clear recorded pattern offsets and bound the queue to `depth` entries.
    fn reset_pattern_queue(&mut self, depth: usize) -> Result<(), PeripheralError>;

    /// Offset (from the read position) of the oldest unread pattern match,
    /// or `None` when the pattern queue is empty.
    fn pop_pattern_pos(&mut self) -> Option<usize>;

    /// Read up to `buf.len()` bytes, waiting at most `timeout` for them.
    /// Returns how many bytes were copied.
    fn read_bytes(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, PeripheralError>;

    /// Drop everything in the driver's ring buffer.
    fn flush(&mut self);

    /// Uninstall the driver.
    fn close(&mut self) -> Result<(), PeripheralError>;
}

/// Installs the UART driver for one port.
pub trait SerialDriver {
    type Stream: SerialStream;
    type Queue: NotificationQueue;

    /// Install the driver with a ring buffer of `ring_buffer_size` bytes and
    /// a notification queue of `config.event_queue_size` entries.
    fn open(
        &mut self,
        config: &UartConfig,
        ring_buffer_size: usize,
    ) -> Result<(Self::Stream, Self::Queue), PeripheralError>;
}

#[cfg(test)]
#[allow(clippy::panic, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PeripheralError::Install("port 1 already installed".into());
        assert_eq!(err.to_string(), "Driver install failed: port 1 already installed");
        assert_eq!(QueueDisconnected.to_string(), "Notification queue disconnected");
    }
}
