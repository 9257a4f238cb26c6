//! Software UART driver.
//!
//! One [`SoftUartDriver`] models one UART port. Bytes fed through a
//! [`SoftUartFeeder`] land in a fixed-size ring buffer; every completed run
//! of the detection pattern records its absolute offset in a bounded position
//! queue and raises [`UartEvent::PatternDetected`]. Notifications travel
//! through a bounded crossbeam channel and are dropped when it is full, the
//! same way an interrupt handler drops them on a full queue.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use core_types::{
    gps_debug, gps_warn, NotificationQueue, PeripheralError, QueueDisconnected, SerialDriver,
    SerialStream, UartConfig, UartEvent,
};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::{Condvar, Mutex};

/// Setup step that fails on its next invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenFault {
    Install,
    Configure,
    RxPin,
    PatternDetection,
    PatternQueue,
}

impl OpenFault {
    fn error(self, port: u8) -> PeripheralError {
        let reason = format!("UART{} injected fault", port);
        match self {
            OpenFault::Install => PeripheralError::Install(reason),
            OpenFault::Configure => PeripheralError::Config(reason),
            OpenFault::RxPin => PeripheralError::Pin(reason),
            OpenFault::PatternDetection | OpenFault::PatternQueue => {
                PeripheralError::Pattern(reason)
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Pattern {
    byte: u8,
    count: u8,
}

#[derive(Default)]
struct PortState {
    open: bool,
    port: u8,
    config: Option<UartConfig>,
    rx_pin: Option<u32>,

    ring: VecDeque<u8>,
    ring_capacity: usize,
    /// Absolute count of bytes accepted into the ring.
    received: usize,
    /// Absolute count of bytes read or flushed out of the ring.
    consumed: usize,

    pattern: Option<Pattern>,
    run: u8,
    positions: VecDeque<usize>,
    position_depth: usize,

    notify: Option<Sender<UartEvent>>,
    dropped_notifications: usize,
    fault: Option<OpenFault>,
}

impl PortState {
    fn take_fault(&mut self, step: OpenFault) -> Result<(), PeripheralError> {
        if self.fault == Some(step) {
            self.fault = None;
            return Err(step.error(self.port));
        }
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), PeripheralError> {
        if self.open {
            Ok(())
        } else {
            Err(PeripheralError::NotOpen)
        }
    }

    fn notify(&mut self, event: UartEvent) -> bool {
        let Some(tx) = &self.notify else {
            return false;
        };
        match tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped_notifications += 1;
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Track the pattern run; returns true when `byte` completes one.
    fn detect(&mut self, byte: u8, offset: usize) -> bool {
        let Some(pattern) = self.pattern else {
            return false;
        };
        if byte != pattern.byte {
            self.run = 0;
            return false;
        }
        self.run += 1;
        if self.run < pattern.count {
            return false;
        }
        self.run = 0;

        let start = offset + 1 - usize::from(pattern.count);
        if self.positions.len() < self.position_depth {
            self.positions.push_back(start);
        } else {
            gps_warn!("UART{} pattern queue full, position {} lost", self.port, start);
        }
        true
    }

    fn clear_rx(&mut self) {
        self.consumed += self.ring.len();
        self.ring.clear();
        self.positions.clear();
        self.run = 0;
    }
}

struct Shared {
    state: Mutex<PortState>,
    readable: Condvar,
}

/// Installs the software UART for one port.
#[derive(Clone)]
pub struct SoftUartDriver {
    shared: Arc<Shared>,
}

impl SoftUartDriver {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(PortState::default()),
                readable: Condvar::new(),
            }),
        }
    }

    /// The receive side of the line.
    pub fn feeder(&self) -> SoftUartFeeder {
        SoftUartFeeder {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Make `step` fail the next time it runs. One-shot.
    pub fn inject_open_fault(&self, step: OpenFault) {
        self.shared.state.lock().fault = Some(step);
    }

    pub fn is_open(&self) -> bool {
        self.shared.state.lock().open
    }

    /// RX pin assigned by the last `set_rx_pin` while open.
    pub fn rx_pin(&self) -> Option<u32> {
        self.shared.state.lock().rx_pin
    }
}

impl Default for SoftUartDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialDriver for SoftUartDriver {
    type Stream = SoftUart;
    type Queue = SoftUartEvents;

    fn open(
        &mut self,
        config: &UartConfig,
        ring_buffer_size: usize,
    ) -> Result<(SoftUart, SoftUartEvents), PeripheralError> {
        let mut state = self.shared.state.lock();
        if state.open {
            return Err(PeripheralError::Install(format!(
                "UART{} driver already installed",
                state.port
            )));
        }
        state.port = config.port;
        state.take_fault(OpenFault::Install)?;
        if ring_buffer_size == 0 {
            return Err(PeripheralError::Install("ring buffer size must be non-zero".into()));
        }
        if config.event_queue_size == 0 {
            return Err(PeripheralError::Install("event queue size must be non-zero".into()));
        }

        let (tx, rx) = channel::bounded(config.event_queue_size);
        let fault = state.fault.take();
        *state = PortState {
            open: true,
            port: config.port,
            ring: VecDeque::with_capacity(ring_buffer_size),
            ring_capacity: ring_buffer_size,
            notify: Some(tx),
            fault,
            ..PortState::default()
        };
        gps_debug!(
            "UART{} installed: rx ring {} bytes, {} notifications",
            config.port,
            ring_buffer_size,
            config.event_queue_size
        );

        let stream = SoftUart {
            shared: Arc::clone(&self.shared),
        };
        Ok((stream, SoftUartEvents { rx }))
    }
}

/// Opened software UART.
pub struct SoftUart {
    shared: Arc<Shared>,
}

impl SerialStream for SoftUart {
    fn configure(&mut self, config: &UartConfig) -> Result<(), PeripheralError> {
        let mut state = self.shared.state.lock();
        state.ensure_open()?;
        state.take_fault(OpenFault::Configure)?;
        if config.baud_rate == 0 {
            return Err(PeripheralError::Config("baud rate must be non-zero".into()));
        }
        state.config = Some(config.clone());
        Ok(())
    }

    fn set_rx_pin(&mut self, pin: u32) -> Result<(), PeripheralError> {
        let mut state = self.shared.state.lock();
        state.ensure_open()?;
        state.take_fault(OpenFault::RxPin)?;
        state.rx_pin = Some(pin);
        Ok(())
    }

    fn enable_pattern_detection(&mut self, pattern: u8, count: u8) -> Result<(), PeripheralError> {
        let mut state = self.shared.state.lock();
        state.ensure_open()?;
        state.take_fault(OpenFault::PatternDetection)?;
        if count == 0 {
            return Err(PeripheralError::Pattern("pattern count must be non-zero".into()));
        }
        state.pattern = Some(Pattern { byte: pattern, count });
        state.run = 0;
        Ok(())
    }

    fn reset_pattern_queue(&mut self, depth: usize) -> Result<(), PeripheralError> {
        let mut state = self.shared.state.lock();
        state.ensure_open()?;
        state.take_fault(OpenFault::PatternQueue)?;
        state.positions = VecDeque::with_capacity(depth);
        state.position_depth = depth;
        Ok(())
    }

    fn pop_pattern_pos(&mut self) -> Option<usize> {
        let mut state = self.shared.state.lock();
        while let Some(abs) = state.positions.pop_front() {
            // offsets already read past are stale
            if let Some(pos) = abs.checked_sub(state.consumed) {
                return Some(pos);
            }
        }
        None
    }

    fn read_bytes(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, PeripheralError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        loop {
            state.ensure_open()?;
            if state.ring.len() >= buf.len() {
                break;
            }
            if self.shared.readable.wait_until(&mut state, deadline).timed_out() {
                state.ensure_open()?;
                break;
            }
        }

        let n = buf.len().min(state.ring.len());
        for (slot, byte) in buf.iter_mut().zip(state.ring.drain(..n)) {
            *slot = byte;
        }
        state.consumed += n;
        Ok(n)
    }

    fn flush(&mut self) {
        let mut state = self.shared.state.lock();
        state.clear_rx();
    }

    fn close(&mut self) -> Result<(), PeripheralError> {
        let mut state = self.shared.state.lock();
        state.ensure_open()?;
        state.clear_rx();
        state.open = false;
        state.pattern = None;
        // dropping the sender disconnects the notification queue
        state.notify = None;
        if state.dropped_notifications > 0 {
            gps_debug!(
                "UART{} dropped {} notifications while open",
                state.port,
                state.dropped_notifications
            );
        }
        drop(state);
        self.shared.readable.notify_all();
        Ok(())
    }
}

/// Receiving half of the software UART's notification queue.
pub struct SoftUartEvents {
    rx: Receiver<UartEvent>,
}

impl NotificationQueue for SoftUartEvents {
    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<UartEvent>, QueueDisconnected> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Ok(Some(event)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(QueueDisconnected),
        }
    }

    fn reset(&mut self) {
        while self.rx.try_recv().is_ok() {}
    }
}

/// Line side of a software UART: bytes "received" by the port.
#[derive(Clone)]
pub struct SoftUartFeeder {
    shared: Arc<Shared>,
}

impl SoftUartFeeder {
    /// Receive `data` into the ring buffer.
    ///
    /// Raises `Data` for each contiguous chunk and `PatternDetected` after
    /// each completed pattern. When the ring fills up the rest of `data` is
    /// dropped and `BufferFull` is raised. Nothing is received while the
    /// port is closed.
    ///
    /// Returns the number of bytes accepted.
    pub fn feed(&self, data: &[u8]) -> usize {
        let mut state = self.shared.state.lock();
        if !state.open {
            return 0;
        }

        let mut accepted = 0;
        let mut chunk = 0;
        for &byte in data {
            if state.ring.len() >= state.ring_capacity {
                if chunk > 0 {
                    state.notify(UartEvent::Data { len: chunk });
                    chunk = 0;
                }
                state.notify(UartEvent::BufferFull);
                break;
            }

            let offset = state.received;
            state.ring.push_back(byte);
            state.received += 1;
            accepted += 1;
            chunk += 1;

            if state.detect(byte, offset) {
                state.notify(UartEvent::Data { len: chunk });
                chunk = 0;
                state.notify(UartEvent::PatternDetected);
            }
        }
        if chunk > 0 {
            state.notify(UartEvent::Data { len: chunk });
        }

        drop(state);
        self.shared.readable.notify_all();
        accepted
    }

    /// Post a raw notification, e.g. a hardware fault. Returns false if the
    /// port is closed or the notification queue is full.
    pub fn inject(&self, event: UartEvent) -> bool {
        self.shared.state.lock().notify(event)
    }

    pub fn is_open(&self) -> bool {
        self.shared.state.lock().open
    }

    /// Baud rate the port was configured with, once configured.
    pub fn baud_rate(&self) -> Option<u32> {
        let state = self.shared.state.lock();
        state.config.as_ref().map(|c| c.baud_rate)
    }

    /// Bytes received but not yet read or flushed.
    pub fn buffered_len(&self) -> usize {
        self.shared.state.lock().ring.len()
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_millis(20);

    fn open_port(ring: usize) -> (SoftUartDriver, SoftUart, SoftUartEvents) {
        let mut driver = SoftUartDriver::new();
        let (mut stream, events) = driver.open(&UartConfig::default(), ring).unwrap();
        stream.enable_pattern_detection(b'\n', 1).unwrap();
        stream.reset_pattern_queue(4).unwrap();
        (driver, stream, events)
    }

    fn drain(events: &mut SoftUartEvents) -> Vec<UartEvent> {
        let mut seen = Vec::new();
        while let Some(event) = events.recv_timeout(Duration::ZERO).unwrap() {
            seen.push(event);
        }
        seen
    }

    #[test]
    fn test_pattern_offsets_are_relative_to_read_position() {
        let (driver, mut stream, mut events) = open_port(256);
        let feeder = driver.feeder();

        assert_eq!(feeder.feed(b"ab\ncdef\n"), 8);
        assert_eq!(
            drain(&mut events),
            vec![
                UartEvent::Data { len: 3 },
                UartEvent::PatternDetected,
                UartEvent::Data { len: 5 },
                UartEvent::PatternDetected,
            ]
        );

        assert_eq!(stream.pop_pattern_pos(), Some(2));
        let mut buf = [0u8; 3];
        assert_eq!(stream.read_bytes(&mut buf, TIMEOUT).unwrap(), 3);
        assert_eq!(&buf, b"ab\n");

        assert_eq!(stream.pop_pattern_pos(), Some(4));
        assert_eq!(stream.pop_pattern_pos(), None);
    }

    #[test]
    fn test_multi_byte_pattern_reports_run_start() {
        let mut driver = SoftUartDriver::new();
        let (mut stream, _events) = driver.open(&UartConfig::default(), 64).unwrap();
        stream.enable_pattern_detection(b'+', 3).unwrap();
        stream.reset_pattern_queue(4).unwrap();

        driver.feeder().feed(b"AT++x+++");
        assert_eq!(stream.pop_pattern_pos(), Some(5));
        assert_eq!(stream.pop_pattern_pos(), None);
    }

    #[test]
    fn test_second_open_is_refused() {
        let (mut driver, mut stream, _events) = open_port(64);
        let err = driver.open(&UartConfig::default(), 64).err().unwrap();
        assert!(matches!(err, PeripheralError::Install(_)));

        stream.close().unwrap();
        assert!(driver.open(&UartConfig::default(), 64).is_ok());
    }

    #[test]
    fn test_full_ring_drops_excess_and_reports_buffer_full() {
        let (driver, _stream, mut events) = open_port(8);
        let feeder = driver.feeder();

        assert_eq!(feeder.feed(b"0123456789"), 8);
        assert_eq!(feeder.buffered_len(), 8);
        assert_eq!(
            drain(&mut events),
            vec![UartEvent::Data { len: 8 }, UartEvent::BufferFull]
        );
    }

    #[test]
    fn test_pattern_queue_overflow_loses_positions() {
        let (driver, mut stream, mut events) = open_port(256);
        driver.feeder().feed(b"1\n2\n3\n4\n5\n6\n");

        let detected = drain(&mut events)
            .into_iter()
            .filter(|e| *e == UartEvent::PatternDetected)
            .count();
        assert_eq!(detected, 6);

        for expected in [1, 3, 5, 7] {
            assert_eq!(stream.pop_pattern_pos(), Some(expected));
        }
        // two notifications have no position left
        assert_eq!(stream.pop_pattern_pos(), None);
    }

    #[test]
    fn test_flush_discards_bytes_and_positions() {
        let (driver, mut stream, _events) = open_port(256);
        let feeder = driver.feeder();
        feeder.feed(b"stale\npartial");

        stream.flush();
        assert_eq!(feeder.buffered_len(), 0);
        assert_eq!(stream.pop_pattern_pos(), None);

        feeder.feed(b"ok\n");
        assert_eq!(stream.pop_pattern_pos(), Some(2));
        let mut buf = [0u8; 3];
        stream.read_bytes(&mut buf, TIMEOUT).unwrap();
        assert_eq!(&buf, b"ok\n");
    }

    #[test]
    fn test_read_times_out_with_partial_data() {
        let (driver, mut stream, _events) = open_port(64);
        driver.feeder().feed(b"abc");

        let mut buf = [0u8; 8];
        assert_eq!(stream.read_bytes(&mut buf, TIMEOUT).unwrap(), 3);
        assert_eq!(&buf[..3], b"abc");
    }

    #[test]
    fn test_read_waits_for_late_bytes() {
        let (driver, mut stream, _events) = open_port(64);
        let feeder = driver.feeder();
        let writer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            feeder.feed(b"late\n");
        });

        let mut buf = [0u8; 5];
        assert_eq!(stream.read_bytes(&mut buf, Duration::from_secs(2)).unwrap(), 5);
        assert_eq!(&buf, b"late\n");
        writer.join().unwrap();
    }

    #[test]
    fn test_reset_drains_notifications() {
        let (driver, _stream, mut events) = open_port(64);
        let feeder = driver.feeder();
        assert!(feeder.inject(UartEvent::FifoOverflow));
        assert!(feeder.inject(UartEvent::Break));

        events.reset();
        assert_eq!(events.recv_timeout(Duration::ZERO), Ok(None));
    }

    #[test]
    fn test_full_notification_queue_drops_events() {
        let mut driver = SoftUartDriver::new();
        let config = UartConfig::default().with_event_queue_size(2);
        let (_stream, mut events) = driver.open(&config, 64).unwrap();
        let feeder = driver.feeder();

        assert!(feeder.inject(UartEvent::Break));
        assert!(feeder.inject(UartEvent::ParityError));
        assert!(!feeder.inject(UartEvent::FrameError));
        assert_eq!(drain(&mut events), vec![UartEvent::Break, UartEvent::ParityError]);
    }

    #[test]
    fn test_close_disconnects_and_stops_receiving() {
        let (driver, mut stream, mut events) = open_port(64);
        let feeder = driver.feeder();

        stream.close().unwrap();
        assert!(!driver.is_open());
        assert_eq!(events.recv_timeout(TIMEOUT), Err(QueueDisconnected));
        assert_eq!(feeder.feed(b"ignored\n"), 0);
        assert_eq!(
            stream.read_bytes(&mut [0u8; 1], TIMEOUT),
            Err(PeripheralError::NotOpen)
        );
        assert_eq!(stream.close(), Err(PeripheralError::NotOpen));
    }

    #[test]
    fn test_open_faults_are_one_shot() {
        let mut driver = SoftUartDriver::new();
        driver.inject_open_fault(OpenFault::Install);
        assert!(matches!(
            driver.open(&UartConfig::default(), 64),
            Err(PeripheralError::Install(_))
        ));
        assert!(!driver.is_open());

        driver.inject_open_fault(OpenFault::RxPin);
        let (mut stream, _events) = driver.open(&UartConfig::default(), 64).unwrap();
        stream.configure(&UartConfig::default()).unwrap();
        assert_eq!(driver.feeder().baud_rate(), Some(9600));
        assert!(matches!(stream.set_rx_pin(18), Err(PeripheralError::Pin(_))));
        assert_eq!(driver.rx_pin(), None);
        assert!(stream.set_rx_pin(18).is_ok());
        assert_eq!(driver.rx_pin(), Some(18));
    }
}
