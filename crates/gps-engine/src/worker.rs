//! The worker loop.
//!
//! Each iteration waits for one driver notification, handles it, then gives
//! the event bus a fixed time slice to deliver queued events:
//!
//! - `Data`: nothing to do, lines are only read on pattern matches
//! - `FifoOverflow` / `BufferFull`: flush the driver and drop pending
//!   notifications; the partial line is lost and no event is posted
//! - `Break`, `ParityError`, `FrameError`: logged only
//! - `PatternDetected`: extract one line, decode it, post the result
//!
//! Stop requests are honoured between iterations, never in the middle of
//! extracting a line.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use core_types::{
    gps_debug, gps_error, gps_warn, Decoder, GpsEvent, NotificationQueue, QueueDisconnected,
    SerialStream, UartEvent,
};
use event_bus::EventBus;
use framing::{extract_line, RuntimeBuffer};

use crate::constants::{extract, worker};
use crate::dispatch::dispatch;

/// Everything the worker owns, handed back when it stops.
pub struct WorkerParts<S, Q, D: Decoder> {
    pub stream: S,
    pub queue: Q,
    pub decoder: D,
    pub buffer: RuntimeBuffer,
    pub bus: EventBus<GpsEvent<D::Record>>,
}

pub struct GpsWorker<S, Q, D: Decoder> {
    stream: S,
    queue: Q,
    decoder: D,
    buffer: RuntimeBuffer,
    bus: EventBus<GpsEvent<D::Record>>,
    event_wait: Duration,
    pump_slice: Duration,
}

impl<S, Q, D> GpsWorker<S, Q, D>
where
    S: SerialStream,
    Q: NotificationQueue,
    D: Decoder,
{
    pub fn new(parts: WorkerParts<S, Q, D>) -> Self {
        Self {
            stream: parts.stream,
            queue: parts.queue,
            decoder: parts.decoder,
            buffer: parts.buffer,
            bus: parts.bus,
            event_wait: Duration::from_millis(worker::EVENT_WAIT_MS),
            pump_slice: Duration::from_millis(worker::BUS_PUMP_MS),
        }
    }

    /// Run iterations until `stop` is raised or the notification queue
    /// disconnects. The worker keeps its parts, so the caller can still
    /// release them if a decoder panic unwinds out of here.
    pub fn run(&mut self, stop: &AtomicBool) {
        gps_debug!("worker started");
        while !stop.load(Ordering::Acquire) {
            if self.step().is_err() {
                gps_error!("UART notification queue disconnected, worker exiting");
                break;
            }
        }
        gps_debug!("worker stopped");
    }

    /// One loop iteration: at most one notification, then one bus time slice.
    pub fn step(&mut self) -> Result<(), QueueDisconnected> {
        if let Some(event) = self.queue.recv_timeout(self.event_wait)? {
            self.handle_event(event);
        }
        self.bus.pump(self.pump_slice);
        Ok(())
    }

    pub fn into_parts(self) -> WorkerParts<S, Q, D> {
        WorkerParts {
            stream: self.stream,
            queue: self.queue,
            decoder: self.decoder,
            buffer: self.buffer,
            bus: self.bus,
        }
    }

    /// Last line extracted, without its NUL terminator.
    pub fn last_line(&self) -> &[u8] {
        self.buffer.as_bytes()
    }

    fn handle_event(&mut self, event: UartEvent) {
        match event {
            UartEvent::Data { .. } => {}
            UartEvent::FifoOverflow => {
                gps_warn!("HW FIFO overflow");
                self.recover();
            }
            UartEvent::BufferFull => {
                gps_warn!("ring buffer full");
                self.recover();
            }
            UartEvent::Break => gps_warn!("rx break"),
            UartEvent::ParityError => gps_error!("parity error"),
            UartEvent::FrameError => gps_error!("frame error"),
            UartEvent::PatternDetected => self.handle_pattern(),
            UartEvent::Other(kind) => gps_warn!("unknown uart event type: {}", kind),
        }
    }

    fn recover(&mut self) {
        self.stream.flush();
        self.queue.reset();
    }

    fn handle_pattern(&mut self) {
        let timeout = Duration::from_millis(extract::READ_TIMEOUT_MS);
        match extract_line(&mut self.stream, &mut self.buffer, timeout) {
            Ok(_) => {
                let handle = self.bus.handle();
                if let Err(e) = dispatch(&mut self.decoder, self.buffer.as_bytes(), &handle) {
                    gps_warn!("{} parser failed: {}", self.decoder.id(), e);
                }
            }
            Err(e) => {
                gps_warn!("{}", e);
                self.stream.flush();
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use core_types::{DecodeResult, EventCategory, PeripheralError, UartConfig};
    use event_bus::BusConfig;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Shared script of what the fake driver holds and what the worker did.
    #[derive(Default)]
    struct Wire {
        bytes: VecDeque<u8>,
        patterns: VecDeque<usize>,
        notifications: VecDeque<UartEvent>,
        flushes: usize,
        resets: usize,
        disconnected: bool,
    }

    impl Wire {
        fn receive(&mut self, data: &[u8]) {
            for &b in data {
                self.bytes.push_back(b);
                if b == b'\n' {
                    self.patterns.push_back(self.bytes.len() - 1);
                    self.notifications.push_back(UartEvent::PatternDetected);
                }
            }
        }
    }

    type SharedWire = Arc<Mutex<Wire>>;

    struct FakeStream(SharedWire);
    struct FakeQueue(SharedWire);

    impl SerialStream for FakeStream {
        fn configure(&mut self, _config: &UartConfig) -> Result<(), PeripheralError> {
            Ok(())
        }
        fn set_rx_pin(&mut self, _pin: u32) -> Result<(), PeripheralError> {
            Ok(())
        }
        fn enable_pattern_detection(&mut self, _p: u8, _c: u8) -> Result<(), PeripheralError> {
            Ok(())
        }
        fn reset_pattern_queue(&mut self, _depth: usize) -> Result<(), PeripheralError> {
            Ok(())
        }
        fn pop_pattern_pos(&mut self) -> Option<usize> {
            self.0.lock().unwrap().patterns.pop_front()
        }
        fn read_bytes(&mut self, buf: &mut [u8], _t: Duration) -> Result<usize, PeripheralError> {
            let mut wire = self.0.lock().unwrap();
            let n = buf.len().min(wire.bytes.len());
            for slot in buf.iter_mut().take(n) {
                *slot = wire.bytes.pop_front().unwrap();
            }
            for pos in wire.patterns.iter_mut() {
                *pos -= n;
            }
            Ok(n)
        }
        fn flush(&mut self) {
            let mut wire = self.0.lock().unwrap();
            wire.bytes.clear();
            wire.patterns.clear();
            wire.flushes += 1;
        }
        fn close(&mut self) -> Result<(), PeripheralError> {
            Ok(())
        }
    }

    impl NotificationQueue for FakeQueue {
        fn recv_timeout(&mut self, _t: Duration) -> Result<Option<UartEvent>, QueueDisconnected> {
            let mut wire = self.0.lock().unwrap();
            if wire.disconnected {
                return Err(QueueDisconnected);
            }
            Ok(wire.notifications.pop_front())
        }
        fn reset(&mut self) {
            let mut wire = self.0.lock().unwrap();
            wire.notifications.clear();
            wire.resets += 1;
        }
    }

    /// Every line starting with '$' is a record of its own text.
    struct EchoDecoder;

    impl Decoder for EchoDecoder {
        type Record = String;

        fn decode(&mut self, line: &[u8]) -> DecodeResult<String> {
            let text = String::from_utf8_lossy(line).trim_end().to_string();
            match text.strip_prefix('$') {
                Some(rest) if rest.starts_with('X') => DecodeResult::UnrecognizedTag(rest.into()),
                Some(_) => DecodeResult::Record(text),
                None => DecodeResult::NoData,
            }
        }

        fn id(&self) -> &'static str {
            "echo"
        }

        fn name(&self) -> &'static str {
            "Echo"
        }
    }

    type Seen = Arc<Mutex<Vec<GpsEvent<String>>>>;

    #[derive(Clone, Default)]
    struct LogCapture(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for LogCapture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Run `f` with log output captured as text.
    fn with_logs<T>(f: impl FnOnce() -> T) -> (T, String) {
        let capture = LogCapture::default();
        let writer = capture.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .finish();
        let out = tracing::subscriber::with_default(subscriber, f);
        let text = String::from_utf8_lossy(&capture.0.lock().unwrap()).into_owned();
        (out, text)
    }

    fn worker(capacity: usize) -> (GpsWorker<FakeStream, FakeQueue, EchoDecoder>, SharedWire, Seen) {
        let wire = SharedWire::default();
        let bus = EventBus::new(BusConfig::default());
        let seen = Seen::default();
        let sink = Arc::clone(&seen);
        bus.register(None, move |e: &GpsEvent<String>| sink.lock().unwrap().push(e.clone()))
            .unwrap();

        let mut worker = GpsWorker::new(WorkerParts {
            stream: FakeStream(Arc::clone(&wire)),
            queue: FakeQueue(Arc::clone(&wire)),
            decoder: EchoDecoder,
            buffer: RuntimeBuffer::new(capacity).unwrap(),
            bus,
        });
        worker.event_wait = Duration::ZERO;
        worker.pump_slice = Duration::ZERO;
        (worker, wire, seen)
    }

    #[test]
    fn test_each_pattern_yields_one_update_in_order() {
        let (mut worker, wire, seen) = worker(64);
        wire.lock().unwrap().receive(b"$A,1\r\n$B,2\r\n");

        worker.step().unwrap();
        worker.step().unwrap();
        worker.bus.pump_pending();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                GpsEvent::NmeaUpdate("$A,1".to_string()),
                GpsEvent::NmeaUpdate("$B,2".to_string()),
            ]
        );
        assert_eq!(worker.last_line(), b"$B,2\r\n");
    }

    #[test]
    fn test_overflow_flushes_and_resets_queue() {
        for fault in [UartEvent::FifoOverflow, UartEvent::BufferFull] {
            let (mut worker, wire, seen) = worker(64);
            {
                let mut w = wire.lock().unwrap();
                w.receive(b"$PARTIAL");
                w.notifications.push_front(fault);
                w.notifications.push_back(UartEvent::PatternDetected);
            }

            worker.step().unwrap();

            let w = wire.lock().unwrap();
            assert_eq!(w.flushes, 1);
            assert_eq!(w.resets, 1);
            assert!(w.bytes.is_empty());
            assert!(w.notifications.is_empty());
            assert!(seen.lock().unwrap().is_empty());
        }
    }

    #[test]
    fn test_line_faults_do_not_recover() {
        let (mut worker, wire, _seen) = worker(64);
        {
            let mut w = wire.lock().unwrap();
            w.receive(b"$KEEP");
            w.notifications.extend([
                UartEvent::Break,
                UartEvent::ParityError,
                UartEvent::FrameError,
                UartEvent::Other(99),
                UartEvent::Data { len: 5 },
            ]);
        }

        for _ in 0..5 {
            worker.step().unwrap();
        }

        let w = wire.lock().unwrap();
        assert_eq!((w.flushes, w.resets), (0, 0));
        assert_eq!(w.bytes.len(), 5);
    }

    #[test]
    fn test_missing_pattern_position_flushes() {
        let (mut worker, wire, seen) = worker(64);
        {
            let mut w = wire.lock().unwrap();
            w.receive(b"$A,1\n");
            w.patterns.clear();
        }

        worker.step().unwrap();

        assert_eq!(wire.lock().unwrap().flushes, 1);
        assert!(wire.lock().unwrap().bytes.is_empty());
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_oversized_line_is_dropped_and_flushed() {
        let (mut worker, wire, seen) = worker(8);
        wire.lock().unwrap().receive(b"$TOOLONG\n$OK\n");

        worker.step().unwrap();
        assert_eq!(wire.lock().unwrap().flushes, 1);
        assert!(worker.last_line().is_empty());

        // the flush took the following line with it
        worker.step().unwrap();
        worker.bus.pump_pending();
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_unknown_tag_posts_unknown_event() {
        let (mut worker, wire, seen) = worker(64);
        wire.lock().unwrap().receive(b"$XYZ,1\r\n");

        worker.step().unwrap();
        worker.bus.pump_pending();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].category(), EventCategory::Unknown);
        assert_eq!(seen[0].unknown_text().unwrap(), "$XYZ,1\r\n");
    }

    #[test]
    fn test_unknown_tag_is_logged_as_warning() {
        let (mut worker, wire, _seen) = worker(64);
        wire.lock().unwrap().receive(b"$XYZ,1\r\n");

        let ((), logs) = with_logs(|| worker.step().unwrap());
        assert!(logs.contains("WARN"), "{}", logs);
        assert!(logs.contains("Unexpected record type 'XYZ,1'"), "{}", logs);
    }

    #[test]
    fn test_lost_pattern_position_is_reported_once() {
        let (mut worker, wire, _seen) = worker(64);
        {
            let mut w = wire.lock().unwrap();
            w.receive(b"$A,1\r\n");
            w.patterns.clear();
        }

        let ((), logs) = with_logs(|| worker.step().unwrap());
        assert_eq!(logs.matches("pattern queue").count(), 1, "{}", logs);
        assert_eq!(wire.lock().unwrap().flushes, 1);
    }

    #[test]
    fn test_run_returns_on_disconnect() {
        let (mut worker, wire, _seen) = worker(64);
        wire.lock().unwrap().disconnected = true;

        let stop = AtomicBool::new(false);
        worker.run(&stop);
        assert_eq!(worker.into_parts().buffer.capacity(), 64);
    }

    #[test]
    fn test_run_honours_stop_before_first_iteration() {
        let (mut worker, wire, _seen) = worker(64);
        wire.lock().unwrap().receive(b"$A\n");

        let stop = AtomicBool::new(true);
        worker.run(&stop);
        assert_eq!(wire.lock().unwrap().notifications.len(), 1);
    }
}
