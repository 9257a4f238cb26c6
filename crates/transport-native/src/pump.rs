//! Byte pump from a blocking reader into a software UART.

use std::io::{self, ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use core_types::{gps_debug, gps_warn};

use crate::soft_uart::SoftUartFeeder;

const CHUNK_SIZE: usize = 64;

/// Start, stop and 8 data bits.
const BITS_PER_BYTE: f64 = 10.0;

/// Copies bytes from a reader into a [`SoftUartFeeder`] on a dedicated thread.
///
/// With a baud rate the pump sleeps after each chunk for as long as the chunk
/// would take on the wire, so capture files replay at line speed instead of
/// overrunning the ring buffer. Live sources (a TTY) need no pacing.
///
/// The thread ends at end of input, on a read error, or at the first chunk
/// boundary after [`stop`](Self::stop). A read that blocks forever keeps the
/// thread alive; dropping the pump detaches it.
pub struct ReaderPump {
    handle: Option<JoinHandle<io::Result<u64>>>,
    shutdown: Arc<AtomicBool>,
}

impl ReaderPump {
    pub fn spawn<R>(reader: R, feeder: SoftUartFeeder, baud_rate: Option<u32>) -> io::Result<Self>
    where
        R: Read + Send + 'static,
    {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = Arc::clone(&shutdown);
        let pace = baud_rate
            .filter(|&baud| baud > 0)
            .map(|baud| BITS_PER_BYTE / f64::from(baud));

        let handle = thread::Builder::new()
            .name("uart-rx".to_string())
            .spawn(move || pump(reader, &feeder, pace, &shutdown_clone))?;

        Ok(Self {
            handle: Some(handle),
            shutdown,
        })
    }

    /// Ask the pump to stop at its next chunk boundary.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Wait for the pump to end. Returns the number of bytes the port accepted.
    pub fn join(mut self) -> io::Result<u64> {
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| io::Error::new(ErrorKind::Other, "reader pump panicked"))?,
            None => Ok(0),
        }
    }
}

impl Drop for ReaderPump {
    fn drop(&mut self) {
        self.stop();
    }
}

fn pump<R: Read>(
    mut reader: R,
    feeder: &SoftUartFeeder,
    secs_per_byte: Option<f64>,
    shutdown: &AtomicBool,
) -> io::Result<u64> {
    let mut chunk = [0u8; CHUNK_SIZE];
    let mut accepted: u64 = 0;

    while !shutdown.load(Ordering::Relaxed) {
        let n = match reader.read(&mut chunk) {
            Ok(0) => {
                gps_debug!("uart-rx: end of input after {} bytes", accepted);
                break;
            }
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                gps_warn!("uart-rx: read failed: {}", e);
                return Err(e);
            }
        };

        let data = chunk.get(..n).unwrap_or_default();
        accepted += feeder.feed(data) as u64;

        if let Some(secs) = secs_per_byte {
            thread::sleep(Duration::from_secs_f64(secs * n as f64));
        }
    }
    Ok(accepted)
}
