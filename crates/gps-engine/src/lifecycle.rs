//! Bring-up and teardown of a GPS port.
//!
//! [`GpsHandle::init`] acquires, in order: the runtime buffer, the UART
//! driver, its line parameters, the RX pin, pattern detection on `'\n'`, the
//! pattern queue, the event bus and finally the worker thread. A failure at
//! any step releases everything acquired before it, so no half-initialised
//! handle ever exists. [`GpsHandle::deinit`] stops the worker first and then
//! releases the rest.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use core_types::{
    gps_error, gps_info, ConfigError, Decoder, EventCategory, GpsEvent, PeripheralError,
    SerialDriver, SerialStream, UartConfig,
};
use event_bus::{BusConfig, BusError, BusHandle, EventBus, HandlerId};
use framing::{BufferError, RuntimeBuffer};
use parking_lot::Mutex;
use thiserror::Error;

use crate::constants::{buffer, bus, extract, worker};
use crate::worker::{GpsWorker, WorkerParts};

#[derive(Error, Debug)]
pub enum InitError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Runtime buffer of {runtime} bytes is less than half the {ring} byte ring buffer")]
    BufferTooSmall { runtime: usize, ring: usize },
    #[error("Runtime buffer allocation failed: {0}")]
    Buffer(#[from] BufferError),
    #[error(transparent)]
    Peripheral(#[from] PeripheralError),
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Sizing of one engine instance.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Driver receive ring buffer (bytes).
    pub ring_buffer_size: usize,
    /// Longest line plus its NUL terminator. At least half the ring buffer.
    pub runtime_buffer_size: usize,
    pub bus: BusConfig,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            ring_buffer_size: buffer::RING_BUFFER_SIZE,
            runtime_buffer_size: buffer::RUNTIME_BUFFER_SIZE,
            bus: BusConfig {
                queue_size: bus::QUEUE_SIZE,
                max_handlers: bus::MAX_HANDLERS,
                categories: EventCategory::ALL.to_vec(),
            },
        }
    }
}

type Worker<P, D> = GpsWorker<<P as SerialDriver>::Stream, <P as SerialDriver>::Queue, D>;
type WorkerSlot<P, D> = Arc<Mutex<Option<Worker<P, D>>>>;

/// An initialised GPS port with its worker thread running.
///
/// Dropping the handle without calling [`deinit`](Self::deinit) still stops
/// the worker and closes the port, discarding any close error.
pub struct GpsHandle<P: SerialDriver, D: Decoder> {
    thread: Option<JoinHandle<()>>,
    /// Held by the thread while it runs; still holds the worker if the
    /// thread died or never started.
    worker: WorkerSlot<P, D>,
    stop: Arc<AtomicBool>,
    bus: BusHandle<GpsEvent<D::Record>>,
    port: u8,
}

impl<P, D> GpsHandle<P, D>
where
    P: SerialDriver,
    D: Decoder,
{
    /// Initialise with the default sizing.
    pub fn init(config: &UartConfig, driver: &mut P, decoder: D) -> Result<Self, InitError> {
        Self::init_with(config, driver, decoder, EngineOptions::default())
    }

    pub fn init_with(
        config: &UartConfig,
        driver: &mut P,
        decoder: D,
        options: EngineOptions,
    ) -> Result<Self, InitError> {
        config.validate()?;
        if options.runtime_buffer_size.saturating_mul(2) < options.ring_buffer_size {
            return Err(InitError::BufferTooSmall {
                runtime: options.runtime_buffer_size,
                ring: options.ring_buffer_size,
            });
        }

        let buffer = RuntimeBuffer::new(options.runtime_buffer_size).map_err(|e| {
            gps_error!("runtime buffer allocation failed: {}", e);
            e
        })?;

        let (mut stream, queue) = driver.open(config, options.ring_buffer_size).map_err(|e| {
            gps_error!("install uart driver failed: {}", e);
            e
        })?;

        if let Err(e) = setup_stream(&mut stream, config) {
            gps_error!("UART{} setup failed: {}", config.port, e);
            close_quietly(&mut stream, config.port);
            return Err(e.into());
        }

        let bus = EventBus::new(options.bus);
        let bus_handle = bus.handle();
        let stop = Arc::new(AtomicBool::new(false));

        let slot: WorkerSlot<P, D> = Arc::new(Mutex::new(Some(GpsWorker::new(WorkerParts {
            stream,
            queue,
            decoder,
            buffer,
            bus,
        }))));
        let thread_slot = Arc::clone(&slot);
        let thread_stop = Arc::clone(&stop);

        let spawned = thread::Builder::new()
            .name(worker::THREAD_NAME.to_string())
            .spawn(move || {
                if let Some(worker) = thread_slot.lock().as_mut() {
                    worker.run(&thread_stop);
                }
            });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                gps_error!("create GPS worker thread failed: {}", e);
                if let Some(worker) = slot.lock().take() {
                    close_quietly(&mut worker.into_parts().stream, config.port);
                }
                return Err(InitError::Spawn(e));
            }
        };

        gps_info!(
            "GPS on UART{} init OK ({} baud, {})",
            config.port,
            config.baud_rate,
            config.framing()
        );
        Ok(Self {
            thread: Some(handle),
            worker: slot,
            stop,
            bus: bus_handle,
            port: config.port,
        })
    }

    /// Register `handler` for `filter` (`None` = every category).
    pub fn add_handler<F>(
        &self,
        filter: Option<EventCategory>,
        handler: F,
    ) -> Result<HandlerId, BusError>
    where
        F: Fn(&GpsEvent<D::Record>) + Send + Sync + 'static,
    {
        self.bus.register(filter, handler)
    }

    /// Remove a registration made by [`add_handler`](Self::add_handler) with the same filter.
    pub fn remove_handler(
        &self,
        filter: Option<EventCategory>,
        id: HandlerId,
    ) -> Result<(), BusError> {
        self.bus.unregister(filter, id)
    }

    /// Producer/registration side of this port's event bus, usable from
    /// other threads. Posting after `deinit` fails with `BusError::Closed`.
    pub fn bus(&self) -> BusHandle<GpsEvent<D::Record>> {
        self.bus.clone()
    }

    pub fn port(&self) -> u8 {
        self.port
    }

    /// Stop the worker, then release the event bus, the port and the buffer.
    ///
    /// Returns the result of closing the port.
    pub fn deinit(mut self) -> Result<(), PeripheralError> {
        let result = self.shutdown();
        if result.is_ok() {
            gps_info!("GPS on UART{} deinit OK", self.port);
        }
        result
    }

    fn shutdown(&mut self) -> Result<(), PeripheralError> {
        let Some(handle) = self.thread.take() else {
            return Ok(());
        };
        self.stop.store(true, Ordering::Release);

        if handle.join().is_err() {
            gps_error!("UART{} worker panicked, releasing its resources", self.port);
        }
        let Some(worker) = self.worker.lock().take() else {
            return Err(PeripheralError::Close("worker state lost".into()));
        };
        let WorkerParts { mut stream, bus, .. } = worker.into_parts();
        drop(bus);
        stream.close()
    }
}

impl<P: SerialDriver, D: Decoder> Drop for GpsHandle<P, D> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            gps_error!("UART{} teardown failed: {}", self.port, e);
        }
    }
}

fn setup_stream<S: SerialStream>(stream: &mut S, config: &UartConfig) -> Result<(), PeripheralError> {
    stream.configure(config)?;
    stream.set_rx_pin(config.rx_pin)?;
    stream.enable_pattern_detection(extract::PATTERN, extract::PATTERN_COUNT)?;
    stream.reset_pattern_queue(config.event_queue_size)?;
    stream.flush();
    Ok(())
}

fn close_quietly<S: SerialStream>(stream: &mut S, port: u8) {
    if let Err(e) = stream.close() {
        gps_error!("UART{} driver delete failed: {}", port, e);
    }
}
