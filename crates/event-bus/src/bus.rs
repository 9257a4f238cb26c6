use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use core_types::{gps_debug, gps_error, EventCategory, GpsEvent};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use parking_lot::Mutex;
use thiserror::Error;

/// Events the bus can route by category.
pub trait BusEvent: Send + 'static {
    fn category(&self) -> EventCategory;
}

impl<R: Send + 'static> BusEvent for GpsEvent<R> {
    fn category(&self) -> EventCategory {
        GpsEvent::category(self)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("Cannot allocate storage for another handler ({0} registered)")]
    OutOfMemory(usize),
    #[error("Category {0} is not routed by this event loop")]
    InvalidCategory(EventCategory),
    #[error("No handler {0:?} registered for {1}")]
    NotFound(HandlerId, FilterLabel),
    #[error("Event queue full: event dropped after {0:?}")]
    QueueFull(Duration),
    #[error("Event loop has been deleted")]
    Closed,
}

/// Display helper for a registration filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterLabel(pub Option<EventCategory>);

impl std::fmt::Display for FilterLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Some(category) => write!(f, "{}", category),
            None => f.write_str("any event"),
        }
    }
}

/// Identity of one registration, returned by `register`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Registration<E> {
    id: HandlerId,
    /// `None` subscribes to every category.
    filter: Option<EventCategory>,
    handler: Handler<E>,
}

impl<E: BusEvent> Registration<E> {
    fn matches(&self, category: EventCategory) -> bool {
        self.filter.map_or(true, |c| c == category)
    }
}

struct Registry<E> {
    entries: Vec<Registration<E>>,
    next_id: u64,
    max_handlers: usize,
    categories: Vec<EventCategory>,
}

/// Event loop sizing.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Events that can wait in the queue before `post` starts timing out.
    pub queue_size: usize,
    /// Registration slots; `register` fails with `OutOfMemory` beyond this.
    pub max_handlers: usize,
    /// Categories this loop routes; others are refused at registration.
    pub categories: Vec<EventCategory>,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            queue_size: 16,
            max_handlers: 16,
            categories: EventCategory::ALL.to_vec(),
        }
    }
}

/// Cloneable producer/registration side of the event loop.
///
/// Safe to use from any thread; registration changes take effect from the
/// next delivered event. A handler that needs the bus it is registered on
/// must capture a [`WeakBusHandle`] instead: a strong handle inside the
/// registry keeps the registry alive forever.
pub struct BusHandle<E> {
    registry: Arc<Mutex<Registry<E>>>,
    tx: Sender<E>,
}

impl<E> Clone for BusHandle<E> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            tx: self.tx.clone(),
        }
    }
}

impl<E> BusHandle<E> {
    /// Handle that does not keep the registrations alive.
    pub fn downgrade(&self) -> WeakBusHandle<E> {
        WeakBusHandle {
            registry: Arc::downgrade(&self.registry),
            tx: self.tx.clone(),
        }
    }
}

/// Non-owning [`BusHandle`], for capture inside handlers.
pub struct WeakBusHandle<E> {
    registry: Weak<Mutex<Registry<E>>>,
    tx: Sender<E>,
}

impl<E> Clone for WeakBusHandle<E> {
    fn clone(&self) -> Self {
        Self {
            registry: Weak::clone(&self.registry),
            tx: self.tx.clone(),
        }
    }
}

impl<E> WeakBusHandle<E> {
    /// `None` once the event loop has been dropped.
    pub fn upgrade(&self) -> Option<BusHandle<E>> {
        self.registry.upgrade().map(|registry| BusHandle {
            registry,
            tx: self.tx.clone(),
        })
    }
}

impl<E: BusEvent> BusHandle<E> {
    /// Subscribe `handler` to `filter` (`None` = every category).
    pub fn register<F>(&self, filter: Option<EventCategory>, handler: F) -> Result<HandlerId, BusError>
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let mut registry = self.registry.lock();

        if let Some(category) = filter {
            if !registry.categories.contains(&category) {
                return Err(BusError::InvalidCategory(category));
            }
        }

        let registered = registry.entries.len();
        if registered >= registry.max_handlers || registry.entries.try_reserve(1).is_err() {
            return Err(BusError::OutOfMemory(registered));
        }

        let id = HandlerId(registry.next_id);
        registry.next_id += 1;
        registry.entries.push(Registration {
            id,
            filter,
            handler: Arc::new(handler),
        });

        gps_debug!("handler {:?} registered for {}", id, FilterLabel(filter));
        Ok(id)
    }

    /// Remove the registration `id` made with the same `filter`.
    /// A failed call leaves the registrations unchanged.
    pub fn unregister(&self, filter: Option<EventCategory>, id: HandlerId) -> Result<(), BusError> {
        let mut registry = self.registry.lock();
        let pos = registry
            .entries
            .iter()
            .position(|r| r.id == id && r.filter == filter)
            .ok_or(BusError::NotFound(id, FilterLabel(filter)))?;

        registry.entries.remove(pos);
        gps_debug!("handler {:?} unregistered from {}", id, FilterLabel(filter));
        Ok(())
    }

    pub fn handler_count(&self) -> usize {
        self.registry.lock().entries.len()
    }

    /// Queue `event`, waiting at most `timeout` for room.
    /// On failure the event is dropped.
    pub fn post(&self, event: E, timeout: Duration) -> Result<(), BusError> {
        self.tx.send_timeout(event, timeout).map_err(|e| match e {
            SendTimeoutError::Timeout(_) => BusError::QueueFull(timeout),
            SendTimeoutError::Disconnected(_) => BusError::Closed,
        })
    }

    /// Handlers matching `category`, in registration order.
    fn snapshot(&self, category: EventCategory) -> Vec<Handler<E>> {
        self.registry
            .lock()
            .entries
            .iter()
            .filter(|r| r.matches(category))
            .map(|r| Arc::clone(&r.handler))
            .collect()
    }
}

/// Single-consumer event loop.
///
/// Producers post through a [`BusHandle`]; the owner drives delivery by
/// calling [`pump`](EventBus::pump) on its own thread. Delivery is
/// synchronous, so handlers must not block.
pub struct EventBus<E> {
    handle: BusHandle<E>,
    rx: Receiver<E>,
}

impl<E: BusEvent> EventBus<E> {
    pub fn new(config: BusConfig) -> Self {
        let (tx, rx) = channel::bounded(config.queue_size);
        let registry = Registry {
            entries: Vec::with_capacity(config.max_handlers),
            next_id: 0,
            max_handlers: config.max_handlers,
            categories: config.categories,
        };

        Self {
            handle: BusHandle {
                registry: Arc::new(Mutex::new(registry)),
                tx,
            },
            rx,
        }
    }

    pub fn handle(&self) -> BusHandle<E> {
        self.handle.clone()
    }

    pub fn register<F>(&self, filter: Option<EventCategory>, handler: F) -> Result<HandlerId, BusError>
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.handle.register(filter, handler)
    }

    pub fn unregister(&self, filter: Option<EventCategory>, id: HandlerId) -> Result<(), BusError> {
        self.handle.unregister(filter, id)
    }

    pub fn post(&self, event: E, timeout: Duration) -> Result<(), BusError> {
        self.handle.post(event, timeout)
    }

    /// Events waiting for delivery.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    /// Deliver events for up to `timeout`.
    ///
    /// Each event goes to every matching handler, in registration order,
    /// before the next one is dequeued. Returns how many events were
    /// delivered.
    pub fn pump(&self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut delivered = 0;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let event = match self.rx.recv_timeout(remaining) {
                Ok(event) => event,
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            };

            self.deliver(&event);
            delivered += 1;
        }

        delivered
    }

    /// Deliver only what is already queued, without waiting.
    pub fn pump_pending(&self) -> usize {
        let mut delivered = 0;
        while let Ok(event) = self.rx.try_recv() {
            self.deliver(&event);
            delivered += 1;
        }
        delivered
    }

    /// A panicking handler is logged and skipped; the remaining handlers
    /// still see the event.
    fn deliver(&self, event: &E) {
        let category = event.category();
        for handler in self.handle.snapshot(category) {
            if panic::catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                gps_error!("{} handler panicked, event skipped for it", category);
            }
        }
    }
}
