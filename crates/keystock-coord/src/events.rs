//! # Change Notifier
//!
//! In-process publish/subscribe for coordination events. Subscribers are
//! cache invalidators and UI refresh hooks; the notifier is not an audit log
//! and not an outbox.
//!
//! ## Delivery Semantics
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  publish(event)                                                         │
//! │     │                                                                   │
//! │     │  snapshot subscriber list (lock released before delivery)        │
//! │     ▼                                                                   │
//! │  ┌──────────┐   ┌──────────┐   ┌──────────┐                            │
//! │  │ handler 1│   │ handler 2│   │ handler 3│   synchronous, in order    │
//! │  │   Ok     │   │  Err/💥  │   │   Ok     │   of subscription          │
//! │  └──────────┘   └────┬─────┘   └──────────┘                            │
//! │                      │ logged, isolated                                 │
//! │                      ▼                                                  │
//! │  DeliveryReport { delivered: 2, failed: 1 }                            │
//! │                                                                         │
//! │  • at most once per subscriber per publish                             │
//! │  • no persistence, no retry                                            │
//! │  • a failing handler never rolls back the change it was told about     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Lifecycle
//! `ChangeNotifier::new` → `subscribe` / `Subscription::unsubscribe` →
//! `shutdown`. The notifier is injected into the coordinator rather than held
//! as global state; clones share one subscriber list.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use keystock_core::{Source, UnitStatus};

// =============================================================================
// Event Types
// =============================================================================

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    ProductCreated,
    ProductUpdated,
    ProductDeleted,
    UnitCreated,
    UnitStatusChanged,
    UnitDeleted,
    StockUpdated,
    BarcodeAllocated,
    BarcodeReleased,
}

impl ChangeKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::ProductCreated => "product_created",
            ChangeKind::ProductUpdated => "product_updated",
            ChangeKind::ProductDeleted => "product_deleted",
            ChangeKind::UnitCreated => "unit_created",
            ChangeKind::UnitStatusChanged => "unit_status_changed",
            ChangeKind::UnitDeleted => "unit_deleted",
            ChangeKind::StockUpdated => "stock_updated",
            ChangeKind::BarcodeAllocated => "barcode_allocated",
            ChangeKind::BarcodeReleased => "barcode_released",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed side-table of event details. Every field is optional; each event
/// kind fills the ones that apply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Owning product of a unit event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,

    /// New stock figure for `stock_updated`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stock: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_status: Option<UnitStatus>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_status: Option<UnitStatus>,

    /// Barcode allocated or released.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub barcode: Option<String>,

    /// Set by the auditor when the event comes from a repair.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repair: Option<String>,
}

/// A coordination event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub source: Source,
    pub entity_id: String,
    pub metadata: EventMetadata,
    pub timestamp: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn new(kind: ChangeKind, source: Source, entity_id: impl Into<String>) -> Self {
        ChangeEvent {
            kind,
            source,
            entity_id: entity_id.into(),
            metadata: EventMetadata::default(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: EventMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn product(mut self, product_id: impl Into<String>) -> Self {
        self.metadata.product_id = Some(product_id.into());
        self
    }

    pub fn stock(mut self, stock: i64) -> Self {
        self.metadata.stock = Some(stock);
        self
    }

    pub fn transition(mut self, from: UnitStatus, to: UnitStatus) -> Self {
        self.metadata.from_status = Some(from);
        self.metadata.to_status = Some(to);
        self
    }

    pub fn barcode(mut self, barcode: impl Into<String>) -> Self {
        self.metadata.barcode = Some(barcode.into());
        self
    }

    pub fn repair(mut self, finding_kind: &str) -> Self {
        self.metadata.repair = Some(finding_kind.to_string());
        self
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Error a handler may return. Logged, never propagated.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Receives coordination events.
///
/// Implemented for any `Fn(&ChangeEvent) -> Result<(), HandlerError>`.
pub trait ChangeHandler: Send + Sync {
    fn handle(&self, event: &ChangeEvent) -> Result<(), HandlerError>;
}

impl<F> ChangeHandler for F
where
    F: Fn(&ChangeEvent) -> Result<(), HandlerError> + Send + Sync,
{
    fn handle(&self, event: &ChangeEvent) -> Result<(), HandlerError> {
        self(event)
    }
}

/// Outcome of one publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
}

// =============================================================================
// Notifier
// =============================================================================

type Subscribers = Vec<(u64, Arc<dyn ChangeHandler>)>;

struct Inner {
    subscribers: RwLock<Subscribers>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl Inner {
    fn remove(&self, id: u64) -> bool {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }
}

/// In-process pub/sub channel for [`ChangeEvent`]s.
#[derive(Clone)]
pub struct ChangeNotifier {
    inner: Arc<Inner>,
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ChangeNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeNotifier")
            .field("subscribers", &self.subscriber_count())
            .field("closed", &self.is_shut_down())
            .finish()
    }
}

impl ChangeNotifier {
    pub fn new() -> Self {
        ChangeNotifier {
            inner: Arc::new(Inner {
                subscribers: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Registers a handler. After [`shutdown`](Self::shutdown) the returned
    /// subscription is inactive and the handler is never called.
    pub fn subscribe<H>(&self, handler: H) -> Subscription
    where
        H: ChangeHandler + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        if self.is_shut_down() {
            warn!(subscription = id, "Subscribe after notifier shutdown ignored");
            return Subscription {
                id,
                notifier: Weak::new(),
            };
        }

        self.inner
            .subscribers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((id, Arc::new(handler)));

        debug!(subscription = id, "Subscriber added");
        Subscription {
            id,
            notifier: Arc::downgrade(&self.inner),
        }
    }

    /// Delivers `event` to every current subscriber.
    ///
    /// Handlers run on the caller's task. A handler that returns an error or
    /// panics is logged and counted in `failed`; the rest still run.
    pub fn publish(&self, event: &ChangeEvent) -> DeliveryReport {
        if self.is_shut_down() {
            return DeliveryReport::default();
        }

        let snapshot: Vec<(u64, Arc<dyn ChangeHandler>)> = self
            .inner
            .subscribers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();

        let mut report = DeliveryReport::default();
        for (id, handler) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| handler.handle(event))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    report.failed += 1;
                    warn!(
                        subscription = id,
                        kind = %event.kind,
                        entity_id = %event.entity_id,
                        error = %e,
                        "Change handler failed"
                    );
                }
                Err(_) => {
                    report.failed += 1;
                    warn!(
                        subscription = id,
                        kind = %event.kind,
                        entity_id = %event.entity_id,
                        "Change handler panicked"
                    );
                }
            }
        }

        debug!(
            kind = %event.kind,
            source = %event.source,
            entity_id = %event.entity_id,
            delivered = report.delivered,
            failed = report.failed,
            "Event published"
        );
        report
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Drops every subscriber and stops delivery for good.
    pub fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let dropped = {
            let mut subscribers = self
                .inner
                .subscribers
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let count = subscribers.len();
            subscribers.clear();
            count
        };
        debug!(dropped, "Change notifier shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

/// Handle returned by [`ChangeNotifier::subscribe`].
///
/// Dropping it does not unsubscribe; call [`unsubscribe`](Self::unsubscribe).
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    notifier: Weak<Inner>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Removes the handler. Returns false if it was already gone.
    pub fn unsubscribe(self) -> bool {
        match self.notifier.upgrade() {
            Some(inner) => {
                let removed = inner.remove(self.id);
                if removed {
                    debug!(subscription = self.id, "Subscriber removed");
                }
                removed
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn event(kind: ChangeKind) -> ChangeEvent {
        ChangeEvent::new(kind, Source::Supplier, "p1")
    }

    fn recorder() -> (Arc<Mutex<Vec<ChangeKind>>>, impl ChangeHandler + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler = move |e: &ChangeEvent| -> Result<(), HandlerError> {
            sink.lock().unwrap().push(e.kind);
            Ok(())
        };
        (seen, handler)
    }

    #[test]
    fn test_publish_reaches_every_subscriber() {
        let notifier = ChangeNotifier::new();
        let (first, h1) = recorder();
        let (second, h2) = recorder();
        notifier.subscribe(h1);
        notifier.subscribe(h2);

        let report = notifier.publish(&event(ChangeKind::ProductCreated));
        assert_eq!(report, DeliveryReport { delivered: 2, failed: 0 });
        assert_eq!(*first.lock().unwrap(), vec![ChangeKind::ProductCreated]);
        assert_eq!(*second.lock().unwrap(), vec![ChangeKind::ProductCreated]);
    }

    #[test]
    fn test_failing_handlers_are_isolated() {
        let notifier = ChangeNotifier::new();
        notifier.subscribe(|_: &ChangeEvent| -> Result<(), HandlerError> {
            Err("cache offline".into())
        });
        notifier.subscribe(|_: &ChangeEvent| -> Result<(), HandlerError> {
            panic!("handler bug")
        });
        let (seen, handler) = recorder();
        notifier.subscribe(handler);

        let report = notifier.publish(&event(ChangeKind::StockUpdated));
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 2);
        assert_eq!(seen.lock().unwrap().len(), 1);

        // Still usable after a panic
        let report = notifier.publish(&event(ChangeKind::StockUpdated));
        assert_eq!(report.delivered, 1);
    }

    #[test]
    fn test_unsubscribe() {
        let notifier = ChangeNotifier::new();
        let (seen, handler) = recorder();
        let subscription = notifier.subscribe(handler);
        assert_eq!(notifier.subscriber_count(), 1);

        assert!(subscription.unsubscribe());
        assert_eq!(notifier.subscriber_count(), 0);

        notifier.publish(&event(ChangeKind::UnitCreated));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_handler_may_unsubscribe_during_delivery() {
        let notifier = ChangeNotifier::new();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let slot_in_handler = Arc::clone(&slot);

        let subscription = notifier.subscribe(move |_: &ChangeEvent| -> Result<(), HandlerError> {
            if let Some(own) = slot_in_handler.lock().unwrap().take() {
                own.unsubscribe();
            }
            Ok(())
        });
        *slot.lock().unwrap() = Some(subscription);

        assert_eq!(notifier.publish(&event(ChangeKind::UnitDeleted)).delivered, 1);
        assert_eq!(notifier.subscriber_count(), 0);
        assert_eq!(notifier.publish(&event(ChangeKind::UnitDeleted)).delivered, 0);
    }

    #[test]
    fn test_shutdown_stops_delivery() {
        let notifier = ChangeNotifier::new();
        let (seen, handler) = recorder();
        notifier.subscribe(handler);

        notifier.shutdown();
        assert!(notifier.is_shut_down());
        assert_eq!(notifier.subscriber_count(), 0);
        assert_eq!(notifier.publish(&event(ChangeKind::ProductDeleted)), DeliveryReport::default());
        assert!(seen.lock().unwrap().is_empty());

        let (_, late) = recorder();
        let subscription = notifier.subscribe(late);
        assert_eq!(notifier.subscriber_count(), 0);
        assert!(!subscription.unsubscribe());
    }

    #[test]
    fn test_event_serialization() {
        let event = ChangeEvent::new(ChangeKind::UnitStatusChanged, Source::Inventory, "u1")
            .product("p1")
            .transition(UnitStatus::Available, UnitStatus::Sold);

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "unit_status_changed");
        assert_eq!(json["source"], "inventory");
        assert_eq!(json["metadata"]["to_status"], "sold");
        assert!(json["metadata"].get("barcode").is_none());
    }
}
