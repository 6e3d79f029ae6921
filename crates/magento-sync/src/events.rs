//! # Domain Event Bus
//!
//! Local state transitions published by the host, dispatched to the
//! handlers subscribed at startup.
//!
//! ## Dispatch
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  host ──publish(InvoicePaid { invoice_id })──► EventBus                 │
//! │                                                  │                      │
//! │               ┌──────────────────────────────────┼──────────────┐       │
//! │               ▼                                  ▼              ▼       │
//! │   predicate(event)? ──► handler.handle   predicate? ──► ...   ...       │
//! │               │                                                         │
//! │               └──► JobHandles of the export jobs enqueued               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Handlers run in subscription order. The first failing handler stops the
//! dispatch and its error is returned to the publisher.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use magento_core::{EntityKind, InternalId};

use crate::error::SyncResult;
use crate::queue::JobHandle;

/// A local state transition the connector may react to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    /// An invoice was posted.
    InvoiceValidated { invoice_id: InternalId },
    /// An invoice became fully paid.
    InvoicePaid { invoice_id: InternalId },
    /// A delivery was validated.
    PickingDone { picking_id: InternalId },
    /// A tracking reference was set on a delivery.
    TrackingAssigned { picking_id: InternalId },
}

impl DomainEvent {
    /// Kind of the record that transitioned.
    pub fn entity(&self) -> EntityKind {
        match self {
            DomainEvent::InvoiceValidated { .. } | DomainEvent::InvoicePaid { .. } => {
                EntityKind::Invoice
            }
            DomainEvent::PickingDone { .. } | DomainEvent::TrackingAssigned { .. } => {
                EntityKind::Picking
            }
        }
    }

    /// Local id of the record that transitioned.
    pub fn record_id(&self) -> &InternalId {
        match self {
            DomainEvent::InvoiceValidated { invoice_id } | DomainEvent::InvoicePaid { invoice_id } => {
                invoice_id
            }
            DomainEvent::PickingDone { picking_id } | DomainEvent::TrackingAssigned { picking_id } => {
                picking_id
            }
        }
    }

    pub fn transition(&self) -> &'static str {
        match self {
            DomainEvent::InvoiceValidated { .. } => "validated",
            DomainEvent::InvoicePaid { .. } => "paid",
            DomainEvent::PickingDone { .. } => "done",
            DomainEvent::TrackingAssigned { .. } => "tracking_assigned",
        }
    }
}

impl fmt::Display for DomainEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.entity(), self.record_id(), self.transition())
    }
}

/// Reaction to domain events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Handles one event, returning the jobs it enqueued.
    async fn handle(&self, event: &DomainEvent) -> SyncResult<Vec<JobHandle>>;
}

/// Selects the events a handler sees.
pub type EventPredicate = Arc<dyn Fn(&DomainEvent) -> bool + Send + Sync>;

struct Subscription {
    predicate: EventPredicate,
    handler: Arc<dyn EventHandler>,
}

/// Explicit publish/subscribe dispatch.
#[derive(Default)]
pub struct EventBus {
    subscriptions: Vec<Subscription>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.subscriptions.iter().map(|s| s.handler.name()).collect();
        f.debug_struct("EventBus").field("handlers", &names).finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for the events matching `predicate`.
    pub fn subscribe<P>(&mut self, predicate: P, handler: Arc<dyn EventHandler>) -> &mut Self
    where
        P: Fn(&DomainEvent) -> bool + Send + Sync + 'static,
    {
        debug!(handler = handler.name(), "Event handler subscribed");
        self.subscriptions.push(Subscription {
            predicate: Arc::new(predicate),
            handler,
        });
        self
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Dispatches an event to every matching handler.
    #[instrument(skip(self), fields(event = %event))]
    pub async fn publish(&self, event: DomainEvent) -> SyncResult<Vec<JobHandle>> {
        let mut jobs = Vec::new();
        for sub in &self.subscriptions {
            if !(sub.predicate)(&event) {
                continue;
            }
            let enqueued = sub.handler.handle(&event).await?;
            debug!(handler = sub.handler.name(), jobs = enqueued.len(), "Event handled");
            jobs.extend(enqueued);
        }
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<DomainEvent>>,
    }

    #[async_trait]
    impl EventHandler for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        async fn handle(&self, event: &DomainEvent) -> SyncResult<Vec<JobHandle>> {
            self.seen.lock().unwrap().push(event.clone());
            Ok(Vec::new())
        }
    }

    struct Failing;

    #[async_trait]
    impl EventHandler for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn handle(&self, _event: &DomainEvent) -> SyncResult<Vec<JobHandle>> {
            Err(SyncError::ExportPrecondition("nope".into()))
        }
    }

    #[tokio::test]
    async fn test_predicate_filters_events() {
        let recorder = Arc::new(Recorder::default());
        let mut bus = EventBus::new();
        bus.subscribe(|e| e.entity() == EntityKind::Picking, recorder.clone());

        bus.publish(DomainEvent::InvoicePaid {
            invoice_id: InternalId::new("inv"),
        })
        .await
        .unwrap();
        bus.publish(DomainEvent::PickingDone {
            picking_id: InternalId::new("pick"),
        })
        .await
        .unwrap();

        let seen = recorder.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].transition(), "done");
    }

    #[tokio::test]
    async fn test_failing_handler_is_reported() {
        let mut bus = EventBus::new();
        bus.subscribe(|_| true, Arc::new(Failing));
        assert_eq!(bus.len(), 1);

        let err = bus
            .publish(DomainEvent::InvoiceValidated {
                invoice_id: InternalId::new("inv"),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::ExportPrecondition(_)));
    }

    #[test]
    fn test_event_display() {
        let event = DomainEvent::TrackingAssigned {
            picking_id: InternalId::new("p-1"),
        };
        assert_eq!(event.to_string(), "picking p-1 tracking_assigned");
    }
}
