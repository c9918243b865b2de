// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Kubernetes Events emitted on watched resources.
//!
//! Every terminal outcome of a reconcile is reported as one Event on the
//! watched resource: certificates created, updated or deleted, invalid
//! configuration, and ownership conflicts. Events are the primary diagnostic
//! channel for users, visible through `kubectl describe ingress`.
//!
//! Publishing is fire-and-forget. A failed Event is logged and never fails
//! the reconcile.

use crate::constants::{
    CONTROLLER_NAME, REASON_BAD_CONFIG, REASON_CREATE_CERTIFICATE, REASON_DELETE_CERTIFICATE,
    REASON_NOT_OWNED, REASON_SECRET_CONFLICT, REASON_UPDATE_CERTIFICATE,
};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::warn;

/// Outcomes reported to users.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ShimEvent {
    /// A Certificate was created.
    Created { name: String },
    /// An existing Certificate was patched (or adopted) to match the resource.
    Updated { name: String },
    /// A Certificate the resource no longer requests was deleted.
    Deleted { name: String },
    /// Annotations or TLS blocks are invalid; carries the error message.
    BadConfig { message: String },
    /// Another resource is the canonical owner of a requested secret.
    Conflict { secret_name: String, owner: String },
    /// A Certificate with the requested name exists and is not managed by certshim.
    NotOwned { name: String },
}

impl ShimEvent {
    #[must_use]
    pub fn event_type(&self) -> EventType {
        match self {
            ShimEvent::Created { .. } | ShimEvent::Updated { .. } | ShimEvent::Deleted { .. } => {
                EventType::Normal
            }
            ShimEvent::BadConfig { .. }
            | ShimEvent::Conflict { .. }
            | ShimEvent::NotOwned { .. } => EventType::Warning,
        }
    }

    /// Machine-readable reason, shown in the REASON column.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            ShimEvent::Created { .. } => REASON_CREATE_CERTIFICATE,
            ShimEvent::Updated { .. } => REASON_UPDATE_CERTIFICATE,
            ShimEvent::Deleted { .. } => REASON_DELETE_CERTIFICATE,
            ShimEvent::BadConfig { .. } => REASON_BAD_CONFIG,
            ShimEvent::Conflict { .. } => REASON_SECRET_CONFLICT,
            ShimEvent::NotOwned { .. } => REASON_NOT_OWNED,
        }
    }

    /// Action taken, shown in the ACTION column.
    #[must_use]
    pub fn action(&self) -> &'static str {
        match self {
            ShimEvent::Created { .. } => "Create",
            ShimEvent::Updated { .. } => "Update",
            ShimEvent::Deleted { .. } => "Delete",
            ShimEvent::BadConfig { .. }
            | ShimEvent::Conflict { .. }
            | ShimEvent::NotOwned { .. } => "Reconcile",
        }
    }

    /// Human-readable message.
    #[must_use]
    pub fn note(&self) -> String {
        match self {
            ShimEvent::Created { name } => format!("Successfully created Certificate \"{name}\""),
            ShimEvent::Updated { name } => format!("Successfully updated Certificate \"{name}\""),
            ShimEvent::Deleted { name } => format!("Deleted Certificate \"{name}\""),
            ShimEvent::BadConfig { message } => {
                format!("Skipped issuing certificates: {message}")
            }
            ShimEvent::Conflict { secret_name, owner } => format!(
                "Secret \"{secret_name}\" is requested by {owner}, which owns its Certificate"
            ),
            ShimEvent::NotOwned { name } => format!(
                "Certificate \"{name}\" already exists and is not managed by {CONTROLLER_NAME}"
            ),
        }
    }
}

/// Destination of [`ShimEvent`]s.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Publish `event` on `subject`. Never fails; errors are logged.
    async fn publish(&self, subject: &ObjectReference, event: ShimEvent);
}

/// [`EventSink`] writing `events.k8s.io` Events through `kube`'s [`Recorder`].
pub struct KubeEventSink {
    recorder: Recorder,
}

impl KubeEventSink {
    #[must_use]
    pub fn new(client: Client) -> Self {
        let reporter = Reporter {
            controller: CONTROLLER_NAME.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventSink for KubeEventSink {
    async fn publish(&self, subject: &ObjectReference, event: ShimEvent) {
        let reason = event.reason();
        let kube_event = Event {
            type_: event.event_type(),
            reason: reason.to_string(),
            note: Some(event.note()),
            action: event.action().to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&kube_event, subject).await {
            warn!(
                reason,
                name = subject.name.as_deref().unwrap_or_default(),
                namespace = subject.namespace.as_deref().unwrap_or_default(),
                error = %e,
                "Failed to publish Kubernetes event"
            );
        }
    }
}

/// An event captured by [`MemoryEventSink`].
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedEvent {
    pub subject: ObjectReference,
    pub event: ShimEvent,
}

/// [`EventSink`] keeping events in memory, for tests.
#[derive(Clone, Default)]
pub struct MemoryEventSink {
    events: Arc<Mutex<Vec<RecordedEvent>>>,
}

impl MemoryEventSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Events published so far, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().clone()
    }

    /// Reasons of the events published so far, oldest first.
    #[must_use]
    pub fn reasons(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(|e| e.event.reason()).collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

#[async_trait]
impl EventSink for MemoryEventSink {
    async fn publish(&self, subject: &ObjectReference, event: ShimEvent) {
        self.events.lock().push(RecordedEvent {
            subject: subject.clone(),
            event,
        });
    }
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod events_tests;
