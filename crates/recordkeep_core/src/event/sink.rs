//! Event sink contract and bundled sinks.
//!
//! # Invariants
//! - `publish` is called synchronously, after the write it reports.
//! - Sinks own delivery failures; the core never retries.
//! - Writes made inside a caller transaction are only durable on commit, so
//!   such callers publish through `OutboxSink` and flush after committing.

use crate::event::change_event::ChangeEvent;
use log::{debug, info, warn};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Receiver of change events.
pub trait EventSink {
    fn publish(&self, event: ChangeEvent);
}

impl<T: EventSink + ?Sized> EventSink for &T {
    fn publish(&self, event: ChangeEvent) {
        (**self).publish(event);
    }
}

impl<T: EventSink + ?Sized> EventSink for Arc<T> {
    fn publish(&self, event: ChangeEvent) {
        (**self).publish(event);
    }
}

/// Hands events to a channel receiver.
///
/// A dropped receiver is logged and the event discarded.
impl EventSink for Sender<ChangeEvent> {
    fn publish(&self, event: ChangeEvent) {
        let kind = event.kind();
        if let Err(err) = self.send(event) {
            warn!(
                "event=change_publish module=event status=error sink=channel kind={kind} natural_id={} error=receiver_disconnected",
                err.0.natural_id()
            );
        }
    }
}

/// Keeps every published event in memory, in publish order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ChangeEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the events seen so far.
    pub fn events(&self) -> Vec<ChangeEvent> {
        self.lock().clone()
    }

    /// Drains and returns the events seen so far.
    pub fn take(&self) -> Vec<ChangeEvent> {
        std::mem::take(&mut *self.lock())
    }

    pub fn reset(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ChangeEvent>> {
        // A panicking test thread must not hide events from the others.
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EventSink for RecordingSink {
    fn publish(&self, event: ChangeEvent) {
        self.lock().push(event);
    }
}

/// Writes one metadata-only log line per event.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingSink;

impl EventSink for LoggingSink {
    fn publish(&self, event: ChangeEvent) {
        info!(
            "event=record_changed module=event status=ok kind={} natural_id={} before_version={} after_version={}",
            event.kind(),
            event.natural_id(),
            version_field(event.before().map(|it| it.version())),
            version_field(event.after().map(|it| it.version()))
        );
    }
}

/// Holds events back until the caller's transaction outcome is known.
///
/// `flush` forwards buffered events to the downstream sink in publish order;
/// `discard` drops them after a rollback. Events still buffered when the
/// outbox is dropped are never delivered.
#[derive(Debug, Default)]
pub struct OutboxSink<E: EventSink> {
    pending: Mutex<Vec<ChangeEvent>>,
    downstream: E,
}

impl<E: EventSink> OutboxSink<E> {
    pub fn new(downstream: E) -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
            downstream,
        }
    }

    pub fn downstream(&self) -> &E {
        &self.downstream
    }

    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    /// Delivers buffered events downstream. Call after `commit`.
    pub fn flush(&self) -> usize {
        let events = std::mem::take(&mut *self.lock());
        let flushed = events.len();
        for event in events {
            self.downstream.publish(event);
        }
        debug!("event=outbox_flush module=event status=ok count={flushed}");
        flushed
    }

    /// Drops buffered events. Call after `rollback`.
    pub fn discard(&self) -> usize {
        let discarded = std::mem::take(&mut *self.lock()).len();
        debug!("event=outbox_discard module=event status=ok count={discarded}");
        discarded
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ChangeEvent>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<E: EventSink> EventSink for OutboxSink<E> {
    fn publish(&self, event: ChangeEvent) {
        self.lock().push(event);
    }
}

fn version_field(version: Option<i64>) -> String {
    version.map_or_else(|| "none".to_string(), |it| it.to_string())
}
