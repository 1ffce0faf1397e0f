//! Domain aggregate over one versioned record.
//!
//! # Responsibility
//! - Own exactly one `Record` plus the snapshot last read from storage.
//! - Expose scoped mutation, save and delete with change-event emission.
//!
//! # Invariants
//! - States move Unsaved -> Saved -> Deleted, and Deleted is terminal.
//! - Every accessor fails with `InvalidState` once deleted.
//! - An event is published only after the write that justifies it, and
//!   never for a save that left storage untouched. Under a caller-owned
//!   transaction the sink should be an `OutboxSink`, flushed after commit.
//! - Parent and child are independent roots: neither save touches the
//!   other's row or version.

use crate::error::{DomainError, DomainResult};
use crate::event::{ChangeEvent, EventSink};
use crate::model::record::{MutableRecord, Record, RecordId};
use crate::model::resource::Resource;
use crate::repo::record_repo::RecordRepository;
use crate::store::record_store::{RecordStore, Upserted};
use log::debug;
use std::collections::BTreeSet;
use std::fmt::{Debug, Formatter};

/// Creates and loads aggregates over one store and one event sink.
///
/// Replaces container-managed wiring: both collaborators are passed in
/// explicitly, and every aggregate borrows its factory.
pub struct AggregateFactory<R: RecordRepository, E: EventSink> {
    store: RecordStore<R>,
    sink: E,
}

impl<R: RecordRepository, E: EventSink> AggregateFactory<R, E> {
    pub fn new(repo: R, sink: E) -> Self {
        Self {
            store: RecordStore::new(repo),
            sink,
        }
    }

    pub fn store(&self) -> &RecordStore<R> {
        &self.store
    }

    /// Builds an unsaved aggregate. No I/O.
    ///
    /// # Errors
    /// - `InvalidState` when `natural_id` is empty or blank.
    pub fn create_new(&self, natural_id: impl Into<String>) -> DomainResult<Aggregate<'_, R, E>> {
        let natural_id = natural_id.into();
        if natural_id.trim().is_empty() {
            return Err(DomainError::InvalidState(
                "natural id must not be empty".to_string(),
            ));
        }
        Ok(Aggregate::unsaved(self, Record::new(natural_id)))
    }

    pub fn find_existing(&self, natural_id: &str) -> DomainResult<Option<Aggregate<'_, R, E>>> {
        Ok(self
            .store
            .find_existing(natural_id)?
            .map(|record| Aggregate::loaded(self, record)))
    }

    pub fn find_existing_or_create_new(&self, natural_id: &str) -> DomainResult<Aggregate<'_, R, E>> {
        match self.find_existing(natural_id)? {
            Some(existing) => Ok(existing),
            None => self.create_new(natural_id),
        }
    }

    /// Loads every stored aggregate, ordered by natural id.
    pub fn all(&self) -> DomainResult<Vec<Aggregate<'_, R, E>>> {
        Ok(self
            .store
            .all()?
            .into_iter()
            .map(|record| Aggregate::loaded(self, record))
            .collect())
    }

    /// Loads the stored aggregates whose parent is `parent_natural_id`.
    pub fn find_owned(&self, parent_natural_id: &str) -> DomainResult<Vec<Aggregate<'_, R, E>>> {
        Ok(self
            .store
            .find_owned(parent_natural_id)?
            .into_iter()
            .map(|record| Aggregate::loaded(self, record))
            .collect())
    }

    fn notify_changed(&self, event: ChangeEvent) {
        self.sink.publish(event);
    }
}

enum State {
    Live(Record),
    Deleted { natural_id: String },
}

/// Mutable, identity-bearing wrapper around one record.
///
/// Not synchronized: callers serialize access to a single instance.
pub struct Aggregate<'f, R: RecordRepository, E: EventSink> {
    factory: &'f AggregateFactory<R, E>,
    snapshot: Option<Resource>,
    state: State,
}

impl<'f, R: RecordRepository, E: EventSink> Aggregate<'f, R, E> {
    fn unsaved(factory: &'f AggregateFactory<R, E>, record: Record) -> Self {
        Self {
            factory,
            snapshot: None,
            state: State::Live(record),
        }
    }

    fn loaded(factory: &'f AggregateFactory<R, E>, record: Record) -> Self {
        Self {
            factory,
            snapshot: Some(Resource::from(&record)),
            state: State::Live(record),
        }
    }

    fn record(&self) -> DomainResult<&Record> {
        match &self.state {
            State::Live(record) => Ok(record),
            State::Deleted { natural_id } => Err(deleted(natural_id)),
        }
    }

    fn record_mut(&mut self) -> DomainResult<&mut Record> {
        match &mut self.state {
            State::Live(record) => Ok(record),
            State::Deleted { natural_id } => Err(deleted(natural_id)),
        }
    }

    pub fn natural_id(&self) -> DomainResult<&str> {
        Ok(&self.record()?.natural_id)
    }

    pub fn surrogate_id(&self) -> DomainResult<Option<RecordId>> {
        Ok(self.record()?.id)
    }

    pub fn parent_natural_id(&self) -> DomainResult<Option<&str>> {
        Ok(self.record()?.parent_natural_id.as_deref())
    }

    pub fn value(&self) -> DomainResult<Option<&str>> {
        Ok(self.record()?.value.as_deref())
    }

    /// Child natural ids, sorted.
    pub fn children(&self) -> DomainResult<&BTreeSet<String>> {
        Ok(&self.record()?.children)
    }

    pub fn version(&self) -> DomainResult<i64> {
        Ok(self.record()?.version)
    }

    pub fn to_resource(&self) -> DomainResult<Resource> {
        Ok(Resource::from(self.record()?))
    }

    /// Whether this aggregate was loaded from or written to storage.
    pub fn is_existing(&self) -> bool {
        self.snapshot.is_some()
    }

    /// Whether in-memory state differs from the last persisted snapshot.
    pub fn is_changed(&self) -> bool {
        match &self.state {
            State::Live(record) => self.snapshot.as_ref() != Some(&Resource::from(record)),
            State::Deleted { .. } => false,
        }
    }

    /// Applies `mutator` to the owned record in place. No I/O, no event.
    ///
    /// Parent and child links are not reachable here; they change only
    /// through `assign_to`, `unassign_from_any`, `adopt` and `release`.
    pub fn update<F, T>(&mut self, mutator: F) -> DomainResult<&mut Self>
    where
        F: FnOnce(&mut MutableRecord<'_>) -> T,
    {
        let record = self.record_mut()?;
        mutator(&mut MutableRecord::new(record));
        Ok(self)
    }

    /// Persists the record and publishes a change event when storage changed.
    ///
    /// # Errors
    /// - `InvalidState` after deletion.
    /// - `ValidationFailure` for malformed records.
    /// - `ConcurrencyConflict` when another writer saved first; the
    ///   aggregate keeps its in-memory state and no event is published.
    pub fn save(&mut self) -> DomainResult<Upserted<&Self>> {
        let factory = self.factory;
        let before = self.snapshot.clone();
        let upserted = factory.store.upsert(self.record()?, before.as_ref())?;

        if !upserted.changed {
            return Ok(Upserted::unchanged(&*self));
        }

        let after = Resource::from(&upserted.value);
        self.state = State::Live(upserted.value);
        self.snapshot = Some(after.clone());

        debug!(
            "event=aggregate_save module=domain status=ok natural_id={} version={}",
            after.natural_id(),
            after.version()
        );
        let event = match before {
            Some(before) => ChangeEvent::updated(before, after),
            None => ChangeEvent::created(after),
        };
        factory.notify_changed(event);

        Ok(Upserted::changed(&*self))
    }

    /// Removes the row, invalidates this aggregate and publishes a deletion
    /// event carrying the last persisted snapshot.
    ///
    /// # Errors
    /// - `InvalidState` when never saved or already deleted.
    /// - `InvalidState` while assigned to a parent, or while children are
    ///   held in memory or still reference this record in storage.
    /// - `NotFound` when the row is already gone from storage.
    pub fn delete(&mut self) -> DomainResult<()> {
        let factory = self.factory;
        let record = self.record()?;
        let Some(before) = self.snapshot.clone() else {
            return Err(DomainError::InvalidState(format!(
                "cannot delete unsaved `{}`",
                record.natural_id
            )));
        };
        if let Some(parent) = record.parent_natural_id.as_deref() {
            return Err(DomainError::InvalidState(format!(
                "cannot delete `{}` while assigned to `{parent}`",
                record.natural_id
            )));
        }
        if !record.children.is_empty() {
            return Err(DomainError::InvalidState(format!(
                "cannot delete `{}` while it owns {} children",
                record.natural_id,
                record.children.len()
            )));
        }
        let owned = factory.store.find_owned(&record.natural_id)?;
        if !owned.is_empty() {
            return Err(DomainError::InvalidState(format!(
                "cannot delete `{}` while {} stored records are assigned to it",
                record.natural_id,
                owned.len()
            )));
        }

        factory.store.remove(before.natural_id())?;

        self.state = State::Deleted {
            natural_id: before.natural_id().to_string(),
        };
        self.snapshot = None;

        debug!(
            "event=aggregate_delete module=domain status=ok natural_id={} version={}",
            before.natural_id(),
            before.version()
        );
        factory.notify_changed(ChangeEvent::deleted(before));

        Ok(())
    }

    /// Assigns this aggregate to `parent`, updating both sides in memory.
    ///
    /// Same as `parent.adopt(self)`: each side advances its version only on
    /// its own next `save`.
    pub fn assign_to(&mut self, parent: &mut Aggregate<'_, R, E>) -> DomainResult<&mut Self> {
        parent.adopt(self)?;
        Ok(self)
    }

    /// Detaches this aggregate from its current parent on both sides.
    ///
    /// `current_parent` must be the aggregate this one is assigned to. An
    /// unassigned aggregate is left untouched.
    ///
    /// # Errors
    /// - `InvalidState` when either side is deleted or this aggregate is
    ///   assigned to a parent other than `current_parent`.
    pub fn unassign_from_any(
        &mut self,
        current_parent: &mut Aggregate<'_, R, E>,
    ) -> DomainResult<&mut Self> {
        if self.parent_natural_id()?.is_some() {
            current_parent.release(self)?;
        }
        Ok(self)
    }

    /// Makes `child` owned by this aggregate on both sides, in memory.
    ///
    /// Each side reaches storage, and advances its version, only on its own
    /// next `save`.
    ///
    /// # Errors
    /// - `InvalidState` when either side is deleted, when adopting itself,
    ///   or when `child` is assigned to a different parent.
    pub fn adopt(&mut self, child: &mut Aggregate<'_, R, E>) -> DomainResult<()> {
        let parent_natural_id = self.natural_id()?.to_string();
        let child_natural_id = child.natural_id()?.to_string();
        if parent_natural_id == child_natural_id {
            return Err(DomainError::InvalidState(format!(
                "`{parent_natural_id}` cannot adopt itself"
            )));
        }
        if let Some(current) = child.parent_natural_id()? {
            if current != parent_natural_id {
                return Err(DomainError::InvalidState(format!(
                    "`{child_natural_id}` is already assigned to `{current}`"
                )));
            }
        }

        child.update(|it| it.assign_to(parent_natural_id))?;
        self.update(|it| it.add_child(child_natural_id))?;
        Ok(())
    }

    /// Reverses `adopt` on both sides, in memory.
    ///
    /// # Errors
    /// - `InvalidState` when either side is deleted or `child` is not
    ///   assigned to this aggregate.
    pub fn release(&mut self, child: &mut Aggregate<'_, R, E>) -> DomainResult<()> {
        let parent_natural_id = self.natural_id()?.to_string();
        let child_natural_id = child.natural_id()?.to_string();
        if child.parent_natural_id()? != Some(parent_natural_id.as_str()) {
            return Err(DomainError::InvalidState(format!(
                "`{child_natural_id}` is not assigned to `{parent_natural_id}`"
            )));
        }

        child.update(|it| it.unassign_from_any())?;
        self.update(|it| it.remove_child(&child_natural_id))?;
        Ok(())
    }
}

impl<R: RecordRepository, E: EventSink> PartialEq for Aggregate<'_, R, E> {
    fn eq(&self, other: &Self) -> bool {
        let same_state = match (&self.state, &other.state) {
            (State::Live(a), State::Live(b)) => a == b,
            (State::Deleted { natural_id: a }, State::Deleted { natural_id: b }) => a == b,
            _ => false,
        };
        same_state && self.snapshot == other.snapshot
    }
}

impl<R: RecordRepository, E: EventSink> Debug for Aggregate<'_, R, E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut out = f.debug_struct("Aggregate");
        match &self.state {
            State::Live(record) => out.field("record", record),
            State::Deleted { natural_id } => out.field("deleted", natural_id),
        };
        out.field("snapshot", &self.snapshot).finish()
    }
}

fn deleted(natural_id: &str) -> DomainError {
    DomainError::InvalidState(format!("aggregate `{natural_id}` was deleted"))
}
