//! Change events and the sinks that receive them.
//!
//! # Responsibility
//! - Define the `(before, after)` payload published after each write.
//! - Define the explicit sink contract that replaces ambient publishing.

pub mod change_event;
pub mod sink;

pub use change_event::{ChangeEvent, ChangeKind};
pub use sink::{EventSink, LoggingSink, OutboxSink, RecordingSink};
