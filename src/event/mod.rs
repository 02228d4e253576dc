//! Event Module - session audit trail
//!
//! - `log`: append-only `EventLog` with typed `EventKind`s
//! - `emitter`: `EventEmitter` trait for injection (`NoopEmitter` for quiet runs)

mod emitter;
mod log;

pub use emitter::{EventEmitter, NoopEmitter};
pub use log::{Event, EventKind, EventLog};
