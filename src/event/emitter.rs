//! EventEmitter trait
//!
//! The runtime emits through `Arc<dyn EventEmitter>`: the `EventLog` in
//! production, `NoopEmitter` where nobody listens (benches, the CLI checker).

use super::log::{EventKind, EventLog};

pub trait EventEmitter: Send + Sync {
    /// Emit an event and return its ID
    fn emit(&self, kind: EventKind) -> u64;
}

impl EventEmitter for EventLog {
    fn emit(&self, kind: EventKind) -> u64 {
        EventLog::emit(self, kind)
    }
}

/// Discards every event, always returns 0
#[derive(Debug, Clone, Default)]
pub struct NoopEmitter;

impl NoopEmitter {
    pub fn new() -> Self {
        Self
    }
}

impl EventEmitter for NoopEmitter {
    fn emit(&self, _kind: EventKind) -> u64 {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn trait_is_object_safe() {
        fn accepts(_: &dyn EventEmitter) {}
        accepts(&EventLog::new());
        accepts(&NoopEmitter::new());
    }

    #[test]
    fn log_through_arc_dyn() {
        let log = EventLog::new();
        let emitter: Arc<dyn EventEmitter> = Arc::new(log.clone());
        assert_eq!(emitter.emit(EventKind::RuntimeTornDown), 0);
        assert_eq!(emitter.emit(EventKind::RuntimeTornDown), 1);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn noop_records_nothing() {
        let noop = NoopEmitter::new();
        assert_eq!(noop.emit(EventKind::RuntimeTornDown), 0);
        assert_eq!(noop.emit(EventKind::RuntimeTornDown), 0);
    }
}
