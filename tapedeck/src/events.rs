//! Event streams published by the engine.
//!
//! The engine emits structured events via a sink abstraction and never
//! knows how they are consumed. Sinks must be fast and must not fail;
//! anything expensive belongs behind a channel inside the sink.

use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Events emitted by the library engine.
#[derive(Clone, Debug)]
pub enum LibraryEvent {
    /// A drive's state changed (lock, load, unload, mount, failure).
    DriveChanged {
        /// Drive slot number.
        slot_number: u32,
        /// Name of the state change, e.g. `"Mount"` or `"Locked to Load"`.
        operation: String,
    },

    /// A cartridge completed a physical move.
    MediaChanged {
        /// Barcode of the cartridge that moved.
        volume_tag: String,
    },

    /// A line was appended to an operation's log.
    OperationLogging {
        /// Trace id of the operation, when the line belongs to one.
        trace_id: Option<Uuid>,
        /// The logged line.
        message: String,
    },
}

/// Sink for library events.
///
/// Implementations must be thread-safe; events may be emitted from
/// multiple operations concurrently.
pub trait EventSink: Send + Sync {
    /// Called for every event.
    fn emit(&self, event: &LibraryEvent);
}

/// No-op sink for when events are not consumed.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn emit(&self, _event: &LibraryEvent) {
        // Intentionally empty
    }
}

/// Sink that logs events using the `tracing` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: &LibraryEvent) {
        match event {
            LibraryEvent::DriveChanged {
                slot_number,
                operation,
            } => {
                info!(drive = slot_number, operation = %operation, "Drive changed");
            }
            LibraryEvent::MediaChanged { volume_tag } => {
                info!(volume_tag = %volume_tag, "Media changed");
            }
            LibraryEvent::OperationLogging { trace_id, message } => match trace_id {
                Some(trace_id) => info!(trace_id = %trace_id, "{}", message),
                None => info!("{}", message),
            },
        }
    }
}

/// Fans events out to every registered sink.
#[derive(Default, Clone)]
pub struct EventHub {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl EventHub {
    /// Create a hub with no sinks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sink.
    pub fn add_sink(&mut self, sink: Arc<dyn EventSink>) {
        self.sinks.push(sink);
    }

    /// Deliver an event to every sink.
    pub fn emit(&self, event: LibraryEvent) {
        for sink in &self.sinks {
            sink.emit(&event);
        }
    }
}

impl std::fmt::Debug for EventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHub")
            .field("sink_count", &self.sinks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Sink that records everything it sees.
    #[derive(Default)]
    pub struct RecordingSink {
        events: Mutex<Vec<LibraryEvent>>,
    }

    impl RecordingSink {
        pub fn events(&self) -> Vec<LibraryEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    impl EventSink for RecordingSink {
        fn emit(&self, event: &LibraryEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    #[test]
    fn test_null_sink_accepts_events() {
        NullEventSink.emit(&LibraryEvent::MediaChanged {
            volume_tag: "000063L7".to_string(),
        });
    }

    #[test]
    fn test_hub_fans_out_to_all_sinks() {
        struct CountingSink(AtomicUsize);
        impl EventSink for CountingSink {
            fn emit(&self, _event: &LibraryEvent) {
                self.0.fetch_add(1, Ordering::Relaxed);
            }
        }

        let first = Arc::new(CountingSink(AtomicUsize::new(0)));
        let second = Arc::new(CountingSink(AtomicUsize::new(0)));
        let mut hub = EventHub::new();
        hub.add_sink(Arc::clone(&first) as Arc<dyn EventSink>);
        hub.add_sink(Arc::clone(&second) as Arc<dyn EventSink>);

        hub.emit(LibraryEvent::DriveChanged {
            slot_number: 1,
            operation: "Mount".to_string(),
        });

        assert_eq!(first.0.load(Ordering::Relaxed), 1);
        assert_eq!(second.0.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_recording_sink_sees_payload() {
        let sink = RecordingSink::default();
        sink.emit(&LibraryEvent::MediaChanged {
            volume_tag: "000063L7".to_string(),
        });
        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            LibraryEvent::MediaChanged { volume_tag } if volume_tag == "000063L7"
        ));
    }
}
