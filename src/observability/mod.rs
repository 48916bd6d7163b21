//! Observability subsystem
//!
//! - Structured logging (JSON lines)
//! - Typed milestone events
//! - Phase scopes
//! - Counters
//!
//! Logging never drives behaviour. Progress reporting for a UI goes through
//! `experiment::ProgressObserver`, not through the logger.
//!
//! ```ignore
//! use statbench::observability::{log_event_with_fields, Event, ObservationScope};
//!
//! log_event_with_fields(Event::EstimateDropped, &[("reason", "unknown column")]);
//!
//! let scope = ObservationScope::new("STATS_APPLY");
//! // ... apply strategy ...
//! scope.complete();
//! ```

mod events;
mod logger;
mod metrics;
mod scope;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use metrics::{MetricsRegistry, MetricsSnapshot};
pub use scope::{ObservationScope, Timer};

/// Log an event at its default severity
pub fn log_event(event: Event) {
    Logger::log(event.severity(), event.as_str(), &[]);
}

/// Log an event with fields at its default severity
pub fn log_event_with_fields(event: Event, fields: &[(&str, &str)]) {
    Logger::log(event.severity(), event.as_str(), fields);
}
