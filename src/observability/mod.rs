//! Observability subsystem
//!
//! - Structured logging (JSON lines)
//! - Counters for commits, history lookups, caches and background work
//! - Scope-based begin/complete tracing
//!
//! Observability is read-only: nothing recorded here influences store
//! decisions.
//!
//! # Usage
//!
//! ```ignore
//! use revstore::observability::{Logger, Event, ObservationScope};
//!
//! Logger::info(Event::MergeCommit.as_str(), &[("revision", "r1-0-1")]);
//!
//! let scope = ObservationScope::new("BACKGROUND_READ");
//! // ... do work ...
//! scope.complete();
//! ```

mod events;
mod logger;
mod metrics;
mod scope;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use metrics::{MetricsRegistry, MetricsSnapshot};
pub use scope::ObservationScope;

/// Log a lifecycle event with fields
pub fn log_event(event: Event, fields: &[(&str, &str)]) {
    let severity = if event.is_fatal() {
        Severity::Fatal
    } else {
        Severity::Info
    };
    Logger::log(severity, event.as_str(), fields);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_event() {
        log_event(Event::StoreStart, &[]);
        log_event(Event::LeaseAcquired, &[("cluster_id", "1")]);
    }
}
