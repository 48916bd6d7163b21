//! ObservationScope for phase logging
//!
//! - Logs `{name}_BEGIN` on creation
//! - Logs `{name}_COMPLETE` (with `elapsed_ms`) when completed
//! - Logs `{name}_FAILED` when failed
//! - Logs `{name}_INCOMPLETE` on drop if neither happened

use std::cell::Cell;
use std::time::Instant;

use super::logger::Logger;

/// A scope around one long-running phase (`STATS_APPLY`, `CATALOG_APPLY`,
/// `TRIAL`, `TEARDOWN`)
///
/// ```ignore
/// let scope = ObservationScope::with_fields("TRIAL", &[("trial", "2")]);
/// // ... run the trial ...
/// scope.complete_with_fields(&[("execution_ms", "12.5")]);
/// ```
pub struct ObservationScope<'a> {
    name: &'a str,
    completed: Cell<bool>,
    fields: Vec<(&'a str, String)>,
    timer: Timer,
}

impl<'a> ObservationScope<'a> {
    /// Create a new observation scope
    pub fn new(name: &'a str) -> Self {
        Self::with_fields(name, &[])
    }

    /// Create a new observation scope whose fields are repeated on every
    /// line it logs
    pub fn with_fields(name: &'a str, fields: &[(&'a str, &str)]) -> Self {
        Logger::info(&format!("{}_BEGIN", name), fields);

        Self {
            name,
            completed: Cell::new(false),
            fields: fields.iter().map(|(k, v)| (*k, v.to_string())).collect(),
            timer: Timer::new(),
        }
    }

    /// Mark the scope as successfully completed
    pub fn complete(self) {
        self.complete_with_fields(&[]);
    }

    /// Mark the scope as successfully completed with additional fields
    pub fn complete_with_fields(self, extra_fields: &[(&str, &str)]) {
        self.completed.set(true);
        let elapsed = self.timer.elapsed_ms();
        let mut all_fields = self.base_fields();
        all_fields.push(("elapsed_ms", elapsed.as_str()));
        all_fields.extend(extra_fields.iter().copied());
        Logger::info(&format!("{}_COMPLETE", self.name), &all_fields);
    }

    /// Mark the scope as failed with a reason (ERROR level)
    pub fn fail(self, reason: &str) {
        self.completed.set(true);
        let mut all_fields = self.base_fields();
        all_fields.push(("reason", reason));
        Logger::error(&format!("{}_FAILED", self.name), &all_fields);
    }

    /// Check if the scope has been completed
    pub fn is_completed(&self) -> bool {
        self.completed.get()
    }

    fn base_fields(&self) -> Vec<(&str, &str)> {
        self.fields.iter().map(|(k, v)| (*k, v.as_str())).collect()
    }
}

impl Drop for ObservationScope<'_> {
    fn drop(&mut self) {
        if !self.completed.get() {
            let mut all_fields = self.base_fields();
            all_fields.push(("reason", "scope dropped without completion"));
            Logger::warn(&format!("{}_INCOMPLETE", self.name), &all_fields);
        }
    }
}

/// A simple duration timer for logging elapsed time
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Create a new timer
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Elapsed time in fractional milliseconds
    pub fn elapsed_millis_f64(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Get elapsed milliseconds as a string
    pub fn elapsed_ms(&self) -> String {
        self.start.elapsed().as_millis().to_string()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
