//! Observable events
//!
//! Every milestone the tool logs is a variant here. Events are explicit and
//! typed; the string form is the `event` key of the log line.

use std::fmt;

use super::logger::Severity;

/// Observable events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Configuration
    /// Experiment or strategy configuration loaded
    ConfigLoaded,

    // Provisioning
    /// Ephemeral database creation begins
    ProvisionBegin,
    /// Ephemeral database ready (created and seeded)
    ProvisionComplete,
    /// Provisioning failed, no trials attempted
    ProvisionFailed,
    /// Dump file loaded into the ephemeral database
    DumpLoaded,

    // Estimates
    /// Estimates received from the provider
    EstimatesReceived,
    /// One estimate dropped by the sanitizer
    EstimateDropped,
    /// Sanitization finished
    EstimatesSanitized,

    // Catalog
    /// Catalog row translated from an estimate
    RowTranslated,
    /// Column could not be translated (missing type information)
    TranslationFailed,
    /// Values-array encoding technique attempted
    EncodingAttempt,
    /// No technique could encode a values-array field
    EncodingFailed,
    /// Automatic statistics refresh suppressed on a table
    AutoRefreshDisabled,
    /// Automatic statistics refresh restored on a table
    AutoRefreshRestored,
    /// Empty baseline rows inserted
    BaselineCreated,
    /// Catalog batch committed
    CatalogCommitted,
    /// Catalog batch rolled back
    CatalogRolledBack,

    // Strategy
    /// Strategy application complete
    StatsApplied,
    /// Estimate-driven strategy degraded to the built-in recompute
    StrategyFallback,
    /// Caches and counters cleared
    CachesCleared,

    // Trials
    /// Plans differ between trials
    PlanDivergence,

    // Experiment
    /// Experiment begins
    ExperimentBegin,
    /// Aggregates computed
    ExperimentAggregated,
    /// Experiment ended in SUCCESS
    ExperimentSucceeded,
    /// Experiment ended in FAILURE
    ExperimentFailed,
    /// Experiment cancelled between trials
    ExperimentCancelled,
    /// A teardown step failed (teardown continues)
    TeardownStepFailed,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::ConfigLoaded => "CONFIG_LOADED",

            Event::ProvisionBegin => "PROVISION_BEGIN",
            Event::ProvisionComplete => "PROVISION_COMPLETE",
            Event::ProvisionFailed => "PROVISION_FAILED",
            Event::DumpLoaded => "DUMP_LOADED",

            Event::EstimatesReceived => "ESTIMATES_RECEIVED",
            Event::EstimateDropped => "ESTIMATE_DROPPED",
            Event::EstimatesSanitized => "ESTIMATES_SANITIZED",

            Event::RowTranslated => "CATALOG_ROW_TRANSLATED",
            Event::TranslationFailed => "CATALOG_TRANSLATION_FAILED",
            Event::EncodingAttempt => "ENCODING_ATTEMPT",
            Event::EncodingFailed => "ENCODING_FAILED",
            Event::AutoRefreshDisabled => "AUTO_REFRESH_DISABLED",
            Event::AutoRefreshRestored => "AUTO_REFRESH_RESTORED",
            Event::BaselineCreated => "BASELINE_CREATED",
            Event::CatalogCommitted => "CATALOG_COMMITTED",
            Event::CatalogRolledBack => "CATALOG_ROLLED_BACK",

            Event::StatsApplied => "STATS_APPLIED",
            Event::StrategyFallback => "STRATEGY_FALLBACK",
            Event::CachesCleared => "CACHES_CLEARED",

            Event::PlanDivergence => "PLAN_DIVERGENCE",

            Event::ExperimentBegin => "EXPERIMENT_BEGIN",
            Event::ExperimentAggregated => "EXPERIMENT_AGGREGATED",
            Event::ExperimentSucceeded => "EXPERIMENT_SUCCEEDED",
            Event::ExperimentFailed => "EXPERIMENT_FAILED",
            Event::ExperimentCancelled => "EXPERIMENT_CANCELLED",
            Event::TeardownStepFailed => "TEARDOWN_STEP_FAILED",
        }
    }

    /// Default severity for the event
    pub fn severity(&self) -> Severity {
        match self {
            Event::EncodingAttempt | Event::RowTranslated => Severity::Trace,
            Event::EstimateDropped
            | Event::TranslationFailed
            | Event::EncodingFailed
            | Event::CatalogRolledBack
            | Event::StrategyFallback
            | Event::PlanDivergence
            | Event::ExperimentCancelled
            | Event::TeardownStepFailed => Severity::Warn,
            Event::ProvisionFailed | Event::ExperimentFailed => Severity::Error,
            _ => Severity::Info,
        }
    }

    /// Returns true if this event ends an experiment unsuccessfully
    pub fn is_failure(&self) -> bool {
        matches!(self, Event::ProvisionFailed | Event::ExperimentFailed)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Event; 27] = [
        Event::ConfigLoaded,
        Event::ProvisionBegin,
        Event::ProvisionComplete,
        Event::ProvisionFailed,
        Event::DumpLoaded,
        Event::EstimatesReceived,
        Event::EstimateDropped,
        Event::EstimatesSanitized,
        Event::RowTranslated,
        Event::TranslationFailed,
        Event::EncodingAttempt,
        Event::EncodingFailed,
        Event::AutoRefreshDisabled,
        Event::AutoRefreshRestored,
        Event::BaselineCreated,
        Event::CatalogCommitted,
        Event::CatalogRolledBack,
        Event::StatsApplied,
        Event::StrategyFallback,
        Event::CachesCleared,
        Event::PlanDivergence,
        Event::ExperimentBegin,
        Event::ExperimentAggregated,
        Event::ExperimentSucceeded,
        Event::ExperimentFailed,
        Event::ExperimentCancelled,
        Event::TeardownStepFailed,
    ];

    #[test]
    fn test_all_events_have_string_representation() {
        for event in ALL {
            let s = event.as_str();
            assert!(!s.is_empty());
            assert!(s.chars().all(|c| c.is_ascii_uppercase() || c == '_'));
        }
    }

    #[test]
    fn test_failure_events_log_at_error() {
        for event in ALL {
            if event.is_failure() {
                assert_eq!(event.severity(), Severity::Error);
            }
        }
        assert!(!Event::StrategyFallback.is_failure());
        assert_eq!(Event::StrategyFallback.severity(), Severity::Warn);
    }

    #[test]
    fn test_event_display() {
        assert_eq!(format!("{}", Event::StatsApplied), "STATS_APPLIED");
        assert_eq!(format!("{}", Event::EncodingFailed), "ENCODING_FAILED");
    }
}
