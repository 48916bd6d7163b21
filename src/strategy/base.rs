//! # Statistics Source Strategy
//!
//! A strategy decides where the planner's statistics come from. All of them
//! share the session knobs, the cache/counter reset and the built-in
//! recompute defined here.

use futures_util::future::BoxFuture;
use serde::Serialize;

use super::errors::StrategyResult;
use super::settings::StrategySettings;
use crate::catalog::ApplyReport;
use crate::observability::{log_event_with_fields, Event};
use crate::session::{Session, SessionResult};

/// What an application did
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ApplyOutcome {
    /// Strategy id that produced the statistics in the end
    pub strategy: String,
    /// True when the strategy fell back to the built-in recompute
    pub degraded: bool,
    /// Catalog batch report, for strategies that write the catalog
    pub catalog: Option<ApplyReport>,
    pub note: Option<String>,
}

impl ApplyOutcome {
    pub fn plain(strategy: &str) -> Self {
        Self {
            strategy: strategy.to_string(),
            ..Self::default()
        }
    }
}

/// A pluggable statistics source
pub trait StatsStrategy: Send + Sync {
    /// Registry identifier, e.g. `estimate_driven`
    fn id(&self) -> &'static str;

    fn settings(&self) -> &StrategySettings;

    /// Display name from the settings
    fn name(&self) -> &str {
        &self.settings().name
    }

    /// Put statistics in place on `session`
    fn apply<'a>(&'a self, session: &'a mut dyn Session) -> BoxFuture<'a, StrategyResult<ApplyOutcome>>;
}

/// Set every knob from the settings on the session
pub async fn apply_knobs(session: &mut dyn Session, settings: &StrategySettings) -> SessionResult<()> {
    for (name, value) in settings.knobs() {
        session.set_parameter(&name, &value).await?;
    }
    Ok(())
}

/// Evict session caches and reset counters, as configured. `DISCARD ALL`
/// also resets session parameters, so the knobs are applied again after it.
pub async fn clear_caches(session: &mut dyn Session, settings: &StrategySettings) -> SessionResult<()> {
    if settings.clear_caches {
        session.discard_all().await?;
        apply_knobs(session, settings).await?;
    }
    let mut statement_stats = false;
    if settings.reset_counters {
        session.reset_counters().await?;
        statement_stats = session.reset_statement_stats().await?;
    }
    log_event_with_fields(
        Event::CachesCleared,
        &[
            ("discard", &settings.clear_caches.to_string()),
            ("counters", &settings.reset_counters.to_string()),
            ("statement_stats", &statement_stats.to_string()),
        ],
    );
    Ok(())
}

/// Built-in full recompute
pub async fn recompute(session: &mut dyn Session, settings: &StrategySettings) -> SessionResult<()> {
    session.analyze(settings.analyze_verbose).await
}
