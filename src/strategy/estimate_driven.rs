//! # Estimate-Driven Strategy
//!
//! Provider → Sanitizer → Translator → Writer. If any stage yields nothing
//! usable, or the catalog batch fails, the strategy degrades to the
//! built-in recompute and says so in the outcome and the log.

use std::sync::Arc;

use futures_util::future::BoxFuture;

use super::base::{recompute, ApplyOutcome, StatsStrategy};
use super::builtin::BuiltInStrategy;
use super::errors::StrategyResult;
use super::settings::StrategySettings;
use crate::catalog::{ApplyReport, CatalogWriter, Translator};
use crate::estimate::{EstimateProvider, Sanitizer};
use crate::observability::{log_event_with_fields, Event, MetricsRegistry, ObservationScope};
use crate::session::Session;

/// Translator and writer kept across applications, so column identities are
/// resolved once per experiment
struct Injector {
    translator: Translator,
    writer: CatalogWriter,
}

pub struct EstimateDrivenStrategy {
    settings: StrategySettings,
    provider: Arc<dyn EstimateProvider>,
    metrics: Arc<MetricsRegistry>,
    injector: tokio::sync::Mutex<Injector>,
}

impl EstimateDrivenStrategy {
    pub const ID: &'static str = "estimate_driven";

    pub fn new(
        settings: StrategySettings,
        provider: Arc<dyn EstimateProvider>,
        metrics: Arc<MetricsRegistry>,
        writer: CatalogWriter,
    ) -> Self {
        Self {
            settings,
            provider,
            metrics,
            injector: tokio::sync::Mutex::new(Injector {
                translator: Translator::new(),
                writer,
            }),
        }
    }

    /// Server round trips made to resolve column identities so far
    pub async fn identity_lookups(&self) -> usize {
        self.injector.lock().await.translator.resolver().lookups()
    }

    async fn inject(&self, session: &mut dyn Session) -> Result<ApplyReport, String> {
        let schema = session
            .describe_schema()
            .await
            .map_err(|e| format!("schema description failed: {}", e))?;

        let raw = self
            .provider
            .estimates(&schema)
            .await
            .map_err(|e| format!("estimate provider failed: {}", e))?;

        let report = Sanitizer::new(self.settings.ambiguous_columns).validate(&raw, &schema);
        self.metrics.add_estimates_accepted(report.estimates.len() as u64);
        self.metrics.add_estimates_dropped(report.dropped.len() as u64);
        if report.estimates.is_empty() {
            return Err("no usable estimates".to_string());
        }

        let mut injector = self.injector.lock().await;
        let translation = injector
            .translator
            .translate(session, &report.estimates)
            .await
            .map_err(|e| format!("translation failed: {}", e))?;
        if translation.rows.is_empty() {
            return Err("no translatable columns".to_string());
        }

        let applied = injector
            .writer
            .apply(session, &translation.rows)
            .await
            .map_err(|e| format!("{} ({})", e, e.code()))?;
        if applied.applied() == 0 {
            return Err("no column was written".to_string());
        }
        Ok(applied)
    }
}

impl StatsStrategy for EstimateDrivenStrategy {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn settings(&self) -> &StrategySettings {
        &self.settings
    }

    fn apply<'a>(&'a self, session: &'a mut dyn Session) -> BoxFuture<'a, StrategyResult<ApplyOutcome>> {
        Box::pin(async move {
            let scope = ObservationScope::new("ESTIMATE_INJECTION");
            match self.inject(session).await {
                Ok(report) => {
                    scope.complete_with_fields(&[("columns", &report.applied().to_string())]);
                    Ok(ApplyOutcome {
                        strategy: Self::ID.to_string(),
                        degraded: false,
                        catalog: Some(report),
                        note: None,
                    })
                }
                Err(reason) => {
                    scope.fail(&reason);
                    self.metrics.increment_strategy_fallbacks();
                    log_event_with_fields(
                        Event::StrategyFallback,
                        &[
                            ("from", Self::ID),
                            ("to", BuiltInStrategy::ID),
                            ("reason", &reason),
                        ],
                    );
                    recompute(session, &self.settings).await?;
                    Ok(ApplyOutcome {
                        strategy: BuiltInStrategy::ID.to_string(),
                        degraded: true,
                        catalog: None,
                        note: Some(reason),
                    })
                }
            }
        })
    }
}
