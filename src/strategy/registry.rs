//! Strategy registry
//!
//! A fixed map from identifier to constructor, filled at startup.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::base::StatsStrategy;
use super::builtin::{BuiltInStrategy, EmptyStrategy};
use super::errors::{StrategyError, StrategyResult};
use super::estimate_driven::EstimateDrivenStrategy;
use super::random_target::RandomTargetStrategy;
use super::settings::StrategySettings;
use crate::catalog::{AutoRefreshLedger, CatalogWriter, WriterOptions};
use crate::estimate::EstimateProvider;
use crate::observability::MetricsRegistry;

/// Collaborators handed to strategy constructors
#[derive(Clone)]
pub struct StrategyContext {
    pub estimate_provider: Option<Arc<dyn EstimateProvider>>,
    pub metrics: Arc<MetricsRegistry>,
    pub auto_refresh: AutoRefreshLedger,
}

impl StrategyContext {
    pub fn new(metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            estimate_provider: None,
            metrics,
            auto_refresh: AutoRefreshLedger::new(),
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn EstimateProvider>) -> Self {
        self.estimate_provider = Some(provider);
        self
    }

    fn writer(&self, settings: &StrategySettings) -> CatalogWriter {
        CatalogWriter::new(
            WriterOptions {
                create_missing_baseline: true,
                encoding_cache: settings.encoding_cache,
            },
            self.metrics.clone(),
            self.auto_refresh.clone(),
        )
    }
}

pub type Constructor =
    fn(StrategySettings, &StrategyContext) -> StrategyResult<Box<dyn StatsStrategy>>;

struct Entry {
    description: &'static str,
    constructor: Constructor,
}

pub struct StrategyRegistry {
    entries: BTreeMap<&'static str, Entry>,
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl StrategyRegistry {
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Registry holding every strategy this crate ships
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register(
            BuiltInStrategy::ID,
            "server's full statistics recompute",
            |settings, _| Ok(Box::new(BuiltInStrategy::new(settings))),
        );
        registry.register(
            EmptyStrategy::ID,
            "clear caches only; optionally purge catalog rows",
            |settings, ctx| {
                let writer = ctx.writer(&settings);
                Ok(Box::new(EmptyStrategy::new(settings, writer)))
            },
        );
        registry.register(
            EstimateDrivenStrategy::ID,
            "inject sanitized external estimates, falling back to builtin",
            |settings, ctx| {
                let provider = ctx.estimate_provider.clone().ok_or_else(|| {
                    StrategyError::invalid("estimate_driven requires an estimate provider")
                })?;
                let writer = ctx.writer(&settings);
                Ok(Box::new(EstimateDrivenStrategy::new(
                    settings,
                    provider,
                    ctx.metrics.clone(),
                    writer,
                )))
            },
        );
        registry.register(
            RandomTargetStrategy::ID,
            "random per-column statistics targets, then builtin recompute",
            |settings, _| Ok(Box::new(RandomTargetStrategy::new(settings))),
        );
        registry
    }

    pub fn register(&mut self, id: &'static str, description: &'static str, constructor: Constructor) {
        self.entries.insert(
            id,
            Entry {
                description,
                constructor,
            },
        );
    }

    pub fn ids(&self) -> Vec<&'static str> {
        self.entries.keys().copied().collect()
    }

    /// (id, description) pairs in id order
    pub fn describe(&self) -> Vec<(&'static str, &'static str)> {
        self.entries
            .iter()
            .map(|(id, e)| (*id, e.description))
            .collect()
    }

    /// Validate the settings and build the strategy
    pub fn create(
        &self,
        id: &str,
        settings: StrategySettings,
        context: &StrategyContext,
    ) -> StrategyResult<Box<dyn StatsStrategy>> {
        let entry = self
            .entries
            .get(id)
            .ok_or_else(|| StrategyError::UnknownStrategy(id.to_string()))?;
        settings.validate()?;
        (entry.constructor)(settings, context)
    }
}
