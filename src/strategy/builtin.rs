//! Built-in and empty statistics strategies

use futures_util::future::BoxFuture;

use super::base::{clear_caches, recompute, ApplyOutcome, StatsStrategy};
use super::errors::StrategyResult;
use super::settings::StrategySettings;
use crate::catalog::{CatalogWriter, TableRef};
use crate::observability::Logger;
use crate::session::Session;

/// Statistics from the server's own full recompute
#[derive(Debug, Clone)]
pub struct BuiltInStrategy {
    settings: StrategySettings,
}

impl BuiltInStrategy {
    pub const ID: &'static str = "builtin";

    pub fn new(settings: StrategySettings) -> Self {
        Self { settings }
    }
}

impl StatsStrategy for BuiltInStrategy {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn settings(&self) -> &StrategySettings {
        &self.settings
    }

    fn apply<'a>(&'a self, session: &'a mut dyn Session) -> BoxFuture<'a, StrategyResult<ApplyOutcome>> {
        Box::pin(async move {
            recompute(session, &self.settings).await?;
            Ok(ApplyOutcome::plain(Self::ID))
        })
    }
}

/// No statistics work beyond clearing caches; the planner sees whatever the
/// catalog holds, or nothing with `purge_statistics`
pub struct EmptyStrategy {
    settings: StrategySettings,
    writer: tokio::sync::Mutex<CatalogWriter>,
}

impl EmptyStrategy {
    pub const ID: &'static str = "empty";

    pub fn new(settings: StrategySettings, writer: CatalogWriter) -> Self {
        Self {
            settings,
            writer: tokio::sync::Mutex::new(writer),
        }
    }
}

impl StatsStrategy for EmptyStrategy {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn settings(&self) -> &StrategySettings {
        &self.settings
    }

    fn apply<'a>(&'a self, session: &'a mut dyn Session) -> BoxFuture<'a, StrategyResult<ApplyOutcome>> {
        Box::pin(async move {
            clear_caches(session, &self.settings).await?;
            let mut outcome = ApplyOutcome::plain(Self::ID);
            if self.settings.purge_statistics {
                let schema = session.describe_schema().await?;
                let tables: Vec<TableRef> = schema
                    .tables
                    .iter()
                    .map(|t| TableRef::new(&t.schema, &t.name))
                    .collect();
                let removed = self
                    .writer
                    .lock()
                    .await
                    .clear_table_statistics(session, &tables)
                    .await?;
                Logger::info("STATISTICS_PURGED", &[("rows", &removed.to_string())]);
                outcome.note = Some(format!("{} catalog rows removed", removed));
            }
            Ok(outcome)
        })
    }
}
