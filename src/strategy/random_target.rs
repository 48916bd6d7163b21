//! Random statistics-target strategy
//!
//! Gives every column a random statistics target within the configured
//! range, then runs the built-in recompute. Useful to see how sensitive a
//! plan is to sample size.

use futures_util::future::BoxFuture;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::base::{recompute, ApplyOutcome, StatsStrategy};
use super::errors::StrategyResult;
use super::settings::StrategySettings;
use crate::catalog::TableRef;
use crate::estimate::SchemaInfo;
use crate::observability::Logger;
use crate::session::Session;

#[derive(Debug, Clone)]
pub struct RandomTargetStrategy {
    settings: StrategySettings,
}

impl RandomTargetStrategy {
    pub const ID: &'static str = "random_target";

    pub fn new(settings: StrategySettings) -> Self {
        Self { settings }
    }

    /// One (table, column, target) per column, in schema order
    pub fn draw_targets(&self, schema: &SchemaInfo) -> Vec<(TableRef, String, i32)> {
        let mut rng = match self.settings.random_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let range = self.settings.random_min_target..=self.settings.random_max_target;
        schema
            .tables
            .iter()
            .flat_map(|t| {
                t.columns
                    .iter()
                    .map(move |c| (TableRef::new(&t.schema, &t.name), c.name.clone()))
            })
            .map(|(table, column)| (table, column, rng.gen_range(range.clone())))
            .collect()
    }
}

impl StatsStrategy for RandomTargetStrategy {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn settings(&self) -> &StrategySettings {
        &self.settings
    }

    fn apply<'a>(&'a self, session: &'a mut dyn Session) -> BoxFuture<'a, StrategyResult<ApplyOutcome>> {
        Box::pin(async move {
            let schema = session.describe_schema().await?;
            let targets = self.draw_targets(&schema);
            for (table, column, target) in &targets {
                session.set_statistics_target(table, column, *target).await?;
                Logger::trace(
                    "STATISTICS_TARGET_SET",
                    &[
                        ("table", &table.to_string()),
                        ("column", column),
                        ("target", &target.to_string()),
                    ],
                );
            }
            recompute(session, &self.settings).await?;
            let mut outcome = ApplyOutcome::plain(Self::ID);
            outcome.note = Some(format!("{} column targets randomized", targets.len()));
            Ok(outcome)
        })
    }
}
