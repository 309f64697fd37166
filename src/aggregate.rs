use std::sync::Arc;

use chrono::NaiveDate;
use futures::future::join_all;
use tracing::{info, warn};

use crate::models::{SourceId, SourceSnapshot, SourceStats, TrendSet};
use crate::period::trend_window;
use crate::sources::{Condition, SourceAdapter};

/// Fans out to every source adapter and merges the results.
///
/// Adapters run concurrently. They share no state and each opens its own
/// connection, so one slow or failing source only costs its own slot.
#[derive(Clone)]
pub struct StatsAggregator {
    adapters: Vec<Arc<dyn SourceAdapter>>,
}

impl StatsAggregator {
    pub fn new(adapters: Vec<Arc<dyn SourceAdapter>>) -> Self {
        Self { adapters }
    }

    /// Every adapter gets the same `reference` so window boundaries line up
    /// across sources. Always returns a complete snapshot.
    pub async fn combined_snapshot(&self, reference: NaiveDate) -> SourceSnapshot {
        let readings = join_all(self.adapters.iter().map(|adapter| async move {
            (adapter.id(), adapter.today_week_month(reference).await)
        }))
        .await;

        let sources: Vec<SourceStats> = readings
            .into_iter()
            .map(|(source, reading)| {
                log_condition(source, "stats", &reading.condition);
                SourceStats {
                    source,
                    stats: reading.value,
                    health: reading.condition.health(),
                }
            })
            .collect();

        let snapshot = SourceSnapshot::from_sources(reference, sources);
        let unavailable = snapshot.unavailable_sources();
        if !snapshot.sources.is_empty() && unavailable.len() == snapshot.sources.len() {
            warn!(%reference, "every source unavailable, snapshot is all zeros");
        }
        info!(
            %reference,
            today = snapshot.total.today,
            week = snapshot.total.week,
            month = snapshot.total.month,
            unavailable = unavailable.len(),
            "combined snapshot ready"
        );
        snapshot
    }

    /// Daily series for the trailing `window_days` ending on `end`.
    pub async fn combined_trends(&self, end: NaiveDate, window_days: u32) -> TrendSet {
        let (start, end) = trend_window(end, window_days);
        let readings = join_all(self.adapters.iter().map(|adapter| async move {
            (adapter.id(), adapter.trend(start, end).await)
        }))
        .await;

        readings
            .into_iter()
            .map(|(source, reading)| {
                log_condition(source, "trend", &reading.condition);
                (source, reading.value)
            })
            .collect()
    }
}

fn log_condition(source: SourceId, stage: &'static str, condition: &Condition) {
    match condition {
        Condition::Healthy => {}
        Condition::SchemaDegraded { table, column } => {
            info!(source = %source, stage, table, column, "source read in degraded mode");
        }
        Condition::Unavailable(err) => {
            warn!(source = %source, stage, error = %err, "source unavailable, counting as zero");
        }
    }
}
