//! The five source adapters.
//!
//! Every source is read through the same [`SqlSourceAdapter`]; what differs
//! is its [`SourceProfile`]: table, actor column, how a row maps to a day,
//! how the week window is expressed, and whether the timestamp column has to
//! be probed before it can be used.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::{debug, info};

use crate::db::{ActivityStore, Connector};
use crate::error::SourceError;
use crate::models::{ActorDomain, PeriodStats, SourceHealth, SourceId, TrendSeries};
use crate::period::{month_start, week_start};
use crate::query::{ActivityQuery, DayFilter};

/// How a read went, alongside the value it produced.
#[derive(Debug)]
pub enum Condition {
    Healthy,
    SchemaDegraded {
        table: &'static str,
        column: &'static str,
    },
    Unavailable(SourceError),
}

impl Condition {
    pub fn health(&self) -> SourceHealth {
        match self {
            Condition::Healthy => SourceHealth::Healthy,
            Condition::SchemaDegraded { table, column } => SourceHealth::SchemaDegraded {
                table: table.to_string(),
                column: column.to_string(),
            },
            Condition::Unavailable(err) => SourceHealth::Unavailable {
                reason: err.to_string(),
            },
        }
    }
}

#[derive(Debug)]
pub struct Reading<T> {
    pub value: T,
    pub condition: Condition,
}

impl<T: Default> Reading<T> {
    pub fn healthy(value: T) -> Self {
        Self {
            value,
            condition: Condition::Healthy,
        }
    }

    /// Zero value; the error travels with it for the caller to log.
    pub fn unavailable(err: SourceError) -> Self {
        Self {
            value: T::default(),
            condition: Condition::Unavailable(err),
        }
    }
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn id(&self) -> SourceId;

    /// Distinct actors on `reference`, in its calendar week to date, and in
    /// its calendar month to date. Never fails: an unreachable source reads
    /// as zeros with [`Condition::Unavailable`].
    async fn today_week_month(&self, reference: NaiveDate) -> Reading<PeriodStats>;

    /// Distinct actors per active day within `[start, end]`.
    async fn trend(&self, start: NaiveDate, end: NaiveDate) -> Reading<TrendSeries>;
}

/// How the Monday of the reference week reaches the query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeekStrategy {
    /// Monday is computed here and bound as a date.
    ComputedMonday,
    /// The database derives Monday from the reference date itself.
    NativeWeekday,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceProfile {
    pub source: SourceId,
    pub domain: ActorDomain,
    pub table: &'static str,
    pub actor_column: &'static str,
    pub day_expr: &'static str,
    pub require_actor: bool,
    pub week: WeekStrategy,
    /// Column that only some deployments carry; probed before use.
    pub probed_column: Option<&'static str>,
}

impl SourceProfile {
    pub fn for_source(source: SourceId) -> Self {
        match source {
            SourceId::Dockify => Self {
                source,
                domain: ActorDomain::ChatPlatformUser,
                table: "user_activity",
                actor_column: "telegram_id",
                day_expr: "activity_date",
                require_actor: false,
                week: WeekStrategy::ComputedMonday,
                probed_column: None,
            },
            SourceId::TelBot => Self {
                source,
                domain: ActorDomain::ChatPlatformUser,
                table: "user_activity",
                actor_column: "telegram_id",
                day_expr: "activity_date",
                require_actor: false,
                week: WeekStrategy::NativeWeekday,
                probed_column: None,
            },
            SourceId::Invoice => Self {
                source,
                domain: ActorDomain::Manager,
                table: "history_log",
                actor_column: "manager_info_id",
                day_expr: "DATE(`date`)",
                require_actor: true,
                week: WeekStrategy::NativeWeekday,
                probed_column: None,
            },
            SourceId::Travel => Self {
                source,
                domain: ActorDomain::Employee,
                table: "journeys",
                actor_column: "emp_uid",
                day_expr: "DATE(start_time)",
                require_actor: true,
                week: WeekStrategy::NativeWeekday,
                probed_column: None,
            },
            SourceId::Document => Self {
                source,
                domain: ActorDomain::ChatPlatformUser,
                table: "upload_sessions",
                actor_column: "user_id",
                day_expr: "created_at::date",
                require_actor: false,
                week: WeekStrategy::ComputedMonday,
                probed_column: Some("created_at"),
            },
        }
    }

    pub fn query(&self, filter: DayFilter) -> ActivityQuery {
        ActivityQuery {
            table: self.table,
            actor_column: self.actor_column,
            day_expr: self.day_expr,
            require_actor: self.require_actor,
            filter,
        }
    }

    pub fn week_filter(&self, reference: NaiveDate) -> DayFilter {
        match self.week {
            WeekStrategy::ComputedMonday => DayFilter::Between {
                start: week_start(reference),
                end: reference,
            },
            WeekStrategy::NativeWeekday => DayFilter::WeekToDate(reference),
        }
    }

    pub fn month_filter(&self, reference: NaiveDate) -> DayFilter {
        match self.week {
            WeekStrategy::ComputedMonday => DayFilter::Between {
                start: month_start(reference),
                end: reference,
            },
            WeekStrategy::NativeWeekday => DayFilter::MonthToDate(reference),
        }
    }
}

pub struct SqlSourceAdapter {
    profile: SourceProfile,
    connector: Arc<dyn Connector>,
}

impl SqlSourceAdapter {
    pub fn new(profile: SourceProfile, connector: Arc<dyn Connector>) -> Self {
        Self { profile, connector }
    }

    /// One adapter per source, all sharing the same connector.
    pub fn all(connector: Arc<dyn Connector>) -> Vec<Arc<dyn SourceAdapter>> {
        SourceId::ALL
            .into_iter()
            .map(|source| {
                Arc::new(Self::new(SourceProfile::for_source(source), connector.clone()))
                    as Arc<dyn SourceAdapter>
            })
            .collect()
    }

    /// `Ok(false)` means the probed column is missing and the caller must use
    /// the un-windowed fallback.
    async fn timestamp_available(&self, store: &mut dyn ActivityStore) -> Result<bool, SourceError> {
        match self.profile.probed_column {
            Some(column) => store.has_column(self.profile.table, column).await,
            None => Ok(true),
        }
    }

    fn degraded<T>(&self, value: T) -> Reading<T> {
        let column = self.profile.probed_column.unwrap_or_default();
        info!(
            source = %self.profile.source,
            table = self.profile.table,
            column,
            "timestamp column missing, using un-windowed distinct count"
        );
        Reading {
            value,
            condition: Condition::SchemaDegraded {
                table: self.profile.table,
                column,
            },
        }
    }

    async fn read_period_stats(
        &self,
        store: &mut dyn ActivityStore,
        reference: NaiveDate,
    ) -> Result<Reading<PeriodStats>, SourceError> {
        if !self.timestamp_available(store).await? {
            let everyone = store.count(&self.profile.query(DayFilter::Unbounded)).await?;
            return Ok(self.degraded(PeriodStats::flat(everyone)));
        }

        let today = store.count(&self.profile.query(DayFilter::On(reference))).await?;
        let week = store
            .count(&self.profile.query(self.profile.week_filter(reference)))
            .await?;
        let month = store
            .count(&self.profile.query(self.profile.month_filter(reference)))
            .await?;

        debug!(source = %self.profile.source, today, week, month, "source stats read");
        Ok(Reading::healthy(PeriodStats::new(today, week, month)))
    }

    async fn read_trend(
        &self,
        store: &mut dyn ActivityStore,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Reading<TrendSeries>, SourceError> {
        if !self.timestamp_available(store).await? {
            return Ok(self.degraded(TrendSeries::new()));
        }

        let mut points = store
            .daily_counts(&self.profile.query(DayFilter::Between { start, end }))
            .await?;
        points.sort_by_key(|point| point.date);
        Ok(Reading::healthy(points))
    }
}

#[async_trait]
impl SourceAdapter for SqlSourceAdapter {
    fn id(&self) -> SourceId {
        self.profile.source
    }

    async fn today_week_month(&self, reference: NaiveDate) -> Reading<PeriodStats> {
        let mut store = match self.connector.open(self.profile.source).await {
            Ok(store) => store,
            Err(err) => return Reading::unavailable(err),
        };
        let outcome = self.read_period_stats(store.as_mut(), reference).await;
        store.close().await;
        outcome.unwrap_or_else(Reading::unavailable)
    }

    async fn trend(&self, start: NaiveDate, end: NaiveDate) -> Reading<TrendSeries> {
        if start > end {
            debug!(source = %self.profile.source, %start, %end, "empty trend window");
            return Reading::healthy(TrendSeries::new());
        }
        let mut store = match self.connector.open(self.profile.source).await {
            Ok(store) => store,
            Err(err) => return Reading::unavailable(err),
        };
        let outcome = self.read_trend(store.as_mut(), start, end).await;
        store.close().await;
        outcome.unwrap_or_else(Reading::unavailable)
    }
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use chrono::{Datelike, Duration};

    use super::fixtures::{FixtureConnector, FixtureTable};
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    /// Thursday; its week starts Monday 2026-03-09.
    fn reference() -> NaiveDate {
        date(2026, 3, 12)
    }

    /// Actors straddling the week boundary: 1 and 2 only on Sunday 03-08,
    /// 3..=5 during the week, 5 again today, 6 on Friday after the reference.
    fn straddling_rows() -> Vec<(u64, NaiveDate)> {
        vec![
            (1, date(2026, 3, 8)),
            (2, date(2026, 3, 8)),
            (3, date(2026, 3, 9)),
            (4, date(2026, 3, 10)),
            (5, date(2026, 3, 11)),
            (5, date(2026, 3, 12)),
            (3, date(2026, 3, 12)),
            (6, date(2026, 3, 13)),
            (7, date(2026, 2, 27)),
        ]
    }

    fn adapter_for(source: SourceId, connector: FixtureConnector) -> SqlSourceAdapter {
        SqlSourceAdapter::new(SourceProfile::for_source(source), Arc::new(connector))
    }

    #[tokio::test]
    async fn week_counts_match_monday_to_reference_for_every_source() {
        for source in SourceId::ALL {
            let connector =
                FixtureConnector::new().table(source, FixtureTable::with_actors(&straddling_rows()));
            let reading = adapter_for(source, connector).today_week_month(reference()).await;

            assert!(matches!(reading.condition, Condition::Healthy), "{source}");
            assert_eq!(reading.value.today, 2, "{source} today");
            assert_eq!(reading.value.week, 3, "{source} week");
            assert_eq!(reading.value.month, 5, "{source} month");
        }
    }

    #[test]
    fn week_strategies_agree_on_boundary() {
        let mut day = date(2025, 12, 20);
        while day <= date(2026, 1, 20) {
            let computed = SourceProfile::for_source(SourceId::Dockify).week_filter(day);
            let native = SourceProfile::for_source(SourceId::TelBot).week_filter(day);
            assert_eq!(
                computed,
                DayFilter::Between {
                    start: week_start(day),
                    end: day
                }
            );
            assert_eq!(native, DayFilter::WeekToDate(day));
            // MySQL's WEEKDAY() counts days since Monday.
            let weekday_offset = i64::from(day.weekday().num_days_from_monday());
            assert_eq!(day - Duration::days(weekday_offset), week_start(day));
            day += Duration::days(1);
        }
    }

    #[tokio::test]
    async fn null_actors_are_excluded_where_required() {
        let mut table = FixtureTable::with_actors(&[(1, reference())]);
        table.rows.push((None, reference()));
        let connector = FixtureConnector::new().table(SourceId::Invoice, table);
        let reading = adapter_for(SourceId::Invoice, connector).today_week_month(reference()).await;
        assert_eq!(reading.value, PeriodStats::flat(1));
    }

    #[tokio::test]
    async fn unreachable_source_reads_zero_and_reports_condition() {
        let connector = FixtureConnector::new().unreachable(SourceId::Travel);
        let reading = adapter_for(SourceId::Travel, connector).today_week_month(reference()).await;
        assert_eq!(reading.value, PeriodStats::default());
        assert!(matches!(
            reading.condition,
            Condition::Unavailable(SourceError::Connect {
                source_id: SourceId::Travel,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn failed_query_still_closes_connection() {
        let table = FixtureTable {
            fail_queries: true,
            ..FixtureTable::default()
        };
        let connector = Arc::new(FixtureConnector::new().table(SourceId::TelBot, table));
        let adapter = SqlSourceAdapter::new(SourceProfile::for_source(SourceId::TelBot), connector.clone());

        let stats = adapter.today_week_month(reference()).await;
        let trend = adapter.trend(date(2026, 3, 1), reference()).await;

        assert_eq!(stats.value, PeriodStats::default());
        assert!(trend.value.is_empty());
        assert!(matches!(trend.condition, Condition::Unavailable(_)));
        assert_eq!(connector.opened.load(Ordering::SeqCst), 2);
        assert_eq!(connector.closed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn missing_timestamp_column_degrades_to_flat_count() {
        let table = FixtureTable {
            missing_columns: vec!["created_at"],
            ..FixtureTable::with_actors(&straddling_rows())
        };
        let connector = Arc::new(FixtureConnector::new().table(SourceId::Document, table));
        let adapter =
            SqlSourceAdapter::new(SourceProfile::for_source(SourceId::Document), connector.clone());

        let stats = adapter.today_week_month(reference()).await;
        assert_eq!(stats.value, PeriodStats::flat(7));
        assert!(matches!(
            stats.condition,
            Condition::SchemaDegraded {
                table: "upload_sessions",
                column: "created_at"
            }
        ));

        let trend = adapter.trend(date(2026, 2, 11), reference()).await;
        assert!(trend.value.is_empty());
        assert!(matches!(trend.condition, Condition::SchemaDegraded { .. }));

        let probes = connector.probes.lock().unwrap().clone();
        assert_eq!(
            probes,
            vec![
                ("upload_sessions".to_string(), "created_at".to_string()),
                ("upload_sessions".to_string(), "created_at".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn present_timestamp_column_uses_windowed_queries() {
        let connector = FixtureConnector::new()
            .table(SourceId::Document, FixtureTable::with_actors(&straddling_rows()));
        let reading = adapter_for(SourceId::Document, connector).today_week_month(reference()).await;
        assert!(matches!(reading.condition, Condition::Healthy));
        assert_eq!(reading.value, PeriodStats::new(2, 3, 5));
    }

    #[tokio::test]
    async fn sources_without_probe_never_touch_the_catalog() {
        let connector = Arc::new(
            FixtureConnector::new().table(SourceId::Dockify, FixtureTable::with_actors(&straddling_rows())),
        );
        let adapter = SqlSourceAdapter::new(SourceProfile::for_source(SourceId::Dockify), connector.clone());
        adapter.today_week_month(reference()).await;
        assert!(connector.probes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn trend_is_sparse_and_ascending() {
        let connector = FixtureConnector::new()
            .table(SourceId::Travel, FixtureTable::with_actors(&straddling_rows()));
        let reading = adapter_for(SourceId::Travel, connector)
            .trend(date(2026, 3, 8), reference())
            .await;
        let days: Vec<(NaiveDate, u64)> = reading
            .value
            .iter()
            .map(|point| (point.date, point.unique_actors))
            .collect();
        assert_eq!(
            days,
            vec![
                (date(2026, 3, 8), 2),
                (date(2026, 3, 9), 1),
                (date(2026, 3, 10), 1),
                (date(2026, 3, 11), 1),
                (date(2026, 3, 12), 2),
            ]
        );
    }

    #[tokio::test]
    async fn inverted_trend_window_is_empty_without_connecting() {
        let connector = Arc::new(FixtureConnector::new());
        let adapter = SqlSourceAdapter::new(SourceProfile::for_source(SourceId::TelBot), connector.clone());
        let reading = adapter.trend(reference(), date(2026, 3, 1)).await;
        assert!(reading.value.is_empty());
        assert_eq!(connector.opened.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn profiles_keep_identity_domains_apart() {
        let domains: Vec<ActorDomain> = SourceId::ALL
            .into_iter()
            .map(|source| SourceProfile::for_source(source).domain)
            .collect();
        assert_eq!(
            domains,
            vec![
                ActorDomain::ChatPlatformUser,
                ActorDomain::ChatPlatformUser,
                ActorDomain::Manager,
                ActorDomain::Employee,
                ActorDomain::ChatPlatformUser,
            ]
        );
    }
}
