use std::collections::BTreeMap;
use std::fmt;
use std::iter::Sum;
use std::ops::Add;

use chrono::NaiveDate;
use serde::Serialize;

/// The five backing applications, in report display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceId {
    Dockify,
    TelBot,
    Invoice,
    Travel,
    Document,
}

impl SourceId {
    pub const ALL: [SourceId; 5] = [
        SourceId::Dockify,
        SourceId::TelBot,
        SourceId::Invoice,
        SourceId::Travel,
        SourceId::Document,
    ];

    pub fn key(self) -> &'static str {
        match self {
            SourceId::Dockify => "dockify",
            SourceId::TelBot => "tel_bot",
            SourceId::Invoice => "invoice",
            SourceId::Travel => "travel",
            SourceId::Document => "document",
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// What a source's "unique actor" identifier actually identifies.
///
/// Totals add counts across domains without deduplication, so the combined
/// figure is a sum of per-application audiences rather than a head count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorDomain {
    ChatPlatformUser,
    Manager,
    Employee,
}

impl ActorDomain {
    pub fn label(self) -> &'static str {
        match self {
            ActorDomain::ChatPlatformUser => "chat users",
            ActorDomain::Manager => "managers",
            ActorDomain::Employee => "employees",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PeriodStats {
    pub today: u64,
    pub week: u64,
    pub month: u64,
}

impl PeriodStats {
    pub fn new(today: u64, week: u64, month: u64) -> Self {
        Self { today, week, month }
    }

    /// Same count for every window; used when a source cannot be windowed.
    pub fn flat(count: u64) -> Self {
        Self::new(count, count, count)
    }

    pub fn get(&self, period: StatsPeriod) -> u64 {
        match period {
            StatsPeriod::Today => self.today,
            StatsPeriod::Week => self.week,
            StatsPeriod::Month => self.month,
        }
    }
}

impl Add for PeriodStats {
    type Output = PeriodStats;

    fn add(self, other: PeriodStats) -> PeriodStats {
        PeriodStats {
            today: self.today + other.today,
            week: self.week + other.week,
            month: self.month + other.month,
        }
    }
}

impl Sum for PeriodStats {
    fn sum<I: Iterator<Item = PeriodStats>>(iter: I) -> Self {
        iter.fold(PeriodStats::default(), Add::add)
    }
}

/// One column of [`PeriodStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsPeriod {
    Today,
    Week,
    Month,
}

impl StatsPeriod {
    pub const ALL: [StatsPeriod; 3] = [StatsPeriod::Today, StatsPeriod::Week, StatsPeriod::Month];
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SourceHealth {
    Healthy,
    /// Expected column missing; counts come from the documented fallback.
    SchemaDegraded { table: String, column: String },
    /// Connection or query failed; counts are zero for this call.
    Unavailable { reason: String },
}

impl SourceHealth {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, SourceHealth::Unavailable { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceStats {
    pub source: SourceId,
    pub stats: PeriodStats,
    pub health: SourceHealth,
}

/// Per-source counts plus their field-wise total, all for one reference date.
#[derive(Debug, Clone, Serialize)]
pub struct SourceSnapshot {
    pub reference_date: NaiveDate,
    pub sources: Vec<SourceStats>,
    pub total: PeriodStats,
}

impl SourceSnapshot {
    pub fn from_sources(reference_date: NaiveDate, mut sources: Vec<SourceStats>) -> Self {
        sources.sort_by_key(|entry| entry.source);
        let total = sources.iter().map(|entry| entry.stats).sum();
        Self {
            reference_date,
            sources,
            total,
        }
    }

    pub fn stats_for(&self, source: SourceId) -> PeriodStats {
        self.sources
            .iter()
            .find(|entry| entry.source == source)
            .map(|entry| entry.stats)
            .unwrap_or_default()
    }

    pub fn unavailable_sources(&self) -> Vec<SourceId> {
        self.sources
            .iter()
            .filter(|entry| entry.health.is_unavailable())
            .map(|entry| entry.source)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrendPoint {
    pub date: NaiveDate,
    pub unique_actors: u64,
}

/// Ascending by date. Days without activity may be absent.
pub type TrendSeries = Vec<TrendPoint>;

pub type TrendSet = BTreeMap<SourceId, TrendSeries>;

/// Report cadence: the short cycle is weekly, the long cycle monthly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ReportPeriod {
    Weekly,
    Monthly,
}

impl ReportPeriod {
    pub fn key(self) -> &'static str {
        match self {
            ReportPeriod::Weekly => "weekly",
            ReportPeriod::Monthly => "monthly",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            ReportPeriod::Weekly => "Weekly",
            ReportPeriod::Monthly => "Monthly",
        }
    }
}

impl fmt::Display for ReportPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(source: SourceId, today: u64, week: u64, month: u64) -> SourceStats {
        SourceStats {
            source,
            stats: PeriodStats::new(today, week, month),
            health: SourceHealth::Healthy,
        }
    }

    #[test]
    fn total_is_field_wise_sum() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 12).unwrap();
        let snapshot = SourceSnapshot::from_sources(
            date,
            vec![
                entry(SourceId::Dockify, 1, 2, 3),
                entry(SourceId::TelBot, 10, 20, 30),
                entry(SourceId::Document, 100, 200, 300),
            ],
        );
        assert_eq!(snapshot.total, PeriodStats::new(111, 222, 333));
    }

    #[test]
    fn sources_are_kept_in_display_order() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 12).unwrap();
        let snapshot = SourceSnapshot::from_sources(
            date,
            vec![
                entry(SourceId::Document, 0, 0, 0),
                entry(SourceId::Dockify, 0, 0, 0),
                entry(SourceId::Travel, 0, 0, 0),
            ],
        );
        let order: Vec<SourceId> = snapshot.sources.iter().map(|e| e.source).collect();
        assert_eq!(order, vec![SourceId::Dockify, SourceId::Travel, SourceId::Document]);
    }

    #[test]
    fn missing_source_reads_as_zero() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 12).unwrap();
        let snapshot = SourceSnapshot::from_sources(date, vec![entry(SourceId::Invoice, 4, 4, 4)]);
        assert_eq!(snapshot.stats_for(SourceId::Travel), PeriodStats::default());
        assert_eq!(snapshot.stats_for(SourceId::Invoice).get(StatsPeriod::Week), 4);
    }
}
