use std::fmt::Write;
use std::io;

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;

use crate::config::DisplayNames;
use crate::models::{
    ReportPeriod, SourceHealth, SourceId, SourceSnapshot, StatsPeriod, TrendSet,
};

pub const TOTAL_LABEL: &str = "TOTAL";
pub const NO_DATA_TEXT: &str = "No data available";

/// Target number of labelled ticks on a chart's date axis.
const X_LABEL_TARGET: usize = 6;

#[derive(Debug, Clone, PartialEq)]
pub struct ReportDocument {
    pub title: String,
    pub subtitle: String,
    pub period: ReportPeriod,
    pub reference_date: NaiveDate,
    pub generated_at: NaiveDateTime,
    pub summary: Vec<SummaryTable>,
    pub notes: Vec<String>,
    pub trends_title: String,
    pub trends: Vec<TrendPanel>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryTable {
    pub heading: String,
    pub window: StatsPeriod,
    pub columns: [String; 2],
    pub rows: Vec<TableRow>,
    pub total: TableRow,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRow {
    pub label: String,
    pub value: String,
}

#[cfg(test)]
impl SummaryTable {
    pub fn find_row(&self, label: &str) -> Option<&TableRow> {
        self.rows
            .iter()
            .chain(std::iter::once(&self.total))
            .find(|row| row.label == label)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrendPanel {
    pub source: SourceId,
    pub title: String,
    pub body: PanelBody,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PanelBody {
    Chart(TrendChart),
    Placeholder(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb(pub u8, pub u8, pub u8);

#[derive(Debug, Clone, PartialEq)]
pub struct TrendChart {
    pub values: Vec<u64>,
    /// One entry per value; `None` where the label is thinned out.
    pub x_labels: Vec<Option<String>>,
    pub axis: ValueAxis,
    pub color: Rgb,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValueAxis {
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

impl ValueAxis {
    /// 0 to 1.2x the series maximum; an all-zero series still gets a
    /// non-empty range.
    pub fn for_values(values: &[u64]) -> Self {
        let peak = values.iter().copied().max().unwrap_or(0);
        let max = if peak == 0 { 1.0 } else { peak as f64 * 1.2 };
        Self {
            min: 0.0,
            max,
            step: (peak / 5).max(1) as f64,
        }
    }

    /// Position of `value` on the axis as a fraction of its height.
    pub fn fraction(&self, value: f64) -> f64 {
        ((value - self.min) / (self.max - self.min)).clamp(0.0, 1.0)
    }
}

pub fn thin_labels(dates: &[NaiveDate]) -> Vec<Option<String>> {
    let interval = dates.len().div_ceil(X_LABEL_TARGET).max(1);
    dates
        .iter()
        .enumerate()
        .map(|(index, date)| (index % interval == 0).then(|| date.format("%m/%d").to_string()))
        .collect()
}

fn series_color(source: SourceId) -> Rgb {
    match source {
        SourceId::Dockify => Rgb(0x3B, 0x82, 0xF6),
        SourceId::TelBot => Rgb(0x10, 0xB9, 0x81),
        SourceId::Invoice => Rgb(0xF5, 0x9E, 0x0B),
        SourceId::Travel => Rgb(0xEF, 0x44, 0x44),
        SourceId::Document => Rgb(0x8B, 0x5C, 0xF6),
    }
}

fn window_heading(window: StatsPeriod) -> &'static str {
    match window {
        StatsPeriod::Today => "Today (Unique Users)",
        StatsPeriod::Week => "This Week (Unique Users)",
        StatsPeriod::Month => "This Month (Unique Users)",
    }
}

/// Turns a snapshot and its trends into the two-page report layout.
///
/// Knows nothing about where the numbers came from; the only input that
/// varies between otherwise identical calls is `generated_at`.
#[derive(Debug, Clone)]
pub struct ReportRenderer {
    names: DisplayNames,
    window_days: u32,
}

impl ReportRenderer {
    pub fn new(names: DisplayNames, window_days: u32) -> Self {
        Self { names, window_days }
    }

    pub fn render(
        &self,
        snapshot: &SourceSnapshot,
        trends: &TrendSet,
        period: ReportPeriod,
        generated_at: NaiveDateTime,
    ) -> ReportDocument {
        ReportDocument {
            title: "Usage Counts".to_string(),
            subtitle: format!(
                "Consolidated {} Report (Daily / Weekly / Monthly)",
                period.title()
            ),
            period,
            reference_date: snapshot.reference_date,
            generated_at,
            summary: StatsPeriod::ALL
                .into_iter()
                .map(|window| self.summary_table(snapshot, window))
                .collect(),
            notes: self.health_notes(snapshot),
            trends_title: "Usage Trends".to_string(),
            trends: SourceId::ALL
                .into_iter()
                .map(|source| self.trend_panel(source, trends))
                .collect(),
        }
    }

    fn summary_table(&self, snapshot: &SourceSnapshot, window: StatsPeriod) -> SummaryTable {
        SummaryTable {
            heading: window_heading(window).to_string(),
            window,
            columns: ["System".to_string(), "Unique Users".to_string()],
            rows: SourceId::ALL
                .into_iter()
                .map(|source| TableRow {
                    label: self.names.name(source).to_string(),
                    value: snapshot.stats_for(source).get(window).to_string(),
                })
                .collect(),
            total: TableRow {
                label: TOTAL_LABEL.to_string(),
                value: snapshot.total.get(window).to_string(),
            },
        }
    }

    fn health_notes(&self, snapshot: &SourceSnapshot) -> Vec<String> {
        snapshot
            .sources
            .iter()
            .filter_map(|entry| {
                let name = self.names.name(entry.source);
                match &entry.health {
                    SourceHealth::Healthy => None,
                    SourceHealth::SchemaDegraded { .. } => Some(format!(
                        "* {name}: activity timestamps unavailable, all-time unique users shown for every period."
                    )),
                    SourceHealth::Unavailable { .. } => {
                        Some(format!("* {name}: source unreachable, counted as 0."))
                    }
                }
            })
            .collect()
    }

    fn trend_panel(&self, source: SourceId, trends: &TrendSet) -> TrendPanel {
        let title = format!(
            "{} - Daily Active Users (Last {} Days)",
            self.names.name(source),
            self.window_days
        );
        let body = match trends.get(&source) {
            Some(series) if !series.is_empty() => {
                let values: Vec<u64> = series.iter().map(|point| point.unique_actors).collect();
                let dates: Vec<NaiveDate> = series.iter().map(|point| point.date).collect();
                PanelBody::Chart(TrendChart {
                    axis: ValueAxis::for_values(&values),
                    x_labels: thin_labels(&dates),
                    values,
                    color: series_color(source),
                })
            }
            _ => PanelBody::Placeholder(NO_DATA_TEXT.to_string()),
        };
        TrendPanel {
            source,
            title,
            body,
        }
    }
}

/// Plain-text rendition of a snapshot for chat replies.
pub fn build_stats_message(snapshot: &SourceSnapshot, names: &DisplayNames) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "Current Statistics ({})", snapshot.reference_date);
    for window in StatsPeriod::ALL {
        let _ = writeln!(output);
        let _ = writeln!(output, "{}:", window_heading(window));
        for entry in &snapshot.sources {
            let _ = writeln!(
                output,
                "- {}: {} users",
                names.name(entry.source),
                entry.stats.get(window)
            );
        }
        let _ = writeln!(output, "- {}: {} users", TOTAL_LABEL, snapshot.total.get(window));
    }

    let unavailable = snapshot.unavailable_sources();
    if !unavailable.is_empty() {
        let _ = writeln!(output);
        let listed: Vec<&str> = unavailable.iter().map(|source| names.name(*source)).collect();
        let _ = writeln!(output, "Unavailable (counted as 0): {}", listed.join(", "));
    }

    output
}

#[derive(Serialize)]
struct ExportRow<'a> {
    source: &'a str,
    name: &'a str,
    today: u64,
    week: u64,
    month: u64,
    status: &'a str,
}

fn status_label(health: &SourceHealth) -> &'static str {
    match health {
        SourceHealth::Healthy => "ok",
        SourceHealth::SchemaDegraded { .. } => "degraded",
        SourceHealth::Unavailable { .. } => "unavailable",
    }
}

/// One CSV row per source in display order, then the TOTAL row.
pub fn write_snapshot_csv<W: io::Write>(
    snapshot: &SourceSnapshot,
    names: &DisplayNames,
    writer: W,
) -> csv::Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    for entry in &snapshot.sources {
        csv.serialize(ExportRow {
            source: entry.source.key(),
            name: names.name(entry.source),
            today: entry.stats.today,
            week: entry.stats.week,
            month: entry.stats.month,
            status: status_label(&entry.health),
        })?;
    }
    csv.serialize(ExportRow {
        source: "total",
        name: TOTAL_LABEL,
        today: snapshot.total.today,
        week: snapshot.total.week,
        month: snapshot.total.month,
        status: "",
    })?;
    csv.flush()?;
    Ok(())
}
