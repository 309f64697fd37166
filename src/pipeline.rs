use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::aggregate::StatsAggregator;
use crate::error::ReportError;
use crate::models::{ReportPeriod, SourceSnapshot, TrendSet};
use crate::pdf::write_pdf;
use crate::period::ReportClock;
use crate::report::{ReportDocument, ReportRenderer};
use crate::telegram::ChatTransport;

/// A rendered report written to the reports directory, awaiting delivery.
#[derive(Debug, Clone)]
pub struct ReportArtifact {
    pub period: ReportPeriod,
    pub path: PathBuf,
    pub file_name: String,
    pub caption: String,
    pub generated_at: NaiveDateTime,
    pub snapshot: SourceSnapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    OnDemand,
    Scheduled,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub delivered: Vec<i64>,
    pub failed: Vec<i64>,
    pub artifact_removed: bool,
}

pub fn report_file_name(period: ReportPeriod, generated_at: NaiveDateTime) -> String {
    format!(
        "consolidated_monitoring_report_{}_{}.pdf",
        period.key(),
        generated_at.format("%Y-%m-%d_%H-%M-%S")
    )
}

pub fn report_caption(period: ReportPeriod, generated_at: NaiveDateTime, trigger: Trigger) -> String {
    let prefix = match trigger {
        Trigger::OnDemand => "",
        Trigger::Scheduled => "Scheduled ",
    };
    format!(
        "{prefix}{} Consolidated Monitoring Report\nGenerated: {}",
        period.title(),
        generated_at.format("%Y-%m-%d %H:%M:%S")
    )
}

/// Snapshot, trends, render, write, deliver, remove.
#[derive(Clone)]
pub struct ReportPipeline {
    aggregator: StatsAggregator,
    renderer: ReportRenderer,
    clock: ReportClock,
    window_days: u32,
    reports_dir: PathBuf,
}

impl ReportPipeline {
    pub fn new(
        aggregator: StatsAggregator,
        renderer: ReportRenderer,
        clock: ReportClock,
        window_days: u32,
        reports_dir: PathBuf,
    ) -> Self {
        Self {
            aggregator,
            renderer,
            clock,
            window_days,
            reports_dir,
        }
    }

    pub fn aggregator(&self) -> &StatsAggregator {
        &self.aggregator
    }

    pub fn clock(&self) -> ReportClock {
        self.clock
    }

    async fn read_sources(&self) -> (NaiveDateTime, SourceSnapshot, TrendSet) {
        let generated_at = self.clock.now();
        let reference = generated_at.date();
        let (snapshot, trends) = futures::join!(
            self.aggregator.combined_snapshot(reference),
            self.aggregator.combined_trends(reference, self.window_days)
        );
        (generated_at, snapshot, trends)
    }

    /// Reads every source and lays the report out, without touching disk.
    pub async fn build_document(&self, period: ReportPeriod) -> ReportDocument {
        let (generated_at, snapshot, trends) = self.read_sources().await;
        self.renderer.render(&snapshot, &trends, period, generated_at)
    }

    pub async fn generate(&self, period: ReportPeriod, trigger: Trigger) -> Result<ReportArtifact, ReportError> {
        info!(%period, ?trigger, "generating report");
        let (generated_at, snapshot, trends) = self.read_sources().await;
        let document = self.renderer.render(&snapshot, &trends, period, generated_at);
        let bytes = write_pdf(&document).inspect_err(|err| {
            error!(%period, error = %err, "report rendering failed");
        })?;

        let file_name = report_file_name(period, generated_at);
        let path = self.write_artifact(&file_name, &bytes).await?;
        info!(%period, path = %path.display(), size = bytes.len(), "report artifact written");

        Ok(ReportArtifact {
            period,
            path,
            file_name,
            caption: report_caption(period, generated_at, trigger),
            generated_at,
            snapshot,
        })
    }

    /// Two requests within the same second still get separate files.
    async fn write_artifact(&self, file_name: &str, bytes: &[u8]) -> Result<PathBuf, ReportError> {
        tokio::fs::create_dir_all(&self.reports_dir)
            .await
            .map_err(|cause| ReportError::Artifact {
                path: self.reports_dir.clone(),
                cause,
            })?;
        let stem = file_name.trim_end_matches(".pdf");
        let suffix = Uuid::new_v4().simple().to_string();
        let path = self
            .reports_dir
            .join(format!("{stem}_{}.pdf", &suffix[..8]));
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|cause| ReportError::Artifact {
                path: path.clone(),
                cause,
            })?;
        Ok(path)
    }

    /// Sends the artifact to each recipient in turn. A failed recipient is
    /// logged and skipped. The file is removed once at least one copy went
    /// out; if every recipient failed it is kept for inspection.
    pub async fn deliver(
        &self,
        artifact: &ReportArtifact,
        transport: &dyn ChatTransport,
        recipients: &[i64],
    ) -> DeliveryOutcome {
        let mut outcome = DeliveryOutcome::default();
        for &chat_id in recipients {
            match transport
                .send_document(chat_id, &artifact.path, &artifact.file_name, &artifact.caption)
                .await
            {
                Ok(()) => {
                    info!(chat_id, period = %artifact.period, "report delivered");
                    outcome.delivered.push(chat_id);
                }
                Err(err) => {
                    warn!(chat_id, period = %artifact.period, error = %err, "report delivery failed");
                    outcome.failed.push(chat_id);
                }
            }
        }

        if outcome.delivered.is_empty() && !recipients.is_empty() {
            warn!(path = %artifact.path.display(), "no recipient received the report, keeping artifact");
        } else {
            outcome.artifact_removed = remove_artifact(&artifact.path).await;
        }
        outcome
    }

    pub async fn generate_and_deliver(
        &self,
        period: ReportPeriod,
        trigger: Trigger,
        transport: &dyn ChatTransport,
        recipients: &[i64],
    ) -> Result<DeliveryOutcome, ReportError> {
        let artifact = self.generate(period, trigger).await?;
        let outcome = self.deliver(&artifact, transport, recipients).await;
        info!(
            %period,
            generated_at = %artifact.generated_at,
            today = artifact.snapshot.total.today,
            week = artifact.snapshot.total.week,
            month = artifact.snapshot.total.month,
            delivered = outcome.delivered.len(),
            failed = outcome.failed.len(),
            "report run finished"
        );
        Ok(outcome)
    }
}

async fn remove_artifact(path: &Path) -> bool {
    match tokio::fs::remove_file(path).await {
        Ok(()) => true,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to remove report artifact");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, NaiveDate};

    use super::*;
    use crate::config::DisplayNames;
    use crate::models::{PeriodStats, SourceId};
    use crate::period::week_start;
    use crate::report::ReportRenderer;
    use crate::sources::fixtures::{FixtureConnector, FixtureTable};
    use crate::sources::SqlSourceAdapter;
    use crate::telegram::fake::{RecordingTransport, Sent};

    // Thursday; the week window is Monday 03-09 through today.
    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 12).unwrap()
    }

    /// Actors `first..first + count` active on `day`.
    fn actors_on(first: u64, count: u64, day: NaiveDate) -> Vec<(u64, NaiveDate)> {
        (first..first + count).map(|actor| (actor, day)).collect()
    }

    /// `today_count` actors active today and `week_count` distinct actors
    /// Monday through today, with a returning actor and a Sunday visitor
    /// that must not move the week figure.
    fn table(today_count: u64, week_count: u64) -> FixtureTable {
        let today = today();
        let mut rows = actors_on(1, today_count, today);
        let earlier = week_count - today_count;
        let (first_half, second_half) = (earlier / 2, earlier - earlier / 2);
        rows.extend(actors_on(1000, first_half, today - Duration::days(3)));
        rows.extend(actors_on(2000, second_half, today - Duration::days(1)));
        if today_count > 0 {
            rows.extend(actors_on(1, 1, today - Duration::days(2)));
            rows.extend(actors_on(9000, 1, today - Duration::days(4)));
        }
        FixtureTable::with_actors(&rows)
    }

    fn pipeline(connector: FixtureConnector, reports_dir: PathBuf) -> ReportPipeline {
        let aggregator = StatsAggregator::new(SqlSourceAdapter::all(Arc::new(connector)));
        let clock = ReportClock::pinned(chrono_tz::UTC, today().and_hms_opt(9, 0, 0).unwrap());
        ReportPipeline::new(
            aggregator,
            ReportRenderer::new(DisplayNames::default(), 30),
            clock,
            30,
            reports_dir,
        )
    }

    fn fixture_sources() -> FixtureConnector {
        FixtureConnector::new()
            .table(SourceId::Dockify, table(3, 9))
            .table(SourceId::TelBot, table(5, 12))
            .table(SourceId::Invoice, table(0, 0))
            .table(SourceId::Travel, table(2, 4))
            .table(SourceId::Document, table(7, 11))
    }

    #[tokio::test]
    async fn end_to_end_totals_reach_first_table() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(fixture_sources(), dir.path().to_path_buf());

        let document = pipeline.build_document(ReportPeriod::Weekly).await;
        let first = &document.summary[0];
        let total = first.find_row("TOTAL").unwrap();
        assert_eq!(total.value, "17");

        let artifact = pipeline.generate(ReportPeriod::Weekly, Trigger::OnDemand).await.unwrap();
        assert_eq!(week_start(artifact.snapshot.reference_date), today() - Duration::days(3));
        assert_eq!(artifact.snapshot.total.today, 17);
        assert_eq!(artifact.snapshot.total.week, 36);
        assert_eq!(artifact.snapshot.stats_for(SourceId::Travel), PeriodStats::new(2, 4, 5));
        assert_eq!(
            artifact.snapshot.stats_for(SourceId::Invoice),
            PeriodStats::default()
        );
        assert!(artifact.path.exists());
    }

    #[tokio::test]
    async fn delivery_isolates_recipients_and_removes_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(fixture_sources(), dir.path().to_path_buf());
        let transport = RecordingTransport::failing_for(&[200]);

        let outcome = pipeline
            .generate_and_deliver(ReportPeriod::Monthly, Trigger::Scheduled, &transport, &[100, 200, 300])
            .await
            .unwrap();

        assert_eq!(outcome.delivered, vec![100, 300]);
        assert_eq!(outcome.failed, vec![200]);
        assert!(outcome.artifact_removed);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        let documents = transport.documents();
        assert_eq!(documents.len(), 2);
        match &documents[0] {
            Sent::Document {
                chat_id,
                file_name,
                caption,
                bytes,
            } => {
                assert_eq!(*chat_id, 100);
                assert!(file_name.starts_with("consolidated_monitoring_report_monthly_"));
                assert!(file_name.ends_with(".pdf"));
                assert!(caption.starts_with("Scheduled Monthly"));
                assert!(*bytes > 0);
            }
            other => panic!("unexpected delivery {other:?}"),
        }
    }

    #[tokio::test]
    async fn artifact_kept_when_every_recipient_fails() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(fixture_sources(), dir.path().to_path_buf());
        let transport = RecordingTransport::failing_for(&[1, 2]);

        let artifact = pipeline.generate(ReportPeriod::Weekly, Trigger::OnDemand).await.unwrap();
        let outcome = pipeline.deliver(&artifact, &transport, &[1, 2]).await;

        assert!(outcome.delivered.is_empty());
        assert!(!outcome.artifact_removed);
        assert!(artifact.path.exists());
    }

    #[tokio::test]
    async fn unreachable_sources_still_produce_a_report() {
        let dir = tempfile::tempdir().unwrap();
        let connector = SourceId::ALL
            .into_iter()
            .fold(FixtureConnector::new(), |connector, source| connector.unreachable(source));
        let pipeline = pipeline(connector, dir.path().to_path_buf());

        let artifact = pipeline.generate(ReportPeriod::Weekly, Trigger::OnDemand).await.unwrap();
        assert_eq!(artifact.snapshot.total, PeriodStats::default());
        assert_eq!(artifact.snapshot.unavailable_sources().len(), 5);
    }

    #[test]
    fn file_name_and_caption_embed_period_and_time() {
        let at = NaiveDate::from_ymd_opt(2026, 3, 12)
            .unwrap()
            .and_hms_opt(9, 5, 7)
            .unwrap();
        assert_eq!(
            report_file_name(ReportPeriod::Weekly, at),
            "consolidated_monitoring_report_weekly_2026-03-12_09-05-07.pdf"
        );
        let caption = report_caption(ReportPeriod::Weekly, at, Trigger::OnDemand);
        assert!(caption.starts_with("Weekly Consolidated Monitoring Report"));
        assert!(caption.contains("2026-03-12 09:05:07"));
    }
}
