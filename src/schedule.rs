use std::fmt::Write;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use chrono_tz::Tz;
use tracing::{debug, error, info};

use crate::config::ScheduleConfig;
use crate::models::ReportPeriod;
use crate::pipeline::{ReportPipeline, Trigger};
use crate::telegram::ChatTransport;

const TICK: Duration = Duration::from_secs(30);

/// When a job's trigger fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerRule {
    Weekly { weekday: Weekday, at: NaiveTime },
    Daily { at: NaiveTime },
}

impl TriggerRule {
    fn at(&self) -> NaiveTime {
        match self {
            TriggerRule::Weekly { at, .. } | TriggerRule::Daily { at } => *at,
        }
    }

    fn fires_on(&self, date: NaiveDate) -> bool {
        match self {
            TriggerRule::Weekly { weekday, .. } => date.weekday() == *weekday,
            TriggerRule::Daily { .. } => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledJob {
    pub period: ReportPeriod,
    pub rule: TriggerRule,
    /// The trigger fires daily; the job only acts on this day of the month.
    pub day_of_month: Option<u32>,
}

impl ScheduledJob {
    pub fn acts_on(&self, date: NaiveDate) -> bool {
        self.day_of_month.map_or(true, |day| date.day() == day)
    }
}

pub fn jobs(config: &ScheduleConfig) -> Vec<ScheduledJob> {
    vec![
        ScheduledJob {
            period: ReportPeriod::Weekly,
            rule: TriggerRule::Weekly {
                weekday: config.weekly_day,
                at: config.weekly_time,
            },
            day_of_month: None,
        },
        ScheduledJob {
            period: ReportPeriod::Monthly,
            rule: TriggerRule::Daily {
                at: config.monthly_time,
            },
            day_of_month: Some(config.monthly_day),
        },
    ]
}

/// Evaluates the job list against successive local times.
///
/// A trigger fires when its time of day falls in `(previous tick, now]`, so
/// starting the process after the slot has passed does not fire it late,
/// and each slot fires at most once.
#[derive(Debug, Clone)]
pub struct Scheduler {
    jobs: Vec<ScheduledJob>,
    last_tick: NaiveDateTime,
}

impl Scheduler {
    pub fn new(jobs: Vec<ScheduledJob>, started_at: NaiveDateTime) -> Self {
        Self {
            jobs,
            last_tick: started_at,
        }
    }

    pub fn jobs(&self) -> &[ScheduledJob] {
        &self.jobs
    }

    /// Periods whose job fired and acts at `now`.
    pub fn tick(&mut self, now: NaiveDateTime) -> Vec<ReportPeriod> {
        let previous = self.last_tick;
        if now <= previous {
            return Vec::new();
        }
        self.last_tick = now;

        // A long report run can carry the next tick past midnight.
        let mut due = Vec::new();
        for date in previous.date().iter_days().take_while(|date| *date <= now.date()) {
            for job in &self.jobs {
                let slot = date.and_time(job.rule.at());
                if slot <= previous || slot > now || !job.rule.fires_on(date) {
                    continue;
                }
                if job.acts_on(date) {
                    due.push(job.period);
                } else {
                    debug!(period = %job.period, %date, "trigger fired, not the configured day");
                }
            }
        }
        due
    }
}

/// Runs forever; callers stop it by dropping the future.
pub async fn drive(
    mut scheduler: Scheduler,
    pipeline: ReportPipeline,
    transport: Arc<dyn ChatTransport>,
    recipients: Vec<i64>,
) {
    let clock = pipeline.clock();
    let mut interval = tokio::time::interval(TICK);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    info!(jobs = scheduler.jobs().len(), "scheduler started");

    loop {
        interval.tick().await;
        for period in scheduler.tick(clock.now()) {
            info!(%period, recipients = recipients.len(), "scheduled report due");
            if let Err(err) = pipeline
                .generate_and_deliver(period, Trigger::Scheduled, transport.as_ref(), &recipients)
                .await
            {
                error!(%period, error = %err, "scheduled report failed");
            }
        }
    }
}

/// Human-readable schedule for the `/schedule` command.
pub fn describe(config: &ScheduleConfig, tz: Tz) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "Report Schedule ({tz})");
    let _ = writeln!(output);
    let _ = writeln!(
        output,
        "Weekly report: every {} at {}",
        weekday_name(config.weekly_day),
        config.weekly_time.format("%H:%M")
    );
    let _ = writeln!(
        output,
        "Monthly report: day {} of each month at {}",
        config.monthly_day,
        config.monthly_time.format("%H:%M")
    );
    output
}

fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    fn default_scheduler(started_at: NaiveDateTime) -> Scheduler {
        Scheduler::new(jobs(&ScheduleConfig::default()), started_at)
    }

    #[test]
    fn weekly_fires_once_on_configured_weekday() {
        // 2026-03-09 is a Monday.
        let mut scheduler = default_scheduler(at(2026, 3, 9, 8, 59));
        assert_eq!(scheduler.tick(at(2026, 3, 9, 9, 0)), vec![ReportPeriod::Weekly]);
        assert!(scheduler.tick(at(2026, 3, 9, 9, 1)).is_empty());

        let mut tuesday = default_scheduler(at(2026, 3, 10, 8, 59));
        assert!(tuesday.tick(at(2026, 3, 10, 9, 0)).is_empty());
    }

    #[test]
    fn monthly_trigger_acts_only_on_configured_day() {
        // 2026-04-01 is a Wednesday.
        let mut first = default_scheduler(at(2026, 4, 1, 8, 59));
        assert_eq!(first.tick(at(2026, 4, 1, 9, 0)), vec![ReportPeriod::Monthly]);

        let mut second = default_scheduler(at(2026, 4, 2, 8, 59));
        assert!(second.tick(at(2026, 4, 2, 9, 0)).is_empty());
    }

    #[test]
    fn both_jobs_can_fire_together() {
        // 2026-06-01 is a Monday and the first of the month.
        let mut scheduler = default_scheduler(at(2026, 6, 1, 8, 59));
        assert_eq!(
            scheduler.tick(at(2026, 6, 1, 9, 0)),
            vec![ReportPeriod::Weekly, ReportPeriod::Monthly]
        );
    }

    #[test]
    fn starting_after_the_slot_does_not_fire_late() {
        let mut scheduler = default_scheduler(at(2026, 3, 9, 10, 0));
        assert!(scheduler.tick(at(2026, 3, 9, 10, 0)).is_empty());
        assert!(scheduler.tick(at(2026, 3, 9, 10, 1)).is_empty());
        assert_eq!(scheduler.tick(at(2026, 3, 16, 9, 0)), vec![ReportPeriod::Weekly]);
    }

    #[test]
    fn slot_before_midnight_fires_when_tick_lands_next_day() {
        let config = ScheduleConfig {
            weekly_day: Weekday::Sun,
            weekly_time: NaiveTime::from_hms_opt(23, 58, 0).unwrap(),
            monthly_day: 1,
            monthly_time: NaiveTime::from_hms_opt(23, 59, 0).unwrap(),
        };
        // 2026-03-01 is a Sunday and the first of the month.
        let started = NaiveDate::from_ymd_opt(2026, 3, 1)
            .unwrap()
            .and_hms_opt(23, 58, 30)
            .unwrap();
        let mut scheduler = Scheduler::new(jobs(&config), started);
        let next_day = NaiveDate::from_ymd_opt(2026, 3, 2)
            .unwrap()
            .and_hms_opt(0, 0, 30)
            .unwrap();
        assert_eq!(scheduler.tick(next_day), vec![ReportPeriod::Monthly]);
        assert!(scheduler.tick(at(2026, 3, 2, 23, 59)).is_empty());
    }

    #[test]
    fn custom_schedule_is_respected() {
        let config = ScheduleConfig {
            weekly_day: Weekday::Fri,
            weekly_time: NaiveTime::from_hms_opt(17, 30, 0).unwrap(),
            monthly_day: 15,
            monthly_time: NaiveTime::from_hms_opt(6, 0, 0).unwrap(),
        };
        // 2026-05-15 is a Friday.
        let mut scheduler = Scheduler::new(jobs(&config), at(2026, 5, 15, 0, 0));
        assert_eq!(scheduler.tick(at(2026, 5, 15, 6, 0)), vec![ReportPeriod::Monthly]);
        assert_eq!(scheduler.tick(at(2026, 5, 15, 17, 30)), vec![ReportPeriod::Weekly]);

        let text = describe(&config, chrono_tz::Europe::Berlin);
        assert!(text.contains("every Friday at 17:30"));
        assert!(text.contains("day 15 of each month at 06:00"));
        assert!(text.contains("Europe/Berlin"));
    }
}
