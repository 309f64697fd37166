//! Process configuration, read once from the environment at startup.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::{NaiveTime, Weekday};
use chrono_tz::Tz;

use crate::error::ConfigError;
use crate::models::SourceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Postgres,
    MySql,
}

impl Dialect {
    pub fn default_port(self) -> u16 {
        match self {
            Dialect::Postgres => 5432,
            Dialect::MySql => 3306,
        }
    }

    fn default_user(self) -> &'static str {
        match self {
            Dialect::Postgres => "postgres",
            Dialect::MySql => "root",
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    pub dialect: Dialect,
}

// Keep the password out of logs.
impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("dialect", &self.dialect)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.host, self.port, self.database)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisplayNames(BTreeMap<SourceId, String>);

impl DisplayNames {
    pub fn new(names: BTreeMap<SourceId, String>) -> Self {
        Self(names)
    }

    pub fn name(&self, source: SourceId) -> &str {
        self.0
            .get(&source)
            .map(String::as_str)
            .unwrap_or_else(|| default_display_name(source))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleConfig {
    pub weekly_day: Weekday,
    pub weekly_time: NaiveTime,
    pub monthly_day: u32,
    pub monthly_time: NaiveTime,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        let nine = NaiveTime::from_hms_opt(9, 0, 0).unwrap_or_default();
        Self {
            weekly_day: Weekday::Mon,
            weekly_time: nine,
            monthly_day: 1,
            monthly_time: nine,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bot_token: Option<String>,
    pub admin_ids: Vec<i64>,
    pub sources: BTreeMap<SourceId, ConnectionDescriptor>,
    pub display_names: DisplayNames,
    pub schedule: ScheduleConfig,
    pub timezone: Tz,
    pub trend_window_days: u32,
    pub query_timeout: Duration,
    pub reports_dir: PathBuf,
    pub log_level: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let mut sources = BTreeMap::new();
        let mut names = BTreeMap::new();
        for source in SourceId::ALL {
            sources.insert(source, descriptor_from(source, &get)?);
            if let Some(name) = get(display_name_key(source)) {
                names.insert(source, name);
            }
        }

        let defaults = ScheduleConfig::default();
        let schedule = ScheduleConfig {
            weekly_day: parse_or("WEEKLY_REPORT_DAY", get("WEEKLY_REPORT_DAY"), defaults.weekly_day, parse_weekday)?,
            weekly_time: parse_or("WEEKLY_REPORT_TIME", get("WEEKLY_REPORT_TIME"), defaults.weekly_time, parse_time)?,
            monthly_day: parse_or("MONTHLY_REPORT_DAY", get("MONTHLY_REPORT_DAY"), defaults.monthly_day, parse_day_of_month)?,
            monthly_time: parse_or("MONTHLY_REPORT_TIME", get("MONTHLY_REPORT_TIME"), defaults.monthly_time, parse_time)?,
        };

        let timezone = parse_or("REPORT_TIMEZONE", get("REPORT_TIMEZONE"), Tz::UTC, |raw| {
            Tz::from_str(raw).map_err(|err| err.to_string())
        })?;
        let trend_window_days = parse_or("TREND_WINDOW_DAYS", get("TREND_WINDOW_DAYS"), 30, |raw| {
            match raw.parse::<u32>() {
                Ok(0) => Err("must be at least 1".to_string()),
                Ok(days) => Ok(days),
                Err(err) => Err(err.to_string()),
            }
        })?;
        let timeout_secs = parse_or("QUERY_TIMEOUT_SECS", get("QUERY_TIMEOUT_SECS"), 10, |raw| {
            raw.parse::<u64>().map_err(|err| err.to_string())
        })?;

        Ok(Self {
            bot_token: get("MONITORING_BOT_TOKEN"),
            admin_ids: parse_admin_ids(get("ADMIN_CHAT_ID").as_deref().unwrap_or_default())?,
            sources,
            display_names: DisplayNames::new(names),
            schedule,
            timezone,
            trend_window_days,
            query_timeout: Duration::from_secs(timeout_secs.max(1)),
            reports_dir: get("REPORTS_DIR").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("reports")),
            log_level: get("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    pub fn bot_token(&self) -> Result<&str, ConfigError> {
        self.bot_token
            .as_deref()
            .ok_or(ConfigError::Missing("MONITORING_BOT_TOKEN"))
    }
}

pub fn dialect_of(source: SourceId) -> Dialect {
    match source {
        SourceId::Dockify | SourceId::Document => Dialect::Postgres,
        SourceId::TelBot | SourceId::Invoice | SourceId::Travel => Dialect::MySql,
    }
}

fn env_prefix(source: SourceId) -> &'static str {
    match source {
        SourceId::Dockify => "DOCKFIY",
        SourceId::TelBot => "TEL_BOT",
        SourceId::Invoice => "INVOICE",
        SourceId::Travel => "TRAVEL",
        SourceId::Document => "DOCUMENT",
    }
}

fn default_database(source: SourceId) -> &'static str {
    match source {
        SourceId::Dockify => "telegram-document-bot",
        SourceId::TelBot => "task_manager",
        SourceId::Invoice => "invoice_system",
        SourceId::Travel => "travel",
        SourceId::Document => "telegram_bot_db",
    }
}

fn display_name_key(source: SourceId) -> &'static str {
    match source {
        SourceId::Dockify => "DOCKFIY_BOT_NAME",
        SourceId::TelBot => "TEL_BOT_NAME",
        SourceId::Invoice => "INVOICE_SYSTEM_NAME",
        SourceId::Travel => "TRAVEL_SYSTEM_NAME",
        SourceId::Document => "DOCUMENT_BOT_NAME",
    }
}

pub fn default_display_name(source: SourceId) -> &'static str {
    match source {
        SourceId::Dockify => "@DOCKFIY-PART 3",
        SourceId::TelBot => "@tel-bot-main",
        SourceId::Invoice => "Invoice System (Managers/Admins)",
        SourceId::Travel => "Travel System (Vehicle Forms)",
        SourceId::Document => "Document Bot (File Uploads)",
    }
}

fn descriptor_from<F>(source: SourceId, get: &F) -> Result<ConnectionDescriptor, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let prefix = env_prefix(source);
    let dialect = dialect_of(source);
    let port_key = format!("{prefix}_DB_PORT");
    let port = match get(&port_key) {
        Some(raw) => raw.parse::<u16>().map_err(|err| ConfigError::Invalid {
            key: port_key.clone(),
            message: err.to_string(),
        })?,
        None => dialect.default_port(),
    };

    Ok(ConnectionDescriptor {
        host: get(&format!("{prefix}_DB_HOST")).unwrap_or_else(|| "localhost".to_string()),
        port,
        database: get(&format!("{prefix}_DB_NAME"))
            .unwrap_or_else(|| default_database(source).to_string()),
        username: get(&format!("{prefix}_DB_USER"))
            .unwrap_or_else(|| dialect.default_user().to_string()),
        password: get(&format!("{prefix}_DB_PASSWORD")).unwrap_or_default(),
        dialect,
    })
}

fn parse_or<T, P>(key: &str, raw: Option<String>, default: T, parse: P) -> Result<T, ConfigError>
where
    P: Fn(&str) -> Result<T, String>,
{
    match raw {
        Some(raw) => parse(&raw).map_err(|message| ConfigError::Invalid {
            key: key.to_string(),
            message,
        }),
        None => Ok(default),
    }
}

/// Accepts weekday names (`mon`, `Monday`) or 0-based offsets from Monday.
pub fn parse_weekday(raw: &str) -> Result<Weekday, String> {
    if let Ok(offset) = raw.parse::<u8>() {
        return match offset {
            0 => Ok(Weekday::Mon),
            1 => Ok(Weekday::Tue),
            2 => Ok(Weekday::Wed),
            3 => Ok(Weekday::Thu),
            4 => Ok(Weekday::Fri),
            5 => Ok(Weekday::Sat),
            6 => Ok(Weekday::Sun),
            _ => Err(format!("weekday offset {offset} out of range 0..=6")),
        };
    }
    Weekday::from_str(raw).map_err(|_| format!("unknown weekday {raw:?}"))
}

pub fn parse_time(raw: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(raw, "%H:%M").map_err(|err| format!("expected HH:MM ({err})"))
}

fn parse_day_of_month(raw: &str) -> Result<u32, String> {
    match raw.parse::<u32>() {
        Ok(day @ 1..=28) => Ok(day),
        Ok(day) => Err(format!("day {day} must be within 1..=28 to fire every month")),
        Err(err) => Err(err.to_string()),
    }
}

fn parse_admin_ids(raw: &str) -> Result<Vec<i64>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(|id| {
            id.parse::<i64>().map_err(|err| ConfigError::Invalid {
                key: "ADMIN_CHAT_ID".to_string(),
                message: format!("{id:?}: {err}"),
            })
        })
        .collect()
}
