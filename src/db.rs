use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{FixedOffset, NaiveDate, Offset, TimeZone, Utc};
use chrono_tz::Tz;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{Connection, MySql, Postgres};
use tracing::{debug, warn};

use crate::config::{ConnectionDescriptor, Dialect};
use crate::error::SourceError;
use crate::models::{SourceId, TrendPoint};
use crate::query::ActivityQuery;

/// Live-catalog inspection, run right before the query that depends on it.
#[async_trait]
pub trait SchemaProbe {
    async fn has_column(&mut self, table: &str, column: &str) -> Result<bool, SourceError>;
}

/// An open handle on one source, scoped to a single query batch.
#[async_trait]
pub trait ActivityStore: SchemaProbe + Send {
    async fn count(&mut self, query: &ActivityQuery) -> Result<u64, SourceError>;

    async fn daily_counts(&mut self, query: &ActivityQuery) -> Result<Vec<TrendPoint>, SourceError>;

    async fn close(&mut self);
}

/// Opens a fresh store for a source; no pooling.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, source: SourceId) -> Result<Box<dyn ActivityStore>, SourceError>;
}

pub struct DatabaseConnector {
    descriptors: BTreeMap<SourceId, ConnectionDescriptor>,
    timeout: Duration,
    timezone: Tz,
}

impl DatabaseConnector {
    /// Sessions evaluate date expressions in `timezone`, the same zone the
    /// reference date comes from.
    pub fn new(
        descriptors: BTreeMap<SourceId, ConnectionDescriptor>,
        timeout: Duration,
        timezone: Tz,
    ) -> Self {
        Self {
            descriptors,
            timeout,
            timezone,
        }
    }
}

fn pg_options(descriptor: &ConnectionDescriptor, timezone: Tz) -> PgConnectOptions {
    PgConnectOptions::new()
        .host(&descriptor.host)
        .port(descriptor.port)
        .database(&descriptor.database)
        .username(&descriptor.username)
        .password(&descriptor.password)
        .options([("TimeZone", timezone.name())])
}

// MySQL servers often lack the named-zone tables, so the session gets the
// zone's current offset instead.
fn session_offset(timezone: Tz, at: chrono::DateTime<Utc>) -> FixedOffset {
    timezone.offset_from_utc_datetime(&at.naive_utc()).fix()
}

fn mysql_options(descriptor: &ConnectionDescriptor, offset: FixedOffset) -> MySqlConnectOptions {
    MySqlConnectOptions::new()
        .host(&descriptor.host)
        .port(descriptor.port)
        .database(&descriptor.database)
        .username(&descriptor.username)
        .password(&descriptor.password)
        .charset("utf8mb4")
        .timezone(Some(offset.to_string()))
}

#[async_trait]
impl Connector for DatabaseConnector {
    async fn open(&self, source: SourceId) -> Result<Box<dyn ActivityStore>, SourceError> {
        let descriptor = self.descriptors.get(&source).ok_or_else(|| SourceError::Connect {
            source_id: source,
            cause: sqlx::Error::Configuration(format!("no connection descriptor for {source}").into()),
        })?;
        let session = SourceSession::open(source, descriptor, self.timeout, self.timezone).await?;
        Ok(Box::new(session))
    }
}

enum SourceConnection {
    Postgres(PgConnection),
    MySql(MySqlConnection),
}

pub struct SourceSession {
    source: SourceId,
    dialect: Dialect,
    timeout: Duration,
    connection: Option<SourceConnection>,
}

impl SourceSession {
    pub async fn open(
        source: SourceId,
        descriptor: &ConnectionDescriptor,
        timeout: Duration,
        timezone: Tz,
    ) -> Result<Self, SourceError> {
        debug!(source = %source, target = %descriptor, %timezone, "opening source connection");
        let connect = async {
            match descriptor.dialect {
                Dialect::Postgres => {
                    let options = pg_options(descriptor, timezone);
                    PgConnection::connect_with(&options)
                        .await
                        .map(SourceConnection::Postgres)
                }
                Dialect::MySql => {
                    let options = mysql_options(descriptor, session_offset(timezone, Utc::now()));
                    MySqlConnection::connect_with(&options)
                        .await
                        .map(SourceConnection::MySql)
                }
            }
        };

        let connection = match tokio::time::timeout(timeout, connect).await {
            Ok(Ok(connection)) => connection,
            Ok(Err(cause)) => {
                return Err(SourceError::Connect {
                    source_id: source,
                    cause,
                })
            }
            Err(_) => {
                return Err(SourceError::Timeout {
                    source_id: source,
                    stage: "connect",
                    seconds: timeout.as_secs(),
                })
            }
        };

        Ok(Self {
            source,
            dialect: descriptor.dialect,
            timeout,
            connection: Some(connection),
        })
    }

    fn connection(&mut self) -> Result<&mut SourceConnection, SourceError> {
        let source = self.source;
        self.connection.as_mut().ok_or_else(|| SourceError::Query {
            source_id: source,
            cause: sqlx::Error::PoolClosed,
        })
    }
}

async fn bounded<T, F>(
    source: SourceId,
    limit: Duration,
    stage: &'static str,
    fut: F,
) -> Result<T, SourceError>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(cause)) => Err(SourceError::Query {
            source_id: source,
            cause,
        }),
        Err(_) => Err(SourceError::Timeout {
            source_id: source,
            stage,
            seconds: limit.as_secs(),
        }),
    }
}

fn non_negative(count: i64) -> u64 {
    u64::try_from(count).unwrap_or(0)
}

#[async_trait]
impl SchemaProbe for SourceSession {
    async fn has_column(&mut self, table: &str, column: &str) -> Result<bool, SourceError> {
        let (source, limit) = (self.source, self.timeout);
        match self.connection()? {
            SourceConnection::Postgres(conn) => {
                let statement = sqlx::query_scalar::<Postgres, bool>(
                    "SELECT EXISTS (SELECT 1 FROM information_schema.columns \
                     WHERE table_schema = current_schema() AND table_name = $1 AND column_name = $2)",
                )
                .bind(table)
                .bind(column);
                bounded(source, limit, "schema probe", statement.fetch_one(conn)).await
            }
            SourceConnection::MySql(conn) => {
                let statement = sqlx::query_scalar::<MySql, i64>(
                    "SELECT COUNT(*) FROM information_schema.columns \
                     WHERE table_schema = DATABASE() AND table_name = ? AND column_name = ?",
                )
                .bind(table)
                .bind(column);
                let matches = bounded(source, limit, "schema probe", statement.fetch_one(conn)).await?;
                Ok(matches > 0)
            }
        }
    }
}

#[async_trait]
impl ActivityStore for SourceSession {
    async fn count(&mut self, query: &ActivityQuery) -> Result<u64, SourceError> {
        let bound = query.count_sql(self.dialect);
        let (source, limit) = (self.source, self.timeout);
        let count = match self.connection()? {
            SourceConnection::Postgres(conn) => {
                let mut statement = sqlx::query_scalar::<Postgres, i64>(&bound.sql);
                for date in &bound.binds {
                    statement = statement.bind(*date);
                }
                bounded(source, limit, "count query", statement.fetch_one(conn)).await?
            }
            SourceConnection::MySql(conn) => {
                let mut statement = sqlx::query_scalar::<MySql, i64>(&bound.sql);
                for date in &bound.binds {
                    statement = statement.bind(*date);
                }
                bounded(source, limit, "count query", statement.fetch_one(conn)).await?
            }
        };
        Ok(non_negative(count))
    }

    async fn daily_counts(&mut self, query: &ActivityQuery) -> Result<Vec<TrendPoint>, SourceError> {
        let bound = query.daily_sql(self.dialect);
        let (source, limit) = (self.source, self.timeout);
        let rows: Vec<(NaiveDate, i64)> = match self.connection()? {
            SourceConnection::Postgres(conn) => {
                let mut statement = sqlx::query_as::<Postgres, (NaiveDate, i64)>(&bound.sql);
                for date in &bound.binds {
                    statement = statement.bind(*date);
                }
                bounded(source, limit, "trend query", statement.fetch_all(conn)).await?
            }
            SourceConnection::MySql(conn) => {
                let mut statement = sqlx::query_as::<MySql, (NaiveDate, i64)>(&bound.sql);
                for date in &bound.binds {
                    statement = statement.bind(*date);
                }
                bounded(source, limit, "trend query", statement.fetch_all(conn)).await?
            }
        };

        Ok(rows
            .into_iter()
            .map(|(date, count)| TrendPoint {
                date,
                unique_actors: non_negative(count),
            })
            .collect())
    }

    async fn close(&mut self) {
        let result = match self.connection.take() {
            Some(SourceConnection::Postgres(conn)) => conn.close().await,
            Some(SourceConnection::MySql(conn)) => conn.close().await,
            None => return,
        };
        if let Err(err) = result {
            warn!(source = %self.source, error = %err, "failed to close source connection cleanly");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(dialect: Dialect) -> ConnectionDescriptor {
        ConnectionDescriptor {
            host: "db.internal".to_string(),
            port: 5432,
            database: "analytics".to_string(),
            username: "reporter".to_string(),
            password: "secret".to_string(),
            dialect,
        }
    }

    #[test]
    fn postgres_session_uses_report_timezone() {
        let options = pg_options(&descriptor(Dialect::Postgres), chrono_tz::Asia::Tokyo);
        assert_eq!(options.get_options(), Some("-c TimeZone=Asia/Tokyo"));
        assert_eq!(options.get_host(), "db.internal");
        assert_eq!(options.get_database(), Some("analytics"));
    }

    #[test]
    fn mysql_offset_follows_daylight_saving() {
        let winter = Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap();
        let summer = Utc.with_ymd_and_hms(2026, 7, 15, 12, 0, 0).unwrap();
        let berlin = chrono_tz::Europe::Berlin;
        assert_eq!(session_offset(berlin, winter).to_string(), "+01:00");
        assert_eq!(session_offset(berlin, summer).to_string(), "+02:00");
        assert_eq!(session_offset(chrono_tz::Asia::Tokyo, winter).to_string(), "+09:00");
        assert_eq!(session_offset(chrono_tz::UTC, summer).to_string(), "+00:00");

        let options = mysql_options(&descriptor(Dialect::MySql), session_offset(berlin, winter));
        assert_eq!(options.get_charset(), "utf8mb4");
    }
}
