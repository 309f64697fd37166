use chrono::NaiveDate;

use crate::config::Dialect;

/// Date predicate applied to a source's day expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayFilter {
    On(NaiveDate),
    Between { start: NaiveDate, end: NaiveDate },
    /// Monday of the reference week through the reference date, computed by
    /// the database from the reference date alone.
    WeekToDate(NaiveDate),
    /// First of the reference month through the reference date, computed by
    /// the database.
    MonthToDate(NaiveDate),
    Unbounded,
}

/// One distinct-actor query against one activity table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivityQuery {
    pub table: &'static str,
    pub actor_column: &'static str,
    pub day_expr: &'static str,
    pub require_actor: bool,
    pub filter: DayFilter,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundQuery {
    pub sql: String,
    pub binds: Vec<NaiveDate>,
}

struct SqlBuilder {
    dialect: Dialect,
    binds: Vec<NaiveDate>,
}

impl SqlBuilder {
    fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            binds: Vec::new(),
        }
    }

    fn bind(&mut self, value: NaiveDate) -> String {
        self.binds.push(value);
        match self.dialect {
            Dialect::Postgres => format!("${}::date", self.binds.len()),
            Dialect::MySql => "?".to_string(),
        }
    }

    fn finish(self, sql: String) -> BoundQuery {
        BoundQuery {
            sql,
            binds: self.binds,
        }
    }
}

impl ActivityQuery {
    /// `SELECT COUNT(DISTINCT actor)` over the filtered rows.
    pub fn count_sql(&self, dialect: Dialect) -> BoundQuery {
        let mut builder = SqlBuilder::new(dialect);
        let mut sql = format!(
            "SELECT COUNT(DISTINCT {}) FROM {}",
            self.actor_column, self.table
        );
        push_where(&mut sql, &self.conditions(&mut builder));
        builder.finish(sql)
    }

    /// One row per active day: `(day, distinct actors)`, ascending.
    pub fn daily_sql(&self, dialect: Dialect) -> BoundQuery {
        let mut builder = SqlBuilder::new(dialect);
        let mut sql = format!(
            "SELECT {day} AS activity_day, COUNT(DISTINCT {actor}) AS unique_actors FROM {table}",
            day = self.day_expr,
            actor = self.actor_column,
            table = self.table,
        );
        push_where(&mut sql, &self.conditions(&mut builder));
        sql.push_str(&format!(
            " GROUP BY {day} ORDER BY {day} ASC",
            day = self.day_expr
        ));
        builder.finish(sql)
    }

    fn conditions(&self, builder: &mut SqlBuilder) -> Vec<String> {
        let day = self.day_expr;
        let mut conditions = Vec::new();

        match self.filter {
            DayFilter::On(date) => {
                conditions.push(format!("{day} = {}", builder.bind(date)));
            }
            DayFilter::Between { start, end } => {
                conditions.push(format!("{day} >= {}", builder.bind(start)));
                conditions.push(format!("{day} <= {}", builder.bind(end)));
            }
            DayFilter::WeekToDate(reference) => {
                let lower = match builder.dialect {
                    Dialect::MySql => {
                        let first = builder.bind(reference);
                        let second = builder.bind(reference);
                        format!("DATE_SUB({first}, INTERVAL WEEKDAY({second}) DAY)")
                    }
                    Dialect::Postgres => {
                        format!("date_trunc('week', {})::date", builder.bind(reference))
                    }
                };
                conditions.push(format!("{day} >= {lower}"));
                conditions.push(format!("{day} <= {}", builder.bind(reference)));
            }
            DayFilter::MonthToDate(reference) => {
                let lower = match builder.dialect {
                    Dialect::MySql => {
                        let first = builder.bind(reference);
                        let second = builder.bind(reference);
                        format!("DATE_SUB({first}, INTERVAL DAYOFMONTH({second}) - 1 DAY)")
                    }
                    Dialect::Postgres => {
                        format!("date_trunc('month', {})::date", builder.bind(reference))
                    }
                };
                conditions.push(format!("{day} >= {lower}"));
                conditions.push(format!("{day} <= {}", builder.bind(reference)));
            }
            DayFilter::Unbounded => {}
        }

        if self.require_actor {
            conditions.push(format!("{} IS NOT NULL", self.actor_column));
        }
        conditions
    }
}

fn push_where(sql: &mut String, conditions: &[String]) {
    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn query(filter: DayFilter) -> ActivityQuery {
        ActivityQuery {
            table: "journeys",
            actor_column: "emp_uid",
            day_expr: "DATE(start_time)",
            require_actor: true,
            filter,
        }
    }

    #[test]
    fn mysql_week_uses_native_weekday() {
        let reference = date(2026, 3, 12);
        let bound = query(DayFilter::WeekToDate(reference)).count_sql(Dialect::MySql);
        assert_eq!(
            bound.sql,
            "SELECT COUNT(DISTINCT emp_uid) FROM journeys WHERE \
             DATE(start_time) >= DATE_SUB(?, INTERVAL WEEKDAY(?) DAY) AND \
             DATE(start_time) <= ? AND emp_uid IS NOT NULL"
        );
        assert_eq!(bound.binds, vec![reference; 3]);
    }

    #[test]
    fn postgres_numbers_placeholders() {
        let bound = ActivityQuery {
            table: "user_activity",
            actor_column: "telegram_id",
            day_expr: "activity_date",
            require_actor: false,
            filter: DayFilter::Between {
                start: date(2026, 3, 9),
                end: date(2026, 3, 12),
            },
        }
        .count_sql(Dialect::Postgres);
        assert_eq!(
            bound.sql,
            "SELECT COUNT(DISTINCT telegram_id) FROM user_activity WHERE \
             activity_date >= $1::date AND activity_date <= $2::date"
        );
        assert_eq!(bound.binds, vec![date(2026, 3, 9), date(2026, 3, 12)]);
    }

    #[test]
    fn month_to_date_per_dialect() {
        let reference = date(2026, 3, 12);
        let mysql = query(DayFilter::MonthToDate(reference)).count_sql(Dialect::MySql);
        assert!(mysql.sql.contains("DATE_SUB(?, INTERVAL DAYOFMONTH(?) - 1 DAY)"));
        assert_eq!(mysql.binds.len(), 3);

        let postgres = query(DayFilter::MonthToDate(reference)).count_sql(Dialect::Postgres);
        assert!(postgres.sql.contains("date_trunc('month', $1::date)::date"));
        assert!(postgres.sql.contains("<= $2::date"));
        assert_eq!(postgres.binds.len(), 2);
    }

    #[test]
    fn unbounded_count_has_no_date_predicate() {
        let bound = ActivityQuery {
            table: "upload_sessions",
            actor_column: "user_id",
            day_expr: "created_at::date",
            require_actor: false,
            filter: DayFilter::Unbounded,
        }
        .count_sql(Dialect::Postgres);
        assert_eq!(bound.sql, "SELECT COUNT(DISTINCT user_id) FROM upload_sessions");
        assert!(bound.binds.is_empty());
    }

    #[test]
    fn daily_query_groups_and_orders_by_day() {
        let bound = query(DayFilter::Between {
            start: date(2026, 2, 11),
            end: date(2026, 3, 12),
        })
        .daily_sql(Dialect::MySql);
        assert!(bound.sql.starts_with(
            "SELECT DATE(start_time) AS activity_day, COUNT(DISTINCT emp_uid) AS unique_actors"
        ));
        assert!(bound
            .sql
            .ends_with("GROUP BY DATE(start_time) ORDER BY DATE(start_time) ASC"));
        assert_eq!(bound.binds.len(), 2);
    }
}
