//! Status workflows for the department's records. Each submodule owns one
//! table family and exposes the transitions allowed on it.

use chrono::{NaiveDate, NaiveTime, Utc};

use crate::error::{AppError, AppResult};

/// Declares a status enum stored as text in SQLite and as a string on the wire.
macro_rules! status_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }

            pub fn parse(raw: &str) -> Option<Self> {
                match raw.trim() {
                    $($text => Some($name::$variant),)+
                    _ => None,
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl rusqlite::types::ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
                Ok(self.as_str().into())
            }
        }

        impl rusqlite::types::FromSql for $name {
            fn column_result(
                value: rusqlite::types::ValueRef<'_>,
            ) -> rusqlite::types::FromSqlResult<Self> {
                let text = value.as_str()?;
                $name::parse(text).ok_or_else(|| {
                    rusqlite::types::FromSqlError::Other(
                        format!("unknown {} value: {}", stringify!($name), text).into(),
                    )
                })
            }
        }
    };
}

pub mod class_session;
pub mod deliberation;
pub mod incident;
pub mod internship;
pub mod reservation;

pub fn now_stamp() -> String {
    Utc::now().to_rfc3339()
}

pub fn parse_date(raw: &str) -> AppResult<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| AppError::bad_params(format!("invalid date (want YYYY-MM-DD): {}", raw)))
}

pub fn parse_time(raw: &str) -> AppResult<NaiveTime> {
    let t = raw.trim();
    NaiveTime::parse_from_str(t, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(t, "%H:%M:%S"))
        .map_err(|_| AppError::bad_params(format!("invalid time (want HH:MM): {}", raw)))
}

pub fn fmt_date(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

pub fn fmt_time(t: NaiveTime) -> String {
    t.format("%H:%M").to_string()
}

pub fn person_exists(conn: &rusqlite::Connection, person_id: &str) -> AppResult<bool> {
    use rusqlite::OptionalExtension;
    Ok(conn
        .query_row("SELECT 1 FROM persons WHERE id = ?", [person_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .is_some())
}

pub fn require_person(conn: &rusqlite::Connection, person_id: &str) -> AppResult<()> {
    if person_exists(conn, person_id)? {
        Ok(())
    } else {
        Err(AppError::not_found("person", person_id))
    }
}

pub fn has_role(
    conn: &rusqlite::Connection,
    person_id: &str,
    role: crate::roles::Role,
) -> AppResult<bool> {
    use rusqlite::OptionalExtension;
    let sql = format!("SELECT 1 FROM {} WHERE person_id = ?", role.table());
    Ok(conn
        .query_row(&sql, [person_id], |r| r.get::<_, i64>(0))
        .optional()?
        .is_some())
}
