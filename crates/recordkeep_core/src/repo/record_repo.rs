//! Record storage contract and SQLite implementation.
//!
//! # Responsibility
//! - Provide natural-key lookup, insert, version-guarded update and delete
//!   over the `records` table.
//! - Keep SQL details inside the core persistence boundary.
//!
//! # Invariants
//! - Write paths call `Record::validate()` before SQL mutations.
//! - The versioned update is one conditional statement; the version check
//!   and the write never happen in separate round trips.
//! - Read paths reject invalid persisted state instead of masking it.

use crate::db::migrations::latest_version;
use crate::db::DbError;
use crate::model::record::{Record, RecordId, RecordValidationError};
use rusqlite::{params, Connection, OptionalExtension, Params, Row};
use std::collections::BTreeSet;
use thiserror::Error;

const RECORD_COLUMNS: &str = "id, natural_id, parent_natural_id, value, children, version";

pub type RepoResult<T> = Result<T, RepoError>;

/// Storage-level error for record persistence and query operations.
#[derive(Debug, Error)]
pub enum RepoError {
    #[error(transparent)]
    Validation(#[from] RecordValidationError),
    #[error(transparent)]
    Db(#[from] DbError),
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("version conflict on `{natural_id}`: expected {expected}, found {actual}")]
    VersionConflict {
        natural_id: String,
        expected: i64,
        actual: i64,
    },
    #[error("invalid persisted record data: {0}")]
    InvalidData(String),
    #[error("connection schema version {actual_version} does not match expected {expected_version}")]
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    #[error("required table `{0}` is missing")]
    MissingRequiredTable(&'static str),
    #[error("required column `{table}.{column}` is missing")]
    MissingRequiredColumn {
        table: &'static str,
        column: &'static str,
    },
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Storage collaborator for versioned records.
pub trait RecordRepository {
    /// Looks a record up by natural key.
    fn find_by_natural_id(&self, natural_id: &str) -> RepoResult<Option<Record>>;
    /// Lists records whose parent reference equals `parent_natural_id`.
    fn find_by_parent_natural_id(&self, parent_natural_id: &str) -> RepoResult<Vec<Record>>;
    /// Lists every record ordered by natural id.
    fn list_records(&self) -> RepoResult<Vec<Record>>;
    /// Inserts a new row at version 1 and returns it with its surrogate id.
    fn insert_record(&self, record: &Record) -> RepoResult<Record>;
    /// Writes `record` only if the row with its surrogate id still holds
    /// `expected_version`, bumping the version by one.
    fn update_record_if_version(&self, record: &Record, expected_version: i64)
        -> RepoResult<Record>;
    /// Deletes a row by natural key.
    fn delete_by_natural_id(&self, natural_id: &str) -> RepoResult<()>;
}

impl<T: RecordRepository + ?Sized> RecordRepository for &T {
    fn find_by_natural_id(&self, natural_id: &str) -> RepoResult<Option<Record>> {
        (**self).find_by_natural_id(natural_id)
    }

    fn find_by_parent_natural_id(&self, parent_natural_id: &str) -> RepoResult<Vec<Record>> {
        (**self).find_by_parent_natural_id(parent_natural_id)
    }

    fn list_records(&self) -> RepoResult<Vec<Record>> {
        (**self).list_records()
    }

    fn insert_record(&self, record: &Record) -> RepoResult<Record> {
        (**self).insert_record(record)
    }

    fn update_record_if_version(
        &self,
        record: &Record,
        expected_version: i64,
    ) -> RepoResult<Record> {
        (**self).update_record_if_version(record, expected_version)
    }

    fn delete_by_natural_id(&self, natural_id: &str) -> RepoResult<()> {
        (**self).delete_by_natural_id(natural_id)
    }
}

/// SQLite-backed record repository.
///
/// Borrows either a plain connection or a `rusqlite::Transaction`, so the
/// caller decides the transaction scope of every write.
pub struct SqliteRecordRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteRecordRepository<'conn> {
    /// Constructs a repository from a migrated connection.
    ///
    /// # Errors
    /// - `UninitializedConnection` when migrations have not been applied.
    /// - `MissingRequiredTable`/`MissingRequiredColumn` on schema drift.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_record_connection_ready(conn)?;
        Ok(Self { conn })
    }

    fn query_one<P: Params>(&self, sql: &str, params: P) -> RepoResult<Option<Record>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(params)?;
        match rows.next()? {
            Some(row) => Ok(Some(parse_record_row(row)?)),
            None => Ok(None),
        }
    }

    fn query_many<P: Params>(&self, sql: &str, params: P) -> RepoResult<Vec<Record>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(params)?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(parse_record_row(row)?);
        }
        Ok(records)
    }

    fn stored_identity(&self, natural_id: &str) -> RepoResult<Option<(RecordId, i64)>> {
        let identity = self
            .conn
            .query_row(
                "SELECT id, version FROM records WHERE natural_id = ?1;",
                [natural_id],
                |row| Ok((row.get::<_, RecordId>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;
        Ok(identity)
    }
}

impl RecordRepository for SqliteRecordRepository<'_> {
    fn find_by_natural_id(&self, natural_id: &str) -> RepoResult<Option<Record>> {
        self.query_one(
            &format!("SELECT {RECORD_COLUMNS} FROM records WHERE natural_id = ?1;"),
            [natural_id],
        )
    }

    fn find_by_parent_natural_id(&self, parent_natural_id: &str) -> RepoResult<Vec<Record>> {
        self.query_many(
            &format!(
                "SELECT {RECORD_COLUMNS} FROM records
                 WHERE parent_natural_id = ?1
                 ORDER BY natural_id ASC;"
            ),
            [parent_natural_id],
        )
    }

    fn list_records(&self) -> RepoResult<Vec<Record>> {
        self.query_many(
            &format!("SELECT {RECORD_COLUMNS} FROM records ORDER BY natural_id ASC;"),
            [],
        )
    }

    fn insert_record(&self, record: &Record) -> RepoResult<Record> {
        record.validate()?;
        let children = encode_children(&record.children)?;

        let inserted = self.query_one(
            &format!(
                "INSERT INTO records (
                    natural_id,
                    parent_natural_id,
                    value,
                    children,
                    version
                ) VALUES (?1, ?2, ?3, ?4, 1)
                RETURNING {RECORD_COLUMNS};"
            ),
            params![
                record.natural_id.as_str(),
                record.parent_natural_id.as_deref(),
                record.value.as_deref(),
                children,
            ],
        );

        match inserted {
            Ok(Some(stored)) => Ok(stored),
            Ok(None) => Err(RepoError::InvalidData(format!(
                "insert of `{}` returned no row",
                record.natural_id
            ))),
            Err(RepoError::Db(DbError::Sqlite(err))) if is_unique_violation(&err) => {
                // Lost a create race: another writer owns this natural id now.
                let actual = self
                    .stored_identity(&record.natural_id)?
                    .map_or(0, |(_, version)| version);
                Err(RepoError::VersionConflict {
                    natural_id: record.natural_id.clone(),
                    expected: 0,
                    actual,
                })
            }
            Err(err) => Err(err),
        }
    }

    fn update_record_if_version(
        &self,
        record: &Record,
        expected_version: i64,
    ) -> RepoResult<Record> {
        record.validate()?;
        let Some(id) = record.id else {
            return Err(RepoError::NotFound(record.natural_id.clone()));
        };
        let children = encode_children(&record.children)?;

        let updated = self.query_one(
            &format!(
                "UPDATE records
                 SET
                    parent_natural_id = ?1,
                    value = ?2,
                    children = ?3,
                    version = version + 1,
                    updated_at = CAST(unixepoch('subsec') * 1000 AS INTEGER)
                 WHERE id = ?4
                   AND natural_id = ?5
                   AND version = ?6
                 RETURNING {RECORD_COLUMNS};"
            ),
            params![
                record.parent_natural_id.as_deref(),
                record.value.as_deref(),
                children,
                id,
                record.natural_id.as_str(),
                expected_version,
            ],
        )?;

        if let Some(stored) = updated {
            return Ok(stored);
        }

        // A row under the same natural id but another surrogate id is a
        // re-created record; the one this write targeted is gone.
        match self.stored_identity(&record.natural_id)? {
            Some((stored_id, actual)) if stored_id == id => Err(RepoError::VersionConflict {
                natural_id: record.natural_id.clone(),
                expected: expected_version,
                actual,
            }),
            _ => Err(RepoError::NotFound(record.natural_id.clone())),
        }
    }

    fn delete_by_natural_id(&self, natural_id: &str) -> RepoResult<()> {
        let changed = self
            .conn
            .execute("DELETE FROM records WHERE natural_id = ?1;", [natural_id])?;

        if changed == 0 {
            return Err(RepoError::NotFound(natural_id.to_string()));
        }

        Ok(())
    }
}

fn parse_record_row(row: &Row<'_>) -> RepoResult<Record> {
    let natural_id: String = row.get("natural_id")?;

    let children_text: String = row.get("children")?;
    let children: BTreeSet<String> = serde_json::from_str(&children_text).map_err(|err| {
        RepoError::InvalidData(format!(
            "invalid children value in records.children for `{natural_id}`: {err}"
        ))
    })?;

    let version: i64 = row.get("version")?;
    if version < 1 {
        return Err(RepoError::InvalidData(format!(
            "invalid version `{version}` in records.version for `{natural_id}`"
        )));
    }

    let record = Record {
        id: Some(row.get("id")?),
        natural_id,
        parent_natural_id: row.get("parent_natural_id")?,
        value: row.get("value")?,
        children,
        version,
    };
    record
        .validate()
        .map_err(|err| RepoError::InvalidData(err.to_string()))?;
    Ok(record)
}

fn encode_children(children: &BTreeSet<String>) -> RepoResult<String> {
    serde_json::to_string(children)
        .map_err(|err| RepoError::InvalidData(format!("cannot encode children: {err}")))
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

fn ensure_record_connection_ready(conn: &Connection) -> RepoResult<()> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(RepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    if !table_exists(conn, "records")? {
        return Err(RepoError::MissingRequiredTable("records"));
    }

    for column in [
        "id",
        "natural_id",
        "parent_natural_id",
        "value",
        "children",
        "version",
        "created_at",
        "updated_at",
    ] {
        if !table_has_column(conn, "records", column)? {
            return Err(RepoError::MissingRequiredColumn {
                table: "records",
                column,
            });
        }
    }

    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> RepoResult<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table});"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let current: String = row.get(1)?;
        if current == column {
            return Ok(true);
        }
    }
    Ok(false)
}
