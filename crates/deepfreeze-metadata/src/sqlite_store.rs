use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use deepfreeze_core::{
    CoreError, CoreResult, DocType, RecordVersion, StatusRecord, StatusStore, Versioned,
};
use serde_json::{Map, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{query, Row, SqlitePool};
use tracing::{debug, warn};

use crate::util::store_error;

/// Rows fetched per page when listing.
const LIST_PAGE_SIZE: i64 = 1000;

/// Attempts made by `update` before giving up on a contested record.
const MAX_UPDATE_ATTEMPTS: usize = 3;

/// Status store backed by a local SQLite database.
///
/// Each record is one row holding its JSON document and a sequence number
/// that advances on every write.
pub struct SqliteStatusStore {
    pool: SqlitePool,
}

impl SqliteStatusStore {
    /// Create new store over a migrated pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn now() -> String {
        Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    fn encode(record: &StatusRecord) -> CoreResult<String> {
        serde_json::to_string(&record.to_document()?)
            .map_err(|e| CoreError::SerializationError(e.to_string()))
    }

    fn decode(id: &str, body: &str) -> CoreResult<StatusRecord> {
        let document: Value = serde_json::from_str(body).map_err(|e| {
            CoreError::DeserializationError(format!("document `{id}` is not valid JSON: {e}"))
        })?;
        StatusRecord::from_document(id, document)
    }

    fn version_of(row: &SqliteRow) -> CoreResult<RecordVersion> {
        let seq_no: i64 = row.try_get("seq_no").map_err(store_error)?;
        let primary_term: i64 = row.try_get("primary_term").map_err(store_error)?;
        Ok(RecordVersion {
            seq_no: u64::try_from(seq_no)
                .map_err(|_| CoreError::internal(format!("negative seq_no {seq_no}")))?,
            primary_term: u64::try_from(primary_term)
                .map_err(|_| CoreError::internal(format!("negative primary_term {primary_term}")))?,
        })
    }

    fn to_i64(value: u64) -> CoreResult<i64> {
        i64::try_from(value).map_err(|_| CoreError::internal(format!("version {value} overflows")))
    }

    async fn conditional_write(
        &self,
        id: &str,
        doctype: DocType,
        body: &str,
        expected: RecordVersion,
    ) -> CoreResult<bool> {
        let result = query(
            r#"
            UPDATE status_records
            SET doctype = ?1, body = ?2, seq_no = seq_no + 1, updated_at = ?3
            WHERE id = ?4 AND seq_no = ?5 AND primary_term = ?6
            "#,
        )
        .bind(doctype.as_str())
        .bind(body)
        .bind(Self::now())
        .bind(id)
        .bind(Self::to_i64(expected.seq_no)?)
        .bind(Self::to_i64(expected.primary_term)?)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl StatusStore for SqliteStatusStore {
    async fn save(&self, record: &StatusRecord) -> CoreResult<RecordVersion> {
        let id = record.id();
        let body = Self::encode(record)?;
        let now = Self::now();

        let row = query(
            r#"
            INSERT INTO status_records (id, doctype, body, seq_no, primary_term, created_at, updated_at)
            VALUES (?1, ?2, ?3, 0, 1, ?4, ?4)
            ON CONFLICT(id) DO UPDATE SET
                doctype = excluded.doctype,
                body = excluded.body,
                seq_no = status_records.seq_no + 1,
                updated_at = excluded.updated_at
            RETURNING seq_no, primary_term
            "#,
        )
        .bind(&id)
        .bind(record.doctype().as_str())
        .bind(&body)
        .bind(&now)
        .fetch_one(&self.pool)
        .await
        .map_err(store_error)?;

        let version = Self::version_of(&row)?;
        debug!(id = %id, doctype = %record.doctype(), seq_no = version.seq_no, "Saved record");
        Ok(version)
    }

    async fn save_if_version(
        &self,
        record: &StatusRecord,
        expected: RecordVersion,
    ) -> CoreResult<RecordVersion> {
        let id = record.id();
        let body = Self::encode(record)?;

        if self
            .conditional_write(&id, record.doctype(), &body, expected)
            .await?
        {
            return Ok(expected.next());
        }

        // Distinguish a lost race from a missing record.
        match self.get(&id).await {
            Ok(_) => Err(CoreError::conflict(id)),
            Err(e) => Err(e),
        }
    }

    async fn get(&self, id: &str) -> CoreResult<Versioned<StatusRecord>> {
        let row = query(
            r#"
            SELECT id, body, seq_no, primary_term
            FROM status_records
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?
        .ok_or_else(|| CoreError::not_found("record", id))?;

        let body: String = row.try_get("body").map_err(store_error)?;
        Ok(Versioned {
            record: Self::decode(id, &body)?,
            version: Self::version_of(&row)?,
        })
    }

    async fn update(&self, id: &str, fields: &Map<String, Value>) -> CoreResult<StatusRecord> {
        for attempt in 1..=MAX_UPDATE_ATTEMPTS {
            let current = self.get(id).await?;
            let merged = current.record.merged(fields)?;
            let body = Self::encode(&merged)?;

            if self
                .conditional_write(id, merged.doctype(), &body, current.version)
                .await?
            {
                return Ok(merged);
            }

            warn!(id = %id, attempt, "Concurrent modification during update, retrying");
        }

        Err(CoreError::conflict(id))
    }

    async fn list(&self, doctype: DocType) -> CoreResult<Vec<StatusRecord>> {
        let mut records = Vec::new();
        let mut after = String::new();

        loop {
            let rows = query(
                r#"
                SELECT id, body
                FROM status_records
                WHERE doctype = ?1 AND id > ?2
                ORDER BY id
                LIMIT ?3
                "#,
            )
            .bind(doctype.as_str())
            .bind(&after)
            .bind(LIST_PAGE_SIZE)
            .fetch_all(&self.pool)
            .await
            .map_err(store_error)?;

            let page_len = rows.len();
            for row in rows {
                let id: String = row.try_get("id").map_err(store_error)?;
                let body: String = row.try_get("body").map_err(store_error)?;
                records.push(Self::decode(&id, &body)?);
                after = id;
            }

            if (page_len as i64) < LIST_PAGE_SIZE {
                break;
            }
        }

        Ok(records)
    }
}
