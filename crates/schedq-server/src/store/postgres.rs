use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use schedq_core::{EntryId, EntryStatus, NewEntry, QueueEntry, QueueError, QueueStore};
use serde_json::Value;
use sqlx::{PgPool, Row};

#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn db_err(e: sqlx::Error) -> QueueError {
    QueueError::Store(e.to_string())
}

fn parse_status(s: &str) -> Result<EntryStatus, QueueError> {
    match s {
        "waiting" => Ok(EntryStatus::Waiting),
        "progress" => Ok(EntryStatus::Progress),
        "error" => Ok(EntryStatus::Error),
        other => Err(QueueError::Store(format!("unknown entry status: {other}"))),
    }
}

fn row_to_entry(row: &sqlx::postgres::PgRow) -> Result<QueueEntry, QueueError> {
    let status: String = row.try_get("status").map_err(db_err)?;

    Ok(QueueEntry {
        id: row.try_get::<i64, _>("id").map_err(db_err)?,
        queue: row.try_get::<String, _>("queue").map_err(db_err)?,
        payload: row.try_get::<Value, _>("payload").map_err(db_err)?,
        status: parse_status(&status)?,
        priority: row.try_get::<i32, _>("priority").map_err(db_err)?,
        date_scheduled: row
            .try_get::<Option<DateTime<Utc>>, _>("date_scheduled")
            .map_err(db_err)?,
        num_schedules: row.try_get::<i32, _>("num_schedules").map_err(db_err)?,
        description: row
            .try_get::<Option<String>, _>("description")
            .map_err(db_err)?,
        created_at: row
            .try_get::<DateTime<Utc>, _>("created_at")
            .map_err(db_err)?,
        updated_at: row
            .try_get::<DateTime<Utc>, _>("updated_at")
            .map_err(db_err)?,
    })
}

#[async_trait::async_trait]
impl QueueStore for PostgresStore {
    async fn create(&self, entry: NewEntry) -> Result<QueueEntry, QueueError> {
        let row = sqlx::query(
            r#"
            INSERT INTO queue_entries (queue, payload, status, priority, date_scheduled, num_schedules)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, queue, payload, status, priority, date_scheduled, num_schedules, description, created_at, updated_at
            "#,
        )
        .bind(entry.queue)
        .bind(entry.payload)
        .bind(entry.status.as_str())
        .bind(entry.priority)
        .bind(entry.date_scheduled)
        .bind(entry.num_schedules)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        row_to_entry(&row)
    }

    async fn get(&self, id: EntryId) -> Result<Option<QueueEntry>, QueueError> {
        let row = sqlx::query(
            r#"
            SELECT id, queue, payload, status, priority, date_scheduled,
                   num_schedules, description, created_at, updated_at
            FROM queue_entries
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(row_to_entry).transpose()
    }

    async fn save(&self, entry: &QueueEntry) -> Result<(), QueueError> {
        let affected = sqlx::query(
            r#"
            UPDATE queue_entries
            SET status = $2,
                date_scheduled = $3,
                num_schedules = $4,
                description = $5,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(entry.id)
        .bind(entry.status.as_str())
        .bind(entry.date_scheduled)
        .bind(entry.num_schedules)
        .bind(entry.description.as_deref())
        .execute(&self.pool)
        .await
        .map_err(db_err)?
        .rows_affected();

        if affected == 0 {
            return Err(QueueError::NotFound(entry.id));
        }
        Ok(())
    }

    async fn delete(&self, id: EntryId) -> Result<bool, QueueError> {
        let affected = sqlx::query("DELETE FROM queue_entries WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?
            .rows_affected();

        Ok(affected > 0)
    }

    async fn claim_next(
        &self,
        queue: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<QueueEntry>, QueueError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        // SKIP LOCKED keeps concurrent workers from blocking on, or
        // double-claiming, the same row.
        let row = sqlx::query(
            r#"
            WITH next AS (
              SELECT id
              FROM queue_entries
              WHERE queue = $1
                AND status = 'waiting'
                AND (date_scheduled IS NULL OR date_scheduled <= $2)
              ORDER BY priority ASC, id ASC
              FOR UPDATE SKIP LOCKED
              LIMIT 1
            )
            UPDATE queue_entries e
            SET status = 'progress',
                updated_at = now()
            FROM next
            WHERE e.id = next.id
            RETURNING
              e.id, e.queue, e.payload, e.status, e.priority, e.date_scheduled,
              e.num_schedules, e.description, e.created_at, e.updated_at
            "#,
        )
        .bind(queue)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;

        row.as_ref().map(row_to_entry).transpose()
    }

    async fn entries_for_queue(&self, queue: &str) -> Result<Vec<QueueEntry>, QueueError> {
        let rows = sqlx::query(
            r#"
            SELECT id, queue, payload, status, priority, date_scheduled,
                   num_schedules, description, created_at, updated_at
            FROM queue_entries
            WHERE queue = $1
            ORDER BY id ASC
            "#,
        )
        .bind(queue)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(row_to_entry).collect()
    }

    async fn eligible_counts(
        &self,
        now: DateTime<Utc>,
    ) -> Result<BTreeMap<String, i64>, QueueError> {
        let rows = sqlx::query(
            r#"
            SELECT queue, COUNT(*) AS n
            FROM queue_entries
            WHERE status = 'waiting'
              AND (date_scheduled IS NULL OR date_scheduled <= $1)
            GROUP BY queue
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut counts = BTreeMap::new();
        for row in rows {
            let queue: String = row.try_get("queue").map_err(db_err)?;
            let n: i64 = row.try_get("n").map_err(db_err)?;
            counts.insert(queue, n);
        }
        Ok(counts)
    }

    async fn count_eligible(
        &self,
        queue: &str,
        now: DateTime<Utc>,
        below: Option<EntryId>,
    ) -> Result<i64, QueueError> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS n
            FROM queue_entries
            WHERE queue = $1
              AND status = 'waiting'
              AND (date_scheduled IS NULL OR date_scheduled <= $2)
              AND ($3::bigint IS NULL OR id < $3)
            "#,
        )
        .bind(queue)
        .bind(now)
        .bind(below)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        row.try_get("n").map_err(db_err)
    }
}
