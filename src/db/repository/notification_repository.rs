use std::collections::HashMap;

use chrono::{SecondsFormat, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::*;
use crate::error::{AppError, AppResult};

const COLUMNS: &str =
    "id, kind, purpose, message, subject_name, occurs_on, slot_time, scope, read, created_at";

// ============================================================================
// Notification Repository
// ============================================================================

pub struct NotificationRepository;

impl NotificationRepository {
    pub async fn create(
        pool: &SqlitePool,
        notification: CreateNotification,
    ) -> AppResult<Notification> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let purpose = match notification.kind {
            NotificationKind::AdminRegistration => Some("admin_registration"),
            _ => None,
        };

        let row = sqlx::query_as::<_, RawNotification>(&format!(
            r#"
            INSERT INTO notifications (
                id, kind, purpose, message, subject_name,
                occurs_on, slot_time, scope, read, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, ?)
            RETURNING {COLUMNS}
            "#
        ))
        .bind(id)
        .bind(notification.kind.as_str())
        .bind(purpose)
        .bind(notification.message)
        .bind(notification.subject_name)
        .bind(notification.occurs_on)
        .bind(notification.slot_time)
        .bind(notification.scope)
        .bind(now)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row.into())
    }

    /// Store a row verbatim, the way writers outside this service do.
    #[cfg(test)]
    pub async fn insert_raw(pool: &SqlitePool, raw: &RawNotification) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO notifications (
                id, kind, purpose, message, subject_name,
                occurs_on, slot_time, scope, read, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&raw.id)
        .bind(&raw.kind)
        .bind(&raw.purpose)
        .bind(&raw.message)
        .bind(&raw.subject_name)
        .bind(&raw.occurs_on)
        .bind(&raw.slot_time)
        .bind(&raw.scope)
        .bind(raw.read)
        .bind(&raw.created_at)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(())
    }

    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> AppResult<Option<Notification>> {
        let row = sqlx::query_as::<_, RawNotification>(&format!(
            "SELECT {COLUMNS} FROM notifications WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row.map(Notification::from))
    }

    /// All notifications matching `filter`, newest first as far as the stored
    /// text allows. Callers that need an exact order sort after normalizing.
    pub async fn find_by_filter(
        pool: &SqlitePool,
        filter: &ScopeFilter,
    ) -> AppResult<Vec<Notification>> {
        let scope = filter.as_scope();
        let rows = sqlx::query_as::<_, RawNotification>(&format!(
            r#"
            SELECT {COLUMNS}
            FROM notifications
            WHERE (? IS NULL OR scope = ?)
            ORDER BY created_at DESC
            "#
        ))
        .bind(scope)
        .bind(scope)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(rows.into_iter().map(Notification::from).collect())
    }

    /// Set `read = 1` on one notification. Returns the updated record, or
    /// `None` when no such notification exists.
    pub async fn mark_read(pool: &SqlitePool, id: &str) -> AppResult<Option<Notification>> {
        let row = sqlx::query_as::<_, RawNotification>(&format!(
            "UPDATE notifications SET read = 1 WHERE id = ? RETURNING {COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row.map(Notification::from))
    }

    /// Set `read = 1` on every id inside a single transaction. Any missing id
    /// aborts the whole batch and nothing is written.
    pub async fn mark_read_batch(pool: &SqlitePool, ids: &[String]) -> AppResult<Vec<Notification>> {
        let mut tx = pool.begin().await.map_err(AppError::Database)?;
        let mut updated = Vec::with_capacity(ids.len());

        for id in ids {
            let row = sqlx::query_as::<_, RawNotification>(&format!(
                "UPDATE notifications SET read = 1 WHERE id = ? RETURNING {COLUMNS}"
            ))
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(AppError::Database)?;

            match row {
                Some(row) => updated.push(Notification::from(row)),
                // Dropping `tx` rolls back the updates made so far.
                None => return Err(AppError::NotFound(format!("Notification {} not found", id))),
            }
        }

        tx.commit().await.map_err(AppError::Database)?;
        Ok(updated)
    }

    /// Returns the removed record, or `None` when it was already gone.
    pub async fn delete(pool: &SqlitePool, id: &str) -> AppResult<Option<Notification>> {
        let row = sqlx::query_as::<_, RawNotification>(&format!(
            "DELETE FROM notifications WHERE id = ? RETURNING {COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row.map(Notification::from))
    }

    /// Delete every id inside a single transaction. Ids that are already gone
    /// are skipped; the returned list holds the records actually removed.
    pub async fn delete_batch(pool: &SqlitePool, ids: &[String]) -> AppResult<Vec<Notification>> {
        let mut tx = pool.begin().await.map_err(AppError::Database)?;
        let mut removed = Vec::with_capacity(ids.len());

        for id in ids {
            let row = sqlx::query_as::<_, RawNotification>(&format!(
                "DELETE FROM notifications WHERE id = ? RETURNING {COLUMNS}"
            ))
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(AppError::Database)?;
            if let Some(row) = row {
                removed.push(Notification::from(row));
            }
        }

        tx.commit().await.map_err(AppError::Database)?;
        Ok(removed)
    }

    /// Counts for a scope: `(total, unread)`.
    pub async fn count_by_filter(pool: &SqlitePool, filter: &ScopeFilter) -> AppResult<(i64, i64)> {
        let scope = filter.as_scope();
        let (total, unread): (i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*),
                COALESCE(SUM(CASE WHEN COALESCE(read, 0) = 0 THEN 1 ELSE 0 END), 0)
            FROM notifications
            WHERE (? IS NULL OR scope = ?)
            "#,
        )
        .bind(scope)
        .bind(scope)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)?;

        Ok((total, unread))
    }

    /// Counts grouped by resolved notification kind.
    pub async fn counts_by_kind(
        pool: &SqlitePool,
        filter: &ScopeFilter,
    ) -> AppResult<HashMap<String, i64>> {
        let scope = filter.as_scope();
        let rows: Vec<(Option<String>, Option<String>, i64)> = sqlx::query_as(
            r#"
            SELECT kind, purpose, COUNT(*)
            FROM notifications
            WHERE (? IS NULL OR scope = ?)
            GROUP BY kind, purpose
            "#,
        )
        .bind(scope)
        .bind(scope)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)?;

        // Several raw (kind, purpose) pairs can resolve to the same kind.
        let mut map = HashMap::new();
        for (kind, purpose, count) in rows {
            let kind = NotificationKind::resolve(kind.as_deref(), purpose.as_deref());
            *map.entry(kind.as_str().to_string()).or_insert(0) += count;
        }

        Ok(map)
    }
}
