use std::collections::HashMap;

use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::{Appointment, AppointmentStatus, CreateAppointment};
use crate::error::{AppError, AppResult};

pub struct AppointmentRepository;

impl AppointmentRepository {
    pub async fn create(pool: &SqlitePool, appointment: CreateAppointment) -> AppResult<Appointment> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().naive_utc();
        let status = appointment.status.unwrap_or(AppointmentStatus::Pending);

        sqlx::query_as::<_, Appointment>(
            r#"
            INSERT INTO appointments (
                id, department, patient_name, appointment_date, slot_time, status, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING id, department, patient_name, appointment_date, slot_time, status, created_at
            "#,
        )
        .bind(id)
        .bind(appointment.department)
        .bind(appointment.patient_name)
        .bind(appointment.appointment_date)
        .bind(appointment.slot_time)
        .bind(status.as_str())
        .bind(now)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> AppResult<Option<Appointment>> {
        sqlx::query_as::<_, Appointment>(
            r#"
            SELECT id, department, patient_name, appointment_date, slot_time, status, created_at
            FROM appointments
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Move an appointment from `from` to `to`. The status check is part of the
    /// UPDATE so a concurrent transition cannot be overwritten; `None` means the
    /// appointment is missing or no longer in `from`.
    pub async fn transition_status(
        pool: &SqlitePool,
        id: &str,
        from: AppointmentStatus,
        to: AppointmentStatus,
    ) -> AppResult<Option<Appointment>> {
        sqlx::query_as::<_, Appointment>(
            r#"
            UPDATE appointments
            SET status = ?
            WHERE id = ? AND status = ?
            RETURNING id, department, patient_name, appointment_date, slot_time, status, created_at
            "#,
        )
        .bind(to.as_str())
        .bind(id)
        .bind(from.as_str())
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Remove an appointment, returning the deleted row.
    pub async fn delete(pool: &SqlitePool, id: &str) -> AppResult<Option<Appointment>> {
        sqlx::query_as::<_, Appointment>(
            r#"
            DELETE FROM appointments
            WHERE id = ?
            RETURNING id, department, patient_name, appointment_date, slot_time, status, created_at
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Status tallies, optionally restricted to one department.
    pub async fn counts_by_status(
        pool: &SqlitePool,
        department: Option<&str>,
    ) -> AppResult<HashMap<String, i64>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT status, COUNT(*)
            FROM appointments
            WHERE (? IS NULL OR department = ?)
            GROUP BY status
            "#,
        )
        .bind(department)
        .bind(department)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(rows.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::init::memory_pool;

    fn new_appointment(department: &str, status: Option<AppointmentStatus>) -> CreateAppointment {
        CreateAppointment {
            department: department.to_string(),
            patient_name: "John Doe".to_string(),
            appointment_date: "2026-04-02".to_string(),
            slot_time: "09:00".to_string(),
            status,
        }
    }

    #[tokio::test]
    async fn only_approved_transitions_to_completed() {
        let pool = memory_pool().await;
        let pending = AppointmentRepository::create(&pool, new_appointment("dental", None))
            .await
            .unwrap();
        let approved = AppointmentRepository::create(
            &pool,
            new_appointment("dental", Some(AppointmentStatus::Approved)),
        )
        .await
        .unwrap();

        let none = AppointmentRepository::transition_status(
            &pool,
            &pending.id,
            AppointmentStatus::Approved,
            AppointmentStatus::Completed,
        )
        .await
        .unwrap();
        assert!(none.is_none());

        let done = AppointmentRepository::transition_status(
            &pool,
            &approved.id,
            AppointmentStatus::Approved,
            AppointmentStatus::Completed,
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(done.status, "Completed");
    }

    #[tokio::test]
    async fn tallies_by_department() {
        let pool = memory_pool().await;
        AppointmentRepository::create(&pool, new_appointment("dental", None)).await.unwrap();
        AppointmentRepository::create(&pool, new_appointment("dental", None)).await.unwrap();
        AppointmentRepository::create(
            &pool,
            new_appointment("radiology", Some(AppointmentStatus::Approved)),
        )
        .await
        .unwrap();

        let dental = AppointmentRepository::counts_by_status(&pool, Some("dental"))
            .await
            .unwrap();
        assert_eq!(dental.get("Pending"), Some(&2));
        assert_eq!(dental.get("Approved"), None);

        let all = AppointmentRepository::counts_by_status(&pool, None).await.unwrap();
        assert_eq!(all.values().sum::<i64>(), 3);
    }
}
