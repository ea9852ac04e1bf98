//! Appointment bookings and the notifications they produce.

use chrono::NaiveDate;
use sqlx::SqlitePool;

use crate::db::{
    Appointment, AppointmentRepository, AppointmentStatus, CreateAppointment, CreateNotification,
    NotificationKind,
};
use crate::error::{AppError, AppResult};
use crate::services::store::NotificationStore;

pub struct AppointmentService<'a> {
    pool: &'a SqlitePool,
    store: &'a dyn NotificationStore,
}

impl<'a> AppointmentService<'a> {
    pub fn new(pool: &'a SqlitePool, store: &'a dyn NotificationStore) -> Self {
        Self { pool, store }
    }

    /// Book an appointment and tell the department about it.
    pub async fn book(&self, appointment: CreateAppointment) -> AppResult<Appointment> {
        validate(&appointment)?;
        if appointment.status == Some(AppointmentStatus::Completed) {
            return Err(AppError::Validation(
                "New appointments must be Pending or Approved".to_string(),
            ));
        }

        let created = AppointmentRepository::create(self.pool, appointment).await?;
        tracing::info!(
            "Booked appointment {} in {} ({})",
            created.id,
            created.department,
            created.status
        );

        self.notify(
            NotificationKind::NewAppointment,
            &created,
            format!(
                "New appointment for {} on {} at {}",
                created.patient_name, created.appointment_date, created.slot_time
            ),
        )
        .await;

        Ok(created)
    }

    /// `Approved -> Completed`. Any other current status is a conflict.
    pub async fn complete(&self, id: &str) -> AppResult<Appointment> {
        if let Some(done) = AppointmentRepository::transition_status(
            self.pool,
            id,
            AppointmentStatus::Approved,
            AppointmentStatus::Completed,
        )
        .await?
        {
            tracing::info!("Completed appointment {}", id);
            return Ok(done);
        }

        match AppointmentRepository::find_by_id(self.pool, id).await? {
            Some(existing) => Err(AppError::Conflict(format!(
                "Appointment {} is {}, only Approved appointments can be completed",
                id, existing.status
            ))),
            None => Err(AppError::NotFound(format!("Appointment {} not found", id))),
        }
    }

    /// Remove an appointment and tell the department it was cancelled.
    pub async fn cancel(&self, id: &str) -> AppResult<Appointment> {
        let removed = AppointmentRepository::delete(self.pool, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Appointment {} not found", id)))?;
        tracing::info!("Cancelled appointment {} in {}", removed.id, removed.department);

        self.notify(
            NotificationKind::AppointmentCancelled,
            &removed,
            format!(
                "Appointment for {} on {} at {} was cancelled",
                removed.patient_name, removed.appointment_date, removed.slot_time
            ),
        )
        .await;

        Ok(removed)
    }

    /// The booking itself already succeeded, so a failed notification is
    /// logged rather than returned.
    async fn notify(&self, kind: NotificationKind, appointment: &Appointment, message: String) {
        let notification = CreateNotification {
            kind,
            message,
            subject_name: appointment.patient_name.clone(),
            occurs_on: Some(appointment.appointment_date.clone()),
            slot_time: Some(appointment.slot_time.clone()),
            scope: Some(appointment.department.clone()),
        };
        if let Err(e) = self.store.create(notification).await {
            tracing::warn!(
                "Failed to write {} notification for appointment {}: {}",
                kind.as_str(),
                appointment.id,
                e
            );
        }
    }
}

fn validate(appointment: &CreateAppointment) -> AppResult<()> {
    if appointment.department.trim().is_empty() {
        return Err(AppError::Validation("department is required".to_string()));
    }
    if appointment.patient_name.trim().is_empty() {
        return Err(AppError::Validation("patient_name is required".to_string()));
    }
    if NaiveDate::parse_from_str(&appointment.appointment_date, "%Y-%m-%d").is_err() {
        return Err(AppError::Validation(format!(
            "appointment_date must be YYYY-MM-DD, got {:?}",
            appointment.appointment_date
        )));
    }
    if appointment.slot_time.trim().is_empty() {
        return Err(AppError::Validation("slot_time is required".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ScopeFilter;
    use crate::services::init::memory_pool;
    use crate::services::store::SqliteNotificationStore;

    fn booking(department: &str, status: Option<AppointmentStatus>) -> CreateAppointment {
        CreateAppointment {
            department: department.to_string(),
            patient_name: "Grace Hopper".to_string(),
            appointment_date: "2026-11-03".to_string(),
            slot_time: "14:30".to_string(),
            status,
        }
    }

    #[tokio::test]
    async fn booking_notifies_the_department() {
        let pool = memory_pool().await;
        let store = SqliteNotificationStore::new(pool.clone(), 16);
        let service = AppointmentService::new(&pool, &store);

        let created = service.book(booking("cardiology", None)).await.unwrap();
        assert_eq!(created.status, "Pending");

        let inbox = store.query(&ScopeFilter::parse("cardiology")).await.unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].kind, NotificationKind::NewAppointment);
        assert_eq!(inbox[0].subject_name, "Grace Hopper");
        assert_eq!(inbox[0].occurs_on.as_deref(), Some("2026-11-03"));
        assert!(!inbox[0].read);
    }

    #[tokio::test]
    async fn invalid_bookings_are_rejected() {
        let pool = memory_pool().await;
        let store = SqliteNotificationStore::new(pool.clone(), 16);
        let service = AppointmentService::new(&pool, &store);

        let mut bad_date = booking("cardiology", None);
        bad_date.appointment_date = "03/11/2026".to_string();
        assert!(matches!(
            service.book(bad_date).await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            service
                .book(booking("cardiology", Some(AppointmentStatus::Completed)))
                .await,
            Err(AppError::Validation(_))
        ));
        assert!(store.query(&ScopeFilter::All).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn only_approved_appointments_complete() {
        let pool = memory_pool().await;
        let store = SqliteNotificationStore::new(pool.clone(), 16);
        let service = AppointmentService::new(&pool, &store);

        let pending = service.book(booking("dental", None)).await.unwrap();
        let approved = service
            .book(booking("dental", Some(AppointmentStatus::Approved)))
            .await
            .unwrap();

        assert!(matches!(
            service.complete(&pending.id).await,
            Err(AppError::Conflict(_))
        ));
        let done = tokio_test::assert_ok!(service.complete(&approved.id).await);
        assert_eq!(done.status, "Completed");
        let again = tokio_test::assert_err!(service.complete(&approved.id).await);
        assert!(matches!(again, AppError::Conflict(_)));
        assert!(matches!(
            service.complete("missing").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn cancelling_removes_and_notifies() {
        let pool = memory_pool().await;
        let store = SqliteNotificationStore::new(pool.clone(), 16);
        let service = AppointmentService::new(&pool, &store);

        let created = service.book(booking("radiology", None)).await.unwrap();
        service.cancel(&created.id).await.unwrap();

        assert!(AppointmentRepository::find_by_id(&pool, &created.id)
            .await
            .unwrap()
            .is_none());
        let kinds: Vec<_> = store
            .query(&ScopeFilter::parse("radiology"))
            .await
            .unwrap()
            .into_iter()
            .map(|n| n.kind)
            .collect();
        assert!(kinds.contains(&NotificationKind::AppointmentCancelled));
        assert!(matches!(
            service.cancel(&created.id).await,
            Err(AppError::NotFound(_))
        ));
    }
}
