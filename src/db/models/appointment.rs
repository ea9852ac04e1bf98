use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Appointment status. The only transition this service performs is
/// `Approved -> Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AppointmentStatus {
    Pending,
    Approved,
    Completed,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "Pending",
            AppointmentStatus::Approved => "Approved",
            AppointmentStatus::Completed => "Completed",
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Appointment {
    pub id: String,
    pub department: String,
    pub patient_name: String,
    pub appointment_date: String,
    pub slot_time: String,
    /// Stored as text; see `AppointmentStatus`.
    pub status: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAppointment {
    pub department: String,
    pub patient_name: String,
    pub appointment_date: String,
    pub slot_time: String,
    pub status: Option<AppointmentStatus>,
}
