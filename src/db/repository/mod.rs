pub mod appointment_repository;
pub mod notification_repository;

pub use appointment_repository::AppointmentRepository;
pub use notification_repository::NotificationRepository;
