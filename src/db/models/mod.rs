//! Database models split into separate files.
//! Re-exported so callers can `use crate::db::models::*;`.

pub mod appointment;
pub mod notification;

pub use self::appointment::*;
pub use self::notification::*;
