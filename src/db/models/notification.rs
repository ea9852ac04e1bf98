use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Kinds of notification a department view can receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    NewAppointment,
    AppointmentCancelled,
    Info,
    ContactMessage,
    AdminRegistration,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::NewAppointment => "new_appointment",
            NotificationKind::AppointmentCancelled => "appointment_cancelled",
            NotificationKind::Info => "info",
            NotificationKind::ContactMessage => "contact_message",
            NotificationKind::AdminRegistration => "admin_registration",
        }
    }

    /// Resolve the kind of a stored record. Registration requests are tagged
    /// through `purpose` rather than `kind`; anything unrecognised is `Info`.
    pub fn resolve(kind: Option<&str>, purpose: Option<&str>) -> Self {
        match kind.map(str::trim) {
            Some("new_appointment") => NotificationKind::NewAppointment,
            Some("appointment_cancelled") => NotificationKind::AppointmentCancelled,
            Some("contact_message") => NotificationKind::ContactMessage,
            Some("admin_registration") => NotificationKind::AdminRegistration,
            Some("info") => NotificationKind::Info,
            _ if purpose.map(str::trim) == Some("admin_registration") => {
                NotificationKind::AdminRegistration
            }
            _ => NotificationKind::Info,
        }
    }
}

/// A notification row exactly as stored. Every column is optional because
/// writers outside this service do not always fill them in.
#[derive(Debug, Clone, Default, FromRow)]
pub struct RawNotification {
    pub id: String,
    pub kind: Option<String>,
    pub purpose: Option<String>,
    pub message: Option<String>,
    pub subject_name: Option<String>,
    pub occurs_on: Option<String>,
    pub slot_time: Option<String>,
    pub scope: Option<String>,
    pub read: Option<bool>,
    pub created_at: Option<String>,
}

/// A normalized notification record, as held by department views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub kind: NotificationKind,
    pub message: String,
    pub subject_name: String,
    pub occurs_on: Option<String>,
    pub slot_time: Option<String>,
    /// `None` when the stored timestamp is missing or unparseable.
    pub created_at: Option<DateTime<Utc>>,
    pub read: bool,
    pub scope: Option<String>,
}

impl Notification {
    /// Sort key for newest-first ordering. Records without a usable
    /// timestamp count as the epoch.
    pub fn sort_millis(&self) -> i64 {
        self.created_at.map(|t| t.timestamp_millis()).unwrap_or(0)
    }
}

impl From<RawNotification> for Notification {
    fn from(raw: RawNotification) -> Self {
        Notification {
            kind: NotificationKind::resolve(raw.kind.as_deref(), raw.purpose.as_deref()),
            message: raw.message.unwrap_or_default(),
            subject_name: raw.subject_name.unwrap_or_default(),
            occurs_on: raw.occurs_on.filter(|s| !s.trim().is_empty()),
            slot_time: raw.slot_time.filter(|s| !s.trim().is_empty()),
            created_at: raw.created_at.as_deref().and_then(parse_timestamp),
            read: raw.read.unwrap_or(false),
            scope: raw.scope.filter(|s| !s.trim().is_empty()),
            id: raw.id,
        }
    }
}

/// Accepts RFC 3339, SQLite's `CURRENT_TIMESTAMP` format and epoch millis.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    value
        .parse::<i64>()
        .ok()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
}

/// Which notifications a view subscribes to: one department/purpose tag, or
/// everything (the SuperAdmin view).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeFilter {
    All,
    Scope(String),
}

impl ScopeFilter {
    /// `"all"`, `"*"` and the empty string match everything.
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        if value.is_empty() || value == "*" || value.eq_ignore_ascii_case("all") {
            ScopeFilter::All
        } else {
            ScopeFilter::Scope(value.to_string())
        }
    }

    pub fn as_scope(&self) -> Option<&str> {
        match self {
            ScopeFilter::All => None,
            ScopeFilter::Scope(s) => Some(s.as_str()),
        }
    }

    pub fn matches(&self, notification: &Notification) -> bool {
        self.matches_scope(notification.scope.as_deref())
    }

    pub fn matches_scope(&self, scope: Option<&str>) -> bool {
        match self {
            ScopeFilter::All => true,
            ScopeFilter::Scope(s) => scope == Some(s.as_str()),
        }
    }
}

impl std::fmt::Display for ScopeFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScopeFilter::All => f.write_str("all"),
            ScopeFilter::Scope(s) => f.write_str(s),
        }
    }
}

/// Data a writer supplies to create a notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateNotification {
    pub kind: NotificationKind,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub subject_name: String,
    pub occurs_on: Option<String>,
    pub slot_time: Option<String>,
    pub scope: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_are_defaulted() {
        let n = Notification::from(RawNotification {
            id: "n1".into(),
            ..Default::default()
        });
        assert_eq!(n.kind, NotificationKind::Info);
        assert_eq!(n.message, "");
        assert_eq!(n.subject_name, "");
        assert!(!n.read);
        assert!(n.created_at.is_none());
        assert_eq!(n.sort_millis(), 0);
    }

    #[test]
    fn purpose_marks_admin_registration() {
        assert_eq!(
            NotificationKind::resolve(None, Some("admin_registration")),
            NotificationKind::AdminRegistration
        );
        assert_eq!(
            NotificationKind::resolve(Some("new_appointment"), Some("admin_registration")),
            NotificationKind::NewAppointment
        );
        assert_eq!(
            NotificationKind::resolve(Some("bogus"), None),
            NotificationKind::Info
        );
    }

    #[test]
    fn timestamps_in_several_shapes() {
        let rfc = parse_timestamp("2026-03-01T10:00:00Z").unwrap();
        let sqlite = parse_timestamp("2026-03-01 10:00:00").unwrap();
        let millis = parse_timestamp(&rfc.timestamp_millis().to_string()).unwrap();
        assert_eq!(rfc, sqlite);
        assert_eq!(rfc, millis);
        assert!(parse_timestamp("next tuesday").is_none());
        assert!(parse_timestamp("  ").is_none());
    }

    #[test]
    fn scope_filter_parsing_and_matching() {
        assert_eq!(ScopeFilter::parse("all"), ScopeFilter::All);
        assert_eq!(ScopeFilter::parse(" * "), ScopeFilter::All);
        assert_eq!(
            ScopeFilter::parse("dental"),
            ScopeFilter::Scope("dental".into())
        );

        let n = Notification::from(RawNotification {
            id: "n3".into(),
            scope: Some("radiology".into()),
            ..Default::default()
        });
        assert!(ScopeFilter::All.matches(&n));
        assert!(ScopeFilter::parse("radiology").matches(&n));
        assert!(!ScopeFilter::parse("dental").matches(&n));
    }

    #[test]
    fn blank_scope_is_none() {
        let n = Notification::from(RawNotification {
            id: "n2".into(),
            scope: Some("  ".into()),
            read: Some(true),
            ..Default::default()
        });
        assert!(n.scope.is_none());
        assert!(n.read);
    }
}
