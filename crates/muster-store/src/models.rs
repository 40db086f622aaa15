//! Row types shared across the store modules.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use muster_core::Embedding;
use serde::{Deserialize, Serialize};

/// Staff role. Admins may authenticate by password alone; staff must follow
/// a password login with a face login.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StaffRole {
    Admin,
    Staff,
}

impl StaffRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            StaffRole::Admin => "admin",
            StaffRole::Staff => "staff",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "admin" => Some(StaffRole::Admin),
            "staff" => Some(StaffRole::Staff),
            _ => None,
        }
    }

    /// Whether the role may skip face verification after a password login.
    pub fn bypasses_face_check(&self) -> bool {
        matches!(self, StaffRole::Admin)
    }
}

/// One staff directory entry.
#[derive(Debug, Clone, Serialize)]
pub struct StaffRecord {
    pub staff_id: String,
    pub full_name: String,
    pub email: String,
    pub role: StaffRole,
    pub job_type: String,
    /// Required check-in time; lateness is only evaluated when set.
    pub check_in_time: Option<NaiveTime>,
    /// Required check-out time; overtime is only evaluated when set.
    pub check_out_time: Option<NaiveTime>,
    pub created_at: NaiveDateTime,
}

/// One staff member's enrollment: embedding, reference capture, credential.
#[derive(Debug, Clone)]
pub struct EnrollmentRecord {
    pub staff_id: String,
    pub embedding: Option<Embedding>,
    pub capture_filename: Option<String>,
    pub capture_image: Option<Vec<u8>>,
    pub password_hash: Option<String>,
    pub updated_at: NaiveDateTime,
}

/// Attendance row status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttendanceStatus {
    Late,
    Active,
    Inactive,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Late => "Late",
            AttendanceStatus::Active => "Active",
            AttendanceStatus::Inactive => "Inactive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Late" => Some(AttendanceStatus::Late),
            "Active" => Some(AttendanceStatus::Active),
            "Inactive" => Some(AttendanceStatus::Inactive),
            _ => None,
        }
    }
}

/// One attendance log row. Multiple rows per (staff, date) are expected:
/// a late check-in writes a `Late` and an `Active` row, and a check-out
/// adds an `Inactive` row alongside the backfilled `Active` one.
#[derive(Debug, Clone, Serialize)]
pub struct AttendanceRow {
    pub id: i64,
    pub staff_id: String,
    pub date: NaiveDate,
    pub check_in: Option<NaiveTime>,
    pub check_out: Option<NaiveTime>,
    pub status: AttendanceStatus,
    /// Two-decimal overtime hours; `None` means none was earned, which is
    /// distinct from an explicit 0.00 on an open session.
    pub overtime_hours: Option<f64>,
}

/// Outcome of closing an open attendance session.
#[derive(Debug, Clone, Serialize)]
pub struct ClosedSession {
    pub check_in: Option<NaiveTime>,
    pub check_out: NaiveTime,
    pub overtime_hours: Option<f64>,
}

/// Per-day attendance counts for the dashboard.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct DaySummary {
    /// Distinct staff with at least one `Active` row.
    pub present: i64,
    /// Distinct staff with at least one `Late` row.
    pub late: i64,
    /// Distinct staff with at least one `Inactive` row.
    pub checked_out: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parse_is_case_insensitive() {
        assert_eq!(StaffRole::parse("Admin"), Some(StaffRole::Admin));
        assert_eq!(StaffRole::parse("STAFF"), Some(StaffRole::Staff));
        assert_eq!(StaffRole::parse("manager"), None);
    }

    #[test]
    fn role_face_bypass() {
        assert!(StaffRole::Admin.bypasses_face_check());
        assert!(!StaffRole::Staff.bypasses_face_check());
    }

    #[test]
    fn status_round_trips_as_str() {
        for status in [
            AttendanceStatus::Late,
            AttendanceStatus::Active,
            AttendanceStatus::Inactive,
        ] {
            assert_eq!(AttendanceStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(AttendanceStatus::parse("active"), None);
    }
}
