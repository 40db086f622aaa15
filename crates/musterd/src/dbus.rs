//! D-Bus surface of the attendance daemon.
//!
//! Bus name: org.muster.Attendance1
//! Object path: /org/muster/Attendance1
//!
//! Every method returns a JSON object string carrying a `success` flag;
//! failures add a stable `error` code and a human-readable `message` so the
//! web layer can prompt a corrective action.

use serde::Serialize;
use zbus::interface;

use crate::service::{AuthFailure, Service};

pub const BUS_NAME: &str = "org.muster.Attendance1";
pub const OBJECT_PATH: &str = "/org/muster/Attendance1";

pub struct AttendanceInterface {
    service: Service,
}

impl AttendanceInterface {
    pub fn new(service: Service) -> Self {
        Self { service }
    }
}

fn respond<T: Serialize>(result: Result<T, AuthFailure>) -> String {
    let value = match result {
        Ok(payload) => match serde_json::to_value(payload) {
            Ok(serde_json::Value::Object(mut map)) => {
                map.insert("success".into(), true.into());
                serde_json::Value::Object(map)
            }
            Ok(other) => serde_json::json!({ "success": true, "result": other }),
            Err(e) => {
                return respond::<()>(Err(AuthFailure::Internal(e.to_string())));
            }
        },
        Err(failure) => serde_json::json!({
            "success": false,
            "error": failure.code(),
            "message": failure.user_message(),
        }),
    };
    value.to_string()
}

#[interface(name = "org.muster.Attendance1")]
impl AttendanceInterface {
    /// Count faces in a capture, for live UX feedback before submission.
    async fn check_face(&self, image: String) -> String {
        respond(
            self.service
                .check_face(&image)
                .await
                .map(|count| serde_json::json!({ "face_count": count })),
        )
    }

    /// Face login and check-in. An empty email requests an open search over
    /// the whole enrolled gallery.
    async fn face_login(&self, image: String, email: String) -> String {
        let claimed = (!email.is_empty()).then_some(email.as_str());
        respond(self.service.face_login(&image, claimed).await)
    }

    /// Check out the identity claimed by email.
    async fn face_logout(&self, email: String) -> String {
        respond(self.service.face_logout(&email).await)
    }

    /// Register a face capture and password for an existing staff member.
    async fn enroll(&self, staff_id: String, image: String, password: String) -> String {
        respond(self.service.enroll(&staff_id, &image, &password).await)
    }

    async fn password_login(&self, email: String, password: String) -> String {
        respond(self.service.password_login(&email, &password).await)
    }

    async fn add_staff(
        &self,
        full_name: String,
        email: String,
        role: String,
        job_type: String,
    ) -> String {
        respond(
            self.service
                .add_staff(&full_name, &email, &role, &job_type)
                .await,
        )
    }

    /// Set or clear (`""`) the required check-in/check-out times (`HH:MM`).
    async fn set_schedule(&self, staff_id: String, check_in: String, check_out: String) -> String {
        respond(
            self.service
                .set_schedule(&staff_id, &check_in, &check_out)
                .await
                .map(|()| serde_json::json!({ "staff_id": staff_id })),
        )
    }

    async fn remove_staff(&self, staff_id: String) -> String {
        respond(
            self.service
                .remove_staff(&staff_id)
                .await
                .map(|()| serde_json::json!({ "staff_id": staff_id })),
        )
    }

    async fn get_staff(&self, staff_id: String) -> String {
        respond(self.service.get_staff(&staff_id).await)
    }

    async fn list_staff(&self) -> String {
        respond(
            self.service
                .list_staff()
                .await
                .map(|staff| serde_json::json!({ "staff": staff })),
        )
    }

    /// Attendance rows for one staff member between two dates (`YYYY-MM-DD`,
    /// inclusive), optionally filtered by status.
    async fn attendance_report(
        &self,
        staff_id: String,
        from: String,
        to: String,
        status: String,
    ) -> String {
        respond(
            self.service
                .attendance_report(&staff_id, &from, &to, &status)
                .await,
        )
    }

    /// Present/late/checked-out headcounts for today.
    async fn today_summary(&self) -> String {
        respond(self.service.today_summary().await)
    }

    /// Daemon health.
    async fn status(&self) -> String {
        respond(self.service.status().await)
    }
}
