//! The operation layer: everything the web layer can ask the daemon to do.
//!
//! Each operation captures one timestamp, runs the face pipeline on the
//! engine thread under a timeout, and maps every failure to one
//! [`AuthFailure`] kind with a stable wire code and a corrective message.

use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, SaltString};
use argon2::{Argon2, PasswordVerifier};
use chrono::{Duration, Local, NaiveDate, NaiveDateTime, NaiveTime};
use image::RgbImage;
use muster_core::{CosineMatcher, Embedding, EncodedImage, Matcher};
use muster_store::{
    AttendanceRow, AttendanceStatus, DaySummary, StaffRecord, StaffRole, Store, StoreError,
};
use serde::Serialize;
use thiserror::Error;

use crate::attendance;
use crate::engine::{EngineError, EngineHandle, Extraction};

/// Every way a request can fail. All are recoverable by the caller; none
/// crash the daemon.
#[derive(Error, Debug)]
pub enum AuthFailure {
    #[error("image payload could not be decoded")]
    InvalidImage,
    #[error("no face detected")]
    NoFaceDetected,
    #[error("{count} faces detected")]
    MultipleFacesDetected { count: usize },
    #[error("embedding could not be computed")]
    EmbeddingComputationFailed,
    #[error("no face enrolled for this account")]
    NoEnrollmentFound,
    #[error("face does not match the enrolled identity")]
    FaceMismatch,
    #[error("no enrolled identity matches this face")]
    NoMatchFound,
    #[error("no open session to check out of")]
    NoOpenSession,
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("unknown staff: {0}")]
    UnknownStaff(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthFailure {
    /// Stable snake_case code for the wire protocol.
    pub fn code(&self) -> &'static str {
        match self {
            AuthFailure::InvalidImage => "invalid_image",
            AuthFailure::NoFaceDetected => "no_face_detected",
            AuthFailure::MultipleFacesDetected { .. } => "multiple_faces_detected",
            AuthFailure::EmbeddingComputationFailed => "embedding_computation_failed",
            AuthFailure::NoEnrollmentFound => "no_enrollment_found",
            AuthFailure::FaceMismatch => "face_mismatch",
            AuthFailure::NoMatchFound => "no_match_found",
            AuthFailure::NoOpenSession => "no_open_session",
            AuthFailure::InvalidCredentials => "invalid_credentials",
            AuthFailure::UnknownStaff(_) => "unknown_staff",
            AuthFailure::InvalidRequest(_) => "invalid_request",
            AuthFailure::Internal(_) => "internal",
        }
    }

    /// Corrective guidance for the person at the camera.
    pub fn user_message(&self) -> String {
        match self {
            AuthFailure::InvalidImage => {
                "The captured image could not be read. Please retake the photo.".into()
            }
            AuthFailure::NoFaceDetected => {
                "No face was found in the frame. Face the camera and try again.".into()
            }
            AuthFailure::MultipleFacesDetected { count } => {
                format!("{count} faces were found in the frame. Make sure only you are in view.")
            }
            AuthFailure::EmbeddingComputationFailed => {
                "The face could not be processed. Please retake the photo.".into()
            }
            AuthFailure::NoEnrollmentFound => {
                "No face is registered for this account. Complete face registration first.".into()
            }
            AuthFailure::FaceMismatch => {
                "The face does not match this account's registered face.".into()
            }
            AuthFailure::NoMatchFound => {
                "This face does not match any registered staff member.".into()
            }
            AuthFailure::NoOpenSession => {
                "No active session found. Check in before checking out.".into()
            }
            AuthFailure::InvalidCredentials => "Invalid email or password.".into(),
            AuthFailure::UnknownStaff(id) => format!("No staff member found for {id}."),
            AuthFailure::InvalidRequest(reason) => reason.clone(),
            AuthFailure::Internal(_) => "An internal error occurred. Please try again.".into(),
        }
    }
}

impl From<StoreError> for AuthFailure {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::StaffNotFound(id) => AuthFailure::UnknownStaff(id),
            StoreError::DuplicateEmail(email) => {
                AuthFailure::InvalidRequest(format!("email already registered: {email}"))
            }
            other => AuthFailure::Internal(other.to_string()),
        }
    }
}

impl From<EngineError> for AuthFailure {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::ChannelClosed => {
                AuthFailure::Internal("inference engine unavailable".into())
            }
            other => {
                tracing::warn!(error = %other, "inference fault");
                AuthFailure::EmbeddingComputationFailed
            }
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LoginOutcome {
    pub staff_id: String,
    pub full_name: String,
    pub role: StaffRole,
    /// `Active`, or the composite `Late/Active` for a late arrival.
    pub attendance_status: String,
    pub similarity: f32,
}

#[derive(Debug, Serialize)]
pub struct LogoutOutcome {
    pub staff_id: String,
    pub check_out: NaiveTime,
    pub overtime_hours: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct EnrollOutcome {
    pub staff_id: String,
    pub capture_filename: String,
    /// Similarity against the previously stored reference capture, when one
    /// existed and was checked.
    pub reference_similarity: Option<f32>,
}

#[derive(Debug, Serialize)]
pub struct PasswordLoginOutcome {
    pub staff_id: String,
    pub full_name: String,
    pub role: StaffRole,
    /// Staff-role logins must still pass a face login; admins may not.
    pub face_required: bool,
}

#[derive(Debug, Serialize)]
pub struct StatusCounts {
    pub late: usize,
    pub active: usize,
    pub inactive: usize,
}

#[derive(Debug, Serialize)]
pub struct AttendanceReport {
    pub staff_id: String,
    pub records: Vec<AttendanceRow>,
    pub counts: StatusCounts,
}

#[derive(Debug, Serialize)]
pub struct DaemonStatus {
    pub version: &'static str,
    pub staff_count: usize,
    pub enrolled_count: i64,
}

/// The daemon's operation layer: one engine handle, one store, the global
/// threshold and grace period.
#[derive(Clone)]
pub struct Service {
    engine: EngineHandle,
    store: Store,
    threshold: f32,
    grace: Duration,
    infer_timeout: std::time::Duration,
}

impl Service {
    pub fn new(
        engine: EngineHandle,
        store: Store,
        threshold: f32,
        grace_minutes: i64,
        infer_timeout: std::time::Duration,
    ) -> Self {
        Self {
            engine,
            store,
            threshold,
            grace: Duration::minutes(grace_minutes),
            infer_timeout,
        }
    }

    /// Count faces in a capture, for live feedback before submission.
    pub async fn check_face(&self, payload: &str) -> Result<usize, AuthFailure> {
        let image = decode(payload)?;
        match tokio::time::timeout(self.infer_timeout, self.engine.count_faces(image)).await {
            Ok(result) => Ok(result?),
            Err(_) => {
                tracing::warn!("face count timed out");
                Err(AuthFailure::EmbeddingComputationFailed)
            }
        }
    }

    /// Face login: resolve the identity from the capture and record the
    /// check-in. A present, non-empty `claimed_email` selects targeted
    /// verification; otherwise the whole gallery is searched.
    pub async fn face_login(
        &self,
        payload: &str,
        claimed_email: Option<&str>,
    ) -> Result<LoginOutcome, AuthFailure> {
        self.face_login_at(payload, claimed_email, Local::now().naive_local())
            .await
    }

    pub(crate) async fn face_login_at(
        &self,
        payload: &str,
        claimed_email: Option<&str>,
        now: NaiveDateTime,
    ) -> Result<LoginOutcome, AuthFailure> {
        let image = decode(payload)?;
        let probe = self.single_face_embedding(image).await?;

        let (staff, similarity) = match claimed_email.filter(|e| !e.is_empty()) {
            Some(email) => self.resolve_targeted(email, &probe).await?,
            None => self.resolve_open(&probe).await?,
        };

        let late = attendance::is_late(now, staff.check_in_time, self.grace);
        self.store
            .record_check_in(&staff.staff_id, now.date(), now.time(), late)
            .await?;

        let attendance_status = if late { "Late/Active" } else { "Active" }.to_string();
        tracing::info!(
            staff_id = %staff.staff_id,
            similarity,
            status = %attendance_status,
            "face login"
        );
        Ok(LoginOutcome {
            staff_id: staff.staff_id,
            full_name: staff.full_name,
            role: staff.role,
            attendance_status,
            similarity,
        })
    }

    /// Check out the identity claimed by email. No face re-check: the
    /// session that logged in already proved the face.
    pub async fn face_logout(&self, email: &str) -> Result<LogoutOutcome, AuthFailure> {
        self.face_logout_at(email, Local::now().naive_local()).await
    }

    pub(crate) async fn face_logout_at(
        &self,
        email: &str,
        now: NaiveDateTime,
    ) -> Result<LogoutOutcome, AuthFailure> {
        let staff = self
            .store
            .staff_by_email(email)
            .await?
            .ok_or_else(|| AuthFailure::UnknownStaff(email.to_string()))?;

        let overtime = attendance::overtime_hours(now, staff.check_out_time);
        let closed = self
            .store
            .close_open_session(&staff.staff_id, now.date(), now.time(), overtime)
            .await?
            .ok_or(AuthFailure::NoOpenSession)?;

        tracing::info!(
            staff_id = %staff.staff_id,
            overtime = ?closed.overtime_hours,
            "checked out"
        );
        Ok(LogoutOutcome {
            staff_id: staff.staff_id,
            check_out: closed.check_out,
            overtime_hours: closed.overtime_hours,
        })
    }

    /// Register a face capture and credential for an existing staff member.
    ///
    /// Requires exactly one detected face. When a reference capture is
    /// already on file, the new face must match it at the global threshold
    /// before the enrollment is replaced.
    pub async fn enroll(
        &self,
        staff_id: &str,
        payload: &str,
        password: &str,
    ) -> Result<EnrollOutcome, AuthFailure> {
        let staff = self
            .store
            .staff(staff_id)
            .await?
            .ok_or_else(|| AuthFailure::UnknownStaff(staff_id.to_string()))?;

        let encoded = EncodedImage::from_payload(payload);
        let capture_bytes = encoded.file_bytes().map_err(|e| {
            tracing::debug!(error = %e, "bad enrollment payload");
            AuthFailure::InvalidImage
        })?;
        let image = encoded.decode().map_err(|_| AuthFailure::InvalidImage)?;
        let probe = self.single_face_embedding(image).await?;

        let reference_similarity = match self.store.enrollment(&staff.staff_id).await? {
            Some(previous) => {
                self.match_reference(&probe, previous.capture_image)
                    .await?
            }
            None => None,
        };

        let hash = hash_password(password).await?;
        let capture_filename = self
            .store
            .upsert_enrollment(&staff.staff_id, &probe, capture_bytes, &hash)
            .await?;

        tracing::info!(staff_id = %staff.staff_id, "enrollment accepted");
        Ok(EnrollOutcome {
            staff_id: staff.staff_id,
            capture_filename,
            reference_similarity,
        })
    }

    /// Password login. `Staff`-role accounts must follow up with a face
    /// login; `Admin` accounts are logged in directly.
    pub async fn password_login(
        &self,
        email: &str,
        password: &str,
    ) -> Result<PasswordLoginOutcome, AuthFailure> {
        // Unknown email and wrong password are indistinguishable.
        let Some((staff, Some(hash))) = self.store.credentials_by_email(email).await? else {
            return Err(AuthFailure::InvalidCredentials);
        };
        if !verify_password(password, &hash).await {
            return Err(AuthFailure::InvalidCredentials);
        }

        tracing::info!(staff_id = %staff.staff_id, role = ?staff.role, "password login");
        Ok(PasswordLoginOutcome {
            face_required: !staff.role.bypasses_face_check(),
            staff_id: staff.staff_id,
            full_name: staff.full_name,
            role: staff.role,
        })
    }

    pub async fn add_staff(
        &self,
        full_name: &str,
        email: &str,
        role: &str,
        job_type: &str,
    ) -> Result<StaffRecord, AuthFailure> {
        let role = StaffRole::parse(role)
            .ok_or_else(|| AuthFailure::InvalidRequest(format!("unknown role: {role}")))?;
        Ok(self.store.add_staff(full_name, email, role, job_type).await?)
    }

    /// Set or clear (`""`) the required check-in/check-out times, `%H:%M`.
    pub async fn set_schedule(
        &self,
        staff_id: &str,
        check_in: &str,
        check_out: &str,
    ) -> Result<(), AuthFailure> {
        let check_in = parse_optional_time(check_in)?;
        let check_out = parse_optional_time(check_out)?;
        Ok(self.store.set_schedule(staff_id, check_in, check_out).await?)
    }

    pub async fn remove_staff(&self, staff_id: &str) -> Result<(), AuthFailure> {
        Ok(self.store.remove_staff(staff_id).await?)
    }

    pub async fn get_staff(&self, staff_id: &str) -> Result<StaffRecord, AuthFailure> {
        self.store
            .staff(staff_id)
            .await?
            .ok_or_else(|| AuthFailure::UnknownStaff(staff_id.to_string()))
    }

    pub async fn list_staff(&self) -> Result<Vec<StaffRecord>, AuthFailure> {
        Ok(self.store.list_staff().await?)
    }

    /// Attendance rows for one staff member over a date range (inclusive,
    /// `%Y-%m-%d`), newest first, with per-status counts of the returned
    /// rows. An empty `status` means no filter.
    pub async fn attendance_report(
        &self,
        staff_id: &str,
        from: &str,
        to: &str,
        status: &str,
    ) -> Result<AttendanceReport, AuthFailure> {
        let staff = self.get_staff(staff_id).await?;
        let from = parse_date(from)?;
        let to = parse_date(to)?;
        let filter = match status {
            "" => None,
            other => Some(AttendanceStatus::parse(other).ok_or_else(|| {
                AuthFailure::InvalidRequest(format!(
                    "unknown status {other:?}, expected Late, Active or Inactive"
                ))
            })?),
        };

        let records = self
            .store
            .attendance_between(&staff.staff_id, from, to, filter)
            .await?;
        let counts = StatusCounts {
            late: count_status(&records, AttendanceStatus::Late),
            active: count_status(&records, AttendanceStatus::Active),
            inactive: count_status(&records, AttendanceStatus::Inactive),
        };
        Ok(AttendanceReport {
            staff_id: staff.staff_id,
            records,
            counts,
        })
    }

    /// Present/late/checked-out headcounts for today.
    pub async fn today_summary(&self) -> Result<DaySummary, AuthFailure> {
        Ok(self.store.day_summary(Local::now().date_naive()).await?)
    }

    pub async fn status(&self) -> Result<DaemonStatus, AuthFailure> {
        Ok(DaemonStatus {
            version: env!("CARGO_PKG_VERSION"),
            staff_count: self.store.list_staff().await?.len(),
            enrolled_count: self.store.enrolled_count().await?,
        })
    }

    /// Run detection + embedding under the inference timeout.
    async fn extract(&self, image: RgbImage) -> Result<Extraction, AuthFailure> {
        match tokio::time::timeout(self.infer_timeout, self.engine.extract(image)).await {
            Ok(result) => Ok(result?),
            Err(_) => {
                tracing::warn!("extraction timed out");
                Err(AuthFailure::EmbeddingComputationFailed)
            }
        }
    }

    /// Embed the face in an image that must contain exactly one.
    async fn single_face_embedding(&self, image: RgbImage) -> Result<Embedding, AuthFailure> {
        let extraction = self.extract(image).await?;
        match extraction.face_count {
            0 => Err(AuthFailure::NoFaceDetected),
            1 => extraction
                .embedding
                .ok_or(AuthFailure::EmbeddingComputationFailed),
            count => Err(AuthFailure::MultipleFacesDetected { count }),
        }
    }

    async fn resolve_targeted(
        &self,
        email: &str,
        probe: &Embedding,
    ) -> Result<(StaffRecord, f32), AuthFailure> {
        let staff = self
            .store
            .staff_by_email(email)
            .await?
            .ok_or_else(|| AuthFailure::UnknownStaff(email.to_string()))?;
        let stored = self
            .store
            .enrollment(&staff.staff_id)
            .await?
            .and_then(|e| e.embedding)
            .ok_or(AuthFailure::NoEnrollmentFound)?;

        let similarity = probe.similarity(&stored);
        if similarity < self.threshold {
            tracing::info!(
                staff_id = %staff.staff_id,
                similarity,
                threshold = self.threshold,
                "face mismatch"
            );
            return Err(AuthFailure::FaceMismatch);
        }
        Ok((staff, similarity))
    }

    async fn resolve_open(&self, probe: &Embedding) -> Result<(StaffRecord, f32), AuthFailure> {
        let gallery = self.store.load_gallery().await?;
        let result = CosineMatcher.compare(probe, &gallery, self.threshold);
        let Some(staff_id) = result.staff_id else {
            tracing::info!(best = result.similarity, "open search found no match");
            return Err(AuthFailure::NoMatchFound);
        };
        let staff = self
            .store
            .staff(&staff_id)
            .await?
            .ok_or_else(|| AuthFailure::UnknownStaff(staff_id))?;
        Ok((staff, result.similarity))
    }

    /// Compare the new enrollment capture against the reference image
    /// already on file. An unreadable or face-less reference is skipped with
    /// a warning; a readable reference that does not match rejects the
    /// enrollment.
    async fn match_reference(
        &self,
        probe: &Embedding,
        reference: Option<Vec<u8>>,
    ) -> Result<Option<f32>, AuthFailure> {
        let Some(bytes) = reference else {
            return Ok(None);
        };
        let Ok(reference_image) = image::load_from_memory(&bytes) else {
            tracing::warn!("stored reference capture unreadable, skipping reference check");
            return Ok(None);
        };

        let extraction = self.extract(reference_image.to_rgb8()).await?;
        let Some(stored) = extraction.embedding else {
            tracing::warn!("no usable face in stored reference capture, skipping reference check");
            return Ok(None);
        };

        let similarity = probe.similarity(&stored);
        if similarity < self.threshold {
            tracing::info!(similarity, threshold = self.threshold, "reference mismatch");
            return Err(AuthFailure::FaceMismatch);
        }
        Ok(Some(similarity))
    }
}

fn decode(payload: &str) -> Result<RgbImage, AuthFailure> {
    EncodedImage::from_payload(payload).decode().map_err(|e| {
        tracing::debug!(error = %e, "bad image payload");
        AuthFailure::InvalidImage
    })
}

fn count_status(records: &[AttendanceRow], status: AttendanceStatus) -> usize {
    records.iter().filter(|r| r.status == status).count()
}

fn parse_optional_time(s: &str) -> Result<Option<NaiveTime>, AuthFailure> {
    if s.is_empty() {
        return Ok(None);
    }
    NaiveTime::parse_from_str(s, "%H:%M")
        .map(Some)
        .map_err(|_| AuthFailure::InvalidRequest(format!("bad time {s:?}, expected HH:MM")))
}

fn parse_date(s: &str) -> Result<NaiveDate, AuthFailure> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| AuthFailure::InvalidRequest(format!("bad date {s:?}, expected YYYY-MM-DD")))
}

async fn hash_password(password: &str) -> Result<String, AuthFailure> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
    })
    .await
    .map_err(|e| AuthFailure::Internal(e.to_string()))?
    .map_err(|e| AuthFailure::Internal(format!("password hashing: {e}")))
}

async fn verify_password(password: &str, hash: &str) -> bool {
    let password = password.to_string();
    let hash = hash.to_string();
    tokio::task::spawn_blocking(move || {
        PasswordHash::new(&hash)
            .map(|parsed| {
                Argon2::default()
                    .verify_password(password.as_bytes(), &parsed)
                    .is_ok()
            })
            .unwrap_or(false)
    })
    .await
    .unwrap_or(false)
}
