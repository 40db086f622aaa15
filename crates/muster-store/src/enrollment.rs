//! Enrollment storage: embeddings, reference captures, credentials.

use muster_core::{Embedding, EnrolledFace};
use rusqlite::{params, OptionalExtension};

use crate::models::{EnrollmentRecord, StaffRecord};
use crate::staff::staff_from_row;
use crate::{corrupt_column, is_constraint_violation, Store, StoreError};

impl Store {
    /// Store or replace a staff member's enrollment in one UPSERT: the
    /// embedding, the reference capture, and the password hash all swap
    /// together. Old and new embeddings are never blended.
    ///
    /// Returns the UUID-derived filename assigned to the stored capture.
    pub async fn upsert_enrollment(
        &self,
        staff_id: &str,
        embedding: &Embedding,
        capture_image: Vec<u8>,
        password_hash: &str,
    ) -> Result<String, StoreError> {
        let staff_id = staff_id.to_string();
        let id_for_err = staff_id.clone();
        let embedding_json = serde_json::to_string(embedding)
            .map_err(|e| tokio_rusqlite::Error::Other(Box::new(e)))?;
        let filename = format!("{}.jpg", uuid::Uuid::new_v4().simple());
        let filename_out = filename.clone();
        let password_hash = password_hash.to_string();

        let result = self
            .conn()
            .call(move |conn| {
                let updated_at = chrono::Local::now().naive_local();
                conn.execute(
                    "INSERT INTO enrollment
                         (staff_id, embedding, capture_filename, capture_image, password_hash, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(staff_id) DO UPDATE SET
                         embedding = excluded.embedding,
                         capture_filename = excluded.capture_filename,
                         capture_image = excluded.capture_image,
                         password_hash = excluded.password_hash,
                         updated_at = excluded.updated_at",
                    params![staff_id, embedding_json, filename, capture_image, password_hash, updated_at],
                )?;
                Ok(())
            })
            .await;

        match result {
            Ok(()) => {
                tracing::info!(staff_id = %id_for_err, "enrollment stored");
                Ok(filename_out)
            }
            Err(e) if is_constraint_violation(&e) => Err(StoreError::StaffNotFound(id_for_err)),
            Err(e) => Err(e.into()),
        }
    }

    /// Set only the password hash, creating an embedding-less enrollment row
    /// if none exists. Used to bootstrap admin credentials before any face
    /// has been captured.
    pub async fn set_password(&self, staff_id: &str, password_hash: &str) -> Result<(), StoreError> {
        let staff_id = staff_id.to_string();
        let id_for_err = staff_id.clone();
        let password_hash = password_hash.to_string();

        let result = self
            .conn()
            .call(move |conn| {
                let updated_at = chrono::Local::now().naive_local();
                conn.execute(
                    "INSERT INTO enrollment (staff_id, password_hash, updated_at)
                     VALUES (?1, ?2, ?3)
                     ON CONFLICT(staff_id) DO UPDATE SET
                         password_hash = excluded.password_hash,
                         updated_at = excluded.updated_at",
                    params![staff_id, password_hash, updated_at],
                )?;
                Ok(())
            })
            .await;

        match result {
            Ok(()) => Ok(()),
            Err(e) if is_constraint_violation(&e) => Err(StoreError::StaffNotFound(id_for_err)),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn enrollment(&self, staff_id: &str) -> Result<Option<EnrollmentRecord>, StoreError> {
        let staff_id = staff_id.to_string();
        let record = self
            .conn()
            .call(move |conn| {
                let record = conn
                    .query_row(
                        "SELECT staff_id, embedding, capture_filename, capture_image,
                                password_hash, updated_at
                         FROM enrollment WHERE staff_id = ?1",
                        params![staff_id],
                        |row| {
                            let embedding = row
                                .get::<_, Option<String>>(1)?
                                .map(|json| {
                                    serde_json::from_str::<Embedding>(&json).map_err(|e| {
                                        corrupt_column(1, format!("bad embedding JSON: {e}"))
                                    })
                                })
                                .transpose()?;
                            Ok(EnrollmentRecord {
                                staff_id: row.get(0)?,
                                embedding,
                                capture_filename: row.get(2)?,
                                capture_image: row.get(3)?,
                                password_hash: row.get(4)?,
                                updated_at: row.get(5)?,
                            })
                        },
                    )
                    .optional()?;
                Ok(record)
            })
            .await?;
        Ok(record)
    }

    /// Load every stored embedding in ascending staff id order. The order is
    /// what makes open-search tie-breaking deterministic.
    pub async fn load_gallery(&self) -> Result<Vec<EnrolledFace>, StoreError> {
        let gallery = self
            .conn()
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT staff_id, embedding FROM enrollment
                     WHERE embedding IS NOT NULL ORDER BY staff_id ASC",
                )?;
                let gallery = stmt
                    .query_map([], |row| {
                        let staff_id: String = row.get(0)?;
                        let json: String = row.get(1)?;
                        let embedding = serde_json::from_str::<Embedding>(&json)
                            .map_err(|e| corrupt_column(1, format!("bad embedding JSON: {e}")))?;
                        Ok(EnrolledFace { staff_id, embedding })
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(gallery)
            })
            .await?;
        Ok(gallery)
    }

    /// Number of staff with a stored embedding.
    pub async fn enrolled_count(&self) -> Result<i64, StoreError> {
        let count = self
            .conn()
            .call(|conn| {
                let count = conn.query_row(
                    "SELECT COUNT(*) FROM enrollment WHERE embedding IS NOT NULL",
                    [],
                    |row| row.get(0),
                )?;
                Ok(count)
            })
            .await?;
        Ok(count)
    }

    /// Staff record plus stored password hash for a login attempt, or `None`
    /// when the email is unknown.
    pub async fn credentials_by_email(
        &self,
        email: &str,
    ) -> Result<Option<(StaffRecord, Option<String>)>, StoreError> {
        let email = email.to_string();
        let found = self
            .conn()
            .call(move |conn| {
                let found = conn
                    .query_row(
                        "SELECT s.staff_id, s.full_name, s.email, s.role, s.job_type,
                                s.check_in_time, s.check_out_time, s.created_at,
                                e.password_hash
                         FROM staff s
                         LEFT JOIN enrollment e ON e.staff_id = s.staff_id
                         WHERE s.email = ?1",
                        params![email],
                        |row| {
                            let staff = staff_from_row(row)?;
                            let hash: Option<String> = row.get(8)?;
                            Ok((staff, hash))
                        },
                    )
                    .optional()?;
                Ok(found)
            })
            .await?;
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StaffRole;

    async fn store_with_staff(n: usize) -> (Store, Vec<String>) {
        let store = Store::open_in_memory().await.unwrap();
        let mut ids = Vec::new();
        for i in 0..n {
            let s = store
                .add_staff(
                    &format!("Person {i}"),
                    &format!("p{i}@example.com"),
                    StaffRole::Staff,
                    "",
                )
                .await
                .unwrap();
            ids.push(s.staff_id);
        }
        (store, ids)
    }

    fn embedding(values: Vec<f32>) -> Embedding {
        Embedding::from_raw(values).unwrap()
    }

    #[tokio::test]
    async fn upsert_replaces_embedding() {
        let (store, ids) = store_with_staff(1).await;
        let first = embedding(vec![1.0, 0.0, 0.0, 0.0]);
        let second = embedding(vec![0.0, 1.0, 0.0, 0.0]);

        store
            .upsert_enrollment(&ids[0], &first, vec![1, 2, 3], "hash-a")
            .await
            .unwrap();
        store
            .upsert_enrollment(&ids[0], &second, vec![4, 5, 6], "hash-b")
            .await
            .unwrap();

        let gallery = store.load_gallery().await.unwrap();
        assert_eq!(gallery.len(), 1);
        assert!((gallery[0].embedding.similarity(&second) - 1.0).abs() < 1e-6);

        let record = store.enrollment(&ids[0]).await.unwrap().unwrap();
        assert_eq!(record.password_hash.as_deref(), Some("hash-b"));
        assert_eq!(record.capture_image.as_deref(), Some(&[4u8, 5, 6][..]));
    }

    #[tokio::test]
    async fn gallery_is_ordered_and_skips_embeddingless() {
        let (store, ids) = store_with_staff(3).await;
        // Enroll out of order; leave ids[1] password-only.
        store
            .upsert_enrollment(&ids[2], &embedding(vec![0.0, 1.0]), vec![], "h")
            .await
            .unwrap();
        store
            .upsert_enrollment(&ids[0], &embedding(vec![1.0, 0.0]), vec![], "h")
            .await
            .unwrap();
        store.set_password(&ids[1], "hash-only").await.unwrap();

        let gallery = store.load_gallery().await.unwrap();
        let order: Vec<_> = gallery.iter().map(|e| e.staff_id.as_str()).collect();
        assert_eq!(order, vec![ids[0].as_str(), ids[2].as_str()]);
        assert_eq!(store.enrolled_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn enrollment_requires_existing_staff() {
        let store = Store::open_in_memory().await.unwrap();
        let err = store
            .upsert_enrollment("S404", &embedding(vec![1.0]), vec![], "h")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::StaffNotFound(_)));
    }

    #[tokio::test]
    async fn password_only_enrollment_authenticates_by_hash() {
        let (store, ids) = store_with_staff(1).await;
        store.set_password(&ids[0], "phc-string").await.unwrap();

        let record = store.enrollment(&ids[0]).await.unwrap().unwrap();
        assert!(record.embedding.is_none());
        assert_eq!(record.password_hash.as_deref(), Some("phc-string"));

        let (staff, hash) = store
            .credentials_by_email("p0@example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(staff.staff_id, ids[0]);
        assert_eq!(hash.as_deref(), Some("phc-string"));
    }

    #[tokio::test]
    async fn credentials_for_unknown_email_is_none() {
        let store = Store::open_in_memory().await.unwrap();
        assert!(store
            .credentials_by_email("nobody@example.com")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn remove_staff_cascades_enrollment() {
        let (store, ids) = store_with_staff(1).await;
        store
            .upsert_enrollment(&ids[0], &embedding(vec![1.0, 0.0]), vec![9], "h")
            .await
            .unwrap();
        store.remove_staff(&ids[0]).await.unwrap();

        assert!(store.enrollment(&ids[0]).await.unwrap().is_none());
        assert!(store.load_gallery().await.unwrap().is_empty());
    }
}
