//! Staff directory operations.

use chrono::NaiveTime;
use rusqlite::{params, OptionalExtension};

use crate::models::{StaffRecord, StaffRole};
use crate::{corrupt_column, is_constraint_violation, Store, StoreError};

pub(crate) fn staff_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StaffRecord> {
    let role_str: String = row.get(3)?;
    let role = StaffRole::parse(&role_str)
        .ok_or_else(|| corrupt_column(3, format!("unknown staff role: {role_str}")))?;
    Ok(StaffRecord {
        staff_id: row.get(0)?,
        full_name: row.get(1)?,
        email: row.get(2)?,
        role,
        job_type: row.get(4)?,
        check_in_time: row.get(5)?,
        check_out_time: row.get(6)?,
        created_at: row.get(7)?,
    })
}

const STAFF_COLUMNS: &str =
    "staff_id, full_name, email, role, job_type, check_in_time, check_out_time, created_at";

impl Store {
    /// Create a staff entry, allocating the next sequential id (`S001`,
    /// `S002`, ...). The id scan and the insert run in one transaction so
    /// concurrent additions cannot allocate the same id.
    pub async fn add_staff(
        &self,
        full_name: &str,
        email: &str,
        role: StaffRole,
        job_type: &str,
    ) -> Result<StaffRecord, StoreError> {
        let full_name = full_name.to_string();
        let email = email.to_string();
        let email_for_err = email.clone();
        let job_type = job_type.to_string();

        let result = self
            .conn()
            .call(move |conn| {
                let tx = conn.transaction()?;

                let highest: Option<String> = tx
                    .query_row(
                        "SELECT staff_id FROM staff
                         ORDER BY CAST(SUBSTR(staff_id, 2) AS INTEGER) DESC LIMIT 1",
                        [],
                        |row| row.get(0),
                    )
                    .optional()?;
                let next = highest
                    .and_then(|id| id[1..].parse::<u32>().ok())
                    .unwrap_or(0)
                    + 1;
                let staff_id = format!("S{next:03}");

                let created_at = chrono::Local::now().naive_local();
                tx.execute(
                    "INSERT INTO staff (staff_id, full_name, email, role, job_type, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![staff_id, full_name, email, role.as_str(), job_type, created_at],
                )?;
                tx.commit()?;

                Ok(StaffRecord {
                    staff_id,
                    full_name,
                    email,
                    role,
                    job_type,
                    check_in_time: None,
                    check_out_time: None,
                    created_at,
                })
            })
            .await;

        match result {
            Ok(record) => {
                tracing::info!(staff_id = %record.staff_id, email = %record.email, "staff added");
                Ok(record)
            }
            Err(e) if is_constraint_violation(&e) => Err(StoreError::DuplicateEmail(email_for_err)),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn staff(&self, staff_id: &str) -> Result<Option<StaffRecord>, StoreError> {
        let staff_id = staff_id.to_string();
        let record = self
            .conn()
            .call(move |conn| {
                let record = conn
                    .query_row(
                        &format!("SELECT {STAFF_COLUMNS} FROM staff WHERE staff_id = ?1"),
                        params![staff_id],
                        staff_from_row,
                    )
                    .optional()?;
                Ok(record)
            })
            .await?;
        Ok(record)
    }

    /// Lookup by email, case-insensitively (the column collates NOCASE).
    pub async fn staff_by_email(&self, email: &str) -> Result<Option<StaffRecord>, StoreError> {
        let email = email.to_string();
        let record = self
            .conn()
            .call(move |conn| {
                let record = conn
                    .query_row(
                        &format!("SELECT {STAFF_COLUMNS} FROM staff WHERE email = ?1"),
                        params![email],
                        staff_from_row,
                    )
                    .optional()?;
                Ok(record)
            })
            .await?;
        Ok(record)
    }

    pub async fn list_staff(&self) -> Result<Vec<StaffRecord>, StoreError> {
        let records = self
            .conn()
            .call(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {STAFF_COLUMNS} FROM staff ORDER BY staff_id ASC"
                ))?;
                let records = stmt
                    .query_map([], staff_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(records)
            })
            .await?;
        Ok(records)
    }

    /// Set or clear the required check-in/check-out times.
    pub async fn set_schedule(
        &self,
        staff_id: &str,
        check_in: Option<NaiveTime>,
        check_out: Option<NaiveTime>,
    ) -> Result<(), StoreError> {
        let staff_id = staff_id.to_string();
        let id_for_err = staff_id.clone();
        let updated = self
            .conn()
            .call(move |conn| {
                let updated = conn.execute(
                    "UPDATE staff SET check_in_time = ?2, check_out_time = ?3 WHERE staff_id = ?1",
                    params![staff_id, check_in, check_out],
                )?;
                Ok(updated)
            })
            .await?;
        if updated == 0 {
            return Err(StoreError::StaffNotFound(id_for_err));
        }
        Ok(())
    }

    /// Delete a staff entry; enrollment and attendance rows cascade.
    pub async fn remove_staff(&self, staff_id: &str) -> Result<(), StoreError> {
        let staff_id = staff_id.to_string();
        let id_for_err = staff_id.clone();
        let deleted = self
            .conn()
            .call(move |conn| {
                let deleted =
                    conn.execute("DELETE FROM staff WHERE staff_id = ?1", params![staff_id])?;
                Ok(deleted)
            })
            .await?;
        if deleted == 0 {
            return Err(StoreError::StaffNotFound(id_for_err));
        }
        tracing::info!(staff_id = %id_for_err, "staff removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> Store {
        Store::open_in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn ids_allocate_sequentially() {
        let store = store().await;
        let a = store
            .add_staff("Ada Park", "ada@example.com", StaffRole::Staff, "Engineer")
            .await
            .unwrap();
        let b = store
            .add_staff("Ben Ruiz", "ben@example.com", StaffRole::Staff, "Designer")
            .await
            .unwrap();
        let c = store
            .add_staff("Cal Wei", "cal@example.com", StaffRole::Admin, "Manager")
            .await
            .unwrap();
        assert_eq!(a.staff_id, "S001");
        assert_eq!(b.staff_id, "S002");
        assert_eq!(c.staff_id, "S003");
    }

    #[tokio::test]
    async fn id_allocation_follows_highest_existing() {
        let store = store().await;
        store
            .add_staff("A", "a@example.com", StaffRole::Staff, "")
            .await
            .unwrap();
        let b = store
            .add_staff("B", "b@example.com", StaffRole::Staff, "")
            .await
            .unwrap();
        store.remove_staff(&b.staff_id).await.unwrap();

        // Highest remaining is S001, so the freed suffix is reallocated.
        let c = store
            .add_staff("C", "c@example.com", StaffRole::Staff, "")
            .await
            .unwrap();
        assert_eq!(c.staff_id, "S002");
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let store = store().await;
        store
            .add_staff("A", "same@example.com", StaffRole::Staff, "")
            .await
            .unwrap();
        let err = store
            .add_staff("B", "same@example.com", StaffRole::Staff, "")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateEmail(_)));
    }

    #[tokio::test]
    async fn email_lookup_ignores_case() {
        let store = store().await;
        store
            .add_staff("A", "Mixed.Case@Example.com", StaffRole::Staff, "")
            .await
            .unwrap();
        let found = store.staff_by_email("mixed.case@example.com").await.unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn schedule_sets_and_clears() {
        let store = store().await;
        let s = store
            .add_staff("A", "a@example.com", StaffRole::Staff, "")
            .await
            .unwrap();

        let nine = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        let six = NaiveTime::from_hms_opt(18, 0, 0).unwrap();
        store
            .set_schedule(&s.staff_id, Some(nine), Some(six))
            .await
            .unwrap();

        let loaded = store.staff(&s.staff_id).await.unwrap().unwrap();
        assert_eq!(loaded.check_in_time, Some(nine));
        assert_eq!(loaded.check_out_time, Some(six));

        store.set_schedule(&s.staff_id, None, None).await.unwrap();
        let cleared = store.staff(&s.staff_id).await.unwrap().unwrap();
        assert_eq!(cleared.check_in_time, None);
        assert_eq!(cleared.check_out_time, None);
    }

    #[tokio::test]
    async fn schedule_for_unknown_staff_fails() {
        let store = store().await;
        let err = store.set_schedule("S404", None, None).await.unwrap_err();
        assert!(matches!(err, StoreError::StaffNotFound(_)));
    }

    #[tokio::test]
    async fn list_orders_by_id() {
        let store = store().await;
        store
            .add_staff("A", "a@example.com", StaffRole::Staff, "")
            .await
            .unwrap();
        store
            .add_staff("B", "b@example.com", StaffRole::Admin, "")
            .await
            .unwrap();
        let all = store.list_staff().await.unwrap();
        let ids: Vec<_> = all.iter().map(|s| s.staff_id.as_str()).collect();
        assert_eq!(ids, vec!["S001", "S002"]);
    }
}
