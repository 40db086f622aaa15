//! Attendance log operations.
//!
//! Check-ins append; the only mutation ever applied to an existing row is
//! the check-out backfill, and that runs inside the same transaction as the
//! open-session lookup so racing check-outs serialize cleanly.

use chrono::{NaiveDate, NaiveTime};
use rusqlite::{params, OptionalExtension};

use crate::models::{AttendanceRow, AttendanceStatus, ClosedSession, DaySummary};
use crate::{corrupt_column, is_constraint_violation, Store, StoreError};

fn attendance_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AttendanceRow> {
    let status_str: String = row.get(5)?;
    let status = AttendanceStatus::parse(&status_str)
        .ok_or_else(|| corrupt_column(5, format!("unknown attendance status: {status_str}")))?;
    Ok(AttendanceRow {
        id: row.get(0)?,
        staff_id: row.get(1)?,
        date: row.get(2)?,
        check_in: row.get(3)?,
        check_out: row.get(4)?,
        status,
        overtime_hours: row.get(6)?,
    })
}

const INSERT_ROW: &str = "INSERT INTO attendance
    (staff_id, date, check_in, check_out, status, overtime_hours)
    VALUES (?1, ?2, ?3, NULL, ?4, ?5)";

impl Store {
    /// Append the check-in rows for one login. A late arrival writes a
    /// `Late` row and then an `Active` row in one transaction; an on-time
    /// arrival writes a single `Active` row. Open rows carry an explicit
    /// 0.00 overtime, not NULL.
    ///
    /// Deliberately append-only: a repeated check-in appends again rather
    /// than reusing the open session.
    pub async fn record_check_in(
        &self,
        staff_id: &str,
        date: NaiveDate,
        time: NaiveTime,
        late: bool,
    ) -> Result<(), StoreError> {
        let staff_id = staff_id.to_string();
        let id_for_err = staff_id.clone();

        let result = self
            .conn()
            .call(move |conn| {
                let tx = conn.transaction()?;
                if late {
                    tx.execute(
                        INSERT_ROW,
                        params![staff_id, date, time, AttendanceStatus::Late.as_str(), 0.0f64],
                    )?;
                }
                tx.execute(
                    INSERT_ROW,
                    params![staff_id, date, time, AttendanceStatus::Active.as_str(), 0.0f64],
                )?;
                tx.commit()?;
                Ok(())
            })
            .await;

        match result {
            Ok(()) => Ok(()),
            Err(e) if is_constraint_violation(&e) => Err(StoreError::StaffNotFound(id_for_err)),
            Err(e) => Err(e.into()),
        }
    }

    /// Close the most recently opened `Active` session for (staff, date):
    /// insert an `Inactive` row carrying the computed overtime and backfill
    /// the open row's `check_out`. Returns `None`, writing nothing, when no
    /// open session exists.
    pub async fn close_open_session(
        &self,
        staff_id: &str,
        date: NaiveDate,
        check_out: NaiveTime,
        overtime_hours: Option<f64>,
    ) -> Result<Option<ClosedSession>, StoreError> {
        let staff_id = staff_id.to_string();
        let closed = self
            .conn()
            .call(move |conn| {
                let tx = conn.transaction()?;

                let open: Option<(i64, Option<NaiveTime>)> = tx
                    .query_row(
                        "SELECT id, check_in FROM attendance
                         WHERE staff_id = ?1 AND date = ?2
                           AND status = 'Active' AND check_out IS NULL
                         ORDER BY id DESC LIMIT 1",
                        params![staff_id, date],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()?;

                let Some((open_id, check_in)) = open else {
                    return Ok(None);
                };

                tx.execute(
                    "INSERT INTO attendance
                         (staff_id, date, check_in, check_out, status, overtime_hours)
                     VALUES (?1, ?2, ?3, ?4, 'Inactive', ?5)",
                    params![staff_id, date, check_in, check_out, overtime_hours],
                )?;
                tx.execute(
                    "UPDATE attendance SET check_out = ?2 WHERE id = ?1",
                    params![open_id, check_out],
                )?;
                tx.commit()?;

                Ok(Some(ClosedSession {
                    check_in,
                    check_out,
                    overtime_hours,
                }))
            })
            .await?;
        Ok(closed)
    }

    /// Attendance rows for one staff member over a date range, newest first,
    /// optionally filtered by status.
    pub async fn attendance_between(
        &self,
        staff_id: &str,
        from: NaiveDate,
        to: NaiveDate,
        status: Option<AttendanceStatus>,
    ) -> Result<Vec<AttendanceRow>, StoreError> {
        let staff_id = staff_id.to_string();
        let rows = self
            .conn()
            .call(move |conn| {
                let rows = match status {
                    Some(status) => {
                        let mut stmt = conn.prepare(
                            "SELECT id, staff_id, date, check_in, check_out, status, overtime_hours
                             FROM attendance
                             WHERE staff_id = ?1 AND date BETWEEN ?2 AND ?3 AND status = ?4
                             ORDER BY date DESC, id DESC",
                        )?;
                        let rows = stmt
                            .query_map(
                                params![staff_id, from, to, status.as_str()],
                                attendance_from_row,
                            )?
                            .collect::<rusqlite::Result<Vec<_>>>()?;
                        rows
                    }
                    None => {
                        let mut stmt = conn.prepare(
                            "SELECT id, staff_id, date, check_in, check_out, status, overtime_hours
                             FROM attendance
                             WHERE staff_id = ?1 AND date BETWEEN ?2 AND ?3
                             ORDER BY date DESC, id DESC",
                        )?;
                        let rows = stmt
                            .query_map(params![staff_id, from, to], attendance_from_row)?
                            .collect::<rusqlite::Result<Vec<_>>>()?;
                        rows
                    }
                };
                Ok(rows)
            })
            .await?;
        Ok(rows)
    }

    /// Distinct-staff counts per status for one date.
    pub async fn day_summary(&self, date: NaiveDate) -> Result<DaySummary, StoreError> {
        let summary = self
            .conn()
            .call(move |conn| {
                let count_for = |status: &str| -> rusqlite::Result<i64> {
                    conn.query_row(
                        "SELECT COUNT(DISTINCT staff_id) FROM attendance
                         WHERE date = ?1 AND status = ?2",
                        params![date, status],
                        |row| row.get(0),
                    )
                };
                Ok(DaySummary {
                    present: count_for("Active")?,
                    late: count_for("Late")?,
                    checked_out: count_for("Inactive")?,
                })
            })
            .await?;
        Ok(summary)
    }
}
