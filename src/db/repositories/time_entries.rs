use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Row};

use crate::{
    db::{
        connection::Database,
        helpers::{parse_datetime, to_i64, to_u64},
        models::{TaskTotal, TimeEntry},
    },
    sink::{SaveFuture, TimeSink},
};

fn row_to_time_entry(row: &Row) -> Result<TimeEntry> {
    let elapsed_secs: i64 = row.get("elapsed_secs")?;
    let recorded_at: String = row.get("recorded_at")?;

    Ok(TimeEntry {
        id: row.get("id")?,
        task_id: row.get("task_id")?,
        elapsed_secs: to_u64(elapsed_secs, "elapsed_secs")?,
        notes: row.get("notes")?,
        recorded_at: parse_datetime(&recorded_at, "recorded_at")?,
    })
}

impl Database {
    pub async fn insert_time_entry(&self, entry: &TimeEntry) -> Result<()> {
        let record = entry.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO time_entries (id, task_id, elapsed_secs, notes, recorded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.id,
                    record.task_id,
                    to_i64(record.elapsed_secs)?,
                    record.notes,
                    record.recorded_at.to_rfc3339(),
                ],
            )
            .with_context(|| "failed to insert time entry")?;
            Ok(())
        })
        .await
    }

    /// Entries for a task, newest first.
    pub async fn list_time_entries(&self, task_id: &str) -> Result<Vec<TimeEntry>> {
        let task_id = task_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, task_id, elapsed_secs, notes, recorded_at
                 FROM time_entries
                 WHERE task_id = ?1
                 ORDER BY recorded_at DESC, id",
            )?;

            let mut rows = stmt.query(params![task_id])?;
            let mut entries = Vec::new();
            while let Some(row) = rows.next()? {
                entries.push(row_to_time_entry(row)?);
            }
            Ok(entries)
        })
        .await
    }

    pub async fn task_total(&self, task_id: &str) -> Result<TaskTotal> {
        let task_id = task_id.to_string();
        self.execute(move |conn| {
            let (entry_count, total_secs): (i64, i64) = conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(elapsed_secs), 0)
                 FROM time_entries
                 WHERE task_id = ?1",
                params![task_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;

            Ok(TaskTotal {
                task_id,
                entry_count: to_u64(entry_count, "entry_count")?,
                total_secs: to_u64(total_secs, "total_secs")?,
            })
        })
        .await
    }
}

impl TimeSink for Database {
    fn save_time<'a>(
        &'a self,
        task_id: &'a str,
        elapsed_secs: u64,
        notes: &'a str,
    ) -> SaveFuture<'a> {
        let entry = TimeEntry::new(task_id, elapsed_secs, notes, Utc::now());
        Box::pin(async move { self.insert_time_entry(&entry).await })
    }
}
