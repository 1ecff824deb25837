//! Recorded program operations.

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use super::{Catalog, CatalogError, NewRecording, RecordedProgram, Result};

const COLUMNS: &str = "id, channel_id, program_id, title, recording_uri, dvb_uri, start_time_ms, end_time_ms, duration_ms, stored, created_at, updated_at";

fn row_to_recording(row: &Row<'_>) -> rusqlite::Result<RecordedProgram> {
    Ok(RecordedProgram {
        id: row.get(0)?,
        channel_id: row.get(1)?,
        program_id: row.get(2)?,
        title: row.get(3)?,
        recording_uri: row.get(4)?,
        dvb_uri: row.get(5)?,
        start_time_ms: row.get(6)?,
        end_time_ms: row.get(7)?,
        duration_ms: row.get::<_, Option<i64>>(8)?.unwrap_or(0),
        stored: row.get::<_, Option<i64>>(9)?.unwrap_or(1) != 0,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

impl Catalog {
    /// Insert a new recording entry.
    pub fn insert_recording(&self, rec: &NewRecording<'_>) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO recorded_programs (channel_id, program_id, title, recording_uri, dvb_uri, start_time_ms) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                rec.channel_id,
                rec.program_id,
                rec.title,
                rec.recording_uri,
                rec.dvb_uri,
                rec.start_time_ms,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Update end time and duration of a recording.
    pub fn update_recording_end(
        &self,
        id: i64,
        end_time_ms: i64,
        duration_ms: i64,
        stored: bool,
    ) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE recorded_programs SET end_time_ms = ?2, duration_ms = ?3, stored = ?4, updated_at = ?5 WHERE id = ?1",
            params![id, end_time_ms, duration_ms, stored as i64, Utc::now().timestamp()],
        )?;
        if changed == 0 {
            return Err(CatalogError::NotFound(id));
        }
        Ok(())
    }

    pub fn get_recording(&self, id: i64) -> Result<Option<RecordedProgram>> {
        let sql = format!("SELECT {} FROM recorded_programs WHERE id = ?1", COLUMNS);
        Ok(self
            .conn
            .query_row(&sql, params![id], row_to_recording)
            .optional()?)
    }

    pub fn find_by_recording_uri(&self, uri: &str) -> Result<Option<RecordedProgram>> {
        let sql = format!(
            "SELECT {} FROM recorded_programs WHERE recording_uri = ?1",
            COLUMNS
        );
        Ok(self
            .conn
            .query_row(&sql, params![uri], row_to_recording)
            .optional()?)
    }

    pub fn list_recordings(&self) -> Result<Vec<RecordedProgram>> {
        let sql = format!(
            "SELECT {} FROM recorded_programs ORDER BY start_time_ms DESC",
            COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], row_to_recording)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}
