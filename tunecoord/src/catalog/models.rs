//! Catalog model definitions.

use serde::Serialize;

/// Recorded program row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordedProgram {
    pub id: i64,
    pub channel_id: i64,
    pub program_id: Option<i64>,
    pub title: Option<String>,
    pub recording_uri: String,
    pub dvb_uri: String,
    pub start_time_ms: i64,
    pub end_time_ms: Option<i64>,
    pub duration_ms: i64,
    /// False once the engine lost the recording's storage.
    pub stored: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Values for a new catalog entry.
#[derive(Debug, Clone)]
pub struct NewRecording<'a> {
    pub channel_id: i64,
    pub program_id: Option<i64>,
    pub title: Option<&'a str>,
    pub recording_uri: &'a str,
    pub dvb_uri: &'a str,
    pub start_time_ms: i64,
}
