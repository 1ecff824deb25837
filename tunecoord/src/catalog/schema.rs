//! Catalog schema definitions.

/// SQL schema for the recording catalog.
pub const SCHEMA_SQL: &str = r#"
-- Recorded programs
CREATE TABLE IF NOT EXISTS recorded_programs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    channel_id INTEGER NOT NULL,
    program_id INTEGER,                  -- EPG event (NULL = whole-channel recording)
    title TEXT,
    recording_uri TEXT UNIQUE NOT NULL,  -- Engine recording identifier
    dvb_uri TEXT NOT NULL,               -- Transport identifier that was recorded
    start_time_ms INTEGER NOT NULL,
    end_time_ms INTEGER,
    duration_ms INTEGER DEFAULT 0,
    -- Metadata
    created_at INTEGER DEFAULT (strftime('%s', 'now')),
    updated_at INTEGER DEFAULT (strftime('%s', 'now'))
);

CREATE INDEX IF NOT EXISTS idx_recorded_programs_channel ON recorded_programs(channel_id);
"#;
