//! Decoding of engine response payloads.
//!
//! Each helper takes the `data` value returned by a gateway call and turns it
//! into a typed result. Missing or mistyped fields become
//! [`EngineError::UnexpectedShape`] so callers can treat them as `Unknown`.

use serde::Deserialize;
use serde_json::Value;

use crate::error::EngineError;
use crate::method;
use crate::signal::ActiveRecording;
use crate::types::{SignalStatus, Track, TrackType};

/// Result of `Recording.tune`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RecordingTune {
    pub tuned: bool,
    pub path: i64,
}

/// Entry of `Recording.getListOfScheduledRecordings`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ScheduledRecording {
    pub uri: String,
}

fn from_value<T: serde::de::DeserializeOwned>(method: &str, data: &Value) -> Result<T, EngineError> {
    serde_json::from_value(data.clone()).map_err(|e| EngineError::shape(method, e.to_string()))
}

/// Treat a boolean `false` reply as a rejection; anything else succeeds.
pub fn expect_ok(method: &str, data: &Value) -> Result<(), EngineError> {
    match data {
        Value::Bool(false) => Err(EngineError::rejected(method, "returned false")),
        _ => Ok(()),
    }
}

pub fn decode_recording_tune(data: &Value) -> Result<RecordingTune, EngineError> {
    from_value(method::RECORDING_TUNE, data)
}

pub fn decode_active_recordings(data: &Value) -> Result<Vec<ActiveRecording>, EngineError> {
    let list = data
        .get("activerecordings")
        .ok_or_else(|| EngineError::shape(method::RECORDING_GET_STATUS, "missing activerecordings"))?;
    from_value(method::RECORDING_GET_STATUS, list)
}

/// True if `path` appears in an active recording list.
pub fn is_path_active(active: &[ActiveRecording], path: i64) -> bool {
    active.iter().any(|r| r.path == path)
}

/// Buffered timeshift length in seconds.
pub fn decode_timeshift_length(data: &Value) -> Result<i64, EngineError> {
    data.get("length")
        .and_then(Value::as_i64)
        .ok_or_else(|| EngineError::shape(method::PLAYER_GET_TIMESHIFT_STATUS, "missing length"))
}

/// Elapsed playback time in seconds from `Player.getStatus`.
pub fn decode_elapsed(data: &Value) -> Result<i64, EngineError> {
    data.get("content")
        .and_then(|c| c.get("elapsed"))
        .and_then(Value::as_i64)
        .ok_or_else(|| EngineError::shape(method::PLAYER_GET_STATUS, "missing content.elapsed"))
}

pub fn decode_u32(method: &str, data: &Value) -> Result<u32, EngineError> {
    data.as_u64()
        .map(|v| v as u32)
        .ok_or_else(|| EngineError::shape(method, format!("expected integer, got {}", data)))
}

pub fn decode_string(method: &str, data: &Value) -> Result<String, EngineError> {
    data.as_str()
        .map(str::to_string)
        .ok_or_else(|| EngineError::shape(method, format!("expected string, got {}", data)))
}

#[derive(Deserialize)]
struct RawStream {
    index: u32,
    #[serde(default)]
    language: String,
    #[serde(default)]
    codec: String,
    #[serde(default)]
    pid: u16,
    #[serde(default)]
    ad: bool,
}

pub fn decode_tracks(track_type: TrackType, data: &Value) -> Result<Vec<Track>, EngineError> {
    let method = match track_type {
        TrackType::Audio => method::PLAYER_LIST_AUDIO_STREAMS,
        TrackType::Subtitle => method::PLAYER_LIST_SUBTITLE_STREAMS,
    };
    let raw: Vec<RawStream> = from_value(method, data)?;
    Ok(raw
        .into_iter()
        .map(|s| Track {
            track_type,
            index: s.index,
            language: s.language,
            codec: s.codec,
            pid: s.pid,
            ad: s.ad,
        })
        .collect())
}

pub fn decode_signal_status(data: &Value) -> Result<SignalStatus, EngineError> {
    // An empty object means the frontend is not locked.
    if data.as_object().map(|o| o.is_empty()).unwrap_or(false) {
        return Ok(SignalStatus::default());
    }
    from_value(method::DVB_GET_FRONTEND, data)
}

pub fn decode_scheduled(data: &Value) -> Result<Vec<ScheduledRecording>, EngineError> {
    from_value(method::RECORDING_LIST_SCHEDULED, data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_expect_ok() {
        assert!(expect_ok("Player.play", &json!(true)).is_ok());
        assert!(expect_ok("Player.play", &Value::Null).is_ok());
        assert!(matches!(
            expect_ok("Player.play", &json!(false)),
            Err(EngineError::Rejected { .. })
        ));
    }

    #[test]
    fn test_decode_status_shapes() {
        let status = json!({"activerecordings": [{"path": 0, "uri": "dvb://1.1.1"}, {"path": 2}]});
        let active = decode_active_recordings(&status).unwrap();
        assert!(is_path_active(&active, 2));
        assert!(!is_path_active(&active, 1));
        assert!(decode_active_recordings(&json!({})).is_err());

        assert_eq!(decode_timeshift_length(&json!({"length": 4000})).unwrap(), 4000);
        assert_eq!(decode_elapsed(&json!({"content": {"elapsed": 12}})).unwrap(), 12);
        assert!(decode_elapsed(&json!({"content": {}})).is_err());
    }

    #[test]
    fn test_decode_tune_and_tracks() {
        let tune = decode_recording_tune(&json!({"tuned": false, "path": 3})).unwrap();
        assert_eq!(tune, RecordingTune { tuned: false, path: 3 });
        assert!(decode_recording_tune(&json!("busy")).is_err());

        let tracks = decode_tracks(
            TrackType::Audio,
            &json!([{"index": 0, "language": "eng", "codec": "AAC", "pid": 101, "ad": false},
                    {"index": 1, "language": "eng", "ad": true}]),
        )
        .unwrap();
        assert_eq!(tracks.len(), 2);
        assert!(tracks[0].is_complete());
        assert!(!tracks[1].is_complete());

        assert_eq!(decode_signal_status(&json!({})).unwrap(), SignalStatus::default());
        assert_eq!(
            decode_signal_status(&json!({"strength": 70, "integrity": 90})).unwrap().integrity,
            90
        );
    }
}
