//! Asynchronous engine signals, decoded into closed enumerations.
//!
//! The engine reports state as loose strings inside a JSON payload. Every
//! string field is mapped to an enum with an explicit `Unknown` variant so
//! unrecognized values are visible to the caller instead of being dropped.

use serde::Deserialize;
use serde_json::Value;

/// Signal names as emitted by the engine.
pub mod name {
    pub const PLAYER_STATUS_CHANGED: &str = "PlayerStatusChanged";
    pub const TIMESHIFT_RECORDER_STATUS_CHANGED: &str = "PlayerTimeshiftRecorderStatusChanged";
    pub const RECORDING_STATUS_CHANGED: &str = "RecordingStatusChanged";
    pub const RECORDING_DISK_FULL: &str = "RecordingDiskFull";
    pub const TUNE_STATUS_CHANGED: &str = "TuneStatusChanged";
    pub const NETWORK_CHANGE: &str = "DvbNetworkChange";
    pub const UPDATED_SERVICE: &str = "DvbUpdatedService";
    pub const SERVICE_RETUNED: &str = "ServiceRetuned";
}

/// `state` field of a `PlayerStatusChanged` signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerStatus {
    Playing,
    Blocked,
    BadSignal,
    Scrambled,
    Off,
    Starting,
    Unknown(String),
}

impl PlayerStatus {
    pub fn parse(value: &str) -> Self {
        match value {
            "playing" => PlayerStatus::Playing,
            "blocked" => PlayerStatus::Blocked,
            "badsignal" => PlayerStatus::BadSignal,
            // The engine has shipped both spellings.
            "scrambled" | "scambled" => PlayerStatus::Scrambled,
            "off" => PlayerStatus::Off,
            "starting" => PlayerStatus::Starting,
            other => PlayerStatus::Unknown(other.to_string()),
        }
    }
}

/// `type` field of a `playing` status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackKind {
    DvbLive,
    DvbRecording,
    DvbTimeshifting,
    Unknown(String),
}

impl PlaybackKind {
    pub fn parse(value: &str) -> Self {
        match value {
            "dvblive" => PlaybackKind::DvbLive,
            "dvbrecording" => PlaybackKind::DvbRecording,
            "dvbtimeshifting" => PlaybackKind::DvbTimeshifting,
            other => PlaybackKind::Unknown(other.to_string()),
        }
    }
}

/// State reported by `PlayerTimeshiftRecorderStatusChanged`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeshiftRecorderState {
    Recording,
    Off,
    Unknown(String),
}

impl TimeshiftRecorderState {
    pub fn parse(value: &str) -> Self {
        match value {
            "recording" => TimeshiftRecorderState::Recording,
            "off" => TimeshiftRecorderState::Off,
            other => TimeshiftRecorderState::Unknown(other.to_string()),
        }
    }
}

/// One entry of the engine's active recording list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ActiveRecording {
    pub path: i64,
    #[serde(default)]
    pub uri: String,
}

/// A decoded engine signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineSignal {
    PlayerStatusChanged {
        status: PlayerStatus,
        kind: PlaybackKind,
        uri: Option<String>,
        rating: Option<u32>,
    },
    TimeshiftRecorderStatusChanged {
        state: TimeshiftRecorderState,
    },
    RecordingStatusChanged {
        active: Vec<ActiveRecording>,
    },
    RecordingDiskFull,
    TuneStatusChanged {
        path: i64,
        ok: bool,
    },
    NetworkChange,
    UpdatedService,
    ServiceRetuned {
        uri: String,
    },
    Unknown {
        name: String,
    },
}

fn str_field<'a>(payload: &'a Value, key: &str) -> Option<&'a str> {
    payload.get(key).and_then(Value::as_str)
}

impl EngineSignal {
    /// Decode a named signal and its payload.
    pub fn decode(signal: &str, payload: &Value) -> Self {
        match signal {
            name::PLAYER_STATUS_CHANGED => EngineSignal::PlayerStatusChanged {
                status: PlayerStatus::parse(str_field(payload, "state").unwrap_or("off")),
                kind: PlaybackKind::parse(str_field(payload, "type").unwrap_or("dvblive")),
                uri: str_field(payload, "uri").map(str::to_string),
                rating: payload
                    .get("rating")
                    .and_then(Value::as_u64)
                    .map(|r| r as u32),
            },
            name::TIMESHIFT_RECORDER_STATUS_CHANGED => {
                EngineSignal::TimeshiftRecorderStatusChanged {
                    state: TimeshiftRecorderState::parse(
                        str_field(payload, "timeshiftrecorderstate").unwrap_or("off"),
                    ),
                }
            }
            name::RECORDING_STATUS_CHANGED => EngineSignal::RecordingStatusChanged {
                active: payload
                    .get("activerecordings")
                    .cloned()
                    .and_then(|v| serde_json::from_value(v).ok())
                    .unwrap_or_default(),
            },
            name::RECORDING_DISK_FULL => EngineSignal::RecordingDiskFull,
            name::TUNE_STATUS_CHANGED => EngineSignal::TuneStatusChanged {
                path: payload.get("path").and_then(Value::as_i64).unwrap_or(-1),
                ok: str_field(payload, "state") == Some("ok"),
            },
            name::NETWORK_CHANGE => EngineSignal::NetworkChange,
            name::UPDATED_SERVICE => EngineSignal::UpdatedService,
            name::SERVICE_RETUNED => EngineSignal::ServiceRetuned {
                uri: str_field(payload, "uri").unwrap_or_default().to_string(),
            },
            other => EngineSignal::Unknown {
                name: other.to_string(),
            },
        }
    }

    /// Engine-side name of this signal.
    pub fn name(&self) -> &str {
        match self {
            EngineSignal::PlayerStatusChanged { .. } => name::PLAYER_STATUS_CHANGED,
            EngineSignal::TimeshiftRecorderStatusChanged { .. } => {
                name::TIMESHIFT_RECORDER_STATUS_CHANGED
            }
            EngineSignal::RecordingStatusChanged { .. } => name::RECORDING_STATUS_CHANGED,
            EngineSignal::RecordingDiskFull => name::RECORDING_DISK_FULL,
            EngineSignal::TuneStatusChanged { .. } => name::TUNE_STATUS_CHANGED,
            EngineSignal::NetworkChange => name::NETWORK_CHANGE,
            EngineSignal::UpdatedService => name::UPDATED_SERVICE,
            EngineSignal::ServiceRetuned { .. } => name::SERVICE_RETUNED,
            EngineSignal::Unknown { name } => name,
        }
    }

    /// True for signals that start the stream-change workflow.
    pub fn is_stream_change(&self) -> bool {
        matches!(self, EngineSignal::NetworkChange | EngineSignal::UpdatedService)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_player_status() {
        let sig = EngineSignal::decode(
            "PlayerStatusChanged",
            &json!({"state": "playing", "type": "dvblive", "uri": "dvb://233a.1041.1041"}),
        );
        assert_eq!(
            sig,
            EngineSignal::PlayerStatusChanged {
                status: PlayerStatus::Playing,
                kind: PlaybackKind::DvbLive,
                uri: Some("dvb://233a.1041.1041".into()),
                rating: None,
            }
        );

        let blocked = EngineSignal::decode("PlayerStatusChanged", &json!({"state": "blocked", "rating": 15}));
        assert!(matches!(
            blocked,
            EngineSignal::PlayerStatusChanged { status: PlayerStatus::Blocked, rating: Some(15), .. }
        ));
    }

    #[test]
    fn test_unrecognized_values_are_explicit() {
        assert_eq!(PlayerStatus::parse("scambled"), PlayerStatus::Scrambled);
        assert_eq!(PlayerStatus::parse("paused"), PlayerStatus::Unknown("paused".into()));
        assert_eq!(
            TimeshiftRecorderState::parse("starting"),
            TimeshiftRecorderState::Unknown("starting".into())
        );
        let sig = EngineSignal::decode("DvbUpdatedEventNow", &json!({}));
        assert_eq!(sig.name(), "DvbUpdatedEventNow");
        assert!(matches!(sig, EngineSignal::Unknown { .. }));
    }

    #[test]
    fn test_decode_recording_signals() {
        let sig = EngineSignal::decode(
            "RecordingStatusChanged",
            &json!({"activerecordings": [{"path": 1, "uri": "dvb://1.2.3"}]}),
        );
        assert_eq!(
            sig,
            EngineSignal::RecordingStatusChanged {
                active: vec![ActiveRecording { path: 1, uri: "dvb://1.2.3".into() }]
            }
        );

        let tuned = EngineSignal::decode("TuneStatusChanged", &json!({"state": "ok", "path": 2}));
        assert_eq!(tuned, EngineSignal::TuneStatusChanged { path: 2, ok: true });
        assert!(EngineSignal::decode("DvbUpdatedService", &json!({})).is_stream_change());
    }
}
