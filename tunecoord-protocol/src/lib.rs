//! Engine gateway boundary definitions for the tune/timeshift/recording
//! coordinator.
//!
//! The engine is reached through an opaque request/response call that
//! returns a JSON value, plus an independent stream of named signals. This
//! crate fixes the vocabulary used on both channels:
//!
//! - [`method`]: engine method names
//! - [`EngineSignal`]: signals decoded into closed enums with `Unknown` variants
//! - [`codec`]: typed decoding of response payloads
//! - [`CoordError`] / [`EngineError`]: the failure taxonomy
//!
//! ```rust
//! use tunecoord_protocol::{EngineSignal, PlayerStatus};
//! use serde_json::json;
//!
//! let sig = EngineSignal::decode("PlayerStatusChanged", &json!({"state": "badsignal"}));
//! assert!(matches!(
//!     sig,
//!     EngineSignal::PlayerStatusChanged { status: PlayerStatus::BadSignal, .. }
//! ));
//! ```

pub mod codec;
pub mod error;
pub mod method;
pub mod signal;
pub mod types;

pub use codec::{RecordingTune, ScheduledRecording};
pub use error::{CoordError, EngineError, RecordingErrorCode};
pub use signal::{
    ActiveRecording, EngineSignal, PlaybackKind, PlayerStatus, TimeshiftRecorderState,
};
pub use types::{
    channel_schedule_uri, Channel, ChannelId, Program, ProgramId, ServiceType, SignalStatus,
    TargetRef, Track, TrackType,
};
