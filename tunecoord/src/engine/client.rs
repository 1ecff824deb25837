//! Typed wrapper over [`EngineGateway`].
//!
//! Every call logs its failure with the method and target so a failed
//! transition can be reconstructed from the log alone.

use std::sync::Arc;

use log::warn;
use serde_json::{json, Value};

use tunecoord_protocol::codec::{self, RecordingTune, ScheduledRecording};
use tunecoord_protocol::{method, ActiveRecording, EngineError, SignalStatus, Track, TrackType};

use super::EngineGateway;

/// Audio stream index that disables audio.
const NO_STREAM: u32 = 0xFFFF;

/// Cloneable typed engine client.
#[derive(Clone)]
pub struct EngineClient {
    gateway: Arc<dyn EngineGateway>,
}

impl EngineClient {
    pub fn new(gateway: Arc<dyn EngineGateway>) -> Self {
        Self { gateway }
    }

    async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, EngineError> {
        let target = args.first().map(|a| a.to_string()).unwrap_or_default();
        self.gateway.invoke(method, args).await.map_err(|e| {
            warn!("[Engine] {}({}) failed: {}", method, target, e);
            e
        })
    }

    async fn call_ok(&self, method: &str, args: Vec<Value>) -> Result<(), EngineError> {
        let data = self.call(method, args).await?;
        codec::expect_ok(method, &data)
    }

    // Player

    pub async fn play(&self, dvb_uri: &str, audio_description: bool) -> Result<(), EngineError> {
        self.call_ok(method::PLAYER_PLAY, vec![json!(dvb_uri), json!(audio_description)])
            .await
    }

    pub async fn stop(&self) -> Result<(), EngineError> {
        self.call_ok(method::PLAYER_STOP, vec![]).await
    }

    pub async fn pause(&self) -> Result<(), EngineError> {
        self.call_ok(method::PLAYER_PAUSE, vec![]).await
    }

    pub async fn resume(&self) -> Result<(), EngineError> {
        self.call_ok(method::PLAYER_RESUME, vec![]).await
    }

    pub async fn seek_to(&self, position_secs: i64) -> Result<(), EngineError> {
        self.call_ok(method::PLAYER_SEEK_TO, vec![json!(position_secs)])
            .await
    }

    /// Playback speed as a multiple of normal speed.
    pub async fn set_play_speed(&self, speed: f32) -> Result<(), EngineError> {
        let percent = (speed * 100.0).round() as i64;
        self.call_ok(method::PLAYER_SET_PLAY_SPEED, vec![json!(percent)])
            .await
    }

    pub async fn set_mute(&self, mute: bool) -> Result<(), EngineError> {
        self.call_ok(method::PLAYER_SET_MUTE, vec![json!(mute)]).await
    }

    /// Elapsed playback time in seconds.
    pub async fn elapsed(&self) -> Result<i64, EngineError> {
        let data = self.call(method::PLAYER_GET_STATUS, vec![]).await?;
        codec::decode_elapsed(&data)
    }

    pub async fn set_audio_stream(&self, index: Option<u32>) -> Result<(), EngineError> {
        self.call_ok(
            method::PLAYER_SET_AUDIO_STREAM,
            vec![json!(index.unwrap_or(NO_STREAM))],
        )
        .await
    }

    pub async fn set_subtitle_stream(&self, index: u32) -> Result<(), EngineError> {
        self.call_ok(method::PLAYER_SET_SUBTITLE_STREAM, vec![json!(index)])
            .await
    }

    pub async fn set_subtitles_on(&self, on: bool) -> Result<(), EngineError> {
        self.call_ok(method::PLAYER_SET_SUBTITLES_ON, vec![json!(on)])
            .await
    }

    pub async fn list_tracks(&self, track_type: TrackType) -> Result<Vec<Track>, EngineError> {
        let method = match track_type {
            TrackType::Audio => method::PLAYER_LIST_AUDIO_STREAMS,
            TrackType::Subtitle => method::PLAYER_LIST_SUBTITLE_STREAMS,
        };
        let data = self.call(method, vec![]).await?;
        codec::decode_tracks(track_type, &data)
    }

    /// Parental rating age of the current event, 0 when unrated.
    pub async fn rating_age(&self) -> Result<u32, EngineError> {
        let data = self.call(method::PLAYER_GET_RATING_AGE, vec![]).await?;
        codec::decode_u32(method::PLAYER_GET_RATING_AGE, &data)
    }

    // Timeshift

    pub async fn start_timeshift(&self) -> Result<(), EngineError> {
        self.call_ok(method::PLAYER_START_TIMESHIFT, vec![]).await
    }

    pub async fn stop_timeshift(&self, return_to_live: bool) -> Result<(), EngineError> {
        self.call_ok(method::PLAYER_STOP_TIMESHIFT, vec![json!(return_to_live)])
            .await
    }

    pub async fn play_timeshift(&self, paused: bool, from_current: bool) -> Result<(), EngineError> {
        self.call_ok(
            method::PLAYER_PLAY_TIMESHIFT,
            vec![json!(paused), json!(from_current)],
        )
        .await
    }

    /// Buffered timeshift length in seconds.
    pub async fn timeshift_length(&self) -> Result<i64, EngineError> {
        let data = self.call(method::PLAYER_GET_TIMESHIFT_STATUS, vec![]).await?;
        codec::decode_timeshift_length(&data)
    }

    pub async fn set_timeshift_buffer(&self, minutes: u32) -> Result<(), EngineError> {
        self.call_ok(method::PLAYER_SET_TIMESHIFT_BUFFER, vec![json!(minutes)])
            .await
    }

    // Frontend

    pub async fn frontend_status(&self) -> Result<SignalStatus, EngineError> {
        let data = self.call(method::DVB_GET_FRONTEND, vec![json!(0)]).await?;
        codec::decode_signal_status(&data)
    }

    /// Resolve a service after a network change; returns its current URI.
    pub async fn resolve_service(&self, dvb_uri: &str) -> Result<String, EngineError> {
        let data = self
            .call(method::DVB_RESOLVE_SERVICE, vec![json!(dvb_uri)])
            .await?;
        codec::decode_string(method::DVB_RESOLVE_SERVICE, &data)
    }

    // Recording

    pub async fn recording_check_availability(&self, dvb_uri: &str) -> Result<(), EngineError> {
        self.call_ok(method::RECORDING_CHECK_AVAILABILITY, vec![json!(dvb_uri)])
            .await
    }

    pub async fn recording_tune(&self, dvb_uri: &str) -> Result<RecordingTune, EngineError> {
        let data = self.call(method::RECORDING_TUNE, vec![json!(dvb_uri)]).await?;
        codec::decode_recording_tune(&data)
    }

    pub async fn recording_untune(&self, path: i64) -> Result<(), EngineError> {
        self.call_ok(method::RECORDING_UNTUNE, vec![json!(path)]).await
    }

    /// Start recording on an engine path; returns the recording URI.
    pub async fn recording_start(
        &self,
        dvb_uri: &str,
        path: i64,
        duration_secs: i64,
    ) -> Result<String, EngineError> {
        let data = self
            .call(
                method::RECORDING_START,
                vec![json!(dvb_uri), json!(path), json!(duration_secs)],
            )
            .await?;
        codec::decode_string(method::RECORDING_START, &data)
    }

    pub async fn recording_stop(&self, recording_uri: &str) -> Result<(), EngineError> {
        self.call_ok(method::RECORDING_STOP, vec![json!(recording_uri)])
            .await
    }

    pub async fn active_recordings(&self) -> Result<Vec<ActiveRecording>, EngineError> {
        let data = self.call(method::RECORDING_GET_STATUS, vec![]).await?;
        codec::decode_active_recordings(&data)
    }

    pub async fn number_of_recorders(&self) -> Result<u32, EngineError> {
        let data = self.call(method::RECORDING_NUM_RECORDERS, vec![]).await?;
        codec::decode_u32(method::RECORDING_NUM_RECORDERS, &data)
    }

    pub async fn scheduled_recordings(&self) -> Result<Vec<ScheduledRecording>, EngineError> {
        let data = self.call(method::RECORDING_LIST_SCHEDULED, vec![]).await?;
        codec::decode_scheduled(&data)
    }

    pub async fn remove_scheduled(&self, uri: &str) -> Result<(), EngineError> {
        self.call_ok(method::RECORDING_REMOVE_SCHEDULED, vec![json!(uri)])
            .await
    }
}
