//! In-process engine used by the console binary and the session tests.
//!
//! It keeps just enough state to answer the coordinator's calls the way a
//! real engine does (recorder count, active recordings, timeshift recorder)
//! and pushes the matching signals onto the [`SignalBus`].

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use parking_lot::Mutex;
use serde_json::{json, Value};

use tunecoord_protocol::signal::name;
use tunecoord_protocol::{method, ActiveRecording, EngineError};

use super::{EngineGateway, SignalBus};

/// Behaviour switches of the simulated engine.
#[derive(Debug, Clone)]
pub struct SimulatedOptions {
    /// Number of recorders reported by `Recording.getNumberOfRecorders`.
    pub recorders: u32,
    /// Emit `RecordingStatusChanged` when a recording stops.
    pub emit_stop_signal: bool,
    /// Keep reporting a stopped recording as active.
    pub keep_active_after_stop: bool,
    /// Delay before `Dvb.resolveService` answers.
    pub resolve_delay: Duration,
    /// Rating age reported for the current event.
    pub rating_age: u32,
    /// Answer `Recording.tune` with `tuned: false`; completion is left to a
    /// `TuneStatusChanged` signal.
    pub deferred_tune: bool,
}

impl Default for SimulatedOptions {
    fn default() -> Self {
        Self {
            recorders: 2,
            emit_stop_signal: true,
            keep_active_after_stop: false,
            resolve_delay: Duration::ZERO,
            rating_age: 0,
            deferred_tune: false,
        }
    }
}

#[derive(Default)]
struct SimState {
    active: Vec<ActiveRecording>,
    tuned_paths: Vec<i64>,
    next_recording: u32,
    timeshift_on: bool,
    timeshift_length: i64,
    elapsed: i64,
    failures: HashMap<String, String>,
    resolve: HashMap<String, String>,
    scheduled: Vec<String>,
    calls: Vec<(String, Vec<Value>)>,
}

/// A scriptable engine that lives inside the process.
pub struct SimulatedEngine {
    options: Mutex<SimulatedOptions>,
    state: Mutex<SimState>,
    signals: SignalBus,
}

impl SimulatedEngine {
    pub fn new(options: SimulatedOptions, signals: SignalBus) -> Self {
        Self {
            options: Mutex::new(options),
            state: Mutex::new(SimState::default()),
            signals,
        }
    }

    pub fn signals(&self) -> &SignalBus {
        &self.signals
    }

    pub fn update_options(&self, f: impl FnOnce(&mut SimulatedOptions)) {
        f(&mut self.options.lock());
    }

    /// Make every call to `method` fail with `reason`.
    pub fn fail(&self, method: &str, reason: &str) {
        self.state
            .lock()
            .failures
            .insert(method.to_string(), reason.to_string());
    }

    pub fn clear_failure(&self, method: &str) {
        self.state.lock().failures.remove(method);
    }

    /// Answer `Dvb.resolveService(from)` with `to`.
    pub fn remap_service(&self, from: &str, to: &str) {
        self.state
            .lock()
            .resolve
            .insert(from.to_string(), to.to_string());
    }

    pub fn add_scheduled(&self, uri: &str) {
        self.state.lock().scheduled.push(uri.to_string());
    }

    pub fn scheduled(&self) -> Vec<String> {
        self.state.lock().scheduled.clone()
    }

    pub fn set_timeshift_length(&self, secs: i64) {
        self.state.lock().timeshift_length = secs;
    }

    pub fn set_elapsed(&self, secs: i64) {
        self.state.lock().elapsed = secs;
    }

    pub fn active_recordings(&self) -> Vec<ActiveRecording> {
        self.state.lock().active.clone()
    }

    pub fn timeshift_on(&self) -> bool {
        self.state.lock().timeshift_on
    }

    /// Every call so far, in order.
    pub fn calls(&self) -> Vec<(String, Vec<Value>)> {
        self.state.lock().calls.clone()
    }

    /// Arguments of every call to `method`.
    pub fn calls_to(&self, method: &str) -> Vec<Vec<Value>> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, args)| args.clone())
            .collect()
    }

    /// Push a signal as if the engine emitted it.
    pub fn emit(&self, signal: &str, payload: Value) {
        self.signals.publish(signal, &payload);
    }

    fn status_payload(active: &[ActiveRecording]) -> Value {
        json!({
            "activerecordings": active
                .iter()
                .map(|r| json!({"path": r.path, "uri": r.uri}))
                .collect::<Vec<_>>()
        })
    }

    fn handle(&self, method: &str, args: &[Value]) -> Result<(Value, Vec<(&'static str, Value)>), EngineError> {
        let options = self.options.lock().clone();
        let mut state = self.state.lock();
        state.calls.push((method.to_string(), args.to_vec()));
        if let Some(reason) = state.failures.get(method) {
            return Err(EngineError::rejected(method, reason.clone()));
        }

        let arg_str = |i: usize| args.get(i).and_then(Value::as_str).unwrap_or_default().to_string();
        let mut signals = Vec::new();
        let data = match method {
            method::PLAYER_PLAY => {
                let uri = arg_str(0);
                let kind = if uri.starts_with("dvb://recording/") {
                    "dvbrecording"
                } else {
                    "dvblive"
                };
                signals.push((
                    name::PLAYER_STATUS_CHANGED,
                    json!({"state": "playing", "type": kind, "uri": uri}),
                ));
                json!(true)
            }
            method::PLAYER_START_TIMESHIFT => {
                state.timeshift_on = true;
                signals.push((
                    name::TIMESHIFT_RECORDER_STATUS_CHANGED,
                    json!({"timeshiftrecorderstate": "recording"}),
                ));
                json!(true)
            }
            method::PLAYER_STOP_TIMESHIFT => {
                if state.timeshift_on {
                    state.timeshift_on = false;
                    signals.push((
                        name::TIMESHIFT_RECORDER_STATUS_CHANGED,
                        json!({"timeshiftrecorderstate": "off"}),
                    ));
                }
                json!(true)
            }
            method::PLAYER_GET_TIMESHIFT_STATUS => json!({"length": state.timeshift_length}),
            method::PLAYER_GET_STATUS => json!({"content": {"elapsed": state.elapsed}}),
            method::PLAYER_GET_RATING_AGE => json!(options.rating_age),
            method::PLAYER_LIST_AUDIO_STREAMS => json!([
                {"index": 0, "language": "eng", "codec": "MPEG", "pid": 101, "ad": false}
            ]),
            method::PLAYER_LIST_SUBTITLE_STREAMS => json!([]),
            method::DVB_GET_FRONTEND => json!({"strength": 80, "integrity": 95}),
            method::DVB_RESOLVE_SERVICE => {
                let uri = arg_str(0);
                json!(state.resolve.get(&uri).cloned().unwrap_or(uri))
            }
            method::RECORDING_NUM_RECORDERS => json!(options.recorders),
            method::RECORDING_CHECK_AVAILABILITY => json!(true),
            method::RECORDING_TUNE => {
                let in_use = state.tuned_paths.len() + state.timeshift_on as usize;
                if in_use >= options.recorders as usize {
                    return Err(EngineError::rejected(method, "Failed to get a tuner to record"));
                }
                let path = (0..options.recorders as i64)
                    .find(|p| !state.tuned_paths.contains(p))
                    .unwrap_or(0);
                state.tuned_paths.push(path);
                json!({"tuned": !options.deferred_tune, "path": path})
            }
            method::RECORDING_UNTUNE => {
                let path = args.first().and_then(Value::as_i64).unwrap_or(-1);
                state.tuned_paths.retain(|p| *p != path);
                json!(true)
            }
            method::RECORDING_START => {
                let path = args.get(1).and_then(Value::as_i64).unwrap_or(-1);
                state.next_recording += 1;
                let uri = format!("dvb://recording/{}", state.next_recording);
                state.active.push(ActiveRecording {
                    path,
                    uri: uri.clone(),
                });
                signals.push((name::RECORDING_STATUS_CHANGED, Self::status_payload(&state.active)));
                json!(uri)
            }
            method::RECORDING_STOP => {
                let uri = arg_str(0);
                if !options.keep_active_after_stop {
                    let stopped: Vec<i64> = state
                        .active
                        .iter()
                        .filter(|r| r.uri == uri)
                        .map(|r| r.path)
                        .collect();
                    state.active.retain(|r| r.uri != uri);
                    state.tuned_paths.retain(|p| !stopped.contains(p));
                    if options.emit_stop_signal {
                        signals.push((name::RECORDING_STATUS_CHANGED, Self::status_payload(&state.active)));
                    }
                }
                json!(true)
            }
            method::RECORDING_GET_STATUS => Self::status_payload(&state.active),
            method::RECORDING_LIST_SCHEDULED => json!(state
                .scheduled
                .iter()
                .map(|uri| json!({"uri": uri}))
                .collect::<Vec<_>>()),
            method::RECORDING_REMOVE_SCHEDULED => {
                let uri = arg_str(0);
                state.scheduled.retain(|s| *s != uri);
                json!(true)
            }
            _ => json!(true),
        };
        Ok((data, signals))
    }
}

#[async_trait]
impl EngineGateway for SimulatedEngine {
    async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value, EngineError> {
        if method == method::DVB_RESOLVE_SERVICE {
            let delay = self.options.lock().resolve_delay;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
        let (data, signals) = self.handle(method, &args)?;
        debug!("[Engine] {} -> {}", method, data);
        for (signal, payload) in signals {
            self.signals.publish(signal, &payload);
        }
        Ok(data)
    }
}
