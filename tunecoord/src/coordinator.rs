//! Coordinator: owns the ledger and the live-session slot and opens sessions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{info, warn};

use crate::catalog::CatalogHandle;
use crate::clock::{StreamClock, SystemClock};
use crate::config::{CoordinatorConfig, ParentalConfig};
use crate::directory::ChannelDirectory;
use crate::engine::{EngineClient, EngineGateway, SignalBus};
use crate::session::live::{self, LiveHandle};
use crate::session::recording::{self, RecordingHandle};
use crate::session::{EventSender, LiveSlot, SessionContext};
use crate::tuner::{CompliancePolicy, ResourceLedger};

/// Preference change capability implemented by the surrounding collaborator.
///
/// Returns true when the new value was applied.
pub trait OnChange<T> {
    fn on_change(&self, value: T) -> bool;
}

/// Tuning coordinator.
pub struct Coordinator {
    ctx: SessionContext,
    next_session_id: AtomicU64,
}

impl Coordinator {
    pub fn new(
        engine: Arc<dyn EngineGateway>,
        signals: SignalBus,
        directory: Arc<dyn ChannelDirectory>,
        catalog: CatalogHandle,
        config: CoordinatorConfig,
        compliance: CompliancePolicy,
        parental: ParentalConfig,
    ) -> Self {
        let ledger = Arc::new(ResourceLedger::new(config.fallback_recorders, compliance));
        Self {
            ctx: SessionContext {
                engine: EngineClient::new(engine),
                ledger,
                directory,
                catalog,
                config: Arc::new(config),
                parental,
                clock: Arc::new(SystemClock),
                signals,
                live: LiveSlot::default(),
            },
            next_session_id: AtomicU64::new(1),
        }
    }

    /// Replace the stream clock.
    pub fn with_clock(mut self, clock: Arc<dyn StreamClock>) -> Self {
        self.ctx.clock = clock;
        self
    }

    pub fn ledger(&self) -> &Arc<ResourceLedger> {
        &self.ctx.ledger
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.ctx.config
    }

    /// Size the path pool from the engine's recorder count.
    ///
    /// Falls back to the configured count when the engine does not answer.
    pub async fn discover_capacity(&self) -> u32 {
        let capacity = match self.ctx.engine.number_of_recorders().await {
            Ok(n) if n > 0 => n,
            Ok(_) | Err(_) => {
                warn!(
                    "[Coordinator] Recorder count unavailable, using {}",
                    self.ctx.config.fallback_recorders
                );
                self.ctx.config.fallback_recorders
            }
        };
        self.ctx.ledger.set_capacity(capacity);
        info!(
            "[Coordinator] {} path(s), recorder limit {}",
            capacity,
            self.ctx.ledger.effective_recorder_limit()
        );
        capacity
    }

    fn next_id(&self) -> u64 {
        self.next_session_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Open the live session. A previous live session is released first.
    pub async fn open_live_session(&self, events: EventSender) -> LiveHandle {
        if let Some(previous) = self.ctx.live.take() {
            info!("[Coordinator] Replacing live session {}", previous.id());
            previous.release().await;
        }
        let handle = live::spawn(self.next_id(), self.ctx.clone(), events);
        if let Some(raced) = self.ctx.live.replace(handle.clone()) {
            raced.release().await;
        }
        handle
    }

    /// Current live session, if one is open.
    pub fn live_session(&self) -> Option<LiveHandle> {
        self.ctx.live.current()
    }

    pub fn open_recording_session(&self, events: EventSender) -> RecordingHandle {
        recording::spawn(self.next_id(), self.ctx.clone(), events)
    }

    pub fn compliance_listener(&self) -> ComplianceListener {
        ComplianceListener {
            ledger: Arc::clone(&self.ctx.ledger),
        }
    }

    pub fn timeshift_listener(&self) -> TimeshiftListener {
        TimeshiftListener {
            live: self.ctx.live.clone(),
        }
    }

    /// Release the live session.
    pub async fn shutdown(&self) {
        if let Some(live) = self.ctx.live.take() {
            live.release().await;
        }
        info!("[Coordinator] Shut down");
    }
}

/// Applies compliance policy changes to the ledger.
pub struct ComplianceListener {
    ledger: Arc<ResourceLedger>,
}

impl OnChange<CompliancePolicy> for ComplianceListener {
    fn on_change(&self, value: CompliancePolicy) -> bool {
        if self.ledger.compliance() == value {
            return false;
        }
        self.ledger.set_compliance(value);
        true
    }
}

/// Forwards the timeshift enable preference to the live session.
pub struct TimeshiftListener {
    live: LiveSlot,
}

impl OnChange<bool> for TimeshiftListener {
    fn on_change(&self, value: bool) -> bool {
        let Some(live) = self.live.current() else {
            return false;
        };
        tokio::spawn(async move {
            live.set_timeshift_enabled(value).await;
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::session::{LiveState, RecordingState, SessionEvent, TimeshiftState};
    use crate::test_support::{next_event, Harness};
    use tunecoord_protocol::method;
    use tunecoord_protocol::signal::name;

    #[tokio::test(start_paused = true)]
    async fn test_single_path_never_starts_timeshift() {
        let h = Harness::new(1).await;
        let (live, mut events) = h.open_live().await;

        assert!(live.tune_channel(1).await);
        next_event(&mut events, |e| *e == SessionEvent::VideoAvailable).await;

        tokio::time::sleep(Duration::from_secs(5)).await;
        live.timeshift_pause().await;
        tokio::time::sleep(Duration::from_secs(3)).await;

        let status = live.status().await.unwrap();
        assert_eq!(status.state, LiveState::Playing);
        assert_eq!(status.timeshift, TimeshiftState::Stopped);
        assert!(h.engine.calls_to(method::PLAYER_START_TIMESHIFT).is_empty());
        assert_eq!(h.coordinator.ledger().snapshot().live, Some(0));

        // Capacity grows: the path monitor picks it up.
        h.coordinator.ledger().set_capacity(2);
        tokio::time::sleep(Duration::from_secs(2)).await;
        let status = live.status().await.unwrap();
        assert_eq!(status.timeshift, TimeshiftState::Recording);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recording_preempts_timeshift() {
        let h = Harness::new(2).await;
        let (live, mut live_events) = h.open_live().await;

        assert!(live.tune_channel(1).await);
        next_event(&mut live_events, |e| {
            matches!(e, SessionEvent::TimeShiftStatus(crate::session::TimeShiftStatus::Available))
        })
        .await;
        let snap = h.coordinator.ledger().snapshot();
        assert_eq!(snap.live, Some(0));
        assert_eq!(snap.timeshift, Some(1));

        let (rec, mut rec_events) = h.open_recording();
        rec.tune("tv://channel/2").await.unwrap();
        next_event(&mut rec_events, |e| {
            matches!(e, SessionEvent::RecordingTuned { channel: 2 })
        })
        .await;

        let snap = h.coordinator.ledger().snapshot();
        assert_eq!(snap.live, Some(0));
        assert_eq!(snap.recordings, vec![1]);
        assert_eq!(snap.timeshift, None);
        assert_eq!(live.status().await.unwrap().timeshift, TimeshiftState::Stopped);
        assert!(!h.engine.timeshift_on());
        assert_eq!(
            h.engine.calls_to(method::PLAYER_STOP_TIMESHIFT).last(),
            Some(&vec![serde_json::json!(false)])
        );

        rec.start_recording(None).await.unwrap();
        next_event(&mut rec_events, |e| {
            matches!(e, SessionEvent::RecordingStarted { .. })
        })
        .await;

        // While the recording holds the path the timeshift stays off.
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(live.status().await.unwrap().timeshift, TimeshiftState::Stopped);

        rec.stop_recording().await.unwrap();
        next_event(&mut rec_events, |e| {
            matches!(e, SessionEvent::RecordingStopped { catalog_id: Some(_) })
        })
        .await;
        assert_eq!(rec.status().await.unwrap().state, RecordingState::Idle);

        // The live session retries timeshift once the path is free.
        next_event(&mut live_events, |e| {
            matches!(e, SessionEvent::TimeShiftStatus(crate::session::TimeShiftStatus::Available))
        })
        .await;
        assert_eq!(h.coordinator.ledger().snapshot().timeshift, Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_finalize_retries_until_release() {
        let h = Harness::new(2).await;
        h.engine.update_options(|o| {
            o.keep_active_after_stop = true;
            o.emit_stop_signal = false;
        });

        let (rec, mut events) = h.open_recording();
        rec.tune("tv://program/10").await.unwrap();
        next_event(&mut events, |e| matches!(e, SessionEvent::RecordingTuned { .. })).await;
        rec.start_recording(None).await.unwrap();
        next_event(&mut events, |e| matches!(e, SessionEvent::RecordingStarted { .. })).await;
        let catalog_id = rec.status().await.unwrap().catalog_id.unwrap();

        // The program is one hour long, the duration bound follows it.
        assert_eq!(
            h.engine.calls_to(method::RECORDING_START)[0][2],
            serde_json::json!(3600)
        );

        h.clock.advance_ms(90_000);
        rec.stop_recording().await.unwrap();
        // Status is answered after the stop was handled.
        rec.status().await.unwrap();
        h.clock.advance_ms(60_000);

        tokio::time::sleep(Duration::from_secs(10)).await;
        let polls = h.engine.calls_to(method::RECORDING_GET_STATUS).len();
        assert!(polls >= 3, "finalize polled {} times", polls);
        assert_eq!(rec.status().await.unwrap().state, RecordingState::Finalizing);

        let row = h.catalog.lock().await.get_recording(catalog_id).unwrap().unwrap();
        assert_eq!(row.duration_ms, 90_000);

        rec.release().await;
        assert!(h.coordinator.ledger().snapshot().recordings.is_empty());
        let after_release = h.engine.calls_to(method::RECORDING_GET_STATUS).len();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(h.engine.calls_to(method::RECORDING_GET_STATUS).len(), after_release);

        // Cached elapsed time survives the forced stop.
        let row = h.catalog.lock().await.get_recording(catalog_id).unwrap().unwrap();
        assert_eq!(row.duration_ms, 90_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retune_drops_stale_probe() {
        let h = Harness::new(2).await;
        h.engine.update_options(|o| o.resolve_delay = Duration::from_secs(5));
        h.engine.remap_service("dvb://233a.1041.1041", "dvb://233a.1041.1042");
        let (live, mut events) = h.open_live().await;

        assert!(live.tune_channel(1).await);
        next_event(&mut events, |e| *e == SessionEvent::VideoAvailable).await;

        h.engine.emit(name::NETWORK_CHANGE, serde_json::json!({}));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(live.status().await.unwrap().state, LiveState::Tuning);

        // The user tunes elsewhere while the probe is still pending.
        assert!(live.tune_channel(3).await);
        tokio::time::sleep(Duration::from_secs(10)).await;

        let status = live.status().await.unwrap();
        assert_eq!(status.channel, Some(3));
        assert_eq!(status.state, LiveState::Playing);
        let plays = h.engine.calls_to(method::PLAYER_PLAY);
        assert!(plays.iter().all(|args| args[0] != serde_json::json!("dvb://233a.1041.1042")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_follows_moved_service() {
        let h = Harness::new(2).await;
        h.engine.remap_service("dvb://233a.1041.1041", "dvb://233a.1041.1042");
        let (live, mut events) = h.open_live().await;

        assert!(live.tune_channel(1).await);
        next_event(&mut events, |e| *e == SessionEvent::VideoAvailable).await;

        h.engine.emit(name::UPDATED_SERVICE, serde_json::json!({}));
        next_event(&mut events, |e| *e == SessionEvent::ChannelRetuned(2)).await;
        assert_eq!(live.status().await.unwrap().channel, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_timeout_surfaces_stream_changed() {
        let h = Harness::new(2).await;
        h.engine.update_options(|o| o.resolve_delay = Duration::from_secs(60));
        let (live, mut events) = h.open_live().await;

        assert!(live.tune_channel(1).await);
        next_event(&mut events, |e| *e == SessionEvent::VideoAvailable).await;

        h.engine.emit(name::NETWORK_CHANGE, serde_json::json!({}));
        next_event(&mut events, |e| *e == SessionEvent::StreamChanged).await;
        let status = live.status().await.unwrap();
        assert_eq!(status.state, LiveState::Stopped);
        assert_eq!(status.live_path, None);
        let snapshot = h.coordinator.ledger().snapshot();
        assert_eq!(snapshot.live, None);
        assert_eq!(snapshot.used(), 0);
    }

    #[tokio::test]
    async fn test_discover_capacity_and_fallback() {
        let h = Harness::new(3).await;
        assert_eq!(h.coordinator.ledger().capacity(), 3);

        h.engine.fail(method::RECORDING_NUM_RECORDERS, "unsupported");
        assert_eq!(h.coordinator.discover_capacity().await, 1);
    }

    #[tokio::test]
    async fn test_compliance_listener() {
        let h = Harness::new(2).await;
        let listener = h.coordinator.compliance_listener();
        let policy = CompliancePolicy {
            cas_ready: true,
            ..Default::default()
        };
        assert!(listener.on_change(policy));
        assert!(!listener.on_change(policy));
        assert_eq!(h.coordinator.ledger().effective_recorder_limit(), 1);
    }

    #[tokio::test]
    async fn test_second_live_session_replaces_first() {
        let h = Harness::new(2).await;
        let (first, _events) = h.open_live().await;
        let (second, _events2) = h.open_live().await;
        assert!(first.status().await.is_none());
        assert_eq!(h.coordinator.live_session().map(|l| l.id()), Some(second.id()));
    }
}
