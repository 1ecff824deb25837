//! Explicit recording session: tune, start, stop and finalize.

use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use tunecoord_protocol::codec::is_path_active;
use tunecoord_protocol::{
    channel_schedule_uri, ActiveRecording, CoordError, EngineError, EngineSignal, ProgramId,
    TargetRef,
};

use super::events::{EventSender, EventSink, SessionEvent};
use super::mailbox::{mailbox, MailMessage, MailboxSender};
use super::{spawn_signal_forwarder, SessionContext};
use crate::catalog::NewRecording;
use crate::directory::{self, ResolvedTarget};
use crate::tuner::{LedgerError, PathClaim, PathId};

/// Busy info when the recorder limit is reached.
pub const BUSY_NO_RECORDER: &str = "No recording path available, no recorder";
/// Busy info when every tuner/demux path is taken.
pub const BUSY_NO_TUNER: &str = "No recording path available, no tuner/demux";

/// Engine reply text for `Recording.tune` without a free tuner.
const REASON_NO_TUNER: &str = "Failed to get a tuner to record";
/// Engine reply text for `Recording.tune` with an unusable service.
const REASON_INVALID_RESOURCE: &str = "Invalid resource";

/// Recording session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    Idle,
    Tuning,
    Recording,
    Stopping,
    Finalizing,
    Failed,
}

/// Snapshot returned by [`RecordingHandle::status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingStatus {
    pub state: RecordingState,
    pub path: Option<PathId>,
    pub tuned: bool,
    pub started: bool,
    pub recording_uri: Option<String>,
    pub catalog_id: Option<i64>,
}

pub(crate) enum RecMsg {
    Tune { target: TargetRef },
    Start { program: Option<ProgramId> },
    Stop,
    Finalize,
    Progress,
    Signal(EngineSignal),
    Status(oneshot::Sender<RecordingStatus>),
    Release { done: oneshot::Sender<()> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum RecKind {
    Command,
    Finalize,
    Progress,
    Signal,
    Query,
    Release,
}

impl MailMessage for RecMsg {
    type Kind = RecKind;

    fn kind(&self) -> RecKind {
        match self {
            RecMsg::Tune { .. } | RecMsg::Start { .. } | RecMsg::Stop => RecKind::Command,
            RecMsg::Finalize => RecKind::Finalize,
            RecMsg::Progress => RecKind::Progress,
            RecMsg::Signal(_) => RecKind::Signal,
            RecMsg::Status(_) => RecKind::Query,
            RecMsg::Release { .. } => RecKind::Release,
        }
    }
}

/// Handle to a running recording session.
#[derive(Clone)]
pub struct RecordingHandle {
    id: u64,
    tx: MailboxSender<RecMsg>,
}

impl RecordingHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Tune a recorder to a channel or program reference.
    ///
    /// Malformed references fail immediately with [`CoordError::Invalid`];
    /// everything else is reported as session events.
    pub async fn tune(&self, target: &str) -> Result<(), CoordError> {
        let target = target.parse::<TargetRef>()?;
        self.post(RecMsg::Tune { target }).await
    }

    /// Start recording. `program` bounds the duration; without it the
    /// tuned program (or the configured maximum) is used.
    pub async fn start_recording(&self, program: Option<&str>) -> Result<(), CoordError> {
        let program = match program.map(str::parse::<TargetRef>).transpose()? {
            None => None,
            Some(TargetRef::Program(id)) => Some(id),
            Some(other) => {
                return Err(CoordError::Invalid(format!("not a program: {}", other)));
            }
        };
        self.post(RecMsg::Start { program }).await
    }

    pub async fn stop_recording(&self) -> Result<(), CoordError> {
        self.post(RecMsg::Stop).await
    }

    pub async fn status(&self) -> Option<RecordingStatus> {
        let (reply, rx) = oneshot::channel();
        self.post(RecMsg::Status(reply)).await.ok()?;
        rx.await.ok()
    }

    /// Stop or untune as needed and end the session. Pending retries are
    /// dropped.
    pub async fn release(&self) {
        self.tx.clear();
        let (done, rx) = oneshot::channel();
        if self.tx.post(RecMsg::Release { done }).await.is_ok() {
            let _ = rx.await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn post(&self, msg: RecMsg) -> Result<(), CoordError> {
        self.tx
            .post(msg)
            .await
            .map_err(|e| CoordError::Unknown(format!("recording session {}: {}", self.id, e)))
    }
}

struct RecordingSession {
    tag: String,
    ctx: SessionContext,
    tx: MailboxSender<RecMsg>,
    events: EventSink,
    state: RecordingState,
    target: Option<ResolvedTarget>,
    claim: Option<PathClaim>,
    /// Recorder index on the engine side.
    engine_path: Option<i64>,
    tuned: bool,
    started: bool,
    recording_uri: Option<String>,
    stop_and_save_received: bool,
    catalog_id: Option<i64>,
    started_at_ms: i64,
    /// End time cached when the stop was issued.
    stopped_at_ms: Option<i64>,
    duration_bound_secs: i64,
}

/// Start a recording session task.
pub(crate) fn spawn(id: u64, ctx: SessionContext, events: EventSender) -> RecordingHandle {
    let (tx, mut mailbox) = mailbox::<RecMsg>(ctx.config.mailbox_capacity);
    let tag = format!("[Recording {}]", id);
    let cancel = CancellationToken::new();
    spawn_signal_forwarder(
        tag.clone(),
        &ctx.signals,
        tx.clone(),
        cancel.clone(),
        |signal| {
            let wanted = matches!(
                signal,
                EngineSignal::RecordingStatusChanged { .. }
                    | EngineSignal::RecordingDiskFull
                    | EngineSignal::TuneStatusChanged { .. }
            );
            wanted.then(|| RecMsg::Signal(signal))
        },
    );

    let handle = RecordingHandle { id, tx: tx.clone() };
    let mut session = RecordingSession {
        tag: tag.clone(),
        events: EventSink::new(tag, events),
        duration_bound_secs: ctx.config.max_record_duration_secs,
        ctx,
        tx,
        state: RecordingState::Idle,
        target: None,
        claim: None,
        engine_path: None,
        tuned: false,
        started: false,
        recording_uri: None,
        stop_and_save_received: false,
        catalog_id: None,
        started_at_ms: 0,
        stopped_at_ms: None,
    };

    tokio::spawn(async move {
        info!("{} Session opened", session.tag);
        while let Some(msg) = mailbox.recv().await {
            if !session.handle(msg).await {
                break;
            }
        }
        cancel.cancel();
        mailbox.close();
        info!("{} Session closed", session.tag);
    });

    handle
}

impl RecordingSession {
    async fn handle(&mut self, msg: RecMsg) -> bool {
        match msg {
            RecMsg::Tune { target } => self.on_tune(target).await,
            RecMsg::Start { program } => self.on_start(program).await,
            RecMsg::Stop => self.on_stop().await,
            RecMsg::Finalize => self.on_finalize().await,
            RecMsg::Progress => {
                if self.state == RecordingState::Recording {
                    self.persist(self.ctx.clock.now_ms()).await;
                    self.schedule(RecMsg::Progress);
                }
            }
            RecMsg::Signal(signal) => self.on_signal(signal).await,
            RecMsg::Status(reply) => {
                let _ = reply.send(self.status());
            }
            RecMsg::Release { done } => {
                self.on_release().await;
                let _ = done.send(());
                return false;
            }
        }
        true
    }

    fn status(&self) -> RecordingStatus {
        RecordingStatus {
            state: self.state,
            path: self.claim.map(|c| c.path()),
            tuned: self.tuned,
            started: self.started,
            recording_uri: self.recording_uri.clone(),
            catalog_id: self.catalog_id,
        }
    }

    fn schedule(&self, msg: RecMsg) {
        if let Err(e) = self.tx.post_delayed(msg, self.ctx.config.finalize_retry()) {
            debug!("{} Not scheduling: {}", self.tag, e);
        }
    }

    fn fail(&mut self, err: CoordError) {
        warn!("{} {}", self.tag, err);
        self.state = RecordingState::Failed;
        self.events.emit(SessionEvent::Error(err));
    }

    fn fail_busy(&mut self, info: &str) {
        warn!("{} {}", self.tag, info);
        self.state = RecordingState::Failed;
        self.events.busy(info);
    }

    fn release_claim(&mut self) {
        if let Some(claim) = self.claim.take() {
            self.ctx.ledger.release(&claim);
        }
    }

    // Tuning

    async fn on_tune(&mut self, target: TargetRef) {
        if self.tuned || self.started || self.state == RecordingState::Tuning {
            self.events.emit(SessionEvent::Error(CoordError::Invalid(format!(
                "session already tuned, ignoring {}",
                target
            ))));
            return;
        }
        let resolved = match directory::resolve(self.ctx.directory.as_ref(), target) {
            Ok(resolved) => resolved,
            Err(e) => return self.fail(e),
        };
        info!("{} Tuning to {} ({})", self.tag, target, resolved.dvb_uri());

        if let Some(live) = self.ctx.live.current() {
            live.cancel_timeshift_schedule();
        }

        // Count this recording against the limit while availability is
        // checked, so a timeshift start cannot take the path meanwhile.
        // Nothing is claimed or preempted until the engine says yes.
        self.ctx.ledger.begin_pending_explicit();
        let available = self
            .ctx
            .engine
            .recording_check_availability(resolved.dvb_uri())
            .await;
        if let Err(e) = available {
            self.ctx.ledger.end_pending_explicit();
            return self.fail_busy(&format!("{}: {}", BUSY_NO_TUNER, e.reason()));
        }
        let claimed = self
            .ctx
            .ledger
            .claim_recording_preempting(!self.ctx.config.timeshift_priority_high);
        self.ctx.ledger.end_pending_explicit();

        let claimed = match claimed {
            Ok(claimed) => claimed,
            Err(LedgerError::RecorderLimit { .. }) => return self.fail_busy(BUSY_NO_RECORDER),
            Err(_) => return self.fail_busy(BUSY_NO_TUNER),
        };
        self.claim = Some(claimed.claim);

        if claimed.preempted.is_some() {
            let acked = match self.ctx.live.current() {
                Some(live) => {
                    live.preempt_timeshift(Duration::from_millis(
                        self.ctx.config.preempt_ack_timeout_ms,
                    ))
                    .await
                }
                None => false,
            };
            if !acked {
                warn!("{} Timeshift preemption not acknowledged", self.tag);
            }
        }

        self.state = RecordingState::Tuning;
        self.target = Some(resolved);
        let uri = self.target.as_ref().map(|t| t.dvb_uri().to_string()).unwrap_or_default();
        match self.ctx.engine.recording_tune(&uri).await {
            Ok(tune) => {
                self.engine_path = Some(tune.path);
                if tune.tuned {
                    self.on_tuned();
                } else {
                    debug!("{} Waiting for tune on engine path {}", self.tag, tune.path);
                }
            }
            Err(e) => {
                self.release_claim();
                self.target = None;
                match e {
                    EngineError::Rejected { reason, .. } if reason.contains(REASON_NO_TUNER) => {
                        self.fail_busy(BUSY_NO_TUNER)
                    }
                    EngineError::Rejected { reason, .. }
                        if reason.contains(REASON_INVALID_RESOURCE) =>
                    {
                        self.fail(CoordError::Invalid(reason))
                    }
                    other => self.fail(CoordError::Unknown(other.to_string())),
                }
            }
        }
    }

    fn on_tuned(&mut self) {
        self.tuned = true;
        if let Some(target) = &self.target {
            info!(
                "{} Tuned {} on engine path {:?}",
                self.tag,
                target.dvb_uri(),
                self.engine_path
            );
            self.events.emit(SessionEvent::RecordingTuned {
                channel: target.channel.id,
            });
        }
    }

    // Recording

    async fn on_start(&mut self, program: Option<ProgramId>) {
        if !self.tuned || self.started {
            self.events.emit(SessionEvent::Error(CoordError::Invalid(
                "start requires a tuned, idle recorder".into(),
            )));
            return;
        }
        let (Some(target), Some(path)) = (self.target.clone(), self.engine_path) else {
            return;
        };

        let program = program
            .and_then(|id| self.ctx.directory.program(id))
            .or_else(|| target.program.clone());
        self.duration_bound_secs = program
            .as_ref()
            .map(|p| p.duration_secs())
            .filter(|secs| *secs > 0)
            .unwrap_or(self.ctx.config.max_record_duration_secs);

        let result = self
            .ctx
            .engine
            .recording_start(target.dvb_uri(), path, self.duration_bound_secs)
            .await;
        let recording_uri = match result {
            Ok(uri) => uri,
            Err(e) => {
                error!("{} Start failed: {}", self.tag, e);
                let _ = self.ctx.engine.recording_untune(path).await;
                self.tuned = false;
                self.engine_path = None;
                self.release_claim();
                return self.fail(CoordError::from_start_failure(&e));
            }
        };

        info!(
            "{} Recording {} for up to {}s",
            self.tag, recording_uri, self.duration_bound_secs
        );
        self.started = true;
        self.state = RecordingState::Recording;
        self.started_at_ms = self.ctx.clock.now_ms();
        self.stopped_at_ms = None;
        self.stop_and_save_received = false;
        self.recording_uri = Some(recording_uri.clone());

        let new = NewRecording {
            channel_id: target.channel.id,
            program_id: program.as_ref().map(|p| p.id),
            title: program.as_ref().map(|p| p.title.as_str()),
            recording_uri: &recording_uri,
            dvb_uri: target.dvb_uri(),
            start_time_ms: self.started_at_ms,
        };
        let inserted = self.ctx.catalog.lock().await.insert_recording(&new);
        match inserted {
            Ok(id) => self.catalog_id = Some(id),
            Err(e) => error!("{} Catalog insert failed: {}", self.tag, e),
        }

        self.events
            .emit(SessionEvent::RecordingStarted { recording_uri });
        self.schedule(RecMsg::Progress);
    }

    /// Write end time and duration to the catalog.
    async fn persist(&self, end_ms: i64) {
        let Some(id) = self.catalog_id else {
            return;
        };
        let duration_ms = (end_ms - self.started_at_ms).max(0);
        let result = self
            .ctx
            .catalog
            .lock()
            .await
            .update_recording_end(id, end_ms, duration_ms, true);
        match result {
            Ok(()) => debug!("{} Persisted {} ms", self.tag, duration_ms),
            Err(e) => error!("{} Catalog update failed: {}", self.tag, e),
        }
    }

    async fn on_stop(&mut self) {
        if !self.started {
            // A tune still pending on the engine holds a path too.
            if self.tuned || self.engine_path.is_some() {
                info!("{} Stop before start, untuning", self.tag);
                self.untune().await;
            } else {
                self.release_claim();
            }
            self.target = None;
            self.state = RecordingState::Idle;
            return;
        }
        if self.state != RecordingState::Recording {
            debug!("{} Stop ignored in state {:?}", self.tag, self.state);
            return;
        }
        self.stop_and_save_received = true;
        self.state = RecordingState::Stopping;
        self.tx.cancel(RecKind::Progress);

        let stopped_at = self.ctx.clock.now_ms();
        self.stopped_at_ms = Some(stopped_at);
        self.persist(stopped_at).await;

        if let Some(uri) = self.recording_uri.clone() {
            info!("{} Stopping {}", self.tag, uri);
            let _ = self.ctx.engine.recording_stop(&uri).await;
        }
        self.state = RecordingState::Finalizing;
        if let Err(e) = self.tx.post(RecMsg::Finalize).await {
            debug!("{} Finalize not queued: {}", self.tag, e);
        }
    }

    async fn on_finalize(&mut self) {
        if self.state != RecordingState::Finalizing {
            return;
        }
        let end_ms = self.stopped_at_ms.unwrap_or_else(|| self.ctx.clock.now_ms());
        self.persist(end_ms).await;

        let Some(path) = self.engine_path else {
            return self.complete().await;
        };
        match self.ctx.engine.active_recordings().await {
            Ok(active) if !is_path_active(&active, path) => self.complete().await,
            Ok(_) => {
                debug!("{} Path {} still recording, retrying finalize", self.tag, path);
                self.schedule(RecMsg::Finalize);
            }
            Err(_) => self.schedule(RecMsg::Finalize),
        }
    }

    /// Recording confirmed stopped.
    async fn complete(&mut self) {
        self.tx.cancel(RecKind::Finalize);
        self.tx.cancel(RecKind::Progress);
        info!("{} Recording finished", self.tag);
        self.release_claim();
        self.state = RecordingState::Idle;
        self.started = false;
        self.tuned = false;
        self.engine_path = None;
        self.events.emit(SessionEvent::RecordingStopped {
            catalog_id: self.catalog_id,
        });
        if let Some(live) = self.ctx.live.current() {
            live.schedule_timeshift_retry(Duration::from_millis(
                self.ctx.config.timeshift_retry_after_recording_ms,
            ));
        }
    }

    async fn untune(&mut self) {
        if let Some(path) = self.engine_path.take() {
            let _ = self.ctx.engine.recording_untune(path).await;
        }
        self.tuned = false;
        self.release_claim();
    }

    // Engine signals

    async fn on_signal(&mut self, signal: EngineSignal) {
        match signal {
            EngineSignal::TuneStatusChanged { path, ok } => {
                if self.state != RecordingState::Tuning
                    || self.tuned
                    || self.engine_path != Some(path)
                {
                    return;
                }
                if ok {
                    self.on_tuned();
                } else {
                    self.engine_path = None;
                    self.target = None;
                    self.release_claim();
                    self.fail_busy(BUSY_NO_TUNER);
                }
            }
            EngineSignal::RecordingStatusChanged { active } => self.on_status_changed(active).await,
            EngineSignal::RecordingDiskFull => {
                if self.started && self.state == RecordingState::Recording {
                    warn!("{} Disk full", self.tag);
                    self.events.emit(SessionEvent::Error(CoordError::InsufficientSpace(
                        "recording disk full".into(),
                    )));
                    self.on_stop().await;
                }
            }
            other => debug!("{} Ignoring signal {}", self.tag, other.name()),
        }
    }

    async fn on_status_changed(&mut self, active: Vec<ActiveRecording>) {
        let Some(path) = self.engine_path else {
            return;
        };
        if is_path_active(&active, path) {
            return;
        }
        match self.state {
            RecordingState::Recording | RecordingState::Stopping => {
                info!("{} Engine ended the recording", self.tag);
                let now = self.ctx.clock.now_ms();
                self.persist(self.stopped_at_ms.unwrap_or(now)).await;
                self.complete().await;
            }
            RecordingState::Finalizing => {
                let end_ms = self.stopped_at_ms.unwrap_or_else(|| self.ctx.clock.now_ms());
                self.persist(end_ms).await;
                self.complete().await;
            }
            _ => {}
        }
    }

    async fn on_release(&mut self) {
        info!("{} Releasing", self.tag);
        self.tx.clear();
        if self.started {
            if let Some(uri) = self.recording_uri.clone() {
                info!(
                    "{} Forcing stop of {} (stop requested: {})",
                    self.tag, uri, self.stop_and_save_received
                );
                let _ = self.ctx.engine.recording_stop(&uri).await;
            }
            let end_ms = self.stopped_at_ms.unwrap_or_else(|| self.ctx.clock.now_ms());
            self.persist(end_ms).await;
            self.started = false;
            self.tuned = false;
            self.engine_path = None;
            self.release_claim();
            self.events.emit(SessionEvent::RecordingStopped {
                catalog_id: self.catalog_id,
            });
        } else if self.tuned || self.engine_path.is_some() {
            self.untune().await;
            self.remove_scheduled().await;
        } else {
            self.release_claim();
        }
        self.state = RecordingState::Idle;
    }

    /// Drop a scheduled recording that matches the released target.
    async fn remove_scheduled(&mut self) {
        let Some(target) = self.target.take() else {
            return;
        };
        let mut candidates = vec![channel_schedule_uri(&target.channel)];
        if let Some(program) = &target.program {
            candidates.push(program.dvb_uri(&target.channel));
        }
        let Ok(scheduled) = self.ctx.engine.scheduled_recordings().await else {
            return;
        };
        for entry in scheduled.iter().filter(|s| candidates.contains(&s.uri)) {
            info!("{} Removing scheduled recording {}", self.tag, entry.uri);
            let _ = self.ctx.engine.remove_scheduled(&entry.uri).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tunecoord_protocol::method;
    use tunecoord_protocol::signal::name;

    use super::*;
    use crate::test_support::{next_event, Harness};
    use crate::tuner::CompliancePolicy;

    async fn tuned(h: &Harness, target: &str) -> (RecordingHandle, crate::session::EventReceiver) {
        let (rec, mut events) = h.open_recording();
        rec.tune(target).await.unwrap();
        next_event(&mut events, |e| matches!(e, SessionEvent::RecordingTuned { .. })).await;
        (rec, events)
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_target_rejected_immediately() {
        let h = Harness::new(2).await;
        let (rec, _events) = h.open_recording();
        assert!(matches!(rec.tune("garbage").await, Err(CoordError::Invalid(_))));
        assert!(matches!(
            rec.start_recording(Some("tv://channel/1")).await,
            Err(CoordError::Invalid(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_before_tune_is_an_error() {
        let h = Harness::new(2).await;
        let (rec, mut events) = h.open_recording();
        rec.start_recording(None).await.unwrap();
        let err = next_event(&mut events, |e| matches!(e, SessionEvent::Error(_))).await;
        assert!(matches!(err, SessionEvent::Error(CoordError::Invalid(_))));
        assert!(h.engine.calls_to(method::RECORDING_START).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_when_live_holds_the_only_path() {
        let h = Harness::new(1).await;
        let (live, mut live_events) = h.open_live().await;
        assert!(live.tune_channel(1).await);
        next_event(&mut live_events, |e| *e == SessionEvent::VideoAvailable).await;

        let (rec, mut events) = h.open_recording();
        rec.tune("tv://channel/2").await.unwrap();
        let busy = next_event(&mut events, |e| matches!(e, SessionEvent::ResourceBusy { .. })).await;
        assert_eq!(
            busy,
            SessionEvent::ResourceBusy {
                info: BUSY_NO_TUNER.into()
            }
        );
        assert_eq!(rec.status().await.unwrap().state, RecordingState::Failed);
        assert!(h.engine.calls_to(method::RECORDING_TUNE).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_recorder_compliance() {
        let h = Harness::new(2).await;
        h.coordinator.ledger().set_compliance(CompliancePolicy {
            cas_ready: true,
            ..Default::default()
        });
        let (_first, _) = tuned(&h, "tv://channel/1").await;

        let (second, mut events) = h.open_recording();
        second.tune("tv://channel/2").await.unwrap();
        let busy = next_event(&mut events, |e| matches!(e, SessionEvent::ResourceBusy { .. })).await;
        assert_eq!(
            busy,
            SessionEvent::ResourceBusy {
                info: BUSY_NO_RECORDER.into()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_engine_tune_refusal_is_busy() {
        let h = Harness::new(2).await;
        h.engine.fail(method::RECORDING_TUNE, REASON_NO_TUNER);
        let (rec, mut events) = h.open_recording();
        rec.tune("tv://channel/1").await.unwrap();
        next_event(&mut events, |e| {
            *e == SessionEvent::ResourceBusy {
                info: BUSY_NO_TUNER.into(),
            }
        })
        .await;
        assert_eq!(h.coordinator.ledger().snapshot().recordings, Vec::<PathId>::new());

        h.engine.fail(method::RECORDING_TUNE, "Invalid resource: service gone");
        let (rec, mut events) = h.open_recording();
        rec.tune("tv://channel/1").await.unwrap();
        let err = next_event(&mut events, |e| matches!(e, SessionEvent::Error(_))).await;
        assert!(matches!(err, SessionEvent::Error(CoordError::Invalid(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_failure_reports_disk_space() {
        let h = Harness::new(2).await;
        h.engine
            .fail(method::RECORDING_START, "May not be enough space on disk");
        let (rec, mut events) = tuned(&h, "tv://channel/1").await;

        rec.start_recording(None).await.unwrap();
        let err = next_event(&mut events, |e| matches!(e, SessionEvent::Error(_))).await;
        assert!(matches!(
            err,
            SessionEvent::Error(CoordError::InsufficientSpace(_))
        ));
        let status = rec.status().await.unwrap();
        assert!(!status.tuned);
        assert_eq!(status.path, None);
        assert_eq!(h.engine.calls_to(method::RECORDING_UNTUNE).len(), 1);
        assert_eq!(h.coordinator.ledger().snapshot().used(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_engine_ended_recording() {
        let h = Harness::new(2).await;
        let (rec, mut events) = tuned(&h, "tv://program/10").await;
        rec.start_recording(None).await.unwrap();
        next_event(&mut events, |e| matches!(e, SessionEvent::RecordingStarted { .. })).await;
        assert_eq!(
            h.engine.calls_to(method::RECORDING_START)[0][2],
            json!(3600)
        );

        h.clock.advance_ms(60_000);
        h.engine
            .emit(name::RECORDING_STATUS_CHANGED, json!({"activerecordings": []}));
        let stopped = next_event(&mut events, |e| matches!(e, SessionEvent::RecordingStopped { .. })).await;
        let SessionEvent::RecordingStopped {
            catalog_id: Some(id),
        } = stopped
        else {
            panic!("expected a catalog id, got {:?}", stopped);
        };

        let row = h.catalog.lock().await.get_recording(id).unwrap().unwrap();
        assert_eq!(row.program_id, Some(10));
        assert_eq!(row.title.as_deref(), Some("News"));
        assert_eq!(row.duration_ms, 60_000);
        assert_eq!(rec.status().await.unwrap().state, RecordingState::Idle);
        assert!(h.engine.calls_to(method::RECORDING_STOP).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disk_full_stops_recording() {
        let h = Harness::new(2).await;
        let (rec, mut events) = tuned(&h, "tv://channel/1").await;
        rec.start_recording(None).await.unwrap();
        next_event(&mut events, |e| matches!(e, SessionEvent::RecordingStarted { .. })).await;
        assert_eq!(
            h.engine.calls_to(method::RECORDING_START)[0][2],
            json!(10_800)
        );

        h.engine.emit(name::RECORDING_DISK_FULL, json!({}));
        next_event(&mut events, |e| {
            matches!(e, SessionEvent::Error(CoordError::InsufficientSpace(_)))
        })
        .await;
        next_event(&mut events, |e| matches!(e, SessionEvent::RecordingStopped { .. })).await;
        assert_eq!(h.engine.calls_to(method::RECORDING_STOP).len(), 1);
        assert_eq!(h.coordinator.ledger().snapshot().used(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_untunes_and_drops_schedule() {
        let h = Harness::new(2).await;
        h.engine.add_scheduled("dvb://233a.1041.1041;0021");
        h.engine.add_scheduled("dvb://233a.1041.1042;0000");
        let (rec, _events) = tuned(&h, "tv://program/10").await;

        rec.release().await;
        assert_eq!(h.engine.calls_to(method::RECORDING_UNTUNE), vec![vec![json!(0)]]);
        assert_eq!(h.engine.scheduled(), vec!["dvb://233a.1041.1042;0000".to_string()]);
        assert_eq!(h.coordinator.ledger().snapshot().used(), 0);
        assert!(rec.status().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_while_recording_forces_stop() {
        let h = Harness::new(2).await;
        let (rec, mut events) = tuned(&h, "tv://channel/1").await;
        rec.start_recording(None).await.unwrap();
        next_event(&mut events, |e| matches!(e, SessionEvent::RecordingStarted { .. })).await;

        h.clock.advance_ms(5_000);
        rec.release().await;
        let stopped = next_event(&mut events, |e| matches!(e, SessionEvent::RecordingStopped { .. })).await;
        let SessionEvent::RecordingStopped {
            catalog_id: Some(id),
        } = stopped
        else {
            panic!("expected a catalog id, got {:?}", stopped);
        };
        assert_eq!(h.engine.calls_to(method::RECORDING_STOP).len(), 1);
        let row = h.catalog.lock().await.get_recording(id).unwrap().unwrap();
        assert_eq!(row.duration_ms, 5_000);
        assert!(rec.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_availability_leaves_timeshift_alone() {
        let h = Harness::new(2).await;
        let (live, mut live_events) = h.open_live().await;
        assert!(live.tune_channel(1).await);
        next_event(&mut live_events, |e| {
            *e == SessionEvent::TimeShiftStatus(crate::session::TimeShiftStatus::Available)
        })
        .await;
        let before = h.coordinator.ledger().snapshot();
        assert!(before.timeshift.is_some());

        h.engine
            .fail(method::RECORDING_CHECK_AVAILABILITY, "service not recordable");
        let (rec, mut events) = h.open_recording();
        rec.tune("tv://channel/2").await.unwrap();
        next_event(&mut events, |e| matches!(e, SessionEvent::ResourceBusy { .. })).await;

        let after = h.coordinator.ledger().snapshot();
        assert_eq!(after.timeshift, before.timeshift);
        assert_eq!(after.recordings, Vec::<PathId>::new());
        assert_eq!(after.pending_explicit, 0);
        assert_eq!(
            live.status().await.unwrap().timeshift,
            crate::session::TimeshiftState::Recording
        );
        assert!(h.engine.timeshift_on());
        assert!(h.engine.calls_to(method::PLAYER_STOP_TIMESHIFT).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_pending_tune_untunes() {
        let h = Harness::new(2).await;
        h.engine.update_options(|o| o.deferred_tune = true);
        let (rec, mut events) = h.open_recording();
        rec.tune("tv://channel/1").await.unwrap();

        let status = rec.status().await.unwrap();
        assert_eq!(status.state, RecordingState::Tuning);
        assert!(!status.tuned);
        assert_eq!(status.path, Some(0));

        rec.stop_recording().await.unwrap();
        let status = rec.status().await.unwrap();
        assert_eq!(status.state, RecordingState::Idle);
        assert_eq!(status.path, None);
        assert_eq!(h.engine.calls_to(method::RECORDING_UNTUNE), vec![vec![json!(0)]]);
        assert_eq!(h.coordinator.ledger().snapshot().used(), 0);

        // The engine's late completion no longer applies.
        h.engine
            .emit(name::TUNE_STATUS_CHANGED, json!({"path": 0, "state": "ok"}));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!rec.status().await.unwrap().tuned);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deferred_tune_completes_on_signal() {
        let h = Harness::new(2).await;
        h.engine.update_options(|o| o.deferred_tune = true);
        let (rec, mut events) = h.open_recording();
        rec.tune("tv://channel/1").await.unwrap();
        assert!(!rec.status().await.unwrap().tuned);

        h.engine
            .emit(name::TUNE_STATUS_CHANGED, json!({"path": 0, "state": "ok"}));
        let tuned = next_event(&mut events, |e| matches!(e, SessionEvent::RecordingTuned { .. })).await;
        assert_eq!(tuned, SessionEvent::RecordingTuned { channel: 1 });
        assert!(rec.status().await.unwrap().tuned);
    }
}
