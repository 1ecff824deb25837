//! Live viewing session: tune state machine plus the timeshift controller.
//!
//! All state lives in one task that drains the session mailbox. User
//! commands, engine signals, periodic polls and probe results are all
//! messages, so no transition ever races another.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use tunecoord_protocol::{
    Channel, ChannelId, CoordError, EngineError, EngineSignal, PlaybackKind, PlayerStatus,
    ServiceType, TargetRef, TimeshiftRecorderState, Track, TrackType,
};

use super::events::{EventSender, EventSink, SessionEvent, TimeShiftStatus, UnavailableReason};
use super::mailbox::{mailbox, MailMessage, MailboxSender};
use super::timeshift::{SeekAction, TimeshiftController, TimeshiftState};
use super::{spawn_signal_forwarder, SessionContext};
use crate::directory::{self, ChannelDirectory};
use crate::tuner::{PathClaim, PathId};

/// Busy info shown when live viewing cannot get a path.
pub const BUSY_NO_PLAY_PATH: &str = "No play path available";

/// Live session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveState {
    Idle,
    Tuning,
    Playing,
    Blocked,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlayerState {
    Stopped,
    Playing,
}

/// Snapshot returned by [`LiveHandle::status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveStatus {
    pub state: LiveState,
    pub channel: Option<ChannelId>,
    pub live_path: Option<PathId>,
    pub timeshift: TimeshiftState,
    pub timeshifting: bool,
    pub blocked: bool,
    pub video_unavailable: Option<UnavailableReason>,
    pub captions: bool,
}

/// Result of a stream-change probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Resolved(String),
    Failed(String),
    TimedOut,
}

pub(crate) enum LiveMsg {
    Tune {
        channel: Channel,
        generation: u64,
        mheg_tune: bool,
    },
    Signal(EngineSignal),
    Unblock {
        rating: String,
    },
    SetCaption(bool),
    SelectTrack {
        track_type: TrackType,
        index: Option<u32>,
        reply: oneshot::Sender<bool>,
    },
    TimeshiftPlay {
        recording_uri: String,
    },
    Pause,
    Resume,
    SeekTo(i64),
    SetSpeed(f32),
    StartPosition(oneshot::Sender<Option<i64>>),
    CurrentPosition(oneshot::Sender<i64>),
    SetTimeshiftEnabled(bool),
    TryStartTimeshift,
    PathMonitor,
    SignalPoll,
    TrackRefresh,
    ParentalCheck,
    PreemptTimeshift {
        ack: oneshot::Sender<()>,
    },
    ProbeResult {
        generation: u64,
        outcome: ProbeOutcome,
    },
    Status(oneshot::Sender<LiveStatus>),
    Release {
        done: oneshot::Sender<()>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum LiveKind {
    Tune,
    Signal,
    Command,
    Query,
    TryStartTimeshift,
    PathMonitor,
    SignalPoll,
    TrackRefresh,
    ParentalCheck,
    Preempt,
    ProbeResult,
    Release,
}

impl MailMessage for LiveMsg {
    type Kind = LiveKind;

    fn kind(&self) -> LiveKind {
        match self {
            LiveMsg::Tune { .. } => LiveKind::Tune,
            LiveMsg::Signal(_) => LiveKind::Signal,
            LiveMsg::Unblock { .. }
            | LiveMsg::SetCaption(_)
            | LiveMsg::SelectTrack { .. }
            | LiveMsg::TimeshiftPlay { .. }
            | LiveMsg::Pause
            | LiveMsg::Resume
            | LiveMsg::SeekTo(_)
            | LiveMsg::SetSpeed(_)
            | LiveMsg::SetTimeshiftEnabled(_) => LiveKind::Command,
            LiveMsg::StartPosition(_) | LiveMsg::CurrentPosition(_) | LiveMsg::Status(_) => {
                LiveKind::Query
            }
            LiveMsg::TryStartTimeshift => LiveKind::TryStartTimeshift,
            LiveMsg::PathMonitor => LiveKind::PathMonitor,
            LiveMsg::SignalPoll => LiveKind::SignalPoll,
            LiveMsg::TrackRefresh => LiveKind::TrackRefresh,
            LiveMsg::ParentalCheck => LiveKind::ParentalCheck,
            LiveMsg::PreemptTimeshift { .. } => LiveKind::Preempt,
            LiveMsg::ProbeResult { .. } => LiveKind::ProbeResult,
            LiveMsg::Release { .. } => LiveKind::Release,
        }
    }
}

/// Handle to a running live session.
#[derive(Clone)]
pub struct LiveHandle {
    id: u64,
    tx: MailboxSender<LiveMsg>,
    generation: Arc<AtomicU64>,
    directory: Arc<dyn ChannelDirectory>,
}

impl LiveHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Tune to a channel or program reference.
    ///
    /// Returns false when the reference is malformed or unknown, or the
    /// session is closed. Busy and engine failures arrive as events.
    pub async fn tune(&self, target: &str) -> bool {
        let target = match target.parse::<TargetRef>() {
            Ok(target) => target,
            Err(e) => {
                warn!("[Live {}] Rejecting tune to {}: {}", self.id, target, e);
                return false;
            }
        };
        self.tune_target(target).await
    }

    pub async fn tune_channel(&self, channel: ChannelId) -> bool {
        self.tune_target(TargetRef::Channel(channel)).await
    }

    async fn tune_target(&self, target: TargetRef) -> bool {
        let resolved = match directory::resolve(self.directory.as_ref(), target) {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!("[Live {}] Rejecting tune to {}: {}", self.id, target, e);
                return false;
            }
        };
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.tx
            .post_latest(LiveMsg::Tune {
                channel: resolved.channel,
                generation,
                mheg_tune: false,
            })
            .await
            .is_ok()
    }

    pub async fn set_caption_enabled(&self, enabled: bool) {
        self.command(LiveMsg::SetCaption(enabled)).await;
    }

    /// Select an audio or subtitle track; `None` turns the track type off.
    pub async fn select_track(&self, track_type: TrackType, index: Option<u32>) -> bool {
        let (reply, rx) = oneshot::channel();
        self.command(LiveMsg::SelectTrack {
            track_type,
            index,
            reply,
        })
        .await;
        rx.await.unwrap_or(false)
    }

    /// Lift parental blocking for the rest of the session.
    pub async fn unblock(&self, rating: &str) {
        self.command(LiveMsg::Unblock {
            rating: rating.to_string(),
        })
        .await;
    }

    /// Play back a finished recording.
    pub async fn timeshift_play(&self, recording_uri: &str) {
        self.command(LiveMsg::TimeshiftPlay {
            recording_uri: recording_uri.to_string(),
        })
        .await;
    }

    pub async fn timeshift_pause(&self) {
        self.command(LiveMsg::Pause).await;
    }

    pub async fn timeshift_resume(&self) {
        self.command(LiveMsg::Resume).await;
    }

    /// Seek to a stream time in milliseconds.
    pub async fn timeshift_seek_to(&self, position_ms: i64) {
        self.command(LiveMsg::SeekTo(position_ms)).await;
    }

    pub async fn timeshift_set_speed(&self, speed: f32) {
        self.command(LiveMsg::SetSpeed(speed)).await;
    }

    pub async fn get_start_position(&self) -> Option<i64> {
        let (reply, rx) = oneshot::channel();
        self.command(LiveMsg::StartPosition(reply)).await;
        rx.await.ok().flatten()
    }

    pub async fn get_current_position(&self) -> Option<i64> {
        let (reply, rx) = oneshot::channel();
        self.command(LiveMsg::CurrentPosition(reply)).await;
        rx.await.ok()
    }

    pub async fn status(&self) -> Option<LiveStatus> {
        let (reply, rx) = oneshot::channel();
        self.command(LiveMsg::Status(reply)).await;
        rx.await.ok()
    }

    pub async fn set_timeshift_enabled(&self, enabled: bool) -> bool {
        self.tx
            .post(LiveMsg::SetTimeshiftEnabled(enabled))
            .await
            .is_ok()
    }

    /// Stop the background timeshift so a recording can use its path.
    ///
    /// Returns true once the session acknowledged within `timeout`.
    pub async fn preempt_timeshift(&self, timeout: Duration) -> bool {
        let (ack, rx) = oneshot::channel();
        if self.tx.post(LiveMsg::PreemptTimeshift { ack }).await.is_err() {
            return false;
        }
        matches!(tokio::time::timeout(timeout, rx).await, Ok(Ok(())))
    }

    /// Drop a scheduled timeshift start.
    pub fn cancel_timeshift_schedule(&self) {
        self.tx.cancel(LiveKind::TryStartTimeshift);
    }

    /// Attempt a timeshift start after `delay`.
    pub fn schedule_timeshift_retry(&self, delay: Duration) {
        if let Err(e) = self.tx.post_delayed(LiveMsg::TryStartTimeshift, delay) {
            debug!("[Live {}] Timeshift retry not scheduled: {}", self.id, e);
        }
    }

    /// Stop playback, release every path and end the session.
    pub async fn release(&self) {
        self.tx.clear();
        let (done, rx) = oneshot::channel();
        if self.tx.post(LiveMsg::Release { done }).await.is_ok() {
            let _ = rx.await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn command(&self, msg: LiveMsg) {
        if let Err(e) = self.tx.post(msg).await {
            debug!("[Live {}] Command dropped: {}", self.id, e);
        }
    }
}

struct LiveSession {
    id: u64,
    tag: String,
    ctx: SessionContext,
    tx: MailboxSender<LiveMsg>,
    events: EventSink,
    generation: Arc<AtomicU64>,
    state: LiveState,
    player: PlayerState,
    channel: Option<Channel>,
    claim: Option<PathClaim>,
    timeshift: TimeshiftController,
    timeshift_enabled: bool,
    /// Set once the post-tune start delay has elapsed.
    timeshift_armed: bool,
    playing_recording: bool,
    play_speed: f32,
    blocked: bool,
    blocked_by_rating_check: bool,
    unblocked_override: bool,
    video_unavailable: Option<UnavailableReason>,
    caption_enabled: bool,
    tracks: Vec<Track>,
    probe: Option<CancellationToken>,
}

/// Start a live session task.
pub(crate) fn spawn(id: u64, ctx: SessionContext, events: EventSender) -> LiveHandle {
    let (tx, mut mailbox) = mailbox::<LiveMsg>(ctx.config.mailbox_capacity);
    let tag = format!("[Live {}]", id);
    let cancel = CancellationToken::new();
    spawn_signal_forwarder(
        tag.clone(),
        &ctx.signals,
        tx.clone(),
        cancel.clone(),
        |signal| {
            let wanted = matches!(
                signal,
                EngineSignal::PlayerStatusChanged { .. }
                    | EngineSignal::TimeshiftRecorderStatusChanged { .. }
                    | EngineSignal::NetworkChange
                    | EngineSignal::UpdatedService
                    | EngineSignal::ServiceRetuned { .. }
            );
            wanted.then(|| LiveMsg::Signal(signal))
        },
    );

    let generation = Arc::new(AtomicU64::new(0));
    let handle = LiveHandle {
        id,
        tx: tx.clone(),
        generation: Arc::clone(&generation),
        directory: Arc::clone(&ctx.directory),
    };

    let mut session = LiveSession {
        id,
        tag: tag.clone(),
        events: EventSink::new(tag, events),
        timeshift: TimeshiftController::new(ctx.config.timeshift_window_secs()),
        timeshift_enabled: ctx.config.timeshift_enabled,
        ctx,
        tx,
        generation,
        state: LiveState::Idle,
        player: PlayerState::Stopped,
        channel: None,
        claim: None,
        timeshift_armed: false,
        playing_recording: false,
        play_speed: 1.0,
        blocked: false,
        blocked_by_rating_check: false,
        unblocked_override: false,
        video_unavailable: None,
        caption_enabled: false,
        tracks: Vec::new(),
        probe: None,
    };

    tokio::spawn(async move {
        info!("{} Session opened", session.tag);
        if session.timeshift_enabled {
            let minutes = session.ctx.config.timeshift_buffer_mins;
            if let Err(e) = session.ctx.engine.set_timeshift_buffer(minutes).await {
                debug!("{} Timeshift buffer size not applied: {}", session.tag, e);
            }
        }
        while let Some(msg) = mailbox.recv().await {
            if !session.handle(msg).await {
                break;
            }
        }
        cancel.cancel();
        mailbox.close();
        session.ctx.live.vacate(session.id);
        info!("{} Session closed", session.tag);
    });

    handle
}

impl LiveSession {
    /// Handle one message. Returns false when the session is finished.
    async fn handle(&mut self, msg: LiveMsg) -> bool {
        match msg {
            LiveMsg::Tune {
                channel,
                generation,
                mheg_tune,
            } => self.on_tune(channel, generation, mheg_tune).await,
            LiveMsg::Signal(signal) => self.on_signal(signal).await,
            LiveMsg::Unblock { rating } => {
                info!("{} Unblocked by user (rating {})", self.tag, rating);
                self.unblocked_override = true;
                if self.blocked {
                    self.allow_content().await;
                }
            }
            LiveMsg::SetCaption(enabled) => {
                self.caption_enabled = enabled;
                let _ = self.ctx.engine.set_subtitles_on(enabled).await;
            }
            LiveMsg::SelectTrack {
                track_type,
                index,
                reply,
            } => {
                let ok = self.select_track(track_type, index).await;
                let _ = reply.send(ok);
            }
            LiveMsg::TimeshiftPlay { recording_uri } => self.play_recording(recording_uri).await,
            LiveMsg::Pause => self.on_pause().await,
            LiveMsg::Resume => {
                if self.ctx.engine.resume().await.is_ok() {
                    self.player = PlayerState::Playing;
                    self.play_speed = 1.0;
                }
            }
            LiveMsg::SeekTo(position_ms) => self.on_seek(position_ms).await,
            LiveMsg::SetSpeed(speed) => self.on_set_speed(speed).await,
            LiveMsg::StartPosition(reply) => {
                let position = self.start_position().await;
                let _ = reply.send(position);
            }
            LiveMsg::CurrentPosition(reply) => {
                let position = self.current_position().await;
                let _ = reply.send(position);
            }
            LiveMsg::SetTimeshiftEnabled(enabled) => self.set_timeshift_enabled(enabled).await,
            LiveMsg::TryStartTimeshift => {
                self.timeshift_armed = true;
                self.try_start_timeshift().await;
            }
            LiveMsg::PathMonitor => self.path_monitor().await,
            LiveMsg::SignalPoll => self.poll_signal().await,
            LiveMsg::TrackRefresh => self.refresh_tracks().await,
            LiveMsg::ParentalCheck => self.parental_check().await,
            LiveMsg::PreemptTimeshift { ack } => {
                self.tx.cancel(LiveKind::TryStartTimeshift);
                if !self.timeshift.is_stopped() || self.timeshift.claim().is_some() {
                    info!("{} Timeshift preempted by a recording", self.tag);
                    let return_to_live = self.timeshift.is_timeshifting();
                    self.stop_timeshift(return_to_live).await;
                }
                let _ = ack.send(());
            }
            LiveMsg::ProbeResult {
                generation,
                outcome,
            } => self.on_probe_result(generation, outcome).await,
            LiveMsg::Status(reply) => {
                let _ = reply.send(self.status());
            }
            LiveMsg::Release { done } => {
                self.release().await;
                let _ = done.send(());
                return false;
            }
        }
        true
    }

    fn status(&self) -> LiveStatus {
        LiveStatus {
            state: self.state,
            channel: self.channel.as_ref().map(|c| c.id),
            live_path: self.claim.map(|c| c.path()),
            timeshift: self.timeshift.state(),
            timeshifting: self.timeshift.is_timeshifting(),
            blocked: self.blocked,
            video_unavailable: self.video_unavailable,
            captions: self.caption_enabled,
        }
    }

    fn schedule(&self, msg: LiveMsg, delay_ms: u64) {
        if let Err(e) = self.tx.post_delayed(msg, Duration::from_millis(delay_ms)) {
            debug!("{} Not scheduling: {}", self.tag, e);
        }
    }

    fn cancel_polls(&self) {
        for kind in [
            LiveKind::TryStartTimeshift,
            LiveKind::PathMonitor,
            LiveKind::SignalPoll,
            LiveKind::TrackRefresh,
            LiveKind::ParentalCheck,
        ] {
            self.tx.cancel(kind);
        }
    }

    fn cancel_probe(&mut self) {
        if let Some(token) = self.probe.take() {
            debug!("{} Cancelling stream-change probe", self.tag);
            token.cancel();
        }
    }

    // Tuning

    async fn on_tune(&mut self, channel: Channel, generation: u64, mheg_tune: bool) {
        let current = self.generation.load(Ordering::SeqCst);
        if generation != current {
            debug!(
                "{} Dropping stale tune to {} (generation {} != {})",
                self.tag, channel.id, generation, current
            );
            return;
        }
        if mheg_tune
            && self.player == PlayerState::Playing
            && self.channel.as_ref().map(|c| c.id) == Some(channel.id)
        {
            debug!("{} Already playing channel {}", self.tag, channel.id);
            self.events.emit(SessionEvent::ChannelRetuned(channel.id));
            return;
        }

        info!(
            "{} Tuning to channel {} ({})",
            self.tag, channel.id, channel.dvb_uri
        );
        self.cancel_probe();
        self.cancel_polls();
        self.stop_timeshift(false).await;

        self.unblocked_override = false;
        self.blocked = false;
        self.blocked_by_rating_check = false;
        self.timeshift_armed = false;
        self.playing_recording = false;
        self.play_speed = 1.0;
        self.tracks.clear();
        self.state = LiveState::Tuning;
        self.set_unavailable(UnavailableReason::Tuning);
        self.channel = Some(channel.clone());

        let claim = match self.ctx.ledger.try_claim_live() {
            Ok(claim) => claim,
            Err(e) => {
                warn!("{} No path for channel {}: {}", self.tag, channel.id, e);
                self.state = LiveState::Stopped;
                self.player = PlayerState::Stopped;
                self.events.busy(BUSY_NO_PLAY_PATH);
                return;
            }
        };
        self.claim = Some(claim);

        let audio_description = self.ctx.config.audio_description;
        match self.ctx.engine.play(&channel.dvb_uri, audio_description).await {
            Ok(()) => {
                self.state = LiveState::Playing;
                let config = Arc::clone(&self.ctx.config);
                self.schedule(LiveMsg::TrackRefresh, config.track_refresh_interval_ms);
                self.schedule(LiveMsg::ParentalCheck, config.parental_check_interval_ms);
                if mheg_tune {
                    self.events.emit(SessionEvent::ChannelRetuned(channel.id));
                }
            }
            Err(e) => {
                error!("{} Play failed for channel {}: {}", self.tag, channel.id, e);
                self.ctx.ledger.release(&claim);
                self.claim = None;
                self.state = LiveState::Stopped;
                self.player = PlayerState::Stopped;
                match e {
                    EngineError::Rejected { reason, .. } => self.events.busy(&reason),
                    other => self
                        .events
                        .emit(SessionEvent::Error(CoordError::Unknown(other.to_string()))),
                }
            }
        }
    }

    async fn retune(&mut self, channel: Channel, mheg_tune: bool) {
        let generation = self.generation.load(Ordering::SeqCst);
        self.on_tune(channel, generation, mheg_tune).await;
    }

    fn set_unavailable(&mut self, reason: UnavailableReason) {
        self.video_unavailable = Some(reason);
        self.events.emit(SessionEvent::VideoUnavailable(reason));
    }

    // Engine signals

    async fn on_signal(&mut self, signal: EngineSignal) {
        match signal {
            EngineSignal::PlayerStatusChanged {
                status,
                kind,
                rating,
                ..
            } => self.on_player_status(status, kind, rating).await,
            EngineSignal::TimeshiftRecorderStatusChanged { state } => match state {
                TimeshiftRecorderState::Recording => self.on_timeshift_recording().await,
                TimeshiftRecorderState::Off => {
                    if !self.timeshift.is_stopped() {
                        info!("{} Timeshift recorder off", self.tag);
                    }
                    self.release_timeshift();
                }
                TimeshiftRecorderState::Unknown(state) => {
                    warn!("{} Unknown timeshift recorder state: {}", self.tag, state);
                }
            },
            EngineSignal::NetworkChange | EngineSignal::UpdatedService => {
                self.start_probe().await;
            }
            EngineSignal::ServiceRetuned { uri } => {
                match self.ctx.directory.channel_by_dvb_uri(&uri) {
                    Some(channel) => {
                        info!("{} Service retuned to {}", self.tag, uri);
                        self.retune(channel, true).await;
                    }
                    None => warn!("{} Service retuned to unknown service {}", self.tag, uri),
                }
            }
            other => debug!("{} Ignoring signal {}", self.tag, other.name()),
        }
    }

    async fn on_player_status(
        &mut self,
        status: PlayerStatus,
        kind: PlaybackKind,
        rating: Option<u32>,
    ) {
        match status {
            PlayerStatus::Playing => {
                self.player = PlayerState::Playing;
                if self.claim.is_some() && self.state != LiveState::Blocked {
                    self.state = LiveState::Playing;
                }
                if self.blocked && !self.blocked_by_rating_check {
                    self.allow_content().await;
                }
                let audio_only = self
                    .channel
                    .as_ref()
                    .map_or(false, |c| c.service_type == ServiceType::Audio);
                if audio_only {
                    self.set_unavailable(UnavailableReason::AudioOnly);
                } else {
                    self.video_unavailable = None;
                    self.events.emit(SessionEvent::VideoAvailable);
                }
                match kind {
                    PlaybackKind::DvbLive => {
                        self.playing_recording = false;
                        self.start_live_polls();
                    }
                    PlaybackKind::DvbRecording => self.playing_recording = true,
                    PlaybackKind::DvbTimeshifting => {}
                    PlaybackKind::Unknown(kind) => {
                        warn!("{} Unknown playback type: {}", self.tag, kind)
                    }
                }
            }
            PlayerStatus::Blocked => {
                if self.unblocked_override {
                    debug!("{} Ignoring block, unblocked by user", self.tag);
                } else {
                    self.block(rating.unwrap_or(0), false).await;
                }
            }
            PlayerStatus::BadSignal => self.set_unavailable(UnavailableReason::WeakSignal),
            PlayerStatus::Scrambled => self.set_unavailable(UnavailableReason::Scrambled),
            PlayerStatus::Off => {
                self.player = PlayerState::Stopped;
                if self.state == LiveState::Playing {
                    warn!("{} Player switched off", self.tag);
                    self.state = LiveState::Stopped;
                }
                self.release_timeshift();
            }
            PlayerStatus::Starting => info!("{} Interactive application starting", self.tag),
            PlayerStatus::Unknown(state) => warn!("{} Unknown player state: {}", self.tag, state),
        }
    }

    fn start_live_polls(&mut self) {
        let config = Arc::clone(&self.ctx.config);
        self.schedule(LiveMsg::SignalPoll, config.signal_poll_interval_ms);
        self.schedule(LiveMsg::TrackRefresh, config.track_refresh_interval_ms);
        self.schedule(LiveMsg::ParentalCheck, config.parental_check_interval_ms);
        self.schedule(LiveMsg::PathMonitor, config.path_monitor_interval_ms);
        if self.timeshift_enabled && self.timeshift.is_stopped() && !self.timeshift_armed {
            self.schedule(LiveMsg::TryStartTimeshift, config.timeshift_start_delay_ms);
        }
    }

    // Parental control

    async fn block(&mut self, age: u32, from_rating_check: bool) {
        if self.blocked {
            return;
        }
        info!("{} Content blocked (rating {})", self.tag, age);
        self.blocked = true;
        self.blocked_by_rating_check = from_rating_check;
        self.state = LiveState::Blocked;
        let _ = self.ctx.engine.set_mute(true).await;
        self.events.emit(SessionEvent::ContentBlocked {
            rating: format!("DVB_{}", age),
        });
    }

    async fn allow_content(&mut self) {
        self.blocked = false;
        self.blocked_by_rating_check = false;
        if self.state == LiveState::Blocked {
            self.state = LiveState::Playing;
        }
        let _ = self.ctx.engine.set_mute(false).await;
        self.events.emit(SessionEvent::ContentAllowed);
    }

    async fn parental_check(&mut self) {
        if !matches!(self.state, LiveState::Playing | LiveState::Blocked) {
            return;
        }
        let parental = self.ctx.parental.clone();
        if parental.enabled && !self.unblocked_override {
            if let Ok(age) = self.ctx.engine.rating_age().await {
                let restricted = parental.min_blocked_age > 0 && age >= parental.min_blocked_age;
                if restricted {
                    self.block(age, true).await;
                } else if self.blocked && self.blocked_by_rating_check {
                    self.allow_content().await;
                }
            }
        }
        self.schedule(LiveMsg::ParentalCheck, self.ctx.config.parental_check_interval_ms);
    }

    // Polls

    async fn poll_signal(&mut self) {
        if !matches!(self.state, LiveState::Playing | LiveState::Blocked) {
            return;
        }
        if let Ok(status) = self.ctx.engine.frontend_status().await {
            self.events.emit(SessionEvent::SignalStrength(status));
        }
        self.schedule(LiveMsg::SignalPoll, self.ctx.config.signal_poll_interval_ms);
    }

    async fn refresh_tracks(&mut self) {
        if !matches!(self.state, LiveState::Playing | LiveState::Blocked) {
            return;
        }
        let mut tracks = Vec::new();
        let mut complete = true;
        for track_type in [TrackType::Audio, TrackType::Subtitle] {
            match self.ctx.engine.list_tracks(track_type).await {
                Ok(mut list) => tracks.append(&mut list),
                Err(_) => complete = false,
            }
        }
        complete &= !tracks.is_empty() && tracks.iter().all(Track::is_complete);
        if tracks != self.tracks {
            self.tracks = tracks.clone();
            self.events.emit(SessionEvent::TracksChanged(tracks));
        }
        if !complete {
            self.schedule(LiveMsg::TrackRefresh, self.ctx.config.track_refresh_interval_ms);
        }
    }

    async fn select_track(&mut self, track_type: TrackType, index: Option<u32>) -> bool {
        let engine = &self.ctx.engine;
        let ok = match (track_type, index) {
            (TrackType::Audio, index) => engine.set_audio_stream(index).await.is_ok(),
            (TrackType::Subtitle, None) => engine.set_subtitles_on(false).await.is_ok(),
            (TrackType::Subtitle, Some(index)) => {
                engine.set_subtitles_on(true).await.is_ok()
                    && engine.set_subtitle_stream(index).await.is_ok()
            }
        };
        if ok {
            if track_type == TrackType::Subtitle {
                self.caption_enabled = index.is_some();
            }
            self.events
                .emit(SessionEvent::TrackSelected { track_type, index });
        }
        ok
    }

    // Timeshift

    async fn path_monitor(&mut self) {
        if !matches!(self.state, LiveState::Playing | LiveState::Blocked) {
            return;
        }
        if self.timeshift_armed && self.timeshift.is_stopped() {
            self.try_start_timeshift().await;
        }
        self.schedule(LiveMsg::PathMonitor, self.ctx.config.path_monitor_interval_ms);
    }

    async fn try_start_timeshift(&mut self) {
        if !self.timeshift_enabled
            || self.state != LiveState::Playing
            || self.playing_recording
            || !self.timeshift.is_stopped()
            || self.timeshift.claim().is_some()
        {
            return;
        }
        let claim = match self.ctx.ledger.try_claim_timeshift() {
            Ok(claim) => claim,
            Err(e) => {
                debug!("{} Timeshift not started: {}", self.tag, e);
                return;
            }
        };
        match self.ctx.engine.start_timeshift().await {
            Ok(()) => {
                info!("{} Timeshift started on path {}", self.tag, claim.path());
                self.timeshift.on_start_issued(claim);
            }
            Err(_) => {
                self.ctx.ledger.release(&claim);
            }
        }
    }

    /// The recorder reported `recording`. A report without a held claim is
    /// late (after a stop or preemption); it is adopted only if the ledger
    /// still has room, otherwise the engine recorder is stopped.
    async fn on_timeshift_recording(&mut self) {
        if self.timeshift.state() == TimeshiftState::Recording {
            return;
        }
        if self.timeshift.claim().is_none() {
            let wanted = self.timeshift_enabled
                && self.state == LiveState::Playing
                && !self.playing_recording;
            let claim = if wanted {
                self.ctx.ledger.try_claim_timeshift().ok()
            } else {
                None
            };
            match claim {
                Some(claim) => self.timeshift.on_start_issued(claim),
                None => {
                    warn!("{} Timeshift recording without a path, stopping it", self.tag);
                    let _ = self.ctx.engine.stop_timeshift(false).await;
                    return;
                }
            }
        }
        info!("{} Timeshift recording", self.tag);
        self.timeshift.on_recording(self.ctx.clock.now_ms());
        self.events
            .emit(SessionEvent::TimeShiftStatus(TimeShiftStatus::Available));
    }

    /// Stop the engine timeshift and release its claim.
    async fn stop_timeshift(&mut self, return_to_live: bool) {
        if self.timeshift.is_stopped() && self.timeshift.claim().is_none() {
            return;
        }
        info!(
            "{} Stopping timeshift (return to live: {})",
            self.tag, return_to_live
        );
        let _ = self.ctx.engine.stop_timeshift(return_to_live).await;
        self.release_timeshift();
        if return_to_live {
            match self.ctx.ledger.try_claim_live() {
                Ok(claim) => self.claim = Some(claim),
                Err(e) => {
                    warn!("{} Live path not reacquired: {}", self.tag, e);
                    self.events.busy(BUSY_NO_PLAY_PATH);
                }
            }
        }
    }

    /// Drop local timeshift state. Releasing a preempted claim is a no-op.
    fn release_timeshift(&mut self) {
        let was_active = !self.timeshift.is_stopped();
        if let Some(claim) = self.timeshift.reset() {
            self.ctx.ledger.release(&claim);
        }
        if was_active {
            self.events
                .emit(SessionEvent::TimeShiftStatus(TimeShiftStatus::Unavailable));
        }
    }

    async fn set_timeshift_enabled(&mut self, enabled: bool) {
        if self.timeshift_enabled == enabled {
            return;
        }
        info!("{} Timeshift enabled: {}", self.tag, enabled);
        self.timeshift_enabled = enabled;
        if enabled {
            if self.state == LiveState::Playing {
                self.schedule(
                    LiveMsg::TryStartTimeshift,
                    self.ctx.config.timeshift_start_delay_ms,
                );
            }
        } else {
            self.tx.cancel(LiveKind::TryStartTimeshift);
            self.stop_timeshift(self.timeshift.is_timeshifting()).await;
        }
    }

    async fn on_pause(&mut self) {
        if self.timeshift.enter_timeshifting() {
            info!("{} Pausing into timeshift playback", self.tag);
            if self.ctx.engine.play_timeshift(true, true).await.is_ok() {
                self.play_speed = 0.0;
            }
            return;
        }
        if self.ctx.engine.pause().await.is_ok() {
            self.play_speed = 0.0;
        }
        if self.timeshift.is_stopped() {
            self.timeshift_armed = true;
            self.try_start_timeshift().await;
        }
    }

    async fn on_seek(&mut self, position_ms: i64) {
        match self.timeshift.seek(position_ms) {
            SeekAction::EnterTimeshift { from_current } => {
                info!("{} Seeking into timeshift playback", self.tag);
                let _ = self.ctx.engine.play_timeshift(false, from_current).await;
            }
            SeekAction::SeekSecs(secs) => {
                let _ = self.ctx.engine.seek_to(secs).await;
            }
        }
    }

    async fn on_set_speed(&mut self, speed: f32) {
        if (speed - self.play_speed).abs() < f32::EPSILON {
            return;
        }
        if self.timeshift.enter_timeshifting() {
            let _ = self.ctx.engine.play_timeshift(false, true).await;
        }
        if self.ctx.engine.set_play_speed(speed).await.is_ok() {
            self.play_speed = speed;
        }
    }

    async fn start_position(&mut self) -> Option<i64> {
        if self.playing_recording {
            return Some(0);
        }
        self.timeshift.start_position_ms()?;
        match self.ctx.engine.timeshift_length().await {
            Ok(length) => Some(self.timeshift.slide_window(length)),
            Err(_) => self.timeshift.start_position_ms(),
        }
    }

    async fn current_position(&mut self) -> i64 {
        let now = self.ctx.clock.now_ms();
        if !self.playing_recording && !self.timeshift.is_timeshifting() {
            return now;
        }
        let elapsed = self.ctx.engine.elapsed().await.ok();
        if self.playing_recording {
            elapsed.unwrap_or(0) * 1000
        } else {
            self.timeshift.current_position_ms(elapsed, now)
        }
    }

    async fn play_recording(&mut self, recording_uri: String) {
        info!("{} Playing recording {}", self.tag, recording_uri);
        self.cancel_probe();
        self.cancel_polls();
        self.stop_timeshift(false).await;
        let audio_description = self.ctx.config.audio_description;
        match self.ctx.engine.play(&recording_uri, audio_description).await {
            Ok(()) => {
                self.playing_recording = true;
                self.state = LiveState::Playing;
            }
            Err(e) => {
                self.state = LiveState::Stopped;
                self.events
                    .emit(SessionEvent::Error(CoordError::Unknown(e.to_string())));
            }
        }
    }

    // Stream change

    async fn start_probe(&mut self) {
        let Some(channel) = self.channel.clone() else {
            return;
        };
        if self.probe.is_some() {
            debug!("{} Stream-change probe already running", self.tag);
            return;
        }
        info!("{} Stream changed on {}, probing", self.tag, channel.dvb_uri);

        self.cancel_polls();
        self.stop_timeshift(false).await;
        let _ = self.ctx.engine.stop().await;
        self.player = PlayerState::Stopped;
        self.state = LiveState::Tuning;
        self.set_unavailable(UnavailableReason::Tuning);

        let generation = self.generation.load(Ordering::SeqCst);
        let token = CancellationToken::new();
        self.probe = Some(token.clone());
        let engine = self.ctx.engine.clone();
        let tx = self.tx.clone();
        let timeout = Duration::from_millis(self.ctx.config.probe_timeout_ms);
        tokio::spawn(async move {
            let outcome = tokio::select! {
                _ = token.cancelled() => return,
                result = tokio::time::timeout(timeout, engine.resolve_service(&channel.dvb_uri)) => {
                    match result {
                        Ok(Ok(uri)) => ProbeOutcome::Resolved(uri),
                        Ok(Err(e)) => ProbeOutcome::Failed(e.to_string()),
                        Err(_) => ProbeOutcome::TimedOut,
                    }
                }
            };
            if !token.is_cancelled() {
                let _ = tx.post(LiveMsg::ProbeResult { generation, outcome }).await;
            }
        });
    }

    async fn on_probe_result(&mut self, generation: u64, outcome: ProbeOutcome) {
        let current = self.generation.load(Ordering::SeqCst);
        if generation != current {
            debug!(
                "{} Dropping probe result for generation {} (now {})",
                self.tag, generation, current
            );
            return;
        }
        self.probe = None;
        let Some(channel) = self.channel.clone() else {
            return;
        };
        match outcome {
            ProbeOutcome::Resolved(uri) if uri != channel.dvb_uri => {
                match self.ctx.directory.channel_by_dvb_uri(&uri) {
                    Some(moved) => {
                        info!("{} Service moved to {}", self.tag, uri);
                        self.retune(moved, true).await;
                    }
                    None => self.retune(channel, false).await,
                }
            }
            ProbeOutcome::Resolved(_) => self.retune(channel, false).await,
            ProbeOutcome::Failed(reason) => {
                warn!("{} Probe failed ({}), retuning", self.tag, reason);
                self.retune(channel, false).await;
            }
            ProbeOutcome::TimedOut => {
                warn!("{} Probe timed out, abandoning", self.tag);
                self.stop_timeshift(false).await;
                if let Some(claim) = self.claim.take() {
                    self.ctx.ledger.release(&claim);
                }
                self.state = LiveState::Stopped;
                self.events.emit(SessionEvent::StreamChanged);
            }
        }
    }

    async fn release(&mut self) {
        info!("{} Releasing", self.tag);
        self.tx.clear();
        self.cancel_probe();
        self.stop_timeshift(false).await;
        if self.player == PlayerState::Playing || self.claim.is_some() {
            let _ = self.ctx.engine.stop().await;
        }
        if let Some(claim) = self.claim.take() {
            self.ctx.ledger.release(&claim);
        }
        self.player = PlayerState::Stopped;
        self.state = LiveState::Stopped;
    }
}
