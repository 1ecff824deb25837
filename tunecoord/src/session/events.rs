//! Events surfaced to the playback/UI collaborator.

use log::debug;
use tokio::sync::mpsc;

use tunecoord_protocol::{ChannelId, CoordError, SignalStatus, Track, TrackType};

/// Name of the busy event understood by the presentation layer.
pub const EVENT_RESOURCE_BUSY: &str = "event_resource_busy";

/// Why video is not shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnavailableReason {
    Tuning,
    WeakSignal,
    Scrambled,
    AudioOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeShiftStatus {
    Available,
    Unavailable,
}

/// Notification from a session to its collaborator.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// No path available; `info` is shown to the user.
    ResourceBusy { info: String },
    /// A failed operation, reported once.
    Error(CoordError),
    VideoAvailable,
    VideoUnavailable(UnavailableReason),
    ContentBlocked { rating: String },
    ContentAllowed,
    TracksChanged(Vec<Track>),
    TrackSelected { track_type: TrackType, index: Option<u32> },
    TimeShiftStatus(TimeShiftStatus),
    SignalStrength(SignalStatus),
    /// Playback moved to another service without a user tune.
    ChannelRetuned(ChannelId),
    /// The stream changed and could not be re-established.
    StreamChanged,
    RecordingTuned { channel: ChannelId },
    RecordingStarted { recording_uri: String },
    RecordingStopped { catalog_id: Option<i64> },
}

impl SessionEvent {
    /// Event name for the compatibility layer, if it has one.
    pub fn compat_name(&self) -> Option<&'static str> {
        match self {
            SessionEvent::ResourceBusy { .. } => Some(EVENT_RESOURCE_BUSY),
            _ => None,
        }
    }
}

pub type EventSender = mpsc::UnboundedSender<SessionEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<SessionEvent>;

/// Create an event channel.
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Session-side event emitter. A dropped receiver is not an error.
#[derive(Clone)]
pub struct EventSink {
    tag: String,
    tx: EventSender,
}

impl EventSink {
    pub fn new(tag: String, tx: EventSender) -> Self {
        Self { tag, tx }
    }

    pub fn emit(&self, event: SessionEvent) {
        debug!("{} Event {:?}", self.tag, event);
        if self.tx.send(event).is_err() {
            debug!("{} Event receiver gone", self.tag);
        }
    }

    pub fn busy(&self, info: &str) {
        self.emit(SessionEvent::ResourceBusy {
            info: info.to_string(),
        });
    }
}
