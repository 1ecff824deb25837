//! Session runtime: per-session mailboxes, the live (tune + timeshift) and
//! recording state machines, and the plumbing shared between them.

pub mod events;
pub mod live;
pub mod mailbox;
pub mod recording;
pub mod timeshift;

use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use tunecoord_protocol::EngineSignal;

use crate::catalog::CatalogHandle;
use crate::clock::StreamClock;
use crate::config::{CoordinatorConfig, ParentalConfig};
use crate::directory::ChannelDirectory;
use crate::engine::{EngineClient, SignalBus};
use crate::tuner::ResourceLedger;

use self::live::LiveHandle;
use self::mailbox::{MailMessage, MailboxSender};

pub use events::{
    event_channel, EventReceiver, EventSender, SessionEvent, TimeShiftStatus, UnavailableReason,
    EVENT_RESOURCE_BUSY,
};
pub use live::{LiveState, LiveStatus};
pub use recording::{RecordingHandle, RecordingState, RecordingStatus};
pub use timeshift::{TimeshiftController, TimeshiftState};

/// The single live-session slot, shared so recording sessions can reach the
/// live session for preemption and timeshift retries.
#[derive(Clone, Default)]
pub struct LiveSlot {
    inner: Arc<parking_lot::Mutex<Option<LiveHandle>>>,
}

impl LiveSlot {
    pub fn current(&self) -> Option<LiveHandle> {
        self.inner.lock().clone()
    }

    /// Install `handle`, returning the previous occupant.
    pub fn replace(&self, handle: LiveHandle) -> Option<LiveHandle> {
        self.inner.lock().replace(handle)
    }

    /// Empty the slot if it still holds session `id`.
    pub fn vacate(&self, id: u64) {
        let mut slot = self.inner.lock();
        if slot.as_ref().map(|h| h.id()) == Some(id) {
            *slot = None;
        }
    }

    pub fn take(&self) -> Option<LiveHandle> {
        self.inner.lock().take()
    }
}

/// Collaborators handed to every session.
#[derive(Clone)]
pub struct SessionContext {
    pub engine: EngineClient,
    pub ledger: Arc<ResourceLedger>,
    pub directory: Arc<dyn ChannelDirectory>,
    pub catalog: CatalogHandle,
    pub config: Arc<CoordinatorConfig>,
    pub parental: ParentalConfig,
    pub clock: Arc<dyn StreamClock>,
    pub signals: SignalBus,
    pub live: LiveSlot,
}

/// Re-post engine signals into a session mailbox.
///
/// `accept` picks the signals the session cares about and wraps them. The
/// subscription is taken before this returns, so no signal published after
/// the call is missed.
pub(crate) fn spawn_signal_forwarder<M, F>(
    tag: String,
    signals: &SignalBus,
    tx: MailboxSender<M>,
    cancel: CancellationToken,
    accept: F,
) -> JoinHandle<()>
where
    M: MailMessage,
    F: Fn(EngineSignal) -> Option<M> + Send + 'static,
{
    let mut rx = signals.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("{} Signal forwarder cancelled", tag);
                    break;
                }
                result = rx.recv() => match result {
                    Ok(signal) => {
                        let Some(msg) = accept(signal) else { continue };
                        if tx.post(msg).await.is_err() {
                            debug!("{} Mailbox closed, forwarder exiting", tag);
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(count)) => {
                        warn!("{} Broadcast receiver lagged, skipped {} messages", tag, count);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("{} Signal bus closed", tag);
                        break;
                    }
                }
            }
        }
    })
}
