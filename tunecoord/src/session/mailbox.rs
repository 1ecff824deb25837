//! Bounded per-session mailbox with send-time coalescing.
//!
//! Each session owns one [`Mailbox`] drained by a single task. Senders may
//! post plainly (FIFO), post with "cancel prior of same kind" semantics, or
//! schedule a delayed self-post. Cancellation is resolved at send time: every
//! envelope carries a ticket, and a per-kind floor marks which tickets are
//! stale. The receiver silently drops stale envelopes.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use log::trace;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

/// A message that can be posted to a session mailbox.
pub trait MailMessage: Send + 'static {
    type Kind: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static;

    fn kind(&self) -> Self::Kind;
}

/// Error type for mailbox posts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MailboxError {
    #[error("Mailbox closed")]
    Closed,
    #[error("Mailbox full")]
    Full,
}

struct Envelope<M: MailMessage> {
    epoch: u64,
    kind: M::Kind,
    ticket: u64,
    msg: M,
}

struct Slots<K> {
    epoch: u64,
    next_ticket: u64,
    /// Envelopes of a kind with a ticket at or below the floor are stale.
    floors: HashMap<K, u64>,
    timers: HashMap<K, AbortHandle>,
    closed: bool,
}

impl<K: Copy + Eq + Hash> Slots<K> {
    fn ticket(&mut self) -> u64 {
        self.next_ticket += 1;
        self.next_ticket
    }

    fn is_live(&self, epoch: u64, kind: K, ticket: u64) -> bool {
        !self.closed
            && epoch == self.epoch
            && self.floors.get(&kind).map_or(true, |floor| ticket > *floor)
    }

    /// Invalidate every outstanding envelope of `kind`.
    fn cancel(&mut self, kind: K) {
        let floor = self.next_ticket;
        self.floors.insert(kind, floor);
        if let Some(timer) = self.timers.remove(&kind) {
            timer.abort();
        }
    }

    fn clear(&mut self) {
        self.epoch += 1;
        self.floors.clear();
        for (_, timer) in self.timers.drain() {
            timer.abort();
        }
    }
}

/// Sending half of a session mailbox.
pub struct MailboxSender<M: MailMessage> {
    tx: mpsc::Sender<Envelope<M>>,
    slots: Arc<Mutex<Slots<M::Kind>>>,
}

impl<M: MailMessage> Clone for MailboxSender<M> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            slots: Arc::clone(&self.slots),
        }
    }
}

/// Receiving half of a session mailbox.
pub struct Mailbox<M: MailMessage> {
    rx: mpsc::Receiver<Envelope<M>>,
    slots: Arc<Mutex<Slots<M::Kind>>>,
}

/// Create a mailbox holding at most `capacity` queued envelopes.
pub fn mailbox<M: MailMessage>(capacity: usize) -> (MailboxSender<M>, Mailbox<M>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let slots = Arc::new(Mutex::new(Slots {
        epoch: 0,
        next_ticket: 0,
        floors: HashMap::new(),
        timers: HashMap::new(),
        closed: false,
    }));
    (
        MailboxSender {
            tx,
            slots: Arc::clone(&slots),
        },
        Mailbox { rx, slots },
    )
}

impl<M: MailMessage> MailboxSender<M> {
    fn envelope(&self, msg: M, coalesce: bool) -> Result<Envelope<M>, MailboxError> {
        let mut slots = self.slots.lock();
        Self::seal(&mut slots, msg, coalesce)
    }

    fn seal(
        slots: &mut Slots<M::Kind>,
        msg: M,
        coalesce: bool,
    ) -> Result<Envelope<M>, MailboxError> {
        if slots.closed {
            return Err(MailboxError::Closed);
        }
        let kind = msg.kind();
        if coalesce {
            slots.cancel(kind);
        }
        Ok(Envelope {
            epoch: slots.epoch,
            kind,
            ticket: slots.ticket(),
            msg,
        })
    }

    /// Post in FIFO order.
    pub async fn post(&self, msg: M) -> Result<(), MailboxError> {
        let env = self.envelope(msg, false)?;
        self.tx.send(env).await.map_err(|_| MailboxError::Closed)
    }

    /// Post after cancelling every pending message of the same kind.
    pub async fn post_latest(&self, msg: M) -> Result<(), MailboxError> {
        let env = self.envelope(msg, true)?;
        self.tx.send(env).await.map_err(|_| MailboxError::Closed)
    }

    /// Non-blocking FIFO post.
    pub fn try_post(&self, msg: M) -> Result<(), MailboxError> {
        let env = self.envelope(msg, false)?;
        self.tx.try_send(env).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => MailboxError::Full,
            mpsc::error::TrySendError::Closed(_) => MailboxError::Closed,
        })
    }

    /// Post `msg` after `delay`, replacing any pending message of its kind.
    pub fn post_delayed(&self, msg: M, delay: Duration) -> Result<(), MailboxError> {
        let mut slots = self.slots.lock();
        let env = Self::seal(&mut slots, msg, true)?;
        let kind = env.kind;
        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(env).await;
        });
        if let Some(old) = slots.timers.insert(kind, handle.abort_handle()) {
            old.abort();
        }
        Ok(())
    }

    /// Drop every pending message of `kind`, queued or scheduled.
    pub fn cancel(&self, kind: M::Kind) {
        self.slots.lock().cancel(kind);
    }

    /// Drop every pending message.
    pub fn clear(&self) {
        self.slots.lock().clear();
    }

    /// Drop every pending message and refuse further posts.
    pub fn close(&self) {
        let mut slots = self.slots.lock();
        slots.clear();
        slots.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.slots.lock().closed || self.tx.is_closed()
    }
}

impl<M: MailMessage> Mailbox<M> {
    /// Next live message, or `None` once every sender is gone or the
    /// mailbox was closed.
    pub async fn recv(&mut self) -> Option<M> {
        loop {
            let env = self.rx.recv().await?;
            let slots = self.slots.lock();
            if slots.closed {
                return None;
            }
            if slots.is_live(env.epoch, env.kind, env.ticket) {
                return Some(env.msg);
            }
            trace!("Dropping stale {:?} message", env.kind);
        }
    }

    /// Close the mailbox from the receiving side.
    pub fn close(&mut self) {
        {
            let mut slots = self.slots.lock();
            slots.clear();
            slots.closed = true;
        }
        self.rx.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    enum Msg {
        Tune(u32),
        Poll(u32),
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Kind {
        Tune,
        Poll,
    }

    impl MailMessage for Msg {
        type Kind = Kind;

        fn kind(&self) -> Kind {
            match self {
                Msg::Tune(_) => Kind::Tune,
                Msg::Poll(_) => Kind::Poll,
            }
        }
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let (tx, mut rx) = mailbox::<Msg>(8);
        tx.post(Msg::Tune(1)).await.unwrap();
        tx.post(Msg::Poll(1)).await.unwrap();
        tx.post(Msg::Tune(2)).await.unwrap();
        assert_eq!(rx.recv().await, Some(Msg::Tune(1)));
        assert_eq!(rx.recv().await, Some(Msg::Poll(1)));
        assert_eq!(rx.recv().await, Some(Msg::Tune(2)));
    }

    #[tokio::test]
    async fn test_post_latest_cancels_prior_of_same_kind() {
        let (tx, mut rx) = mailbox::<Msg>(8);
        tx.post(Msg::Tune(1)).await.unwrap();
        tx.post(Msg::Poll(1)).await.unwrap();
        tx.post_latest(Msg::Tune(2)).await.unwrap();
        assert_eq!(rx.recv().await, Some(Msg::Poll(1)));
        assert_eq!(rx.recv().await, Some(Msg::Tune(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_post_replaced_and_cancelled() {
        let (tx, mut rx) = mailbox::<Msg>(8);
        tx.post_delayed(Msg::Poll(1), Duration::from_secs(5)).unwrap();
        tx.post_delayed(Msg::Poll(2), Duration::from_secs(1)).unwrap();
        tx.post_delayed(Msg::Tune(3), Duration::from_secs(2)).unwrap();
        assert_eq!(rx.recv().await, Some(Msg::Poll(2)));
        tx.cancel(Kind::Tune);
        tx.post_delayed(Msg::Poll(4), Duration::from_secs(10)).unwrap();
        assert_eq!(rx.recv().await, Some(Msg::Poll(4)));
    }

    #[tokio::test]
    async fn test_clear_and_close() {
        let (tx, mut rx) = mailbox::<Msg>(8);
        tx.post(Msg::Tune(1)).await.unwrap();
        tx.clear();
        tx.post(Msg::Tune(2)).await.unwrap();
        assert_eq!(rx.recv().await, Some(Msg::Tune(2)));

        tx.close();
        assert!(tx.is_closed());
        assert_eq!(tx.post(Msg::Tune(3)).await, Err(MailboxError::Closed));
        assert_eq!(tx.try_post(Msg::Tune(3)), Err(MailboxError::Closed));
    }

    #[tokio::test]
    async fn test_try_post_full() {
        let (tx, _rx) = mailbox::<Msg>(1);
        tx.try_post(Msg::Poll(1)).unwrap();
        assert_eq!(tx.try_post(Msg::Poll(2)), Err(MailboxError::Full));
    }
}
