//! Engine gateway: the request/response channel to the tuning engine and the
//! independent signal bus it pushes notifications on.

pub mod client;
pub mod simulated;

use async_trait::async_trait;
use log::{debug, warn};
use serde_json::Value;
use tokio::sync::broadcast;

use tunecoord_protocol::{EngineError, EngineSignal};

pub use client::EngineClient;
pub use simulated::{SimulatedEngine, SimulatedOptions};

/// Synchronous-from-the-caller request channel to the engine.
///
/// Returns the `data` member of the engine reply.
#[async_trait]
pub trait EngineGateway: Send + Sync {
    async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value, EngineError>;
}

/// Broadcast bus carrying decoded engine signals.
#[derive(Clone)]
pub struct SignalBus {
    tx: broadcast::Sender<EngineSignal>,
}

impl SignalBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Decode and publish a raw engine signal.
    pub fn publish(&self, name: &str, payload: &Value) {
        self.publish_signal(EngineSignal::decode(name, payload));
    }

    pub fn publish_signal(&self, signal: EngineSignal) {
        if let EngineSignal::Unknown { name } = &signal {
            warn!("[Engine] Unrecognized signal: {}", name);
        }
        match self.tx.send(signal) {
            Ok(n) => debug!("[Engine] Signal delivered to {} subscriber(s)", n),
            Err(e) => debug!("[Engine] Signal {} dropped, no subscribers", e.0.name()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineSignal> {
        self.tx.subscribe()
    }
}

impl Default for SignalBus {
    fn default() -> Self {
        Self::new(64)
    }
}
