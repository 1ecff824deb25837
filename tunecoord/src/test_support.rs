//! Shared fixtures for session and coordinator tests.

use std::sync::Arc;
use std::time::Duration;

use tunecoord_protocol::{Channel, Program, ServiceType};

use crate::catalog::{Catalog, CatalogHandle};
use crate::clock::ManualClock;
use crate::config::{CoordinatorConfig, ParentalConfig};
use crate::coordinator::Coordinator;
use crate::directory::StaticDirectory;
use crate::engine::{SignalBus, SimulatedEngine, SimulatedOptions};
use crate::session::live::LiveHandle;
use crate::session::recording::RecordingHandle;
use crate::session::{event_channel, EventReceiver, SessionEvent};
use crate::tuner::CompliancePolicy;

pub const START_MS: i64 = 1_700_000_000_000;

pub struct Harness {
    pub coordinator: Coordinator,
    pub engine: Arc<SimulatedEngine>,
    pub clock: Arc<ManualClock>,
    pub catalog: CatalogHandle,
}

pub fn channel(id: i64, sid: u32) -> Channel {
    Channel {
        id,
        dvb_uri: format!("dvb://233a.1041.{:x}", sid),
        name: format!("Channel {}", id),
        service_type: ServiceType::AudioVideo,
    }
}

impl Harness {
    pub async fn new(recorders: u32) -> Self {
        Self::with_config(recorders, CoordinatorConfig::default(), ParentalConfig::default())
            .await
    }

    pub async fn with_config(
        recorders: u32,
        config: CoordinatorConfig,
        parental: ParentalConfig,
    ) -> Self {
        let signals = SignalBus::new(256);
        let engine = Arc::new(SimulatedEngine::new(
            SimulatedOptions {
                recorders,
                ..Default::default()
            },
            signals.clone(),
        ));
        let directory = Arc::new(StaticDirectory::new(
            vec![channel(1, 0x1041), channel(2, 0x1042), channel(3, 0x1043)],
            vec![Program {
                id: 10,
                channel_id: 1,
                title: "News".into(),
                start_ms: START_MS,
                end_ms: START_MS + 3_600_000,
                event_id: Some(0x21),
            }],
        ));
        let catalog = Catalog::open_in_memory()
            .expect("in-memory catalog")
            .into_handle();
        let clock = Arc::new(ManualClock::new(START_MS));
        let coordinator = Coordinator::new(
            engine.clone(),
            signals,
            directory,
            catalog.clone(),
            config,
            CompliancePolicy::default(),
            parental,
        )
        .with_clock(clock.clone());
        coordinator.discover_capacity().await;
        Self {
            coordinator,
            engine,
            clock,
            catalog,
        }
    }

    pub async fn open_live(&self) -> (LiveHandle, EventReceiver) {
        let (tx, rx) = event_channel();
        (self.coordinator.open_live_session(tx).await, rx)
    }

    pub fn open_recording(&self) -> (RecordingHandle, EventReceiver) {
        let (tx, rx) = event_channel();
        (self.coordinator.open_recording_session(tx), rx)
    }
}

/// Wait for the first event matching `pred`, skipping others.
pub async fn next_event<F>(rx: &mut EventReceiver, pred: F) -> SessionEvent
where
    F: Fn(&SessionEvent) -> bool,
{
    let wait = async {
        while let Some(event) = rx.recv().await {
            if pred(&event) {
                return event;
            }
        }
        panic!("event channel closed");
    };
    tokio::time::timeout(Duration::from_secs(120), wait)
        .await
        .expect("timed out waiting for event")
}
