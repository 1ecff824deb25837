//! tunecoord: tuner path, timeshift and recording coordination for DVB
//! playback.
//!
//! A [`Coordinator`] owns the [`ResourceLedger`] of hardware paths and hands
//! out sessions: one live session (tune, playback and background timeshift)
//! and any number of explicit recording sessions. Sessions talk to the
//! tuning engine through an [`EngineGateway`] and react to the signals it
//! publishes on a [`SignalBus`].

pub mod catalog;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod directory;
pub mod engine;
pub mod logging;
pub mod session;
pub mod tuner;

#[cfg(test)]
mod test_support;

pub use coordinator::{ComplianceListener, Coordinator, OnChange, TimeshiftListener};
pub use engine::{EngineClient, EngineGateway, SignalBus, SimulatedEngine};
pub use session::live::LiveHandle;
pub use session::{RecordingHandle, SessionEvent};
pub use tuner::{CompliancePolicy, ResourceLedger};
