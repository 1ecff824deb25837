//! Resource ledger for the fixed pool of tuner/demux paths.
//!
//! Every path assignment goes through this ledger. Live viewing, background
//! timeshift and explicit recordings all claim from the same pool, and the
//! pool state is guarded by one mutex whose critical sections never await.
//!
//! Claims are returned as [`PathClaim`] handles. Releasing is keyed by the
//! handle, so a timeshift claim that was preempted and whose path now belongs
//! to a recording cannot free that path by releasing its stale handle.

use std::collections::BTreeMap;

use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::Deserialize;

/// Index of a hardware path.
pub type PathId = u32;

/// What a path is being used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClaimKind {
    /// Live viewing.
    Live,
    /// Background timeshift recording of the live service.
    Timeshift,
    /// User- or schedule-initiated recording.
    Recording,
}

impl ClaimKind {
    fn is_recording(self) -> bool {
        matches!(self, ClaimKind::Timeshift | ClaimKind::Recording)
    }
}

/// Handle for a claimed path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathClaim {
    path: PathId,
    kind: ClaimKind,
    serial: u64,
}

impl PathClaim {
    pub fn path(&self) -> PathId {
        self.path
    }

    pub fn kind(&self) -> ClaimKind {
        self.kind
    }
}

/// Compliance flags that can force a single recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct CompliancePolicy {
    /// Demux has no recorder limit; overrides the other flags.
    pub dmx_no_limit: bool,
    /// A conditional-access module is present.
    pub cas_ready: bool,
    /// Platform compliance mode.
    pub compliance: bool,
}

impl CompliancePolicy {
    pub fn forces_single_recorder(&self) -> bool {
        !self.dmx_no_limit && (self.cas_ready || self.compliance)
    }
}

/// Error type for ledger claims.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    /// Every path is in use.
    #[error("No free path ({used}/{capacity} in use)")]
    NoFreePath { used: u32, capacity: u32 },

    /// The recorder limit is reached.
    #[error("Recorder limit reached ({active}/{limit})")]
    RecorderLimit { active: u32, limit: u32 },

    /// A timeshift recording already holds a path.
    #[error("Timeshift path already claimed")]
    TimeshiftActive,
}

/// Outcome of a preempting recording claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordingClaim {
    pub claim: PathClaim,
    /// Timeshift claim revoked to make room, if any.
    pub preempted: Option<PathClaim>,
}

/// Point-in-time view of the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub capacity: u32,
    pub recorder_limit: u32,
    pub live: Option<PathId>,
    pub timeshift: Option<PathId>,
    pub recordings: Vec<PathId>,
    pub pending_explicit: u32,
}

impl LedgerSnapshot {
    pub fn used(&self) -> u32 {
        self.recordings.len() as u32
            + self.timeshift.is_some() as u32
            + self.live.is_some() as u32
    }
}

struct PoolState {
    capacity: u32,
    policy: CompliancePolicy,
    slots: BTreeMap<PathId, (ClaimKind, u64)>,
    pending_explicit: u32,
    next_serial: u64,
}

impl PoolState {
    fn recorder_limit(&self) -> u32 {
        if self.capacity > 0 && self.policy.forces_single_recorder() {
            1
        } else {
            self.capacity
        }
    }

    fn recording_count(&self) -> u32 {
        self.slots.values().filter(|(k, _)| k.is_recording()).count() as u32
    }

    fn find(&self, kind: ClaimKind) -> Option<PathClaim> {
        self.slots
            .iter()
            .find(|(_, (k, _))| *k == kind)
            .map(|(path, (kind, serial))| PathClaim {
                path: *path,
                kind: *kind,
                serial: *serial,
            })
    }

    /// A path index below capacity that nobody holds. Claims kept from
    /// before a capacity drop still count against the new capacity.
    fn free_path(&self) -> Result<PathId, LedgerError> {
        let used = self.slots.len() as u32;
        (0..self.capacity)
            .filter(|_| used < self.capacity)
            .find(|p| !self.slots.contains_key(p))
            .ok_or(LedgerError::NoFreePath {
                used,
                capacity: self.capacity,
            })
    }

    fn assign(&mut self, path: PathId, kind: ClaimKind) -> PathClaim {
        self.next_serial += 1;
        self.slots.insert(path, (kind, self.next_serial));
        PathClaim {
            path,
            kind,
            serial: self.next_serial,
        }
    }

    fn claim_recording(&mut self) -> Result<PathClaim, LedgerError> {
        let active = self.recording_count();
        let limit = self.recorder_limit();
        if active >= limit {
            return Err(LedgerError::RecorderLimit { active, limit });
        }
        let path = self.free_path()?;
        Ok(self.assign(path, ClaimKind::Recording))
    }
}

/// Shared ledger of hardware paths.
pub struct ResourceLedger {
    state: Mutex<PoolState>,
}

impl ResourceLedger {
    /// Create a ledger for `capacity` paths.
    pub fn new(capacity: u32, policy: CompliancePolicy) -> Self {
        Self {
            state: Mutex::new(PoolState {
                capacity,
                policy,
                slots: BTreeMap::new(),
                pending_explicit: 0,
                next_serial: 0,
            }),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.state.lock().capacity
    }

    /// Recorder limit after applying the compliance policy.
    pub fn effective_recorder_limit(&self) -> u32 {
        self.state.lock().recorder_limit()
    }

    /// Number of paths held by timeshift or explicit recordings.
    pub fn active_recording_count(&self) -> u32 {
        self.state.lock().recording_count()
    }

    /// Update capacity once the engine reports its recorder count.
    ///
    /// Existing claims above the new capacity are kept until released, and
    /// no new claim succeeds until usage is back under the new capacity.
    /// `used <= capacity` holds again once enough of them are released.
    pub fn set_capacity(&self, capacity: u32) {
        let mut state = self.state.lock();
        if state.capacity != capacity {
            info!("[Ledger] Capacity changed {} -> {}", state.capacity, capacity);
            let used = state.slots.len() as u32;
            if used > capacity {
                warn!(
                    "[Ledger] {} paths in use exceed new capacity {}, holding until released",
                    used, capacity
                );
            }
            state.capacity = capacity;
        }
    }

    pub fn set_compliance(&self, policy: CompliancePolicy) {
        let mut state = self.state.lock();
        info!(
            "[Ledger] Compliance policy updated: {:?} (single recorder: {})",
            policy,
            policy.forces_single_recorder()
        );
        state.policy = policy;
    }

    pub fn compliance(&self) -> CompliancePolicy {
        self.state.lock().policy
    }

    /// Claim the live path.
    ///
    /// Re-claiming while a live claim is held returns the existing claim.
    pub fn try_claim_live(&self) -> Result<PathClaim, LedgerError> {
        let mut state = self.state.lock();
        if let Some(existing) = state.find(ClaimKind::Live) {
            return Ok(existing);
        }
        let path = state.free_path().map_err(|e| {
            warn!("[Ledger] Live claim refused: {}", e);
            e
        })?;
        let claim = state.assign(path, ClaimKind::Live);
        debug!("[Ledger] Live claimed path {}", path);
        Ok(claim)
    }

    /// Claim a path for an explicit recording without preempting anything.
    pub fn try_claim_recording(&self) -> Result<PathClaim, LedgerError> {
        let mut state = self.state.lock();
        let claim = state.claim_recording()?;
        debug!("[Ledger] Recording claimed path {}", claim.path);
        Ok(claim)
    }

    /// Claim a path for background timeshift.
    ///
    /// Pending explicit recordings count against the recorder limit so a
    /// timeshift start cannot take the path an explicit recording is about to
    /// use.
    pub fn try_claim_timeshift(&self) -> Result<PathClaim, LedgerError> {
        let mut state = self.state.lock();
        if state.find(ClaimKind::Timeshift).is_some() {
            return Err(LedgerError::TimeshiftActive);
        }
        let active = state.recording_count() + state.pending_explicit;
        let limit = state.recorder_limit().min(state.capacity);
        if active >= limit {
            return Err(LedgerError::RecorderLimit { active, limit });
        }
        let path = state.free_path()?;
        let claim = state.assign(path, ClaimKind::Timeshift);
        debug!("[Ledger] Timeshift claimed path {}", path);
        Ok(claim)
    }

    /// Claim a path for an explicit recording, revoking a timeshift claim if
    /// that is the only way to make room and `allow_preempt` is set.
    ///
    /// Live and explicit recording claims are never revoked.
    pub fn claim_recording_preempting(
        &self,
        allow_preempt: bool,
    ) -> Result<RecordingClaim, LedgerError> {
        let mut state = self.state.lock();
        let err = match state.claim_recording() {
            Ok(claim) => {
                debug!("[Ledger] Recording claimed path {}", claim.path);
                return Ok(RecordingClaim {
                    claim,
                    preempted: None,
                });
            }
            Err(e) => e,
        };

        let victim = match state.find(ClaimKind::Timeshift) {
            Some(victim) if allow_preempt => victim,
            _ => {
                warn!("[Ledger] Recording claim refused: {}", err);
                return Err(err);
            }
        };

        let claim = state.assign(victim.path, ClaimKind::Recording);
        info!(
            "[Ledger] Path {} preempted from timeshift for recording",
            victim.path
        );
        Ok(RecordingClaim {
            claim,
            preempted: Some(victim),
        })
    }

    /// Release a claim. Stale or repeated releases are no-ops.
    ///
    /// Returns true if the path was freed.
    pub fn release(&self, claim: &PathClaim) -> bool {
        let mut state = self.state.lock();
        match state.slots.get(&claim.path) {
            Some((_, serial)) if *serial == claim.serial => {
                state.slots.remove(&claim.path);
                debug!("[Ledger] Released {:?} path {}", claim.kind, claim.path);
                true
            }
            _ => {
                debug!(
                    "[Ledger] Ignoring stale release of {:?} path {}",
                    claim.kind, claim.path
                );
                false
            }
        }
    }

    /// Whether `claim` still owns its path.
    pub fn is_held(&self, claim: &PathClaim) -> bool {
        matches!(self.state.lock().slots.get(&claim.path), Some((_, s)) if *s == claim.serial)
    }

    /// Mark an explicit recording as pending (tuning, not yet claimed).
    pub fn begin_pending_explicit(&self) {
        self.state.lock().pending_explicit += 1;
    }

    pub fn end_pending_explicit(&self) {
        let mut state = self.state.lock();
        state.pending_explicit = state.pending_explicit.saturating_sub(1);
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        let state = self.state.lock();
        let mut snap = LedgerSnapshot {
            capacity: state.capacity,
            recorder_limit: state.recorder_limit(),
            live: None,
            timeshift: None,
            recordings: Vec::new(),
            pending_explicit: state.pending_explicit,
        };
        for (path, (kind, _)) in &state.slots {
            match kind {
                ClaimKind::Live => snap.live = Some(*path),
                ClaimKind::Timeshift => snap.timeshift = Some(*path),
                ClaimKind::Recording => snap.recordings.push(*path),
            }
        }
        snap
    }
}
