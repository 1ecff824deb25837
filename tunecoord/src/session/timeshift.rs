//! Background timeshift recording state and the time-shift window.
//!
//! The controller holds no engine or ledger reference. The live session owns
//! it, performs the engine calls and feeds the results back in, which keeps
//! every transition on the live session's loop.

use crate::tuner::PathClaim;

/// Timeshift recorder state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeshiftState {
    Stopped,
    /// Start issued, waiting for the recorder to report `recording`.
    Starting,
    Recording,
}

/// What a seek request turns into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekAction {
    /// Switch from live to timeshift playback.
    EnterTimeshift { from_current: bool },
    /// Seek within the current playback, in seconds.
    SeekSecs(i64),
}

#[derive(Debug)]
pub struct TimeshiftController {
    state: TimeshiftState,
    timeshifting: bool,
    claim: Option<PathClaim>,
    /// Stream time at which the recorder started.
    original_start_ms: i64,
    /// Earliest position still inside the window.
    start_position_ms: i64,
    window_secs: i64,
}

impl TimeshiftController {
    pub fn new(window_secs: i64) -> Self {
        Self {
            state: TimeshiftState::Stopped,
            timeshifting: false,
            claim: None,
            original_start_ms: 0,
            start_position_ms: 0,
            window_secs,
        }
    }

    pub fn state(&self) -> TimeshiftState {
        self.state
    }

    /// Playback is coming from the timeshift buffer rather than live.
    pub fn is_timeshifting(&self) -> bool {
        self.timeshifting
    }

    pub fn claim(&self) -> Option<PathClaim> {
        self.claim
    }

    pub fn is_stopped(&self) -> bool {
        self.state == TimeshiftState::Stopped
    }

    /// `Player.startTimeshiftRecording` was accepted on `claim`.
    pub fn on_start_issued(&mut self, claim: PathClaim) {
        self.claim = Some(claim);
        if self.state == TimeshiftState::Stopped {
            self.state = TimeshiftState::Starting;
        }
    }

    /// The recorder reported `recording`. Starts a new episode unless one is
    /// already running.
    pub fn on_recording(&mut self, now_ms: i64) {
        if self.state != TimeshiftState::Recording {
            self.state = TimeshiftState::Recording;
            self.timeshifting = false;
            self.original_start_ms = now_ms;
            self.start_position_ms = now_ms;
        }
    }

    /// Back to `Stopped`; hands back the claim for release.
    pub fn reset(&mut self) -> Option<PathClaim> {
        self.state = TimeshiftState::Stopped;
        self.timeshifting = false;
        self.claim.take()
    }

    /// Flip into timeshift playback. One way per recording episode; returns
    /// false when already timeshifting or not recording.
    pub fn enter_timeshifting(&mut self) -> bool {
        if self.state == TimeshiftState::Recording && !self.timeshifting {
            self.timeshifting = true;
            true
        } else {
            false
        }
    }

    /// Slide the window start given the buffered length in seconds.
    ///
    /// The start position never moves backwards within an episode.
    pub fn slide_window(&mut self, buffered_secs: i64) -> i64 {
        if buffered_secs > self.window_secs {
            let candidate = self.original_start_ms + (buffered_secs - self.window_secs) * 1000;
            if candidate > self.start_position_ms {
                self.start_position_ms = candidate;
            }
        }
        self.start_position_ms
    }

    /// Start of the seekable range, if a recording episode exists.
    pub fn start_position_ms(&self) -> Option<i64> {
        match self.state {
            TimeshiftState::Stopped | TimeshiftState::Starting => None,
            TimeshiftState::Recording => Some(self.start_position_ms),
        }
    }

    /// Current playback position. `elapsed_secs` is the player's elapsed
    /// time and only matters while timeshifting.
    pub fn current_position_ms(&self, elapsed_secs: Option<i64>, now_ms: i64) -> i64 {
        match (self.timeshifting, elapsed_secs) {
            (true, Some(elapsed)) => self.original_start_ms + elapsed * 1000,
            _ => now_ms,
        }
    }

    pub fn seek(&mut self, position_ms: i64) -> SeekAction {
        if self.state != TimeshiftState::Recording {
            return SeekAction::SeekSecs(position_ms / 1000);
        }
        if self.enter_timeshifting() {
            SeekAction::EnterTimeshift {
                from_current: position_ms != self.start_position_ms,
            }
        } else {
            SeekAction::SeekSecs(((position_ms - self.original_start_ms) / 1000).max(0))
        }
    }
}
