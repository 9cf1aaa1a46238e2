//! Pomodoro-style focus timer.
//!
//! A plain state machine driven by [`FocusTimer::tick`], called once per
//! second by whoever owns the timer. It knows nothing about wall time.

use std::fmt;

/// Which interval the timer is counting down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Work interval.
    Focus,
    /// Rest interval.
    Break,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Focus => f.write_str("focus"),
            Self::Break => f.write_str("break"),
        }
    }
}

/// Interval lengths in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FocusDurations {
    /// Length of a focus interval.
    pub focus_secs: u32,
    /// Length of a break.
    pub break_secs: u32,
}

impl Default for FocusDurations {
    fn default() -> Self {
        Self::from_minutes(25, 5)
    }
}

impl FocusDurations {
    /// Durations given in whole minutes.
    #[must_use]
    pub const fn from_minutes(focus: u32, rest: u32) -> Self {
        Self {
            focus_secs: focus.saturating_mul(60),
            break_secs: rest.saturating_mul(60),
        }
    }

    const fn of(self, phase: Phase) -> u32 {
        match phase {
            Phase::Focus => self.focus_secs,
            Phase::Break => self.break_secs,
        }
    }
}

/// Countdown timer alternating focus and break intervals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FocusTimer {
    durations: FocusDurations,
    phase: Phase,
    remaining: u32,
    running: bool,
}

impl FocusTimer {
    /// An idle timer at the start of a focus interval.
    #[must_use]
    pub const fn new(durations: FocusDurations) -> Self {
        Self {
            durations,
            phase: Phase::Focus,
            remaining: durations.focus_secs,
            running: false,
        }
    }

    /// Starts or resumes the countdown.
    pub const fn start(&mut self) {
        self.running = true;
    }

    /// Pauses without losing the remaining time.
    pub const fn pause(&mut self) {
        self.running = false;
    }

    /// Back to an idle focus interval at full length.
    pub fn reset(&mut self) {
        *self = Self::new(self.durations);
    }

    /// Advances one second.
    ///
    /// When the countdown reaches zero the timer stops, switches phase and
    /// loads the new phase's full duration. Returns the new phase in that
    /// case, `None` otherwise.
    pub fn tick(&mut self) -> Option<Phase> {
        if !self.running {
            return None;
        }
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining > 0 {
            return None;
        }
        self.running = false;
        self.phase = match self.phase {
            Phase::Focus => Phase::Break,
            Phase::Break => Phase::Focus,
        };
        self.remaining = self.durations.of(self.phase);
        tracing::debug!(phase = %self.phase, "focus timer switched phase");
        Some(self.phase)
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Seconds left in the current interval.
    #[must_use]
    pub const fn remaining(&self) -> u32 {
        self.remaining
    }

    /// Whether the countdown is running.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.running
    }

    /// Remaining time as `MM:SS`.
    #[must_use]
    pub fn display(&self) -> String {
        format!("{:02}:{:02}", self.remaining / 60, self.remaining % 60)
    }
}

impl Default for FocusTimer {
    fn default() -> Self {
        Self::new(FocusDurations::default())
    }
}
