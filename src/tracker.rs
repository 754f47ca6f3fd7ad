//! Debounced presence state machine.
//!
//! The tracker turns one face count per tick into presence events:
//!
//! * any tick with a face emits `true` and refreshes the last-seen time;
//! * an empty tick emits `false` once more than the absence threshold has
//!   passed since the last face, and keeps emitting it on every empty tick
//!   after that;
//! * every other tick emits nothing.
//!
//! Nothing is emitted for absence until a face has been seen at least once.

use std::time::{Duration, Instant};

pub const DEFAULT_ABSENCE_THRESHOLD: Duration = Duration::from_millis(20_000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceState {
    /// No face has been seen this session.
    NeverSeen,
    /// A face was seen within the absence threshold.
    RecentlyPresent,
    /// The last face is older than the absence threshold.
    LongAbsent,
}

impl PresenceState {
    pub fn is_present(self) -> bool {
        self == Self::RecentlyPresent
    }
}

#[derive(Debug, Clone)]
pub struct PresenceTracker {
    absence_threshold: Duration,
    last_seen: Option<Instant>,
    state: PresenceState,
}

impl PresenceTracker {
    pub fn new(absence_threshold: Duration) -> Self {
        Self {
            absence_threshold,
            last_seen: None,
            state: PresenceState::NeverSeen,
        }
    }

    pub fn state(&self) -> PresenceState {
        self.state
    }

    pub fn last_seen(&self) -> Option<Instant> {
        self.last_seen
    }

    pub fn absence_threshold(&self) -> Duration {
        self.absence_threshold
    }

    /// Feed one tick; returns the presence event to deliver, if any.
    pub fn on_tick(&mut self, detections: usize, now: Instant) -> Option<bool> {
        if detections > 0 {
            self.last_seen = Some(now);
            self.state = PresenceState::RecentlyPresent;
            return Some(true);
        }

        let last_seen = self.last_seen?;
        if now.saturating_duration_since(last_seen) > self.absence_threshold {
            self.state = PresenceState::LongAbsent;
            Some(false)
        } else {
            None
        }
    }

    /// Forget everything seen so far.
    pub fn reset(&mut self) {
        self.last_seen = None;
        self.state = PresenceState::NeverSeen;
    }
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self::new(DEFAULT_ABSENCE_THRESHOLD)
    }
}
