use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::{debug, info};

use super::Awareness;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackingMode {
    #[default]
    Head,
    BodyRotation,
    WholeBody,
    /// Follow the person with the base, keeping a relative position.
    Navigate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngagementMode {
    #[default]
    Unengaged,
    SemiEngaged,
    FullyEngaged,
}

/// Awareness settings touched while engaging someone.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TrackingSettings {
    pub mode: TrackingMode,
    pub engagement: EngagementMode,
    /// Target position relative to the person: `[x, y, x threshold, y threshold, theta threshold]`.
    pub relative_position: [f64; 5],
}

pub const ENGAGE_TRACKING: TrackingSettings = TrackingSettings {
    mode: TrackingMode::Navigate,
    engagement: EngagementMode::FullyEngaged,
    relative_position: [-0.5, 0.0, 0.3, 0.2, 0.007],
};

/// Closer than this, the person is reached (m).
pub const ENGAGEMENT_DISTANCE: f64 = 0.6;

/// Tracking overrides applied while going to someone, restored afterward.
pub struct EngageOverrides {
    awareness: Arc<dyn Awareness>,
    running: AtomicBool,
    saved: Mutex<Option<TrackingSettings>>,
}

impl EngageOverrides {
    pub fn new(awareness: Arc<dyn Awareness>) -> Self {
        Self {
            awareness,
            running: AtomicBool::new(false),
            saved: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.saved.lock() = Some(self.awareness.tracking());
        self.awareness.set_tracking(&ENGAGE_TRACKING);
        info!("Tracking set to navigate");
    }

    /// Restore the saved settings. Also runs when not started but the
    /// settings were changed behind our back.
    pub fn stop(&self) {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        if !was_running && self.is_reset() {
            return;
        }
        if let Some(saved) = *self.saved.lock() {
            self.awareness.set_tracking(&saved);
            debug!(?saved, "Tracking restored");
        }
    }

    fn is_reset(&self) -> bool {
        match *self.saved.lock() {
            Some(saved) => self.awareness.tracking() == saved,
            None => true,
        }
    }

    /// The person being approached is gone or already reached.
    pub fn should_leave(distance_to_human: f64) -> bool {
        distance_to_human < ENGAGEMENT_DISTANCE
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;

    #[derive(Debug, Default)]
    pub struct FakeAwareness {
        pub running: AtomicBool,
        pub settings: Mutex<TrackingSettings>,
    }

    impl Awareness for FakeAwareness {
        fn start(&self) {
            self.running.store(true, Ordering::SeqCst);
        }

        fn stop(&self) {
            self.running.store(false, Ordering::SeqCst);
        }

        fn tracking(&self) -> TrackingSettings {
            *self.settings.lock()
        }

        fn set_tracking(&self, settings: &TrackingSettings) {
            *self.settings.lock() = *settings;
        }
    }
}
