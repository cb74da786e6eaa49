//! Proactive mobility: decides when the robot wanders, engages someone or
//! goes back home.

mod engage;
mod feedback;
mod machine;
mod transitions;

use std::fmt;
use std::sync::Arc;

use homeward_geometry::Pose;
use homeward_navigation::HomeFinder;
use homeward_navigation::services::{Motion, Tracker};

use crate::config::Preferences;

pub use engage::{TrackingMode, TrackingSettings};
pub use feedback::{Cue, Feedback, LogFeedback, ReachCause};
pub use machine::ProactiveMobility;

pub const DEFINE_HOME_ACTIVITY: &str = "proactive-mobility/sethome";
pub const GO_HOME_ACTIVITY: &str = "proactive-mobility/gohome";
pub const GO_ENGAGE_ACTIVITY: &str = "proactive-mobility/goengage";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BehaviorState {
    Undefined,
    DefiningHome,
    AtHome,
    GoEngage,
    #[default]
    Wandering,
    GoingHome,
    SafeguardGoingHome,
}

impl fmt::Display for BehaviorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BehaviorState::Undefined => "UNDEFINED",
            BehaviorState::DefiningHome => "DEFINING_HOME",
            BehaviorState::AtHome => "AT_HOME",
            BehaviorState::GoEngage => "GO_ENGAGE",
            BehaviorState::Wandering => "WANDERING",
            BehaviorState::GoingHome => "GOING_HOME",
            BehaviorState::SafeguardGoingHome => "SAFEGUARD_GOING_HOME",
        })
    }
}

/// Life-cycle state of the robot as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifeState {
    #[default]
    Unknown,
    /// Nobody around; the robot entertains itself.
    Solitary,
    Interactive,
    /// A safety incident stopped the robot.
    Safeguard,
    Disabled,
}

/// Inputs of the behavior.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    LifeState(LifeState),
    FaceDetected(bool),
    /// Distance to the tracked person; negative when nobody is tracked.
    HumanDistance(f64),
    FocusedActivity(Option<String>),
    /// A move was stopped, with the obstacle position when the base reported one.
    MoveFailed(Option<Pose>),
    BatteryHatchOpen(bool),
    Preferences(Preferences),
}

/// Why going home right now makes sense.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoHomeReason {
    Bored,
    Lost,
}

pub trait Perception: Send + Sync {
    fn face_detected(&self) -> bool;
}

/// Head and body tracking of people.
pub trait Awareness: Send + Sync {
    fn start(&self);
    fn stop(&self);
    fn tracking(&self) -> TrackingSettings;
    fn set_tracking(&self, settings: &TrackingSettings);
}

/// The activity scheduler.
pub trait Activities: Send + Sync {
    fn focused(&self) -> Option<String>;
    fn stop_focus(&self);
}

/// Everything the behavior talks to.
#[derive(Clone)]
pub struct Robot {
    pub home: Arc<HomeFinder>,
    pub motion: Arc<dyn Motion>,
    pub tracker: Option<Arc<dyn Tracker>>,
    pub perception: Arc<dyn Perception>,
    pub awareness: Arc<dyn Awareness>,
    pub activities: Arc<dyn Activities>,
    pub feedback: Arc<dyn Feedback>,
}

impl fmt::Debug for Robot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Robot")
            .field("home", &self.home)
            .field("tracker", &self.tracker.is_some())
            .finish_non_exhaustive()
    }
}
