//! Collaborator boundary: motion, head tracking, marker detection, beacon
//! search and map localization.
//!
//! Every command that takes time returns a [`Pending`] so the caller can race it
//! against cancellation. Queries return immediately.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use homeward_geometry::Pose;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::pending::Pending;

/// Named speed configuration for a motion command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MotionProfile {
    #[default]
    Default,
    LowSpeed,
    HighSpeed,
}

/// Velocity and acceleration caps applied to a motion command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionLimits {
    /// Linear speed cap (m/s).
    pub max_vel_xy: f64,
    /// Linear acceleration cap (m/s²).
    pub max_acc_xy: f64,
    /// Angular speed cap (rad/s).
    pub max_vel_theta: f64,
    /// Angular acceleration cap (rad/s²).
    pub max_acc_theta: f64,
}

const DEFAULT_LIMITS: MotionLimits = MotionLimits {
    max_vel_xy: 0.35,
    max_acc_xy: 0.55,
    max_vel_theta: 1.0,
    max_acc_theta: 3.0,
};

impl MotionProfile {
    pub fn limits(self) -> MotionLimits {
        match self {
            MotionProfile::Default => DEFAULT_LIMITS,
            MotionProfile::LowSpeed => MotionLimits {
                max_vel_xy: 0.15,
                max_acc_xy: 0.15,
                max_vel_theta: 0.5,
                max_acc_theta: 0.325,
            },
            // Only the linear caps change; rotation keeps the defaults.
            MotionProfile::HighSpeed => MotionLimits {
                max_vel_xy: 0.25,
                max_acc_xy: 0.3,
                ..DEFAULT_LIMITS
            },
        }
    }
}

impl fmt::Display for MotionProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MotionProfile::Default => "default",
            MotionProfile::LowSpeed => "low-speed",
            MotionProfile::HighSpeed => "high-speed",
        };
        f.write_str(name)
    }
}

/// Base motion actuator.
///
/// Poses are in the odometric frame.
pub trait Motion: Send + Sync {
    /// Move by `(dx, dy)` then rotate by `dtheta`, all relative to the current robot frame.
    fn move_to(&self, dx: f64, dy: f64, dtheta: f64, profile: MotionProfile) -> Pending<bool>;

    /// Rotate in place by `bearing` radians.
    fn turn_to(&self, bearing: f64) -> Pending<bool> {
        self.move_to(0.0, 0.0, Pose::normalize_angle(bearing), MotionProfile::Default)
    }

    /// Abort whatever the base is doing. Idempotent. Any in-flight command
    /// completes with `false`.
    fn stop(&self);

    /// Current odometric pose.
    fn robot_pose(&self) -> Pose;

    /// Total displacement since boot. The heading is the accumulated rotation,
    /// not wrapped to `(-PI, PI]`.
    fn cumulative_displacement(&self) -> Pose;
}

/// Frame a look-at target is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame {
    Robot,
    World,
}

/// Head/gaze tracker.
pub trait Tracker: Send + Sync {
    fn look_at(&self, target: [f64; 3], frame: Frame) -> Pending<bool>;
}

/// A fiducial marker the detector should look for.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarkerSpec {
    pub id: u32,
    /// Edge length (m).
    pub size: f64,
}

/// Detected pose of a target in the odometric frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TargetPose {
    Planar(Pose),
    /// `[x, y, z, roll, pitch, yaw]`
    Spatial([f64; 6]),
}

impl TargetPose {
    /// Projection onto the floor plane.
    pub fn planar(&self) -> Pose {
        match *self {
            TargetPose::Planar(pose) => pose,
            TargetPose::Spatial(v) => Pose::new(v[0], v[1], v[5]),
        }
    }
}

/// Markers found in one detection pass, keyed by id.
pub type Detections = HashMap<u32, TargetPose>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub id: u32,
    pub pose: TargetPose,
}

/// Camera-side marker pose estimator.
pub trait MarkerDetector: Send + Sync {
    /// One detection pass. An empty map means nothing was seen before `timeout`.
    fn find(&self, markers: &[MarkerSpec], timeout: Duration) -> Pending<Detections>;

    /// Continuous detection. Dropping the receiver releases the subscription.
    fn watch(&self, markers: &[MarkerSpec]) -> mpsc::UnboundedReceiver<Detection>;
}

/// Charging-station beacon search.
pub trait BeaconStation: Send + Sync {
    /// Look for the station. Resolves with its odometric pose, or `None` if the search gave up.
    fn look_for_station(&self) -> Pending<Option<Pose>>;

    /// Abort any running station search.
    fn stop_all(&self);
}

/// Map-based localizer.
pub trait SlamLocalizer: Send + Sync {
    /// Robot pose in the current map, if localized.
    fn robot_pose_in_map(&self) -> Option<Pose>;
    fn reset_map(&self);
    fn start_localization(&self);
    fn stop_localization(&self);
    fn stop_navigation(&self);
}

/// Typed handles to every collaborator. Only motion is mandatory; the rest are
/// checked for presence before use.
#[derive(Clone)]
pub struct Services {
    pub motion: Arc<dyn Motion>,
    pub tracker: Option<Arc<dyn Tracker>>,
    pub markers: Option<Arc<dyn MarkerDetector>>,
    pub beacon: Option<Arc<dyn BeaconStation>>,
    pub slam: Option<Arc<dyn SlamLocalizer>>,
}

impl Services {
    pub fn new(motion: Arc<dyn Motion>) -> Self {
        Self {
            motion,
            tracker: None,
            markers: None,
            beacon: None,
            slam: None,
        }
    }

    pub fn with_tracker(mut self, tracker: Arc<dyn Tracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn with_markers(mut self, markers: Arc<dyn MarkerDetector>) -> Self {
        self.markers = Some(markers);
        self
    }

    pub fn with_beacon(mut self, beacon: Arc<dyn BeaconStation>) -> Self {
        self.beacon = Some(beacon);
        self
    }

    pub fn with_slam(mut self, slam: Arc<dyn SlamLocalizer>) -> Self {
        self.slam = Some(slam);
        self
    }
}

impl fmt::Debug for Services {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Services")
            .field("tracker", &self.tracker.is_some())
            .field("markers", &self.markers.is_some())
            .field("beacon", &self.beacon.is_some())
            .field("slam", &self.slam.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_high_speed_keeps_default_rotation() {
        let high = MotionProfile::HighSpeed.limits();
        assert_eq!(high.max_vel_xy, 0.25);
        assert_eq!(high.max_vel_theta, MotionProfile::Default.limits().max_vel_theta);
        assert!(MotionProfile::LowSpeed.limits().max_vel_theta < high.max_vel_theta);
    }

    #[test]
    fn test_spatial_target_uses_yaw() {
        let target = TargetPose::Spatial([1.0, 2.0, 0.3, 0.1, 0.2, 1.5]);
        assert_eq!(target.planar(), Pose::new(1.0, 2.0, 1.5));
    }
}
