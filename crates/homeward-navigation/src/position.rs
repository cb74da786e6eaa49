//! Home-frame bookkeeping on top of raw odometry.
//!
//! The [`PositionManager`] is the only writer of the home frame. Everything else
//! reads the robot pose through it, expressed in the home frame.

use std::sync::Arc;
use std::time::Duration;

use homeward_geometry::{Polar, Pose};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::pending::Pending;
use crate::record::{HomeRecord, HomeRecordStore};
use crate::services::{Motion, MotionProfile};

/// Records older than this are discarded at startup.
pub const DEFAULT_MAX_RECORD_AGE: Duration = Duration::from_secs(600);

const POSITIONAL_DRIFT_RATE: f64 = 0.03;
const ANGULAR_DRIFT_RATE: f64 = 0.01;
const TURN_DEADBAND_DEG: f64 = 1.0;
const RESET_ANGLE_DEADBAND_DEG: f64 = 10.0;

/// Heuristic odometric error accumulated since the home frame was last defined.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DriftEstimate {
    /// Positional error (m).
    pub positional: f64,
    /// Angular error (rad).
    pub angular: f64,
}

#[derive(Debug)]
struct PositionState {
    home_frame: Pose,
    robot_in_home: Pose,
    displacement_origin: Pose,
    drift: DriftEstimate,
}

pub struct PositionManager {
    motion: Arc<dyn Motion>,
    store: Arc<dyn HomeRecordStore>,
    state: Mutex<PositionState>,
}

impl PositionManager {
    /// Build the manager, restoring a record younger than `max_record_age` if
    /// the store has one and anchoring home at the current odometry otherwise.
    pub fn new(
        motion: Arc<dyn Motion>,
        store: Arc<dyn HomeRecordStore>,
        max_record_age: Duration,
    ) -> Self {
        let state = PositionState {
            home_frame: motion.robot_pose(),
            robot_in_home: Pose::identity(),
            displacement_origin: motion.cumulative_displacement(),
            drift: DriftEstimate::default(),
        };
        let manager = Self {
            motion,
            store,
            state: Mutex::new(state),
        };
        manager.restore(max_record_age);
        manager
    }

    fn restore(&self, max_record_age: Duration) {
        match self.store.load() {
            Ok(Some(record)) if record.is_fresh(max_record_age) => {
                match (record.home_frame.to_pose(), record.robot_in_home.to_pose()) {
                    (Ok(home_frame), Ok(robot_in_home)) => {
                        info!(%home_frame, "Restored home frame from record");
                        let mut state = self.state.lock();
                        state.home_frame = home_frame;
                        state.robot_in_home = robot_in_home;
                    }
                    (Err(e), _) | (_, Err(e)) => warn!(error = %e, "Ignoring unreadable home record"),
                }
            }
            Ok(Some(_)) => info!("Home record is stale, re-initializing from odometry"),
            Ok(None) => debug!("No home record found"),
            Err(e) => warn!(error = %e, "Failed to load home record"),
        }
        self.persist();
    }

    /// Anchor home at the current odometric pose.
    pub fn init_position(&self) {
        let odom = self.motion.robot_pose();
        self.anchor(odom, Pose::identity());
        info!(home_frame = %odom, "Home initialized at current position");
    }

    /// Anchor home at a pose given in the odometric frame.
    pub fn init_position_with_coord(&self, home_frame: Pose) {
        self.anchor(home_frame, home_frame.relative(&home_frame));
        info!(%home_frame, "Home initialized at given coordinates");
    }

    fn anchor(&self, home_frame: Pose, robot_in_home: Pose) {
        let origin = self.motion.cumulative_displacement();
        {
            let mut state = self.state.lock();
            state.home_frame = home_frame;
            state.robot_in_home = robot_in_home;
            state.displacement_origin = origin;
            state.drift = DriftEstimate::default();
        }
        self.persist();
    }

    fn persist(&self) {
        let record = {
            let state = self.state.lock();
            HomeRecord::new(state.home_frame, state.robot_in_home)
        };
        if let Err(e) = self.store.save(&record) {
            warn!(error = %e, "Failed to save home record");
        }
    }

    /// Recompute the robot pose from odometry, persisting it when it moved.
    fn refresh(&self) -> Pose {
        let odom = self.motion.robot_pose();
        let (pose, moved) = {
            let mut state = self.state.lock();
            let pose = state.home_frame.relative(&odom);
            let moved = !pose.approx_eq(&state.robot_in_home, 1e-9);
            state.robot_in_home = pose;
            (pose, moved)
        };
        if moved {
            self.persist();
        }
        pose
    }

    /// Robot pose in the home frame.
    pub fn robot_pose(&self) -> Pose {
        self.refresh()
    }

    /// Distance from the robot to a home-frame point.
    pub fn distance_from(&self, x: f64, y: f64) -> f64 {
        self.refresh().distance_to(x, y)
    }

    /// Bearing of a home-frame point as seen from the robot, in `(-PI, PI]`.
    pub fn bearing_from(&self, x: f64, y: f64) -> f64 {
        self.refresh().bearing_to(x, y)
    }

    /// Robot heading in the home frame.
    pub fn orientation(&self) -> f64 {
        self.refresh().theta
    }

    /// The home frame in odometric coordinates.
    pub fn home_frame(&self) -> Pose {
        self.state.lock().home_frame
    }

    /// The home pose expressed in the robot frame.
    pub fn home_in_robot_frame(&self) -> Pose {
        self.refresh().inverse()
    }

    /// Polar coordinates of the home origin in the robot frame.
    pub fn home_polar(&self) -> Polar {
        Polar::of(&self.home_in_robot_frame())
    }

    /// Current drift estimate. Never decreases until home is re-anchored.
    pub fn drift_estimate(&self) -> DriftEstimate {
        let now = self.motion.cumulative_displacement();
        let mut state = self.state.lock();
        let dx = now.x - state.displacement_origin.x;
        let dy = now.y - state.displacement_origin.y;
        let dtheta = now.theta - state.displacement_origin.theta;
        let positional = dx.hypot(dy) * POSITIONAL_DRIFT_RATE;
        let angular = dtheta.abs() * ANGULAR_DRIFT_RATE;
        state.drift.positional = state.drift.positional.max(positional);
        state.drift.angular = state.drift.angular.max(angular);
        state.drift
    }

    /// Rotate toward a home-frame point. Resolves immediately with `true` when
    /// the point is already within a degree of straight ahead.
    pub fn turn_toward(&self, x: f64, y: f64) -> Pending<bool> {
        let bearing = self.bearing_from(x, y);
        if bearing.to_degrees().abs() < TURN_DEADBAND_DEG {
            return Pending::ready(true);
        }
        debug!(x, y, bearing, "Turning toward home-frame point");
        self.motion.move_to(0.0, 0.0, bearing, MotionProfile::Default)
    }

    /// Rotate back to the home heading unless already within 10 degrees of it.
    pub fn reset_angle(&self) -> Pending<bool> {
        let orientation = self.orientation();
        if orientation.to_degrees().abs() < RESET_ANGLE_DEADBAND_DEG {
            return Pending::ready(true);
        }
        debug!(orientation, "Resetting body angle");
        self.motion.move_to(0.0, 0.0, -orientation, MotionProfile::Default)
    }
}

impl std::fmt::Debug for PositionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PositionManager")
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::MemoryStore;
    use crate::testing::FakeMotion;
    use approx::assert_relative_eq;
    use std::f64::consts::{FRAC_PI_2, PI};

    fn manager_at(pose: Pose) -> (Arc<FakeMotion>, Arc<MemoryStore>, PositionManager) {
        let motion = Arc::new(FakeMotion::at(pose));
        let store = Arc::new(MemoryStore::new());
        let manager = PositionManager::new(motion.clone(), store.clone(), DEFAULT_MAX_RECORD_AGE);
        (motion, store, manager)
    }

    #[test]
    fn test_robot_at_home_frame_is_identity() {
        let home = Pose::new(2.0, 1.0, FRAC_PI_2);
        let (motion, _store, manager) = manager_at(Pose::identity());
        manager.init_position_with_coord(home);
        motion.set_pose(home);
        let pose = manager.robot_pose();
        assert!(pose.approx_eq(&Pose::identity(), 1e-9), "{pose}");
    }

    #[test]
    fn test_pose_in_home_frame() {
        let (motion, _store, manager) = manager_at(Pose::new(2.0, 1.0, FRAC_PI_2));
        manager.init_position();
        // one meter forward along +y in odometry is one meter ahead of home
        motion.set_pose(Pose::new(2.0, 2.0, FRAC_PI_2));
        let pose = manager.robot_pose();
        assert!(pose.approx_eq(&Pose::new(1.0, 0.0, 0.0), 1e-9), "{pose}");
        assert_relative_eq!(manager.distance_from(0.0, 0.0), 1.0, epsilon = 1e-9);
        assert_relative_eq!(manager.bearing_from(0.0, 0.0).abs(), PI, epsilon = 1e-9);
        let home = manager.home_in_robot_frame();
        assert!(home.approx_eq(&Pose::new(-1.0, 0.0, 0.0), 1e-9), "{home}");
    }

    #[test]
    fn test_drift_monotonic_and_reset() {
        let (motion, _store, manager) = manager_at(Pose::identity());
        assert_eq!(manager.drift_estimate(), DriftEstimate::default());

        motion.add_displacement(Pose::new(10.0, 0.0, 0.0));
        let first = manager.drift_estimate();
        assert_relative_eq!(first.positional, 0.3, epsilon = 1e-9);

        motion.add_displacement(Pose::new(0.0, 0.0, 50.0));
        let second = manager.drift_estimate();
        assert!(second.positional >= first.positional);
        assert_relative_eq!(second.angular, 0.5, epsilon = 1e-9);

        manager.init_position();
        assert_eq!(manager.drift_estimate(), DriftEstimate::default());

        motion.add_displacement(Pose::new(1.0, 0.0, 0.0));
        manager.init_position_with_coord(Pose::new(3.0, 0.0, 0.0));
        assert_eq!(manager.drift_estimate(), DriftEstimate::default());
    }

    #[test]
    fn test_fresh_record_is_restored() {
        let motion = Arc::new(FakeMotion::at(Pose::new(5.0, 5.0, 0.0)));
        let home = Pose::new(1.0, -1.0, 0.5);
        let store = Arc::new(MemoryStore::with_record(HomeRecord::new(home, Pose::identity())));
        let manager = PositionManager::new(motion, store, DEFAULT_MAX_RECORD_AGE);
        assert!(manager.home_frame().approx_eq(&home, 1e-9));
    }

    #[test]
    fn test_stale_record_is_discarded() {
        let odom = Pose::new(5.0, 5.0, 0.0);
        let motion = Arc::new(FakeMotion::at(odom));
        let mut record = HomeRecord::new(Pose::new(1.0, -1.0, 0.5), Pose::identity());
        record.timestamp -= 601.0;
        let store = Arc::new(MemoryStore::with_record(record));
        let manager = PositionManager::new(motion, store.clone(), DEFAULT_MAX_RECORD_AGE);
        assert!(manager.home_frame().approx_eq(&odom, 1e-9));
        let saved = store.latest().unwrap();
        assert!(saved.is_fresh(DEFAULT_MAX_RECORD_AGE));
    }

    #[test]
    fn test_mutations_are_persisted() {
        let (motion, store, manager) = manager_at(Pose::identity());
        manager.init_position_with_coord(Pose::new(1.0, 0.0, 0.0));
        assert_eq!(store.latest().unwrap().home_frame.position, [1.0, 0.0]);
        motion.set_pose(Pose::new(2.0, 0.0, 0.0));
        manager.robot_pose();
        assert_eq!(store.latest().unwrap().robot_in_home.position, [1.0, 0.0]);
    }

    #[test]
    fn test_moved_pose_is_persisted_by_any_read() {
        let (motion, store, manager) = manager_at(Pose::identity());
        manager.init_position();

        motion.set_pose(Pose::new(2.0, 0.0, 0.0));
        assert_relative_eq!(manager.distance_from(0.0, 0.0), 2.0, epsilon = 1e-9);
        assert_eq!(store.latest().unwrap().robot_in_home.position, [2.0, 0.0]);

        motion.set_pose(Pose::new(2.0, 1.0, FRAC_PI_2));
        assert_relative_eq!(manager.orientation(), FRAC_PI_2, epsilon = 1e-9);
        let saved = store.latest().unwrap().robot_in_home.to_pose().unwrap();
        assert!(saved.approx_eq(&Pose::new(2.0, 1.0, FRAC_PI_2), 1e-9), "{saved}");
    }

    #[tokio::test]
    async fn test_turn_toward_deadband() {
        let (motion, _store, manager) = manager_at(Pose::identity());
        assert_eq!(manager.turn_toward(2.0, 0.01).await, Some(true));
        assert!(motion.calls().is_empty());

        assert_eq!(manager.turn_toward(0.0, 1.0).await, Some(true));
        let calls = motion.calls();
        assert_eq!(calls.len(), 1);
        assert_relative_eq!(calls[0].dtheta, FRAC_PI_2, epsilon = 1e-9);
    }

    #[tokio::test]
    async fn test_reset_angle() {
        let (motion, _store, manager) = manager_at(Pose::identity());
        motion.set_pose(Pose::new(0.0, 0.0, 0.1));
        assert_eq!(manager.reset_angle().await, Some(true));
        assert!(motion.calls().is_empty());

        motion.set_pose(Pose::new(0.0, 0.0, 1.0));
        assert_eq!(manager.reset_angle().await, Some(true));
        assert_relative_eq!(motion.calls()[0].dtheta, -1.0, epsilon = 1e-9);
        assert_relative_eq!(motion.robot_pose().theta, 0.0, epsilon = 1e-9);
    }
}
