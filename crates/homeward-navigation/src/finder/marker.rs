use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use homeward_geometry::{Polar, Pose};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{FailureReason, Finder, FinderCore, Fix, MarkerKind, MarkerParams};
use crate::services::{Detections, MarkerSpec, MotionProfile};

/// Return-home through a pair of floor fiducials: a big marker readable from
/// afar and a small one for the last half meter.
pub struct MarkerFinder {
    core: FinderCore,
    params: MarkerParams,
    init: AtomicBool,
    /// Detections collected by the last sweep.
    seen: Mutex<Detections>,
}

impl MarkerFinder {
    pub(crate) fn new(core: FinderCore, params: MarkerParams) -> Self {
        Self {
            core,
            params,
            init: AtomicBool::new(false),
            seen: Mutex::new(Detections::new()),
        }
    }

    fn spec(&self, kind: MarkerKind) -> MarkerSpec {
        match kind {
            MarkerKind::Big => MarkerSpec {
                id: self.params.big_id,
                size: self.params.big_size,
            },
            MarkerKind::Small => MarkerSpec {
                id: self.params.small_id,
                size: self.params.small_size,
            },
        }
    }

    fn id(&self, kind: MarkerKind) -> u32 {
        self.spec(kind).id
    }

    /// Both markers, expected one first.
    fn specs(&self, expected: MarkerKind) -> [MarkerSpec; 2] {
        [self.spec(expected), self.spec(other(expected))]
    }

    /// Decide which marker should be in view from the last known position.
    fn expected_marker(&self) -> Option<(MarkerKind, f64)> {
        let position = &self.core.position;
        let to_big = position.distance_from(0.0, 0.0);
        if to_big > self.params.big_threshold {
            return Some((MarkerKind::Big, to_big));
        }
        let to_small = position.distance_from(self.params.small_offset, 0.0);
        if to_small > self.params.small_threshold {
            return Some((MarkerKind::Small, to_small));
        }
        None
    }

    async fn targeted_detection(&self, expected: MarkerKind, distance: f64) -> Option<Detections> {
        let Some(markers) = self.core.services.markers.clone() else {
            warn!("No marker detector available");
            return None;
        };
        match expected {
            MarkerKind::Big => self.core.turn_toward(0.0, 0.0).await,
            MarkerKind::Small => self.core.turn_toward(1.0, 0.0).await,
        };
        self.core.look([distance, 0.0, 0.0]).await;
        let timeout = Duration::from_secs_f64(self.params.detection_timeout_secs);
        self.core
            .guarded(markers.find(&self.specs(expected), timeout))
            .await
            .flatten()
    }

    /// Sweep with a live subscription until any marker shows up.
    async fn sweep_for_markers(&self) -> Detections {
        let Some(markers) = self.core.services.markers.clone() else {
            warn!("No marker detector available");
            return Detections::new();
        };
        info!("Searching for markers");
        let mut stream = markers.watch(&self.specs(MarkerKind::Big));
        let hit = tokio::select! {
            biased;
            _ = self.core.interrupt.wait() => None,
            Some(detection) = stream.recv() => Some(detection),
            _ = self.core.sweep() => None,
        };
        drop(stream);
        self.core.services.motion.stop();

        let mut seen = self.seen.lock();
        if let Some(detection) = hit {
            debug!(id = detection.id, "Marker spotted during sweep");
            seen.insert(detection.id, detection.pose);
        }
        seen.clone()
    }

    /// Turn detections into a home fix, preferring the expected marker.
    fn fix_from(&self, detections: &Detections, expected: MarkerKind) -> Option<Fix> {
        let kind = [expected, other(expected)]
            .into_iter()
            .find(|kind| detections.contains_key(&self.id(*kind)))?;
        let marker = detections.get(&self.id(kind))?.planar();
        let odom = self.core.services.motion.robot_pose();
        let in_robot = odom.relative(&marker);

        let (home_odom, target) = match kind {
            MarkerKind::Big => {
                let turn = self.params.big_heading_deg.to_radians();
                (
                    Pose::new(marker.x, marker.y, Pose::normalize_angle(marker.theta + turn)),
                    Pose::new(in_robot.x, in_robot.y, Pose::normalize_angle(in_robot.theta + turn)),
                )
            }
            MarkerKind::Small => {
                let turn = self.params.small_heading_deg.to_radians();
                let standoff = self.params.small_standoff;
                let back_off = |p: Pose| {
                    let heading = Pose::normalize_angle(p.theta + turn);
                    Pose::new(p.x, p.y, heading).offset_forward(-standoff)
                };
                (back_off(marker), back_off(in_robot))
            }
        };

        self.core.position.init_position_with_coord(home_odom);
        self.init.store(true, Ordering::SeqCst);
        info!(marker = ?kind, %target, "Home localized from marker");
        Some(Fix {
            target,
            marker: Some(kind),
        })
    }
}

fn other(kind: MarkerKind) -> MarkerKind {
    match kind {
        MarkerKind::Big => MarkerKind::Small,
        MarkerKind::Small => MarkerKind::Big,
    }
}

impl Finder for MarkerFinder {
    fn is_init(&self) -> bool {
        self.init.load(Ordering::SeqCst)
    }

    fn uninit(&self) {
        self.init.store(false, Ordering::SeqCst);
        self.seen.lock().clear();
    }

    fn cancel(&self) {
        self.core.interrupt.trigger();
        self.core.services.motion.stop();
        self.seen.lock().clear();
    }

    async fn init_home(&self) -> bool {
        let done = self.is_init() || self.return_home(false).await;
        if done {
            self.core.position.init_position();
            self.init.store(true, Ordering::SeqCst);
            self.seen.lock().clear();
        }
        done
    }

    async fn find_home(&self, force_full_search: bool) -> Option<Fix> {
        let (expected, detections) = if self.is_init() && !force_full_search {
            let (expected, distance) = self.expected_marker()?;
            debug!(?expected, distance, "Looking for expected marker");
            (expected, self.targeted_detection(expected, distance).await?)
        } else {
            info!("Lost, sweeping for markers");
            (MarkerKind::Big, self.sweep_for_markers().await)
        };
        if self.core.interrupted() {
            return None;
        }
        let fix = self.fix_from(&detections, expected);
        if fix.is_none() {
            warn!(?expected, "No marker found");
        }
        fix
    }

    async fn return_home(&self, force_full_search: bool) -> bool {
        let params = &self.params;
        if !force_full_search && self.core.needs_approach(self.is_init(), params.approach_distance) {
            if !self.core.approach_home(params.approach_distance).await {
                return self.core.fail(FailureReason::Obstacle);
            }
        }

        let mut fix = self.find_home(force_full_search).await;
        let mut on_home = false;
        match fix {
            Some(found) => {
                let range = Polar::of(&found.target).range;
                let far_small = found.marker == Some(MarkerKind::Small) && range > params.close_range;
                if found.marker == Some(MarkerKind::Big) || far_small {
                    on_home = self
                        .core
                        .drive_to(found.target, 0.0, MotionProfile::LowSpeed)
                        .await;
                    // Re-localize on the small marker from up close.
                    fix = if on_home { self.find_home(false).await } else { None };
                } else {
                    on_home = true;
                }
            }
            None => {
                self.core.fail(FailureReason::NoTarget);
            }
        }

        if on_home {
            return match fix {
                Some(found) if found.marker == Some(MarkerKind::Small) => {
                    let arrived = self.core.last_move(found.target).await;
                    if arrived {
                        self.seen.lock().clear();
                    } else {
                        self.core.fail(FailureReason::Obstacle);
                    }
                    arrived
                }
                _ => self.core.fail(FailureReason::NoTarget),
            };
        }
        self.core.give_up()
    }

    async fn search_home(&self) -> Option<Pose> {
        let detections = self.sweep_for_markers().await;
        [MarkerKind::Big, MarkerKind::Small]
            .into_iter()
            .find_map(|kind| detections.get(&self.id(kind)))
            .map(|pose| pose.planar())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finder::ReasonSlot;
    use crate::interrupt::Interrupt;
    use crate::position::{DEFAULT_MAX_RECORD_AGE, PositionManager};
    use crate::record::MemoryStore;
    use crate::services::{Motion, Services};
    use crate::testing::{FakeMarkers, FakeMotion, FakeTracker};
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;
    use std::sync::Arc;

    struct Rig {
        motion: Arc<FakeMotion>,
        markers: Arc<FakeMarkers>,
        reason: Arc<ReasonSlot>,
        finder: MarkerFinder,
    }

    fn rig() -> Rig {
        let motion = Arc::new(FakeMotion::new());
        let markers = Arc::new(FakeMarkers::new(motion.clone()));
        let position = Arc::new(PositionManager::new(
            motion.clone(),
            Arc::new(MemoryStore::new()),
            DEFAULT_MAX_RECORD_AGE,
        ));
        let reason = Arc::new(ReasonSlot::default());
        let services = Services::new(motion.clone())
            .with_tracker(Arc::new(FakeTracker::default()))
            .with_markers(markers.clone());
        let core = FinderCore::new(services, position, reason.clone(), Arc::new(Interrupt::new()));
        Rig {
            motion,
            markers,
            reason,
            finder: MarkerFinder::new(core, MarkerParams::default()),
        }
    }

    #[tokio::test]
    async fn test_small_marker_fix_uses_standoff() {
        let rig = rig();
        rig.finder.init.store(true, Ordering::SeqCst);
        // Home was defined at the odometric origin; the robot is 0.5 m from it.
        rig.motion.set_pose(Pose::new(0.0, 0.5, -FRAC_PI_2));
        // Only the small marker is in view, 0.3 m from the robot.
        let small = Pose::new(0.0, 0.2, 0.0);
        rig.markers.place(448, small);

        let fix = rig.finder.find_home(false).await.unwrap();
        assert_eq!(fix.marker, Some(MarkerKind::Small));
        assert_eq!(rig.markers.requested_ids(), vec![vec![448, 128]]);

        let heading = 135f64.to_radians();
        let expected_home = Pose::new(small.x, small.y, heading).offset_forward(-0.61);
        let home = rig.finder.core.position.home_frame();
        assert!(home.approx_eq(&expected_home, 1e-9), "{home}");
        let in_robot = rig.motion.robot_pose().relative(&expected_home);
        assert!(fix.target.approx_eq(&in_robot, 1e-9));
    }

    #[tokio::test]
    async fn test_big_marker_fix_turns_heading() {
        let rig = rig();
        rig.finder.init.store(true, Ordering::SeqCst);
        rig.motion.set_pose(Pose::new(2.0, 0.0, 0.0));
        rig.markers.place(128, Pose::new(0.0, 0.0, 0.0));

        let fix = rig.finder.find_home(false).await.unwrap();
        assert_eq!(fix.marker, Some(MarkerKind::Big));
        // the robot turned to face the marker before detecting it
        assert_relative_eq!(fix.target.x, 2.0, epsilon = 1e-9);
        assert_relative_eq!(fix.target.y, 0.0, epsilon = 1e-9);
        assert_relative_eq!(fix.target.theta, std::f64::consts::FRAC_PI_4, epsilon = 1e-9);
    }

    #[tokio::test]
    async fn test_falls_back_to_other_marker() {
        let rig = rig();
        rig.finder.init.store(true, Ordering::SeqCst);
        rig.motion.set_pose(Pose::new(2.0, 0.0, 0.0));
        rig.markers.place(448, Pose::new(0.5, 0.0, 0.0));

        let fix = rig.finder.find_home(false).await.unwrap();
        assert_eq!(fix.marker, Some(MarkerKind::Small));
    }

    #[tokio::test]
    async fn test_too_close_expects_nothing() {
        let rig = rig();
        rig.finder.init.store(true, Ordering::SeqCst);
        rig.motion.set_pose(Pose::new(0.5, 0.0, 0.0));
        rig.markers.place(128, Pose::new(0.0, 0.0, 0.0));
        assert!(rig.finder.find_home(false).await.is_none());
        assert!(rig.markers.requested_ids().is_empty());
    }

    #[tokio::test]
    async fn test_nothing_visible_is_no_target() {
        let rig = rig();
        assert!(!rig.finder.return_home(false).await);
        assert_eq!(rig.reason.get(), FailureReason::NoTarget);
        // the sweep ran to completion
        assert_eq!(rig.motion.calls().len(), 7);
        assert!(rig.motion.stops() >= 1);
    }

    #[tokio::test]
    async fn test_sweep_stops_on_sighting() {
        let rig = rig();
        rig.markers.place(128, Pose::new(1.0, 0.0, 0.0));
        let found = rig.finder.search_home().await.unwrap();
        assert!(found.approx_eq(&Pose::new(1.0, 0.0, 0.0), 1e-9));
        assert!(rig.motion.calls().is_empty());
        assert_eq!(rig.markers.live_watchers(), 0);
    }

    #[tokio::test]
    async fn test_close_small_marker_goes_straight_to_final_move() {
        let rig = rig();
        rig.finder.init.store(true, Ordering::SeqCst);
        rig.motion.set_pose(Pose::new(0.0, 0.5, -FRAC_PI_2));
        // Small marker placed so that home is 0.2 m ahead of the robot.
        let home = Pose::new(0.0, 0.3, -FRAC_PI_2);
        let small = home
            .offset_forward(0.61)
            .compose(&Pose::new(0.0, 0.0, -135f64.to_radians()));
        rig.markers.place(448, small);

        assert!(rig.finder.return_home(false).await);
        let calls = rig.motion.calls();
        // turn toward the marker side, then the two final legs
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[1].profile, MotionProfile::LowSpeed);
        assert_relative_eq!(calls[1].dx.hypot(calls[1].dy), 0.2, epsilon = 1e-6);
        assert_eq!(calls[2].dx, 0.0);
        assert!(rig.motion.robot_pose().approx_eq(&home, 1e-6));
        assert_eq!(rig.reason.get(), FailureReason::Unknown);
    }

    #[tokio::test]
    async fn test_blocked_final_move_is_obstacle() {
        let rig = rig();
        rig.finder.init.store(true, Ordering::SeqCst);
        rig.motion.set_pose(Pose::new(0.0, 0.5, -FRAC_PI_2));
        let home = Pose::new(0.0, 0.3, -FRAC_PI_2);
        let small = home
            .offset_forward(0.61)
            .compose(&Pose::new(0.0, 0.0, -135f64.to_radians()));
        rig.markers.place(448, small);
        rig.motion.fail_after(1);

        assert!(!rig.finder.return_home(false).await);
        assert_eq!(rig.reason.get(), FailureReason::Obstacle);
    }

    #[tokio::test]
    async fn test_cancel_keeps_init() {
        let rig = rig();
        rig.finder.init.store(true, Ordering::SeqCst);
        rig.finder.cancel();
        assert!(rig.finder.is_init());
        assert_eq!(rig.motion.stops(), 1);
        assert!(rig.finder.find_home(true).await.is_none());
    }
}
