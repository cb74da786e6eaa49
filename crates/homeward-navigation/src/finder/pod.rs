use std::f64::consts::PI;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use homeward_geometry::{Polar, Pose};
use tracing::{info, warn};

use super::{FailureReason, Finder, FinderCore, Fix, PodParams};
use crate::services::MotionProfile;

/// Return-home onto a charging station located by its beacon.
///
/// Home is anchored on the station itself; the robot parks `standoff` meters in
/// front of it, aligned with the station's forward axis.
pub struct PodFinder {
    core: FinderCore,
    params: PodParams,
    init: AtomicBool,
}

impl PodFinder {
    pub(crate) fn new(core: FinderCore, params: PodParams) -> Self {
        Self {
            core,
            params,
            init: AtomicBool::new(false),
        }
    }

    /// Targeted beacon search, capped at the configured timeout.
    async fn look_for_station(&self) -> Option<Pose> {
        let Some(beacon) = self.core.services.beacon.clone() else {
            warn!("No beacon station service available");
            return None;
        };
        let params = &self.params;
        self.core.turn_toward(params.side_point, 0.0).await;
        let distance = self.core.position.distance_from(params.track_point, 0.0);
        self.core.look([distance, 0.0, 0.0]).await;

        let cap = Duration::from_secs_f64(params.search_timeout_secs);
        match tokio::time::timeout(cap, self.core.guarded(beacon.look_for_station())).await {
            Ok(found) => found.flatten().flatten(),
            Err(_) => {
                warn!(timeout = ?cap, "Station search timed out");
                beacon.stop_all();
                None
            }
        }
    }

    fn fix_from(&self, station: Pose) -> Fix {
        self.core.position.init_position_with_coord(station);
        self.init.store(true, Ordering::SeqCst);
        let in_robot = self.core.services.motion.robot_pose().relative(&station);
        let target = in_robot.offset_forward(self.params.standoff);
        info!(%station, %target, "Home localized from station");
        Fix { target, marker: None }
    }
}

impl Finder for PodFinder {
    fn is_init(&self) -> bool {
        self.init.load(Ordering::SeqCst)
    }

    fn uninit(&self) {
        self.init.store(false, Ordering::SeqCst);
    }

    fn cancel(&self) {
        self.core.interrupt.trigger();
        if let Some(beacon) = &self.core.services.beacon {
            beacon.stop_all();
        }
        self.core.services.motion.stop();
    }

    async fn init_home(&self) -> bool {
        let done = self.is_init() || self.return_home(false).await;
        if done {
            self.core.position.init_position();
            self.init.store(true, Ordering::SeqCst);
        }
        done
    }

    async fn find_home(&self, force_full_search: bool) -> Option<Fix> {
        let station = if self.is_init() && !force_full_search {
            self.look_for_station().await
        } else {
            self.search_home().await
        };
        if self.core.interrupted() {
            return None;
        }
        station.map(|station| self.fix_from(station))
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
            Some(found) if Polar::of(&found.target).range > params.close_range => {
                // Aim a bit further out, then turn around to face the station.
                let waypoint = found.target.offset_forward(params.extra_offset);
                on_home = self.core.drive_to(waypoint, PI, MotionProfile::LowSpeed).await;
                fix = None;
            }
            Some(_) => on_home = true,
            None => {
                self.core.fail(FailureReason::NoTarget);
            }
        }

        if on_home {
            if fix.is_none() {
                fix = self.find_home(false).await;
            }
            return match fix {
                Some(found) => {
                    let arrived = self.core.last_move(found.target).await;
                    if !arrived {
                        self.core.fail(FailureReason::Obstacle);
                    }
                    arrived
                }
                None => self.core.fail(FailureReason::NoTarget),
            };
        }
        self.core.give_up()
    }

    /// Sweep while the beacon search runs; whichever finishes first ends the search.
    async fn search_home(&self) -> Option<Pose> {
        let Some(beacon) = self.core.services.beacon.clone() else {
            warn!("No beacon station service available");
            return None;
        };
        info!("Searching for the station");
        let station = beacon.look_for_station();
        let found = tokio::select! {
            biased;
            _ = self.core.interrupt.wait() => None,
            found = station => found.flatten(),
            _ = self.core.sweep() => None,
        };
        beacon.stop_all();
        self.core.services.motion.stop();
        found
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
    use crate::testing::{BeaconReply, FakeBeacon, FakeMotion, FakeTracker};
    use approx::assert_relative_eq;
    use std::sync::Arc;

    struct Rig {
        motion: Arc<FakeMotion>,
        beacon: Arc<FakeBeacon>,
        reason: Arc<ReasonSlot>,
        finder: PodFinder,
    }

    fn rig() -> Rig {
        let motion = Arc::new(FakeMotion::new());
        let beacon = Arc::new(FakeBeacon::default());
        let position = Arc::new(PositionManager::new(
            motion.clone(),
            Arc::new(MemoryStore::new()),
            DEFAULT_MAX_RECORD_AGE,
        ));
        let reason = Arc::new(ReasonSlot::default());
        let services = Services::new(motion.clone())
            .with_tracker(Arc::new(FakeTracker::default()))
            .with_beacon(beacon.clone());
        let core = FinderCore::new(services, position, reason.clone(), Arc::new(Interrupt::new()));
        Rig {
            motion,
            beacon,
            reason,
            finder: PodFinder::new(core, PodParams::default()),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_search_timeout_stops_beacon() {
        let rig = rig();
        rig.finder.init.store(true, Ordering::SeqCst);
        rig.beacon.reply(BeaconReply::Hang);

        let started = tokio::time::Instant::now();
        assert!(rig.finder.find_home(false).await.is_none());
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert_eq!(rig.beacon.stops(), 1);
        assert_eq!(rig.beacon.live_searches(), 0);
    }

    #[tokio::test]
    async fn test_fix_in_front_of_station() {
        let rig = rig();
        rig.finder.init.store(true, Ordering::SeqCst);
        // station 2 m ahead, facing the robot
        let station = Pose::new(2.0, 0.0, PI);
        rig.beacon.reply(BeaconReply::Found(station));

        let fix = rig.finder.find_home(false).await.unwrap();
        let robot = rig.motion.robot_pose();
        let expected = robot.relative(&station).offset_forward(0.7);
        assert!(fix.target.approx_eq(&expected, 1e-9), "{}", fix.target);
        assert!(rig.finder.core.position.home_frame().approx_eq(&station, 1e-9));
    }

    #[tokio::test]
    async fn test_return_home_parks_at_standoff() {
        let rig = rig();
        rig.finder.init.store(true, Ordering::SeqCst);
        let station = Pose::new(2.0, 0.0, PI);
        rig.beacon.always(station);

        assert!(rig.finder.return_home(false).await);
        let parked = rig.motion.robot_pose();
        assert!(parked.approx_eq(&station.offset_forward(0.7), 1e-6), "{parked}");
        assert_relative_eq!(parked.theta.abs(), PI, epsilon = 1e-6);
        assert_eq!(rig.reason.get(), FailureReason::Unknown);
    }

    #[tokio::test]
    async fn test_lost_beacon_is_no_target() {
        let rig = rig();
        rig.beacon.reply(BeaconReply::NotFound);
        assert!(!rig.finder.return_home(false).await);
        assert_eq!(rig.reason.get(), FailureReason::NoTarget);
    }

    #[tokio::test]
    async fn test_blocked_approach_is_obstacle() {
        let rig = rig();
        rig.finder.init.store(true, Ordering::SeqCst);
        rig.motion.set_pose(Pose::new(3.0, 0.0, 0.0));
        rig.motion.fail_next(1);
        assert!(!rig.finder.return_home(false).await);
        assert_eq!(rig.reason.get(), FailureReason::Obstacle);
        assert_eq!(rig.beacon.searches(), 0);
    }
}
