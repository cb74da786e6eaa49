use std::f64::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use homeward_geometry::{Polar, Pose};
use tracing::{debug, info, warn};

use super::{FailureReason, Finder, FinderCore, Fix, SlamParams};
use crate::services::MotionProfile;

/// Return-home on a temporary map whose origin is home.
pub struct SlamFinder {
    core: FinderCore,
    params: SlamParams,
    init: AtomicBool,
}

impl SlamFinder {
    pub(crate) fn new(core: FinderCore, params: SlamParams) -> Self {
        Self {
            core,
            params,
            init: AtomicBool::new(false),
        }
    }

    fn fix_from(&self, robot_in_map: Pose) -> Fix {
        Fix {
            target: robot_in_map.inverse(),
            marker: None,
        }
    }

    /// Stop localization, turn once on the spot to see the surroundings, then
    /// restart localization on a fresh map anchored here.
    async fn build_temporary_map(&self) -> bool {
        let Some(slam) = self.core.services.slam.clone() else {
            warn!("No localizer available");
            return false;
        };
        info!("Building temporary map");
        slam.stop_localization();
        // A full turn: not normalized.
        let turned = self
            .core
            .leg(|| self.core.services.motion.move_to(0.0, 0.0, TAU, MotionProfile::Default))
            .await;
        if turned {
            slam.reset_map();
            slam.start_localization();
        }
        info!(turned, "Temporary map done");
        turned
    }

    async fn wait_for_localization(&self) -> Option<Pose> {
        let slam = self.core.services.slam.clone()?;
        let mut poll = tokio::time::interval(Duration::from_millis(self.params.poll_interval_ms));
        loop {
            poll.tick().await;
            if let Some(pose) = slam.robot_pose_in_map() {
                return Some(pose);
            }
        }
    }
}

impl Finder for SlamFinder {
    fn is_init(&self) -> bool {
        self.init.load(Ordering::SeqCst)
    }

    fn uninit(&self) {
        self.init.store(false, Ordering::SeqCst);
        if let Some(slam) = &self.core.services.slam {
            slam.stop_localization();
        }
    }

    fn cancel(&self) {
        self.core.interrupt.trigger();
        if let Some(slam) = &self.core.services.slam {
            slam.stop_navigation();
        }
        self.core.services.motion.stop();
    }

    async fn init_home(&self) -> bool {
        let done = self.build_temporary_map().await;
        if done {
            self.init.store(true, Ordering::SeqCst);
        }
        done
    }

    async fn find_home(&self, force_full_search: bool) -> Option<Fix> {
        if !self.is_init() {
            return None;
        }
        let slam = self.core.services.slam.clone()?;
        let pose = match slam.robot_pose_in_map() {
            Some(pose) if !force_full_search => Some(pose),
            _ => self.search_home().await,
        }?;
        debug!(robot_in_map = %pose, "Map pose");
        Some(self.fix_from(pose))
    }

    async fn return_home(&self, force_full_search: bool) -> bool {
        let params = &self.params;
        let mut on_home = false;
        match self.find_home(force_full_search).await {
            Some(found) if Polar::of(&found.target).range > params.close_range => {
                let polar = Polar::of(&found.target);
                if self.core.rotate(polar.bearing, MotionProfile::Default).await
                    && self
                        .core
                        .translate_with_slowdown(polar.range, params.slowdown_distance)
                        .await
                {
                    on_home = true;
                    self.core
                        .rotate(found.target.theta - polar.bearing, MotionProfile::Default)
                        .await;
                }
            }
            Some(_) => on_home = true,
            None => {
                self.core.fail(FailureReason::NoTarget);
            }
        }

        if on_home {
            return match self.find_home(false).await {
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

    async fn search_home(&self) -> Option<Pose> {
        info!("Sweeping until the map pose is back");
        let found = tokio::select! {
            biased;
            _ = self.core.interrupt.wait() => None,
            pose = self.wait_for_localization() => pose,
            _ = self.core.sweep() => None,
        };
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
    use crate::services::{Motion, Services, SlamLocalizer};
    use crate::testing::{FakeMotion, FakeSlam};
    use approx::assert_relative_eq;
    use std::sync::Arc;

    struct Rig {
        motion: Arc<FakeMotion>,
        slam: Arc<FakeSlam>,
        reason: Arc<ReasonSlot>,
        finder: SlamFinder,
    }

    fn rig() -> Rig {
        let motion = Arc::new(FakeMotion::new());
        let slam = Arc::new(FakeSlam::new(motion.clone()));
        let position = Arc::new(PositionManager::new(
            motion.clone(),
            Arc::new(MemoryStore::new()),
            DEFAULT_MAX_RECORD_AGE,
        ));
        let reason = Arc::new(ReasonSlot::default());
        let services = Services::new(motion.clone()).with_slam(slam.clone());
        let core = FinderCore::new(services, position, reason.clone(), Arc::new(Interrupt::new()));
        Rig {
            motion,
            slam,
            reason,
            finder: SlamFinder::new(core, SlamParams::default()),
        }
    }

    #[tokio::test]
    async fn test_init_builds_map() {
        let rig = rig();
        rig.motion.set_pose(Pose::new(1.0, 1.0, 0.3));
        assert!(rig.finder.init_home().await);
        assert!(rig.finder.is_init());

        assert_eq!(rig.motion.calls()[0].dtheta, TAU);
        assert_eq!(
            rig.slam.journal(),
            vec!["stop_localization", "reset_map", "start_localization"]
        );
        let in_map = rig.slam.robot_pose_in_map().unwrap();
        assert!(in_map.approx_eq(&Pose::identity(), 1e-9));
    }

    #[tokio::test]
    async fn test_failed_turn_leaves_uninitialized() {
        let rig = rig();
        rig.motion.fail_next(1);
        assert!(!rig.finder.init_home().await);
        assert!(!rig.finder.is_init());
        assert_eq!(rig.slam.journal(), vec!["stop_localization"]);
    }

    #[tokio::test]
    async fn test_return_home_from_far() {
        let rig = rig();
        assert!(rig.finder.init_home().await);
        rig.motion.set_pose(Pose::new(-3.0, 2.0, 1.0));

        assert!(rig.finder.return_home(false).await);
        let calls = rig.motion.calls();
        // full turn, rotate, fast leg, slow tail, align, final correction
        assert_eq!(calls.len(), 7);
        assert_eq!(calls[2].profile, MotionProfile::HighSpeed);
        assert_eq!(calls[3].profile, MotionProfile::LowSpeed);
        assert_relative_eq!(calls[3].dx, 1.5, epsilon = 1e-9);
        assert!(rig.motion.robot_pose().approx_eq(&Pose::identity(), 1e-6));
    }

    #[tokio::test]
    async fn test_not_initialized_is_no_target() {
        let rig = rig();
        assert!(!rig.finder.return_home(false).await);
        assert_eq!(rig.reason.get(), FailureReason::NoTarget);
        assert!(rig.motion.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_search_until_relocalized() {
        let rig = rig();
        assert!(rig.finder.init_home().await);
        rig.slam.set_localized(false);
        rig.motion.set_latency(Duration::from_millis(100));
        let slam = rig.slam.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            slam.set_localized(true);
        });
        let fix = rig.finder.find_home(false).await;
        assert!(fix.is_some());
        assert!(rig.motion.stops() >= 1);
    }
}
