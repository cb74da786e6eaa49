use std::future::Future;
use std::sync::Arc;

use homeward_geometry::{Polar, Pose};
use tracing::debug;

use super::{FailureReason, ReasonSlot};
use crate::interrupt::Interrupt;
use crate::pending::Pending;
use crate::position::PositionManager;
use crate::services::{Frame, MotionProfile, Services};

const SWEEP_STEP_DEG: u32 = 50;
/// Truncated: the last 10° of the turn are never swept.
const SWEEP_STEPS: u32 = 360 / SWEEP_STEP_DEG;
/// Gaze points checked at every sweep step, in the robot frame.
const SWEEP_LOOK_TARGETS: [[f64; 3]; 3] = [[3.0, 0.0, 0.0], [0.0, 0.0, 0.0], [1.0, 0.0, 0.0]];
const APPROACH_MARGIN: f64 = 0.2;

/// Collaborators and shared state every strategy runs against, plus the
/// motion building blocks of the return-home pipeline.
///
/// Every leg races the interrupt: once it fires, the pending command is
/// dropped and no further leg is issued.
pub(crate) struct FinderCore {
    pub services: Services,
    pub position: Arc<PositionManager>,
    pub reason: Arc<ReasonSlot>,
    pub interrupt: Arc<Interrupt>,
}

impl FinderCore {
    pub fn new(
        services: Services,
        position: Arc<PositionManager>,
        reason: Arc<ReasonSlot>,
        interrupt: Arc<Interrupt>,
    ) -> Self {
        Self {
            services,
            position,
            reason,
            interrupt,
        }
    }

    pub fn interrupted(&self) -> bool {
        self.interrupt.is_triggered()
    }

    /// Run `fut` unless the interrupt fires first.
    pub async fn guarded<F: Future>(&self, fut: F) -> Option<F::Output> {
        if self.interrupted() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.interrupt.wait() => None,
            out = fut => Some(out),
        }
    }

    /// Issue one command and wait for it. Dropped or interrupted commands count as failures.
    pub async fn leg(&self, issue: impl FnOnce() -> Pending<bool>) -> bool {
        if self.interrupted() {
            return false;
        }
        self.guarded(issue()).await.flatten().unwrap_or(false)
    }

    pub async fn rotate(&self, dtheta: f64, profile: MotionProfile) -> bool {
        let dtheta = Pose::normalize_angle(dtheta);
        debug!(dtheta, %profile, "Rotate leg");
        self.leg(|| self.services.motion.move_to(0.0, 0.0, dtheta, profile)).await
    }

    pub async fn translate(&self, distance: f64, profile: MotionProfile) -> bool {
        debug!(dx = distance, %profile, "Translate leg");
        self.leg(|| self.services.motion.move_to(distance, 0.0, 0.0, profile)).await
    }

    /// Long translation split into a high-speed leg and a low-speed tail.
    pub async fn translate_with_slowdown(&self, distance: f64, slowdown: f64) -> bool {
        if distance <= slowdown {
            return self.translate(distance, MotionProfile::LowSpeed).await;
        }
        self.translate(distance - slowdown, MotionProfile::HighSpeed).await
            && self.translate(slowdown, MotionProfile::LowSpeed).await
    }

    /// Face a home-frame point.
    pub async fn turn_toward(&self, x: f64, y: f64) -> bool {
        self.leg(|| self.position.turn_toward(x, y)).await
    }

    /// Point the head at a robot-frame target. A robot without a tracker just
    /// carries on.
    pub async fn look(&self, target: [f64; 3]) -> bool {
        match &self.services.tracker {
            Some(tracker) => self.leg(|| tracker.look_at(target, Frame::Robot)).await,
            None => true,
        }
    }

    pub fn needs_approach(&self, is_init: bool, approach_distance: f64) -> bool {
        is_init && self.position.distance_from(0.0, 0.0) > approach_distance + APPROACH_MARGIN
    }

    /// Drive at high speed to a waypoint `distance` in front of home, then face home.
    pub async fn approach_home(&self, distance: f64) -> bool {
        let waypoint = self.position.home_in_robot_frame().offset_forward(distance);
        let range = waypoint.norm();
        debug!(range, "Approaching home");
        if !self.turn_toward(distance, 0.0).await {
            return false;
        }
        if !self.translate(range, MotionProfile::HighSpeed).await {
            return false;
        }
        self.turn_toward(0.0, 0.0).await;
        true
    }

    /// Rotate toward a robot-frame target, drive onto it at low speed, then turn by
    /// `target.theta - bearing + extra_turn`. Returns false if either of the
    /// first two legs failed; the final turn is best effort.
    pub async fn drive_to(&self, target: Pose, extra_turn: f64, profile: MotionProfile) -> bool {
        let polar = Polar::of(&target);
        debug!(%polar, "Driving to fix");
        if !self.rotate(polar.bearing, profile).await {
            return false;
        }
        if !self.translate(polar.range, profile).await {
            return false;
        }
        self.rotate(target.theta - polar.bearing + extra_turn, profile).await;
        true
    }

    /// One full search turn in fixed increments, pausing on a few gaze points at each step.
    pub async fn sweep(&self) {
        for step in 0..SWEEP_STEPS {
            for target in SWEEP_LOOK_TARGETS {
                if self.interrupted() {
                    return;
                }
                self.look(target).await;
            }
            debug!(step, "Sweep step");
            let turned = self
                .rotate(f64::from(SWEEP_STEP_DEG).to_radians(), MotionProfile::Default)
                .await;
            if !turned && self.interrupted() {
                return;
            }
        }
    }

    /// Low-speed position correction followed by a low-speed heading correction.
    pub async fn last_move(&self, target: Pose) -> bool {
        debug!(%target, "Final move");
        self.leg(|| {
            self.services
                .motion
                .move_to(target.x, target.y, 0.0, MotionProfile::LowSpeed)
        })
        .await
            && self.rotate(target.theta, MotionProfile::LowSpeed).await
    }

    pub fn fail(&self, reason: FailureReason) -> bool {
        self.reason.record(reason);
        false
    }

    /// End of a failed attempt.
    pub fn give_up(&self) -> bool {
        self.reason.settle();
        false
    }
}
