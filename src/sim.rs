//! A simulated robot: a holonomic base in an empty room with a charging
//! station, a pair of floor markers and, maybe, a person.
//!
//! [`SimulatedRobot`] implements every collaborator the home finder and the
//! behavior need. [`SimulatedRobot::live`] plays the activity scheduler: it
//! launches the activities the behavior asks for and wanders in between.

use std::f64::consts::PI;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use homeward_geometry::{ChassisSpeeds, Pose, integrate};
use homeward_navigation::services::{
    BeaconStation, Detection, Detections, Frame, MarkerDetector, MarkerSpec, MotionLimits,
    SlamLocalizer, TargetPose, Tracker,
};
use homeward_navigation::finder::MarkerParams;
use homeward_navigation::{Completer, HomeFinder, Motion, MotionProfile, Pending, Services, pending};
use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::behavior::{
    Activities, Awareness, BehaviorState, DEFINE_HOME_ACTIVITY, Event, Feedback,
    GO_ENGAGE_ACTIVITY, GO_HOME_ACTIVITY, LifeState, Perception, ProactiveMobility, Robot,
    TrackingMode, TrackingSettings,
};
use crate::blackboard::{self, Blackboard, Memory};
use crate::bus::{Signal, Topic};
use crate::config::SimulationSettings;

/// Faces are recognized up to this distance (m).
const FACE_RANGE: f64 = 3.0;
/// Horizontal field of view of the head camera (rad).
const CAMERA_FOV: f64 = PI / 3.0;
const MARKER_RANGE: f64 = 2.5;
/// Markers this close are seen whatever the heading.
const MARKER_UNDERFOOT: f64 = 0.3;
const BEACON_RANGE: f64 = 5.0;
const BEACON_SEARCH: Duration = Duration::from_millis(1500);
/// The map is lost beyond this distance from its origin (m).
const MAP_RADIUS: f64 = 6.0;
const DETECTION_PERIOD: Duration = Duration::from_millis(100);
const LIFE_PERIOD: Duration = Duration::from_millis(500);
const WANDER_PERIOD: Duration = Duration::from_secs(6);
/// Wandering stays within this radius of the start (m).
const WANDER_RADIUS: f64 = 2.5;
const INTERACTION: Duration = Duration::from_secs(10);

#[derive(Debug, Default)]
struct Body {
    pose: Pose,
    displacement: Pose,
    /// Bumped by every stop; legs of an older generation abort.
    generation: u64,
}

#[derive(Debug, Default)]
struct MapState {
    origin: Pose,
    localizing: bool,
}

#[derive(Debug, Default)]
struct Head {
    running: bool,
    tracking: TrackingSettings,
    /// World point the head was last pointed at.
    gaze: Option<[f64; 2]>,
}

pub struct SimulatedRobot {
    world: SimulationSettings,
    born: Instant,
    body: Arc<Mutex<Body>>,
    map: Mutex<MapState>,
    head: Mutex<Head>,
    focus: Mutex<Option<String>>,
    beacon_generation: Arc<AtomicU64>,
    human_gone: AtomicBool,
    /// Big then small floor marker, with their ids.
    markers: [(u32, Pose); 2],
    events: mpsc::Sender<Event>,
}

impl SimulatedRobot {
    pub fn new(
        world: SimulationSettings,
        marker_params: &MarkerParams,
        events: mpsc::Sender<Event>,
    ) -> Arc<Self> {
        let body = Body {
            pose: world.start,
            ..Body::default()
        };
        let markers = [
            (marker_params.big_id, world.big_marker),
            (marker_params.small_id, world.small_marker),
        ];
        Arc::new(Self {
            world,
            born: Instant::now(),
            body: Arc::new(Mutex::new(body)),
            map: Mutex::new(MapState::default()),
            head: Mutex::new(Head::default()),
            focus: Mutex::new(None),
            beacon_generation: Arc::new(AtomicU64::new(0)),
            human_gone: AtomicBool::new(false),
            markers,
            events,
        })
    }

    /// Every collaborator the home finder can use.
    pub fn services(self: &Arc<Self>) -> Services {
        Services::new(self.clone())
            .with_tracker(self.clone())
            .with_markers(self.clone())
            .with_beacon(self.clone())
            .with_slam(self.clone())
    }

    pub fn robot(self: &Arc<Self>, home: Arc<HomeFinder>, feedback: Arc<dyn Feedback>) -> Robot {
        Robot {
            home,
            motion: self.clone(),
            tracker: Some(self.clone() as Arc<dyn Tracker>),
            perception: self.clone(),
            awareness: self.clone(),
            activities: self.clone(),
            feedback,
        }
    }

    fn tick_period(&self) -> f64 {
        1.0 / self.world.tick_hz.max(1.0)
    }

    /// The person, once they showed up and until they leave.
    fn human(&self) -> Option<[f64; 2]> {
        let human = self.world.human?;
        let arrived = self.born.elapsed().as_secs_f64() >= self.world.human_after_secs;
        (arrived && !self.human_gone.load(Ordering::SeqCst)).then_some(human)
    }

    fn human_distance(&self) -> f64 {
        match self.human() {
            Some([x, y]) => self.robot_pose().distance_to(x, y),
            None => -1.0,
        }
    }

    fn view(&self) -> SharedView {
        SharedView {
            body: self.body.clone(),
            markers: self.markers,
        }
    }

    /// Abort the running leg.
    fn halt(&self) {
        self.body.lock().generation += 1;
    }

    async fn send(&self, event: Event) {
        if self.events.send(event).await.is_err() {
            debug!("Behavior is gone, dropping event");
        }
    }

    /// Drive one leg: translate, then rotate, then settle on the exact target.
    async fn drive(
        body: &Mutex<Body>,
        done: &Completer<bool>,
        [dx, dy, dtheta]: [f64; 3],
        limits: MotionLimits,
        period: f64,
    ) -> bool {
        let (start, generation) = {
            let body = body.lock();
            (body.pose, body.generation)
        };
        let target = start
            .compose(&Pose::new(dx, dy, 0.0))
            .compose(&Pose::new(0.0, 0.0, dtheta));
        let mut tick = tokio::time::interval(Duration::from_secs_f64(period));
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let distance = dx.hypot(dy);
        let heading = dy.atan2(dx);
        let (mut travelled, mut speed) = (0.0, 0.0);
        while travelled < distance {
            tick.tick().await;
            if done.is_cancelled() || body.lock().generation != generation {
                return false;
            }
            speed = ramp(speed, distance - travelled, limits.max_vel_xy, limits.max_acc_xy, period);
            let step = (speed * period).min(distance - travelled);
            travelled += step;
            let v = step / period;
            let speeds = ChassisSpeeds::new(v * heading.cos(), v * heading.sin(), 0.0);
            if !advance(body, speeds, period) {
                return false;
            }
        }

        let (mut turned, mut speed) = (0.0, 0.0);
        while turned < dtheta.abs() {
            tick.tick().await;
            if done.is_cancelled() || body.lock().generation != generation {
                return false;
            }
            let remaining = dtheta.abs() - turned;
            speed = ramp(speed, remaining, limits.max_vel_theta, limits.max_acc_theta, period);
            let step = (speed * period).min(remaining);
            turned += step;
            let speeds = ChassisSpeeds::new(0.0, 0.0, dtheta.signum() * step / period);
            if !advance(body, speeds, period) {
                return false;
            }
        }

        let mut body = body.lock();
        if body.generation != generation {
            return false;
        }
        body.pose = target;
        true
    }

    /// Random leg around the start, heading back when too far.
    fn wander(self: &Arc<Self>) {
        let (bearing, distance) = {
            let mut rng = rand::rng();
            (rng.random_range(-PI..PI), rng.random_range(0.2..self.world.wander_step.max(0.3)))
        };
        let pose = self.robot_pose();
        let start = self.world.start;
        let bearing = if pose.distance_to(start.x, start.y) > WANDER_RADIUS {
            pose.bearing_to(start.x, start.y)
        } else {
            bearing
        };
        debug!(bearing, distance, "Wandering");
        let leg = self.move_to(
            distance * bearing.cos(),
            distance * bearing.sin(),
            bearing,
            MotionProfile::Default,
        );
        tokio::spawn(async move {
            let _ = leg.await;
        });
    }

    /// Drive up to the person, keeping the engage distance.
    async fn approach_human(self: &Arc<Self>) -> bool {
        let Some([hx, hy]) = self.human() else {
            return false;
        };
        let keep = self.head.lock().tracking.relative_position[0].abs();
        let (lx, ly) = self.robot_pose().to_local(hx, hy);
        let bearing = ly.atan2(lx);
        let travel = (lx.hypot(ly) - keep).max(0.0);
        let arrived = self
            .move_to(travel * bearing.cos(), travel * bearing.sin(), bearing, MotionProfile::Default)
            .await
            .unwrap_or(false);
        self.send(Event::HumanDistance(self.human_distance())).await;
        arrived
    }

    /// The person chats for a while, then walks away.
    async fn interact(self: Arc<Self>) {
        self.send(Event::LifeState(LifeState::Interactive)).await;
        tokio::time::sleep(INTERACTION).await;
        info!("The person walks away");
        self.human_gone.store(true, Ordering::SeqCst);
        self.send(Event::FaceDetected(false)).await;
        self.send(Event::LifeState(LifeState::Solitary)).await;
    }

    fn launch(
        self: &Arc<Self>,
        machine: &Arc<ProactiveMobility>,
        memory: &Memory,
        face: bool,
    ) -> Option<JoinHandle<()>> {
        let activity = if memory.should_define_home {
            DEFINE_HOME_ACTIVITY
        } else if memory.should_go_home {
            GO_HOME_ACTIVITY
        } else if memory.allow_go_engage && face && memory.state != BehaviorState::GoEngage {
            GO_ENGAGE_ACTIVITY
        } else {
            return None;
        };
        // cancels any wandering leg
        self.halt();
        *self.focus.lock() = Some(activity.to_string());
        info!(activity, "Launching activity");

        let robot = self.clone();
        let machine = machine.clone();
        Some(tokio::spawn(async move {
            robot.send(Event::FocusedActivity(Some(activity.to_string()))).await;
            match activity {
                DEFINE_HOME_ACTIVITY => machine.mark_here_as_home().await,
                GO_HOME_ACTIVITY => machine.go_home().await,
                _ => {
                    machine.go_engage().await;
                    let navigating = robot.head.lock().tracking.mode == TrackingMode::Navigate;
                    if navigating && robot.approach_human().await {
                        tokio::spawn(robot.clone().interact());
                    }
                }
            }
            let released = {
                let mut focus = robot.focus.lock();
                let mine = focus.as_deref() == Some(activity);
                if mine {
                    *focus = None;
                }
                mine
            };
            if released {
                robot.send(Event::FocusedActivity(None)).await;
            }
            info!(activity, "Activity finished");
        }))
    }

    /// Run the world for `duration`: feed events to the behavior and launch
    /// the activities it requests.
    pub async fn live(
        self: Arc<Self>,
        machine: Arc<ProactiveMobility>,
        bb: Blackboard,
        bus: Topic<Signal>,
        duration: Duration,
    ) -> anyhow::Result<()> {
        info!(?duration, "Simulation started.");
        let mut signals = bus.subscribe();
        let mut tick = tokio::time::interval(LIFE_PERIOD);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let deadline = tokio::time::sleep(duration);
        tokio::pin!(deadline);

        let mut face = false;
        let mut activity: Option<JoinHandle<()>> = None;
        let mut next_wander = Instant::now() + WANDER_PERIOD;
        self.send(Event::LifeState(LifeState::Solitary)).await;

        loop {
            tokio::select! {
                _ = &mut deadline => break,
                signal = signals.recv() => match signal {
                    Ok(signal) => {
                        if let Signal::StateChanged { from, to, reason } = *signal {
                            info!(%from, %to, reason, pose = %self.robot_pose(), "Behavior state");
                        }
                    }
                    Err(RecvError::Lagged(missed)) => warn!(missed, "Missed behavior signals"),
                    Err(RecvError::Closed) => break,
                },
                _ = tick.tick() => {
                    let seen = self.face_detected();
                    if seen != face {
                        face = seen;
                        self.send(Event::FaceDetected(seen)).await;
                    }
                    if activity.as_ref().is_some_and(|task| !task.is_finished()) {
                        continue;
                    }
                    activity = self.launch(&machine, &blackboard::snapshot(&bb), face);
                    if activity.is_none()
                        && Instant::now() >= next_wander
                        && machine.state() == BehaviorState::Wandering
                    {
                        self.wander();
                        next_wander = Instant::now() + WANDER_PERIOD;
                    }
                }
            }
        }

        if let Some(task) = activity {
            task.abort();
        }
        self.halt();
        machine.shutdown();
        info!(pose = %self.robot_pose(), state = %machine.state(), "Simulation finished.");
        Ok(())
    }
}

/// Trapezoidal speed profile: accelerate, cruise, then brake to stop on `remaining`.
fn ramp(speed: f64, remaining: f64, max_vel: f64, max_acc: f64, dt: f64) -> f64 {
    (speed + max_acc * dt)
        .min(max_vel)
        .min((2.0 * max_acc * remaining).sqrt())
        .max(max_acc * dt)
}

fn advance(body: &Mutex<Body>, speeds: ChassisSpeeds, dt: f64) -> bool {
    let mut body = body.lock();
    match integrate(body.pose, speeds, dt) {
        Ok(pose) => {
            body.pose = pose;
            body.displacement.x += (speeds.vx * dt).abs();
            body.displacement.y += (speeds.vy * dt).abs();
            body.displacement.theta += (speeds.omega * dt).abs();
            true
        }
        Err(e) => {
            warn!(error = %e, "Integration failed");
            false
        }
    }
}

impl Motion for SimulatedRobot {
    fn move_to(&self, dx: f64, dy: f64, dtheta: f64, profile: MotionProfile) -> Pending<bool> {
        let (done, pending) = pending();
        let body = self.body.clone();
        let period = self.tick_period();
        debug!(dx, dy, dtheta, %profile, "Move");
        tokio::spawn(async move {
            let ok = Self::drive(&body, &done, [dx, dy, dtheta], profile.limits(), period).await;
            done.complete(ok);
        });
        pending
    }

    fn stop(&self) {
        self.halt();
    }

    fn robot_pose(&self) -> Pose {
        self.body.lock().pose
    }

    fn cumulative_displacement(&self) -> Pose {
        self.body.lock().displacement
    }
}

impl Tracker for SimulatedRobot {
    fn look_at(&self, target: [f64; 3], frame: Frame) -> Pending<bool> {
        let point = match frame {
            Frame::World => [target[0], target[1]],
            Frame::Robot => {
                let (x, y) = self.robot_pose().to_parent(target[0], target[1]);
                [x, y]
            }
        };
        debug!(?point, "Looking at");
        self.head.lock().gaze = Some(point);
        Pending::ready(true)
    }
}

impl MarkerDetector for SimulatedRobot {
    fn find(&self, markers: &[MarkerSpec], timeout: Duration) -> Pending<Detections> {
        let ids: Vec<u32> = markers.iter().map(|m| m.id).collect();
        let robot = self.view();
        let seen = robot.markers(&ids);
        if !seen.is_empty() {
            return Pending::ready(seen);
        }
        // Markers may come into view while the base turns.
        let (done, pending) = pending();
        tokio::spawn(async move {
            let deadline = Instant::now() + timeout;
            let mut poll = tokio::time::interval(DETECTION_PERIOD);
            loop {
                poll.tick().await;
                if done.is_cancelled() {
                    return;
                }
                let seen = robot.markers(&ids);
                if !seen.is_empty() || Instant::now() >= deadline {
                    done.complete(seen);
                    return;
                }
            }
        });
        pending
    }

    fn watch(&self, markers: &[MarkerSpec]) -> mpsc::UnboundedReceiver<Detection> {
        let ids: Vec<u32> = markers.iter().map(|m| m.id).collect();
        let (tx, rx) = mpsc::unbounded_channel();
        let robot = self.view();
        tokio::spawn(async move {
            let mut poll = tokio::time::interval(DETECTION_PERIOD);
            while !tx.is_closed() {
                poll.tick().await;
                for (id, pose) in robot.markers(&ids) {
                    let _ = tx.send(Detection { id, pose });
                }
            }
        });
        rx
    }
}

/// What the camera sees, for detection tasks outliving the call.
struct SharedView {
    body: Arc<Mutex<Body>>,
    markers: [(u32, Pose); 2],
}

impl SharedView {
    /// Within `range` and inside the field of view around `looking_at`, a
    /// robot-frame bearing.
    fn in_view(&self, x: f64, y: f64, range: f64, looking_at: f64) -> bool {
        let pose = self.body.lock().pose;
        let distance = pose.distance_to(x, y);
        if distance > range {
            return false;
        }
        distance < MARKER_UNDERFOOT
            || Pose::normalize_angle(pose.bearing_to(x, y) - looking_at).abs() < CAMERA_FOV / 2.0
    }

    fn markers(&self, ids: &[u32]) -> Detections {
        self.markers
            .iter()
            .filter(|(id, marker)| {
                ids.contains(id) && self.in_view(marker.x, marker.y, MARKER_RANGE, 0.0)
            })
            .map(|(id, marker)| (*id, TargetPose::Planar(*marker)))
            .collect()
    }
}

impl BeaconStation for SimulatedRobot {
    fn look_for_station(&self) -> Pending<Option<Pose>> {
        let (mut done, pending) = pending();
        let body = self.body.clone();
        let station = self.world.station;
        let generation = self.beacon_generation.clone();
        let started = generation.load(Ordering::SeqCst);
        tokio::spawn(async move {
            let dropped = tokio::select! {
                _ = tokio::time::sleep(BEACON_SEARCH) => false,
                _ = done.cancelled() => true,
            };
            if dropped {
                return;
            }
            let stopped = generation.load(Ordering::SeqCst) != started;
            let in_range = body.lock().pose.distance_to(station.x, station.y) <= BEACON_RANGE;
            done.complete((!stopped && in_range).then_some(station));
        });
        pending
    }

    fn stop_all(&self) {
        self.beacon_generation.fetch_add(1, Ordering::SeqCst);
    }
}

impl SlamLocalizer for SimulatedRobot {
    fn robot_pose_in_map(&self) -> Option<Pose> {
        let map = self.map.lock();
        let pose = self.robot_pose();
        let in_map = map.origin.relative(&pose);
        (map.localizing && in_map.norm() <= MAP_RADIUS).then_some(in_map)
    }

    fn reset_map(&self) {
        let origin = self.robot_pose();
        info!(%origin, "New map");
        self.map.lock().origin = origin;
    }

    fn start_localization(&self) {
        self.map.lock().localizing = true;
    }

    fn stop_localization(&self) {
        self.map.lock().localizing = false;
    }

    fn stop_navigation(&self) {
        self.halt();
    }
}

impl Perception for SimulatedRobot {
    fn face_detected(&self) -> bool {
        let Some([x, y]) = self.human() else {
            return false;
        };
        let pose = self.robot_pose();
        let looking_at = self
            .head
            .lock()
            .gaze
            .map_or(0.0, |[gx, gy]| pose.bearing_to(gx, gy));
        self.view().in_view(x, y, FACE_RANGE, looking_at)
    }
}

impl Awareness for SimulatedRobot {
    fn start(&self) {
        let mut head = self.head.lock();
        if !head.running {
            debug!("Awareness started");
        }
        head.running = true;
        head.gaze = None;
    }

    fn stop(&self) {
        self.head.lock().running = false;
        debug!("Awareness stopped");
    }

    fn tracking(&self) -> TrackingSettings {
        self.head.lock().tracking
    }

    fn set_tracking(&self, settings: &TrackingSettings) {
        debug!(?settings, "Tracking settings");
        self.head.lock().tracking = *settings;
    }
}

impl Activities for SimulatedRobot {
    fn focused(&self) -> Option<String> {
        self.focus.lock().clone()
    }

    fn stop_focus(&self) {
        let stopped = self.focus.lock().take();
        if let Some(activity) = stopped {
            info!(activity, "Activity stopped");
            if self.events.try_send(Event::FocusedActivity(None)).is_err() {
                debug!("Event queue full, focus change not reported");
            }
        }
    }
}

impl std::fmt::Debug for SimulatedRobot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedRobot")
            .field("body", &*self.body.lock())
            .field("focus", &*self.focus.lock())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::LogFeedback;
    use crate::config::Preferences;
    use approx::assert_relative_eq;
    use homeward_navigation::{FinderConfig, FinderMode, MemoryStore, PositionManager};

    fn world() -> SimulationSettings {
        SimulationSettings {
            human: None,
            ..SimulationSettings::default()
        }
    }

    fn robot_in(world: SimulationSettings) -> (Arc<SimulatedRobot>, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(64);
        (SimulatedRobot::new(world, &MarkerParams::default(), tx), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_leg_reaches_target() {
        let (robot, _events) = robot_in(world());
        let done = robot.move_to(1.0, 0.5, PI / 2.0, MotionProfile::Default).await;
        assert_eq!(done, Some(true));
        let pose = robot.robot_pose();
        assert_relative_eq!(pose.x, 1.0, epsilon = 1e-9);
        assert_relative_eq!(pose.y, 0.5, epsilon = 1e-9);
        assert_relative_eq!(pose.theta, PI / 2.0, epsilon = 1e-9);
        let displacement = robot.cumulative_displacement();
        assert_relative_eq!(displacement.x.hypot(displacement.y), 1.5, epsilon = 1e-6);
        assert_relative_eq!(displacement.theta, PI / 2.0, epsilon = 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_low_speed_is_slower() {
        let (robot, _events) = robot_in(world());
        let started = Instant::now();
        robot.move_to(1.0, 0.0, 0.0, MotionProfile::Default).await;
        let fast = started.elapsed();
        let started = Instant::now();
        robot.move_to(1.0, 0.0, 0.0, MotionProfile::LowSpeed).await;
        assert!(started.elapsed() > fast + fast / 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_aborts_leg() {
        let (robot, _events) = robot_in(world());
        let leg = robot.move_to(3.0, 0.0, 0.0, MotionProfile::Default);
        tokio::time::sleep(Duration::from_secs(1)).await;
        robot.halt();
        assert_eq!(leg.await, Some(false));
        let x = robot.robot_pose().x;
        assert!(x > 0.0 && x < 1.0, "{x}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_face_needs_a_person_in_view() {
        let (robot, _events) = robot_in(SimulationSettings {
            human: Some([2.0, 0.0]),
            human_after_secs: 5.0,
            ..world()
        });
        assert!(!robot.face_detected());
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(robot.face_detected());

        let _ = robot.look_at([0.0, 1.0, 1.5], Frame::Robot).await;
        assert!(!robot.face_detected());
        Awareness::start(robot.as_ref());
        assert!(robot.face_detected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_markers_seen_when_facing_them() {
        let (robot, _events) = robot_in(SimulationSettings {
            start: Pose::new(1.5, 0.0, 0.0),
            ..world()
        });
        let specs = [MarkerSpec { id: 128, size: 0.2 }];
        let seen = robot.find(&specs, Duration::from_secs(1)).await.unwrap();
        assert!(seen.is_empty());

        // Turning around brings the big marker into view before the timeout.
        let seen = robot.find(&specs, Duration::from_secs(10));
        let _ = robot.turn_to(PI).await;
        let seen = seen.await.unwrap();
        assert_eq!(seen.get(&128), Some(&TargetPose::Planar(world().big_marker)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_beacon_search() {
        let (robot, _events) = robot_in(world());
        assert_eq!(robot.look_for_station().await, Some(Some(world().station)));

        let search = robot.look_for_station();
        robot.stop_all();
        assert_eq!(search.await, Some(None));
    }

    #[tokio::test(start_paused = true)]
    async fn test_map_follows_the_base() {
        let (robot, _events) = robot_in(world());
        assert_eq!(robot.robot_pose_in_map(), None);
        robot.move_to(1.0, 0.0, 0.0, MotionProfile::Default).await;
        robot.reset_map();
        robot.start_localization();
        robot.move_to(0.5, 0.0, PI / 2.0, MotionProfile::Default).await;
        let in_map = robot.robot_pose_in_map().unwrap();
        assert!(in_map.approx_eq(&Pose::new(0.5, 0.0, PI / 2.0), 1e-9));
    }

    #[tokio::test(start_paused = true)]
    async fn test_robot_defines_home_and_rests() {
        let (robot, events) = robot_in(world());
        let position = Arc::new(PositionManager::new(
            robot.clone(),
            Arc::new(MemoryStore::new()),
            Duration::from_secs(600),
        ));
        let home = Arc::new(HomeFinder::new(
            robot.services(),
            position,
            FinderConfig::default(),
            FinderMode::Slam,
        ));
        let bb: Blackboard = Arc::default();
        let bus = Topic::new(64);
        let prefs = Preferences {
            is_active: true,
            ..Preferences::default()
        };
        let machine = ProactiveMobility::new(
            robot.robot(home.clone(), Arc::new(LogFeedback::default())),
            prefs,
            bb.clone(),
            bus.clone(),
        );
        machine.start();
        tokio::spawn(machine.clone().run(events));

        robot
            .clone()
            .live(machine.clone(), bb, bus, Duration::from_secs(40))
            .await
            .unwrap();
        assert!(home.is_init());
        assert_eq!(machine.state(), BehaviorState::AtHome);
    }
}
