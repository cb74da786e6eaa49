//! Recording fakes for every collaborator trait.
//!
//! Motion completes instantly unless told otherwise and moves the fake pose
//! exactly as commanded. Perception fakes answer from a scripted world.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use homeward_geometry::Pose;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::pending::{Completer, Pending, pending};
use crate::services::{
    BeaconStation, Detection, Detections, Frame, MarkerDetector, MarkerSpec, Motion,
    MotionProfile, SlamLocalizer, TargetPose, Tracker,
};

/// One recorded `move_to`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveCall {
    pub dx: f64,
    pub dy: f64,
    pub dtheta: f64,
    pub profile: MotionProfile,
}

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Succeed,
    Fail,
    Hang,
}

#[derive(Debug, Default)]
struct MotionState {
    pose: Pose,
    displacement: Pose,
    calls: Vec<MoveCall>,
    stops: usize,
    script: VecDeque<Outcome>,
    fail_from: Option<usize>,
    latency: Option<Duration>,
    held: Vec<Completer<bool>>,
    generation: u64,
}

impl MotionState {
    fn apply(&mut self, call: MoveCall) {
        self.pose = self.pose.compose(&Pose::new(call.dx, call.dy, call.dtheta));
        self.displacement.x += call.dx.abs();
        self.displacement.y += call.dy.abs();
        self.displacement.theta += call.dtheta.abs();
    }
}

/// Base that executes every command perfectly unless scripted otherwise.
#[derive(Debug, Default)]
pub struct FakeMotion {
    state: Arc<Mutex<MotionState>>,
}

impl FakeMotion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(pose: Pose) -> Self {
        let motion = Self::new();
        motion.set_pose(pose);
        motion
    }

    /// Teleport; does not count as displacement.
    pub fn set_pose(&self, pose: Pose) {
        self.state.lock().pose = pose;
    }

    /// Add raw displacement as if the robot had wandered around.
    pub fn add_displacement(&self, delta: Pose) {
        let mut state = self.state.lock();
        state.displacement.x += delta.x;
        state.displacement.y += delta.y;
        state.displacement.theta += delta.theta;
    }

    pub fn calls(&self) -> Vec<MoveCall> {
        self.state.lock().calls.clone()
    }

    pub fn stops(&self) -> usize {
        self.state.lock().stops
    }

    /// The next `n` commands report failure without moving.
    pub fn fail_next(&self, n: usize) {
        self.state.lock().script.extend(std::iter::repeat_n(Outcome::Fail, n));
    }

    /// The next `n` commands never complete until `stop()`.
    pub fn hang_next(&self, n: usize) {
        self.state.lock().script.extend(std::iter::repeat_n(Outcome::Hang, n));
    }

    /// Explicit outcomes for the next commands.
    pub fn script(&self, outcomes: impl IntoIterator<Item = bool>) {
        let mut state = self.state.lock();
        for ok in outcomes {
            state.script.push_back(if ok { Outcome::Succeed } else { Outcome::Fail });
        }
    }

    /// After `n` more commands, every unscripted command fails.
    pub fn fail_after(&self, n: usize) {
        let mut state = self.state.lock();
        state.fail_from = Some(state.calls.len() + n);
    }

    /// Successful commands complete after `latency` instead of immediately.
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = Some(latency);
    }

    fn delayed(&self, call: MoveCall, latency: Duration, generation: u64) -> Pending<bool> {
        let (mut done, pending) = pending();
        let state = self.state.clone();
        tokio::spawn(async move {
            let dropped = tokio::select! {
                _ = tokio::time::sleep(latency) => false,
                _ = done.cancelled() => true,
            };
            if dropped {
                return;
            }
            let ok = {
                let mut state = state.lock();
                let current = state.generation == generation;
                if current {
                    state.apply(call);
                }
                current
            };
            done.complete(ok);
        });
        pending
    }
}

impl Motion for FakeMotion {
    fn move_to(&self, dx: f64, dy: f64, dtheta: f64, profile: MotionProfile) -> Pending<bool> {
        let call = MoveCall {
            dx,
            dy,
            dtheta,
            profile,
        };
        let mut state = self.state.lock();
        let index = state.calls.len();
        state.calls.push(call);
        let outcome = state.script.pop_front().unwrap_or_else(|| {
            if state.fail_from.is_some_and(|from| index >= from) {
                Outcome::Fail
            } else {
                Outcome::Succeed
            }
        });
        match outcome {
            Outcome::Fail => Pending::ready(false),
            Outcome::Hang => {
                let (done, pending) = pending();
                state.held.push(done);
                pending
            }
            Outcome::Succeed => match state.latency {
                Some(latency) => {
                    let generation = state.generation;
                    drop(state);
                    self.delayed(call, latency, generation)
                }
                None => {
                    state.apply(call);
                    Pending::ready(true)
                }
            },
        }
    }

    fn stop(&self) {
        let mut state = self.state.lock();
        state.stops += 1;
        state.generation += 1;
        for done in state.held.drain(..) {
            done.complete(false);
        }
    }

    fn robot_pose(&self) -> Pose {
        self.state.lock().pose
    }

    fn cumulative_displacement(&self) -> Pose {
        self.state.lock().displacement
    }
}

/// Tracker that records gaze targets and always succeeds.
#[derive(Debug, Default)]
pub struct FakeTracker {
    looks: Mutex<Vec<([f64; 3], Frame)>>,
}

impl FakeTracker {
    pub fn targets(&self) -> Vec<[f64; 3]> {
        self.looks.lock().iter().map(|(target, _)| *target).collect()
    }

    pub fn frames(&self) -> Vec<Frame> {
        self.looks.lock().iter().map(|(_, frame)| *frame).collect()
    }
}

impl Tracker for FakeTracker {
    fn look_at(&self, target: [f64; 3], frame: Frame) -> Pending<bool> {
        self.looks.lock().push((target, frame));
        Pending::ready(true)
    }
}

struct Watcher {
    ids: Vec<u32>,
    tx: mpsc::UnboundedSender<Detection>,
}

/// Marker detector over a scripted set of markers in the odometric frame.
pub struct FakeMarkers {
    motion: Arc<FakeMotion>,
    placed: Mutex<HashMap<u32, Pose>>,
    max_range: Mutex<f64>,
    requests: Mutex<Vec<Vec<u32>>>,
    watchers: Mutex<Vec<Watcher>>,
}

impl FakeMarkers {
    pub fn new(motion: Arc<FakeMotion>) -> Self {
        Self {
            motion,
            placed: Mutex::new(HashMap::new()),
            max_range: Mutex::new(f64::INFINITY),
            requests: Mutex::new(Vec::new()),
            watchers: Mutex::new(Vec::new()),
        }
    }

    /// Put a marker in the world. Live watchers that asked for it see it at once.
    pub fn place(&self, id: u32, pose: Pose) {
        self.placed.lock().insert(id, pose);
        if self.in_range(&pose) {
            let mut watchers = self.watchers.lock();
            watchers.retain(|w| !w.tx.is_closed());
            for watcher in watchers.iter().filter(|w| w.ids.contains(&id)) {
                let _ = watcher.tx.send(Detection {
                    id,
                    pose: TargetPose::Planar(pose),
                });
            }
        }
    }

    pub fn remove(&self, id: u32) {
        self.placed.lock().remove(&id);
    }

    /// Markers farther than this from the robot are not detected.
    pub fn set_range(&self, range: f64) {
        *self.max_range.lock() = range;
    }

    /// Ids asked for by each `find` call, in order.
    pub fn requested_ids(&self) -> Vec<Vec<u32>> {
        self.requests.lock().clone()
    }

    pub fn live_watchers(&self) -> usize {
        let mut watchers = self.watchers.lock();
        watchers.retain(|w| !w.tx.is_closed());
        watchers.len()
    }

    fn in_range(&self, pose: &Pose) -> bool {
        self.motion.robot_pose().distance_to(pose.x, pose.y) <= *self.max_range.lock()
    }

    fn visible(&self, ids: &[u32]) -> Detections {
        self.placed
            .lock()
            .iter()
            .filter(|(id, pose)| ids.contains(id) && self.in_range(pose))
            .map(|(id, pose)| (*id, TargetPose::Planar(*pose)))
            .collect()
    }
}

impl MarkerDetector for FakeMarkers {
    fn find(&self, markers: &[MarkerSpec], _timeout: Duration) -> Pending<Detections> {
        let ids: Vec<u32> = markers.iter().map(|m| m.id).collect();
        self.requests.lock().push(ids.clone());
        Pending::ready(self.visible(&ids))
    }

    fn watch(&self, markers: &[MarkerSpec]) -> mpsc::UnboundedReceiver<Detection> {
        let ids: Vec<u32> = markers.iter().map(|m| m.id).collect();
        let (tx, rx) = mpsc::unbounded_channel();
        for (id, pose) in self.visible(&ids) {
            let _ = tx.send(Detection { id, pose });
        }
        self.watchers.lock().push(Watcher { ids, tx });
        rx
    }
}

/// Scripted answer to one station search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BeaconReply {
    Found(Pose),
    NotFound,
    /// Keeps searching until `stop_all()`.
    Hang,
}

#[derive(Debug, Default)]
struct BeaconState {
    replies: VecDeque<BeaconReply>,
    fallback: Option<Pose>,
    searches: usize,
    stops: usize,
    held: Vec<Completer<Option<Pose>>>,
}

#[derive(Debug, Default)]
pub struct FakeBeacon {
    state: Mutex<BeaconState>,
}

impl FakeBeacon {
    pub fn reply(&self, reply: BeaconReply) {
        self.state.lock().replies.push_back(reply);
    }

    /// Answer every unscripted search with this station pose.
    pub fn always(&self, station: Pose) {
        self.state.lock().fallback = Some(station);
    }

    pub fn searches(&self) -> usize {
        self.state.lock().searches
    }

    pub fn stops(&self) -> usize {
        self.state.lock().stops
    }

    /// Searches still running and still awaited by someone.
    pub fn live_searches(&self) -> usize {
        let mut state = self.state.lock();
        state.held.retain(|done| !done.is_cancelled());
        state.held.len()
    }
}

impl BeaconStation for FakeBeacon {
    fn look_for_station(&self) -> Pending<Option<Pose>> {
        let mut state = self.state.lock();
        state.searches += 1;
        let reply = state.replies.pop_front().unwrap_or(match state.fallback {
            Some(station) => BeaconReply::Found(station),
            None => BeaconReply::NotFound,
        });
        match reply {
            BeaconReply::Found(station) => Pending::ready(Some(station)),
            BeaconReply::NotFound => Pending::ready(None),
            BeaconReply::Hang => {
                let (done, pending) = pending();
                state.held.push(done);
                pending
            }
        }
    }

    fn stop_all(&self) {
        let mut state = self.state.lock();
        state.stops += 1;
        for done in state.held.drain(..) {
            done.complete(None);
        }
    }
}

#[derive(Debug, Default)]
struct SlamState {
    origin: Pose,
    localized: bool,
    journal: Vec<&'static str>,
}

/// Localizer whose map origin is wherever the fake base stood at the last map reset.
pub struct FakeSlam {
    motion: Arc<FakeMotion>,
    state: Mutex<SlamState>,
}

impl FakeSlam {
    pub fn new(motion: Arc<FakeMotion>) -> Self {
        Self {
            motion,
            state: Mutex::new(SlamState::default()),
        }
    }

    /// Calls received, in order.
    pub fn journal(&self) -> Vec<&'static str> {
        self.state.lock().journal.clone()
    }

    pub fn set_localized(&self, localized: bool) {
        self.state.lock().localized = localized;
    }
}

impl SlamLocalizer for FakeSlam {
    fn robot_pose_in_map(&self) -> Option<Pose> {
        let state = self.state.lock();
        state
            .localized
            .then(|| state.origin.relative(&self.motion.robot_pose()))
    }

    fn reset_map(&self) {
        let mut state = self.state.lock();
        state.origin = self.motion.robot_pose();
        state.journal.push("reset_map");
    }

    fn start_localization(&self) {
        let mut state = self.state.lock();
        state.localized = true;
        state.journal.push("start_localization");
    }

    fn stop_localization(&self) {
        let mut state = self.state.lock();
        state.localized = false;
        state.journal.push("stop_localization");
    }

    fn stop_navigation(&self) {
        self.state.lock().journal.push("stop_navigation");
    }
}
