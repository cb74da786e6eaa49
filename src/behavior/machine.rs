use std::sync::{Arc, Weak};
use std::time::Duration;

use homeward_geometry::Pose;
use homeward_navigation::services::Frame;
use homeward_navigation::{DriftEstimate, FinderMode, NavigationError};
use parking_lot::{Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::engage::EngageOverrides;
use super::transitions::LatestWins;
use super::{
    BehaviorState, Cue, DEFINE_HOME_ACTIVITY, Event, GO_ENGAGE_ACTIVITY, GO_HOME_ACTIVITY,
    GoHomeReason, LifeState, ReachCause, Robot,
};
use crate::blackboard::{self, Blackboard};
use crate::bus::{Signal, Topic};
use crate::config::{HomePolicy, Preferences};

/// No bored/lost trigger this soon after a failed go-home.
const GO_HOME_COOLDOWN: Duration = Duration::from_secs(60);
/// Positional drift beyond which the robot considers itself lost (m).
const LOST_THRESHOLD: f64 = 0.5;
/// Drift beyond which engaging someone is no longer allowed (m, rad).
const MAX_DRIFT: f64 = 0.5;
const NEAR_HOME_DISTANCE: f64 = 0.2;
const NEAR_HOME_ANGLE_DEG: f64 = 24.0;
const STILL_HOME_DISTANCE: f64 = 0.1;
const STILL_HOME_ANGLE_DEG: f64 = 10.0;
/// Inside this radius around home the allowed sector does not apply (m).
const FREE_RADIUS: f64 = 0.3;
const DEFINE_HOME_RETRY: Duration = Duration::from_secs(10);
const VOCAL_REPEAT: Duration = Duration::from_secs(10);
const TABLET_PAUSE: Duration = Duration::from_secs(4);
const OUT_OF_RANGE_PAUSE: Duration = Duration::from_secs(3);
const LOOK_PAUSE: Duration = Duration::from_secs(1);
const SETTLE_PAUSE: Duration = Duration::from_secs(1);
const UPDATE_PERIOD: Duration = Duration::from_secs(1);
const RESET_BODY_PERIOD: Duration = Duration::from_millis(100);

/// Robot-frame points checked for a face, at head height.
const HUMAN_LOOK_POINTS: [[f64; 2]; 4] = [[1.0, 0.0], [1.0, 1.0], [1.0, -1.0], [1.0, 0.0]];
const HUMAN_LOOK_HEIGHT: f64 = 1.5;
/// Heights checked around the last obstacle.
const OBSTACLE_LOOK_HEIGHTS: [f64; 2] = [1.0, 1.3];

type Transition = (BehaviorState, &'static str);

struct Status {
    state: BehaviorState,
    life: LifeState,
    activated: bool,
    wandering_since: Instant,
    last_failed_go_home: Option<Instant>,
    last_define_home: Option<Instant>,
    /// The next go-home skips the targeted look.
    full_search: bool,
    last_obstacle: Option<Pose>,
    notifications: Vec<u64>,
}

#[derive(Default)]
struct Tasks {
    update: Option<JoinHandle<()>>,
    reset_body: Option<JoinHandle<()>>,
}

fn is_running(task: &Option<JoinHandle<()>>) -> bool {
    task.as_ref().is_some_and(|handle| !handle.is_finished())
}

/// The proactive mobility behavior.
///
/// Reacts to [`Event`]s, runs a periodic update while active, and exposes the
/// entry points of its three activities (`mark_here_as_home`, `go_home`,
/// `go_engage`). Requests for those activities are published on the bus.
pub struct ProactiveMobility {
    robot: Robot,
    prefs: Mutex<Preferences>,
    bb: Blackboard,
    bus: Topic<Signal>,
    status: Mutex<Status>,
    transitions: LatestWins<Transition>,
    engage: EngageOverrides,
    tasks: Mutex<Tasks>,
}

impl ProactiveMobility {
    /// Build an inactive machine; [`start`](Self::start) applies the preferences.
    pub fn new(robot: Robot, prefs: Preferences, bb: Blackboard, bus: Topic<Signal>) -> Arc<Self> {
        let engage = EngageOverrides::new(robot.awareness.clone());
        Arc::new(Self {
            robot,
            prefs: Mutex::new(prefs),
            bb,
            bus,
            status: Mutex::new(Status {
                state: BehaviorState::Wandering,
                life: LifeState::Unknown,
                activated: false,
                wandering_since: Instant::now(),
                last_failed_go_home: None,
                last_define_home: None,
                full_search: false,
                last_obstacle: None,
                notifications: Vec::new(),
            }),
            transitions: LatestWins::default(),
            engage,
            tasks: Mutex::new(Tasks::default()),
        })
    }

    pub fn start(self: &Arc<Self>) {
        let prefs = self.prefs();
        self.apply_preferences(prefs);
    }

    /// Feed events until the channel closes. Each event is handled on its own task.
    pub async fn run(self: Arc<Self>, mut events: tokio::sync::mpsc::Receiver<Event>) {
        info!("Proactive mobility started.");
        while let Some(event) = events.recv().await {
            let machine = self.clone();
            tokio::spawn(async move { machine.handle(event).await });
        }
        self.shutdown();
        info!("Proactive mobility finished.");
    }

    pub fn shutdown(&self) {
        let mut tasks = self.tasks.lock();
        for handle in [tasks.update.take(), tasks.reset_body.take()].into_iter().flatten() {
            handle.abort();
        }
    }

    pub fn state(&self) -> BehaviorState {
        self.status().state
    }

    pub fn is_activated(&self) -> bool {
        self.status().activated
    }

    pub fn prefs(&self) -> Preferences {
        self.prefs.lock().clone()
    }

    fn status(&self) -> MutexGuard<'_, Status> {
        self.status.lock()
    }

    fn signal(&self, signal: Signal) {
        blackboard::record(&self.bb, &signal);
        self.bus.publish(signal);
    }

    fn show(&self, cue: Cue) {
        if self.prefs.lock().tablet_feedback {
            self.robot.feedback.display(cue);
        }
    }

    fn say(&self, cue: Cue) {
        if self.prefs.lock().vocal_feedback {
            self.robot.feedback.say(cue);
        }
    }

    async fn tablet_pause(&self) {
        if self.prefs.lock().tablet_feedback {
            tokio::time::sleep(TABLET_PAUSE).await;
        }
    }

    ////////////////////////////////////////
    // Preferences and activation

    pub fn apply_preferences(self: &Arc<Self>, prefs: Preferences) {
        info!(?prefs, "Applying preferences");
        let active = prefs.is_active;
        let mode = prefs.technology;
        *self.prefs.lock() = prefs;
        self.status().activated = active;
        if !active {
            self.stop_update();
        }
        self.signal(Signal::AllowGoEngage(active));
        self.signal(Signal::ShouldDefineHome(false));
        self.signal(Signal::ShouldGoHome(false));
        self.robot.home.set_mode(mode);
        if active {
            self.start_update();
        }
    }

    fn activate(self: &Arc<Self>) {
        let notifications = std::mem::take(&mut self.status().notifications);
        if !notifications.is_empty() {
            info!(?notifications, "Removing notifications");
        }
        for id in notifications {
            self.robot.feedback.remove_notification(id);
        }
        self.start();
    }

    fn deactivate(&self) {
        info!("Deactivating proactive mobility");
        self.stop_update();
        self.status().activated = false;
        self.signal(Signal::AllowGoEngage(false));
        self.signal(Signal::ShouldDefineHome(false));
        self.signal(Signal::ShouldGoHome(false));
        self.robot.home.uninit();
    }

    fn start_update(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock();
        if is_running(&tasks.update) {
            return;
        }
        let machine = Arc::downgrade(self);
        tasks.update = Some(tokio::spawn(async move {
            let mut tick = tokio::time::interval(UPDATE_PERIOD);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                let Some(machine) = Weak::upgrade(&machine) else {
                    break;
                };
                machine.update().await;
            }
        }));
    }

    fn stop_update(&self) {
        if let Some(handle) = self.tasks.lock().update.take() {
            handle.abort();
        }
    }

    /// Keep trying to face home's heading until it works.
    fn start_reset_body(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock();
        if is_running(&tasks.reset_body) {
            return;
        }
        let machine = Arc::downgrade(self);
        tasks.reset_body = Some(tokio::spawn(async move {
            let mut tick = tokio::time::interval(RESET_BODY_PERIOD);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                let Some(machine) = Weak::upgrade(&machine) else {
                    break;
                };
                if machine.robot.home.position().reset_angle().await == Some(true) {
                    debug!("Body reset done");
                    break;
                }
            }
        }));
    }

    ////////////////////////////////////////
    // State management

    /// Request a transition. Only the latest request made while another
    /// transition runs is applied.
    pub async fn set_state(&self, state: BehaviorState, reason: &'static str) {
        if !self.status().activated {
            info!(%state, reason, "Inactive, state not changed");
            return;
        }
        if !self.transitions.offer((state, reason)) {
            debug!(%state, reason, "Transition queued");
            return;
        }
        while let Some((state, reason)) = self.transitions.next() {
            self.apply_transition(state, reason).await;
        }
    }

    async fn apply_transition(&self, new: BehaviorState, reason: &'static str) {
        let old = self.state();
        if new == old {
            info!(state = %new, "State already set");
            return;
        }

        match old {
            BehaviorState::GoingHome => {
                self.stop_activity(GO_HOME_ACTIVITY);
                self.signal(Signal::ShouldGoHome(false));
            }
            BehaviorState::DefiningHome => {
                self.stop_activity(DEFINE_HOME_ACTIVITY);
                self.signal(Signal::ShouldDefineHome(false));
            }
            BehaviorState::GoEngage => {
                self.engage.stop();
                self.stop_activity(GO_ENGAGE_ACTIVITY);
                self.status().wandering_since = Instant::now();
            }
            _ => {}
        }

        match new {
            BehaviorState::DefiningHome => {
                let due = self
                    .status()
                    .last_define_home
                    .is_none_or(|at| at.elapsed() > DEFINE_HOME_RETRY);
                if due {
                    self.signal(Signal::ShouldDefineHome(true));
                }
            }
            BehaviorState::AtHome => {
                self.show(Cue::AtHome);
                self.signal(Signal::ShouldGoHome(false));
                self.signal(Signal::AllowGoEngage(self.prefs.lock().is_active));
                self.tablet_pause().await;
            }
            BehaviorState::Wandering => {
                self.status().wandering_since = Instant::now();
            }
            BehaviorState::GoEngage if self.robot.home.is_init() => {
                self.show(Cue::GoEngage);
                self.engage.start();
            }
            BehaviorState::GoingHome => {
                self.show(Cue::GoHome);
                self.signal(Signal::ShouldGoHome(true));
            }
            _ => {}
        }

        self.status().state = new;
        info!(from = %old, to = %new, reason, "State transition done");
        self.signal(Signal::StateChanged {
            from: old,
            to: new,
            reason,
        });
    }

    fn stop_activity(&self, activity: &str) {
        if self.robot.activities.focused().as_deref() == Some(activity) {
            self.robot.activities.stop_focus();
        }
    }

    ////////////////////////////////////////
    // Activities

    /// Define home where the robot stands.
    pub async fn mark_here_as_home(self: &Arc<Self>) {
        info!("Defining home here");
        let ticket = self.robot.home.cancel_ticket();
        self.show(Cue::DefiningHome);
        self.robot.awareness.stop();
        tokio::time::sleep(SETTLE_PAUSE).await;

        let defined = match self.robot.home.set_current_pos_as_home_after(ticket).await {
            Ok(defined) => defined,
            Err(NavigationError::Busy) => {
                debug!("Home finder busy, not defining home");
                self.robot.awareness.start();
                return;
            }
            Err(e) => {
                warn!(error = %e, "Defining home failed");
                false
            }
        };

        if defined {
            info!("Successfully set home.");
            self.signal(Signal::ShouldDefineHome(false));
            self.signal(Signal::AllowGoEngage(self.prefs.lock().is_active));
            self.show(Cue::DefineHomeSuccess);
            self.say(Cue::DefineHomeSuccess);
            self.set_state(BehaviorState::AtHome, "home_defined").await;
        } else {
            warn!("Failed to define home!");
            self.start_reset_body();
            self.set_state(BehaviorState::Wandering, "define_home_failed").await;
            self.deactivate();
            let cue = Cue::CantDefineHome(self.robot.home.mode());
            self.show(cue);
            self.say(cue);
            let notify = self.prefs.lock().notification_feedback;
            if notify && self.status().notifications.is_empty() {
                let id = self.robot.feedback.notify(cue);
                self.status().notifications.push(id);
            }
            self.tablet_pause().await;
        }
        self.status().last_define_home = Some(Instant::now());
        self.robot.awareness.start();
    }

    /// Go home, unless someone turns out to be around.
    pub async fn go_home(self: &Arc<Self>) {
        if !self.is_activated() {
            info!("Inactive, not going home");
            return;
        }
        // stops issued from here on abort this attempt, even before it moves
        let ticket = self.robot.home.cancel_ticket();
        self.set_state(BehaviorState::GoingHome, "from_activity").await;
        self.robot.awareness.stop();
        if self.is_human().await {
            self.set_state(BehaviorState::GoEngage, "human_found").await;
            self.robot.awareness.start();
            return;
        }
        if self.state() != BehaviorState::GoingHome {
            info!(state = %self.state(), "No longer going home");
            self.robot.awareness.start();
            return;
        }
        let full_search = self.status().full_search;
        let outcome = self.robot.home.go_home_after(ticket, full_search).await;
        self.on_go_home_done(outcome).await;
        self.robot.awareness.start();
    }

    async fn on_go_home_done(self: &Arc<Self>, outcome: Result<bool, NavigationError>) {
        match outcome {
            Err(e) => {
                warn!(error = %e, "Go home errored");
                self.status().last_failed_go_home = Some(Instant::now());
                self.start_reset_body();
                if self.state() == BehaviorState::GoingHome {
                    self.set_state(BehaviorState::Wandering, "go_home_error").await;
                } else {
                    info!(state = %self.state(), "Ignoring go home error");
                }
            }
            Ok(true) => {
                info!("Successfully got home.");
                self.status().full_search = false;
                self.set_state(BehaviorState::AtHome, "arrived").await;
            }
            Ok(false) if self.state() != BehaviorState::GoingHome => {
                info!(state = %self.state(), "Go home stopped, ignoring the result");
            }
            Ok(false) => {
                let human = self.failure_feedback_loop().await;
                if !human {
                    self.status().last_failed_go_home = Some(Instant::now());
                }
                self.status().last_obstacle = None;
                blackboard::set_obstacle(&self.bb, None);
                self.set_state(BehaviorState::Wandering, "go_home_failed").await;
            }
        }
    }

    /// Tell people why going home failed until the body is back on home's
    /// heading. Returns true if someone showed up instead.
    async fn failure_feedback_loop(&self) -> bool {
        let mut last_speech: Option<Instant> = None;
        loop {
            if self.is_human().await {
                info!("Someone is here, stopping the failure feedback");
                return true;
            }
            let reason = self.robot.home.last_failure_reason();
            let cue = Cue::CantGoHome(reason);
            self.show(cue);
            if last_speech.is_none_or(|at| at.elapsed() > VOCAL_REPEAT) {
                last_speech = Some(Instant::now());
                self.say(cue);
            }
            self.tablet_pause().await;
            if self.robot.home.position().reset_angle().await == Some(true) {
                return false;
            }
            tokio::time::sleep(LOOK_PAUSE).await;
        }
    }

    pub async fn go_engage(&self) {
        self.set_state(BehaviorState::GoEngage, "from_activity").await;
    }

    /// Look around for a face: ahead and to both sides, or around the last
    /// obstacle if a move was stopped by one.
    async fn is_human(&self) -> bool {
        let Some(tracker) = &self.robot.tracker else {
            return false;
        };
        let obstacle = self.status().last_obstacle;
        let points: Vec<[f64; 3]> = match obstacle {
            Some(o) => OBSTACLE_LOOK_HEIGHTS.iter().map(|z| [o.x, o.y, *z]).collect(),
            None => {
                let robot = self.robot.motion.robot_pose();
                HUMAN_LOOK_POINTS
                    .iter()
                    .map(|[x, y]| {
                        let (wx, wy) = robot.to_parent(*x, *y);
                        [wx, wy, HUMAN_LOOK_HEIGHT]
                    })
                    .collect()
            }
        };
        for point in points {
            match tracker.look_at(point, Frame::World).await {
                Some(true) => {}
                looked => debug!(?point, ?looked, "Look at failed"),
            }
            tokio::time::sleep(LOOK_PAUSE).await;
            if self.robot.perception.face_detected() {
                info!(?point, "Found a human");
                return true;
            }
        }
        debug!("No human");
        false
    }

    ////////////////////////////////////////
    // Periodic update

    async fn update(self: &Arc<Self>) {
        let home_defined = self.robot.home.is_init();
        if !home_defined {
            self.signal(Signal::ShouldDefineHome(true));
        }
        match self.state() {
            BehaviorState::Wandering if home_defined && self.could_go_home() => {
                let reasons = self.reasons_to_go_home();
                if !reasons.is_empty() {
                    info!(?reasons, "Going home");
                    self.signal(Signal::ShouldGoHome(true));
                }
            }
            BehaviorState::GoEngage => {
                if !self.is_in_allowed_range() {
                    self.signal(Signal::AllowGoEngage(false));
                    let cause = if self.drifted(self.drift()) {
                        self.status().full_search = true;
                        self.set_state(BehaviorState::Wandering, "moved_too_much").await;
                        ReachCause::Distance
                    } else {
                        self.set_state(BehaviorState::Wandering, "went_outside_range").await;
                        ReachCause::Area
                    };
                    tokio::time::sleep(OUT_OF_RANGE_PAUSE).await;
                    self.show(Cue::CantReachHuman(cause));
                    self.say(Cue::CantReachHuman(cause));
                    self.tablet_pause().await;
                } else if self.bored() {
                    self.set_state(BehaviorState::Wandering, "no_human_tracked").await;
                }
            }
            _ => {}
        }
    }

    fn drift(&self) -> DriftEstimate {
        self.robot.home.position().drift_estimate()
    }

    /// Too much drift to trust the home frame. Angular drift is ignored on a map.
    fn drifted(&self, drift: DriftEstimate) -> bool {
        drift.positional >= MAX_DRIFT
            || (drift.angular >= MAX_DRIFT && self.robot.home.mode() != FinderMode::Slam)
    }

    fn bored(&self) -> bool {
        let since = self.status().wandering_since;
        self.prefs
            .lock()
            .bored_timeout()
            .is_some_and(|timeout| since.elapsed() > timeout)
    }

    /// Distance from home padded with the drift estimate.
    fn padded_distance(&self, pose: &Pose) -> f64 {
        pose.x.hypot(pose.y) + self.drift().positional
    }

    fn could_go_home(&self) -> bool {
        let position = self.robot.home.position();
        let pose = position.robot_pose();
        let near_home = self.padded_distance(&pose) < NEAR_HOME_DISTANCE
            && position.orientation().abs() < NEAR_HOME_ANGLE_DEG.to_radians();
        self.status().life == LifeState::Solitary && self.prefs.lock().is_active && !near_home
    }

    fn reasons_to_go_home(&self) -> Vec<GoHomeReason> {
        let (cooled_down, wandering_since) = {
            let status = self.status();
            let cooled_down = status
                .last_failed_go_home
                .is_none_or(|at| at.elapsed() > GO_HOME_COOLDOWN);
            (cooled_down, status.wandering_since)
        };
        if !cooled_down {
            debug!("Tried to go home less than a minute ago");
            return Vec::new();
        }
        let mut reasons = Vec::new();
        let bored_timeout = self.prefs.lock().bored_timeout();
        if bored_timeout.is_some_and(|timeout| wandering_since.elapsed() > timeout) {
            reasons.push(GoHomeReason::Bored);
        }
        if self.drift().positional > LOST_THRESHOLD {
            reasons.push(GoHomeReason::Lost);
        }
        reasons
    }

    fn is_still_home(&self) -> bool {
        let pose = self.robot.home.position().robot_pose();
        pose.x.abs().max(pose.y.abs()) <= STILL_HOME_DISTANCE
            && pose.theta.abs() <= STILL_HOME_ANGLE_DEG.to_radians()
    }

    /// Inside the sector around home the preferences allow.
    fn is_in_allowed_range(&self) -> bool {
        let pose = self.robot.home.position().robot_pose();
        if self.drifted(self.drift()) {
            return false;
        }
        let prefs = self.prefs();
        let distance = self.padded_distance(&pose);
        if distance > prefs.max_distance {
            return false;
        }
        if distance < FREE_RADIUS {
            return true;
        }
        let angle = pose.y.atan2(pose.x).to_degrees();
        if angle.abs() > prefs.max_angle / 2.0 {
            info!(angle, "Stepped outside allowed range angle!");
            return false;
        }
        true
    }

    ////////////////////////////////////////
    // Events

    pub async fn handle(self: &Arc<Self>, event: Event) {
        debug!(?event, "Event");
        match event {
            Event::Preferences(prefs) => self.apply_preferences(prefs),
            Event::BatteryHatchOpen(open) => {
                if !open && self.prefs.lock().home_policy == HomePolicy::HatchClosed {
                    self.set_state(BehaviorState::DefiningHome, "hatch").await;
                }
            }
            Event::FaceDetected(true) => self.on_face_detected(),
            Event::FaceDetected(false) => {}
            Event::MoveFailed(obstacle) => {
                info!(?obstacle, "Move failed");
                self.status().last_obstacle = obstacle;
                blackboard::set_obstacle(&self.bb, obstacle);
            }
            Event::LifeState(life) => self.on_life_state(life).await,
            Event::HumanDistance(distance) => {
                if EngageOverrides::should_leave(distance) {
                    let reason = if distance < 0.0 {
                        "nobody_around"
                    } else {
                        "human_reached"
                    };
                    self.leave_engage(reason).await;
                }
            }
            Event::FocusedActivity(activity) => {
                if activity.as_deref() != Some(GO_ENGAGE_ACTIVITY) {
                    self.leave_engage("focus_lost").await;
                }
            }
        }
    }

    fn on_face_detected(&self) {
        self.status().wandering_since = Instant::now();
        if self.robot.activities.focused().as_deref() == Some(GO_ENGAGE_ACTIVITY) {
            self.engage.start();
        } else {
            self.engage.stop();
            if self.is_activated() && self.is_in_allowed_range() {
                self.signal(Signal::AllowGoEngage(true));
            }
        }
    }

    /// Back to wandering, only if still engaging.
    async fn leave_engage(&self, reason: &'static str) {
        if self.engage.is_running() && self.state() == BehaviorState::GoEngage {
            self.set_state(BehaviorState::Wandering, reason).await;
        }
    }

    async fn on_life_state(self: &Arc<Self>, life: LifeState) {
        let previous = std::mem::replace(&mut self.status().life, life);
        info!(?previous, ?life, "Life state changed");
        if previous == LifeState::Disabled && life == LifeState::Solitary {
            self.activate();
        }
        let state = self.state();
        match life {
            LifeState::Solitary => {
                self.status().wandering_since = Instant::now();
                if !self.robot.home.is_init() {
                    self.set_state(BehaviorState::DefiningHome, "needs_to_define").await;
                } else {
                    match state {
                        BehaviorState::GoEngage => debug!("Going to engage, not going home"),
                        BehaviorState::SafeguardGoingHome => {
                            info!("Interrupted while going home, trying again");
                            self.set_state(BehaviorState::GoingHome, "after_safeguard").await;
                        }
                        BehaviorState::AtHome => {}
                        _ => {
                            self.set_state(BehaviorState::Wandering, "solitary_not_at_home").await
                        }
                    }
                }
            }
            LifeState::Safeguard if state == BehaviorState::GoingHome => {
                self.set_state(BehaviorState::SafeguardGoingHome, "safeguard").await;
                self.robot.home.stop_going_home();
            }
            LifeState::Interactive => match state {
                BehaviorState::AtHome if !self.is_still_home() => {
                    self.set_state(BehaviorState::Wandering, "interactive_from_home").await;
                }
                BehaviorState::GoEngage => {
                    self.set_state(BehaviorState::Wandering, "engaged").await;
                }
                _ => {}
            },
            LifeState::Disabled => self.deactivate(),
            _ => {}
        }
    }
}
