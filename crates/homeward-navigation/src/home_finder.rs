use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use homeward_geometry::Pose;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::error::{NavigationError, Result};
use crate::finder::{
    FailureReason, Finder, FinderConfig, FinderCore, FinderMode, MarkerFinder, PodFinder,
    ReasonSlot, SlamFinder,
};
use crate::interrupt::{CancelTicket, Interrupt};
use crate::position::PositionManager;
use crate::services::Services;

/// Dispatch a [`Finder`] call to the strategy selected by `mode`.
macro_rules! on_finder {
    ($self:ident, $mode:expr, |$finder:ident| $body:expr) => {
        match $mode {
            FinderMode::Slam => {
                let $finder = &$self.slam;
                $body
            }
            FinderMode::Pod => {
                let $finder = &$self.pod;
                $body
            }
            FinderMode::Marker => {
                let $finder = &$self.marker;
                $body
            }
        }
    };
}

/// Held for the length of an operation. Cancels aimed at it are consumed on drop.
struct Busy<'a> {
    running: &'a AtomicBool,
    interrupt: &'a Interrupt,
}

impl Drop for Busy<'_> {
    fn drop(&mut self) {
        self.interrupt.reset();
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Front door of home finding: owns the three strategies, the shared position
/// manager and the failure-reason slot, and runs one operation at a time.
pub struct HomeFinder {
    position: Arc<PositionManager>,
    reason: Arc<ReasonSlot>,
    interrupt: Arc<Interrupt>,
    slam: SlamFinder,
    pod: PodFinder,
    marker: MarkerFinder,
    mode: Mutex<FinderMode>,
    running: AtomicBool,
}

impl HomeFinder {
    pub fn new(
        services: Services,
        position: Arc<PositionManager>,
        config: FinderConfig,
        mode: FinderMode,
    ) -> Self {
        let reason = Arc::new(ReasonSlot::default());
        let interrupt = Arc::new(Interrupt::new());
        let core = || {
            FinderCore::new(
                services.clone(),
                position.clone(),
                reason.clone(),
                interrupt.clone(),
            )
        };
        Self {
            slam: SlamFinder::new(core(), config.slam),
            pod: PodFinder::new(core(), config.pod),
            marker: MarkerFinder::new(core(), config.marker),
            position,
            reason,
            interrupt,
            mode: Mutex::new(mode),
            running: AtomicBool::new(false),
        }
    }

    fn begin(&self, ticket: CancelTicket) -> Result<Busy<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| NavigationError::Busy)?;
        self.interrupt.arm(ticket);
        Ok(Busy {
            running: &self.running,
            interrupt: &self.interrupt,
        })
    }

    /// Snapshot of the cancel requests issued so far. An operation started
    /// with this ticket stops on any [`stop_going_home`](Self::stop_going_home)
    /// issued after it, even one issued before the operation begins.
    pub fn cancel_ticket(&self) -> CancelTicket {
        self.interrupt.ticket()
    }

    pub fn mode(&self) -> FinderMode {
        *self.mode.lock()
    }

    /// Switch strategy. The previous one forgets its home when the mode changes.
    pub fn set_mode(&self, mode: FinderMode) -> FinderMode {
        let previous = std::mem::replace(&mut *self.mode.lock(), mode);
        if previous != mode {
            info!(from = %previous, to = %mode, "Finder mode changed");
            on_finder!(self, previous, |finder| finder.uninit());
        }
        mode
    }

    pub fn set_mode_by_name(&self, name: &str) -> Result<FinderMode> {
        Ok(self.set_mode(name.parse()?))
    }

    pub fn is_init(&self) -> bool {
        on_finder!(self, self.mode(), |finder| finder.is_init())
    }

    pub fn uninit(&self) {
        on_finder!(self, self.mode(), |finder| finder.uninit());
    }

    pub fn is_going_home(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn last_failure_reason(&self) -> FailureReason {
        self.reason.get()
    }

    /// Robot pose in the home frame.
    pub fn robot_pose(&self) -> Pose {
        self.position.robot_pose()
    }

    /// Home frame in odometric coordinates.
    pub fn home_world_pose(&self) -> Pose {
        self.position.home_frame()
    }

    pub fn position(&self) -> &Arc<PositionManager> {
        &self.position
    }

    /// Drive back home with the active strategy.
    ///
    /// A failed targeted look is retried once with a full search. Returns
    /// [`NavigationError::Busy`] if another operation is in flight. A stop
    /// requested while no operation was running aborts this one.
    pub async fn go_home(&self, force_full_search: bool) -> Result<bool> {
        self.go_home_after(self.interrupt.armed_ticket(), force_full_search).await
    }

    /// [`go_home`](Self::go_home), stopping only on cancels issued after `ticket`.
    pub async fn go_home_after(&self, ticket: CancelTicket, force_full_search: bool) -> Result<bool> {
        let _busy = self.begin(ticket)?;
        self.reason.reset();
        let mode = self.mode();
        info!(%mode, force_full_search, "Going home");

        if !self.is_init() {
            warn!(%mode, "Home is not defined for this finder");
            self.reason.record(FailureReason::NoTarget);
            return Ok(false);
        }

        let mut arrived = on_finder!(self, mode, |finder| finder.return_home(force_full_search).await);
        if !arrived
            && !force_full_search
            && !self.interrupt.is_triggered()
            && self.reason.get() == FailureReason::NoTarget
        {
            info!("Home not in sight, retrying with a full search");
            self.reason.reset();
            arrived = on_finder!(self, mode, |finder| finder.return_home(true).await);
        }

        if arrived {
            self.position.init_position();
            info!("Arrived home");
        } else {
            warn!(reason = %self.reason.get(), "Go home failed");
        }
        Ok(arrived)
    }

    /// Define home at the current position.
    pub async fn set_current_pos_as_home(&self) -> Result<bool> {
        self.set_current_pos_as_home_after(self.interrupt.armed_ticket()).await
    }

    /// [`set_current_pos_as_home`](Self::set_current_pos_as_home), stopping
    /// only on cancels issued after `ticket`.
    pub async fn set_current_pos_as_home_after(&self, ticket: CancelTicket) -> Result<bool> {
        let _busy = self.begin(ticket)?;
        self.reason.reset();
        self.position.init_position();
        let mode = self.mode();
        let done = on_finder!(self, mode, |finder| finder.init_home().await);
        if done {
            self.position.init_position();
            info!(%mode, "Home defined");
        } else {
            warn!(%mode, reason = %self.reason.get(), "Could not define home");
        }
        Ok(done)
    }

    /// Abort the running operation. With none running, the next operation
    /// started without a newer ticket is aborted. Motion is stopped regardless.
    pub fn stop_going_home(&self) {
        let mode = self.mode();
        info!(%mode, "Stop going home");
        on_finder!(self, mode, |finder| finder.cancel());
    }
}

impl std::fmt::Debug for HomeFinder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HomeFinder")
            .field("mode", &self.mode())
            .field("is_init", &self.is_init())
            .field("is_going_home", &self.is_going_home())
            .field("last_failure_reason", &self.last_failure_reason())
            .finish()
    }
}
