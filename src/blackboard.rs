use parking_lot::RwLock;
use std::sync::Arc;

use homeward_geometry::Pose;

use crate::behavior::BehaviorState;
use crate::bus::Signal;

/// Last published value of every behavior flag, for pollers that missed the bus.
#[derive(Debug, Clone, Default)]
pub struct Memory {
    pub state: BehaviorState,
    pub should_go_home: bool,
    pub allow_go_engage: bool,
    pub should_define_home: bool,
    /// Odometric position of the last obstacle reported by a failed move.
    pub last_obstacle: Option<Pose>,
}

pub type Blackboard = Arc<RwLock<Memory>>;

pub fn snapshot(bb: &Blackboard) -> Memory {
    (*bb.read()).clone()
}

/// Mirror a signal into the blackboard.
pub fn record(bb: &Blackboard, signal: &Signal) {
    let mut g = bb.write();
    match *signal {
        Signal::ShouldGoHome(v) => g.should_go_home = v,
        Signal::AllowGoEngage(v) => g.allow_go_engage = v,
        Signal::ShouldDefineHome(v) => g.should_define_home = v,
        Signal::StateChanged { to, .. } => g.state = to,
    }
}

pub fn set_obstacle(bb: &Blackboard, obstacle: Option<Pose>) {
    bb.write().last_obstacle = obstacle;
}
