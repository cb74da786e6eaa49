//! Home tracking and return-home strategies for a mobile robot.
//!
//! [`PositionManager`] turns raw odometry into a pose relative to a persisted
//! home frame. The [`finder`] strategies drive back to that frame using a map,
//! a charging-station beacon or fiducial markers, and [`HomeFinder`] runs
//! whichever one is active.
//!
//! Every robot capability is reached through the traits in [`services`]; each
//! command returns a [`Pending`] future that resolves when the robot finishes it.

pub mod error;
pub mod finder;
pub mod home_finder;
pub mod interrupt;
pub mod pending;
pub mod position;
pub mod record;
pub mod services;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{NavigationError, Result};
pub use finder::{FailureReason, Finder, FinderConfig, FinderMode, Fix};
pub use home_finder::HomeFinder;
pub use pending::{Completer, Pending, pending};
pub use position::{DriftEstimate, PositionManager};
pub use record::{HomeRecord, HomeRecordStore, JsonFileStore, MemoryStore};
pub use services::{Motion, MotionProfile, Services};
