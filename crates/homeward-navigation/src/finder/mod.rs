//! Interchangeable return-home strategies.
//!
//! All three strategies share the same pipeline: an optional coarse approach,
//! localization of the home target (targeted look or 360° sweep), a low-speed
//! approach to the fix, and a final two-leg correction. They differ in how a
//! fix is obtained and how the home pose is derived from it.

mod marker;
mod pod;
mod routine;
mod slam;

use std::fmt;
use std::future::Future;
use std::str::FromStr;

use homeward_geometry::Pose;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::NavigationError;

pub use marker::MarkerFinder;
pub use pod::PodFinder;
pub(crate) use routine::FinderCore;
pub use slam::SlamFinder;

/// Which strategy is used to find home.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FinderMode {
    #[default]
    Slam,
    Pod,
    Marker,
}

impl FinderMode {
    pub fn as_str(self) -> &'static str {
        match self {
            FinderMode::Slam => "slam",
            FinderMode::Pod => "pod",
            FinderMode::Marker => "aruco",
        }
    }
}

impl fmt::Display for FinderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FinderMode {
    type Err = NavigationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "slam" => Ok(FinderMode::Slam),
            "pod" => Ok(FinderMode::Pod),
            "aruco" | "marker" => Ok(FinderMode::Marker),
            other => Err(NavigationError::UnknownMode(other.to_string())),
        }
    }
}

/// Why the last go-home attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FailureReason {
    #[default]
    Unknown,
    /// The home target was never acquired.
    NoTarget,
    /// A motion leg failed, usually blocked by something.
    Obstacle,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureReason::Unknown => "unknown",
            FailureReason::NoTarget => "no_target",
            FailureReason::Obstacle => "obstacle",
        })
    }
}

/// Single failure-reason slot shared by the orchestrator and the strategies.
///
/// The first cause recorded after a reset wins.
#[derive(Debug, Default)]
pub struct ReasonSlot(Mutex<FailureReason>);

impl ReasonSlot {
    pub fn reset(&self) {
        *self.0.lock() = FailureReason::Unknown;
    }

    pub fn record(&self, reason: FailureReason) {
        let mut slot = self.0.lock();
        if *slot == FailureReason::Unknown {
            *slot = reason;
        }
    }

    /// Catch-all at the end of a failed attempt: nothing specific becomes an obstacle.
    pub fn settle(&self) {
        self.record(FailureReason::Obstacle);
    }

    pub fn get(&self) -> FailureReason {
        *self.0.lock()
    }
}

/// Which of the two fiducial markers produced a fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerKind {
    Big,
    Small,
}

/// A localized home target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fix {
    /// Home pose in the robot frame.
    pub target: Pose,
    pub marker: Option<MarkerKind>,
}

/// A return-home strategy.
pub trait Finder: Send + Sync {
    fn is_init(&self) -> bool;

    /// Forget the home definition.
    fn uninit(&self);

    /// Abort whatever is running. The home definition survives.
    fn cancel(&self);

    /// Define home at (or from) the current position.
    fn init_home(&self) -> impl Future<Output = bool> + Send;

    /// Localize home. Re-anchors the position manager on success.
    fn find_home(&self, force_full_search: bool) -> impl Future<Output = Option<Fix>> + Send;

    /// Drive home. On failure the reason slot says why.
    fn return_home(&self, force_full_search: bool) -> impl Future<Output = bool> + Send;

    /// Turn on the spot until the target shows up. Yields its odometric pose.
    fn search_home(&self) -> impl Future<Output = Option<Pose>> + Send;
}

/// Tuning for the fiducial-marker strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkerParams {
    pub big_id: u32,
    pub big_size: f64,
    pub small_id: u32,
    pub small_size: f64,
    /// Expect the big marker beyond this distance from home (m).
    pub big_threshold: f64,
    /// Otherwise expect the small marker beyond this distance from it (m).
    pub small_threshold: f64,
    /// Small marker position along the home x axis (m).
    pub small_offset: f64,
    /// Distance kept from the small marker (m).
    pub small_standoff: f64,
    pub big_heading_deg: f64,
    pub small_heading_deg: f64,
    pub approach_distance: f64,
    pub close_range: f64,
    pub detection_timeout_secs: f64,
}

impl Default for MarkerParams {
    fn default() -> Self {
        Self {
            big_id: 128,
            big_size: 0.20,
            small_id: 448,
            small_size: 0.10,
            big_threshold: 0.60,
            small_threshold: 0.40,
            small_offset: 0.56,
            small_standoff: 0.61,
            big_heading_deg: -135.0,
            small_heading_deg: 135.0,
            approach_distance: 1.3,
            close_range: 0.5,
            detection_timeout_secs: 2.0,
        }
    }
}

/// Tuning for the charging-beacon strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PodParams {
    pub approach_distance: f64,
    /// Final distance in front of the beacon (m).
    pub standoff: f64,
    /// Extra distance of the intermediate waypoint (m).
    pub extra_offset: f64,
    pub search_timeout_secs: f64,
    /// Home-frame x of the point faced before tracking.
    pub side_point: f64,
    /// Home-frame x of the point tracked while searching.
    pub track_point: f64,
    pub close_range: f64,
}

impl Default for PodParams {
    fn default() -> Self {
        Self {
            approach_distance: 1.0,
            standoff: 0.7,
            extra_offset: 0.3,
            search_timeout_secs: 5.0,
            side_point: -1.0,
            track_point: -0.70,
            close_range: 0.5,
        }
    }
}

/// Tuning for the map-based strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlamParams {
    pub close_range: f64,
    /// Length of the low-speed tail of a long translation (m).
    pub slowdown_distance: f64,
    pub poll_interval_ms: u64,
}

impl Default for SlamParams {
    fn default() -> Self {
        Self {
            close_range: 0.3,
            slowdown_distance: 1.5,
            poll_interval_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FinderConfig {
    pub marker: MarkerParams,
    pub pod: PodParams,
    pub slam: SlamParams,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_names() {
        assert_eq!("slam".parse::<FinderMode>().unwrap(), FinderMode::Slam);
        assert_eq!(" POD ".parse::<FinderMode>().unwrap(), FinderMode::Pod);
        assert_eq!("aruco".parse::<FinderMode>().unwrap(), FinderMode::Marker);
        assert_eq!("marker".parse::<FinderMode>().unwrap(), FinderMode::Marker);
        assert_eq!(FinderMode::Marker.to_string(), "aruco");
        assert!(matches!(
            "lidar".parse::<FinderMode>(),
            Err(NavigationError::UnknownMode(m)) if m == "lidar"
        ));
    }

    #[test]
    fn test_first_reason_wins() {
        let slot = ReasonSlot::default();
        slot.record(FailureReason::NoTarget);
        slot.record(FailureReason::Obstacle);
        slot.settle();
        assert_eq!(slot.get(), FailureReason::NoTarget);

        slot.reset();
        assert_eq!(slot.get(), FailureReason::Unknown);
        slot.settle();
        assert_eq!(slot.get(), FailureReason::Obstacle);
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: FinderConfig =
            serde_json::from_str(r#"{ "marker": { "big_threshold": 0.8 } }"#).unwrap();
        assert_eq!(config.marker.big_threshold, 0.8);
        assert_eq!(config.marker.small_id, 448);
        assert_eq!(config.pod, PodParams::default());
    }
}
