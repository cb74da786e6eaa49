//! Persisted home-frame record and the stores that hold it.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use homeward_geometry::Pose;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{NavigationError, Result};

/// A pose as stored on disk: position plus unit orientation vector `[cos, sin]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    pub position: [f64; 2],
    pub orientation: [f64; 2],
}

impl From<Pose> for FrameRecord {
    fn from(pose: Pose) -> Self {
        FrameRecord {
            position: [pose.x, pose.y],
            orientation: pose.orientation(),
        }
    }
}

impl FrameRecord {
    pub fn to_pose(&self) -> Result<Pose> {
        Pose::from_orientation(self.position, self.orientation)
            .map_err(|e| NavigationError::Store(e.to_string()))
    }
}

/// Snapshot written on every home-frame mutation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HomeRecord {
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
    pub home_frame: FrameRecord,
    pub robot_in_home: FrameRecord,
}

impl HomeRecord {
    pub fn new(home_frame: Pose, robot_in_home: Pose) -> Self {
        HomeRecord {
            timestamp: unix_now(),
            home_frame: home_frame.into(),
            robot_in_home: robot_in_home.into(),
        }
    }

    /// True while the record is younger than `max_age`.
    pub fn is_fresh(&self, max_age: Duration) -> bool {
        let age = unix_now() - self.timestamp;
        age < max_age.as_secs_f64()
    }
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Where the position manager keeps its record.
pub trait HomeRecordStore: Send + Sync {
    fn load(&self) -> Result<Option<HomeRecord>>;
    fn save(&self, record: &HomeRecord) -> Result<()>;
}

/// Record kept as a JSON document on disk.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl HomeRecordStore for JsonFileStore {
    fn load(&self) -> Result<Option<HomeRecord>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&self.path)?;
        if text.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&text)?))
    }

    fn save(&self, record: &HomeRecord) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        fs::write(&self.path, serde_json::to_string_pretty(record)?)?;
        Ok(())
    }
}

/// Record kept in memory. Used when nothing should touch the filesystem.
#[derive(Debug, Default)]
pub struct MemoryStore {
    record: Mutex<Option<HomeRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(record: HomeRecord) -> Self {
        Self {
            record: Mutex::new(Some(record)),
        }
    }

    pub fn latest(&self) -> Option<HomeRecord> {
        *self.record.lock()
    }
}

impl HomeRecordStore for MemoryStore {
    fn load(&self) -> Result<Option<HomeRecord>> {
        Ok(self.latest())
    }

    fn save(&self, record: &HomeRecord) -> Result<()> {
        *self.record.lock() = Some(*record);
        Ok(())
    }
}
