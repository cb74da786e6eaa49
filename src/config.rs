use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File, FileFormat};
use homeward_geometry::Pose;
use homeward_navigation::FinderMode;
use homeward_navigation::finder::FinderConfig;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, error, info, warn};

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Layer the default file, an optional override file and `HOMEWARD_*`
/// environment variables (`HOMEWARD_PREFERENCES__IS_ACTIVE=on`).
pub fn load_config(override_path: Option<&Path>) -> Result<Config, ConfigError> {
    info!("Attempting to load configuration from {}", DEFAULT_CONFIG_PATH);

    let mut builder = Config::builder()
        .add_source(File::new(DEFAULT_CONFIG_PATH, FileFormat::Toml).required(true));
    if let Some(path) = override_path {
        info!("Layering configuration from {}", path.display());
        builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
    }
    let settings = builder
        .add_source(
            Environment::with_prefix("HOMEWARD")
                .prefix_separator("_")
                .separator("__"),
        )
        .build();

    match settings {
        Ok(config) => {
            info!("Successfully loaded configuration: {:?}", config);
            Ok(config)
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            Err(e)
        }
    }
}

/// When home gets defined without an explicit request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HomePolicy {
    /// The first time the robot becomes solitary.
    #[default]
    Startup,
    /// Whenever the battery hatch gets closed.
    HatchClosed,
}

impl FromStr for HomePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "startup" => Ok(HomePolicy::Startup),
            "hatch-closed" => Ok(HomePolicy::HatchClosed),
            other => Err(format!("unknown home policy: {other}")),
        }
    }
}

/// User preferences of the behavior. Every key is validated on its own and
/// falls back to its default when missing or invalid.
#[derive(Debug, Clone, PartialEq)]
pub struct Preferences {
    pub is_active: bool,
    pub technology: FinderMode,
    /// Radius around home the robot may leave to engage someone (m).
    pub max_distance: f64,
    /// Opening of the allowed sector in front of home (degrees).
    pub max_angle: f64,
    /// Wandering time before going home (s). Negative disables.
    pub bored_timeout: f64,
    pub home_policy: HomePolicy,
    pub tablet_feedback: bool,
    pub vocal_feedback: bool,
    pub notification_feedback: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            is_active: false,
            technology: FinderMode::Slam,
            max_distance: 3.0,
            max_angle: 180.0,
            bored_timeout: 10.0,
            home_policy: HomePolicy::Startup,
            tablet_feedback: true,
            vocal_feedback: true,
            notification_feedback: true,
        }
    }
}

impl Preferences {
    pub fn from_config(config: &Config) -> Self {
        let defaults = Self::default();
        Self {
            is_active: read(config, "is_active", pseudo_bool, defaults.is_active),
            technology: read(
                config,
                "technology",
                |raw| match raw.to_lowercase().as_str() {
                    "slam" | "pod" | "aruco" => raw.parse().ok(),
                    _ => None,
                },
                defaults.technology,
            ),
            max_distance: read(
                config,
                "max_distance",
                |raw| raw.parse().ok().filter(|v: &f64| (0.0..=3.0).contains(v)),
                defaults.max_distance,
            ),
            max_angle: read(
                config,
                "max_angle",
                |raw| raw.parse().ok().filter(|v: &f64| *v > 0.0 && *v <= 360.0),
                defaults.max_angle,
            ),
            bored_timeout: read(
                config,
                "bored_timeout",
                |raw| raw.parse().ok().filter(|v: &f64| *v == -1.0 || *v >= 0.0),
                defaults.bored_timeout,
            ),
            home_policy: read(
                config,
                "home_policy",
                |raw| raw.to_lowercase().parse().ok(),
                defaults.home_policy,
            ),
            tablet_feedback: read(config, "tablet_feedback", pseudo_bool, defaults.tablet_feedback),
            vocal_feedback: read(config, "vocal_feedback", pseudo_bool, defaults.vocal_feedback),
            notification_feedback: read(
                config,
                "notification_feedback",
                pseudo_bool,
                defaults.notification_feedback,
            ),
        }
    }

    /// `None` when the bored trigger is disabled.
    pub fn bored_timeout(&self) -> Option<Duration> {
        (self.bored_timeout >= 0.0).then(|| Duration::from_secs_f64(self.bored_timeout))
    }
}

/// Accepts `on/off`, `yes/no`, `true/false` and integers.
pub fn pseudo_bool(raw: &str) -> Option<bool> {
    if let Ok(value) = raw.trim().parse::<i64>() {
        return Some(value != 0);
    }
    match raw.trim().to_lowercase().as_str() {
        "on" | "true" | "yes" => Some(true),
        "off" | "false" | "no" => Some(false),
        _ => None,
    }
}

fn read<T>(config: &Config, key: &str, parse: impl Fn(&str) -> Option<T>, default: T) -> T {
    let path = format!("preferences.{key}");
    match config.get_string(&path) {
        Ok(raw) => parse(&raw).unwrap_or_else(|| {
            warn!(key, raw = %raw, "Invalid preference, using default");
            default
        }),
        Err(_) => {
            debug!(key, "Preference not set, using default");
            default
        }
    }
}

/// Deserialize a whole section, falling back to its defaults.
fn section<T: DeserializeOwned + Default>(config: &Config, key: &str) -> T {
    match config.get::<T>(key) {
        Ok(value) => value,
        Err(ConfigError::NotFound(_)) => T::default(),
        Err(e) => {
            warn!(section = key, error = %e, "Invalid configuration section, using defaults");
            T::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PositionSettings {
    /// Where the home record is persisted.
    pub record_path: PathBuf,
    pub max_record_age_secs: f64,
}

impl Default for PositionSettings {
    fn default() -> Self {
        Self {
            record_path: PathBuf::from("homeward-position.json"),
            max_record_age_secs: 600.0,
        }
    }
}

impl PositionSettings {
    pub fn max_record_age(&self) -> Duration {
        Duration::from_secs_f64(self.max_record_age_secs.max(0.0))
    }
}

/// World layout and pacing of the simulated robot.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    /// How long the demo runs (s).
    pub duration_secs: f64,
    pub tick_hz: f64,
    /// Odometric pose the robot starts at.
    pub start: Pose,
    /// Charging station pose in odometric coordinates.
    pub station: Pose,
    pub big_marker: Pose,
    pub small_marker: Pose,
    /// Where a person shows up, if anyone does.
    pub human: Option<[f64; 2]>,
    /// Seconds after start at which the person shows up.
    pub human_after_secs: f64,
    /// Longest random leg while wandering (m).
    pub wander_step: f64,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            duration_secs: 120.0,
            tick_hz: 50.0,
            start: Pose::identity(),
            station: Pose::new(-0.7, 0.0, 0.0),
            // Laid out so that either marker puts home at the origin.
            big_marker: Pose::new(0.0, 0.0, 135f64.to_radians()),
            small_marker: Pose::new(0.61, 0.0, -135f64.to_radians()),
            human: Some([2.0, 0.5]),
            human_after_secs: 40.0,
            wander_step: 0.8,
        }
    }
}

/// Everything the binary reads from the configuration.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Settings {
    pub preferences: Preferences,
    pub position: PositionSettings,
    pub finder: FinderConfig,
    pub simulation: SimulationSettings,
}

impl Settings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            preferences: Preferences::from_config(config),
            position: section(config, "position"),
            finder: section(config, "finder"),
            simulation: section(config, "simulation"),
        }
    }
}
