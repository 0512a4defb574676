//! Configuration for the Hephaestus arm
//!
//! Profiles are declarative JSON files read once at process start and
//! validated before anything else runs. Obstacle geometry has its own file,
//! handled in [`crate::planning::obstacles`].

use crate::common::types::{JointVector, JOINT_COUNT};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Errors raised while loading or validating configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Physical description of the robot and its controller endpoints
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RobotProfile {
    /// Per-joint angle limits in degrees, `[low, high]`
    pub joint_limits_deg: [[f64; 2]; JOINT_COUNT],
    /// Maximum joint speed at 100% velocity (deg/s)
    pub max_velocity_deg_s: f64,
    /// Maximum joint acceleration at 100% acceleration (deg/s^2)
    pub max_acceleration_deg_s2: f64,
    /// Home posture in degrees
    pub home_deg: JointVector,
    /// Controller address
    #[serde(default = "default_address")]
    pub address: String,
    /// Port accepting motion programs
    #[serde(default = "default_command_port")]
    pub command_port: u16,
    /// Port serving state frames
    #[serde(default = "default_state_port")]
    pub state_port: u16,
}

fn default_address() -> String {
    "192.168.0.102".to_string()
}

fn default_command_port() -> u16 {
    30002
}

fn default_state_port() -> u16 {
    30004
}

impl Default for RobotProfile {
    fn default() -> Self {
        RobotProfile {
            joint_limits_deg: [[-180.0, 180.0]; JOINT_COUNT],
            max_velocity_deg_s: 120.0,
            max_acceleration_deg_s2: 80.0,
            home_deg: [-90.0, -90.0, -90.0, -90.0, 90.0, 0.0],
            address: default_address(),
            command_port: default_command_port(),
            state_port: default_state_port(),
        }
    }
}

impl RobotProfile {
    /// Load a profile from a JSON file and validate it
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let profile: RobotProfile = read_json(path.as_ref())?;
        profile.validate()?;
        Ok(profile)
    }

    /// Reject profiles the planner cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (j, limits) in self.joint_limits_deg.iter().enumerate() {
            if limits[0] >= limits[1] {
                return Err(ConfigError::Invalid(format!(
                    "joint {} limits are empty: [{}, {}]",
                    j + 1,
                    limits[0],
                    limits[1]
                )));
            }
        }
        if self.max_velocity_deg_s <= 0.0 {
            return Err(ConfigError::Invalid(
                "max velocity must be positive".to_string(),
            ));
        }
        if self.max_acceleration_deg_s2 <= 0.0 {
            return Err(ConfigError::Invalid(
                "max acceleration must be positive".to_string(),
            ));
        }
        if !self.joints_within_limits(&self.home_deg) {
            return Err(ConfigError::Invalid(
                "home posture violates joint limits".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether every joint of `q_deg` is inside its configured range
    pub fn joints_within_limits(&self, q_deg: &JointVector) -> bool {
        q_deg
            .iter()
            .zip(self.joint_limits_deg.iter())
            .all(|(angle, limits)| *angle >= limits[0] && *angle <= limits[1])
    }
}

/// Tuning knobs of the trajectory optimizer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlannerSettings {
    /// Interior samples inserted between consecutive waypoints
    pub samples_per_segment: usize,
    /// Penalty escalation rounds of the solver
    pub penalty_rounds: usize,
    /// Gradient steps per penalty round
    pub gradient_steps: usize,
    /// Largest tolerated clearance violation (m)
    pub violation_tolerance_m: f64,
}

impl Default for PlannerSettings {
    fn default() -> Self {
        PlannerSettings {
            samples_per_segment: 3,
            penalty_rounds: 10,
            gradient_steps: 250,
            violation_tolerance_m: 1e-3,
        }
    }
}

impl PlannerSettings {
    /// Load settings from a JSON file and validate them
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let settings: PlannerSettings = read_json(path.as_ref())?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.samples_per_segment == 0 {
            return Err(ConfigError::Invalid(
                "samples_per_segment must be at least 1".to_string(),
            ));
        }
        if self.penalty_rounds == 0 || self.gradient_steps == 0 {
            return Err(ConfigError::Invalid(
                "solver iteration budgets must be positive".to_string(),
            ));
        }
        if self.violation_tolerance_m <= 0.0 {
            return Err(ConfigError::Invalid(
                "violation tolerance must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// A waypoint list as entered in the editor, degrees per joint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaypointList {
    pub waypoints_deg: Vec<JointVector>,
}

impl WaypointList {
    /// Load a waypoint list from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        read_json(path.as_ref())
    }
}

pub(crate) fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}
