//! Obstacle world for trajectory planning
//!
//! Obstacles are axis-aligned boxes in the robot base frame, loaded once at
//! process start from a declarative JSON file and immutable for the duration
//! of a run. The planner keeps the end-effector outside every box by at least
//! the configured clearance margin.

use crate::config::ConfigError;
use nalgebra::Point3;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default clearance margin around obstacles (m)
pub const DEFAULT_CLEARANCE_MARGIN_M: f64 = 0.05;

/// An axis-aligned box in the base frame, meters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AabbObstacle {
    /// Optional label used in log output
    #[serde(default)]
    pub name: Option<String>,
    /// Lower corner `[x, y, z]`
    pub min: [f64; 3],
    /// Upper corner `[x, y, z]`
    pub max: [f64; 3],
}

impl AabbObstacle {
    /// Box from two corners
    pub fn new(min: [f64; 3], max: [f64; 3]) -> Self {
        AabbObstacle { name: None, min, max }
    }

    /// Axis-aligned box of half-width `half` centered on `center`
    pub fn centered(center: Point3<f64>, half: f64) -> Self {
        AabbObstacle {
            name: None,
            min: [center.x - half, center.y - half, center.z - half],
            max: [center.x + half, center.y + half, center.z + half],
        }
    }

    /// Squared distance from a point to the box surface, zero inside.
    ///
    /// Per axis the overshoot is `max(min - p, 0) + max(p - max, 0)`; the
    /// squared norm of the three overshoots is smooth enough for the
    /// finite-difference solver to follow.
    pub fn outside_distance_sq(&self, p: &Point3<f64>) -> f64 {
        let coords = [p.x, p.y, p.z];
        let mut dist_sq = 0.0;
        for axis in 0..3 {
            let over = (self.min[axis] - coords[axis]).max(0.0)
                + (coords[axis] - self.max[axis]).max(0.0);
            dist_sq += over * over;
        }
        dist_sq
    }

    /// Signed clearance of a point: distance to the surface when outside,
    /// negative penetration depth when inside.
    ///
    /// The inside branch keeps the gradient pointing at the nearest face, so
    /// a solver seeded through a box can still climb out of it.
    pub fn signed_clearance(&self, p: &Point3<f64>) -> f64 {
        let outside_sq = self.outside_distance_sq(p);
        if outside_sq > 0.0 {
            return outside_sq.sqrt();
        }
        let coords = [p.x, p.y, p.z];
        let mut depth = f64::INFINITY;
        for axis in 0..3 {
            let to_face = (coords[axis] - self.min[axis]).min(self.max[axis] - coords[axis]);
            depth = depth.min(to_face);
        }
        -depth
    }

    fn validate(&self, index: usize) -> Result<(), ConfigError> {
        for axis in 0..3 {
            if self.min[axis] >= self.max[axis] {
                return Err(ConfigError::Invalid(format!(
                    "obstacle {} has an empty extent on axis {}",
                    self.name.clone().unwrap_or_else(|| index.to_string()),
                    axis
                )));
            }
        }
        Ok(())
    }
}

/// On-disk schema of the obstacle file
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ObstacleFile {
    #[serde(default)]
    obstacles: Vec<AabbObstacle>,
    #[serde(default = "default_margin")]
    clearance_margin_m: f64,
}

fn default_margin() -> f64 {
    DEFAULT_CLEARANCE_MARGIN_M
}

/// The immutable obstacle set the planner works against
#[derive(Debug, Clone, PartialEq)]
pub struct ObstacleWorld {
    obstacles: Vec<AabbObstacle>,
    margin: f64,
}

impl ObstacleWorld {
    /// World with validated obstacles and clearance margin
    pub fn new(obstacles: Vec<AabbObstacle>, margin: f64) -> Result<Self, ConfigError> {
        if margin <= 0.0 {
            return Err(ConfigError::Invalid(
                "clearance margin must be positive".to_string(),
            ));
        }
        for (index, obstacle) in obstacles.iter().enumerate() {
            obstacle.validate(index)?;
        }
        Ok(ObstacleWorld { obstacles, margin })
    }

    /// World without any obstacles
    pub fn empty() -> Self {
        ObstacleWorld {
            obstacles: Vec::new(),
            margin: DEFAULT_CLEARANCE_MARGIN_M,
        }
    }

    /// Load the obstacle world from its JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let file: ObstacleFile = crate::config::read_json(path.as_ref())?;
        let world = Self::new(file.obstacles, file.clearance_margin_m)?;
        log::info!(
            "loaded {} obstacle(s), clearance margin {:.3} m",
            world.obstacles.len(),
            world.margin
        );
        Ok(world)
    }

    pub fn obstacles(&self) -> &[AabbObstacle] {
        &self.obstacles
    }

    pub fn margin(&self) -> f64 {
        self.margin
    }

    pub fn is_empty(&self) -> bool {
        self.obstacles.is_empty()
    }

    /// Worst clearance violation of a point in meters, zero when clear.
    ///
    /// A point outside a box but closer than the margin violates by the
    /// shortfall; a point inside violates by the margin plus its penetration
    /// depth (how far it would have to move to become clear).
    pub fn clearance_violation(&self, p: &Point3<f64>) -> f64 {
        let mut worst: f64 = 0.0;
        for obstacle in &self.obstacles {
            let clearance = obstacle.signed_clearance(p);
            if clearance < self.margin {
                worst = worst.max(self.margin - clearance);
            }
        }
        worst
    }

    /// Whether a point keeps the required clearance from every obstacle
    pub fn is_point_clear(&self, p: &Point3<f64>) -> bool {
        self.clearance_violation(p) == 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn unit_box() -> AabbObstacle {
        AabbObstacle::new([0.0, 0.0, 0.0], [1.0, 1.0, 1.0])
    }

    #[test]
    fn distance_is_zero_inside_the_box() {
        let b = unit_box();
        assert_relative_eq!(b.outside_distance_sq(&Point3::new(0.5, 0.5, 0.5)), 0.0);
        assert_relative_eq!(b.outside_distance_sq(&Point3::new(0.0, 1.0, 0.5)), 0.0);
    }

    #[test]
    fn distance_grows_with_separation() {
        let b = unit_box();
        assert_relative_eq!(b.outside_distance_sq(&Point3::new(2.0, 0.5, 0.5)), 1.0);
        assert_relative_eq!(
            b.outside_distance_sq(&Point3::new(2.0, 2.0, 0.5)),
            2.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn signed_clearance_is_negative_inside() {
        let b = unit_box();
        assert_relative_eq!(b.signed_clearance(&Point3::new(0.5, 0.5, 0.5)), -0.5);
        assert_relative_eq!(b.signed_clearance(&Point3::new(0.1, 0.5, 0.5)), -0.1);
        assert_relative_eq!(b.signed_clearance(&Point3::new(1.5, 0.5, 0.5)), 0.5);
    }

    #[test]
    fn violation_reflects_margin_shortfall() {
        let world = ObstacleWorld::new(vec![unit_box()], 0.1).unwrap();
        // dead center: margin plus penetration depth
        assert_relative_eq!(
            world.clearance_violation(&Point3::new(0.5, 0.5, 0.5)),
            0.6
        );
        // outside but too close
        assert_relative_eq!(
            world.clearance_violation(&Point3::new(1.05, 0.5, 0.5)),
            0.05,
            epsilon = 1e-12
        );
        // comfortably clear
        assert!(world.is_point_clear(&Point3::new(2.0, 0.5, 0.5)));
    }

    #[test]
    fn empty_extent_is_rejected() {
        let bad = AabbObstacle::new([0.0, 0.0, 0.0], [1.0, 0.0, 1.0]);
        assert!(ObstacleWorld::new(vec![bad], 0.05).is_err());
    }

    #[test]
    fn non_positive_margin_is_rejected() {
        assert!(ObstacleWorld::new(vec![unit_box()], 0.0).is_err());
    }

    #[test]
    fn obstacle_file_parses_with_default_margin() {
        let text = r#"{ "obstacles": [
            { "name": "fixture", "min": [-0.095, -0.76, 0.125], "max": [0.115, -0.70, 0.325] }
        ] }"#;
        let file: ObstacleFile = serde_json::from_str(text).unwrap();
        let world = ObstacleWorld::new(file.obstacles, file.clearance_margin_m).unwrap();
        assert_eq!(world.obstacles().len(), 1);
        assert_relative_eq!(world.margin(), DEFAULT_CLEARANCE_MARGIN_M);
    }
}
