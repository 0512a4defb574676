//! Common types and utilities for the Hephaestus arm

/// Shared joint-space types used across the codebase
pub mod types {
    /// Number of joints of the arm
    pub const JOINT_COUNT: usize = 6;

    /// A full joint configuration, one angle per joint.
    ///
    /// Unless a function says otherwise, angles are in degrees; the
    /// kinematics and the wire protocol work in radians internally.
    pub type JointVector = [f64; JOINT_COUNT];

    /// A joint configuration with every angle at zero
    pub const ZERO_JOINTS: JointVector = [0.0; JOINT_COUNT];
}

use types::{JointVector, JOINT_COUNT};

/// Convert a joint vector from degrees to radians
pub fn to_radians(q_deg: &JointVector) -> JointVector {
    let mut q = [0.0; JOINT_COUNT];
    for (out, deg) in q.iter_mut().zip(q_deg.iter()) {
        *out = deg.to_radians();
    }
    q
}

/// Convert a joint vector from radians to degrees
pub fn to_degrees(q_rad: &JointVector) -> JointVector {
    let mut q = [0.0; JOINT_COUNT];
    for (out, rad) in q.iter_mut().zip(q_rad.iter()) {
        *out = rad.to_degrees();
    }
    q
}

/// Largest absolute per-joint difference between two configurations
pub fn max_abs_diff(a: &JointVector, b: &JointVector) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn degree_radian_round_trip() {
        let q_deg = [0.0, 45.0, -90.0, 180.0, 12.5, -179.0];
        let back = to_degrees(&to_radians(&q_deg));
        for j in 0..JOINT_COUNT {
            assert_relative_eq!(back[j], q_deg[j], max_relative = 1e-12);
        }
    }

    #[test]
    fn max_abs_diff_picks_worst_joint() {
        let a = [0.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        let b = [1.0, -3.0, 0.5, 0.0, 2.0, 0.0];
        assert_relative_eq!(max_abs_diff(&a, &b), 3.0);
    }
}
