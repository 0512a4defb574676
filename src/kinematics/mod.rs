//! Forward kinematics for the Hephaestus arm
//!
//! The arm is described by a classic Denavit-Hartenberg table plus a fixed
//! tool-center-point offset along the flange Z axis. The planner only needs
//! the end-effector position in the base frame, so no inverse kinematics or
//! orientation bookkeeping lives here.

use crate::common::types::{JointVector, JOINT_COUNT};
use nalgebra::{Matrix4, Point3, Vector3};

/// One row of the Denavit-Hartenberg table (the joint angle is variable)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DhRow {
    /// Link offset along the previous Z axis (m)
    pub d: f64,
    /// Link length along the common normal (m)
    pub a: f64,
    /// Link twist about the common normal (rad)
    pub alpha: f64,
}

/// Kinematic chain of the 6DOF arm
#[derive(Debug, Clone, PartialEq)]
pub struct KinematicChain {
    rows: [DhRow; JOINT_COUNT],
    /// Tool-center-point offset along the flange Z axis (m)
    tcp_offset: f64,
}

impl KinematicChain {
    /// Chain for a UR10-class arm with a 200 mm tool offset
    pub fn ur10() -> Self {
        use std::f64::consts::FRAC_PI_2;
        KinematicChain {
            rows: [
                DhRow { d: 0.1273, a: 0.0, alpha: FRAC_PI_2 },
                DhRow { d: 0.0, a: -0.612, alpha: 0.0 },
                DhRow { d: 0.0, a: -0.5723, alpha: 0.0 },
                DhRow { d: 0.1639, a: 0.0, alpha: FRAC_PI_2 },
                DhRow { d: 0.1157, a: 0.0, alpha: -FRAC_PI_2 },
                DhRow { d: 0.0922, a: 0.0, alpha: 0.0 },
            ],
            tcp_offset: 0.200,
        }
    }

    /// Build a chain from an explicit table and tool offset
    pub fn new(rows: [DhRow; JOINT_COUNT], tcp_offset: f64) -> Self {
        KinematicChain { rows, tcp_offset }
    }

    /// Homogeneous transform of a single DH row for joint angle `theta`
    fn dh_transform(theta: f64, row: &DhRow) -> Matrix4<f64> {
        let (st, ct) = theta.sin_cos();
        let (sa, ca) = row.alpha.sin_cos();
        Matrix4::new(
            ct, -st * ca, st * sa, row.a * ct,
            st, ct * ca, -ct * sa, row.a * st,
            0.0, sa, ca, row.d,
            0.0, 0.0, 0.0, 1.0,
        )
    }

    /// Transform applied by the tool mounted on the flange
    fn tcp_transform(&self) -> Matrix4<f64> {
        let mut t = Matrix4::identity();
        t[(2, 3)] = self.tcp_offset;
        t
    }

    /// End-effector position in the base frame for joint angles in radians
    pub fn end_effector_position(&self, q_rad: &JointVector) -> Point3<f64> {
        let mut t = Matrix4::identity();
        for (theta, row) in q_rad.iter().zip(self.rows.iter()) {
            t *= Self::dh_transform(*theta, row);
        }
        t *= self.tcp_transform();
        Point3::new(t[(0, 3)], t[(1, 3)], t[(2, 3)])
    }

    /// End-effector displacement between two configurations (radians)
    pub fn end_effector_delta(&self, from: &JointVector, to: &JointVector) -> Vector3<f64> {
        self.end_effector_position(to) - self.end_effector_position(from)
    }
}
