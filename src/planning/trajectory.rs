//! Timed joint trajectories
//!
//! The optimizer produces a spatial sequence of joint samples; this module
//! turns it into a time-parameterized profile that honors the velocity and
//! acceleration bounds scaled by the user percentages. Changing the
//! percentages re-times the same spatial path, the optimization itself is
//! not repeated.

use crate::common::types::{JointVector, JOINT_COUNT};
use crate::common::max_abs_diff;
use crate::config::RobotProfile;

/// Shortest allowed step duration; keeps degenerate all-equal paths from
/// collapsing to zero time.
const MIN_STEP_DURATION_S: f64 = 1e-3;

/// User-adjustable fractions of the robot's physical maxima
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExecutionParameters {
    /// Velocity bound as a percentage of the maximum, in (0, 100]
    pub velocity_percent: f64,
    /// Acceleration bound as a percentage of the maximum, in (0, 100]
    pub acceleration_percent: f64,
}

impl ExecutionParameters {
    /// Full-speed parameters
    pub const FULL: ExecutionParameters = ExecutionParameters {
        velocity_percent: 100.0,
        acceleration_percent: 100.0,
    };

    pub fn new(velocity_percent: f64, acceleration_percent: f64) -> Self {
        ExecutionParameters {
            velocity_percent,
            acceleration_percent,
        }
    }

    pub fn validate(&self) -> Result<(), TimingError> {
        for (name, value) in [
            ("velocity", self.velocity_percent),
            ("acceleration", self.acceleration_percent),
        ] {
            if !(value > 0.0 && value <= 100.0) {
                return Err(TimingError::PercentOutOfRange { name, value });
            }
        }
        Ok(())
    }

    /// Fraction of the maximum this percentage selects
    fn fraction(percent: f64) -> f64 {
        percent / 100.0
    }

    pub fn velocity_fraction(&self) -> f64 {
        Self::fraction(self.velocity_percent)
    }

    pub fn acceleration_fraction(&self) -> f64 {
        Self::fraction(self.acceleration_percent)
    }
}

/// Errors raised while timing a trajectory
#[derive(Debug, thiserror::Error)]
pub enum TimingError {
    #[error("{name} percentage {value} is outside (0, 100]")]
    PercentOutOfRange { name: &'static str, value: f64 },
    #[error("a trajectory needs at least 2 samples, got {0}")]
    TooFewSamples(usize),
}

/// One timed sample of the trajectory
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrajectoryPoint {
    /// Time since the start of the trajectory (s)
    pub time: f64,
    /// Joint angles (deg)
    pub position: JointVector,
    /// Joint velocities (deg/s)
    pub velocity: JointVector,
    /// Joint accelerations (deg/s^2)
    pub acceleration: JointVector,
}

/// A time-parameterized joint trajectory through an ordered set of waypoints
#[derive(Debug, Clone, PartialEq)]
pub struct JointTrajectory {
    points: Vec<TrajectoryPoint>,
    step_duration: f64,
    waypoint_indices: Vec<usize>,
    parameters: ExecutionParameters,
}

impl JointTrajectory {
    /// Time a spatial sample sequence under the scaled bounds.
    ///
    /// A single step duration is chosen for the whole profile: the smallest
    /// dt such that no per-step displacement exceeds the velocity bound and
    /// no second difference (including the from-rest first step and to-rest
    /// last step) exceeds the acceleration bound.
    pub fn from_samples(
        samples: Vec<JointVector>,
        waypoint_indices: Vec<usize>,
        profile: &RobotProfile,
        parameters: ExecutionParameters,
    ) -> Result<Self, TimingError> {
        parameters.validate()?;
        if samples.len() < 2 {
            return Err(TimingError::TooFewSamples(samples.len()));
        }

        let velocity_limit = profile.max_velocity_deg_s * parameters.velocity_fraction();
        let acceleration_limit =
            profile.max_acceleration_deg_s2 * parameters.acceleration_fraction();

        let mut worst_step = 0.0_f64;
        for pair in samples.windows(2) {
            worst_step = worst_step.max(max_abs_diff(&pair[0], &pair[1]));
        }

        // second differences drive the acceleration requirement; the first
        // and last steps start from and end at rest
        let mut worst_swing = max_abs_diff(&samples[0], &samples[1])
            .max(max_abs_diff(&samples[samples.len() - 2], &samples[samples.len() - 1]));
        for triple in samples.windows(3) {
            for j in 0..JOINT_COUNT {
                let swing = (triple[2][j] - 2.0 * triple[1][j] + triple[0][j]).abs();
                worst_swing = worst_swing.max(swing);
            }
        }

        let dt_velocity = worst_step / velocity_limit;
        let dt_acceleration = (worst_swing / acceleration_limit).sqrt();
        let step_duration = dt_velocity.max(dt_acceleration).max(MIN_STEP_DURATION_S);

        let n = samples.len();
        let mut points = Vec::with_capacity(n);
        for k in 0..n {
            let mut velocity = [0.0; JOINT_COUNT];
            let mut acceleration = [0.0; JOINT_COUNT];
            for j in 0..JOINT_COUNT {
                velocity[j] = if k == 0 || k == n - 1 {
                    0.0
                } else {
                    (samples[k + 1][j] - samples[k - 1][j]) / (2.0 * step_duration)
                };
                acceleration[j] = if k == 0 {
                    (samples[1][j] - samples[0][j]) / (step_duration * step_duration)
                } else if k == n - 1 {
                    -(samples[n - 1][j] - samples[n - 2][j]) / (step_duration * step_duration)
                } else {
                    (samples[k + 1][j] - 2.0 * samples[k][j] + samples[k - 1][j])
                        / (step_duration * step_duration)
                };
            }
            points.push(TrajectoryPoint {
                time: k as f64 * step_duration,
                position: samples[k],
                velocity,
                acceleration,
            });
        }

        Ok(JointTrajectory {
            points,
            step_duration,
            waypoint_indices,
            parameters,
        })
    }

    /// The same spatial path timed under different percentages
    pub fn retimed(
        &self,
        profile: &RobotProfile,
        parameters: ExecutionParameters,
    ) -> Result<Self, TimingError> {
        let samples: Vec<JointVector> = self.points.iter().map(|p| p.position).collect();
        Self::from_samples(samples, self.waypoint_indices.clone(), profile, parameters)
    }

    pub fn points(&self) -> &[TrajectoryPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Sample indices at which the input waypoints sit, in traversal order
    pub fn waypoint_indices(&self) -> &[usize] {
        &self.waypoint_indices
    }

    /// Percentages this profile was timed under
    pub fn parameters(&self) -> ExecutionParameters {
        self.parameters
    }

    pub fn step_duration(&self) -> f64 {
        self.step_duration
    }

    /// Total traversal time (s)
    pub fn duration(&self) -> f64 {
        self.points.last().map(|p| p.time).unwrap_or(0.0)
    }

    /// Largest absolute joint velocity anywhere in the profile (deg/s)
    pub fn peak_velocity(&self) -> f64 {
        self.points
            .iter()
            .flat_map(|p| p.velocity.iter())
            .fold(0.0, |acc, v| acc.max(v.abs()))
    }

    /// Largest absolute joint acceleration anywhere in the profile (deg/s^2)
    pub fn peak_acceleration(&self) -> f64 {
        self.points
            .iter()
            .flat_map(|p| p.acceleration.iter())
            .fold(0.0, |acc, a| acc.max(a.abs()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sweep_samples() -> Vec<JointVector> {
        // straight J1 sweep 0..10 degrees over five samples
        (0..5)
            .map(|k| {
                let mut q = [0.0; JOINT_COUNT];
                q[0] = k as f64 * 2.5;
                q
            })
            .collect()
    }

    #[test]
    fn bounds_hold_at_every_percentage() {
        let profile = RobotProfile::default();
        for (vp, ap) in [(100.0, 100.0), (50.0, 100.0), (100.0, 25.0), (10.0, 10.0)] {
            let parameters = ExecutionParameters::new(vp, ap);
            let trajectory = JointTrajectory::from_samples(
                sweep_samples(),
                vec![0, 4],
                &profile,
                parameters,
            )
            .unwrap();
            let v_lim = profile.max_velocity_deg_s * vp / 100.0;
            let a_lim = profile.max_acceleration_deg_s2 * ap / 100.0;
            assert!(trajectory.peak_velocity() <= v_lim + 1e-9);
            assert!(trajectory.peak_acceleration() <= a_lim + 1e-9);
        }
    }

    #[test]
    fn lower_percentages_stretch_the_profile() {
        let profile = RobotProfile::default();
        let fast = JointTrajectory::from_samples(
            sweep_samples(),
            vec![0, 4],
            &profile,
            ExecutionParameters::FULL,
        )
        .unwrap();
        let slow = fast
            .retimed(&profile, ExecutionParameters::new(10.0, 10.0))
            .unwrap();
        assert!(slow.duration() > fast.duration());
        for (a, b) in fast.points().iter().zip(slow.points().iter()) {
            assert_eq!(a.position, b.position);
        }
    }

    #[test]
    fn endpoints_are_at_rest() {
        let profile = RobotProfile::default();
        let trajectory = JointTrajectory::from_samples(
            sweep_samples(),
            vec![0, 4],
            &profile,
            ExecutionParameters::FULL,
        )
        .unwrap();
        let first = trajectory.points().first().unwrap();
        let last = trajectory.points().last().unwrap();
        for j in 0..JOINT_COUNT {
            assert_relative_eq!(first.velocity[j], 0.0);
            assert_relative_eq!(last.velocity[j], 0.0);
        }
    }

    #[test]
    fn zero_percent_is_rejected() {
        let profile = RobotProfile::default();
        let result = JointTrajectory::from_samples(
            sweep_samples(),
            vec![0, 4],
            &profile,
            ExecutionParameters::new(0.0, 100.0),
        );
        assert!(matches!(
            result,
            Err(TimingError::PercentOutOfRange { name: "velocity", .. })
        ));
    }

    #[test]
    fn stationary_path_gets_the_floor_duration() {
        let profile = RobotProfile::default();
        let samples = vec![[10.0; JOINT_COUNT], [10.0; JOINT_COUNT]];
        let trajectory = JointTrajectory::from_samples(
            samples,
            vec![0, 1],
            &profile,
            ExecutionParameters::FULL,
        )
        .unwrap();
        assert_relative_eq!(trajectory.step_duration(), 1e-3);
        assert_relative_eq!(trajectory.peak_velocity(), 0.0);
    }

    #[test]
    fn too_few_samples_is_an_error() {
        let profile = RobotProfile::default();
        let result = JointTrajectory::from_samples(
            vec![[0.0; JOINT_COUNT]],
            vec![0],
            &profile,
            ExecutionParameters::FULL,
        );
        assert!(matches!(result, Err(TimingError::TooFewSamples(1))));
    }
}
