//! Joint-trajectory optimization
//!
//! The optimizer turns an ordered waypoint list into a smooth joint-space
//! trajectory by solving a nonlinear program: the decision variables are the
//! interior samples between consecutive waypoints (the waypoints themselves
//! are pinned, so the pass-through constraint holds exactly), the objective
//! is the summed squared joint displacement between samples, and every
//! sampled end-effector position must keep the configured clearance from
//! every obstacle. The warm start is the piecewise-linear interpolation of
//! the waypoints, which together with a deterministic solver makes the whole
//! pipeline reproducible: identical inputs yield identical trajectories.

use crate::common::types::{JointVector, JOINT_COUNT};
use crate::common::{to_degrees, to_radians};
use crate::config::{PlannerSettings, RobotProfile};
use crate::kinematics::KinematicChain;
use nalgebra::DVector;

use super::nlp::{NlpProblem, NonlinearProgramSolver, PenaltyGradientSolver, ScalarFn};
use super::obstacles::ObstacleWorld;
use super::trajectory::{ExecutionParameters, JointTrajectory, TimingError};

/// Why no trajectory was produced. Failures are always surfaced; the
/// optimizer never substitutes a degraded or infeasible path.
#[derive(Debug, thiserror::Error)]
pub enum OptimizationFailure {
    #[error("at least two waypoints are required, got {0}")]
    NotEnoughWaypoints(usize),
    #[error(
        "waypoint {index} joint {joint} at {angle:.2} deg is outside [{low:.2}, {high:.2}] deg"
    )]
    WaypointOutOfRange {
        index: usize,
        joint: usize,
        angle: f64,
        low: f64,
        high: f64,
    },
    #[error("waypoint {index} violates obstacle clearance by {violation_m:.4} m")]
    WaypointInCollision { index: usize, violation_m: f64 },
    #[error(
        "no feasible trajectory: clearance violated by {violation_m:.4} m after {iterations} iterations"
    )]
    Infeasible { violation_m: f64, iterations: usize },
    #[error("solver did not converge within {iterations} iterations")]
    DidNotConverge { iterations: usize },
    #[error(transparent)]
    Timing(#[from] TimingError),
}

/// Numbers reported by the solve
#[derive(Debug, Clone)]
pub struct SolveStats {
    pub iterations: usize,
    pub objective: f64,
    pub worst_violation_m: f64,
    pub solver: String,
}

/// A successful optimization: the timed trajectory plus the execution
/// parameters the optimizer recommends for it
#[derive(Debug, Clone)]
pub struct OptimizedTrajectory {
    pub trajectory: JointTrajectory,
    pub recommended: ExecutionParameters,
    pub stats: SolveStats,
}

/// The trajectory optimizer
pub struct TrajectoryOptimizer {
    chain: KinematicChain,
    profile: RobotProfile,
    settings: PlannerSettings,
    solver: Box<dyn NonlinearProgramSolver>,
}

impl TrajectoryOptimizer {
    /// Optimizer with the in-tree penalty-gradient solver
    pub fn new(chain: KinematicChain, profile: RobotProfile, settings: PlannerSettings) -> Self {
        let solver = PenaltyGradientSolver::with_budget(
            settings.penalty_rounds,
            settings.gradient_steps,
            settings.violation_tolerance_m,
        );
        Self::with_solver(chain, profile, settings, Box::new(solver))
    }

    /// Optimizer backed by any solver satisfying the capability interface
    pub fn with_solver(
        chain: KinematicChain,
        profile: RobotProfile,
        settings: PlannerSettings,
        solver: Box<dyn NonlinearProgramSolver>,
    ) -> Self {
        TrajectoryOptimizer {
            chain,
            profile,
            settings,
            solver,
        }
    }

    pub fn profile(&self) -> &RobotProfile {
        &self.profile
    }

    pub fn settings(&self) -> &PlannerSettings {
        &self.settings
    }

    /// Optimize a trajectory through `waypoints_deg` around `world`,
    /// timed under `parameters`.
    pub fn optimize(
        &self,
        waypoints_deg: &[JointVector],
        world: &ObstacleWorld,
        parameters: ExecutionParameters,
    ) -> Result<OptimizedTrajectory, OptimizationFailure> {
        parameters.validate()?;
        self.check_waypoints(waypoints_deg, world)?;

        let waypoints_rad: Vec<JointVector> = waypoints_deg.iter().map(to_radians).collect();
        let spacing = self.settings.samples_per_segment;
        let segments = waypoints_rad.len() - 1;
        let interior = segments * spacing;

        let problem = self.formulate(&waypoints_rad, world, interior);
        let seed = self.linear_seed(&waypoints_rad, interior);
        log::info!(
            "optimizing {} waypoints: {} interior samples, {} constraints, solver {}",
            waypoints_deg.len(),
            interior,
            problem.constraints.len(),
            self.solver.name()
        );

        let report = self.solver.solve(&problem, &seed);
        if report.max_violation > self.settings.violation_tolerance_m {
            return Err(OptimizationFailure::Infeasible {
                violation_m: report.max_violation,
                iterations: report.iterations,
            });
        }
        if !report.converged {
            return Err(OptimizationFailure::DidNotConverge {
                iterations: report.iterations,
            });
        }
        log::info!(
            "solved in {} iterations, objective {:.6}",
            report.iterations,
            report.objective
        );

        let (samples, waypoint_indices) =
            self.assemble_samples(waypoints_deg, &report.solution, spacing);
        let trajectory = JointTrajectory::from_samples(
            samples.clone(),
            waypoint_indices.clone(),
            &self.profile,
            parameters,
        )?;

        // the recommendation comes from the full-speed realization of the
        // same path: its peak bound utilization is the lowest percentage
        // pair that does not slow the profile down further
        let full = JointTrajectory::from_samples(
            samples,
            waypoint_indices,
            &self.profile,
            ExecutionParameters::FULL,
        )?;
        let recommended = self.recommend(&full);

        Ok(OptimizedTrajectory {
            trajectory,
            recommended,
            stats: SolveStats {
                iterations: report.iterations,
                objective: report.objective,
                worst_violation_m: report.max_violation,
                solver: self.solver.name().to_string(),
            },
        })
    }

    fn check_waypoints(
        &self,
        waypoints_deg: &[JointVector],
        world: &ObstacleWorld,
    ) -> Result<(), OptimizationFailure> {
        if waypoints_deg.len() < 2 {
            return Err(OptimizationFailure::NotEnoughWaypoints(waypoints_deg.len()));
        }
        for (index, waypoint) in waypoints_deg.iter().enumerate() {
            for (joint, angle) in waypoint.iter().enumerate() {
                let [low, high] = self.profile.joint_limits_deg[joint];
                if *angle < low || *angle > high {
                    return Err(OptimizationFailure::WaypointOutOfRange {
                        index,
                        joint,
                        angle: *angle,
                        low,
                        high,
                    });
                }
            }
            // a pinned waypoint in collision can never become feasible
            let position = self.chain.end_effector_position(&to_radians(waypoint));
            let violation_m = world.clearance_violation(&position);
            if violation_m > self.settings.violation_tolerance_m {
                return Err(OptimizationFailure::WaypointInCollision { index, violation_m });
            }
        }
        Ok(())
    }

    fn formulate(
        &self,
        waypoints_rad: &[JointVector],
        world: &ObstacleWorld,
        interior: usize,
    ) -> NlpProblem {
        let dim = interior * JOINT_COUNT;
        let mut lower = DVector::zeros(dim);
        let mut upper = DVector::zeros(dim);
        for m in 0..interior {
            for j in 0..JOINT_COUNT {
                let [low, high] = self.profile.joint_limits_deg[j];
                lower[m * JOINT_COUNT + j] = low.to_radians();
                upper[m * JOINT_COUNT + j] = high.to_radians();
            }
        }

        let objective = self.velocity_objective(waypoints_rad);

        let mut constraints: Vec<ScalarFn> = Vec::new();
        for m in 0..interior {
            for obstacle in world.obstacles() {
                let chain = self.chain.clone();
                let obstacle = obstacle.clone();
                let margin = world.margin();
                constraints.push(Box::new(move |x: &DVector<f64>| {
                    let mut q = [0.0; JOINT_COUNT];
                    for j in 0..JOINT_COUNT {
                        q[j] = x[m * JOINT_COUNT + j];
                    }
                    margin - obstacle.signed_clearance(&chain.end_effector_position(&q))
                }));
            }
        }

        NlpProblem {
            lower,
            upper,
            objective,
            constraints,
        }
    }

    /// Sum of squared joint displacements over the full sample sequence
    fn velocity_objective(&self, waypoints_rad: &[JointVector]) -> ScalarFn {
        let waypoints = waypoints_rad.to_vec();
        let spacing = self.settings.samples_per_segment;
        Box::new(move |x: &DVector<f64>| {
            let mut cost = 0.0;
            for w in 0..waypoints.len() - 1 {
                let mut prev = waypoints[w];
                for i in 0..spacing {
                    let base = (w * spacing + i) * JOINT_COUNT;
                    let mut current = [0.0; JOINT_COUNT];
                    for j in 0..JOINT_COUNT {
                        current[j] = x[base + j];
                    }
                    cost += squared_distance(&prev, &current);
                    prev = current;
                }
                cost += squared_distance(&prev, &waypoints[w + 1]);
            }
            cost
        })
    }

    /// Piecewise-linear interpolation between waypoints, the canonical seed
    fn linear_seed(&self, waypoints_rad: &[JointVector], interior: usize) -> DVector<f64> {
        let spacing = self.settings.samples_per_segment;
        let mut seed = DVector::zeros(interior * JOINT_COUNT);
        for w in 0..waypoints_rad.len() - 1 {
            for i in 0..spacing {
                let t = (i + 1) as f64 / (spacing + 1) as f64;
                let base = (w * spacing + i) * JOINT_COUNT;
                for j in 0..JOINT_COUNT {
                    seed[base + j] = waypoints_rad[w][j]
                        + t * (waypoints_rad[w + 1][j] - waypoints_rad[w][j]);
                }
            }
        }
        seed
    }

    /// Interleave the pinned waypoints with the solved interior samples,
    /// back in degrees
    fn assemble_samples(
        &self,
        waypoints_deg: &[JointVector],
        solution: &DVector<f64>,
        spacing: usize,
    ) -> (Vec<JointVector>, Vec<usize>) {
        let mut samples = Vec::new();
        let mut waypoint_indices = Vec::with_capacity(waypoints_deg.len());
        for w in 0..waypoints_deg.len() {
            waypoint_indices.push(samples.len());
            samples.push(waypoints_deg[w]);
            if w + 1 < waypoints_deg.len() {
                for i in 0..spacing {
                    let base = (w * spacing + i) * JOINT_COUNT;
                    let mut q = [0.0; JOINT_COUNT];
                    for j in 0..JOINT_COUNT {
                        q[j] = solution[base + j];
                    }
                    samples.push(to_degrees(&q));
                }
            }
        }
        (samples, waypoint_indices)
    }

    /// Peak bound utilization of the full-speed profile, rounded up to whole
    /// percent. The binding axis reads 100.
    fn recommend(&self, full: &JointTrajectory) -> ExecutionParameters {
        let velocity = 100.0 * full.peak_velocity() / self.profile.max_velocity_deg_s;
        let acceleration =
            100.0 * full.peak_acceleration() / self.profile.max_acceleration_deg_s2;
        ExecutionParameters::new(
            velocity.ceil().clamp(1.0, 100.0),
            acceleration.ceil().clamp(1.0, 100.0),
        )
    }
}

fn squared_distance(a: &JointVector, b: &JointVector) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::ZERO_JOINTS;
    use crate::planning::obstacles::AabbObstacle;
    use approx::assert_abs_diff_eq;

    fn optimizer() -> TrajectoryOptimizer {
        TrajectoryOptimizer::new(
            KinematicChain::ur10(),
            RobotProfile::default(),
            PlannerSettings::default(),
        )
    }

    fn sweep_waypoints() -> Vec<JointVector> {
        let mut goal = ZERO_JOINTS;
        goal[0] = 10.0;
        vec![ZERO_JOINTS, goal]
    }

    #[test]
    fn rejects_a_single_waypoint() {
        let result = optimizer().optimize(
            &[ZERO_JOINTS],
            &ObstacleWorld::empty(),
            ExecutionParameters::FULL,
        );
        assert!(matches!(
            result,
            Err(OptimizationFailure::NotEnoughWaypoints(1))
        ));
    }

    #[test]
    fn rejects_waypoints_outside_joint_limits() {
        let mut bad = ZERO_JOINTS;
        bad[3] = 200.0;
        let result = optimizer().optimize(
            &[ZERO_JOINTS, bad],
            &ObstacleWorld::empty(),
            ExecutionParameters::FULL,
        );
        assert!(matches!(
            result,
            Err(OptimizationFailure::WaypointOutOfRange {
                index: 1,
                joint: 3,
                ..
            })
        ));
    }

    #[test]
    fn straight_sweep_stays_straight_and_monotone() {
        let opt = optimizer();
        let result = opt
            .optimize(
                &sweep_waypoints(),
                &ObstacleWorld::empty(),
                ExecutionParameters::FULL,
            )
            .unwrap();

        let points = result.trajectory.points();
        // (waypoints - 1) * (samples_per_segment + 1) + 1
        assert_eq!(points.len(), 5);

        // passes through both waypoints exactly
        assert_eq!(result.trajectory.waypoint_indices(), &[0, 4]);
        assert_eq!(points[0].position, sweep_waypoints()[0]);
        assert_eq!(points[4].position, sweep_waypoints()[1]);

        // J1 is monotone from 0 to 10, the other joints never move
        for pair in points.windows(2) {
            assert!(pair[1].position[0] >= pair[0].position[0]);
        }
        for point in points {
            for j in 1..JOINT_COUNT {
                assert_abs_diff_eq!(point.position[j], 0.0, epsilon = 1e-9);
            }
        }

        // bounds hold at full speed
        let profile = RobotProfile::default();
        assert!(result.trajectory.peak_velocity() <= profile.max_velocity_deg_s + 1e-9);
        assert!(
            result.trajectory.peak_acceleration() <= profile.max_acceleration_deg_s2 + 1e-9
        );
    }

    #[test]
    fn optimization_is_deterministic() {
        let opt = optimizer();
        let world = ObstacleWorld::empty();
        let a = opt
            .optimize(&sweep_waypoints(), &world, ExecutionParameters::FULL)
            .unwrap();
        let b = opt
            .optimize(&sweep_waypoints(), &world, ExecutionParameters::FULL)
            .unwrap();
        assert_eq!(a.trajectory.points(), b.trajectory.points());
        assert_eq!(a.recommended, b.recommended);
    }

    #[test]
    fn visits_waypoints_in_sequence_order() {
        let mut second = ZERO_JOINTS;
        second[0] = 10.0;
        let mut third = ZERO_JOINTS;
        third[0] = 5.0;
        third[1] = -10.0;
        let waypoints = vec![ZERO_JOINTS, second, third];

        let result = optimizer()
            .optimize(&waypoints, &ObstacleWorld::empty(), ExecutionParameters::FULL)
            .unwrap();
        let indices = result.trajectory.waypoint_indices();
        assert_eq!(indices, &[0, 4, 8]);
        for (waypoint, index) in waypoints.iter().zip(indices.iter()) {
            assert_eq!(result.trajectory.points()[*index].position, *waypoint);
        }
    }

    #[test]
    fn recommendation_saturates_the_binding_axis() {
        let result = optimizer()
            .optimize(
                &sweep_waypoints(),
                &ObstacleWorld::empty(),
                ExecutionParameters::FULL,
            )
            .unwrap();
        let rec = result.recommended;
        assert!(rec.velocity_percent >= 1.0 && rec.velocity_percent <= 100.0);
        assert!(rec.acceleration_percent >= 1.0 && rec.acceleration_percent <= 100.0);
        assert_eq!(
            rec.velocity_percent.max(rec.acceleration_percent),
            100.0
        );
    }

    #[test]
    fn clear_world_trajectory_keeps_its_clearance() {
        let chain = KinematicChain::ur10();
        // a box well away from the swept end-effector arc
        let world = ObstacleWorld::new(
            vec![AabbObstacle::new([1.0, 1.0, 1.0], [1.2, 1.2, 1.2])],
            0.05,
        )
        .unwrap();
        let result = optimizer()
            .optimize(&sweep_waypoints(), &world, ExecutionParameters::FULL)
            .unwrap();
        for point in result.trajectory.points() {
            let p = chain.end_effector_position(&crate::common::to_radians(&point.position));
            assert!(world.is_point_clear(&p));
        }
    }

    #[test]
    fn blocked_path_deviates_or_fails_but_never_violates() {
        let chain = KinematicChain::ur10();
        // block the end-effector position at the middle of the sweep
        let mut mid = ZERO_JOINTS;
        mid[0] = 5.0;
        let blocked = chain.end_effector_position(&crate::common::to_radians(&mid));
        let world =
            ObstacleWorld::new(vec![AabbObstacle::centered(blocked, 0.04)], 0.05).unwrap();

        match optimizer().optimize(&sweep_waypoints(), &world, ExecutionParameters::FULL) {
            Ok(result) => {
                for point in result.trajectory.points() {
                    let p = chain
                        .end_effector_position(&crate::common::to_radians(&point.position));
                    assert!(
                        world.clearance_violation(&p)
                            <= PlannerSettings::default().violation_tolerance_m
                    );
                }
            }
            Err(OptimizationFailure::Infeasible { .. })
            | Err(OptimizationFailure::DidNotConverge { .. }) => {}
            Err(other) => panic!("unexpected failure: {other}"),
        }
    }

    #[test]
    fn waypoint_inside_an_obstacle_is_rejected_up_front() {
        let chain = KinematicChain::ur10();
        let start = chain.end_effector_position(&to_radians(&ZERO_JOINTS));
        let world =
            ObstacleWorld::new(vec![AabbObstacle::centered(start, 0.1)], 0.05).unwrap();
        let result = optimizer().optimize(&sweep_waypoints(), &world, ExecutionParameters::FULL);
        assert!(matches!(
            result,
            Err(OptimizationFailure::WaypointInCollision { index: 0, .. })
        ));
    }
}
