//! Planning module for the Hephaestus arm
pub mod nlp;
pub mod obstacles;
pub mod optimizer;
pub mod trajectory;

use self::obstacles::ObstacleWorld;
use self::optimizer::{OptimizationFailure, OptimizedTrajectory, TrajectoryOptimizer};
use self::trajectory::{ExecutionParameters, JointTrajectory, TimingError};
use crate::common::types::JointVector;
use crate::config::{PlannerSettings, RobotProfile};
use crate::kinematics::KinematicChain;
use crate::lifecycle::{LifecycleNode, LifecycleNodeBase, State};
use std::any::Any;
use std::collections::HashMap;

/// Planning stack for the arm: the obstacle world plus the optimizer
pub struct PlanningStack {
    base: LifecycleNodeBase,
    chain: KinematicChain,
    profile: RobotProfile,
    settings: PlannerSettings,
    world: ObstacleWorld,
    optimizer: TrajectoryOptimizer,
}

impl PlanningStack {
    /// Planning stack with default profile and settings and no obstacles
    pub fn new() -> Self {
        Self::with_world(ObstacleWorld::empty())
    }

    /// Planning stack with default profile and settings around `world`
    pub fn with_world(world: ObstacleWorld) -> Self {
        Self::from_parts(
            KinematicChain::ur10(),
            RobotProfile::default(),
            PlannerSettings::default(),
            world,
        )
    }

    /// Planning stack from explicit configuration
    pub fn from_parts(
        chain: KinematicChain,
        profile: RobotProfile,
        settings: PlannerSettings,
        world: ObstacleWorld,
    ) -> Self {
        let optimizer = TrajectoryOptimizer::new(chain.clone(), profile.clone(), settings.clone());
        PlanningStack {
            base: LifecycleNodeBase::new("planning_stack"),
            chain,
            profile,
            settings,
            world,
            optimizer,
        }
    }

    /// Configure the planner with runtime parameters
    pub fn configure_planner(&mut self, params: &HashMap<String, f64>) -> Result<(), String> {
        if let Some(&samples_per_segment) = params.get("samples_per_segment") {
            if samples_per_segment < 1.0 {
                return Err("samples_per_segment must be at least 1".to_string());
            }
            self.settings.samples_per_segment = samples_per_segment as usize;
        }
        if let Some(&penalty_rounds) = params.get("penalty_rounds") {
            if penalty_rounds < 1.0 {
                return Err("penalty_rounds must be at least 1".to_string());
            }
            self.settings.penalty_rounds = penalty_rounds as usize;
        }
        if let Some(&gradient_steps) = params.get("gradient_steps") {
            if gradient_steps < 1.0 {
                return Err("gradient_steps must be at least 1".to_string());
            }
            self.settings.gradient_steps = gradient_steps as usize;
        }
        if let Some(&violation_tolerance_m) = params.get("violation_tolerance_m") {
            if violation_tolerance_m <= 0.0 {
                return Err("violation_tolerance_m must be positive".to_string());
            }
            self.settings.violation_tolerance_m = violation_tolerance_m;
        }
        self.optimizer = TrajectoryOptimizer::new(
            self.chain.clone(),
            self.profile.clone(),
            self.settings.clone(),
        );
        Ok(())
    }

    /// Optimize a trajectory through the waypoints around the configured
    /// obstacle world
    pub fn optimize(
        &self,
        waypoints_deg: &[JointVector],
        parameters: ExecutionParameters,
    ) -> Result<OptimizedTrajectory, OptimizationFailure> {
        self.optimizer.optimize(waypoints_deg, &self.world, parameters)
    }

    /// Re-time an already optimized trajectory under new percentages
    pub fn retime(
        &self,
        trajectory: &JointTrajectory,
        parameters: ExecutionParameters,
    ) -> Result<JointTrajectory, TimingError> {
        trajectory.retimed(&self.profile, parameters)
    }

    /// The immutable obstacle world this stack plans against
    pub fn obstacle_world(&self) -> &ObstacleWorld {
        &self.world
    }

    pub fn profile(&self) -> &RobotProfile {
        &self.profile
    }

    pub fn settings(&self) -> &PlannerSettings {
        &self.settings
    }
}

impl Default for PlanningStack {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleNode for PlanningStack {
    fn on_configure(&mut self) -> Result<(), String> {
        log::info!("configuring planning stack");
        self.base.set_state(State::Inactive);
        Ok(())
    }

    fn on_activate(&mut self) -> Result<(), String> {
        log::info!("activating planning stack");
        self.base.set_state(State::Active);
        Ok(())
    }

    fn on_deactivate(&mut self) -> Result<(), String> {
        log::info!("deactivating planning stack");
        self.base.set_state(State::Inactive);
        Ok(())
    }

    fn on_cleanup(&mut self) -> Result<(), String> {
        log::info!("cleaning up planning stack");
        self.base.set_state(State::Unconfigured);
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::ZERO_JOINTS;

    #[test]
    fn stack_optimizes_and_retimes() {
        let stack = PlanningStack::new();
        let mut goal = ZERO_JOINTS;
        goal[0] = 10.0;

        let result = stack
            .optimize(&[ZERO_JOINTS, goal], ExecutionParameters::FULL)
            .unwrap();
        let slower = stack
            .retime(&result.trajectory, ExecutionParameters::new(100.0, 10.0))
            .unwrap();
        assert!(slower.duration() > result.trajectory.duration());
    }

    #[test]
    fn configure_rejects_bad_values() {
        let mut stack = PlanningStack::new();
        let mut params = HashMap::new();
        params.insert("samples_per_segment".to_string(), 0.0);
        assert!(stack.configure_planner(&params).is_err());

        let mut params = HashMap::new();
        params.insert("samples_per_segment".to_string(), 5.0);
        stack.configure_planner(&params).unwrap();
        assert_eq!(stack.settings().samples_per_segment, 5);
    }
}
