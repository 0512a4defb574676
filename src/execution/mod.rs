//! Execution module for the Hephaestus arm
pub mod channel;
pub mod logsession;

use self::channel::{
    format_movej, wait_until_reached, ChannelError, RobotLink, TcpRobotLink,
    DEFAULT_REACH_TOLERANCE_DEG,
};
use self::logsession::{ActiveLogSession, EnergySummary};
use crate::common::types::JointVector;
use crate::config::RobotProfile;
use crate::lifecycle::{LifecycleNode, LifecycleNodeBase, State};
use crate::planning::trajectory::JointTrajectory;
use std::any::Any;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Errors raised while running a trajectory on the robot
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("robot is not reachable at {0}")]
    NotReachable(String),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error("failed to persist the log session: {0}")]
    Log(#[from] std::io::Error),
}

/// What a finished run produced
#[derive(Debug)]
pub struct ExecutionReport {
    /// Trajectory steps the robot reached
    pub steps: usize,
    /// Log file and summary, present when logging was enabled
    pub log: Option<LogOutcome>,
}

/// Artifacts of an enabled log session
#[derive(Debug)]
pub struct LogOutcome {
    pub path: PathBuf,
    pub summary: EnergySummary,
}

/// Execution stack for the arm
pub struct ExecutionStack {
    base: LifecycleNodeBase,
    link: Arc<dyn RobotLink>,
    profile: RobotProfile,
    reach_tolerance_deg: f64,
    poll_interval: Duration,
    reach_timeout: Duration,
    log_period: Duration,
    log_directory: PathBuf,
}

impl ExecutionStack {
    /// Execution stack talking TCP to the endpoints of `profile`
    pub fn new(profile: RobotProfile) -> Self {
        let link = Arc::new(TcpRobotLink::from_profile(&profile));
        Self::with_link(link, profile)
    }

    /// Execution stack over an explicit link
    pub fn with_link(link: Arc<dyn RobotLink>, profile: RobotProfile) -> Self {
        ExecutionStack {
            base: LifecycleNodeBase::new("execution_stack"),
            link,
            profile,
            reach_tolerance_deg: DEFAULT_REACH_TOLERANCE_DEG,
            poll_interval: Duration::from_millis(100),
            reach_timeout: Duration::from_secs(30),
            log_period: Duration::from_millis(20),
            log_directory: PathBuf::from("."),
        }
    }

    /// Configure runtime parameters of the stack
    pub fn configure(&mut self, params: &HashMap<String, f64>) -> Result<(), String> {
        if let Some(&reach_tolerance_deg) = params.get("reach_tolerance_deg") {
            if reach_tolerance_deg <= 0.0 {
                return Err("reach_tolerance_deg must be positive".to_string());
            }
            self.reach_tolerance_deg = reach_tolerance_deg;
        }
        if let Some(&poll_interval_s) = params.get("poll_interval_s") {
            if poll_interval_s <= 0.0 {
                return Err("poll_interval_s must be positive".to_string());
            }
            self.poll_interval = Duration::from_secs_f64(poll_interval_s);
        }
        if let Some(&reach_timeout_s) = params.get("reach_timeout_s") {
            if reach_timeout_s <= 0.0 {
                return Err("reach_timeout_s must be positive".to_string());
            }
            self.reach_timeout = Duration::from_secs_f64(reach_timeout_s);
        }
        if let Some(&log_period_s) = params.get("log_period_s") {
            if log_period_s <= 0.0 {
                return Err("log_period_s must be positive".to_string());
            }
            self.log_period = Duration::from_secs_f64(log_period_s);
        }
        Ok(())
    }

    /// Directory log sessions are written to
    pub fn set_log_directory(&mut self, directory: impl Into<PathBuf>) {
        self.log_directory = directory.into();
    }

    /// Whether the controller currently answers
    pub fn check_connection(&self) -> bool {
        self.link.is_reachable()
    }

    /// Current joint angles in degrees
    pub fn current_joints_deg(&self) -> Result<JointVector, ChannelError> {
        Ok(self.link.sample_state()?.joints_deg())
    }

    /// Run a trajectory without logging
    pub fn execute(&self, trajectory: &JointTrajectory) -> Result<ExecutionReport, ExecutionError> {
        self.run(trajectory, None)
    }

    /// Run a trajectory while logging voltage and current, persisting the
    /// session under `prefix`
    pub fn execute_logged(
        &self,
        trajectory: &JointTrajectory,
        prefix: &str,
    ) -> Result<ExecutionReport, ExecutionError> {
        self.run(trajectory, Some(prefix))
    }

    fn run(
        &self,
        trajectory: &JointTrajectory,
        log_prefix: Option<&str>,
    ) -> Result<ExecutionReport, ExecutionError> {
        if !self.link.is_reachable() {
            return Err(ExecutionError::NotReachable(self.link.name().to_string()));
        }

        let (accel, velocity) = self.scaled_limits_rad(trajectory);
        let session = log_prefix
            .map(|_| ActiveLogSession::begin(Arc::clone(&self.link), self.log_period));

        let mut steps = 0;
        let result = self.step_through(trajectory, accel, velocity, &mut steps);

        // always collect a started session, even when the run failed
        let log = match (session, log_prefix) {
            (Some(active), Some(prefix)) => {
                let finished = active.finish();
                let path = finished.write_csv(&self.log_directory, prefix)?;
                Some(LogOutcome {
                    path,
                    summary: finished.energy_summary(),
                })
            }
            _ => None,
        };
        result?;

        log::info!("executed {} trajectory steps", steps);
        Ok(ExecutionReport { steps, log })
    }

    fn step_through(
        &self,
        trajectory: &JointTrajectory,
        accel: f64,
        velocity: f64,
        steps: &mut usize,
    ) -> Result<(), ExecutionError> {
        for point in trajectory.points() {
            self.link
                .send_program(&format_movej(&point.position, accel, velocity))?;
            wait_until_reached(
                self.link.as_ref(),
                &point.position,
                self.reach_tolerance_deg,
                self.poll_interval,
                self.reach_timeout,
            )?;
            *steps += 1;
        }
        Ok(())
    }

    /// Move to the configured home posture
    pub fn move_home(&self) -> Result<(), ExecutionError> {
        let home = self.profile.home_deg;
        self.move_to(&home)
    }

    /// Move to the first point of a trajectory
    pub fn move_to_start(&self, trajectory: &JointTrajectory) -> Result<(), ExecutionError> {
        let Some(first) = trajectory.points().first() else {
            return Ok(());
        };
        self.move_to(&first.position)
    }

    fn move_to(&self, target_deg: &JointVector) -> Result<(), ExecutionError> {
        if !self.link.is_reachable() {
            return Err(ExecutionError::NotReachable(self.link.name().to_string()));
        }
        let current = self.current_joints_deg()?;
        if crate::common::max_abs_diff(&current, target_deg) < self.reach_tolerance_deg {
            return Ok(());
        }
        // a deliberate single move at half speed
        let accel = 0.5 * self.profile.max_acceleration_deg_s2.to_radians();
        let velocity = 0.5 * self.profile.max_velocity_deg_s.to_radians();
        self.link
            .send_program(&format_movej(target_deg, accel, velocity))?;
        wait_until_reached(
            self.link.as_ref(),
            target_deg,
            self.reach_tolerance_deg,
            self.poll_interval,
            self.reach_timeout,
        )?;
        Ok(())
    }

    /// Absolute rad/s^2 and rad/s limits the controller gets, derived from
    /// the percentages the trajectory was timed under
    fn scaled_limits_rad(&self, trajectory: &JointTrajectory) -> (f64, f64) {
        let parameters = trajectory.parameters();
        let accel = self.profile.max_acceleration_deg_s2.to_radians()
            * parameters.acceleration_fraction();
        let velocity =
            self.profile.max_velocity_deg_s.to_radians() * parameters.velocity_fraction();
        (accel, velocity)
    }
}

impl LifecycleNode for ExecutionStack {
    fn on_configure(&mut self) -> Result<(), String> {
        log::info!("configuring execution stack");
        self.base.set_state(State::Inactive);
        Ok(())
    }

    fn on_activate(&mut self) -> Result<(), String> {
        log::info!("activating execution stack");
        self.base.set_state(State::Active);
        Ok(())
    }

    fn on_deactivate(&mut self) -> Result<(), String> {
        log::info!("deactivating execution stack");
        self.base.set_state(State::Inactive);
        Ok(())
    }

    fn on_cleanup(&mut self) -> Result<(), String> {
        log::info!("cleaning up execution stack");
        self.base.set_state(State::Unconfigured);
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
