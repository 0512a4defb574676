use anyhow::{bail, Context, Result};
use hephaestus_core::config::{PlannerSettings, RobotProfile, WaypointList};
use hephaestus_core::execution::ExecutionStack;
use hephaestus_core::kinematics::KinematicChain;
use hephaestus_core::planning::obstacles::ObstacleWorld;
use hephaestus_core::planning::trajectory::ExecutionParameters;
use hephaestus_core::planning::PlanningStack;
use hephaestus_core::HephaestusCore;

struct NodeOptions {
    waypoint_file: String,
    profile_file: Option<String>,
    settings_file: Option<String>,
    obstacle_file: Option<String>,
    velocity_percent: Option<f64>,
    acceleration_percent: Option<f64>,
    execute: bool,
    log_prefix: Option<String>,
}

fn parse_args() -> Result<NodeOptions> {
    let mut options = NodeOptions {
        waypoint_file: String::new(),
        profile_file: None,
        settings_file: None,
        obstacle_file: None,
        velocity_percent: None,
        acceleration_percent: None,
        execute: false,
        log_prefix: None,
    };

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--profile" => options.profile_file = args.next(),
            "--settings" => options.settings_file = args.next(),
            "--obstacles" => options.obstacle_file = args.next(),
            "--velocity" => {
                options.velocity_percent =
                    Some(args.next().context("--velocity needs a value")?.parse()?)
            }
            "--acceleration" => {
                options.acceleration_percent = Some(
                    args.next()
                        .context("--acceleration needs a value")?
                        .parse()?,
                )
            }
            "--execute" => options.execute = true,
            "--log" => options.log_prefix = args.next(),
            other if options.waypoint_file.is_empty() => {
                options.waypoint_file = other.to_string()
            }
            other => bail!("unexpected argument: {other}"),
        }
    }
    if options.waypoint_file.is_empty() {
        bail!(
            "usage: hephaestus_planner_node <waypoints.json> [--profile <file>] \
             [--settings <file>] [--obstacles <file>] [--velocity <pct>] \
             [--acceleration <pct>] [--execute] [--log <prefix>]"
        );
    }
    Ok(options)
}

fn main() -> Result<()> {
    env_logger::init();
    println!("Initializing Hephaestus Planner Node...");

    let options = parse_args()?;

    let profile = match &options.profile_file {
        Some(path) => RobotProfile::from_file(path)?,
        None => RobotProfile::default(),
    };
    let settings = match &options.settings_file {
        Some(path) => PlannerSettings::from_file(path)?,
        None => PlannerSettings::default(),
    };
    let world = match &options.obstacle_file {
        Some(path) => ObstacleWorld::from_file(path)?,
        None => ObstacleWorld::empty(),
    };
    let waypoints = WaypointList::from_file(&options.waypoint_file)?;
    println!(
        "Loaded {} waypoints, {} obstacle(s)",
        waypoints.waypoints_deg.len(),
        world.obstacles().len()
    );

    let mut core = HephaestusCore::new();
    core.register(PlanningStack::from_parts(
        KinematicChain::ur10(),
        profile.clone(),
        settings,
        world,
    ));
    core.register(ExecutionStack::new(profile.clone()));
    core.init().map_err(anyhow::Error::msg)?;

    let planning_stack = core
        .planning_stack_mut()
        .context("planning stack is registered")?;
    let result = planning_stack
        .optimize(&waypoints.waypoints_deg, ExecutionParameters::FULL)
        .context("trajectory optimization failed")?;
    println!(
        "Optimized {} samples in {} iterations (objective {:.6})",
        result.trajectory.len(),
        result.stats.iterations,
        result.stats.objective
    );
    println!(
        "Recommended parameters: v={:.0}%, a={:.0}%",
        result.recommended.velocity_percent, result.recommended.acceleration_percent
    );

    // user overrides fall back to the optimizer's recommendation
    let parameters = ExecutionParameters::new(
        options
            .velocity_percent
            .unwrap_or(result.recommended.velocity_percent),
        options
            .acceleration_percent
            .unwrap_or(result.recommended.acceleration_percent),
    );
    let trajectory = planning_stack.retime(&result.trajectory, parameters)?;
    println!(
        "Timed at v={:.0}%, a={:.0}%: {:.2} s total",
        parameters.velocity_percent,
        parameters.acceleration_percent,
        trajectory.duration()
    );
    println!("   t(s)      J1      J2      J3      J4      J5      J6");
    for point in trajectory.points() {
        let q = point.position;
        println!(
            "{:7.2}{:8.2}{:8.2}{:8.2}{:8.2}{:8.2}{:8.2}",
            point.time, q[0], q[1], q[2], q[3], q[4], q[5]
        );
    }

    if options.execute {
        let execution_stack = core
            .execution_stack_mut()
            .context("execution stack is registered")?;
        if !execution_stack.check_connection() {
            bail!("no connection to the robot at {}", profile.address);
        }
        execution_stack.move_to_start(&trajectory)?;
        let report = match &options.log_prefix {
            Some(prefix) => execution_stack.execute_logged(&trajectory, prefix)?,
            None => execution_stack.execute(&trajectory)?,
        };
        println!("Executed {} trajectory steps", report.steps);
        if let Some(log) = report.log {
            println!(
                "Logged {} samples to {} ({:.1} J total)",
                log.summary.samples,
                log.path.display(),
                log.summary.total_energy_j
            );
        }
    }

    core.shutdown().map_err(anyhow::Error::msg)?;
    println!("Hephaestus Planner Node finished.");
    Ok(())
}
