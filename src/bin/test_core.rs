use hephaestus_core::config::RobotProfile;
use hephaestus_core::execution::ExecutionStack;
use hephaestus_core::planning::obstacles::{AabbObstacle, ObstacleWorld};
use hephaestus_core::planning::trajectory::ExecutionParameters;
use hephaestus_core::planning::PlanningStack;
use hephaestus_core::HephaestusCore;
use std::collections::HashMap;

fn main() {
    env_logger::init();
    println!("Initializing Hephaestus Core...");

    let mut core = HephaestusCore::new();

    // Create a planning stack with a fixture in front of the robot
    let world = ObstacleWorld::new(
        vec![AabbObstacle::new(
            [-0.095, -0.76, 0.125],
            [0.115, -0.70, 0.325],
        )],
        0.05,
    )
    .expect("static obstacle world is valid");
    let mut planning_stack = PlanningStack::with_world(world);

    // Configure the planner
    let mut params = HashMap::new();
    params.insert("samples_per_segment".to_string(), 3.0);
    params.insert("penalty_rounds".to_string(), 10.0);

    if let Err(e) = planning_stack.configure_planner(&params) {
        println!("Failed to configure planner: {}", e);
    }

    // Register components
    core.register(planning_stack);
    core.register(ExecutionStack::new(RobotProfile::default()));

    // Initialize the core
    match core.init() {
        Ok(_) => println!("Core initialized successfully!"),
        Err(e) => {
            println!("Failed to initialize core: {}", e);
            return;
        }
    }

    // Test the optimizer on a two-waypoint sweep
    let waypoints = vec![
        [0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        [10.0, 0.0, 0.0, 0.0, 0.0, 0.0],
    ];
    println!("Optimizing trajectory through {} waypoints", waypoints.len());

    let planning_stack = core
        .planning_stack_mut()
        .expect("planning stack is registered");
    match planning_stack.optimize(&waypoints, ExecutionParameters::FULL) {
        Ok(result) => {
            println!(
                "Optimized trajectory: {} samples over {:.2} s",
                result.trajectory.len(),
                result.trajectory.duration()
            );
            println!(
                "Recommended parameters: v={:.0}%, a={:.0}%",
                result.recommended.velocity_percent, result.recommended.acceleration_percent
            );
            println!("      J1      J2      J3      J4      J5      J6");
            for point in result.trajectory.points() {
                let q = point.position;
                println!(
                    "{:8.2}{:8.2}{:8.2}{:8.2}{:8.2}{:8.2}",
                    q[0], q[1], q[2], q[3], q[4], q[5]
                );
            }
        }
        Err(e) => println!("Optimization failed: {}", e),
    }

    // Shutdown the core
    match core.shutdown() {
        Ok(_) => println!("Core shutdown successfully!"),
        Err(e) => println!("Failed to shutdown core: {}", e),
    }
}
