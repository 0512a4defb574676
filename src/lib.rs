pub mod common;
pub mod config;
pub mod execution;
pub mod kinematics;
pub mod lifecycle;
pub mod planning;

use crate::execution::ExecutionStack;
use crate::lifecycle::LifecycleNode;
use crate::planning::PlanningStack;

/// Core functionality for the Hephaestus arm
pub struct HephaestusCore {
    components: Vec<Box<dyn LifecycleNode>>,
}

impl HephaestusCore {
    /// Create a new instance of HephaestusCore
    pub fn new() -> Self {
        HephaestusCore {
            components: Vec::new(),
        }
    }

    /// Register a component with the core
    pub fn register<T: LifecycleNode + 'static>(&mut self, component: T) {
        self.components.push(Box::new(component));
    }

    /// Initialize all registered components
    pub fn init(&mut self) -> Result<(), String> {
        for component in &mut self.components {
            component.on_configure()?;
            component.on_activate()?;
        }
        Ok(())
    }

    /// Shutdown all registered components
    pub fn shutdown(&mut self) -> Result<(), String> {
        for component in &mut self.components {
            component.on_deactivate()?;
            component.on_cleanup()?;
        }
        Ok(())
    }

    /// Get a reference to the planning stack
    pub fn planning_stack_mut(&mut self) -> Option<&mut PlanningStack> {
        self.components
            .iter_mut()
            .find_map(|component| component.as_any_mut().downcast_mut::<PlanningStack>())
    }

    /// Get a reference to the execution stack
    pub fn execution_stack_mut(&mut self) -> Option<&mut ExecutionStack> {
        self.components
            .iter_mut()
            .find_map(|component| component.as_any_mut().downcast_mut::<ExecutionStack>())
    }
}

impl Default for HephaestusCore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RobotProfile;

    #[test]
    fn core_initializes_and_shuts_down_registered_stacks() {
        let mut core = HephaestusCore::new();
        core.register(PlanningStack::new());
        core.register(ExecutionStack::new(RobotProfile::default()));

        core.init().unwrap();
        assert!(core.planning_stack_mut().is_some());
        assert!(core.execution_stack_mut().is_some());
        core.shutdown().unwrap();
    }
}
