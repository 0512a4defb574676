//! Nonlinear program abstraction and the in-tree solver
//!
//! The optimizer formulates its problem against [`NonlinearProgramSolver`]
//! only, so the numerical backend can be swapped for any solver that handles
//! box bounds plus nonlinear inequality constraints and reports convergence.
//! [`PenaltyGradientSolver`] is the deterministic default: an escalating
//! quadratic-penalty outer loop around a projected gradient descent with
//! backtracking line search and finite-difference gradients.

use nalgebra::DVector;

/// A scalar function of the decision vector
pub type ScalarFn = Box<dyn Fn(&DVector<f64>) -> f64 + Send + Sync>;

/// A nonlinear program: minimize `objective` subject to box bounds and
/// inequality constraints `g(x) <= 0`.
pub struct NlpProblem {
    pub lower: DVector<f64>,
    pub upper: DVector<f64>,
    pub objective: ScalarFn,
    pub constraints: Vec<ScalarFn>,
}

impl NlpProblem {
    pub fn dim(&self) -> usize {
        self.lower.len()
    }

    /// Worst constraint violation at `x`, zero when feasible
    pub fn max_violation(&self, x: &DVector<f64>) -> f64 {
        self.constraints
            .iter()
            .map(|g| g(x).max(0.0))
            .fold(0.0, f64::max)
    }

    fn clamp_to_bounds(&self, x: &mut DVector<f64>) {
        for i in 0..x.len() {
            x[i] = x[i].clamp(self.lower[i], self.upper[i]);
        }
    }
}

/// What a solver did with a problem
#[derive(Debug, Clone)]
pub struct SolveReport {
    pub solution: DVector<f64>,
    pub objective: f64,
    pub iterations: usize,
    pub converged: bool,
    pub max_violation: f64,
}

/// Capability interface for constrained solvers
pub trait NonlinearProgramSolver: Send + Sync {
    /// Solve `problem` starting from `initial`. Must be deterministic:
    /// identical problems and seeds yield identical reports.
    fn solve(&self, problem: &NlpProblem, initial: &DVector<f64>) -> SolveReport;

    /// Name of this solver
    fn name(&self) -> &str;
}

/// Quadratic-penalty projected-gradient solver
#[derive(Debug, Clone)]
pub struct PenaltyGradientSolver {
    /// Penalty escalation rounds
    pub penalty_rounds: usize,
    /// Gradient steps per round
    pub gradient_steps: usize,
    /// Feasibility target on `max_violation`
    pub violation_tolerance: f64,
    /// Displacement below which the inner loop counts as stalled
    pub step_tolerance: f64,
    /// Penalty weight of the first round
    pub initial_penalty: f64,
    /// Weight multiplier between rounds
    pub penalty_growth: f64,
    /// Central-difference step for gradients
    pub fd_epsilon: f64,
}

impl Default for PenaltyGradientSolver {
    fn default() -> Self {
        PenaltyGradientSolver {
            penalty_rounds: 10,
            gradient_steps: 250,
            violation_tolerance: 1e-3,
            step_tolerance: 1e-10,
            initial_penalty: 10.0,
            penalty_growth: 5.0,
            fd_epsilon: 1e-6,
        }
    }
}

impl PenaltyGradientSolver {
    /// Solver with the given iteration budgets and feasibility target
    pub fn with_budget(
        penalty_rounds: usize,
        gradient_steps: usize,
        violation_tolerance: f64,
    ) -> Self {
        PenaltyGradientSolver {
            penalty_rounds,
            gradient_steps,
            violation_tolerance,
            ..Self::default()
        }
    }

    fn merit(&self, problem: &NlpProblem, x: &DVector<f64>, penalty: f64) -> f64 {
        let mut value = (problem.objective)(x);
        for g in &problem.constraints {
            let violation = g(x).max(0.0);
            value += penalty * violation * violation;
        }
        value
    }

    fn merit_gradient(&self, problem: &NlpProblem, x: &DVector<f64>, penalty: f64) -> DVector<f64> {
        let mut grad = DVector::zeros(x.len());
        let mut probe = x.clone();
        for i in 0..x.len() {
            let h = self.fd_epsilon;
            probe[i] = x[i] + h;
            let forward = self.merit(problem, &probe, penalty);
            probe[i] = x[i] - h;
            let backward = self.merit(problem, &probe, penalty);
            probe[i] = x[i];
            grad[i] = (forward - backward) / (2.0 * h);
        }
        grad
    }

    /// One round of projected gradient descent under a fixed penalty weight.
    /// Returns whether the round stalled (reached a stationary point) and the
    /// number of iterations spent.
    fn descend(&self, problem: &NlpProblem, x: &mut DVector<f64>, penalty: f64) -> (bool, usize) {
        const MAX_HALVINGS: usize = 40;
        let mut step = 1.0;
        let mut iterations = 0;

        for _ in 0..self.gradient_steps {
            iterations += 1;
            let grad = self.merit_gradient(problem, x, penalty);
            if grad.norm() < 1e-12 {
                return (true, iterations);
            }

            let current = self.merit(problem, x, penalty);
            let mut accepted = None;
            let mut s = step;
            for _ in 0..MAX_HALVINGS {
                let mut candidate = &*x - &grad * s;
                problem.clamp_to_bounds(&mut candidate);
                if self.merit(problem, &candidate, penalty) < current {
                    accepted = Some((candidate, s));
                    break;
                }
                s *= 0.5;
            }

            let Some((next, used)) = accepted else {
                // no descent direction left at this penalty weight
                return (true, iterations);
            };
            let moved = (&next - &*x).norm();
            *x = next;
            step = used * 2.0;
            if moved < self.step_tolerance {
                return (true, iterations);
            }
        }
        (false, iterations)
    }
}

impl NonlinearProgramSolver for PenaltyGradientSolver {
    fn solve(&self, problem: &NlpProblem, initial: &DVector<f64>) -> SolveReport {
        let mut x = initial.clone();
        problem.clamp_to_bounds(&mut x);

        let mut penalty = self.initial_penalty;
        let mut iterations = 0;
        let mut converged = false;

        for round in 0..self.penalty_rounds {
            let (stalled, spent) = self.descend(problem, &mut x, penalty);
            iterations += spent;

            let violation = problem.max_violation(&x);
            log::debug!(
                "penalty round {}: weight {:.1e}, violation {:.3e}, {} iterations",
                round,
                penalty,
                violation,
                spent
            );
            if stalled && violation <= self.violation_tolerance {
                converged = true;
                break;
            }
            penalty *= self.penalty_growth;
        }

        SolveReport {
            objective: (problem.objective)(&x),
            max_violation: problem.max_violation(&x),
            solution: x,
            iterations,
            converged,
        }
    }

    fn name(&self) -> &str {
        "penalty-gradient"
    }
}
