use super::Optimization;
use crate::objective::Phase;
use tracing::info;

/// Exploration hands over early once the best raw fitness drops below this.
pub(in crate::controller) const EARLY_TRANSITION_FITNESS: f64 = 0.01;
/// Step size the optimizer restarts from when fine-tuning begins.
pub(in crate::controller) const FINE_TUNE_SIGMA: f64 = 0.1;

impl Optimization {
    /// Move between phases after a completed generation.
    pub(in crate::controller) fn advance_schedule(&mut self) {
        match self.phase {
            Phase::Exploring => {
                let budget_spent = self.generation >= self.explore_budget;
                let optimizer_converged = self.optimizer.converged();
                let good_enough = self
                    .best
                    .as_ref()
                    .is_some_and(|b| b.raw < EARLY_TRANSITION_FITNESS);
                if (budget_spent || optimizer_converged || good_enough)
                    && self.generation < self.config.generations
                {
                    self.enter_fine_tuning(optimizer_converged || good_enough);
                }
            }
            Phase::FineTuning => {
                if self.optimizer.converged() {
                    info!(
                        generation = self.generation,
                        sigma = self.optimizer.sigma(),
                        "optimizer converged"
                    );
                    self.converged = true;
                }
            }
        }
    }

    fn enter_fine_tuning(&mut self, early: bool) {
        info!(
            generation = self.generation,
            early,
            "switching to variance-penalized fine-tuning"
        );
        self.phase = Phase::FineTuning;
        self.optimizer.set_sigma(FINE_TUNE_SIGMA);
    }
}
