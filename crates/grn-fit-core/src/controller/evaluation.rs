use super::Optimization;
use crate::objective::{pearson_correlation, Phase, Score};
use crate::params::SimulationParams;
use crate::simulator::{ideal_angle, CellState, SimulationOptions};

impl Optimization {
    /// Decode, simulate and score one candidate under `phase`.
    pub(in crate::controller) fn evaluate(&mut self, vector: &[f64], phase: Phase) -> Score {
        let params = self.codec.decode(vector);
        let (_, l1) = self.codec.searchable_interventions(&params);
        let (trajectories, endpoints) = self.simulate_cells(&params);
        self.objective.score(&trajectories, &endpoints, l1, phase)
    }

    /// Every evaluated cell's trajectory (snapshots at the time-course points, or
    /// just the endpoint) together with its final state.
    fn simulate_cells(
        &mut self,
        params: &SimulationParams,
    ) -> (Vec<Vec<CellState>>, Vec<CellState>) {
        let base = self.config.simulation_options();
        let points = self.objective.time_points();

        if points.is_empty() {
            let endpoints = match self.config.target_lineage {
                0 => self
                    .simulator
                    .run_ensemble(params, self.config.ensemble_size, &base),
                lineage => vec![self.simulator.run_for_lineage(params, lineage, &base)],
            };
            let trajectories = endpoints.iter().map(|s| vec![s.clone()]).collect();
            return (trajectories, endpoints);
        }

        let mut times = points;
        times.push(base.max_time);
        let mut trajectories = Vec::new();
        let mut endpoints = Vec::new();
        for angle in self.cell_angles() {
            let mut snapshots = self
                .simulator
                .run_time_course(params, &base.at_angle(angle), &times);
            if let Some(end) = snapshots.pop() {
                endpoints.push(end);
            }
            trajectories.push(snapshots);
        }
        (trajectories, endpoints)
    }

    fn cell_angles(&self) -> Vec<f64> {
        if self.config.target_lineage > 0 {
            vec![ideal_angle(self.config.target_lineage)]
        } else {
            let n = self.config.ensemble_size;
            (0..n)
                .map(|i| i as f64 * std::f64::consts::TAU / n as f64)
                .collect()
        }
    }

    /// Pearson correlation of one extra noise-free simulation of `vector` with the target.
    pub(in crate::controller) fn correlation(&mut self, vector: &[f64]) -> f64 {
        let params = self.codec.decode(vector);
        let angle = if self.config.target_lineage > 0 {
            ideal_angle(self.config.target_lineage)
        } else {
            0.0
        };
        let options = SimulationOptions {
            noise_level: 0.0,
            ..self.config.simulation_options()
        }
        .at_angle(angle);
        let state = self.simulator.run(&params, &options);
        pearson_correlation(&state.expression, self.objective.target())
    }

    pub(in crate::controller) fn reports_interventions(&self) -> bool {
        let enc = self.codec.config();
        enc.include_modifiers || enc.include_knockouts
    }
}
