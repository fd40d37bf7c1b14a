//! Scoring of simulated cells against a target expression profile.
//!
//! Every function here is pure. The search phase is passed in explicitly so the
//! same candidate can be re-scored under either phase.

use crate::simulator::CellState;
use serde::{Deserialize, Serialize};

pub const DEFAULT_VARIANCE_WEIGHT: f64 = 0.3;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TargetState {
    pub expression: Vec<f64>,
    /// Per-gene importance; 0 ignores the gene.
    pub weights: Vec<f64>,
}

impl TargetState {
    pub fn new(expression: Vec<f64>, weights: Vec<f64>) -> Self {
        Self {
            expression,
            weights,
        }
    }

    pub fn weighted_genes(&self) -> impl Iterator<Item = usize> + '_ {
        self.weights
            .iter()
            .enumerate()
            .filter(|(_, &w)| w > 0.0)
            .map(|(g, _)| g)
    }
}

/// One expression snapshot to match at a given model time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimeCourseTarget {
    pub time: f64,
    pub expression: Vec<f64>,
    #[serde(default = "default_time_point_weight")]
    pub weight: f64,
}

fn default_time_point_weight() -> f64 {
    1.0
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Exploring,
    FineTuning,
}

/// `Σ weight·(target − simulated)²`; genes missing from either vector are skipped.
pub fn fitness(simulated: &[f64], target: &TargetState) -> f64 {
    weighted_sse(simulated, &target.expression, &target.weights)
}

fn weighted_sse(simulated: &[f64], expected: &[f64], weights: &[f64]) -> f64 {
    weights
        .iter()
        .zip(expected)
        .zip(simulated)
        .filter(|((&w, _), _)| w > 0.0)
        .map(|((w, t), s)| w * (t - s).powi(2))
        .sum()
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnsembleFitness {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub std: f64,
}

impl EnsembleFitness {
    pub fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self {
                mean: f64::INFINITY,
                min: f64::INFINITY,
                max: f64::INFINITY,
                std: 0.0,
            };
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Self {
            mean,
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            std: var.sqrt(),
        }
    }
}

pub fn ensemble_fitness(states: &[CellState], target: &TargetState) -> EnsembleFitness {
    let values: Vec<f64> = states
        .iter()
        .map(|s| fitness(&s.expression, target))
        .collect();
    EnsembleFitness::from_values(&values)
}

/// Population variance of each gene's expression across the ensemble.
pub fn expression_variance(states: &[CellState]) -> Vec<f64> {
    let Some(first) = states.first() else {
        return Vec::new();
    };
    let n = states.len() as f64;
    (0..first.expression.len())
        .map(|g| {
            let vals = states.iter().filter_map(|s| s.expression.get(g).copied());
            let mean = vals.clone().sum::<f64>() / n;
            vals.map(|v| (v - mean).powi(2)).sum::<f64>() / n
        })
        .collect()
}

/// `variance_weight · Σ weight·variance` over the weighted genes.
pub fn variance_penalty(states: &[CellState], target: &TargetState, variance_weight: f64) -> f64 {
    let variance = expression_variance(states);
    let total: f64 = target
        .weighted_genes()
        .filter_map(|g| variance.get(g).map(|v| target.weights[g] * v))
        .sum();
    variance_weight * total
}

/// Weighted sum over time points, each compared with the gene weights of `target`.
pub fn time_course_fitness(
    snapshots: &[CellState],
    points: &[TimeCourseTarget],
    target: &TargetState,
) -> f64 {
    snapshots
        .iter()
        .zip(points)
        .map(|(s, p)| p.weight * weighted_sse(&s.expression, &p.expression, &target.weights))
        .sum()
}

/// Pearson correlation over the weighted genes (all genes when fewer than two
/// carry weight). Degenerate inputs give 0.
pub fn pearson_correlation(simulated: &[f64], target: &TargetState) -> f64 {
    let mut genes: Vec<usize> = target.weighted_genes().collect();
    if genes.len() < 2 {
        genes = (0..target.expression.len()).collect();
    }
    let pairs: Vec<(f64, f64)> = genes
        .into_iter()
        .filter_map(|g| Some((*simulated.get(g)?, *target.expression.get(g)?)))
        .collect();
    if pairs.len() < 2 {
        return 0.0;
    }
    let n = pairs.len() as f64;
    let mx = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let my = pairs.iter().map(|p| p.1).sum::<f64>() / n;
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (x, y) in &pairs {
        sxy += (x - mx) * (y - my);
        sxx += (x - mx).powi(2);
        syy += (y - my).powi(2);
    }
    let denom = (sxx * syy).sqrt();
    if denom > 0.0 {
        sxy / denom
    } else {
        0.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveSettings {
    pub variance_weight: f64,
    /// Apply the variance penalty while exploring too.
    pub require_homogeneity: bool,
    pub minimal_intervention: bool,
    pub intervention_weight: f64,
}

impl Default for ObjectiveSettings {
    fn default() -> Self {
        Self {
            variance_weight: DEFAULT_VARIANCE_WEIGHT,
            require_homogeneity: false,
            minimal_intervention: false,
            intervention_weight: 0.05,
        }
    }
}

/// Raw fitness for reporting plus the value the optimizer actually minimizes.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub raw: f64,
    pub search: f64,
}

#[derive(Clone, Debug)]
pub struct Objective {
    target: TargetState,
    time_course: Vec<TimeCourseTarget>,
    settings: ObjectiveSettings,
}

impl Objective {
    pub fn new(
        target: TargetState,
        time_course: Vec<TimeCourseTarget>,
        settings: ObjectiveSettings,
    ) -> Self {
        Self {
            target,
            time_course,
            settings,
        }
    }

    pub fn target(&self) -> &TargetState {
        &self.target
    }

    pub fn settings(&self) -> &ObjectiveSettings {
        &self.settings
    }

    /// Requested snapshot times, empty for endpoint fitting.
    pub fn time_points(&self) -> Vec<f64> {
        self.time_course.iter().map(|p| p.time).collect()
    }

    /// Fitness of one cell's trajectory: the endpoint against the target, or the
    /// snapshots against the time-course points when those are configured.
    pub fn cell_fitness(&self, trajectory: &[CellState]) -> f64 {
        if self.time_course.is_empty() {
            trajectory
                .last()
                .map_or(f64::INFINITY, |s| fitness(&s.expression, &self.target))
        } else {
            time_course_fitness(trajectory, &self.time_course, &self.target)
        }
    }

    /// Score an ensemble of trajectories. `endpoints` are the cells' final states,
    /// used for the homogeneity term; `intervention_l1` is the candidate's
    /// searchable intervention magnitude.
    pub fn score(
        &self,
        trajectories: &[Vec<CellState>],
        endpoints: &[CellState],
        intervention_l1: f64,
        phase: Phase,
    ) -> Score {
        let raw = if self.time_course.is_empty() {
            ensemble_fitness(endpoints, &self.target).mean
        } else {
            let per_cell: Vec<f64> = trajectories.iter().map(|t| self.cell_fitness(t)).collect();
            EnsembleFitness::from_values(&per_cell).mean
        };

        let mut search = raw;
        if phase == Phase::FineTuning || self.settings.require_homogeneity {
            search += variance_penalty(endpoints, &self.target, self.settings.variance_weight);
        }
        if self.settings.minimal_intervention {
            search += self.settings.intervention_weight * intervention_l1;
        }
        Score { raw, search }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn cell(expression: Vec<f64>) -> CellState {
        CellState {
            expression,
            lineage: 0,
            fate_probabilities: [1.0 / 6.0; 6],
            time: 0.0,
        }
    }

    #[test]
    fn fitness_is_weighted_squared_error() {
        let target = TargetState::new(vec![1.0, 2.0, 3.0], vec![1.0, 0.5, 0.0]);
        let f = fitness(&[0.0, 0.0, 100.0], &target);
        assert!((f - (1.0 + 0.5 * 4.0)).abs() < 1e-12);
    }

    #[test]
    fn ensemble_statistics() {
        let stats = EnsembleFitness::from_values(&[1.0, 3.0]);
        assert_eq!(stats.mean, 2.0);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 3.0);
        assert_eq!(stats.std, 1.0);
        assert_eq!(EnsembleFitness::from_values(&[]).mean, f64::INFINITY);
    }

    #[test]
    fn ensemble_fitness_aggregates_cells() {
        let target = TargetState::new(vec![1.0], vec![2.0]);
        let stats = ensemble_fitness(&[cell(vec![1.0]), cell(vec![0.0]), cell(vec![3.0])], &target);
        assert_eq!(stats.min, 0.0);
        assert_eq!(stats.max, 8.0);
        assert!((stats.mean - 10.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn variance_penalty_targets_bimodal_ensembles() {
        let target = TargetState::new(vec![1.0, 1.0], vec![1.0, 0.0]);
        let uniform = [cell(vec![1.0, 0.0]), cell(vec![1.0, 4.0])];
        let bimodal = [cell(vec![0.0, 0.0]), cell(vec![2.0, 0.0])];
        assert_eq!(variance_penalty(&uniform, &target, 0.3), 0.0);
        assert!((variance_penalty(&bimodal, &target, 0.3) - 0.3).abs() < 1e-12);
    }

    #[test]
    fn pearson_detects_perfect_and_inverse_correlation() {
        let target = TargetState::new(vec![1.0, 2.0, 3.0], vec![1.0; 3]);
        assert!((pearson_correlation(&[2.0, 4.0, 6.0], &target) - 1.0).abs() < 1e-12);
        assert!((pearson_correlation(&[3.0, 2.0, 1.0], &target) + 1.0).abs() < 1e-12);
        assert_eq!(pearson_correlation(&[1.0, 1.0, 1.0], &target), 0.0);
    }

    #[test]
    fn phase_controls_variance_term() {
        let target = TargetState::new(vec![1.0], vec![1.0]);
        let objective = Objective::new(target, Vec::new(), ObjectiveSettings::default());
        let cells = vec![cell(vec![0.0]), cell(vec![2.0])];
        let trajectories: Vec<Vec<CellState>> = cells.iter().cloned().map(|c| vec![c]).collect();

        let explore = objective.score(&trajectories, &cells, 0.0, Phase::Exploring);
        let refine = objective.score(&trajectories, &cells, 0.0, Phase::FineTuning);
        assert_eq!(explore.raw, 1.0);
        assert_eq!(explore.search, 1.0);
        assert_eq!(refine.raw, 1.0);
        assert!((refine.search - 1.3).abs() < 1e-12);
    }

    #[test]
    fn intervention_penalty_is_additive() {
        let settings = ObjectiveSettings {
            minimal_intervention: true,
            intervention_weight: 0.1,
            ..ObjectiveSettings::default()
        };
        let objective = Objective::new(TargetState::new(vec![1.0], vec![1.0]), Vec::new(), settings);
        let cells = vec![cell(vec![1.0])];
        let score = objective.score(&[cells.clone()], &cells, 2.5, Phase::Exploring);
        assert_eq!(score.raw, 0.0);
        assert!((score.search - 0.25).abs() < 1e-12);
    }

    #[test]
    fn time_course_sums_weighted_points() {
        let target = TargetState::new(vec![0.0, 0.0], vec![1.0, 1.0]);
        let points = vec![
            TimeCourseTarget { time: 1.0, expression: vec![1.0, 0.0], weight: 2.0 },
            TimeCourseTarget { time: 2.0, expression: vec![0.0, 1.0], weight: 1.0 },
        ];
        let snapshots = vec![cell(vec![0.0, 0.0]), cell(vec![0.0, 0.0])];
        assert_eq!(time_course_fitness(&snapshots, &points, &target), 3.0);
        let objective = Objective::new(target, points, ObjectiveSettings::default());
        assert_eq!(objective.time_points(), vec![1.0, 2.0]);
        assert_eq!(objective.cell_fitness(&snapshots), 3.0);
    }

    proptest! {
        #[test]
        fn matching_weighted_genes_score_zero(
            genes in proptest::collection::vec((0.0f64..6.0, 0.0f64..6.0, prop::bool::ANY, 0.0f64..5.0), 1..40)
        ) {
            let target = TargetState::new(
                genes.iter().map(|g| g.0).collect(),
                genes.iter().map(|g| if g.2 { g.3 } else { 0.0 }).collect(),
            );
            let simulated: Vec<f64> = genes
                .iter()
                .map(|g| if g.2 { g.0 } else { g.1 })
                .collect();
            prop_assert_eq!(fitness(&simulated, &target), 0.0);
        }

        #[test]
        fn fitness_is_never_negative(
            a in proptest::collection::vec(0.0f64..6.0, 8),
            b in proptest::collection::vec(0.0f64..6.0, 8),
            w in proptest::collection::vec(0.0f64..3.0, 8),
        ) {
            prop_assert!(fitness(&a, &TargetState::new(b, w)) >= 0.0);
        }
    }
}
