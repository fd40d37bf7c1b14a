//! Covariance Matrix Adaptation Evolution Strategy over a box-bounded space.
//!
//! The optimizer knows nothing about simulation: callers sample a population,
//! score it however they like, and feed the scores back through [`CmaEs::update`].
//! Lower fitness is better.

use crate::linalg::{identity, mat_vec, norm, symmetric_eigen, Matrix};
use rand::Rng;
use rand_chacha::ChaCha12Rng;
use rand_distr::StandardNormal;
use std::fmt;

const SIGMA_CONVERGED: f64 = 1e-10;
const CONDITION_LIMIT: f64 = 1e7;
const MIN_EIGENVALUE: f64 = 1e-20;

#[derive(Debug, Clone, PartialEq)]
pub enum CmaEsError {
    EmptyDimension,
    BoundsMismatch { dimension: usize, bounds: usize },
    InvalidBounds { index: usize },
    InvalidSigma(f64),
    PopulationTooSmall(usize),
    FitnessMismatch { population: usize, fitness: usize },
    CandidateMismatch { expected: usize, actual: usize },
}

impl fmt::Display for CmaEsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyDimension => write!(f, "search space has zero dimensions"),
            Self::BoundsMismatch { dimension, bounds } => write!(
                f,
                "bounds length ({bounds}) does not match dimension ({dimension})"
            ),
            Self::InvalidBounds { index } => {
                write!(f, "bound {index} is not a finite interval with min <= max")
            }
            Self::InvalidSigma(s) => write!(f, "step size must be positive and finite, got {s}"),
            Self::PopulationTooSmall(l) => write!(f, "population size must be >= 2, got {l}"),
            Self::FitnessMismatch {
                population,
                fitness,
            } => write!(
                f,
                "fitness length ({fitness}) does not match population length ({population})"
            ),
            Self::CandidateMismatch { expected, actual } => write!(
                f,
                "candidate has {actual} coordinates, expected {expected}"
            ),
        }
    }
}

impl std::error::Error for CmaEsError {}

/// Strategy constants derived once from dimension and population size.
#[derive(Clone, Debug, PartialEq)]
pub struct StrategyParams {
    pub lambda: usize,
    pub mu: usize,
    pub weights: Vec<f64>,
    pub mueff: f64,
    pub cc: f64,
    pub cs: f64,
    pub c1: f64,
    pub cmu: f64,
    pub damps: f64,
    pub chi_n: f64,
    pub eigen_interval: usize,
}

impl StrategyParams {
    pub fn new(n: usize, lambda: usize) -> Self {
        let nf = n as f64;
        let mu = (lambda / 2).max(1);
        let raw: Vec<f64> = (0..mu)
            .map(|i| (mu as f64 + 0.5).ln() - ((i + 1) as f64).ln())
            .collect();
        let total: f64 = raw.iter().sum();
        let weights: Vec<f64> = raw.iter().map(|w| w / total).collect();
        let mueff = 1.0 / weights.iter().map(|w| w * w).sum::<f64>();

        let cc = (4.0 + mueff / nf) / (nf + 4.0 + 2.0 * mueff / nf);
        let cs = (mueff + 2.0) / (nf + mueff + 5.0);
        let c1 = 2.0 / ((nf + 1.3).powi(2) + mueff);
        let cmu = (1.0 - c1).min(2.0 * (mueff - 2.0 + 1.0 / mueff) / ((nf + 2.0).powi(2) + mueff));
        let damps = 1.0 + 2.0 * (((mueff - 1.0) / (nf + 1.0)).sqrt() - 1.0).max(0.0) + cs;
        let chi_n = nf.sqrt() * (1.0 - 1.0 / (4.0 * nf) + 1.0 / (21.0 * nf * nf));
        let eigen_interval = ((lambda as f64 / (10.0 * nf * (c1 + cmu))).floor() as usize).max(1);

        Self {
            lambda,
            mu,
            weights,
            mueff,
            cc,
            cs,
            c1,
            cmu,
            damps,
            chi_n,
            eigen_interval,
        }
    }
}

pub struct CmaEs {
    strategy: StrategyParams,
    bounds: Vec<(f64, f64)>,
    mean: Vec<f64>,
    sigma: f64,
    covariance: Matrix,
    /// Eigenvectors of C, one per column.
    b: Matrix,
    /// Square roots of the eigenvalues of C.
    d: Vec<f64>,
    pc: Vec<f64>,
    ps: Vec<f64>,
    generation: usize,
    last_eigen_update: usize,
    best: Option<(Vec<f64>, f64)>,
    rng: ChaCha12Rng,
}

impl CmaEs {
    pub fn new(
        initial_mean: Vec<f64>,
        sigma: f64,
        lambda: usize,
        bounds: Vec<(f64, f64)>,
        rng: ChaCha12Rng,
    ) -> Result<Self, CmaEsError> {
        let n = initial_mean.len();
        if n == 0 {
            return Err(CmaEsError::EmptyDimension);
        }
        if bounds.len() != n {
            return Err(CmaEsError::BoundsMismatch {
                dimension: n,
                bounds: bounds.len(),
            });
        }
        if let Some(index) = bounds
            .iter()
            .position(|&(lo, hi)| !(lo.is_finite() && hi.is_finite() && lo <= hi))
        {
            return Err(CmaEsError::InvalidBounds { index });
        }
        if !(sigma.is_finite() && sigma > 0.0) {
            return Err(CmaEsError::InvalidSigma(sigma));
        }
        if lambda < 2 {
            return Err(CmaEsError::PopulationTooSmall(lambda));
        }

        let mut mean = initial_mean;
        clamp_to(&mut mean, &bounds);
        Ok(Self {
            strategy: StrategyParams::new(n, lambda),
            bounds,
            mean,
            sigma,
            covariance: identity(n),
            b: identity(n),
            d: vec![1.0; n],
            pc: vec![0.0; n],
            ps: vec![0.0; n],
            generation: 0,
            last_eigen_update: 0,
            best: None,
            rng,
        })
    }

    pub fn dimension(&self) -> usize {
        self.mean.len()
    }

    pub fn strategy(&self) -> &StrategyParams {
        &self.strategy
    }

    pub fn population_size(&self) -> usize {
        self.strategy.lambda
    }

    pub fn mean(&self) -> &[f64] {
        &self.mean
    }

    pub fn sigma(&self) -> f64 {
        self.sigma
    }

    /// Override the step size; non-positive or non-finite values are ignored.
    pub fn set_sigma(&mut self, sigma: f64) {
        if sigma.is_finite() && sigma > 0.0 {
            self.sigma = sigma;
        }
    }

    pub fn generation(&self) -> usize {
        self.generation
    }

    pub fn covariance(&self) -> &Matrix {
        &self.covariance
    }

    /// Best candidate seen across all updates, with its fitness.
    pub fn best(&self) -> Option<(&[f64], f64)> {
        self.best.as_ref().map(|(x, f)| (x.as_slice(), *f))
    }

    /// λ candidates `mean + σ·B·diag(D)·z`, each clamped into the box.
    pub fn sample_population(&mut self) -> Vec<Vec<f64>> {
        let n = self.dimension();
        (0..self.strategy.lambda)
            .map(|_| {
                let scaled: Vec<f64> = (0..n)
                    .map(|i| {
                        let z: f64 = self.rng.sample(StandardNormal);
                        self.d[i] * z
                    })
                    .collect();
                let y = mat_vec(&self.b, &scaled);
                let mut x: Vec<f64> = self
                    .mean
                    .iter()
                    .zip(&y)
                    .map(|(m, yi)| m + self.sigma * yi)
                    .collect();
                clamp_to(&mut x, &self.bounds);
                x
            })
            .collect()
    }

    pub fn update(&mut self, population: &[Vec<f64>], fitness: &[f64]) -> Result<(), CmaEsError> {
        if population.len() != fitness.len() {
            return Err(CmaEsError::FitnessMismatch {
                population: population.len(),
                fitness: fitness.len(),
            });
        }
        let n = self.dimension();
        if let Some(bad) = population.iter().find(|x| x.len() != n) {
            return Err(CmaEsError::CandidateMismatch {
                expected: n,
                actual: bad.len(),
            });
        }
        if population.is_empty() {
            return Ok(());
        }

        let scores: Vec<f64> = fitness
            .iter()
            .map(|&f| if f.is_nan() { f64::INFINITY } else { f })
            .collect();
        let mut order: Vec<usize> = (0..population.len()).collect();
        order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

        let leader = order[0];
        if self.best.as_ref().is_none_or(|(_, f)| scores[leader] < *f) {
            self.best = Some((population[leader].clone(), scores[leader]));
        }

        let s = &self.strategy;
        let selected: Vec<&Vec<f64>> = order
            .iter()
            .take(s.mu)
            .map(|&i| &population[i])
            .collect();
        let weights = &s.weights[..selected.len()];
        let weight_sum: f64 = weights.iter().sum();

        let old_mean = self.mean.clone();
        let mut new_mean = vec![0.0; n];
        for (x, w) in selected.iter().zip(weights) {
            for (m, xi) in new_mean.iter_mut().zip(x.iter()) {
                *m += w / weight_sum * xi;
            }
        }
        clamp_to(&mut new_mean, &self.bounds);

        let step: Vec<f64> = new_mean
            .iter()
            .zip(&old_mean)
            .map(|(a, b)| (a - b) / self.sigma)
            .collect();

        // C^(-1/2) · step = B · diag(1/D) · B^T · step
        let bt_step: Vec<f64> = (0..n)
            .map(|j| (0..n).map(|i| self.b[i][j] * step[i]).sum::<f64>() / self.d[j])
            .collect();
        let whitened = mat_vec(&self.b, &bt_step);

        let ps_gain = (s.cs * (2.0 - s.cs) * s.mueff).sqrt();
        for (p, w) in self.ps.iter_mut().zip(&whitened) {
            *p = (1.0 - s.cs) * *p + ps_gain * w;
        }
        let ps_norm = norm(&self.ps);
        let decay = 1.0 - (1.0 - s.cs).powi(2 * (self.generation as i32 + 1));
        let hsig = ps_norm / decay.sqrt() / s.chi_n < 1.4 + 2.0 / (n as f64 + 1.0);
        let hsig_f = if hsig { 1.0 } else { 0.0 };

        let pc_gain = (s.cc * (2.0 - s.cc) * s.mueff).sqrt();
        for (p, st) in self.pc.iter_mut().zip(&step) {
            *p = (1.0 - s.cc) * *p + hsig_f * pc_gain * st;
        }

        let deltas: Vec<Vec<f64>> = selected
            .iter()
            .map(|x| {
                x.iter()
                    .zip(&old_mean)
                    .map(|(xi, m)| (xi - m) / self.sigma)
                    .collect()
            })
            .collect();
        let stall_correction = (1.0 - hsig_f) * s.cc * (2.0 - s.cc);
        for i in 0..n {
            for j in 0..=i {
                let rank_one = self.pc[i] * self.pc[j] + stall_correction * self.covariance[i][j];
                let rank_mu: f64 = deltas
                    .iter()
                    .zip(weights)
                    .map(|(dlt, w)| w / weight_sum * dlt[i] * dlt[j])
                    .sum();
                let value = (1.0 - s.c1 - s.cmu) * self.covariance[i][j]
                    + s.c1 * rank_one
                    + s.cmu * rank_mu;
                self.covariance[i][j] = value;
                self.covariance[j][i] = value;
            }
        }

        self.sigma *= ((s.cs / s.damps) * (ps_norm / s.chi_n - 1.0)).exp();
        self.mean = new_mean;
        self.generation += 1;

        if self.generation - self.last_eigen_update >= self.strategy.eigen_interval {
            self.refresh_eigensystem();
        }
        Ok(())
    }

    fn refresh_eigensystem(&mut self) {
        let eigen = symmetric_eigen(&self.covariance);
        self.d = eigen
            .values
            .iter()
            .map(|&v| v.max(MIN_EIGENVALUE).sqrt())
            .collect();
        self.b = eigen.vectors;
        self.last_eigen_update = self.generation;
    }

    /// Ratio of the largest to smallest axis length of the search distribution.
    pub fn axis_ratio(&self) -> f64 {
        let max = self.d.iter().copied().fold(0.0, f64::max);
        let min = self.d.iter().copied().fold(f64::INFINITY, f64::min);
        if min > 0.0 {
            max / min
        } else {
            f64::INFINITY
        }
    }

    pub fn converged(&self) -> bool {
        self.sigma < SIGMA_CONVERGED || self.axis_ratio() > CONDITION_LIMIT
    }
}

fn clamp_to(x: &mut [f64], bounds: &[(f64, f64)]) {
    for (v, &(lo, hi)) in x.iter_mut().zip(bounds) {
        *v = if v.is_nan() { lo } else { v.clamp(lo, hi) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::create_rng;

    fn sphere(x: &[f64]) -> f64 {
        x.iter().map(|v| (v - 0.3).powi(2)).sum()
    }

    fn unit_optimizer(n: usize, lambda: usize, seed: u64) -> CmaEs {
        CmaEs::new(vec![0.8; n], 0.3, lambda, vec![(0.0, 1.0); n], create_rng(seed)).unwrap()
    }

    #[test]
    fn strategy_weights_are_normalized_and_decreasing() {
        let s = StrategyParams::new(5, 10);
        assert_eq!(s.mu, 5);
        assert!((s.weights.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!(s.weights.windows(2).all(|w| w[0] > w[1]));
        assert!(s.mueff > 1.0 && s.mueff <= s.mu as f64);
        assert!(s.c1 + s.cmu <= 1.0);
        assert!(s.eigen_interval >= 1);
    }

    #[test]
    fn chi_n_approximates_expected_normal_norm() {
        let s = StrategyParams::new(10, 12);
        assert!((s.chi_n - 3.0843).abs() < 1e-3);
    }

    #[test]
    fn rejects_invalid_construction() {
        assert_eq!(
            CmaEs::new(vec![], 0.3, 8, vec![], create_rng(0)).err(),
            Some(CmaEsError::EmptyDimension)
        );
        assert!(matches!(
            CmaEs::new(vec![0.5], 0.0, 8, vec![(0.0, 1.0)], create_rng(0)),
            Err(CmaEsError::InvalidSigma(_))
        ));
        assert!(matches!(
            CmaEs::new(vec![0.5], 0.3, 8, vec![(1.0, 0.0)], create_rng(0)),
            Err(CmaEsError::InvalidBounds { index: 0 })
        ));
    }

    #[test]
    fn samples_respect_bounds() {
        let mut es = CmaEs::new(
            vec![0.0, 5.0],
            10.0,
            20,
            vec![(-1.0, 1.0), (4.0, 6.0)],
            create_rng(1),
        )
        .unwrap();
        for x in es.sample_population() {
            assert!((-1.0..=1.0).contains(&x[0]));
            assert!((4.0..=6.0).contains(&x[1]));
        }
    }

    #[test]
    fn update_rejects_mismatched_lengths() {
        let mut es = unit_optimizer(3, 8, 2);
        let pop = es.sample_population();
        assert!(matches!(
            es.update(&pop, &[1.0]),
            Err(CmaEsError::FitnessMismatch { .. })
        ));
    }

    #[test]
    fn converges_on_shifted_sphere() {
        let mut es = unit_optimizer(4, 12, 3);
        for _ in 0..200 {
            let pop = es.sample_population();
            let fit: Vec<f64> = pop.iter().map(|x| sphere(x)).collect();
            es.update(&pop, &fit).unwrap();
        }
        let (best, f) = es.best().unwrap();
        assert!(f < 1e-6, "best fitness {f}");
        assert!(best.iter().all(|v| (v - 0.3).abs() < 1e-2));
    }

    #[test]
    fn best_fitness_never_increases() {
        let mut es = unit_optimizer(6, 10, 4);
        let mut last = f64::INFINITY;
        for _ in 0..60 {
            let pop = es.sample_population();
            let fit: Vec<f64> = pop.iter().map(|x| sphere(x)).collect();
            es.update(&pop, &fit).unwrap();
            let (_, f) = es.best().unwrap();
            assert!(f <= last);
            last = f;
        }
    }

    #[test]
    fn covariance_stays_symmetric() {
        let mut es = unit_optimizer(5, 10, 5);
        for _ in 0..30 {
            let pop = es.sample_population();
            let fit: Vec<f64> = pop.iter().map(|x| x[0] * 10.0 + x[1]).collect();
            es.update(&pop, &fit).unwrap();
        }
        let c = es.covariance();
        for i in 0..5 {
            assert!(c[i][i] > 0.0);
            for j in 0..5 {
                assert_eq!(c[i][j], c[j][i]);
            }
        }
        assert!(es.mean().iter().all(|m| (0.0..=1.0).contains(m)));
    }

    #[test]
    fn tiny_sigma_counts_as_converged() {
        let mut es = unit_optimizer(2, 6, 6);
        assert!(!es.converged());
        es.set_sigma(1e-12);
        assert!(es.converged());
        es.set_sigma(-1.0);
        assert_eq!(es.sigma(), 1e-12);
    }

    #[test]
    fn nan_fitness_is_ranked_last() {
        let mut es = unit_optimizer(2, 4, 7);
        let pop = es.sample_population();
        es.update(&pop, &[f64::NAN, 2.0, 1.0, 3.0]).unwrap();
        assert_eq!(es.best().unwrap().1, 1.0);
    }
}
