//! Explicit-Euler integrator for a single cell's gene-expression vector.
//!
//! Each call compiles the supplied `SimulationParams` against the shared topology
//! and integrates the full horizon with a fixed step; there is no adaptive step
//! and no early exit. Knocked-out genes are pinned to zero after every step.

use crate::constants::{
    HILL_EPSILON, JITTER_PER_NOISE, LINEAGE_COUNT, LINEAGE_SECTOR_SIZES, LINEAGE_THRESHOLD,
    MAX_EXPRESSION, MAX_SIMULATION_STEPS, RECEPTOR_ACTIVE_THRESHOLD, RECEPTOR_GAIN_SATURATION,
};
use crate::network::{CompiledNetwork, GrnTopology};
use crate::params::SimulationParams;
use rand::Rng;
use rand_chacha::ChaCha12Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use std::f64::consts::{PI, TAU};
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationOptions {
    /// Cell position on the unit circle, radians.
    pub spatial_angle: f64,
    /// Integration horizon in model hours.
    pub max_time: f64,
    /// Apply every morphogen at full spatial strength regardless of angle.
    pub uniform_morphogens: bool,
    pub dt: f64,
    pub noise_level: f64,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            spatial_angle: 0.0,
            max_time: 48.0,
            uniform_morphogens: false,
            dt: 0.1,
            noise_level: 0.01,
        }
    }
}

impl SimulationOptions {
    pub fn at_angle(self, spatial_angle: f64) -> Self {
        Self {
            spatial_angle,
            ..self
        }
    }

    /// Steps needed to reach `horizon`, capped at `MAX_SIMULATION_STEPS`.
    fn step_count(&self, horizon: f64) -> usize {
        if self.dt > 0.0 && horizon > 0.0 {
            (horizon / self.dt)
                .round()
                .min(MAX_SIMULATION_STEPS as f64) as usize
        } else {
            0
        }
    }
}

/// Expression snapshot of one simulated cell.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CellState {
    pub expression: Vec<f64>,
    /// 1-based lineage, 0 when undifferentiated.
    pub lineage: u8,
    /// Softmax over the six lineage scores.
    pub fate_probabilities: [f64; LINEAGE_COUNT],
    /// Model time of the snapshot.
    pub time: f64,
}

impl CellState {
    fn from_expression(net: &CompiledNetwork, expression: Vec<f64>, time: f64) -> Self {
        let scores = lineage_scores(net, &expression);
        let (lineage, fate_probabilities) = assign_lineage(&scores);
        Self {
            expression,
            lineage,
            fate_probabilities,
            time,
        }
    }
}

fn lineage_scores(net: &CompiledNetwork, x: &[f64]) -> [f64; LINEAGE_COUNT] {
    let mut scores = [0.0; LINEAGE_COUNT];
    for (score, tfs) in scores.iter_mut().zip(net.lineage_tfs.iter()) {
        let vals: Vec<f64> = tfs.iter().filter_map(|&g| x.get(g).copied()).collect();
        if !vals.is_empty() {
            *score = vals.iter().sum::<f64>() / vals.len() as f64;
        }
    }
    scores
}

/// Argmax lineage above threshold (1-based, 0 otherwise) and softmax fate probabilities.
pub fn assign_lineage(scores: &[f64; LINEAGE_COUNT]) -> (u8, [f64; LINEAGE_COUNT]) {
    let (best_block, best_score) = scores
        .iter()
        .copied()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |acc, (i, s)| if s > acc.1 { (i, s) } else { acc });
    let lineage = if best_score > LINEAGE_THRESHOLD {
        (best_block + 1) as u8
    } else {
        0
    };

    let mut probs = [0.0; LINEAGE_COUNT];
    let mut total = 0.0;
    for (p, &s) in probs.iter_mut().zip(scores.iter()) {
        *p = (s - best_score).exp();
        total += *p;
    }
    for p in &mut probs {
        *p /= total;
    }
    (lineage, probs)
}

/// Saturating Hill activation `x^n / (k^n + x^n + eps)`; negative input counts as 0.
pub fn hill(x: f64, k: f64, n: f64) -> f64 {
    let xp = x.max(0.0).powf(n);
    xp / (k.powf(n) + xp + HILL_EPSILON)
}

/// Center and width (radians) of a 0-based lineage's angular sector.
pub fn lineage_sector(block: usize) -> (f64, f64) {
    let total: f64 = LINEAGE_SECTOR_SIZES.iter().sum();
    let mut start = 0.0;
    for (i, &size) in LINEAGE_SECTOR_SIZES.iter().enumerate() {
        let width = size / total * TAU;
        if i == block {
            return (start + width / 2.0, width);
        }
        start += width;
    }
    (0.0, TAU)
}

/// Angle at which a 1-based lineage receives its strongest morphogen signal.
pub fn ideal_angle(lineage: u8) -> f64 {
    lineage_sector(usize::from(lineage.max(1)) - 1).0
}

fn angular_distance(a: f64, b: f64) -> f64 {
    ((a - b + PI).rem_euclid(TAU) - PI).abs()
}

/// Gaussian falloff of a cell's angle around a lineage's sector center.
pub fn spatial_signal(angle: f64, block: usize) -> f64 {
    let (center, width) = lineage_sector(block);
    let sigma = width / 2.0;
    let d = angular_distance(angle, center);
    (-(d * d) / (2.0 * sigma * sigma)).exp()
}

/// Per-gene and aggregate drift between two snapshots of one trajectory.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StabilityReport {
    pub t1: f64,
    pub t2: f64,
    pub per_gene_drift: Vec<f64>,
    pub mean_drift: f64,
    pub max_drift: f64,
    /// Earliest time after which the fastest gene moves slower than
    /// `threshold / (t2 - t1)` per hour; `None` if that never holds by `t2`.
    pub equilibrium_time: Option<f64>,
    pub stable: bool,
}

/// Single-cell GRN simulator bound to one shared topology.
pub struct GrnSimulator {
    topology: Arc<GrnTopology>,
    rng: ChaCha12Rng,
}

impl GrnSimulator {
    pub fn new(topology: Arc<GrnTopology>, rng: ChaCha12Rng) -> Self {
        Self { topology, rng }
    }

    pub fn topology(&self) -> &GrnTopology {
        &self.topology
    }

    pub fn run(&mut self, params: &SimulationParams, options: &SimulationOptions) -> CellState {
        let net = self.topology.compile(params);
        let steps = options.step_count(options.max_time);
        let x = self.integrate(&net, options, steps, |_, _, _| {});
        CellState::from_expression(&net, x, steps as f64 * options.dt)
    }

    /// Run and call `observe(step, time, expression)` after initialization and after
    /// every integration step.
    pub fn run_observed<F>(
        &mut self,
        params: &SimulationParams,
        options: &SimulationOptions,
        observe: F,
    ) -> CellState
    where
        F: FnMut(usize, f64, &[f64]),
    {
        let net = self.topology.compile(params);
        let steps = options.step_count(options.max_time);
        let x = self.integrate(&net, options, steps, observe);
        CellState::from_expression(&net, x, steps as f64 * options.dt)
    }

    /// One trajectory sampled at each requested time (snapped to the step grid).
    /// The horizon is the latest requested time; `options.max_time` is ignored.
    pub fn run_time_course(
        &mut self,
        params: &SimulationParams,
        options: &SimulationOptions,
        times: &[f64],
    ) -> Vec<CellState> {
        let net = self.topology.compile(params);
        let step_of: Vec<usize> = times
            .iter()
            .map(|&t| options.step_count(t.max(0.0)))
            .collect();
        let horizon = step_of.iter().copied().max().unwrap_or(0);
        let mut captured: Vec<Option<Vec<f64>>> = vec![None; times.len()];
        self.integrate(&net, options, horizon, |step, _, x| {
            for (slot, &target_step) in captured.iter_mut().zip(step_of.iter()) {
                if target_step == step {
                    *slot = Some(x.to_vec());
                }
            }
        });
        captured
            .into_iter()
            .zip(step_of)
            .map(|(x, step)| {
                let x = x.unwrap_or_else(|| net.initial.clone());
                CellState::from_expression(&net, x, step as f64 * options.dt)
            })
            .collect()
    }

    /// `n_samples` independent runs at evenly spaced angles around the circle.
    pub fn run_ensemble(
        &mut self,
        params: &SimulationParams,
        n_samples: usize,
        options: &SimulationOptions,
    ) -> Vec<CellState> {
        (0..n_samples)
            .map(|i| {
                let angle = i as f64 * TAU / n_samples as f64;
                self.run(params, &options.at_angle(angle))
            })
            .collect()
    }

    /// One run at the sector center of a 1-based lineage.
    pub fn run_for_lineage(
        &mut self,
        params: &SimulationParams,
        lineage: u8,
        options: &SimulationOptions,
    ) -> CellState {
        self.run(params, &options.at_angle(ideal_angle(lineage)))
    }

    /// Integrate to `t1`, continue to `t2`, and compare the two snapshots.
    pub fn stability_check(
        &mut self,
        params: &SimulationParams,
        options: &SimulationOptions,
        t1: f64,
        t2: f64,
        threshold: f64,
    ) -> StabilityReport {
        let net = self.topology.compile(params);
        let step1 = options.step_count(t1);
        let step2 = options.step_count(t2).max(step1);
        let window = (step2 - step1) as f64 * options.dt;
        let rate_limit = if window > 0.0 { threshold / window } else { threshold };

        let mut snapshot1 = net.initial.clone();
        let mut previous = net.initial.clone();
        let mut settled_since: Option<f64> = Some(0.0);
        let x2 = self.integrate(&net, options, step2, |step, t, x| {
            if step == step1 {
                snapshot1.copy_from_slice(x);
            }
            if step > 0 {
                let rate = x
                    .iter()
                    .zip(previous.iter())
                    .map(|(a, b)| (a - b).abs())
                    .fold(0.0, f64::max)
                    / options.dt;
                if rate >= rate_limit {
                    settled_since = None;
                } else if settled_since.is_none() {
                    settled_since = Some(t);
                }
            }
            previous.copy_from_slice(x);
        });

        let per_gene_drift: Vec<f64> = x2
            .iter()
            .zip(snapshot1.iter())
            .map(|(a, b)| (a - b).abs())
            .collect();
        let max_drift = per_gene_drift.iter().copied().fold(0.0, f64::max);
        let mean_drift = if per_gene_drift.is_empty() {
            0.0
        } else {
            per_gene_drift.iter().sum::<f64>() / per_gene_drift.len() as f64
        };

        StabilityReport {
            t1: step1 as f64 * options.dt,
            t2: step2 as f64 * options.dt,
            per_gene_drift,
            mean_drift,
            max_drift,
            equilibrium_time: settled_since,
            stable: max_drift < threshold,
        }
    }

    fn integrate<F>(
        &mut self,
        net: &CompiledNetwork,
        options: &SimulationOptions,
        steps: usize,
        mut observe: F,
    ) -> Vec<f64>
    where
        F: FnMut(usize, f64, &[f64]),
    {
        let n = net.gene_count();
        let dt = options.dt;
        let noisy = options.noise_level > 0.0;
        let noise_scale = options.noise_level * dt.sqrt();
        let jitter = options.noise_level * JITTER_PER_NOISE;

        let mut x = net.initial.clone();
        for (gene, xi) in x.iter_mut().enumerate() {
            if noisy {
                *xi += jitter * self.rng.random_range(-1.0..=1.0);
            }
            *xi = if net.knocked_out[gene] {
                0.0
            } else {
                xi.clamp(0.0, MAX_EXPRESSION)
            };
        }
        observe(0, 0.0, &x);

        let spatial: [f64; LINEAGE_COUNT] = std::array::from_fn(|block| {
            if options.uniform_morphogens {
                1.0
            } else {
                spatial_signal(options.spatial_angle, block)
            }
        });

        let mut h = vec![0.0; n];
        let mut input = vec![0.0; n];
        for step in 0..steps {
            let t = step as f64 * dt;

            for (hj, &xj) in h.iter_mut().zip(x.iter()) {
                *hj = hill(xj, net.hill_k, net.hill_n);
            }
            for (gene, inp) in input.iter_mut().enumerate() {
                *inp = net.bias[gene]
                    + net.rows[gene]
                        .iter()
                        .map(|&(src, w)| h[src] * w)
                        .sum::<f64>();
            }

            let ramp = if net.morphogen_time > 0.0 {
                (t / net.morphogen_time).min(1.0)
            } else {
                1.0
            };
            for (block, gate) in net.morphogen_gates.iter().enumerate() {
                let Some(gate) = gate else { continue };
                let receptor = x[gate.receptor];
                if receptor <= RECEPTOR_ACTIVE_THRESHOLD {
                    continue;
                }
                let gain = receptor.min(RECEPTOR_GAIN_SATURATION) / RECEPTOR_GAIN_SATURATION;
                let signal =
                    spatial[block] * ramp * net.morphogen_strength * gain * gate.strength;
                for &tf in &net.lineage_tfs[block] {
                    if let Some(inp) = input.get_mut(tf) {
                        *inp += signal;
                    }
                }
            }

            for gene in 0..n {
                if net.knocked_out[gene] {
                    x[gene] = 0.0;
                    continue;
                }
                let deriv = input[gene] * net.modifiers[gene] - net.decay[gene] * x[gene];
                let mut next = x[gene] + dt * deriv;
                if noisy {
                    let z: f64 = self.rng.sample(StandardNormal);
                    next += noise_scale * z;
                }
                x[gene] = next.clamp(0.0, MAX_EXPRESSION);
            }

            observe(step + 1, (step + 1) as f64 * dt, &x);
        }
        x
    }
}
