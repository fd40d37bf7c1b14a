//! Generation loop, two-phase schedule and the background run handle.

mod evaluation;
mod schedule;


use crate::cmaes::{CmaEs, CmaEsError};
use crate::config::{RunConfig, RunConfigError};
use crate::encoding::ParameterCodec;
use crate::events::{DoneEvent, ProgressEvent, RunEvent, RunSummary};
use crate::genes::GeneGroups;
use crate::network::GrnTopology;
use crate::objective::{Objective, Phase, Score};
use crate::params::ParamsBlob;
use crate::rng::{create_rng, derive_stream_rng, OPTIMIZER_STREAM, SIMULATOR_STREAM};
use crate::simulator::GrnSimulator;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Generations between explicit yields of the run thread.
const YIELD_EVERY: usize = 5;
const PAUSE_POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug)]
pub enum ControllerError {
    Config(RunConfigError),
    Optimizer(CmaEsError),
    Spawn(std::io::Error),
    /// The run thread panicked before delivering its terminal event.
    RunPanicked,
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "invalid run config: {e}"),
            Self::Optimizer(e) => write!(f, "optimizer failure: {e}"),
            Self::Spawn(e) => write!(f, "failed to spawn run thread: {e}"),
            Self::RunPanicked => write!(f, "run thread panicked"),
        }
    }
}

impl std::error::Error for ControllerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            Self::Optimizer(e) => Some(e),
            Self::Spawn(e) => Some(e),
            Self::RunPanicked => None,
        }
    }
}

impl From<RunConfigError> for ControllerError {
    fn from(e: RunConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<CmaEsError> for ControllerError {
    fn from(e: CmaEsError) -> Self {
        Self::Optimizer(e)
    }
}

/// Cooperative stop/pause flags shared between a run and its owner.
#[derive(Debug, Default)]
pub struct RunControl {
    stop: AtomicBool,
    pause: AtomicBool,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn pause(&self) {
        self.pause.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.pause.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.pause.load(Ordering::SeqCst)
    }

    /// Block while paused. Returns `false` if a stop arrives first.
    pub fn wait_while_paused(&self) -> bool {
        loop {
            if self.is_stop_requested() {
                return false;
            }
            if !self.is_paused() {
                return true;
            }
            thread::sleep(PAUSE_POLL_INTERVAL);
        }
    }
}

/// Lowest raw fitness seen so far. Search scores drive the optimizer but are
/// never compared across phases, so the reported best is tracked on raw fitness.
#[derive(Clone, Debug, PartialEq)]
struct BestCandidate {
    vector: Vec<f64>,
    raw: f64,
}

/// One optimization run: owns its optimizer, simulator and schedule state.
pub struct Optimization {
    config: RunConfig,
    codec: ParameterCodec,
    objective: Objective,
    optimizer: CmaEs,
    simulator: GrnSimulator,
    phase: Phase,
    /// Last generation of the exploring phase when the budget runs its course.
    explore_budget: usize,
    generation: usize,
    best: Option<BestCandidate>,
    converged: bool,
}

impl Optimization {
    pub fn new(config: RunConfig) -> Result<Self, ControllerError> {
        config.validate()?;

        let seed = config.seed.unwrap_or_else(rand::random);
        let topology = GrnTopology::build(
            GeneGroups::standard(),
            &mut create_rng(config.network_seed),
        );
        let codec = ParameterCodec::new(config.encoding.clone());
        let optimizer = CmaEs::new(
            codec.default_vector(),
            config.initial_sigma,
            config.population_size,
            codec.unit_bounds(),
            derive_stream_rng(seed, OPTIMIZER_STREAM),
        )?;
        let simulator = GrnSimulator::new(
            Arc::new(topology),
            derive_stream_rng(seed, SIMULATOR_STREAM),
        );
        let objective = Objective::new(
            config.target(),
            config.time_course.clone(),
            config.objective_settings(),
        );

        Ok(Self {
            explore_budget: config.generations - config.fine_tune_generations(),
            codec,
            objective,
            optimizer,
            simulator,
            phase: Phase::Exploring,
            generation: 0,
            best: None,
            converged: false,
            config,
        })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn codec(&self) -> &ParameterCodec {
        &self.codec
    }

    pub fn dimensions(&self) -> usize {
        self.codec.dimensions()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn generation(&self) -> usize {
        self.generation
    }

    pub fn sigma(&self) -> f64 {
        self.optimizer.sigma()
    }

    /// Candidate with the lowest raw fitness evaluated so far.
    pub fn best(&self) -> Option<(&[f64], f64)> {
        self.best.as_ref().map(|b| (b.vector.as_slice(), b.raw))
    }

    pub fn is_finished(&self) -> bool {
        self.converged || self.generation >= self.config.generations
    }

    /// Sample, evaluate and update for one generation.
    pub fn step(&mut self) -> Result<ProgressEvent, ControllerError> {
        let phase = self.phase;
        let population = self.optimizer.sample_population();
        let scores: Vec<Score> = population
            .iter()
            .map(|candidate| self.evaluate(candidate, phase))
            .collect();
        let search: Vec<f64> = scores.iter().map(|s| s.search).collect();
        self.optimizer.update(&population, &search)?;

        for (candidate, score) in population.iter().zip(&scores) {
            if self.best.as_ref().is_none_or(|b| score.raw < b.raw) {
                self.best = Some(BestCandidate {
                    vector: candidate.clone(),
                    raw: score.raw,
                });
            }
        }
        self.generation += 1;

        let mean_fitness = scores.iter().map(|s| s.raw).sum::<f64>() / scores.len().max(1) as f64;
        let (best_vector, best_fitness) = self
            .best
            .as_ref()
            .map(|b| (b.vector.clone(), b.raw))
            .unwrap_or_else(|| (self.optimizer.mean().to_vec(), f64::INFINITY));
        let correlation = self.correlation(&best_vector);
        let intervention_count = self.reports_interventions().then(|| {
            let params = self.codec.decode(&best_vector);
            self.codec.searchable_interventions(&params).0
        });

        debug!(
            generation = self.generation,
            ?phase,
            best_fitness,
            mean_fitness,
            sigma = self.optimizer.sigma(),
            "generation complete"
        );

        let event = ProgressEvent {
            generation: self.generation,
            phase,
            best_fitness,
            mean_fitness,
            sigma: self.optimizer.sigma(),
            best_vector,
            correlation,
            intervention_count,
        };
        self.advance_schedule();
        Ok(event)
    }

    /// Terminal result for the best candidate so far.
    pub fn finish(&mut self, stopped: bool) -> DoneEvent {
        let (best_vector, fitness) = match &self.best {
            Some(b) => (b.vector.clone(), b.raw),
            None => {
                let mean = self.optimizer.mean().to_vec();
                let score = self.evaluate(&mean, self.phase);
                (mean, score.raw)
            }
        };
        let params = ParamsBlob::from(&self.codec.decode(&best_vector));
        DoneEvent {
            best_vector,
            fitness,
            generations: self.generation,
            converged: self.converged,
            stopped,
            params,
        }
    }

    /// Drive the run to completion, emitting events in order. The terminal event
    /// (`Done` or `Error`) is always the last one emitted.
    pub fn run<F>(&mut self, control: &RunControl, mut emit: F)
    where
        F: FnMut(RunEvent),
    {
        info!(
            dimensions = self.dimensions(),
            population = self.config.population_size,
            generations = self.config.generations,
            explore_budget = self.explore_budget,
            "starting optimization run"
        );

        let mut stopped = false;
        while !self.is_finished() {
            if control.is_stop_requested() || !control.wait_while_paused() {
                stopped = true;
                info!(generation = self.generation, "stop requested");
                break;
            }
            match self.step() {
                Ok(progress) => emit(RunEvent::Progress(progress)),
                Err(e) => {
                    warn!(error = %e, "optimization run failed");
                    emit(RunEvent::Error {
                        message: e.to_string(),
                    });
                    return;
                }
            }
            if self.generation % YIELD_EVERY == 0 {
                thread::yield_now();
            }
        }

        let done = self.finish(stopped);
        info!(
            generations = done.generations,
            fitness = done.fitness,
            converged = done.converged,
            stopped,
            "optimization run finished"
        );
        emit(RunEvent::Done(done));
    }

    /// Run on the current thread and collect every event.
    pub fn run_to_summary(&mut self, control: &RunControl) -> RunSummary {
        let mut summary = RunSummary::default();
        self.run(control, |event| summary.record(&event));
        summary
    }
}

/// A run executing on its own thread, reporting through a channel.
pub struct RunHandle {
    control: Arc<RunControl>,
    events: Receiver<RunEvent>,
    thread: Option<JoinHandle<()>>,
}

impl RunHandle {
    /// Start a run in the background. Configuration problems arrive as an
    /// `Error` event rather than as a failure here.
    pub fn spawn(config: RunConfig) -> Result<Self, ControllerError> {
        let control = Arc::new(RunControl::new());
        let (tx, rx) = mpsc::channel();
        let thread_control = Arc::clone(&control);
        let thread = thread::Builder::new()
            .name("grn-fit-run".into())
            .spawn(move || {
                let emit = |event: RunEvent| {
                    if tx.send(event).is_err() {
                        thread_control.request_stop();
                    }
                };
                match Optimization::new(config) {
                    Ok(mut run) => run.run(&thread_control, emit),
                    Err(e) => {
                        warn!(error = %e, "rejected run config");
                        emit(RunEvent::Error {
                            message: e.to_string(),
                        });
                    }
                }
            })
            .map_err(ControllerError::Spawn)?;
        Ok(Self {
            control,
            events: rx,
            thread: Some(thread),
        })
    }

    pub fn control(&self) -> &RunControl {
        &self.control
    }

    pub fn stop(&self) {
        self.control.request_stop();
    }

    pub fn pause(&self) {
        self.control.pause();
    }

    pub fn resume(&self) {
        self.control.resume();
    }

    /// Next event, blocking. `None` once the run has ended and all events are drained.
    pub fn recv(&self) -> Option<RunEvent> {
        self.events.recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<RunEvent, RecvTimeoutError> {
        self.events.recv_timeout(timeout)
    }

    pub fn try_recv(&self) -> Result<RunEvent, TryRecvError> {
        self.events.try_recv()
    }

    /// Blocking iterator over the remaining events.
    pub fn events(&self) -> impl Iterator<Item = RunEvent> + '_ {
        self.events.iter()
    }

    pub fn join(mut self) -> Result<(), ControllerError> {
        match self.thread.take() {
            Some(handle) => handle.join().map_err(|_| ControllerError::RunPanicked),
            None => Ok(()),
        }
    }
}

impl Drop for RunHandle {
    fn drop(&mut self) {
        if let Some(handle) = self.thread.take() {
            self.control.request_stop();
            let _ = handle.join();
        }
    }
}
