use crate::objective::Phase;
use crate::params::ParamsBlob;
use crate::simulator::StabilityReport;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// 1-based index of the generation just completed.
    pub generation: usize,
    pub phase: Phase,
    /// Raw (unpenalized) fitness of the best candidate so far.
    pub best_fitness: f64,
    /// Mean raw fitness of this generation's population.
    pub mean_fitness: f64,
    pub sigma: f64,
    pub best_vector: Vec<f64>,
    /// Pearson correlation between the best candidate's simulated expression and the target.
    pub correlation: f64,
    /// Size of the best candidate's searchable knockout/modifier set, when those are searched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intervention_count: Option<usize>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DoneEvent {
    pub best_vector: Vec<f64>,
    pub fitness: f64,
    pub generations: usize,
    pub converged: bool,
    pub stopped: bool,
    pub params: ParamsBlob,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    Progress(ProgressEvent),
    Done(DoneEvent),
    Error { message: String },
}

impl RunEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunEvent::Progress(_))
    }
}

/// Everything a finished run reported, in emission order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub progress: Vec<ProgressEvent>,
    /// First generation scored under the fine-tuning objective.
    pub phase_transition: Option<usize>,
    pub done: Option<DoneEvent>,
    pub error: Option<String>,
    pub stability: Option<StabilityReport>,
}

impl RunSummary {
    pub fn record(&mut self, event: &RunEvent) {
        match event {
            RunEvent::Progress(p) => {
                if p.phase == Phase::FineTuning && self.phase_transition.is_none() {
                    self.phase_transition = Some(p.generation);
                }
                self.progress.push(p.clone());
            }
            RunEvent::Done(d) => self.done = Some(d.clone()),
            RunEvent::Error { message } => self.error = Some(message.clone()),
        }
    }

    pub fn best_fitness(&self) -> Option<f64> {
        self.done
            .as_ref()
            .map(|d| d.fitness)
            .or_else(|| self.progress.last().map(|p| p.best_fitness))
    }
}
