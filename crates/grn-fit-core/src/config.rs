use crate::constants::{LINEAGE_COUNT, MAX_SIMULATION_STEPS};
use crate::encoding::EncodingConfig;
use crate::genes::{GeneGroups, STANDARD_GENE_COUNT};
use crate::objective::{ObjectiveSettings, TargetState, DEFAULT_VARIANCE_WEIGHT};
use crate::simulator::SimulationOptions;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub use crate::objective::TimeCourseTarget;

/// Everything needed to start one optimization run.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunConfig {
    pub target_expression: Vec<f64>,
    pub target_weights: Vec<f64>,
    pub encoding: EncodingConfig,
    pub population_size: usize,
    pub initial_sigma: f64,
    pub generations: usize,
    /// Simulated hours per evaluation.
    pub max_time: f64,
    pub ensemble_size: usize,
    /// 0 evaluates a full spatial ensemble, 1..=6 a single cell at that lineage's angle.
    pub target_lineage: u8,
    pub uniform_morphogens: bool,
    pub require_homogeneity: bool,
    pub minimal_intervention: bool,
    pub intervention_weight: f64,
    pub variance_weight: f64,
    /// Multi-timepoint targets; empty fits only the endpoint.
    pub time_course: Vec<TimeCourseTarget>,
    /// `None` draws a fresh seed per run.
    pub seed: Option<u64>,
    /// Seed for the random weak edges of the network topology.
    pub network_seed: u64,
    pub dt: f64,
    pub noise_level: f64,
    /// Drift threshold for the post-run stability check.
    pub stability_threshold: f64,
}

impl Default for RunConfig {
    fn default() -> Self {
        let (target_expression, target_weights) = Self::lineage_target(1);
        Self {
            target_expression,
            target_weights,
            encoding: EncodingConfig::default(),
            population_size: 16,
            initial_sigma: 0.3,
            generations: 200,
            max_time: 48.0,
            ensemble_size: 8,
            target_lineage: 0,
            uniform_morphogens: false,
            require_homogeneity: false,
            minimal_intervention: false,
            intervention_weight: 0.05,
            variance_weight: DEFAULT_VARIANCE_WEIGHT,
            time_course: Vec::new(),
            seed: Some(42),
            network_seed: 0,
            dt: 0.1,
            noise_level: 0.01,
            stability_threshold: 0.01,
        }
    }
}

macro_rules! define_run_config_error {
    (
        $(
            $variant:ident $( { $($field:ident : $type:ty),* } )? => $fmt:literal $(, $arg:expr)*
        );* $(;)?
    ) => {
        #[derive(Debug, Clone, PartialEq)]
        pub enum RunConfigError {
            $(
                $variant $( { $($field : $type),* } )?,
            )*
        }

        impl std::fmt::Display for RunConfigError {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $(
                        Self::$variant $( { $($field),* } )? => write!(f, $fmt $(, $arg)*),
                    )*
                }
            }
        }
    };
}

define_run_config_error! {
    EmptyTarget => "target_expression must not be empty";
    TargetLength { expected: usize, actual: usize } => "target_expression has {actual} genes, expected {expected}";
    WeightLength { expected: usize, actual: usize } => "target_weights has {actual} entries, expected {expected}";
    InvalidTargetValue { gene: usize } => "target_expression[{gene}] must be finite and non-negative";
    InvalidWeight { gene: usize } => "target_weights[{gene}] must be finite and non-negative";
    NoWeightedGenes => "at least one target weight must be positive";
    PopulationTooSmall { min: usize, actual: usize } => "population_size must be >= {min}, got {actual}";
    InvalidInitialSigma => "initial_sigma must be finite and within (0,1]";
    InvalidGenerations => "generations must be greater than 0";
    InvalidMaxTime => "max_time must be positive and finite";
    InvalidDt => "dt must be positive, finite and not larger than max_time";
    TooManySteps { max: usize } => "max_time / dt must not exceed {max} integration steps";
    InvalidNoiseLevel => "noise_level must be finite and non-negative";
    InvalidEnsembleSize => "ensemble_size must be greater than 0 when target_lineage is 0";
    InvalidTargetLineage { max: u8, actual: u8 } => "target_lineage must be within 0..={max}, got {actual}";
    InvalidPenaltyWeight { name: &'static str } => "{name} must be finite and non-negative";
    InvalidStabilityThreshold => "stability_threshold must be positive and finite";
    GeneIndexOutOfRange { list: &'static str, gene: usize, gene_count: usize } => "{list} contains gene {gene}, but only {gene_count} genes exist";
    DuplicateGene { list: &'static str, gene: usize } => "{list} lists gene {gene} more than once";
    EmptySearchSpace => "encoding enables no searchable parameters";
    InvalidTimePoint { index: usize } => "time_course[{index}].time must be finite and within (0, max_time]";
    TimePointLength { index: usize, expected: usize, actual: usize } => "time_course[{index}] has {actual} genes, expected {expected}";
    InvalidTimePointWeight { index: usize } => "time_course[{index}].weight must be finite and non-negative";
}

impl std::error::Error for RunConfigError {}

impl RunConfig {
    pub const MIN_POPULATION: usize = 4;

    /// Target that asks for one lineage's TF pair at 2.0 and ignores every other gene.
    pub fn lineage_target(lineage: u8) -> (Vec<f64>, Vec<f64>) {
        let groups = GeneGroups::standard();
        let mut expression = vec![0.0; groups.gene_count()];
        let mut weights = vec![0.0; groups.gene_count()];
        let block = usize::from(lineage.clamp(1, LINEAGE_COUNT as u8)) - 1;
        for &g in groups.lineage_tfs(block) {
            expression[g] = 2.0;
            weights[g] = 1.0;
        }
        (expression, weights)
    }

    pub fn target(&self) -> TargetState {
        TargetState::new(self.target_expression.clone(), self.target_weights.clone())
    }

    pub fn objective_settings(&self) -> ObjectiveSettings {
        ObjectiveSettings {
            variance_weight: self.variance_weight,
            require_homogeneity: self.require_homogeneity,
            minimal_intervention: self.minimal_intervention,
            intervention_weight: self.intervention_weight,
        }
    }

    pub fn simulation_options(&self) -> SimulationOptions {
        SimulationOptions {
            spatial_angle: 0.0,
            max_time: self.max_time,
            uniform_morphogens: self.uniform_morphogens,
            dt: self.dt,
            noise_level: self.noise_level,
        }
    }

    /// Generations reserved for variance-penalized fine-tuning.
    pub fn fine_tune_generations(&self) -> usize {
        (self.generations / 5).min(50)
    }

    pub fn validate(&self) -> Result<(), RunConfigError> {
        self.validate_target()?;
        self.validate_search()?;
        self.validate_simulation()?;
        self.validate_penalties()?;
        self.validate_encoding()?;
        self.validate_time_course()?;
        Ok(())
    }

    fn validate_target(&self) -> Result<(), RunConfigError> {
        if self.target_expression.is_empty() {
            return Err(RunConfigError::EmptyTarget);
        }
        if self.target_expression.len() != STANDARD_GENE_COUNT {
            return Err(RunConfigError::TargetLength {
                expected: STANDARD_GENE_COUNT,
                actual: self.target_expression.len(),
            });
        }
        if self.target_weights.len() != STANDARD_GENE_COUNT {
            return Err(RunConfigError::WeightLength {
                expected: STANDARD_GENE_COUNT,
                actual: self.target_weights.len(),
            });
        }
        if let Some(gene) = self
            .target_expression
            .iter()
            .position(|v| !(v.is_finite() && *v >= 0.0))
        {
            return Err(RunConfigError::InvalidTargetValue { gene });
        }
        if let Some(gene) = self
            .target_weights
            .iter()
            .position(|w| !(w.is_finite() && *w >= 0.0))
        {
            return Err(RunConfigError::InvalidWeight { gene });
        }
        if !self.target_weights.iter().any(|&w| w > 0.0) {
            return Err(RunConfigError::NoWeightedGenes);
        }
        Ok(())
    }

    fn validate_search(&self) -> Result<(), RunConfigError> {
        if self.population_size < Self::MIN_POPULATION {
            return Err(RunConfigError::PopulationTooSmall {
                min: Self::MIN_POPULATION,
                actual: self.population_size,
            });
        }
        if !(self.initial_sigma.is_finite() && self.initial_sigma > 0.0 && self.initial_sigma <= 1.0)
        {
            return Err(RunConfigError::InvalidInitialSigma);
        }
        if self.generations == 0 {
            return Err(RunConfigError::InvalidGenerations);
        }
        Ok(())
    }

    fn validate_simulation(&self) -> Result<(), RunConfigError> {
        if !(self.max_time.is_finite() && self.max_time > 0.0) {
            return Err(RunConfigError::InvalidMaxTime);
        }
        if !(self.dt.is_finite() && self.dt > 0.0 && self.dt <= self.max_time) {
            return Err(RunConfigError::InvalidDt);
        }
        if self.max_time / self.dt > MAX_SIMULATION_STEPS as f64 {
            return Err(RunConfigError::TooManySteps {
                max: MAX_SIMULATION_STEPS,
            });
        }
        if !(self.noise_level.is_finite() && self.noise_level >= 0.0) {
            return Err(RunConfigError::InvalidNoiseLevel);
        }
        if usize::from(self.target_lineage) > LINEAGE_COUNT {
            return Err(RunConfigError::InvalidTargetLineage {
                max: LINEAGE_COUNT as u8,
                actual: self.target_lineage,
            });
        }
        if self.target_lineage == 0 && self.ensemble_size == 0 {
            return Err(RunConfigError::InvalidEnsembleSize);
        }
        Ok(())
    }

    fn validate_penalties(&self) -> Result<(), RunConfigError> {
        for (name, value) in [
            ("intervention_weight", self.intervention_weight),
            ("variance_weight", self.variance_weight),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(RunConfigError::InvalidPenaltyWeight { name });
            }
        }
        if !(self.stability_threshold.is_finite() && self.stability_threshold > 0.0) {
            return Err(RunConfigError::InvalidStabilityThreshold);
        }
        Ok(())
    }

    fn validate_encoding(&self) -> Result<(), RunConfigError> {
        let enc = &self.encoding;
        for (list, genes) in [
            ("knockout_genes", &enc.knockout_genes),
            ("modifier_genes", &enc.modifier_genes),
            ("fixed_knockouts", &enc.fixed_knockouts),
        ] {
            let mut seen = BTreeSet::new();
            for &gene in genes {
                if gene >= STANDARD_GENE_COUNT {
                    return Err(RunConfigError::GeneIndexOutOfRange {
                        list,
                        gene,
                        gene_count: STANDARD_GENE_COUNT,
                    });
                }
                if !seen.insert(gene) {
                    return Err(RunConfigError::DuplicateGene { list, gene });
                }
            }
        }
        let searchable = enc.include_global
            || enc.include_morphogens
            || (enc.include_knockouts && !enc.knockout_genes.is_empty())
            || (enc.include_modifiers && !enc.modifier_genes.is_empty());
        if !searchable {
            return Err(RunConfigError::EmptySearchSpace);
        }
        Ok(())
    }

    fn validate_time_course(&self) -> Result<(), RunConfigError> {
        for (index, point) in self.time_course.iter().enumerate() {
            if !(point.time.is_finite() && point.time > 0.0 && point.time <= self.max_time) {
                return Err(RunConfigError::InvalidTimePoint { index });
            }
            if point.expression.len() != STANDARD_GENE_COUNT {
                return Err(RunConfigError::TimePointLength {
                    index,
                    expected: STANDARD_GENE_COUNT,
                    actual: point.expression.len(),
                });
            }
            if !(point.weight.is_finite() && point.weight >= 0.0) {
                return Err(RunConfigError::InvalidTimePointWeight { index });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_accepts_default() {
        assert_eq!(RunConfig::default().validate(), Ok(()));
    }

    #[test]
    fn default_target_weights_lineage_one_pair() {
        let config = RunConfig::default();
        let target = config.target();
        let weighted: Vec<usize> = target.weighted_genes().collect();
        assert_eq!(weighted, GeneGroups::standard().lineage_tfs(0).to_vec());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: RunConfig =
            serde_json::from_str(r#"{"generations": 12, "seed": null}"#).unwrap();
        assert_eq!(config.generations, 12);
        assert_eq!(config.seed, None);
        assert_eq!(config.population_size, 16);
        assert!(config.encoding.include_global);
    }

    #[test]
    fn validate_rejects_bad_target() {
        let config = RunConfig {
            target_expression: vec![],
            ..RunConfig::default()
        };
        assert_eq!(config.validate(), Err(RunConfigError::EmptyTarget));

        let config = RunConfig {
            target_weights: vec![0.0; STANDARD_GENE_COUNT],
            ..RunConfig::default()
        };
        assert_eq!(config.validate(), Err(RunConfigError::NoWeightedGenes));

        let mut config = RunConfig::default();
        config.target_weights[3] = f64::NAN;
        assert_eq!(
            config.validate(),
            Err(RunConfigError::InvalidWeight { gene: 3 })
        );
    }

    #[test]
    fn validate_rejects_bad_search_settings() {
        let config = RunConfig {
            population_size: 2,
            ..RunConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(RunConfigError::PopulationTooSmall { .. })
        ));
        let config = RunConfig {
            initial_sigma: 1.5,
            ..RunConfig::default()
        };
        assert_eq!(config.validate(), Err(RunConfigError::InvalidInitialSigma));
        let config = RunConfig {
            dt: 100.0,
            ..RunConfig::default()
        };
        assert_eq!(config.validate(), Err(RunConfigError::InvalidDt));
        let config = RunConfig {
            max_time: 1e300,
            ..RunConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(RunConfigError::TooManySteps { .. })
        ));
        let config = RunConfig {
            max_time: 100_000.0,
            ..RunConfig::default()
        };
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn ensemble_size_only_matters_for_spatial_ensembles() {
        let config = RunConfig {
            ensemble_size: 0,
            ..RunConfig::default()
        };
        assert_eq!(config.validate(), Err(RunConfigError::InvalidEnsembleSize));
        let config = RunConfig {
            ensemble_size: 0,
            target_lineage: 2,
            ..RunConfig::default()
        };
        assert_eq!(config.validate(), Ok(()));
        let config = RunConfig {
            target_lineage: 7,
            ..RunConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(RunConfigError::InvalidTargetLineage { actual: 7, .. })
        ));
    }

    #[test]
    fn validate_rejects_bad_gene_lists() {
        let mut config = RunConfig::default();
        config.encoding.knockout_genes = vec![5, 5];
        assert_eq!(
            config.validate(),
            Err(RunConfigError::DuplicateGene {
                list: "knockout_genes",
                gene: 5
            })
        );
        config.encoding.knockout_genes = vec![];
        config.encoding.fixed_knockouts = vec![500];
        let err = config.validate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "fixed_knockouts contains gene 500, but only 200 genes exist"
        );
    }

    #[test]
    fn validate_rejects_empty_search_space() {
        let mut config = RunConfig::default();
        config.encoding.include_global = false;
        config.encoding.include_morphogens = false;
        config.encoding.include_knockouts = true;
        assert_eq!(config.validate(), Err(RunConfigError::EmptySearchSpace));
    }

    #[test]
    fn validate_rejects_bad_time_points() {
        let mut config = RunConfig::default();
        config.time_course = vec![TimeCourseTarget {
            time: 100.0,
            expression: vec![0.0; STANDARD_GENE_COUNT],
            weight: 1.0,
        }];
        assert_eq!(
            config.validate(),
            Err(RunConfigError::InvalidTimePoint { index: 0 })
        );
        config.time_course[0].time = 12.0;
        config.time_course[0].expression.pop();
        assert!(matches!(
            config.validate(),
            Err(RunConfigError::TimePointLength { index: 0, .. })
        ));
    }

    #[test]
    fn fine_tune_budget_is_capped() {
        let short = RunConfig {
            generations: 30,
            ..RunConfig::default()
        };
        assert_eq!(short.fine_tune_generations(), 6);
        assert_eq!(RunConfig::default().fine_tune_generations(), 40);
        let long = RunConfig {
            generations: 1000,
            ..RunConfig::default()
        };
        assert_eq!(long.fine_tune_generations(), 50);
    }

    #[test]
    fn error_messages_name_the_field() {
        assert_eq!(
            RunConfigError::PopulationTooSmall { min: 4, actual: 1 }.to_string(),
            "population_size must be >= 4, got 1"
        );
        assert_eq!(
            RunConfigError::InvalidPenaltyWeight { name: "variance_weight" }.to_string(),
            "variance_weight must be finite and non-negative"
        );
    }
}
