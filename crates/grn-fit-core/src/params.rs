//! Structured simulation parameters and their exportable blob form.

use crate::constants::LINEAGE_COUNT;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::{error::Error, fmt};

/// Declared range and default of one global kinetic constant.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ParamBound {
    pub name: &'static str,
    pub min: f64,
    pub max: f64,
    pub default: f64,
}

impl ParamBound {
    /// Min-max normalize into [0,1].
    pub fn normalize(&self, value: f64) -> f64 {
        ((value - self.min) / (self.max - self.min)).clamp(0.0, 1.0)
    }

    /// Clamp to [0,1] and map back into `[min, max]`.
    pub fn denormalize(&self, unit: f64) -> f64 {
        let u = if unit.is_nan() { 0.0 } else { unit.clamp(0.0, 1.0) };
        self.min + u * (self.max - self.min)
    }

    pub fn contains(&self, value: f64) -> bool {
        value.is_finite() && value >= self.min && value <= self.max
    }
}

pub const GLOBAL_PARAM_COUNT: usize = 13;

/// Bound table for `GlobalParams`, in field order. Single source of truth for
/// normalization and for defaults.
pub const GLOBAL_PARAM_BOUNDS: [ParamBound; GLOBAL_PARAM_COUNT] = [
    ParamBound { name: "hill_n", min: 1.0, max: 4.0, default: 2.0 },
    ParamBound { name: "hill_k", min: 0.2, max: 3.0, default: 1.0 },
    ParamBound { name: "lineage_bias", min: 0.0, max: 0.3, default: 0.05 },
    ParamBound { name: "target_bias", min: 0.0, max: 0.3, default: 0.05 },
    ParamBound { name: "prog_decay", min: 0.05, max: 1.0, default: 0.3 },
    ParamBound { name: "lineage_decay", min: 0.05, max: 1.0, default: 0.3 },
    ParamBound { name: "inhibition_mult", min: 0.0, max: 3.0, default: 1.0 },
    ParamBound { name: "morphogen_time", min: 1.0, max: 48.0, default: 12.0 },
    ParamBound { name: "morphogen_strength", min: 0.0, max: 2.0, default: 0.6 },
    ParamBound { name: "prog_init", min: 0.0, max: 3.0, default: 1.5 },
    ParamBound { name: "lineage_init", min: 0.0, max: 1.0, default: 0.1 },
    ParamBound { name: "ligand_bias", min: 0.0, max: 0.6, default: 0.2 },
    ParamBound { name: "receptor_bias", min: 0.0, max: 0.6, default: 0.2 },
];

/// Global kinetic constants of the network.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GlobalParams {
    /// Hill coefficient.
    pub hill_n: f64,
    /// Hill half-activation threshold.
    pub hill_k: f64,
    pub lineage_bias: f64,
    pub target_bias: f64,
    pub prog_decay: f64,
    pub lineage_decay: f64,
    /// Scale applied to every inhibitory (negative) edge.
    pub inhibition_mult: f64,
    /// Hours until the morphogen time ramp reaches full strength.
    pub morphogen_time: f64,
    pub morphogen_strength: f64,
    /// Initial expression of progenitor TFs.
    pub prog_init: f64,
    /// Initial expression of lineage TFs.
    pub lineage_init: f64,
    pub ligand_bias: f64,
    pub receptor_bias: f64,
}

impl Default for GlobalParams {
    fn default() -> Self {
        let mut values = [0.0; GLOBAL_PARAM_COUNT];
        for (v, bound) in values.iter_mut().zip(GLOBAL_PARAM_BOUNDS.iter()) {
            *v = bound.default;
        }
        Self::from_array(values)
    }
}

impl GlobalParams {
    pub fn to_array(&self) -> [f64; GLOBAL_PARAM_COUNT] {
        [
            self.hill_n,
            self.hill_k,
            self.lineage_bias,
            self.target_bias,
            self.prog_decay,
            self.lineage_decay,
            self.inhibition_mult,
            self.morphogen_time,
            self.morphogen_strength,
            self.prog_init,
            self.lineage_init,
            self.ligand_bias,
            self.receptor_bias,
        ]
    }

    pub fn from_array(v: [f64; GLOBAL_PARAM_COUNT]) -> Self {
        Self {
            hill_n: v[0],
            hill_k: v[1],
            lineage_bias: v[2],
            target_bias: v[3],
            prog_decay: v[4],
            lineage_decay: v[5],
            inhibition_mult: v[6],
            morphogen_time: v[7],
            morphogen_strength: v[8],
            prog_init: v[9],
            lineage_init: v[10],
            ligand_bias: v[11],
            receptor_bias: v[12],
        }
    }

    /// First field outside its declared bound, if any.
    pub fn first_out_of_bounds(&self) -> Option<(&'static str, f64)> {
        self.to_array()
            .iter()
            .zip(GLOBAL_PARAM_BOUNDS.iter())
            .find(|(v, bound)| !bound.contains(**v))
            .map(|(v, bound)| (bound.name, *v))
    }
}

/// Per-lineage morphogen setting.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MorphogenSetting {
    pub enabled: bool,
    /// Strength in [0, 2]; 1.0 is neutral.
    pub strength: f64,
}

impl Default for MorphogenSetting {
    fn default() -> Self {
        Self {
            enabled: true,
            strength: 1.0,
        }
    }
}

impl MorphogenSetting {
    pub const MAX_STRENGTH: f64 = 2.0;

    /// Strength actually applied, 0 when disabled.
    pub fn effective_strength(&self) -> f64 {
        if self.enabled {
            self.strength
        } else {
            0.0
        }
    }
}

/// Parameters for one simulation run. Treated as an immutable value per evaluation.
#[derive(Clone, Debug, PartialEq)]
pub struct SimulationParams {
    pub global: GlobalParams,
    pub knockouts: BTreeSet<usize>,
    pub morphogens: Vec<MorphogenSetting>,
    /// Gene index -> input multiplier in [0, 2]. Absent genes use 1.0.
    pub modifiers: BTreeMap<usize, f64>,
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            global: GlobalParams::default(),
            knockouts: BTreeSet::new(),
            morphogens: vec![MorphogenSetting::default(); LINEAGE_COUNT],
            modifiers: BTreeMap::new(),
        }
    }
}

impl SimulationParams {
    pub const MAX_MODIFIER: f64 = 2.0;

    pub fn is_knocked_out(&self, gene: usize) -> bool {
        self.knockouts.contains(&gene)
    }

    pub fn modifier(&self, gene: usize) -> f64 {
        self.modifiers.get(&gene).copied().unwrap_or(1.0)
    }

    pub fn morphogen(&self, block: usize) -> MorphogenSetting {
        self.morphogens.get(block).copied().unwrap_or_default()
    }

    /// Number of non-default knockouts and modifiers.
    pub fn intervention_count(&self) -> usize {
        self.knockouts.len() + self.modifiers.len()
    }

    /// L1-style intervention size: one per knockout plus |m - 1| per modifier.
    pub fn intervention_magnitude(&self) -> f64 {
        self.knockouts.len() as f64
            + self.modifiers.values().map(|m| (m - 1.0).abs()).sum::<f64>()
    }

    /// Modifiers ordered by descending effect size |m - 1|, ties by gene index.
    pub fn modifiers_by_effect(&self) -> Vec<(usize, f64)> {
        let mut entries: Vec<(usize, f64)> = self.modifiers.iter().map(|(&g, &m)| (g, m)).collect();
        entries.sort_by(|a, b| {
            (b.1 - 1.0)
                .abs()
                .total_cmp(&(a.1 - 1.0).abs())
                .then(a.0.cmp(&b.0))
        });
        entries
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParamsBlobError {
    Malformed(String),
    InvalidCompactEncoding(String),
    GlobalOutOfRange { name: &'static str, value: f64 },
    GeneIndexOutOfRange { gene: usize, gene_count: usize },
    MorphogenCount { expected: usize, actual: usize },
    MorphogenStrengthOutOfRange { lineage: usize, value: f64 },
    ModifierOutOfRange { gene: usize, value: f64 },
    DuplicateModifier { gene: usize },
}

impl fmt::Display for ParamsBlobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamsBlobError::Malformed(msg) => write!(f, "malformed parameter blob: {msg}"),
            ParamsBlobError::InvalidCompactEncoding(msg) => {
                write!(f, "invalid compact parameter string: {msg}")
            }
            ParamsBlobError::GlobalOutOfRange { name, value } => {
                write!(f, "global parameter {name} ({value}) is outside its declared bounds")
            }
            ParamsBlobError::GeneIndexOutOfRange { gene, gene_count } => {
                write!(f, "gene index {gene} out of range for {gene_count} genes")
            }
            ParamsBlobError::MorphogenCount { expected, actual } => {
                write!(f, "expected {expected} morphogen settings, found {actual}")
            }
            ParamsBlobError::MorphogenStrengthOutOfRange { lineage, value } => {
                write!(f, "morphogen strength for lineage {lineage} ({value}) must be within [0,2]")
            }
            ParamsBlobError::ModifierOutOfRange { gene, value } => {
                write!(f, "modifier for gene {gene} ({value}) must be within [0,2]")
            }
            ParamsBlobError::DuplicateModifier { gene } => {
                write!(f, "gene {gene} has more than one modifier entry")
            }
        }
    }
}

impl Error for ParamsBlobError {}

/// Exportable form of `SimulationParams`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParamsBlob {
    pub global: GlobalParams,
    #[serde(default)]
    pub knockouts: Vec<usize>,
    pub morphogens: Vec<MorphogenSetting>,
    /// (gene index, multiplier) pairs.
    #[serde(default)]
    pub modifiers: Vec<(usize, f64)>,
}

impl From<&SimulationParams> for ParamsBlob {
    fn from(params: &SimulationParams) -> Self {
        Self {
            global: params.global,
            knockouts: params.knockouts.iter().copied().collect(),
            morphogens: params.morphogens.clone(),
            modifiers: params.modifiers.iter().map(|(&g, &m)| (g, m)).collect(),
        }
    }
}

impl ParamsBlob {
    pub fn to_json_pretty(&self) -> Result<String, ParamsBlobError> {
        serde_json::to_string_pretty(self).map_err(|e| ParamsBlobError::Malformed(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self, ParamsBlobError> {
        serde_json::from_str(json).map_err(|e| ParamsBlobError::Malformed(e.to_string()))
    }

    /// URL-safe compact form: unpadded base64 of the minified JSON.
    pub fn to_compact(&self) -> Result<String, ParamsBlobError> {
        let json =
            serde_json::to_vec(self).map_err(|e| ParamsBlobError::Malformed(e.to_string()))?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    pub fn from_compact(encoded: &str) -> Result<Self, ParamsBlobError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded.trim())
            .map_err(|e| ParamsBlobError::InvalidCompactEncoding(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| ParamsBlobError::Malformed(e.to_string()))
    }

    /// Validate against a gene count and convert into simulation parameters.
    pub fn into_params(self, gene_count: usize) -> Result<SimulationParams, ParamsBlobError> {
        if let Some((name, value)) = self.global.first_out_of_bounds() {
            return Err(ParamsBlobError::GlobalOutOfRange { name, value });
        }
        let check_gene = |gene: usize| {
            if gene < gene_count {
                Ok(gene)
            } else {
                Err(ParamsBlobError::GeneIndexOutOfRange { gene, gene_count })
            }
        };
        let knockouts = self
            .knockouts
            .into_iter()
            .map(check_gene)
            .collect::<Result<BTreeSet<_>, _>>()?;

        if self.morphogens.len() != LINEAGE_COUNT {
            return Err(ParamsBlobError::MorphogenCount {
                expected: LINEAGE_COUNT,
                actual: self.morphogens.len(),
            });
        }
        for (block, m) in self.morphogens.iter().enumerate() {
            if !(m.strength.is_finite() && (0.0..=MorphogenSetting::MAX_STRENGTH).contains(&m.strength))
            {
                return Err(ParamsBlobError::MorphogenStrengthOutOfRange {
                    lineage: block + 1,
                    value: m.strength,
                });
            }
        }

        let mut modifiers = BTreeMap::new();
        for (gene, value) in self.modifiers {
            let gene = check_gene(gene)?;
            if !(value.is_finite() && (0.0..=SimulationParams::MAX_MODIFIER).contains(&value)) {
                return Err(ParamsBlobError::ModifierOutOfRange { gene, value });
            }
            if modifiers.insert(gene, value).is_some() {
                return Err(ParamsBlobError::DuplicateModifier { gene });
            }
        }

        Ok(SimulationParams {
            global: self.global,
            knockouts,
            morphogens: self.morphogens,
            modifiers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_params() -> SimulationParams {
        let mut params = SimulationParams::default();
        params.knockouts.insert(17);
        params.knockouts.insert(4);
        params.morphogens[2].strength = 1.7;
        params.modifiers.insert(30, 0.4);
        params.modifiers.insert(12, 1.2);
        params
    }

    #[test]
    fn defaults_match_bound_table() {
        let defaults = GlobalParams::default().to_array();
        for (v, bound) in defaults.iter().zip(GLOBAL_PARAM_BOUNDS.iter()) {
            assert_eq!(*v, bound.default, "{}", bound.name);
            assert!(bound.contains(*v), "{} default out of bounds", bound.name);
        }
    }

    #[test]
    fn denormalize_clamps_out_of_range_input() {
        let bound = GLOBAL_PARAM_BOUNDS[0];
        assert_eq!(bound.denormalize(-3.0), bound.min);
        assert_eq!(bound.denormalize(7.0), bound.max);
        assert_eq!(bound.denormalize(f64::NAN), bound.min);
    }

    #[test]
    fn json_blob_round_trips() {
        let params = sample_params();
        let json = ParamsBlob::from(&params).to_json_pretty().expect("serialize");
        let back = ParamsBlob::from_json(&json)
            .and_then(|b| b.into_params(200))
            .expect("round trip");
        assert_eq!(back, params);
    }

    #[test]
    fn compact_blob_round_trips_and_is_url_safe() {
        let params = sample_params();
        let compact = ParamsBlob::from(&params).to_compact().expect("encode");
        assert!(compact
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        let back = ParamsBlob::from_compact(&compact)
            .and_then(|b| b.into_params(200))
            .expect("decode");
        assert_eq!(back, params);
    }

    #[test]
    fn malformed_inputs_are_rejected_with_typed_errors() {
        assert!(matches!(
            ParamsBlob::from_json("{not json"),
            Err(ParamsBlobError::Malformed(_))
        ));
        assert!(matches!(
            ParamsBlob::from_compact("***"),
            Err(ParamsBlobError::InvalidCompactEncoding(_))
        ));
        let not_a_blob = URL_SAFE_NO_PAD.encode(b"[1,2,3]");
        assert!(matches!(
            ParamsBlob::from_compact(&not_a_blob),
            Err(ParamsBlobError::Malformed(_))
        ));
    }

    #[test]
    fn semantic_validation_catches_bad_values() {
        let mut blob = ParamsBlob::from(&sample_params());
        blob.knockouts.push(500);
        assert_eq!(
            blob.into_params(200),
            Err(ParamsBlobError::GeneIndexOutOfRange {
                gene: 500,
                gene_count: 200
            })
        );

        let mut blob = ParamsBlob::from(&sample_params());
        blob.morphogens.pop();
        assert!(matches!(
            blob.into_params(200),
            Err(ParamsBlobError::MorphogenCount { .. })
        ));

        let mut blob = ParamsBlob::from(&sample_params());
        blob.global.hill_n = 99.0;
        assert!(matches!(
            blob.into_params(200),
            Err(ParamsBlobError::GlobalOutOfRange { name: "hill_n", .. })
        ));

        let mut blob = ParamsBlob::from(&sample_params());
        blob.modifiers.push((12, 0.5));
        assert_eq!(
            blob.into_params(200),
            Err(ParamsBlobError::DuplicateModifier { gene: 12 })
        );
    }

    #[test]
    fn modifiers_sort_by_effect_size() {
        let params = sample_params();
        let sorted = params.modifiers_by_effect();
        assert_eq!(sorted, vec![(30, 0.4), (12, 1.2)]);
        assert_eq!(params.intervention_count(), 4);
        assert!((params.intervention_magnitude() - (2.0 + 0.6 + 0.2)).abs() < 1e-12);
    }
}
