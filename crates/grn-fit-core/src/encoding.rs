//! Bidirectional mapping between the optimizer's flat search vector and
//! structured `SimulationParams`.
//!
//! Layout of the vector, each block present only when enabled:
//! `[globals (13)] [knockout slots] [morphogen slots (6)] [modifier slots]`.
//! Every slot lives in the unit interval; decode clamps before denormalizing.
//!
//! Knockout slots are lossy on purpose: decode thresholds at 0.5 and encode writes
//! exactly 0.0 or 1.0, so `decode(encode(p)) == p` while `encode(decode(v))`
//! collapses `v` onto the canonical 0/1 corners.

use crate::constants::{KNOCKOUT_THRESHOLD, LINEAGE_COUNT, MODIFIER_DEAD_ZONE};
use crate::params::{
    GlobalParams, MorphogenSetting, SimulationParams, GLOBAL_PARAM_BOUNDS, GLOBAL_PARAM_COUNT,
};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Which parameter blocks are searched in a run. Fixed for the duration of the run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodingConfig {
    pub include_global: bool,
    pub include_knockouts: bool,
    pub include_morphogens: bool,
    pub include_modifiers: bool,
    /// Genes that get a knockout slot when `include_knockouts` is set.
    pub knockout_genes: Vec<usize>,
    /// Genes that get a modifier slot when `include_modifiers` is set.
    pub modifier_genes: Vec<usize>,
    /// Genes knocked out in every decoded parameter set, without a search slot.
    pub fixed_knockouts: Vec<usize>,
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            include_global: true,
            include_knockouts: false,
            include_morphogens: true,
            include_modifiers: false,
            knockout_genes: Vec::new(),
            modifier_genes: Vec::new(),
            fixed_knockouts: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct SlotLayout {
    global: Range<usize>,
    knockouts: Range<usize>,
    morphogens: Range<usize>,
    modifiers: Range<usize>,
}

impl SlotLayout {
    fn new(config: &EncodingConfig) -> Self {
        let mut offset = 0;
        let mut block = |enabled: bool, len: usize| {
            let len = if enabled { len } else { 0 };
            let range = offset..offset + len;
            offset += len;
            range
        };
        let global = block(config.include_global, GLOBAL_PARAM_COUNT);
        let knockouts = block(config.include_knockouts, config.knockout_genes.len());
        let morphogens = block(config.include_morphogens, LINEAGE_COUNT);
        let modifiers = block(config.include_modifiers, config.modifier_genes.len());
        Self {
            global,
            knockouts,
            morphogens,
            modifiers,
        }
    }

    fn len(&self) -> usize {
        self.modifiers.end
    }
}

fn clamp_unit(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

/// Encoder/decoder for one `EncodingConfig`.
#[derive(Clone, Debug)]
pub struct ParameterCodec {
    config: EncodingConfig,
    layout: SlotLayout,
}

impl ParameterCodec {
    pub fn new(config: EncodingConfig) -> Self {
        let layout = SlotLayout::new(&config);
        Self { config, layout }
    }

    pub fn config(&self) -> &EncodingConfig {
        &self.config
    }

    pub fn dimensions(&self) -> usize {
        self.layout.len()
    }

    /// Parameter-space range represented by each slot.
    pub fn bounds(&self) -> Vec<(f64, f64)> {
        let mut out = Vec::with_capacity(self.dimensions());
        if !self.layout.global.is_empty() {
            out.extend(GLOBAL_PARAM_BOUNDS.iter().map(|b| (b.min, b.max)));
        }
        out.extend(self.layout.knockouts.clone().map(|_| (0.0, 1.0)));
        out.extend(
            self.layout
                .morphogens
                .clone()
                .map(|_| (0.0, MorphogenSetting::MAX_STRENGTH)),
        );
        out.extend(
            self.layout
                .modifiers
                .clone()
                .map(|_| (0.0, SimulationParams::MAX_MODIFIER)),
        );
        out
    }

    /// Box the optimizer searches in: every slot is normalized to [0,1].
    pub fn unit_bounds(&self) -> Vec<(f64, f64)> {
        vec![(0.0, 1.0); self.dimensions()]
    }

    /// Human-readable label per slot, for progress displays.
    pub fn slot_labels(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.dimensions());
        if !self.layout.global.is_empty() {
            out.extend(GLOBAL_PARAM_BOUNDS.iter().map(|b| b.name.to_string()));
        }
        if !self.layout.knockouts.is_empty() {
            out.extend(self.config.knockout_genes.iter().map(|g| format!("knockout[{g}]")));
        }
        out.extend(self.layout.morphogens.clone().enumerate().map(|(i, _)| format!("morphogen[{}]", i + 1)));
        if !self.layout.modifiers.is_empty() {
            out.extend(self.config.modifier_genes.iter().map(|g| format!("modifier[{g}]")));
        }
        out
    }

    /// Vector of declared defaults: global defaults, every knockout slot active,
    /// neutral (1.0) morphogens and modifiers.
    pub fn default_vector(&self) -> Vec<f64> {
        self.encode(&SimulationParams::default())
    }

    pub fn encode(&self, params: &SimulationParams) -> Vec<f64> {
        let mut v = Vec::with_capacity(self.dimensions());
        if !self.layout.global.is_empty() {
            let values = params.global.to_array();
            v.extend(
                values
                    .iter()
                    .zip(GLOBAL_PARAM_BOUNDS.iter())
                    .map(|(&x, bound)| bound.normalize(x)),
            );
        }
        if !self.layout.knockouts.is_empty() {
            v.extend(
                self.config
                    .knockout_genes
                    .iter()
                    .map(|&g| if params.is_knocked_out(g) { 0.0 } else { 1.0 }),
            );
        }
        if !self.layout.morphogens.is_empty() {
            v.extend((0..LINEAGE_COUNT).map(|block| {
                clamp_unit(params.morphogen(block).effective_strength() / MorphogenSetting::MAX_STRENGTH)
            }));
        }
        if !self.layout.modifiers.is_empty() {
            v.extend(
                self.config
                    .modifier_genes
                    .iter()
                    .map(|&g| clamp_unit(params.modifier(g) / SimulationParams::MAX_MODIFIER)),
            );
        }
        v
    }

    pub fn decode(&self, vector: &[f64]) -> SimulationParams {
        let slot = |i: usize, fallback: f64| clamp_unit(vector.get(i).copied().unwrap_or(fallback));
        let mut params = SimulationParams::default();

        if !self.layout.global.is_empty() {
            let defaults = GlobalParams::default().to_array();
            let mut values = [0.0; GLOBAL_PARAM_COUNT];
            for (k, bound) in GLOBAL_PARAM_BOUNDS.iter().enumerate() {
                let u = slot(self.layout.global.start + k, bound.normalize(defaults[k]));
                values[k] = bound.denormalize(u);
            }
            params.global = GlobalParams::from_array(values);
        }

        for (k, &gene) in self.config.knockout_genes.iter().enumerate() {
            if self.layout.knockouts.is_empty() {
                break;
            }
            if slot(self.layout.knockouts.start + k, 1.0) < KNOCKOUT_THRESHOLD {
                params.knockouts.insert(gene);
            }
        }
        params.knockouts.extend(self.config.fixed_knockouts.iter().copied());

        if !self.layout.morphogens.is_empty() {
            for (block, m) in params.morphogens.iter_mut().enumerate() {
                let u = slot(self.layout.morphogens.start + block, 0.5);
                *m = MorphogenSetting {
                    enabled: true,
                    strength: u * MorphogenSetting::MAX_STRENGTH,
                };
            }
        }

        for (k, &gene) in self.config.modifier_genes.iter().enumerate() {
            if self.layout.modifiers.is_empty() {
                break;
            }
            let value = slot(self.layout.modifiers.start + k, 0.5) * SimulationParams::MAX_MODIFIER;
            if (value - 1.0).abs() > MODIFIER_DEAD_ZONE {
                params.modifiers.insert(gene, value);
            }
        }

        params
    }

    /// Knockouts and modifiers that occupy search slots, i.e. excluding fixed knockouts.
    pub fn searchable_interventions(&self, params: &SimulationParams) -> (usize, f64) {
        let knockouts = params
            .knockouts
            .iter()
            .filter(|&&g| !self.config.fixed_knockouts.contains(&g))
            .count();
        let modifier_l1: f64 = params.modifiers.values().map(|m| (m - 1.0).abs()).sum();
        (knockouts + params.modifiers.len(), knockouts as f64 + modifier_l1)
    }
}
