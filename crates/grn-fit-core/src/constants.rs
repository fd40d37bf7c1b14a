/// Number of terminal lineages, each owning a pair of lineage TFs.
pub const LINEAGE_COUNT: usize = 6;

/// Lineage TFs per lineage block.
pub const LINEAGE_TFS_PER: usize = 2;

/// Upper clamp on simulated expression.
pub const MAX_EXPRESSION: f64 = 6.0;

/// Mean lineage-TF expression a cell must exceed to be assigned a lineage.
pub const LINEAGE_THRESHOLD: f64 = 1.2;

/// Upper bound on integration steps per simulation (`max_time / dt`).
pub const MAX_SIMULATION_STEPS: usize = 1_000_000;

/// Regularizer in the Hill denominator.
pub const HILL_EPSILON: f64 = 1e-8;

/// Receptor expression below which the morphogen channel stays closed.
pub const RECEPTOR_ACTIVE_THRESHOLD: f64 = 0.1;

/// Receptor expression at which the morphogen gain saturates.
pub const RECEPTOR_GAIN_SATURATION: f64 = 0.5;

/// Modifiers within this distance of 1.0 decode as "no effect".
pub const MODIFIER_DEAD_ZONE: f64 = 0.05;

/// Slot value below which a knockout slot decodes as knocked out.
pub const KNOCKOUT_THRESHOLD: f64 = 0.5;

/// Initial-condition jitter amplitude per unit of noise level.
pub const JITTER_PER_NOISE: f64 = 5.0;

/// Prime multiplier used to derive independent RNG streams from a base seed.
pub const RNG_DERIVATION_PRIME: u64 = 7919;

/// Relative angular width of each lineage's morphogen sector.
pub const LINEAGE_SECTOR_SIZES: [f64; LINEAGE_COUNT] = [1.0, 1.2, 0.8, 1.0, 1.1, 0.9];
