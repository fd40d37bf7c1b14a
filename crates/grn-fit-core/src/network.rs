//! Static GRN topology and its per-evaluation compiled form.
//!
//! `GrnTopology` is built once per run and shared read-only by every evaluation.
//! `CompiledNetwork` folds one `SimulationParams` into the topology (scaled
//! inhibitory edges, bias/decay/initial vectors, knockout and modifier masks) and
//! is discarded after the simulation that needed it.

use crate::constants::{LINEAGE_COUNT, MAX_EXPRESSION};
use crate::genes::{GeneClass, GeneGroups};
use crate::params::SimulationParams;
use rand::Rng;
use serde::{Deserialize, Serialize};

// Class kinetics not exposed as global parameters.
const PROG_BIAS: f64 = 0.05;
const LIGAND_DECAY: f64 = 0.2;
const RECEPTOR_DECAY: f64 = 0.2;
const TARGET_DECAY: f64 = 0.2;
pub const HOUSEKEEPING_BIAS: f64 = 0.6;
pub const HOUSEKEEPING_DECAY: f64 = 0.1;
const OTHER_BIAS: f64 = 0.1;
const OTHER_DECAY: f64 = 0.2;

const LIGAND_INIT: f64 = 0.2;
const RECEPTOR_INIT: f64 = 0.2;
const TARGET_INIT: f64 = 0.1;
const HOUSEKEEPING_INIT: f64 = 1.0;
const OTHER_INIT: f64 = 0.1;

// Edge family weights.
const PROG_SELF_WEIGHT: f64 = 0.2;
const PROG_MUTUAL_BASE: f64 = 0.35;
const PROG_MUTUAL_SPREAD: f64 = 0.1;
const PROG_TO_LINEAGE_WEIGHT: f64 = 0.15;
const LINEAGE_SELF_WEIGHT: f64 = 0.6;
const LINEAGE_PARTNER_WEIGHT: f64 = 0.4;
const LINEAGE_INHIBIT_WEIGHT: f64 = -0.5;
const LINEAGE_REPRESS_PROG_WEIGHT: f64 = -0.3;
const LINEAGE_TO_TARGET_WEIGHT: f64 = 0.7;
const LINEAGE_TO_LIGAND_WEIGHT: f64 = 0.6;
const PROG_TO_RECEPTOR_WEIGHT: f64 = 0.2;
const RANDOM_EDGE_ATTEMPTS: usize = 200;
const RANDOM_EDGE_MAX_ABS: f64 = 0.05;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    ProgSelf,
    ProgMutual,
    ProgToLineage,
    LineageSelf,
    LineagePartner,
    LineageInhibit,
    LineageRepressProg,
    LineageToTarget,
    LineageToLigand,
    ProgToReceptor,
    Random,
}

/// Directed signed edge `source -> target`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source: usize,
    pub target: usize,
    pub weight: f64,
    pub kind: EdgeKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LigandReceptorPair {
    pub pair_id: usize,
    pub ligand: usize,
    pub receptor: usize,
    /// 0-based lineage block the pair signals to.
    pub lineage: usize,
}

/// Read-only network shared by all evaluations of a run.
#[derive(Clone, Debug)]
pub struct GrnTopology {
    groups: GeneGroups,
    edges: Vec<Edge>,
    pairs: Vec<LigandReceptorPair>,
    /// Incoming (source, weight) lists per target gene.
    incoming: Vec<Vec<(usize, f64)>>,
    morphogen_receptors: [Option<usize>; LINEAGE_COUNT],
}

/// Split `items` into `parts` contiguous chunks whose sizes differ by at most one,
/// larger chunks first.
fn array_split(items: &[usize], parts: usize) -> Vec<&[usize]> {
    let base = items.len() / parts;
    let extra = items.len() % parts;
    let mut out = Vec::with_capacity(parts);
    let mut start = 0;
    for i in 0..parts {
        let len = base + usize::from(i < extra);
        out.push(&items[start..start + len]);
        start += len;
    }
    out
}

impl GrnTopology {
    /// Build the standard topology. `rng` drives the progenitor mutual weights and
    /// the sparse random background edges.
    pub fn build<R: Rng + ?Sized>(groups: GeneGroups, rng: &mut R) -> Self {
        let mut edges = Vec::new();
        let mut add = |source: usize, target: usize, weight: f64, kind: EdgeKind| {
            edges.push(Edge {
                source,
                target,
                weight,
                kind,
            });
        };

        let prog = groups.members(GeneClass::Progenitor).to_vec();
        let lineage = groups.members(GeneClass::Lineage).to_vec();
        let ligands = groups.members(GeneClass::Ligand).to_vec();
        let receptors = groups.members(GeneClass::Receptor).to_vec();
        let targets = groups.members(GeneClass::Target).to_vec();

        for &i in &prog {
            add(i, i, PROG_SELF_WEIGHT, EdgeKind::ProgSelf);
            for &j in &prog {
                if i != j {
                    let w = PROG_MUTUAL_BASE + PROG_MUTUAL_SPREAD * rng.random::<f64>();
                    add(j, i, w, EdgeKind::ProgMutual);
                }
            }
        }

        for &lin in &lineage {
            for &p in &prog {
                add(p, lin, PROG_TO_LINEAGE_WEIGHT, EdgeKind::ProgToLineage);
            }
        }

        for block in 0..LINEAGE_COUNT {
            let tfs = groups.lineage_tfs(block);
            for &tf in tfs {
                add(tf, tf, LINEAGE_SELF_WEIGHT, EdgeKind::LineageSelf);
            }
            if let &[a, b] = tfs {
                add(a, b, LINEAGE_PARTNER_WEIGHT, EdgeKind::LineagePartner);
                add(b, a, LINEAGE_PARTNER_WEIGHT, EdgeKind::LineagePartner);
            }
            for &tf in tfs {
                for other in (0..LINEAGE_COUNT).filter(|&o| o != block) {
                    for &other_tf in groups.lineage_tfs(other) {
                        add(other_tf, tf, LINEAGE_INHIBIT_WEIGHT, EdgeKind::LineageInhibit);
                    }
                }
            }
            for &tf in tfs {
                for &p in &prog {
                    add(tf, p, LINEAGE_REPRESS_PROG_WEIGHT, EdgeKind::LineageRepressProg);
                }
            }
        }

        for (block, subset) in array_split(&targets, LINEAGE_COUNT).into_iter().enumerate() {
            for &tf in groups.lineage_tfs(block) {
                for &tgt in subset {
                    add(tf, tgt, LINEAGE_TO_TARGET_WEIGHT, EdgeKind::LineageToTarget);
                }
            }
        }

        for (block, subset) in array_split(&ligands, LINEAGE_COUNT).into_iter().enumerate() {
            for &tf in groups.lineage_tfs(block) {
                for &lig in subset {
                    add(tf, lig, LINEAGE_TO_LIGAND_WEIGHT, EdgeKind::LineageToLigand);
                }
            }
        }

        for &p in &prog {
            for &rec in &receptors {
                add(p, rec, PROG_TO_RECEPTOR_WEIGHT, EdgeKind::ProgToReceptor);
            }
        }

        // Housekeeping genes never receive regulatory input, so their steady state
        // stays at bias / decay.
        let n_genes = groups.gene_count();
        if n_genes > 1 {
            for _ in 0..RANDOM_EDGE_ATTEMPTS {
                let src = rng.random_range(0..n_genes);
                let dst = rng.random_range(0..n_genes);
                if src == dst || groups.class_of(dst) == Some(GeneClass::Housekeeping) {
                    continue;
                }
                let w = rng.random_range(-RANDOM_EDGE_MAX_ABS..RANDOM_EDGE_MAX_ABS);
                add(src, dst, w, EdgeKind::Random);
            }
        }

        let pairs: Vec<LigandReceptorPair> = ligands
            .iter()
            .zip(receptors.iter())
            .enumerate()
            .map(|(pair_id, (&ligand, &receptor))| LigandReceptorPair {
                pair_id,
                ligand,
                receptor,
                lineage: pair_id % LINEAGE_COUNT,
            })
            .collect();

        let mut morphogen_receptors = [None; LINEAGE_COUNT];
        for pair in &pairs {
            morphogen_receptors[pair.lineage].get_or_insert(pair.receptor);
        }

        let mut incoming = vec![Vec::new(); n_genes];
        for e in &edges {
            incoming[e.target].push((e.source, e.weight));
        }

        Self {
            groups,
            edges,
            pairs,
            incoming,
            morphogen_receptors,
        }
    }

    pub fn groups(&self) -> &GeneGroups {
        &self.groups
    }

    pub fn gene_count(&self) -> usize {
        self.groups.gene_count()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn ligand_receptor_pairs(&self) -> &[LigandReceptorPair] {
        &self.pairs
    }

    /// Receptor gating the morphogen channel of a 0-based lineage block.
    pub fn morphogen_receptor(&self, block: usize) -> Option<usize> {
        self.morphogen_receptors.get(block).copied().flatten()
    }

    /// Fold one parameter set into an immutable, simulation-ready network.
    pub fn compile(&self, params: &SimulationParams) -> CompiledNetwork {
        let g = &params.global;
        let n = self.gene_count();
        let mut bias = vec![0.0; n];
        let mut decay = vec![0.0; n];
        let mut initial = vec![0.0; n];
        for gene in 0..n {
            let (b, d, x0) = match self.groups.class_of(gene).unwrap_or(GeneClass::Other) {
                GeneClass::Progenitor => (PROG_BIAS, g.prog_decay, g.prog_init),
                GeneClass::Lineage => (g.lineage_bias, g.lineage_decay, g.lineage_init),
                GeneClass::Ligand => (g.ligand_bias, LIGAND_DECAY, LIGAND_INIT),
                GeneClass::Receptor => (g.receptor_bias, RECEPTOR_DECAY, RECEPTOR_INIT),
                GeneClass::Target => (g.target_bias, TARGET_DECAY, TARGET_INIT),
                GeneClass::Housekeeping => {
                    (HOUSEKEEPING_BIAS, HOUSEKEEPING_DECAY, HOUSEKEEPING_INIT)
                }
                GeneClass::Other => (OTHER_BIAS, OTHER_DECAY, OTHER_INIT),
            };
            bias[gene] = b;
            decay[gene] = d;
            initial[gene] = x0.clamp(0.0, MAX_EXPRESSION);
        }

        let rows = self
            .incoming
            .iter()
            .map(|row| {
                row.iter()
                    .map(|&(src, w)| (src, if w < 0.0 { w * g.inhibition_mult } else { w }))
                    .collect()
            })
            .collect();

        let knocked_out: Vec<bool> = (0..n).map(|gene| params.is_knocked_out(gene)).collect();
        let modifiers = (0..n).map(|gene| params.modifier(gene)).collect();

        let mut lineage_tfs = [[usize::MAX; 2]; LINEAGE_COUNT];
        let mut morphogen_gates = [None; LINEAGE_COUNT];
        for block in 0..LINEAGE_COUNT {
            if let &[a, b] = self.groups.lineage_tfs(block) {
                lineage_tfs[block] = [a, b];
            }
            let setting = params.morphogen(block);
            morphogen_gates[block] = self
                .morphogen_receptor(block)
                .filter(|_| setting.enabled)
                .filter(|&rec| !knocked_out[rec])
                .map(|rec| MorphogenGate {
                    receptor: rec,
                    strength: setting.effective_strength(),
                });
        }

        CompiledNetwork {
            rows,
            bias,
            decay,
            initial,
            knocked_out,
            modifiers,
            lineage_tfs,
            morphogen_gates,
            hill_n: g.hill_n,
            hill_k: g.hill_k,
            morphogen_time: g.morphogen_time,
            morphogen_strength: g.morphogen_strength,
        }
    }

    pub fn export(&self) -> NetworkExport {
        let name = |g: usize| self.groups.name(g).unwrap_or_default().to_string();
        NetworkExport {
            gene_names: self.groups.names().to_vec(),
            edges: self
                .edges
                .iter()
                .map(|e| EdgeExport {
                    source: name(e.source),
                    target: name(e.target),
                    weight: e.weight,
                    kind: e.kind,
                })
                .collect(),
            ligand_receptor_pairs: self.pairs.clone(),
        }
    }
}

/// Morphogen channel of one lineage: which receptor gates it and how strong it is.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MorphogenGate {
    pub receptor: usize,
    pub strength: f64,
}

/// Per-evaluation network with parameters folded in.
#[derive(Clone, Debug)]
pub struct CompiledNetwork {
    pub rows: Vec<Vec<(usize, f64)>>,
    pub bias: Vec<f64>,
    pub decay: Vec<f64>,
    pub initial: Vec<f64>,
    pub knocked_out: Vec<bool>,
    pub modifiers: Vec<f64>,
    pub lineage_tfs: [[usize; 2]; LINEAGE_COUNT],
    /// `None` when the lineage's morphogen is disabled or its receptor is knocked out.
    pub morphogen_gates: [Option<MorphogenGate>; LINEAGE_COUNT],
    pub hill_n: f64,
    pub hill_k: f64,
    pub morphogen_time: f64,
    pub morphogen_strength: f64,
}

impl CompiledNetwork {
    pub fn gene_count(&self) -> usize {
        self.bias.len()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EdgeExport {
    pub source: String,
    pub target: String,
    pub weight: f64,
    #[serde(rename = "type")]
    pub kind: EdgeKind,
}

/// JSON-friendly dump of the topology: gene names, labeled edges, ligand-receptor pairs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NetworkExport {
    pub gene_names: Vec<String>,
    pub edges: Vec<EdgeExport>,
    pub ligand_receptor_pairs: Vec<LigandReceptorPair>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::create_rng;

    fn topology() -> GrnTopology {
        GrnTopology::build(GeneGroups::standard(), &mut create_rng(0))
    }

    #[test]
    fn array_split_matches_numpy_chunking() {
        let items: Vec<usize> = (0..20).collect();
        let sizes: Vec<usize> = array_split(&items, 6).iter().map(|c| c.len()).collect();
        assert_eq!(sizes, vec![4, 4, 3, 3, 3, 3]);
    }

    #[test]
    fn housekeeping_genes_have_no_incoming_edges() {
        let topo = topology();
        for &hk in topo.groups().members(GeneClass::Housekeeping) {
            assert!(topo.incoming[hk].is_empty(), "gene {hk} has inputs");
        }
    }

    #[test]
    fn cross_lineage_inhibition_is_negative_and_complete() {
        let topo = topology();
        let inhibit = topo
            .edges()
            .iter()
            .filter(|e| e.kind == EdgeKind::LineageInhibit)
            .count();
        // 12 TFs each inhibited by the 10 TFs of the other five lineages.
        assert_eq!(inhibit, 120);
        assert!(topo
            .edges()
            .iter()
            .filter(|e| e.kind == EdgeKind::LineageInhibit)
            .all(|e| e.weight < 0.0));
    }

    #[test]
    fn same_seed_builds_identical_topology() {
        let a = topology();
        let b = topology();
        assert_eq!(a.edges(), b.edges());
    }

    #[test]
    fn every_lineage_has_a_morphogen_receptor() {
        let topo = topology();
        for block in 0..LINEAGE_COUNT {
            let rec = topo.morphogen_receptor(block).expect("receptor");
            assert_eq!(topo.groups().class_of(rec), Some(GeneClass::Receptor));
        }
    }

    #[test]
    fn compile_scales_only_inhibitory_edges() {
        let topo = topology();
        let mut params = SimulationParams::default();
        params.global.inhibition_mult = 2.0;
        let net = topo.compile(&params);
        let tf = topo.groups().lineage_tfs(0)[0];
        let base: f64 = topo.incoming[tf].iter().map(|&(_, w)| w.min(0.0)).sum();
        let scaled: f64 = net.rows[tf].iter().map(|&(_, w)| w.min(0.0)).sum();
        assert!((scaled - 2.0 * base).abs() < 1e-12);
        let pos_base: f64 = topo.incoming[tf].iter().map(|&(_, w)| w.max(0.0)).sum();
        let pos_scaled: f64 = net.rows[tf].iter().map(|&(_, w)| w.max(0.0)).sum();
        assert!((pos_scaled - pos_base).abs() < 1e-12);
    }

    #[test]
    fn knocked_out_receptor_closes_morphogen_gate() {
        let topo = topology();
        let mut params = SimulationParams::default();
        let rec = topo.morphogen_receptor(2).expect("receptor");
        params.knockouts.insert(rec);
        params.morphogens[4].enabled = false;
        let net = topo.compile(&params);
        assert!(net.morphogen_gates[2].is_none());
        assert!(net.morphogen_gates[4].is_none());
        assert!(net.morphogen_gates[0].is_some());
    }

    #[test]
    fn export_labels_edges_by_gene_name() {
        let export = topology().export();
        assert_eq!(export.gene_names.len(), 200);
        let json = serde_json::to_string(&export).expect("serialize");
        assert!(json.contains("\"type\":\"prog_self\""));
        assert!(json.contains("TF_PROG_1"));
    }
}
