//! Static gene list and its partition into semantic classes.
//!
//! Gene names follow a prefix convention (`TF_PROG_`, `TF_LIN`, `LIG_`, `REC_`,
//! `TARG_`, `HK_`, `OTHER_`); the class of every gene is derived once from it.

use crate::constants::{LINEAGE_COUNT, LINEAGE_TFS_PER};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeneClass {
    Progenitor,
    Lineage,
    Ligand,
    Receptor,
    Target,
    Housekeeping,
    Other,
}

impl GeneClass {
    pub const ALL: [GeneClass; 7] = [
        GeneClass::Progenitor,
        GeneClass::Lineage,
        GeneClass::Ligand,
        GeneClass::Receptor,
        GeneClass::Target,
        GeneClass::Housekeeping,
        GeneClass::Other,
    ];

    /// Classify a gene by its name prefix. Unknown prefixes fall into `Other`.
    pub fn from_name(name: &str) -> Self {
        // `TF_PROG_` must be tested before the shorter lineage prefix.
        if name.starts_with("TF_PROG_") {
            GeneClass::Progenitor
        } else if name.starts_with("TF_LIN") {
            GeneClass::Lineage
        } else if name.starts_with("LIG_") {
            GeneClass::Ligand
        } else if name.starts_with("REC_") {
            GeneClass::Receptor
        } else if name.starts_with("TARG_") {
            GeneClass::Target
        } else if name.starts_with("HK_") {
            GeneClass::Housekeeping
        } else {
            GeneClass::Other
        }
    }

    fn slot(self) -> usize {
        match self {
            GeneClass::Progenitor => 0,
            GeneClass::Lineage => 1,
            GeneClass::Ligand => 2,
            GeneClass::Receptor => 3,
            GeneClass::Target => 4,
            GeneClass::Housekeeping => 5,
            GeneClass::Other => 6,
        }
    }
}

/// (prefix, count) blocks making up the standard gene list, in index order.
const GENE_BLOCKS: [(&str, usize); 7] = [
    ("TF_PROG_", 4),
    ("TF_LIN", LINEAGE_COUNT * LINEAGE_TFS_PER),
    ("LIG_", 20),
    ("REC_", 20),
    ("TARG_", 80),
    ("HK_", 50),
    ("OTHER_", 14),
];

pub const STANDARD_GENE_COUNT: usize = {
    let mut total = 0;
    let mut i = 0;
    while i < GENE_BLOCKS.len() {
        total += GENE_BLOCKS[i].1;
        i += 1;
    }
    total
};

/// The standard 200-gene list.
pub fn standard_gene_names() -> Vec<String> {
    GENE_BLOCKS
        .iter()
        .flat_map(|&(prefix, count)| (1..=count).map(move |i| format!("{prefix}{i}")))
        .collect()
}

/// Disjoint partition of gene indices into classes. Immutable after construction.
#[derive(Clone, Debug, PartialEq)]
pub struct GeneGroups {
    names: Vec<String>,
    classes: Vec<GeneClass>,
    members: [Vec<usize>; 7],
}

impl GeneGroups {
    pub fn from_names(names: Vec<String>) -> Self {
        let classes: Vec<GeneClass> = names.iter().map(|n| GeneClass::from_name(n)).collect();
        let mut members: [Vec<usize>; 7] = Default::default();
        for (idx, class) in classes.iter().enumerate() {
            members[class.slot()].push(idx);
        }
        Self {
            names,
            classes,
            members,
        }
    }

    pub fn standard() -> Self {
        Self::from_names(standard_gene_names())
    }

    pub fn gene_count(&self) -> usize {
        self.names.len()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn name(&self, gene: usize) -> Option<&str> {
        self.names.get(gene).map(String::as_str)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn class_of(&self, gene: usize) -> Option<GeneClass> {
        self.classes.get(gene).copied()
    }

    pub fn members(&self, class: GeneClass) -> &[usize] {
        &self.members[class.slot()]
    }

    /// Lineage TFs owned by a 0-based lineage block. Empty if the block is out of range
    /// or the gene list does not carry enough lineage TFs.
    pub fn lineage_tfs(&self, block: usize) -> &[usize] {
        let lineage = self.members(GeneClass::Lineage);
        let start = block * LINEAGE_TFS_PER;
        let end = start + LINEAGE_TFS_PER;
        if end > lineage.len() {
            return &[];
        }
        &lineage[start..end]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_list_has_expected_class_sizes() {
        let groups = GeneGroups::standard();
        assert_eq!(groups.gene_count(), 200);
        assert_eq!(STANDARD_GENE_COUNT, 200);
        assert_eq!(groups.members(GeneClass::Progenitor).len(), 4);
        assert_eq!(groups.members(GeneClass::Lineage).len(), 12);
        assert_eq!(groups.members(GeneClass::Ligand).len(), 20);
        assert_eq!(groups.members(GeneClass::Receptor).len(), 20);
        assert_eq!(groups.members(GeneClass::Target).len(), 80);
        assert_eq!(groups.members(GeneClass::Housekeeping).len(), 50);
        assert_eq!(groups.members(GeneClass::Other).len(), 14);
    }

    #[test]
    fn partition_is_disjoint_and_complete() {
        let groups = GeneGroups::standard();
        let mut seen = vec![false; groups.gene_count()];
        for class in GeneClass::ALL {
            for &g in groups.members(class) {
                assert!(!seen[g], "gene {g} assigned twice");
                seen[g] = true;
            }
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn progenitor_prefix_is_not_mistaken_for_lineage() {
        assert_eq!(GeneClass::from_name("TF_PROG_3"), GeneClass::Progenitor);
        assert_eq!(GeneClass::from_name("TF_LIN11"), GeneClass::Lineage);
        assert_eq!(GeneClass::from_name("MYSTERY"), GeneClass::Other);
    }

    #[test]
    fn lineage_blocks_map_to_consecutive_tf_pairs() {
        let groups = GeneGroups::standard();
        let first = groups.lineage_tfs(0);
        assert_eq!(groups.name(first[0]), Some("TF_LIN1"));
        assert_eq!(groups.name(first[1]), Some("TF_LIN2"));
        let last = groups.lineage_tfs(5);
        assert_eq!(groups.name(last[1]), Some("TF_LIN12"));
        assert!(groups.lineage_tfs(6).is_empty());
        assert_eq!(groups.index_of("TF_LIN12"), Some(last[1]));
        assert_eq!(groups.index_of("NOPE"), None);
    }
}
