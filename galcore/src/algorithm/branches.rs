use std::collections::HashMap;

use itertools::Itertools;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::data::tree::MergerTree;

/// A disjoint three-way split of tree-node indices by birth-place zone:
///
/// * `mpb` - the main progenitor branch, the contiguous sub-tree tracing the
///   galaxy's primary lineage
/// * `fof` - progenitors off the main branch that sat in the main
///   progenitor's FOF group at their snapshot
/// * `ext` - progenitors outside that group entirely
///
/// The union may be a strict subset of all tree nodes; anything left out is
/// simply never matched by the classifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchPartition {
    pub mpb: Vec<usize>,
    pub fof: Vec<usize>,
    pub ext: Vec<usize>,
}

/// Partition the nodes of a merger tree into the three birth-place zones.
///
/// The main branch is cut out by comparing every node's `subhalo_id` against
/// the root's `main_leaf_progenitor_id`; the depth-first ordering guarantees
/// the main-progenitor sub-tree is exactly that contiguous id range. The
/// remaining progenitor nodes are then split per snapshot: a node whose
/// `first_subhalo_in_fof_group_id` points at the main-branch node of its own
/// snapshot shared that node's FOF group, everything else is external.
///
/// Snapshots with no main-branch node (possible when the tree service prunes
/// branches) and snapshots with an ill-formed duplicate main-branch node
/// contribute their off-branch nodes to `ext`.
pub fn partition_branches(tree: &MergerTree) -> BranchPartition {
    if tree.is_empty() {
        return BranchPartition::default();
    }

    let main_leaf = tree.main_leaf_progenitor_id[0];
    let (mpb, epb): (Vec<usize>, Vec<usize>) =
        (0..tree.len()).partition(|&i| tree.subhalo_id[i] <= main_leaf);

    // group anchor per snapshot: the subhalo id of the single main-branch
    // node at that snapshot, or None when the snapshot has no usable anchor
    let mut anchors: HashMap<i64, Option<i64>> = HashMap::new();
    for &i in &mpb {
        anchors
            .entry(tree.snap_num[i])
            .and_modify(|anchor| *anchor = None)
            .or_insert(Some(tree.subhalo_id[i]));
    }

    if let Some((first, last)) = mpb
        .iter()
        .map(|&i| tree.snap_num[i])
        .minmax()
        .into_option()
    {
        debug!(
            "main branch: {} nodes spanning snapshots {}..={}, {} off-branch nodes",
            mpb.len(),
            first,
            last,
            epb.len()
        );
    }

    let mut fof = Vec::new();
    let mut ext = Vec::new();
    for i in epb {
        match anchors.get(&tree.snap_num[i]) {
            Some(Some(anchor)) if tree.first_subhalo_in_fof_group_id[i] == *anchor => fof.push(i),
            _ => ext.push(i),
        }
    }

    BranchPartition { mpb, fof, ext }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::tree::NO_POINTER;

    /// Six-node tree: root `subhalo_id=5` with main branch 5..=8 across
    /// snapshots 99 down to 96, plus two off-branch nodes at snapshot 98,
    /// one inside the main progenitor's FOF group and one outside.
    fn scenario_tree() -> MergerTree {
        MergerTree {
            subhalo_id: vec![5, 6, 7, 8, 12, 13],
            next_progenitor_id: vec![NO_POINTER, 12, NO_POINTER, NO_POINTER, 13, NO_POINTER],
            main_leaf_progenitor_id: vec![8, 8, 8, 8, 12, 13],
            first_progenitor_id: vec![6, 7, 8, NO_POINTER, NO_POINTER, NO_POINTER],
            last_progenitor_id: vec![13, 8, 8, 8, 12, 13],
            subhalo_mass_type: vec![[1.0; 6]; 6],
            snap_num: vec![99, 98, 97, 96, 98, 98],
            subfind_id: vec![0, 1, 2, 3, 40, 41],
            first_subhalo_in_fof_group_id: vec![5, 6, 7, 8, 6, 2],
            subhalo_gr_nr: vec![0, 0, 0, 0, 0, 7],
            subhalo_pos: vec![[0.0; 3]; 6],
            group_r200: vec![210.0; 6],
        }
    }

    #[test]
    fn test_scenario_partition() {
        let tree = scenario_tree();
        tree.validate().unwrap();
        let partition = partition_branches(&tree);

        assert_eq!(partition.mpb, vec![0, 1, 2, 3]);
        assert_eq!(partition.fof, vec![4]);
        assert_eq!(partition.ext, vec![5]);
    }

    #[test]
    fn test_branches_are_disjoint_and_cover_the_tree() {
        let tree = scenario_tree();
        let partition = partition_branches(&tree);

        let mut all: Vec<usize> = partition
            .mpb
            .iter()
            .chain(&partition.fof)
            .chain(&partition.ext)
            .copied()
            .collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), partition.mpb.len() + partition.fof.len() + partition.ext.len());
        assert_eq!(all, (0..tree.len()).collect::<Vec<_>>());
    }

    #[test]
    fn test_missing_anchor_snapshot_defaults_to_ext() {
        let mut tree = scenario_tree();
        // move the off-branch FOF node to a snapshot the main branch never covers
        tree.snap_num[4] = 50;
        let partition = partition_branches(&tree);

        assert!(partition.fof.is_empty());
        assert_eq!(partition.ext, vec![4, 5]);
    }

    #[test]
    fn test_duplicate_anchor_snapshot_defaults_to_ext() {
        let mut tree = scenario_tree();
        // two main-branch nodes at snapshot 98: no usable anchor there
        tree.snap_num[2] = 98;
        let partition = partition_branches(&tree);

        assert!(partition.fof.is_empty());
        assert_eq!(partition.ext, vec![4, 5]);
    }

    #[test]
    fn test_empty_tree_yields_empty_partition() {
        let partition = partition_branches(&MergerTree::default());
        assert_eq!(partition, BranchPartition::default());
    }

    #[test]
    fn test_single_node_tree_is_all_mpb() {
        let tree = MergerTree {
            subhalo_id: vec![42],
            next_progenitor_id: vec![NO_POINTER],
            main_leaf_progenitor_id: vec![42],
            first_progenitor_id: vec![NO_POINTER],
            last_progenitor_id: vec![42],
            subhalo_mass_type: vec![[0.5; 6]],
            snap_num: vec![99],
            subfind_id: vec![17],
            first_subhalo_in_fof_group_id: vec![42],
            subhalo_gr_nr: vec![3],
            subhalo_pos: vec![[1.0, 2.0, 3.0]],
            group_r200: vec![150.0],
        };
        let partition = partition_branches(&tree);
        assert_eq!(partition.mpb, vec![0]);
        assert!(partition.fof.is_empty());
        assert!(partition.ext.is_empty());
    }
}
