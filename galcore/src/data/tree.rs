use serde::{Deserialize, Serialize};

use crate::error::ProvenanceError;

/// Sentinel used by tree pointer fields to mean "no such node".
pub const NO_POINTER: i64 = -1;

/// A full merger tree rooted at a queried subhalo, stored as equal-length
/// parallel arrays indexed by tree-node position. Node 0 is the queried root.
///
/// `subhalo_id` is globally unique and depth-first ordered: the entire
/// progenitor sub-tree of a node occupies the contiguous `subhalo_id` range
/// up to that node's `last_progenitor_id`, and the main-progenitor branch
/// the range up to its `main_leaf_progenitor_id`. Branch membership is
/// therefore decidable by numeric comparison instead of graph traversal,
/// which is why `validate` insists on the ordering.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MergerTree {
    pub subhalo_id: Vec<i64>,
    pub next_progenitor_id: Vec<i64>,
    pub main_leaf_progenitor_id: Vec<i64>,
    pub first_progenitor_id: Vec<i64>,
    pub last_progenitor_id: Vec<i64>,
    pub subhalo_mass_type: Vec<[f64; 6]>,
    pub snap_num: Vec<i64>,
    pub subfind_id: Vec<i64>,
    pub first_subhalo_in_fof_group_id: Vec<i64>,
    pub subhalo_gr_nr: Vec<i64>,
    pub subhalo_pos: Vec<[f64; 3]>,
    pub group_r200: Vec<f64>,
}

impl MergerTree {
    pub fn len(&self) -> usize {
        self.subhalo_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subhalo_id.is_empty()
    }

    /// Check the structural invariants the branch partition relies on.
    ///
    /// A corrupted tree that silently produced wrong main-branch boundaries
    /// would mis-tag every particle, so the ordering is checked explicitly
    /// on every load instead of being assumed.
    ///
    /// # Returns
    ///
    /// * `Ok(())` if all columns have equal length, `subhalo_id` is strictly
    ///   increasing, and the root pointers satisfy
    ///   `subhalo_id[0] <= main_leaf_progenitor_id[0] <= last_progenitor_id[0]`
    /// * `ProvenanceError::MalformedTree` otherwise
    ///
    pub fn validate(&self) -> Result<(), ProvenanceError> {
        let n = self.subhalo_id.len();

        let columns = [
            ("NextProgenitorID", self.next_progenitor_id.len()),
            ("MainLeafProgenitorID", self.main_leaf_progenitor_id.len()),
            ("FirstProgenitorID", self.first_progenitor_id.len()),
            ("LastProgenitorID", self.last_progenitor_id.len()),
            ("SubhaloMassType", self.subhalo_mass_type.len()),
            ("SnapNum", self.snap_num.len()),
            ("SubfindID", self.subfind_id.len()),
            (
                "FirstSubhaloInFOFGroupID",
                self.first_subhalo_in_fof_group_id.len(),
            ),
            ("SubhaloGrNr", self.subhalo_gr_nr.len()),
            ("SubhaloPos", self.subhalo_pos.len()),
            ("GroupR200", self.group_r200.len()),
        ];

        for (name, len) in columns {
            if len != n {
                return Err(ProvenanceError::MalformedTree {
                    reason: format!("column {} has {} entries, expected {}", name, len, n),
                });
            }
        }

        if n == 0 {
            return Ok(());
        }

        for window in self.subhalo_id.windows(2) {
            if window[1] <= window[0] {
                return Err(ProvenanceError::MalformedTree {
                    reason: format!(
                        "subhalo ids not strictly increasing: {} followed by {}",
                        window[0], window[1]
                    ),
                });
            }
        }

        let root = self.subhalo_id[0];
        let main_leaf = self.main_leaf_progenitor_id[0];
        let last = self.last_progenitor_id[0];
        if root > main_leaf || main_leaf > last {
            return Err(ProvenanceError::MalformedTree {
                reason: format!(
                    "root pointers out of order: SubhaloID={}, MainLeafProgenitorID={}, LastProgenitorID={}",
                    root, main_leaf, last
                ),
            });
        }

        Ok(())
    }
}

/// Read-only access to a merger-tree store.
///
/// Implementations return the full progenitor tree rooted at the subhalo
/// identified by `(snap_num, subfind_id)`, never a main-branch-only cut.
pub trait TreeSource {
    fn load_tree(&self, snap_num: i64, subfind_id: i64) -> Result<MergerTree, ProvenanceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_node_tree() -> MergerTree {
        MergerTree {
            subhalo_id: vec![10, 11],
            next_progenitor_id: vec![NO_POINTER, NO_POINTER],
            main_leaf_progenitor_id: vec![11, 11],
            first_progenitor_id: vec![11, NO_POINTER],
            last_progenitor_id: vec![11, 11],
            subhalo_mass_type: vec![[0.0; 6]; 2],
            snap_num: vec![99, 98],
            subfind_id: vec![7, 3],
            first_subhalo_in_fof_group_id: vec![10, 11],
            subhalo_gr_nr: vec![0, 0],
            subhalo_pos: vec![[0.0; 3]; 2],
            group_r200: vec![200.0, 180.0],
        }
    }

    #[test]
    fn test_validate_accepts_well_formed_tree() {
        assert!(two_node_tree().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_column_length_mismatch() {
        let mut tree = two_node_tree();
        tree.snap_num.pop();
        let err = tree.validate().unwrap_err();
        assert!(matches!(err, ProvenanceError::MalformedTree { .. }));
    }

    #[test]
    fn test_validate_rejects_unsorted_subhalo_ids() {
        let mut tree = two_node_tree();
        tree.subhalo_id = vec![11, 10];
        let err = tree.validate().unwrap_err();
        assert!(matches!(err, ProvenanceError::MalformedTree { .. }));
    }

    #[test]
    fn test_validate_rejects_root_pointer_disorder() {
        let mut tree = two_node_tree();
        tree.main_leaf_progenitor_id[0] = 9;
        let err = tree.validate().unwrap_err();
        assert!(matches!(err, ProvenanceError::MalformedTree { .. }));
    }

    #[test]
    fn test_validate_accepts_empty_tree() {
        assert!(MergerTree::default().validate().is_ok());
    }
}
