use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};

use galcore::data::tree::{MergerTree, TreeSource};
use galcore::error::ProvenanceError;

pub const TREE_FILE_NAME: &str = "sublink.db";

#[derive(Debug, Clone)]
struct TreeNodeRow {
    subhalo_id: i64,
    next_progenitor_id: i64,
    main_leaf_progenitor_id: i64,
    first_progenitor_id: i64,
    last_progenitor_id: i64,
    subhalo_mass_type: String,
    snap_num: i64,
    subfind_id: i64,
    first_subhalo_in_fof_group_id: i64,
    subhalo_gr_nr: i64,
    subhalo_pos: String,
    group_r200: f64,
}

/// Handle on a merger-tree store.
///
/// Tree nodes live in one `TreeNodes` table keyed by the depth-first
/// ordered `SubhaloID`, so the full progenitor tree of any subhalo is the
/// contiguous id range from its own node to its `LastProgenitorID` and
/// comes back in depth-first order straight from the primary-key index.
pub struct SublinkTreeHandle {
    pub data_path: String,
    connection: Connection,
}

impl SublinkTreeHandle {
    pub fn new(data_path: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        // Connect to the database
        let db_path = Path::new(data_path).join(TREE_FILE_NAME);
        let connection = Connection::open(db_path)?;

        Ok(SublinkTreeHandle {
            data_path: data_path.to_string(),
            connection,
        })
    }

    fn query_root(
        &self,
        snap_num: i64,
        subfind_id: i64,
    ) -> Result<Option<(i64, i64)>, rusqlite::Error> {
        self.connection
            .query_row(
                "SELECT SubhaloID, LastProgenitorID FROM TreeNodes WHERE SnapNum = ?1 AND SubfindID = ?2",
                params![snap_num, subfind_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
    }

    fn query_subtree(
        &self,
        root_id: i64,
        last_progenitor_id: i64,
    ) -> Result<MergerTree, Box<dyn std::error::Error + Send + Sync>> {
        // prepare the query
        let rows: Vec<&str> = vec![
            "SubhaloID",
            "NextProgenitorID",
            "MainLeafProgenitorID",
            "FirstProgenitorID",
            "LastProgenitorID",
            "SubhaloMassType",
            "SnapNum",
            "SubfindID",
            "FirstSubhaloInFOFGroupID",
            "SubhaloGrNr",
            "SubhaloPos",
            "GroupR200",
        ];
        let query = format!(
            "SELECT {} FROM TreeNodes WHERE SubhaloID BETWEEN ?1 AND ?2 ORDER BY SubhaloID",
            rows.join(", ")
        );

        // execute the query
        let node_rows: Result<Vec<TreeNodeRow>, _> = self
            .connection
            .prepare(&query)?
            .query_map(params![root_id, last_progenitor_id], |row| {
                Ok(TreeNodeRow {
                    subhalo_id: row.get(0)?,
                    next_progenitor_id: row.get(1)?,
                    main_leaf_progenitor_id: row.get(2)?,
                    first_progenitor_id: row.get(3)?,
                    last_progenitor_id: row.get(4)?,
                    subhalo_mass_type: row.get(5)?,
                    snap_num: row.get(6)?,
                    subfind_id: row.get(7)?,
                    first_subhalo_in_fof_group_id: row.get(8)?,
                    subhalo_gr_nr: row.get(9)?,
                    subhalo_pos: row.get(10)?,
                    group_r200: row.get(11)?,
                })
            })?
            .collect();

        // fold the rows into the parallel-array tree, decoding the
        // JSON-encoded vector columns
        let mut tree = MergerTree::default();
        for row in node_rows? {
            tree.subhalo_id.push(row.subhalo_id);
            tree.next_progenitor_id.push(row.next_progenitor_id);
            tree.main_leaf_progenitor_id.push(row.main_leaf_progenitor_id);
            tree.first_progenitor_id.push(row.first_progenitor_id);
            tree.last_progenitor_id.push(row.last_progenitor_id);
            tree.subhalo_mass_type
                .push(serde_json::from_str(&row.subhalo_mass_type)?);
            tree.snap_num.push(row.snap_num);
            tree.subfind_id.push(row.subfind_id);
            tree.first_subhalo_in_fof_group_id
                .push(row.first_subhalo_in_fof_group_id);
            tree.subhalo_gr_nr.push(row.subhalo_gr_nr);
            tree.subhalo_pos.push(serde_json::from_str(&row.subhalo_pos)?);
            tree.group_r200.push(row.group_r200);
        }

        Ok(tree)
    }
}

impl TreeSource for SublinkTreeHandle {
    /// Load the full merger tree rooted at `(snap_num, subfind_id)`,
    /// validated against the depth-first ordering invariant.
    fn load_tree(&self, snap_num: i64, subfind_id: i64) -> Result<MergerTree, ProvenanceError> {
        let root = self
            .query_root(snap_num, subfind_id)
            .map_err(ProvenanceError::from_source)?;

        let (root_id, last_progenitor_id) = match root {
            Some(pointers) => pointers,
            None => return Err(ProvenanceError::DataNotFound { subfind_id }),
        };

        let tree = self.query_subtree(root_id, last_progenitor_id)?;
        if tree.is_empty() {
            return Err(ProvenanceError::EmptyTree {
                snap_num,
                subfind_id,
            });
        }
        tree.validate()?;

        Ok(tree)
    }
}
