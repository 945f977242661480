use std::fs;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rusqlite::{params, Connection};

use crate::data::handle::{IDS_FILE_NAME, ORIGINS_FILE_NAME};
use crate::data::meta::COMPRESSION_ZSTD;
use crate::data::utility::{build_block, build_id_payload, build_origin_payload};

/// In-memory description of one subhalo's particle history. Written out
/// verbatim: no consistency checks are applied, so tests can produce
/// deliberately inconsistent stores.
#[derive(Debug, Clone, Default)]
pub struct SyntheticSubhalo {
    pub particle_ids: Vec<u64>,
    pub birth_snap_nums: Vec<i64>,
    pub birth_subfind_ids: Vec<i64>,
    pub birth_group_ids: Vec<i64>,
    /// written as `-1` sentinels in the offset table
    pub absent: bool,
}

/// In-memory description of one merger-tree node.
#[derive(Debug, Clone)]
pub struct SyntheticTreeNode {
    pub subhalo_id: i64,
    pub next_progenitor_id: i64,
    pub main_leaf_progenitor_id: i64,
    pub first_progenitor_id: i64,
    pub last_progenitor_id: i64,
    pub subhalo_mass_type: [f64; 6],
    pub snap_num: i64,
    pub subfind_id: i64,
    pub first_subhalo_in_fof_group_id: i64,
    pub subhalo_gr_nr: i64,
    pub subhalo_pos: [f64; 3],
    pub group_r200: f64,
}

/// Writes complete stellar-assembly dataset directories from in-memory
/// descriptions: the SQLite metadata and offset tables, the two binary
/// block files, and the merger-tree table.
#[derive(Debug)]
pub struct SyntheticAssemblyHandle {
    pub data_path: PathBuf,
    pub simulation_name: String,
    pub snap_num: i64,
    pub compression_type: i64,
    pub compression_level: i32,
}

impl SyntheticAssemblyHandle {
    pub fn new(data_path: &Path, simulation_name: &str, snap_num: i64, compression_type: i64) -> Self {
        SyntheticAssemblyHandle {
            data_path: data_path.to_path_buf(),
            simulation_name: simulation_name.to_string(),
            snap_num,
            compression_type,
            compression_level: 3,
        }
    }

    pub fn write_dataset(
        &self,
        subhalos: &[SyntheticSubhalo],
        tree_nodes: &[SyntheticTreeNode],
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        fs::create_dir_all(&self.data_path)?;
        self.write_binary_files(subhalos)?;
        self.write_tree_table(tree_nodes)?;
        Ok(())
    }

    fn write_binary_files(
        &self,
        subhalos: &[SyntheticSubhalo],
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut id_file = File::create(self.data_path.join(IDS_FILE_NAME))?;
        let mut origin_file = File::create(self.data_path.join(ORIGINS_FILE_NAME))?;

        let mut offset_rows: Vec<(i64, i64, i64, i64)> = Vec::with_capacity(subhalos.len());
        let mut id_pos: u64 = 0;
        let mut origin_pos: u64 = 0;

        for (subfind_id, subhalo) in subhalos.iter().enumerate() {
            if subhalo.absent {
                offset_rows.push((subfind_id as i64, -1, -1, -1));
                continue;
            }

            let id_block = build_block(
                &build_id_payload(&subhalo.particle_ids),
                subhalo.particle_ids.len() as u32,
                self.compression_type,
                self.compression_level,
            )?;
            id_file.write_all(&id_block)?;

            let origin_block = build_block(
                &build_origin_payload(
                    &subhalo.birth_snap_nums,
                    &subhalo.birth_subfind_ids,
                    &subhalo.birth_group_ids,
                ),
                subhalo.birth_snap_nums.len() as u32,
                self.compression_type,
                self.compression_level,
            )?;
            origin_file.write_all(&origin_block)?;

            offset_rows.push((
                subfind_id as i64,
                id_pos as i64,
                origin_pos as i64,
                subhalo.particle_ids.len() as i64,
            ));
            id_pos += id_block.len() as u64;
            origin_pos += origin_block.len() as u64;
        }

        // write the metadata and offset tables
        let conn = Connection::open(self.data_path.join("assembly.db"))?;
        conn.execute_batch(
            "DROP TABLE IF EXISTS GlobalMetadata;
             CREATE TABLE GlobalMetadata (Key TEXT, Value TEXT);
             DROP TABLE IF EXISTS Subhalos;
             CREATE TABLE Subhalos (
                 SubfindID INTEGER PRIMARY KEY,
                 IdOffset INTEGER,
                 OriginOffset INTEGER,
                 NumParticles INTEGER
             );",
        )?;

        let meta_rows = [
            ("SchemaVersion", "1".to_string()),
            ("SimulationName", self.simulation_name.clone()),
            ("SnapNum", self.snap_num.to_string()),
            ("CompressionType", self.compression_type.to_string()),
            ("SubhaloCount", subhalos.len().to_string()),
        ];
        for (key, value) in meta_rows {
            conn.execute(
                "INSERT INTO GlobalMetadata (Key, Value) VALUES (?1, ?2)",
                params![key, value],
            )?;
        }

        for (subfind_id, id_offset, origin_offset, num_particles) in offset_rows {
            conn.execute(
                "INSERT INTO Subhalos (SubfindID, IdOffset, OriginOffset, NumParticles) VALUES (?1, ?2, ?3, ?4)",
                params![subfind_id, id_offset, origin_offset, num_particles],
            )?;
        }

        Ok(())
    }

    fn write_tree_table(
        &self,
        tree_nodes: &[SyntheticTreeNode],
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let conn = Connection::open(self.data_path.join("sublink.db"))?;
        conn.execute_batch(
            "DROP TABLE IF EXISTS TreeNodes;
             CREATE TABLE TreeNodes (
                 SubhaloID INTEGER PRIMARY KEY,
                 NextProgenitorID INTEGER,
                 MainLeafProgenitorID INTEGER,
                 FirstProgenitorID INTEGER,
                 LastProgenitorID INTEGER,
                 SubhaloMassType TEXT,
                 SnapNum INTEGER,
                 SubfindID INTEGER,
                 FirstSubhaloInFOFGroupID INTEGER,
                 SubhaloGrNr INTEGER,
                 SubhaloPos TEXT,
                 GroupR200 REAL
             );",
        )?;

        for node in tree_nodes {
            conn.execute(
                "INSERT INTO TreeNodes (
                     SubhaloID, NextProgenitorID, MainLeafProgenitorID, FirstProgenitorID,
                     LastProgenitorID, SubhaloMassType, SnapNum, SubfindID,
                     FirstSubhaloInFOFGroupID, SubhaloGrNr, SubhaloPos, GroupR200
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    node.subhalo_id,
                    node.next_progenitor_id,
                    node.main_leaf_progenitor_id,
                    node.first_progenitor_id,
                    node.last_progenitor_id,
                    serde_json::to_string(&node.subhalo_mass_type)?,
                    node.snap_num,
                    node.subfind_id,
                    node.first_subhalo_in_fof_group_id,
                    node.subhalo_gr_nr,
                    serde_json::to_string(&node.subhalo_pos)?,
                    node.group_r200,
                ],
            )?;
        }

        Ok(())
    }
}

/// Write a small self-consistent demo dataset: one galaxy with a six-node
/// merger tree (a four-node main branch plus one FOF and one EXT
/// progenitor) and `n_particles` star particles with randomised ids and
/// birth sites spread over the tree, a few of them born outside every
/// tracked branch. Returns the subfind id of the demo galaxy.
pub fn generate_demo_dataset(
    data_path: &Path,
    n_particles: usize,
    seed: u64,
) -> Result<i64, Box<dyn std::error::Error + Send + Sync>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let snap_num = 99;

    let node = |subhalo_id, next, main_leaf, first, last, snap, subfind, fof_ptr, gr_nr, rng: &mut StdRng| {
        SyntheticTreeNode {
            subhalo_id,
            next_progenitor_id: next,
            main_leaf_progenitor_id: main_leaf,
            first_progenitor_id: first,
            last_progenitor_id: last,
            subhalo_mass_type: [0.0, 10.0_f64.powf(rng.gen_range(8.0..11.0)), 0.0, 0.0, 1e9, 0.0],
            snap_num: snap,
            subfind_id: subfind,
            first_subhalo_in_fof_group_id: fof_ptr,
            subhalo_gr_nr: gr_nr,
            subhalo_pos: [
                rng.gen_range(0.0..75000.0),
                rng.gen_range(0.0..75000.0),
                rng.gen_range(0.0..75000.0),
            ],
            group_r200: rng.gen_range(100.0..500.0),
        }
    };

    let tree_nodes = vec![
        node(5, -1, 8, 6, 13, 99, 0, 5, 0, &mut rng),
        node(6, 12, 8, 7, 8, 98, 1, 6, 0, &mut rng),
        node(7, -1, 8, 8, 8, 97, 2, 7, 0, &mut rng),
        node(8, -1, 8, -1, 8, 96, 3, 8, 0, &mut rng),
        node(12, 13, 12, -1, 12, 98, 40, 6, 0, &mut rng),
        node(13, -1, 13, -1, 13, 98, 41, 2, 7, &mut rng),
    ];

    // birth sites: the tree nodes plus one pair outside every branch
    let birth_sites: Vec<(i64, i64)> = tree_nodes
        .iter()
        .map(|n| (n.snap_num, n.subfind_id))
        .chain(std::iter::once((42, 1234)))
        .collect();

    let mut galaxy = SyntheticSubhalo::default();
    for _ in 0..n_particles {
        let (birth_snap, birth_subfind) = birth_sites[rng.gen_range(0..birth_sites.len())];
        galaxy.particle_ids.push(rng.gen::<u64>());
        galaxy.birth_snap_nums.push(birth_snap);
        galaxy.birth_subfind_ids.push(birth_subfind);
        galaxy.birth_group_ids.push(if birth_subfind == 41 { 7 } else { 0 });
    }

    let subhalos = vec![
        galaxy,
        SyntheticSubhalo {
            absent: true,
            ..SyntheticSubhalo::default()
        },
    ];

    let handle = SyntheticAssemblyHandle::new(data_path, "TNG-demo", snap_num, COMPRESSION_ZSTD);
    handle.write_dataset(&subhalos, &tree_nodes)?;

    Ok(0)
}
