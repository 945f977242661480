extern crate rusqlite;

use rusqlite::{Connection, Result};
use std::path::Path;

/// Compression scheme of the binary block files, as recorded in the
/// dataset's global metadata. Raw little-endian arrays or zstd frames.
pub const COMPRESSION_NONE: i64 = 0;
pub const COMPRESSION_ZSTD: i64 = 2;

#[derive(Debug, Clone)]
pub struct GlobalAssemblyMetadata {
    pub schema_version: i64,
    pub simulation_name: String,
    pub snap_num: i64,
    pub compression_type: i64,
    pub subhalo_count: i64,
}

/// One row of the per-subhalo offset table: byte offsets of the subhalo's
/// blocks in the two binary files, and its member-particle count. `-1` in
/// any of the three fields marks an absent subhalo.
#[derive(Debug, Clone)]
pub struct SubhaloOffsets {
    pub subfind_id: i64,
    pub id_offset: i64,
    pub origin_offset: i64,
    pub num_particles: i64,
}

struct GlobalMetaInternal {
    key: String,
    value: String,
}

// Read the global metadata from the assembly.db file
pub fn read_global_meta_sql(
    sa_folder_name: &str,
) -> Result<GlobalAssemblyMetadata, Box<dyn std::error::Error + Send + Sync>> {
    // Connect to the database
    let db_path = Path::new(sa_folder_name).join("assembly.db");
    let conn = Connection::open(db_path)?;

    // execute the query
    let meta_rows: Result<Vec<GlobalMetaInternal>, _> = conn
        .prepare("SELECT * FROM GlobalMetadata")?
        .query_map([], |row| {
            Ok(GlobalMetaInternal {
                key: row.get(0)?,
                value: row.get(1)?,
            })
        })?
        .collect();

    let mut global_meta = GlobalAssemblyMetadata {
        schema_version: -1,
        simulation_name: String::new(),
        snap_num: -1,
        compression_type: -1,
        subhalo_count: -1,
    };

    // go over the keys and parse values for the global metadata
    for row in meta_rows? {
        match row.key.as_str() {
            "SchemaVersion" => global_meta.schema_version = row.value.parse::<i64>()?,
            "SimulationName" => global_meta.simulation_name = row.value,
            "SnapNum" => global_meta.snap_num = row.value.parse::<i64>()?,
            "CompressionType" => global_meta.compression_type = row.value.parse::<i64>()?,
            "SubhaloCount" => global_meta.subhalo_count = row.value.parse::<i64>()?,
            _ => (),
        }
    }

    Ok(global_meta)
}

// Read the per-subhalo offset table from the assembly.db file
pub fn read_subhalo_offsets_sql(
    sa_folder_name: &str,
) -> Result<Vec<SubhaloOffsets>, Box<dyn std::error::Error + Send + Sync>> {
    // Connect to the database
    let db_path = Path::new(sa_folder_name).join("assembly.db");
    let conn = Connection::open(db_path)?;

    // prepare the query
    let rows: Vec<&str> = vec!["SubfindID", "IdOffset", "OriginOffset", "NumParticles"];
    let query = format!("SELECT {} FROM Subhalos ORDER BY SubfindID", rows.join(", "));

    // execute the query
    let offset_rows: Result<Vec<SubhaloOffsets>, _> = conn
        .prepare(&query)?
        .query_map([], |row| {
            Ok(SubhaloOffsets {
                subfind_id: row.get(0)?,
                id_offset: row.get(1)?,
                origin_offset: row.get(2)?,
                num_particles: row.get(3)?,
            })
        })?
        .collect();

    // return the offsets
    Ok(offset_rows?)
}
