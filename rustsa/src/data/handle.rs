use std::fs::File;
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::path::PathBuf;

use byteorder::{LittleEndian, ReadBytesExt};

use galcore::data::particles::{ParticleBirths, ParticleSource};
use galcore::error::ProvenanceError;

use crate::data::meta::{
    read_global_meta_sql, read_subhalo_offsets_sql, GlobalAssemblyMetadata, SubhaloOffsets,
    COMPRESSION_ZSTD,
};
use crate::data::utility::{parse_id_payload, parse_origin_payload, zstd_decompress};

pub const IDS_FILE_NAME: &str = "assembly_ids.bin";
pub const ORIGINS_FILE_NAME: &str = "assembly_origins.bin";

/// The layout of one stellar-assembly dataset: global metadata plus the
/// per-subhalo byte offsets into the two binary block files, read once from
/// `assembly.db` when a handle is constructed.
pub struct AssemblyDataLayout {
    pub data_path: String,
    pub global_meta_data: GlobalAssemblyMetadata,
    pub subhalo_offsets: Vec<SubhaloOffsets>,
}

impl AssemblyDataLayout {
    pub fn new(data_path: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        // get the global metadata and the offset table
        let global_meta_data = read_global_meta_sql(data_path)?;
        let subhalo_offsets = read_subhalo_offsets_sql(data_path)?;

        Ok(AssemblyDataLayout {
            data_path: data_path.to_string(),
            global_meta_data,
            subhalo_offsets,
        })
    }

    // offset rows are dense and ordered, SubfindID is the row index
    fn resolve(&self, subfind_id: i64) -> Result<&SubhaloOffsets, ProvenanceError> {
        if subfind_id < 0 || subfind_id as usize >= self.subhalo_offsets.len() {
            return Err(ProvenanceError::DataNotFound { subfind_id });
        }
        Ok(&self.subhalo_offsets[subfind_id as usize])
    }
}

fn read_block_from_file(
    file_path: &PathBuf,
    offset: u64,
    compression_type: i64,
) -> Result<(u32, Vec<u8>), Box<dyn std::error::Error + Send + Sync>> {
    let mut infile = File::open(file_path)?;
    infile.seek(SeekFrom::Start(offset))?;

    let mut bin_buffer = [0u8; 4];
    infile.read_exact(&mut bin_buffer)?;
    let bin_size = Cursor::new(bin_buffer).read_u32::<LittleEndian>()?;

    infile.read_exact(&mut bin_buffer)?;
    let n_entries = Cursor::new(bin_buffer).read_u32::<LittleEndian>()?;

    if bin_size < 8 {
        return Err(format!("corrupt block header at offset {}: size {}", offset, bin_size).into());
    }

    let mut body = vec![0u8; bin_size as usize - 8];
    infile.read_exact(&mut body)?;

    let payload = if compression_type == COMPRESSION_ZSTD {
        zstd_decompress(&body)?
    } else {
        body
    };

    Ok((n_entries, payload))
}

fn read_block_from_buffer(
    data: &[u8],
    offset: usize,
    compression_type: i64,
) -> Result<(u32, Vec<u8>), Box<dyn std::error::Error + Send + Sync>> {
    if offset + 8 > data.len() {
        return Err(format!("block offset {} beyond end of buffer", offset).into());
    }

    let bin_size = Cursor::new(&data[offset..offset + 4]).read_u32::<LittleEndian>()? as usize;
    let n_entries = Cursor::new(&data[offset + 4..offset + 8]).read_u32::<LittleEndian>()?;

    if bin_size < 8 || offset + bin_size > data.len() {
        return Err(format!("corrupt block header at offset {}: size {}", offset, bin_size).into());
    }

    let body = &data[offset + 8..offset + bin_size];
    let payload = if compression_type == COMPRESSION_ZSTD {
        zstd_decompress(body)?
    } else {
        body.to_vec()
    };

    Ok((n_entries, payload))
}

// final shape check across the two co-indexed files and the offset table
fn assemble_particles(
    subfind_id: i64,
    entry: &SubhaloOffsets,
    particle_ids: Vec<u64>,
    birth_snap_nums: Vec<i64>,
    birth_subfind_ids: Vec<i64>,
    birth_group_ids: Vec<i64>,
) -> Result<ParticleBirths, ProvenanceError> {
    if particle_ids.len() != birth_snap_nums.len()
        || particle_ids.len() != entry.num_particles as usize
    {
        return Err(ProvenanceError::ShapeMismatch {
            subfind_id,
            ids_len: particle_ids.len(),
            origins_len: birth_snap_nums.len(),
        });
    }

    Ok(ParticleBirths {
        particle_ids,
        birth_snap_nums,
        birth_subfind_ids,
        birth_group_ids,
    })
}

/// Loader that reads one subhalo's blocks straight from disk per call.
pub struct ParticleHistoryLazyLoader {
    pub layout: AssemblyDataLayout,
}

impl ParticleHistoryLazyLoader {
    fn read_block(
        &self,
        file_name: &str,
        offset: u64,
    ) -> Result<(u32, Vec<u8>), Box<dyn std::error::Error + Send + Sync>> {
        let mut file_path = PathBuf::from(&self.layout.data_path);
        file_path.push(file_name);
        read_block_from_file(
            &file_path,
            offset,
            self.layout.global_meta_data.compression_type,
        )
    }
}

impl ParticleSource for ParticleHistoryLazyLoader {
    fn load_particles(&self, subfind_id: i64) -> Result<ParticleBirths, ProvenanceError> {
        let entry = self.layout.resolve(subfind_id)?;

        // sentinel offsets mark an absent subhalo, short-circuit before
        // touching either binary file
        if entry.id_offset == -1 || entry.origin_offset == -1 || entry.num_particles == -1 {
            return Ok(ParticleBirths::default());
        }

        let (n_ids, id_payload) = self.read_block(IDS_FILE_NAME, entry.id_offset as u64)?;
        let particle_ids = parse_id_payload(&id_payload, n_ids as usize)?;

        let (n_origins, origin_payload) =
            self.read_block(ORIGINS_FILE_NAME, entry.origin_offset as u64)?;
        let (birth_snap_nums, birth_subfind_ids, birth_group_ids) =
            parse_origin_payload(&origin_payload, n_origins as usize)?;

        assemble_particles(
            subfind_id,
            entry,
            particle_ids,
            birth_snap_nums,
            birth_subfind_ids,
            birth_group_ids,
        )
    }
}

/// Loader that holds both binary files in memory and slices blocks out of
/// the buffers per call. Observable behavior is identical to the lazy
/// loader.
pub struct ParticleHistoryInMemoryLoader {
    pub layout: AssemblyDataLayout,
    id_data: Vec<u8>,
    origin_data: Vec<u8>,
}

impl ParticleSource for ParticleHistoryInMemoryLoader {
    fn load_particles(&self, subfind_id: i64) -> Result<ParticleBirths, ProvenanceError> {
        let entry = self.layout.resolve(subfind_id)?;

        if entry.id_offset == -1 || entry.origin_offset == -1 || entry.num_particles == -1 {
            return Ok(ParticleBirths::default());
        }

        let compression_type = self.layout.global_meta_data.compression_type;
        let (n_ids, id_payload) =
            read_block_from_buffer(&self.id_data, entry.id_offset as usize, compression_type)?;
        let particle_ids = parse_id_payload(&id_payload, n_ids as usize)?;

        let (n_origins, origin_payload) = read_block_from_buffer(
            &self.origin_data,
            entry.origin_offset as usize,
            compression_type,
        )?;
        let (birth_snap_nums, birth_subfind_ids, birth_group_ids) =
            parse_origin_payload(&origin_payload, n_origins as usize)?;

        assemble_particles(
            subfind_id,
            entry,
            particle_ids,
            birth_snap_nums,
            birth_subfind_ids,
            birth_group_ids,
        )
    }
}

pub enum ParticleHistoryHandle {
    Lazy(ParticleHistoryLazyLoader),
    InMemory(ParticleHistoryInMemoryLoader),
}

impl ParticleHistoryHandle {
    pub fn new_lazy(data_path: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let layout = AssemblyDataLayout::new(data_path)?;
        Ok(ParticleHistoryHandle::Lazy(ParticleHistoryLazyLoader {
            layout,
        }))
    }

    pub fn new_in_memory(
        data_path: &str,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let layout = AssemblyDataLayout::new(data_path)?;

        let mut id_data = Vec::new();
        File::open(PathBuf::from(data_path).join(IDS_FILE_NAME))?.read_to_end(&mut id_data)?;

        let mut origin_data = Vec::new();
        File::open(PathBuf::from(data_path).join(ORIGINS_FILE_NAME))?
            .read_to_end(&mut origin_data)?;

        Ok(ParticleHistoryHandle::InMemory(
            ParticleHistoryInMemoryLoader {
                layout,
                id_data,
                origin_data,
            },
        ))
    }

    pub fn layout(&self) -> &AssemblyDataLayout {
        match self {
            ParticleHistoryHandle::Lazy(loader) => &loader.layout,
            ParticleHistoryHandle::InMemory(loader) => &loader.layout,
        }
    }
}

impl ParticleSource for ParticleHistoryHandle {
    fn load_particles(&self, subfind_id: i64) -> Result<ParticleBirths, ProvenanceError> {
        match self {
            ParticleHistoryHandle::Lazy(loader) => loader.load_particles(subfind_id),
            ParticleHistoryHandle::InMemory(loader) => loader.load_particles(subfind_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::meta::COMPRESSION_NONE;
    use crate::data::synthetics::{SyntheticAssemblyHandle, SyntheticSubhalo};
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn unique_temp_dir(suffix: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("rustsa-handle-{}-{}-{}", suffix, std::process::id(), nanos))
    }

    fn populated_subhalo() -> SyntheticSubhalo {
        SyntheticSubhalo {
            particle_ids: vec![500, 501, 502],
            birth_snap_nums: vec![98, 97, 50],
            birth_subfind_ids: vec![1, 2, 11],
            birth_group_ids: vec![0, 0, 4],
            absent: false,
        }
    }

    fn write_test_dataset(dir: &PathBuf, compression_type: i64) {
        let handle = SyntheticAssemblyHandle::new(dir, "TNG-test", 99, compression_type);
        let subhalos = vec![
            populated_subhalo(),
            SyntheticSubhalo {
                absent: true,
                ..SyntheticSubhalo::default()
            },
        ];
        handle.write_dataset(&subhalos, &[]).unwrap();
    }

    #[test]
    fn test_lazy_loader_reads_back_particles() {
        let dir = unique_temp_dir("lazy");
        write_test_dataset(&dir, COMPRESSION_ZSTD);

        let handle = ParticleHistoryHandle::new_lazy(dir.to_str().unwrap()).unwrap();
        let particles = handle.load_particles(0).unwrap();

        assert_eq!(particles.particle_ids, vec![500, 501, 502]);
        assert_eq!(particles.birth_snap_nums, vec![98, 97, 50]);
        assert_eq!(particles.birth_subfind_ids, vec![1, 2, 11]);
        assert_eq!(particles.birth_group_ids, vec![0, 0, 4]);
    }

    #[test]
    fn test_absent_subhalo_yields_empty_sequences() {
        let dir = unique_temp_dir("absent");
        write_test_dataset(&dir, COMPRESSION_ZSTD);

        let handle = ParticleHistoryHandle::new_lazy(dir.to_str().unwrap()).unwrap();
        let particles = handle.load_particles(1).unwrap();
        assert!(particles.is_empty());
    }

    #[test]
    fn test_unknown_subhalo_is_data_not_found() {
        let dir = unique_temp_dir("unknown");
        write_test_dataset(&dir, COMPRESSION_ZSTD);

        let handle = ParticleHistoryHandle::new_lazy(dir.to_str().unwrap()).unwrap();
        let err = handle.load_particles(7).unwrap_err();
        assert!(matches!(err, ProvenanceError::DataNotFound { subfind_id: 7 }));
    }

    #[test]
    fn test_in_memory_loader_agrees_with_lazy_loader() {
        let dir = unique_temp_dir("inmem");
        write_test_dataset(&dir, COMPRESSION_NONE);

        let lazy = ParticleHistoryHandle::new_lazy(dir.to_str().unwrap()).unwrap();
        let in_memory = ParticleHistoryHandle::new_in_memory(dir.to_str().unwrap()).unwrap();

        let from_lazy = lazy.load_particles(0).unwrap();
        let from_memory = in_memory.load_particles(0).unwrap();
        assert_eq!(from_lazy.particle_ids, from_memory.particle_ids);
        assert_eq!(from_lazy.birth_snap_nums, from_memory.birth_snap_nums);
        assert_eq!(from_lazy.birth_subfind_ids, from_memory.birth_subfind_ids);
        assert_eq!(from_lazy.birth_group_ids, from_memory.birth_group_ids);
    }

    #[test]
    fn test_disagreeing_files_raise_shape_mismatch() {
        let dir = unique_temp_dir("mismatch");
        let handle = SyntheticAssemblyHandle::new(&dir, "TNG-test", 99, COMPRESSION_ZSTD);
        // three particle ids but only two origin records
        let subhalos = vec![SyntheticSubhalo {
            particle_ids: vec![500, 501, 502],
            birth_snap_nums: vec![98, 97],
            birth_subfind_ids: vec![1, 2],
            birth_group_ids: vec![0, 0],
            absent: false,
        }];
        handle.write_dataset(&subhalos, &[]).unwrap();

        let loader = ParticleHistoryHandle::new_lazy(dir.to_str().unwrap()).unwrap();
        let err = loader.load_particles(0).unwrap_err();
        assert!(matches!(err, ProvenanceError::ShapeMismatch { .. }));
    }
}
