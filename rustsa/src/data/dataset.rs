use log::info;
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use serde::{Deserialize, Serialize};

use galcore::algorithm::tags::{classify_birth_places, BirthPlaceTags, TagSummary};
use galcore::error::ProvenanceError;

use crate::data::handle::ParticleHistoryHandle;
use crate::data::meta::read_global_meta_sql;
use crate::data::tree::SublinkTreeHandle;

/// The classification result for one galaxy, ready for serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GalaxyTags {
    pub subfind_id: i64,
    pub snap_num: i64,
    pub tags: BirthPlaceTags,
    pub summary: TagSummary,
}

/// A stellar-assembly dataset directory.
///
/// Holds only the resolved path and reference snapshot; every
/// classification call opens its own store handles and drops them when it
/// returns, so independent galaxies can be processed in parallel against
/// the same read-only files without any locking.
pub struct StellarAssemblyDataset {
    pub data_path: String,
    pub snap_num: i64,
    pub in_memory: bool,
}

impl StellarAssemblyDataset {
    /// Open a dataset whose particle blocks are read lazily per galaxy.
    pub fn new(data_path: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let global_meta_data = read_global_meta_sql(data_path)?;
        Ok(StellarAssemblyDataset {
            data_path: data_path.to_string(),
            snap_num: global_meta_data.snap_num,
            in_memory: false,
        })
    }

    /// Open a dataset whose binary files are pulled fully into memory by
    /// each classification call.
    pub fn new_in_memory(
        data_path: &str,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let global_meta_data = read_global_meta_sql(data_path)?;
        Ok(StellarAssemblyDataset {
            data_path: data_path.to_string(),
            snap_num: global_meta_data.snap_num,
            in_memory: true,
        })
    }

    fn open_particle_handle(
        &self,
    ) -> Result<ParticleHistoryHandle, Box<dyn std::error::Error + Send + Sync>> {
        match self.in_memory {
            true => ParticleHistoryHandle::new_in_memory(&self.data_path),
            false => ParticleHistoryHandle::new_lazy(&self.data_path),
        }
    }

    /// Classify the birth place of every star particle of one galaxy.
    pub fn classify(&self, subfind_id: i64) -> Result<GalaxyTags, ProvenanceError> {
        let tree_handle = SublinkTreeHandle::new(&self.data_path)?;
        let particle_handle = self.open_particle_handle()?;

        let tags = classify_birth_places(&tree_handle, &particle_handle, self.snap_num, subfind_id)?;
        let summary = tags.summary();

        info!(
            "subhalo {}: {} particles, {} mpb / {} fof / {} ext, {} unclassified",
            subfind_id,
            summary.n_particles,
            summary.n_mpb,
            summary.n_fof,
            summary.n_ext,
            summary.n_unclassified
        );

        Ok(GalaxyTags {
            subfind_id,
            snap_num: self.snap_num,
            tags,
            summary,
        })
    }

    /// Classify many galaxies in parallel, one worker and one set of store
    /// handles per galaxy. Per-galaxy failures are reported per entry and
    /// do not abort the batch.
    pub fn classify_batch(
        &self,
        subfind_ids: Vec<i64>,
        num_threads: usize,
    ) -> Vec<Result<GalaxyTags, ProvenanceError>> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()
            .unwrap();
        pool.install(|| {
            subfind_ids
                .par_iter()
                .map(|&subfind_id| self.classify(subfind_id))
                .collect()
        })
    }
}
