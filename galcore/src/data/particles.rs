use serde::{Deserialize, Serialize};

use crate::error::ProvenanceError;

/// The member star particles of one galaxy at the reference snapshot,
/// together with the coordinates of each particle's recorded birth: the
/// snapshot, subhalo and FOF group in which it was first seen as stellar.
///
/// Four equal-length parallel vectors; ordering follows the backing store
/// and carries no meaning beyond index alignment with the output masks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParticleBirths {
    pub particle_ids: Vec<u64>,
    pub birth_snap_nums: Vec<i64>,
    pub birth_subfind_ids: Vec<i64>,
    pub birth_group_ids: Vec<i64>,
}

impl ParticleBirths {
    pub fn len(&self) -> usize {
        self.particle_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particle_ids.is_empty()
    }
}

/// Read-only access to a particle-history store.
///
/// `load_particles` resolves a subhalo identifier at the reference snapshot
/// to its member particles. An absent subhalo (the store's `-1` sentinel) is
/// a valid state and yields empty sequences, not an error.
pub trait ParticleSource {
    fn load_particles(&self, subfind_id: i64) -> Result<ParticleBirths, ProvenanceError>;
}
