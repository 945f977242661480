use thiserror::Error;

/// Errors surfaced by the provenance-tagging core and its data sources.
///
/// All of these are data-integrity conditions, not transient faults: callers
/// must not retry, and no partial masks are ever returned alongside one.
#[derive(Debug, Error)]
pub enum ProvenanceError {
    #[error("no entry for subhalo {subfind_id} in the backing store")]
    DataNotFound { subfind_id: i64 },

    #[error(
        "particle history files disagree for subhalo {subfind_id}: \
         {ids_len} particle ids vs {origins_len} origin records"
    )]
    ShapeMismatch {
        subfind_id: i64,
        ids_len: usize,
        origins_len: usize,
    },

    #[error("merger tree for subhalo {subfind_id} at snapshot {snap_num} has no nodes")]
    EmptyTree { snap_num: i64, subfind_id: i64 },

    #[error("malformed merger tree: {reason}")]
    MalformedTree { reason: String },

    #[error("backing store error: {0}")]
    Source(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl ProvenanceError {
    pub fn from_source<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        ProvenanceError::Source(Box::new(err))
    }
}

impl From<Box<dyn std::error::Error + Send + Sync>> for ProvenanceError {
    fn from(err: Box<dyn std::error::Error + Send + Sync>) -> Self {
        ProvenanceError::Source(err)
    }
}
