use crate::ChunkCode;

pub type Result<T, E = MeshError> = std::result::Result<T, E>;

/// Failures that abort a chunk regeneration or engine setup.
///
/// Degenerate QEF systems and homogeneous cells are not errors; they are
/// handled numerically or skipped.
#[derive(Debug, thiserror::Error)]
pub enum MeshError {
    #[error("invalid mesh generation config: {reason}")]
    InvalidConfig { reason: String },

    #[error("leaf construction worker {block} failed for chunk {chunk:#x}")]
    WorkerFailed { chunk: ChunkCode, block: usize },

    #[error("failed to build leaf construction thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("unknown chunk node {0:#x}")]
    UnknownChunk(ChunkCode),
}

impl MeshError {
    pub(crate) fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}
