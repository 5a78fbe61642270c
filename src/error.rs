use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Why a run did not produce an [`AggregatedResult`](crate::pipeline::AggregatedResult).
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to load PDF document")]
    DocumentLoad {
        #[source]
        source: BoxError,
    },

    #[error("failed to render page {page}")]
    PageRender {
        page: u32,
        #[source]
        source: BoxError,
    },

    #[error("text recognition failed on page {page}")]
    Recognition {
        page: u32,
        #[source]
        source: BoxError,
    },

    /// Cancellation was observed before `page` finished.
    #[error("run cancelled at page {page}")]
    Cancelled { page: u32 },

    #[error("another run is already in progress on this pipeline")]
    RunInProgress,
}

impl ProcessError {
    /// Page the run stopped on, where one applies.
    pub fn page(&self) -> Option<u32> {
        match self {
            ProcessError::PageRender { page, .. }
            | ProcessError::Recognition { page, .. }
            | ProcessError::Cancelled { page } => Some(*page),
            ProcessError::DocumentLoad { .. } | ProcessError::RunInProgress => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ProcessError::Cancelled { .. })
    }
}
