use crate::pipeline::{PageStats, PipelineSettings};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub job_name: String,
    pub input: InputInfo,
    pub settings: PipelineSettings,
    pub num_pages: u32,
    pub total_chars: usize,
    pub started: String,
    pub finished: String,
    pub pages: Vec<PageStats>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputInfo {
    pub path: String,
    pub file_bytes: u64,
    pub sha256: String,
}
