//! Jobs running in this process

use serde::{Deserialize, Serialize};

use crate::ingest::IngestionJobCoordinator;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunningJobs {
    pub jobs: Vec<String>,
    pub total: usize,
}

pub fn handle(coordinator: &IngestionJobCoordinator) -> RunningJobs {
    let jobs: Vec<String> = coordinator.running_jobs().iter().map(u64::to_string).collect();
    RunningJobs {
        total: jobs.len(),
        jobs,
    }
}
