pub mod get_job;
pub mod list_running;

pub use get_job::{GetJobError, GetJobQuery, JobDetails};
pub use list_running::RunningJobs;
