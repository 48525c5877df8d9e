pub mod cancel;

pub use cancel::{CancelJobCommand, CancelJobError, CancelJobResponse};
