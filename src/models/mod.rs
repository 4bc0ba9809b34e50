pub mod batch_job;
pub mod narrative;
pub mod state;
pub mod transcript;
