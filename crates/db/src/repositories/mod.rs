//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods
//! that accept `&PgPool` as the first argument.

pub mod execution_request_repo;
pub mod node_repo;
pub mod run_log_repo;
pub mod run_repo;

pub use execution_request_repo::ExecutionRequestRepo;
pub use node_repo::NodeRepo;
pub use run_log_repo::RunLogRepo;
pub use run_repo::RunRepo;
