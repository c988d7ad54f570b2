//! Domain model structs and DTOs.
//!
//! Each submodule contains:
//! - A `FromRow` + `Serialize` entity struct matching the database row
//! - `Deserialize` DTOs for inserts and list filters

pub mod execution_request;
pub mod node;
pub mod run;
pub mod run_log;
pub mod status;
