pub mod arn;
pub mod artifact_store;
pub mod blueprint;
pub mod build;
pub mod checks;
pub mod config;
pub mod error;
pub mod expr;
pub mod io;
pub mod ledger;
pub mod orchestrator;
pub mod paths;
pub mod pipeline;
pub mod plan;
pub mod policy;
pub mod roles;
pub mod router;
pub mod runner;
pub mod template;
pub mod trigger;
pub mod types;

pub use error::{Result, StackError};
