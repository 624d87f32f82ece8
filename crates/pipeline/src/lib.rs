//! Grid run execution: bounded-concurrency submission of cells, progress
//! streaming, output persistence and composite image assembly.

pub mod claim;
pub mod composite;
pub mod config;
pub mod font;
pub mod gate;
pub mod history;
mod job;
mod orchestrator;
pub mod request;
pub mod run_state;
pub mod runner;
pub mod storage;
mod streamer;

pub use claim::{ClaimGuard, GenClaim, SessionClaims};
pub use config::{ConfigError, RunnerConfig};
pub use request::GridRunRequest;
pub use runner::{GridRunner, RunOutcome};
pub use storage::{ImageStore, LocalImageStore, StoreError};
