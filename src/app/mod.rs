//! Application layer: pipeline stages, scheduling and shared state.

pub mod executor;
pub mod jobs;
pub mod retry;
pub mod scheduler;
pub mod service;
pub mod signals;
pub mod signer;
pub mod simulator;
pub mod state;

pub use executor::{BatchExecutor, CalldataEncoding, ExecutorConfig, select_encoding};
pub use jobs::{
    ExecuteConfig, ExecuteJob, RetrySweepConfig, RetrySweepJob, SimulateConfig, SimulateJob,
};
pub use scheduler::{Job, JobConfig, JobRun, JobScheduler};
pub use service::AppService;
pub use signals::{Signal, SignalBus};
pub use signer::InteractionSigner;
pub use simulator::{InteractionSimulator, SimulationResult};
pub use state::AppState;
