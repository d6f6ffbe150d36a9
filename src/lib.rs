//! Background orchestration core for the audiobook reader desktop app:
//! dependency resolution, the conversion worker, and the event stream the
//! presentation layer consumes.

pub mod app_dirs;
pub mod deps;
pub mod diagnostics;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod progress;

pub use deps::{DependencyId, DependencyResolver, DepsError, ResolutionResult};
pub use error::AppError;
pub use events::{
    EventChannel, EventHandler, EventPump, FailureDetail, OrchestrationEvent, PUMP_INTERVAL,
};
pub use orchestrator::{
    ConversionEngine, ConversionRequest, EngineError, EngineInvocation, Orchestrator,
    OrchestratorError, OutputFormat,
};
pub use progress::{ProgressInterceptor, ProgressSample, TextSink};
