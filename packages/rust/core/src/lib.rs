//! Run orchestration: outline flattening, the per-unit research pipeline,
//! the fan-out scheduler, and run-level usage accounting.

pub mod outline;
pub mod scheduler;
pub mod unit;
pub mod usage;

pub use outline::flatten_outline;
pub use scheduler::Scheduler;
pub use unit::UnitPipeline;
pub use usage::UsageAggregator;
