//! Trace-driven UDP traffic generation.
//!
//! Recorded `(time, size)` traces are compiled into cyclic send schedules and
//! replayed by many concurrent flows. A slot plan sets how many flows run in
//! each time window; every slot ends with all of its flows joined.

pub mod config;
pub mod error;
pub mod flow;
pub mod mix;
pub mod orchestrator;
pub mod plan;
pub mod schedule;
pub mod shutdown;
pub mod sink;
pub mod trace;

pub use config::{Direction, GeneratorConfig};
pub use error::{Error, Result};
pub use flow::{BoundFlow, FlowReplayer, FlowReport};
pub use mix::MixDistribution;
pub use orchestrator::{Orchestrator, RunSummary};
pub use plan::{PlanSource, SlotPlan, SlotPlanEntry};
pub use schedule::{CycleSchedule, Step};
pub use shutdown::Shutdown;
pub use sink::{Sink, SinkReport};
pub use trace::{AppCatalog, Trace, TracePoint, MAX_PAYLOAD_BYTES};
