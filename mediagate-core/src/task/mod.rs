pub mod chain;
pub mod queue;
pub mod registry;
pub mod status;
pub mod stop;

pub use chain::run_chain;
pub use queue::{ProcessorKind, TaskContext, TaskQueue};
pub use registry::{TaskEntry, TaskRegistry};
pub use status::{StatusBoard, TaskStatus};
pub use stop::StopSignal;
