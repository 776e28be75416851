//! Domain model (IDs, state machine, outcomes, errors, events, flows).

pub mod decision;
pub mod errors;
pub mod events;
pub mod flow;
pub mod ids;
pub mod outcome;
pub mod state;

pub use decision::{Decider, Decision, DefaultDecider};
pub use errors::TaskError;
pub use events::{EventDetail, TaskEvent, TaskEventKind};
pub use flow::{FlowRecord, FlowStatus};
pub use ids::{FlowId, TaskId};
pub use outcome::{Progress, TaskOutcome};
pub use state::{ExecutorKind, Priority, TaskStatus};
