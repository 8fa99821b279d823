//! Domain - ドメインモデル（ids, status, task, outcome, errors, events）

pub mod attempt;
pub mod errors;
pub mod events;
pub mod ids;
pub mod outcome;
pub mod status;
pub mod task;

pub use attempt::AttemptRecord;
pub use errors::{ErrorKind, QueueError};
pub use events::TaskEvent;
pub use ids::{ParseIdError, TaskId};
pub use outcome::{Outcome, OutcomeKind};
pub use status::TaskStatus;
pub use task::{ListCursor, NewTask, Task, TaskPage, TaskView, WIRE_SCHEMA_VERSION};
