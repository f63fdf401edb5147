pub mod job;
pub mod jobmap;
pub mod task;
pub mod taskmap;

pub use job::{Job, JobState};
pub use jobmap::JobMap;
pub use task::{Affinity, ResourceRequest, Task, TaskState, TaskType};
pub use taskmap::TaskMap;
