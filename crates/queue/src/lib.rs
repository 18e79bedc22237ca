pub mod job;
pub mod memory;
pub mod queue;

pub use job::{Job, JobStatus};
pub use memory::MemorySnapshot;
pub use queue::{InteractionQueue, QueueStatus};
