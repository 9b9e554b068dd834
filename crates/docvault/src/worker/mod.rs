pub mod pool;
pub mod task;

pub use pool::WorkerPool;
pub use task::{Task, TaskResult};
