mod task_queue;

pub use task_queue::{Task, TaskQueue};
