//! Tasks: the command, parameters and asset template a simulation is built from.

pub mod command_line;
pub mod command_task;
pub mod json_task;
pub mod registry;
pub mod task;

pub use command_line::CommandLine;
pub use command_task::CommandTask;
pub use json_task::JsonConfiguredTask;
pub use registry::{TaskConstructor, TaskRegistry};
pub use task::{FileSource, Task, TaskCore, TaskHook, TASK_TYPE_TAG};
