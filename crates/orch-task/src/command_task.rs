use std::any::Any;

use serde_json::{json, Value};

use crate::command_line::CommandLine;
use crate::task::{Task, TaskCore};

/// Passive task running a fixed command.
#[derive(Debug, Clone, Default)]
pub struct CommandTask {
    core: TaskCore,
}

impl CommandTask {
    /// Registry name.
    pub const TYPE_NAME: &'static str = "CommandTask";

    /// Task running `command`.
    pub fn new(command: CommandLine) -> Self {
        Self {
            core: TaskCore::new(command),
        }
    }

    /// Parses `command` into a task.
    pub fn from_command_str(command: &str) -> Result<Self, orch_core::OrchError> {
        CommandLine::from_string(command).map(Self::new)
    }
}

impl Task for CommandTask {
    fn task_type(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn core(&self) -> &TaskCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TaskCore {
        &mut self.core
    }

    fn clone_box(&self) -> Box<dyn Task> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn to_metadata(&self) -> Value {
        json!({
            "task_type": Self::TYPE_NAME,
            "command": self.core.command,
            "platform_requirements": self.core.requirements_json(),
        })
    }

    fn as_task_mut(&mut self) -> &mut dyn Task {
        self
    }
}
