//! Name-keyed registry turning stored task metadata back into tasks.

use std::collections::BTreeMap;
use std::sync::Arc;

use orch_core::errors::{ErrorInfo, OrchError};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::warn;

use crate::command_line::CommandLine;
use crate::command_task::CommandTask;
use crate::json_task::{JsonConfiguredTask, DEFAULT_CONFIG_FILE};
use crate::task::Task;

/// Builds a task from metadata already stripped to its known fields.
pub type TaskConstructor = Arc<dyn Fn(Map<String, Value>) -> Result<Box<dyn Task>, OrchError> + Send + Sync>;

#[derive(Clone)]
struct Entry {
    fields: Vec<&'static str>,
    constructor: TaskConstructor,
}

/// Registry of task kinds, keyed by the stable name stored in `task_type`.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    entries: BTreeMap<String, Entry>,
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("task_types", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[derive(Deserialize)]
struct CommandTaskFields {
    command: CommandLine,
    #[serde(default)]
    platform_requirements: Vec<String>,
}

#[derive(Deserialize)]
struct JsonTaskFields {
    command: CommandLine,
    #[serde(default)]
    platform_requirements: Vec<String>,
    #[serde(default)]
    parameters: Map<String, Value>,
    #[serde(default)]
    envelope: Option<String>,
    #[serde(default)]
    config_file_name: Option<String>,
    #[serde(default)]
    is_config_common: bool,
    #[serde(default)]
    config_file_argument: Option<String>,
    #[serde(default)]
    argument_without_filename: bool,
}

fn decode<T: for<'de> Deserialize<'de>>(task_type: &str, fields: Map<String, Value>) -> Result<T, OrchError> {
    serde_json::from_value(Value::Object(fields)).map_err(|err| {
        OrchError::Serde(
            ErrorInfo::new("task.metadata", "task metadata does not match its type")
                .with_context("task_type", task_type)
                .with_cause(err),
        )
    })
}

impl TaskRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in task kinds.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(
            CommandTask::TYPE_NAME,
            &["command", "platform_requirements"],
            Arc::new(|fields: Map<String, Value>| -> Result<Box<dyn Task>, OrchError> {
                let decoded: CommandTaskFields = decode(CommandTask::TYPE_NAME, fields)?;
                let mut task = CommandTask::new(decoded.command);
                task.core_mut()
                    .platform_requirements
                    .extend(decoded.platform_requirements);
                Ok(Box::new(task) as Box<dyn Task>)
            }),
        );
        registry.register(
            JsonConfiguredTask::TYPE_NAME,
            &[
                "command",
                "platform_requirements",
                "parameters",
                "envelope",
                "config_file_name",
                "is_config_common",
                "config_file_argument",
                "argument_without_filename",
            ],
            Arc::new(|fields: Map<String, Value>| -> Result<Box<dyn Task>, OrchError> {
                let decoded: JsonTaskFields = decode(JsonConfiguredTask::TYPE_NAME, fields)?;
                let mut task = JsonConfiguredTask::new(decoded.command)
                    .with_config_file_name(
                        decoded
                            .config_file_name
                            .unwrap_or_else(|| DEFAULT_CONFIG_FILE.to_string()),
                    )
                    .with_common_config(decoded.is_config_common);
                if let Some(envelope) = decoded.envelope {
                    task = task.with_envelope(envelope);
                }
                if let Some(argument) = decoded.config_file_argument {
                    task = task.with_config_file_argument(argument, decoded.argument_without_filename);
                }
                task = task.with_parameters(decoded.parameters);
                task.core_mut()
                    .platform_requirements
                    .extend(decoded.platform_requirements);
                Ok(Box::new(task) as Box<dyn Task>)
            }),
        );
        registry
    }

    /// Registers a task kind. `fields` lists the metadata keys its
    /// constructor understands; anything else is dropped before construction.
    pub fn register(&mut self, name: impl Into<String>, fields: &[&'static str], constructor: TaskConstructor) {
        self.entries.insert(
            name.into(),
            Entry {
                fields: fields.to_vec(),
                constructor,
            },
        );
    }

    /// True when `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Rebuilds a task from metadata produced by [`Task::to_metadata`].
    ///
    /// Fields the registered kind does not know are removed with a warning,
    /// so metadata written by newer or older schemas still loads.
    pub fn build(&self, metadata: &Value) -> Result<Box<dyn Task>, OrchError> {
        let Value::Object(object) = metadata else {
            return Err(OrchError::Serde(ErrorInfo::new(
                "task.metadata",
                "task metadata must be a JSON object",
            )));
        };
        let task_type = object
            .get("task_type")
            .and_then(Value::as_str)
            .ok_or_else(|| OrchError::Serde(ErrorInfo::new("task.metadata", "task metadata has no task_type")))?;
        let entry = self.entries.get(task_type).ok_or_else(|| {
            OrchError::NotFound(
                ErrorInfo::new("task.unregistered", "task type is not registered")
                    .with_context("task_type", task_type)
                    .with_hint("register the task kind on the platform's task registry"),
            )
        })?;
        let mut known = Map::new();
        for (key, value) in object {
            if key == "task_type" {
                continue;
            }
            if entry.fields.contains(&key.as_str()) {
                known.insert(key.clone(), value.clone());
            } else {
                warn!(task_type, field = %key, "dropping unknown task metadata field");
            }
        }
        (entry.constructor)(known)
    }
}
