//! Tasks configured through a JSON parameter file written next to the command.

use std::any::Any;
use std::sync::Arc;

use orch_assets::{Asset, AssetCollection};
use orch_core::errors::OrchError;
use orch_core::serde::{from_json_slice, to_canonical_json_bytes};
use orch_core::tags::Tags;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::command_line::CommandLine;
use crate::task::{run_hooks, FileSource, Task, TaskCore};

/// Default name of the configuration file written into each simulation.
pub const DEFAULT_CONFIG_FILE: &str = "config.json";
/// Tag recording a non-default configuration file name.
pub const CONFIG_FILE_TAG: &str = "task_config_file_name";
/// Tag recording the envelope key.
pub const ENVELOPE_TAG: &str = "task_envelope";

/// Task whose parameters are written as a JSON file next to the command.
///
/// The parameter map is shared copy-on-write between clones, so a sweep over
/// a large base configuration only copies it for simulations that change it.
#[derive(Debug, Clone)]
pub struct JsonConfiguredTask {
    core: TaskCore,
    parameters: Arc<Map<String, Value>>,
    envelope: Option<String>,
    config_file_name: String,
    is_config_common: bool,
    config_file_argument: Option<String>,
    argument_without_filename: bool,
}

impl Default for JsonConfiguredTask {
    fn default() -> Self {
        Self {
            core: TaskCore::default(),
            parameters: Arc::new(Map::new()),
            envelope: None,
            config_file_name: DEFAULT_CONFIG_FILE.to_string(),
            is_config_common: false,
            config_file_argument: None,
            argument_without_filename: false,
        }
    }
}

fn unwrap_envelope(mut parameters: Map<String, Value>, envelope: Option<&str>) -> Map<String, Value> {
    if let Some(key) = envelope {
        if let Some(Value::Object(inner)) = parameters.remove(key) {
            debug!(envelope = key, "loading parameters from envelope");
            return inner;
        }
    }
    parameters
}

impl JsonConfiguredTask {
    /// Registry name.
    pub const TYPE_NAME: &'static str = "JsonConfiguredTask";

    /// Task running `command` with an empty parameter map.
    pub fn new(command: CommandLine) -> Self {
        Self {
            core: TaskCore::new(command),
            ..Self::default()
        }
    }

    /// Replaces the parameter map. When an envelope is configured and present
    /// in `parameters`, its content becomes the map.
    pub fn with_parameters(mut self, parameters: Map<String, Value>) -> Self {
        self.parameters = Arc::new(unwrap_envelope(parameters, self.envelope.as_deref()));
        self
    }

    /// Wraps the written configuration in `{envelope: parameters}`.
    pub fn with_envelope(mut self, envelope: impl Into<String>) -> Self {
        let envelope = envelope.into();
        let current = Arc::unwrap_or_clone(std::mem::take(&mut self.parameters));
        self.parameters = Arc::new(unwrap_envelope(current, Some(&envelope)));
        self.envelope = Some(envelope);
        self
    }

    /// Writes the configuration under a different file name.
    pub fn with_config_file_name(mut self, name: impl Into<String>) -> Self {
        self.config_file_name = name.into();
        self
    }

    /// Writes the configuration into the common assets instead of the
    /// transient ones.
    pub fn with_common_config(mut self, common: bool) -> Self {
        self.is_config_common = common;
        self
    }

    /// Passes the configuration file on the command line as
    /// `<argument> <config_file_name>`, or only `<argument>` when
    /// `without_filename` is set.
    pub fn with_config_file_argument(mut self, argument: impl Into<String>, without_filename: bool) -> Self {
        self.config_file_argument = Some(argument.into());
        self.argument_without_filename = without_filename;
        self
    }

    /// Envelope key, when configured.
    pub fn envelope(&self) -> Option<&str> {
        self.envelope.as_deref()
    }

    /// Configuration file name.
    pub fn config_file_name(&self) -> &str {
        &self.config_file_name
    }

    /// Value of parameter `key`.
    pub fn get_parameter(&self, key: &str) -> Option<&Value> {
        self.parameters.get(key)
    }

    /// Bulk update; returns the tag patch describing the new values.
    pub fn update_parameters(&mut self, values: Map<String, Value>) -> Tags {
        let mut patch = Tags::new();
        let parameters = Arc::make_mut(&mut self.parameters);
        for (key, value) in values {
            debug!(parameter = %key, value = %value, "setting parameter");
            patch.insert_value(key.clone(), &value);
            parameters.insert(key, value);
        }
        patch
    }

    /// True when both clones still share one parameter allocation.
    pub fn shares_parameters_with(&self, other: &JsonConfiguredTask) -> bool {
        Arc::ptr_eq(&self.parameters, &other.parameters)
    }

    /// Bytes of the configuration file: sorted keys, compact UTF-8 JSON.
    pub fn config_bytes(&self) -> Result<Vec<u8>, OrchError> {
        match &self.envelope {
            Some(envelope) => {
                let mut wrapped = Map::new();
                wrapped.insert(envelope.clone(), Value::Object((*self.parameters).clone()));
                to_canonical_json_bytes(&wrapped)
            }
            None => to_canonical_json_bytes(&*self.parameters),
        }
    }

    fn dump_config(&self, assets: &mut AssetCollection) -> Result<(), OrchError> {
        debug!(file = %self.config_file_name, "writing json configuration asset");
        let asset = Asset::from_content(self.config_file_name.clone(), "", self.config_bytes()?)?;
        assets.add_or_replace(asset)
    }
}

impl Task for JsonConfiguredTask {
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

    fn gather_common_assets(&mut self) -> Result<AssetCollection, OrchError> {
        if self.is_config_common {
            let mut common = self.core.common_assets.clone();
            self.dump_config(&mut common)?;
            self.core.common_assets = common;
        }
        Ok(self.core.common_assets.clone())
    }

    fn gather_transient_assets(&mut self) -> Result<AssetCollection, OrchError> {
        if !self.is_config_common {
            let mut transient = self.core.transient_assets.clone();
            self.dump_config(&mut transient)?;
            self.core.transient_assets = transient;
        }
        Ok(self.core.transient_assets.clone())
    }

    fn pre_creation(&mut self, tags: &mut Tags) -> Result<(), OrchError> {
        if self.config_file_name != DEFAULT_CONFIG_FILE {
            tags.insert(CONFIG_FILE_TAG, self.config_file_name.clone());
        }
        if let Some(envelope) = &self.envelope {
            tags.insert(ENVELOPE_TAG, envelope.clone());
        }
        if let Some(argument) = self.config_file_argument.clone() {
            if !self.core.command.has_argument(&argument) {
                self.core.command.add_argument(&argument);
                if !self.argument_without_filename {
                    let file = self.config_file_name.clone();
                    self.core.command.add_argument(file);
                }
            }
        }
        let hooks = self.core.pre_creation_hooks().to_vec();
        run_hooks(self, &hooks, tags, "pre_creation")
    }

    fn reload_from_simulation(&mut self, tags: &Tags, files: &dyn FileSource) -> Result<(), OrchError> {
        let file_name = tags
            .get_str(CONFIG_FILE_TAG)
            .map(str::to_string)
            .unwrap_or_else(|| self.config_file_name.clone());
        let raw = files.fetch(&file_name)?;
        let config: Map<String, Value> = from_json_slice(&raw)?;
        let envelope = tags
            .get_str(ENVELOPE_TAG)
            .map(str::to_string)
            .or_else(|| self.envelope.clone());
        self.parameters = Arc::new(unwrap_envelope(config, envelope.as_deref()));
        if let Some(envelope) = envelope {
            self.envelope = Some(envelope);
        }
        self.config_file_name = file_name.clone();
        if self.core.transient_assets.get_one(&file_name, "").is_some() {
            self.core.transient_assets.remove(&file_name, "")?;
        }
        Ok(())
    }

    fn to_metadata(&self) -> Value {
        json!({
            "task_type": Self::TYPE_NAME,
            "command": self.core.command,
            "platform_requirements": self.core.requirements_json(),
            "parameters": &*self.parameters,
            "envelope": self.envelope,
            "config_file_name": self.config_file_name,
            "is_config_common": self.is_config_common,
            "config_file_argument": self.config_file_argument,
            "argument_without_filename": self.argument_without_filename,
        })
    }

    fn parameters(&self) -> Option<&Map<String, Value>> {
        Some(&self.parameters)
    }

    fn set_parameter(&mut self, key: &str, value: Value) -> Result<Tags, OrchError> {
        let mut values = Map::new();
        values.insert(key.to_string(), value);
        Ok(self.update_parameters(values))
    }

    fn as_task_mut(&mut self) -> &mut dyn Task {
        self
    }
}
