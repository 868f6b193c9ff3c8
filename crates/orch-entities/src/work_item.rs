//! Stand-alone work items, typically analysis jobs over earlier outputs.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use globset::{Glob, GlobSet, GlobSetBuilder};
use orch_assets::AssetCollection;
use orch_core::errors::{invalid, ErrorInfo, OrchError};
use orch_core::ids::{Identified, ItemType, PlatformObject};
use orch_core::status::{EntityStatus, Transition};
use orch_core::tags::Tags;
use orch_task::CommandLine;

use crate::lifecycle::apply_status;
use crate::metadata::WorkItemMetadata;

/// Ids of the entities a work item reads from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelatedItems {
    items: BTreeMap<ItemType, Vec<String>>,
}

impl RelatedItems {
    /// Adds a related entity, ignoring repeats.
    pub fn add(&mut self, item_type: ItemType, id: impl Into<String>) {
        let id = id.into();
        let ids = self.items.entry(item_type).or_default();
        if !ids.contains(&id) {
            ids.push(id);
        }
    }

    /// Related ids of one kind.
    pub fn of(&self, item_type: ItemType) -> &[String] {
        self.items.get(&item_type).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Total number of related entities.
    pub fn len(&self) -> usize {
        self.items.values().map(Vec::len).sum()
    }

    /// True when nothing is related.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Related ids keyed by item type name.
    pub fn to_named_map(&self) -> BTreeMap<String, Vec<String>> {
        self.items
            .iter()
            .map(|(kind, ids)| (kind.as_str().to_string(), ids.clone()))
            .collect()
    }

    /// Inverse of [`RelatedItems::to_named_map`].
    pub fn from_named_map(map: &BTreeMap<String, Vec<String>>) -> Result<Self, OrchError> {
        let mut related = Self::default();
        for (kind, ids) in map {
            let kind: ItemType = kind.parse()?;
            for id in ids {
                related.add(kind, id.clone());
            }
        }
        Ok(related)
    }
}

/// Pre-run callback of a file-filter work item.
pub type PreRunCallback = Arc<dyn Fn(&mut WorkItem) -> Result<(), OrchError> + Send + Sync>;
/// Entity selection callback of a file-filter work item, applied to tags.
pub type EntityFilter = Arc<dyn Fn(&Tags) -> bool + Send + Sync>;

/// Selection rules of a file-filter work item. The worker side applies them;
/// the core only records and checks them.
#[derive(Clone, Default)]
pub struct FileFilter {
    include: Vec<String>,
    exclude: Vec<String>,
    include_set: Option<GlobSet>,
    exclude_set: Option<GlobSet>,
    /// Callback run before the work item is created.
    pub pre_run: Option<PreRunCallback>,
    /// Callback choosing which related entities to read from.
    pub entity_filter: Option<EntityFilter>,
}

impl fmt::Debug for FileFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileFilter")
            .field("include", &self.include)
            .field("exclude", &self.exclude)
            .field("pre_run", &self.pre_run.is_some())
            .field("entity_filter", &self.entity_filter.is_some())
            .finish()
    }
}

fn glob_set(patterns: &[String]) -> Result<Option<GlobSet>, OrchError> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).map_err(|err| {
            OrchError::Invalid(
                ErrorInfo::new("file_filter.glob", err.to_string()).with_context("pattern", pattern.clone()),
            )
        })?);
    }
    builder
        .build()
        .map(Some)
        .map_err(|err| OrchError::Invalid(ErrorInfo::new("file_filter.glob_build", err.to_string())))
}

impl FileFilter {
    /// Filter from include and exclude glob patterns.
    pub fn new(include: Vec<String>, exclude: Vec<String>) -> Result<Self, OrchError> {
        Ok(Self {
            include_set: glob_set(&include)?,
            exclude_set: glob_set(&exclude)?,
            include,
            exclude,
            pre_run: None,
            entity_filter: None,
        })
    }

    /// Include patterns.
    pub fn include(&self) -> &[String] {
        &self.include
    }

    /// Exclude patterns.
    pub fn exclude(&self) -> &[String] {
        &self.exclude
    }

    /// True when `path` is included and not excluded. No include pattern
    /// means everything is included.
    pub fn matches(&self, path: &str) -> bool {
        if self.exclude_set.as_ref().is_some_and(|set| set.is_match(path)) {
            return false;
        }
        self.include_set.as_ref().map_or(true, |set| set.is_match(path))
    }

    /// True when the entity filter accepts `tags`, or when there is none.
    pub fn accepts_entity(&self, tags: &Tags) -> bool {
        self.entity_filter.as_ref().map_or(true, |filter| filter(tags))
    }
}

/// Single execution unit outside the sweep model.
#[derive(Debug, Clone)]
pub struct WorkItem {
    id: Option<String>,
    /// Display name.
    pub name: String,
    /// Command to run.
    pub command: CommandLine,
    /// Assets shipped with the work item.
    pub assets: AssetCollection,
    /// Tags.
    pub tags: Tags,
    /// Entities the work item reads from.
    pub related: RelatedItems,
    /// File selection rules, for file-filter work items.
    pub file_filter: Option<FileFilter>,
    status: EntityStatus,
    platform_object: Option<PlatformObject>,
}

impl WorkItem {
    /// Work item running `command`.
    pub fn new(name: impl Into<String>, command: CommandLine) -> Self {
        Self {
            id: None,
            name: name.into(),
            command,
            assets: AssetCollection::new(),
            tags: Tags::new(),
            related: RelatedItems::default(),
            file_filter: None,
            status: EntityStatus::Created,
            platform_object: None,
        }
    }

    /// File-filter work item.
    pub fn file_filter(name: impl Into<String>, command: CommandLine, filter: FileFilter) -> Self {
        let mut item = Self::new(name, command);
        item.file_filter = Some(filter);
        item
    }

    /// Rebuilds a persisted work item from metadata.
    pub fn from_metadata(metadata: &WorkItemMetadata, handle: PlatformObject) -> Result<Self, OrchError> {
        let command = match &metadata.command {
            Some(value) => serde_json::from_value(value.clone()).map_err(|err| {
                OrchError::Serde(ErrorInfo::new("work_item.command", err.to_string()).with_entity(metadata.id.clone()))
            })?,
            None => CommandLine::default(),
        };
        let mut item = Self::new(metadata.name.clone(), command);
        item.id = Some(metadata.id.clone());
        item.tags = metadata.tags.clone();
        item.related = RelatedItems::from_named_map(&metadata.related)?;
        item.status = metadata.status;
        item.platform_object = Some(handle);
        Ok(item)
    }

    /// Backend id.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Cached backend handle.
    pub fn platform_object(&self) -> Option<&PlatformObject> {
        self.platform_object.as_ref()
    }

    /// Current status.
    pub fn status(&self) -> EntityStatus {
        self.status
    }

    /// True once terminal.
    pub fn done(&self) -> bool {
        self.status.is_terminal()
    }

    /// True when it succeeded.
    pub fn succeeded(&self) -> bool {
        self.status == EntityStatus::Succeeded
    }

    /// Applies a backend observation.
    pub fn observe_status(&mut self, observed: EntityStatus) -> Transition {
        apply_status(&mut self.status, observed, ItemType::WorkItem, self.id.as_deref())
    }

    /// Runs the file filter's pre-run callback, if any.
    pub fn pre_creation(&mut self) -> Result<(), OrchError> {
        let callback = self.file_filter.as_ref().and_then(|filter| filter.pre_run.clone());
        match callback {
            Some(callback) => callback(self),
            None => Ok(()),
        }
    }

    /// Records a successful backend creation.
    pub fn mark_created(&mut self, handle: PlatformObject) {
        self.id = Some(handle.id.clone());
        self.assets.freeze();
        self.platform_object = Some(handle);
    }

    /// Serializable descriptor.
    pub fn to_metadata(&self) -> Result<WorkItemMetadata, OrchError> {
        let id = self
            .id
            .clone()
            .ok_or_else(|| invalid("work_item.unsaved", "only created work items have metadata"))?;
        let command = serde_json::to_value(&self.command)
            .map_err(|err| OrchError::Serde(ErrorInfo::new("work_item.command", err.to_string())))?;
        Ok(WorkItemMetadata {
            id,
            name: self.name.clone(),
            tags: self.tags.clone(),
            status: self.status,
            command: Some(command),
            related: self.related.to_named_map(),
            assets: self.assets.records()?,
        })
    }
}

impl Identified for WorkItem {
    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn item_type(&self) -> ItemType {
        ItemType::WorkItem
    }

    fn name(&self) -> Option<&str> {
        Some(&self.name)
    }
}
