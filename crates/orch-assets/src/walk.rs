//! Directory walks producing assets.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use globset::{Glob, GlobSet, GlobSetBuilder};
use orch_core::errors::{io_error, ErrorInfo, OrchError};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::asset::{normalize_relative_path, Asset};

/// Predicate applied to candidate assets during a directory walk.
pub type AssetFilter = Arc<dyn Fn(&Asset) -> bool + Send + Sync>;

/// How several filters combine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    /// Keep an asset when any filter accepts it.
    #[default]
    Or,
    /// Keep an asset only when every filter accepts it.
    And,
}

/// Options for [`crate::AssetCollection::add_directory`]. The default walk
/// is recursive with no filters.
#[derive(Clone)]
pub struct DirectoryOptions {
    /// Descend into sub-directories.
    pub recursive: bool,
    /// Drop the sub-path below the root; every asset lands in `prefix`.
    pub flatten: bool,
    /// Directory prepended to every relative path.
    pub prefix: Option<String>,
    /// Glob patterns, matched against the path below the root. Together they
    /// count as one filter.
    pub include: Vec<String>,
    /// Glob patterns that always reject.
    pub exclude: Vec<String>,
    /// Custom predicates.
    pub filters: Vec<AssetFilter>,
    /// Combination mode for `include` and `filters`.
    pub mode: FilterMode,
}

impl fmt::Debug for DirectoryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectoryOptions")
            .field("recursive", &self.recursive)
            .field("flatten", &self.flatten)
            .field("prefix", &self.prefix)
            .field("include", &self.include)
            .field("exclude", &self.exclude)
            .field("filters", &self.filters.len())
            .field("mode", &self.mode)
            .finish()
    }
}

impl Default for DirectoryOptions {
    fn default() -> Self {
        Self {
            recursive: true,
            flatten: false,
            prefix: None,
            include: Vec::new(),
            exclude: Vec::new(),
            filters: Vec::new(),
            mode: FilterMode::default(),
        }
    }
}

impl DirectoryOptions {
    /// Recursive walk with no filters.
    pub fn recursive() -> Self {
        Self::default()
    }

    /// Walk of the top-level files only.
    pub fn shallow() -> Self {
        Self {
            recursive: false,
            ..Self::default()
        }
    }

    /// Sets the relative path prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Adds an include glob.
    pub fn include(mut self, pattern: impl Into<String>) -> Self {
        self.include.push(pattern.into());
        self
    }

    /// Adds an exclude glob.
    pub fn exclude(mut self, pattern: impl Into<String>) -> Self {
        self.exclude.push(pattern.into());
        self
    }

    /// Adds a custom predicate.
    pub fn filter(mut self, filter: impl Fn(&Asset) -> bool + Send + Sync + 'static) -> Self {
        self.filters.push(Arc::new(filter));
        self
    }

    /// Sets the combination mode.
    pub fn mode(mut self, mode: FilterMode) -> Self {
        self.mode = mode;
        self
    }
}

fn build_globset(patterns: &[String]) -> Result<Option<GlobSet>, OrchError> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|err| {
            OrchError::Invalid(
                ErrorInfo::new("assets.glob", err.to_string()).with_context("pattern", pattern.clone()),
            )
        })?;
        builder.add(glob);
    }
    builder
        .build()
        .map(Some)
        .map_err(|err| OrchError::Invalid(ErrorInfo::new("assets.glob_build", err.to_string())))
}

fn posix(path: &Path) -> String {
    path.components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

struct Selector {
    include: Option<GlobSet>,
    exclude: Option<GlobSet>,
    filters: Vec<AssetFilter>,
    mode: FilterMode,
}

impl Selector {
    fn accepts(&self, below_root: &Path, asset: &Asset) -> bool {
        if self.exclude.as_ref().is_some_and(|set| set.is_match(below_root)) {
            return false;
        }
        let mut verdicts = self
            .filters
            .iter()
            .map(|filter| filter(asset))
            .collect::<Vec<_>>();
        if let Some(set) = &self.include {
            verdicts.push(set.is_match(below_root));
        }
        if verdicts.is_empty() {
            return true;
        }
        match self.mode {
            FilterMode::Or => verdicts.into_iter().any(|keep| keep),
            FilterMode::And => verdicts.into_iter().all(|keep| keep),
        }
    }
}

/// Walks `root` and returns the selected assets in a stable (sorted) order.
pub fn collect_directory(root: &Path, options: &DirectoryOptions) -> Result<Vec<Asset>, OrchError> {
    if !root.is_dir() {
        return Err(OrchError::Invalid(
            ErrorInfo::new("assets.not_a_directory", "asset directory does not exist")
                .with_context("path", root.display().to_string()),
        ));
    }
    let selector = Selector {
        include: build_globset(&options.include)?,
        exclude: build_globset(&options.exclude)?,
        filters: options.filters.clone(),
        mode: options.mode,
    };
    let prefix = normalize_relative_path(options.prefix.as_deref().unwrap_or(""))?;
    let mut walker = WalkDir::new(root).sort_by_file_name();
    if !options.recursive {
        walker = walker.max_depth(1);
    }

    let mut assets = Vec::new();
    for entry in walker {
        let entry = entry.map_err(|err| {
            let path = err.path().map(PathBuf::from).unwrap_or_else(|| root.to_path_buf());
            io_error("assets.walk", path.display(), err)
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let below_root = match entry.path().strip_prefix(root) {
            Ok(rel) => rel,
            Err(_) => continue,
        };
        let sub_dir = below_root.parent().map(posix).unwrap_or_default();
        let relative_path = match (options.flatten, prefix.is_empty(), sub_dir.is_empty()) {
            (true, _, _) | (false, _, true) => prefix.clone(),
            (false, true, false) => sub_dir,
            (false, false, false) => format!("{prefix}/{sub_dir}"),
        };
        let asset = Asset::from_path(entry.path(), &relative_path)?;
        if selector.accepts(below_root, &asset) {
            assets.push(asset);
        }
    }
    Ok(assets)
}
