//! Asset collections keyed by `(relative_path, filename)`.
//!
//! A collection freezes once persisted; later mutations fail with
//! `FrozenCollection`.

use std::path::Path;

use orch_core::errors::{ErrorInfo, OrchError};
use orch_core::ids::{Identified, ItemType};
use orch_core::tags::Tags;
use tracing::debug;

use crate::asset::{normalize_relative_path, Asset, AssetRecord};
use crate::walk::{collect_directory, DirectoryOptions};

/// Ordered set of assets, unique by `(filename, relative_path)`.
///
/// A collection becomes frozen once a backend persists it; from then on every
/// mutation fails with [`OrchError::FrozenCollection`].
#[derive(Debug, Clone, Default)]
pub struct AssetCollection {
    id: Option<String>,
    assets: Vec<Asset>,
    tags: Tags,
    frozen: bool,
}

impl AssetCollection {
    /// Empty, mutable collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Unfrozen copy of `other` without its backend id.
    pub fn copy_of(other: &AssetCollection) -> Self {
        Self {
            id: None,
            assets: other.assets.clone(),
            tags: other.tags.clone(),
            frozen: false,
        }
    }

    /// Builds a collection from individual assets.
    pub fn from_assets<I: IntoIterator<Item = Asset>>(assets: I) -> Result<Self, OrchError> {
        let mut collection = Self::new();
        for asset in assets {
            collection.add(asset)?;
        }
        Ok(collection)
    }

    /// Builds a collection from a directory walk.
    pub fn from_directory(root: &Path, options: &DirectoryOptions) -> Result<Self, OrchError> {
        let mut collection = Self::new();
        collection.add_directory(root, options)?;
        Ok(collection)
    }

    /// Backend id, once persisted.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Records the backend id. An id cannot change once set.
    pub fn set_id(&mut self, id: impl Into<String>) -> Result<(), OrchError> {
        let id = id.into();
        match &self.id {
            Some(current) if *current != id => Err(OrchError::FrozenCollection(
                ErrorInfo::new("assets.id_immutable", "asset collection id is already set")
                    .with_entity(current.clone())
                    .with_context("requested", id),
            )),
            Some(_) => Ok(()),
            None => {
                self.id = Some(id);
                Ok(())
            }
        }
    }

    /// Marks the collection as persisted.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    /// True once persisted.
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    fn ensure_mutable(&self, operation: &str) -> Result<(), OrchError> {
        if !self.frozen {
            return Ok(());
        }
        let mut info = ErrorInfo::new("assets.frozen", "asset collection is frozen")
            .with_context("operation", operation)
            .with_hint("copy the collection with AssetCollection::copy_of before editing");
        if let Some(id) = &self.id {
            info = info.with_entity(id.clone());
        }
        Err(OrchError::FrozenCollection(info))
    }

    fn position(&self, filename: &str, relative_path: &str) -> Option<usize> {
        self.assets
            .iter()
            .position(|asset| asset.filename() == filename && asset.relative_path() == relative_path)
    }

    /// Adds `asset`. Returns `false` when an identical asset is already
    /// present; fails when the slot holds different content.
    pub fn add(&mut self, asset: Asset) -> Result<bool, OrchError> {
        self.ensure_mutable("add")?;
        let Some(idx) = self.position(asset.filename(), asset.relative_path()) else {
            self.assets.push(asset);
            return Ok(true);
        };
        let existing = &self.assets[idx];
        let (current, incoming) = (existing.checksum()?, asset.checksum()?);
        if current == incoming {
            debug!(path = %asset.job_path(), "identical asset already present");
            return Ok(false);
        }
        Err(OrchError::DuplicateAsset(
            ErrorInfo::new("assets.duplicate", "an asset with different content occupies this path")
                .with_context("path", asset.job_path())
                .with_context("existing_checksum", current)
                .with_context("incoming_checksum", incoming),
        ))
    }

    /// Adds `asset`, replacing whatever occupies its slot.
    pub fn add_or_replace(&mut self, asset: Asset) -> Result<(), OrchError> {
        self.ensure_mutable("add_or_replace")?;
        match self.position(asset.filename(), asset.relative_path()) {
            Some(idx) => self.assets[idx] = asset,
            None => self.assets.push(asset),
        }
        Ok(())
    }

    /// Adds every selected file below `root`; returns how many were new.
    pub fn add_directory(&mut self, root: &Path, options: &DirectoryOptions) -> Result<usize, OrchError> {
        self.ensure_mutable("add_directory")?;
        let mut added = 0;
        for asset in collect_directory(root, options)? {
            if self.add(asset)? {
                added += 1;
            }
        }
        debug!(root = %root.display(), added, "added asset directory");
        Ok(added)
    }

    /// Adds every asset of `other`; returns how many were new.
    pub fn merge(&mut self, other: &AssetCollection) -> Result<usize, OrchError> {
        self.ensure_mutable("merge")?;
        let mut added = 0;
        for asset in &other.assets {
            if self.add(asset.clone())? {
                added += 1;
            }
        }
        Ok(added)
    }

    /// Removes the asset at `(filename, relative_path)`.
    pub fn remove(&mut self, filename: &str, relative_path: &str) -> Result<Option<Asset>, OrchError> {
        self.ensure_mutable("remove")?;
        let relative_path = normalize_relative_path(relative_path)?;
        Ok(self
            .position(filename, &relative_path)
            .map(|idx| self.assets.remove(idx)))
    }

    /// Asset at `(filename, relative_path)`.
    pub fn get_one(&self, filename: &str, relative_path: &str) -> Option<&Asset> {
        let relative_path = normalize_relative_path(relative_path).ok()?;
        self.position(filename, &relative_path).map(|idx| &self.assets[idx])
    }

    /// Every asset named `filename`, whatever its directory.
    pub fn find_by_filename<'a>(&'a self, filename: &'a str) -> impl Iterator<Item = &'a Asset> + 'a {
        self.assets.iter().filter(move |asset| asset.filename() == filename)
    }

    /// True when an equal asset is present.
    pub fn has_asset(&self, asset: &Asset) -> bool {
        self.assets.iter().any(|candidate| candidate == asset)
    }

    /// Sum of asset sizes in bytes.
    pub fn total_size(&self) -> Result<u64, OrchError> {
        self.assets.iter().map(Asset::size).sum()
    }

    /// Tags of the collection.
    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    /// Replaces the tags.
    pub fn set_tags(&mut self, tags: Tags) -> Result<(), OrchError> {
        self.ensure_mutable("set_tags")?;
        self.tags = tags;
        Ok(())
    }

    /// Overlays `tags` on the existing ones.
    pub fn add_tags(&mut self, tags: &Tags) -> Result<(), OrchError> {
        self.ensure_mutable("add_tags")?;
        self.tags.merge(tags);
        Ok(())
    }

    /// Assets in insertion order.
    pub fn assets(&self) -> &[Asset] {
        &self.assets
    }

    /// Iterates over assets in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, Asset> {
        self.assets.iter()
    }

    /// Number of assets.
    pub fn len(&self) -> usize {
        self.assets.len()
    }

    /// True when empty.
    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    /// Metadata summaries of every asset.
    pub fn records(&self) -> Result<Vec<AssetRecord>, OrchError> {
        self.assets.iter().map(Asset::record).collect()
    }
}

impl Identified for AssetCollection {
    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn item_type(&self) -> ItemType {
        ItemType::AssetCollection
    }
}

impl<'a> IntoIterator for &'a AssetCollection {
    type Item = &'a Asset;
    type IntoIter = std::slice::Iter<'a, Asset>;

    fn into_iter(self) -> Self::IntoIter {
        self.assets.iter()
    }
}
