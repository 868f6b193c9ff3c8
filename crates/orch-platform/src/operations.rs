//! The contract a backend fulfils, one operations object per entity kind.

use std::collections::{BTreeMap, BTreeSet};

use orch_assets::{Asset, AssetCollection, AssetRecord};
use orch_core::errors::{ErrorInfo, OrchError};
use orch_core::ids::{Identified, ItemType, PlatformObject};
use orch_entities::{Experiment, Simulation, Suite, WorkItem};

fn unsupported(item_type: ItemType, operation: &str) -> OrchError {
    OrchError::Unsupported(
        ErrorInfo::new(format!("backend.{operation}"), "operation not supported by this backend")
            .with_context("item_type", item_type.as_str()),
    )
}

/// Backend operations for entities of kind `E`.
///
/// Backends implement `create_item`; callers go through `platform_create`,
/// which is a no-op returning the stored handle for entities that already
/// have an id. `refresh_status` applies observations through the entity's
/// status methods, which clamp backward reports.
pub trait ItemOperations<E: Identified>: Send + Sync {
    /// Kind handled by this object.
    fn item_type(&self) -> ItemType;

    /// Stored handle of `id`; `NotFound` when absent.
    fn get(&self, id: &str) -> Result<PlatformObject, OrchError>;

    /// Backend-side preparation before creation.
    fn pre_create(&self, _entity: &mut E) -> Result<(), OrchError> {
        Ok(())
    }

    /// Persists a new `entity` and returns its handle.
    fn create_item(&self, entity: &mut E) -> Result<PlatformObject, OrchError>;

    /// Persists `entity` unless it already has an id, in which case the
    /// stored handle is returned unchanged.
    fn platform_create(&self, entity: &mut E) -> Result<PlatformObject, OrchError> {
        match entity.id() {
            Some(id) => {
                let id = id.to_string();
                self.get(&id)
            }
            None => self.create_item(entity),
        }
    }

    /// Persists several entities; one result per entity, in input order.
    fn batch_create(&self, entities: &mut [E]) -> Vec<Result<PlatformObject, OrchError>> {
        entities
            .iter_mut()
            .map(|entity| self.platform_create(entity))
            .collect()
    }

    /// Backend-side bookkeeping after creation.
    fn post_create(&self, _entity: &mut E) -> Result<(), OrchError> {
        Ok(())
    }

    /// Starts execution.
    fn run_item(&self, _entity: &mut E) -> Result<(), OrchError> {
        Err(unsupported(self.item_type(), "run_item"))
    }

    /// Refreshes the status of `entity` (and of its children) in place.
    fn refresh_status(&self, entity: &mut E) -> Result<(), OrchError>;

    /// Contents of `files`, keyed by the requested path. A missing file
    /// fails the whole call with `AssetNotFound`.
    fn get_assets(&self, _entity: &E, _files: &[String]) -> Result<BTreeMap<String, Vec<u8>>, OrchError> {
        Err(unsupported(self.item_type(), "get_assets"))
    }

    /// Files available for `entity`.
    fn list_assets(&self, _entity: &E) -> Result<Vec<AssetRecord>, OrchError> {
        Err(unsupported(self.item_type(), "list_assets"))
    }

    /// Rebuilds the entity from its stored handle.
    fn to_entity(&self, handle: &PlatformObject) -> Result<E, OrchError>;

    /// Handles of the children of `id`, in creation order.
    fn children(&self, _id: &str) -> Result<Vec<PlatformObject>, OrchError> {
        Ok(Vec::new())
    }

    /// Handle of the parent of `id`.
    fn parent(&self, _id: &str) -> Result<Option<PlatformObject>, OrchError> {
        Ok(None)
    }

    /// Requests remote cancellation.
    fn cancel(&self, _entity: &mut E) -> Result<(), OrchError> {
        Err(unsupported(self.item_type(), "cancel"))
    }
}

/// Content-addressed storage of asset bytes, keyed by MD5 checksum.
pub trait BlobStore: Send + Sync {
    /// True when a blob with `checksum` is stored.
    fn contains(&self, checksum: &str) -> Result<bool, OrchError>;

    /// Stores the content of `asset` under its checksum.
    fn put(&self, asset: &Asset) -> Result<(), OrchError>;
}

/// A complete backend: one operations object per entity kind plus a blob
/// store.
pub trait Backend: Send + Sync {
    /// Backend name recorded in metadata.
    fn name(&self) -> &str;

    /// Suite operations.
    fn suites(&self) -> &dyn ItemOperations<Suite>;

    /// Experiment operations.
    fn experiments(&self) -> &dyn ItemOperations<Experiment>;

    /// Simulation operations.
    fn simulations(&self) -> &dyn ItemOperations<Simulation>;

    /// Asset collection operations.
    fn asset_collections(&self) -> &dyn ItemOperations<AssetCollection>;

    /// Work item operations.
    fn work_items(&self) -> &dyn ItemOperations<WorkItem>;

    /// Blob store used for asset deduplication.
    fn blobs(&self) -> &dyn BlobStore;

    /// Item kinds this backend persists.
    fn supported_types(&self) -> BTreeSet<ItemType> {
        ItemType::ALL.into_iter().collect()
    }

    /// Capability tags matched against task platform requirements.
    fn capabilities(&self) -> BTreeSet<String> {
        BTreeSet::new()
    }

    /// Generic handle lookup by kind.
    fn get(&self, id: &str, item_type: ItemType) -> Result<PlatformObject, OrchError> {
        match item_type {
            ItemType::Suite => self.suites().get(id),
            ItemType::Experiment => self.experiments().get(id),
            ItemType::Simulation => self.simulations().get(id),
            ItemType::AssetCollection => self.asset_collections().get(id),
            ItemType::WorkItem => self.work_items().get(id),
        }
    }

    /// Generic children lookup by kind.
    fn children(&self, id: &str, item_type: ItemType) -> Result<Vec<PlatformObject>, OrchError> {
        match item_type {
            ItemType::Suite => self.suites().children(id),
            ItemType::Experiment => self.experiments().children(id),
            ItemType::Simulation => self.simulations().children(id),
            ItemType::AssetCollection => self.asset_collections().children(id),
            ItemType::WorkItem => self.work_items().children(id),
        }
    }

    /// Generic parent lookup by kind.
    fn parent(&self, id: &str, item_type: ItemType) -> Result<Option<PlatformObject>, OrchError> {
        match item_type {
            ItemType::Suite => self.suites().parent(id),
            ItemType::Experiment => self.experiments().parent(id),
            ItemType::Simulation => self.simulations().parent(id),
            ItemType::AssetCollection => self.asset_collections().parent(id),
            ItemType::WorkItem => self.work_items().parent(id),
        }
    }
}
