//! Assets and deduplicated asset collections.

pub mod asset;
pub mod collection;
pub mod walk;

pub use asset::{normalize_relative_path, Asset, AssetRecord};
pub use collection::AssetCollection;
pub use walk::{collect_directory, AssetFilter, DirectoryOptions, FilterMode};
