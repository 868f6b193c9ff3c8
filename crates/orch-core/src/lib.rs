#![deny(missing_docs)]

//! Shared vocabulary of the orchestration core: errors, statuses, tags,
//! identifiers, id files and deterministic encoding helpers.

pub mod errors;
pub mod hash;
pub mod id_file;
pub mod ids;
pub mod serde;
pub mod status;
pub mod tags;

pub use errors::{ErrorInfo, ErrorKind, OrchError};
pub use id_file::{read_id_file, write_id_file, IdFileRecord};
pub use ids::{new_item_id, Identified, ItemType, PlatformObject};
pub use status::{EntityStatus, StatusSummary, Transition};
pub use tags::{TagLimits, Tags};
